//! Cancellation and deadlines for blocking operations.
//!
//! Every external call (build, tag, push, disk usage, remove) takes a
//! [`Cancellation`] and aborts promptly once it fires. Cancellation is
//! driven by a `watch` channel; a deadline may be layered on top.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

/// Why an operation was aborted.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Triggers cancellation for every [`Cancellation`] derived from it.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Fire cancellation.
    pub fn cancel(&self) {
        // Receivers may already be gone.
        let _ = self.tx.send(true);
    }
}

/// Cancellation token with an optional deadline.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    rx: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

impl Cancellation {
    /// Create a linked handle/token pair.
    pub fn new() -> (CancelHandle, Cancellation) {
        let (tx, rx) = watch::channel(false);
        (
            CancelHandle { tx },
            Cancellation {
                rx: Some(rx),
                deadline: None,
            },
        )
    }

    /// A token that never fires.
    pub fn never() -> Self {
        Self::default()
    }

    /// Derive a token that additionally expires after `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a token that additionally expires at `deadline`.
    ///
    /// An earlier existing deadline wins.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        };
        Self {
            rx: self.rx.clone(),
            deadline: Some(deadline),
        }
    }

    /// Returns the reason if the token has already fired.
    pub fn reason(&self) -> Option<CancelReason> {
        if self.rx.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Some(CancelReason::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(CancelReason::DeadlineExceeded);
        }
        None
    }

    /// Returns true if the token has already fired.
    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// Wait until the token fires.
    pub async fn cancelled(&self) -> CancelReason {
        let signal = async {
            match self.rx.clone() {
                Some(mut rx) => loop {
                    if *rx.borrow_and_update() {
                        return;
                    }
                    if rx.changed().await.is_err() {
                        // Handle dropped without cancelling: only the deadline can fire now.
                        std::future::pending::<()>().await;
                    }
                },
                None => std::future::pending::<()>().await,
            }
        };
        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = signal => CancelReason::Cancelled,
            _ = deadline => CancelReason::DeadlineExceeded,
        }
    }

    /// Drive `fut` to completion unless the token fires first.
    ///
    /// A token that has already fired never polls `fut`.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, CancelReason>
    where
        F: Future,
    {
        if let Some(reason) = self.reason() {
            return Err(reason);
        }

        tokio::select! {
            biased;
            reason = self.cancelled() => Err(reason),
            out = fut => Ok(out),
        }
    }
}
