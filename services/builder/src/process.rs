//! Helpers for running external tools.

use std::process::{Output, Stdio};

use tokio::process::Command;

/// A command whose child is killed if the awaiting future is dropped,
/// so cancelling the caller also stops the process.
pub(crate) fn command(program: &str) -> Command {
    let mut cmd = Command::new(program);
    cmd.kill_on_drop(true).stdin(Stdio::null());
    cmd
}

/// Raw diagnostic text of a failed process: stderr, or stdout if stderr is empty.
pub(crate) fn diagnostic(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.trim().is_empty() {
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    } else {
        stderr.trim().to_string()
    }
}

/// Stdout of a process as trimmed UTF-8.
pub(crate) fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}
