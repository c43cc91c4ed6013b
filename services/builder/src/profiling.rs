//! Opt-in profiling around build runs.
//!
//! Profiling is configured once at start from the environment and passed
//! explicitly as a [`Profiler`]. Four independent backends exist:
//!
//! - thread activity sampling (`SJ_PROFILE`): periodic per-thread scheduler
//!   state and CPU ticks for the span, read from `/proc/self/task`
//! - CPU profiling (`PP_PROFILE`): process CPU time consumed by the span
//! - exec log (`EXEC_PROFILE`): one line per external command started
//! - trace export (`SHIPYARD_TRACE_EXPORT`): `tracing` spans per build
//!
//! Only one sampling/CPU span may be active per process; a concurrent
//! [`Profiler::span`] call is a silent no-op. Trace spans are exempt and
//! nest freely. The exec log is process-wide and tags each line with the
//! active sampling span, if any.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn, Span};

/// Pending exec-log lines before new ones are dropped.
const EXEC_LOG_CAPACITY: usize = 32;

/// Profiling errors.
#[derive(Debug, Error)]
pub enum ProfilingError {
    /// One backend could not start.
    #[error("{backend}: {source}")]
    Backend {
        backend: &'static str,
        #[source]
        source: io::Error,
    },

    /// Some backends failed to start.
    #[error("failed to start some profilers: {}", join_errors(.0))]
    Partial(Vec<ProfilingError>),
}

fn join_errors(errors: &[ProfilingError]) -> String {
    errors
        .iter()
        .map(|e| format!("[{e}]"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Profiling configuration.
#[derive(Debug, Clone)]
pub struct ProfilingConfig {
    /// Enable the thread activity sample log.
    pub thread_samples: bool,
    /// Enable CPU-time profiling.
    pub cpu_profile: bool,
    /// Log every external command the builder starts.
    pub exec_log: bool,
    /// Emit `tracing` spans around each build.
    pub trace_export: bool,
    /// Directory for profile files.
    pub profile_dir: PathBuf,
    /// Interval between thread samples.
    pub sample_interval: Duration,
}

impl Default for ProfilingConfig {
    fn default() -> Self {
        Self {
            thread_samples: false,
            cpu_profile: false,
            exec_log: false,
            trace_export: false,
            profile_dir: PathBuf::from("."),
            sample_interval: Duration::from_millis(100),
        }
    }
}

impl ProfilingConfig {
    /// Load profiling flags from environment variables.
    ///
    /// `SJ_PROFILE`, `PP_PROFILE` and `EXEC_PROFILE` are enabled by any
    /// value other than `0`.
    pub fn from_env() -> Self {
        let flag = |name: &str| std::env::var(name).map(|v| v != "0").unwrap_or(false);

        let thread_samples = flag("SJ_PROFILE");
        let cpu_profile = flag("PP_PROFILE");
        let exec_log = flag("EXEC_PROFILE");
        let trace_export = std::env::var("SHIPYARD_TRACE_EXPORT")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let profile_dir = std::env::var("PROF_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        Self {
            thread_samples,
            cpu_profile,
            exec_log,
            trace_export,
            profile_dir,
            ..Default::default()
        }
    }
}

/// A profiling backend that can be started for a named span.
pub trait ProfileBackend: Send + Sync {
    /// Short name used in file names and errors.
    fn kind(&self) -> &'static str;

    /// Start profiling `span`.
    fn start(&self, span: &str) -> Result<Box<dyn ActiveProfile>, ProfilingError>;
}

/// A running backend.
pub trait ActiveProfile: Send {
    /// Stop and flush.
    fn stop(self: Box<Self>);
}

struct Shared {
    backends: Vec<Box<dyn ProfileBackend>>,
    active: AtomicBool,
    /// Name of the running sampling/CPU span; empty when none.
    current_span: Mutex<String>,
    exec_log: Option<ExecLog>,
    trace_export: bool,
}

impl Shared {
    fn set_span(&self, name: &str) {
        if let Ok(mut current) = self.current_span.lock() {
            current.clear();
            current.push_str(name);
        }
    }
}

/// Process-wide profiling entry point. Cheap to clone.
///
/// The exec log is flushed and closed when the last clone is dropped.
#[derive(Clone)]
pub struct Profiler {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Profiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profiler")
            .field("backends", &self.shared.backends.len())
            .field("exec_log", &self.shared.exec_log.is_some())
            .field("trace_export", &self.shared.trace_export)
            .finish()
    }
}

impl Profiler {
    /// Build a profiler with the backends enabled in `config`.
    ///
    /// An exec log file that cannot be created is logged and disables the
    /// exec log; the other backends are unaffected.
    pub fn new(config: &ProfilingConfig) -> Self {
        let mut backends: Vec<Box<dyn ProfileBackend>> = Vec::new();
        if config.thread_samples {
            backends.push(Box::new(ThreadSampler {
                dir: config.profile_dir.clone(),
                interval: config.sample_interval,
            }));
        }
        if config.cpu_profile {
            backends.push(Box::new(CpuTimeProfiler {
                dir: config.profile_dir.clone(),
            }));
        }

        let exec_log = if config.exec_log {
            let path = profile_file(&config.profile_dir, "exec", "log");
            match ExecLog::create(&path) {
                Ok(log) => Some(log),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to create exec log; disabling");
                    None
                }
            }
        } else {
            None
        };

        Self::build(backends, exec_log, config.trace_export)
    }

    /// Build a profiler from explicit backends.
    pub fn with_backends(backends: Vec<Box<dyn ProfileBackend>>, trace_export: bool) -> Self {
        Self::build(backends, None, trace_export)
    }

    fn build(
        backends: Vec<Box<dyn ProfileBackend>>,
        exec_log: Option<ExecLog>,
        trace_export: bool,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                backends,
                active: AtomicBool::new(false),
                current_span: Mutex::new(String::new()),
                exec_log,
                trace_export,
            }),
        }
    }

    /// A profiler with everything off.
    pub fn disabled() -> Self {
        Self::with_backends(Vec::new(), false)
    }

    /// Start every enabled sampling/CPU backend for `name`.
    pub fn span(&self, name: &str) -> SpanStart {
        if self.shared.backends.is_empty() {
            return SpanStart::noop();
        }
        if self.shared.active.swap(true, Ordering::AcqRel) {
            debug!(span = %name, "Profiling span already active; skipping");
            return SpanStart::noop();
        }

        let mut running = Vec::new();
        let mut errors = Vec::new();
        for backend in &self.shared.backends {
            match backend.start(name) {
                Ok(active) => running.push(active),
                Err(e) => errors.push(e),
            }
        }

        let error = (!errors.is_empty()).then(|| ProfilingError::Partial(errors));
        if running.is_empty() {
            self.shared.active.store(false, Ordering::Release);
            return SpanStart {
                stop: ProfileSpan::noop(),
                started: false,
                error,
            };
        }

        self.shared.set_span(name);
        SpanStart {
            stop: ProfileSpan {
                running,
                guard: Some(Arc::clone(&self.shared)),
            },
            started: true,
            error,
        }
    }

    /// A trace span for one unit of work; exempt from the single-span guard.
    pub fn trace_span(&self, name: &str, artifact: &str) -> Span {
        if self.shared.trace_export {
            tracing::info_span!("shipyard", op = %name, artifact = %artifact)
        } else {
            Span::none()
        }
    }

    /// Whether a sampling/CPU span is currently active.
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Append `cmd` (program and arguments) to the exec log, if enabled.
    pub fn record_command(&self, cmd: &Command) {
        if self.shared.exec_log.is_none() {
            return;
        }
        let cmd = cmd.as_std();
        let mut line = cmd.get_program().to_string_lossy().into_owned();
        for arg in cmd.get_args() {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        self.record(&line);
    }

    /// Append a free-form message to the exec log, if enabled.
    pub fn record(&self, msg: &str) {
        let Some(log) = &self.shared.exec_log else {
            return;
        };
        let span = self
            .shared
            .current_span
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default();
        log.send(&span, msg);
    }
}

/// Outcome of [`Profiler::span`].
pub struct SpanStart {
    /// Stops whatever started. Dropping it also stops.
    pub stop: ProfileSpan,
    /// True if at least one backend started.
    pub started: bool,
    /// Soft error for backends that failed to start.
    pub error: Option<ProfilingError>,
}

impl SpanStart {
    fn noop() -> Self {
        Self {
            stop: ProfileSpan::noop(),
            started: false,
            error: None,
        }
    }
}

/// Running profiling span.
pub struct ProfileSpan {
    running: Vec<Box<dyn ActiveProfile>>,
    guard: Option<Arc<Shared>>,
}

impl ProfileSpan {
    fn noop() -> Self {
        Self {
            running: Vec::new(),
            guard: None,
        }
    }

    /// Stop the span now.
    ///
    /// The backends are stopped by the `Drop` impl; this only consumes the
    /// span so the stop point is explicit at the call site.
    pub fn stop(self) {}
}

impl Drop for ProfileSpan {
    fn drop(&mut self) {
        for active in self.running.drain(..) {
            active.stop();
        }
        if let Some(shared) = self.guard.take() {
            shared.set_span("");
            shared.active.store(false, Ordering::Release);
        }
    }
}

/// `{dir}/{bin}_{pid}_{kind}-{span}-{unix_secs}`
fn profile_file(dir: &Path, kind: &str, span: &str) -> PathBuf {
    let bin = std::env::args()
        .next()
        .and_then(|arg0| {
            Path::new(&arg0)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "shipyard".to_string());
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    dir.join(format!(
        "{bin}_{}_{kind}-{span}-{now}",
        std::process::id()
    ))
}

/// Channel-fed writer for the exec log.
///
/// Lines are `{local time} [{span}] {msg}`. Senders never block: when the
/// writer falls behind by more than [`EXEC_LOG_CAPACITY`] lines, new ones
/// are dropped.
struct ExecLog {
    tx: Option<SyncSender<String>>,
    writer: Option<JoinHandle<()>>,
}

impl ExecLog {
    fn create(path: &Path) -> io::Result<Self> {
        let mut file = File::create(path)?;
        let (tx, rx) = mpsc::sync_channel::<String>(EXEC_LOG_CAPACITY);
        let writer = std::thread::Builder::new()
            .name("shipyard-exec-log".to_string())
            .spawn(move || {
                for line in rx {
                    if let Err(e) = file.write_all(line.as_bytes()) {
                        warn!(error = %e, "Exec log write failed");
                        return;
                    }
                }
                let _ = file.flush();
            })?;
        Ok(Self {
            tx: Some(tx),
            writer: Some(writer),
        })
    }

    fn send(&self, span: &str, msg: &str) {
        let Some(tx) = &self.tx else {
            return;
        };
        let now = chrono::Local::now().format("%a %b %-d %H:%M:%S %Z %Y");
        match tx.try_send(format!("{now} [{span}] {msg}\n")) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("Exec log backlog full; dropping entry"),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

impl Drop for ExecLog {
    fn drop(&mut self) {
        // Closing the channel ends the writer loop once the backlog is written.
        self.tx.take();
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
    }
}

/// Periodically records the scheduler state and CPU ticks of every thread
/// in the process. No call stacks are captured.
struct ThreadSampler {
    dir: PathBuf,
    interval: Duration,
}

struct RunningSampler {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ProfileBackend for ThreadSampler {
    fn kind(&self) -> &'static str {
        "sj"
    }

    fn start(&self, span: &str) -> Result<Box<dyn ActiveProfile>, ProfilingError> {
        let err = |source| ProfilingError::Backend {
            backend: self.kind(),
            source,
        };
        let mut file = File::create(profile_file(&self.dir, self.kind(), span)).map_err(err)?;

        let stop = Arc::new(AtomicBool::new(false));
        let interval = self.interval;
        let span = span.to_string();
        let thread = std::thread::Builder::new()
            .name("shipyard-sampler".to_string())
            .spawn({
                let stop = Arc::clone(&stop);
                move || {
                    let started = Instant::now();
                    while !stop.load(Ordering::Acquire) {
                        let sample = thread_sample(started.elapsed(), &span);
                        if let Err(e) = file.write_all(sample.as_bytes()) {
                            warn!(error = %e, "Thread sampler write failed");
                            return;
                        }
                        std::thread::park_timeout(interval);
                    }
                    let _ = file.flush();
                }
            })
            .map_err(err)?;

        Ok(Box::new(RunningSampler {
            stop,
            thread: Some(thread),
        }))
    }
}

impl ActiveProfile for RunningSampler {
    fn stop(mut self: Box<Self>) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            let _ = thread.join();
        }
    }
}

/// One sample: a line per thread, `{elapsed}ms [{span}] {tid} {name} state=.. utime=.. stime=..`.
fn thread_sample(elapsed: Duration, span: &str) -> String {
    let ms = elapsed.as_millis();
    let Ok(tasks) = std::fs::read_dir("/proc/self/task") else {
        return format!("{ms:>8}ms [{span}] threads=unavailable\n");
    };

    let mut threads: Vec<(u64, PathBuf)> = tasks
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let tid = entry.file_name().to_str()?.parse().ok()?;
            Some((tid, entry.path()))
        })
        .collect();
    threads.sort_by_key(|(tid, _)| *tid);

    let mut out = String::new();
    for (tid, dir) in threads {
        let name = std::fs::read_to_string(dir.join("comm")).unwrap_or_default();
        let line = match read_stat(&dir.join("stat")) {
            Some(stat) => format!(
                "{ms:>8}ms [{span}] {tid} {} state={} utime={} stime={}\n",
                name.trim(),
                stat.state,
                stat.utime,
                stat.stime
            ),
            // The thread exited between listing and reading.
            None => continue,
        };
        out.push_str(&line);
    }
    out
}

/// Records process CPU time consumed during the span.
struct CpuTimeProfiler {
    dir: PathBuf,
}

struct RunningCpuProfile {
    file: File,
    span: String,
    started: Instant,
    start_ticks: Option<(u64, u64)>,
}

impl ProfileBackend for CpuTimeProfiler {
    fn kind(&self) -> &'static str {
        "pprof"
    }

    fn start(&self, span: &str) -> Result<Box<dyn ActiveProfile>, ProfilingError> {
        let file = File::create(profile_file(&self.dir, self.kind(), span)).map_err(|source| {
            ProfilingError::Backend {
                backend: self.kind(),
                source,
            }
        })?;
        Ok(Box::new(RunningCpuProfile {
            file,
            span: span.to_string(),
            started: Instant::now(),
            start_ticks: cpu_ticks(),
        }))
    }
}

impl ActiveProfile for RunningCpuProfile {
    fn stop(mut self: Box<Self>) {
        let wall_ms = self.started.elapsed().as_millis();
        let line = match (self.start_ticks, cpu_ticks()) {
            (Some((u0, s0)), Some((u1, s1))) => format!(
                "span={} wall_ms={wall_ms} user_ticks={} system_ticks={}\n",
                self.span,
                u1.saturating_sub(u0),
                s1.saturating_sub(s0)
            ),
            _ => format!("span={} wall_ms={wall_ms} cpu=unavailable\n", self.span),
        };
        if let Err(e) = self.file.write_all(line.as_bytes()) {
            warn!(error = %e, "CPU profile write failed");
        }
    }
}

/// Fields of a `/proc/.../stat` line.
struct ProcStat {
    state: char,
    utime: u64,
    stime: u64,
}

fn read_stat(path: &Path) -> Option<ProcStat> {
    let stat = std::fs::read_to_string(path).ok()?;
    // The command name may contain spaces; fields resume after the last ')'.
    let rest = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // state, utime and stime are fields 3, 14 and 15 of the full line.
    Some(ProcStat {
        state: fields.first()?.chars().next()?,
        utime: fields.get(11)?.parse().ok()?,
        stime: fields.get(12)?.parse().ok()?,
    })
}

/// (utime, stime) clock ticks of this process.
fn cpu_ticks() -> Option<(u64, u64)> {
    read_stat(Path::new("/proc/self/stat")).map(|s| (s.utime, s.stime))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    /// Backend that counts starts/stops and optionally fails.
    struct Counting {
        fail: bool,
        starts: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
    }

    struct CountingActive(Arc<AtomicUsize>);

    impl ActiveProfile for CountingActive {
        fn stop(self: Box<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl ProfileBackend for Counting {
        fn kind(&self) -> &'static str {
            "counting"
        }

        fn start(&self, _span: &str) -> Result<Box<dyn ActiveProfile>, ProfilingError> {
            if self.fail {
                return Err(ProfilingError::Backend {
                    backend: "counting",
                    source: io::Error::other("boom"),
                });
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingActive(Arc::clone(&self.stops))))
        }
    }

    fn counting(fail: bool) -> (Box<dyn ProfileBackend>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let starts = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        let backend = Box::new(Counting {
            fail,
            starts: Arc::clone(&starts),
            stops: Arc::clone(&stops),
        });
        (backend, starts, stops)
    }

    #[test]
    fn test_disabled_profiler_is_noop() {
        let start = Profiler::disabled().span("build");
        assert!(!start.started);
        assert!(start.error.is_none());
    }

    #[test]
    fn test_second_concurrent_span_is_silent_noop() {
        let (backend, starts, stops) = counting(false);
        let profiler = Profiler::with_backends(vec![backend], false);

        let first = profiler.span("build");
        assert!(first.started);
        assert!(profiler.is_active());

        let second = profiler.span("build");
        assert!(!second.started);
        assert!(second.error.is_none());
        assert_eq!(starts.load(Ordering::SeqCst), 1);

        second.stop.stop();
        assert!(profiler.is_active());

        first.stop.stop();
        assert!(!profiler.is_active());
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_partial_start_counts_as_started() {
        let (ok, _, stops) = counting(false);
        let (failing, _, _) = counting(true);
        let profiler = Profiler::with_backends(vec![ok, failing], false);

        let start = profiler.span("build");
        assert!(start.started);
        assert!(matches!(start.error, Some(ProfilingError::Partial(ref e)) if e.len() == 1));
        assert!(profiler.is_active());

        drop(start);
        assert!(!profiler.is_active());
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_all_backends_failing_releases_flag() {
        let (failing, _, _) = counting(true);
        let profiler = Profiler::with_backends(vec![failing], false);

        let start = profiler.span("build");
        assert!(!start.started);
        assert!(start.error.is_some());
        assert!(!profiler.is_active());
    }

    #[test]
    fn test_trace_spans_are_independent_of_guard() {
        let (backend, _, _) = counting(false);
        let profiler = Profiler::with_backends(vec![backend], true);
        let _active = profiler.span("build");

        let outer = profiler.trace_span("build", "app");
        let _entered = outer.enter();
        let _inner = profiler.trace_span("push", "app");
        assert!(profiler.is_active());
    }

    fn config(dir: &Path) -> ProfilingConfig {
        ProfilingConfig {
            profile_dir: dir.to_path_buf(),
            sample_interval: Duration::from_millis(5),
            ..Default::default()
        }
    }

    fn profile_files(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }

    fn file_containing(dir: &Path, fragment: &str) -> String {
        let path = profile_files(dir)
            .into_iter()
            .find(|p| p.to_string_lossy().contains(fragment))
            .unwrap_or_else(|| panic!("no profile file matching {fragment}"));
        std::fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_file_backends_write_profiles() {
        let dir = TempDir::new().unwrap();
        let profiler = Profiler::new(&ProfilingConfig {
            thread_samples: true,
            cpu_profile: true,
            ..config(dir.path())
        });

        let start = profiler.span("build");
        assert!(start.started);
        assert!(start.error.is_none());
        std::thread::sleep(Duration::from_millis(20));
        start.stop.stop();

        let names: Vec<String> = profile_files(dir.path())
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.iter().any(|n| n.contains("_sj-build-")));
        assert!(names.iter().any(|n| n.contains("_pprof-build-")));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_thread_sampler_records_named_threads() {
        let dir = TempDir::new().unwrap();
        let profiler = Profiler::new(&ProfilingConfig {
            thread_samples: true,
            ..config(dir.path())
        });

        let start = profiler.span("build");
        std::thread::sleep(Duration::from_millis(20));
        start.stop.stop();

        let samples = file_containing(dir.path(), "_sj-build-");
        let sampler = samples
            .lines()
            .find(|l| l.contains(" shipyard-sample"))
            .expect("sampler thread missing from samples");
        assert!(sampler.contains("[build]"));
        assert!(sampler.contains(" state="));
        assert!(sampler.contains(" utime="));
        assert!(sampler.contains(" stime="));
    }

    #[test]
    fn test_exec_log_records_commands_with_active_span() {
        let dir = TempDir::new().unwrap();
        let profiler = Profiler::new(&ProfilingConfig {
            thread_samples: true,
            exec_log: true,
            ..config(dir.path())
        });

        let mut cmd = Command::new("docker");
        cmd.args(["image", "inspect", "app:v1"]);

        profiler.record_command(&cmd);
        let start = profiler.span("build");
        assert!(start.started);
        profiler.record_command(&cmd);
        start.stop.stop();
        profiler.record("done");
        drop(profiler);

        let log = file_containing(dir.path(), "_exec-log-");
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with(" [] docker image inspect app:v1"));
        assert!(lines[1].ends_with(" [build] docker image inspect app:v1"));
        assert!(lines[2].ends_with(" [] done"));
    }

    #[test]
    fn test_exec_log_disabled_when_file_cannot_be_created() {
        let dir = TempDir::new().unwrap();
        let profiler = Profiler::new(&ProfilingConfig {
            exec_log: true,
            ..config(&dir.path().join("missing"))
        });

        profiler.record("ignored");
        assert!(format!("{profiler:?}").contains("exec_log: false"));
    }
}
