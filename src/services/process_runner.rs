//! Runs one check as a supervised subprocess.
//!
//! The runner never blocks on a single `wait`: it polls `try_wait` on a fixed
//! interval, sampling the child's CPU usage at each poll, and sleeps between
//! polls. stdout and stderr are drained by background tasks into shared
//! buffers so whatever was printed before a timeout is still reported.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::CheckError;
use crate::domain::models::{CheckDefinition, CheckResult, ExecutionConfig, QaEvent};
use crate::domain::ports::CheckExecutor;
use crate::services::event_bus::EventBus;
use crate::services::output_parser::OutputParser;

// ---------------------------------------------------------------------------
// RunnerPhase
// ---------------------------------------------------------------------------

/// Supervision state of one running child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerPhase {
    Running,
    /// Alive but idle for longer than the stall threshold.
    Stalled,
    TimedOut,
    Cancelled,
    Exited,
}

/// What one poll observed.
#[derive(Debug, Clone, Copy)]
pub struct PollObservation {
    pub exited: bool,
    pub cancelled: bool,
    pub elapsed: Duration,
    /// Time since the child last used at least the stall CPU threshold.
    pub idle_for: Duration,
}

/// Limits the phase machine compares observations against.
#[derive(Debug, Clone, Copy)]
pub struct PhaseLimits {
    pub timeout: Duration,
    pub stall_threshold: Duration,
}

impl RunnerPhase {
    /// Next phase given one poll's observation.
    ///
    /// An exit observed in the same poll as a timeout or cancellation wins.
    pub fn advance(self, obs: &PollObservation, limits: &PhaseLimits) -> Self {
        if obs.exited {
            Self::Exited
        } else if obs.cancelled {
            Self::Cancelled
        } else if obs.elapsed >= limits.timeout {
            Self::TimedOut
        } else if obs.idle_for >= limits.stall_threshold {
            Self::Stalled
        } else {
            Self::Running
        }
    }

    pub fn is_final(self) -> bool {
        matches!(self, Self::TimedOut | Self::Cancelled | Self::Exited)
    }
}

// ---------------------------------------------------------------------------
// RunnerConfig
// ---------------------------------------------------------------------------

/// Process supervision settings.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Project root; working directory for checks and `{root}` expansion.
    pub root: PathBuf,
    pub poll_interval: Duration,
    pub stall_threshold: Duration,
    pub stall_cpu_percent: f32,
    pub default_timeout_secs: u64,
    /// Grace period between SIGTERM and SIGKILL.
    pub term_grace: Duration,
}

impl RunnerConfig {
    pub fn from_execution(config: &ExecutionConfig, root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            stall_threshold: Duration::from_secs(config.stall_threshold_secs),
            stall_cpu_percent: config.stall_cpu_percent,
            default_timeout_secs: config.default_timeout_secs,
            term_grace: Duration::from_millis(config.term_grace_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// ProcessRunner
// ---------------------------------------------------------------------------

type SharedBuffer = Arc<Mutex<Vec<u8>>>;

/// Executes checks as OS subprocesses.
pub struct ProcessRunner {
    config: RunnerConfig,
    parser: OutputParser,
    events: Option<Arc<EventBus>>,
}

impl ProcessRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            parser: OutputParser::new(),
            events: None,
        }
    }

    /// Publish `PossibleHang` events on `bus`.
    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    fn working_dir(&self, check: &CheckDefinition) -> PathBuf {
        match &check.working_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => self.config.root.join(dir),
            None => self.config.root.clone(),
        }
    }

    async fn run_child(
        &self,
        check: &CheckDefinition,
        argv: &[String],
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<CheckResult, CheckError> {
        let (program, args) = argv.split_first().ok_or(CheckError::EmptyCommand)?;
        let timeout_secs = check.timeout_secs.unwrap_or(self.config.default_timeout_secs);
        let limits = PhaseLimits {
            timeout: Duration::from_secs(timeout_secs),
            stall_threshold: self.config.stall_threshold,
        };

        let mut child = spawn(program, args, &self.working_dir(check))?;
        let stdout = Arc::new(Mutex::new(Vec::new()));
        let stderr = Arc::new(Mutex::new(Vec::new()));
        let readers = [
            child.stdout.take().map(|s| drain(s, stdout.clone())),
            child.stderr.take().map(|s| drain(s, stderr.clone())),
        ];

        let mut sys = System::new();
        let sys_pid = child.id().map(Pid::from_u32);
        let mut last_active = Instant::now();
        let mut possible_hang = false;
        let mut phase = RunnerPhase::Running;

        let exit_status: Option<ExitStatus> = loop {
            let exit = child.try_wait().map_err(CheckError::Wait)?;

            let cpu = sys_pid.and_then(|pid| sample_cpu(&mut sys, pid));
            match cpu {
                Some(cpu) if cpu < self.config.stall_cpu_percent => {}
                _ => last_active = Instant::now(),
            }

            let obs = PollObservation {
                exited: exit.is_some(),
                cancelled: cancel.is_cancelled(),
                elapsed: started.elapsed(),
                idle_for: last_active.elapsed(),
            };
            let next = phase.advance(&obs, &limits);
            if next == RunnerPhase::Stalled && phase != RunnerPhase::Stalled {
                possible_hang = true;
                self.signal_possible_hang(check, obs.idle_for, cpu.unwrap_or(0.0));
            }
            phase = next;

            match phase {
                RunnerPhase::Exited => break exit,
                RunnerPhase::TimedOut => {
                    tracing::warn!(check_id = %check.id, timeout_secs, "check timed out, terminating");
                    self.terminate(&mut child).await;
                    finish_readers(readers, self.config.term_grace).await;
                    let mut result = CheckResult::timed_out(
                        &check.id,
                        take_string(&stdout),
                        take_string(&stderr),
                        started.elapsed(),
                        timeout_secs,
                    );
                    result.possible_hang = possible_hang;
                    return Ok(result);
                }
                RunnerPhase::Cancelled => {
                    self.terminate(&mut child).await;
                    finish_readers(readers, self.config.term_grace).await;
                    return Err(CheckError::Cancelled("stage cancelled".to_string()));
                }
                RunnerPhase::Running | RunnerPhase::Stalled => {}
            }

            tokio::select! {
                () = tokio::time::sleep(self.config.poll_interval) => {}
                () = cancel.cancelled() => {}
            }
        };

        finish_readers(readers, self.config.term_grace).await;
        let mut result = CheckResult::from_exit(
            &check.id,
            exit_status.and_then(|s| s.code()),
            take_string(&stdout),
            take_string(&stderr),
            started.elapsed(),
        );
        result.possible_hang = possible_hang;
        Ok(result)
    }

    fn signal_possible_hang(&self, check: &CheckDefinition, idle_for: Duration, cpu_percent: f32) {
        tracing::warn!(
            check_id = %check.id,
            idle_secs = idle_for.as_secs(),
            cpu_percent,
            "possible hang: process alive but idle"
        );
        if let Some(bus) = &self.events {
            bus.publish(QaEvent::PossibleHang {
                check_id: check.id.clone(),
                idle_secs: idle_for.as_secs(),
                cpu_percent,
            });
        }
    }

    /// SIGTERM the process group, then SIGKILL after the grace period.
    async fn terminate(&self, child: &mut Child) {
        if self.terminate_group(child).await {
            return;
        }
        if let Err(e) = child.kill().await {
            tracing::debug!(error = %e, "kill after grace period failed");
        }
    }

    /// Returns true when the leader exited within the grace period.
    #[cfg(unix)]
    async fn terminate_group(&self, child: &mut Child) -> bool {
        use nix::sys::signal::Signal;

        let Some(pid) = child.id() else {
            return false;
        };
        signal_group(pid, Signal::SIGTERM);
        let exited = tokio::time::timeout(self.config.term_grace, child.wait())
            .await
            .is_ok();
        // Nothing the leader spawned may outlive it.
        signal_group(pid, Signal::SIGKILL);
        exited
    }

    #[cfg(not(unix))]
    async fn terminate_group(&self, _child: &mut Child) -> bool {
        false
    }
}

#[async_trait]
impl CheckExecutor for ProcessRunner {
    async fn execute(
        &self,
        check: &CheckDefinition,
        files: &[PathBuf],
        cancel: &CancellationToken,
    ) -> CheckResult {
        let started = Instant::now();

        if check.takes_files() && check.scoped_files(files).is_empty() {
            tracing::debug!(check_id = %check.id, "no files in scope, skipping");
            return CheckResult::from_exit(&check.id, Some(0), String::new(), String::new(), Duration::ZERO);
        }

        let argv = check.render_argv(files, &self.config.root);
        tracing::info!(check_id = %check.id, argv = ?argv, "running check");

        let mut result = match self.run_child(check, &argv, cancel, started).await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(check_id = %check.id, error = %err, "check did not complete");
                CheckResult::errored(&check.id, err.to_string(), started.elapsed())
            }
        };
        result.issue_count = self.parser.reported_count(check, &result);

        tracing::info!(
            check_id = %check.id,
            status = %result.status,
            exit_code = ?result.exit_code,
            duration_ms = result.duration_ms,
            issue_count = result.issue_count,
            "check finished"
        );
        result
    }
}

fn spawn(program: &str, args: &[String], cwd: &Path) -> Result<Child, CheckError> {
    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    command.spawn().map_err(|source| CheckError::StartFailed {
        program: program.to_string(),
        source,
    })
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = nix::sys::signal::killpg(nix::unistd::Pid::from_raw(raw), signal) {
        tracing::trace!(pid, ?signal, error = %e, "signal to process group failed");
    }
}

fn sample_cpu(sys: &mut System, pid: Pid) -> Option<f32> {
    sys.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::new().with_cpu(),
    );
    sys.process(pid).map(sysinfo::Process::cpu_usage)
}

fn drain<R>(mut reader: R, buffer: SharedBuffer) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(&chunk[..n]);
                    }
                }
            }
        }
    })
}

/// Wait briefly for the readers to hit EOF, then abandon them.
async fn finish_readers(readers: [Option<JoinHandle<()>>; 2], grace: Duration) {
    for handle in readers.into_iter().flatten() {
        let abort = handle.abort_handle();
        if tokio::time::timeout(grace, handle).await.is_err() {
            abort.abort();
        }
    }
}

fn take_string(buffer: &SharedBuffer) -> String {
    buffer
        .lock()
        .map(|buf| String::from_utf8_lossy(&buf).into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::CheckStatus;

    fn runner() -> ProcessRunner {
        let config = RunnerConfig {
            root: std::env::temp_dir(),
            poll_interval: Duration::from_millis(20),
            stall_threshold: Duration::from_secs(60),
            stall_cpu_percent: 1.0,
            default_timeout_secs: 30,
            term_grace: Duration::from_millis(500),
        };
        ProcessRunner::new(config)
    }

    fn limits() -> PhaseLimits {
        PhaseLimits {
            timeout: Duration::from_secs(5),
            stall_threshold: Duration::from_secs(2),
        }
    }

    fn obs(exited: bool, cancelled: bool, elapsed: u64, idle: u64) -> PollObservation {
        PollObservation {
            exited,
            cancelled,
            elapsed: Duration::from_secs(elapsed),
            idle_for: Duration::from_secs(idle),
        }
    }

    #[test]
    fn phase_transitions() {
        let l = limits();
        assert_eq!(RunnerPhase::Running.advance(&obs(false, false, 1, 0), &l), RunnerPhase::Running);
        assert_eq!(RunnerPhase::Running.advance(&obs(false, false, 3, 3), &l), RunnerPhase::Stalled);
        assert_eq!(RunnerPhase::Stalled.advance(&obs(false, false, 4, 0), &l), RunnerPhase::Running);
        assert_eq!(RunnerPhase::Stalled.advance(&obs(false, false, 5, 5), &l), RunnerPhase::TimedOut);
        assert_eq!(RunnerPhase::Running.advance(&obs(false, true, 1, 0), &l), RunnerPhase::Cancelled);
        assert_eq!(RunnerPhase::Running.advance(&obs(true, true, 9, 9), &l), RunnerPhase::Exited);
        assert!(RunnerPhase::Exited.is_final());
        assert!(!RunnerPhase::Stalled.is_final());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn passing_and_failing_exit_codes() {
        let runner = runner();
        let cancel = CancellationToken::new();

        let ok = runner
            .execute(&CheckDefinition::shell("ok", "echo hello"), &[], &cancel)
            .await;
        assert_eq!(ok.status, CheckStatus::Passed);
        assert_eq!(ok.stdout.trim(), "hello");
        assert_eq!(ok.issue_count, 0);

        let failed = runner
            .execute(&CheckDefinition::shell("bad", "echo oops >&2; exit 3"), &[], &cancel)
            .await;
        assert_eq!(failed.status, CheckStatus::Failed);
        assert_eq!(failed.exit_code, Some(3));
        assert_eq!(failed.stderr.trim(), "oops");
        assert!(failed.error.is_none());
        assert_eq!(failed.issue_count, 1);
    }

    #[tokio::test]
    async fn missing_binary_is_error() {
        let check = CheckDefinition::new("ghost", vec!["definitely-not-a-real-binary-4821".into()]);
        let result = runner().execute(&check, &[], &CancellationToken::new()).await;

        assert_eq!(result.status, CheckStatus::Error);
        assert!(result.error.unwrap().contains("definitely-not-a-real-binary-4821"));
    }

    #[tokio::test]
    async fn empty_command_is_error() {
        let check = CheckDefinition::new("empty", vec![]);
        let result = runner().execute(&check, &[], &CancellationToken::new()).await;
        assert_eq!(result.status, CheckStatus::Error);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_keeps_partial_output() {
        let check = CheckDefinition::shell("slow", "echo started; sleep 30").with_timeout_secs(1);
        let started = Instant::now();
        let result = runner().execute(&check, &[], &CancellationToken::new()).await;

        assert_eq!(result.status, CheckStatus::Timeout);
        assert_eq!(result.stdout.trim(), "started");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn idle_process_signals_possible_hang() {
        let mut runner = runner();
        runner.config.stall_threshold = Duration::from_millis(200);
        runner.config.stall_cpu_percent = 50.0;
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let runner = runner.with_events(bus);

        let result = runner
            .execute(&CheckDefinition::shell("idle", "sleep 1"), &[], &CancellationToken::new())
            .await;

        assert_eq!(result.status, CheckStatus::Passed);
        assert!(result.possible_hang);
        let envelope = rx.recv().await.unwrap();
        assert!(matches!(envelope.event, QaEvent::PossibleHang { ref check_id, .. } if check_id == "idle"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_kills_child() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result = runner()
            .execute(&CheckDefinition::shell("long", "sleep 30"), &[], &cancel)
            .await;

        assert_eq!(result.status, CheckStatus::Error);
        assert!(result.error.unwrap().contains("cancelled"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn files_placeholder_expands_scoped_files() {
        let check = CheckDefinition::new(
            "echo-files",
            vec!["sh".into(), "-c".into(), "echo \"$@\"".into(), "sh".into(), "{files}".into()],
        )
        .with_scope(&["*.py"]);
        let files = vec![PathBuf::from("a.py"), PathBuf::from("b.txt"), PathBuf::from("c.py")];

        let result = runner().execute(&check, &files, &CancellationToken::new()).await;
        assert_eq!(result.stdout.trim(), "a.py c.py");
    }

    #[tokio::test]
    async fn nothing_in_scope_skips_spawn() {
        let check = CheckDefinition::new("never", vec!["definitely-not-a-real-binary".into(), "{files}".into()])
            .with_scope(&["*.rs"]);
        let result = runner()
            .execute(&check, &[PathBuf::from("a.py")], &CancellationToken::new())
            .await;
        assert_eq!(result.status, CheckStatus::Passed);
    }
}
