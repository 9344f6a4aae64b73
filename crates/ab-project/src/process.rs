//! Process supervision.
//!
//! A [`ProcessSupervisor`] owns at most one live child per project. Children
//! are spawned in their own process group (on Unix) so a stop reaches
//! everything the project started, including the program a `go run`
//! wrapper launches.
//!
//! # Stopping
//!
//! Stop prefers the tracked handle: the process group gets `SIGTERM`, then
//! `SIGKILL` once the grace period has passed (Windows: `taskkill /T /F`).
//! Without a tracked handle, processes are looked up by executable: on Unix
//! by the absolute path they were started with (`pkill -f`), since the
//! kernel's process name is cut to 15 bytes; on Windows by image name
//! (`taskkill /IM`). That path is what clears an instance left behind by an
//! earlier supervisor run.

use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use ab_core::{ProcessConfig, ProjectDecl, ProjectLayout};
use camino::{Utf8Path, Utf8PathBuf};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

use crate::error::ProcessError;
use crate::startup::{StartupFailure, classify_startup_failure};

/// Spawn attempts when the executable is still open for writing elsewhere.
const SPAWN_RETRIES: u32 = 5;
const SPAWN_RETRY_DELAY: Duration = Duration::from_millis(25);

/// Outcome of [`ProcessSupervisor::start_direct`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectStart {
    /// A daemon came up cleanly and is now the tracked process.
    Started {
        /// The new process.
        pid: u32,
    },

    /// A non-daemon project ran; its output so far has been logged.
    Finished {
        /// Captured output during the settle window.
        output: String,
    },

    /// The start failed for a reason other than a port conflict.
    Failed {
        /// Captured output, for the error artifact.
        output: String,
    },
}

/// Owns the running process of one project.
#[derive(Debug)]
pub struct ProcessSupervisor {
    project: String,
    root: Utf8PathBuf,
    program: Utf8PathBuf,
    script: Utf8PathBuf,
    process_name: Option<String>,
    args: Vec<String>,
    config: ProcessConfig,
    tracked: Option<TrackedProcess>,
}

#[derive(Debug)]
struct TrackedProcess {
    child: Child,
    pid: u32,
}

impl ProcessSupervisor {
    /// Creates a supervisor for `decl`.
    ///
    /// The supervised program is the built executable, or the build script
    /// itself for the run strategy.
    #[must_use]
    pub fn new(decl: &ProjectDecl, layout: &ProjectLayout, config: ProcessConfig) -> Self {
        Self {
            project: decl.name.clone(),
            root: layout.root.clone(),
            program: layout
                .executable
                .clone()
                .unwrap_or_else(|| layout.script_path.clone()),
            script: layout.script_path.clone(),
            process_name: layout.process_name.clone(),
            args: decl.args.clone(),
            config,
            tracked: None,
        }
    }

    /// Returns the pid of the tracked process.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.tracked.as_ref().map(|tracked| tracked.pid)
    }

    /// Returns `true` if a tracked process is alive.
    pub fn is_running(&mut self) -> bool {
        self.forget_exited();
        self.tracked.is_some()
    }

    /// Spawns the program and tracks it.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::AlreadyRunning`] while a tracked process is
    /// alive and [`ProcessError::Spawn`] if the program cannot be started.
    pub async fn start(&mut self) -> Result<u32, ProcessError> {
        self.forget_exited();
        if let Some(tracked) = &self.tracked {
            return Err(ProcessError::AlreadyRunning { pid: tracked.pid });
        }

        let mut cmd = self.command(&self.program);
        cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        let child = spawn_retrying(&mut cmd)
            .await
            .map_err(|source| ProcessError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        let pid = child_pid(&child, &self.program)?;

        tracing::info!(project = %self.project, pid, program = %self.program, "Process started");
        self.tracked = Some(TrackedProcess { child, pid });
        Ok(pid)
    }

    /// Stops the project's process.
    ///
    /// With a tracked handle, the handle is terminated; a handle whose
    /// process already exited counts as stopped. Without one, processes
    /// are terminated by executable path.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::KillFailed`] if termination fails (the handle
    /// stays tracked), [`ProcessError::NotFound`] if no process matches the
    /// name, and [`ProcessError::Untracked`] if there is neither a handle
    /// nor a name.
    pub async fn stop(&mut self) -> Result<(), ProcessError> {
        let Some(mut tracked) = self.tracked.take() else {
            return self.stop_by_name().await;
        };

        match tracked.child.try_wait() {
            Ok(Some(status)) => {
                // Reaped: the pid may already belong to someone else.
                tracing::debug!(project = %self.project, pid = tracked.pid, %status, "Process had already exited");
                return Ok(());
            }
            Ok(None) => {}
            Err(e) => {
                self.tracked = Some(tracked);
                return Err(ProcessError::Io(e));
            }
        }

        match terminate(&mut tracked, self.config.stop_grace()).await {
            Ok(()) => {
                tracing::info!(project = %self.project, pid = tracked.pid, "Process stopped");
                Ok(())
            }
            Err(e) => {
                self.tracked = Some(tracked);
                Err(e)
            }
        }
    }

    /// Stops the tracked process and starts a new one.
    ///
    /// If the stop fails, nothing is started and the old handle stays
    /// tracked.
    ///
    /// # Errors
    ///
    /// Returns the error of [`stop`](Self::stop) or [`start`](Self::start).
    pub async fn restart(&mut self) -> Result<u32, ProcessError> {
        self.stop().await?;
        self.start().await
    }

    /// Terminates instances left over from an earlier run, by executable.
    ///
    /// Does nothing while a handle is tracked. Finding nothing is not an
    /// error; other failures are logged.
    pub async fn reap_stale(&mut self) {
        if self.tracked.is_some() || self.process_name.is_none() {
            return;
        }
        match self.stop_by_name().await {
            Ok(()) => tracing::info!(project = %self.project, "Stopped a stale instance"),
            Err(e) if e.is_not_found() => {}
            Err(e) => tracing::warn!(project = %self.project, error = %e, "Could not reap stale instances"),
        }
    }

    /// Runs the build script directly and decides after the settle delay
    /// whether the start succeeded.
    ///
    /// A daemon has started when, after the settle delay, it is still
    /// running and has written nothing to standard output. It then replaces
    /// the tracked process. A non-daemon always counts as finished and its
    /// output is logged.
    ///
    /// When a daemon fails with an "address in use" signature and a previous
    /// instance is tracked, that instance is stopped and the start is
    /// retried once.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Spawn`] if the script cannot be started,
    /// [`ProcessError::AddressInUse`] if the port stays taken, and stop
    /// errors of the previous instance.
    pub async fn start_direct(&mut self, daemon: bool) -> Result<DirectStart, ProcessError> {
        self.forget_exited();
        let mut retried = false;

        loop {
            let mut attempt = self.spawn_captured().await?;
            tokio::time::sleep(self.config.settle()).await;
            let exited = attempt.child.try_wait()?.is_some();
            let (stdout, stderr) = attempt.capture.seal();

            if !daemon {
                let output = join_output(&stdout, &stderr);
                log_output(&self.project, &output);
                if !exited {
                    self.adopt(attempt).await?;
                }
                return Ok(DirectStart::Finished { output });
            }

            if !exited && stdout.trim().is_empty() {
                let pid = attempt.pid;
                self.adopt(attempt).await?;
                return Ok(DirectStart::Started { pid });
            }

            discard(&mut attempt, self.config.stop_grace()).await;

            match classify_startup_failure(&stderr) {
                StartupFailure::AddressInUse if !retried && self.tracked.is_some() => {
                    tracing::warn!(
                        project = %self.project,
                        "Address in use, stopping the previous instance and retrying"
                    );
                    self.stop().await?;
                    retried = true;
                }
                StartupFailure::AddressInUse => {
                    return Err(ProcessError::AddressInUse { output: stderr });
                }
                StartupFailure::Other => {
                    return Ok(DirectStart::Failed {
                        output: join_output(&stdout, &stderr),
                    });
                }
            }
        }
    }

    /// Replaces the tracked process with `attempt`, stopping the old one.
    ///
    /// If the old process cannot be stopped, the new one is discarded so a
    /// single handle stays tracked.
    async fn adopt(&mut self, mut attempt: Attempt) -> Result<(), ProcessError> {
        if self.tracked.is_some() {
            if let Err(e) = self.stop().await {
                discard(&mut attempt, self.config.stop_grace()).await;
                return Err(e);
            }
        }
        tracing::info!(project = %self.project, pid = attempt.pid, "Process started");
        self.tracked = Some(TrackedProcess {
            child: attempt.child,
            pid: attempt.pid,
        });
        Ok(())
    }

    async fn spawn_captured(&self) -> Result<Attempt, ProcessError> {
        let mut cmd = self.command(&self.script);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        let mut child = spawn_retrying(&mut cmd)
            .await
            .map_err(|source| ProcessError::Spawn {
                program: self.script.clone(),
                source,
            })?;
        let pid = child_pid(&child, &self.script)?;

        let capture = Arc::new(Capture::default());
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(collect(stdout, Arc::clone(&capture), Stream::Stdout, self.project.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(collect(stderr, Arc::clone(&capture), Stream::Stderr, self.project.clone()));
        }

        tracing::debug!(project = %self.project, pid, script = %self.script, "Build script started");
        Ok(Attempt {
            child,
            pid,
            capture,
        })
    }

    fn command(&self, program: &Utf8Path) -> Command {
        let mut cmd = Command::new(program.as_std_path());
        cmd.args(&self.args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    fn forget_exited(&mut self) {
        let exited = self
            .tracked
            .as_mut()
            .is_some_and(|tracked| matches!(tracked.child.try_wait(), Ok(Some(_))));
        if exited {
            if let Some(tracked) = self.tracked.take() {
                tracing::debug!(project = %self.project, pid = tracked.pid, "Tracked process exited");
            }
        }
    }

    async fn stop_by_name(&self) -> Result<(), ProcessError> {
        let Some(name) = &self.process_name else {
            return Err(ProcessError::Untracked {
                project: self.project.clone(),
            });
        };
        kill_by_executable(name, &self.program).await
    }
}

/// A direct-run start under inspection.
struct Attempt {
    child: Child,
    pid: u32,
    capture: Arc<Capture>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// Output of a directly-run script.
///
/// Until sealed, output is buffered for inspection; afterwards complete
/// lines are forwarded to the log as they arrive.
#[derive(Debug, Default)]
struct Capture {
    state: Mutex<CaptureState>,
}

#[derive(Debug, Default)]
struct CaptureState {
    stdout: String,
    stderr: String,
    sealed: bool,
}

impl Capture {
    fn push(&self, stream: Stream, bytes: &[u8], project: &str) {
        let mut state = self.state.lock();
        let sealed = state.sealed;
        let buffer = match stream {
            Stream::Stdout => &mut state.stdout,
            Stream::Stderr => &mut state.stderr,
        };
        buffer.push_str(&String::from_utf8_lossy(bytes));
        if sealed {
            forward_lines(buffer, stream, project);
        }
    }

    /// Stops buffering and returns what was captured so far.
    fn seal(&self) -> (String, String) {
        let mut state = self.state.lock();
        state.sealed = true;
        (
            std::mem::take(&mut state.stdout),
            std::mem::take(&mut state.stderr),
        )
    }
}

fn forward_lines(buffer: &mut String, stream: Stream, project: &str) {
    while let Some(end) = buffer.find('\n') {
        let line: String = buffer.drain(..=end).collect();
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        match stream {
            Stream::Stdout => tracing::info!(project = %project, "{line}"),
            Stream::Stderr => tracing::warn!(project = %project, "{line}"),
        }
    }
}

async fn collect<R>(mut reader: R, capture: Arc<Capture>, stream: Stream, project: String)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => capture.push(stream, &buf[..n], &project),
        }
    }
}

fn join_output(stdout: &str, stderr: &str) -> String {
    match (stdout.trim(), stderr.trim()) {
        ("", err) => err.to_owned(),
        (out, "") => out.to_owned(),
        (out, err) => format!("{out}\n{err}"),
    }
}

fn log_output(project: &str, output: &str) {
    tracing::info!(project = %project, "Run finished");
    for line in output.lines() {
        tracing::info!(project = %project, "  {line}");
    }
}

/// Kills a failed attempt and reaps it.
///
/// The group is only signalled while the leader is unreaped, so its pid
/// cannot have been reused.
async fn discard(attempt: &mut Attempt, grace: Duration) {
    if matches!(attempt.child.try_wait(), Ok(Some(_))) {
        return;
    }
    terminate_group_best_effort(attempt.pid);
    let _ = attempt.child.start_kill();
    if tokio::time::timeout(grace, attempt.child.wait()).await.is_err() {
        tracing::warn!(pid = attempt.pid, "Failed start did not exit");
    }
}

fn child_pid(child: &Child, program: &Utf8Path) -> Result<u32, ProcessError> {
    child.id().ok_or_else(|| ProcessError::Spawn {
        program: program.to_owned(),
        source: io::Error::other("process exited before its id was read"),
    })
}

/// Spawns `cmd`, retrying while the executable is busy.
///
/// A freshly written script can briefly be held open for writing by a
/// process forked concurrently elsewhere in this program (`ETXTBSY`).
pub(crate) async fn spawn_retrying(cmd: &mut Command) -> io::Result<Child> {
    let mut attempts = 0;
    loop {
        match cmd.spawn() {
            Err(e) if is_text_busy(&e) && attempts < SPAWN_RETRIES => {
                attempts += 1;
                tokio::time::sleep(SPAWN_RETRY_DELAY).await;
            }
            result => return result,
        }
    }
}

#[cfg(unix)]
fn is_text_busy(e: &io::Error) -> bool {
    e.raw_os_error() == Some(nix::errno::Errno::ETXTBSY as i32)
}

#[cfg(not(unix))]
fn is_text_busy(_e: &io::Error) -> bool {
    false
}

#[cfg(unix)]
async fn terminate(tracked: &mut TrackedProcess, grace: Duration) -> Result<(), ProcessError> {
    use nix::errno::Errno;
    use nix::sys::signal::Signal;

    match signal_group(tracked.pid, Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => {
            return Err(ProcessError::KillFailed {
                target: format!("pid {}", tracked.pid),
                reason: e.to_string(),
            });
        }
    }

    if let Ok(result) = tokio::time::timeout(grace, tracked.child.wait()).await {
        result?;
        return Ok(());
    }

    tracing::warn!(
        pid = tracked.pid,
        grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
        "Process ignored SIGTERM, killing"
    );
    let _ = signal_group(tracked.pid, Signal::SIGKILL);
    tracked
        .child
        .kill()
        .await
        .map_err(|e| ProcessError::KillFailed {
            target: format!("pid {}", tracked.pid),
            reason: e.to_string(),
        })
}

#[cfg(not(unix))]
async fn terminate(tracked: &mut TrackedProcess, grace: Duration) -> Result<(), ProcessError> {
    let status = Command::new("taskkill")
        .args(["/T", "/F", "/PID", &tracked.pid.to_string()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    if !status.success() {
        // The tree may already be gone; fall back to the handle.
        tracked
            .child
            .start_kill()
            .map_err(|e| ProcessError::KillFailed {
                target: format!("pid {}", tracked.pid),
                reason: e.to_string(),
            })?;
    }
    let _ = tokio::time::timeout(grace, tracked.child.wait()).await;
    Ok(())
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) -> Result<(), nix::errno::Errno> {
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| nix::errno::Errno::EINVAL)?;
    nix::sys::signal::killpg(Pid::from_raw(raw), signal)
}

/// Kills the process group led by `pid`, ignoring failures.
#[cfg(unix)]
pub(crate) fn terminate_group_best_effort(pid: u32) {
    let _ = signal_group(pid, nix::sys::signal::Signal::SIGKILL);
}

#[cfg(not(unix))]
pub(crate) fn terminate_group_best_effort(_pid: u32) {}

/// Terminates every process started as `program`.
///
/// Matches the full command line, anchored at the program path; `pkill -x`
/// would compare against the kernel's truncated process name.
#[cfg(unix)]
async fn kill_by_executable(name: &str, program: &Utf8Path) -> Result<(), ProcessError> {
    let pattern = command_line_pattern(program);
    let status = Command::new("pkill")
        .args(["-TERM", "-f", &pattern])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|e| ProcessError::KillFailed {
            target: name.to_owned(),
            reason: e.to_string(),
        })?;
    match status.code() {
        Some(0) => Ok(()),
        Some(1) => Err(ProcessError::NotFound {
            name: name.to_owned(),
        }),
        _ => Err(ProcessError::KillFailed {
            target: name.to_owned(),
            reason: format!("pkill exited with {status}"),
        }),
    }
}

/// Extended regex matching a command line whose first word is `program`.
#[cfg(unix)]
fn command_line_pattern(program: &Utf8Path) -> String {
    let mut pattern = String::from("^");
    for c in program.as_str().chars() {
        if r"\^$.|?*+()[]{}".contains(c) {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push_str("( |$)");
    pattern
}

/// Terminates every process whose image is named `name`.
#[cfg(not(unix))]
async fn kill_by_executable(name: &str, _program: &Utf8Path) -> Result<(), ProcessError> {
    let image = format!("{name}{}", ab_core::EXE_SUFFIX);
    let status = Command::new("taskkill")
        .args(["/F", "/IM", &image])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|e| ProcessError::KillFailed {
            target: image.clone(),
            reason: e.to_string(),
        })?;
    match status.code() {
        Some(0) => Ok(()),
        Some(128) => Err(ProcessError::NotFound { name: image }),
        _ => Err(ProcessError::KillFailed {
            target: image,
            reason: format!("taskkill exited with {status}"),
        }),
    }
}
