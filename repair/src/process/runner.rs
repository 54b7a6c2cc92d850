use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use strum::Display;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use sysinfo::Pid;
use sysinfo::ProcessesToUpdate;
use sysinfo::System;
use tokio::io::BufReader;
use tokio::process::Command;
use tokio::task::JoinHandle;

use crate::config::DEFAULT_TIMEOUT_SECS;
use crate::error::Error;
use crate::error::Result;

/// How long drain tasks get to finish after a timed out child was killed
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// One external tool invocation: program, ordered arguments, optional working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program:     String,
    pub args:        Vec<OsString>,
    pub working_dir: Option<PathBuf>,
}

impl ToolInvocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program:     program.into(),
            args:        Vec::new(),
            working_dir: None,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Argument `index` as UTF-8, lossy
    #[cfg(test)]
    pub fn arg_lossy(&self, index: usize) -> Option<String> {
        self.args
            .get(index)
            .map(|arg| arg.to_string_lossy().into_owned())
    }
}

impl std::fmt::Display for ToolInvocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// How an invocation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Process exited with this code
    Exited(i32),
    /// Process ended without an exit code (killed by a signal)
    Signalled,
    /// Process outlived the timeout and was killed
    TimedOut,
}

impl ExitOutcome {
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

impl std::fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exit code {code}"),
            Self::Signalled => write!(f, "terminated by signal"),
            Self::TimedOut => write!(f, "timed out"),
        }
    }
}

/// Runs external tools. The pipeline only talks to tools through this seam.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `invocation` to completion and report how it ended.
    ///
    /// Returns an error only when the process could not be started or waited on.
    async fn run(&self, invocation: &ToolInvocation) -> Result<ExitOutcome>;
}

#[derive(Debug, Clone, Copy, Display)]
enum OutputStream {
    #[strum(serialize = "STDOUT")]
    Stdout,
    #[strum(serialize = "STDERR")]
    Stderr,
}

/// Spawns real processes, forwarding their output to tracing
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }
}

impl ProcessRunner {
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: &ToolInvocation) -> Result<ExitOutcome> {
        let program = invocation.program.as_str();

        let mut command = Command::new(program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &invocation.working_dir {
            command.current_dir(dir);
        }

        tracing::debug!("Spawning tool: {invocation}");
        if let Some(dir) = &invocation.working_dir {
            tracing::debug!("Working directory: {}", dir.display());
        }

        let mut child = command
            .spawn()
            .change_context(Error::process_failed("spawn", program, "could not start"))
            .attach(format!("Command: {invocation}"))?;

        let stdout = child.stdout.take().ok_or_else(|| {
            Report::new(Error::process_failed("capture", program, "stdout not piped"))
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            Report::new(Error::process_failed("capture", program, "stderr not piped"))
        })?;

        // Both drains start before we block on the child
        let stdout_task = tokio::spawn(drain_lines(stdout, OutputStream::Stdout, program.to_string()));
        let stderr_task = tokio::spawn(drain_lines(stderr, OutputStream::Stderr, program.to_string()));

        let outcome = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => status.code().map_or(ExitOutcome::Signalled, ExitOutcome::Exited),
            Ok(Err(e)) => {
                stdout_task.abort();
                stderr_task.abort();
                return Err(Report::new(e)
                    .change_context(Error::process_failed("wait for", program, "wait failed"))
                    .attach(format!("Command: {invocation}")));
            }
            Err(_) => {
                tracing::warn!(
                    "Tool '{program}' exceeded {}s timeout, killing it",
                    self.timeout.as_secs()
                );
                if let Some(pid) = child.id() {
                    let killed = kill_descendants(pid);
                    tracing::debug!("Killed {killed} descendant(s) of '{program}'");
                }
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill timed out tool '{program}': {e}");
                }
                ExitOutcome::TimedOut
            }
        };

        let grace = (outcome == ExitOutcome::TimedOut).then_some(DRAIN_GRACE);
        let stdout_lines = join_drain(stdout_task, grace, program).await;
        let stderr_lines = join_drain(stderr_task, grace, program).await;

        tracing::debug!(
            "Tool '{program}' finished with {outcome} ({stdout_lines} stdout lines, {stderr_lines} stderr lines)"
        );
        Ok(outcome)
    }
}

/// Forward every line of `reader` to tracing, returning the number of lines
/// read. Lines that are not UTF-8 are logged lossily; only I/O errors stop the
/// drain.
async fn drain_lines<R>(reader: R, stream: OutputStream, program: String) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut count = 0;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                tracing::info!(tool = %program, "{stream}>{line}");
                count += 1;
            }
            Err(e) => {
                tracing::debug!("Stopped reading {stream} of '{program}': {e}");
                break;
            }
        }
    }
    count
}

/// Kill every live process below `root`, deepest first. Returns how many were
/// killed.
fn kill_descendants(root: u32) -> usize {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let mut tree = vec![Pid::from_u32(root)];
    let mut next = 0;
    while let Some(parent) = tree.get(next).copied() {
        let children: Vec<Pid> = system
            .processes()
            .iter()
            .filter(|(pid, process)| process.parent() == Some(parent) && !tree.contains(pid))
            .map(|(pid, _)| *pid)
            .collect();
        tree.extend(children);
        next += 1;
    }

    tree.iter()
        .skip(1)
        .rev()
        .filter(|pid| system.process(**pid).is_some_and(sysinfo::Process::kill))
        .count()
}

async fn join_drain(task: JoinHandle<usize>, grace: Option<Duration>, program: &str) -> usize {
    let joined = match grace {
        Some(limit) => {
            let abort = task.abort_handle();
            if let Ok(joined) = tokio::time::timeout(limit, task).await {
                joined
            } else {
                // A grandchild may still hold the pipe open
                abort.abort();
                tracing::warn!("Output of '{program}' still open after kill, abandoning drain");
                return 0;
            }
        }
        None => task.await,
    };

    joined.unwrap_or_else(|e| {
        tracing::warn!("Output drain for '{program}' failed: {e}");
        0
    })
}

#[cfg(all(test, unix))]
#[allow(clippy::expect_used, reason = "tests")]
mod tests {
    use super::*;

    fn sh(script: &str) -> ToolInvocation {
        ToolInvocation::new("sh").arg("-c").arg(script)
    }

    #[tokio::test]
    async fn test_zero_exit_is_success() {
        let outcome = ProcessRunner::default()
            .run(&sh("echo hello; echo world >&2"))
            .await
            .expect("sh runs");
        assert_eq!(outcome, ExitOutcome::Exited(0));
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn test_nonzero_exit_code_is_reported() {
        let outcome = ProcessRunner::default()
            .run(&sh("echo partial; exit 3"))
            .await
            .expect("sh runs");
        assert_eq!(outcome, ExitOutcome::Exited(3));
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn test_missing_program_is_invocation_error() {
        let error = ProcessRunner::default()
            .run(&ToolInvocation::new("rem-repair-no-such-tool-4711").arg("run"))
            .await
            .expect_err("spawn fails");
        assert!(matches!(error.current_context(), Error::ToolInvocation(_)));
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let started = std::time::Instant::now();
        let outcome = ProcessRunner::new(Duration::from_millis(200))
            .run(&ToolInvocation::new("sleep").arg("30"))
            .await
            .expect("sleep runs");
        assert_eq!(outcome, ExitOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_timeout_kills_grandchildren_holding_output() {
        let started = std::time::Instant::now();
        let outcome = ProcessRunner::new(Duration::from_millis(300))
            .run(&sh("sleep 30 & wait"))
            .await
            .expect("sh runs");
        assert_eq!(outcome, ExitOutcome::TimedOut);
        // Returns once the orphaned sleep dies, well before the drain grace
        assert!(started.elapsed() < DRAIN_GRACE);
    }

    #[tokio::test]
    async fn test_non_utf8_output_is_drained_to_completion() {
        let outcome = ProcessRunner::default()
            .run(&sh(
                "printf '\\377\\n'; i=0; while [ $i -lt 20000 ]; do echo line$i; i=$((i+1)); done; exit 0",
            ))
            .await
            .expect("sh runs");
        assert_eq!(outcome, ExitOutcome::Exited(0));
    }

    #[tokio::test]
    async fn test_drain_counts_lossy_lines() {
        let bytes: &[u8] = b"ok\n\xff\xfe bad\r\nlast";
        let count = drain_lines(bytes, OutputStream::Stdout, "tool".to_string()).await;
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_working_directory_is_applied() {
        let dir = tempfile::tempdir().expect("tempdir");
        let invocation = sh("touch marker").current_dir(dir.path());
        let outcome = ProcessRunner::default()
            .run(&invocation)
            .await
            .expect("sh runs");
        assert!(outcome.is_success());
        assert!(dir.path().join("marker").exists());
    }

    #[tokio::test]
    async fn test_large_output_does_not_block() {
        // More than a pipe buffer on both streams
        let outcome = ProcessRunner::default()
            .run(&sh("i=0; while [ $i -lt 5000 ]; do echo line$i; echo err$i >&2; i=$((i+1)); done"))
            .await
            .expect("sh runs");
        assert!(outcome.is_success());
    }

    #[test]
    fn test_display_joins_arguments() {
        let invocation = ToolInvocation::new("controller")
            .arg("run")
            .arg("a.rs")
            .arg("a.rs");
        assert_eq!(invocation.to_string(), "controller run a.rs a.rs");
        assert_eq!(invocation.arg_lossy(1).as_deref(), Some("a.rs"));
    }
}
