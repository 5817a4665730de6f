//! Child process execution with a timeout, cancellation and bounded output.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How often a running child is checked for cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    /// The child was killed because the shared token was cancelled.
    pub cancelled: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success() && !self.timed_out && !self.cancelled
    }

    /// Render a log body with truncation notices.
    pub fn render_log(&self, label: &str) -> String {
        let mut log = String::new();
        log.push_str(&format!("[{label}] exit={:?}", self.status.code()));
        if self.timed_out {
            log.push_str(" timed_out");
        }
        if self.cancelled {
            log.push_str(" cancelled");
        }
        log.push_str("\n--- stdout ---\n");
        log.push_str(&String::from_utf8_lossy(&self.stdout));
        if self.stdout_truncated > 0 {
            log.push_str(&format!("\n[stdout truncated {} bytes]\n", self.stdout_truncated));
        }
        log.push_str("\n--- stderr ---\n");
        log.push_str(&String::from_utf8_lossy(&self.stderr));
        if self.stderr_truncated > 0 {
            log.push_str(&format!("\n[stderr truncated {} bytes]\n", self.stderr_truncated));
        }
        log
    }
}

/// Run a command to completion, killing it on timeout or cancellation.
///
/// Output is drained on reader threads while the child runs so a chatty
/// child cannot deadlock on a full pipe. Bytes past `output_limit_bytes` are
/// counted and discarded. Spawn failures are returned as errors; a non-zero
/// exit, timeout or cancellation is reported through [`CommandOutput`].
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
    cancel: &CancellationToken,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let (status, timed_out, cancelled) = wait_child(&mut child, timeout, cancel)?;

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;
    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, cancelled, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        cancelled,
    })
}

fn wait_child(
    child: &mut Child,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(ExitStatus, bool, bool)> {
    let deadline = Instant::now() + timeout;
    loop {
        if cancel.is_cancelled() {
            warn!("cancelled, killing command");
            return kill(child).map(|status| (status, false, true));
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            return kill(child).map(|status| (status, true, false));
        }
        if let Some(status) = child
            .wait_timeout(remaining.min(CANCEL_POLL))
            .context("wait for command")?
        {
            return Ok((status, false, false));
        }
    }
}

fn kill(child: &mut Child) -> Result<ExitStatus> {
    child.kill().context("kill command")?;
    child.wait().context("wait command after kill")
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        let keep = n.min(remaining);
        buf.extend_from_slice(&chunk[..keep]);
        truncated += n - keep;
    }

    Ok((buf, truncated))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_output_and_truncates() {
        let cancel = CancellationToken::new();
        let out = run_command(sh("printf 'hello world'"), Duration::from_secs(5), 5, &cancel)
            .expect("run");
        assert!(out.success());
        assert_eq!(out.stdout, b"hello");
        assert_eq!(out.stdout_truncated, 6);
    }

    #[test]
    fn timeout_kills_child() {
        let cancel = CancellationToken::new();
        let out = run_command(sh("exec sleep 5"), Duration::from_millis(100), 1024, &cancel)
            .expect("run");
        assert!(out.timed_out);
        assert!(!out.success());
    }

    #[test]
    fn cancellation_kills_child_promptly() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let started = Instant::now();
        let out = run_command(sh("exec sleep 5"), Duration::from_secs(30), 1024, &cancel)
            .expect("run");
        assert!(out.cancelled);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let cancel = CancellationToken::new();
        let err = run_command(
            Command::new("definitely-not-a-real-binary-xyz"),
            Duration::from_secs(1),
            1024,
            &cancel,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("spawn command"));
    }
}
