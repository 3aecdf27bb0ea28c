//! Supervised execution of the steam client process
//!
//! The client is a long-running external tool whose output is the only
//! live signal we get. This module owns the process handle: it streams
//! merged stdout/stderr lines to the caller, enforces a hard deadline,
//! honors cancellation, and guarantees the child is killed on every exit
//! path (`kill_on_drop` is the backstop).

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// Grace period between the graceful stop signal and the forced kill
const KILL_GRACE: Duration = Duration::from_secs(5);

/// How a supervised invocation ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunEnd {
    /// The process exited on its own; true when the exit status was zero
    Exited(bool),
    /// The deadline elapsed and the process was killed
    TimedOut,
    /// Cancellation was requested and the process was killed
    Cancelled,
}

/// Run `binary` with `args`, streaming every output line to `on_line`.
///
/// Lines from stdout and stderr are merged in arrival order. The child is
/// placed in its own process group so termination reaches helper processes
/// it spawns. stdin is closed so interactive prompts fail fast instead of
/// hanging until the deadline.
pub async fn run_streaming(
    binary: &Path,
    args: &[String],
    workdir: Option<&Path>,
    timeout: Duration,
    cancel: &CancellationToken,
    mut on_line: impl FnMut(&str),
) -> std::io::Result<RunEnd> {
    let mut command = Command::new(binary);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = workdir {
        command.current_dir(dir);
    }
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn()?;

    let (line_tx, mut line_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(pump_lines(stdout, line_tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(pump_lines(stderr, line_tx.clone()));
    }
    drop(line_tx);

    let deadline = tokio::time::Instant::now() + timeout;

    // Drain output until both pipes close, watching the clock and the token
    loop {
        tokio::select! {
            maybe_line = line_rx.recv() => {
                match maybe_line {
                    Some(line) => on_line(&line),
                    None => break,
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                terminate(&mut child).await;
                return Ok(RunEnd::TimedOut);
            }
            _ = cancel.cancelled() => {
                terminate(&mut child).await;
                return Ok(RunEnd::Cancelled);
            }
        }
    }

    // Output closed; the process should exit within the remaining budget
    tokio::select! {
        status = child.wait() => Ok(RunEnd::Exited(status?.success())),
        _ = tokio::time::sleep_until(deadline) => {
            terminate(&mut child).await;
            Ok(RunEnd::TimedOut)
        }
        _ = cancel.cancelled() => {
            terminate(&mut child).await;
            Ok(RunEnd::Cancelled)
        }
    }
}

/// Stop the child: send SIGTERM to its process group, give it a short
/// grace to exit, then SIGKILL the group and reap. The group signal is
/// what reaches helper processes the client spawns; on non-unix targets
/// there is no group to sweep and only the immediate child is killed.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        // pgid equals the child pid: spawn placed the child in its own
        // group. ESRCH once the group is gone is harmless.
        if let Some(pid) = child.id() {
            signal_group(pid, libc::SIGTERM);
            let reaped = tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok();
            signal_group(pid, libc::SIGKILL);
            if reaped {
                return;
            }
        }
    }

    if child.start_kill().is_ok() {
        let _ = tokio::time::timeout(KILL_GRACE, child.wait()).await;
    }
    let _ = child.kill().await;
}

/// Signal every process in the child's group (negative pid target).
#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) {
    unsafe {
        libc::kill(-(pid as libc::pid_t), signal);
    }
}

async fn pump_lines<R: AsyncRead + Unpin>(
    reader: R,
    tx: tokio::sync::mpsc::UnboundedSender<String>,
) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).is_err() {
            break;
        }
    }
}
