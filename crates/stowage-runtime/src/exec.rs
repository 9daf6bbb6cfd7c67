//! Running a child process to completion with captured output.
//!
//! The child gets its own process group so that a timeout can take down
//! everything it started, not only the direct child.

use std::io::{self, Read};
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::sys::wait::{Id, WaitPidFlag, WaitStatus, waitid};
use nix::unistd::Pid;

/// How often a running child is polled for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Time between SIGTERM and SIGKILL on timeout.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Output from a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// Standard output from the command.
    pub stdout: String,
    /// Standard error from the command.
    pub stderr: String,
    /// Exit code, `None` if the command was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl ExecOutput {
    /// Whether the command exited with status zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}

/// How a captured run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The command exited on its own.
    Exited(ExecOutput),
    /// The deadline passed; the process group was killed and reaped.
    TimedOut(ExecOutput),
}

/// Spawns `command`, captures stdout and stderr and waits at most `timeout`.
///
/// # Errors
///
/// Returns an error if the process cannot be spawned or waited for.
pub fn run_captured(command: &mut Command, timeout: Duration) -> io::Result<Completion> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .spawn()?;
    let pid = child.id();
    let group = Pid::from_raw(
        i32::try_from(pid).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
    );
    tracing::debug!(pid, ?timeout, "child spawned");

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let deadline = Instant::now() + timeout;
    let timed_out = !wait_for_exit(group, deadline)?;
    if timed_out {
        tracing::warn!(pid, ?timeout, "deadline passed, terminating child");
        terminate(group)?;
    } else {
        // leftover background processes would keep the pipes open
        kill_group(group, Signal::SIGKILL);
    }
    let status = child.wait()?;

    let output = ExecOutput {
        stdout: collect(stdout),
        stderr: collect(stderr),
        exit_code: status.code(),
    };
    tracing::debug!(pid, exit_code = ?output.exit_code, timed_out, "child finished");
    Ok(if timed_out {
        Completion::TimedOut(output)
    } else {
        Completion::Exited(output)
    })
}

/// Polls until the group leader exits or `deadline` passes. Returns whether
/// it exited.
///
/// The leader is left unreaped, so its pid keeps naming the group until
/// `Child::wait` runs.
fn wait_for_exit(leader: Pid, deadline: Instant) -> io::Result<bool> {
    loop {
        let flags = WaitPidFlag::WEXITED | WaitPidFlag::WNOHANG | WaitPidFlag::WNOWAIT;
        match waitid(Id::Pid(leader), flags) {
            Ok(WaitStatus::StillAlive) => {}
            Ok(_) => return Ok(true),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e.into()),
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Sends SIGTERM to the group, then SIGKILL after a grace period.
fn terminate(group: Pid) -> io::Result<()> {
    kill_group(group, Signal::SIGTERM);
    tracing::info!(pid = group.as_raw(), "sent SIGTERM");
    let exited = wait_for_exit(group, Instant::now() + KILL_GRACE)?;
    kill_group(group, Signal::SIGKILL);
    if !exited {
        tracing::info!(pid = group.as_raw(), "sent SIGKILL");
    }
    Ok(())
}

/// Signals whatever is left in the group. Only called while the leader is
/// unreaped.
fn kill_group(group: Pid, signal: Signal) {
    if let Err(e) = killpg(group, signal) {
        tracing::trace!(pid = group.as_raw(), ?signal, error = %e, "group already empty");
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut command = Command::new("sh");
        let _ = command.args(["-c", script]);
        command
    }

    #[test]
    fn captures_stdout_stderr_and_exit_code() {
        let completion =
            run_captured(&mut sh("echo out; echo err >&2; exit 3"), Duration::from_secs(10))
                .expect("run");
        let Completion::Exited(output) = completion else {
            unreachable!("command should not time out");
        };
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
    }

    #[test]
    fn successful_command_reports_success() {
        let completion = run_captured(&mut sh("true"), Duration::from_secs(10)).expect("run");
        assert!(matches!(completion, Completion::Exited(ref o) if o.success()));
    }

    #[test]
    fn timeout_kills_the_whole_group() {
        let started = Instant::now();
        let completion =
            run_captured(&mut sh("sleep 30 & sleep 30; wait"), Duration::from_millis(200))
                .expect("run");
        assert!(matches!(completion, Completion::TimedOut(_)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn background_children_are_killed_after_exit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let marker = dir.path().join("late");
        let script = format!("(sleep 1; touch '{}') & exit 0", marker.display());
        let completion = run_captured(&mut sh(&script), Duration::from_secs(10)).expect("run");
        assert!(matches!(completion, Completion::Exited(ref o) if o.success()));
        std::thread::sleep(Duration::from_millis(1500));
        assert!(!marker.exists());
    }

    #[test]
    fn exit_code_survives_deferred_reaping() {
        let completion = run_captured(&mut sh("exit 42"), Duration::from_secs(10)).expect("run");
        let Completion::Exited(output) = completion else {
            unreachable!("command should not time out");
        };
        assert_eq!(output.exit_code, Some(42));
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let mut command = Command::new("/nonexistent/stowage-launcher");
        assert!(run_captured(&mut command, Duration::from_secs(1)).is_err());
    }
}
