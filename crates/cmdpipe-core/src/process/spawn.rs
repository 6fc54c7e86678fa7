//! OS-level process plumbing: spawning through the shell, switching pipes to
//! non-blocking mode, and tearing a child down.

use std::os::fd::AsFd;
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tracing::{debug, warn};

use super::ExecOptions;
use crate::error::{Error, Result};
use crate::stream::PipeId;

const REAP_POLL: Duration = Duration::from_millis(5);

/// Start `command_line` under the configured shell with all three standard
/// streams piped.
pub fn spawn(command_line: &str, options: &ExecOptions) -> Result<Child> {
    let mut cmd = Command::new(&options.shell);
    cmd.args(&options.shell_args)
        .arg(command_line)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    if let Some(ref dir) = options.working_directory {
        cmd.current_dir(dir);
    }
    if let Some(ref env) = options.environment {
        cmd.env_clear().envs(env);
    }

    debug!(
        command = command_line,
        shell = %options.shell.display(),
        cwd = ?options.working_directory,
        chunk_size = options.chunk_size,
        "Spawning child"
    );
    let child = cmd.spawn().map_err(|source| Error::Spawn {
        command: command_line.to_string(),
        source,
    })?;
    debug!(pid = child.id(), "Child started");
    Ok(child)
}

/// Put one of our pipe endpoints into non-blocking mode.
pub fn set_nonblocking(pipe: PipeId, fd: impl AsFd) -> Result<()> {
    let flags = fcntl(&fd, FcntlArg::F_GETFL).map_err(|source| Error::PipeSetup { pipe, source })?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(&fd, FcntlArg::F_SETFL(flags)).map_err(|source| Error::PipeSetup { pipe, source })?;
    Ok(())
}

/// Make sure the child is gone and reaped.
///
/// A child that already exited is only reaped. A live one gets SIGTERM, then
/// SIGKILL once `grace` has passed.
pub fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    if let Some(status) = child.try_wait()? {
        return Ok(status);
    }

    let pid = child.id();
    match i32::try_from(pid) {
        Ok(raw) => {
            debug!(pid, "Sending SIGTERM to child");
            if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
                warn!(pid, error = %e, "Failed to send SIGTERM");
            }
        }
        Err(_) => warn!(pid, "Child pid out of range, skipping SIGTERM"),
    }

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if let Some(status) = child.try_wait()? {
            debug!(pid, ?status, "Child exited after SIGTERM");
            return Ok(status);
        }
        thread::sleep(REAP_POLL);
    }

    warn!(pid, "Child ignored SIGTERM, killing");
    if let Err(e) = child.kill() {
        debug!(pid, error = %e, "SIGKILL not delivered");
    }
    child.wait()
}

/// Signal number that killed the child, if it did not exit normally.
pub fn terminating_signal(status: ExitStatus) -> Option<i32> {
    status.signal()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn missing_shell_is_a_spawn_error() {
        let options = ExecOptions {
            shell: PathBuf::from("/nonexistent/cmdpipe-shell"),
            ..ExecOptions::default()
        };
        let err = spawn("true", &options).unwrap_err();
        assert!(matches!(err, Error::Spawn { ref command, .. } if command == "true"));
    }

    #[test]
    fn terminate_kills_a_sleeping_child() {
        let mut child = spawn("exec sleep 30", &ExecOptions::default()).unwrap();
        let started = Instant::now();
        let status = terminate(&mut child, Duration::from_millis(100)).unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(terminating_signal(status), Some(Signal::SIGTERM as i32));
    }

    #[test]
    fn terminate_escalates_to_sigkill() {
        let mut child = spawn("trap '' TERM; sleep 30", &ExecOptions::default()).unwrap();
        // Give the shell time to install the trap.
        thread::sleep(Duration::from_millis(100));
        let status = terminate(&mut child, Duration::from_millis(50)).unwrap();
        assert_eq!(terminating_signal(status), Some(Signal::SIGKILL as i32));
    }

    #[test]
    fn terminate_reaps_exited_child() {
        let mut child = spawn("exit 3", &ExecOptions::default()).unwrap();
        child.wait().unwrap();
        let status = terminate(&mut child, Duration::from_millis(10)).unwrap();
        assert_eq!(status.code(), Some(3));
    }

    #[test]
    fn pipes_can_be_made_nonblocking() {
        let (reader, _writer) = std::io::pipe().unwrap();
        set_nonblocking(PipeId::Output, &reader).unwrap();
        let flags = fcntl(&reader, FcntlArg::F_GETFL).unwrap();
        assert!(OFlag::from_bits_truncate(flags).contains(OFlag::O_NONBLOCK));
    }
}
