//! Child process supervision.
//!
//! [`ProcessManager::exec`] owns the child and its three pipes for the whole
//! run. A single thread alternates between a bounded readiness poll and one
//! round of non-blocking reads and writes until the child has exited and both
//! output pipes reached end of file.
//!
//! ```text
//! Spawning ──► Running ──► Draining ──► Exited
//!                 │                        ▲
//!                 └──── consumer Stop ─────┘
//! ```

use std::borrow::Cow;
use std::fmt;
use std::io::Read;
use std::os::fd::AsFd;
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, ChildStdin, ExitStatus};
use std::rc::Rc;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use tracing::{debug, trace};

use super::options::{Consumer, ExecOptions, Input};
use super::spawn;
use crate::error::{Error, Result};
use crate::stream::{
    CallbackLinesReader, CallbackReader, PipeId, Reader, SharedCallback, StreamError,
    StreamWriter, StringReader, StringWriter, Writer, notify,
};

/// Lifecycle of one [`ProcessManager`] run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Spawning,
    Running,
    /// The child is gone; remaining output is still being read.
    Draining,
    Exited,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Spawning => "spawning",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Exited => "exited",
        })
    }
}

/// Write-once holder for the child's exit status.
///
/// The status is only obtainable while the child handle is alive, so it is
/// captured the first time the child is seen not running and never replaced.
#[derive(Debug, Default)]
pub struct ExitCell(Option<ExitStatus>);

impl ExitCell {
    /// Store `status` unless one was stored already. Returns whether it was stored.
    pub fn capture(&mut self, status: ExitStatus) -> bool {
        if self.0.is_some() {
            return false;
        }
        self.0 = Some(status);
        true
    }

    pub const fn is_captured(&self) -> bool {
        self.0.is_some()
    }

    pub const fn get(&self) -> Option<ExitStatus> {
        self.0
    }
}

/// Outcome of a finished run.
#[derive(Debug, Clone, Default)]
pub struct Execution {
    /// `None` only if the child was killed by a signal we did not send.
    /// Forced to `Some(0)` when the consumer stopped the run early.
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    /// Captured stdout; empty unless the consumer was [`Consumer::Buffer`].
    pub stdout: Vec<u8>,
    /// Captured stderr; empty unless the consumer was [`Consumer::Buffer`].
    pub stderr: Vec<u8>,
    pub stopped_early: bool,
    pub bytes_written: u64,
    pub stdout_bytes: u64,
    pub stderr_bytes: u64,
    /// Wall time from spawn to the end of teardown.
    pub duration: Duration,
}

impl Execution {
    pub const fn success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }

    pub fn stdout_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    pub fn stderr_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }
}

/// Runs one command line to completion.
///
/// A manager is consumed by [`exec`](Self::exec); build a new one per run.
#[derive(Debug)]
pub struct ProcessManager {
    command_line: String,
    options: ExecOptions,
    state: State,
}

impl ProcessManager {
    pub fn new(command_line: impl Into<String>, options: ExecOptions) -> Self {
        Self {
            command_line: command_line.into(),
            options,
            state: State::Spawning,
        }
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub const fn options(&self) -> &ExecOptions {
        &self.options
    }

    pub const fn state(&self) -> State {
        self.state
    }

    /// Spawn the child, feed it `input`, deliver its output to `consumer` and
    /// wait for it.
    ///
    /// Blocks until the child exited and its output was drained, or until the
    /// consumer returned [`Flow::Stop`](crate::stream::Flow::Stop). A non-zero
    /// exit code is a normal result. Errors are returned only when the child
    /// cannot be started or supervised, and only after the child was reaped.
    pub fn exec(mut self, input: Input<'_>, consumer: Consumer<'_>) -> Result<Execution> {
        self.options.validate()?;
        let started = Instant::now();
        let mut child = spawn::spawn(&self.command_line, &self.options)?;

        let mut pipes = match Pipes::wire(&mut child, input, &consumer, &self.options) {
            Ok(pipes) => pipes,
            Err(e) => {
                if let Err(reap) = spawn::terminate(&mut child, self.options.terminate_grace) {
                    debug!(error = %reap, "Failed to reap child after wiring error");
                }
                return Err(e);
            }
        };

        let mut exit = ExitCell::default();
        let outcome = self.supervise(&mut child, &mut pipes, &mut exit);

        self.transition(State::Exited);
        pipes.close_all();
        let reaped = spawn::terminate(&mut child, self.options.terminate_grace);

        let end = outcome?;
        let reaped = reaped?;
        // A status observed in the loop wins over whatever teardown caused.
        exit.capture(reaped);

        let (exit_code, signal) = match end {
            LoopEnd::Stopped => (Some(0), None),
            LoopEnd::Exited => {
                let status = exit.get().unwrap_or(reaped);
                (status.code(), spawn::terminating_signal(status))
            }
        };
        let stopped_early = matches!(end, LoopEnd::Stopped);
        debug!(
            command = %self.command_line,
            ?exit_code,
            ?signal,
            stopped_early,
            "Child finished"
        );

        let mut execution = pipes.into_execution();
        execution.exit_code = exit_code;
        execution.signal = signal;
        execution.stopped_early = stopped_early;
        execution.duration = started.elapsed();
        Ok(execution)
    }

    fn supervise(
        &mut self,
        child: &mut Child,
        pipes: &mut Pipes<'_, '_>,
        exit: &mut ExitCell,
    ) -> Result<LoopEnd> {
        self.transition(State::Running);
        let timeout = self.options.poll_timeout();

        loop {
            let ready = pipes.poll(timeout)?;
            trace!(?ready, state = %self.state, "Poll iteration");

            if !exit.is_captured() {
                if let Some(status) = child.try_wait()? {
                    exit.capture(status);
                    debug!(code = ?status.code(), signal = ?status.signal(), "Captured exit status");
                    pipes.close_input();
                    self.transition(State::Draining);
                }
            }

            if exit.is_captured() && pipes.readers_finished() {
                return Ok(LoopEnd::Exited);
            }

            match pipes.service(ready) {
                Ok(()) => {}
                Err(StreamError::Terminated) => {
                    debug!("Consumer requested stop");
                    return Ok(LoopEnd::Stopped);
                }
                Err(StreamError::Io(e)) => return Err(Error::Io(e)),
            }
        }
    }

    fn transition(&mut self, next: State) {
        debug!(from = %self.state, to = %next, "State transition");
        self.state = next;
    }
}

#[derive(Debug, Clone, Copy)]
enum LoopEnd {
    Exited,
    Stopped,
}

/// Which pipes the last poll reported as serviceable.
#[derive(Debug, Default, Clone, Copy)]
struct Readiness {
    input: bool,
    output: bool,
    error: bool,
}

impl Readiness {
    const fn mark(&mut self, pipe: PipeId) {
        match pipe {
            PipeId::Input => self.input = true,
            PipeId::Output => self.output = true,
            PipeId::Error => self.error = true,
        }
    }
}

/// The reader behind one output pipe. Both output pipes of a run always use
/// the same variant.
enum OutputHandler<'cb, R> {
    Buffer(StringReader<R>),
    Chunks(CallbackReader<'cb, R>),
    Lines(CallbackLinesReader<'cb, R>),
}

impl<'cb, R: Read + AsFd> OutputHandler<'cb, R> {
    fn new(pipe: PipeId, source: R, consumer: &Consumer<'cb>, options: &ExecOptions) -> Self {
        let chunk = options.chunk_size;
        match consumer {
            Consumer::Buffer => Self::Buffer(StringReader::new(pipe, source, chunk)),
            Consumer::Chunks(cb) => {
                Self::Chunks(CallbackReader::new(pipe, source, Rc::clone(cb), chunk))
            }
            Consumer::Lines(cb) => Self::Lines(CallbackLinesReader::with_line_cap(
                pipe,
                source,
                Rc::clone(cb),
                chunk,
                options.max_line_bytes,
            )),
        }
    }

    fn reader(&self) -> &dyn Reader {
        match self {
            Self::Buffer(r) => r,
            Self::Chunks(r) => r,
            Self::Lines(r) => r,
        }
    }

    fn reader_mut(&mut self) -> &mut dyn Reader {
        match self {
            Self::Buffer(r) => r,
            Self::Chunks(r) => r,
            Self::Lines(r) => r,
        }
    }

    fn into_buffer(self) -> Vec<u8> {
        match self {
            Self::Buffer(r) => r.into_buffer(),
            Self::Chunks(_) | Self::Lines(_) => Vec::new(),
        }
    }
}

/// Handlers for the three pipes of one run.
struct Pipes<'a, 'cb> {
    input: Option<Box<dyn Writer + 'a>>,
    stdout: OutputHandler<'cb, std::process::ChildStdout>,
    stderr: OutputHandler<'cb, std::process::ChildStderr>,
    callback: Option<SharedCallback<'cb>>,
}

impl<'a, 'cb> Pipes<'a, 'cb> {
    fn wire(
        child: &mut Child,
        input: Input<'a>,
        consumer: &Consumer<'cb>,
        options: &ExecOptions,
    ) -> Result<Self> {
        let stdin = child.stdin.take().ok_or(Error::PipeUnavailable(PipeId::Input))?;
        let stdout = child.stdout.take().ok_or(Error::PipeUnavailable(PipeId::Output))?;
        let stderr = child.stderr.take().ok_or(Error::PipeUnavailable(PipeId::Error))?;

        spawn::set_nonblocking(PipeId::Output, &stdout)?;
        spawn::set_nonblocking(PipeId::Error, &stderr)?;

        let input = if input.is_none() {
            debug!("No input payload, closing child stdin");
            drop(stdin);
            None
        } else {
            spawn::set_nonblocking(PipeId::Input, &stdin)?;
            Some(input_writer(input, stdin, options.chunk_size))
        };

        Ok(Self {
            input,
            stdout: OutputHandler::new(PipeId::Output, stdout, consumer, options),
            stderr: OutputHandler::new(PipeId::Error, stderr, consumer, options),
            callback: consumer.shared().cloned(),
        })
    }

    /// Wait for readiness on every pipe that can still make progress.
    ///
    /// A timeout or an interrupted wait reports nothing ready.
    fn poll(&self, timeout: PollTimeout) -> Result<Readiness> {
        let candidates = [
            (PipeId::Output, self.stdout.reader().poll_fd(), PollFlags::POLLIN),
            (PipeId::Error, self.stderr.reader().poll_fd(), PollFlags::POLLIN),
            (
                PipeId::Input,
                self.input
                    .as_ref()
                    .filter(|w| w.wants_write())
                    .and_then(|w| w.poll_fd()),
                PollFlags::POLLOUT,
            ),
        ];
        let (ids, mut fds): (Vec<PipeId>, Vec<PollFd<'_>>) = candidates
            .into_iter()
            .filter_map(|(id, fd, events)| fd.map(|fd| (id, PollFd::new(fd, events))))
            .unzip();

        let mut ready = Readiness::default();
        match poll(&mut fds, timeout) {
            Ok(0) | Err(Errno::EINTR) => return Ok(ready),
            Ok(_) => {}
            Err(e) => return Err(Error::Poll(e)),
        }

        let serviceable =
            PollFlags::POLLIN | PollFlags::POLLOUT | PollFlags::POLLHUP | PollFlags::POLLERR;
        for (id, fd) in ids.into_iter().zip(&fds) {
            if fd.revents().is_some_and(|r| r.intersects(serviceable)) {
                ready.mark(id);
            }
        }
        Ok(ready)
    }

    /// One round of I/O on the pipes the poll reported.
    fn service(&mut self, ready: Readiness) -> std::result::Result<(), StreamError> {
        if ready.output {
            self.stdout.reader_mut().read()?;
        }
        if ready.error {
            self.stderr.reader_mut().read()?;
        }
        if let Some(writer) = self.input.as_mut() {
            // A starved writer is not in the poll set; retry its source once per round.
            if ready.input || !writer.wants_write() {
                writer.write(true)?;
            }
        }
        Ok(())
    }

    fn readers_finished(&self) -> bool {
        self.stdout.reader().is_eof() && self.stderr.reader().is_eof()
    }

    fn close_input(&mut self) {
        if let Some(writer) = self.input.as_mut() {
            if writer.close() {
                debug!("Closed child stdin");
            }
        }
    }

    /// Close every pipe, notifying the consumer once per output pipe.
    fn close_all(&mut self) {
        self.close_input();
        for reader in [self.stdout.reader_mut(), self.stderr.reader_mut()] {
            let pipe = reader.pipe_id();
            if reader.close() {
                if let Some(ref cb) = self.callback {
                    // The verdict is irrelevant, the run is over.
                    let _ = notify(cb, pipe, None);
                }
            }
        }
    }

    fn into_execution(self) -> Execution {
        Execution {
            bytes_written: self.input.as_ref().map_or(0, |w| w.bytes()),
            stdout_bytes: self.stdout.reader().bytes(),
            stderr_bytes: self.stderr.reader().bytes(),
            stdout: self.stdout.into_buffer(),
            stderr: self.stderr.into_buffer(),
            ..Execution::default()
        }
    }
}

fn input_writer<'a>(input: Input<'a>, stdin: ChildStdin, chunk_size: usize) -> Box<dyn Writer + 'a> {
    match input {
        Input::Stream(source) => Box::new(StreamWriter::new(source, stdin, chunk_size)),
        Input::Bytes(bytes) => Box::new(StringWriter::new(bytes, stdin, chunk_size)),
        Input::None => Box::new(StringWriter::new(Vec::new(), stdin, chunk_size)),
    }
}
