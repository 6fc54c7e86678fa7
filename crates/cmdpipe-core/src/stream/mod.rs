//! Stream handlers that move bytes between the supervisor and a child's pipes.
//!
//! Two capability sets exist: [`Reader`] (drain an output pipe into a consumer)
//! and [`Writer`] (feed a payload into the input pipe). Every handler reports
//! the cumulative number of bytes it moved through [`Handler::bytes`].
//!
//! | Handler | Direction | Consumer |
//! |---|---|---|
//! | [`StringReader`] | child -> us | owned byte buffer |
//! | [`CallbackReader`] | child -> us | callback, one call per chunk |
//! | [`CallbackLinesReader`] | child -> us | callback, one call per `\n`-terminated line |
//! | [`StringWriter`] | us -> child | in-memory payload |
//! | [`StreamWriter`] | us -> child | any [`std::io::Read`] source |

pub mod callback_reader;
pub mod lines;
pub mod pipe;
pub mod stream_writer;
pub mod string_reader;
pub mod string_writer;

use std::cell::RefCell;
use std::fmt;
use std::os::fd::BorrowedFd;
use std::rc::Rc;

pub use callback_reader::{CallbackLinesReader, CallbackReader};
pub use lines::LineBuffer;
pub use pipe::{ReadPipe, WritePipe};
pub use stream_writer::StreamWriter;
pub use string_reader::StringReader;
pub use string_writer::StringWriter;

/// Default number of bytes moved by a single read or write.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Identifies one of the child's three standard streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PipeId {
    Input,
    Output,
    Error,
}

impl PipeId {
    /// The file descriptor number the child sees for this stream.
    pub const fn fd(self) -> i32 {
        match self {
            Self::Input => 0,
            Self::Output => 1,
            Self::Error => 2,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Input => "stdin",
            Self::Output => "stdout",
            Self::Error => "stderr",
        }
    }
}

impl fmt::Display for PipeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value returned by a consumer callback to keep going or to abandon the child.
#[must_use]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Flow {
    #[default]
    Continue,
    Stop,
}

impl Flow {
    pub const fn is_stop(self) -> bool {
        matches!(self, Self::Stop)
    }
}

/// Consumer callback: receives `(pipe, Some(bytes))` for data and
/// `(pipe, None)` once the pipe is finished.
pub type Callback<'cb> = dyn FnMut(PipeId, Option<&[u8]>) -> Flow + 'cb;

/// A callback shared by the stdout and stderr handlers of one invocation.
pub type SharedCallback<'cb> = Rc<RefCell<Callback<'cb>>>;

/// Wrap a closure so it can be shared by several handlers.
pub fn shared_callback<'cb>(
    callback: impl FnMut(PipeId, Option<&[u8]>) -> Flow + 'cb,
) -> SharedCallback<'cb> {
    Rc::new(RefCell::new(callback))
}

/// Invoke a shared callback.
pub(crate) fn notify(callback: &SharedCallback<'_>, pipe: PipeId, data: Option<&[u8]>) -> Flow {
    let mut callback = callback.borrow_mut();
    (&mut *callback)(pipe, data)
}

/// Errors raised by stream handlers.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The consumer returned [`Flow::Stop`]. Not a failure: the supervisor
    /// turns it into an early, successful teardown.
    #[error("consumer requested early termination")]
    Terminated,

    #[error("pipe I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a single [`Writer::write`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteProgress {
    /// Bytes pushed into the pipe by this call (0 if the pipe was full).
    Written(usize),
    /// The whole payload has been delivered, or the pipe is gone.
    Done,
}

/// Common accounting shared by all handlers.
pub trait Handler {
    /// Total bytes moved by this handler so far.
    fn bytes(&self) -> u64;
}

/// Drains one output pipe of the child.
pub trait Reader: Handler {
    /// Perform one bounded, non-blocking read.
    ///
    /// Returns the number of bytes obtained. `0` means nothing was available;
    /// end of file is reported by [`Reader::is_eof`], not by the return value.
    fn read(&mut self) -> Result<usize, StreamError>;

    fn pipe_id(&self) -> PipeId;

    /// Whether the pipe reached end of file (or was closed).
    fn is_eof(&self) -> bool;

    /// Close the pipe. Returns `false` if it was already closed.
    fn close(&mut self) -> bool;

    /// Descriptor to wait on, or `None` once there is nothing left to read.
    fn poll_fd(&self) -> Option<BorrowedFd<'_>>;
}

/// Feeds the input pipe of the child.
pub trait Writer: Handler {
    /// Push up to one chunk of outstanding payload into the pipe.
    ///
    /// A partial write keeps the unwritten remainder for the next call. With
    /// `auto_close` the destination pipe is closed once everything is delivered.
    fn write(&mut self, auto_close: bool) -> Result<WriteProgress, StreamError>;

    fn is_open(&self) -> bool;

    /// Close the pipe. Returns `false` if it was already closed.
    fn close(&mut self) -> bool;

    /// Descriptor to wait on, or `None` once the pipe is closed.
    fn poll_fd(&self) -> Option<BorrowedFd<'_>>;

    /// Whether pipe writability is what this writer waits for.
    ///
    /// `false` while the payload source itself has nothing to offer. Such a
    /// writer stays out of the poll set and is retried once per poll round.
    fn wants_write(&self) -> bool {
        true
    }
}
