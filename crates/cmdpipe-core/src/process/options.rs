//! Per-invocation configuration: execution options, input payload and
//! output consumer.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use nix::poll::PollTimeout;

use crate::error::{Error, Result};
use crate::stream::{DEFAULT_CHUNK_SIZE, Flow, PipeId, SharedCallback, shared_callback};

/// Options for one [`ProcessManager`](super::ProcessManager) run.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Directory the child starts in. Inherited when `None`.
    pub working_directory: Option<PathBuf>,
    /// Complete child environment. When set it replaces the inherited one.
    pub environment: Option<HashMap<String, String>>,
    /// Upper bound for a single read or write, in bytes.
    pub chunk_size: usize,
    /// How long one readiness poll may block.
    pub poll_interval: Duration,
    /// Time between SIGTERM and SIGKILL when tearing down a live child.
    pub terminate_grace: Duration,
    /// Cap on the line-mode carry-over buffer. Unbounded when `None`.
    pub max_line_bytes: Option<usize>,
    pub shell: PathBuf,
    pub shell_args: Vec<String>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            working_directory: None,
            environment: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            poll_interval: Duration::from_millis(200),
            terminate_grace: Duration::from_millis(250),
            max_line_bytes: None,
            shell: PathBuf::from("/bin/sh"),
            shell_args: vec!["-c".to_string()],
        }
    }
}

impl ExecOptions {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk size must be greater than zero".into()));
        }
        if self.poll_interval < Duration::from_millis(1) {
            return Err(Error::Config("poll interval must be at least 1ms".into()));
        }
        if self.max_line_bytes == Some(0) {
            return Err(Error::Config("max line bytes must be greater than zero".into()));
        }
        if self.shell.as_os_str().is_empty() {
            return Err(Error::Config("shell must not be empty".into()));
        }
        Ok(())
    }

    /// The poll interval in the form the poll primitive takes, saturating at
    /// its maximum.
    pub fn poll_timeout(&self) -> PollTimeout {
        let millis = u16::try_from(self.poll_interval.as_millis()).unwrap_or(u16::MAX);
        PollTimeout::from(millis)
    }
}

/// Payload fed to the child's stdin.
#[derive(Default)]
pub enum Input<'a> {
    /// No payload: stdin is closed right after spawn.
    #[default]
    None,
    Bytes(Cow<'a, [u8]>),
    /// Any byte source, copied one chunk at a time.
    Stream(Box<dyn Read + 'a>),
}

impl<'a> Input<'a> {
    pub fn stream(source: impl Read + 'a) -> Self {
        Self::Stream(Box::new(source))
    }

    /// An empty in-memory payload counts as no payload.
    pub fn is_none(&self) -> bool {
        match self {
            Self::None => true,
            Self::Bytes(bytes) => bytes.is_empty(),
            Self::Stream(_) => false,
        }
    }
}

impl fmt::Debug for Input<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<()> for Input<'_> {
    fn from((): ()) -> Self {
        Self::None
    }
}

impl<'a> From<&'a [u8]> for Input<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Self::Bytes(Cow::Borrowed(bytes))
    }
}

impl From<Vec<u8>> for Input<'_> {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Cow::Owned(bytes))
    }
}

impl<'a> From<&'a str> for Input<'a> {
    fn from(text: &'a str) -> Self {
        Self::Bytes(Cow::Borrowed(text.as_bytes()))
    }
}

impl From<String> for Input<'_> {
    fn from(text: String) -> Self {
        Self::Bytes(Cow::Owned(text.into_bytes()))
    }
}

/// Where stdout and stderr go. Both pipes always use the same mode.
#[derive(Default)]
pub enum Consumer<'cb> {
    /// Accumulate into [`Execution::stdout`](super::Execution::stdout) and
    /// [`Execution::stderr`](super::Execution::stderr).
    #[default]
    Buffer,
    /// One callback invocation per chunk read.
    Chunks(SharedCallback<'cb>),
    /// One callback invocation per `\n`-terminated line.
    Lines(SharedCallback<'cb>),
}

impl<'cb> Consumer<'cb> {
    pub fn chunks(callback: impl FnMut(PipeId, Option<&[u8]>) -> Flow + 'cb) -> Self {
        Self::Chunks(shared_callback(callback))
    }

    pub fn lines(callback: impl FnMut(PipeId, Option<&[u8]>) -> Flow + 'cb) -> Self {
        Self::Lines(shared_callback(callback))
    }

    pub fn callback(
        callback: impl FnMut(PipeId, Option<&[u8]>) -> Flow + 'cb,
        per_line: bool,
    ) -> Self {
        if per_line {
            Self::lines(callback)
        } else {
            Self::chunks(callback)
        }
    }

    pub(crate) fn shared(&self) -> Option<&SharedCallback<'cb>> {
        match self {
            Self::Buffer => None,
            Self::Chunks(cb) | Self::Lines(cb) => Some(cb),
        }
    }
}

impl fmt::Debug for Consumer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Buffer => "Buffer",
            Self::Chunks(_) => "Chunks(..)",
            Self::Lines(_) => "Lines(..)",
        })
    }
}
