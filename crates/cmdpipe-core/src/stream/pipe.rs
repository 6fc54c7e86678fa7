//! Owned pipe endpoints with end-of-file tracking and idempotent close.

use std::io::{self, ErrorKind, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};

use tracing::debug;

use super::PipeId;

/// The readable end of one of the child's output pipes.
#[derive(Debug)]
pub struct ReadPipe<R> {
    id: PipeId,
    inner: Option<R>,
    eof: bool,
}

impl<R> ReadPipe<R> {
    pub const fn new(id: PipeId, inner: R) -> Self {
        Self {
            id,
            inner: Some(inner),
            eof: false,
        }
    }

    pub const fn id(&self) -> PipeId {
        self.id
    }

    /// True once a read observed end of file or the pipe was closed.
    pub const fn is_eof(&self) -> bool {
        self.eof || self.inner.is_none()
    }

    pub const fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    /// Drop the endpoint. Returns `false` if it was already closed.
    pub fn close(&mut self) -> bool {
        self.inner.take().is_some()
    }
}

impl<R: Read> ReadPipe<R> {
    /// Read at most `buf.len()` bytes without blocking.
    ///
    /// Would-block and interrupted reads return `Ok(0)`. A zero-length read
    /// from the OS marks the pipe as finished.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.eof || buf.is_empty() {
            return Ok(0);
        }
        let Some(inner) = self.inner.as_mut() else {
            return Ok(0);
        };
        match inner.read(buf) {
            Ok(0) => {
                self.eof = true;
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => Ok(0),
            Err(e) => Err(e),
        }
    }
}

impl<R: AsFd> ReadPipe<R> {
    pub fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        if self.eof {
            return None;
        }
        self.inner.as_ref().map(AsFd::as_fd)
    }
}

/// The writable end of the child's input pipe.
#[derive(Debug)]
pub struct WritePipe<W> {
    inner: Option<W>,
}

impl<W> WritePipe<W> {
    pub const fn new(inner: W) -> Self {
        Self { inner: Some(inner) }
    }

    pub const fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    /// Drop the endpoint, signalling end of file to the reader.
    /// Returns `false` if it was already closed.
    pub fn close(&mut self) -> bool {
        self.inner.take().is_some()
    }
}

impl<W: Write> WritePipe<W> {
    /// Write as much of `data` as the pipe accepts right now.
    ///
    /// A full pipe yields `Ok(0)`. If the reading side has gone away the pipe
    /// is closed and `Ok(0)` is returned; callers check [`WritePipe::is_open`].
    pub fn write_chunk(&mut self, data: &[u8]) -> io::Result<usize> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(0);
        };
        match inner.write(data) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => Ok(0),
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                debug!("reader of input pipe went away, closing it");
                self.inner = None;
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }
}

impl<W: AsFd> WritePipe<W> {
    pub fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        self.inner.as_ref().map(AsFd::as_fd)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn read_pipe_reports_eof_only_after_zero_read() {
        let (reader, writer) = std::io::pipe().unwrap();
        drop(writer);
        let mut pipe = ReadPipe::new(PipeId::Output, reader);
        assert!(!pipe.is_eof());
        assert!(pipe.poll_fd().is_some());

        let mut buf = [0u8; 16];
        assert_eq!(pipe.read_chunk(&mut buf).unwrap(), 0);
        assert!(pipe.is_eof());
        assert!(pipe.poll_fd().is_none());
    }

    #[test]
    fn read_pipe_close_is_idempotent() {
        let (reader, _writer) = std::io::pipe().unwrap();
        let mut pipe = ReadPipe::new(PipeId::Error, reader);
        assert!(pipe.close());
        assert!(!pipe.close());
        assert!(pipe.is_eof());
        assert_eq!(pipe.id(), PipeId::Error);
    }

    #[test]
    fn write_pipe_closes_itself_on_broken_pipe() {
        let (reader, writer) = std::io::pipe().unwrap();
        drop(reader);
        let mut pipe = WritePipe::new(writer);
        assert_eq!(pipe.write_chunk(b"data").unwrap(), 0);
        assert!(!pipe.is_open());
        assert!(pipe.poll_fd().is_none());
    }

    #[test]
    fn write_pipe_close_is_idempotent() {
        let (_reader, writer) = std::io::pipe().unwrap();
        let mut pipe = WritePipe::new(writer);
        assert!(pipe.close());
        assert!(!pipe.close());
        assert_eq!(pipe.write_chunk(b"ignored").unwrap(), 0);
    }
}
