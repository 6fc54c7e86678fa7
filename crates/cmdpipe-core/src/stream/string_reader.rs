use std::io::Read;
use std::os::fd::{AsFd, BorrowedFd};

use super::{Handler, PipeId, ReadPipe, Reader, StreamError};

/// Accumulates everything read from a pipe into an owned buffer.
///
/// Used when no callback is registered.
#[derive(Debug)]
pub struct StringReader<R> {
    pipe: ReadPipe<R>,
    buffer: Vec<u8>,
    scratch: Vec<u8>,
    bytes: u64,
}

impl<R> StringReader<R> {
    pub fn new(pipe_id: PipeId, source: R, chunk_size: usize) -> Self {
        Self {
            pipe: ReadPipe::new(pipe_id, source),
            buffer: Vec::new(),
            scratch: vec![0; chunk_size.max(1)],
            bytes: 0,
        }
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }
}

impl<R> Handler for StringReader<R> {
    fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl<R: Read + AsFd> Reader for StringReader<R> {
    fn read(&mut self) -> Result<usize, StreamError> {
        let n = self.pipe.read_chunk(&mut self.scratch)?;
        self.buffer.extend_from_slice(&self.scratch[..n]);
        self.bytes += n as u64;
        Ok(n)
    }

    fn pipe_id(&self) -> PipeId {
        self.pipe.id()
    }

    fn is_eof(&self) -> bool {
        self.pipe.is_eof()
    }

    fn close(&mut self) -> bool {
        self.pipe.close()
    }

    fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        self.pipe.poll_fd()
    }
}
