use std::borrow::Cow;
use std::io::Write;
use std::os::fd::{AsFd, BorrowedFd};

use super::{Handler, StreamError, WriteProgress, WritePipe, Writer};

/// Drains an in-memory payload into a pipe, one chunk per call.
#[derive(Debug)]
pub struct StringWriter<'a, W> {
    data: Cow<'a, [u8]>,
    position: usize,
    pipe: WritePipe<W>,
    chunk_size: usize,
    bytes: u64,
}

impl<'a, W> StringWriter<'a, W> {
    pub fn new(data: impl Into<Cow<'a, [u8]>>, dest: W, chunk_size: usize) -> Self {
        Self {
            data: data.into(),
            position: 0,
            pipe: WritePipe::new(dest),
            chunk_size: chunk_size.max(1),
            bytes: 0,
        }
    }

    /// Payload bytes not yet accepted by the pipe.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }
}

impl<W> Handler for StringWriter<'_, W> {
    fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl<W: Write + AsFd> Writer for StringWriter<'_, W> {
    fn write(&mut self, auto_close: bool) -> Result<WriteProgress, StreamError> {
        if !self.pipe.is_open() {
            return Ok(WriteProgress::Done);
        }
        if self.remaining() == 0 {
            if auto_close {
                self.pipe.close();
            }
            return Ok(WriteProgress::Done);
        }

        let end = self.data.len().min(self.position + self.chunk_size);
        let n = self.pipe.write_chunk(&self.data[self.position..end])?;
        if !self.pipe.is_open() {
            return Ok(WriteProgress::Done);
        }
        self.position += n;
        self.bytes += n as u64;

        if auto_close && self.remaining() == 0 {
            self.pipe.close();
        }
        Ok(WriteProgress::Written(n))
    }

    fn is_open(&self) -> bool {
        self.pipe.is_open()
    }

    fn close(&mut self) -> bool {
        self.pipe.close()
    }

    fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        self.pipe.poll_fd()
    }
}
