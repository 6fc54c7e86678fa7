use std::io::{self, ErrorKind, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};

use super::{Handler, StreamError, WriteProgress, WritePipe, Writer};

/// Copies an external byte source into a pipe, one chunk per call.
///
/// At most one chunk is held in memory: the source is only read when the
/// pending buffer has room. A partial write keeps the unwritten tail for the
/// next call.
#[derive(Debug)]
pub struct StreamWriter<S, W> {
    source: S,
    source_eof: bool,
    /// The last refill found the source empty but not finished.
    starved: bool,
    pending: Vec<u8>,
    pipe: WritePipe<W>,
    chunk_size: usize,
    bytes: u64,
}

impl<S: Read, W> StreamWriter<S, W> {
    pub fn new(source: S, dest: W, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            source,
            source_eof: false,
            starved: false,
            pending: Vec::with_capacity(chunk_size),
            pipe: WritePipe::new(dest),
            chunk_size,
            bytes: 0,
        }
    }

    fn refill(&mut self) -> io::Result<()> {
        if self.source_eof || self.pending.len() >= self.chunk_size {
            return Ok(());
        }
        let start = self.pending.len();
        self.pending.resize(self.chunk_size, 0);
        self.starved = false;
        match self.source.read(&mut self.pending[start..]) {
            Ok(0) => {
                self.source_eof = true;
                self.pending.truncate(start);
            }
            Ok(n) => self.pending.truncate(start + n),
            Err(e) if e.kind() == ErrorKind::Interrupted => {
                self.pending.truncate(start);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                self.pending.truncate(start);
                self.starved = start == 0;
            }
            Err(e) => {
                self.pending.truncate(start);
                return Err(e);
            }
        }
        Ok(())
    }

    fn is_drained(&self) -> bool {
        self.source_eof && self.pending.is_empty()
    }
}

impl<S, W> Handler for StreamWriter<S, W> {
    fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl<S: Read, W: Write + AsFd> Writer for StreamWriter<S, W> {
    fn write(&mut self, auto_close: bool) -> Result<WriteProgress, StreamError> {
        if !self.pipe.is_open() {
            return Ok(WriteProgress::Done);
        }

        self.refill()?;
        if self.pending.is_empty() {
            if !self.source_eof {
                return Ok(WriteProgress::Written(0));
            }
            if auto_close {
                self.pipe.close();
            }
            return Ok(WriteProgress::Done);
        }

        let n = self.pipe.write_chunk(&self.pending)?;
        if !self.pipe.is_open() {
            return Ok(WriteProgress::Done);
        }
        self.pending.drain(..n);
        self.bytes += n as u64;

        if auto_close && self.is_drained() {
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

    fn wants_write(&self) -> bool {
        !self.starved
    }
}
