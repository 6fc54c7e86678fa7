//! Readers that hand data to a consumer callback instead of buffering it.

use std::io::{self, Read};
use std::os::fd::{AsFd, BorrowedFd};

use super::{Flow, Handler, LineBuffer, PipeId, ReadPipe, Reader, SharedCallback, StreamError, notify};

/// Forwards every non-empty chunk verbatim to the callback.
pub struct CallbackReader<'cb, R> {
    pipe: ReadPipe<R>,
    callback: SharedCallback<'cb>,
    scratch: Vec<u8>,
    bytes: u64,
}

impl<'cb, R> CallbackReader<'cb, R> {
    pub fn new(
        pipe_id: PipeId,
        source: R,
        callback: SharedCallback<'cb>,
        chunk_size: usize,
    ) -> Self {
        Self {
            pipe: ReadPipe::new(pipe_id, source),
            callback,
            scratch: vec![0; chunk_size.max(1)],
            bytes: 0,
        }
    }

    fn deliver(&self, data: &[u8]) -> Result<(), StreamError> {
        match notify(&self.callback, self.pipe.id(), Some(data)) {
            Flow::Continue => Ok(()),
            Flow::Stop => Err(StreamError::Terminated),
        }
    }
}

impl<R: Read> CallbackReader<'_, R> {
    /// Read one chunk into the scratch buffer without delivering it.
    fn pull(&mut self) -> io::Result<usize> {
        let n = self.pipe.read_chunk(&mut self.scratch)?;
        self.bytes += n as u64;
        Ok(n)
    }
}

impl<R> Handler for CallbackReader<'_, R> {
    fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl<R: Read + AsFd> Reader for CallbackReader<'_, R> {
    fn read(&mut self) -> Result<usize, StreamError> {
        let n = self.pull()?;
        if n > 0 {
            self.deliver(&self.scratch[..n])?;
        }
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

/// Line framing layered over [`CallbackReader`]'s chunk delivery.
///
/// The callback sees each complete line including its `\n`. The trailing
/// partial line is held back until more data arrives, and delivered on its own
/// once the pipe reaches end of file.
pub struct CallbackLinesReader<'cb, R> {
    chunks: CallbackReader<'cb, R>,
    lines: LineBuffer,
}

impl<'cb, R> CallbackLinesReader<'cb, R> {
    pub fn new(
        pipe_id: PipeId,
        source: R,
        callback: SharedCallback<'cb>,
        chunk_size: usize,
    ) -> Self {
        Self::with_line_cap(pipe_id, source, callback, chunk_size, None)
    }

    pub fn with_line_cap(
        pipe_id: PipeId,
        source: R,
        callback: SharedCallback<'cb>,
        chunk_size: usize,
        max_line_bytes: Option<usize>,
    ) -> Self {
        Self {
            chunks: CallbackReader::new(pipe_id, source, callback, chunk_size),
            lines: LineBuffer::new(max_line_bytes),
        }
    }

    /// Bytes read but not yet delivered because no newline followed them.
    pub const fn pending(&self) -> usize {
        self.lines.pending()
    }
}

impl<R> Handler for CallbackLinesReader<'_, R> {
    fn bytes(&self) -> u64 {
        self.chunks.bytes()
    }
}

impl<R: Read + AsFd> Reader for CallbackLinesReader<'_, R> {
    fn read(&mut self) -> Result<usize, StreamError> {
        let n = self.chunks.pull()?;
        let id = self.chunks.pipe.id();

        if n > 0 {
            let callback = &self.chunks.callback;
            let flow = self
                .lines
                .split(&self.chunks.scratch[..n], |line| notify(callback, id, Some(line)));
            if flow.is_stop() {
                return Err(StreamError::Terminated);
            }
        }

        if self.chunks.is_eof() {
            if let Some(rest) = self.lines.finish() {
                self.chunks.deliver(&rest)?;
            }
        }
        Ok(n)
    }

    fn pipe_id(&self) -> PipeId {
        self.chunks.pipe_id()
    }

    fn is_eof(&self) -> bool {
        self.chunks.is_eof()
    }

    fn close(&mut self) -> bool {
        self.chunks.close()
    }

    fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        self.chunks.poll_fd()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::stream::shared_callback;
    use crate::stream::test_support::{pipe_with, test_payload};

    #[derive(Default)]
    struct Seen {
        calls: usize,
        data: Vec<u8>,
        chunks: Vec<Vec<u8>>,
    }

    fn recording(seen: &Rc<RefCell<Seen>>, expected: PipeId) -> SharedCallback<'static> {
        let seen = Rc::clone(seen);
        shared_callback(move |pipe, data| {
            assert_eq!(pipe, expected);
            let mut seen = seen.borrow_mut();
            seen.calls += 1;
            if let Some(data) = data {
                seen.data.extend_from_slice(data);
                seen.chunks.push(data.to_vec());
            }
            Flow::Continue
        })
    }

    fn drain(reader: &mut dyn Reader) -> (usize, usize) {
        let mut total = 0;
        let mut iterations = 0;
        while !reader.is_eof() {
            total += reader.read().unwrap();
            iterations += 1;
        }
        (total, iterations)
    }

    #[test]
    fn chunk_reader_delivers_same_data() {
        let value = test_payload(1000);
        let seen = Rc::new(RefCell::new(Seen::default()));
        let chunk_size = 1000;
        let mut reader = CallbackReader::new(
            PipeId::Output,
            pipe_with(value.clone()),
            recording(&seen, PipeId::Output),
            chunk_size,
        );

        let (total, iterations) = drain(&mut reader);

        assert_eq!(total, value.len());
        assert_eq!(reader.bytes(), value.len() as u64);
        assert!(iterations >= value.len().div_ceil(chunk_size));
        let seen = seen.borrow();
        assert_eq!(seen.data, value);
        assert!(seen.chunks.iter().all(|c| !c.is_empty() && c.len() <= chunk_size));
    }

    #[test]
    fn chunk_reader_stop_raises_termination() {
        let stopped = shared_callback(|_, _| Flow::Stop);
        let mut reader = CallbackReader::new(PipeId::Error, pipe_with(b"x".to_vec()), stopped, 16);
        let err = loop {
            match reader.read() {
                Ok(_) => {}
                Err(e) => break e,
            }
        };
        assert!(matches!(err, StreamError::Terminated));
    }

    #[test]
    fn lines_reader_counts_two_lines() {
        let seen = Rc::new(RefCell::new(Seen::default()));
        let mut reader = CallbackLinesReader::new(
            PipeId::Output,
            pipe_with(b"foobar\nfoobar\n".to_vec()),
            recording(&seen, PipeId::Output),
            1000,
        );
        drain(&mut reader);
        assert_eq!(seen.borrow().calls, 2);
    }

    #[test]
    fn lines_reader_delivers_whole_lines_only() {
        let value = test_payload(1000);
        let seen = Rc::new(RefCell::new(Seen::default()));
        // 37 does not divide the 115-byte line length, so lines straddle chunks.
        let mut reader = CallbackLinesReader::new(
            PipeId::Error,
            pipe_with(value.clone()),
            recording(&seen, PipeId::Error),
            37,
        );

        let (total, _) = drain(&mut reader);

        assert_eq!(total, value.len());
        assert_eq!(reader.bytes(), value.len() as u64);
        assert_eq!(reader.pending(), 0);
        let seen = seen.borrow();
        assert_eq!(seen.calls, value.iter().filter(|&&b| b == b'\n').count());
        assert!(seen.chunks.iter().all(|line| line.ends_with(b"\n")));
        assert_eq!(seen.data, value);
    }

    #[test]
    fn lines_reader_flushes_trailing_partial_line_at_eof() {
        let seen = Rc::new(RefCell::new(Seen::default()));
        let mut reader = CallbackLinesReader::new(
            PipeId::Output,
            pipe_with(b"a\nbb\nccc".to_vec()),
            recording(&seen, PipeId::Output),
            2,
        );
        drain(&mut reader);
        let seen = seen.borrow();
        assert_eq!(
            seen.chunks,
            vec![b"a\n".to_vec(), b"bb\n".to_vec(), b"ccc".to_vec()]
        );
    }

    #[test]
    fn lines_reader_stop_on_second_line() {
        let calls = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&calls);
        let callback = shared_callback(move |_, _| {
            *counter.borrow_mut() += 1;
            if *counter.borrow() == 2 { Flow::Stop } else { Flow::Continue }
        });
        let mut reader =
            CallbackLinesReader::new(PipeId::Output, pipe_with(b"1\n2\n3\n".to_vec()), callback, 64);

        let mut result = Ok(0);
        while !reader.is_eof() && result.is_ok() {
            result = reader.read();
        }
        assert!(matches!(result, Err(StreamError::Terminated)));
        assert_eq!(*calls.borrow(), 2);
    }
}
