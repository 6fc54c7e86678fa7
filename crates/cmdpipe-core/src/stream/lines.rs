//! Newline framing for line-mode consumers.

use super::Flow;

/// Carries the trailing partial line between reads and hands out complete
/// `\n`-terminated lines.
///
/// Without a cap the carry-over grows until a newline arrives. With
/// `max_line_bytes` set, a carry-over that reaches the cap is emitted as a
/// fragment (without a trailing `\n`) and buffering starts over.
#[derive(Debug, Default)]
pub struct LineBuffer {
    carry: Vec<u8>,
    max_line_bytes: Option<usize>,
}

impl LineBuffer {
    pub const fn new(max_line_bytes: Option<usize>) -> Self {
        Self {
            carry: Vec::new(),
            max_line_bytes,
        }
    }

    /// Bytes held back waiting for a newline.
    pub const fn pending(&self) -> usize {
        self.carry.len()
    }

    /// Feed a chunk and emit every line it completes, in order.
    ///
    /// Stops at the first [`Flow::Stop`] and returns it; lines after that
    /// point are not emitted.
    pub fn split(&mut self, chunk: &[u8], mut emit: impl FnMut(&[u8]) -> Flow) -> Flow {
        let mut rest = chunk;

        if !self.carry.is_empty() {
            let Some(pos) = find_newline(rest) else {
                self.carry.extend_from_slice(rest);
                return self.enforce_cap(&mut emit);
            };
            self.carry.extend_from_slice(&rest[..=pos]);
            rest = &rest[pos + 1..];
            let line = std::mem::take(&mut self.carry);
            if emit(&line).is_stop() {
                return Flow::Stop;
            }
        }

        while let Some(pos) = find_newline(rest) {
            if emit(&rest[..=pos]).is_stop() {
                return Flow::Stop;
            }
            rest = &rest[pos + 1..];
        }

        self.carry.extend_from_slice(rest);
        self.enforce_cap(&mut emit)
    }

    /// Take the unterminated remainder, if any. Called at end of file.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        if self.carry.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.carry))
        }
    }

    fn enforce_cap(&mut self, emit: &mut impl FnMut(&[u8]) -> Flow) -> Flow {
        let Some(max) = self.max_line_bytes.filter(|max| *max > 0) else {
            return Flow::Continue;
        };
        while self.carry.len() >= max {
            let fragment: Vec<u8> = self.carry.drain(..max).collect();
            if emit(&fragment).is_stop() {
                return Flow::Stop;
            }
        }
        Flow::Continue
    }
}

fn find_newline(data: &[u8]) -> Option<usize> {
    data.iter().position(|&b| b == b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(buffer: &mut LineBuffer, chunks: &[&[u8]]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        for chunk in chunks {
            let _ = buffer.split(chunk, |line| {
                lines.push(line.to_vec());
                Flow::Continue
            });
        }
        lines
    }

    #[test]
    fn whole_lines_in_one_chunk() {
        let mut buffer = LineBuffer::default();
        let lines = collect(&mut buffer, &[b"foobar\nfoobar\n"]);
        assert_eq!(lines, vec![b"foobar\n".to_vec(), b"foobar\n".to_vec()]);
        assert_eq!(buffer.pending(), 0);
        assert!(buffer.finish().is_none());
    }

    #[test]
    fn line_split_across_chunks_is_reassembled() {
        let mut buffer = LineBuffer::default();
        let lines = collect(&mut buffer, &[b"fo", b"o\nba", b"r", b"\nbaz"]);
        assert_eq!(lines, vec![b"foo\n".to_vec(), b"bar\n".to_vec()]);
        assert_eq!(buffer.finish(), Some(b"baz".to_vec()));
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn crlf_keeps_carriage_return() {
        let mut buffer = LineBuffer::default();
        let lines = collect(&mut buffer, &[b"a\r\nb\r\n"]);
        assert_eq!(lines, vec![b"a\r\n".to_vec(), b"b\r\n".to_vec()]);
    }

    #[test]
    fn empty_lines_are_delivered() {
        let mut buffer = LineBuffer::default();
        let lines = collect(&mut buffer, &[b"\n\nx\n"]);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], b"\n");
    }

    #[test]
    fn stop_halts_emission() {
        let mut buffer = LineBuffer::default();
        let mut seen = 0;
        let flow = buffer.split(b"1\n2\n3\n", |_| {
            seen += 1;
            if seen == 2 { Flow::Stop } else { Flow::Continue }
        });
        assert_eq!(flow, Flow::Stop);
        assert_eq!(seen, 2);
    }

    #[test]
    fn cap_emits_fragments() {
        let mut buffer = LineBuffer::new(Some(4));
        let lines = collect(&mut buffer, &[b"abcdefghij", b"k\n"]);
        assert_eq!(
            lines,
            vec![b"abcd".to_vec(), b"efgh".to_vec(), b"ijk\n".to_vec()]
        );
    }

    #[test]
    fn uncapped_buffer_grows() {
        let mut buffer = LineBuffer::default();
        let lines = collect(&mut buffer, &[&[b'x'; 10_000], &[b'y'; 10_000]]);
        assert!(lines.is_empty());
        assert_eq!(buffer.pending(), 20_000);
    }
}
