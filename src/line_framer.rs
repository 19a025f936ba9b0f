//! Splits a byte stream on CRLF into complete protocol lines.
//!
//! Retains any trailing partial line across calls to `push`, so callers can
//! feed it arbitrarily-chunked reads from the socket.

#[derive(Debug, Default)]
pub struct LineFramer {
    residual: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning the complete lines (without the
    /// trailing CRLF) found so far. Any bytes after the last CRLF are kept
    /// for the next call.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.residual.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = find_crlf(&self.residual[start..]) {
            let end = start + pos;
            lines.push(self.residual[start..end].to_vec());
            start = end + 2;
        }
        self.residual.drain(0..start);
        lines
    }

    /// Bytes accumulated since the last complete line, not yet consumed.
    pub fn residual(&self) -> &[u8] {
        &self.residual
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_complete_lines_and_keeps_partial_tail() {
        let mut framer = LineFramer::new();
        let lines = framer.push(b"PING :server\r\nPRIVMSG #ch");
        assert_eq!(lines, vec![b"PING :server".to_vec()]);
        assert_eq!(framer.residual(), b"PRIVMSG #ch");

        let lines = framer.push(b"an :hi\r\n");
        assert_eq!(lines, vec![b"PRIVMSG #chan :hi".to_vec()]);
        assert!(framer.residual().is_empty());
    }

    #[test]
    fn handles_multiple_lines_in_one_chunk() {
        let mut framer = LineFramer::new();
        let lines = framer.push(b"A\r\nB\r\nC\r\n");
        assert_eq!(lines, vec![b"A".to_vec(), b"B".to_vec(), b"C".to_vec()]);
    }

    #[test]
    fn handles_crlf_split_across_chunks() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"A\r").is_empty());
        let lines = framer.push(b"\nB\r\n");
        assert_eq!(lines, vec![b"A".to_vec(), b"B".to_vec()]);
    }

    #[test]
    fn buffer_identity_holds_for_arbitrary_splits() {
        let stream = b"NICK foo\r\nUSER foo 0 * :Foo\r\nJOIN #x\r\n".to_vec();
        // split at every byte boundary and recombine, must recover identical bytes
        for split_at in 0..stream.len() {
            let mut framer = LineFramer::new();
            let mut out = Vec::new();
            for line in framer.push(&stream[..split_at]) {
                out.extend_from_slice(&line);
                out.extend_from_slice(b"\r\n");
            }
            for line in framer.push(&stream[split_at..]) {
                out.extend_from_slice(&line);
                out.extend_from_slice(b"\r\n");
            }
            out.extend_from_slice(framer.residual());
            assert_eq!(out, stream, "split_at={split_at}");
        }
    }
}
