//! `Content-Length` message framing.
//!
//! Every message is `Content-Length: <N>\r\n\r\n` followed by exactly `N`
//! bytes of UTF-8 JSON. The decoder accepts input in arbitrary chunks.

use tracing::warn;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Encode a message body into a complete frame.
pub fn encode(body: &[u8]) -> Vec<u8> {
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    let mut frame = Vec::with_capacity(header.len() + body.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(body);
    frame
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingHeader,
    AwaitingBody(usize),
}

/// Incremental frame decoder.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    state: State,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            state: State::AwaitingHeader,
        }
    }

    /// Append raw bytes read from the stream.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Bytes received but not yet consumed by a complete frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Pop the next complete frame body, if one is buffered.
    ///
    /// Call repeatedly until it returns `None` to drain every complete
    /// message before reading more input.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.state {
                State::AwaitingHeader => {
                    let end = find(&self.buffer, HEADER_TERMINATOR)?;
                    let header = self.buffer[..end].to_vec();
                    self.buffer.drain(..end + HEADER_TERMINATOR.len());
                    match content_length(&header) {
                        Some(len) => self.state = State::AwaitingBody(len),
                        None => {
                            warn!(
                                header = %String::from_utf8_lossy(&header),
                                "discarding frame header without a valid Content-Length"
                            );
                        }
                    }
                }
                State::AwaitingBody(len) => {
                    if self.buffer.len() < len {
                        return None;
                    }
                    let body: Vec<u8> = self.buffer.drain(..len).collect();
                    self.state = State::AwaitingHeader;
                    return Some(body);
                }
            }
        }
    }

    /// Drain every complete frame currently buffered.
    pub fn drain_frames(&mut self) -> Vec<Vec<u8>> {
        std::iter::from_fn(|| self.next_frame()).collect()
    }
}

fn content_length(header: &[u8]) -> Option<usize> {
    let text = std::str::from_utf8(header).ok()?;
    text.split("\r\n").find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("Content-Length") {
            value.trim().parse::<usize>().ok()
        } else {
            None
        }
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = br#"{"jsonrpc":"2.0","id":1,"result":{}}"#;

    #[test]
    fn single_chunk() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&encode(BODY));
        assert_eq!(decoder.next_frame().as_deref(), Some(BODY));
        assert_eq!(decoder.next_frame(), None);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn split_inside_header_and_body() {
        let frame = encode(BODY);
        // Every possible split point, covering header and body.
        for split in 1..frame.len() {
            let mut decoder = FrameDecoder::new();
            decoder.push(&frame[..split]);
            let early = decoder.drain_frames();
            decoder.push(&frame[split..]);
            let late = decoder.drain_frames();

            let frames: Vec<_> = early.into_iter().chain(late).collect();
            assert_eq!(frames, vec![BODY.to_vec()], "split at {split}");
        }
    }

    #[test]
    fn concatenated_frames_drain_together() {
        let mut chunk = encode(b"{\"a\":1}");
        chunk.extend(encode(b"{\"b\":2}"));
        chunk.extend(encode(b"{\"c\":3}"));

        let mut decoder = FrameDecoder::new();
        decoder.push(&chunk);
        let frames = decoder.drain_frames();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2], b"{\"c\":3}");
    }

    #[test]
    fn resynchronizes_after_bad_header() {
        let mut chunk = b"X-Garbage: yes\r\n\r\n".to_vec();
        chunk.extend(b"Content-Length: nope\r\n\r\n");
        chunk.extend(encode(BODY));

        let mut decoder = FrameDecoder::new();
        decoder.push(&chunk);
        assert_eq!(decoder.drain_frames(), vec![BODY.to_vec()]);
    }

    #[test]
    fn header_is_case_insensitive_with_extra_fields() {
        let mut chunk = format!(
            "content-type: application/json\r\ncontent-length: {}\r\n\r\n",
            BODY.len()
        )
        .into_bytes();
        chunk.extend_from_slice(BODY);

        let mut decoder = FrameDecoder::new();
        decoder.push(&chunk);
        assert_eq!(decoder.next_frame().as_deref(), Some(BODY));
    }

    #[test]
    fn multibyte_body_uses_byte_length() {
        let body = "{\"text\":\"héllo ✓\"}".as_bytes();
        let mut decoder = FrameDecoder::new();
        let frame = encode(body);
        decoder.push(&frame[..frame.len() - 2]);
        assert_eq!(decoder.next_frame(), None);
        decoder.push(&frame[frame.len() - 2..]);
        assert_eq!(decoder.next_frame().as_deref(), Some(body));
    }
}
