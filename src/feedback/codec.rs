use std::borrow::Cow;
use std::io;

use tokio_util::bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

pub const DEFAULT_MAX_LINE_LENGTH: usize = 8 * 1024;

/// Newline framing for controller feedback.
///
/// Never fails on content, only on I/O. Invalid UTF-8 is decoded lossily and
/// a line longer than `max_length` bytes is handed out in `max_length` chunks,
/// so one bad line cannot end the connection.
#[derive(Debug, Clone)]
pub struct FeedbackLineCodec {
    max_length: usize,
    // Bytes already searched for a newline.
    next_index: usize,
}

impl FeedbackLineCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length: max_length.max(1),
            next_index: 0,
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for FeedbackLineCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_LENGTH)
    }
}

impl Decoder for FeedbackLineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        let search_end = buf.len().min(self.max_length + 1);
        let newline = buf[self.next_index.min(search_end)..search_end]
            .iter()
            .position(|b| *b == b'\n')
            .map(|offset| self.next_index + offset);

        if let Some(index) = newline {
            self.next_index = 0;
            let frame = buf.split_to(index + 1);
            return Ok(Some(to_line(&frame[..index])));
        }
        if buf.len() >= self.max_length {
            self.next_index = 0;
            log::warn!(target: "feedback_listener",
                "Line longer than {} bytes, storing it in pieces.", self.max_length);
            let chunk = buf.split_to(self.max_length);
            return Ok(Some(to_line(&chunk)));
        }
        self.next_index = buf.len();
        Ok(None)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        self.next_index = 0;
        if buf.is_empty() {
            return Ok(None);
        }
        let rest = buf.split_to(buf.len());
        Ok(Some(to_line(&rest)))
    }
}

impl Encoder<String> for FeedbackLineCodec {
    type Error = io::Error;

    fn encode(&mut self, line: String, buf: &mut BytesMut) -> Result<(), io::Error> {
        buf.reserve(line.len() + 1);
        buf.put_slice(line.as_bytes());
        buf.put_u8(b'\n');
        Ok(())
    }
}

fn to_line(bytes: &[u8]) -> String {
    let text = match String::from_utf8_lossy(bytes) {
        Cow::Borrowed(text) => text.to_string(),
        Cow::Owned(text) => {
            log::warn!(target: "feedback_listener",
                "Received a line that is not valid UTF-8, keeping '{}'.", text);
            text
        }
    };
    text.trim_end_matches('\r').to_string()
}
