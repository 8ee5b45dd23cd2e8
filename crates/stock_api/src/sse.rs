use chat_contract::{ChatError, TurnFrame};
use tracing::warn;

/// Incremental parser for `event:` / `data:` line pairs.
///
/// Bytes are buffered until a full line is available, so frames and even
/// multi-byte characters may be split across reads.
#[derive(Debug, Default)]
pub struct FrameParser {
    buffer: Vec<u8>,
    pending_tag: Option<String>,
}

impl FrameParser {
    /// Feed arbitrary bytes and drain every frame completed by them.
    ///
    /// Unknown tags, malformed payloads and orphan `data:` lines come back as
    /// `StreamProtocol` errors for the caller to log and skip.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<TurnFrame, ChatError>> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(frame) = self.consume_line(line) {
                frames.push(frame);
            }
        }

        frames
    }

    /// Parse a complete payload in one shot.
    pub fn parse_all(input: &str) -> Vec<Result<TurnFrame, ChatError>> {
        let mut parser = Self::default();
        let frames = parser.feed(input.as_bytes());
        parser.finish();
        frames
    }

    /// Called when the channel closes. A trailing partial line is discarded.
    pub fn finish(&mut self) {
        if !self.buffer.is_empty() {
            warn!(
                bytes = self.buffer.len(),
                "discarding incomplete trailing line at stream close"
            );
            self.buffer.clear();
        }
        if let Some(tag) = self.pending_tag.take() {
            warn!(tag = %tag, "stream closed between event and data lines");
        }
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.is_empty() && self.pending_tag.is_none()
    }

    fn consume_line(&mut self, line: &str) -> Option<Result<TurnFrame, ChatError>> {
        if line.is_empty() || line.starts_with(':') {
            return None;
        }

        if let Some(tag) = field_value(line, "event") {
            if let Some(previous) = self.pending_tag.replace(tag.to_owned()) {
                return Some(Err(ChatError::stream_protocol(format!(
                    "event '{previous}' had no data line"
                ))));
            }
            return None;
        }

        if let Some(data) = field_value(line, "data") {
            return Some(match self.pending_tag.take() {
                Some(tag) => TurnFrame::decode(&tag, data),
                None => Err(ChatError::stream_protocol(
                    "data line without a preceding event line",
                )),
            });
        }

        // `id:`, `retry:` and unknown fields carry nothing for turns.
        None
    }
}

fn field_value<'a>(line: &'a str, field: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(field)?.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest).trim_end())
}

#[cfg(test)]
mod tests {
    use super::FrameParser;

    #[test]
    fn parse_frames_incrementally() {
        let mut parser = FrameParser::default();
        let mut frames = Vec::new();

        frames.extend(parser.feed(b"event: token\ndata: {\"content\":\"Hel"));
        assert!(frames.is_empty());
        frames.extend(parser.feed(b"lo\"}\n\n"));
        assert_eq!(frames.len(), 1);
        assert!(parser.is_empty_buffer());
    }
}
