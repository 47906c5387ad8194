use tracing::warn;

use crate::error::FrameParseWarning;
use crate::events::AskEvent;

const DATA_PREFIX: &str = "data:";

/// Incremental decoder for the newline-delimited `data:` event stream.
///
/// Owns the partial-line buffer for exactly one attempt. Bytes are buffered
/// raw and only decoded once a full line is available, so multi-byte UTF-8
/// sequences split across reads stay intact.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    dropped_frames: usize,
}

impl FrameDecoder {
    /// Feed arbitrary bytes into the decoder and drain complete events.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<AskEvent> {
        self.buffer.extend_from_slice(bytes);
        let Some(last_newline) = self.buffer.iter().rposition(|byte| *byte == b'\n') else {
            return Vec::new();
        };

        let complete: Vec<u8> = self.buffer.drain(..=last_newline).collect();
        let mut events = Vec::new();
        for line in complete.split(|byte| *byte == b'\n') {
            match decode_line(&String::from_utf8_lossy(line)) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(warning) => {
                    self.dropped_frames += 1;
                    warn!(%warning, "failed to parse stream frame");
                }
            }
        }

        events
    }

    /// End of stream. Any unterminated trailing fragment is discarded; the
    /// number of discarded bytes is returned.
    pub fn finish(self) -> usize {
        self.buffer.len()
    }

    /// Decode a complete payload in one shot.
    pub fn parse_frames(input: &str) -> Vec<AskEvent> {
        let mut decoder = Self::default();
        decoder.feed(input.as_bytes())
    }

    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn dropped_frames(&self) -> usize {
        self.dropped_frames
    }
}

/// Decode one complete line. `Ok(None)` means the line carries no event.
pub fn decode_line(line: &str) -> Result<Option<AskEvent>, FrameParseWarning> {
    let Some(payload) = line.trim().strip_prefix(DATA_PREFIX) else {
        return Ok(None);
    };
    let payload = payload.trim();
    if payload.is_empty() {
        return Ok(None);
    }

    serde_json::from_str::<AskEvent>(payload)
        .map(Some)
        .map_err(|source| FrameParseWarning {
            payload: payload.to_owned(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_frames_incrementally() {
        let mut decoder = FrameDecoder::default();

        assert!(decoder.feed(b"data: {\"delta\":\"Hel").is_empty());
        assert!(decoder.pending_bytes() > 0);

        let events = decoder.feed(b"lo\"}\ndata: {\"finish\":true}\n");
        assert_eq!(events, vec![AskEvent::delta("Hello"), AskEvent::finished()]);
        assert_eq!(decoder.pending_bytes(), 0);
    }

    #[test]
    fn decode_line_ignores_non_data_lines() {
        for line in ["", "   ", ": keep-alive", "event: message", "id: 7", "delta: {}"] {
            assert!(decode_line(line).expect("not a frame").is_none(), "{line:?}");
        }
    }

    #[test]
    fn decode_line_accepts_prefix_without_space_and_surrounding_whitespace() {
        let event = decode_line("  data:{\"delta\":\"x\"}\r")
            .expect("valid frame")
            .expect("event");
        assert_eq!(event, AskEvent::delta("x"));
    }

    #[test]
    fn decode_line_reports_malformed_payload() {
        let warning = decode_line("data: {broken").expect_err("malformed json");
        assert_eq!(warning.payload, "{broken");
    }

    #[test]
    fn finish_reports_discarded_tail() {
        let mut decoder = FrameDecoder::default();
        assert!(decoder.feed(b"data: {\"delta\":\"tail\"}").is_empty());
        assert_eq!(decoder.finish(), "data: {\"delta\":\"tail\"}".len());
    }
}
