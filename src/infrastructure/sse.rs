// Incremental Server-Sent Events decoder for the Firebase streaming API
use crate::domain::error::SyncError;
use bytes::{Buf, BytesMut};

/// Longest line accepted before the stream is treated as broken.
const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Accepts arbitrary byte chunks and yields complete events. Lines may end in
/// `\n` or `\r\n`; a blank line terminates an event.
#[derive(Debug)]
pub struct SseDecoder {
    buffer: BytesMut,
    event: Option<String>,
    data: Vec<String>,
    max_line: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl SseDecoder {
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            event: None,
            data: Vec::new(),
            max_line,
        }
    }

    /// Feed a chunk. Fails once a line grows past the limit; the decoder is
    /// reset and the connection should be dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>, SyncError> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            if pos > self.max_line {
                return Err(self.overflow());
            }
            let raw = self.buffer.split_to(pos);
            self.buffer.advance(1);
            let text = String::from_utf8_lossy(&raw);
            let line = text.strip_suffix('\r').unwrap_or(&text);

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }

        if self.buffer.len() > self.max_line {
            return Err(self.overflow());
        }
        Ok(events)
    }

    fn overflow(&mut self) -> SyncError {
        self.buffer.clear();
        self.event = None;
        self.data.clear();
        SyncError::Connectivity(format!(
            "event stream line exceeds {} bytes",
            self.max_line
        ))
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if event.is_none() && self.data.is_empty() {
            return None;
        }
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_event() {
        let mut decoder = SseDecoder::default();
        let events = decoder
            .push(b"event: put\ndata: {\"path\":\"/\",\"data\":null}\n\n")
            .unwrap();
        assert_eq!(
            events,
            vec![SseEvent {
                event: "put".to_string(),
                data: "{\"path\":\"/\",\"data\":null}".to_string(),
            }]
        );
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"event: pa").unwrap().is_empty());
        assert!(decoder.push(b"tch\r\ndata: {\"a\"").unwrap().is_empty());
        let events = decoder
            .push(b":1}\r\n\r\nevent: keep-alive\ndata: null\n\n")
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "patch");
        assert_eq!(events[0].data, "{\"a\":1}");
        assert_eq!(events[1].event, "keep-alive");
    }

    #[test]
    fn test_comments_and_multiline_data() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(b": ping\n\ndata: one\ndata: two\n\n").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "one\ntwo");
    }

    #[test]
    fn test_unterminated_line_is_capped() {
        let mut decoder = SseDecoder::with_max_line(16);
        assert!(decoder.push(b"data: 0123456").unwrap().is_empty());
        let err = decoder.push(b"789abcdef").unwrap_err();
        assert!(matches!(err, SyncError::Connectivity(_)));

        // Reset after overflow, so a fresh event decodes
        let events = decoder.push(b"data: ok\n\n").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "ok");
    }

    #[test]
    fn test_long_terminated_line_is_rejected() {
        let mut decoder = SseDecoder::with_max_line(8);
        assert!(decoder.push(b"data: far too long\n\n").is_err());
    }
}
