//! Incremental Server-Sent Events line parser. Feeds raw byte chunks as
//! they arrive off the wire and yields complete `(event, data)` pairs as
//! soon as a blank-line-terminated event is available, without ever
//! requiring the full body in memory.

use bytes::Bytes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

#[derive(Default)]
pub struct SseParser {
    buffer: String,
    pending_event: Option<String>,
    pending_data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning any complete events it produced.
    /// Invalid UTF-8 bytes are replaced rather than aborting the stream
    /// (a single interceptor hiccup must never break the client tee).
    pub fn feed(&mut self, chunk: &Bytes) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        let mut events = Vec::new();

        while let Some(newline_pos) = self.buffer.find('\n') {
            let line = self.buffer[..newline_pos].trim_end_matches('\r').to_string();
            self.buffer.drain(..=newline_pos);

            if line.is_empty() {
                if !self.pending_data.is_empty() || self.pending_event.is_some() {
                    events.push(SseEvent {
                        event: self.pending_event.take(),
                        data: self.pending_data.join("\n"),
                    });
                    self.pending_data.clear();
                }
                continue;
            }

            if let Some(rest) = line.strip_prefix("event:") {
                self.pending_event = Some(rest.trim_start().to_string());
            } else if let Some(rest) = line.strip_prefix("data:") {
                self.pending_data.push(rest.trim_start().to_string());
            }
            // Other SSE fields (id:, retry:) carry no usage information and are ignored.
        }

        events
    }
}
