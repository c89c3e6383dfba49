//! Accumulates token usage from a streamed or complete response body
//! without ever blocking the branch that forwards bytes to the client.

use std::time::Instant;

use serde::Deserialize;

use crate::pricing::cost_usd;
use crate::sse::{SseEvent, SseParser};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageSnapshot {
    pub model: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_input_tokens: u64,
    pub cache_creation_input_tokens: u64,
}

impl UsageSnapshot {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_read_input_tokens + self.cache_creation_input_tokens
    }

    pub fn cost_usd(&self) -> f64 {
        match &self.model {
            Some(model) => cost_usd(
                model,
                self.input_tokens,
                self.output_tokens,
                self.cache_read_input_tokens,
                self.cache_creation_input_tokens,
            ),
            None => 0.0,
        }
    }
}

#[derive(Deserialize, Default)]
struct UsageFields {
    #[serde(default)]
    input_tokens: Option<u64>,
    #[serde(default)]
    output_tokens: Option<u64>,
    #[serde(default)]
    cache_read_input_tokens: Option<u64>,
    #[serde(default)]
    cache_creation_input_tokens: Option<u64>,
}

#[derive(Deserialize, Default)]
struct MessageEventPayload {
    #[serde(default)]
    message: Option<MessageFields>,
    #[serde(default)]
    usage: Option<UsageFields>,
}

#[derive(Deserialize, Default)]
struct MessageFields {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<UsageFields>,
}

#[derive(Deserialize, Default)]
struct JsonResponseBody {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<UsageFields>,
}

/// Incrementally accumulates usage across `message_start` /
/// `message_delta` / `message_stop` SSE events, or parses a single JSON
/// object once the body completes.
pub struct UsageInterceptor {
    parser: SseParser,
    snapshot: UsageSnapshot,
    first_content_byte: Option<Instant>,
    is_sse: Option<bool>,
    json_buffer: Vec<u8>,
}

impl UsageInterceptor {
    pub fn new() -> Self {
        Self {
            parser: SseParser::new(),
            snapshot: UsageSnapshot::default(),
            first_content_byte: None,
            is_sse: None,
            json_buffer: Vec::new(),
        }
    }

    /// Feed a raw chunk from the upstream body. `content_type` is passed
    /// on the first call to decide SSE vs single-JSON parsing.
    pub fn feed(&mut self, chunk: &bytes::Bytes, content_type: &str) {
        if self.first_content_byte.is_none() && !chunk.is_empty() {
            self.first_content_byte = Some(Instant::now());
        }
        let is_sse = *self
            .is_sse
            .get_or_insert_with(|| content_type.contains("text/event-stream"));

        if is_sse {
            let events = self.parser.feed(chunk);
            for event in events {
                self.apply_sse_event(&event);
            }
        } else {
            // A single JSON object cannot be parsed incrementally without
            // risking a partial-document error, so non-SSE bodies are
            // accumulated here and parsed whole in `finish`.
            self.json_buffer.extend_from_slice(chunk);
        }
    }

    fn apply_sse_event(&mut self, event: &SseEvent) {
        let event_type = event.event.as_deref().unwrap_or("");
        match event_type {
            "message_start" => {
                if let Ok(payload) = serde_json::from_str::<MessageEventPayload>(&event.data) {
                    if let Some(message) = payload.message {
                        if let Some(model) = message.model {
                            self.snapshot.model = Some(model);
                        }
                        if let Some(usage) = message.usage {
                            self.apply_usage_fields(&usage);
                        }
                    }
                }
            }
            "message_delta" | "message_stop" => {
                if let Ok(payload) = serde_json::from_str::<MessageEventPayload>(&event.data) {
                    if let Some(usage) = payload.usage {
                        self.apply_usage_fields(&usage);
                    }
                }
            }
            _ => {}
        }
    }

    fn apply_usage_fields(&mut self, usage: &UsageFields) {
        if let Some(v) = usage.input_tokens {
            self.snapshot.input_tokens = v;
        }
        if let Some(v) = usage.output_tokens {
            self.snapshot.output_tokens = v;
        }
        if let Some(v) = usage.cache_read_input_tokens {
            self.snapshot.cache_read_input_tokens = v;
        }
        if let Some(v) = usage.cache_creation_input_tokens {
            self.snapshot.cache_creation_input_tokens = v;
        }
    }

    /// Parse a fully-buffered non-streaming JSON response body.
    pub fn finish_json(&mut self, body: &[u8]) {
        if let Ok(parsed) = serde_json::from_slice::<JsonResponseBody>(body) {
            if let Some(model) = parsed.model {
                self.snapshot.model = Some(model);
            }
            if let Some(usage) = parsed.usage {
                self.apply_usage_fields(&usage);
            }
        }
    }

    /// Finalize the snapshot along with `output_tokens_per_second`,
    /// computed from the first content byte to `now`. Recorded only
    /// when the divisor is strictly positive.
    pub fn finish(mut self) -> (UsageSnapshot, Option<f64>) {
        if self.is_sse != Some(true) && !self.json_buffer.is_empty() {
            let buffer = std::mem::take(&mut self.json_buffer);
            self.finish_json(&buffer);
        }
        let tokens_per_second = self.first_content_byte.and_then(|start| {
            let elapsed = start.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                Some(self.snapshot.output_tokens as f64 / elapsed)
            } else {
                None
            }
        });
        (self.snapshot, tokens_per_second)
    }
}

impl Default for UsageInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn accumulates_across_message_start_and_delta() {
        let mut interceptor = UsageInterceptor::new();
        interceptor.feed(
            &Bytes::from_static(
                b"event: message_start\ndata: {\"message\":{\"model\":\"claude-3-5-sonnet-20241022\",\"usage\":{\"input_tokens\":10,\"output_tokens\":0}}}\n\n",
            ),
            "text/event-stream",
        );
        interceptor.feed(
            &Bytes::from_static(b"event: message_delta\ndata: {\"usage\":{\"output_tokens\":20}}\n\n"),
            "text/event-stream",
        );
        let (snapshot, _) = interceptor.finish();
        assert_eq!(snapshot.input_tokens, 10);
        assert_eq!(snapshot.output_tokens, 20);
        assert_eq!(snapshot.total_tokens(), 30);
        assert_eq!(snapshot.model.as_deref(), Some("claude-3-5-sonnet-20241022"));
    }

    #[test]
    fn json_response_is_parsed_whole() {
        let mut interceptor = UsageInterceptor::new();
        interceptor.finish_json(
            br#"{"model":"claude-3-opus-20240229","usage":{"input_tokens":5,"output_tokens":7}}"#,
        );
        let (snapshot, _) = interceptor.finish();
        assert_eq!(snapshot.input_tokens, 5);
        assert_eq!(snapshot.output_tokens, 7);
    }

    #[test]
    fn json_response_fed_in_chunks_is_parsed_on_finish() {
        let mut interceptor = UsageInterceptor::new();
        let body = br#"{"model":"claude-3-opus-20240229","usage":{"input_tokens":5,"output_tokens":7}}"#;
        interceptor.feed(&Bytes::copy_from_slice(&body[..20]), "application/json");
        interceptor.feed(&Bytes::copy_from_slice(&body[20..]), "application/json");
        let (snapshot, _) = interceptor.finish();
        assert_eq!(snapshot.input_tokens, 5);
        assert_eq!(snapshot.output_tokens, 7);
        assert_eq!(snapshot.model.as_deref(), Some("claude-3-opus-20240229"));
    }

    #[test]
    fn tokens_per_second_absent_without_content() {
        let interceptor = UsageInterceptor::new();
        let (_, tps) = interceptor.finish();
        assert_eq!(tps, None);
    }

    #[test]
    fn malformed_event_data_does_not_panic() {
        let mut interceptor = UsageInterceptor::new();
        interceptor.feed(
            &Bytes::from_static(b"event: message_start\ndata: not json\n\n"),
            "text/event-stream",
        );
        let (snapshot, _) = interceptor.finish();
        assert_eq!(snapshot.input_tokens, 0);
    }
}
