// Server-sent event decoding for chat-completion streams

use bytes::{Buf, BytesMut};
use std::ops::ControlFlow;

use crate::error::BenchError;
use crate::models::openai::ChatCompletionChunk;

/// Marker the gateway sends as the final `data:` payload
pub const DONE_MARKER: &str = "[DONE]";

/// Incremental SSE decoder.
///
/// Bytes are buffered until a full line is available, so multi-byte UTF-8
/// sequences and lines split across network chunks decode correctly.
/// Returns the `data` payload of every completed event:
/// - `data: ...` lines accumulate, multiple lines joined with `\n`
/// - a blank line dispatches the accumulated event
/// - `: ...` comment lines (keep-alives) and other fields are ignored
#[derive(Debug, Default, Clone)]
pub struct SseDecoder {
    buffer: BytesMut,
    data: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes into the decoder and extract complete event payloads.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line = self.buffer.split_to(newline);
            self.buffer.advance(1);

            let line = String::from_utf8_lossy(&line);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(payload) = self.process_line(line) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Flush a trailing event that was not terminated by a blank line.
    pub fn finish(&mut self) -> Vec<String> {
        let mut payloads = Vec::new();
        if !self.buffer.is_empty() {
            let rest = self.buffer.split();
            let line = String::from_utf8_lossy(&rest);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(payload) = self.process_line(line) {
                payloads.push(payload);
            }
        }
        if let Some(payload) = self.data.take() {
            payloads.push(payload);
        }
        payloads
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.data.take();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        if field == "data" {
            match self.data.as_mut() {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            }
        }
        None
    }
}

/// One incremental piece of generated text
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamDelta {
    pub content: Option<String>,
    pub reasoning: Option<String>,
}

impl StreamDelta {
    /// Whether this delta carries any content or reasoning text
    pub fn has_text(&self) -> bool {
        self.content.as_deref().is_some_and(|s| !s.is_empty())
            || self.reasoning.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// Interpret one SSE payload.
///
/// Returns `Break` on the termination marker, `Continue(Some(delta))` for a
/// frame carrying text, `Continue(None)` for frames without text (role
/// announcements, usage, finish reasons).
pub fn parse_payload(payload: &str) -> Result<ControlFlow<(), Option<StreamDelta>>, BenchError> {
    let payload = payload.trim();
    if payload == DONE_MARKER {
        return Ok(ControlFlow::Break(()));
    }
    if payload.is_empty() {
        return Ok(ControlFlow::Continue(None));
    }

    let chunk: ChatCompletionChunk = serde_json::from_str(payload).map_err(|e| {
        let preview: String = payload.chars().take(100).collect();
        BenchError::MalformedFrame(format!("{} - {}", e, preview))
    })?;

    if let Some(error) = chunk.error {
        let message = error
            .message
            .unwrap_or_else(|| "unknown provider error".to_string());
        let message = match error.code {
            Some(code) => format!("{} (code: {})", message, code),
            None => message,
        };
        return Err(BenchError::StreamAborted(message));
    }

    let delta = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .map(|delta| StreamDelta {
            content: delta.content,
            reasoning: delta.reasoning_content.or(delta.reasoning),
        })
        .filter(StreamDelta::has_text);

    Ok(ControlFlow::Continue(delta))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_decoder_basic() {
        let mut decoder = SseDecoder::new();

        let payloads = decoder.feed(b"data: {\"a\":1}\n\ndata: {\"b\":2}\n\n");

        assert_eq!(payloads, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[test]
    fn test_sse_decoder_split_across_chunks() {
        let mut decoder = SseDecoder::new();

        assert!(decoder.feed(b"da").is_empty());
        assert!(decoder.feed(b"ta: {\"content\"").is_empty());
        assert!(decoder.feed(b": \"x\"}\n").is_empty());
        let payloads = decoder.feed(b"\n");

        assert_eq!(payloads, vec!["{\"content\": \"x\"}"]);
    }

    #[test]
    fn test_sse_decoder_utf8_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        let bytes = "data: héllo\n\n".as_bytes();
        // 'é' is two bytes; split in the middle of it
        let split = "data: h".len() + 1;

        assert!(decoder.feed(&bytes[..split]).is_empty());
        let payloads = decoder.feed(&bytes[split..]);

        assert_eq!(payloads, vec!["héllo"]);
    }

    #[test]
    fn test_sse_decoder_crlf_and_comments() {
        let mut decoder = SseDecoder::new();

        let payloads = decoder.feed(b": OPENROUTER PROCESSING\r\n\r\nevent: message\r\ndata: one\r\n\r\n");

        assert_eq!(payloads, vec!["one"]);
    }

    #[test]
    fn test_sse_decoder_multiline_data() {
        let mut decoder = SseDecoder::new();

        let payloads = decoder.feed(b"data: first\ndata: second\n\n");

        assert_eq!(payloads, vec!["first\nsecond"]);
    }

    #[test]
    fn test_sse_decoder_finish_flushes_trailing_event() {
        let mut decoder = SseDecoder::new();

        assert!(decoder.feed(b"data: [DONE]").is_empty());
        assert_eq!(decoder.finish(), vec!["[DONE]"]);
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn test_parse_payload_done_marker() {
        assert_eq!(parse_payload("[DONE]").unwrap(), ControlFlow::Break(()));
        assert_eq!(parse_payload(" [DONE] ").unwrap(), ControlFlow::Break(()));
    }

    #[test]
    fn test_parse_payload_content_delta() {
        let flow = parse_payload(r#"{"choices":[{"delta":{"content":"Hi"}}]}"#).unwrap();

        assert_eq!(
            flow,
            ControlFlow::Continue(Some(StreamDelta {
                content: Some("Hi".to_string()),
                reasoning: None,
            }))
        );
    }

    #[test]
    fn test_parse_payload_reasoning_fallback() {
        let flow = parse_payload(r#"{"choices":[{"delta":{"reasoning":"hmm"}}]}"#).unwrap();
        let ControlFlow::Continue(Some(delta)) = flow else {
            panic!("expected a delta");
        };
        assert_eq!(delta.reasoning.as_deref(), Some("hmm"));

        let flow = parse_payload(
            r#"{"choices":[{"delta":{"reasoning_content":"a","reasoning":"b"}}]}"#,
        )
        .unwrap();
        let ControlFlow::Continue(Some(delta)) = flow else {
            panic!("expected a delta");
        };
        assert_eq!(delta.reasoning.as_deref(), Some("a"));
    }

    #[test]
    fn test_parse_payload_without_text() {
        for payload in [
            r#"{"choices":[{"delta":{"role":"assistant","content":""}}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
            r#"{"choices":[]}"#,
            r#"{"usage":{"total_tokens":9}}"#,
            r#"{}"#,
        ] {
            assert_eq!(
                parse_payload(payload).unwrap(),
                ControlFlow::Continue(None),
                "payload: {}",
                payload
            );
        }
    }

    #[test]
    fn test_parse_payload_final_frame_with_null_usage() {
        let payload = r#"{"choices":[{"delta":{"content":""},"finish_reason":"stop"}],"usage":{"prompt_tokens":3,"completion_tokens":null,"total_tokens":7}}"#;
        assert_eq!(parse_payload(payload).unwrap(), ControlFlow::Continue(None));

        let payload = r#"{"choices":[{"delta":{"content":"!"}}],"usage":null}"#;
        let ControlFlow::Continue(Some(delta)) = parse_payload(payload).unwrap() else {
            panic!("expected a delta");
        };
        assert_eq!(delta.content.as_deref(), Some("!"));
    }

    #[test]
    fn test_parse_payload_malformed() {
        let err = parse_payload("{not json").unwrap_err();
        assert!(matches!(err, BenchError::MalformedFrame(_)));
    }

    #[test]
    fn test_parse_payload_error_frame() {
        let err = parse_payload(r#"{"error":{"code":429,"message":"Rate limited"}}"#).unwrap_err();
        assert!(matches!(err, BenchError::StreamAborted(_)));
        assert!(err.to_string().contains("Rate limited"));
        assert!(err.to_string().contains("429"));
    }
}
