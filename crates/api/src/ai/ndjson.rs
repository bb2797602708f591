//! Newline-delimited JSON decoding for streamed completions
//!
//! The completion server answers with one JSON record per line, delivered in
//! arbitrary chunk boundaries. This module handles:
//! - Line buffering across chunks (a record may be split over many reads)
//! - `\r\n` tolerance and blank-line skipping
//! - Per-record decoding, where a bad record never poisons the stream
//! - Stripping model control tokens out of text fragments

use bytes::BytesMut;

use super::relay::RelayError;
use super::types::CompletionChunk;

/// Upper bound for a single buffered record; anything larger is discarded
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Model delimiter tokens that must never reach a client
pub const CONTROL_TOKENS: &[&str] = &[
    "<|im_start|>",
    "<|im_end|>",
    "<|eot_id|>",
    "<|start_header_id|>",
    "<|end_header_id|>",
    "<|begin_of_text|>",
    "<|end_of_text|>",
    "<|endoftext|>",
    "<|end|>",
    "<|assistant|>",
    "<|user|>",
    "<|system|>",
    "[INST]",
    "[/INST]",
    "<s>",
    "</s>",
];

/// Incremental line splitter over a chunked byte stream
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: BytesMut,
    overflowed: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            overflowed: false,
        }
    }

    /// Append a raw chunk from the network
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Pop the next complete, non-blank line
    ///
    /// Returns `Some(Err(MalformedChunk))` for lines that are not UTF-8 or that
    /// grew past [`MAX_LINE_BYTES`]; callers skip those and keep reading.
    pub fn next_line(&mut self) -> Option<Result<String, RelayError>> {
        loop {
            let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n') else {
                if self.buffer.len() > MAX_LINE_BYTES {
                    // Drop what we have; the tail up to the next newline is
                    // reported as malformed when it arrives.
                    self.buffer.clear();
                    self.overflowed = true;
                    return Some(Err(RelayError::MalformedChunk(format!(
                        "record exceeds {MAX_LINE_BYTES} bytes"
                    ))));
                }
                return None;
            };

            let mut line_bytes = self.buffer.split_to(newline_pos + 1);
            line_bytes.truncate(line_bytes.len() - 1);
            if line_bytes.last() == Some(&b'\r') {
                line_bytes.truncate(line_bytes.len() - 1);
            }

            if self.overflowed {
                self.overflowed = false;
                continue;
            }

            match std::str::from_utf8(&line_bytes) {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => return Some(Ok(line.trim().to_string())),
                Err(e) => {
                    return Some(Err(RelayError::MalformedChunk(format!(
                        "invalid UTF-8: {e}"
                    ))))
                }
            }
        }
    }

    /// Drain a trailing record that was not newline-terminated
    pub fn finish(&mut self) -> Option<Result<String, RelayError>> {
        if self.buffer.is_empty() || self.overflowed {
            self.buffer.clear();
            return None;
        }
        let rest = self.buffer.split();
        match std::str::from_utf8(&rest) {
            Ok(line) if line.trim().is_empty() => None,
            Ok(line) => Some(Ok(line.trim().to_string())),
            Err(e) => Some(Err(RelayError::MalformedChunk(format!("invalid UTF-8: {e}")))),
        }
    }
}

/// Decode one NDJSON record
pub fn parse_record(line: &str) -> Result<CompletionChunk, RelayError> {
    serde_json::from_str(line).map_err(|e| RelayError::MalformedChunk(e.to_string()))
}

/// Strip control tokens from a fragment
///
/// Returns `None` when nothing printable is left, so the caller can drop
/// the fragment silently.
pub fn filter_control_tokens(fragment: &str) -> Option<String> {
    let mut text = fragment.to_string();
    for token in CONTROL_TOKENS {
        if text.contains(token) {
            text = text.replace(token, "");
        }
    }
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Control-token stripping across fragment boundaries
///
/// A delimiter may arrive split over two records (`<|im_` then `end|>`).
/// The filter holds back a trailing piece that could still grow into a
/// control token and prepends it to the next fragment.
#[derive(Debug, Default)]
pub struct ControlTokenFilter {
    carry: String,
}

impl ControlTokenFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter the next fragment; `None` when nothing is ready to emit yet
    pub fn push(&mut self, fragment: &str) -> Option<String> {
        let mut text = std::mem::take(&mut self.carry);
        text.push_str(fragment);
        let mut text = filter_control_tokens(&text)?;

        if let Some(start) = partial_token_start(&text) {
            self.carry = text.split_off(start);
        }
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// Release whatever is still held back once the stream is done
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.carry);
        if rest.is_empty() {
            None
        } else {
            Some(rest)
        }
    }
}

/// Byte offset of the longest suffix that is a strict prefix of a control token
fn partial_token_start(text: &str) -> Option<usize> {
    text.char_indices()
        .map(|(i, _)| i)
        .find(|&i| {
            let tail = &text[i..];
            CONTROL_TOKENS
                .iter()
                .any(|token| token.len() > tail.len() && token.starts_with(tail))
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_split_across_chunks() {
        let mut buf = LineBuffer::new();
        buf.extend(br#"{"response":"H"#);
        assert!(buf.next_line().is_none());

        buf.extend(b"i\"}\r\n\n{\"done\":true}\n");
        assert_eq!(buf.next_line().unwrap().unwrap(), r#"{"response":"Hi"}"#);
        assert_eq!(buf.next_line().unwrap().unwrap(), r#"{"done":true}"#);
        assert!(buf.next_line().is_none());
        assert!(buf.finish().is_none());
    }

    #[test]
    fn test_trailing_record_without_newline() {
        let mut buf = LineBuffer::new();
        buf.extend(br#"{"done":true}"#);
        assert!(buf.next_line().is_none());
        assert_eq!(buf.finish().unwrap().unwrap(), r#"{"done":true}"#);
    }

    #[test]
    fn test_invalid_utf8_is_malformed_not_fatal() {
        let mut buf = LineBuffer::new();
        buf.extend(&[0xff, 0xfe, b'\n']);
        buf.extend(b"{\"response\":\"ok\"}\n");

        assert!(matches!(
            buf.next_line(),
            Some(Err(RelayError::MalformedChunk(_)))
        ));
        assert_eq!(buf.next_line().unwrap().unwrap(), r#"{"response":"ok"}"#);
    }

    #[test]
    fn test_oversized_record_is_discarded() {
        let mut buf = LineBuffer::new();
        buf.extend(&vec![b'x'; MAX_LINE_BYTES + 1]);
        assert!(matches!(
            buf.next_line(),
            Some(Err(RelayError::MalformedChunk(_)))
        ));

        // Tail of the oversized record is swallowed, the next record survives
        buf.extend(b"xxx\n{\"done\":true}\n");
        assert_eq!(buf.next_line().unwrap().unwrap(), r#"{"done":true}"#);
    }

    #[test]
    fn test_filter_control_tokens() {
        assert_eq!(
            filter_control_tokens("Hello<|im_end|>").as_deref(),
            Some("Hello")
        );
        assert_eq!(
            filter_control_tokens("[INST] hi [/INST]").as_deref(),
            Some(" hi ")
        );
        assert_eq!(filter_control_tokens("<|eot_id|>"), None);
        assert_eq!(filter_control_tokens("</s>"), None);
        assert_eq!(filter_control_tokens(" "), Some(" ".to_string()));
    }

    #[test]
    fn test_parse_record_rejects_garbage() {
        assert!(parse_record(r#"{"response":"a"}"#).is_ok());
        assert!(matches!(
            parse_record("{not json"),
            Err(RelayError::MalformedChunk(_))
        ));
    }

    #[test]
    fn test_split_control_token_is_stripped() {
        let mut filter = ControlTokenFilter::new();

        assert_eq!(filter.push("Done<|im_").as_deref(), Some("Done"));
        assert_eq!(filter.push("end|>"), None);
        assert_eq!(filter.push(" next").as_deref(), Some(" next"));
        assert_eq!(filter.flush(), None);
    }

    #[test]
    fn test_held_back_text_is_released() {
        let mut filter = ControlTokenFilter::new();

        assert_eq!(filter.push("a <").as_deref(), Some("a "));
        assert_eq!(filter.push("b").as_deref(), Some("<b"));

        assert_eq!(filter.push("x [IN").as_deref(), Some("x "));
        assert_eq!(filter.flush().as_deref(), Some("[IN"));
    }
}
