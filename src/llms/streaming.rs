//! Streaming chat-completion support.
//!
//! # Design
//!
//! - Chunk-based: a stream yields [`StreamChunk`] values, text deltas followed
//!   by a final `Done` carrying the assembled text.
//! - Transport-agnostic: consumers read through [`StreamReceiver`]; providers
//!   push into a [`ChannelStreamReceiver`] from a background task, and
//!   non-streaming fallbacks replay a finished reply via [`VecStreamReceiver`].
//! - [`SseDecoder`] turns raw `text/event-stream` bytes into `data:` payloads,
//!   reassembling lines that were split across network reads.

use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::providers::utils::content_to_string;
use crate::utilities::chunking::chunk_chars;

// ---------------------------------------------------------------------------
// StreamChunk
// ---------------------------------------------------------------------------

/// A single chunk from a streaming response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    /// A text delta (partial text content).
    TextDelta { text: String },

    /// The stream is done. Contains the final assembled text.
    Done {
        content: String,
        usage: Option<StreamUsage>,
    },

    /// An error occurred mid-stream.
    Error { message: String },
}

/// Token usage reported at the end of a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

impl StreamUsage {
    fn from_value(v: &Value) -> Option<Self> {
        let obj = v.as_object()?;
        let get = |k: &str| obj.get(k).and_then(|x| x.as_i64()).unwrap_or(0);
        Some(Self {
            prompt_tokens: get("prompt_tokens"),
            completion_tokens: get("completion_tokens"),
            total_tokens: get("total_tokens"),
        })
    }
}

// ---------------------------------------------------------------------------
// Receivers
// ---------------------------------------------------------------------------

/// Receiver for streaming chunks.
#[async_trait]
pub trait StreamReceiver: Send + Sync {
    /// Get the next chunk. `None` once the stream is exhausted.
    async fn next(&mut self) -> Option<StreamChunk>;
}

/// A `StreamReceiver` backed by a tokio mpsc channel.
pub struct ChannelStreamReceiver {
    rx: tokio::sync::mpsc::Receiver<StreamChunk>,
}

impl ChannelStreamReceiver {
    pub fn new(rx: tokio::sync::mpsc::Receiver<StreamChunk>) -> Self {
        Self { rx }
    }

    /// Create a matched pair of sender + receiver.
    pub fn pair(buffer: usize) -> (tokio::sync::mpsc::Sender<StreamChunk>, Self) {
        let (tx, rx) = tokio::sync::mpsc::channel(buffer);
        (tx, Self { rx })
    }
}

#[async_trait]
impl StreamReceiver for ChannelStreamReceiver {
    async fn next(&mut self) -> Option<StreamChunk> {
        self.rx.recv().await
    }
}

/// A `StreamReceiver` over chunks that are already known.
pub struct VecStreamReceiver {
    chunks: VecDeque<StreamChunk>,
}

impl VecStreamReceiver {
    pub fn new(chunks: impl IntoIterator<Item = StreamChunk>) -> Self {
        Self {
            chunks: chunks.into_iter().collect(),
        }
    }

    /// Replay `text` as `chunk_size`-char deltas followed by `Done`.
    pub fn from_text(text: &str, chunk_size: usize) -> Self {
        let mut chunks: VecDeque<StreamChunk> = chunk_chars(text, chunk_size)
            .into_iter()
            .map(|text| StreamChunk::TextDelta { text })
            .collect();
        chunks.push_back(StreamChunk::Done {
            content: text.to_string(),
            usage: None,
        });
        Self { chunks }
    }
}

#[async_trait]
impl StreamReceiver for VecStreamReceiver {
    async fn next(&mut self) -> Option<StreamChunk> {
        // Let other tasks run between replayed chunks.
        tokio::task::yield_now().await;
        self.chunks.pop_front()
    }
}

// ---------------------------------------------------------------------------
// StreamAccumulator
// ---------------------------------------------------------------------------

/// Accumulates streaming chunks into a complete response.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    text: String,
    usage: Option<StreamUsage>,
    error: Option<String>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a chunk, returning `true` if the stream is done.
    pub fn push(&mut self, chunk: &StreamChunk) -> bool {
        match chunk {
            StreamChunk::TextDelta { text } => {
                self.text.push_str(text);
                false
            }
            StreamChunk::Done { content, usage } => {
                if !content.is_empty() {
                    self.text = content.clone();
                }
                self.usage = usage.clone();
                true
            }
            StreamChunk::Error { message } => {
                self.error = Some(message.clone());
                true
            }
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn usage(&self) -> Option<&StreamUsage> {
        self.usage.as_ref()
    }

    /// Error reported by the stream, if it ended with one.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

// ---------------------------------------------------------------------------
// SSE decoding
// ---------------------------------------------------------------------------

/// One decoded `data:` payload.
#[derive(Debug, Clone, PartialEq)]
pub enum SsePayload {
    /// A text fragment to append.
    Text(String),
    /// Usage statistics, usually in the final event.
    Usage(StreamUsage),
    /// `[DONE]` sentinel.
    Done,
}

/// Incremental decoder for `text/event-stream` bodies.
///
/// Bytes are buffered until a full line is available, so multi-byte UTF-8
/// characters split across reads decode correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every payload completed by them.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SsePayload> {
        self.buffer.extend_from_slice(bytes);

        let mut out = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line = self.buffer.split_to(pos + 1);
            out.extend(decode_line(&String::from_utf8_lossy(&line)));
        }
        out
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Vec<SsePayload> {
        let rest = self.buffer.split();
        decode_line(&String::from_utf8_lossy(&rest))
    }
}

fn decode_line(line: &str) -> Vec<SsePayload> {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return Vec::new();
    };
    parse_stream_payload(data.trim())
}

/// Interpret the body of one `data:` line.
///
/// JSON payloads contribute their text delta (and usage when present); a JSON
/// event without text contributes nothing. Anything that is not JSON is
/// treated as plain text.
pub fn parse_stream_payload(payload: &str) -> Vec<SsePayload> {
    if payload.is_empty() {
        return Vec::new();
    }
    if payload.eq_ignore_ascii_case("[DONE]") {
        return vec![SsePayload::Done];
    }

    let json: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(_) => return vec![SsePayload::Text(payload.to_string())],
    };

    let mut out = Vec::new();
    if let Some(text) = delta_text(&json).filter(|t| !t.is_empty()) {
        out.push(SsePayload::Text(text));
    }
    if let Some(usage) = json.get("usage").and_then(StreamUsage::from_value) {
        out.push(SsePayload::Usage(usage));
    }
    out
}

fn delta_text(json: &Value) -> Option<String> {
    // OpenAI-compatible: choices[0].delta.content
    if let Some(choice) = json.get("choices").and_then(|c| c.get(0)) {
        if let Some(content) = choice.get("delta").and_then(|d| d.get("content")) {
            return content_to_string(content);
        }
        if let Some(text) = choice.get("text").and_then(|t| t.as_str()) {
            return Some(text.to_string());
        }
        return None;
    }

    for key in ["delta", "text", "content", "message", "chunk"] {
        if let Some(v) = json.get(key) {
            if let Some(text) = content_to_string(v).filter(|t| !t.is_empty()) {
                return Some(text);
            }
        }
    }

    let first = json.get("outputs").and_then(|o| o.get(0))?;
    ["content", "text"]
        .iter()
        .find_map(|k| first.get(*k).and_then(|v| v.as_str()).map(String::from))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_chunk_serde() {
        let delta = StreamChunk::TextDelta { text: "hello ".into() };
        let json = serde_json::to_string(&delta).unwrap();
        assert!(json.contains("\"type\":\"text_delta\""));
        let back: StreamChunk = serde_json::from_str(&json).unwrap();
        assert_eq!(back, delta);
    }

    #[test]
    fn test_accumulator() {
        let mut acc = StreamAccumulator::new();

        assert!(!acc.push(&StreamChunk::TextDelta { text: "Hello ".into() }));
        assert!(!acc.push(&StreamChunk::TextDelta { text: "world!".into() }));
        assert_eq!(acc.text(), "Hello world!");

        let done = acc.push(&StreamChunk::Done {
            content: String::new(),
            usage: Some(StreamUsage { prompt_tokens: 5, completion_tokens: 3, total_tokens: 8 }),
        });
        assert!(done);
        assert_eq!(acc.text(), "Hello world!");
        assert_eq!(acc.usage().unwrap().total_tokens, 8);
    }

    #[test]
    fn test_accumulator_error() {
        let mut acc = StreamAccumulator::new();
        assert!(acc.push(&StreamChunk::Error { message: "timeout".into() }));
        assert_eq!(acc.error(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_channel_stream_receiver() {
        let (tx, mut rx) = ChannelStreamReceiver::pair(16);

        tx.send(StreamChunk::TextDelta { text: "hi".into() }).await.unwrap();
        tx.send(StreamChunk::Done { content: "hi".into(), usage: None }).await.unwrap();
        drop(tx);

        assert!(matches!(rx.next().await, Some(StreamChunk::TextDelta { .. })));
        assert!(matches!(rx.next().await, Some(StreamChunk::Done { .. })));
        assert!(rx.next().await.is_none());
    }

    #[tokio::test]
    async fn test_vec_receiver_is_char_safe() {
        let text = "salom 👋 dunyo";
        let mut rx = VecStreamReceiver::from_text(text, 4);
        let mut acc = StreamAccumulator::new();
        while let Some(chunk) = rx.next().await {
            if acc.push(&chunk) {
                break;
            }
        }
        assert_eq!(acc.text(), text);
    }

    #[test]
    fn test_sse_decoder_reassembles_split_lines() {
        let mut dec = SseDecoder::new();
        let first = dec.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"Sal");
        assert!(first.is_empty());

        let second = dec.feed(b"om\"}}]}\n\ndata: [DONE]\n");
        assert_eq!(
            second,
            vec![SsePayload::Text("Salom".into()), SsePayload::Done]
        );
    }

    #[test]
    fn test_sse_ignores_comments_and_empty_deltas() {
        let mut dec = SseDecoder::new();
        let out = dec.feed(
            b": keep-alive\nevent: message\ndata: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n",
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_parse_payload_variants() {
        assert_eq!(
            parse_stream_payload(r#"{"text":"abc"}"#),
            vec![SsePayload::Text("abc".into())]
        );
        assert_eq!(
            parse_stream_payload(r#"{"outputs":[{"content":"xyz"}]}"#),
            vec![SsePayload::Text("xyz".into())]
        );
        assert_eq!(
            parse_stream_payload("plain words"),
            vec![SsePayload::Text("plain words".into())]
        );
        assert_eq!(parse_stream_payload("[done]"), vec![SsePayload::Done]);

        let with_usage = parse_stream_payload(
            r#"{"choices":[{"delta":{"content":""},"finish_reason":"stop"}],"usage":{"prompt_tokens":3,"completion_tokens":4,"total_tokens":7}}"#,
        );
        assert_eq!(
            with_usage,
            vec![SsePayload::Usage(StreamUsage { prompt_tokens: 3, completion_tokens: 4, total_tokens: 7 })]
        );
    }

    #[test]
    fn test_sse_decoder_handles_split_utf8() {
        let line = "data: {\"text\":\"o‘zbek\"}\n".as_bytes();
        let split = line.iter().position(|b| *b >= 0x80).unwrap() + 1;
        let mut dec = SseDecoder::new();
        assert!(dec.feed(&line[..split]).is_empty());
        assert_eq!(dec.feed(&line[split..]), vec![SsePayload::Text("o‘zbek".into())]);
    }

    #[test]
    fn test_decoder_finish_flushes_tail() {
        let mut dec = SseDecoder::new();
        assert!(dec.feed(b"data: tail").is_empty());
        assert_eq!(dec.finish(), vec![SsePayload::Text("tail".into())]);
    }
}
