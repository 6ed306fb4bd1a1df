//! State machine for translating Cohere stream events into OpenAI SSE chunks.
//!
//! The backend streams newline-delimited JSON events. [`LineSplitter`] turns
//! raw body reads into complete lines, [`parse_event_line`] decodes one line,
//! and [`StreamTranscoder`] maps each event onto at most one
//! `chat.completion.chunk`. [`encode_frame`] produces the `data: ...` SSE frame.

use bytes::Bytes;

use crate::error::{ProxyError, Result};

use super::cohere_types::BackendStreamEvent;
use super::openai_types::{ChatCompletionChunk, ChunkChoice, ChunkDelta, COMPLETION_ID};

/// Terminal sentinel written after the stop chunk.
pub const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

/// Translates backend stream events into OpenAI chunks, one event at a time.
///
/// Usage:
///   let mut transcoder = StreamTranscoder::new("command-r");
///   for event in events {
///       if let Some(chunk) = transcoder.process_event(&event) {
///           // write encode_frame(&chunk)
///       }
///   }
///   if let Some(chunk) = transcoder.finish() { /* write it */ }
///   // write DONE_FRAME
#[derive(Debug)]
pub struct StreamTranscoder {
    model: String,
    created: i64,
    finished: bool,
}

impl StreamTranscoder {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            created: chrono::Utc::now().timestamp(),
            finished: false,
        }
    }

    /// Map one backend event onto zero or one outbound chunk.
    pub fn process_event(&mut self, event: &BackendStreamEvent) -> Option<ChatCompletionChunk> {
        if self.finished {
            return None;
        }

        match event {
            BackendStreamEvent::TextGeneration { text } => Some(self.make_chunk(
                ChunkDelta {
                    content: Some(text.clone()),
                },
                None,
            )),
            BackendStreamEvent::StreamEnd { .. } => self.finish(),
            BackendStreamEvent::StreamStart { .. } | BackendStreamEvent::Other => None,
        }
    }

    /// The stop chunk, unless it was already produced.
    pub fn finish(&mut self) -> Option<ChatCompletionChunk> {
        if self.finished {
            return None;
        }
        self.finished = true;
        Some(self.make_chunk(ChunkDelta::default(), Some("stop".to_string())))
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn make_chunk(&self, delta: ChunkDelta, finish_reason: Option<String>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: COMPLETION_ID.to_string(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
        }
    }
}

/// Splits a byte stream into `\n`-terminated lines.
///
/// Lines are returned as raw bytes; decoding happens in [`parse_event_line`]
/// once the whole line is present, so a multi-byte character split across two
/// reads is decoded intact.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already known to contain no newline.
    scanned: usize,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a read and return every line it completed, without the `\n`.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.buffer[from..].iter().position(|b| *b == b'\n') {
            let end = from + offset;
            lines.push(self.buffer[start..end].to_vec());
            start = end + 1;
            from = start;
        }

        self.buffer.drain(..start);
        self.scanned = self.buffer.len();
        lines
    }

    /// Whatever is left once the stream has ended.
    pub fn remainder(&mut self) -> Option<Vec<u8>> {
        self.scanned = 0;
        let rest = std::mem::take(&mut self.buffer);
        (!rest.iter().all(u8::is_ascii_whitespace)).then_some(rest)
    }
}

/// Decode one backend line. Returns `None` for blank lines.
///
/// Invalid UTF-8 and invalid JSON are both reported as [`ProxyError::Decode`].
pub fn parse_event_line(line: &[u8]) -> Option<Result<BackendStreamEvent>> {
    let line = match std::str::from_utf8(line) {
        Ok(s) => s.trim(),
        Err(e) => {
            return Some(Err(ProxyError::decode(format!(
                "invalid UTF-8 in stream line: {e}"
            ))))
        }
    };

    let payload = line
        .strip_prefix("data:")
        .map(str::trim)
        .unwrap_or(line);

    if payload.is_empty() {
        return None;
    }
    Some(serde_json::from_str(payload).map_err(|e| ProxyError::decode(e.to_string())))
}

/// Frame a chunk as `data: <json>\n\n`.
pub fn encode_frame(chunk: &ChatCompletionChunk) -> serde_json::Result<Bytes> {
    let json = serde_json::to_string(chunk)?;
    Ok(Bytes::from(format!("data: {json}\n\n")))
}
