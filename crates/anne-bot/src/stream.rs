//! Data stream framing for chat responses.
//!
//! Replies are sent as `text/plain` with one frame per line:
//!
//! ```text
//! f:{"messageId":"msg-..."}
//! 0:"にゃー"
//! 0:"ん"
//! d:{"finishReason":"stop"}
//! ```
//!
//! `0:` frames carry JSON-encoded text deltas, `3:` an error message.

use serde::{Deserialize, Serialize};

pub const CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Header marking a data stream response.
pub const STREAM_HEADER: &str = "x-vercel-ai-data-stream";

/// One line of the data stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Start { message_id: String },
    Text(String),
    Finish { finish_reason: String },
    Error(String),
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartPayload {
    message_id: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinishPayload {
    finish_reason: String,
}

impl Frame {
    pub fn text(delta: impl Into<String>) -> Self {
        Frame::Text(delta.into())
    }

    pub fn stop() -> Self {
        Frame::Finish {
            finish_reason: "stop".to_string(),
        }
    }

    /// Encode as a newline-terminated line.
    pub fn encode(&self) -> String {
        // Serializing strings and these payloads cannot fail.
        let (prefix, payload) = match self {
            Frame::Start { message_id } => (
                'f',
                serde_json::to_string(&StartPayload {
                    message_id: message_id.clone(),
                }),
            ),
            Frame::Text(text) => ('0', serde_json::to_string(text)),
            Frame::Finish { finish_reason } => (
                'd',
                serde_json::to_string(&FinishPayload {
                    finish_reason: finish_reason.clone(),
                }),
            ),
            Frame::Error(message) => ('3', serde_json::to_string(message)),
        };
        format!("{}:{}\n", prefix, payload.unwrap_or_default())
    }

    /// Parse a single line (without its newline). Unknown frame types yield
    /// `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let (prefix, payload) = line.trim_end_matches('\r').split_once(':')?;
        match prefix {
            "f" => serde_json::from_str::<StartPayload>(payload)
                .ok()
                .map(|p| Frame::Start {
                    message_id: p.message_id,
                }),
            "0" => serde_json::from_str::<String>(payload).ok().map(Frame::Text),
            "d" => serde_json::from_str::<FinishPayload>(payload)
                .ok()
                .map(|p| Frame::Finish {
                    finish_reason: p.finish_reason,
                }),
            "3" => serde_json::from_str::<String>(payload).ok().map(Frame::Error),
            _ => None,
        }
    }
}

/// Encode a complete reply (start, one text frame, finish).
pub fn encode_reply(message_id: &str, text: &str) -> String {
    let mut body = Frame::Start {
        message_id: message_id.to_string(),
    }
    .encode();
    body.push_str(&Frame::text(text).encode());
    body.push_str(&Frame::stop().encode());
    body
}

/// Incremental decoder for a chunked data stream.
///
/// Bytes are buffered until a full line is available, so multi-byte
/// characters split across chunks decode correctly.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning every frame completed by them.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            if let Some(frame) = Frame::parse(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush a trailing line without a newline.
    pub fn finish(&mut self) -> Option<Frame> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        Frame::parse(&line)
    }
}

/// Concatenate the text frames of a full response body.
pub fn collect_text(body: &str) -> String {
    body.lines()
        .filter_map(Frame::parse)
        .filter_map(|frame| match frame {
            Frame::Text(text) => Some(text),
            _ => None,
        })
        .collect()
}
