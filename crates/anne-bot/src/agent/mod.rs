//! Conversational agent.
//!
//! A [`LanguageModel`] turns a prompt into text (whole or streamed). The
//! [`PersonaAgent`] puts a persona and agent memory in front of a model.

mod gemini;
mod persona;
pub mod prompts;
mod scripted;

pub use gemini::{DEFAULT_BASE_URL, GeminiConfig, GeminiModel};
pub use persona::{AgentReply, AgentStream, DEFAULT_HISTORY_WINDOW, PersonaAgent};
pub use scripted::ScriptedModel;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::codec::{self, ImageData, MessageContent};
use crate::memory::{MemoryError, Message, MessageRole};

/// Errors raised while talking to a language model.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("model API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("model returned no text")]
    EmptyResponse,

    #[error("stream error: {0}")]
    Stream(String),

    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("invalid agent configuration: {0}")]
    Config(String),
}

pub type AgentResult<T> = std::result::Result<T, AgentError>;

/// Incremental text chunks of a model response.
pub type TextStream = BoxStream<'static, AgentResult<String>>;

/// One part of a model message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    Image(ImageData),
}

/// A message as sent to a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelMessage {
    pub role: MessageRole,
    pub parts: Vec<ContentPart>,
}

impl ModelMessage {
    pub fn text(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![ContentPart::Text(text.into())],
        }
    }

    /// User message with an image followed by a text prompt.
    pub fn image(image: ImageData, prompt: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            parts: vec![ContentPart::Image(image), ContentPart::Text(prompt.into())],
        }
    }

    /// Convert a chat message, lifting an embedded image into its own part.
    pub fn from_message(message: &Message) -> Self {
        match codec::decode(&message.content) {
            MessageContent::TextOnly(text) => Self::text(message.role, text),
            MessageContent::TextWithImage { text, image } => Self {
                role: message.role,
                parts: vec![ContentPart::Image(image), ContentPart::Text(text)],
            },
        }
    }

    /// Concatenated text parts.
    pub fn plain_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text(text) => Some(text.as_str()),
                ContentPart::Image(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A single model invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerateRequest {
    pub system: Option<String>,
    pub messages: Vec<ModelMessage>,
}

impl GenerateRequest {
    pub fn new(system: impl Into<String>, messages: Vec<ModelMessage>) -> Self {
        Self {
            system: Some(system.into()),
            messages,
        }
    }
}

/// A text generation backend.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model identifier, for logs.
    fn name(&self) -> &str;

    /// Generate a complete response.
    async fn generate(&self, request: GenerateRequest) -> AgentResult<String>;

    /// Generate a response as a stream of text chunks.
    async fn stream(&self, request: GenerateRequest) -> AgentResult<TextStream>;
}
