//! Scripted language model.
//!
//! Answers from a queue of canned replies and records every request. Used as
//! the `offline` provider for local development and as a test double.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;

use super::{AgentError, AgentResult, GenerateRequest, LanguageModel, TextStream};

/// Characters per streamed chunk.
const CHUNK_CHARS: usize = 8;

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Failure(String),
}

/// A [`LanguageModel`] that plays back queued replies.
///
/// When the queue is empty the fallback reply is used.
#[derive(Debug)]
pub struct ScriptedModel {
    name: String,
    fallback: String,
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedModel {
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            name: "scripted".to_string(),
            fallback: fallback.into(),
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Queue a successful reply.
    pub fn push_reply(&self, text: impl Into<String>) -> &Self {
        self.lock_replies().push_back(Reply::Text(text.into()));
        self
    }

    /// Queue a failing call.
    pub fn push_failure(&self, message: impl Into<String>) -> &Self {
        self.lock_replies().push_back(Reply::Failure(message.into()));
        self
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<GenerateRequest> {
        match self.requests.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn lock_replies(&self) -> std::sync::MutexGuard<'_, VecDeque<Reply>> {
        self.replies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_reply(&self, request: GenerateRequest) -> AgentResult<String> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request);

        match self.lock_replies().pop_front() {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Failure(message)) => Err(AgentError::Stream(message)),
            None => Ok(self.fallback.clone()),
        }
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: GenerateRequest) -> AgentResult<String> {
        self.next_reply(request)
    }

    async fn stream(&self, request: GenerateRequest) -> AgentResult<TextStream> {
        let text = self.next_reply(request)?;
        let chars: Vec<char> = text.chars().collect();
        let chunks: Vec<AgentResult<String>> = chars
            .chunks(CHUNK_CHARS)
            .map(|chunk| Ok(chunk.iter().collect()))
            .collect();
        Ok(futures::stream::iter(chunks).boxed())
    }
}
