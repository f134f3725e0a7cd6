//! Persona agent with memory.

use std::collections::HashSet;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use super::{AgentResult, GenerateRequest, LanguageModel, ModelMessage, TextStream};
use crate::memory::models::new_message_id;
use crate::memory::{AgentMemory, Message};
use crate::session::MemoryScope;

/// Default number of remembered messages fed back as context.
pub const DEFAULT_HISTORY_WINDOW: usize = 10;

/// A complete agent reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentReply {
    pub message_id: String,
    pub text: String,
}

/// A streaming agent reply. `message_id` is the id the reply is stored under.
pub struct AgentStream {
    pub message_id: String,
    pub stream: TextStream,
}

/// An agent with fixed instructions that remembers conversations.
///
/// With a [`MemoryScope`] the last `history_window` stored messages are
/// recalled as context, and the new messages plus the reply are stored once
/// the reply completes. Without a scope (guests) nothing is read or written.
#[derive(Clone)]
pub struct PersonaAgent {
    name: String,
    instructions: String,
    model: Arc<dyn LanguageModel>,
    memory: Arc<dyn AgentMemory>,
    history_window: usize,
}

/// Prompt plus the incoming messages memory has not seen yet.
struct Prepared {
    request: GenerateRequest,
    fresh: Vec<Message>,
}

impl PersonaAgent {
    pub fn new(
        name: impl Into<String>,
        instructions: impl Into<String>,
        model: Arc<dyn LanguageModel>,
        memory: Arc<dyn AgentMemory>,
    ) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            model,
            memory,
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn memory(&self) -> &Arc<dyn AgentMemory> {
        &self.memory
    }

    /// Generate a complete reply.
    pub async fn generate(
        &self,
        messages: &[Message],
        scope: Option<&MemoryScope>,
    ) -> AgentResult<AgentReply> {
        let prepared = self.prepare(messages, scope).await?;
        let text = self.model.generate(prepared.request).await?;
        let reply = Message::assistant(text.clone());
        let message_id = reply.id.clone();

        if let Some(scope) = scope {
            remember(self.memory.as_ref(), scope, prepared.fresh, reply).await;
        }

        Ok(AgentReply { message_id, text })
    }

    /// Stream a reply.
    ///
    /// Memory is written after the model finishes and before the returned
    /// stream ends, so a history fetch issued after the stream completes sees
    /// the reply. Failed generations are not stored.
    pub async fn stream(
        &self,
        messages: &[Message],
        scope: Option<&MemoryScope>,
    ) -> AgentResult<AgentStream> {
        let prepared = self.prepare(messages, scope).await?;
        let mut upstream = self.model.stream(prepared.request).await?;
        let message_id = new_message_id();

        let (tx, rx) = mpsc::channel::<AgentResult<String>>(32);
        let memory = self.memory.clone();
        let scope = scope.cloned();
        let fresh = prepared.fresh;
        let reply_id = message_id.clone();

        tokio::spawn(async move {
            let mut text = String::new();
            while let Some(chunk) = upstream.next().await {
                match chunk {
                    Ok(delta) => {
                        text.push_str(&delta);
                        if tx.send(Ok(delta)).await.is_err() {
                            debug!("agent stream receiver dropped");
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "agent stream failed");
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }

            if let Some(scope) = scope {
                let reply = Message::assistant(text).with_id(reply_id);
                remember(memory.as_ref(), &scope, fresh, reply).await;
            }
            // Dropping `tx` ends the stream.
        });

        Ok(AgentStream {
            message_id,
            stream: ReceiverStream::new(rx).boxed(),
        })
    }

    async fn prepare(
        &self,
        incoming: &[Message],
        scope: Option<&MemoryScope>,
    ) -> AgentResult<Prepared> {
        let Some(scope) = scope else {
            let messages = incoming.iter().map(ModelMessage::from_message).collect();
            return Ok(Prepared {
                request: GenerateRequest::new(self.instructions.clone(), messages),
                fresh: Vec::new(),
            });
        };

        let stored = self.memory.list_messages(scope, None).await?;
        let known: HashSet<&str> = stored.iter().map(|m| m.id.as_str()).collect();
        let fresh: Vec<Message> = incoming
            .iter()
            .filter(|m| !known.contains(m.id.as_str()))
            .cloned()
            .collect();

        let recalled = &stored[stored.len().saturating_sub(self.history_window)..];
        debug!(
            agent = %self.name,
            thread_id = %scope.thread_id,
            recalled = recalled.len(),
            fresh = fresh.len(),
            "prepared agent context"
        );

        let messages = recalled
            .iter()
            .chain(fresh.iter())
            .map(ModelMessage::from_message)
            .collect();

        Ok(Prepared {
            request: GenerateRequest::new(self.instructions.clone(), messages),
            fresh,
        })
    }
}

/// Store the new turn. Failures are logged, never returned.
async fn remember(
    memory: &dyn AgentMemory,
    scope: &MemoryScope,
    mut fresh: Vec<Message>,
    reply: Message,
) {
    fresh.push(reply);
    match memory.append_messages(scope, &fresh).await {
        Ok(written) => info!(thread_id = %scope.thread_id, written, "stored conversation turn"),
        Err(e) => warn!(thread_id = %scope.thread_id, error = %e, "failed to store conversation turn"),
    }
}
