//! Generation-guarded message list.
//!
//! History fetches are asynchronous and can finish after the user has moved
//! on (new thread, other thread). Every reset bumps a generation counter, and
//! a fetch result is applied only if no reset happened since it started.

use crate::memory::{Message, MessageRole};

/// Proof that a load was started at a given generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket(u64);

/// Message list of the visible conversation.
#[derive(Debug, Default)]
pub struct Reconciler {
    generation: u64,
    messages: Vec<Message>,
    loaded: bool,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Start a history load. Invalidates any load already in flight.
    pub fn begin_load(&mut self) -> LoadTicket {
        self.generation += 1;
        self.loaded = false;
        LoadTicket(self.generation)
    }

    pub fn is_current(&self, ticket: LoadTicket) -> bool {
        ticket.0 == self.generation
    }

    /// Replace the list with a load result. Returns false (and changes
    /// nothing) when the ticket is stale.
    pub fn apply(&mut self, ticket: LoadTicket, messages: Vec<Message>) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.messages = messages;
        self.loaded = true;
        true
    }

    /// Empty the list and mark it loaded, invalidating in-flight loads.
    pub fn clear(&mut self) {
        self.generation += 1;
        self.messages.clear();
        self.loaded = true;
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Append text to the assistant message `id`, creating it if needed.
    pub fn append_assistant_delta(&mut self, id: &str, delta: &str) {
        match self.messages.iter_mut().rev().find(|m| m.id == id) {
            Some(message) => message.content.push_str(delta),
            None => self
                .messages
                .push(Message::new(MessageRole::Assistant, delta).with_id(id)),
        }
    }

    /// True if no user message has been sent in this conversation yet.
    pub fn is_first_turn(&self) -> bool {
        !self.messages.iter().any(|m| m.role == MessageRole::User)
    }
}
