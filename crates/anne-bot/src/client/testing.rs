//! In-memory [`ChatApi`] for client tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Result, bail};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::Semaphore;

use super::api::{ChatApi, FrameStream};
use crate::memory::Message;
use crate::stream::Frame;
use crate::threads::ThreadRecord;

#[derive(Default)]
struct State {
    threads: Vec<ThreadRecord>,
    histories: HashMap<String, Vec<Message>>,
    calls: Vec<String>,
    clock: u64,
}

/// Fake server. Replies are a fixed text; the next history read or thread
/// listing can be held back with [`FakeApi::hold_history`] and
/// [`FakeApi::hold_threads`].
pub struct FakeApi {
    state: Mutex<State>,
    reply: String,
    fail_send: Mutex<bool>,
    history_gate: Mutex<Option<Arc<Semaphore>>>,
    threads_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeApi {
    pub fn new(reply: &str) -> Self {
        Self {
            state: Mutex::new(State::default()),
            reply: reply.to_string(),
            fail_send: Mutex::new(false),
            history_gate: Mutex::new(None),
            threads_gate: Mutex::new(None),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn seed_thread(&self, user_id: &str, thread_id: &str, title: &str, history: Vec<Message>) {
        let mut state = self.state();
        state.clock += 1;
        let stamp = format!("2026-01-01T00:00:{:02}Z", state.clock);
        state.threads.push(ThreadRecord {
            user_id: user_id.into(),
            thread_id: thread_id.into(),
            title: Some(title.into()),
            created_at: stamp.clone(),
            updated_at: stamp,
        });
        state.histories.insert(thread_id.into(), history);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn threads(&self) -> Vec<ThreadRecord> {
        self.state().threads.clone()
    }

    pub fn set_fail_send(&self, fail: bool) {
        *self.fail_send.lock().unwrap() = fail;
    }

    /// Block the next history read until a permit is added to the returned
    /// semaphore. Later reads are not held.
    pub fn hold_history(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.history_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Like [`FakeApi::hold_history`], for the next thread listing.
    pub fn hold_threads(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.threads_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    fn record(&self, call: String) {
        self.state().calls.push(call);
    }
}

#[async_trait]
impl ChatApi for FakeApi {
    async fn history(&self, session_id: &str, _user_id: Option<&str>) -> Result<Vec<Message>> {
        self.record(format!("history {session_id}"));
        let gate = self.history_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.acquire().await?.forget();
        }
        Ok(self
            .state()
            .histories
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn send(
        &self,
        session_id: &str,
        _user_id: Option<&str>,
        messages: &[Message],
    ) -> Result<FrameStream> {
        self.record(format!("send {session_id}"));
        if *self.fail_send.lock().unwrap() {
            bail!("server returned 500 Internal Server Error: Internal Server Error");
        }

        let reply = Message::assistant(self.reply.clone());
        {
            let mut state = self.state();
            let history = state.histories.entry(session_id.to_string()).or_default();
            if let Some(last) = messages.last() {
                history.push(last.clone());
            }
            history.push(reply.clone());
        }

        let mid = self.reply.chars().count() / 2;
        let head: String = self.reply.chars().take(mid).collect();
        let tail: String = self.reply.chars().skip(mid).collect();
        let frames = vec![
            Ok(Frame::Start {
                message_id: reply.id,
            }),
            Ok(Frame::text(head)),
            Ok(Frame::text(tail)),
            Ok(Frame::stop()),
        ];
        Ok(futures::stream::iter(frames).boxed())
    }

    async fn reset(&self, session_id: &str, _user_id: Option<&str>) -> Result<()> {
        self.record(format!("reset {session_id}"));
        Ok(())
    }

    async fn list_threads(&self, user_id: &str) -> Result<Vec<ThreadRecord>> {
        self.record(format!("list {user_id}"));
        let gate = self.threads_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.acquire().await?.forget();
        }
        let mut threads: Vec<ThreadRecord> = self
            .state()
            .threads
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        threads.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(threads)
    }

    async fn upsert_thread(
        &self,
        user_id: &str,
        thread_id: &str,
        title: Option<&str>,
    ) -> Result<()> {
        self.record(format!("upsert {thread_id}"));
        let mut guard = self.state();
        let state = &mut *guard;
        state.clock += 1;
        let stamp = format!("2026-01-01T00:00:{:02}Z", state.clock);
        match state
            .threads
            .iter_mut()
            .find(|t| t.user_id == user_id && t.thread_id == thread_id)
        {
            Some(existing) => {
                if let Some(title) = title {
                    existing.title = Some(title.into());
                }
                existing.updated_at = stamp;
            }
            None => state.threads.push(ThreadRecord {
                user_id: user_id.into(),
                thread_id: thread_id.into(),
                title: Some(title.unwrap_or(crate::threads::PLACEHOLDER_TITLE).into()),
                created_at: stamp.clone(),
                updated_at: stamp,
            }),
        }
        Ok(())
    }

    async fn rename_thread(&self, user_id: &str, thread_id: &str, title: &str) -> Result<()> {
        self.record(format!("rename {thread_id} {title}"));
        let mut state = self.state();
        state.clock += 1;
        let stamp = format!("2026-01-01T00:00:{:02}Z", state.clock);
        if let Some(existing) = state
            .threads
            .iter_mut()
            .find(|t| t.user_id == user_id && t.thread_id == thread_id)
        {
            existing.title = Some(title.into());
            existing.updated_at = stamp;
        }
        Ok(())
    }

    async fn delete_thread(&self, user_id: &str, thread_id: &str) -> Result<()> {
        self.record(format!("delete {thread_id}"));
        let mut state = self.state();
        state
            .threads
            .retain(|t| !(t.user_id == user_id && t.thread_id == thread_id));
        state.histories.remove(thread_id);
        Ok(())
    }
}
