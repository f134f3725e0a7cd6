//! HTTP client for the chat and thread endpoints.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::memory::Message;
use crate::stream::{Frame, FrameDecoder};
use crate::threads::ThreadRecord;

/// Frames of a chat reply as they arrive.
pub type FrameStream = BoxStream<'static, Result<Frame>>;

/// Operations the client performs against the server.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// History of a thread, oldest first.
    async fn history(&self, session_id: &str, user_id: Option<&str>) -> Result<Vec<Message>>;

    /// Send the conversation and stream the reply.
    async fn send(
        &self,
        session_id: &str,
        user_id: Option<&str>,
        messages: &[Message],
    ) -> Result<FrameStream>;

    async fn reset(&self, session_id: &str, user_id: Option<&str>) -> Result<()>;

    async fn list_threads(&self, user_id: &str) -> Result<Vec<ThreadRecord>>;

    async fn upsert_thread(&self, user_id: &str, thread_id: &str, title: Option<&str>)
    -> Result<()>;

    async fn rename_thread(&self, user_id: &str, thread_id: &str, title: &str) -> Result<()>;

    async fn delete_thread(&self, user_id: &str, thread_id: &str) -> Result<()>;
}

#[derive(Deserialize)]
struct HistoryBody {
    #[serde(default)]
    messages: Vec<Message>,
}

#[derive(Deserialize)]
struct ThreadsBody {
    #[serde(default)]
    threads: Vec<ThreadRecord>,
}

/// [`ChatApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpChatApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpChatApi {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `GET /health`.
    pub async fn health(&self) -> Result<serde_json::Value> {
        let response = self
            .client
            .get(self.url("/health"))
            .send()
            .await
            .context("sending request to server")?;
        handle_response(response).await
    }
}

/// Parse a JSON body, turning error statuses into errors carrying the
/// server's message.
async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
            .unwrap_or(body);
        bail!("server returned {}: {}", status, message);
    }
    response.json().await.context("parsing server response")
}

fn query(pairs: &[(&str, Option<&str>)]) -> String {
    let encoded: Vec<String> = pairs
        .iter()
        .filter_map(|(key, value)| value.map(|v| format!("{}={}", key, urlencoding::encode(v))))
        .collect();
    if encoded.is_empty() {
        String::new()
    } else {
        format!("?{}", encoded.join("&"))
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn history(&self, session_id: &str, user_id: Option<&str>) -> Result<Vec<Message>> {
        let path = format!(
            "/chat{}",
            query(&[("sessionId", Some(session_id)), ("userId", user_id)])
        );
        let response = self
            .client
            .get(self.url(&path))
            .send()
            .await
            .context("sending request to server")?;
        let body: HistoryBody = handle_response(response).await?;
        Ok(body.messages)
    }

    async fn send(
        &self,
        session_id: &str,
        user_id: Option<&str>,
        messages: &[Message],
    ) -> Result<FrameStream> {
        let mut request = self
            .client
            .post(self.url("/chat"))
            .header("x-session-id", session_id)
            .json(&serde_json::json!({ "messages": messages }));
        if let Some(user_id) = user_id {
            request = request.header("x-user-id", user_id);
        }

        let response = request.send().await.context("sending request to server")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("chat request failed with {}: {}", status, body);
        }

        let mut decoder = FrameDecoder::new();
        let frames = response
            .bytes_stream()
            .map(move |chunk| match chunk {
                Ok(bytes) => decoder.push(&bytes).into_iter().map(Ok).collect::<Vec<_>>(),
                Err(e) => vec![Err(anyhow::Error::new(e).context("reading reply stream"))],
            })
            .flat_map(futures::stream::iter);

        debug!(session_id, "reply stream opened");
        Ok(frames.boxed())
    }

    async fn reset(&self, session_id: &str, user_id: Option<&str>) -> Result<()> {
        let path = format!(
            "/chat{}",
            query(&[("sessionId", Some(session_id)), ("userId", user_id)])
        );
        let response = self
            .client
            .delete(self.url(&path))
            .send()
            .await
            .context("sending request to server")?;
        let _: serde_json::Value = handle_response(response).await?;
        Ok(())
    }

    async fn list_threads(&self, user_id: &str) -> Result<Vec<ThreadRecord>> {
        let path = format!("/threads{}", query(&[("userId", Some(user_id))]));
        let response = self
            .client
            .get(self.url(&path))
            .send()
            .await
            .context("sending request to server")?;
        let body: ThreadsBody = handle_response(response).await?;
        Ok(body.threads)
    }

    async fn upsert_thread(
        &self,
        user_id: &str,
        thread_id: &str,
        title: Option<&str>,
    ) -> Result<()> {
        let response = self
            .client
            .post(self.url("/threads"))
            .json(&serde_json::json!({
                "userId": user_id,
                "threadId": thread_id,
                "title": title,
            }))
            .send()
            .await
            .context("sending request to server")?;
        let _: serde_json::Value = handle_response(response).await?;
        Ok(())
    }

    async fn rename_thread(&self, user_id: &str, thread_id: &str, title: &str) -> Result<()> {
        let response = self
            .client
            .patch(self.url("/threads"))
            .json(&serde_json::json!({
                "userId": user_id,
                "threadId": thread_id,
                "title": title,
            }))
            .send()
            .await
            .context("sending request to server")?;
        let _: serde_json::Value = handle_response(response).await?;
        Ok(())
    }

    async fn delete_thread(&self, user_id: &str, thread_id: &str) -> Result<()> {
        let path = format!(
            "/threads{}",
            query(&[("userId", Some(user_id)), ("threadId", Some(thread_id))])
        );
        let response = self
            .client
            .delete(self.url(&path))
            .send()
            .await
            .context("sending request to server")?;
        let _: serde_json::Value = handle_response(response).await?;
        Ok(())
    }
}
