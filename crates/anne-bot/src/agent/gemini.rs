//! Google Gemini client.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use super::{
    AgentError, AgentResult, ContentPart, GenerateRequest, LanguageModel, ModelMessage, TextStream,
};
use crate::memory::MessageRole;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Connection settings for [`GeminiModel`].
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    /// Upper bound for a whole request, streaming included.
    pub timeout: Duration,
}

/// Client for the Gemini `generateContent` API.
#[derive(Debug, Clone)]
pub struct GeminiModel {
    client: Client,
    config: GeminiConfig,
}

impl GeminiModel {
    pub fn new(config: GeminiConfig) -> AgentResult<Self> {
        if config.api_key.trim().is_empty() {
            return Err(AgentError::Config("missing Gemini API key".to_string()));
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.timeout)
            .build()?;

        Ok(Self { client, config })
    }

    fn endpoint(&self, method: &str) -> String {
        format!(
            "{}/v1beta/models/{}:{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.model,
            method
        )
    }
}

#[async_trait]
impl LanguageModel for GeminiModel {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn generate(&self, request: GenerateRequest) -> AgentResult<String> {
        let body = GeminiRequest::from(&request);
        let response = self
            .client
            .post(self.endpoint("generateContent"))
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AgentError::Api {
                status: status.as_u16(),
                message: error_message(&message),
            });
        }

        let parsed: GeminiResponse = response.json().await?;
        let text = parsed.text();
        if text.is_empty() {
            return Err(AgentError::EmptyResponse);
        }
        Ok(text)
    }

    async fn stream(&self, request: GenerateRequest) -> AgentResult<TextStream> {
        let body = GeminiRequest::from(&request);
        let request_builder = self
            .client
            .post(format!("{}?alt=sse", self.endpoint("streamGenerateContent")))
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body);

        let mut es = EventSource::new(request_builder)
            .map_err(|e| AgentError::Stream(format!("cannot open event stream: {}", e)))?;
        es.set_retry_policy(Box::new(reqwest_eventsource::retry::Never));

        let (tx, rx) = mpsc::channel::<AgentResult<String>>(32);
        let model = self.config.model.clone();

        tokio::spawn(async move {
            while let Some(event) = es.next().await {
                match event {
                    Ok(Event::Open) => debug!(model = %model, "model stream opened"),
                    Ok(Event::Message(msg)) => {
                        let chunk = match serde_json::from_str::<GeminiResponse>(&msg.data) {
                            Ok(chunk) => chunk,
                            Err(e) => {
                                warn!(model = %model, error = %e, "skipping unparsable stream chunk");
                                continue;
                            }
                        };
                        let text = chunk.text();
                        if !text.is_empty() && tx.send(Ok(text)).await.is_err() {
                            // Receiver dropped.
                            break;
                        }
                    }
                    Err(reqwest_eventsource::Error::StreamEnded) => break,
                    Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                        let message = response.text().await.unwrap_or_default();
                        let _ = tx
                            .send(Err(AgentError::Api {
                                status: status.as_u16(),
                                message: error_message(&message),
                            }))
                            .await;
                        break;
                    }
                    Err(e) => {
                        let _ = tx.send(Err(AgentError::Stream(e.to_string()))).await;
                        break;
                    }
                }
            }
            es.close();
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}

/// Pull `error.message` out of a Gemini error body, or return it unchanged.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

// ========== Wire types ==========

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    contents: Vec<GeminiContent>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: GeminiContent,
}

impl GeminiResponse {
    /// Text of the first candidate.
    fn text(&self) -> String {
        self.candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

impl From<&GenerateRequest> for GeminiRequest {
    fn from(request: &GenerateRequest) -> Self {
        // Gemini has no system role inside `contents`.
        let mut system_texts: Vec<String> = request.system.iter().cloned().collect();
        let mut contents = Vec::new();

        for message in &request.messages {
            match message.role {
                MessageRole::System => system_texts.push(message.plain_text()),
                MessageRole::User | MessageRole::Assistant => {
                    contents.push(GeminiContent::from(message))
                }
            }
        }

        let system_instruction = if system_texts.is_empty() {
            None
        } else {
            Some(GeminiContent {
                role: None,
                parts: vec![GeminiPart {
                    text: Some(system_texts.join("\n\n")),
                    inline_data: None,
                }],
            })
        };

        Self {
            system_instruction,
            contents,
        }
    }
}

impl From<&ModelMessage> for GeminiContent {
    fn from(message: &ModelMessage) -> Self {
        let role = match message.role {
            MessageRole::Assistant => "model",
            _ => "user",
        };
        let parts = message
            .parts
            .iter()
            .map(|part| match part {
                ContentPart::Text(text) => GeminiPart {
                    text: Some(text.clone()),
                    inline_data: None,
                },
                ContentPart::Image(image) => GeminiPart {
                    text: None,
                    inline_data: Some(InlineData {
                        mime_type: image.mime_type().to_string(),
                        data: image.base64(),
                    }),
                },
            })
            .collect();

        Self {
            role: Some(role.to_string()),
            parts,
        }
    }
}
