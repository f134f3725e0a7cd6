//! Chat handlers: history, send, reset.

use std::convert::Infallible;

use axum::{
    Json,
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::codec;
use crate::memory::Message;
use crate::session::{DEFAULT_SESSION_ID, Identity, MemoryScope, is_guest_thread};
use crate::stream::{self, Frame};

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;

pub const SESSION_HEADER: &str = "x-session-id";
pub const USER_HEADER: &str = "x-user-id";

/// Query parameters identifying a conversation.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatQuery {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
}

/// Request body of `POST /chat`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Json<Self> {
        Json(Self { success: true })
    }
}

/// Memory scope of a thread, or `None` when it must not be persisted.
///
/// Guests never get a scope, and neither do guest-shaped thread ids.
fn scope_for(thread_id: &str, identity: &Identity) -> Option<MemoryScope> {
    if is_guest_thread(thread_id) {
        return None;
    }
    MemoryScope::for_identity(thread_id, identity)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Conversation history, oldest first.
///
/// Never fails: guests, unknown threads and store errors all yield an empty
/// list.
#[instrument(skip(state))]
pub async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<ChatQuery>,
) -> Json<HistoryResponse> {
    let thread_id = non_empty(query.session_id.as_deref()).unwrap_or(DEFAULT_SESSION_ID);
    let identity = Identity::from_user_id(query.user_id.as_deref());

    let Some(scope) = scope_for(thread_id, &identity) else {
        return Json(HistoryResponse {
            messages: Vec::new(),
        });
    };

    let messages = match state.memory.list_messages(&scope, None).await {
        Ok(messages) => messages,
        Err(e) => {
            warn!(thread_id, error = %e, "failed to load history");
            Vec::new()
        }
    };

    debug!(thread_id, count = messages.len(), "loaded history");
    Json(HistoryResponse { messages })
}

/// Send a chat turn and stream the reply.
///
/// A message carrying an image goes through the image pipeline and is answered
/// in one piece; anything else is relayed from the agent as it streams.
#[instrument(skip(state, headers, body))]
pub async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let request: ChatRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::internal(format!("invalid chat request: {}", e)))?;

    let thread_id = non_empty(header_value(&headers, SESSION_HEADER))
        .unwrap_or(DEFAULT_SESSION_ID)
        .to_string();
    let identity = Identity::from_user_id(header_value(&headers, USER_HEADER));
    let scope = scope_for(&thread_id, &identity);

    let last = request
        .messages
        .last()
        .ok_or_else(|| ApiError::internal("message batch is empty"))?;

    if let Some(data_url) = codec::extract_image_data_url(&last.content) {
        info!(thread_id = %thread_id, "routing message to image pipeline");
        let text = codec::clean_text(&last.content);
        let prompt = (!text.is_empty()).then_some(text.as_str());
        let reply_text = state.pipeline.run_data_url(data_url, prompt).await;
        let reply = Message::assistant(reply_text);

        if let Some(scope) = &scope {
            let turn = [last.clone(), reply.clone()];
            if let Err(e) = state.memory.append_messages(scope, &turn).await {
                warn!(thread_id = %thread_id, error = %e, "failed to store image turn");
            }
        }

        return Ok(stream_response(Body::from(stream::encode_reply(
            &reply.id,
            &reply.content,
        ))));
    }

    let agent_stream = state.agent.stream(&request.messages, scope.as_ref()).await?;
    debug!(thread_id = %thread_id, message_id = %agent_stream.message_id, "streaming reply");

    let start = futures::stream::once(futures::future::ready(
        Frame::Start {
            message_id: agent_stream.message_id,
        }
        .encode(),
    ));
    let deltas = agent_stream.stream.map(|chunk| match chunk {
        Ok(delta) => Frame::text(delta).encode(),
        Err(e) => Frame::Error(e.to_string()).encode(),
    });
    let finish = futures::stream::once(futures::future::ready(Frame::stop().encode()));

    let frames = start
        .chain(deltas)
        .chain(finish)
        .map(|frame| Ok::<_, Infallible>(Bytes::from(frame)));

    Ok(stream_response(Body::from_stream(frames)))
}

fn stream_response(body: Body) -> Response {
    (
        [
            (header::CONTENT_TYPE, stream::CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        [(stream::STREAM_HEADER, "v1")],
        body,
    )
        .into_response()
}

/// Validate a reset request. Conversation data is left in place.
#[instrument(skip(_state))]
pub async fn reset_chat(
    State(_state): State<AppState>,
    Query(query): Query<ChatQuery>,
) -> ApiResult<Json<SuccessResponse>> {
    let Some(session_id) = non_empty(query.session_id.as_deref()) else {
        return Err(ApiError::bad_request("Session ID is required"));
    };
    info!(session_id, "chat reset acknowledged");
    Ok(SuccessResponse::ok())
}
