//! Chat front-end: query normalization, intent routing, and the streamed
//! answer handlers.
//!
//! ```text
//! websocket message ──► handle_message
//!        │  embed + predict intent + normalize
//!        ├── general   ──► retrieval → context → streamed, framed answer
//!        ├── summarize ──► recent summaries → streamed digest
//!        ├── overview  ──► placeholder response
//!        └── unknown   ──► no-op success
//! ```
//!
//! Whatever happens, the connection always receives a terminal `chat_done`
//! frame, and a query-analytics row is persisted best-effort.

pub mod citations;
pub mod context;
pub mod framing;
pub mod general;
pub mod overview;
pub mod prompts;
pub mod queries;
pub mod summarize;

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::PlatformError;
use crate::services::Services;
use crate::transport::WsMessage;
use crate::types::Intent;

static MT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bmt\s*([1-3])\b").expect("mt regex"));
static PSET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bpset\s*([1-9]|1[0-2])\b").expect("pset regex"));

/// Expands the abbreviations students actually type into the terms the
/// course content uses.
pub fn normalize_query(query: &str) -> String {
    let query = MT_RE.replace_all(query, "midterm $1");
    PSET_RE.replace_all(&query, "problem set $1").into_owned()
}

/// An authenticated-or-not chat message off the websocket.
#[derive(Clone, Debug)]
pub struct IncomingChatMessage {
    pub connection_id: String,
    pub message: String,
    pub course_name: String,
    /// Generation model override; falls back to the configured default.
    pub model: Option<String>,
    pub prioritize_instructor: bool,
    /// Verified user id from the JWT claims; `None` means unauthenticated.
    pub user_id: Option<String>,
}

/// Everything a dispatched handler needs about the request.
#[derive(Clone, Debug)]
pub struct ChatRequestContext {
    pub connection_id: String,
    pub raw_query: String,
    pub normalized_query: String,
    pub course_name: String,
    pub gpt_model: String,
    pub prioritize_instructor: bool,
    pub embedding: Vec<f32>,
    pub intent: Intent,
    pub query_id: String,
    pub user_id: String,
}

/// Entry point for one inbound chat message: classifies intent and
/// dispatches. Pre-dispatch failures still close the stream cleanly.
pub async fn handle_message(
    services: &Services,
    incoming: IncomingChatMessage,
) -> Result<(), PlatformError> {
    let Some(user_id) = incoming.user_id.clone() else {
        close_with_error(
            services,
            &incoming.connection_id,
            "Authentication required. Please log in again.",
        )
        .await;
        return Err(PlatformError::Unauthorized("missing user id".to_string()));
    };

    match route(services, incoming, user_id).await {
        Ok(()) => Ok(()),
        Err((connection_id, err)) => {
            warn!(connection_id = %connection_id, error = %err, "chat message failed before dispatch");
            close_with_error(
                services,
                &connection_id,
                "An error occurred while processing your request. Please try again later.",
            )
            .await;
            Err(err)
        }
    }
}

async fn route(
    services: &Services,
    incoming: IncomingChatMessage,
    user_id: String,
) -> Result<(), (String, PlatformError)> {
    let connection_id = incoming.connection_id.clone();
    let fail = |err: PlatformError| (connection_id.clone(), err);

    if incoming.message.is_empty() {
        return Err(fail(PlatformError::invalid("message is required")));
    }

    let embedding = services
        .embedder
        .embed(&incoming.message)
        .await
        .map_err(|err| fail(err.into()))?;
    let intent = services.intent.predict(&embedding);
    debug!(
        intent = intent.as_str(),
        course_name = %incoming.course_name,
        "intent detected"
    );

    let ctx = ChatRequestContext {
        connection_id: incoming.connection_id,
        raw_query: incoming.message.clone(),
        normalized_query: normalize_query(&incoming.message),
        course_name: incoming.course_name,
        gpt_model: incoming
            .model
            .unwrap_or_else(|| services.settings.default_gpt_model.clone()),
        prioritize_instructor: incoming.prioritize_instructor,
        embedding,
        intent,
        query_id: Uuid::new_v4().to_string(),
        user_id,
    };

    match intent {
        Intent::General => general::handle(services, &ctx).await.map_err(fail),
        Intent::Summarize => summarize::handle(services, &ctx).await.map_err(fail),
        Intent::Overview => overview::handle(services, &ctx).await.map_err(fail),
        Intent::Unknown => {
            warn!(connection_id = %ctx.connection_id, "unknown intent; ignoring message");
            Ok(())
        }
    }
}

/// Best-effort error chunk plus the mandatory terminal frame.
async fn close_with_error(services: &Services, connection_id: &str, message: &str) {
    let _ = services
        .transport
        .post_to_connection(connection_id, &WsMessage::chunk(message))
        .await;
    let _ = services
        .transport
        .post_to_connection(connection_id, &WsMessage::done(None))
        .await;
}
