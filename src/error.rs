//! Error types for the platform's external boundaries.
//!
//! Each outbound collaborator (stores, forum, LLM, email, queue, transport)
//! gets its own error enum so call sites stay precise, and [`PlatformError`]
//! aggregates them for the handler edge where internal errors are translated
//! into client-facing responses.

use thiserror::Error;

/// Failures raised by the key-value tables and the vector index.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend failure: {0}")]
    Backend(String),

    #[error("serialization failure: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid pagination token: {0}")]
    BadToken(String),
}

/// Failures raised by the forum client.
#[derive(Debug, Error)]
pub enum ForumError {
    #[error("forum request failed: {0}")]
    Network(String),

    #[error("forum authentication failed: {0}")]
    Auth(String),

    #[error("malformed forum payload: {0}")]
    Malformed(String),
}

/// Failures raised by the language-model and embedding endpoints.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm request failed: {0}")]
    Request(String),

    #[error("llm stream interrupted: {0}")]
    Stream(String),

    #[error("unexpected llm response shape: {0}")]
    Protocol(String),
}

/// Failures raised when sending email.
#[derive(Debug, Error)]
#[error("email send failed: {0}")]
pub struct EmailError(pub String);

/// Failures raised by the update queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue receive failed: {0}")]
    Receive(String),

    #[error("queue delete failed: {0}")]
    Delete(String),
}

/// Failures raised when posting to a client connection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection {0} is gone")]
    Gone(String),

    #[error("transport send failed: {0}")]
    Send(String),
}

/// Failures raised by the credential/parameter store.
#[derive(Debug, Error)]
#[error("parameter '{name}' unavailable: {reason}")]
pub struct ParameterError {
    pub name: String,
    pub reason: String,
}

/// Top-level error for operations that cross several boundaries.
///
/// The two edges that must never leak a raw internal error to a client — the
/// websocket stream and the HTTP handler — catch this type and map it to a
/// terminal "done" frame or a JSON error body respectively.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Forum(#[from] ForumError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Email(#[from] EmailError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Parameter(#[from] ParameterError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

impl PlatformError {
    /// Convenience constructor for client-caused failures.
    pub fn invalid(msg: impl Into<String>) -> Self {
        PlatformError::InvalidInput(msg.into())
    }
}
