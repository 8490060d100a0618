//! Client-transport contract: typed messages posted to a websocket
//! connection whose lifecycle is managed outside this crate.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::types::Citation;

/// Messages the chat pipeline emits to a connection.
///
/// The `type` tag is the wire discriminator the frontend switches on.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsMessage {
    #[serde(rename = "chat_start")]
    Start { message: String },

    #[serde(rename = "chat_chunk")]
    Chunk { message: String },

    #[serde(rename = "progress_update")]
    Progress { message: String },

    /// Deduplicated citation list plus the post-number → citation map used
    /// for inline `@<n>` footnote rendering.
    #[serde(rename = "citations")]
    Citations {
        citations: Vec<Citation>,
        citation_map: BTreeMap<String, Citation>,
    },

    /// Terminal frame; always sent, even on error paths.
    #[serde(rename = "chat_done")]
    Done {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        needs_more_context: Option<bool>,
    },
}

impl WsMessage {
    pub fn chunk(message: impl Into<String>) -> Self {
        WsMessage::Chunk {
            message: message.into(),
        }
    }

    pub fn start() -> Self {
        WsMessage::Start {
            message: "Start streaming".to_string(),
        }
    }

    pub fn done(needs_more_context: Option<bool>) -> Self {
        WsMessage::Done {
            message: "Finished streaming".to_string(),
            needs_more_context,
        }
    }
}

#[async_trait]
pub trait ClientTransport: Send + Sync {
    async fn post_to_connection(
        &self,
        connection_id: &str,
        message: &WsMessage,
    ) -> Result<(), TransportError>;
}

/// Captures messages per connection for assertions and local debugging.
#[derive(Default)]
pub struct RecordingTransport {
    messages: Mutex<Vec<(String, WsMessage)>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages_for(&self, connection_id: &str) -> Vec<WsMessage> {
        self.messages
            .lock()
            .iter()
            .filter(|(conn, _)| conn == connection_id)
            .map(|(_, message)| message.clone())
            .collect()
    }

    /// Concatenated body text received on a connection.
    pub fn body_text(&self, connection_id: &str) -> String {
        self.messages_for(connection_id)
            .iter()
            .filter_map(|message| match message {
                WsMessage::Chunk { message } => Some(message.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

#[async_trait]
impl ClientTransport for RecordingTransport {
    async fn post_to_connection(
        &self,
        connection_id: &str,
        message: &WsMessage,
    ) -> Result<(), TransportError> {
        self.messages
            .lock()
            .push((connection_id.to_string(), message.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_tag_their_wire_type() {
        let json = serde_json::to_value(WsMessage::chunk("hello")).unwrap();
        assert_eq!(json["type"], "chat_chunk");
        assert_eq!(json["message"], "hello");

        let done = serde_json::to_value(WsMessage::done(Some(true))).unwrap();
        assert_eq!(done["type"], "chat_done");
        assert_eq!(done["needs_more_context"], true);

        let done_plain = serde_json::to_value(WsMessage::done(None)).unwrap();
        assert!(done_plain.get("needs_more_context").is_none());
    }
}
