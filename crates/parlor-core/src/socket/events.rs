use serde::{Deserialize, Serialize};

use crate::models::{Conversation, Message};

/// A push frame from the persistent connection.
///
/// Wire format is tagged JSON: `{"event": "...", "data": {...}}`.
/// `connect` and `connect_error` double as the handshake answer: the
/// server's first frame after the transport opens is one of the two.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum PushEvent {
    MessageCreated(Message),
    ConversationCreated(Conversation),
    #[serde(rename_all = "camelCase")]
    ConversationDeleted {
        conversation_id: String,
        deleted_by: String,
    },
    Connect,
    Disconnect {
        reason: String,
    },
    #[serde(rename = "connect_error")]
    ConnectError {
        message: String,
    },
}
