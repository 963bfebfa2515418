use serde::{Deserialize, Serialize};

use crate::models::ChatMessage;
use crate::{MessageId, UserId};

/// Frames sent FROM client TO server over the WebSocket.
///
/// Fields default when absent so that a structurally valid but incomplete
/// `send_message` reaches validation and is answered with an `error` frame
/// instead of being dropped as unparseable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Persist a chat message and deliver it to both parties
    SendMessage {
        #[serde(default)]
        receiver_id: UserId,
        #[serde(default)]
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to_id: Option<MessageId>,
    },

    /// Sender started typing to `receiver_id`
    Typing {
        #[serde(default)]
        receiver_id: UserId,
    },

    /// Sender stopped typing to `receiver_id`
    StopTyping {
        #[serde(default)]
        receiver_id: UserId,
    },

    /// Any tag this server does not understand
    #[serde(other)]
    Unknown,
}

impl ClientFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SendMessage { .. } => "send_message",
            Self::Typing { .. } => "typing",
            Self::StopTyping { .. } => "stop_typing",
            Self::Unknown => "unknown",
        }
    }
}

/// Frames sent FROM server TO client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// A message was persisted. Sent to the sender as confirmation and to
    /// the receiver as delivery.
    NewMessage { message: ChatMessage },

    /// A send request was rejected or could not be stored
    Error { error: String },

    /// A user came online or went offline
    UserStatus { user_id: UserId, online: bool },

    /// `user_id` is typing to the recipient
    Typing { user_id: UserId },

    /// `user_id` stopped typing to the recipient
    StopTyping { user_id: UserId },

    /// The sender edited a message
    MessageEdited { message: ChatMessage },

    /// The sender deleted a message for everyone
    MessageDeleted { message_id: MessageId },

    /// `other_user_id` deleted the whole conversation for everyone
    ChatDeleted { other_user_id: UserId },
}

impl ServerFrame {
    pub fn error(reason: impl Into<String>) -> Self {
        Self::Error {
            error: reason.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewMessage { .. } => "new_message",
            Self::Error { .. } => "error",
            Self::UserStatus { .. } => "user_status",
            Self::Typing { .. } => "typing",
            Self::StopTyping { .. } => "stop_typing",
            Self::MessageEdited { .. } => "message_edited",
            Self::MessageDeleted { .. } => "message_deleted",
            Self::ChatDeleted { .. } => "chat_deleted",
        }
    }
}
