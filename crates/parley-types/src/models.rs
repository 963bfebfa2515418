use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{MessageId, UserId};

/// The slice of a user record the messaging core is allowed to see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// A persisted chat message as projected to clients.
///
/// Rows are never hard-deleted: each party hides its own view through
/// `deleted_for_sender` / `deleted_for_receiver`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub is_read: bool,
    pub deleted_for_sender: bool,
    pub deleted_for_receiver: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyPreview>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<UserSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatMessage {
    /// True if the message belongs to the unordered pair `{a, b}`.
    pub fn is_between(&self, a: UserId, b: UserId) -> bool {
        (self.sender_id == a && self.receiver_id == b)
            || (self.sender_id == b && self.receiver_id == a)
    }

    /// True if `user` has hidden this message from their own view.
    pub fn is_deleted_for(&self, user: UserId) -> bool {
        (self.sender_id == user && self.deleted_for_sender)
            || (self.receiver_id == user && self.deleted_for_receiver)
    }

    /// Parties that can still see the message, sender first.
    pub fn visible_to(&self) -> Vec<UserId> {
        [self.sender_id, self.receiver_id]
            .into_iter()
            .filter(|&user| !self.is_deleted_for(user))
            .collect()
    }

    /// The other side of the conversation, from `user`'s point of view.
    pub fn partner_of(&self, user: UserId) -> UserId {
        if self.sender_id == user {
            self.receiver_id
        } else {
            self.sender_id
        }
    }
}

/// Resolved reply target embedded in outbound messages so clients can render
/// the quote without a second fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyPreview {
    pub id: MessageId,
    pub sender_id: UserId,
    pub content: String,
}

/// Input to the persistence collaborator's create operation.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub reply_to_id: Option<MessageId>,
}

/// Partial flag update. `None` leaves the column untouched; all `Some`
/// fields are written in one transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlagUpdate {
    pub is_read: Option<bool>,
    pub deleted_for_sender: Option<bool>,
    pub deleted_for_receiver: Option<bool>,
}

impl FlagUpdate {
    pub fn mark_read() -> Self {
        Self {
            is_read: Some(true),
            ..Default::default()
        }
    }

    /// Hide the message for whichever side `user` is on.
    pub fn delete_for(message: &ChatMessage, user: UserId) -> Self {
        Self {
            deleted_for_sender: (message.sender_id == user).then_some(true),
            deleted_for_receiver: (message.receiver_id == user).then_some(true),
            ..Default::default()
        }
    }

    pub fn delete_for_everyone() -> Self {
        Self {
            deleted_for_sender: Some(true),
            deleted_for_receiver: Some(true),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.is_read.is_none()
            && self.deleted_for_sender.is_none()
            && self.deleted_for_receiver.is_none()
    }
}
