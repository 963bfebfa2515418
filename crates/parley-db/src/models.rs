//! Database row types. These map directly to SQLite rows and are kept apart
//! from the parley-types projections so the schema can move independently.

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;

use parley_types::models::{ChatMessage, ReplyPreview, UserSummary};

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub password: String,
    pub avatar: Option<String>,
    pub created_at: String,
}

impl UserRow {
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id as u64,
            username: self.username.clone(),
            avatar: self.avatar.clone(),
        }
    }
}

/// A message joined with its reply target and its sender's profile.
pub struct MessageRow {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub content: String,
    pub is_read: bool,
    pub deleted_for_sender: bool,
    pub deleted_for_receiver: bool,
    pub reply_to_id: Option<i64>,
    pub reply_sender_id: Option<i64>,
    pub reply_content: Option<String>,
    pub sender_username: Option<String>,
    pub sender_avatar: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl MessageRow {
    pub fn into_message(self) -> ChatMessage {
        let reply_to = match (self.reply_to_id, self.reply_sender_id, self.reply_content) {
            (Some(id), Some(sender_id), Some(content)) => Some(ReplyPreview {
                id: id as u64,
                sender_id: sender_id as u64,
                content,
            }),
            _ => None,
        };

        let sender = self.sender_username.map(|username| UserSummary {
            id: self.sender_id as u64,
            username,
            avatar: self.sender_avatar,
        });

        ChatMessage {
            id: self.id as u64,
            sender_id: self.sender_id as u64,
            receiver_id: self.receiver_id as u64,
            content: self.content,
            is_read: self.is_read,
            deleted_for_sender: self.deleted_for_sender,
            deleted_for_receiver: self.deleted_for_receiver,
            reply_to_id: self.reply_to_id.map(|id| id as u64),
            reply_to,
            sender,
            created_at: parse_timestamp(&self.created_at, self.id),
            updated_at: parse_timestamp(&self.updated_at, self.id),
        }
    }
}

/// One entry of a user's conversation list.
pub struct ConversationRow {
    pub partner: UserSummary,
    pub last_message: ChatMessage,
    pub unread_count: u64,
}

pub(crate) fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str, message_id: i64) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // Rows written by SQLite defaults look like "YYYY-MM-DD HH:MM:SS".
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}' on message {}: {}", raw, message_id, e);
            DateTime::default()
        })
}
