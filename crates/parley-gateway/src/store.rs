//! The collaborators the router consumes. `parley_db::Database` implements
//! both; tests substitute their own.

use thiserror::Error;

use parley_db::Database;
use parley_types::models::{ChatMessage, FlagUpdate, NewMessage, UserSummary};
use parley_types::{MessageId, UserId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Durable message storage. Each call is atomic: a failed call leaves no
/// partial write behind.
pub trait MessageStore: Send + Sync + 'static {
    fn create_message(&self, new: &NewMessage) -> Result<ChatMessage, StoreError>;

    fn get_message(&self, id: MessageId) -> Result<Option<ChatMessage>, StoreError>;

    /// Returns `None` if the message does not exist.
    fn update_message_flags(&self, id: MessageId, flags: FlagUpdate) -> Result<Option<ChatMessage>, StoreError>;
}

/// Read-only view of user records.
pub trait UserDirectory: Send + Sync + 'static {
    fn get_user(&self, id: UserId) -> Result<Option<UserSummary>, StoreError>;
}

impl MessageStore for Database {
    fn create_message(&self, new: &NewMessage) -> Result<ChatMessage, StoreError> {
        Ok(Database::create_message(self, new)?)
    }

    fn get_message(&self, id: MessageId) -> Result<Option<ChatMessage>, StoreError> {
        Ok(Database::get_message(self, id)?)
    }

    fn update_message_flags(&self, id: MessageId, flags: FlagUpdate) -> Result<Option<ChatMessage>, StoreError> {
        Ok(Database::update_message_flags(self, id, flags)?)
    }
}

impl UserDirectory for Database {
    fn get_user(&self, id: UserId) -> Result<Option<UserSummary>, StoreError> {
        Ok(self.get_user_by_id(id)?.map(|row| row.summary()))
    }
}
