pub mod api;
pub mod events;
pub mod models;

/// Store-assigned user identity. The core never mints these.
pub type UserId = u64;

/// Store-assigned chat message identity.
pub type MessageId = u64;
