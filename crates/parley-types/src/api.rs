use serde::{Deserialize, Serialize};

use crate::UserId;
use crate::models::{ChatMessage, UserSummary};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the WebSocket upgrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: UserId,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: UserId,
    pub username: String,
    pub token: String,
}

// -- Conversations --

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatPartner {
    #[serde(flatten)]
    pub user: UserSummary,
    pub online: bool,
}

/// One row of the conversation list.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatSummary {
    pub user: ChatPartner,
    pub last_message: Option<ChatMessage>,
    pub unread_count: u64,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditMessageRequest {
    pub content: String,
}

/// Who a deletion applies to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteScope {
    #[default]
    Me,
    All,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteRequest {
    #[serde(default)]
    pub delete_for: DeleteScope,
}

// -- Users --

#[derive(Debug, Deserialize)]
pub struct UserSearchQuery {
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OnlineResponse {
    pub user_id: UserId,
    pub online: bool,
}
