use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;

use parley_types::UserId;
use parley_types::api::{ChatPartner, ChatSummary, Claims, DeleteRequest, DeleteScope};
use parley_types::events::ServerFrame;

use crate::messages::scope_of;
use crate::{AppState, with_db};

/// Conversation list: one entry per partner with live presence, the last
/// message the caller can still see, and the caller's unread count.
pub async fn get_chats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let me = claims.sub;
    let rows = with_db(&state, move |db| db.list_conversations(me)).await?;

    let chats: Vec<ChatSummary> = rows
        .into_iter()
        .map(|row| ChatSummary {
            user: ChatPartner {
                online: state.hub.is_online(row.partner.id),
                user: row.partner,
            },
            last_message: Some(row.last_message),
            unread_count: row.unread_count,
        })
        .collect();

    Ok(Json(chats))
}

/// Hide the chat from the caller. With `all`, what the caller sent is also
/// retracted from the partner, who is told with `chat_deleted`.
pub async fn delete_chat(
    State(state): State<AppState>,
    Path(partner_id): Path<UserId>,
    Extension(claims): Extension<Claims>,
    body: Option<Json<DeleteRequest>>,
) -> Result<impl IntoResponse, StatusCode> {
    let me = claims.sub;
    if partner_id == me {
        return Err(StatusCode::BAD_REQUEST);
    }

    let everyone = scope_of(body) == DeleteScope::All;
    let deleted = with_db(&state, move |db| db.delete_conversation(me, partner_id, everyone)).await?;

    if everyone {
        state
            .hub
            .deliver_to_user(partner_id, &ServerFrame::ChatDeleted { other_user_id: me });
    }

    Ok(Json(json!({ "deleted": deleted })))
}
