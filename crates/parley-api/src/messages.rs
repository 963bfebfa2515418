use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, info};

use parley_gateway::router::FlagError;
use parley_types::api::{Claims, DeleteRequest, DeleteScope, EditMessageRequest};
use parley_types::events::ServerFrame;
use parley_types::{MessageId, UserId};

use crate::{AppState, with_db};

/// The conversation with `user_id` as the caller sees it. Viewing marks the
/// partner's messages to the caller as read.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(partner_id): Path<UserId>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let me = claims.sub;

    let messages = with_db(&state, move |db| {
        if db.get_user_by_id(partner_id)?.is_none() {
            return Ok(None);
        }
        let messages = db.get_conversation(me, partner_id)?;
        db.mark_conversation_read(me, partner_id)?;
        Ok(Some(messages))
    })
    .await?
    .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(messages))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let message = state
        .router
        .mark_read(claims.sub, message_id)
        .await
        .map_err(flag_status)?;

    Ok(Json(message))
}

/// Replace a message's content. Sender only; both parties are notified.
pub async fn edit_message(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<EditMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.content.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let me = claims.sub;
    let message = with_db(&state, move |db| {
        let Some(existing) = db.get_message(message_id)?.filter(|m| !m.is_deleted_for(me)) else {
            return Ok(Err(StatusCode::NOT_FOUND));
        };
        if existing.sender_id != me {
            return Ok(Err(StatusCode::FORBIDDEN));
        }
        Ok(db
            .update_message_content(message_id, &req.content)?
            .ok_or(StatusCode::NOT_FOUND))
    })
    .await??;

    info!(id = message.id, "message edited by {}", me);

    // A receiver who already hid the message is not told about the edit.
    state.hub.deliver_to_users(
        &message.visible_to(),
        &ServerFrame::MessageEdited {
            message: message.clone(),
        },
    );

    Ok(Json(message))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Extension(claims): Extension<Claims>,
    body: Option<Json<DeleteRequest>>,
) -> Result<impl IntoResponse, StatusCode> {
    let message = state
        .router
        .delete_message(claims.sub, message_id, scope_of(body))
        .await
        .map_err(flag_status)?;

    Ok(Json(message))
}

/// A missing body means "delete for me".
pub(crate) fn scope_of(body: Option<Json<DeleteRequest>>) -> DeleteScope {
    body.map(|Json(req)| req.delete_for).unwrap_or_default()
}

pub(crate) fn flag_status(e: FlagError) -> StatusCode {
    match e {
        FlagError::NotFound => StatusCode::NOT_FOUND,
        FlagError::Forbidden => StatusCode::FORBIDDEN,
        FlagError::Store(e) => {
            error!("message update failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
