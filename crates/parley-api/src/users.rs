use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use parley_types::UserId;
use parley_types::api::{Claims, OnlineResponse, UserSearchQuery};

use crate::{AppState, with_db};

const SEARCH_LIMIT: u32 = 20;

pub async fn search_users(
    State(state): State<AppState>,
    Query(query): Query<UserSearchQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let needle = query.username.trim().to_string();
    if needle.chars().count() < 2 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let me = claims.sub;
    let users = with_db(&state, move |db| db.search_users(&needle, me, SEARCH_LIMIT)).await?;
    Ok(Json(users))
}

pub async fn user_online(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Json<OnlineResponse> {
    Json(OnlineResponse {
        user_id,
        online: state.hub.is_online(user_id),
    })
}
