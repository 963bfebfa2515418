use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{debug, info};

use parley_api::AppState;
use parley_api::auth::verify_token;
use parley_gateway::connection;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// `GET /ws?token=<jwt>`. The token is checked before the upgrade, so a bad
/// credential never produces a Connection.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(token) = params.token.filter(|t| !t.is_empty()) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let claims = match verify_token(&state.jwt_secret, &token) {
        Ok(claims) => claims,
        Err(e) => {
            debug!("rejected websocket upgrade: {}", e);
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    info!(user_id = claims.sub, "websocket upgrade for {}", claims.username);

    let config = state.gateway.clone();
    let hub = state.hub.clone();
    let router = state.router.clone();

    ws.max_message_size(config.max_frame_bytes)
        .max_frame_size(config.max_frame_bytes)
        .on_upgrade(move |socket| connection::serve(socket, hub, router, claims.sub, config))
}
