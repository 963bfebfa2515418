use axum::{
    Router, middleware,
    routing::{delete, get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use parley_api::middleware::require_auth;
use parley_api::{AppState, auth, chats, messages, users};

use crate::gateway::ws_upgrade;

pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/ws", get(ws_upgrade));

    let protected_routes = Router::new()
        .route("/api/chats", get(chats::get_chats))
        .route("/api/chats/{user_id}", delete(chats::delete_chat))
        // GET takes a partner id; PUT and DELETE take a message id.
        .route(
            "/api/messages/{id}",
            get(messages::get_messages)
                .put(messages::edit_message)
                .delete(messages::delete_message),
        )
        .route("/api/messages/{id}/read", put(messages::mark_read))
        .route("/api/users/search", get(users::search_users))
        .route("/api/users/{user_id}/online", get(users::user_online))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
