//! Request/response handlers around the messaging core. None of these take
//! part in the connection concurrency model; they only read presence from
//! the hub and hand notifications to it.

pub mod auth;
pub mod chats;
pub mod messages;
pub mod middleware;
pub mod users;

use std::sync::Arc;

use axum::http::StatusCode;
use tracing::error;

use parley_db::Database;
use parley_gateway::{GatewayConfig, Hub, MessageRouter};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub hub: Hub,
    pub router: MessageRouter,
    pub gateway: GatewayConfig,
}

impl AppStateInner {
    /// Wire the core around an opened database. Must run inside a Tokio
    /// runtime because it starts the hub task.
    pub fn new(db: Arc<Database>, jwt_secret: String, gateway: GatewayConfig) -> Self {
        let hub = Hub::spawn();
        let router = MessageRouter::new(hub.clone(), db.clone(), db.clone());
        Self {
            db,
            jwt_secret,
            hub,
            router,
            gateway,
        }
    }
}

/// Run blocking DB work off the async runtime.
pub(crate) async fn with_db<F, T>(state: &AppState, f: F) -> Result<T, StatusCode>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("database error: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}
