use std::sync::Arc;

use tracing::info;

use parley_api::AppStateInner;
use parley_server::{ServerConfig, build_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,parley_gateway=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;

    // Init database
    let db = Arc::new(parley_db::Database::open(&config.db_path)?);
    info!("database ready at {}", config.db_path.display());

    let state = Arc::new(AppStateInner::new(db, config.jwt_secret.clone(), config.gateway.clone()));
    let app = build_router(state);

    let addr = config.addr()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
