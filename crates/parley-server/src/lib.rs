//! Process wiring: configuration, route table and the authenticated
//! WebSocket upgrade.

pub mod config;
pub mod gateway;
pub mod routes;

pub use config::ServerConfig;
pub use routes::build_router;
