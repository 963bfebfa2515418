//! Real-time delivery core: the connection registry ([`hub::Hub`]), the
//! per-connection pump pair, and the router that turns inbound frames into
//! stored messages and outbound envelopes.

pub mod codec;
pub mod config;
pub mod connection;
pub mod hub;
pub mod presence;
pub mod router;
pub mod store;

pub use codec::Frame;
pub use config::GatewayConfig;
pub use connection::{Connection, ConnectionKey};
pub use hub::{Delivery, Hub};
pub use router::{MessageRouter, SendError};
pub use store::{MessageStore, StoreError, UserDirectory};
