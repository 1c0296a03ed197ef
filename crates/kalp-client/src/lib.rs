//! Client for the Kalp REST API and WebSocket relay.

pub mod auth;
pub mod chat;
pub mod config;
pub mod error;
pub mod gateway;
pub mod token_store;

pub use auth::{AuthClient, AuthState};
pub use chat::ChatClient;
pub use config::ClientConfig;
pub use error::ClientError;
pub use gateway::GatewayClient;
