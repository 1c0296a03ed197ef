pub mod connection;
pub mod context;
pub mod dispatcher;
pub mod relay;
pub mod tokens;

use std::sync::Arc;

use crate::dispatcher::Dispatcher;
use crate::relay::Relay;
use crate::tokens::TokenAuthority;

/// Everything a WebSocket connection needs, cloned into each connection task.
#[derive(Clone)]
pub struct Gateway {
    pub dispatcher: Dispatcher,
    pub relay: Arc<Relay>,
    pub tokens: TokenAuthority,
}
