use std::sync::Arc;

use kalp_db::Database;
use kalp_gateway::Gateway;
use kalp_gateway::dispatcher::Dispatcher;
use kalp_gateway::relay::Relay;
use kalp_gateway::tokens::TokenAuthority;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub tokens: TokenAuthority,
    pub relay: Arc<Relay>,
    pub dispatcher: Dispatcher,
}

impl AppStateInner {
    /// The slice of state handed to WebSocket connections.
    pub fn gateway(&self) -> Gateway {
        Gateway {
            dispatcher: self.dispatcher.clone(),
            relay: self.relay.clone(),
            tokens: self.tokens.clone(),
        }
    }
}
