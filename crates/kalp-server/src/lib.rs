pub mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use kalp_api::state::{AppState, AppStateInner};
use kalp_db::Database;
use kalp_gateway::connection;
use kalp_gateway::dispatcher::Dispatcher;
use kalp_gateway::relay::Relay;
use kalp_gateway::tokens::TokenAuthority;
use kalp_provider::ModelClient;

use crate::config::ServerConfig;

/// Wire shared state from configuration and an opened database.
pub fn build_state(config: &ServerConfig, db: Database) -> AppState {
    let db = Arc::new(db);
    let model = ModelClient::new(&config.model_url, &config.model_name);

    Arc::new(AppStateInner {
        db: db.clone(),
        tokens: TokenAuthority::new(&config.jwt_secret, db.clone()),
        relay: Arc::new(Relay::new(
            db,
            model,
            config.context_messages,
            config.monthly_message_limit,
        )),
        dispatcher: Dispatcher::new(),
    })
}

pub fn app(state: AppState) -> Router {
    let ws_route = Router::new()
        .route("/socket", get(ws_upgrade))
        .route("/health", get(health))
        .with_state(state.clone());

    Router::new()
        .merge(kalp_api::routes::router(state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let gateway = state.gateway();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, gateway))
}

async fn health() -> &'static str {
    "ok"
}
