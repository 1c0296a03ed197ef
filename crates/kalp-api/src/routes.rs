use axum::{
    Router, middleware,
    routing::{delete, get, post, put},
};

use crate::state::AppState;
use crate::{auth, chat, sessions};

/// Every REST route. The WebSocket upgrade is mounted by the server binary.
pub fn router(state: AppState) -> Router {
    let legacy_routes = Router::new()
        .route("/", get(chat::welcome))
        .route("/chat/create", post(chat::create_chat))
        .route("/chat/delete", delete(chat::delete_chat))
        .route("/chat/update", put(chat::update_chat))
        .route("/chat/get", get(chat::get_chat));

    let public_routes = Router::new()
        .route("/api/v2/auth/register", post(auth::register))
        .route("/api/v2/auth/login", post(auth::login))
        .route("/api/v2/auth/google", post(auth::google_login));

    let protected_routes = Router::new()
        .route("/api/v2/auth/profile", get(auth::get_profile).put(auth::update_profile))
        .route("/api/v2/auth/logout", post(auth::logout))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/v2/chat/sessions", get(sessions::list_sessions))
        .route("/api/v2/chat/history", get(sessions::get_history))
        .route("/api/v2/chat/session/{session_id}", delete(sessions::delete_session))
        .route("/api/v2/chat/send", post(sessions::send_message))
        .layer(middleware::from_fn_with_state(state.clone(), crate::middleware::require_auth));

    Router::new()
        .merge(legacy_routes)
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
