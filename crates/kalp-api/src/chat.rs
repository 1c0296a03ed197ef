//! The legacy `/chat/*` surface: one proxying route and three fixed
//! acknowledgements.

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use bytes::Bytes;
use tracing::{debug, error};

use kalp_types::api::CreateChatRequest;

use crate::state::AppState;

/// Prompt used when the request carries none.
pub const DEFAULT_PROMPT: &str = "Why is the sky blue?";

pub async fn welcome() -> &'static str {
    "Welcome to Kalp powered by Helmer!"
}

/// POST /chat/create: forward a prompt to the model endpoint and relay its
/// JSON reply verbatim. Any failure is a bare 500.
pub async fn create_chat(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let prompt = prompt_from_body(&body);
    debug!("Forwarding prompt ({} chars) to {}", prompt.len(), state.relay.model().url());

    match state.relay.model().generate_raw(&prompt).await {
        Ok(value) => Json(value).into_response(),
        Err(e) => {
            error!("Error creating chat: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Error creating chat").into_response()
        }
    }
}

pub async fn delete_chat() -> &'static str {
    "Chat deleted successfully"
}

pub async fn update_chat() -> &'static str {
    "Chat updated successfully"
}

pub async fn get_chat() -> &'static str {
    "Chat retrieved successfully"
}

/// The body is optional and may be anything; only a JSON `prompt` string
/// with content is honoured.
fn prompt_from_body(body: &[u8]) -> String {
    serde_json::from_slice::<CreateChatRequest>(body)
        .ok()
        .and_then(|req| req.prompt)
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_PROMPT.to_string())
}
