use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChatMessage, ChatSession, MessageContext, Usage, User};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    /// Token id, used to revoke a single token on logout.
    pub jti: Uuid,
    pub exp: usize,
}

// -- Errors --

/// Body of every non-2xx response from the v2 API.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AckResponse {
    pub success: bool,
    pub message: String,
}

// -- Model proxy --

/// Body of the legacy `/chat/create` route. Every field is optional.
#[derive(Debug, Default, Deserialize)]
pub struct CreateChatRequest {
    #[serde(default)]
    pub prompt: Option<String>,
}

// -- Auth --

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleLoginRequest {
    pub google_id: String,
    pub email: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub success: bool,
    pub token: String,
    pub user: User,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProfileResponse {
    pub success: bool,
    pub user: User,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

// -- Chat sessions --

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionsResponse {
    pub success: bool,
    pub sessions: Vec<ChatSession>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub session_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub success: bool,
    pub session_id: String,
    pub messages: Vec<ChatMessage>,
}

/// HTTP fallback for `send-message` when no WebSocket is available.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, rename = "max_tokens", skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    pub success: bool,
    pub message: String,
    pub session_id: String,
    pub context: MessageContext,
    pub usage: Usage,
}
