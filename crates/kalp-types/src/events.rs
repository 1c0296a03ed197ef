use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::SendResponse;

/// User id reported in `typing` events emitted while the model is generating.
pub const ASSISTANT_TYPING_ID: &str = "assistant";

/// Events sent FROM client TO server over the WebSocket.
///
/// Frames look like `{"event": "join-user", "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// Authenticate the connection. The id is kept as sent so a malformed
    /// one can still be answered with `auth-error`.
    JoinUser { user_id: String, token: String },

    /// Subscribe to a session room
    JoinSession(SessionRef),

    /// Ask the model for a reply within a session
    /// An empty or missing `sessionId` starts a new session.
    SendMessage {
        prompt: String,
        #[serde(default)]
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        temperature: Option<f32>,
        #[serde(default, rename = "max_tokens", skip_serializing_if = "Option::is_none")]
        max_tokens: Option<u32>,
    },

    /// Typing indicator relayed to the other members of the room
    Typing {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        is_typing: bool,
    },
}

/// `join-session` accepts either a bare id or `{ "sessionId": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SessionRef {
    Id(String),
    Object {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
}

impl SessionRef {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Id(id) => id,
            Self::Object { session_id } => session_id,
        }
    }
}

/// Events sent FROM server TO client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// `join-user` succeeded
    UserAuthenticated {
        user_id: Uuid,
        username: String,
        display_name: String,
    },

    /// Authentication failed or is required
    AuthError { message: String },

    /// A model reply for a session
    MessageResponse(SendResponse),

    /// A chat turn failed
    MessageError {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },

    /// Someone in the room (or the assistant) started or stopped typing
    Typing { user_id: String, is_typing: bool },
}

impl ServerEvent {
    pub fn auth_error(message: impl Into<String>) -> Self {
        Self::AuthError { message: message.into() }
    }

    pub fn message_error(error: impl Into<String>, session_id: Option<String>) -> Self {
        Self::MessageError { error: error.into(), session_id }
    }
}
