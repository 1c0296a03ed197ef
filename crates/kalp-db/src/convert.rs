//! Row -> API model conversion. Corrupt columns are logged and replaced with
//! defaults rather than failing the whole request.

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::warn;
use uuid::Uuid;

use kalp_types::models::{ChatMessage, ChatSession, MessageContext, Role, User};

use crate::models::{MessageRow, SessionRow, UserRow};

/// Canonical timestamp encoding. Fixed width, so string comparison in SQL
/// orders the same as time.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>().unwrap_or_else(|e| {
        warn!("Corrupt timestamp '{}': {}", raw, e);
        DateTime::default()
    })
}

impl UserRow {
    pub fn to_user(&self) -> User {
        User {
            id: self.id.parse().unwrap_or_else(|e| {
                warn!("Corrupt user id '{}': {}", self.id, e);
                Uuid::default()
            }),
            username: self.username.clone(),
            display_name: self.display_name.clone(),
            email: self.email.clone(),
            avatar: self.avatar.clone(),
            created_at: parse_timestamp(&self.created_at),
        }
    }
}

impl MessageRow {
    pub fn to_message(&self) -> ChatMessage {
        let role = Role::parse(&self.role).unwrap_or_else(|| {
            warn!("Corrupt role '{}' on message {}", self.role, self.id);
            Role::Ai
        });

        let context = self.context.as_deref().and_then(|raw| {
            serde_json::from_str::<MessageContext>(raw)
                .map_err(|e| warn!("Corrupt context on message {}: {}", self.id, e))
                .ok()
        });

        ChatMessage {
            role,
            message: self.content.clone(),
            timestamp: parse_timestamp(&self.created_at),
            is_error: self.is_error,
            context,
        }
    }
}

impl SessionRow {
    pub fn to_session(&self, messages: &[MessageRow]) -> ChatSession {
        ChatSession {
            session_id: self.id.clone(),
            user_id: self.user_id.parse().unwrap_or_else(|e| {
                warn!("Corrupt user_id '{}' on session '{}': {}", self.user_id, self.id, e);
                Uuid::default()
            }),
            title: self.title.clone(),
            messages: messages.iter().map(MessageRow::to_message).collect(),
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
        }
    }
}
