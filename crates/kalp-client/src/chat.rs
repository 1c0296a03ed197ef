use std::sync::Arc;

use kalp_types::api::{AckResponse, HistoryResponse, SendRequest, SendResponse, SessionsResponse};

use crate::config::ClientConfig;
use crate::error::{ClientError, read_json};

/// Bearer-authenticated calls against the chat session endpoints.
pub struct ChatClient {
    http: reqwest::Client,
    config: Arc<ClientConfig>,
    token: String,
}

impl ChatClient {
    pub fn new(config: Arc<ClientConfig>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            token: token.into(),
        }
    }

    pub async fn sessions(&self) -> Result<SessionsResponse, ClientError> {
        let response = self
            .http
            .get(self.config.url(&self.config.endpoints.chat_sessions))
            .bearer_auth(&self.token)
            .send()
            .await?;
        read_json(response, "Failed to load sessions").await
    }

    pub async fn history(&self, session_id: &str) -> Result<HistoryResponse, ClientError> {
        let response = self
            .http
            .get(self.config.url(&self.config.endpoints.chat_history))
            .query(&[("sessionId", session_id)])
            .bearer_auth(&self.token)
            .send()
            .await?;
        read_json(response, "Failed to load session").await
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<AckResponse, ClientError> {
        let path = format!("{}/{}", self.config.endpoints.chat_session, session_id);
        let response = self
            .http
            .delete(self.config.url(&path))
            .bearer_auth(&self.token)
            .send()
            .await?;
        read_json(response, "Failed to delete session").await
    }

    /// HTTP fallback for sending a prompt when no WebSocket is connected.
    pub async fn send(&self, request: &SendRequest) -> Result<SendResponse, ClientError> {
        let response = self
            .http
            .post(self.config.url(&self.config.endpoints.chat_send))
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await?;
        read_json(response, "Sorry, I encountered an error. Please try again.").await
    }
}
