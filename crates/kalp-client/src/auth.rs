use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use kalp_types::api::{
    AuthResponse, GoogleLoginRequest, LoginRequest, ProfileResponse, RegisterRequest,
    UpdateProfileRequest,
};
use kalp_types::models::User;

use crate::config::ClientConfig;
use crate::error::{ClientError, read_json};
use crate::token_store::TokenStore;

/// What the rest of an application needs to know about the signed-in user.
#[derive(Debug, Clone, Default)]
pub struct AuthState {
    pub user: Option<User>,
    pub token: Option<String>,
    /// True until `restore` has settled whether the stored token is usable.
    pub loading: bool,
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

/// Payload fields of a Google ID-token credential.
#[derive(Debug, Deserialize)]
struct GoogleIdClaims {
    sub: String,
    email: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    picture: Option<String>,
}

pub struct AuthClient {
    http: reqwest::Client,
    config: Arc<ClientConfig>,
    store: Box<dyn TokenStore>,
    state: watch::Sender<AuthState>,
}

impl AuthClient {
    pub fn new(config: Arc<ClientConfig>, store: Box<dyn TokenStore>) -> Result<Self, ClientError> {
        let token = store.load()?;
        let (state, _) = watch::channel(AuthState {
            user: None,
            token,
            loading: true,
        });

        Ok(Self {
            http: reqwest::Client::new(),
            config,
            store,
            state,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn current_user(&self) -> Option<User> {
        self.state.borrow().user.clone()
    }

    pub fn token(&self) -> Option<String> {
        self.state.borrow().token.clone()
    }

    /// Validate the stored token by fetching the profile. Any failure drops
    /// the token.
    pub async fn restore(&self) -> Option<User> {
        let Some(token) = self.token() else {
            self.state.send_modify(|s| s.loading = false);
            return None;
        };

        match self.fetch_profile(&token).await {
            Ok(profile) => {
                let user = profile.user;
                self.state.send_modify(|s| {
                    s.user = Some(user.clone());
                    s.loading = false;
                });
                Some(user)
            }
            Err(e) => {
                warn!("Stored token rejected: {}", e);
                self.forget();
                self.state.send_modify(|s| s.loading = false);
                None
            }
        }
    }

    async fn fetch_profile(&self, token: &str) -> Result<ProfileResponse, ClientError> {
        let response = self
            .http
            .get(self.config.url(&self.config.endpoints.auth_profile))
            .bearer_auth(token)
            .send()
            .await?;
        read_json(response, "Failed to fetch profile").await
    }

    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
        confirm_password: &str,
    ) -> Result<AuthResponse, ClientError> {
        let body = RegisterRequest {
            username: name.to_string(),
            display_name: Some(name.to_string()),
            email: email.to_string(),
            password: password.to_string(),
            confirm_password: confirm_password.to_string(),
        };
        let response = self
            .http
            .post(self.config.url(&self.config.endpoints.auth_register))
            .json(&body)
            .send()
            .await?;

        let auth = read_json::<AuthResponse>(response, "Registration failed").await?;
        self.accept(&auth)?;
        Ok(auth)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ClientError> {
        debug!("Login attempt for {} against {}", email, self.config.api_base);
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let response = self
            .http
            .post(self.config.url(&self.config.endpoints.auth_login))
            .json(&body)
            .send()
            .await?;

        let auth = read_json::<AuthResponse>(response, "Login failed").await?;
        self.accept(&auth)?;
        Ok(auth)
    }

    /// Sign in with the `credential` string returned by Google Identity
    /// Services. Its payload is read, not verified; the server decides.
    pub async fn google_login(&self, credential: &str) -> Result<AuthResponse, ClientError> {
        let claims = decode_google_credential(credential)?;
        let body = GoogleLoginRequest {
            google_id: claims.sub,
            email: claims.email,
            display_name: claims.name,
            avatar: claims.picture,
        };
        let response = self
            .http
            .post(self.config.url(&self.config.endpoints.auth_google))
            .json(&body)
            .send()
            .await?;

        let auth = read_json::<AuthResponse>(response, "Google authentication failed").await?;
        self.accept(&auth)?;
        Ok(auth)
    }

    /// Tell the server (best effort), then always clear local state.
    pub async fn logout(&self) {
        if let Some(token) = self.token() {
            let result = self
                .http
                .post(self.config.url(&self.config.endpoints.auth_logout))
                .bearer_auth(&token)
                .send()
                .await;
            if let Err(e) = result {
                warn!("Logout API call failed: {}", e);
            }
        }
        self.forget();
    }

    pub async fn update_profile(
        &self,
        updates: &UpdateProfileRequest,
    ) -> Result<ProfileResponse, ClientError> {
        let token = self.token().ok_or(ClientError::NotAuthenticated)?;
        let response = self
            .http
            .put(self.config.url(&self.config.endpoints.auth_profile))
            .bearer_auth(&token)
            .json(updates)
            .send()
            .await?;

        let profile = read_json::<ProfileResponse>(response, "Profile update failed").await?;
        let user = profile.user.clone();
        self.state.send_modify(|s| s.user = Some(user));
        Ok(profile)
    }

    fn accept(&self, auth: &AuthResponse) -> Result<(), ClientError> {
        self.store.save(&auth.token)?;
        self.state.send_modify(|s| {
            s.token = Some(auth.token.clone());
            s.user = Some(auth.user.clone());
            s.loading = false;
        });
        Ok(())
    }

    fn forget(&self) {
        if let Err(e) = self.store.clear() {
            warn!("Failed to clear stored token: {}", e);
        }
        self.state.send_modify(|s| {
            s.token = None;
            s.user = None;
        });
    }
}

fn decode_google_credential(credential: &str) -> Result<GoogleIdClaims, ClientError> {
    let payload = credential.split('.').nth(1).ok_or(ClientError::InvalidCredential)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| ClientError::InvalidCredential)?;
    serde_json::from_slice(&bytes).map_err(|_| ClientError::InvalidCredential)
}

#[cfg(test)]
mod tests {
    use axum::{Json, Router, http::StatusCode, routing::{get, post}};
    use serde_json::json;

    use super::*;
    use crate::token_store::MemoryTokenStore;

    fn user_json() -> serde_json::Value {
        json!({
            "_id": "6f1b7c1e-4c1b-4a4e-9a55-0c8f3bb4a001",
            "username": "ada",
            "displayName": "Ada",
            "email": "ada@example.com",
            "createdAt": "2026-01-01T00:00:00Z"
        })
    }

    async fn fake_server() -> Arc<ClientConfig> {
        let app = Router::new()
            .route(
                "/api/v2/auth/login",
                post(|Json(body): Json<serde_json::Value>| async move {
                    if body["password"] == "right" {
                        (StatusCode::OK, Json(json!({ "success": true, "token": "tok-1", "user": user_json() })))
                    } else {
                        (
                            StatusCode::UNAUTHORIZED,
                            Json(json!({ "success": false, "message": "Invalid email or password" })),
                        )
                    }
                }),
            )
            .route(
                "/api/v2/auth/profile",
                get(|headers: axum::http::HeaderMap| async move {
                    let ok = headers
                        .get("authorization")
                        .is_some_and(|v| v == "Bearer tok-1");
                    if ok {
                        (StatusCode::OK, Json(json!({ "success": true, "user": user_json() })))
                    } else {
                        (StatusCode::UNAUTHORIZED, Json(json!({ "success": false, "message": "nope" })))
                    }
                }),
            )
            .route(
                "/api/v2/auth/register",
                post(|| async { (StatusCode::BAD_GATEWAY, "<html>proxy error</html>") }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        Arc::new(ClientConfig::for_server(&format!("http://{}", addr)))
    }

    #[tokio::test]
    async fn test_failed_login_surfaces_message_and_keeps_no_token() {
        let config = fake_server().await;
        let client = AuthClient::new(config, Box::new(MemoryTokenStore::new())).unwrap();

        match client.login("ada@example.com", "wrong").await {
            Err(ClientError::Server { status, message }) => {
                assert_eq!(status, 401);
                assert_eq!(message, "Invalid email or password");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(client.token().is_none());
        assert!(!client.snapshot().is_authenticated());
    }

    #[tokio::test]
    async fn test_login_persists_token_and_user() {
        let config = fake_server().await;
        let client = AuthClient::new(config, Box::new(MemoryTokenStore::new())).unwrap();
        let mut rx = client.subscribe();

        let auth = client.login("ada@example.com", "right").await.unwrap();
        assert_eq!(auth.token, "tok-1");
        assert_eq!(client.token().as_deref(), Some("tok-1"));

        assert!(rx.has_changed().unwrap());
        let state = rx.borrow_and_update().clone();
        assert!(state.is_authenticated());
        assert!(!state.loading);
        assert_eq!(state.user.unwrap().display_name, "Ada");
    }

    #[tokio::test]
    async fn test_fallback_message_for_non_json_error() {
        let config = fake_server().await;
        let client = AuthClient::new(config, Box::new(MemoryTokenStore::new())).unwrap();
        match client.register("ada", "ada@example.com", "pw123456", "pw123456").await {
            Err(ClientError::Server { status, message }) => {
                assert_eq!(status, 502);
                assert_eq!(message, "Registration failed");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_restore_keeps_valid_and_drops_invalid_token() {
        let config = fake_server().await;

        let good = AuthClient::new(config.clone(), Box::new(MemoryTokenStore::with_token("tok-1"))).unwrap();
        assert!(good.snapshot().loading);
        assert!(good.restore().await.is_some());
        assert!(!good.snapshot().loading);
        assert!(good.snapshot().is_authenticated());

        let bad = AuthClient::new(config, Box::new(MemoryTokenStore::with_token("stale"))).unwrap();
        assert!(bad.restore().await.is_none());
        assert!(bad.token().is_none());
        assert!(!bad.snapshot().loading);
    }

    #[tokio::test]
    async fn test_network_error_propagates() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = Arc::new(ClientConfig::for_server(&format!("http://{}", addr)));
        let client = AuthClient::new(config, Box::new(MemoryTokenStore::new())).unwrap();
        assert!(matches!(
            client.login("a@b.c", "x").await,
            Err(ClientError::Network(_))
        ));
    }

    #[test]
    fn test_decode_google_credential() {
        let payload = URL_SAFE_NO_PAD.encode(
            r#"{"sub":"g-1","email":"ada@example.com","name":"Ada","picture":"https://img"}"#,
        );
        let credential = format!("header.{}.signature", payload);
        let claims = decode_google_credential(&credential).unwrap();
        assert_eq!(claims.sub, "g-1");
        assert_eq!(claims.picture.as_deref(), Some("https://img"));

        assert!(matches!(
            decode_google_credential("garbage"),
            Err(ClientError::InvalidCredential)
        ));
    }
}
