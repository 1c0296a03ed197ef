pub const DEFAULT_API_BASE: &str = "http://localhost:5000";
pub const DEFAULT_WEBSOCKET_URL: &str = "ws://localhost:5000/socket";

/// Endpoint paths, each overridable from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoints {
    pub auth_profile: String,
    pub auth_register: String,
    pub auth_login: String,
    pub auth_google: String,
    pub auth_logout: String,
    pub chat_sessions: String,
    pub chat_history: String,
    pub chat_session: String,
    pub chat_send: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub api_base: String,
    pub websocket_url: String,
    pub endpoints: Endpoints,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Self {
            api_base: get("KALP_API_URL", DEFAULT_API_BASE),
            websocket_url: get("KALP_WEBSOCKET_URL", DEFAULT_WEBSOCKET_URL),
            endpoints: Endpoints {
                auth_profile: get("KALP_AUTH_PROFILE_ENDPOINT", "/api/v2/auth/profile"),
                auth_register: get("KALP_AUTH_REGISTER_ENDPOINT", "/api/v2/auth/register"),
                auth_login: get("KALP_AUTH_LOGIN_ENDPOINT", "/api/v2/auth/login"),
                auth_google: get("KALP_AUTH_GOOGLE_ENDPOINT", "/api/v2/auth/google"),
                auth_logout: get("KALP_AUTH_LOGOUT_ENDPOINT", "/api/v2/auth/logout"),
                chat_sessions: get("KALP_CHAT_SESSIONS_ENDPOINT", "/api/v2/chat/sessions"),
                chat_history: get("KALP_CHAT_HISTORY_ENDPOINT", "/api/v2/chat/history"),
                chat_session: get("KALP_CHAT_SESSION_ENDPOINT", "/api/v2/chat/session"),
                chat_send: get("KALP_CHAT_SEND_ENDPOINT", "/api/v2/chat/send"),
            },
        }
    }

    /// Point both the REST base and the WebSocket URL at one server.
    pub fn for_server(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        let ws = match base.split_once("://") {
            Some(("https", rest)) => format!("wss://{}/socket", rest),
            Some((_, rest)) => format!("ws://{}/socket", rest),
            None => format!("ws://{}/socket", base),
        };
        Self {
            api_base: base.to_string(),
            websocket_url: ws,
            ..Self::default()
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base.trim_end_matches('/'), path)
    }
}
