use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The server answered with a non-2xx status.
    #[error("{message}")]
    Server { status: u16, message: String },

    /// Transport failure, passed through as-is.
    #[error(transparent)]
    Network(#[from] reqwest::Error),

    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("token storage failed: {0}")]
    Storage(#[from] std::io::Error),

    #[error("invalid Google credential")]
    InvalidCredential,

    #[error("not signed in")]
    NotAuthenticated,

    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

#[derive(Deserialize)]
struct ServerMessage {
    message: Option<String>,
}

/// Decode a JSON response, turning a non-2xx status into
/// `ClientError::Server` with the server's `message` or `fallback`.
pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    fallback: &str,
) -> Result<T, ClientError> {
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        let message = serde_json::from_str::<ServerMessage>(&text)
            .ok()
            .and_then(|m| m.message)
            .unwrap_or_else(|| fallback.to_string());
        return Err(ClientError::Server {
            status: status.as_u16(),
            message,
        });
    }

    Ok(serde_json::from_str(&text)?)
}
