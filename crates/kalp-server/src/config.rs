use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};

use kalp_provider::DEFAULT_MODEL;

pub const DEV_JWT_SECRET: &str = "dev-secret-change-me";
pub const DEFAULT_MODEL_URL: &str = "http://localhost:11434/api/generate";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub model_url: String,
    pub model_name: String,
    /// Prior messages sent back to the model as context.
    pub context_messages: usize,
    /// Prompts per user per calendar month. `None` is unlimited.
    pub monthly_message_limit: Option<u64>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let port = get("KALP_PORT", "3000")
            .parse()
            .context("KALP_PORT must be a port number")?;
        let context_messages = get("KALP_CONTEXT_MESSAGES", "10")
            .parse()
            .context("KALP_CONTEXT_MESSAGES must be a number")?;
        let monthly_message_limit = lookup("KALP_MONTHLY_MESSAGE_LIMIT")
            .filter(|v| !v.trim().is_empty())
            .map(|v| v.parse())
            .transpose()
            .context("KALP_MONTHLY_MESSAGE_LIMIT must be a number")?;

        Ok(Self {
            host: get("KALP_HOST", "0.0.0.0"),
            port,
            jwt_secret: get("KALP_JWT_SECRET", DEV_JWT_SECRET),
            db_path: get("KALP_DB_PATH", "kalp.db").into(),
            model_url: get("KALP_MODEL_URL", DEFAULT_MODEL_URL),
            model_name: get("KALP_MODEL_NAME", DEFAULT_MODEL),
            context_messages,
            monthly_message_limit,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret.is_empty() || self.jwt_secret == DEV_JWT_SECRET
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<ServerConfig> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[]).unwrap();
        assert_eq!(c.port, 3000);
        assert_eq!(c.model_url, DEFAULT_MODEL_URL);
        assert_eq!(c.model_name, "llama3.1");
        assert_eq!(c.context_messages, 10);
        assert_eq!(c.monthly_message_limit, None);
        assert!(c.uses_dev_secret());
        assert_eq!(c.addr().unwrap().to_string(), "0.0.0.0:3000");
    }

    #[test]
    fn test_overrides() {
        let c = config(&[
            ("KALP_PORT", "8080"),
            ("KALP_JWT_SECRET", "s3cret"),
            ("KALP_MONTHLY_MESSAGE_LIMIT", "100"),
            ("KALP_MODEL_URL", "http://gpu-box:11434/api/generate"),
        ])
        .unwrap();
        assert_eq!(c.port, 8080);
        assert_eq!(c.monthly_message_limit, Some(100));
        assert_eq!(c.model_url, "http://gpu-box:11434/api/generate");
        assert!(!c.uses_dev_secret());
    }

    #[test]
    fn test_bad_numbers_rejected() {
        assert!(config(&[("KALP_PORT", "http")]).is_err());
        assert!(config(&[("KALP_MONTHLY_MESSAGE_LIMIT", "lots")]).is_err());
    }
}
