use recon_core::config::Env;
use recon_core::error::CoreError;

/// HTTP server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// When set, submissions must carry a matching `X-API-Key` header.
    pub api_key: Option<String>,
}

impl ServerConfig {
    /// | Env Var                | Default   |
    /// |------------------------|-----------|
    /// | `HOST`                 | `0.0.0.0` |
    /// | `PORT`                 | `8000`    |
    /// | `REQUEST_TIMEOUT_SECS` | `30`      |
    /// | `API_KEY`              | unset     |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let env = Env(&lookup);
        Ok(Self {
            host: env.string("HOST", "0.0.0.0"),
            port: env.parse("PORT", 8000)?,
            request_timeout_secs: env.parse("REQUEST_TIMEOUT_SECS", 30)?,
            api_key: env.optional("API_KEY"),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<ServerConfig, CoreError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8000);
        assert_eq!(config.request_timeout_secs, 30);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn blank_api_key_is_disabled() {
        let config = load(&[("API_KEY", "  "), ("PORT", "9001")]).unwrap();
        assert!(config.api_key.is_none());
        assert_eq!(config.port, 9001);
    }

    #[test]
    fn invalid_port_is_rejected() {
        assert_matches!(load(&[("PORT", "eighty")]), Err(CoreError::Config(msg)) if msg.contains("PORT"));
    }
}
