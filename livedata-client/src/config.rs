//! Client configuration.

use std::path::Path;

use serde::Deserialize;

use crate::error::LiveDataError;

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket endpoint of the livedata server
    pub url: String,
    /// Caller identity handed to local method handlers
    pub user_id: Option<String>,
    /// Pause before reconnecting after the channel drops
    pub reconnect_delay_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:3000/livedata".to_string(),
            user_id: None,
            reconnect_delay_ms: 1_000,
        }
    }
}

impl ClientConfig {
    /// Config for tests: given endpoint, no delay.
    pub fn for_testing(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user_id: None,
            reconnect_delay_ms: 0,
        }
    }

    /// Parse a JSON config; missing keys take their defaults.
    pub fn from_json(text: &str) -> Result<Self, LiveDataError> {
        serde_json::from_str(text).map_err(|e| LiveDataError::Config(e.to_string()))
    }

    /// Read and parse a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LiveDataError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| LiveDataError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = ClientConfig::from_json(r#"{"user_id": "u1"}"#).unwrap();
        assert_eq!(config.user_id.as_deref(), Some("u1"));
        assert_eq!(config.url, ClientConfig::default().url);
        assert_eq!(config.reconnect_delay_ms, 1_000);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            ClientConfig::from_json("{"),
            Err(LiveDataError::Config(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(ClientConfig::load("/definitely/not/here.json").is_err());
    }
}
