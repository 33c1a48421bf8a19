//! Configuration module for the voice relay
//!
//! Configuration comes from environment variables (a `.env` file is loaded in
//! `main.rs` before anything else) and can be overridden by a YAML file.
//! Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Example
//! ```rust,no_run
//! use voice_relay::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config = ServerConfig::from_file(&PathBuf::from("config.yaml"))?;
//!
//! println!("Relay listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::core::realtime::Voice;

mod yaml;

pub use yaml::YamlConfig;

/// Default upstream realtime WebSocket endpoint.
pub const DEFAULT_UPSTREAM_URL: &str = "wss://api.x.ai/v1/realtime";

/// Default upstream endpoint that mints short-lived client secrets.
pub const DEFAULT_CLIENT_SECRETS_URL: &str = "https://api.x.ai/v1/realtime/client_secrets";

/// Default trusted endpoint a talking client asks for a short-lived token.
pub const DEFAULT_CREDENTIAL_URL: &str = "http://localhost:8000/session";

/// Server and client configuration
///
/// Holds everything both participants need:
/// - Listener settings for the relay (host, port, CORS)
/// - Upstream endpoints (realtime socket, client-secret minting)
/// - The long-lived API key used as fallback credential
/// - Audio capture parameters for the talking client
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // Upstream endpoints
    pub upstream_url: String,
    pub client_secrets_url: String,
    /// Trusted intermediary the talking client requests short-lived tokens from
    pub credential_url: String,

    /// Long-lived upstream API key (XAI_API_KEY)
    pub api_key: Option<String>,
    /// Lifetime hint sent when minting short-lived tokens
    pub token_ttl_seconds: u64,
    /// Bound on the short-lived token request
    pub credential_timeout_ms: u64,

    // Session defaults
    pub default_voice: String,

    // Audio settings
    pub sample_rate: u32,
    /// Frames (16-bit mono samples) per captured chunk
    pub chunk_frames: usize,

    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (same-origin only)
    pub cors_allowed_origins: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            client_secrets_url: DEFAULT_CLIENT_SECRETS_URL.to_string(),
            credential_url: DEFAULT_CREDENTIAL_URL.to_string(),
            api_key: None,
            token_ttl_seconds: 300,
            credential_timeout_ms: 5000,
            default_voice: Voice::default().to_string(),
            sample_rate: 24000,
            chunk_frames: 1024,
            cors_allowed_origins: None,
        }
    }
}

/// Implement Drop to zeroize the API key when ServerConfig is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.api_key {
            key.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if a variable has an invalid format or validation fails.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables
    /// 3. Default values
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = YamlConfig::from_file(path)?;
        let mut config = Self::from_lookup(|key| std::env::var(key).ok())?;
        yaml_config.apply_to(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from an arbitrary variable lookup.
    ///
    /// Values that are absent or empty keep their defaults. No validation is
    /// performed here.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Box<dyn std::error::Error>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(host) = get("HOST") {
            config.host = host;
        }
        if let Some(port) = get("PORT") {
            config.port = port
                .parse()
                .map_err(|e| format!("Invalid PORT '{port}': {e}"))?;
        }
        if let Some(url) = get("UPSTREAM_URL") {
            config.upstream_url = url;
        }
        if let Some(url) = get("CLIENT_SECRETS_URL") {
            config.client_secrets_url = url;
        }
        if let Some(url) = get("CREDENTIAL_URL") {
            config.credential_url = url;
        }
        config.api_key = get("XAI_API_KEY");
        if let Some(ttl) = get("TOKEN_TTL_SECONDS") {
            config.token_ttl_seconds = ttl
                .parse()
                .map_err(|e| format!("Invalid TOKEN_TTL_SECONDS '{ttl}': {e}"))?;
        }
        if let Some(timeout) = get("CREDENTIAL_TIMEOUT_MS") {
            config.credential_timeout_ms = timeout
                .parse()
                .map_err(|e| format!("Invalid CREDENTIAL_TIMEOUT_MS '{timeout}': {e}"))?;
        }
        if let Some(voice) = get("DEFAULT_VOICE") {
            config.default_voice = voice;
        }
        if let Some(rate) = get("SAMPLE_RATE") {
            config.sample_rate = rate
                .parse()
                .map_err(|e| format!("Invalid SAMPLE_RATE '{rate}': {e}"))?;
        }
        if let Some(frames) = get("CHUNK_FRAMES") {
            config.chunk_frames = frames
                .parse()
                .map_err(|e| format!("Invalid CHUNK_FRAMES '{frames}': {e}"))?;
        }
        config.cors_allowed_origins = get("CORS_ALLOWED_ORIGINS");

        Ok(config)
    }

    /// Validate the final configuration.
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.port == 0 {
            return Err("PORT must be non-zero".into());
        }
        validate_url("UPSTREAM_URL", &self.upstream_url, &["ws", "wss"])?;
        validate_url("CLIENT_SECRETS_URL", &self.client_secrets_url, &["http", "https"])?;
        validate_url("CREDENTIAL_URL", &self.credential_url, &["http", "https"])?;
        if self.default_voice.parse::<Voice>().is_err() {
            return Err(format!(
                "DEFAULT_VOICE '{}' is not one of {}",
                self.default_voice,
                Voice::names().join(", ")
            )
            .into());
        }
        if self.sample_rate == 0 {
            return Err("SAMPLE_RATE must be greater than zero".into());
        }
        if self.chunk_frames == 0 {
            return Err("CHUNK_FRAMES must be greater than zero".into());
        }
        Ok(())
    }

    /// Get the server address as a string
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Bound on the short-lived token request.
    pub fn credential_timeout(&self) -> Duration {
        Duration::from_millis(self.credential_timeout_ms)
    }

    /// The configured default voice, falling back to the first preset.
    pub fn default_voice(&self) -> Voice {
        self.default_voice.parse().unwrap_or_default()
    }
}

fn validate_url(name: &str, value: &str, schemes: &[&str]) -> Result<(), Box<dyn std::error::Error>> {
    let url = Url::parse(value).map_err(|e| format!("Invalid {name} '{value}': {e}"))?;
    if !schemes.contains(&url.scheme()) {
        return Err(format!(
            "{name} must use one of the schemes {}, got '{}'",
            schemes.join("/"),
            url.scheme()
        )
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.address(), "0.0.0.0:8000");
        assert_eq!(config.upstream_url, DEFAULT_UPSTREAM_URL);
        assert_eq!(config.token_ttl_seconds, 300);
        assert_eq!(config.default_voice(), Voice::Ara);
        assert_eq!(config.chunk_frames, 1024);
        assert!(config.api_key.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "9001"),
            ("XAI_API_KEY", "xai-secret"),
            ("DEFAULT_VOICE", "Rex"),
            ("CREDENTIAL_TIMEOUT_MS", "250"),
            ("CORS_ALLOWED_ORIGINS", "*"),
        ]))
        .unwrap();

        assert_eq!(config.address(), "127.0.0.1:9001");
        assert_eq!(config.api_key.as_deref(), Some("xai-secret"));
        assert_eq!(config.default_voice(), Voice::Rex);
        assert_eq!(config.credential_timeout(), Duration::from_millis(250));
        assert_eq!(config.cors_allowed_origins.as_deref(), Some("*"));
    }

    #[test]
    fn test_empty_values_keep_defaults() {
        let config =
            ServerConfig::from_lookup(lookup_from(&[("XAI_API_KEY", "  "), ("PORT", "")])).unwrap();
        assert!(config.api_key.is_none());
        assert_eq!(config.port, 8000);
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        let result = ServerConfig::from_lookup(lookup_from(&[("PORT", "not-a-port")]));
        assert!(result.unwrap_err().to_string().contains("Invalid PORT"));
    }

    #[test]
    fn test_validate_rejects_bad_voice() {
        let mut config = ServerConfig::default();
        config.default_voice = "Alloy".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("DEFAULT_VOICE"));
    }

    #[test]
    fn test_validate_rejects_wrong_scheme() {
        let mut config = ServerConfig::default();
        config.upstream_url = "https://api.x.ai/v1/realtime".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("UPSTREAM_URL"));
    }

    #[test]
    fn test_validate_rejects_zero_chunk() {
        let mut config = ServerConfig::default();
        config.chunk_frames = 0;
        assert!(config.validate().is_err());
    }
}
