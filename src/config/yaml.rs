use serde::Deserialize;
use std::path::PathBuf;

use super::ServerConfig;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present in
/// the file override the environment.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 8000
///   cors_allowed_origins: "*"
///
/// upstream:
///   url: "wss://api.x.ai/v1/realtime"
///   client_secrets_url: "https://api.x.ai/v1/realtime/client_secrets"
///   api_key: "xai-..."
///
/// credentials:
///   url: "http://localhost:8000/session"
///   token_ttl_seconds: 300
///   timeout_ms: 5000
///
/// session:
///   default_voice: "Ara"
///
/// audio:
///   sample_rate: 24000
///   chunk_frames: 1024
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub upstream: Option<UpstreamYaml>,
    pub credentials: Option<CredentialsYaml>,
    pub session: Option<SessionYaml>,
    pub audio: Option<AudioYaml>,
}

/// Listener configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub cors_allowed_origins: Option<String>,
}

/// Upstream endpoint configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct UpstreamYaml {
    pub url: Option<String>,
    pub client_secrets_url: Option<String>,
    pub api_key: Option<String>,
}

/// Short-lived credential configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CredentialsYaml {
    pub url: Option<String>,
    pub token_ttl_seconds: Option<u64>,
    pub timeout_ms: Option<u64>,
}

/// Session defaults from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub default_voice: Option<String>,
}

/// Audio capture configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioYaml {
    pub sample_rate: Option<u32>,
    pub chunk_frames: Option<usize>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }

    /// Overlay the values present in this file onto `config`.
    pub fn apply_to(&self, config: &mut ServerConfig) {
        if let Some(server) = &self.server {
            if let Some(host) = &server.host {
                config.host = host.clone();
            }
            if let Some(port) = server.port {
                config.port = port;
            }
            if let Some(origins) = &server.cors_allowed_origins {
                config.cors_allowed_origins = Some(origins.clone());
            }
        }

        if let Some(upstream) = &self.upstream {
            if let Some(url) = &upstream.url {
                config.upstream_url = url.clone();
            }
            if let Some(url) = &upstream.client_secrets_url {
                config.client_secrets_url = url.clone();
            }
            if let Some(key) = &upstream.api_key {
                config.api_key = Some(key.clone());
            }
        }

        if let Some(credentials) = &self.credentials {
            if let Some(url) = &credentials.url {
                config.credential_url = url.clone();
            }
            if let Some(ttl) = credentials.token_ttl_seconds {
                config.token_ttl_seconds = ttl;
            }
            if let Some(timeout) = credentials.timeout_ms {
                config.credential_timeout_ms = timeout;
            }
        }

        if let Some(voice) = self.session.as_ref().and_then(|s| s.default_voice.clone()) {
            config.default_voice = voice;
        }

        if let Some(audio) = &self.audio {
            if let Some(rate) = audio.sample_rate {
                config.sample_rate = rate;
            }
            if let Some(frames) = audio.chunk_frames {
                config.chunk_frames = frames;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 8080
  cors_allowed_origins: "*"

upstream:
  url: "wss://realtime.example.com/v1/realtime"
  client_secrets_url: "https://realtime.example.com/v1/realtime/client_secrets"
  api_key: "yaml-key"

credentials:
  url: "http://relay.local:8080/session"
  token_ttl_seconds: 120
  timeout_ms: 1500

session:
  default_voice: "Eve"

audio:
  sample_rate: 16000
  chunk_frames: 512
"#;
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        fs::write(&path, yaml).unwrap();

        let yaml_config = YamlConfig::from_file(&path).unwrap();
        let mut config = ServerConfig::default();
        yaml_config.apply_to(&mut config);

        assert_eq!(config.address(), "127.0.0.1:8080");
        assert_eq!(config.upstream_url, "wss://realtime.example.com/v1/realtime");
        assert_eq!(config.api_key.as_deref(), Some("yaml-key"));
        assert_eq!(config.credential_url, "http://relay.local:8080/session");
        assert_eq!(config.token_ttl_seconds, 120);
        assert_eq!(config.credential_timeout_ms, 1500);
        assert_eq!(config.default_voice, "Eve");
        assert_eq!(config.sample_rate, 16000);
        assert_eq!(config.chunk_frames, 512);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_partial_keeps_base_values() {
        let yaml = r#"
server:
  port: 9100
"#;
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("partial.yaml");
        fs::write(&path, yaml).unwrap();

        let yaml_config = YamlConfig::from_file(&path).unwrap();
        let mut config = ServerConfig::default();
        config.api_key = Some("env-key".to_string());
        yaml_config.apply_to(&mut config);

        assert_eq!(config.port, 9100);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.api_key.as_deref(), Some("env-key"));
    }

    #[test]
    fn test_yaml_missing_file() {
        let result = YamlConfig::from_file(&PathBuf::from("/nonexistent/relay.yaml"));
        assert!(result.unwrap_err().to_string().contains("Failed to read"));
    }

    #[test]
    fn test_yaml_malformed() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.yaml");
        fs::write(&path, "server: [unclosed").unwrap();

        let result = YamlConfig::from_file(&path);
        assert!(result.unwrap_err().to_string().contains("Failed to parse"));
    }
}
