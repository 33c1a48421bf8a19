//! Short-lived credential acquisition for the upstream realtime endpoint.
//!
//! A session is authorized with a bearer credential. The preferred credential
//! is a short-lived token minted by a trusted endpoint; when that path is
//! unavailable (network error, non-success status, malformed body) the
//! statically configured long-lived secret is used instead.
//!
//! Secret values never reach the logs: `Credential` redacts itself in `Debug`
//! and only the acquisition path is reported.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use crate::config::ServerConfig;
use crate::errors::{AppError, AppResult, VoiceError, VoiceResult};

/// Default bound on the short-lived token request.
pub const DEFAULT_CREDENTIAL_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Credential
// =============================================================================

/// Bearer credential for one session establishment attempt.
///
/// Not `Clone`: connecting consumes it, so a failed attempt has to acquire a
/// fresh one.
pub struct Credential {
    secret: String,
    expires_at: Option<OffsetDateTime>,
    is_ephemeral: bool,
}

impl Credential {
    /// Wrap a short-lived token.
    pub fn ephemeral(secret: impl Into<String>, expires_at: Option<OffsetDateTime>) -> Self {
        Self {
            secret: secret.into(),
            expires_at,
            is_ephemeral: true,
        }
    }

    /// Wrap the long-lived static secret.
    pub fn static_secret(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            expires_at: None,
            is_ephemeral: false,
        }
    }

    /// The raw secret value. Never log this.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        self.expires_at
    }

    pub fn is_ephemeral(&self) -> bool {
        self.is_ephemeral
    }

    /// Whether the credential is past its expiry at `now`.
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }

    /// `Authorization` header value for the upstream handshake.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.secret)
    }

    fn path(&self) -> &'static str {
        if self.is_ephemeral { "ephemeral" } else { "static" }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("is_ephemeral", &self.is_ephemeral)
            .finish()
    }
}

impl Drop for Credential {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

// =============================================================================
// Token response parsing
// =============================================================================

/// Pull the token and optional expiry out of a token response body.
///
/// Accepted shapes, checked in order:
/// - `{"client_secret": {"value": "...", "expires_at": 1700000000}}`
/// - `{"value": "...", "expires_at": 1700000000}`
/// - `{"token": "..."}`
pub fn extract_token(body: &Value) -> Option<(String, Option<OffsetDateTime>)> {
    let nested = body.get("client_secret");
    let token = nested
        .and_then(|c| c.get("value"))
        .or_else(|| body.get("value"))
        .or_else(|| body.get("token"))
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())?;

    let expires_at = nested
        .and_then(|c| c.get("expires_at"))
        .or_else(|| body.get("expires_at"))
        .and_then(Value::as_i64)
        .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok());

    Some((token.to_string(), expires_at))
}

// =============================================================================
// Credential sources
// =============================================================================

/// Anything that can hand out a credential for a new session.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Acquire a credential, or fail with `VoiceError::Configuration` when no
    /// usable credential exists at all.
    async fn acquire(&self) -> VoiceResult<Credential>;
}

/// Short-lived token first, static secret as fallback.
pub struct CredentialProvider {
    http: reqwest::Client,
    /// Trusted endpoint that mints short-lived tokens
    endpoint: Option<String>,
    /// Bearer sent to the endpoint (only when it is the upstream minting API)
    endpoint_auth: Option<String>,
    /// Requested token lifetime in seconds
    lifetime_hint: Option<u64>,
    static_secret: Option<String>,
    timeout: Duration,
}

impl CredentialProvider {
    pub fn new(endpoint: Option<String>, static_secret: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            endpoint_auth: None,
            lifetime_hint: None,
            static_secret,
            timeout: DEFAULT_CREDENTIAL_TIMEOUT,
        }
    }

    /// Provider used by a talking client: ask the trusted relay for a token,
    /// fall back to the locally configured API key.
    pub fn for_client(config: &ServerConfig) -> Self {
        Self::new(Some(config.credential_url.clone()), config.api_key.clone())
            .with_timeout(config.credential_timeout())
    }

    /// Provider used by the relay: mint a token from the upstream client-secret
    /// API with the API key, fall back to the API key itself.
    pub fn for_relay(config: &ServerConfig) -> Self {
        let endpoint = config
            .api_key
            .as_ref()
            .map(|_| config.client_secrets_url.clone());
        let provider = Self::new(endpoint, config.api_key.clone())
            .with_timeout(config.credential_timeout())
            .with_lifetime_hint(config.token_ttl_seconds);
        match config.api_key {
            Some(ref key) => provider.with_endpoint_auth(key.clone()),
            None => provider,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_lifetime_hint(mut self, seconds: u64) -> Self {
        self.lifetime_hint = Some(seconds);
        self
    }

    pub fn with_endpoint_auth(mut self, secret: impl Into<String>) -> Self {
        self.endpoint_auth = Some(secret.into());
        self
    }

    async fn request_ephemeral(&self, endpoint: &str) -> Result<Credential, String> {
        let body = match self.lifetime_hint {
            Some(seconds) => json!({ "expires_after": { "seconds": seconds } }),
            None => json!({}),
        };

        let mut request = self.http.post(endpoint).timeout(self.timeout).json(&body);
        if let Some(ref secret) = self.endpoint_auth {
            request = request.bearer_auth(secret);
        }

        let response = request
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("endpoint returned {status}"));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| format!("invalid JSON body: {e}"))?;

        let (token, expires_at) =
            extract_token(&body).ok_or_else(|| "no token field in response".to_string())?;

        let credential = Credential::ephemeral(token, expires_at);
        if credential.is_expired_at(OffsetDateTime::now_utc()) {
            return Err("token already expired".to_string());
        }
        Ok(credential)
    }
}

impl Drop for CredentialProvider {
    fn drop(&mut self) {
        if let Some(ref mut secret) = self.static_secret {
            secret.zeroize();
        }
        if let Some(ref mut secret) = self.endpoint_auth {
            secret.zeroize();
        }
    }
}

#[async_trait]
impl CredentialSource for CredentialProvider {
    async fn acquire(&self) -> VoiceResult<Credential> {
        if let Some(ref endpoint) = self.endpoint {
            match self.request_ephemeral(endpoint).await {
                Ok(credential) => {
                    info!(
                        path = credential.path(),
                        expires_at = ?credential.expires_at(),
                        "Acquired session credential"
                    );
                    return Ok(credential);
                }
                Err(reason) => {
                    warn!(%endpoint, %reason, "Short-lived credential unavailable");
                }
            }
        } else {
            debug!("No short-lived credential endpoint configured");
        }

        match self.static_secret {
            Some(ref secret) => {
                let credential = Credential::static_secret(secret.clone());
                info!(path = credential.path(), "Acquired session credential");
                Ok(credential)
            }
            None => Err(VoiceError::Configuration(
                "no short-lived credential could be obtained and no static API key is configured"
                    .to_string(),
            )),
        }
    }
}

/// Fixed credential, mostly useful for tests and tooling.
pub struct StaticCredential(String);

impl StaticCredential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }
}

#[async_trait]
impl CredentialSource for StaticCredential {
    async fn acquire(&self) -> VoiceResult<Credential> {
        Ok(Credential::static_secret(self.0.clone()))
    }
}

// =============================================================================
// Client secret minting (served by the relay)
// =============================================================================

/// Mints short-lived client secrets from the upstream API on behalf of
/// clients that hold no API key.
pub struct ClientSecretIssuer {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
    ttl_seconds: u64,
    timeout: Duration,
}

impl ClientSecretIssuer {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: config.client_secrets_url.clone(),
            api_key: config.api_key.clone(),
            ttl_seconds: config.token_ttl_seconds,
            timeout: config.credential_timeout(),
        }
    }

    /// Request a client secret and return the upstream body unchanged.
    pub async fn mint(&self) -> AppResult<Value> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| AppError::Misconfigured("API key missing".to_string()))?;

        info!("Requesting short-lived client secret from upstream");

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(api_key)
            .timeout(self.timeout)
            .json(&json!({ "expires_after": { "seconds": self.ttl_seconds } }))
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Client secret request failed");
                AppError::Unreachable(e.without_url().to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "Upstream rejected client secret request");
            let status = axum::http::StatusCode::from_u16(status.as_u16())
                .unwrap_or(axum::http::StatusCode::BAD_GATEWAY);
            return Err(AppError::Upstream { status, body });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::Unreachable(format!("invalid upstream body: {e}")))?;

        info!("Client secret minted");
        Ok(body)
    }
}

impl Drop for ClientSecretIssuer {
    fn drop(&mut self) {
        if let Some(ref mut key) = self.api_key {
            key.zeroize();
        }
    }
}
