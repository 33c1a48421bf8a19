use std::sync::Arc;

use crate::config::ServerConfig;
use crate::core::audio::AudioSpec;
use crate::core::credential::{ClientSecretIssuer, CredentialProvider};
use crate::core::realtime::SessionNegotiator;
use crate::core::relay::RelayService;
use crate::core::transport::WebSocketConnector;

/// Application state shared across all requests
pub struct AppState {
    pub config: ServerConfig,
    /// Relays downstream WebSocket peers to the upstream endpoint
    pub relay: RelayService,
    /// Mints short-lived client secrets for `POST /session`
    pub issuer: ClientSecretIssuer,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let negotiator = SessionNegotiator::new(AudioSpec::pcm16_mono(config.sample_rate));
        let relay = RelayService::new(
            Arc::new(CredentialProvider::for_relay(&config)),
            Arc::new(WebSocketConnector::new(config.upstream_url.clone())),
            negotiator,
            config.default_voice(),
        );
        let issuer = ClientSecretIssuer::new(&config);
        Self::from_parts(config, relay, issuer)
    }

    /// Assemble state from prebuilt components.
    pub fn from_parts(
        config: ServerConfig,
        relay: RelayService,
        issuer: ClientSecretIssuer,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            relay,
            issuer,
        })
    }
}
