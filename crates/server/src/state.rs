//! Shared application state.

use ethgate_core::{AppConfig, EthClient, Gatekeeper, KeyStore, RateLimitEngine};
use std::sync::Arc;

/// Shared components handed to every handler and middleware.
///
/// Constructed once at startup; nothing here is a static singleton. The key
/// store and rate-limit engine are also reachable directly (not only via the
/// gatekeeper) because admin handlers mutate them.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<KeyStore>,
    pub engine: Arc<RateLimitEngine>,
    pub gatekeeper: Arc<Gatekeeper>,
    pub upstream: Arc<EthClient>,
}

impl AppState {
    /// Wires up the state from configuration.
    ///
    /// Loads the durable key registry, builds the rate-limit windows, and
    /// constructs the upstream client.
    ///
    /// # Errors
    ///
    /// Returns an error if the upstream HTTP client cannot be built.
    pub fn from_config(config: AppConfig) -> Result<Self, ethgate_core::UpstreamError> {
        let store = Arc::new(KeyStore::load(config.keys_file()));
        let engine = Arc::new(RateLimitEngine::new(config.window_configs()));
        let gatekeeper = Arc::new(Gatekeeper::new(
            store.clone(),
            engine.clone(),
            config.admin.secret.clone(),
        ));
        let upstream =
            Arc::new(EthClient::new(&config.upstream.rpc_url, config.upstream_timeout())?);

        Ok(Self { config: Arc::new(config), store, engine, gatekeeper, upstream })
    }
}
