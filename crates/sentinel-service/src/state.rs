//! Application state shared across handlers.

use std::sync::Arc;

use sentinel_core::{GatewayOptions, IngestionGateway, ThresholdConfig, Thresholds};
use sentinel_store::Store;

use crate::config::Config;

/// Shared state of the ingestion service.
///
/// The store is used twice: behind the gateway for writes, and directly by
/// the read endpoints. `Store` serializes access internally, so no outer
/// lock is needed.
pub struct AppState {
    pub store: Arc<Store>,
    pub gateway: IngestionGateway,
}

impl AppState {
    /// Create new application state.
    pub fn new(store: Store, thresholds: ThresholdConfig, options: GatewayOptions) -> Arc<Self> {
        let store = Arc::new(store);
        let gateway = IngestionGateway::new(
            Thresholds::new(thresholds),
            store.clone(),
            store.clone(),
        )
        .with_options(options);
        Arc::new(Self { store, gateway })
    }

    /// State for the cloud role from a loaded configuration.
    pub fn from_config(store: Store, config: &Config) -> Arc<Self> {
        Self::new(
            store,
            config.thresholds.clone(),
            config.cloud.gateway_options(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::thresholds::VPD;

    #[test]
    fn test_from_config_uses_thresholds_and_options() {
        let mut config = Config::default();
        config.cloud.reject_stale_updates = true;
        config.thresholds = ThresholdConfig::empty();

        let state = AppState::from_config(Store::open_in_memory().unwrap(), &config);
        assert!(state.gateway.thresholds().config().bound(VPD).is_none());
        assert!(format!("{:?}", state.gateway).contains("reject_stale_updates: true"));
    }
}
