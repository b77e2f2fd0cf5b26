//! Shared application state.

use std::sync::Arc;

use tatami_auth::TokenVerifier;
use tatami_bus::{LeaseManager, PubSubBus};
use tatami_store::MatchStore;

use crate::config::RealtimeConfig;
use crate::hub::Hub;

/// The bus the control plane needs: pub/sub fan-out plus ticker leases.
/// Blanket-implemented for anything providing both.
pub trait Bus: PubSubBus + LeaseManager {}

impl<T: PubSubBus + LeaseManager> Bus for T {}

/// State shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub verifier: Arc<TokenVerifier>,
    pub store: Arc<dyn MatchStore>,
    pub bus: Arc<dyn Bus>,
    pub config: RealtimeConfig,
}

impl AppState {
    pub fn new(
        hub: Arc<Hub>,
        verifier: Arc<TokenVerifier>,
        store: Arc<dyn MatchStore>,
        bus: Arc<dyn Bus>,
        config: RealtimeConfig,
    ) -> Self {
        Self {
            hub,
            verifier,
            store,
            bus,
            config,
        }
    }
}
