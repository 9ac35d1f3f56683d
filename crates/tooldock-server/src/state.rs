//! Shared application state

use crate::broker::Broker;
use crate::proxy::ProxyRegistry;
use std::sync::Arc;
use tooldock_engine::Engine;

/// State shared by every handler
pub struct AppState {
    pub engine: Engine,
    pub broker: Arc<Broker>,
    pub proxies: ProxyRegistry,
}

impl AppState {
    /// Bundle an engine with its broker
    ///
    /// The broker should be the same one the engine was constructed with as
    /// its default sink, so programmatic installs fan out to SSE clients
    /// too.
    pub fn new(engine: Engine, broker: Arc<Broker>) -> Self {
        Self {
            engine,
            broker,
            proxies: ProxyRegistry::new(),
        }
    }
}
