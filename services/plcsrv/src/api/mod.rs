//! Administrative HTTP API

pub mod handlers;
pub mod routes;

use std::sync::Arc;

use crate::client::PlcClient;
use crate::registry::VariableRegistry;
use crate::scheduler::PollingScheduler;
use crate::sink::ResultSink;

pub use routes::create_routes;

/// Shared state behind every handler
pub struct AppState<C: PlcClient> {
    pub service_name: String,
    pub scheduler: Arc<PollingScheduler<C>>,
    pub registry: Arc<dyn VariableRegistry>,
    pub sink: Arc<dyn ResultSink>,
}

impl<C: PlcClient> AppState<C> {
    pub fn new(
        service_name: impl Into<String>,
        scheduler: Arc<PollingScheduler<C>>,
        registry: Arc<dyn VariableRegistry>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            scheduler,
            registry,
            sink,
        }
    }
}
