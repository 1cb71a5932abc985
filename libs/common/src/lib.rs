//! Shared service plumbing for the PLC acquisition workspace
//!
//! Provides basic functions shared by the service binaries:
//! - API response envelopes
//! - logging initialization and runtime level control
//! - service metadata and startup banner
//! - graceful shutdown signal handling

pub mod api_types;
pub mod logging;
pub mod service_bootstrap;
pub mod shutdown;

pub use service_bootstrap::ServiceInfo;

/// Default bind host for the administrative API
pub const DEFAULT_API_HOST: &str = "0.0.0.0";
