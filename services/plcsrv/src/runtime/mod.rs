//! Runtime orchestration: reconnect backoff and service lifecycle

pub mod lifecycle;
pub mod reconnect;

pub use lifecycle::{autostart, build_scheduler, build_sink, shutdown_services};
pub use reconnect::{ReconnectHelper, ReconnectPolicy};
