//! PLC Acquisition Service Library (plcsrv)
//!
//! Acquires process values from one PLC at several independently configured
//! sampling rates over a single exclusive protocol session, and hands every batch
//! to a result sink.
//!
//! # Architecture
//!
//! - **`session`**: the protocol session state machine (connect, register addresses,
//!   batched read, disconnect) over a [`client::PlcClient`]
//! - **`scheduler`**: groups variables by interval and drives one trigger per group,
//!   serializing reads through the session
//! - **`sink`**: result consumers (log, channel, SQLite)
//! - **`registry`**: where the variable set comes from
//! - **`api`**: administrative HTTP surface
//! - **`runtime`**: reconnect backoff and service lifecycle
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
//! │    Registry     │───►│    Scheduler    │───►│   PlcSession    │
//! │   (variables)   │    │ (1 task / rate) │    │  (one client)   │
//! └─────────────────┘    └─────────────────┘    └─────────────────┘
//!                                 │
//!                                 ▼
//!                        ┌─────────────────┐
//!                        │   ResultSink    │
//!                        │ (log / sqlite)  │
//!                        └─────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use plcsrv::client::SimulatedPlcClient;
//! use plcsrv::scheduler::{PollingScheduler, SchedulerConfig};
//! use plcsrv::sink::LogSink;
//! use plcsrv::types::{ConnectionParams, VariableSet, VariableSpec};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let scheduler = PollingScheduler::new(
//!     ConnectionParams::default(),
//!     SimulatedPlcClient::default,
//!     SchedulerConfig::default(),
//! );
//!
//! let mut variables = VariableSet::new();
//! variables.insert("temperature".into(), VariableSpec::new("DB10,REAL10", 500));
//! variables.insert("running".into(), VariableSpec::new("DB10,X0.0", 1000));
//!
//! scheduler.start(&variables, Arc::new(LogSink)).await?;
//! // ...
//! scheduler.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod bootstrap;
pub mod client;
pub mod config;
pub mod error;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod session;
pub mod sink;
pub mod test_utils;
pub mod types;

pub use client::{PlcClient, SimulatedPlcClient};
pub use config::PlcsrvConfig;
pub use error::{ClientError, ConnectError, DisconnectError, ReadError, StartError, StopError};
pub use registry::{StaticVariableRegistry, VariableRegistry};
pub use scheduler::{PollingScheduler, SchedulerConfig, SchedulerState, SchedulerStatus};
pub use session::{PlcSession, SessionState};
pub use sink::ResultSink;
pub use types::{ConnectionParams, PlcValue, PollResult, VariableSet, VariableSpec};
