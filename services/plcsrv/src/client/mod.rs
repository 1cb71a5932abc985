//! Protocol client seam
//!
//! The session drives the PLC through this trait only. The wire encoding lives
//! behind it; this crate ships a simulated implementation for demos and tests.

pub mod simulator;

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::ClientError;
use crate::types::{ConnectionParams, PlcValue};

pub use simulator::{SimulatedPlcClient, SimulatorConfig};

/// Underlying PLC protocol client
///
/// Implementations hold at most one connection and a batch-read manifest.
/// Calls are never issued concurrently on one instance.
#[async_trait]
pub trait PlcClient: Send + 'static {
    /// Open a connection to the endpoint
    async fn connect(&mut self, params: &ConnectionParams) -> Result<(), ClientError>;

    /// Append addresses to the batch-read manifest
    fn add_items(&mut self, addresses: &[String]);

    /// Clear the batch-read manifest
    fn remove_items(&mut self);

    /// Read every manifest address in one exchange
    async fn read_all_items(&mut self) -> Result<HashMap<String, PlcValue>, ClientError>;

    /// Close the connection
    async fn drop_connection(&mut self) -> Result<(), ClientError>;
}
