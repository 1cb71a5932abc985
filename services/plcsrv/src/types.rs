//! Core data types shared by the session, scheduler and sinks

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// One PLC endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionParams {
    #[serde(alias = "ip")]
    pub host: String,
    pub port: u16,
    pub rack: u16,
    pub slot: u16,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 102,
            rack: 0,
            slot: 1,
        }
    }
}

impl ConnectionParams {
    /// `host:port` form used in logs and error messages
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} (rack {}, slot {})",
            self.host, self.port, self.rack, self.slot
        )
    }
}

/// Native scalar value read from the PLC
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlcValue {
    Bool(bool),
    Int(i64),
    Real(f64),
}

impl PlcValue {
    /// Numeric view for storage, booleans become 0/1
    pub fn as_f64(&self) -> f64 {
        match *self {
            PlcValue::Bool(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            },
            PlcValue::Int(i) => i as f64,
            PlcValue::Real(r) => r,
        }
    }
}

impl fmt::Display for PlcValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlcValue::Bool(b) => write!(f, "{}", b),
            PlcValue::Int(i) => write!(f, "{}", i),
            PlcValue::Real(r) => write!(f, "{}", r),
        }
    }
}

/// One batched read: a single timestamp for every reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollResult {
    pub timestamp: DateTime<Utc>,
    pub readings: BTreeMap<String, PlcValue>,
}

impl PollResult {
    pub fn new(timestamp: DateTime<Utc>, readings: BTreeMap<String, PlcValue>) -> Self {
        Self {
            timestamp,
            readings,
        }
    }

    /// RFC 3339 timestamp with millisecond precision
    pub fn timestamp_utc(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Keep only the readings for `addresses`
    pub fn restricted_to(&self, addresses: &BTreeSet<String>) -> PollResult {
        let readings = self
            .readings
            .iter()
            .filter(|(address, _)| addresses.contains(*address))
            .map(|(address, value)| (address.clone(), *value))
            .collect();
        PollResult {
            timestamp: self.timestamp,
            readings,
        }
    }
}

/// A named variable as supplied by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableSpec {
    /// Protocol location, e.g. `DB10,REAL10`
    pub address: String,
    /// Sampling interval in milliseconds (validated to be positive at start)
    #[serde(
        alias = "sampling_time",
        alias = "samplingTime",
        alias = "samplingIntervalMs"
    )]
    pub sampling_interval_ms: i64,
}

impl VariableSpec {
    pub fn new(address: impl Into<String>, sampling_interval_ms: i64) -> Self {
        Self {
            address: address.into(),
            sampling_interval_ms,
        }
    }
}

/// Variables keyed by unique name
pub type VariableSet = BTreeMap<String, VariableSpec>;

/// Addresses sharing one polling interval, driven by one trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplingGroup {
    pub interval_ms: u64,
    pub addresses: BTreeSet<String>,
}
