//! Simulated PLC client
//!
//! Answers batched reads without any wire protocol. Values are synthesized from
//! the data type encoded in each S7-style address (`DB<n>,<TYPE><offset>`).

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::f64::consts::TAU;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use super::PlcClient;
use crate::error::ClientError;
use crate::types::{ConnectionParams, PlcValue};

/// Simulator behaviour knobs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Added to every batched read
    pub read_latency_ms: u64,
    /// Fail every n-th read with a transport error (0 disables)
    pub fail_every_n_reads: u32,
}

/// Data type part of an address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AddressKind {
    Bit,
    Byte,
    Char,
    Int,
    Word,
    DInt,
    DWord,
    Real,
}

impl AddressKind {
    fn from_code(code: &str) -> Option<Self> {
        match code {
            "X" => Some(Self::Bit),
            "BYTE" | "B" => Some(Self::Byte),
            "CHAR" | "C" => Some(Self::Char),
            "INT" | "I" => Some(Self::Int),
            "WORD" | "W" => Some(Self::Word),
            "DINT" | "DI" => Some(Self::DInt),
            "DWORD" | "DW" => Some(Self::DWord),
            "REAL" | "R" => Some(Self::Real),
            _ => None,
        }
    }

    /// Inclusive range for integer kinds
    fn int_range(self) -> (i64, i64) {
        match self {
            Self::Byte => (0, u8::MAX as i64),
            Self::Char => (32, 126),
            Self::Int => (i16::MIN as i64, i16::MAX as i64),
            Self::Word => (0, u16::MAX as i64),
            Self::DInt => (i32::MIN as i64, i32::MAX as i64),
            Self::DWord => (0, u32::MAX as i64),
            Self::Bit | Self::Real => (0, 0),
        }
    }
}

/// Parsed form of `DB<n>,<TYPE><offset>[.<bit>]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ParsedAddress {
    db: u32,
    kind: AddressKind,
    offset: u32,
}

fn parse_address(address: &str) -> Result<ParsedAddress, ClientError> {
    let invalid = |reason: &str| ClientError::Protocol(format!("{}: '{}'", reason, address));

    let (area, item) = address
        .trim()
        .split_once(',')
        .ok_or_else(|| invalid("Missing ',' in address"))?;

    let db = area
        .strip_prefix("DB")
        .and_then(|n| n.parse::<u32>().ok())
        .ok_or_else(|| invalid("Expected data block 'DB<n>'"))?;

    let split = item
        .find(|c: char| c.is_ascii_digit())
        .ok_or_else(|| invalid("Missing offset"))?;
    let (code, location) = item.split_at(split);
    let kind = AddressKind::from_code(code).ok_or_else(|| invalid("Unsupported data type"))?;

    let offset = match (kind, location.split_once('.')) {
        (AddressKind::Bit, Some((byte, bit))) => {
            let bit = bit
                .parse::<u8>()
                .ok()
                .filter(|b| *b < 8)
                .ok_or_else(|| invalid("Bit index must be 0-7"))?;
            let byte = byte
                .parse::<u32>()
                .map_err(|_| invalid("Invalid byte offset"))?;
            byte.checked_mul(8)
                .and_then(|bits| bits.checked_add(u32::from(bit)))
                .ok_or_else(|| invalid("Byte offset out of range"))?
        },
        (AddressKind::Bit, None) => return Err(invalid("Bit address needs '<byte>.<bit>'")),
        (_, Some(_)) => return Err(invalid("Only X addresses take a bit index")),
        (_, None) => location
            .parse::<u32>()
            .map_err(|_| invalid("Invalid offset"))?,
    };

    Ok(ParsedAddress { db, kind, offset })
}

/// In-memory PLC used by the service binary and demos
pub struct SimulatedPlcClient {
    config: SimulatorConfig,
    connected: Option<ConnectionParams>,
    items: Vec<String>,
    phases: HashMap<String, f64>,
    reads: u64,
    started: Instant,
}

impl SimulatedPlcClient {
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            config,
            connected: None,
            items: Vec::new(),
            phases: HashMap::new(),
            reads: 0,
            started: Instant::now(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.is_some()
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }

    fn synthesize(&self, address: &str, parsed: ParsedAddress) -> PlcValue {
        let tick = self.reads as i64 + parsed.offset as i64 + parsed.db as i64;
        match parsed.kind {
            AddressKind::Bit => PlcValue::Bool(tick % 2 == 0),
            AddressKind::Real => {
                let phase = self.phases.get(address).copied().unwrap_or(0.0);
                let t = self.started.elapsed().as_secs_f64();
                PlcValue::Real(50.0 + 50.0 * (TAU * t / 60.0 + phase).sin())
            },
            kind => {
                let (min, max) = kind.int_range();
                let span = (max - min).saturating_add(1).max(1);
                PlcValue::Int(min + tick.rem_euclid(span))
            },
        }
    }
}

impl Default for SimulatedPlcClient {
    fn default() -> Self {
        Self::new(SimulatorConfig::default())
    }
}

#[async_trait]
impl PlcClient for SimulatedPlcClient {
    async fn connect(&mut self, params: &ConnectionParams) -> Result<(), ClientError> {
        if params.host.trim().is_empty() {
            return Err(ClientError::Connection("Host must not be empty".to_string()));
        }
        if params.rack > 7 || params.slot > 31 {
            return Err(ClientError::Connection(format!(
                "Invalid rack/slot {}/{}",
                params.rack, params.slot
            )));
        }

        info!("Simulated PLC connected: {}", params);
        self.connected = Some(params.clone());
        Ok(())
    }

    fn add_items(&mut self, addresses: &[String]) {
        let mut rng = rand::thread_rng();
        for address in addresses {
            self.phases
                .entry(address.clone())
                .or_insert_with(|| rng.gen_range(0.0..TAU));
            self.items.push(address.clone());
        }
    }

    fn remove_items(&mut self) {
        self.items.clear();
    }

    async fn read_all_items(&mut self) -> Result<HashMap<String, PlcValue>, ClientError> {
        if self.connected.is_none() {
            return Err(ClientError::NotConnected);
        }

        if self.config.read_latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.read_latency_ms)).await;
        }

        self.reads += 1;
        let every = self.config.fail_every_n_reads as u64;
        if every > 0 && self.reads % every == 0 {
            debug!("Simulated read failure on read #{}", self.reads);
            return Err(ClientError::Timeout(format!(
                "Injected failure on read #{}",
                self.reads
            )));
        }

        let mut values = HashMap::with_capacity(self.items.len());
        for address in &self.items {
            let parsed = parse_address(address)?;
            values.insert(address.clone(), self.synthesize(address, parsed));
        }
        Ok(values)
    }

    async fn drop_connection(&mut self) -> Result<(), ClientError> {
        if let Some(params) = self.connected.take() {
            info!("Simulated PLC disconnected: {}", params.endpoint());
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_parse_address_types() {
        let real = parse_address("DB10,REAL10").unwrap();
        assert_eq!(real.db, 10);
        assert_eq!(real.kind, AddressKind::Real);
        assert_eq!(real.offset, 10);

        let bit = parse_address("DB1,X6.3").unwrap();
        assert_eq!(bit.kind, AddressKind::Bit);
        assert_eq!(bit.offset, 51);

        assert_eq!(parse_address("DB2,INT4").unwrap().kind, AddressKind::Int);
        assert_eq!(parse_address("DB2,DI8").unwrap().kind, AddressKind::DInt);
        assert_eq!(parse_address("DB2,DW8").unwrap().kind, AddressKind::DWord);
        assert_eq!(parse_address("DB2,B1").unwrap().kind, AddressKind::Byte);
    }

    #[test]
    fn test_parse_address_rejects_garbage() {
        assert!(parse_address("REAL10").is_err());
        assert!(parse_address("M10,REAL0").is_err());
        assert!(parse_address("DB1,FOO4").is_err());
        assert!(parse_address("DB1,X6").is_err());
        assert!(parse_address("DB1,X6.8").is_err());
        assert!(parse_address("DB1,INT4.1").is_err());
    }

    #[test]
    fn test_parse_address_bit_offset_overflow() {
        assert_eq!(parse_address("DB1,X536870911.7").unwrap().offset, u32::MAX);
        let err = parse_address("DB1,X600000000.0").unwrap_err();
        assert!(matches!(err, ClientError::Protocol(ref m) if m.contains("out of range")));
    }

    #[tokio::test]
    async fn test_read_synthesizes_typed_values() {
        let mut client = SimulatedPlcClient::default();
        client.connect(&ConnectionParams::default()).await.unwrap();
        client.add_items(&[
            "DB1,REAL0".to_string(),
            "DB1,X6.0".to_string(),
            "DB2,BYTE4".to_string(),
        ]);

        let values = client.read_all_items().await.unwrap();
        assert_eq!(values.len(), 3);
        assert!(matches!(values["DB1,REAL0"], PlcValue::Real(v) if (0.0..=100.0).contains(&v)));
        assert!(matches!(values["DB1,X6.0"], PlcValue::Bool(_)));
        assert!(matches!(values["DB2,BYTE4"], PlcValue::Int(v) if (0..=255).contains(&v)));
    }

    #[tokio::test]
    async fn test_read_requires_connection() {
        let mut client = SimulatedPlcClient::default();
        client.add_items(&["DB1,REAL0".to_string()]);
        assert_eq!(
            client.read_all_items().await.unwrap_err(),
            ClientError::NotConnected
        );
    }

    #[tokio::test]
    async fn test_unknown_address_fails_read() {
        let mut client = SimulatedPlcClient::default();
        client.connect(&ConnectionParams::default()).await.unwrap();
        client.add_items(&["DB1,NOPE0".to_string()]);
        assert!(matches!(
            client.read_all_items().await,
            Err(ClientError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let mut client = SimulatedPlcClient::new(SimulatorConfig {
            read_latency_ms: 0,
            fail_every_n_reads: 3,
        });
        client.connect(&ConnectionParams::default()).await.unwrap();
        client.add_items(&["DB1,INT0".to_string()]);

        assert!(client.read_all_items().await.is_ok());
        assert!(client.read_all_items().await.is_ok());
        assert!(matches!(
            client.read_all_items().await,
            Err(ClientError::Timeout(_))
        ));
        assert!(client.read_all_items().await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_rack_slot() {
        let mut client = SimulatedPlcClient::default();
        let params = ConnectionParams {
            rack: 9,
            ..ConnectionParams::default()
        };
        assert!(matches!(
            client.connect(&params).await,
            Err(ClientError::Connection(_))
        ));
        assert!(!client.is_connected());
    }
}
