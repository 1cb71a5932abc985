//! Test utilities for plcsrv
//!
//! Provides an instrumented PLC client and a recording sink shared by unit and
//! integration tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::client::PlcClient;
use crate::error::ClientError;
use crate::sink::ResultSink;
use crate::types::{ConnectionParams, PlcValue, PollResult, VariableSet, VariableSpec};

/// Shared, inspectable state behind every `MockPlcClient` built from it
#[derive(Debug, Default)]
pub struct MockPlcState {
    pub connect_calls: AtomicUsize,
    pub disconnect_calls: AtomicUsize,
    pub read_calls: AtomicUsize,
    pub add_items_calls: AtomicUsize,
    pub remove_items_calls: AtomicUsize,
    pub connected: AtomicBool,
    /// Reads currently executing
    pub in_flight: AtomicUsize,
    /// Highest number of reads ever executing at once
    pub max_in_flight: AtomicUsize,
    /// Set when a read started while another was executing
    pub overlap_detected: AtomicBool,
    /// Fail the next n connects
    pub fail_connects: AtomicUsize,
    /// Fail every connect
    pub refuse_connections: AtomicBool,
    /// Fail the next n reads
    pub fail_reads: AtomicUsize,
    /// Panic inside the next n reads
    pub panic_reads: AtomicUsize,
    /// Fail every disconnect
    pub fail_disconnect: AtomicBool,
    /// Duration of each read
    pub read_delay_ms: AtomicU64,
    /// Duration of each connect
    pub connect_delay_ms: AtomicU64,
    pub manifest: Mutex<Vec<String>>,
    pub last_params: Mutex<Option<ConnectionParams>>,
}

impl MockPlcState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connect_count(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn read_count(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn overlapped(&self) -> bool {
        self.overlap_detected.load(Ordering::SeqCst)
    }

    pub fn manifest(&self) -> Vec<String> {
        self.manifest.lock().clone()
    }

    pub fn set_read_delay(&self, delay: Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.connect_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn fail_next_reads(&self, n: usize) {
        self.fail_reads.store(n, Ordering::SeqCst);
    }

    pub fn panic_next_reads(&self, n: usize) {
        self.panic_reads.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_connects(&self, n: usize) {
        self.fail_connects.store(n, Ordering::SeqCst);
    }
}

/// Decrements the in-flight counter even when the read future is dropped
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Instrumented client asserting non-reentrant access
///
/// Every reading is `Real(read number)` so tests can tell batches apart.
#[derive(Debug, Clone)]
pub struct MockPlcClient {
    state: Arc<MockPlcState>,
}

impl MockPlcClient {
    pub fn new(state: Arc<MockPlcState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl PlcClient for MockPlcClient {
    async fn connect(&mut self, params: &ConnectionParams) -> Result<(), ClientError> {
        self.state.connect_calls.fetch_add(1, Ordering::SeqCst);
        *self.state.last_params.lock() = Some(params.clone());

        let delay = self.state.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.state.refuse_connections.load(Ordering::SeqCst)
            || take_one(&self.state.fail_connects)
        {
            return Err(ClientError::Connection(format!(
                "Connection refused by {}",
                params.endpoint()
            )));
        }

        self.state.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn add_items(&mut self, addresses: &[String]) {
        self.state.add_items_calls.fetch_add(1, Ordering::SeqCst);
        self.state.manifest.lock().extend(addresses.iter().cloned());
    }

    fn remove_items(&mut self) {
        self.state.remove_items_calls.fetch_add(1, Ordering::SeqCst);
        self.state.manifest.lock().clear();
    }

    async fn read_all_items(&mut self) -> Result<HashMap<String, PlcValue>, ClientError> {
        let previous = self.state.in_flight.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.state.in_flight);
        if previous > 0 {
            self.state.overlap_detected.store(true, Ordering::SeqCst);
        }
        self.state
            .max_in_flight
            .fetch_max(previous + 1, Ordering::SeqCst);

        let number = self.state.read_calls.fetch_add(1, Ordering::SeqCst) + 1;

        let delay = self.state.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if !self.state.is_connected() {
            return Err(ClientError::NotConnected);
        }
        if take_one(&self.state.panic_reads) {
            panic!("mock read exploded on read {}", number);
        }
        if take_one(&self.state.fail_reads) {
            return Err(ClientError::Connection("Connection reset by peer".to_string()));
        }

        let manifest = self.state.manifest.lock().clone();
        Ok(manifest
            .into_iter()
            .map(|address| (address, PlcValue::Real(number as f64)))
            .collect())
    }

    async fn drop_connection(&mut self) -> Result<(), ClientError> {
        self.state.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.state.connected.store(false, Ordering::SeqCst);
        if self.state.fail_disconnect.load(Ordering::SeqCst) {
            return Err(ClientError::Connection("Close failed".to_string()));
        }
        Ok(())
    }
}

/// Sink that records every result it accepts
#[derive(Debug, Default)]
pub struct CountingSink {
    calls: AtomicUsize,
    results: Mutex<Vec<PollResult>>,
    delay_ms: AtomicU64,
    fail: AtomicBool,
}

impl CountingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sink that sleeps for `delay` on every call
    pub fn slow(delay: Duration) -> Arc<Self> {
        let sink = Self::default();
        sink.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
        Arc::new(sink)
    }

    /// Sink that records and then returns an error on every call
    pub fn failing() -> Arc<Self> {
        let sink = Self::default();
        sink.fail.store(true, Ordering::SeqCst);
        Arc::new(sink)
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn results(&self) -> Vec<PollResult> {
        self.results.lock().clone()
    }

    /// Results whose reading addresses equal `addresses` exactly
    pub fn results_for(&self, addresses: &[&str]) -> Vec<PollResult> {
        let wanted: BTreeSet<String> = addresses.iter().map(|a| a.to_string()).collect();
        self.results
            .lock()
            .iter()
            .filter(|r| r.readings.keys().cloned().collect::<BTreeSet<_>>() == wanted)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ResultSink for CountingSink {
    async fn accept(&self, result: PollResult) -> anyhow::Result<()> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.results.lock().push(result);
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("sink rejected batch");
        }
        Ok(())
    }
}

/// Build a variable set from `(name, address, interval_ms)` triples
pub fn variables(entries: &[(&str, &str, i64)]) -> VariableSet {
    entries
        .iter()
        .map(|(name, address, interval)| (name.to_string(), VariableSpec::new(*address, *interval)))
        .collect()
}
