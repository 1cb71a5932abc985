//! Per-interval polling triggers
//!
//! Each sampling group runs as one task. A tick takes the session lock, performs
//! the pending reconnect (if any) and one batched read, releases the lock, then
//! hands its share of the readings to the sink from the same task. Panics from the
//! client or the sink are caught and counted, so a trigger only ends on cancel.

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::PlcClient;
use crate::runtime::reconnect::{ReconnectDecision, ReconnectHelper};
use crate::session::{PlcSession, SessionState};
use crate::sink::ResultSink;
use crate::types::{ConnectionParams, PollResult, SamplingGroup};

/// Counters exposed through the scheduler status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollCounters {
    pub ticks: u64,
    pub successful_reads: u64,
    pub failed_reads: u64,
    pub sink_failures: u64,
    pub reconnect_attempts: u64,
    pub successful_reconnects: u64,
}

/// Run-wide observation shared by triggers and `status()`
#[derive(Debug)]
pub(crate) struct PollMonitor {
    ticks: AtomicU64,
    successful_reads: AtomicU64,
    failed_reads: AtomicU64,
    sink_failures: AtomicU64,
    reconnect_attempts: AtomicU64,
    successful_reconnects: AtomicU64,
    last_error: Mutex<Option<String>>,
    session_state: RwLock<SessionState>,
}

impl Default for PollMonitor {
    fn default() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            successful_reads: AtomicU64::new(0),
            failed_reads: AtomicU64::new(0),
            sink_failures: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            successful_reconnects: AtomicU64::new(0),
            last_error: Mutex::new(None),
            session_state: RwLock::new(SessionState::Disconnected),
        }
    }
}

impl PollMonitor {
    pub(crate) fn reset(&self) {
        for counter in [
            &self.ticks,
            &self.successful_reads,
            &self.failed_reads,
            &self.sink_failures,
            &self.reconnect_attempts,
            &self.successful_reconnects,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *self.last_error.lock() = None;
    }

    pub(crate) fn counters(&self) -> PollCounters {
        PollCounters {
            ticks: self.ticks.load(Ordering::Relaxed),
            successful_reads: self.successful_reads.load(Ordering::Relaxed),
            failed_reads: self.failed_reads.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            successful_reconnects: self.successful_reconnects.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub(crate) fn session_state(&self) -> SessionState {
        self.session_state.read().clone()
    }

    pub(crate) fn publish_state(&self, state: &SessionState) {
        let mut current = self.session_state.write();
        if *current != *state {
            *current = state.clone();
        }
    }

    fn record_error(&self, message: String) {
        *self.last_error.lock() = Some(message);
    }
}

/// The session plus everything needed to resync it, guarded by one mutex
pub(crate) struct SessionSlot<C: PlcClient> {
    pub(crate) session: PlcSession<C>,
    params: ConnectionParams,
    addresses: Vec<String>,
    reconnect: ReconnectHelper,
    reconnect_enabled: bool,
}

impl<C: PlcClient> SessionSlot<C> {
    pub(crate) fn new(
        session: PlcSession<C>,
        params: ConnectionParams,
        addresses: Vec<String>,
        reconnect: ReconnectHelper,
        reconnect_enabled: bool,
    ) -> Self {
        Self {
            session,
            params,
            addresses,
            reconnect,
            reconnect_enabled,
        }
    }

    /// Resync if a previous read failed, then read once
    ///
    /// Returns `None` when the tick produced nothing to deliver.
    async fn poll(&mut self, monitor: &PollMonitor) -> Option<PollResult> {
        if self.reconnect_enabled && self.reconnect.needs_reconnect() {
            match self.reconnect.poll_attempt(Instant::now()) {
                ReconnectDecision::Exhausted => {
                    if !matches!(self.session.state(), SessionState::Failed(_)) {
                        self.session.mark_failed("reconnect attempts exhausted");
                        monitor.publish_state(self.session.state());
                    }
                    return None;
                },
                ReconnectDecision::CoolingDown(remaining) => {
                    debug!("Reconnect cooling down, {:?} left", remaining);
                    return None;
                },
                ReconnectDecision::Attempt => {
                    monitor.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
                    let result = self.session.reconnect(&self.params, &self.addresses).await;
                    monitor.publish_state(self.session.state());
                    match result {
                        Ok(()) => {
                            self.reconnect.record_success();
                            monitor
                                .successful_reconnects
                                .fetch_add(1, Ordering::Relaxed);
                        },
                        Err(e) => {
                            let message = e.to_string();
                            monitor.record_error(message.clone());
                            if self.reconnect.record_failure(Instant::now(), &message).is_none() {
                                error!("Giving up on PLC session: {}", message);
                            }
                            return None;
                        },
                    }
                },
            }
        }

        match self.session.read_batch().await {
            Ok(result) => {
                monitor.successful_reads.fetch_add(1, Ordering::Relaxed);
                Some(result)
            },
            Err(e) => {
                warn!("Batched read failed: {}", e);
                self.read_failed(monitor, e.to_string());
                None
            },
        }
    }

    /// Count a failed read and schedule a resync when enabled
    fn read_failed(&mut self, monitor: &PollMonitor, message: String) {
        monitor.failed_reads.fetch_add(1, Ordering::Relaxed);
        monitor.record_error(message);
        if self.reconnect_enabled {
            self.reconnect.mark_disconnected();
        }
    }
}

pub(crate) type SharedSession<C> = Arc<tokio::sync::Mutex<SessionSlot<C>>>;

/// Everything one trigger task owns
pub(crate) struct Trigger<C: PlcClient> {
    pub(crate) group: SamplingGroup,
    pub(crate) session: SharedSession<C>,
    pub(crate) sink: Arc<dyn ResultSink>,
    pub(crate) monitor: Arc<PollMonitor>,
    pub(crate) cancel: CancellationToken,
}

impl<C: PlcClient> Trigger<C> {
    /// Arm the trigger; the first tick fires one interval from now
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let period = Duration::from_millis(self.group.interval_ms);
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Polling trigger started: interval {}ms, {} addresses",
            self.group.interval_ms,
            self.group.addresses.len()
        );

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {},
            }
            self.tick().await;
        }

        debug!("Polling trigger {}ms stopped", self.group.interval_ms);
    }

    async fn tick(&self) {
        self.monitor.ticks.fetch_add(1, Ordering::Relaxed);

        let result = {
            let mut slot = self.session.lock().await;
            // A panicking client must not take the trigger down with it
            let polled = AssertUnwindSafe(slot.poll(&self.monitor))
                .catch_unwind()
                .await;
            match polled {
                Ok(result) => result,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(
                        "PLC client panicked during {}ms group tick: {}",
                        self.group.interval_ms, message
                    );
                    slot.read_failed(&self.monitor, format!("Client panicked: {}", message));
                    None
                },
            }
        };

        if let Some(result) = result {
            self.deliver(result.restricted_to(&self.group.addresses))
                .await;
        }
    }

    async fn deliver(&self, result: PollResult) {
        let count = result.readings.len();
        match AssertUnwindSafe(self.sink.accept(result))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {
                debug!(
                    "Delivered {} readings for {}ms group",
                    count, self.group.interval_ms
                );
            },
            Ok(Err(e)) => {
                self.monitor.sink_failures.fetch_add(1, Ordering::Relaxed);
                self.monitor.record_error(format!("Sink error: {:#}", e));
                warn!("Sink rejected {}ms group batch: {:#}", self.group.interval_ms, e);
            },
            Err(panic) => {
                self.monitor.sink_failures.fetch_add(1, Ordering::Relaxed);
                let message = panic_message(panic.as_ref());
                self.monitor.record_error(format!("Sink panicked: {}", message));
                error!(
                    "Sink panicked on {}ms group batch: {}",
                    self.group.interval_ms, message
                );
            },
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
