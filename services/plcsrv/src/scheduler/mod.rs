//! Polling scheduler
//!
//! Turns a variable set into one periodic trigger per distinct sampling interval,
//! all sharing a single protocol session. Reads are serialized through the session
//! mutex; timers and sink delivery are not.
//!
//! ```text
//! registry ──► start() ──► session.connect(all addresses)
//!                 │
//!                 ├─► trigger 500ms ──┐
//!                 ├─► trigger 1000ms ─┼─► lock ─► read_batch ─► unlock ─► sink
//!                 └─► trigger 5000ms ─┘
//! ```

pub mod grouping;
mod trigger;

use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::PlcClient;
use crate::error::{StartError, StopError};
use crate::runtime::reconnect::{ReconnectHelper, ReconnectPolicy};
use crate::session::{PlcSession, SessionState};
use crate::sink::ResultSink;
use crate::types::{ConnectionParams, VariableSet};

pub use grouping::PollPlan;
pub use trigger::PollCounters;
use trigger::{PollMonitor, SessionSlot, SharedSession, Trigger};

/// Default time `stop()` waits for in-flight ticks
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// What a trigger does after a failed read
#[derive(Debug, Clone, PartialEq)]
pub struct ReadFailurePolicy {
    /// Resync the session before the next read of any group
    ///
    /// When disabled, ticks keep reading on the existing connection.
    pub reconnect_enabled: bool,
    /// Backoff between failed resync attempts
    pub reconnect: ReconnectPolicy,
}

impl Default for ReadFailurePolicy {
    fn default() -> Self {
        Self {
            reconnect_enabled: true,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub drain_timeout: Duration,
    pub read_failure: ReadFailurePolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            read_failure: ReadFailurePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Running,
    Stopping,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerState::Idle => write!(f, "idle"),
            SchedulerState::Running => write!(f, "running"),
            SchedulerState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Point-in-time view of the scheduler
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerStatus {
    pub is_running: bool,
    pub state: SchedulerState,
    /// Registered addresses, sorted, without duplicates
    pub addresses: Vec<String>,
    pub sampling_intervals: BTreeSet<u64>,
    pub active_trigger_count: usize,
    pub session_state: SessionState,
    pub counters: PollCounters,
    pub last_error: Option<String>,
}

/// Lifecycle fields readable without awaiting
#[derive(Debug, Clone)]
struct Snapshot {
    state: SchedulerState,
    addresses: Vec<String>,
    intervals: BTreeSet<u64>,
    active_triggers: usize,
}

impl Snapshot {
    fn idle() -> Self {
        Self {
            state: SchedulerState::Idle,
            addresses: Vec::new(),
            intervals: BTreeSet::new(),
            active_triggers: 0,
        }
    }
}

/// Resources of one Running period
struct ActiveRun<C: PlcClient> {
    session: SharedSession<C>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl<C: PlcClient> Drop for ActiveRun<C> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Publishes Idle when teardown ends, including by panic
struct IdleOnExit<'a>(&'a RwLock<Snapshot>);

impl Drop for IdleOnExit<'_> {
    fn drop(&mut self) {
        *self.0.write() = Snapshot::idle();
    }
}

type ClientFactory<C> = Box<dyn Fn() -> C + Send + Sync>;

/// State shared between the scheduler handle and its lifecycle tasks
struct SchedulerInner<C: PlcClient> {
    params: ConnectionParams,
    factory: ClientFactory<C>,
    config: SchedulerConfig,
    // Serializes start/stop; holds the run while Running
    lifecycle: tokio::sync::Mutex<Option<ActiveRun<C>>>,
    snapshot: RwLock<Snapshot>,
    monitor: Arc<PollMonitor>,
}

impl<C: PlcClient> SchedulerInner<C> {
    fn state(&self) -> SchedulerState {
        self.snapshot.read().state
    }

    async fn arm(&self, plan: PollPlan, sink: Arc<dyn ResultSink>) -> Result<(), StartError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.is_some() || self.state() != SchedulerState::Idle {
            return Err(StartError::AlreadyRunning);
        }

        debug!(
            "Planned {} groups over {} addresses",
            plan.groups.len(),
            plan.addresses.len()
        );

        let mut session = PlcSession::new((self.factory)());
        let connected = session.connect(&self.params, &plan.addresses).await;
        self.monitor.publish_state(session.state());
        if let Err(e) = connected {
            error!("Polling start failed: {}", e);
            return Err(StartError::ConnectFailed(e));
        }

        self.monitor.reset();
        let policy = &self.config.read_failure;
        let slot = SessionSlot::new(
            session,
            self.params.clone(),
            plan.addresses.clone(),
            ReconnectHelper::new(policy.reconnect.clone()),
            policy.reconnect_enabled,
        );
        let shared: SharedSession<C> = Arc::new(tokio::sync::Mutex::new(slot));
        let cancel = CancellationToken::new();

        let handles: Vec<JoinHandle<()>> = plan
            .groups
            .iter()
            .map(|group| {
                Trigger {
                    group: group.clone(),
                    session: Arc::clone(&shared),
                    sink: Arc::clone(&sink),
                    monitor: Arc::clone(&self.monitor),
                    cancel: cancel.clone(),
                }
                .spawn()
            })
            .collect();

        *self.snapshot.write() = Snapshot {
            state: SchedulerState::Running,
            addresses: plan.addresses.clone(),
            intervals: plan.intervals(),
            active_triggers: handles.len(),
        };

        info!(
            "Polling started: {} addresses, intervals {:?}ms",
            plan.addresses.len(),
            plan.intervals()
        );

        *lifecycle = Some(ActiveRun {
            session: shared,
            cancel,
            handles,
        });
        Ok(())
    }

    async fn teardown(&self) -> Result<(), StopError> {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(mut run) = lifecycle.take() else {
            return Err(StopError::NotRunning);
        };
        self.snapshot.write().state = SchedulerState::Stopping;
        let _idle = IdleOnExit(&self.snapshot);
        info!("Stopping polling");

        run.cancel.cancel();
        let mut handles = std::mem::take(&mut run.handles);
        let drain_timeout = self.config.drain_timeout;

        let drained = tokio::time::timeout(drain_timeout, join_all(handles.iter_mut())).await;
        let timed_out = match drained {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!("Polling trigger ended abnormally: {}", e);
                    }
                }
                false
            },
            Err(_) => {
                warn!(
                    "In-flight reads did not finish within {:?}, aborting triggers",
                    drain_timeout
                );
                for handle in handles.iter().filter(|h| !h.is_finished()) {
                    handle.abort();
                }
                let _ = join_all(handles.iter_mut().filter(|h| !h.is_finished())).await;
                true
            },
        };

        let disconnected = {
            let mut slot = run.session.lock().await;
            let result = slot.session.disconnect().await;
            self.monitor.publish_state(slot.session.state());
            result
        };

        drop(run);

        if timed_out {
            if let Err(e) = disconnected {
                warn!("Disconnect after drain timeout failed: {}", e);
            }
            return Err(StopError::StopTimedOut(drain_timeout));
        }

        match disconnected {
            Ok(()) => {
                info!("Polling stopped");
                Ok(())
            },
            Err(e) => {
                warn!("Polling stopped, disconnect reported: {}", e);
                Err(StopError::Disconnect(e))
            },
        }
    }
}

/// Rate-grouped poller over one exclusive PLC session
///
/// `start` and `stop` run their work on a spawned task, so dropping either future
/// (an HTTP client going away, a caller timeout) never leaves a half-started or
/// half-stopped scheduler behind.
pub struct PollingScheduler<C: PlcClient> {
    inner: Arc<SchedulerInner<C>>,
}

impl<C: PlcClient> PollingScheduler<C> {
    /// Create an idle scheduler
    ///
    /// `factory` builds a fresh client for every run.
    pub fn new<F>(params: ConnectionParams, factory: F, config: SchedulerConfig) -> Self
    where
        F: Fn() -> C + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(SchedulerInner {
                params,
                factory: Box::new(factory),
                config,
                lifecycle: tokio::sync::Mutex::new(None),
                snapshot: RwLock::new(Snapshot::idle()),
                monitor: Arc::new(PollMonitor::default()),
            }),
        }
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.inner.params
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SchedulerState {
        self.inner.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    /// Connect and arm one trigger per distinct interval
    pub async fn start(
        &self,
        variables: &VariableSet,
        sink: Arc<dyn ResultSink>,
    ) -> Result<(), StartError> {
        if self.state() != SchedulerState::Idle {
            return Err(StartError::AlreadyRunning);
        }
        let plan = grouping::plan(variables)?;

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.arm(plan, sink).await })
            .await
            .unwrap_or_else(|e| {
                error!("Polling start task failed: {}", e);
                Err(StartError::Interrupted(e.to_string()))
            })
    }

    /// Cancel every trigger, wait for in-flight ticks, then disconnect
    ///
    /// The scheduler is Idle when the teardown ends, whatever the outcome and
    /// whether or not the caller is still waiting for it.
    pub async fn stop(&self) -> Result<(), StopError> {
        if self.state() != SchedulerState::Running {
            return Err(StopError::NotRunning);
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.teardown().await })
            .await
            .unwrap_or_else(|e| {
                error!("Polling stop task failed: {}", e);
                Err(StopError::Interrupted(e.to_string()))
            })
    }

    /// Observe the scheduler; never blocks on a read in progress
    pub fn status(&self) -> SchedulerStatus {
        let snapshot = self.inner.snapshot.read().clone();
        SchedulerStatus {
            is_running: snapshot.state == SchedulerState::Running,
            state: snapshot.state,
            addresses: snapshot.addresses,
            sampling_intervals: snapshot.intervals,
            active_trigger_count: snapshot.active_triggers,
            session_state: self.inner.monitor.session_state(),
            counters: self.inner.monitor.counters(),
            last_error: self.inner.monitor.last_error(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::test_utils::{variables, CountingSink, MockPlcClient, MockPlcState};

    fn scheduler(state: &Arc<MockPlcState>) -> PollingScheduler<MockPlcClient> {
        let state = Arc::clone(state);
        PollingScheduler::new(
            ConnectionParams::default(),
            move || MockPlcClient::new(Arc::clone(&state)),
            SchedulerConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_intervals_three_triggers() {
        let state = MockPlcState::new();
        let scheduler = scheduler(&state);
        let vars = variables(&[
            ("a", "DB1,REAL0", 500),
            ("b", "DB1,REAL4", 500),
            ("c", "DB1,REAL8", 1000),
            ("d", "DB1,REAL12", 5000),
            ("e", "DB1,REAL16", 5000),
        ]);

        scheduler.start(&vars, CountingSink::new()).await.unwrap();
        let status = scheduler.status();
        assert!(status.is_running);
        assert_eq!(status.active_trigger_count, 3);
        assert_eq!(status.sampling_intervals.len(), 3);
        assert_eq!(status.session_state, SessionState::Connected);

        scheduler.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_addresses_have_no_duplicates() {
        let state = MockPlcState::new();
        let scheduler = scheduler(&state);
        let vars = variables(&[
            ("a", "DB1,REAL0", 500),
            ("alias", "DB1,REAL0", 500),
            ("b", "DB2,INT4", 1000),
        ]);

        scheduler.start(&vars, CountingSink::new()).await.unwrap();
        assert_eq!(scheduler.status().addresses, vec!["DB1,REAL0", "DB2,INT4"]);
        assert_eq!(state.manifest(), vec!["DB1,REAL0", "DB2,INT4"]);
        scheduler.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_while_running_is_rejected() {
        let state = MockPlcState::new();
        let scheduler = scheduler(&state);
        let vars = variables(&[("a", "DB1,REAL0", 500)]);
        scheduler.start(&vars, CountingSink::new()).await.unwrap();
        let before = scheduler.status();

        let other = variables(&[("x", "DB9,INT0", 100)]);
        assert!(matches!(
            scheduler.start(&other, CountingSink::new()).await,
            Err(StartError::AlreadyRunning)
        ));
        assert_eq!(scheduler.status().addresses, before.addresses);
        assert_eq!(scheduler.status().sampling_intervals, before.sampling_intervals);
        assert_eq!(state.connect_count(), 1);

        scheduler.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_set_performs_no_connect() {
        let state = MockPlcState::new();
        let scheduler = scheduler(&state);
        assert!(matches!(
            scheduler.start(&VariableSet::new(), CountingSink::new()).await,
            Err(StartError::EmptyVariableSet)
        ));
        assert_eq!(state.connect_count(), 0);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_idle_is_rejected() {
        let state = MockPlcState::new();
        let scheduler = scheduler(&state);
        assert!(matches!(scheduler.stop().await, Err(StopError::NotRunning)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_leaves_idle() {
        let state = MockPlcState::new();
        state.fail_next_connects(1);
        let scheduler = scheduler(&state);
        let vars = variables(&[("a", "DB1,REAL0", 500)]);

        let err = scheduler
            .start(&vars, CountingSink::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StartError::ConnectFailed(_)));

        let status = scheduler.status();
        assert_eq!(status.state, SchedulerState::Idle);
        assert_eq!(status.active_trigger_count, 0);
        assert!(status.addresses.is_empty());
        assert!(!state.is_connected());

        // A later start succeeds
        scheduler.start(&vars, CountingSink::new()).await.unwrap();
        scheduler.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_counters_reset_on_start() {
        let state = MockPlcState::new();
        let scheduler = scheduler(&state);
        let vars = variables(&[("a", "DB1,REAL0", 100)]);

        scheduler.start(&vars, CountingSink::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;
        scheduler.stop().await.unwrap();
        assert_eq!(scheduler.status().counters.successful_reads, 3);

        scheduler.start(&vars, CountingSink::new()).await.unwrap();
        assert_eq!(scheduler.status().counters, PollCounters::default());
        scheduler.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_triggers() {
        let state = MockPlcState::new();
        let sink = CountingSink::new();
        {
            let scheduler = scheduler(&state);
            let vars = variables(&[("a", "DB1,REAL0", 100)]);
            scheduler.start(&vars, sink.clone()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        let seen = sink.count();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(sink.count(), seen);
    }
}
