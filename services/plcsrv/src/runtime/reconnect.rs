//! Reconnection mechanism implementation
//!
//! Tracks reconnect attempts with exponential backoff and jitter. The helper never
//! sleeps: callers ask whether an attempt is due and skip work while cooling down,
//! so no lock is held across a backoff delay.

use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Connection state as seen by the reconnect helper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Connected,
    /// Connection lost, a reconnect is pending
    Disconnected,
    /// Max attempts reached
    Failed,
}

/// Reconnection policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Maximum retry attempts (0 means unlimited)
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Backoff multiplier for exponential delay
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ReconnectPolicy {
    /// Create from configuration values
    pub fn from_config(
        max_attempts: u32,
        initial_delay_ms: u64,
        max_delay_ms: u64,
        backoff_multiplier: f64,
        jitter: bool,
    ) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(initial_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
            backoff_multiplier,
            jitter,
        }
    }

    fn attempts_label(&self) -> String {
        if self.max_attempts == 0 {
            "∞".to_string()
        } else {
            self.max_attempts.to_string()
        }
    }
}

/// What the caller should do on this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Try to reconnect now
    Attempt,
    /// Still inside the backoff window
    CoolingDown(Duration),
    /// Max attempts reached, give up
    Exhausted,
}

/// Attempt bookkeeping since the last successful connection
#[derive(Debug, Clone)]
struct ReconnectContext {
    current_attempt: u32,
    /// Earliest time the next attempt may start
    next_attempt: Option<Instant>,
    connection_state: ConnectionState,
}

impl Default for ReconnectContext {
    fn default() -> Self {
        Self {
            current_attempt: 0,
            next_attempt: None,
            connection_state: ConnectionState::Connected,
        }
    }
}

/// Reconnection helper with backoff
///
/// Attempt and outcome counters live in the scheduler's status, not here.
#[derive(Debug)]
pub struct ReconnectHelper {
    policy: ReconnectPolicy,
    context: ReconnectContext,
}

impl ReconnectHelper {
    /// Create a helper for a freshly connected session
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            context: ReconnectContext::default(),
        }
    }

    /// True when the connection must be re-established before the next read
    pub fn needs_reconnect(&self) -> bool {
        self.context.connection_state != ConnectionState::Connected
    }

    /// Mark the connection as lost; the next `poll_attempt` is immediate
    pub fn mark_disconnected(&mut self) {
        if self.context.connection_state == ConnectionState::Connected {
            self.context.connection_state = ConnectionState::Disconnected;
            self.context.current_attempt = 0;
            self.context.next_attempt = None;
            debug!("Connection marked as disconnected");
        }
    }

    fn mark_connected(&mut self) {
        self.context.connection_state = ConnectionState::Connected;
        self.context.current_attempt = 0;
        self.context.next_attempt = None;
        debug!("Connection marked as successful");
    }

    /// Calculate the delay after the current attempt with exponential backoff
    pub fn calculate_next_delay(&self) -> Duration {
        let attempt = self.context.current_attempt.saturating_sub(1);
        let base_delay = self.policy.initial_delay;
        let multiplier = self.policy.backoff_multiplier;

        // Exponential backoff: delay = initial_delay * (multiplier ^ attempt)
        let secs = base_delay.as_secs_f64() * multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let mut delay = if secs.is_finite() && secs < self.policy.max_delay.as_secs_f64() {
            Duration::from_secs_f64(secs.max(0.0))
        } else {
            // Cap at maximum delay
            self.policy.max_delay
        };

        // Add jitter (±25% of delay)
        if self.policy.jitter {
            let jitter_range = delay.as_millis() as f64 * 0.25;
            if jitter_range > 0.0 {
                let jitter = rand::thread_rng().gen_range(-jitter_range..jitter_range);
                let delay_ms = (delay.as_millis() as f64 + jitter).max(0.0);
                delay = Duration::from_millis(delay_ms as u64);
            }
        }

        delay
    }

    /// Decide whether an attempt is due at `now`; starting one counts it
    pub fn poll_attempt(&mut self, now: Instant) -> ReconnectDecision {
        if self.context.connection_state == ConnectionState::Failed {
            return ReconnectDecision::Exhausted;
        }

        // Check if maximum retry attempts reached
        if self.policy.max_attempts > 0 && self.context.current_attempt >= self.policy.max_attempts
        {
            self.context.connection_state = ConnectionState::Failed;
            warn!(
                "Maximum reconnection attempts ({}) exceeded",
                self.policy.max_attempts
            );
            return ReconnectDecision::Exhausted;
        }

        if let Some(next) = self.context.next_attempt {
            if now < next {
                return ReconnectDecision::CoolingDown(next - now);
            }
        }

        self.context.current_attempt += 1;

        info!(
            "Starting reconnection attempt {}/{}",
            self.context.current_attempt,
            self.policy.attempts_label()
        );
        ReconnectDecision::Attempt
    }

    /// Record a successful attempt
    pub fn record_success(&mut self) {
        info!(
            "Reconnection successful (attempt {})",
            self.context.current_attempt
        );
        self.mark_connected();
    }

    /// Record a failed attempt and arm the cooldown
    ///
    /// Returns the delay before the next attempt, or `None` once attempts are
    /// exhausted.
    pub fn record_failure(&mut self, now: Instant, reason: &str) -> Option<Duration> {
        warn!(
            "Reconnection attempt {} failed: {}",
            self.context.current_attempt, reason
        );

        if self.policy.max_attempts > 0 && self.context.current_attempt >= self.policy.max_attempts
        {
            self.context.connection_state = ConnectionState::Failed;
            self.context.next_attempt = None;
            warn!(
                "Maximum reconnection attempts ({}) exceeded",
                self.policy.max_attempts
            );
            return None;
        }

        self.context.connection_state = ConnectionState::Disconnected;
        let delay = self.calculate_next_delay();
        self.context.next_attempt = Some(now + delay);
        info!("Waiting {:?} before next reconnection attempt", delay);
        Some(delay)
    }
}
