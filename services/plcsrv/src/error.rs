//! Error handling for the PLC acquisition core
//!
//! Each boundary of the session and scheduler returns its own error kind so that
//! callers can tell validation, connection and lifecycle failures apart.
//! Conversions into `errors::PlcsrvError` give the HTTP layer its status codes.

use errors::PlcsrvError;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by the underlying protocol client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Endpoint unreachable, handshake or rack/slot rejected
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed response or unsupported address
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Exchange did not complete in time
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Operation requires an open connection
    #[error("Not connected")]
    NotConnected,
}

/// Session connect failures
#[derive(Error, Debug, Clone)]
pub enum ConnectError {
    /// Session is neither Disconnected nor Failed
    #[error("Cannot connect while session is {0}")]
    InvalidState(String),

    /// The client could not open the connection
    #[error("Connection to {endpoint} failed: {source}")]
    Client {
        endpoint: String,
        #[source]
        source: ClientError,
    },
}

impl ConnectError {
    /// Endpoint the failed attempt targeted, if one was tried
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            ConnectError::Client { endpoint, .. } => Some(endpoint),
            ConnectError::InvalidState(_) => None,
        }
    }
}

/// Batched read failures
#[derive(Error, Debug, Clone)]
pub enum ReadError {
    #[error("Session is not connected")]
    NotConnected,

    #[error("Transport error: {0}")]
    Transport(#[from] ClientError),
}

/// Close reported an error; the session is Disconnected regardless
#[derive(Error, Debug, Clone)]
#[error("Disconnect failed: {0}")]
pub struct DisconnectError(#[from] pub ClientError);

/// Scheduler start failures
#[derive(Error, Debug, Clone)]
pub enum StartError {
    #[error("Polling is already running")]
    AlreadyRunning,

    #[error("No variables configured for polling")]
    EmptyVariableSet,

    #[error("Invalid variable '{name}': {reason}")]
    InvalidVariable { name: String, reason: String },

    #[error("Failed to connect to PLC: {0}")]
    ConnectFailed(#[source] ConnectError),

    /// The background start task ended without a result
    #[error("Polling start interrupted: {0}")]
    Interrupted(String),
}

/// Scheduler stop failures
#[derive(Error, Debug, Clone)]
pub enum StopError {
    #[error("Polling is not running")]
    NotRunning,

    /// Triggers drained but the session close reported an error
    #[error("Polling stopped with disconnect error: {0}")]
    Disconnect(#[source] DisconnectError),

    /// In-flight ticks did not finish within the drain timeout
    #[error("Polling stop timed out after {0:?} waiting for in-flight reads")]
    StopTimedOut(Duration),

    /// The background teardown task ended without a result; the scheduler is Idle
    #[error("Polling stop interrupted: {0}")]
    Interrupted(String),
}

impl From<StartError> for PlcsrvError {
    fn from(err: StartError) -> Self {
        match err {
            StartError::AlreadyRunning => PlcsrvError::InvalidState(err.to_string()),
            StartError::EmptyVariableSet => PlcsrvError::Validation(err.to_string()),
            StartError::InvalidVariable { name, reason } => PlcsrvError::InvalidParameter {
                param: name,
                reason,
            },
            StartError::ConnectFailed(cause) => PlcsrvError::ConnectionFailed {
                endpoint: cause.endpoint().unwrap_or("unknown").to_string(),
                reason: cause.to_string(),
            },
            StartError::Interrupted(_) => PlcsrvError::StartupFailed(err.to_string()),
        }
    }
}

impl From<StopError> for PlcsrvError {
    fn from(err: StopError) -> Self {
        match err {
            StopError::NotRunning => PlcsrvError::InvalidState(err.to_string()),
            StopError::Disconnect(_) => PlcsrvError::ShutdownError(err.to_string()),
            StopError::StopTimedOut(_) => PlcsrvError::Timeout(err.to_string()),
            StopError::Interrupted(_) => PlcsrvError::ShutdownError(err.to_string()),
        }
    }
}
