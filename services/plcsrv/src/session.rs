//! Protocol session
//!
//! Owns one client connection and its batch-read manifest. The session does not
//! guard against concurrent reads itself; the scheduler holds it behind a mutex.

use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tracing::{debug, info, warn};

use crate::client::PlcClient;
use crate::error::{ConnectError, DisconnectError, ReadError};
use crate::types::{ConnectionParams, PollResult};

/// Connection lifecycle of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Failed(String),
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

/// One exclusive connection to a PLC endpoint
pub struct PlcSession<C: PlcClient> {
    client: C,
    state: SessionState,
    manifest: Vec<String>,
}

impl<C: PlcClient> PlcSession<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            state: SessionState::Disconnected,
            manifest: Vec::new(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// Registered addresses in registration order
    pub fn manifest(&self) -> &[String] {
        &self.manifest
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!("Session state {} -> {}", self.state, next);
            self.state = next;
        }
    }

    /// Open the connection and register `addresses` as the read manifest
    ///
    /// Any previous manifest is replaced, never extended. Duplicates are dropped
    /// keeping first-seen order.
    pub async fn connect(
        &mut self,
        params: &ConnectionParams,
        addresses: &[String],
    ) -> Result<(), ConnectError> {
        match self.state {
            SessionState::Disconnected | SessionState::Failed(_) => {},
            ref other => return Err(ConnectError::InvalidState(other.to_string())),
        }

        self.transition(SessionState::Connecting);

        if let Err(source) = self.client.connect(params).await {
            warn!("Connect to {} failed: {}", params, source);
            if let Err(e) = self.client.drop_connection().await {
                debug!("Ignoring close error after failed connect: {}", e);
            }
            self.client.remove_items();
            self.manifest.clear();
            self.transition(SessionState::Failed(source.to_string()));
            return Err(ConnectError::Client {
                endpoint: params.endpoint(),
                source,
            });
        }

        let mut seen = HashSet::with_capacity(addresses.len());
        let manifest: Vec<String> = addresses
            .iter()
            .filter(|address| seen.insert(address.as_str()))
            .cloned()
            .collect();

        self.client.remove_items();
        self.client.add_items(&manifest);
        self.manifest = manifest;

        info!(
            "Session connected to {} with {} addresses",
            params,
            self.manifest.len()
        );
        self.transition(SessionState::Connected);
        Ok(())
    }

    /// Close the connection
    ///
    /// The session is Disconnected on return whatever the client reports.
    pub async fn disconnect(&mut self) -> Result<(), DisconnectError> {
        if self.state == SessionState::Disconnected {
            return Ok(());
        }

        let result = self.client.drop_connection().await;
        self.client.remove_items();
        self.manifest.clear();
        self.transition(SessionState::Disconnected);

        match result {
            Ok(()) => {
                info!("Session disconnected");
                Ok(())
            },
            Err(e) => {
                warn!("Session close reported an error: {}", e);
                Err(DisconnectError(e))
            },
        }
    }

    /// Disconnect, ignoring close errors, then connect again
    pub async fn reconnect(
        &mut self,
        params: &ConnectionParams,
        addresses: &[String],
    ) -> Result<(), ConnectError> {
        if let Err(e) = self.disconnect().await {
            debug!("Ignoring disconnect error before reconnect: {}", e);
        }
        self.connect(params, addresses).await
    }

    /// Read the whole manifest in one exchange
    ///
    /// A failed read leaves the state untouched; the caller decides on recovery.
    pub async fn read_batch(&mut self) -> Result<PollResult, ReadError> {
        if self.state != SessionState::Connected {
            return Err(ReadError::NotConnected);
        }

        let timestamp = Utc::now();
        let values = self.client.read_all_items().await?;
        let readings: BTreeMap<_, _> = values.into_iter().collect();
        Ok(PollResult::new(timestamp, readings))
    }

    /// Give up on the connection after recovery was exhausted
    pub(crate) fn mark_failed(&mut self, reason: impl Into<String>) {
        self.transition(SessionState::Failed(reason.into()));
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::error::ClientError;
    use crate::test_utils::{MockPlcClient, MockPlcState};
    use std::sync::atomic::Ordering;

    fn addresses(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn session() -> (PlcSession<MockPlcClient>, std::sync::Arc<MockPlcState>) {
        let state = MockPlcState::new();
        (PlcSession::new(MockPlcClient::new(state.clone())), state)
    }

    #[tokio::test]
    async fn test_connect_registers_manifest_once() {
        let (mut session, state) = session();
        session
            .connect(
                &ConnectionParams::default(),
                &addresses(&["DB1,REAL0", "DB1,X6.0", "DB1,REAL0"]),
            )
            .await
            .unwrap();

        assert_eq!(session.state(), &SessionState::Connected);
        assert_eq!(session.manifest(), addresses(&["DB1,REAL0", "DB1,X6.0"]));
        assert_eq!(state.manifest(), addresses(&["DB1,REAL0", "DB1,X6.0"]));
    }

    #[tokio::test]
    async fn test_connect_while_connected_is_rejected() {
        let (mut session, state) = session();
        let params = ConnectionParams::default();
        session.connect(&params, &addresses(&["DB1,INT0"])).await.unwrap();

        let err = session
            .connect(&params, &addresses(&["DB1,INT0"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::InvalidState(_)));
        assert_eq!(state.connect_count(), 1);
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn test_reconnect_replaces_manifest() {
        let (mut session, state) = session();
        let params = ConnectionParams::default();
        let list = addresses(&["DB1,INT0", "DB1,INT2"]);
        session.connect(&params, &list).await.unwrap();
        session.reconnect(&params, &list).await.unwrap();
        session.reconnect(&params, &list).await.unwrap();

        assert_eq!(state.manifest(), list);
        assert_eq!(state.connect_count(), 3);
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn test_failed_connect_releases_connection() {
        let (mut session, state) = session();
        state.fail_next_connects(1);

        let err = session
            .connect(&ConnectionParams::default(), &addresses(&["DB1,INT0"]))
            .await
            .unwrap_err();

        assert!(matches!(err, ConnectError::Client { .. }));
        assert!(matches!(session.state(), SessionState::Failed(_)));
        assert_eq!(state.disconnect_count(), 1);
        assert!(session.manifest().is_empty());

        // Failed sessions may connect again
        session
            .connect(&ConnectionParams::default(), &addresses(&["DB1,INT0"]))
            .await
            .unwrap();
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_error_still_disconnects() {
        let (mut session, state) = session();
        session
            .connect(&ConnectionParams::default(), &addresses(&["DB1,INT0"]))
            .await
            .unwrap();
        state.fail_disconnect.store(true, Ordering::SeqCst);

        let err = session.disconnect().await.unwrap_err();
        assert_eq!(err.0, ClientError::Connection("Close failed".to_string()));
        assert_eq!(session.state(), &SessionState::Disconnected);
        assert!(state.manifest().is_empty());

        // Second disconnect is a no-op
        session.disconnect().await.unwrap();
        assert_eq!(state.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_read_requires_connected_session() {
        let (mut session, state) = session();
        assert!(matches!(
            session.read_batch().await,
            Err(ReadError::NotConnected)
        ));
        assert_eq!(state.read_count(), 0);
    }

    #[tokio::test]
    async fn test_read_failure_keeps_state() {
        let (mut session, state) = session();
        session
            .connect(&ConnectionParams::default(), &addresses(&["DB1,INT0"]))
            .await
            .unwrap();
        state.fail_next_reads(1);

        assert!(matches!(
            session.read_batch().await,
            Err(ReadError::Transport(_))
        ));
        assert!(session.is_connected());

        let result = session.read_batch().await.unwrap();
        assert_eq!(result.readings.len(), 1);
    }
}
