//! Result sinks
//!
//! A sink receives every `PollResult` a trigger produces. Errors are opaque to the
//! scheduler: they are logged and counted, never retried.

pub mod sqlite;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::types::PollResult;

pub use sqlite::SqliteSink;

/// Consumer of polling results
#[async_trait]
pub trait ResultSink: Send + Sync + 'static {
    async fn accept(&self, result: PollResult) -> anyhow::Result<()>;
}

#[async_trait]
impl<S: ResultSink + ?Sized> ResultSink for Arc<S> {
    async fn accept(&self, result: PollResult) -> anyhow::Result<()> {
        (**self).accept(result).await
    }
}

/// Writes each reading to the tracing output
#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait]
impl ResultSink for LogSink {
    async fn accept(&self, result: PollResult) -> anyhow::Result<()> {
        let timestamp = result.timestamp_utc();
        for (address, value) in &result.readings {
            info!(target: "plcsrv::readings", "{} {} = {}", timestamp, address, value);
        }
        Ok(())
    }
}

/// Forwards results into an mpsc channel
///
/// Fails once the receiving side is gone.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<PollResult>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<PollResult>) -> Self {
        Self { tx }
    }

    /// Sink plus the receiver it feeds
    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<PollResult>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl ResultSink for ChannelSink {
    async fn accept(&self, result: PollResult) -> anyhow::Result<()> {
        let count = result.readings.len();
        self.tx
            .send(result)
            .await
            .map_err(|_| anyhow::anyhow!("Result channel closed"))?;
        debug!("Forwarded {} readings", count);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::types::PlcValue;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn sample() -> PollResult {
        let mut readings = BTreeMap::new();
        readings.insert("DB1,REAL0".to_string(), PlcValue::Real(1.25));
        PollResult::new(Utc::now(), readings)
    }

    #[tokio::test]
    async fn test_channel_sink_forwards_and_fails_when_closed() {
        let (sink, mut rx) = ChannelSink::with_capacity(4);
        sink.accept(sample()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().readings.len(), 1);

        drop(rx);
        assert!(sink.accept(sample()).await.is_err());
    }

    #[tokio::test]
    async fn test_arc_forwarding() {
        let (channel, mut rx) = ChannelSink::with_capacity(4);
        let sink: Arc<dyn ResultSink> = Arc::new(channel);

        sink.accept(sample()).await.unwrap();
        Arc::clone(&sink).accept(sample()).await.unwrap();
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_log_sink_writes_readings() {
        LogSink.accept(sample()).await.unwrap();
        assert!(logs_contain("DB1,REAL0 = 1.25"));
    }
}
