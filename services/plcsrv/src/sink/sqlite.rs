//! SQLite result sink
//!
//! One row per reading in `readings(id, timestamp, address, value)`. Every row of a
//! `PollResult` shares its timestamp and is written in a single transaction.

use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    SqlitePool,
};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::ResultSink;
use crate::types::PollResult;

const CREATE_READINGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS readings (
    id INTEGER PRIMARY KEY,
    timestamp TEXT NOT NULL,
    address TEXT NOT NULL,
    value REAL NOT NULL
)"#;

const CREATE_READINGS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_readings_address_timestamp ON readings(address, timestamp)";

#[derive(Clone)]
pub struct SqliteSink {
    pool: SqlitePool,
}

impl SqliteSink {
    /// Open (or create) the database file and ensure the schema exists
    pub async fn open(db_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let db_path = db_path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let sink = Self::from_pool(pool).await?;
        info!("SQLite sink ready: {}", db_path.display());
        Ok(sink)
    }

    /// Use an existing pool, creating the schema if missing
    pub async fn from_pool(pool: SqlitePool) -> anyhow::Result<Self> {
        sqlx::query(CREATE_READINGS_TABLE).execute(&pool).await?;
        sqlx::query(CREATE_READINGS_INDEX).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl ResultSink for SqliteSink {
    async fn accept(&self, result: PollResult) -> anyhow::Result<()> {
        if result.readings.is_empty() {
            return Ok(());
        }

        let timestamp = result.timestamp_utc();
        let mut tx = self.pool.begin().await?;
        for (address, value) in &result.readings {
            sqlx::query("INSERT INTO readings (timestamp, address, value) VALUES (?, ?, ?)")
                .bind(&timestamp)
                .bind(address)
                .bind(value.as_f64())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        debug!("Stored {} readings at {}", result.readings.len(), timestamp);
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

    #[tokio::test]
    async fn test_writes_one_row_per_reading_with_bool_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SqliteSink::open(dir.path().join("data/readings.db"))
            .await
            .unwrap();

        let mut readings = BTreeMap::new();
        readings.insert("DB1,REAL0".to_string(), PlcValue::Real(21.5));
        readings.insert("DB1,X6.0".to_string(), PlcValue::Bool(true));
        readings.insert("DB2,INT4".to_string(), PlcValue::Int(42));
        let result = PollResult::new(Utc::now(), readings);
        let expected_ts = result.timestamp_utc();

        sink.accept(result).await.unwrap();

        let rows: Vec<(String, String, f64)> =
            sqlx::query_as("SELECT timestamp, address, value FROM readings ORDER BY address")
                .fetch_all(sink.pool())
                .await
                .unwrap();

        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|(ts, _, _)| *ts == expected_ts));
        assert_eq!(rows[0], (expected_ts.clone(), "DB1,REAL0".to_string(), 21.5));
        assert_eq!(rows[1], (expected_ts.clone(), "DB1,X6.0".to_string(), 1.0));
        assert_eq!(rows[2], (expected_ts, "DB2,INT4".to_string(), 42.0));
    }

    #[tokio::test]
    async fn test_empty_result_writes_nothing() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let sink = SqliteSink::from_pool(pool).await.unwrap();

        sink.accept(PollResult::new(Utc::now(), BTreeMap::new()))
            .await
            .unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM readings")
            .fetch_one(sink.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
