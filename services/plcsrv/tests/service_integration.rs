//! Service wiring tests: config file → simulated PLC → HTTP control → SQLite

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use plcsrv::api::{create_routes, AppState};
use plcsrv::config::{PlcsrvConfig, SinkKind};
use plcsrv::runtime::{build_scheduler, build_sink};
use plcsrv::sink::SqliteSink;
use plcsrv::StaticVariableRegistry;
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

fn write_config(dir: &tempfile::TempDir, db_path: &str) -> std::path::PathBuf {
    let path = dir.path().join("plcsrv.yaml");
    let content = format!(
        r#"
service:
  name: plcsrv-test
plc:
  host: 127.0.0.1
  port: 102
  rack: 0
  slot: 1
variables:
  temperature:
    address: DB10,REAL10
    sampling_interval_ms: 50
  pressure:
    address: DB10,INT4
    sampling_interval_ms: 50
  running:
    address: DB10,X0.0
    sampling_interval_ms: 100
sink:
  kind: sqlite
  sqlite_path: {}
"#,
        db_path
    );
    std::fs::write(&path, content).unwrap();
    path
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method("POST")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_simulated_plc_into_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("data").join("readings.db");
    let config_path = write_config(&dir, &db_path.to_string_lossy());

    let config = PlcsrvConfig::load_with_env(&config_path, "PLCSRV_TEST_SERVICE_").unwrap();
    assert_eq!(config.sink.kind, SinkKind::Sqlite);
    assert_eq!(config.variables.len(), 3);

    let scheduler = Arc::new(build_scheduler(&config));
    let sink = build_sink(&config.sink).await.unwrap();
    let registry = Arc::new(StaticVariableRegistry::new(config.variables.clone()));
    let state = Arc::new(AppState::new(
        config.service.name.clone(),
        Arc::clone(&scheduler),
        registry,
        sink,
    ));
    let app = create_routes(state);

    let resp = app.clone().oneshot(post("/api/polling/start")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(scheduler.status().active_trigger_count, 2);

    tokio::time::sleep(Duration::from_millis(400)).await;

    let resp = app.oneshot(post("/api/polling/stop")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(!scheduler.is_running());

    let reader = SqliteSink::open(&db_path).await.unwrap();
    let counts: Vec<(String, i64)> = sqlx::query_as(
        "SELECT address, COUNT(*) FROM readings GROUP BY address ORDER BY address",
    )
    .fetch_all(reader.pool())
    .await
    .unwrap();
    assert_eq!(counts.len(), 3);
    assert!(counts.iter().all(|(_, n)| *n > 0));

    let bits: Vec<f64> = sqlx::query_scalar("SELECT value FROM readings WHERE address = ?")
        .bind("DB10,X0.0")
        .fetch_all(reader.pool())
        .await
        .unwrap();
    assert!(bits.iter().all(|v| *v == 0.0 || *v == 1.0));

    // Rows of one batch share a timestamp
    let shared: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM (SELECT timestamp FROM readings \
         WHERE address IN ('DB10,REAL10', 'DB10,INT4') \
         GROUP BY timestamp HAVING COUNT(*) = 2)",
    )
    .fetch_one(reader.pool())
    .await
    .unwrap();
    assert!(shared > 0);
}

#[tokio::test]
async fn test_unreachable_plc_reports_bad_gateway() {
    let mut config = PlcsrvConfig::default();
    // Rack outside the addressable range is refused by the client
    config.plc.rack = 9;
    config.variables = plcsrv::test_utils::variables(&[("a", "DB1,REAL0", 100)]);

    let scheduler = Arc::new(build_scheduler(&config));
    let state = Arc::new(AppState::new(
        "plcsrv",
        Arc::clone(&scheduler),
        Arc::new(StaticVariableRegistry::new(config.variables.clone())),
        build_sink(&config.sink).await.unwrap(),
    ));

    let resp = create_routes(state)
        .oneshot(post("/api/polling/start"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    assert!(!scheduler.is_running());
    assert!(matches!(
        scheduler.status().session_state,
        plcsrv::SessionState::Failed(_)
    ));
}
