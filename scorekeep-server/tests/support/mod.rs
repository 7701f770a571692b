#![allow(dead_code)]

use std::time::Duration;

use axum::{Router, routing::get};
use axum_test::TestServer;
use scorekeep_server::{
    AppState, create_app,
    infra::config::{BrokerConfig, Config, PolicyConfig, ServerConfig},
};
use scorekeep_config::ConfigMetadata;
use tokio::net::TcpListener;

pub const LATE_PASS_POLICY: &str = r#"
    let days_late = days_between(rawScore.initialDueDate, rawScore.submissionDate);
    let covered = rawScore.extensionStatus == "approved" && rawScore.extensionDays >= days_late;
    #{
        finalScore: if covered { rawScore.rawScore } else { rawScore.rawScore * 0.5 },
        adjustedSubmissionDate: rawScore.submissionDate,
        adjustedDaysLate: if covered { 0.0 } else { days_late },
        submissionStatus: if covered { "extended" } else { "late" },
        extensionStatus: if covered { "approved" } else { "ignored" }
    }
"#;

pub fn test_config(base_path: &str) -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            base_path: base_path.into(),
        },
        broker: BrokerConfig {
            username: "guest".into(),
            password: "guest".into(),
            host: "127.0.0.1".into(),
            port: 1,
            vhost: "/".into(),
            exchange_name: "grading".into(),
            connect_attempts: 1,
            retry_delay: Duration::from_millis(10),
        },
        policy: PolicyConfig {
            trusted_ca: None,
            trusted_server: None,
            fetch_timeout: Duration::from_secs(5),
            max_source_bytes: 64 * 1024,
            invoke_timeout: Duration::from_millis(500),
            max_operations: 1_000_000,
        },
        metadata: ConfigMetadata::default(),
    }
}

/// Router over an app whose broker is never connected.
pub fn build_test_server(base_path: &str) -> (TestServer, AppState) {
    let state = AppState::build(test_config(base_path))
        .unwrap_or_else(|err| panic!("failed to build state: {err}"));
    let server = TestServer::new(create_app(state.clone()))
        .unwrap_or_else(|err| panic!("failed to build test server: {err}"));
    (server, state)
}

/// Serves `source` at `/policy.rhai` on an ephemeral port.
pub async fn serve_policy(source: &'static str) -> String {
    let app = Router::new().route("/policy.rhai", get(move || async move { source }));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/policy.rhai")
}

pub fn raw_score_json() -> serde_json::Value {
    serde_json::json!({
        "cwid": "10000",
        "assignmentId": "hw-1",
        "rawScore": 10,
        "minScore": 0,
        "maxScore": 10,
        "initialDueDate": "2025-01-10T23:59:00Z",
        "submissionDate": "2025-01-12T10:00:00Z",
        "submissionStatus": "late",
        "extensionDays": 3,
        "extensionType": "Late Pass",
        "extensionStatus": "approved"
    })
}
