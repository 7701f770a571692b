use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use scorekeep_server::{
    AppState,
    infra::startup::{NoopStartupHooks, ProdStartupHooks, StartupHooks},
};

mod support;
use support::test_config;

struct RecordingHooks {
    called: Arc<AtomicBool>,
}

#[async_trait]
impl StartupHooks for RecordingHooks {
    async fn run(&self, _state: &AppState) -> Result<()> {
        self.called.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn custom_hooks_receive_the_state() -> Result<()> {
    let state = AppState::build(test_config(""))?;
    let flag = Arc::new(AtomicBool::new(false));

    RecordingHooks {
        called: Arc::clone(&flag),
    }
    .run(&state)
    .await?;
    NoopStartupHooks.run(&state).await?;

    assert!(flag.load(Ordering::SeqCst));
    Ok(())
}

#[tokio::test]
async fn unreachable_broker_triggers_fatal_shutdown() -> Result<()> {
    let state = AppState::build(test_config(""))?;
    let shutdown = state.lifecycle.shutdown_token();

    ProdStartupHooks.run(&state).await?;
    tokio::time::timeout(Duration::from_secs(10), shutdown.cancelled()).await?;

    let reason = state.lifecycle.fatal_reason().unwrap_or_default();
    assert!(reason.starts_with("broker unavailable after 1 attempts"));
    assert!(!state.broker.ready());
    Ok(())
}
