use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::infra::app_state::AppState;

#[async_trait]
pub trait StartupHooks: Send + Sync {
    async fn run(&self, state: &AppState) -> Result<()>;
}

/// Connects to the broker in the background so the HTTP listener comes up
/// immediately and `/-/ready` reports 500 until the connection exists.
/// Exhausting the connection retries is fatal.
#[derive(Debug, Default)]
pub struct ProdStartupHooks;

#[async_trait]
impl StartupHooks for ProdStartupHooks {
    async fn run(&self, state: &AppState) -> Result<()> {
        let broker = state.broker.clone();
        let config = state.config.clone();
        let lifecycle = state.lifecycle.clone();

        tokio::spawn(async move {
            info!(
                broker = %config.broker.redacted_uri(),
                attempts = config.broker.connect_attempts,
                "connecting to broker"
            );
            if let Err(err) = broker.connect(&config.broker).await {
                lifecycle.fail(err.to_string());
            }
        });

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct NoopStartupHooks;

#[async_trait]
impl StartupHooks for NoopStartupHooks {
    async fn run(&self, _state: &AppState) -> Result<()> {
        Ok(())
    }
}
