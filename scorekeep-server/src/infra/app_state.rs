use std::{
    fmt,
    sync::{Arc, OnceLock},
};

use scorekeep_core::{
    LoaderInitError, PolicyLoader, PolicyLoaderConfig, PolicySandbox,
    SandboxLimits,
};
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::infra::broker::{
    BrokerConnection, MigrationControlPlane, MigrationDefaults,
};
use crate::infra::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub broker: Arc<BrokerConnection>,
    pub migrations: Arc<MigrationControlPlane>,
    pub lifecycle: Arc<Lifecycle>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("broker", &self.broker)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Wires the sandbox, policy loader, broker handle and migration
    /// control plane from resolved configuration. Does not connect.
    pub fn build(config: Config) -> Result<Self, LoaderInitError> {
        let sandbox = Arc::new(PolicySandbox::new(SandboxLimits {
            invoke_timeout: config.policy.invoke_timeout,
            max_operations: config.policy.max_operations,
            ..SandboxLimits::default()
        }));

        let loader = PolicyLoader::new(
            &PolicyLoaderConfig {
                trusted_ca: config.policy.trusted_ca.clone(),
                trusted_server: config.policy.trusted_server.clone(),
                fetch_timeout: config.policy.fetch_timeout,
                max_source_bytes: config.policy.max_source_bytes,
            },
            sandbox,
        )?;

        let broker = Arc::new(BrokerConnection::new());
        let migrations = Arc::new(MigrationControlPlane::new(
            Arc::clone(&broker),
            loader,
            MigrationDefaults {
                exchange: config.broker.exchange_name.clone(),
                invoke_timeout: config.policy.invoke_timeout,
            },
        ));

        Ok(Self {
            config: Arc::new(config),
            broker,
            migrations,
            lifecycle: Arc::new(Lifecycle::default()),
        })
    }

    pub fn policy_loader(&self) -> &PolicyLoader {
        self.migrations.loader()
    }

    pub fn sandbox(&self) -> &Arc<PolicySandbox> {
        self.policy_loader().sandbox()
    }
}

/// Process-wide shutdown signal plus the reason, if startup failed.
#[derive(Debug, Default)]
pub struct Lifecycle {
    shutdown: CancellationToken,
    fatal: OnceLock<String>,
}

impl Lifecycle {
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Records a fatal error and triggers shutdown. Only the first reason
    /// is kept.
    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        error!(reason = %reason, "fatal error, shutting down");
        let _ = self.fatal.set(reason);
        self.shutdown.cancel();
    }

    pub fn fatal_reason(&self) -> Option<&str> {
        self.fatal.get().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_fatal_reason_wins() {
        let lifecycle = Lifecycle::default();
        let token = lifecycle.shutdown_token();
        assert!(lifecycle.fatal_reason().is_none());

        lifecycle.fail("broker unreachable");
        lifecycle.fail("something later");

        assert!(token.is_cancelled());
        assert_eq!(lifecycle.fatal_reason(), Some("broker unreachable"));
    }
}
