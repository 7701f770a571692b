use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use lapin::{Channel, Connection, ConnectionProperties};
use parking_lot::RwLock;
use scorekeep_config::BrokerConfig;
use thiserror::Error;
use tracing::{info, warn};

const NORMAL_CLOSE: u16 = 200;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker unavailable after {attempts} attempts: {source}")]
    ConnectionUnavailable {
        attempts: u32,
        #[source]
        source: lapin::Error,
    },
    #[error("broker connection already established")]
    AlreadyConnected,
    #[error("broker is not connected")]
    NotConnected,
    #[error(transparent)]
    Amqp(#[from] lapin::Error),
}

/// The single AMQP connection shared by every migration.
///
/// The lock is only ever held for synchronous reads and swaps; the
/// connection itself is cloned out as an `Arc` before any await.
#[derive(Default)]
pub struct BrokerConnection {
    state: RwLock<Option<Arc<Connection>>>,
    connecting: AtomicBool,
}

impl std::fmt::Debug for BrokerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConnection")
            .field("ready", &self.ready())
            .field("connecting", &self.connecting.load(Ordering::Relaxed))
            .finish()
    }
}

struct ConnectingGuard<'a>(&'a AtomicBool);

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl BrokerConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects with bounded retries. The delay is only slept between
    /// failed attempts.
    pub async fn connect(&self, config: &BrokerConfig) -> Result<(), BrokerError> {
        if self.state.read().is_some()
            || self.connecting.swap(true, Ordering::AcqRel)
        {
            return Err(BrokerError::AlreadyConnected);
        }
        let _guard = ConnectingGuard(&self.connecting);

        let uri = config.amqp_uri();
        let attempts = config.connect_attempts.max(1);
        let mut attempt = 1;

        loop {
            match Connection::connect(&uri, connection_properties()).await {
                Ok(connection) => {
                    *self.state.write() = Some(Arc::new(connection));
                    info!(
                        broker = %config.redacted_uri(),
                        attempt,
                        "connected to broker"
                    );
                    return Ok(());
                }
                Err(err) if attempt >= attempts => {
                    return Err(BrokerError::ConnectionUnavailable {
                        attempts,
                        source: err,
                    });
                }
                Err(err) => {
                    warn!(
                        broker = %config.redacted_uri(),
                        attempt,
                        max_attempts = attempts,
                        error = %err,
                        "broker connection attempt failed"
                    );
                    tokio::time::sleep(config.retry_delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// True iff a connection exists and the client reports it connected.
    pub fn ready(&self) -> bool {
        self.state
            .read()
            .as_ref()
            .is_some_and(|connection| connection.status().connected())
    }

    pub async fn create_channel(&self) -> Result<Channel, BrokerError> {
        let connection =
            self.state.read().clone().ok_or(BrokerError::NotConnected)?;
        Ok(connection.create_channel().await?)
    }

    /// Closes the connection if one exists. State is reset first so a later
    /// `connect` succeeds even when the close handshake fails.
    pub async fn close(&self) -> Result<(), BrokerError> {
        let Some(connection) = self.state.write().take() else {
            return Ok(());
        };
        connection
            .close(NORMAL_CLOSE, "scorekeep shutting down")
            .await?;
        info!("broker connection closed");
        Ok(())
    }
}

fn connection_properties() -> ConnectionProperties {
    ConnectionProperties::default()
        .with_executor(tokio_executor_trait::Tokio::current())
        .with_reactor(tokio_reactor_trait::Tokio)
}
