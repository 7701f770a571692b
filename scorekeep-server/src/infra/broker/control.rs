use std::{sync::Arc, time::Duration};

use axum::http::StatusCode;
use futures_util::StreamExt;
use lapin::{
    Channel, Consumer, ExchangeKind,
    options::{
        BasicConsumeOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
};
use scorekeep_core::{PolicyError, PolicyLoader, ScoringPolicy};
use scorekeep_model::MigrationStart;
use thiserror::Error;
use tracing::{info, warn};

use super::{
    connection::{BrokerConnection, BrokerError},
    pipeline::{ChannelPublisher, InboundDelivery, ScoringPipeline},
    registry::MigrationRegistry,
    session::{MigrationSession, MigrationSummary, SessionParts, close_channel},
};

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("RabbitMQ is not connected")]
    NotConnected,
    #[error("Migration {0} already exists")]
    DuplicateMigration(String),
    #[error("Migration {0} does not exist")]
    UnknownMigration(String),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error("broker setup failed: {0}")]
    Broker(#[from] BrokerError),
}

impl MigrationError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            MigrationError::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
            MigrationError::DuplicateMigration(_) => StatusCode::CONFLICT,
            MigrationError::UnknownMigration(_) => StatusCode::NOT_FOUND,
            MigrationError::Policy(_) => StatusCode::BAD_REQUEST,
            MigrationError::Broker(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl From<lapin::Error> for MigrationError {
    fn from(err: lapin::Error) -> Self {
        MigrationError::Broker(BrokerError::Amqp(err))
    }
}

/// Settings every migration inherits.
#[derive(Debug, Clone)]
pub struct MigrationDefaults {
    pub exchange: String,
    pub invoke_timeout: Duration,
}

/// Starts, inspects and stops migrations.
#[derive(Debug)]
pub struct MigrationControlPlane {
    broker: Arc<BrokerConnection>,
    loader: PolicyLoader,
    registry: MigrationRegistry<MigrationSession>,
    defaults: MigrationDefaults,
}

impl MigrationControlPlane {
    pub fn new(
        broker: Arc<BrokerConnection>,
        loader: PolicyLoader,
        defaults: MigrationDefaults,
    ) -> Self {
        Self {
            broker,
            loader,
            registry: MigrationRegistry::new(),
            defaults,
        }
    }

    pub fn broker(&self) -> &Arc<BrokerConnection> {
        &self.broker
    }

    pub fn loader(&self) -> &PolicyLoader {
        &self.loader
    }

    /// Brings a migration up. Every fallible step runs before the session
    /// is registered, so a failure never leaves a half-created migration.
    ///
    /// `override_policy` is compiled as-is instead of downloading
    /// `start.policy_uri`.
    pub async fn start_migration(
        &self,
        start: MigrationStart,
        override_policy: Option<&str>,
    ) -> Result<(), MigrationError> {
        if !self.broker.ready() {
            return Err(MigrationError::NotConnected);
        }
        if self.registry.contains(&start.migration_id) {
            return Err(MigrationError::DuplicateMigration(start.migration_id));
        }

        let policy: Arc<dyn ScoringPolicy> = match override_policy {
            Some(source) => Arc::new(
                self.loader.compile(source).map_err(PolicyError::from)?,
            ),
            None => Arc::new(
                self.loader
                    .download_and_verify_policy(&start.policy_uri)
                    .await?,
            ),
        };

        let producer = self.open_producer(&start).await?;
        let (consumer_channel, consumer) =
            match self.open_consumer(&start).await {
                Ok(opened) => opened,
                Err(err) => {
                    close_channel(&start.migration_id, &producer).await;
                    return Err(err);
                }
            };

        let session = MigrationSession::new(SessionParts {
            migration_id: start.migration_id.clone(),
            score_created_routing_key: start.score_created_routing_key.clone(),
            raw_grade_routing_key: start.raw_grade_routing_key.clone(),
            producer: producer.clone(),
            consumer: consumer_channel,
            consumer_tag: consumer.tag().as_str().to_string(),
        });

        let session = match self
            .registry
            .try_insert(start.migration_id.clone(), session)
        {
            Ok(session) => session,
            Err(rejected) => {
                rejected.close().await;
                return Err(MigrationError::DuplicateMigration(
                    start.migration_id,
                ));
            }
        };

        let pipeline = ScoringPipeline::new(
            start.migration_id.clone(),
            start.metadata,
            start.score_created_routing_key,
            policy,
            Arc::new(ChannelPublisher::new(
                producer,
                self.defaults.exchange.clone(),
            )),
            self.defaults.invoke_timeout,
            Arc::clone(session.stats()),
        );
        let deliveries =
            consumer.map(|delivery| delivery.map(InboundDelivery::from));
        let cancel = session.cancellation();
        let handle = tokio::spawn(async move {
            pipeline.run(deliveries, cancel).await;
        });
        session.attach_task(handle);

        info!(
            migration_id = %start.migration_id,
            routing_key = %start.raw_grade_routing_key,
            "migration started"
        );
        Ok(())
    }

    async fn declare_exchange(&self, channel: &Channel) -> Result<(), lapin::Error> {
        channel
            .exchange_declare(
                &self.defaults.exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
    }

    async fn open_producer(
        &self,
        start: &MigrationStart,
    ) -> Result<Channel, MigrationError> {
        let channel = self.broker.create_channel().await?;
        let declared = async {
            self.declare_exchange(&channel).await?;
            let queue = channel
                .queue_declare(
                    "",
                    QueueDeclareOptions::default(),
                    FieldTable::default(),
                )
                .await?;
            channel
                .queue_bind(
                    queue.name().as_str(),
                    &self.defaults.exchange,
                    &start.score_created_routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
        }
        .await;

        match declared {
            Ok(()) => Ok(channel),
            Err(err) => {
                close_channel(&start.migration_id, &channel).await;
                Err(err.into())
            }
        }
    }

    async fn open_consumer(
        &self,
        start: &MigrationStart,
    ) -> Result<(Channel, Consumer), MigrationError> {
        let channel = self.broker.create_channel().await?;
        let consumer = async {
            self.declare_exchange(&channel).await?;
            let queue = channel
                .queue_declare(
                    "",
                    QueueDeclareOptions {
                        exclusive: true,
                        ..QueueDeclareOptions::default()
                    },
                    FieldTable::default(),
                )
                .await?;
            channel
                .queue_bind(
                    queue.name().as_str(),
                    &self.defaults.exchange,
                    &start.raw_grade_routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;
            channel
                .basic_consume(
                    queue.name().as_str(),
                    "",
                    BasicConsumeOptions {
                        no_ack: true,
                        ..BasicConsumeOptions::default()
                    },
                    FieldTable::default(),
                )
                .await
        }
        .await;

        match consumer {
            Ok(consumer) => Ok((channel, consumer)),
            Err(err) => {
                close_channel(&start.migration_id, &channel).await;
                Err(err.into())
            }
        }
    }

    pub async fn stop_migration(
        &self,
        migration_id: &str,
    ) -> Result<MigrationSummary, MigrationError> {
        let session = self.registry.remove(migration_id).ok_or_else(|| {
            MigrationError::UnknownMigration(migration_id.to_string())
        })?;
        session.close().await;
        info!(migration_id, "migration stopped");
        Ok(session.summary())
    }

    pub fn list(&self) -> Vec<MigrationSummary> {
        let mut summaries: Vec<_> = self
            .registry
            .list()
            .iter()
            .map(|session| session.summary())
            .collect();
        summaries.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        summaries
    }

    pub fn get(&self, migration_id: &str) -> Option<MigrationSummary> {
        self.registry
            .get(migration_id)
            .map(|session| session.summary())
    }

    /// Stops every running migration.
    pub async fn shutdown(&self) {
        let sessions = self.registry.drain();
        if sessions.is_empty() {
            return;
        }
        info!(count = sessions.len(), "stopping migrations");
        for session in sessions {
            session.close().await;
            let counts = session.stats().snapshot();
            if counts.failed > 0 {
                warn!(
                    migration_id = %session.migration_id,
                    failed = counts.failed,
                    "migration stopped with failed deliveries"
                );
            }
        }
    }
}
