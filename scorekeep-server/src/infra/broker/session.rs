use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use lapin::{Channel, options::BasicCancelOptions};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const CHANNEL_CLOSE_CODE: u16 = 200;
const CONSUMER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-session delivery counters.
#[derive(Debug, Default)]
pub struct SessionStats {
    scored: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl SessionStats {
    pub fn record_scored(&self) {
        self.scored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SessionCounts {
        SessionCounts {
            scored: self.scored.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionCounts {
    pub scored: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// What `GET /grading/migrations` reports for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationSummary {
    pub migration_id: String,
    pub started_at: DateTime<Utc>,
    pub score_created_routing_key: String,
    pub raw_grade_routing_key: String,
    pub counts: SessionCounts,
}

/// Broker resources owned by one running migration.
pub struct MigrationSession {
    pub migration_id: String,
    pub started_at: DateTime<Utc>,
    pub score_created_routing_key: String,
    pub raw_grade_routing_key: String,
    producer: Channel,
    consumer: Channel,
    consumer_tag: String,
    stats: Arc<SessionStats>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for MigrationSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationSession")
            .field("migration_id", &self.migration_id)
            .field("started_at", &self.started_at)
            .field("consumer_tag", &self.consumer_tag)
            .field("counts", &self.stats.snapshot())
            .finish()
    }
}

pub(crate) struct SessionParts {
    pub migration_id: String,
    pub score_created_routing_key: String,
    pub raw_grade_routing_key: String,
    pub producer: Channel,
    pub consumer: Channel,
    pub consumer_tag: String,
}

impl MigrationSession {
    pub(crate) fn new(parts: SessionParts) -> Self {
        Self {
            migration_id: parts.migration_id,
            started_at: Utc::now(),
            score_created_routing_key: parts.score_created_routing_key,
            raw_grade_routing_key: parts.raw_grade_routing_key,
            producer: parts.producer,
            consumer: parts.consumer,
            consumer_tag: parts.consumer_tag,
            stats: Arc::new(SessionStats::default()),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    pub fn stats(&self) -> &Arc<SessionStats> {
        &self.stats
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn attach_task(&self, handle: JoinHandle<()>) {
        *self.task.lock() = Some(handle);
    }

    pub fn summary(&self) -> MigrationSummary {
        MigrationSummary {
            migration_id: self.migration_id.clone(),
            started_at: self.started_at,
            score_created_routing_key: self.score_created_routing_key.clone(),
            raw_grade_routing_key: self.raw_grade_routing_key.clone(),
            counts: self.stats.snapshot(),
        }
    }

    /// Stops consuming, waits briefly for the in-flight delivery, then
    /// closes both channels. Failures are logged; the session is gone
    /// either way.
    pub async fn close(&self) {
        self.cancel.cancel();

        if let Err(err) = self
            .consumer
            .basic_cancel(&self.consumer_tag, BasicCancelOptions::default())
            .await
        {
            debug!(
                migration_id = %self.migration_id,
                error = %err,
                "consumer cancel failed"
            );
        }

        let task = self.task.lock().take();
        if let Some(task) = task
            && tokio::time::timeout(CONSUMER_DRAIN_TIMEOUT, task).await.is_err()
        {
            warn!(
                migration_id = %self.migration_id,
                "consumer loop did not stop in time"
            );
        }

        close_channel(&self.migration_id, &self.consumer).await;
        close_channel(&self.migration_id, &self.producer).await;
    }
}

pub(crate) async fn close_channel(migration_id: &str, channel: &Channel) {
    if !channel.status().connected() {
        return;
    }
    if let Err(err) = channel
        .close(CHANNEL_CLOSE_CODE, "migration stopped")
        .await
    {
        debug!(migration_id, error = %err, "channel close failed");
    }
}
