use std::{pin::pin, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use lapin::{
    BasicProperties, Channel, message::Delivery, options::BasicPublishOptions,
};
use scorekeep_core::{
    InvocationError, ScoringPolicy, policy::validate_policy_output,
};
use scorekeep_model::{
    AssignmentMetadata, JSON_CONTENT_TYPE, RAW_SCORE_MESSAGE_TYPE,
    RawScoreMessage, SCORED_MESSAGE_TYPE, ScoredResult,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::session::SessionStats;

/// Slack on top of the sandbox deadline before the pipeline gives up on
/// the blocking worker itself.
const INVOKE_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("could not decode raw score: {0}")]
    Decode(#[source] serde_json::Error),
    #[error(transparent)]
    Invocation(#[from] InvocationError),
    #[error("policy output rejected: {}", .0.join("; "))]
    Contract(Vec<String>),
    #[error("could not encode scored result: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to publish scored result: {0}")]
    Publish(#[source] lapin::Error),
}

/// Where scored results go.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScorePublisher: Send + Sync {
    async fn publish(
        &self,
        routing_key: &str,
        payload: Vec<u8>,
    ) -> Result<(), lapin::Error>;
}

/// Publishes onto one exchange through a dedicated producer channel.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    channel: Channel,
    exchange: String,
}

impl ChannelPublisher {
    pub fn new(channel: Channel, exchange: impl Into<String>) -> Self {
        Self {
            channel,
            exchange: exchange.into(),
        }
    }
}

#[async_trait]
impl ScorePublisher for ChannelPublisher {
    async fn publish(
        &self,
        routing_key: &str,
        payload: Vec<u8>,
    ) -> Result<(), lapin::Error> {
        let properties = BasicProperties::default()
            .with_kind(SCORED_MESSAGE_TYPE.into())
            .with_content_type(JSON_CONTENT_TYPE.into());

        // The returned confirm is dropped: delivery is at-most-once.
        self.channel
            .basic_publish(
                &self.exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await?;
        Ok(())
    }
}

/// The parts of an AMQP delivery the pipeline looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundDelivery {
    pub kind: Option<String>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl InboundDelivery {
    pub fn raw_score(body: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: Some(RAW_SCORE_MESSAGE_TYPE.to_string()),
            content_type: Some(JSON_CONTENT_TYPE.to_string()),
            body: body.into(),
        }
    }

    fn is_raw_score(&self) -> bool {
        self.kind.as_deref() == Some(RAW_SCORE_MESSAGE_TYPE)
            && self.content_type.as_deref() == Some(JSON_CONTENT_TYPE)
    }
}

impl From<Delivery> for InboundDelivery {
    fn from(delivery: Delivery) -> Self {
        Self {
            kind: delivery
                .properties
                .kind()
                .as_ref()
                .map(|kind| kind.as_str().to_string()),
            content_type: delivery
                .properties
                .content_type()
                .as_ref()
                .map(|content_type| content_type.as_str().to_string()),
            body: delivery.data,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Published,
    Skipped,
}

/// Turns raw-score deliveries for one migration into published scores.
pub struct ScoringPipeline {
    migration_id: String,
    metadata: AssignmentMetadata,
    routing_key: String,
    policy: Arc<dyn ScoringPolicy>,
    publisher: Arc<dyn ScorePublisher>,
    invoke_timeout: Duration,
    stats: Arc<SessionStats>,
}

impl std::fmt::Debug for ScoringPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoringPipeline")
            .field("migration_id", &self.migration_id)
            .field("routing_key", &self.routing_key)
            .field("invoke_timeout", &self.invoke_timeout)
            .finish()
    }
}

impl ScoringPipeline {
    pub fn new(
        migration_id: impl Into<String>,
        metadata: AssignmentMetadata,
        routing_key: impl Into<String>,
        policy: Arc<dyn ScoringPolicy>,
        publisher: Arc<dyn ScorePublisher>,
        invoke_timeout: Duration,
        stats: Arc<SessionStats>,
    ) -> Self {
        Self {
            migration_id: migration_id.into(),
            metadata,
            routing_key: routing_key.into(),
            policy,
            publisher,
            invoke_timeout,
            stats,
        }
    }

    /// Scores a single delivery. Deliveries that are not raw scores are
    /// skipped without touching the policy.
    pub async fn process(
        &self,
        delivery: InboundDelivery,
    ) -> Result<DeliveryOutcome, ScoringError> {
        if !delivery.is_raw_score() {
            return Ok(DeliveryOutcome::Skipped);
        }

        let message: RawScoreMessage = serde_json::from_slice(&delivery.body)
            .map_err(ScoringError::Decode)?;
        let raw = message.with_metadata(&self.metadata);

        let policy = Arc::clone(&self.policy);
        let input = raw.clone();
        let invocation =
            tokio::task::spawn_blocking(move || policy.evaluate(&input));
        let deadline = self.invoke_timeout + INVOKE_GRACE;
        let output = match tokio::time::timeout(deadline, invocation).await {
            Err(_) => {
                return Err(InvocationError::TimedOut(self.invoke_timeout).into());
            }
            Ok(Err(join)) => {
                return Err(InvocationError::Runtime(join.to_string()).into());
            }
            Ok(Ok(result)) => result?,
        };

        let result =
            validate_policy_output(&output).map_err(ScoringError::Contract)?;
        let scored = ScoredResult::from_policy(&raw, result);
        let payload =
            serde_json::to_vec(&scored).map_err(ScoringError::Encode)?;

        self.publisher
            .publish(&self.routing_key, payload)
            .await
            .map_err(ScoringError::Publish)?;

        debug!(
            migration_id = %self.migration_id,
            cwid = %scored.cwid,
            final_score = scored.final_score,
            "published score"
        );
        Ok(DeliveryOutcome::Published)
    }

    /// Processes deliveries one at a time until the stream ends or the
    /// session is cancelled. A failed delivery never stops the loop.
    pub async fn run<S>(&self, deliveries: S, cancel: CancellationToken)
    where
        S: Stream<Item = Result<InboundDelivery, lapin::Error>> + Send,
    {
        let mut deliveries = pin!(deliveries);

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = deliveries.next() => next,
            };

            match next {
                None => break,
                Some(Err(err)) => {
                    warn!(
                        migration_id = %self.migration_id,
                        error = %err,
                        "consumer stream failed"
                    );
                    break;
                }
                Some(Ok(delivery)) => self.handle(delivery).await,
            }
        }

        info!(
            migration_id = %self.migration_id,
            counts = ?self.stats.snapshot(),
            "consumer loop stopped"
        );
    }

    async fn handle(&self, delivery: InboundDelivery) {
        match self.process(delivery).await {
            Ok(DeliveryOutcome::Published) => self.stats.record_scored(),
            Ok(DeliveryOutcome::Skipped) => {
                self.stats.record_skipped();
                debug!(
                    migration_id = %self.migration_id,
                    "skipped non raw-score delivery"
                );
            }
            Err(err) => {
                self.stats.record_failed();
                warn!(
                    migration_id = %self.migration_id,
                    error = %err,
                    "failed to score delivery"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::broker::session::SessionCounts;
    use parking_lot::Mutex;
    use scorekeep_core::{PolicySandbox, SandboxLimits};
    use serde_json::{Value, json};

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl ScorePublisher for RecordingPublisher {
        async fn publish(
            &self,
            routing_key: &str,
            payload: Vec<u8>,
        ) -> Result<(), lapin::Error> {
            self.published.lock().push((routing_key.to_string(), payload));
            Ok(())
        }
    }

    impl RecordingPublisher {
        fn bodies(&self) -> Vec<Value> {
            self.published
                .lock()
                .iter()
                .map(|(_, body)| serde_json::from_slice(body).unwrap())
                .collect()
        }
    }

    const PASS_THROUGH: &str = r#"
        #{
            finalScore: rawScore.rawScore,
            adjustedSubmissionDate: rawScore.submissionDate,
            adjustedDaysLate: 0,
            submissionStatus: "on_time",
            extensionStatus: "no_extension",
            submissionMessage: "max " + rawScore.maxScore
        }
    "#;

    fn metadata() -> AssignmentMetadata {
        serde_json::from_value(json!({
            "assignmentId": "hw-3",
            "minScore": 0,
            "maxScore": 10,
            "externalMaxScore": 20,
            "initialDueDate": "2025-01-10T23:59:00Z"
        }))
        .unwrap()
    }

    fn pipeline<P>(
        source: &str,
        publisher: Arc<P>,
    ) -> (ScoringPipeline, Arc<SessionStats>)
    where
        P: ScorePublisher + 'static,
    {
        pipeline_for(source, metadata(), publisher)
    }

    fn pipeline_for<P>(
        source: &str,
        metadata: AssignmentMetadata,
        publisher: Arc<P>,
    ) -> (ScoringPipeline, Arc<SessionStats>)
    where
        P: ScorePublisher + 'static,
    {
        let sandbox = Arc::new(PolicySandbox::new(SandboxLimits {
            invoke_timeout: Duration::from_millis(100),
            ..SandboxLimits::default()
        }));
        let policy = sandbox.compile(source).unwrap();
        let stats = Arc::new(SessionStats::default());
        let pipeline = ScoringPipeline::new(
            "m1",
            metadata,
            "m1.scored",
            Arc::new(policy),
            publisher,
            Duration::from_millis(100),
            Arc::clone(&stats),
        );
        (pipeline, stats)
    }

    fn raw_score_body(cwid: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "cwid": cwid,
            "assignmentId": "forged",
            "rawScore": 8,
            "maxScore": 1000,
            "submissionDate": "2025-01-09T12:00:00Z",
            "submissionStatus": "on_time"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn overlays_trusted_metadata_before_scoring() {
        let publisher = Arc::new(RecordingPublisher::default());
        let (pipeline, _) = pipeline(PASS_THROUGH, Arc::clone(&publisher));

        let outcome = pipeline
            .process(InboundDelivery::raw_score(raw_score_body("10000")))
            .await
            .unwrap();

        assert_eq!(outcome, DeliveryOutcome::Published);
        let published = publisher.published.lock().clone();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "m1.scored");

        let body: Value = serde_json::from_slice(&published[0].1).unwrap();
        assert_eq!(body["cwid"], "10000");
        assert_eq!(body["assignmentId"], "hw-3");
        assert_eq!(body["finalScore"], 8.0);
        assert_eq!(body["submissionMessage"], "max 10.0");
        assert_eq!(body["extensionMessage"], "");
    }

    #[tokio::test]
    async fn late_submission_is_scored_end_to_end() {
        let publisher = Arc::new(RecordingPublisher::default());
        let metadata: AssignmentMetadata = serde_json::from_value(json!({
            "assignmentId": "A1",
            "minScore": 0,
            "maxScore": 10,
            "initialDueDate": "2025-01-01T00:00:00Z"
        }))
        .unwrap();
        let (pipeline, stats) = pipeline_for(
            r#"
                return #{
                    finalScore: rawScore.rawScore,
                    adjustedSubmissionDate: rawScore.submissionDate,
                    adjustedDaysLate: 1,
                    submissionStatus: "late",
                    extensionStatus: "no_extension"
                };
            "#,
            metadata,
            Arc::clone(&publisher),
        );
        let body = serde_json::to_vec(&json!({
            "cwid": "10000000",
            "assignmentId": "A1",
            "rawScore": 8,
            "minScore": 0,
            "maxScore": 10,
            "initialDueDate": "2025-01-01T00:00:00Z",
            "submissionDate": "2025-01-02T00:00:00Z",
            "submissionStatus": "late"
        }))
        .unwrap();

        pipeline.handle(InboundDelivery::raw_score(body)).await;

        assert_eq!(
            publisher.bodies(),
            vec![json!({
                "cwid": "10000000",
                "assignmentId": "A1",
                "rawScore": 8.0,
                "finalScore": 8.0,
                "adjustedSubmissionTime": "2025-01-02T00:00:00Z",
                "daysLate": 1.0,
                "submissionStatus": "late",
                "extensionStatus": "no_extension",
                "extensionMessage": "",
                "submissionMessage": ""
            })]
        );
        assert_eq!(stats.snapshot().scored, 1);
    }

    #[tokio::test]
    async fn other_message_types_are_skipped() {
        let publisher = Arc::new(RecordingPublisher::default());
        let (pipeline, _) = pipeline(PASS_THROUGH, Arc::clone(&publisher));

        let wrong_type = InboundDelivery {
            kind: Some("grading.something_else".into()),
            ..InboundDelivery::raw_score(raw_score_body("1"))
        };
        let wrong_content = InboundDelivery {
            content_type: Some("text/plain".into()),
            ..InboundDelivery::raw_score(raw_score_body("1"))
        };

        for delivery in [wrong_type, wrong_content, InboundDelivery::default()] {
            assert_eq!(
                pipeline.process(delivery).await.unwrap(),
                DeliveryOutcome::Skipped
            );
        }
        assert!(publisher.published.lock().is_empty());
    }

    #[tokio::test]
    async fn contract_violations_are_not_published() {
        let publisher = Arc::new(RecordingPublisher::default());
        let (pipeline, _) =
            pipeline(r#"#{ finalScore: "lots" }"#, Arc::clone(&publisher));

        let err = pipeline
            .process(InboundDelivery::raw_score(raw_score_body("1")))
            .await
            .unwrap_err();

        assert!(matches!(err, ScoringError::Contract(ref errors) if errors.len() == 5));
        assert!(publisher.published.lock().is_empty());
    }

    #[tokio::test]
    async fn runaway_policies_time_out() {
        let publisher = Arc::new(RecordingPublisher::default());
        let (pipeline, _) = pipeline(
            "let x = 0; loop { x += 1; }",
            Arc::clone(&publisher),
        );

        let err = pipeline
            .process(InboundDelivery::raw_score(raw_score_body("1")))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ScoringError::Invocation(InvocationError::TimedOut(_))
        ));
    }

    #[tokio::test]
    async fn publish_failures_surface_as_errors() {
        let mut publisher = MockScorePublisher::new();
        publisher
            .expect_publish()
            .withf(|routing_key, _| routing_key == "m1.scored")
            .times(1)
            .returning(|_, _| Err(lapin::Error::ChannelsLimitReached));
        let (pipeline, _) = pipeline(PASS_THROUGH, Arc::new(publisher));

        let err = pipeline
            .process(InboundDelivery::raw_score(raw_score_body("1")))
            .await
            .unwrap_err();

        assert!(matches!(err, ScoringError::Publish(_)));
    }

    #[tokio::test]
    async fn one_bad_delivery_does_not_stop_the_loop() {
        let publisher = Arc::new(RecordingPublisher::default());
        let (pipeline, stats) = pipeline(
            r#"
                if rawScore.cwid == "boom" { throw "bad student"; }
                #{
                    finalScore: rawScore.rawScore,
                    adjustedSubmissionDate: rawScore.submissionDate,
                    adjustedDaysLate: 0,
                    submissionStatus: "on_time",
                    extensionStatus: "no_extension"
                }
            "#,
            Arc::clone(&publisher),
        );

        let deliveries = futures::stream::iter(vec![
            Ok::<_, lapin::Error>(InboundDelivery::raw_score(raw_score_body("first"))),
            Ok(InboundDelivery::raw_score(b"{not json".to_vec())),
            Ok(InboundDelivery::raw_score(raw_score_body("boom"))),
            Ok(InboundDelivery::default()),
            Ok(InboundDelivery::raw_score(raw_score_body("last"))),
        ]);
        pipeline.run(deliveries, CancellationToken::new()).await;

        let cwids: Vec<Value> = publisher
            .bodies()
            .into_iter()
            .map(|body| body["cwid"].clone())
            .collect();
        assert_eq!(cwids, [json!("first"), json!("last")]);
        assert_eq!(
            stats.snapshot(),
            SessionCounts {
                scored: 2,
                skipped: 1,
                failed: 2,
            }
        );
    }

    #[tokio::test]
    async fn cancelled_sessions_stop_consuming() {
        let publisher = Arc::new(RecordingPublisher::default());
        let (pipeline, stats) = pipeline(PASS_THROUGH, Arc::clone(&publisher));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let never =
            futures::stream::pending::<Result<InboundDelivery, lapin::Error>>();
        pipeline.run(never, cancel).await;

        assert_eq!(stats.snapshot().scored, 0);
    }
}
