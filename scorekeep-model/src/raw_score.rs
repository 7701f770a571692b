use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dates;
use crate::migration::AssignmentMetadata;
use crate::status::{ExtensionRequestStatus, SubmissionStatus};

/// One student's submission as handed to a scoring policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawScore {
    pub cwid: String,
    pub assignment_id: String,
    pub raw_score: f64,
    #[serde(alias = "canvasMinScore")]
    pub min_score: f64,
    #[serde(alias = "canvasMaxScore")]
    pub max_score: f64,
    #[serde(default)]
    pub external_max_score: Option<f64>,
    #[serde(deserialize_with = "dates::flexible")]
    pub initial_due_date: DateTime<Utc>,
    #[serde(deserialize_with = "dates::flexible")]
    pub submission_date: DateTime<Utc>,
    pub submission_status: SubmissionStatus,
    #[serde(default)]
    pub extension_id: Option<String>,
    #[serde(default, deserialize_with = "dates::flexible_option")]
    pub extension_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub extension_days: Option<f64>,
    #[serde(default)]
    pub extension_type: Option<String>,
    #[serde(default)]
    pub extension_status: Option<ExtensionRequestStatus>,
}

/// Body of an inbound `grading.raw_score` message.
///
/// Assignment identity is deliberately absent: whatever the producer put
/// there is dropped and replaced with the migration's trusted metadata by
/// [`RawScoreMessage::with_metadata`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawScoreMessage {
    pub cwid: String,
    pub raw_score: f64,
    #[serde(deserialize_with = "dates::flexible")]
    pub submission_date: DateTime<Utc>,
    pub submission_status: SubmissionStatus,
    #[serde(default)]
    pub extension_id: Option<String>,
    #[serde(default, deserialize_with = "dates::flexible_option")]
    pub extension_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub extension_days: Option<f64>,
    #[serde(default)]
    pub extension_type: Option<String>,
    #[serde(default)]
    pub extension_status: Option<ExtensionRequestStatus>,
}

impl RawScoreMessage {
    pub fn with_metadata(self, metadata: &AssignmentMetadata) -> RawScore {
        RawScore {
            cwid: self.cwid,
            assignment_id: metadata.assignment_id.clone(),
            raw_score: self.raw_score,
            min_score: metadata.min_score,
            max_score: metadata.max_score,
            external_max_score: metadata.external_max_score,
            initial_due_date: metadata.initial_due_date,
            submission_date: self.submission_date,
            submission_status: self.submission_status,
            extension_id: self.extension_id,
            extension_date: self.extension_date,
            extension_days: self.extension_days,
            extension_type: self.extension_type,
            extension_status: self.extension_status,
        }
    }
}
