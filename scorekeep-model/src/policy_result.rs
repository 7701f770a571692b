use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::{AppliedExtensionStatus, SubmissionStatus};

/// What a policy computes for one submission, after contract validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyResult {
    pub final_score: f64,
    pub adjusted_submission_date: DateTime<Utc>,
    pub adjusted_days_late: f64,
    pub submission_status: SubmissionStatus,
    pub extension_status: AppliedExtensionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_extension_days_applied: Option<f64>,
}
