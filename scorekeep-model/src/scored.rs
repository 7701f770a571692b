use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::policy_result::PolicyResult;
use crate::raw_score::RawScore;
use crate::status::{AppliedExtensionStatus, SubmissionStatus};

/// Outbound `grading.scored` message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredResult {
    pub cwid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_id: Option<String>,
    pub assignment_id: String,
    pub raw_score: f64,
    pub final_score: f64,
    pub adjusted_submission_time: DateTime<Utc>,
    pub days_late: f64,
    pub submission_status: SubmissionStatus,
    pub extension_status: AppliedExtensionStatus,
    pub extension_message: String,
    pub submission_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_extension_days_applied: Option<f64>,
}

impl ScoredResult {
    /// Identity comes from the raw submission, everything computed comes
    /// from the policy. Absent messages become empty strings.
    pub fn from_policy(raw: &RawScore, result: PolicyResult) -> Self {
        ScoredResult {
            cwid: raw.cwid.clone(),
            extension_id: raw.extension_id.clone(),
            assignment_id: raw.assignment_id.clone(),
            raw_score: raw.raw_score,
            final_score: result.final_score,
            adjusted_submission_time: result.adjusted_submission_date,
            days_late: result.adjusted_days_late,
            submission_status: result.submission_status,
            extension_status: result.extension_status,
            extension_message: result.extension_message.unwrap_or_default(),
            submission_message: result.submission_message.unwrap_or_default(),
            number_extension_days_applied: result
                .number_extension_days_applied,
        }
    }
}
