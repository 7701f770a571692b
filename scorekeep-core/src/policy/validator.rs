use chrono::{TimeZone, Utc};
use scorekeep_model::{
    ExtensionRequestStatus, RawScore, SubmissionStatus, ValidationResult,
};
use tracing::debug;

use super::ScoringPolicy;
use super::contract::validate_policy_output;

/// Fixed synthetic submission every policy must handle: a late submission
/// covered by an approved three day "Late Pass".
pub fn probe_raw_score() -> RawScore {
    let at = |day, hour, minute| {
        Utc.with_ymd_and_hms(2025, 1, day, hour, minute, 0)
            .single()
            .unwrap_or_default()
    };

    RawScore {
        cwid: "10000".to_string(),
        assignment_id: "1".to_string(),
        raw_score: 10.0,
        min_score: 0.0,
        max_score: 10.0,
        external_max_score: Some(20.0),
        initial_due_date: at(10, 23, 59),
        submission_date: at(12, 10, 0),
        submission_status: SubmissionStatus::Late,
        extension_id: Some("1".to_string()),
        extension_date: Some(at(13, 23, 59)),
        extension_days: Some(3.0),
        extension_type: Some("Late Pass".to_string()),
        extension_status: Some(ExtensionRequestStatus::Approved),
    }
}

/// Runs the probe through `policy` and checks the output contract.
///
/// An invocation failure is reported as one error, contract violations as
/// one error per offending field.
pub fn verify_policy(policy: &dyn ScoringPolicy) -> ValidationResult {
    let probe = probe_raw_score();
    let output = match policy.evaluate(&probe) {
        Ok(output) => output,
        Err(err) => {
            debug!(error = %err, "policy failed on probe input");
            return ValidationResult::single(err.to_string());
        }
    };

    match validate_policy_output(&output) {
        Ok(_) => ValidationResult::passed(),
        Err(errors) => ValidationResult::from_errors(errors),
    }
}
