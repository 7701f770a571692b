use std::sync::Arc;

use scorekeep_model::{DryRunResult, RawScore};
use tracing::debug;

use super::ScoringPolicy;
use super::contract::validate_policy_output;
use super::sandbox::PolicySandbox;

/// Compiles `policy_text` and runs it once against `raw_score`.
///
/// The submission is used exactly as given; no metadata is overlaid. Every
/// failure is folded into the returned result.
pub fn policy_dry_run(
    sandbox: &Arc<PolicySandbox>,
    policy_text: &str,
    raw_score: &RawScore,
) -> DryRunResult {
    let policy = match sandbox.compile(policy_text) {
        Ok(policy) => policy,
        Err(err) => return DryRunResult::failed(vec![err.to_string()]),
    };

    let output = match policy.evaluate(raw_score) {
        Ok(output) => output,
        Err(err) => {
            debug!(error = %err, "dry run invocation failed");
            return DryRunResult::failed(vec![err.to_string()]);
        }
    };

    match validate_policy_output(&output) {
        Ok(result) => DryRunResult::succeeded(result),
        Err(errors) => DryRunResult::failed(errors),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{SandboxLimits, probe_raw_score};
    use scorekeep_model::{AppliedExtensionStatus, SubmissionStatus};

    fn sandbox() -> Arc<PolicySandbox> {
        Arc::new(PolicySandbox::new(SandboxLimits::default()))
    }

    #[test]
    fn compile_errors_are_reported_not_raised() {
        let result =
            policy_dry_run(&sandbox(), "#{ finalScore: ", &probe_raw_score());
        assert!(result.policy_results.is_none());
        assert!(!result.overall_status);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("syntax error: "));
    }

    #[test]
    fn runs_against_the_supplied_input_verbatim() {
        let mut raw = probe_raw_score();
        raw.assignment_id = "caller-chosen".into();
        raw.raw_score = 4.0;

        let result = policy_dry_run(
            &sandbox(),
            r#"
            #{
                finalScore: rawScore.rawScore * 2,
                adjustedSubmissionDate: rawScore.submissionDate,
                adjustedDaysLate: 0,
                submissionStatus: "on_time",
                extensionStatus: "no_extension",
                submissionMessage: rawScore.assignmentId
            }
            "#,
            &raw,
        );

        assert!(result.overall_status, "{:?}", result.errors);
        let scored = result.policy_results.unwrap();
        assert_eq!(scored.final_score, 8.0);
        assert_eq!(scored.submission_status, SubmissionStatus::OnTime);
        assert_eq!(scored.extension_status, AppliedExtensionStatus::NoExtension);
        assert_eq!(scored.submission_message.as_deref(), Some("caller-chosen"));
    }

    #[test]
    fn contract_violations_leave_results_empty() {
        let result = policy_dry_run(
            &sandbox(),
            "#{ finalScore: 1 }",
            &probe_raw_score(),
        );
        assert!(result.policy_results.is_none());
        assert_eq!(result.errors.len(), 4);
    }

    #[test]
    fn throws_become_a_single_error() {
        let result = policy_dry_run(
            &sandbox(),
            r#"throw "nope""#,
            &probe_raw_score(),
        );
        assert_eq!(result.errors, vec!["Error: nope"]);
    }
}
