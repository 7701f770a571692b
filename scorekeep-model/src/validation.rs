use serde::{Deserialize, Serialize};

use crate::policy_result::PolicyResult;

/// Verdict of checking a policy against the scoring contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub overall_status: bool,
}

impl ValidationResult {
    pub fn passed() -> Self {
        ValidationResult {
            errors: Vec::new(),
            overall_status: true,
        }
    }

    /// `overall_status` is true exactly when `errors` is empty.
    pub fn from_errors(errors: Vec<String>) -> Self {
        ValidationResult {
            overall_status: errors.is_empty(),
            errors,
        }
    }

    pub fn single(error: impl Into<String>) -> Self {
        Self::from_errors(vec![error.into()])
    }
}

/// Result of executing a candidate policy against one caller-supplied input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunResult {
    pub policy_results: Option<PolicyResult>,
    pub errors: Vec<String>,
    pub overall_status: bool,
}

impl DryRunResult {
    pub fn succeeded(result: PolicyResult) -> Self {
        DryRunResult {
            policy_results: Some(result),
            errors: Vec::new(),
            overall_status: true,
        }
    }

    pub fn failed(errors: Vec<String>) -> Self {
        DryRunResult {
            policy_results: None,
            overall_status: errors.is_empty(),
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_tracks_error_list() {
        assert!(ValidationResult::from_errors(vec![]).overall_status);
        assert!(!ValidationResult::single("nope").overall_status);
    }

    #[test]
    fn dry_run_failure_serializes_null_results() {
        let encoded =
            serde_json::to_value(DryRunResult::failed(vec!["boom".into()]))
                .unwrap();
        assert_eq!(
            encoded,
            json!({
                "policyResults": null,
                "errors": ["boom"],
                "overallStatus": false,
            })
        );
    }
}
