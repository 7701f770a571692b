use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome category of a single submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Missing,
    Excused,
    Late,
    Extended,
    OnTime,
}

impl SubmissionStatus {
    pub const ALL: [SubmissionStatus; 5] = [
        SubmissionStatus::Missing,
        SubmissionStatus::Excused,
        SubmissionStatus::Late,
        SubmissionStatus::Extended,
        SubmissionStatus::OnTime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Missing => "missing",
            SubmissionStatus::Excused => "excused",
            SubmissionStatus::Late => "late",
            SubmissionStatus::Extended => "extended",
            SubmissionStatus::OnTime => "on_time",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == raw)
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a policy resolved the extension attached to a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppliedExtensionStatus {
    Ignored,
    Approved,
    Rejected,
    Pending,
    NoExtension,
}

impl AppliedExtensionStatus {
    pub const ALL: [AppliedExtensionStatus; 5] = [
        AppliedExtensionStatus::Ignored,
        AppliedExtensionStatus::Approved,
        AppliedExtensionStatus::Rejected,
        AppliedExtensionStatus::Pending,
        AppliedExtensionStatus::NoExtension,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppliedExtensionStatus::Ignored => "ignored",
            AppliedExtensionStatus::Approved => "approved",
            AppliedExtensionStatus::Rejected => "rejected",
            AppliedExtensionStatus::Pending => "pending",
            AppliedExtensionStatus::NoExtension => "no_extension",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == raw)
    }
}

impl fmt::Display for AppliedExtensionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Review state of an extension request as reported by the course backend.
///
/// Statuses this service does not know about land in `Other` so that a new
/// backend state never poisons a whole migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionRequestStatus {
    Approved,
    Denied,
    Rejected,
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_status_names_match_wire_format() {
        for status in SubmissionStatus::ALL {
            let encoded = serde_json::to_value(status).unwrap();
            assert_eq!(encoded, serde_json::json!(status.as_str()));
            assert_eq!(SubmissionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SubmissionStatus::parse("ON_TIME"), None);
    }

    #[test]
    fn applied_extension_status_uses_snake_case() {
        assert_eq!(
            serde_json::to_value(AppliedExtensionStatus::NoExtension).unwrap(),
            serde_json::json!("no_extension")
        );
        assert_eq!(
            AppliedExtensionStatus::parse("pending"),
            Some(AppliedExtensionStatus::Pending)
        );
    }

    #[test]
    fn unknown_extension_request_status_maps_to_other() {
        let status: ExtensionRequestStatus =
            serde_json::from_str("\"escalated\"").unwrap();
        assert_eq!(status, ExtensionRequestStatus::Other);

        let status: ExtensionRequestStatus =
            serde_json::from_str("\"denied\"").unwrap();
        assert_eq!(status, ExtensionRequestStatus::Denied);
    }
}
