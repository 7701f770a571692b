//! Wire data models shared across Scorekeep crates.
#![allow(missing_docs)]

pub mod dates;
pub mod migration;
pub mod policy_result;
pub mod raw_score;
pub mod scored;
pub mod status;
pub mod validation;

pub use migration::{AssignmentMetadata, MigrationStart};
pub use policy_result::PolicyResult;
pub use raw_score::{RawScore, RawScoreMessage};
pub use scored::ScoredResult;
pub use status::{
    AppliedExtensionStatus, ExtensionRequestStatus, SubmissionStatus,
};
pub use validation::{DryRunResult, ValidationResult};

/// AMQP `type` property carried by inbound raw-submission messages.
pub const RAW_SCORE_MESSAGE_TYPE: &str = "grading.raw_score";

/// AMQP `type` property stamped on published scores.
pub const SCORED_MESSAGE_TYPE: &str = "grading.scored";

/// Content type used in both directions.
pub const JSON_CONTENT_TYPE: &str = "application/json";
