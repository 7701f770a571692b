use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dates;

/// Trusted per-assignment facts supplied when a migration starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentMetadata {
    pub assignment_id: String,
    #[serde(alias = "canvasMinScore")]
    pub min_score: f64,
    #[serde(alias = "canvasMaxScore")]
    pub max_score: f64,
    #[serde(default)]
    pub external_max_score: Option<f64>,
    #[serde(deserialize_with = "dates::flexible")]
    pub initial_due_date: DateTime<Utc>,
}

/// Request body for starting a migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStart {
    pub migration_id: String,
    #[serde(rename = "policyURI")]
    pub policy_uri: String,
    pub score_created_routing_key: String,
    pub raw_grade_routing_key: String,
    #[serde(alias = "globalMetadata")]
    pub metadata: AssignmentMetadata,
}
