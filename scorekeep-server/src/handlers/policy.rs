use std::sync::Arc;

use axum::{
    Json,
    extract::{Multipart, State, rejection::JsonRejection},
    http::StatusCode,
    response::Response,
};
use scorekeep_core::policy::policy_dry_run;
use scorekeep_model::{DryRunResult, RawScore};
use serde::Deserialize;
use tracing::{debug, info};

use super::StatusBody;
use crate::errors::{AppError, AppResult};
use crate::infra::app_state::AppState;

/// Part names accepted for the policy source. `javascript` is the name
/// older clients still send.
const POLICY_PARTS: [&str; 2] = ["file", "javascript"];
const RAW_SCORE_PART: &str = "raw_score";

#[derive(Debug, Deserialize)]
pub struct ValidatePolicyRequest {
    #[serde(rename = "policyURI")]
    pub policy_uri: String,
}

/// Fetches, compiles and probes a policy without starting anything.
pub async fn validate_policy_handler(
    State(state): State<AppState>,
    payload: Result<Json<ValidatePolicyRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return StatusBody::with_reason("invalid", rejection.body_text())
                .respond(StatusCode::BAD_REQUEST);
        }
    };

    match state
        .policy_loader()
        .download_and_verify_policy(&request.policy_uri)
        .await
    {
        Ok(_) => {
            info!(uri = %request.policy_uri, "policy validated");
            StatusBody::ok("valid").respond(StatusCode::OK)
        }
        Err(err) => {
            debug!(uri = %request.policy_uri, error = %err, "policy rejected");
            StatusBody::with_reason("invalid", err.to_string())
                .respond(StatusCode::BAD_REQUEST)
        }
    }
}

/// Runs an uploaded policy once against an uploaded raw score.
///
/// Policy problems are reported inside the 200 body; only a malformed
/// request is a 400.
pub async fn dry_run_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Json<DryRunResult>> {
    let mut policy_text = None;
    let mut raw_score = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.body_text()))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some(name) if POLICY_PARTS.contains(&name) => {
                policy_text = Some(
                    field
                        .text()
                        .await
                        .map_err(|err| AppError::bad_request(err.body_text()))?,
                );
            }
            Some(RAW_SCORE_PART) => {
                raw_score = Some(
                    field
                        .text()
                        .await
                        .map_err(|err| AppError::bad_request(err.body_text()))?,
                );
            }
            _ => {}
        }
    }

    let policy_text = policy_text
        .ok_or_else(|| AppError::bad_request("missing multipart field 'file'"))?;
    let raw_score = raw_score.ok_or_else(|| {
        AppError::bad_request("missing multipart field 'raw_score'")
    })?;
    let raw_score: RawScore = serde_json::from_str(&raw_score).map_err(|err| {
        AppError::bad_request(format!("raw_score is not a valid raw score: {err}"))
    })?;

    let sandbox = Arc::clone(state.sandbox());
    let result = tokio::task::spawn_blocking(move || {
        policy_dry_run(&sandbox, &policy_text, &raw_score)
    })
    .await?;

    Ok(Json(result))
}
