use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use scorekeep_model::MigrationStart;
use tracing::warn;

use super::StatusBody;
use crate::infra::app_state::AppState;
use crate::infra::broker::{MigrationError, MigrationSummary};

#[derive(Debug)]
pub struct MigrationHttpError {
    status: StatusCode,
    message: String,
}

impl From<MigrationError> for MigrationHttpError {
    fn from(error: MigrationError) -> Self {
        let status = error.status_code();
        let message = error.message();
        Self { status, message }
    }
}

impl IntoResponse for MigrationHttpError {
    fn into_response(self) -> Response {
        StatusBody::with_reason("failed", self.message).respond(self.status)
    }
}

/// Every start failure is a 400 with the reason spelled out.
pub async fn start_migration_handler(
    State(state): State<AppState>,
    payload: Result<Json<MigrationStart>, JsonRejection>,
) -> Response {
    let start = match payload {
        Ok(Json(start)) => start,
        Err(rejection) => {
            return StatusBody::with_reason("failed", rejection.body_text())
                .respond(StatusCode::BAD_REQUEST);
        }
    };

    let migration_id = start.migration_id.clone();
    match state.migrations.start_migration(start, None).await {
        Ok(()) => StatusBody::ok("created").respond(StatusCode::CREATED),
        Err(err) => {
            warn!(%migration_id, error = %err, "failed to start migration");
            StatusBody::with_reason("failed", err.message())
                .respond(StatusCode::BAD_REQUEST)
        }
    }
}

pub async fn list_migrations_handler(
    State(state): State<AppState>,
) -> Json<Vec<MigrationSummary>> {
    Json(state.migrations.list())
}

pub async fn get_migration_handler(
    State(state): State<AppState>,
    Path(migration_id): Path<String>,
) -> Result<Json<MigrationSummary>, MigrationHttpError> {
    state
        .migrations
        .get(&migration_id)
        .map(Json)
        .ok_or_else(|| MigrationError::UnknownMigration(migration_id).into())
}

pub async fn stop_migration_handler(
    State(state): State<AppState>,
    Path(migration_id): Path<String>,
) -> Result<Response, MigrationHttpError> {
    state.migrations.stop_migration(&migration_id).await?;
    Ok(StatusBody::ok("stopped").respond(StatusCode::OK))
}
