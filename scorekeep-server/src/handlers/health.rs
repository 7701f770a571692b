use axum::{extract::State, http::StatusCode};

use crate::infra::app_state::AppState;

/// 200 once the broker connection is live, 500 otherwise.
pub async fn ready_handler(State(state): State<AppState>) -> StatusCode {
    if state.broker.ready() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}
