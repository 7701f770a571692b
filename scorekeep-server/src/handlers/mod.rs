//! HTTP request handlers organized by functionality

pub mod grading;
pub mod health;
pub mod policy;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// `{status, reason?}` body shared by the grading and policy endpoints.
#[derive(Debug, Serialize)]
pub struct StatusBody {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl StatusBody {
    pub fn ok(status: &'static str) -> Self {
        Self {
            status,
            reason: None,
        }
    }

    pub fn with_reason(status: &'static str, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: Some(reason.into()),
        }
    }

    pub fn respond(self, code: StatusCode) -> Response {
        (code, Json(self)).into_response()
    }
}
