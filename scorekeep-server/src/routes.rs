use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::handlers::{grading, health, policy};
use crate::infra::app_state::AppState;

/// Builds the service router. Everything is mounted under
/// `server.base_path`; readiness is additionally served at the bare root so
/// orchestrator probes do not need to know the prefix.
pub fn create_app(state: AppState) -> Router {
    let api = Router::new()
        .route("/-/ready", get(health::ready_handler))
        .route("/grading/start", post(grading::start_migration_handler))
        .route(
            "/grading/migrations",
            get(grading::list_migrations_handler),
        )
        .route(
            "/grading/migrations/{id}",
            get(grading::get_migration_handler)
                .delete(grading::stop_migration_handler),
        )
        .route("/validate", post(policy::validate_policy_handler))
        .route("/dry-run", post(policy::dry_run_handler));

    let base_path = state.config.server.base_path.clone();
    let router = if base_path.is_empty() {
        api
    } else {
        Router::new()
            .route("/-/ready", get(health::ready_handler))
            .nest(&base_path, api)
    };

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
