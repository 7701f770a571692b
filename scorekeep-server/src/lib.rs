//! # Scorekeep Server
//!
//! Grade scoring over AMQP. A migration binds a queue of raw submissions to
//! a user-authored Rhai policy and publishes one scored result per
//! submission. The HTTP surface starts and stops migrations and lets policy
//! authors validate and dry-run their scripts.

pub mod errors;
pub mod handlers;
pub mod infra;
pub mod routes;

pub use infra::app_state::AppState;
pub use routes::create_app;
