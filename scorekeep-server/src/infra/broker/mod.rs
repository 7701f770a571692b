//! AMQP side of the service: the shared connection, per-migration sessions
//! and the scoring loop that runs inside each of them.

pub mod connection;
pub mod control;
pub mod pipeline;
pub mod registry;
pub mod session;

pub use connection::{BrokerConnection, BrokerError};
pub use control::{MigrationControlPlane, MigrationDefaults, MigrationError};
pub use pipeline::{
    ChannelPublisher, DeliveryOutcome, InboundDelivery, ScorePublisher,
    ScoringError, ScoringPipeline,
};
pub use registry::MigrationRegistry;
pub use session::{MigrationSession, MigrationSummary, SessionCounts, SessionStats};
