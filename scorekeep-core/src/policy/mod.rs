//! Policy compilation, execution and contract checks.

pub mod contract;
pub mod dry_run;
mod helpers;
pub mod loader;
pub mod sandbox;
pub mod validator;

use scorekeep_model::RawScore;
use serde_json::Value;

use crate::error::InvocationError;

pub use contract::validate_policy_output;
pub use dry_run::policy_dry_run;
pub use loader::{PolicyLoader, PolicyLoaderConfig};
pub use sandbox::{CompiledPolicy, PolicySandbox, SandboxLimits};
pub use validator::{probe_raw_score, verify_policy};

/// Something that turns a raw submission into policy output.
///
/// Output is untyped on purpose: it still has to pass
/// [`validate_policy_output`] before anything downstream trusts it.
pub trait ScoringPolicy: Send + Sync {
    fn evaluate(&self, raw: &RawScore) -> Result<Value, InvocationError>;
}

impl<F> ScoringPolicy for F
where
    F: Fn(&RawScore) -> Result<Value, InvocationError> + Send + Sync,
{
    fn evaluate(&self, raw: &RawScore) -> Result<Value, InvocationError> {
        self(raw)
    }
}
