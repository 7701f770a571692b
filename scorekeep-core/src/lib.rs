//! # Scorekeep Core
//!
//! Everything the scoring service knows about policies, independent of the
//! broker and the HTTP surface:
//!
//! - [`policy::PolicySandbox`]: the embedded Rhai interpreter with its
//!   deadline, operation budget and size limits
//! - [`policy::PolicyLoader`]: fetching policy source over HTTP(S)
//! - [`policy::verify_policy`]: the synthetic probe and output contract
//! - [`policy::policy_dry_run`]: one-shot execution for policy authors

pub mod error;
pub mod policy;

pub use error::{
    CompileError, FetchError, InvocationError, LoaderInitError, PolicyError,
};
pub use policy::{
    CompiledPolicy, PolicyLoader, PolicyLoaderConfig, PolicySandbox,
    SandboxLimits, ScoringPolicy,
};
