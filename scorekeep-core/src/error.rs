use std::path::PathBuf;
use std::time::Duration;

use scorekeep_model::ValidationResult;
use thiserror::Error;

/// Policy source that does not parse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("syntax error: {message}")]
pub struct CompileError {
    pub message: String,
}

/// A policy that compiled but failed while running.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvocationError {
    /// The script threw. Carries the thrown value rendered as text.
    #[error("Error: {0}")]
    Thrown(String),

    #[error("policy exceeded its {}ms execution time limit", .0.as_millis())]
    TimedOut(Duration),

    #[error("policy exceeded its operation budget")]
    OperationBudget,

    #[error("policy runtime error: {0}")]
    Runtime(String),
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("invalid policy URI '{uri}': {source}")]
    InvalidUri {
        uri: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported policy URI scheme '{0}', expected http or https")]
    UnsupportedScheme(String),

    #[error("policy origin '{origin}' is not the trusted policy server")]
    UntrustedOrigin { origin: String },

    #[error("failed to fetch policy: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("policy server responded with {status}")]
    Status { status: reqwest::StatusCode },

    #[error("policy source exceeds the {limit} byte limit")]
    TooLarge { limit: usize },

    #[error("policy source is not valid UTF-8")]
    Encoding,
}

/// Everything that can stop a policy from becoming usable.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Invalid policy: {0}")]
    Compile(#[from] CompileError),

    #[error("Invalid policy! {}", .0.errors.join("; "))]
    Validation(ValidationResult),
}

/// Failures while building a [`crate::policy::PolicyLoader`].
#[derive(Error, Debug)]
pub enum LoaderInitError {
    #[error("failed to read trusted CA bundle {path}: {source}")]
    TrustRootIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in trusted CA bundle {path}")]
    EmptyTrustRoot { path: PathBuf },

    #[error("invalid certificate in trusted CA bundle: {0}")]
    Certificate(#[source] reqwest::Error),

    #[error("invalid trusted policy server '{value}': {source}")]
    TrustedServer {
        value: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to build policy HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}
