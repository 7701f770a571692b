//! Configuration for the Scorekeep scoring service.
//!
//! Values are layered: a `.env` file seeds the process environment, a TOML
//! file provides the base, environment variables override the file, and the
//! binary applies CLI flags last.
#![allow(missing_docs)]

pub mod loader;
pub mod models;
pub mod sources;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions};
pub use models::{
    BrokerConfig, Config, ConfigMetadata, PolicyConfig, ServerConfig,
};
pub use sources::{EnvConfig, FileConfig};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
