pub use scorekeep_config::{
    BrokerConfig, Config, ConfigLoad, ConfigLoadError, ConfigLoader,
    ConfigLoaderOptions, ConfigWarnings, PolicyConfig, ServerConfig,
};
