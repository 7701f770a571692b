use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub broker: FileBrokerConfig,
    #[serde(default)]
    pub policy: FilePolicyConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_path: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileBrokerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vhost: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FilePolicyConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trusted_ca: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trusted_server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_source_bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoke_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_operations: Option<u64>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub server_base_path: Option<String>,
    pub broker_username: Option<String>,
    pub broker_password: Option<String>,
    pub broker_password_file: Option<PathBuf>,
    pub broker_host: Option<String>,
    pub broker_port: Option<u16>,
    pub broker_vhost: Option<String>,
    pub broker_exchange: Option<String>,
    pub broker_connect_attempts: Option<u32>,
    pub broker_retry_delay_ms: Option<u64>,
    pub policy_trusted_ca: Option<PathBuf>,
    pub policy_trusted_server: Option<String>,
    pub policy_fetch_timeout_secs: Option<u64>,
    pub policy_max_source_bytes: Option<usize>,
    pub policy_invoke_timeout_ms: Option<u64>,
    pub policy_max_operations: Option<u64>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the environment layer from an arbitrary variable source.
    /// Empty values count as unset; unparseable numbers are ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name).filter(|value| !value.trim().is_empty())
        };

        EnvConfig {
            config_path: var("SCOREKEEP_CONFIG").map(PathBuf::from),
            server_host: var("SERVER_HOST"),
            server_port: parse_var(var("SERVER_PORT")),
            server_base_path: lookup("SERVER_BASE_PATH"),
            broker_username: var("RABBITMQ_USERNAME"),
            broker_password: var("RABBITMQ_PASSWORD"),
            broker_password_file: var("RABBITMQ_PASSWORD_FILE")
                .map(PathBuf::from),
            broker_host: var("RABBITMQ_HOST"),
            broker_port: parse_var(var("RABBITMQ_PORT")),
            broker_vhost: var("RABBITMQ_VHOST"),
            broker_exchange: var("RABBITMQ_EXCHANGE"),
            broker_connect_attempts: parse_var(var(
                "RABBITMQ_CONNECT_ATTEMPTS",
            )),
            broker_retry_delay_ms: parse_var(var("RABBITMQ_RETRY_DELAY_MS")),
            policy_trusted_ca: var("POLICY_TRUSTED_CA").map(PathBuf::from),
            policy_trusted_server: var("POLICY_TRUSTED_SERVER"),
            policy_fetch_timeout_secs: parse_var(var(
                "POLICY_FETCH_TIMEOUT_SECS",
            )),
            policy_max_source_bytes: parse_var(var("POLICY_MAX_SOURCE_BYTES")),
            policy_invoke_timeout_ms: parse_var(var(
                "POLICY_INVOKE_TIMEOUT_MS",
            )),
            policy_max_operations: parse_var(var("POLICY_MAX_OPERATIONS")),
        }
    }
}

fn parse_var<T: FromStr>(raw: Option<String>) -> Option<T> {
    raw.and_then(|value| value.trim().parse().ok())
}
