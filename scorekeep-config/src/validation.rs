use std::path::PathBuf;

use thiserror::Error;
use url::Url;

use crate::models::Config;

/// Non-fatal configuration finding surfaced at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push(&mut self, message: impl Into<String>) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint(
        &mut self,
        message: impl Into<String>,
        hint: impl Into<String>,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.items.iter()
    }
}

/// Configuration the service refuses to start with.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigGuardRailError {
    #[error(
        "server.base_path '{0}' must be empty or start with '/' and must not end with '/'"
    )]
    InvalidBasePath(String),
    #[error("{field} must be greater than zero")]
    ZeroValue { field: &'static str },
    #[error("trusted CA bundle {path} does not exist")]
    MissingTrustedCa { path: PathBuf },
    #[error("policy.trusted_server '{value}' is not an http(s) URL")]
    InvalidTrustedServer { value: String },
}

pub fn apply_guard_rails(
    config: &Config,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    let base_path = &config.server.base_path;
    if !base_path.is_empty()
        && (!base_path.starts_with('/') || base_path.ends_with('/'))
    {
        return Err(ConfigGuardRailError::InvalidBasePath(base_path.clone()));
    }

    let zero_checks = [
        ("broker.connect_attempts", config.broker.connect_attempts == 0),
        ("policy.fetch_timeout_secs", config.policy.fetch_timeout.is_zero()),
        ("policy.invoke_timeout_ms", config.policy.invoke_timeout.is_zero()),
        ("policy.max_source_bytes", config.policy.max_source_bytes == 0),
        ("policy.max_operations", config.policy.max_operations == 0),
    ];
    if let Some(&(field, _)) = zero_checks.iter().find(|(_, zero)| *zero) {
        return Err(ConfigGuardRailError::ZeroValue { field });
    }

    if let Some(path) = &config.policy.trusted_ca
        && !path.exists()
    {
        return Err(ConfigGuardRailError::MissingTrustedCa {
            path: path.clone(),
        });
    }

    match &config.policy.trusted_server {
        Some(value) => {
            let valid = Url::parse(value)
                .is_ok_and(|url| matches!(url.scheme(), "http" | "https"));
            if !valid {
                return Err(ConfigGuardRailError::InvalidTrustedServer {
                    value: value.clone(),
                });
            }
        }
        None => warnings.push_with_hint(
            "Policies may be fetched from any host",
            "Set POLICY_TRUSTED_SERVER to pin policy downloads to one origin",
        ),
    }

    if config.broker.uses_default_credentials() && !config.broker.is_local() {
        warnings.push_with_hint(
            format!(
                "Default broker credentials in use against remote host {}",
                config.broker.host
            ),
            "Set RABBITMQ_USERNAME and RABBITMQ_PASSWORD (or RABBITMQ_PASSWORD_FILE)",
        );
    }

    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        BrokerConfig, ConfigMetadata, PolicyConfig, ServerConfig,
    };
    use std::time::Duration;

    fn config() -> Config {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".into(),
                port: 3000,
                base_path: String::new(),
            },
            broker: BrokerConfig {
                username: "guest".into(),
                password: "guest".into(),
                host: "localhost".into(),
                port: 5672,
                vhost: "/".into(),
                exchange_name: "grading".into(),
                connect_attempts: 10,
                retry_delay: Duration::from_secs(5),
            },
            policy: PolicyConfig {
                trusted_ca: None,
                trusted_server: Some("https://policies.example.edu".into()),
                fetch_timeout: Duration::from_secs(30),
                max_source_bytes: 262_144,
                invoke_timeout: Duration::from_millis(2_000),
                max_operations: 1_000_000,
            },
            metadata: ConfigMetadata::default(),
        }
    }

    #[test]
    fn defaults_pass_cleanly() {
        assert!(apply_guard_rails(&config()).unwrap().is_empty());
    }

    #[test]
    fn base_path_shape_is_enforced() {
        for bad in ["api", "/api/", "/"] {
            let mut config = config();
            config.server.base_path = bad.into();
            assert_eq!(
                apply_guard_rails(&config).unwrap_err(),
                ConfigGuardRailError::InvalidBasePath(bad.into())
            );
        }

        let mut config = config();
        config.server.base_path = "/grading-api".into();
        assert!(apply_guard_rails(&config).is_ok());
    }

    #[test]
    fn zero_budgets_are_rejected() {
        let mut config = config();
        config.policy.invoke_timeout = Duration::ZERO;
        assert_eq!(
            apply_guard_rails(&config).unwrap_err(),
            ConfigGuardRailError::ZeroValue {
                field: "policy.invoke_timeout_ms"
            }
        );
    }

    #[test]
    fn missing_trust_root_is_fatal() {
        let mut config = config();
        config.policy.trusted_ca = Some("/nonexistent/ca.pem".into());
        assert!(matches!(
            apply_guard_rails(&config),
            Err(ConfigGuardRailError::MissingTrustedCa { .. })
        ));
    }

    #[test]
    fn remote_guest_login_and_open_policy_origin_warn() {
        let mut config = config();
        config.broker.host = "rabbit.prod.internal".into();
        config.policy.trusted_server = None;

        let warnings = apply_guard_rails(&config).unwrap();

        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().all(|warning| warning.hint.is_some()));
    }
}
