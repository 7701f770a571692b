use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tracing::debug;

use super::{
    models::{
        BrokerConfig, Config, ConfigMetadata, DEFAULT_BROKER_PASSWORD,
        DEFAULT_BROKER_USERNAME, PolicyConfig, ServerConfig,
    },
    sources::{EnvConfig, FileBrokerConfig, FileConfig},
    validation::{self, ConfigGuardRailError, ConfigWarnings},
};

const DEFAULT_CONFIG_LOCATIONS: [&str; 2] =
    ["scorekeep.toml", "config/scorekeep.toml"];

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    /// Seeds the process environment from `.env`, then resolves every layer.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(
                |err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                },
            )?,
            None => {
                dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                })?
            }
        };

        let mut load = self.load_with_env(EnvConfig::gather())?;
        load.config.metadata.env_file_loaded = env_file_loaded;
        Ok(load)
    }

    /// Resolves configuration from an already gathered environment layer.
    /// Never touches the process environment.
    pub fn load_with_env(
        &self,
        env: EnvConfig,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let (file_config, config_path) = self.load_file_config(&env)?;
        let (config, warnings) =
            self.compose_config(file_config, env, config_path)?;
        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env_config: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let mut source = ConfigPathSource::default();

        if let Some(explicit) = &self.options.config_path {
            source.explicit = Some(explicit.clone());
        } else if let Some(from_env) = &env_config.config_path {
            source.env = Some(from_env.clone());
        } else {
            source.default = DEFAULT_CONFIG_LOCATIONS
                .iter()
                .map(PathBuf::from)
                .find(|candidate| candidate.exists());
        }

        let Some((path, provenance)) = source.resolved_path() else {
            return Ok((None, None));
        };

        if !path.exists() {
            if provenance.is_explicit() {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        let contents =
            fs::read_to_string(&path).map_err(|err| ConfigLoadError::Io {
                path: path.clone(),
                source: err,
            })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|err| ConfigLoadError::Parse {
                path: path.clone(),
                source: err,
            })?;

        debug!(path = %path.display(), "loaded configuration file");
        Ok((Some(file_config), Some(path)))
    }

    fn compose_config(
        &self,
        file_config: Option<FileConfig>,
        env: EnvConfig,
        config_path: Option<PathBuf>,
    ) -> Result<(Config, ConfigWarnings), ConfigLoadError> {
        let mut warnings = ConfigWarnings::default();

        if config_path.is_none() {
            warnings.push_with_hint(
                "No scorekeep.toml detected; falling back to environment variables",
                "Pass --config or set SCOREKEEP_CONFIG to use a configuration file",
            );
        }

        let FileConfig {
            server: file_server,
            broker: file_broker,
            policy: file_policy,
        } = file_config.unwrap_or_default();

        let server = ServerConfig {
            host: env
                .server_host
                .clone()
                .or(file_server.host)
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env.server_port.or(file_server.port).unwrap_or(3000),
            base_path: env
                .server_base_path
                .clone()
                .or(file_server.base_path)
                .map(|path| path.trim().to_string())
                .unwrap_or_default(),
        };

        let broker = BrokerConfig {
            password: Self::resolve_broker_password(&env, &file_broker)?,
            username: env
                .broker_username
                .clone()
                .or(file_broker.username)
                .unwrap_or_else(|| DEFAULT_BROKER_USERNAME.to_string()),
            host: env
                .broker_host
                .clone()
                .or(file_broker.host)
                .unwrap_or_else(|| "localhost".to_string()),
            port: env.broker_port.or(file_broker.port).unwrap_or(5672),
            vhost: env
                .broker_vhost
                .clone()
                .or(file_broker.vhost)
                .unwrap_or_else(|| "/".to_string()),
            exchange_name: env
                .broker_exchange
                .clone()
                .or(file_broker.exchange_name)
                .unwrap_or_else(|| "grading".to_string()),
            connect_attempts: env
                .broker_connect_attempts
                .or(file_broker.connect_attempts)
                .unwrap_or(10),
            retry_delay: Duration::from_millis(
                env.broker_retry_delay_ms
                    .or(file_broker.retry_delay_ms)
                    .unwrap_or(5_000),
            ),
        };

        let policy = PolicyConfig {
            trusted_ca: env.policy_trusted_ca.clone().or(file_policy.trusted_ca),
            trusted_server: env
                .policy_trusted_server
                .clone()
                .or(file_policy.trusted_server),
            fetch_timeout: Duration::from_secs(
                env.policy_fetch_timeout_secs
                    .or(file_policy.fetch_timeout_secs)
                    .unwrap_or(30),
            ),
            max_source_bytes: env
                .policy_max_source_bytes
                .or(file_policy.max_source_bytes)
                .unwrap_or(256 * 1024),
            invoke_timeout: Duration::from_millis(
                env.policy_invoke_timeout_ms
                    .or(file_policy.invoke_timeout_ms)
                    .unwrap_or(2_000),
            ),
            max_operations: env
                .policy_max_operations
                .or(file_policy.max_operations)
                .unwrap_or(1_000_000),
        };

        let config = Config {
            server,
            broker,
            policy,
            metadata: ConfigMetadata {
                config_path,
                env_file_loaded: false,
            },
        };

        let guard_warnings = validation::apply_guard_rails(&config)?;
        warnings.extend(guard_warnings);

        Ok((config, warnings))
    }

    fn resolve_broker_password(
        env: &EnvConfig,
        file_broker: &FileBrokerConfig,
    ) -> Result<String, ConfigLoadError> {
        if let Some(password) = env.broker_password.clone() {
            return Ok(password);
        }
        if let Some(path) = env.broker_password_file.as_ref()
            && let Some(password) = Self::read_secret_file(path)?
        {
            return Ok(password);
        }
        if let Some(password) = file_broker
            .password
            .clone()
            .filter(|value| !value.trim().is_empty())
        {
            return Ok(password);
        }
        if let Some(path) = file_broker.password_file.as_ref()
            && let Some(password) = Self::read_secret_file(path)?
        {
            return Ok(password);
        }
        Ok(DEFAULT_BROKER_PASSWORD.to_string())
    }

    fn read_secret_file(
        path: &Path,
    ) -> Result<Option<String>, ConfigLoadError> {
        let contents = fs::read_to_string(path).map_err(|source| {
            ConfigLoadError::SecretFileIo {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let trimmed = contents.trim();
        if trimmed.is_empty() {
            Ok(None)
        } else {
            Ok(Some(trimmed.to_string()))
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to read secret file {path}")]
    SecretFileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    GuardRail(#[from] ConfigGuardRailError),
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

#[derive(Debug, Default)]
struct ConfigPathSource {
    explicit: Option<PathBuf>,
    env: Option<PathBuf>,
    default: Option<PathBuf>,
}

impl ConfigPathSource {
    fn resolved_path(&self) -> Option<(PathBuf, ConfigPathProvenance)> {
        if let Some(path) = &self.explicit {
            return Some((path.clone(), ConfigPathProvenance::Explicit));
        }
        if let Some(path) = &self.env {
            return Some((path.clone(), ConfigPathProvenance::Env));
        }
        if let Some(path) = &self.default {
            return Some((path.clone(), ConfigPathProvenance::Default));
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigPathProvenance {
    Explicit,
    Env,
    Default,
}

impl ConfigPathProvenance {
    fn is_explicit(self) -> bool {
        matches!(
            self,
            ConfigPathProvenance::Explicit | ConfigPathProvenance::Env
        )
    }
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}
