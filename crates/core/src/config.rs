use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub quota: QuotaConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: String,
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,
    pub routing_model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct QuotaConfig {
    pub default_org_token_limit: u64,
    /// Safety margin applied in admission control; configuration, not a
    /// hardcoded constant.
    pub reserve_buffer: f64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://steward.db".to_owned(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: "groq".to_owned(),
                api_key: None,
                base_url: "https://api.groq.com/openai/v1".to_owned(),
                model: "llama-3.3-70b-versatile".to_owned(),
                routing_model: "llama-3.1-8b-instant".to_owned(),
                timeout_secs: 30,
                max_retries: 2,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_owned(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            quota: QuotaConfig { default_org_token_limit: 1_000_000, reserve_buffer: 0.1 },
            logging: LoggingConfig { level: "info".to_owned(), format: LogFormat::Compact },
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<String>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub default_org_token_limit: Option<u64>,
    pub reserve_buffer: Option<f64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    server: Option<ServerPatch>,
    quota: Option<QuotaPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    routing_model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct QuotaPatch {
    default_org_token_limit: Option<u64>,
    reserve_buffer: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("steward.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key_value) = llm.api_key {
                self.llm.api_key = Some(api_key_value.into());
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(routing_model) = llm.routing_model {
                self.llm.routing_model = routing_model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(quota) = patch.quota {
            if let Some(limit) = quota.default_org_token_limit {
                self.quota.default_org_token_limit = limit;
            }
            if let Some(buffer) = quota.reserve_buffer {
                self.quota.reserve_buffer = buffer;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(url) = env::var("STEWARD_DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(level) = env::var("STEWARD_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = env::var("STEWARD_LOG_FORMAT") {
            self.logging.format = format.parse()?;
        }
        if let Ok(provider) = env::var("STEWARD_LLM_PROVIDER") {
            self.llm.provider = provider;
        }
        if let Ok(model) = env::var("STEWARD_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Ok(api_key) = env::var("STEWARD_LLM_API_KEY") {
            self.llm.api_key = Some(api_key.into());
        }
        if let Ok(value) = env::var("STEWARD_DEFAULT_ORG_TOKEN_LIMIT") {
            self.quota.default_org_token_limit = value.parse().map_err(|_| {
                ConfigError::InvalidEnvOverride {
                    key: "STEWARD_DEFAULT_ORG_TOKEN_LIMIT".to_owned(),
                    value,
                }
            })?;
        }
        if let Ok(value) = env::var("STEWARD_QUOTA_RESERVE_BUFFER") {
            self.quota.reserve_buffer = value.parse().map_err(|_| {
                ConfigError::InvalidEnvOverride {
                    key: "STEWARD_QUOTA_RESERVE_BUFFER".to_owned(),
                    value,
                }
            })?;
        }
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(url) = overrides.database_url {
            self.database.url = url;
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
        if let Some(provider) = overrides.llm_provider {
            self.llm.provider = provider;
        }
        if let Some(model) = overrides.llm_model {
            self.llm.model = model;
        }
        if let Some(api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(api_key.into());
        }
        if let Some(limit) = overrides.default_org_token_limit {
            self.quota.default_org_token_limit = limit;
        }
        if let Some(buffer) = overrides.reserve_buffer {
            self.quota.reserve_buffer = buffer;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Validation("database.url must not be empty".to_owned()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Validation(
                "database.max_connections must be at least 1".to_owned(),
            ));
        }
        if self.llm.model.trim().is_empty() || self.llm.routing_model.trim().is_empty() {
            return Err(ConfigError::Validation(
                "llm.model and llm.routing_model must not be empty".to_owned(),
            ));
        }
        if !(0.0..=1.0).contains(&self.quota.reserve_buffer) {
            return Err(ConfigError::Validation(
                "quota.reserve_buffer must be within [0.0, 1.0]".to_owned(),
            ));
        }
        if self.quota.default_org_token_limit == 0 {
            return Err(ConfigError::Validation(
                "quota.default_org_token_limit must be positive".to_owned(),
            ));
        }
        Ok(())
    }
}

fn resolve_config_path(requested: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = requested {
        return path.exists().then(|| path.to_path_buf());
    }
    let default = PathBuf::from("steward.toml");
    default.exists().then_some(default)
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    toml::from_str(&raw)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}
