//! Layered configuration
//!
//! Built-in defaults, then an optional TOML file, then `CALLWATCH__*`
//! environment variables (`CALLWATCH__PRESENCE__MAX_AGENTS=200`). The
//! merged result is validated before any component sees it.

use callwatch_infra_common::logging::{parse_log_level, LoggingConfig};
use callwatch_presence_core::PresenceConfig;
use callwatch_presence_gateway::GatewayConfig;
use callwatch_sla_core::SlaEngineConfig;
use callwatch_supervisor_core::SupervisorConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Environment variable prefix; nested keys are separated by `__`
pub const ENV_PREFIX: &str = "CALLWATCH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Failed to parse TOML configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("Invalid {component} configuration: {message}")]
    Invalid {
        component: &'static str,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

fn invalid(component: &'static str, error: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        component,
        message: error.to_string(),
    }
}

/// Logging section, turned into a [`LoggingConfig`] at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
    pub file_info: bool,
    pub spans: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_info: false,
            spans: false,
        }
    }
}

impl LoggingSettings {
    pub fn to_logging_config(&self, app_name: &str) -> Result<LoggingConfig> {
        let level = parse_log_level(&self.level).map_err(|e| invalid("logging", e))?;
        let mut config = LoggingConfig::new(level, app_name);
        if self.json {
            config = config.with_json();
        }
        if self.file_info {
            config = config.with_file_info();
        }
        if self.spans {
            config = config.with_spans();
        }
        Ok(config)
    }
}

/// Configuration of every component
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallwatchConfig {
    pub logging: LoggingSettings,
    pub presence: PresenceConfig,
    pub supervisor: SupervisorConfig,
    pub sla: SlaEngineConfig,
    pub gateway: GatewayConfig,
}

impl CallwatchConfig {
    /// Merge defaults, the optional file and the environment, then validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(true),
            );
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: CallwatchConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: CallwatchConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        parse_log_level(&self.logging.level).map_err(|e| invalid("logging", e))?;
        self.presence.validate().map_err(|e| invalid("presence", e))?;
        self.supervisor
            .validate()
            .map_err(|e| invalid("supervisor", e))?;
        self.sla.validate().map_err(|e| invalid("sla", e))?;
        self.gateway.validate().map_err(|e| invalid("gateway", e))?;
        Ok(())
    }
}
