use chrono::{NaiveTime, Weekday};
use serde::Deserialize;
use std::{fs, path::Path, path::PathBuf, time::Duration};
use thiserror::Error;

use crate::relay_modules::trigger::{SuppressionSchedule, Trigger, TriggerTable};

const OPTIONS_GROUP: &str = "config";
const TRIGGER_GROUP: &str = "trigger";
const EXPECTED_OPTION_COUNT: usize = 7;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Missing top-level group [{0}]")]
    MissingGroup(&'static str),
    #[error("Unexpected top-level group [{0}]")]
    UnexpectedGroup(String),
    #[error("Group [config] must contain exactly 7 options, found {0}")]
    OptionCount(usize),
    #[error("Invalid [config] options: {0}")]
    InvalidOptions(#[source] toml::de::Error),
    #[error("Group [trigger] must contain at least one trigger")]
    NoTriggers,
    #[error("Invalid trigger '{key}': {reason}")]
    InvalidTrigger { key: String, reason: String },
    #[error("Unknown log level '{0}'")]
    InvalidLogLevel(String),
    #[error("Port must be non-zero")]
    InvalidPort,
}

/// The seven connection, dispatch and logging options of the `[config]` group.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub retries: u32,
    /// Seconds between dispatch attempts.
    pub retry_delay: u64,
    pub url: String,
    pub loglevel: String,
    pub logpath: PathBuf,
}

impl Config {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn retry_delay_duration(&self) -> Duration {
        Duration::from_secs(self.retry_delay)
    }

    /// The `EnvFilter` directive matching `loglevel`.
    pub fn log_directive(&self) -> Result<&'static str, ConfigError> {
        log_directive(&self.loglevel)
    }
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct TriggerDefinition {
    name: String,
    hour_start: u32,
    minute_start: u32,
    hour_end: u32,
    minute_end: u32,
    weekday: u8,
    request: toml::Table,
    local: bool,
}

/// Everything read from the config file at startup.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub triggers: TriggerTable,
}

pub fn log_directive(level: &str) -> Result<&'static str, ConfigError> {
    match level.to_ascii_uppercase().as_str() {
        "TRACE" => Ok("trace"),
        "DEBUG" => Ok("debug"),
        "INFO" | "NOTICE" => Ok("info"),
        "WARN" | "WARNING" => Ok("warn"),
        "ERROR" | "CRITICAL" => Ok("error"),
        _ => Err(ConfigError::InvalidLogLevel(level.to_string())),
    }
}

pub fn load_config(config_path: &Path) -> Result<LoadedConfig, ConfigError> {
    let content = fs::read_to_string(config_path).map_err(|source| ConfigError::Io {
        path: config_path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<LoadedConfig, ConfigError> {
    let mut document: toml::Table = toml::from_str(content)?;

    let options = match document.remove(OPTIONS_GROUP) {
        Some(toml::Value::Table(options)) => options,
        Some(_) | None => return Err(ConfigError::MissingGroup(OPTIONS_GROUP)),
    };
    let trigger_group = match document.remove(TRIGGER_GROUP) {
        Some(toml::Value::Table(triggers)) => triggers,
        Some(_) | None => return Err(ConfigError::MissingGroup(TRIGGER_GROUP)),
    };
    if let Some(unexpected) = document.keys().next() {
        return Err(ConfigError::UnexpectedGroup(unexpected.clone()));
    }

    if options.len() != EXPECTED_OPTION_COUNT {
        return Err(ConfigError::OptionCount(options.len()));
    }
    let config: Config = toml::Value::Table(options)
        .try_into()
        .map_err(ConfigError::InvalidOptions)?;
    if config.port == 0 {
        return Err(ConfigError::InvalidPort);
    }
    config.log_directive()?;

    if trigger_group.is_empty() {
        return Err(ConfigError::NoTriggers);
    }
    let triggers = trigger_group
        .into_iter()
        .map(|(key, value)| build_trigger(key, value))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(LoadedConfig {
        config,
        triggers: TriggerTable::new(triggers),
    })
}

fn build_trigger(key: String, value: toml::Value) -> Result<Trigger, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidTrigger {
        key: key.clone(),
        reason,
    };

    let definition: TriggerDefinition = value.try_into().map_err(|e| invalid(format!("{e}")))?;

    let weekday = match definition.weekday {
        0 => Weekday::Mon,
        1 => Weekday::Tue,
        2 => Weekday::Wed,
        3 => Weekday::Thu,
        4 => Weekday::Fri,
        5 => Weekday::Sat,
        6 => Weekday::Sun,
        other => return Err(invalid(format!("weekday {other} is not in 0..=6"))),
    };
    let start = NaiveTime::from_hms_opt(definition.hour_start, definition.minute_start, 0)
        .ok_or_else(|| {
            invalid(format!(
                "start time {}:{} is not a valid time of day",
                definition.hour_start, definition.minute_start
            ))
        })?;
    let end = NaiveTime::from_hms_opt(definition.hour_end, definition.minute_end, 0)
        .ok_or_else(|| {
            invalid(format!(
                "end time {}:{} is not a valid time of day",
                definition.hour_end, definition.minute_end
            ))
        })?;
    if start > end {
        return Err(invalid(format!("start time {start} is after end time {end}")));
    }

    let mut request = Vec::with_capacity(definition.request.len());
    for (param, value) in definition.request {
        let value = match value {
            toml::Value::String(s) => s,
            toml::Value::Integer(_) | toml::Value::Float(_) | toml::Value::Boolean(_) => {
                value.to_string()
            }
            _ => return Err(invalid(format!("request parameter '{param}' must be a scalar"))),
        };
        request.push((param, value));
    }

    Ok(Trigger {
        key,
        name: definition.name,
        schedule: SuppressionSchedule { weekday, start, end },
        request,
        local: definition.local,
    })
}
