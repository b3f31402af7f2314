//! Server configuration from `TABLEBOOK_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::FixedOffset;
use thiserror::Error;

use crate::advisory::{AdvisoryError, ChatCompletionAdvisor, NoAdvisor, TableAdvisor};
use crate::engine::{CancellationPolicy, EngineSettings};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name}: cannot parse {value:?}")]
    Invalid { name: &'static str, value: String },
    #[error("{name}: {reason}")]
    OutOfRange { name: &'static str, reason: &'static str },
    #[error("advisor setup failed: {0}")]
    Advisor(#[from] AdvisoryError),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub max_connections: usize,
    pub metrics_port: Option<u16>,
    /// Restaurant-local time relative to UTC, in minutes.
    pub utc_offset_minutes: i32,
    /// OpenAI-compatible chat completions URL; no advisor when unset.
    pub advisor_url: Option<String>,
    pub advisor_api_key: Option<String>,
    pub advisor_model: String,
    pub advisor_timeout: Duration,
    pub sweep_interval: Duration,
    /// JSON inventory loaded at startup.
    pub seed: Option<PathBuf>,
    pub cancellation: CancellationPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 7878,
            max_connections: 256,
            metrics_port: None,
            utc_offset_minutes: 180,
            advisor_url: None,
            advisor_api_key: None,
            advisor_model: "llama-3.1-8b-instant".into(),
            advisor_timeout: Duration::from_secs(3),
            sweep_interval: Duration::from_secs(60),
            seed: None,
            cancellation: CancellationPolicy::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Unset or empty variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let max_connections = parse_or(&get, "TABLEBOOK_MAX_CONNECTIONS", defaults.max_connections)?;
        if max_connections == 0 {
            return Err(ConfigError::OutOfRange {
                name: "TABLEBOOK_MAX_CONNECTIONS",
                reason: "must be at least 1",
            });
        }
        let utc_offset_minutes = parse_or(&get, "TABLEBOOK_UTC_OFFSET_MINUTES", defaults.utc_offset_minutes)?;
        if utc_offset_minutes.abs() >= 24 * 60 {
            return Err(ConfigError::OutOfRange {
                name: "TABLEBOOK_UTC_OFFSET_MINUTES",
                reason: "must be within one day",
            });
        }
        let advisor_timeout_ms: u64 = parse_or(&get, "TABLEBOOK_ADVISOR_TIMEOUT_MS", 3_000)?;
        let sweep_secs: u64 = parse_or(&get, "TABLEBOOK_SWEEP_INTERVAL_SECS", 60)?;
        if sweep_secs == 0 {
            return Err(ConfigError::OutOfRange {
                name: "TABLEBOOK_SWEEP_INTERVAL_SECS",
                reason: "must be at least 1",
            });
        }

        Ok(Self {
            bind: get("TABLEBOOK_BIND").unwrap_or(defaults.bind),
            port: parse_or(&get, "TABLEBOOK_PORT", defaults.port)?,
            max_connections,
            metrics_port: get("TABLEBOOK_METRICS_PORT")
                .map(|v| parse("TABLEBOOK_METRICS_PORT", &v))
                .transpose()?,
            utc_offset_minutes,
            advisor_url: get("TABLEBOOK_ADVISOR_URL"),
            advisor_api_key: get("TABLEBOOK_ADVISOR_API_KEY"),
            advisor_model: get("TABLEBOOK_ADVISOR_MODEL").unwrap_or(defaults.advisor_model),
            advisor_timeout: Duration::from_millis(advisor_timeout_ms),
            sweep_interval: Duration::from_secs(sweep_secs),
            seed: get("TABLEBOOK_SEED").map(PathBuf::from),
            cancellation: CancellationPolicy {
                minimum_advance_hours: parse_or(
                    &get,
                    "TABLEBOOK_CANCEL_MIN_ADVANCE_HOURS",
                    defaults.cancellation.minimum_advance_hours,
                )?,
                allow_same_day: parse_or(
                    &get,
                    "TABLEBOOK_CANCEL_ALLOW_SAME_DAY",
                    defaults.cancellation.allow_same_day,
                )?,
            },
        })
    }

    pub fn utc_offset(&self) -> Result<FixedOffset, ConfigError> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or(ConfigError::OutOfRange {
            name: "TABLEBOOK_UTC_OFFSET_MINUTES",
            reason: "must be within one day",
        })
    }

    pub fn engine_settings(&self) -> Result<EngineSettings, ConfigError> {
        Ok(EngineSettings {
            utc_offset: self.utc_offset()?,
            advisory_timeout: self.advisor_timeout,
            cancellation: self.cancellation,
        })
    }

    pub fn build_advisor(&self) -> Result<Arc<dyn TableAdvisor>, ConfigError> {
        match &self.advisor_url {
            Some(url) => Ok(Arc::new(ChatCompletionAdvisor::new(
                url.clone(),
                self.advisor_api_key.clone(),
                self.advisor_model.clone(),
                self.advisor_timeout,
            )?)),
            None => Ok(Arc::new(NoAdvisor)),
        }
    }
}

fn parse<T: FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        value: value.to_string(),
    })
}

fn parse_or<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(name) {
        Some(v) => parse(name, &v),
        None => Ok(default),
    }
}
