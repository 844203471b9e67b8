//! Service configuration read from the environment (and an optional `.env`)

use crate::error::{IntakeError, Result};
use std::time::Duration;

pub const DEFAULT_DATABASE_URL: &str = "sqlite:///./data/sql_agent.db";
pub const DEFAULT_METADATA_DATABASE_URL: &str = "sqlite:///./data/metadata.db";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_NAMING_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_NAMING_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct IntakeConfig {
    /// Physical table store
    pub database_url: String,
    /// Metadata registry, kept apart from business data
    pub metadata_database_url: String,
    /// No key means no naming oracle
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub naming_model: String,
    pub naming_temperature: f32,
    pub naming_timeout: Duration,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            metadata_database_url: DEFAULT_METADATA_DATABASE_URL.to_string(),
            openai_api_key: None,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            naming_model: DEFAULT_NAMING_MODEL.to_string(),
            naming_temperature: 0.0,
            naming_timeout: Duration::from_secs(DEFAULT_NAMING_TIMEOUT_SECS),
        }
    }
}

impl IntakeConfig {
    /// Load `.env` if present, then read the process environment
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let naming_temperature = match get("NAMING_TEMPERATURE") {
            Some(raw) => raw
                .parse::<f32>()
                .map_err(|_| IntakeError::Config(format!("NAMING_TEMPERATURE is not a number: {}", raw)))?,
            None => defaults.naming_temperature,
        };
        let naming_timeout = match get("NAMING_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(raw.parse::<u64>().map_err(|_| {
                IntakeError::Config(format!("NAMING_TIMEOUT_SECS is not a whole number: {}", raw))
            })?),
            None => defaults.naming_timeout,
        };

        Ok(Self {
            database_url: get("DATABASE_URL").unwrap_or(defaults.database_url),
            metadata_database_url: get("METADATA_DATABASE_URL").unwrap_or(defaults.metadata_database_url),
            openai_api_key: get("OPENAI_API_KEY"),
            openai_base_url: get("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            naming_model: get("NAMING_MODEL").unwrap_or(defaults.naming_model),
            naming_temperature,
            naming_timeout,
        })
    }
}
