//! Environment configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use gridmix_parser::CarbonTables;
use tracing::info;

const DEFAULT_USER_AGENT: &str =
    "gridmix-collector/0.1 (grid carbon intensity research; public report downloads)";

#[derive(Debug, Clone)]
pub struct Config {
    /// Only required when writing to PostgreSQL.
    pub db_url: Option<String>,
    pub request_timeout: Duration,
    /// Extra attempts after an empty response body.
    pub fetch_retries: u32,
    pub fetch_retry_delay: Duration,
    pub carbon_factors_path: Option<PathBuf>,
    pub user_agent: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            db_url: get("DB_URL").filter(|v| !v.trim().is_empty()),
            request_timeout: Duration::from_secs(parse_or(&get, "REQUEST_TIMEOUT_SECS", 20)?),
            fetch_retries: parse_or(&get, "FETCH_RETRIES", 3)?,
            fetch_retry_delay: Duration::from_millis(parse_or(&get, "FETCH_RETRY_DELAY_MS", 1000)?),
            carbon_factors_path: get("CARBON_FACTORS_PATH")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            user_agent: get("USER_AGENT").unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
        })
    }

    pub fn db_url(&self) -> Result<&str> {
        self.db_url
            .as_deref()
            .context("DB_URL env var missing (use --dry-run to run without a database)")
    }

    /// Emission factors and fuel-mix profiles, from file or built-in.
    pub fn load_carbon_tables(&self) -> Result<CarbonTables> {
        let Some(path) = &self.carbon_factors_path else {
            return Ok(CarbonTables::default());
        };
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read carbon tables {}", path.display()))?;
        let tables = CarbonTables::from_json(&json)
            .with_context(|| format!("Failed to parse carbon tables {}", path.display()))?;
        info!(path = %path.display(), "loaded carbon tables");
        Ok(tables)
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a number, got {raw:?}")),
        None => Ok(default),
    }
}
