//! Configuration loading from environment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use booking_gateway::stripe::DEFAULT_API_BASE;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// Stripe secret key; the sandbox gateway is used when absent.
    pub stripe_secret_key: Option<String>,
    pub stripe_api_base: String,
    pub frontend_url: String,
    pub gateway_timeout: Duration,
    pub rate_limit_per_minute: u32,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = lookup("DATABASE_URL")
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;

        Ok(Self {
            port: parse_or(&lookup, "PORT", 3000)?,
            database_url,
            stripe_secret_key: lookup("STRIPE_SECRET_KEY").filter(|key| !key.trim().is_empty()),
            stripe_api_base: lookup("STRIPE_API_BASE")
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            frontend_url: lookup("FRONTEND_URL")
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
            gateway_timeout: Duration::from_secs(parse_or(&lookup, "GATEWAY_TIMEOUT_SECS", 10)?),
            rate_limit_per_minute: parse_or(&lookup, "RATE_LIMIT_PER_MINUTE", 100)?,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {}: {} ({})", key, raw, e)),
        None => Ok(default),
    }
}
