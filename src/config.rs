//! Application configuration management.
//!
//! This module handles loading configuration from environment variables.
//! It uses the `envy` crate to automatically deserialize environment variables into a type-safe struct.

use chrono::FixedOffset;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::app::EngineSettings;
use crate::gateway::midtrans::MidtransConfig;

const SANDBOX_SNAP_URL: &str = "https://app.sandbox.midtrans.com/snap/v1/transactions";
const SANDBOX_API_URL: &str = "https://api.sandbox.midtrans.com";

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `DATABASE_MAX_CONNECTIONS` (optional): pool size, defaults to 5
/// - `MIDTRANS_SERVER_KEY` (required): gateway server key
/// - `MIDTRANS_SNAP_URL`, `MIDTRANS_API_URL` (optional): sandbox by default
/// - `GATEWAY_TIMEOUT_SECS` (optional): 1 to 60, defaults to 20
/// - `CHARGE_EXPIRY_MINUTES` (optional): defaults to 1440
/// - `INVOICE_UTC_OFFSET_HOURS` (optional): defaults to 7
/// - `RECONCILE_INTERVAL_SECS` (optional): defaults to 300
/// - `STALE_INTENT_MINUTES` (optional): defaults to 15
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,

    pub midtrans_server_key: String,

    #[serde(default = "default_snap_url")]
    pub midtrans_snap_url: String,

    #[serde(default = "default_api_url")]
    pub midtrans_api_url: String,

    #[serde(default = "default_gateway_timeout")]
    pub gateway_timeout_secs: u64,

    #[serde(default = "default_charge_expiry")]
    pub charge_expiry_minutes: i64,

    #[serde(default = "default_invoice_offset")]
    pub invoice_utc_offset_hours: i32,

    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,

    #[serde(default = "default_stale_intent")]
    pub stale_intent_minutes: i64,
}

/// Default port if SERVER_PORT environment variable is not set.
fn default_port() -> u16 {
    3000
}

fn default_max_connections() -> u32 {
    5
}

fn default_snap_url() -> String {
    SANDBOX_SNAP_URL.to_string()
}

fn default_api_url() -> String {
    SANDBOX_API_URL.to_string()
}

fn default_gateway_timeout() -> u64 {
    20
}

fn default_charge_expiry() -> i64 {
    24 * 60
}

fn default_invoice_offset() -> i32 {
    7
}

fn default_reconcile_interval() -> u64 {
    300
}

fn default_stale_intent() -> i64 {
    15
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Env(#[from] envy::Error),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        name,
        reason: reason.into(),
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This method first attempts to load a `.env` file (which is optional),
    /// then reads environment variables, deserializes them into a Config
    /// struct and validates them.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Required environment variables are missing (e.g., DATABASE_URL)
    /// - Environment variable values cannot be parsed into expected types
    /// - A value is out of range (see `validate`)
    pub fn from_env() -> Result<Self, ConfigError> {
        // Try to load .env file if it exists (does nothing if not found)
        dotenvy::dotenv().ok();

        // Field names are automatically converted: database_url -> DATABASE_URL
        let config = envy::from_env::<Config>()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(invalid("DATABASE_URL", "must not be empty"));
        }
        if self.database_max_connections == 0 {
            return Err(invalid("DATABASE_MAX_CONNECTIONS", "must be at least 1"));
        }
        if self.midtrans_server_key.trim().is_empty() {
            return Err(invalid("MIDTRANS_SERVER_KEY", "must not be empty"));
        }
        self.snap_url()?;
        self.api_url()?;
        if !(1..=60).contains(&self.gateway_timeout_secs) {
            return Err(invalid("GATEWAY_TIMEOUT_SECS", "must be between 1 and 60"));
        }
        if self.charge_expiry_minutes <= 0 {
            return Err(invalid("CHARGE_EXPIRY_MINUTES", "must be positive"));
        }
        self.invoice_offset()?;
        if self.reconcile_interval_secs == 0 {
            return Err(invalid("RECONCILE_INTERVAL_SECS", "must be positive"));
        }
        if self.stale_intent_minutes <= 0 {
            return Err(invalid("STALE_INTENT_MINUTES", "must be positive"));
        }
        Ok(())
    }

    pub fn midtrans(&self) -> Result<MidtransConfig, ConfigError> {
        Ok(MidtransConfig {
            server_key: self.midtrans_server_key.clone(),
            snap_url: self.snap_url()?,
            api_url: self.api_url()?,
            timeout: Duration::from_secs(self.gateway_timeout_secs),
        })
    }

    pub fn engine(&self) -> Result<EngineSettings, ConfigError> {
        Ok(EngineSettings {
            charge_expiry_minutes: self.charge_expiry_minutes,
            invoice_offset: self.invoice_offset()?,
            stale_intent_minutes: self.stale_intent_minutes,
        })
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    fn snap_url(&self) -> Result<Url, ConfigError> {
        parse_http_url("MIDTRANS_SNAP_URL", &self.midtrans_snap_url)
    }

    /// Core API base; always ends in `/` so relative joins keep the path.
    fn api_url(&self) -> Result<Url, ConfigError> {
        let raw = self.midtrans_api_url.trim_end_matches('/');
        parse_http_url("MIDTRANS_API_URL", &format!("{}/", raw))
    }

    fn invoice_offset(&self) -> Result<FixedOffset, ConfigError> {
        if !(-12..=14).contains(&self.invoice_utc_offset_hours) {
            return Err(invalid("INVOICE_UTC_OFFSET_HOURS", "must be between -12 and 14"));
        }
        FixedOffset::east_opt(self.invoice_utc_offset_hours * 3600)
            .ok_or_else(|| invalid("INVOICE_UTC_OFFSET_HOURS", "out of range"))
    }
}

fn parse_http_url(name: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| invalid(name, e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(name, "must be an http(s) URL"));
    }
    Ok(url)
}
