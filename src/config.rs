//! Configuration from the environment

use std::net::SocketAddr;

use anyhow::Result;
use url::Url;

use crate::dispatch::DEFAULT_MAX_CONCURRENT_OWNERS;
use crate::messaging::DEFAULT_TELEGRAM_API_URL;
use crate::utils::env_var_or_else;
use crate::utils::optional_env_var;

const DEFAULT_ADDRESS: &str = "0.0.0.0:6000";

/// Tick interval when none or an invalid one is configured
pub const DEFAULT_INTERVAL_MINUTES: u32 = 60;

/// Shortest accepted tick interval
pub const MIN_INTERVAL_MINUTES: u32 = 5;

/// Everything configurable
#[derive(Clone, Debug)]
pub struct Config {
    /// Address to listen on
    pub address: SocketAddr,

    /// Postgres connection string, in-memory storage without it
    pub database_url: Option<String>,

    /// Minutes between ticks
    pub interval_minutes: u32,

    /// Run a tick right after startup
    pub tick_on_startup: bool,

    /// Owners processed at the same time during a tick
    pub max_concurrent_owners: usize,

    /// Telegram bot token
    pub telegram_bot_token: String,

    /// Base URL of the Telegram Bot API
    pub telegram_api_url: Url,

    /// Secret Telegram sends along with webhook updates
    pub telegram_webhook_secret: Option<String>,

    /// Bearer token of the management API
    pub api_token: String,
}

impl Config {
    /// Read the configuration from the environment
    ///
    /// # Errors
    ///
    /// Will return `Err` for an invalid address, port or Telegram API URL
    pub fn from_env() -> Result<Self> {
        let telegram_bot_token = env_var_or_else("TELEGRAM_BOT_TOKEN", || {
            tracing::warn!("`TELEGRAM_BOT_TOKEN` is not set, reminders can not be delivered");
            String::new()
        });

        let api_token = env_var_or_else("API_TOKEN", || {
            let api_token = uuid::Uuid::new_v4().simple().to_string();
            tracing::info!("`API_TOKEN` is not set, generating temporary one: {api_token}");
            api_token
        });

        Ok(Self {
            address: setup_address()?,
            database_url: optional_env_var("DATABASE_URL"),
            interval_minutes: parse_interval_minutes(optional_env_var("REMINDER_INTERVAL_MINUTES")),
            tick_on_startup: parse_flag("TICK_ON_STARTUP", optional_env_var("TICK_ON_STARTUP"), true),
            max_concurrent_owners: parse_max_concurrent_owners(optional_env_var(
                "MAX_CONCURRENT_OWNERS",
            )),
            telegram_bot_token,
            telegram_api_url: Url::parse(&env_var_or_else("TELEGRAM_API_URL", || {
                String::from(DEFAULT_TELEGRAM_API_URL)
            }))?,
            telegram_webhook_secret: optional_env_var("TELEGRAM_WEBHOOK_SECRET"),
            api_token,
        })
    }
}

fn setup_address() -> Result<SocketAddr> {
    let mut address =
        env_var_or_else("ADDRESS", || String::from(DEFAULT_ADDRESS)).parse::<SocketAddr>()?;

    // optional override of just the port
    if let Some(port) = optional_env_var("PORT") {
        address.set_port(port.parse::<u16>()?);
    }

    Ok(address)
}

/// Tick interval in minutes
///
/// Invalid values fall back to [`DEFAULT_INTERVAL_MINUTES`], short ones are raised to
/// [`MIN_INTERVAL_MINUTES`].
pub fn parse_interval_minutes(value: Option<String>) -> u32 {
    let Some(value) = value else {
        return DEFAULT_INTERVAL_MINUTES;
    };

    match value.trim().parse::<i64>() {
        Ok(minutes) if minutes < i64::from(MIN_INTERVAL_MINUTES) => {
            tracing::warn!(
                "`REMINDER_INTERVAL_MINUTES` of {minutes} is too short, using {MIN_INTERVAL_MINUTES}"
            );
            MIN_INTERVAL_MINUTES
        }
        Ok(minutes) => u32::try_from(minutes).unwrap_or(u32::MAX),
        Err(_) => {
            tracing::warn!(
                "`REMINDER_INTERVAL_MINUTES` is not a number: {value}, using {DEFAULT_INTERVAL_MINUTES}"
            );
            DEFAULT_INTERVAL_MINUTES
        }
    }
}

/// Number of owners processed at the same time, at least one
pub fn parse_max_concurrent_owners(value: Option<String>) -> usize {
    value
        .and_then(|value| value.trim().parse::<usize>().ok())
        .filter(|max| *max > 0)
        .unwrap_or(DEFAULT_MAX_CONCURRENT_OWNERS)
}

/// Boolean flag like `true`, `0` or `off`
pub fn parse_flag(name: &str, value: Option<String>, default: bool) -> bool {
    let Some(value) = value else {
        return default;
    };

    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            tracing::warn!("`{name}` is not a valid flag: {value}, using {default}");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_interval_minutes() {
        assert_eq!(60, parse_interval_minutes(None));
        assert_eq!(15, parse_interval_minutes(Some("15".to_string())));
        assert_eq!(45, parse_interval_minutes(Some(" 45 ".to_string())));
        assert_eq!(5, parse_interval_minutes(Some("1".to_string())));
        assert_eq!(5, parse_interval_minutes(Some("0".to_string())));
        assert_eq!(60, parse_interval_minutes(Some("soon".to_string())));
        assert_eq!(5, parse_interval_minutes(Some("-3".to_string())));
        assert_eq!(5, parse_interval_minutes(Some("-15".to_string())));
    }

    #[test]
    fn test_parse_max_concurrent_owners() {
        assert_eq!(8, parse_max_concurrent_owners(None));
        assert_eq!(8, parse_max_concurrent_owners(Some("0".to_string())));
        assert_eq!(2, parse_max_concurrent_owners(Some("2".to_string())));
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("X", None, true));
        assert!(!parse_flag("X", Some("off".to_string()), true));
        assert!(parse_flag("X", Some("TRUE".to_string()), false));
        assert!(!parse_flag("X", Some("maybe".to_string()), false));
    }
}
