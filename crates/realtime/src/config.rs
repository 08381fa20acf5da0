//! Environment-driven configuration.
//!
//! Values come from process environment variables, optionally seeded from
//! `.env.local` / `.env` files with `dotenvy`.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::error::ConfigError;
use crate::transport::ReconnectPolicy;

pub const DEFAULT_REALTIME_URL: &str = "ws://localhost:3001/realtime";
pub const DEFAULT_API_URL: &str = "http://localhost:3000/api";
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// How order-scoped events are matched against the subscription set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderFilter {
    /// Drop order-scoped events for orders this channel is not subscribed to.
    #[default]
    Subscribed,
    /// Deliver every event; listeners compare `orderId` themselves.
    Broadcast,
}

impl FromStr for OrderFilter {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "subscribed" => Ok(OrderFilter::Subscribed),
            "broadcast" => Ok(OrderFilter::Broadcast),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub realtime_url: Url,
    pub api_url: Url,
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub order_filter: OrderFilter,
}

impl RealtimeConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration from a dotenv file, falling back to the process
    /// environment for keys the file does not set.
    pub fn from_env_file(path: &Path) -> Result<Self, ConfigError> {
        let mut values = HashMap::new();
        if let Ok(iter) = dotenvy::from_path_iter(path) {
            for (key, value) in iter.flatten() {
                values.insert(key, value);
            }
        } else {
            tracing::debug!(path = %path.display(), "No env file, using process environment");
        }
        Self::from_lookup(|name| {
            values
                .get(name)
                .cloned()
                .or_else(|| std::env::var(name).ok())
        })
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = ReconnectPolicy::default();

        let realtime_url = parse_url(
            "TOPUP_REALTIME_URL",
            get("TOPUP_REALTIME_URL").as_deref(),
            DEFAULT_REALTIME_URL,
        )?;
        let api_url = parse_url(
            "TOPUP_API_URL",
            get("TOPUP_API_URL").as_deref(),
            DEFAULT_API_URL,
        )?;
        let connect_timeout_ms = parse_num(
            "TOPUP_CONNECT_TIMEOUT_MS",
            get("TOPUP_CONNECT_TIMEOUT_MS"),
            DEFAULT_CONNECT_TIMEOUT_MS,
        )?;
        let max_attempts = parse_num(
            "TOPUP_RECONNECT_ATTEMPTS",
            get("TOPUP_RECONNECT_ATTEMPTS"),
            defaults.max_attempts,
        )?;
        let initial_delay_ms = parse_num(
            "TOPUP_RECONNECT_DELAY_MS",
            get("TOPUP_RECONNECT_DELAY_MS"),
            defaults.initial_delay.as_millis() as u64,
        )?;
        let max_delay_ms = parse_num(
            "TOPUP_RECONNECT_DELAY_MAX_MS",
            get("TOPUP_RECONNECT_DELAY_MAX_MS"),
            defaults.max_delay.as_millis() as u64,
        )?;
        let order_filter = match get("TOPUP_ORDER_FILTER") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                var: "TOPUP_ORDER_FILTER",
                value: raw,
            })?,
            None => OrderFilter::default(),
        };

        Ok(Self {
            realtime_url,
            api_url,
            connect_timeout: Duration::from_millis(connect_timeout_ms),
            reconnect: ReconnectPolicy {
                initial_delay: Duration::from_millis(initial_delay_ms),
                max_delay: Duration::from_millis(max_delay_ms.max(initial_delay_ms)),
                multiplier: defaults.multiplier,
                max_attempts,
            },
            order_filter,
        })
    }
}

/// Load `.env.local` then `.env` from `dir` into the process environment.
///
/// Existing variables are not overridden, so `.env.local` wins over `.env`.
pub fn load_dotenv(dir: &Path) {
    for filename in [".env.local", ".env"] {
        let path = dir.join(filename);
        if path.exists() {
            let _ = dotenvy::from_path(path);
        }
    }
}

fn parse_url(var: &'static str, raw: Option<&str>, default: &str) -> Result<Url, ConfigError> {
    Url::parse(raw.unwrap_or(default)).map_err(|source| ConfigError::InvalidUrl { var, source })
}

fn parse_num<T: FromStr>(var: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        None => Ok(default),
    }
}
