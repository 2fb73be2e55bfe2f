use liquidation_data::{broadcast::BroadcastConfig, exchange::ExchangeId};
use std::{
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    str::FromStr,
    time::Duration,
};
use thiserror::Error;

pub const DEFAULT_WS_ADDR: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 9001));
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Smallest usable subscriber queue, enough for the registration snapshot & recent log.
pub const MIN_CLIENT_BUFFER: usize = 2;

#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    #[error("invalid {var}={value}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str, reason: impl ToString) -> Self {
        Self::Invalid {
            var,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().as_str() {
            "text" | "" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Server configuration, read from environment variables.
///
/// | Variable                 | Default        |
/// |--------------------------|----------------|
/// | `WS_ADDR`                | `0.0.0.0:9001` |
/// | `WS_CLIENT_BUFFER`       | `256`          |
/// | `HEARTBEAT_TIMEOUT_SECS` | `30`           |
/// | `SWEEP_INTERVAL_SECS`    | `10`           |
/// | `FEEDS`                  | every exchange |
/// | `SHUTDOWN_GRACE_SECS`    | `3`            |
/// | `LOG_FORMAT`             | `text`         |
#[derive(Clone, PartialEq, Debug)]
pub struct Config {
    pub addr: SocketAddr,
    pub broadcast: BroadcastConfig,
    pub feeds: Vec<ExchangeId>,
    pub shutdown_grace: Duration,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build a [`Config`] from an arbitrary variable lookup. Unset variables take defaults,
    /// set but unparseable variables are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = BroadcastConfig::default();

        let addr = parse_or(&lookup, "WS_ADDR", || DEFAULT_WS_ADDR)?;

        let client_buffer = parse_or(&lookup, "WS_CLIENT_BUFFER", || defaults.client_buffer)?;
        if client_buffer < MIN_CLIENT_BUFFER {
            return Err(ConfigError::invalid(
                "WS_CLIENT_BUFFER",
                &client_buffer.to_string(),
                format!("must be at least {MIN_CLIENT_BUFFER}"),
            ));
        }

        let heartbeat_timeout = parse_secs_or(
            &lookup,
            "HEARTBEAT_TIMEOUT_SECS",
            defaults.heartbeat_timeout,
        )?;
        let sweep_interval =
            parse_secs_or(&lookup, "SWEEP_INTERVAL_SECS", defaults.sweep_interval)?;
        let shutdown_grace = parse_secs_or(&lookup, "SHUTDOWN_GRACE_SECS", DEFAULT_SHUTDOWN_GRACE)?;
        let log_format = parse_or(&lookup, "LOG_FORMAT", LogFormat::default)?;

        let feeds = match lookup("FEEDS") {
            None => ExchangeId::ALL.to_vec(),
            Some(value) => parse_feeds(&value)?,
        };

        Ok(Self {
            addr,
            broadcast: BroadcastConfig {
                heartbeat_timeout,
                sweep_interval,
                client_buffer,
            },
            feeds,
            shutdown_grace,
            log_format,
        })
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: impl FnOnce() -> T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: ToString,
{
    match lookup(var) {
        None => Ok(default()),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|error: T::Err| ConfigError::invalid(var, &value, error)),
    }
}

fn parse_secs_or<F>(lookup: &F, var: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let secs = parse_or(lookup, var, || default.as_secs())?;
    if secs == 0 {
        return Err(ConfigError::invalid(var, "0", "must be greater than zero"));
    }
    Ok(Duration::from_secs(secs))
}

/// Parse a comma separated list of exchanges, ignoring duplicates & empty entries.
fn parse_feeds(value: &str) -> Result<Vec<ExchangeId>, ConfigError> {
    let mut feeds = Vec::new();
    for entry in value.split(',').filter(|entry| !entry.trim().is_empty()) {
        let exchange = entry
            .parse::<ExchangeId>()
            .map_err(|error| ConfigError::invalid("FEEDS", value, error))?;
        if !feeds.contains(&exchange) {
            feeds.push(exchange);
        }
    }

    if feeds.is_empty() {
        return Err(ConfigError::invalid("FEEDS", value, "no exchanges listed"));
    }
    Ok(feeds)
}
