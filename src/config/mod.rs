//! Configuration management for the cloud connector
//!
//! Values resolve as env > TOML file > default. Command-line flags are
//! applied on top by the binary.

pub mod file;

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;

use crate::auth::AuthMode;
use crate::{Error, Result};

use file::ConnectorConfigFile;

/// Default node connect port
pub const DEFAULT_PORT: u16 = 8071;

/// Default per-frame write deadline, in seconds
pub const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 10;

/// Cloud connector configuration
#[derive(Debug)]
pub struct Config {
    /// Node connect endpoint
    pub server: ServerConfig,

    /// Message broker
    pub broker: BrokerConfig,

    /// Handshake verification
    pub auth: AuthConfig,

    /// Path to the directory database
    pub database_path: PathBuf,

    /// Unanswered requests are reported as timed out after this long.
    /// `None` leaves them pending forever.
    pub request_timeout: Option<Duration>,
}

/// Node connect endpoint configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,

    /// A node that takes longer than this to accept one frame is disconnected
    pub write_timeout: Duration,
}

/// Message broker configuration
#[derive(Debug)]
pub struct BrokerConfig {
    /// AMQP URL (may embed credentials)
    pub url: SecretString,

    /// Queue the cloud publishes commands to
    pub requests_queue: String,

    /// Queue the bridge publishes replies to
    pub responses_queue: String,

    /// Broker-side prefetch (`basic.qos`)
    pub prefetch: u16,

    /// Deliveries handled concurrently
    pub max_in_flight: usize,

    /// Connection attempts at startup
    pub connect_retries: u32,
}

/// Handshake verification configuration
#[derive(Debug)]
pub struct AuthConfig {
    /// Scheme used by this deployment
    pub mode: AuthMode,

    /// JWT signing secret (token mode) or shared passphrase (passphrase mode)
    pub secret: SecretString,
}

impl Config {
    /// Load configuration from the environment and the TOML file at `path`
    /// (or the standard location)
    ///
    /// # Errors
    ///
    /// Returns error if a required value is missing or malformed
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(path);
        Self::resolve(fc, |key| std::env::var(key).ok())
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a required value is missing or malformed
    pub fn resolve<F>(fc: ConnectorConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse_env = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        // Server (env > toml > default)
        let port = match parse_env("CONNECTOR_PORT").or(parse_env("PORT")) {
            Some(raw) => parse_number::<u16>("port", &raw)?,
            None => fc.server.port.unwrap_or(DEFAULT_PORT),
        };
        if port == 0 {
            return Err(Error::Config(format!("port value is invalid ({port})")));
        }
        let bind_raw = parse_env("CONNECTOR_BIND")
            .or(fc.server.bind)
            .unwrap_or_else(|| "0.0.0.0".to_string());
        let bind: IpAddr = bind_raw
            .parse()
            .map_err(|e| Error::Config(format!("bad bind address {bind_raw:?}: {e}")))?;
        let write_timeout_secs = match parse_env("CONNECTOR_WRITE_TIMEOUT_SECS") {
            Some(raw) => parse_number::<u64>("write timeout", &raw)?,
            None => fc.server.write_timeout_secs.unwrap_or(DEFAULT_WRITE_TIMEOUT_SECS),
        };
        if write_timeout_secs == 0 {
            return Err(Error::Config("write timeout must be at least 1 second".to_string()));
        }
        let server = ServerConfig {
            bind,
            port,
            write_timeout: Duration::from_secs(write_timeout_secs),
        };

        // Broker
        let url = parse_env("RABBITMQ_URL")
            .or(fc.broker.url)
            .ok_or_else(|| Error::Config("RabbitMQ URL is not set (RABBITMQ_URL)".to_string()))?;
        let prefetch = match parse_env("CONNECTOR_PREFETCH") {
            Some(raw) => parse_number("prefetch", &raw)?,
            None => fc.broker.prefetch.unwrap_or(32),
        };
        let max_in_flight = match parse_env("CONNECTOR_MAX_IN_FLIGHT") {
            Some(raw) => parse_number("max in flight", &raw)?,
            None => fc.broker.max_in_flight.unwrap_or(usize::from(prefetch)),
        };
        if max_in_flight == 0 {
            return Err(Error::Config("max in flight must be at least 1".to_string()));
        }
        let connect_retries = match parse_env("CONNECTOR_BROKER_RETRIES") {
            Some(raw) => parse_number("broker retries", &raw)?,
            None => fc.broker.connect_retries.unwrap_or(5),
        };
        let broker = BrokerConfig {
            url: SecretString::from(url),
            requests_queue: parse_env("CONNECTOR_REQUESTS_QUEUE")
                .or(fc.broker.requests_queue)
                .unwrap_or_else(|| "requests".to_string()),
            responses_queue: parse_env("CONNECTOR_RESPONSES_QUEUE")
                .or(fc.broker.responses_queue)
                .unwrap_or_else(|| "responses".to_string()),
            prefetch,
            max_in_flight,
            connect_retries,
        };

        // Auth: exactly one scheme, its secret is mandatory
        let mode_raw = parse_env("CONNECTOR_AUTH_MODE").or(fc.auth.mode);
        let mode = match mode_raw {
            Some(raw) => AuthMode::parse(&raw)
                .ok_or_else(|| Error::Config(format!("unknown auth mode {raw:?}")))?,
            None => AuthMode::default(),
        };
        let secret = match mode {
            AuthMode::Token => parse_env("JWT_SECURITY_KEY"),
            AuthMode::Passphrase => parse_env("CONNECTOR_PASSPHRASE"),
        }
        .or(fc.auth.secret)
        .ok_or_else(|| match mode {
            AuthMode::Token => Error::Config("JWT_SECURITY_KEY not specified".to_string()),
            AuthMode::Passphrase => {
                Error::Config("CONNECTOR_PASSPHRASE not specified".to_string())
            }
        })?;
        let auth = AuthConfig {
            mode,
            secret: SecretString::from(secret),
        };

        // Directory database (~/.local/share/cloud-connector/connector.db on Linux)
        let database_path = parse_env("DATABASE_PATH")
            .or(fc.database.path)
            .map_or_else(default_database_path, PathBuf::from);

        let request_timeout = match parse_env("CONNECTOR_REQUEST_TIMEOUT_SECS") {
            Some(raw) => Some(parse_number::<u64>("request timeout", &raw)?),
            None => fc.bridge.request_timeout_secs,
        }
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs);

        Ok(Self {
            server,
            broker,
            auth,
            database_path,
            request_timeout,
        })
    }
}

fn parse_number<T>(what: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e| Error::Config(format!("failed to parse {what} {raw:?}: {e}")))
}

fn default_database_path() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from("connector.db"),
        |d| d.data_dir().join("cloud-connector").join("connector.db"),
    )
}
