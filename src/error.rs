//! Error types for the cloud connector

use thiserror::Error;

/// Result type alias for connector operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the cloud connector
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Handshake credentials missing or invalid
    #[error("auth rejected: {0}")]
    AuthRejected(#[from] crate::auth::AuthError),

    /// A newer session replaced this one
    #[error("connection superseded for node {0}")]
    ConnectionSuperseded(uuid::Uuid),

    /// Read or write failure on a node session
    #[error("transport error: {0}")]
    Transport(String),

    /// A frame or broker body failed to parse
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Command addressed to a node with no live session
    #[error("node not connected")]
    NodeUnreachable(String),

    /// The broker connection is gone; the bridge cannot continue
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// AMQP protocol error
    #[error("broker error: {0}")]
    Broker(#[from] lapin::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}
