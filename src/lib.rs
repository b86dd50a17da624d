//! Cloud Connector - bridge between a cloud message broker and edge nodes
//!
//! This library provides the core functionality for the connector:
//! - Node handshake verification (signed token or shared passphrase)
//! - A registry of live node sessions, one per node
//! - Request/response correlation over an AMQP broker
//! - A directory of known nodes backed by `SQLite`
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Cloud (via RabbitMQ)                 │
//! │        requests queue   │   responses queue          │
//! └────────────────────┬────────────────▲───────────────┘
//!                      │                │
//! ┌────────────────────▼────────────────┴───────────────┐
//! │                  Cloud Connector                     │
//! │  Broker  │  Correlator  │  Registry  │  Directory    │
//! └────────────────────┬────────────────▲───────────────┘
//!                      │                │
//! ┌────────────────────▼────────────────┴───────────────┐
//! │              Nodes (WebSocket sessions)              │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod bridge;
pub mod broker;
pub mod config;
pub mod daemon;
pub mod db;
pub mod directory;
pub mod error;
pub mod nodes;
pub mod server;

pub use auth::{AuthError, AuthMode, Verifier};
pub use bridge::{Correlator, ResponseDispatcher, ResponseHandler};
pub use broker::{AmqpBroker, BrokerDelivery, ResponsePublisher};
pub use config::Config;
pub use daemon::Daemon;
pub use db::DbPool;
pub use directory::{DirectoryStore, NodeRecord};
pub use error::{Error, Result};
pub use nodes::{ConnectionRegistry, NodeIdentity, Session, SessionHandle};
pub use server::{NodeServer, ServerState};
