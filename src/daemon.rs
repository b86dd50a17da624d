//! Daemon - the main connector service
//!
//! Wires the directory, registry, broker and node endpoint together and runs
//! until interrupted or the broker goes away.

use std::sync::Arc;

use crate::auth;
use crate::bridge::{Correlator, ResponseDispatcher};
use crate::broker::AmqpBroker;
use crate::db::{self, DbPool, node::NodeRepo};
use crate::nodes::ConnectionRegistry;
use crate::server::{NodeServer, ServerState};
use crate::{Config, Error, Result};

/// The cloud connector daemon
pub struct Daemon {
    config: Config,
    db: DbPool,
}

impl Daemon {
    /// Create a new daemon instance
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened
    pub fn new(config: Config) -> Result<Self> {
        let db = db::init(&config.database_path)?;
        tracing::info!(path = %config.database_path.display(), "database initialized");

        Ok(Self { config, db })
    }

    /// Run until ctrl-c or a fatal error
    ///
    /// # Errors
    ///
    /// Returns `BrokerUnavailable` if the broker is lost, or the error that
    /// stopped the node endpoint
    pub async fn run(self) -> Result<()> {
        let Self { config, db } = self;

        let directory = Arc::new(NodeRepo::new(db));
        let registry = Arc::new(ConnectionRegistry::new(directory));

        let broker = Arc::new(AmqpBroker::connect(&config.broker).await?);

        let mut correlator = Correlator::new(Arc::clone(&registry), broker.clone());
        if let Some(timeout) = config.request_timeout {
            tracing::info!(?timeout, "request timeouts enabled");
            correlator = correlator.with_timeout(timeout);
        }
        let correlator = Arc::new(correlator);

        let mut dispatcher = ResponseDispatcher::new();
        dispatcher.register(correlator.clone());

        let state = Arc::new(ServerState {
            registry: Arc::clone(&registry),
            verifier: auth::verifier_from_config(&config.auth),
            dispatcher: Arc::new(dispatcher),
            write_timeout: config.server.write_timeout,
        });
        tracing::info!(mode = %config.auth.mode, "node authentication configured");

        let mut server = NodeServer::new(&config.server, state).spawn();

        let result = tokio::select! {
            res = broker.run(correlator) => match res {
                Ok(()) => Err(Error::BrokerUnavailable("request consumer stopped".to_string())),
                Err(e) => Err(e),
            },
            res = &mut server => match res {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(Error::Transport(format!("node endpoint task failed: {e}"))),
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                Ok(())
            }
        };

        server.abort();
        if let Err(e) = broker.close().await {
            tracing::debug!(error = %e, "broker close failed");
        }

        result
    }
}
