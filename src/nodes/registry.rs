//! Connection registry for tracking live node sessions
//!
//! At most one session per node id. Registering a node that already has a
//! session closes the old one as part of the same write, so there is never a
//! window where lookups see both or neither.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use super::names::generate_display_name;
use super::session::SessionHandle;
use super::types::NodeIdentity;
use crate::directory::DirectoryStore;

/// Registry of connected nodes
pub struct ConnectionRegistry {
    sessions: RwLock<HashMap<Uuid, SessionHandle>>,
    directory: Arc<dyn DirectoryStore>,
}

impl ConnectionRegistry {
    /// Create an empty registry backed by a directory store
    #[must_use]
    pub fn new(directory: Arc<dyn DirectoryStore>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            directory,
        }
    }

    /// Register a session, superseding any existing session for the node
    ///
    /// Returns the superseded handle, already signalled to close. Directory
    /// failures are logged and do not fail the registration.
    pub async fn register(&self, handle: SessionHandle) -> Option<SessionHandle> {
        let identity = handle.identity();

        let superseded = {
            let mut sessions = self.sessions.write().await;
            let old = sessions.insert(identity.node_id, handle);
            if let Some(old) = &old {
                old.supersede();
            }
            old
        };

        if let Some(old) = &superseded {
            tracing::warn!(
                node_id = %identity.node_id,
                old_session = %old.id(),
                "connection with that node already exists, replacing it"
            );
        }

        self.record_connect(identity);
        tracing::info!(
            node_id = %identity.node_id,
            organization_id = %identity.organization_id,
            "node connected"
        );

        superseded
    }

    /// Current session for a node, if connected
    pub async fn lookup(&self, node_id: &Uuid) -> Option<SessionHandle> {
        self.sessions
            .read()
            .await
            .get(node_id)
            .filter(|handle| !handle.is_closed())
            .cloned()
    }

    /// Remove a session if it is still the current one for the node
    ///
    /// The directory's last-seen time is updated either way. Returns whether
    /// the registry entry was removed.
    pub async fn remove(&self, node_id: Uuid, handle: &SessionHandle) -> bool {
        handle.close();

        let removed = {
            let mut sessions = self.sessions.write().await;
            if sessions.get(&node_id).is_some_and(|current| current == handle) {
                sessions.remove(&node_id);
                true
            } else {
                false
            }
        };

        if let Err(e) = self.directory.update_last_seen(node_id) {
            tracing::error!(node_id = %node_id, error = %e, "failed to update last seen");
        }

        if removed {
            tracing::info!(node_id = %node_id, "node disconnected");
        } else {
            tracing::debug!(
                node_id = %node_id,
                session_id = %handle.id(),
                "stale session ended, newer session kept"
            );
        }

        removed
    }

    /// Whether a node has a live session
    pub async fn is_connected(&self, node_id: &Uuid) -> bool {
        self.lookup(node_id).await.is_some()
    }

    /// Identities of all connected nodes
    pub async fn connected_nodes(&self) -> Vec<NodeIdentity> {
        self.sessions
            .read()
            .await
            .values()
            .map(SessionHandle::identity)
            .collect()
    }

    /// Number of connected nodes
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether the registry is empty
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    fn record_connect(&self, identity: NodeIdentity) {
        let NodeIdentity {
            node_id,
            organization_id,
        } = identity;

        let result = match self.directory.get_node(node_id) {
            Ok(Some(_)) => self.directory.reconnect_node(node_id, organization_id),
            Ok(None) => {
                let name = generate_display_name();
                tracing::info!(node_id = %node_id, name = %name, "first connection from node");
                self.directory.create_node(node_id, organization_id, &name)
            }
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            tracing::error!(node_id = %node_id, error = %e, "failed to record connection");
        }
    }
}
