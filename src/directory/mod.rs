//! Directory store contract
//!
//! The directory persists node identity, organization membership and
//! connection history. The bridge only tells it what happened (a new node, a
//! reconnect, a disconnect) and leaves timestamps and concurrency control to
//! the store.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::Result;

/// A known node as recorded by the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeRecord {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub display_name: String,
    pub first_connection: DateTime<Utc>,
    pub last_connection: Option<DateTime<Utc>>,
}

/// Operations the bridge needs from the directory
pub trait DirectoryStore: Send + Sync {
    /// Look up a node, `None` if it has never connected
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be queried
    fn get_node(&self, id: Uuid) -> Result<Option<NodeRecord>>;

    /// Record a node seen for the first time
    ///
    /// # Errors
    ///
    /// Returns error if the record cannot be written
    fn create_node(&self, id: Uuid, organization_id: Uuid, display_name: &str) -> Result<NodeRecord>;

    /// Record a known node connecting again, possibly under a new organization
    ///
    /// # Errors
    ///
    /// Returns error if the node is unknown or the record cannot be written
    fn reconnect_node(&self, id: Uuid, organization_id: Uuid) -> Result<NodeRecord>;

    /// Record that a node was last seen now
    ///
    /// # Errors
    ///
    /// Returns error if the record cannot be written
    fn update_last_seen(&self, id: Uuid) -> Result<()>;
}
