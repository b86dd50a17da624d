//! Node repository backing the directory store

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use uuid::Uuid;

use super::DbPool;
use crate::directory::{DirectoryStore, NodeRecord};
use crate::{Error, Result};

const SELECT_NODE: &str = "SELECT id, organization_id, display_name, first_connection, last_connection
     FROM nodes";

/// Node repository
#[derive(Clone)]
pub struct NodeRepo {
    pool: DbPool,
}

impl NodeRepo {
    /// Create a new node repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// List every known node, most recently created first
    #[cfg(test)]
    fn list_all(&self) -> Result<Vec<NodeRecord>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn.prepare(&format!("{SELECT_NODE} ORDER BY first_connection DESC"))?;
        let rows = stmt.query_map([], |row| Ok(row_to_record(row)))?;

        rows.map(|row| row?).collect::<Result<Vec<_>>>()
    }

    fn find(&self, id: Uuid) -> Result<Option<NodeRecord>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        conn.query_row(
            &format!("{SELECT_NODE} WHERE id = ?1"),
            [id.to_string()],
            |row| Ok(row_to_record(row)),
        )
        .optional()?
        .transpose()
    }
}

impl DirectoryStore for NodeRepo {
    fn get_node(&self, id: Uuid) -> Result<Option<NodeRecord>> {
        self.find(id)
    }

    fn create_node(&self, id: Uuid, organization_id: Uuid, display_name: &str) -> Result<NodeRecord> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        // A concurrent handshake may have created the row first
        conn.execute(
            "INSERT INTO nodes (id, organization_id, display_name, first_connection, last_connection)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(id) DO UPDATE SET organization_id = ?2, last_connection = ?4",
            params![id.to_string(), organization_id.to_string(), display_name, now],
        )?;
        drop(conn);

        self.find(id)?
            .ok_or_else(|| Error::Database(format!("node {id} missing after insert")))
    }

    fn reconnect_node(&self, id: Uuid, organization_id: Uuid) -> Result<NodeRecord> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        let updated = conn.execute(
            "UPDATE nodes SET organization_id = ?1, last_connection = ?2 WHERE id = ?3",
            params![organization_id.to_string(), now, id.to_string()],
        )?;
        drop(conn);

        if updated == 0 {
            return Err(Error::Database(format!("node {id} not found")));
        }

        self.find(id)?
            .ok_or_else(|| Error::Database(format!("node {id} not found")))
    }

    fn update_last_seen(&self, id: Uuid) -> Result<()> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "UPDATE nodes SET last_connection = ?1 WHERE id = ?2",
            params![now, id.to_string()],
        )?;

        Ok(())
    }
}

fn row_to_record(row: &Row<'_>) -> Result<NodeRecord> {
    let id: String = row.get(0)?;
    let organization_id: String = row.get(1)?;
    let last_connection: Option<String> = row.get(4)?;

    Ok(NodeRecord {
        id: parse_uuid(&id)?,
        organization_id: parse_uuid(&organization_id)?,
        display_name: row.get(2)?,
        first_connection: parse_datetime(&row.get::<_, String>(3)?)?,
        last_connection: last_connection.as_deref().map(parse_datetime).transpose()?,
    })
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::Database(format!("bad uuid {s:?} in nodes table: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Database(format!("bad timestamp {s:?} in nodes table: {e}")))
}
