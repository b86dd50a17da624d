//! Database schema and migrations

use rusqlite::Connection;

use crate::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
///
/// # Errors
///
/// Returns error if migration fails
pub fn init(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Nodes known to the directory
        CREATE TABLE IF NOT EXISTS nodes (
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL,
            display_name TEXT NOT NULL,
            first_connection TEXT NOT NULL,
            last_connection TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_nodes_organization ON nodes(organization_id);

        PRAGMA user_version = 1;
        ",
    )?;

    Ok(())
}
