//! SQLite schema and migrations for the taxonomy graph.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
pub fn initialize_schema(conn: &Connection) -> SqliteResult<()> {
    // Enable WAL mode for better concurrent access
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        apply_v1_schema(conn)?;
    }

    Ok(())
}

/// Apply version 1 schema.
fn apply_v1_schema(conn: &Connection) -> SqliteResult<()> {
    // Category nodes at all three levels. Uniqueness is per (level, name).
    conn.execute(
        "CREATE TABLE IF NOT EXISTS categories (
            level INTEGER NOT NULL,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            keywords TEXT NOT NULL DEFAULT '[]',
            ticket_count INTEGER NOT NULL DEFAULT 0,
            accuracy REAL NOT NULL DEFAULT 1.0,
            ai_generated INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            last_updated TEXT,
            PRIMARY KEY (level, name)
        )",
        [],
    )?;

    // Containment edges between consecutive levels. An L3 may have multiple
    // L2 parents, so the key includes the parent.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS contains_edges (
            parent_level INTEGER NOT NULL,
            parent_name TEXT NOT NULL,
            child_name TEXT NOT NULL,
            weight REAL NOT NULL DEFAULT 1.0,
            traversal_count INTEGER NOT NULL DEFAULT 0,
            last_updated TEXT,
            PRIMARY KEY (parent_level, parent_name, child_name)
        )",
        [],
    )?;

    // ClassifiedAs edges: one per ticket, pointing at an L3 node.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS ticket_links (
            ticket_id TEXT PRIMARY KEY,
            level3_name TEXT NOT NULL,
            confidence REAL NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_categories_count ON categories(ticket_count)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_edges_parent ON contains_edges(parent_level, parent_name)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_links_category ON ticket_links(level3_name)",
        [],
    )?;

    conn.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;

    Ok(())
}

/// Get the current schema version.
pub fn get_schema_version(conn: &Connection) -> SqliteResult<i32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
}

/// Check if the schema is initialized.
pub fn is_initialized(conn: &Connection) -> bool {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='categories'",
        [],
        |row| row.get::<_, i32>(0),
    )
    .map(|count| count > 0)
    .unwrap_or(false)
}
