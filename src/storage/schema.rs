//! SQLite schema for ticket, HITL, and metric records.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
pub fn initialize_schema(conn: &Connection) -> SqliteResult<()> {
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

fn apply_v1_schema(conn: &Connection) -> SqliteResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS tickets (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            priority TEXT NOT NULL DEFAULT 'medium',
            status TEXT NOT NULL DEFAULT 'new',
            source TEXT,
            customer_id TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            level1 TEXT,
            level2 TEXT,
            level3 TEXT,
            classification_confidence REAL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            classified_at TEXT,
            resolved_at TEXT,
            processing_time_ms INTEGER
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS reviewers (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            reviews_completed INTEGER NOT NULL DEFAULT 0,
            corrections_made INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS hitl_tasks (
            id TEXT PRIMARY KEY,
            ticket_id TEXT NOT NULL,
            ticket_title TEXT NOT NULL,
            ticket_description TEXT NOT NULL,
            ticket_source TEXT,
            ai_level1 TEXT NOT NULL,
            ai_level2 TEXT NOT NULL,
            ai_level3 TEXT NOT NULL,
            ai_confidence REAL NOT NULL,
            routing_reason TEXT NOT NULL,
            confidence_details TEXT NOT NULL DEFAULT '{}',
            status TEXT NOT NULL DEFAULT 'pending',
            priority TEXT NOT NULL DEFAULT 'normal',
            created_at TEXT NOT NULL,
            assigned_to TEXT,
            assigned_at TEXT,
            completed_by TEXT,
            completed_at TEXT,
            review_time_seconds INTEGER,
            similar_tickets TEXT NOT NULL DEFAULT '[]'
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS hitl_corrections (
            id TEXT PRIMARY KEY,
            task_id TEXT NOT NULL,
            ticket_id TEXT NOT NULL,
            reviewer_id TEXT NOT NULL,
            original_level1 TEXT NOT NULL,
            original_level2 TEXT NOT NULL,
            original_level3 TEXT NOT NULL,
            original_confidence REAL NOT NULL,
            corrected_level1 TEXT NOT NULL,
            corrected_level2 TEXT NOT NULL,
            corrected_level3 TEXT NOT NULL,
            is_correct INTEGER NOT NULL,
            notes TEXT,
            submitted_at TEXT NOT NULL,
            review_time_seconds INTEGER NOT NULL,
            should_update_graph INTEGER NOT NULL DEFAULT 1,
            should_retrain_model INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classification_metrics (
            id TEXT PRIMARY KEY,
            ticket_id TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            level1 TEXT NOT NULL,
            level2 TEXT NOT NULL,
            level3 TEXT NOT NULL,
            graph_confidence REAL NOT NULL,
            vector_confidence REAL NOT NULL,
            llm_confidence REAL NOT NULL,
            final_confidence REAL NOT NULL,
            component_agreement REAL NOT NULL,
            auto_resolved INTEGER NOT NULL,
            requires_hitl INTEGER NOT NULL,
            processing_time_ms INTEGER NOT NULL,
            was_correct INTEGER
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tasks_status ON hitl_tasks(status)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_corrections_task ON hitl_corrections(task_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_metrics_ticket ON classification_metrics(ticket_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_metrics_time ON classification_metrics(timestamp)",
        [],
    )?;

    conn.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;

    Ok(())
}

/// Check if the schema is initialized.
pub fn is_initialized(conn: &Connection) -> bool {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='tickets'",
        [],
        |row| row.get::<_, i32>(0),
    )
    .map(|count| count > 0)
    .unwrap_or(false)
}
