use anyhow::Result;
use rusqlite::Connection;

/// Initialize database schema
///
/// # Errors
///
/// Returns an error if database table creation or index creation fails
pub fn init_schema(conn: &Connection) -> Result<()> {
    // Active session - at most one row, replaced as a whole
    conn.execute(
        "CREATE TABLE IF NOT EXISTS active_session (
            slot INTEGER PRIMARY KEY CHECK (slot = 1),
            session_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            started_at TEXT NOT NULL,
            duration_seconds INTEGER NOT NULL,
            expires_at TEXT NOT NULL,
            locked_set TEXT NOT NULL,
            exempt_until TEXT NOT NULL DEFAULT '{}'
        )",
        [],
    )?;

    // Session history - one row per finished session
    conn.execute(
        "CREATE TABLE IF NOT EXISTS session_history (
            session_id TEXT PRIMARY KEY,
            subject_id TEXT NOT NULL,
            started_at TEXT NOT NULL,
            ended_at TEXT NOT NULL,
            planned_seconds INTEGER NOT NULL,
            outcome TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_session_history_ended_at ON session_history(ended_at)",
        [],
    )?;

    // Older databases predate exemptions
    let has_exempt_column: i32 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info('active_session') WHERE name='exempt_until'",
        [],
        |row| row.get(0),
    )?;
    if has_exempt_column == 0 {
        conn.execute(
            "ALTER TABLE active_session ADD COLUMN exempt_until TEXT NOT NULL DEFAULT '{}'",
            [],
        )?;
        log::info!("Added exempt_until column to active_session");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        let tables: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('active_session', 'session_history')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
    }
}
