use anyhow::Result;
use rusqlite::{params, OptionalExtension, Row};

use super::helpers::{parse_datetime, parse_json, parse_seconds, parse_uuid, seconds_to_sql};
use super::Database;
use crate::models::{HistoryEntry, SessionRecord};

impl Database {
    /// Replace the active session record.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON encoding or the database write fails
    pub fn save_session_record(&self, record: &SessionRecord) -> Result<()> {
        let locked_set = serde_json::to_string(&record.locked_set)?;
        let exempt_until = serde_json::to_string(&record.exempt_until)?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO active_session
             (slot, session_id, subject_id, started_at, duration_seconds, expires_at, locked_set, exempt_until)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.session_id.to_string(),
                record.subject_id,
                record.started_at.to_rfc3339(),
                seconds_to_sql(record.duration_seconds),
                record.expires_at.to_rfc3339(),
                locked_set,
                exempt_until,
            ],
        )?;
        tx.commit()?;

        log::debug!("Saved session record {}", record.session_id);
        Ok(())
    }

    /// Read the active session record, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the row is corrupted
    pub fn load_session_record(&self) -> Result<Option<SessionRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                "SELECT session_id, subject_id, started_at, duration_seconds, expires_at, locked_set, exempt_until
                 FROM active_session WHERE slot = 1",
                [],
                row_to_session_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Clear the active record and append its history row in one transaction.
    ///
    /// A record that was already replaced by a newer session is left alone;
    /// the history row is still written.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails
    pub fn finish_session(&self, entry: &HistoryEntry) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM active_session WHERE slot = 1 AND session_id = ?1",
            params![entry.session_id.to_string()],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO session_history
             (session_id, subject_id, started_at, ended_at, planned_seconds, outcome)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.session_id.to_string(),
                entry.subject_id,
                entry.started_at.to_rfc3339(),
                entry.ended_at.to_rfc3339(),
                seconds_to_sql(entry.planned_seconds),
                entry.outcome.as_str(),
            ],
        )?;
        tx.commit()?;

        log::info!(
            "Session {} finished ({})",
            entry.session_id,
            entry.outcome
        );
        Ok(())
    }
}

fn row_to_session_record(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        session_id: parse_uuid(&row.get::<_, String>(0)?)?,
        subject_id: row.get(1)?,
        started_at: parse_datetime(&row.get::<_, String>(2)?)?,
        duration_seconds: parse_seconds(row.get(3)?)?,
        expires_at: parse_datetime(&row.get::<_, String>(4)?)?,
        locked_set: parse_json(&row.get::<_, String>(5)?)?,
        exempt_until: parse_json(&row.get::<_, String>(6)?)?,
    })
}
