use anyhow::Result;
use rusqlite::{params, Row};

use super::helpers::{parse_datetime, parse_seconds, parse_uuid};
use super::Database;
use crate::models::{HistoryEntry, SessionOutcome};

impl Database {
    /// Most recently finished sessions, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub fn recent_history(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT session_id, subject_id, started_at, ended_at, planned_seconds, outcome
             FROM session_history
             ORDER BY ended_at DESC
             LIMIT ?1",
        )?;

        let entries = stmt
            .query_map(
                params![i64::try_from(limit).unwrap_or(i64::MAX)],
                row_to_history_entry,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(entries)
    }
}

fn row_to_history_entry(row: &Row<'_>) -> rusqlite::Result<HistoryEntry> {
    let outcome: String = row.get(5)?;
    let outcome = outcome.parse::<SessionOutcome>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Text,
            Box::<dyn std::error::Error + Send + Sync>::from(e),
        )
    })?;

    Ok(HistoryEntry {
        session_id: parse_uuid(&row.get::<_, String>(0)?)?,
        subject_id: row.get(1)?,
        started_at: parse_datetime(&row.get::<_, String>(2)?)?,
        ended_at: parse_datetime(&row.get::<_, String>(3)?)?,
        planned_seconds: parse_seconds(row.get(4)?)?,
        outcome,
    })
}

#[cfg(test)]
mod tests {
    use crate::models::{HistoryEntry, SessionOutcome, SessionRecord};
    use crate::Database;
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::BTreeSet;

    #[test]
    fn test_recent_history_newest_first_and_limited() {
        let db = Database::open_in_memory().unwrap();
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();

        for i in 0..3 {
            let start = base + Duration::hours(i);
            let rec = SessionRecord::new(format!("tree-{i}"), BTreeSet::new(), 600, start);
            let outcome = if i == 1 {
                SessionOutcome::Cancelled
            } else {
                SessionOutcome::Expired
            };
            db.finish_session(&HistoryEntry::from_record(&rec, outcome, rec.expires_at))
                .unwrap();
        }

        let history = db.recent_history(2).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].subject_id, "tree-2");
        assert_eq!(history[1].subject_id, "tree-1");
        assert_eq!(history[1].outcome, SessionOutcome::Cancelled);
    }
}
