use anyhow::Result;
use tabled::{Table, Tabled};
use trease_storage::{Database, HistoryEntry};

use super::helpers::{format_duration, format_local, truncate_str};

#[derive(Tabled)]
struct HistoryRow {
    #[tabled(rename = "Started")]
    started: String,
    #[tabled(rename = "Subject")]
    subject: String,
    #[tabled(rename = "Planned")]
    planned: String,
    #[tabled(rename = "Focused")]
    focused: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
}

impl From<&HistoryEntry> for HistoryRow {
    fn from(entry: &HistoryEntry) -> Self {
        Self {
            started: format_local(entry.started_at),
            subject: truncate_str(&entry.subject_id, 24),
            planned: format_duration(entry.planned_seconds),
            focused: format_duration(entry.focused_seconds()),
            outcome: entry.outcome.to_string(),
        }
    }
}

pub fn show_history(limit: usize) -> Result<()> {
    let db = Database::new(None)?;
    let entries = db.recent_history(limit)?;

    if entries.is_empty() {
        println!("No finished sessions yet");
        return Ok(());
    }

    let completed = entries
        .iter()
        .filter(|e| e.outcome == trease_storage::SessionOutcome::Expired)
        .count();
    let rows: Vec<HistoryRow> = entries.iter().map(HistoryRow::from).collect();
    println!("{}", Table::new(rows));
    println!("\n{completed} of {} sessions completed", entries.len());
    Ok(())
}
