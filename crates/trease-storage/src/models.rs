use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Durable mirror of a running focus session.
///
/// Written before the countdown starts and removed on any terminal
/// transition. On restart the daemon rebuilds the session from
/// `expires_at`, never from `duration_seconds`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: Uuid,
    pub subject_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: u64,
    pub expires_at: DateTime<Utc>,
    pub locked_set: BTreeSet<String>,
    pub exempt_until: BTreeMap<String, DateTime<Utc>>,
}

impl SessionRecord {
    /// Build a record for a session starting at `started_at`.
    #[must_use]
    pub fn new(
        subject_id: String,
        locked_set: BTreeSet<String>,
        duration_seconds: u64,
        started_at: DateTime<Utc>,
    ) -> Self {
        let seconds = i64::try_from(duration_seconds).unwrap_or(i64::MAX);
        let expires_at = started_at
            .checked_add_signed(Duration::seconds(seconds))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            session_id: Uuid::new_v4(),
            subject_id,
            started_at,
            duration_seconds,
            expires_at,
            locked_set,
            exempt_until: BTreeMap::new(),
        }
    }

    /// Whole seconds left before `expires_at`, zero once passed.
    #[must_use]
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from((self.expires_at - now).num_seconds()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// How a session left the `Running` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionOutcome {
    Expired,
    Cancelled,
}

impl SessionOutcome {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionOutcome {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "expired" => Ok(Self::Expired),
            "cancelled" => Ok(Self::Cancelled),
            other => anyhow::bail!("Unknown session outcome: {other}"),
        }
    }
}

/// One finished session, kept for stats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub session_id: Uuid,
    pub subject_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub planned_seconds: u64,
    pub outcome: SessionOutcome,
}

impl HistoryEntry {
    #[must_use]
    pub fn from_record(
        record: &SessionRecord,
        outcome: SessionOutcome,
        ended_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: record.session_id,
            subject_id: record.subject_id.clone(),
            started_at: record.started_at,
            ended_at,
            planned_seconds: record.duration_seconds,
            outcome,
        }
    }

    /// Seconds actually spent in the session.
    #[must_use]
    pub fn focused_seconds(&self) -> u64 {
        u64::try_from((self.ended_at - self.started_at).num_seconds())
            .unwrap_or(0)
            .min(self.planned_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_expiry_is_start_plus_duration() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let record = SessionRecord::new("oak".to_string(), BTreeSet::new(), 1500, start);
        assert_eq!(record.expires_at, start + Duration::seconds(1500));
        assert_eq!(record.remaining_seconds(start + Duration::seconds(1495)), 5);
        assert_eq!(record.remaining_seconds(start + Duration::seconds(2000)), 0);
        assert!(record.is_expired(start + Duration::seconds(1500)));
        assert!(!record.is_expired(start + Duration::seconds(1499)));
    }

    #[test]
    fn test_outcome_parse() {
        assert_eq!("expired".parse::<SessionOutcome>().unwrap(), SessionOutcome::Expired);
        assert_eq!(
            "cancelled".parse::<SessionOutcome>().unwrap(),
            SessionOutcome::Cancelled
        );
        assert!("won".parse::<SessionOutcome>().is_err());
    }

    #[test]
    fn test_focused_seconds_capped_by_plan() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let record = SessionRecord::new("oak".to_string(), BTreeSet::new(), 60, start);
        let late = HistoryEntry::from_record(
            &record,
            SessionOutcome::Expired,
            start + Duration::seconds(600),
        );
        assert_eq!(late.focused_seconds(), 60);

        let early = HistoryEntry::from_record(
            &record,
            SessionOutcome::Cancelled,
            start + Duration::seconds(20),
        );
        assert_eq!(early.focused_seconds(), 20);
    }
}
