use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use trease_storage::{SessionOutcome, SessionRecord};
use uuid::Uuid;

/// OS-level identifier of an application (package name, bundle id or
/// executable name, depending on the platform).
pub type ApplicationId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Idle,
    Running,
    Expired,
    CancelledByUser,
}

impl SessionStatus {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Expired | Self::CancelledByUser)
    }

    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Running => "Running",
            Self::Expired => "Completed",
            Self::CancelledByUser => "Cancelled",
        }
    }
}

impl From<SessionOutcome> for SessionStatus {
    fn from(outcome: SessionOutcome) -> Self {
        match outcome {
            SessionOutcome::Expired => Self::Expired,
            SessionOutcome::Cancelled => Self::CancelledByUser,
        }
    }
}

/// One timed blocking period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub subject_id: String,
    pub locked_set: BTreeSet<ApplicationId>,
    pub exempt_until: BTreeMap<ApplicationId, DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: u64,
    pub expires_at: DateTime<Utc>,
    pub status: SessionStatus,
}

impl Session {
    #[must_use]
    pub fn from_record(record: SessionRecord, status: SessionStatus) -> Self {
        Self {
            id: record.session_id,
            subject_id: record.subject_id,
            locked_set: record.locked_set,
            exempt_until: record.exempt_until,
            started_at: record.started_at,
            duration_seconds: record.duration_seconds,
            expires_at: record.expires_at,
            status,
        }
    }

    #[must_use]
    pub fn to_record(&self) -> SessionRecord {
        SessionRecord {
            session_id: self.id,
            subject_id: self.subject_id.clone(),
            started_at: self.started_at,
            duration_seconds: self.duration_seconds,
            expires_at: self.expires_at,
            locked_set: self.locked_set.clone(),
            exempt_until: self.exempt_until.clone(),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }

    #[must_use]
    pub fn is_locked(&self, app_id: &str) -> bool {
        self.locked_set.contains(app_id)
    }

    /// Whether `app_id` holds an exemption that has not yet run out.
    #[must_use]
    pub fn is_exempt(&self, app_id: &str, now: DateTime<Utc>) -> bool {
        self.exempt_until
            .get(app_id)
            .is_some_and(|until| *until > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_record_round_trip_keeps_exemptions() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let mut record = SessionRecord::new(
            "oak".to_string(),
            BTreeSet::from(["a".to_string(), "b".to_string()]),
            600,
            start,
        );
        record
            .exempt_until
            .insert("a".to_string(), start + Duration::seconds(30));

        let session = Session::from_record(record.clone(), SessionStatus::Running);
        assert!(session.is_locked("a"));
        assert!(!session.is_locked("c"));
        assert!(session.is_exempt("a", start));
        assert!(!session.is_exempt("a", start + Duration::seconds(30)));
        assert!(!session.is_exempt("b", start));
        assert_eq!(session.to_record(), record);
    }

    #[test]
    fn test_status_from_outcome() {
        assert_eq!(
            SessionStatus::from(SessionOutcome::Expired),
            SessionStatus::Expired
        );
        assert_eq!(
            SessionStatus::from(SessionOutcome::Cancelled),
            SessionStatus::CancelledByUser
        );
        assert!(SessionStatus::CancelledByUser.is_terminal());
        assert!(!SessionStatus::Running.is_terminal());
    }
}
