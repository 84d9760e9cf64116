use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use trease_storage::SessionOutcome;
use uuid::Uuid;

use crate::session::ApplicationId;
use crate::timer::Progress;

const DEFAULT_CAPACITY: usize = 256;

/// Something the UI should react to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UiEvent {
    SessionStarted {
        session_id: Uuid,
        subject_id: String,
    },
    /// Bring the UI to the front and show the lock screen for `target`.
    LockScreen { target: ApplicationId },
    /// The lock screen is already up; raise it again without a new instance.
    LockScreenRefresh { target: ApplicationId },
    LockScreenDismissed,
    Progress(Progress),
    ExemptionProgress {
        app_id: ApplicationId,
        progress: Progress,
    },
    SessionEnded {
        session_id: Uuid,
        outcome: SessionOutcome,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencedEvent {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub event: UiEvent,
}

struct EventLogInner {
    next_seq: u64,
    events: VecDeque<SequencedEvent>,
}

/// Bounded, sequence-numbered feed of `UiEvent`s.
///
/// The UI polls it with the last sequence number it has seen. Old events
/// fall off the front once the log is full.
pub struct EventLog {
    inner: Mutex<EventLogInner>,
    capacity: usize,
}

impl EventLog {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(EventLogInner {
                next_seq: 1,
                events: VecDeque::with_capacity(capacity),
            }),
            capacity: capacity.max(1),
        }
    }

    /// Append an event, returning its sequence number.
    pub fn push(&self, event: UiEvent) -> u64 {
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        let seq = inner.next_seq;
        inner.next_seq += 1;
        if inner.events.len() == self.capacity {
            inner.events.pop_front();
        }
        inner.events.push_back(SequencedEvent {
            seq,
            at: Utc::now(),
            event,
        });
        seq
    }

    /// Events with a sequence number greater than `after`.
    #[must_use]
    pub fn since(&self, after: u64) -> Vec<SequencedEvent> {
        let inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner
            .events
            .iter()
            .filter(|e| e.seq > after)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn latest_seq(&self) -> u64 {
        let inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.next_seq - 1
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}
