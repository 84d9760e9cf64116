//! Activity log synthesized from point-in-time focus probes.
//!
//! Desktop platforms only answer "what is focused right now", so the
//! sources probe on every query and record a `Resumed`/`Paused` pair each
//! time the answer changes.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use super::{ActivityEvent, ActivityKind, UsageStat};
use crate::session::ApplicationId;

#[derive(Default)]
struct ProbeLogInner {
    current: Option<ApplicationId>,
    events: VecDeque<ActivityEvent>,
    usage: HashMap<ApplicationId, DateTime<Utc>>,
}

pub struct ProbeLog {
    inner: Mutex<ProbeLogInner>,
    retention: chrono::Duration,
}

impl ProbeLog {
    /// Keep entries for twice `window`, enough for the fallback heuristic.
    #[must_use]
    pub fn new(window: std::time::Duration) -> Self {
        let window = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::seconds(10));
        Self {
            inner: Mutex::new(ProbeLogInner::default()),
            retention: window * 2,
        }
    }

    /// Record the result of one probe taken at `at`.
    pub fn record(&self, focused: Option<ApplicationId>, at: DateTime<Utc>) {
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };

        if inner.current != focused {
            if let Some(previous) = inner.current.take() {
                inner.events.push_back(ActivityEvent {
                    app_id: previous,
                    kind: ActivityKind::Paused,
                    timestamp: at,
                });
            }
            if let Some(app_id) = &focused {
                inner.events.push_back(ActivityEvent {
                    app_id: app_id.clone(),
                    kind: ActivityKind::Resumed,
                    timestamp: at,
                });
            }
            inner.current.clone_from(&focused);
        }
        if let Some(app_id) = focused {
            inner.usage.insert(app_id, at);
        }

        let horizon = at - self.retention;
        while inner.events.front().is_some_and(|e| e.timestamp < horizon) {
            inner.events.pop_front();
        }
        inner.usage.retain(|_, last_used| *last_used >= horizon);
    }

    #[must_use]
    pub fn events(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Vec<ActivityEvent> {
        let inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner
            .events
            .iter()
            .filter(|e| e.timestamp > since && e.timestamp <= until)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn usage(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Vec<UsageStat> {
        let inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner
            .usage
            .iter()
            .filter(|(_, last_used)| **last_used >= since && **last_used <= until)
            .map(|(app_id, last_used)| UsageStat {
                app_id: app_id.clone(),
                last_used: *last_used,
            })
            .collect()
    }
}
