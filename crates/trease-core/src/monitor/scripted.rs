use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};

use super::{ActivityEvent, ActivityKind, ActivitySource, UsageStat};
use crate::session::ApplicationId;

#[derive(Default)]
struct Script {
    events: Vec<ActivityEvent>,
    usage: Vec<UsageStat>,
    home: Option<ApplicationId>,
    failing: bool,
}

/// In-memory activity source fed by hand.
///
/// Clones share the same script, so a test can keep a handle after moving
/// the source into a detector.
#[derive(Clone, Default)]
pub struct ScriptedSource {
    script: Arc<Mutex<Script>>,
}

impl ScriptedSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_script<T>(&self, f: impl FnOnce(&mut Script) -> T) -> T {
        let mut script = match self.script.lock() {
            Ok(script) => script,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut script)
    }

    pub fn push_event(&self, app_id: &str, kind: ActivityKind, timestamp: DateTime<Utc>) {
        self.with_script(|s| {
            s.events.push(ActivityEvent {
                app_id: app_id.to_string(),
                kind,
                timestamp,
            });
        });
    }

    pub fn push_usage(&self, app_id: &str, last_used: DateTime<Utc>) {
        self.with_script(|s| {
            s.usage.push(UsageStat {
                app_id: app_id.to_string(),
                last_used,
            });
        });
    }

    /// Shorthand for "`app_id` came to the front at `at`".
    pub fn bring_to_front(&self, app_id: &str, at: DateTime<Utc>) {
        self.push_event(app_id, ActivityKind::Resumed, at);
    }

    pub fn set_home(&self, app_id: &str) {
        self.with_script(|s| s.home = Some(app_id.to_string()));
    }

    pub fn fail_queries(&self, failing: bool) {
        self.with_script(|s| s.failing = failing);
    }
}

#[async_trait]
impl ActivitySource for ScriptedSource {
    async fn query_events(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<ActivityEvent>> {
        self.with_script(|s| {
            if s.failing {
                anyhow::bail!("usage access revoked");
            }
            Ok(s.events
                .iter()
                .filter(|e| e.timestamp > since && e.timestamp <= until)
                .cloned()
                .collect())
        })
    }

    async fn query_usage(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<UsageStat>> {
        self.with_script(|s| {
            if s.failing {
                anyhow::bail!("usage access revoked");
            }
            Ok(s.usage
                .iter()
                .filter(|u| u.last_used >= since && u.last_used <= until)
                .cloned()
                .collect())
        })
    }

    async fn home_screen_id(&self) -> Result<Option<ApplicationId>> {
        Ok(self.with_script(|s| s.home.clone()))
    }
}
