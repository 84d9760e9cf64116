use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::MonitorConfig;
use crate::session::ApplicationId;

#[cfg(target_os = "macos")]
pub mod macos;

#[cfg(target_os = "linux")]
pub mod linux;

pub mod probe;
#[cfg(any(test, feature = "test-util"))]
pub mod scripted;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    Resumed,
    Paused,
}

/// One entry of the OS activity log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityEvent {
    pub app_id: ApplicationId,
    pub kind: ActivityKind,
    pub timestamp: DateTime<Utc>,
}

/// Last time an application was in use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageStat {
    pub app_id: ApplicationId,
    pub last_used: DateTime<Utc>,
}

/// Read-only view of the OS foreground activity, for platform-specific implementations
#[async_trait]
pub trait ActivitySource: Send + Sync {
    /// Activity events with `since < timestamp <= until`.
    async fn query_events(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<ActivityEvent>>;

    /// Applications used within `[since, until]`.
    async fn query_usage(&self, since: DateTime<Utc>, until: DateTime<Utc>)
        -> Result<Vec<UsageStat>>;

    /// The platform's home screen / launcher, when it can tell.
    async fn home_screen_id(&self) -> Result<Option<ApplicationId>> {
        Ok(None)
    }
}

/// Turns the activity log into one foreground id per tick.
///
/// Prefers the latest `Resumed` event since the previous sample and falls
/// back to the most recently used app over a trailing window. Errors from
/// the source count as "no signal" and never reach the caller.
pub struct ForegroundDetector {
    source: Box<dyn ActivitySource>,
    fallback_window: chrono::Duration,
    last_sample: Option<DateTime<Utc>>,
}

impl ForegroundDetector {
    #[must_use]
    pub fn new(source: Box<dyn ActivitySource>, fallback_window: std::time::Duration) -> Self {
        Self {
            source,
            fallback_window: chrono::Duration::from_std(fallback_window)
                .unwrap_or_else(|_| chrono::Duration::seconds(10)),
            last_sample: None,
        }
    }

    pub async fn sample(&mut self, now: DateTime<Utc>) -> Option<ApplicationId> {
        let trailing = now - self.fallback_window;
        let since = self.last_sample.unwrap_or(trailing);
        self.last_sample = Some(now);

        match self.source.query_events(since, now).await {
            Ok(events) => {
                if let Some(app_id) = latest_resumed(events) {
                    return Some(app_id);
                }
            }
            Err(e) => log::warn!("Foreground event query failed: {e}"),
        }

        match self.source.query_usage(trailing, now).await {
            Ok(stats) => stats
                .into_iter()
                .max_by_key(|s| s.last_used)
                .map(|s| s.app_id),
            Err(e) => {
                log::warn!("Foreground usage query failed: {e}");
                None
            }
        }
    }

    /// Launcher id as reported by the source; `None` on error.
    pub async fn home_screen_id(&self) -> Option<ApplicationId> {
        match self.source.home_screen_id().await {
            Ok(id) => id,
            Err(e) => {
                log::warn!("Home screen query failed: {e}");
                None
            }
        }
    }
}

fn latest_resumed(events: Vec<ActivityEvent>) -> Option<ApplicationId> {
    events
        .into_iter()
        .filter(|e| e.kind == ActivityKind::Resumed)
        .max_by_key(|e| e.timestamp)
        .map(|e| e.app_id)
}

/// Create platform-specific activity source
///
/// # Errors
///
/// Returns an error if the current platform is not supported or if source initialization fails
pub fn create_activity_source(config: &MonitorConfig) -> Result<Box<dyn ActivitySource>> {
    let retention = config.fallback_window();

    #[cfg(target_os = "macos")]
    {
        Ok(Box::new(macos::MacOSActivitySource::new(retention)))
    }

    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(linux::LinuxActivitySource::new(retention)))
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        let _ = retention;
        anyhow::bail!("Unsupported platform")
    }
}

#[cfg(test)]
mod tests {
    use super::scripted::ScriptedSource;
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_latest_resumed_event_wins() {
        let source = ScriptedSource::new();
        source.push_event("com.example.mail", ActivityKind::Resumed, t0() - Duration::milliseconds(90));
        source.push_event("com.example.games", ActivityKind::Resumed, t0() - Duration::milliseconds(20));
        source.push_event("com.example.video", ActivityKind::Paused, t0() - Duration::milliseconds(5));

        let mut detector = ForegroundDetector::new(Box::new(source), std::time::Duration::from_secs(10));
        assert_eq!(detector.sample(t0()).await.as_deref(), Some("com.example.games"));
    }

    #[tokio::test]
    async fn test_falls_back_to_most_recent_usage() {
        let source = ScriptedSource::new();
        source.push_usage("com.example.mail", t0() - Duration::seconds(8));
        source.push_usage("com.example.games", t0() - Duration::seconds(2));
        source.push_usage("com.example.old", t0() - Duration::seconds(60));

        let mut detector = ForegroundDetector::new(Box::new(source), std::time::Duration::from_secs(10));
        assert_eq!(detector.sample(t0()).await.as_deref(), Some("com.example.games"));
    }

    #[tokio::test]
    async fn test_second_sample_only_sees_new_events() {
        let source = ScriptedSource::new();
        source.push_event("com.example.games", ActivityKind::Resumed, t0() - Duration::milliseconds(50));
        let handle = source.clone();

        let mut detector = ForegroundDetector::new(Box::new(source), std::time::Duration::from_secs(10));
        assert_eq!(detector.sample(t0()).await.as_deref(), Some("com.example.games"));

        handle.push_event("launcher", ActivityKind::Resumed, t0() + Duration::milliseconds(100));
        assert_eq!(
            detector.sample(t0() + Duration::milliseconds(150)).await.as_deref(),
            Some("launcher")
        );
    }

    #[tokio::test]
    async fn test_source_failure_is_no_signal() {
        let source = ScriptedSource::new();
        source.fail_queries(true);
        let mut detector = ForegroundDetector::new(Box::new(source), std::time::Duration::from_secs(10));
        assert!(detector.sample(t0()).await.is_none());
    }

    #[tokio::test]
    async fn test_empty_source_is_no_signal() {
        let mut detector =
            ForegroundDetector::new(Box::new(ScriptedSource::new()), std::time::Duration::from_secs(10));
        assert!(detector.sample(t0()).await.is_none());
    }
}
