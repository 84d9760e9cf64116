use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{EnforcementStrategy, MonitorConfig};
use crate::events::{EventLog, UiEvent};
use crate::session::ApplicationId;
use crate::timer::Progress;

#[cfg(any(test, feature = "test-util"))]
pub mod recording;
pub mod redirect;
pub mod terminate;

#[cfg(any(test, feature = "test-util"))]
pub use recording::{EnforcerCall, RecordingEnforcer};
pub use redirect::RedirectEnforcer;
pub use terminate::TerminateEnforcer;

/// Side-effecting half of a `Block` decision.
///
/// Implementations must be idempotent per target: enforcing the same id
/// twice in a row never stacks lock screens.
#[async_trait]
pub trait Enforcer: Send + Sync {
    /// Push the user away from `target`.
    async fn enforce(&self, target: &str) -> Result<()>;

    /// `target` came back to the front while already blocked.
    async fn refresh(&self, target: &str) -> Result<()>;

    /// The user left the blocked app; drop any lock screen.
    async fn release(&self) -> Result<()>;

    /// Feed the UI's progress events.
    fn events(&self) -> &EventLog;

    /// Low-priority "time remaining" indicator for the session.
    async fn notify_progress(&self, progress: Progress) -> Result<()> {
        log::debug!(
            "Focus time remaining: {} ({:.0}% elapsed)",
            format_remaining(progress.remaining_seconds),
            progress.fraction_elapsed * 100.0
        );
        self.events().push(UiEvent::Progress(progress));
        Ok(())
    }

    /// Countdown for a single exempted app.
    async fn notify_exemption_progress(&self, app_id: &str, progress: Progress) -> Result<()> {
        self.events().push(UiEvent::ExemptionProgress {
            app_id: app_id.to_string(),
            progress,
        });
        Ok(())
    }
}

/// `MM:SS` for the progress indicator.
#[must_use]
pub fn format_remaining(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

/// Build the strategy selected in the config.
#[must_use]
pub fn create_enforcer(config: &MonitorConfig, events: Arc<EventLog>) -> Arc<dyn Enforcer> {
    match config.strategy {
        EnforcementStrategy::Redirect => Arc::new(RedirectEnforcer::new(
            events,
            config.redirect_command.clone(),
        )),
        EnforcementStrategy::Terminate => Arc::new(TerminateEnforcer::new(events)),
    }
}

/// Remember which target a lock screen is currently shown for.
fn mark_shown(shown: &std::sync::Mutex<Option<ApplicationId>>, target: &str) -> bool {
    let mut guard = match shown.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if guard.as_deref() == Some(target) {
        return false;
    }
    *guard = Some(target.to_string());
    true
}

fn take_shown(shown: &std::sync::Mutex<Option<ApplicationId>>) -> Option<ApplicationId> {
    match shown.lock() {
        Ok(mut guard) => guard.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(0), "00:00");
        assert_eq!(format_remaining(65), "01:05");
        assert_eq!(format_remaining(1500), "25:00");
    }

    #[tokio::test]
    async fn test_create_enforcer_by_strategy() {
        let events = Arc::new(EventLog::new());
        let config = MonitorConfig {
            strategy: EnforcementStrategy::Redirect,
            ..MonitorConfig::default()
        };
        let enforcer = create_enforcer(&config, events.clone());
        enforcer.enforce("com.example.games").await.unwrap();
        assert_eq!(events.latest_seq(), 1);

        enforcer
            .notify_progress(Progress {
                remaining_seconds: 10,
                fraction_elapsed: 0.5,
            })
            .await
            .unwrap();
        assert_eq!(events.latest_seq(), 2);
    }
}
