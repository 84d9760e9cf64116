use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::Instant;

use super::{mark_shown, take_shown, Enforcer};
use crate::events::{EventLog, UiEvent};
use crate::session::ApplicationId;

/// Minimum gap between two launches of the lock UI for a refresh.
const RELAUNCH_INTERVAL: Duration = Duration::from_secs(3);

struct LaunchedUi {
    child: Child,
    at: Instant,
}

/// Raises the controlling UI over the blocked app.
///
/// The UI learns about it from the event feed. If a launch command is
/// configured it is spawned once per lock screen, and again on refresh
/// when the user closed it and went back to the blocked app.
pub struct RedirectEnforcer {
    events: Arc<EventLog>,
    command: Option<Vec<String>>,
    shown: Mutex<Option<ApplicationId>>,
    ui: Mutex<Option<LaunchedUi>>,
}

impl RedirectEnforcer {
    #[must_use]
    pub fn new(events: Arc<EventLog>, command: Option<Vec<String>>) -> Self {
        Self {
            events,
            command,
            shown: Mutex::new(None),
            ui: Mutex::new(None),
        }
    }

    fn launched_ui(&self) -> std::sync::MutexGuard<'_, Option<LaunchedUi>> {
        match self.ui.lock() {
            Ok(ui) => ui,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn spawn_ui(&self, target: &str) -> Result<()> {
        let Some((program, args)) = self.command.as_ref().and_then(|argv| argv.split_first())
        else {
            return Ok(());
        };
        let args: Vec<String> = args.iter().map(|a| a.replace("{target}", target)).collect();
        let child = Command::new(program)
            .args(&args)
            .spawn()
            .with_context(|| format!("Failed to launch lock UI `{program}`"))?;
        *self.launched_ui() = Some(LaunchedUi {
            child,
            at: Instant::now(),
        });
        Ok(())
    }

    /// The last lock UI is gone and was not launched too recently.
    fn relaunch_due(&self) -> bool {
        if self.command.is_none() {
            return false;
        }
        let mut ui = self.launched_ui();
        match ui.as_mut() {
            None => true,
            Some(launched) => {
                launched.at.elapsed() >= RELAUNCH_INTERVAL
                    && !matches!(launched.child.try_wait(), Ok(None))
            }
        }
    }
}

#[async_trait]
impl Enforcer for RedirectEnforcer {
    async fn enforce(&self, target: &str) -> Result<()> {
        if !mark_shown(&self.shown, target) {
            self.events.push(UiEvent::LockScreenRefresh {
                target: target.to_string(),
            });
            return Ok(());
        }

        log::info!("Blocking {target}: raising lock screen");
        self.events.push(UiEvent::LockScreen {
            target: target.to_string(),
        });
        if let Err(e) = self.spawn_ui(target) {
            // Let the next tick try again
            take_shown(&self.shown);
            return Err(e);
        }
        Ok(())
    }

    async fn refresh(&self, target: &str) -> Result<()> {
        self.events.push(UiEvent::LockScreenRefresh {
            target: target.to_string(),
        });
        if self.relaunch_due() {
            log::info!("Lock screen for {target} was closed, raising it again");
            self.spawn_ui(target)?;
        }
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        if let Some(target) = take_shown(&self.shown) {
            log::debug!("Lock screen for {target} dismissed");
            self.events.push(UiEvent::LockScreenDismissed);
        }
        Ok(())
    }

    fn events(&self) -> &EventLog {
        &self.events
    }
}
