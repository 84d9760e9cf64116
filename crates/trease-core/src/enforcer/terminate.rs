use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use sysinfo::{ProcessRefreshKind, System, UpdateKind};

use super::{mark_shown, take_shown, Enforcer};
use crate::apps::process_identifier;
use crate::events::{EventLog, UiEvent};
use crate::session::ApplicationId;

/// Kills every process whose identifier matches the blocked id.
///
/// Best-effort: a missing process or a refused signal is logged and the
/// next tick simply tries again. The process table scan runs on the
/// blocking pool and is never awaited, so a tick returns right away.
pub struct TerminateEnforcer {
    events: Arc<EventLog>,
    system: Arc<Mutex<System>>,
    scanning: Arc<AtomicBool>,
    shown: Mutex<Option<ApplicationId>>,
}

impl TerminateEnforcer {
    #[must_use]
    pub fn new(events: Arc<EventLog>) -> Self {
        Self {
            events,
            system: Arc::new(Mutex::new(System::new())),
            scanning: Arc::new(AtomicBool::new(false)),
            shown: Mutex::new(None),
        }
    }

    fn terminate(&self, target: &str) {
        // One scan at a time; the next tick covers anything missed
        if self.scanning.swap(true, Ordering::AcqRel) {
            log::debug!("Process scan still running, skipping {target}");
            return;
        }
        let system = Arc::clone(&self.system);
        let scanning = Arc::clone(&self.scanning);
        let target = target.to_string();
        tokio::task::spawn_blocking(move || {
            kill_matching(&system, &target);
            scanning.store(false, Ordering::Release);
        });
    }
}

/// Returns how many processes accepted the kill signal.
fn kill_matching(system: &Mutex<System>, target: &str) -> usize {
    let mut system = match system.lock() {
        Ok(system) => system,
        Err(poisoned) => poisoned.into_inner(),
    };
    // Names and argv only; cpu, memory and disk stats are not needed
    system.refresh_processes_specifics(
        ProcessRefreshKind::new().with_cmd(UpdateKind::OnlyIfNotSet),
    );

    let mut killed = 0;
    for process in system.processes().values() {
        let argv0 = process.cmd().first().map(String::as_str);
        if process_identifier(process.name(), argv0).as_deref() != Some(target) {
            continue;
        }
        if process.kill() {
            killed += 1;
        } else {
            log::warn!("Could not terminate {target} (pid {})", process.pid());
        }
    }
    if killed == 0 {
        log::debug!("No running process named {target}");
    } else {
        log::info!("Terminated {killed} process(es) named {target}");
    }
    killed
}

#[async_trait]
impl Enforcer for TerminateEnforcer {
    async fn enforce(&self, target: &str) -> Result<()> {
        if mark_shown(&self.shown, target) {
            self.events.push(UiEvent::LockScreen {
                target: target.to_string(),
            });
        }
        self.terminate(target);
        Ok(())
    }

    async fn refresh(&self, target: &str) -> Result<()> {
        // The process may have been relaunched
        self.terminate(target);
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        if take_shown(&self.shown).is_some() {
            self.events.push(UiEvent::LockScreenDismissed);
        }
        Ok(())
    }

    fn events(&self) -> &EventLog {
        &self.events
    }
}
