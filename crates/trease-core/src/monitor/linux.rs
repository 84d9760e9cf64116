use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::process::Command;

use super::probe::ProbeLog;
use super::{ActivityEvent, ActivitySource, UsageStat};
use crate::apps::process_identifier;
use crate::session::ApplicationId;

/// X11 focus probe: active window -> owning pid -> `/proc/<pid>/{comm,cmdline}`.
///
/// The process name is the identifier, which is also what the terminate
/// strategy matches on.
pub struct LinuxActivitySource {
    log: ProbeLog,
}

impl LinuxActivitySource {
    #[must_use]
    pub fn new(window: std::time::Duration) -> Self {
        Self {
            log: ProbeLog::new(window),
        }
    }

    async fn focused_app() -> Result<Option<ApplicationId>> {
        let output = Command::new("xdotool")
            .args(["getactivewindow", "getwindowpid"])
            .output()
            .await
            .context("Failed to run xdotool")?;

        // Non-zero exit: nothing focused (bare desktop, lock screen)
        if !output.status.success() {
            return Ok(None);
        }

        let pid = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let Ok(pid) = pid.parse::<u32>() else {
            return Ok(None);
        };
        app_id_for_pid(pid).await
    }
}

/// `comm` names the process; `cmdline` restores names the kernel cut short.
async fn app_id_for_pid(pid: u32) -> Result<Option<ApplicationId>> {
    let comm = tokio::fs::read_to_string(format!("/proc/{pid}/comm"))
        .await
        .with_context(|| format!("Failed to read /proc/{pid}/comm"))?;
    // Gone if the process just exited; comm alone still names it
    let cmdline = tokio::fs::read(format!("/proc/{pid}/cmdline"))
        .await
        .unwrap_or_default();
    let argv0 = cmdline
        .split(|b| *b == 0)
        .next()
        .map(String::from_utf8_lossy)
        .filter(|arg| !arg.is_empty());
    Ok(process_identifier(&comm, argv0.as_deref()))
}

#[async_trait]
impl ActivitySource for LinuxActivitySource {
    async fn query_events(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<ActivityEvent>> {
        let focused = Self::focused_app().await?;
        self.log.record(focused, until);
        Ok(self.log.events(since, until))
    }

    async fn query_usage(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<UsageStat>> {
        Ok(self.log.usage(since, until))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::process::{Child, Command as StdCommand};

    fn spawn_renamed_sleep(path: &Path) -> Option<Child> {
        let sleep = ["/bin/sleep", "/usr/bin/sleep"]
            .into_iter()
            .map(Path::new)
            .find(|p| p.exists())?;
        std::fs::copy(sleep, path).unwrap();
        // A freshly written binary can be briefly busy
        for _ in 0..10 {
            if let Ok(child) = StdCommand::new(path).arg("5").spawn() {
                return Some(child);
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
        None
    }

    #[tokio::test]
    async fn test_long_process_name_is_not_cut() {
        let dir = tempfile::tempdir().unwrap();
        let Some(mut child) = spawn_renamed_sleep(&dir.path().join("telegram-desktop")) else {
            return;
        };

        let comm = std::fs::read_to_string(format!("/proc/{}/comm", child.id())).unwrap();
        let app_id = app_id_for_pid(child.id()).await.unwrap();
        child.kill().unwrap();
        child.wait().unwrap();

        assert_eq!(comm.trim(), "telegram-deskto");
        assert_eq!(app_id.as_deref(), Some("telegram-desktop"));
    }

    #[tokio::test]
    async fn test_missing_pid_is_an_error() {
        assert!(app_id_for_pid(u32::MAX).await.is_err());
    }
}
