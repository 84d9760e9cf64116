use anyhow::Context;
use std::path::{Path, PathBuf};
use sysinfo::{Pid, System};

/// Daemon control for process management
pub struct DaemonControl {
    pid_file: PathBuf,
    sock_path: PathBuf,
}

impl DaemonControl {
    /// Control files inside `data_dir`
    #[must_use]
    pub fn new(data_dir: &Path) -> Self {
        Self {
            pid_file: data_dir.join("trease.pid"),
            sock_path: data_dir.join("trease.sock"),
        }
    }

    #[must_use]
    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    #[must_use]
    pub fn sock_path(&self) -> &Path {
        &self.sock_path
    }

    /// Read PID from file
    fn read_pid(&self) -> anyhow::Result<u32> {
        let contents = std::fs::read_to_string(&self.pid_file)
            .with_context(|| format!("Failed to read {}", self.pid_file.display()))?;
        contents.trim().parse::<u32>().map_err(Into::into)
    }

    /// Get PID of running daemon
    pub fn get_pid(&self) -> anyhow::Result<Option<u32>> {
        if !self.pid_file.exists() {
            return Ok(None);
        }
        Ok(Some(self.read_pid()?))
    }

    pub fn write_pid(&self, pid: u32) -> anyhow::Result<()> {
        if let Some(parent) = self.pid_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.pid_file, pid.to_string())?;
        Ok(())
    }

    /// Whether the recorded PID belongs to a live process.
    #[must_use]
    pub fn is_running(&self) -> bool {
        match self.get_pid() {
            Ok(Some(pid)) => System::new().refresh_process(Pid::from_u32(pid)),
            _ => false,
        }
    }

    /// Kill the recorded process. Returns `false` if it was already gone.
    #[must_use]
    pub fn kill(&self) -> bool {
        let Ok(Some(pid)) = self.get_pid() else {
            return false;
        };
        let pid = Pid::from_u32(pid);
        let mut sys = System::new();
        if !sys.refresh_process(pid) {
            return false;
        }
        sys.process(pid).is_some_and(sysinfo::Process::kill)
    }

    /// Remove PID file
    pub fn remove_pid(&self) -> anyhow::Result<()> {
        if self.pid_file.exists() {
            std::fs::remove_file(&self.pid_file)?;
        }
        Ok(())
    }

    /// Remove PID and socket files left behind by a dead daemon.
    pub fn cleanup_stale(&self) -> anyhow::Result<()> {
        if self.is_running() {
            return Ok(());
        }
        if self.pid_file.exists() {
            log::warn!("Removing stale PID file.");
            self.remove_pid()?;
        }
        if self.sock_path.exists() {
            log::warn!("Removing stale socket file.");
            std::fs::remove_file(&self.sock_path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_file_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let control = DaemonControl::new(dir.path());
        assert_eq!(control.get_pid().unwrap(), None);
        assert!(!control.is_running());

        control.write_pid(std::process::id()).unwrap();
        assert_eq!(control.get_pid().unwrap(), Some(std::process::id()));
        assert!(control.is_running());

        control.remove_pid().unwrap();
        assert!(!control.pid_file().exists());
    }

    #[test]
    fn test_cleanup_stale_files() {
        let dir = tempfile::tempdir().unwrap();
        let control = DaemonControl::new(dir.path());
        // PIDs this large are never handed out
        std::fs::write(control.pid_file(), "4194304").unwrap();
        std::fs::write(control.sock_path(), "").unwrap();

        control.cleanup_stale().unwrap();
        assert!(!control.pid_file().exists());
        assert!(!control.sock_path().exists());
    }

    #[test]
    fn test_garbage_pid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let control = DaemonControl::new(dir.path());
        std::fs::write(control.pid_file(), "not a pid").unwrap();
        assert!(control.get_pid().is_err());
        assert!(!control.is_running());
    }
}
