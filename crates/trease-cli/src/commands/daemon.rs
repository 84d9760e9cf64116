/// Daemon lifecycle management commands
use anyhow::Result;
use std::{env, fs, path::Path, process::Command, process::Stdio, time::Duration};
use trease_core::{
    config::{get_data_dir, MonitorConfig},
    ipc::{ControlRequest, ControlResponse, IpcClient},
    Daemon, DaemonControl, StatusView,
};
use trease_storage::Database;

use super::helpers::{format_duration, format_local};

pub fn start_daemon(data_dir: &Path) -> Result<()> {
    let control = DaemonControl::new(data_dir);

    // 1. Check if daemon is already running
    if control.is_running() {
        if let Ok(Some(pid)) = control.get_pid() {
            log::info!("Daemon is already running (PID: {pid}).");
        }
        return Ok(());
    }

    // 2. Clean up files left by a dead daemon
    control.cleanup_stale()?;
    fs::create_dir_all(data_dir)?;

    log::info!("Starting trease daemon...");

    // 3. Spawn a new process for the daemon
    let current_exe = env::current_exe()?;
    let child = Command::new(current_exe)
        .arg("daemon-internal-start")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;

    // 4. In parent process, write PID and exit
    log::info!("Daemon process started with PID: {}", child.id());
    control.write_pid(child.id())?;

    Ok(())
}

pub async fn run_daemon_process() -> Result<()> {
    // Detached process: logging goes to a file
    setup_daemon_logging()?;
    log::info!("Daemon process started internally.");

    if let Err(e) = daemon_main_logic().await {
        log::error!("Daemon main logic exited with a fatal error: {e:#}");
        return Err(e);
    }

    Ok(())
}

async fn daemon_main_logic() -> Result<()> {
    let config = MonitorConfig::load_default()?;
    let db = Database::new(None)?;
    let mut daemon = Daemon::new(db, &config)?;
    daemon.run_with_signals().await
}

pub async fn stop_daemon(data_dir: &Path) -> Result<()> {
    let control = DaemonControl::new(data_dir);

    let Some(pid) = control.get_pid()? else {
        log::info!("Daemon is not running (no PID file).");
        control.cleanup_stale()?;
        return Ok(());
    };

    log::info!("Stopping trease daemon (PID: {pid})...");
    let client = IpcClient::new(control.sock_path());

    match client.send_command(ControlRequest::Shutdown).await {
        Ok(ControlResponse::Shutdown) => {
            log::info!("Daemon shutdown signal sent. Waiting for process to exit...");
            tokio::time::sleep(Duration::from_secs(2)).await;

            if control.is_running() {
                log::warn!("Daemon did not stop gracefully. Force killing...");
                if control.kill() {
                    log::info!("Process killed.");
                }
            } else {
                log::info!("Daemon stopped successfully.");
            }
        }
        Ok(resp) => log::error!("Received unexpected response from daemon: {resp:?}"),
        Err(e) => {
            log::error!("Failed to send shutdown command: {e}. Forcing cleanup.");
            if control.kill() {
                log::info!("Process killed.");
            }
        }
    }

    // Cleanup
    control.remove_pid()?;
    if control.sock_path().exists() {
        fs::remove_file(control.sock_path())?;
    }

    Ok(())
}

pub async fn show_status(data_dir: &Path, json: bool) -> Result<()> {
    let control = DaemonControl::new(data_dir);
    let client = IpcClient::new(control.sock_path());

    let (daemon_running, session, current_app) =
        match client.send_command(ControlRequest::Status).await {
            Ok(ControlResponse::Status {
                session,
                current_app,
                ..
            }) => (true, session, current_app),
            Ok(resp) => anyhow::bail!("Unexpected response from daemon: {resp:?}"),
            Err(e) => {
                log::debug!("Daemon not reachable: {e}");
                (false, offline_status()?, None)
            }
        };

    if json {
        println!("{}", serde_json::to_string_pretty(&session)?);
        return Ok(());
    }

    println!(
        "Daemon Status: {}",
        if daemon_running { "Running" } else { "Not running" }
    );
    if let Some(app) = current_app {
        println!("Foreground: {app}");
    }
    print_session(&session);
    Ok(())
}

/// Session status straight from the checkpoint.
fn offline_status() -> Result<StatusView> {
    let db = Database::new(None)?;
    Ok(db
        .load_session_record()?
        .map_or_else(StatusView::idle, |record| {
            StatusView::from_record(&record, chrono::Utc::now())
        }))
}

pub fn print_session(session: &StatusView) {
    println!("\nSession: {}", session.status.description());
    if let Some(subject) = &session.subject_id {
        println!("  Subject: {subject}");
    }
    if let Some(expires_at) = session.expires_at {
        println!(
            "  Remaining: {} ({:.0}% done, ends {})",
            format_duration(session.remaining_seconds),
            session.fraction_elapsed * 100.0,
            format_local(expires_at)
        );
    }
    if !session.locked_set.is_empty() {
        println!("  Locked: {}", session.locked_set.join(", "));
    }
    for (app, until) in &session.exemptions {
        println!("  Exempt: {app} until {}", format_local(*until));
    }
    if let Some(warning) = &session.warning {
        println!("\nWarning: {warning}");
    }
}

fn setup_daemon_logging() -> Result<()> {
    use std::fs::{create_dir_all, OpenOptions};

    let log_path = get_data_dir()?.join("trease.log");

    if let Some(parent) = log_path.parent() {
        create_dir_all(parent)?;
    }

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .filter_level(log::LevelFilter::Debug)
        .init();

    Ok(())
}
