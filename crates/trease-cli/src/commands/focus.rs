//! Focus session control over the daemon's control socket.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use trease_core::{
    apps::{installed_apps, locked_set_from_allow_list},
    config::MonitorConfig,
    ipc::{ControlRequest, ControlResponse, IpcClient},
    DaemonControl,
};
use trease_storage::{Database, HistoryEntry, SessionOutcome};
use uuid::Uuid;

use super::daemon::start_daemon;
use super::helpers::{describe_event, format_local};

#[derive(Subcommand, Debug)]
pub enum FocusAction {
    /// Start a focus session
    Start {
        /// Session length in minutes
        #[arg(short, long, default_value = "25")]
        minutes: u64,
        /// What the session is for
        #[arg(short, long, default_value = "focus")]
        subject: String,
        /// App to lock (repeatable)
        #[arg(short, long)]
        block: Vec<String>,
        /// Lock every installed app except these (repeatable)
        #[arg(short, long, conflicts_with = "block")]
        allow: Vec<String>,
    },
    /// Cancel the running session
    Stop,
    /// Let a locked app through for a while
    Exempt {
        /// App identifier
        app: String,
        /// Minutes of access
        #[arg(short, long, default_value = "5")]
        minutes: u64,
    },
    /// Print UI events from the daemon
    Events {
        /// Only events after this sequence number
        #[arg(long, default_value = "0")]
        after: u64,
        /// Keep polling
        #[arg(short, long)]
        follow: bool,
    },
}

/// Handle focus commands
pub async fn handle_focus_command(action: FocusAction, data_dir: &Path) -> Result<()> {
    let control = DaemonControl::new(data_dir);
    match action {
        FocusAction::Start {
            minutes,
            subject,
            block,
            allow,
        } => start_focus(&control, data_dir, minutes, subject, &block, &allow).await,
        FocusAction::Stop => stop_focus(&control).await,
        FocusAction::Exempt { app, minutes } => exempt(&control, app, minutes).await,
        FocusAction::Events { after, follow } => watch_events(&control, after, follow).await,
    }
}

fn build_locked_set(block: &[String], allow: &[String]) -> Result<BTreeSet<String>> {
    if !block.is_empty() {
        return Ok(block.iter().cloned().collect());
    }
    if allow.is_empty() {
        anyhow::bail!("Nothing to lock: pass --block <app> or --allow <app>");
    }

    let config = MonitorConfig::load_default()?;
    let installed = installed_apps(&config.application_dirs)?;
    let allowed: BTreeSet<String> = allow.iter().cloned().collect();
    Ok(locked_set_from_allow_list(
        &installed,
        &allowed,
        &config.self_id,
    ))
}

async fn start_focus(
    control: &DaemonControl,
    data_dir: &Path,
    minutes: u64,
    subject: String,
    block: &[String],
    allow: &[String],
) -> Result<()> {
    let locked_set = build_locked_set(block, allow)?;
    if locked_set.is_empty() {
        anyhow::bail!("The locked set is empty; nothing would be blocked");
    }

    if !control.is_running() {
        start_daemon(data_dir)?;
        wait_for_socket(control).await?;
    }

    let client = IpcClient::new(control.sock_path());
    let locked_count = locked_set.len();
    let response = client
        .send_command(ControlRequest::StartSession {
            subject_id: subject.clone(),
            locked_set,
            duration_seconds: minutes.saturating_mul(60),
        })
        .await
        .context("Daemon not responding")?;

    match response {
        ControlResponse::Started {
            expires_at,
            superseded,
            warning,
            ..
        } => {
            if let Some(previous) = superseded {
                println!("Cancelled previous session {previous}");
            }
            println!(
                "Focus session '{subject}' started: {locked_count} apps locked until {}",
                format_local(expires_at)
            );
            if let Some(warning) = warning {
                eprintln!("Warning: {warning}");
            }
            Ok(())
        }
        ControlResponse::Rejected { reason } => anyhow::bail!("Session rejected: {reason}"),
        other => anyhow::bail!("Unexpected response from daemon: {other:?}"),
    }
}

async fn wait_for_socket(control: &DaemonControl) -> Result<()> {
    for _ in 0..50 {
        if control.sock_path().exists() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    anyhow::bail!("Daemon did not come up; see trease.log")
}

async fn stop_focus(control: &DaemonControl) -> Result<()> {
    let client = IpcClient::new(control.sock_path());
    match client.send_command(ControlRequest::StopSession).await {
        Ok(ControlResponse::Stopped {
            session_id: Some(id),
        }) => println!("Session {id} cancelled"),
        Ok(ControlResponse::Stopped { session_id: None }) => println!("No session is running"),
        Ok(other) => anyhow::bail!("Unexpected response from daemon: {other:?}"),
        Err(e) => {
            log::debug!("Daemon not reachable: {e}");
            let db = Database::new(None)?;
            match cancel_offline(&db, Utc::now())? {
                Some(id) => println!("Session {id} cancelled (daemon not running)"),
                None => println!("No session is running"),
            }
        }
    }
    Ok(())
}

/// Finalize a checkpointed session while the daemon is down.
fn cancel_offline(db: &Database, now: DateTime<Utc>) -> Result<Option<Uuid>> {
    let Some(record) = db.load_session_record()? else {
        return Ok(None);
    };
    // A lapsed checkpoint is finished, not cancelled
    let outcome = if record.is_expired(now) {
        SessionOutcome::Expired
    } else {
        SessionOutcome::Cancelled
    };
    db.finish_session(&HistoryEntry::from_record(&record, outcome, now))?;
    Ok((outcome == SessionOutcome::Cancelled).then_some(record.session_id))
}

async fn exempt(control: &DaemonControl, app: String, minutes: u64) -> Result<()> {
    let client = IpcClient::new(control.sock_path());
    let response = client
        .send_command(ControlRequest::Exempt {
            app_id: app,
            seconds: minutes.saturating_mul(60),
        })
        .await
        .context("Daemon is not running")?;

    match response {
        ControlResponse::Exempted { app_id, until } => {
            println!("{app_id} allowed until {}", format_local(until));
            Ok(())
        }
        ControlResponse::Rejected { reason } => anyhow::bail!("Exemption rejected: {reason}"),
        other => anyhow::bail!("Unexpected response from daemon: {other:?}"),
    }
}

async fn watch_events(control: &DaemonControl, after: u64, follow: bool) -> Result<()> {
    let client = IpcClient::new(control.sock_path());
    let mut after = after;

    loop {
        let response = client
            .send_command(ControlRequest::Events { after })
            .await
            .context("Daemon is not running")?;
        let (events, latest) = match response {
            ControlResponse::Events { events, latest } => (events, latest),
            other => anyhow::bail!("Unexpected response from daemon: {other:?}"),
        };

        for event in &events {
            println!(
                "{:>5} {} {}",
                event.seq,
                format_local(event.at),
                describe_event(&event.event)
            );
        }
        after = latest;

        if !follow {
            return Ok(());
        }
        tokio::select! {
            () = tokio::time::sleep(Duration::from_secs(1)) => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}
