use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fs, io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{UnixListener, UnixStream},
    sync::Mutex,
};
use uuid::Uuid;

use crate::controller::{SessionController, StatusView};
use crate::error::ControlError;
use crate::events::SequencedEvent;
use crate::session::ApplicationId;

/// Requests larger than this are dropped unread.
const MAX_REQUEST_BYTES: u64 = 64 * 1024;

/// Control message from the UI/CLI to the daemon
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    StartSession {
        subject_id: String,
        locked_set: BTreeSet<ApplicationId>,
        duration_seconds: u64,
    },
    StopSession,
    Exempt {
        app_id: ApplicationId,
        seconds: u64,
    },
    Status,
    /// UI events with a sequence number greater than `after`.
    Events {
        after: u64,
    },
    Shutdown,
}

/// Reply from the daemon
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ControlResponse {
    Started {
        session_id: Uuid,
        expires_at: chrono::DateTime<chrono::Utc>,
        superseded: Option<Uuid>,
        warning: Option<String>,
    },
    Stopped {
        session_id: Option<Uuid>,
    },
    Exempted {
        app_id: ApplicationId,
        until: chrono::DateTime<chrono::Utc>,
    },
    Status {
        session: StatusView,
        current_app: Option<ApplicationId>,
        uptime_seconds: u64,
    },
    Events {
        events: Vec<SequencedEvent>,
        latest: u64,
    },
    Shutdown,
    Rejected {
        reason: ControlError,
    },
}

#[derive(Debug)]
pub struct IpcClient {
    sock_path: PathBuf,
}

impl IpcClient {
    #[must_use]
    pub fn new(sock_path: &Path) -> Self {
        Self {
            sock_path: sock_path.to_path_buf(),
        }
    }

    /// One request per connection: write, half-close, read to EOF.
    ///
    /// # Errors
    ///
    /// Fails when the daemon is unreachable or replies with garbage.
    pub async fn send_command(&self, request: ControlRequest) -> Result<ControlResponse> {
        let mut stream = UnixStream::connect(&self.sock_path).await?;

        let encoded = bincode::serialize(&request)?;
        stream.write_all(&encoded).await?;
        stream.shutdown().await?;

        let mut buffer = Vec::new();
        stream.read_to_end(&mut buffer).await?;
        let response: ControlResponse = bincode::deserialize(&buffer)?;

        Ok(response)
    }
}

pub struct ControlHandler {
    controller: Arc<SessionController>,
    current_app: Mutex<Option<ApplicationId>>,
    started_at: chrono::DateTime<chrono::Utc>,
    shutdown_signal: Arc<AtomicBool>,
}

impl ControlHandler {
    #[must_use]
    pub fn new(controller: Arc<SessionController>, shutdown_signal: Arc<AtomicBool>) -> Self {
        let started_at = controller.clock().now();
        Self {
            controller,
            current_app: Mutex::new(None),
            started_at,
            shutdown_signal,
        }
    }

    pub async fn set_current_app(&self, app_id: Option<ApplicationId>) {
        let mut lock = self.current_app.lock().await;
        *lock = app_id;
    }

    pub async fn respond(&self, request: ControlRequest) -> ControlResponse {
        match request {
            ControlRequest::StartSession {
                subject_id,
                locked_set,
                duration_seconds,
            } => match self
                .controller
                .start_session(subject_id, locked_set, duration_seconds)
                .await
            {
                Ok(ack) => ControlResponse::Started {
                    session_id: ack.session_id,
                    expires_at: ack.expires_at,
                    superseded: ack.superseded,
                    warning: ack.warning,
                },
                Err(reason) => ControlResponse::Rejected { reason },
            },
            ControlRequest::StopSession => {
                let ack = self.controller.stop_session().await;
                ControlResponse::Stopped {
                    session_id: ack.session_id,
                }
            }
            ControlRequest::Exempt { app_id, seconds } => {
                match self.controller.grant_exemption(&app_id, seconds).await {
                    Ok(until) => ControlResponse::Exempted { app_id, until },
                    Err(reason) => ControlResponse::Rejected { reason },
                }
            }
            ControlRequest::Status => {
                let current_app = self.current_app.lock().await.clone();
                let uptime = self.controller.clock().now() - self.started_at;
                ControlResponse::Status {
                    session: self.controller.status().await,
                    current_app,
                    uptime_seconds: u64::try_from(uptime.num_seconds()).unwrap_or(0),
                }
            }
            ControlRequest::Events { after } => {
                let events = self.controller.events();
                ControlResponse::Events {
                    events: events.since(after),
                    latest: events.latest_seq(),
                }
            }
            ControlRequest::Shutdown => {
                self.shutdown_signal.store(true, Ordering::SeqCst);
                ControlResponse::Shutdown
            }
        }
    }

    pub async fn handle(&self, stream: &mut UnixStream, request: ControlRequest) -> Result<()> {
        let response = self.respond(request).await;
        let encoded = bincode::serialize(&response)?;
        stream.write_all(&encoded).await?;
        Ok(())
    }
}

async fn serve_connection(handler: &ControlHandler, mut stream: UnixStream) {
    let mut buf = Vec::new();
    match (&mut stream).take(MAX_REQUEST_BYTES).read_to_end(&mut buf).await {
        Ok(0) => {} // Connection closed
        Ok(_) => match bincode::deserialize::<ControlRequest>(&buf) {
            Ok(request) => {
                log::debug!("IPC request: {request:?}");
                if let Err(e) = handler.handle(&mut stream, request).await {
                    log::error!("IPC handle error: {e}");
                }
            }
            Err(e) => {
                log::error!("IPC deserialize error: {e}");
            }
        },
        Err(e) => {
            log::error!("IPC read error: {e}");
        }
    }
}

/// Accept control connections on `sock_path` forever.
///
/// # Errors
///
/// Fails only if the socket cannot be bound.
pub async fn listen(handler: Arc<ControlHandler>, sock_path: &Path) -> io::Result<()> {
    if sock_path.exists() {
        fs::remove_file(sock_path)?;
    }
    let listener = UnixListener::bind(sock_path)?;
    log::info!("Control socket listening at {}", sock_path.display());

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let handler = handler.clone();
                tokio::spawn(async move {
                    serve_connection(&handler, stream).await;
                });
            }
            Err(e) => {
                log::error!("IPC accept error: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::enforcer::RecordingEnforcer;
    use crate::events::{EventLog, UiEvent};
    use crate::session::SessionStatus;
    use trease_storage::Database;

    fn handler() -> (Arc<ControlHandler>, Arc<AtomicBool>) {
        let enforcer = Arc::new(RecordingEnforcer::new(Arc::new(EventLog::new())));
        let controller = Arc::new(SessionController::new(
            Arc::new(Database::open_in_memory().unwrap()),
            enforcer,
            Arc::new(SystemClock),
        ));
        let shutdown = Arc::new(AtomicBool::new(false));
        (
            Arc::new(ControlHandler::new(controller, shutdown.clone())),
            shutdown,
        )
    }

    #[tokio::test]
    async fn test_rejections_carry_reason() {
        let (handler, _) = handler();
        let response = handler
            .respond(ControlRequest::StartSession {
                subject_id: "oak".to_string(),
                locked_set: BTreeSet::new(),
                duration_seconds: 0,
            })
            .await;
        assert_eq!(
            response,
            ControlResponse::Rejected {
                reason: ControlError::InvalidDuration
            }
        );

        let response = handler
            .respond(ControlRequest::Exempt {
                app_id: "a".to_string(),
                seconds: 60,
            })
            .await;
        assert_eq!(
            response,
            ControlResponse::Rejected {
                reason: ControlError::NoRunningSession
            }
        );
    }

    #[tokio::test]
    async fn test_round_trip_over_socket() {
        let dir = tempfile::tempdir().unwrap();
        let sock_path = dir.path().join("trease.sock");
        let (handler, shutdown) = handler();

        let listen_path = sock_path.clone();
        let server = tokio::spawn(async move { listen(handler, &listen_path).await });
        for _ in 0..50 {
            if sock_path.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let client = IpcClient::new(&sock_path);
        let started = client
            .send_command(ControlRequest::StartSession {
                subject_id: "oak".to_string(),
                locked_set: BTreeSet::from(["com.example.games".to_string()]),
                duration_seconds: 1500,
            })
            .await
            .unwrap();
        let ControlResponse::Started { session_id, .. } = started else {
            panic!("expected Started");
        };

        let status = client.send_command(ControlRequest::Status).await.unwrap();
        let ControlResponse::Status { session, .. } = status else {
            panic!("expected Status");
        };
        assert_eq!(session.status, SessionStatus::Running);
        assert_eq!(session.session_id, Some(session_id));

        let stopped = client.send_command(ControlRequest::StopSession).await.unwrap();
        assert_eq!(
            stopped,
            ControlResponse::Stopped {
                session_id: Some(session_id)
            }
        );

        let events = client
            .send_command(ControlRequest::Events { after: 0 })
            .await
            .unwrap();
        let ControlResponse::Events { events, .. } = events else {
            panic!("expected Events");
        };
        assert!(matches!(
            events.first().map(|e| &e.event),
            Some(UiEvent::SessionStarted { .. })
        ));

        let bye = client.send_command(ControlRequest::Shutdown).await.unwrap();
        assert_eq!(bye, ControlResponse::Shutdown);
        assert!(shutdown.load(Ordering::SeqCst));
        server.abort();
    }
}
