//! Owner of the single focus session.
//!
//! Every state transition (start, stop, expiry, exemption changes) takes the
//! write half of one `RwLock`, so they are totally ordered. The polling loop
//! holds the read half across decide-and-enforce; once `stop_session`
//! returns, no further `Block` can be issued for the stopped session.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ops::ControlFlow;
use std::sync::{Arc, Weak};
use tokio::sync::{RwLock, RwLockReadGuard};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use trease_storage::{Database, HistoryEntry, SessionOutcome, SessionRecord};
use uuid::Uuid;

use crate::clock::Clock;
use crate::enforcer::Enforcer;
use crate::error::ControlError;
use crate::events::{EventLog, UiEvent};
use crate::session::{ApplicationId, Session, SessionStatus};
use crate::timer::{Countdown, Progress, Tick, TimerState};

const PERSIST_WARNING: &str = "Session service error, but your progress is not lost";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartAck {
    pub session_id: Uuid,
    pub expires_at: DateTime<Utc>,
    /// Session that was still running and got cancelled by this start.
    pub superseded: Option<Uuid>,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopAck {
    /// `None` when nothing was running.
    pub session_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    Idle,
    Resumed { session_id: Uuid, remaining_seconds: u64 },
    Expired { session_id: Uuid },
}

/// Read-only snapshot for `Status` requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusView {
    pub status: SessionStatus,
    pub session_id: Option<Uuid>,
    pub subject_id: Option<String>,
    pub remaining_seconds: u64,
    pub fraction_elapsed: f64,
    pub expires_at: Option<DateTime<Utc>>,
    pub locked_set: Vec<ApplicationId>,
    pub exemptions: Vec<(ApplicationId, DateTime<Utc>)>,
    pub warning: Option<String>,
}

impl StatusView {
    #[must_use]
    pub fn idle() -> Self {
        Self {
            status: SessionStatus::Idle,
            session_id: None,
            subject_id: None,
            remaining_seconds: 0,
            fraction_elapsed: 0.0,
            expires_at: None,
            locked_set: Vec::new(),
            exemptions: Vec::new(),
            warning: None,
        }
    }

    /// Status straight from a checkpoint, for when the daemon is not up.
    #[must_use]
    pub fn from_record(record: &SessionRecord, now: DateTime<Utc>) -> Self {
        let countdown = Countdown::resume(record.expires_at, record.duration_seconds, now);
        let session = Session::from_record(record.clone(), SessionStatus::Running);
        let status = if countdown.state() == TimerState::Running {
            SessionStatus::Running
        } else {
            SessionStatus::Expired
        };
        Self::describe(&session, status, countdown.progress(now), now, None)
    }

    fn describe(
        session: &Session,
        status: SessionStatus,
        progress: Progress,
        now: DateTime<Utc>,
        warning: Option<String>,
    ) -> Self {
        Self {
            status,
            session_id: Some(session.id),
            subject_id: Some(session.subject_id.clone()),
            remaining_seconds: progress.remaining_seconds,
            fraction_elapsed: progress.fraction_elapsed,
            expires_at: Some(session.expires_at),
            locked_set: session.locked_set.iter().cloned().collect(),
            exemptions: session
                .exempt_until
                .iter()
                .filter(|(_, until)| **until > now)
                .map(|(app, until)| (app.clone(), *until))
                .collect(),
            warning,
        }
    }
}

struct ControllerState {
    session: Option<Session>,
    countdown: Option<Countdown>,
    timer: Option<JoinHandle<()>>,
    last_status: SessionStatus,
    last_progress: Option<Progress>,
    warning: Option<String>,
}

/// Shared read access for the polling loop.
pub struct EnforcementView<'a> {
    guard: RwLockReadGuard<'a, ControllerState>,
}

impl EnforcementView<'_> {
    /// The session to enforce, if one is running.
    #[must_use]
    pub fn running(&self) -> Option<&Session> {
        self.guard.session.as_ref().filter(|s| s.is_running())
    }
}

pub struct SessionController {
    state: RwLock<ControllerState>,
    database: Arc<Database>,
    enforcer: Arc<dyn Enforcer>,
    clock: Arc<dyn Clock>,
    tick_period: std::time::Duration,
}

impl SessionController {
    #[must_use]
    pub fn new(database: Arc<Database>, enforcer: Arc<dyn Enforcer>, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(ControllerState {
                session: None,
                countdown: None,
                timer: None,
                last_status: SessionStatus::Idle,
                last_progress: None,
                warning: None,
            }),
            database,
            enforcer,
            clock,
            tick_period: std::time::Duration::from_secs(1),
        }
    }

    #[must_use]
    pub fn with_tick_period(mut self, tick_period: std::time::Duration) -> Self {
        self.tick_period = tick_period;
        self
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    #[must_use]
    pub fn enforcer(&self) -> &Arc<dyn Enforcer> {
        &self.enforcer
    }

    #[must_use]
    pub fn events(&self) -> &EventLog {
        self.enforcer.events()
    }

    #[must_use]
    pub fn tick_period(&self) -> std::time::Duration {
        self.tick_period
    }

    /// Start a new session, cancelling any session that is still running.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDuration` for a zero duration and `EmptySubject` for a
    /// blank subject. Persistence failures do not fail the start; they are
    /// reported through `StartAck::warning`.
    pub async fn start_session(
        self: &Arc<Self>,
        subject_id: String,
        locked_set: BTreeSet<ApplicationId>,
        duration_seconds: u64,
    ) -> Result<StartAck, ControlError> {
        if duration_seconds == 0 {
            return Err(ControlError::InvalidDuration);
        }
        if subject_id.trim().is_empty() {
            return Err(ControlError::EmptySubject);
        }

        let mut state = self.state.write().await;
        let now = self.clock.now();

        let mut warning = None;
        let running = state
            .session
            .as_ref()
            .filter(|s| s.is_running())
            .map(|s| s.id);
        let superseded = match running {
            Some(previous_id) => {
                if let Some(countdown) = state.countdown.as_mut() {
                    countdown.cancel();
                }
                if let Some(timer) = state.timer.take() {
                    timer.abort();
                }
                warning = self
                    .end_session(&mut state, SessionOutcome::Cancelled, now)
                    .await;
                log::info!("Session {previous_id} superseded by a new start");
                Some(previous_id)
            }
            None => None,
        };

        let record = SessionRecord::new(subject_id, locked_set, duration_seconds, now);
        // Checkpoint before the countdown starts
        if let Err(e) = self.database.save_session_record(&record) {
            log::error!("Failed to persist session {}: {e}", record.session_id);
            warning = Some(PERSIST_WARNING.to_string());
        }

        let mut countdown = Countdown::new(duration_seconds);
        countdown.start(record.started_at);
        let session = Session::from_record(record, SessionStatus::Running);
        let ack = StartAck {
            session_id: session.id,
            expires_at: session.expires_at,
            superseded,
            warning: warning.clone(),
        };

        log::info!(
            "Started session {} for {} ({}s, {} locked)",
            session.id,
            session.subject_id,
            duration_seconds,
            session.locked_set.len()
        );
        self.events().push(UiEvent::SessionStarted {
            session_id: session.id,
            subject_id: session.subject_id.clone(),
        });

        state.timer = Some(self.spawn_timer(session.id));
        state.last_progress = Some(countdown.progress(now));
        state.session = Some(session);
        state.countdown = Some(countdown);
        state.last_status = SessionStatus::Running;
        state.warning = warning;
        Ok(ack)
    }

    /// Cancel the running session. Idempotent.
    pub async fn stop_session(&self) -> StopAck {
        let mut state = self.state.write().await;
        let now = self.clock.now();

        let Some(session_id) = state
            .session
            .as_ref()
            .filter(|s| s.is_running())
            .map(|s| s.id)
        else {
            return StopAck { session_id: None };
        };

        if let Some(countdown) = state.countdown.as_mut() {
            countdown.cancel();
        }
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        let warning = self
            .end_session(&mut state, SessionOutcome::Cancelled, now)
            .await;
        state.warning = warning;
        log::info!("Session {session_id} cancelled by user");

        StopAck {
            session_id: Some(session_id),
        }
    }

    /// Feed one countdown tick to `session_id`.
    ///
    /// Breaks when that session is no longer the current one or has just
    /// expired.
    pub async fn tick_session(&self, session_id: Uuid) -> ControlFlow<()> {
        let mut state = self.state.write().await;
        let now = self.clock.now();

        if state.session.as_ref().map(|s| s.id) != Some(session_id) {
            return ControlFlow::Break(());
        }
        let tick = state
            .countdown
            .as_mut()
            .map_or(Tick::Inactive, |countdown| countdown.tick(now));

        match tick {
            Tick::Progress(progress) => {
                state.last_progress = Some(progress);
                // Under the lock, so a racing stop cannot slip in before it
                if let Err(e) = self.enforcer.notify_progress(progress).await {
                    log::warn!("Progress notification failed: {e}");
                }
                ControlFlow::Continue(())
            }
            Tick::Expired(progress) => {
                if let Err(e) = self.enforcer.notify_progress(progress).await {
                    log::warn!("Progress notification failed: {e}");
                }
                // Detach rather than abort: this may be the timer task itself
                state.timer = None;
                let warning = self
                    .end_session(&mut state, SessionOutcome::Expired, now)
                    .await;
                state.warning = warning;
                state.last_progress = Some(progress);
                log::info!("Session {session_id} completed");
                ControlFlow::Break(())
            }
            Tick::Inactive => ControlFlow::Break(()),
        }
    }

    /// Let `app_id` through for `seconds`, capped at the session deadline.
    ///
    /// # Errors
    ///
    /// Fails when no session is running, when `app_id` is not locked, or
    /// when `seconds` is zero.
    pub async fn grant_exemption(
        &self,
        app_id: &str,
        seconds: u64,
    ) -> Result<DateTime<Utc>, ControlError> {
        if seconds == 0 {
            return Err(ControlError::InvalidExemption);
        }
        let mut state = self.state.write().await;
        let now = self.clock.now();

        let session = state
            .session
            .as_mut()
            .filter(|s| s.is_running())
            .ok_or(ControlError::NoRunningSession)?;
        if !session.is_locked(app_id) {
            return Err(ControlError::NotLocked(app_id.to_string()));
        }

        let length = Duration::seconds(i64::try_from(seconds).unwrap_or(i64::MAX));
        let until = now
            .checked_add_signed(length)
            .map_or(session.expires_at, |t| t.min(session.expires_at));
        session.exempt_until.insert(app_id.to_string(), until);
        let record = session.to_record();

        if let Err(e) = self.database.save_session_record(&record) {
            log::error!("Failed to persist exemption for {app_id}: {e}");
            state.warning = Some(PERSIST_WARNING.to_string());
        }
        log::info!("Exempted {app_id} until {until}");
        Ok(until)
    }

    /// Drop an exemption whose time has run out. Returns `false` when the
    /// session changed or the exemption was extended in the meantime.
    pub async fn revoke_exemption(&self, session_id: Uuid, app_id: &str) -> bool {
        let mut state = self.state.write().await;
        let now = self.clock.now();

        let Some(session) = state
            .session
            .as_mut()
            .filter(|s| s.id == session_id && s.is_running())
        else {
            return false;
        };
        if !session.exempt_until.get(app_id).is_some_and(|until| *until <= now) {
            return false;
        }
        session.exempt_until.remove(app_id);
        let record = session.to_record();

        if let Err(e) = self.database.save_session_record(&record) {
            log::error!("Failed to persist revoked exemption for {app_id}: {e}");
            state.warning = Some(PERSIST_WARNING.to_string());
        }
        log::info!("Exemption for {app_id} ended");
        true
    }

    /// Rebuild the session from its checkpoint after a restart.
    ///
    /// The remaining time comes from the persisted deadline. A checkpoint
    /// whose deadline has passed is finalized as expired without the
    /// session ever running again.
    pub async fn recover(self: &Arc<Self>) -> Recovery {
        let mut state = self.state.write().await;
        if state.session.is_some() {
            return Recovery::Idle;
        }
        let now = self.clock.now();

        let record = match self.database.load_session_record() {
            Ok(Some(record)) => record,
            Ok(None) => return Recovery::Idle,
            Err(e) => {
                log::error!("Failed to load session checkpoint: {e}");
                state.warning = Some(PERSIST_WARNING.to_string());
                return Recovery::Idle;
            }
        };

        let session_id = record.session_id;
        let countdown = Countdown::resume(record.expires_at, record.duration_seconds, now);

        if countdown.state() == TimerState::Expired {
            let entry = HistoryEntry::from_record(&record, SessionOutcome::Expired, now);
            if let Err(e) = self.database.finish_session(&entry) {
                log::error!("Failed to finalize session {session_id}: {e}");
                state.warning = Some(PERSIST_WARNING.to_string());
            }
            state.last_status = SessionStatus::Expired;
            state.last_progress = Some(countdown.progress(now));
            self.events().push(UiEvent::SessionEnded {
                session_id,
                outcome: SessionOutcome::Expired,
            });
            log::info!("Session {session_id} ran out while the monitor was down");
            return Recovery::Expired { session_id };
        }

        let remaining_seconds = countdown.remaining_seconds(now);
        state.last_progress = Some(countdown.progress(now));
        state.session = Some(Session::from_record(record, SessionStatus::Running));
        state.countdown = Some(countdown);
        state.last_status = SessionStatus::Running;
        state.timer = Some(self.spawn_timer(session_id));
        log::info!("Resumed session {session_id} with {remaining_seconds}s remaining");

        Recovery::Resumed {
            session_id,
            remaining_seconds,
        }
    }

    pub async fn status(&self) -> StatusView {
        let state = self.state.read().await;
        let now = self.clock.now();

        match (state.session.as_ref(), state.countdown.as_ref()) {
            (Some(session), Some(countdown)) => StatusView::describe(
                session,
                session.status,
                countdown.progress(now),
                now,
                state.warning.clone(),
            ),
            _ => StatusView {
                status: state.last_status,
                fraction_elapsed: state.last_progress.map_or(0.0, |p| p.fraction_elapsed),
                warning: state.warning.clone(),
                ..StatusView::idle()
            },
        }
    }

    /// Hold this across decide-and-enforce.
    pub async fn enforcement_view(&self) -> EnforcementView<'_> {
        EnforcementView {
            guard: self.state.read().await,
        }
    }

    /// Close out the current session. Returns a warning when the history
    /// could not be written.
    async fn end_session(
        &self,
        state: &mut ControllerState,
        outcome: SessionOutcome,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let mut session = state.session.take()?;
        session.status = outcome.into();
        state.countdown = None;
        state.last_status = session.status;
        state.last_progress = None;

        let entry = HistoryEntry::from_record(&session.to_record(), outcome, now);
        let warning = match self.database.finish_session(&entry) {
            Ok(()) => None,
            Err(e) => {
                log::error!("Failed to record end of session {}: {e}", session.id);
                Some(PERSIST_WARNING.to_string())
            }
        };

        if let Err(e) = self.enforcer.release().await {
            log::warn!("Failed to dismiss lock screen: {e}");
        }
        self.events().push(UiEvent::SessionEnded {
            session_id: session.id,
            outcome,
        });
        warning
    }

    fn spawn_timer(self: &Arc<Self>, session_id: Uuid) -> JoinHandle<()> {
        let controller: Weak<Self> = Arc::downgrade(self);
        let period = self.tick_period;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                if controller.tick_session(session_id).await.is_break() {
                    break;
                }
            }
        })
    }
}
