use crate::{
    clock::{Clock, SystemClock},
    config::{get_data_dir, MonitorConfig},
    controller::{Recovery, SessionController},
    enforcer::{create_enforcer, Enforcer},
    events::EventLog,
    ipc::{listen, ControlHandler},
    monitor::{create_activity_source, ActivitySource, ForegroundDetector},
    policy::{BlockState, LockAction, LockDecision, LockPolicy},
    session::{ApplicationId, Session},
    timer::{Countdown, Tick},
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{task::JoinHandle, time::interval};
use trease_storage::Database;
use uuid::Uuid;

/// The polling loop plus everything it drives.
pub struct Daemon {
    controller: Arc<SessionController>,
    detector: ForegroundDetector,
    policy: LockPolicy,
    enforcer: Arc<dyn Enforcer>,
    ipc_handler: Arc<ControlHandler>,
    shutdown_signal: Arc<AtomicBool>,
    block_state: BlockState,
    active_session: Option<Uuid>,
    exemption_timer: Option<JoinHandle<()>>,
    last_foreground: Option<ApplicationId>,
    sock_path: PathBuf,
    poll_interval: Duration,
}

impl Daemon {
    pub fn new(db: Database, config: &MonitorConfig) -> Result<Self> {
        let events = Arc::new(EventLog::new());
        let enforcer = create_enforcer(config, events);
        let source = create_activity_source(config)?;
        let sock_path = get_data_dir()?.join("trease.sock");

        Ok(Self::with_parts(
            Arc::new(db),
            config,
            source,
            enforcer,
            Arc::new(SystemClock),
            sock_path,
        ))
    }

    /// Assemble a daemon from explicit parts.
    #[must_use]
    pub fn with_parts(
        database: Arc<Database>,
        config: &MonitorConfig,
        source: Box<dyn ActivitySource>,
        enforcer: Arc<dyn Enforcer>,
        clock: Arc<dyn Clock>,
        sock_path: PathBuf,
    ) -> Self {
        let shutdown_signal = Arc::new(AtomicBool::new(false));
        let controller = Arc::new(SessionController::new(database, enforcer.clone(), clock));

        Self {
            ipc_handler: Arc::new(ControlHandler::new(
                controller.clone(),
                shutdown_signal.clone(),
            )),
            controller,
            detector: ForegroundDetector::new(source, config.fallback_window()),
            policy: LockPolicy::new(config.home_ids.iter().cloned(), config.self_id.clone()),
            enforcer,
            shutdown_signal,
            block_state: BlockState::default(),
            active_session: None,
            exemption_timer: None,
            last_foreground: None,
            sock_path,
            poll_interval: config.poll_interval(),
        }
    }

    #[must_use]
    pub fn controller(&self) -> &Arc<SessionController> {
        &self.controller
    }

    /// Resume any checkpointed session and learn the platform launcher.
    pub async fn prepare(&mut self) -> Recovery {
        if let Some(home) = self.detector.home_screen_id().await {
            log::debug!("Home screen: {home}");
            self.policy.add_home_id(home);
        }

        let recovery = self.controller.recover().await;
        match recovery {
            Recovery::Resumed {
                session_id,
                remaining_seconds,
            } => log::info!("Recovered session {session_id} ({remaining_seconds}s left)"),
            Recovery::Expired { session_id } => {
                log::info!("Checkpointed session {session_id} already expired");
            }
            Recovery::Idle => log::debug!("No session to recover"),
        }
        recovery
    }

    pub async fn run_with_signals(&mut self) -> Result<()> {
        self.prepare().await;

        let sock_path = self.sock_path.clone();
        let ipc_handler = self.ipc_handler.clone();
        tokio::spawn(async move {
            if let Err(e) = listen(ipc_handler, &sock_path).await {
                log::error!("IPC listener failed: {e}");
            }
        });

        let mut interval = interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        log::info!(
            "Daemon started, polling every {}ms",
            self.poll_interval.as_millis()
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = tokio::signal::ctrl_c() => {
                    log::info!("Received Ctrl-C, shutting down...");
                    self.shutdown_signal.store(true, Ordering::SeqCst);
                }
            }

            if self.shutdown_signal.load(Ordering::SeqCst) {
                break;
            }
        }

        // The checkpoint stays on disk; the next start resumes the session
        if let Some(timer) = self.exemption_timer.take() {
            timer.abort();
        }
        if let Err(e) = self.enforcer.release().await {
            log::warn!("Failed to dismiss lock screen: {e}");
        }
        log::info!("Daemon shut down gracefully.");
        Ok(())
    }

    /// One poll: sample the foreground, decide, enforce.
    ///
    /// Returns `None` when no session is running.
    pub async fn tick(&mut self) -> Option<LockDecision> {
        let controller = Arc::clone(&self.controller);
        let now = controller.clock().now();
        let detected = self.detector.sample(now).await;

        if detected != self.last_foreground {
            if let Some(app) = &detected {
                log::debug!("Foreground: {app}");
            }
            self.last_foreground.clone_from(&detected);
            self.ipc_handler.set_current_app(detected.clone()).await;
        }

        // Held until enforcement is done so stop/expiry cannot interleave
        let view = controller.enforcement_view().await;
        let Some(session) = view.running() else {
            drop(view);
            self.forget_session();
            return None;
        };

        if self.active_session != Some(session.id) {
            self.forget_session();
            self.active_session = Some(session.id);
        }
        if self
            .exemption_timer
            .as_ref()
            .is_some_and(JoinHandle::is_finished)
        {
            self.exemption_timer = None;
            self.block_state.exemption_countdown = None;
        }

        let decision = self
            .policy
            .decide(session, &mut self.block_state, detected.as_deref(), now);
        self.apply(session, &decision, now).await;
        drop(view);

        Some(decision)
    }

    async fn apply(&mut self, session: &Session, decision: &LockDecision, now: DateTime<Utc>) {
        let Some(target) = decision.foreground_id.as_deref() else {
            return;
        };

        match decision.action {
            LockAction::Block => {
                log::debug!("Decision: block {target}");
                if let Err(e) = self.enforcer.enforce(target).await {
                    log::warn!("Enforcement failed for {target}: {e}");
                    // Retry on the next tick
                    self.block_state.currently_blocking = None;
                }
            }
            LockAction::Ignore if decision.refresh_block => {
                if let Err(e) = self.enforcer.refresh(target).await {
                    log::warn!("Lock screen refresh failed for {target}: {e}");
                }
            }
            LockAction::Ignore => {}
            LockAction::Allow => {
                if decision.cleared_block {
                    if let Err(e) = self.enforcer.release().await {
                        log::warn!("Failed to dismiss lock screen: {e}");
                    }
                }
                if decision.start_exemption_countdown {
                    match session.exempt_until.get(target) {
                        Some(until) => {
                            self.exemption_timer = Some(self.spawn_exemption_countdown(
                                session.id,
                                target.to_string(),
                                now,
                                *until,
                            ));
                        }
                        None => self.block_state.exemption_countdown = None,
                    }
                }
            }
        }
    }

    /// Drop per-session loop state.
    fn forget_session(&mut self) {
        if let Some(timer) = self.exemption_timer.take() {
            timer.abort();
        }
        self.block_state = BlockState::default();
        self.active_session = None;
    }

    fn spawn_exemption_countdown(
        &self,
        session_id: Uuid,
        app_id: ApplicationId,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> JoinHandle<()> {
        let controller = Arc::clone(&self.controller);
        let seconds = u64::try_from((until - now).num_seconds()).unwrap_or(0).max(1);
        log::info!("Exemption countdown for {app_id}: {seconds}s");

        tokio::spawn(async move {
            let mut countdown = Countdown::resume(until, seconds, now);
            let mut ticker = interval(controller.tick_period());
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match countdown.tick(controller.clock().now()) {
                    Tick::Progress(progress) => {
                        if let Err(e) = controller
                            .enforcer()
                            .notify_exemption_progress(&app_id, progress)
                            .await
                        {
                            log::warn!("Exemption progress failed: {e}");
                        }
                    }
                    Tick::Expired(progress) => {
                        if let Err(e) = controller
                            .enforcer()
                            .notify_exemption_progress(&app_id, progress)
                            .await
                        {
                            log::warn!("Exemption progress failed: {e}");
                        }
                        controller.revoke_exemption(session_id, &app_id).await;
                        break;
                    }
                    Tick::Inactive => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::enforcer::{EnforcerCall, RecordingEnforcer};
    use crate::monitor::scripted::ScriptedSource;
    use chrono::TimeZone;
    use std::collections::BTreeSet;

    const GAMES: &str = "com.example.games";
    const EDITOR: &str = "com.example.editor";
    const LAUNCHER: &str = "com.example.launcher";

    struct Harness {
        daemon: Daemon,
        source: ScriptedSource,
        clock: Arc<ManualClock>,
        enforcer: Arc<RecordingEnforcer>,
    }

    impl Harness {
        async fn new() -> Self {
            let source = ScriptedSource::new();
            source.set_home(LAUNCHER);
            let clock = Arc::new(ManualClock::new(
                Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap(),
            ));
            let enforcer = Arc::new(RecordingEnforcer::new(Arc::new(EventLog::new())));
            let mut daemon = Daemon::with_parts(
                Arc::new(Database::open_in_memory().unwrap()),
                &MonitorConfig::default(),
                Box::new(source.clone()),
                enforcer.clone(),
                clock.clone(),
                PathBuf::from("/nonexistent/trease.sock"),
            );
            assert_eq!(daemon.prepare().await, Recovery::Idle);
            Self {
                daemon,
                source,
                clock,
                enforcer,
            }
        }

        async fn start(&self, locked: &[&str], seconds: u64) -> Uuid {
            let locked: BTreeSet<String> = locked.iter().map(ToString::to_string).collect();
            self.daemon
                .controller()
                .start_session("oak".to_string(), locked, seconds)
                .await
                .unwrap()
                .session_id
        }

        /// Advance one poll interval and put `app` in front.
        async fn front(&mut self, app: &str) -> Option<LockDecision> {
            self.clock.advance(chrono::Duration::milliseconds(150));
            self.source.bring_to_front(app, self.clock.now());
            self.daemon.tick().await
        }
    }

    #[tokio::test]
    async fn test_block_then_home_screen() {
        let mut h = Harness::new().await;
        h.start(&[GAMES], 1500).await;

        let first = h.front(GAMES).await.unwrap();
        assert_eq!(first.action, LockAction::Block);

        // Same app keeps reappearing: one lock screen, refreshed
        let again = h.front(GAMES).await.unwrap();
        assert_eq!(again.action, LockAction::Ignore);
        assert!(again.refresh_block);
        assert_eq!(h.enforcer.enforce_count(GAMES), 1);

        let home = h.front(LAUNCHER).await.unwrap();
        assert_eq!(home.action, LockAction::Allow);
        assert!(home.is_home_screen);
        assert!(home.cleared_block);
        assert_eq!(h.daemon.block_state.currently_blocking, None);
        assert_eq!(h.enforcer.calls().last(), Some(&EnforcerCall::Release));

        let other = h.front(EDITOR).await.unwrap();
        assert_eq!(other.action, LockAction::Allow);
        assert_eq!(h.enforcer.enforce_count(GAMES), 1);

        let back = h.front(GAMES).await.unwrap();
        assert_eq!(back.action, LockAction::Block);
        assert_eq!(h.enforcer.enforce_count(GAMES), 2);
    }

    #[tokio::test]
    async fn test_unlocked_app_is_allowed() {
        let mut h = Harness::new().await;
        h.start(&[GAMES], 1500).await;

        let decision = h.front(EDITOR).await.unwrap();
        assert_eq!(decision.action, LockAction::Allow);
        assert!(h.enforcer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_no_block_after_stop() {
        let mut h = Harness::new().await;
        h.start(&[GAMES], 1500).await;
        assert_eq!(h.front(GAMES).await.unwrap().action, LockAction::Block);

        h.daemon.controller().stop_session().await;
        assert_eq!(h.front(GAMES).await, None);
        assert_eq!(h.front(GAMES).await, None);
        assert_eq!(h.enforcer.enforce_count(GAMES), 1);
        assert_eq!(h.daemon.active_session, None);
    }

    #[tokio::test]
    async fn test_no_block_after_expiry() {
        let mut h = Harness::new().await;
        let session_id = h.start(&[GAMES], 60).await;

        h.clock.advance(chrono::Duration::seconds(61));
        assert!(h
            .daemon
            .controller()
            .tick_session(session_id)
            .await
            .is_break());

        assert_eq!(h.front(GAMES).await, None);
        assert_eq!(h.enforcer.enforce_count(GAMES), 0);
    }

    #[tokio::test]
    async fn test_failed_enforcement_is_retried() {
        let mut h = Harness::new().await;
        h.start(&[GAMES], 1500).await;

        h.enforcer.fail_enforce(true);
        assert_eq!(h.front(GAMES).await.unwrap().action, LockAction::Block);
        assert_eq!(h.daemon.block_state.currently_blocking, None);

        h.enforcer.fail_enforce(false);
        assert_eq!(h.front(GAMES).await.unwrap().action, LockAction::Block);
        assert_eq!(h.enforcer.enforce_count(GAMES), 2);
        assert_eq!(
            h.daemon.block_state.currently_blocking.as_deref(),
            Some(GAMES)
        );
    }

    #[tokio::test]
    async fn test_exemption_lets_app_through() {
        let mut h = Harness::new().await;
        h.start(&[GAMES], 1500).await;
        assert_eq!(h.front(GAMES).await.unwrap().action, LockAction::Block);

        h.daemon
            .controller()
            .grant_exemption(GAMES, 30)
            .await
            .unwrap();
        let decision = h.front(GAMES).await.unwrap();
        assert_eq!(decision.action, LockAction::Allow);
        assert!(decision.is_exempt);
        assert!(decision.cleared_block);
        assert!(decision.start_exemption_countdown);
        assert!(h.daemon.exemption_timer.is_some());

        // Exemption over: locked again
        h.clock.advance(chrono::Duration::seconds(31));
        assert_eq!(h.front(GAMES).await.unwrap().action, LockAction::Block);
    }

    #[tokio::test]
    async fn test_new_session_resets_block_state() {
        let mut h = Harness::new().await;
        h.start(&[GAMES], 1500).await;
        assert_eq!(h.front(GAMES).await.unwrap().action, LockAction::Block);

        h.start(&[GAMES], 600).await;
        // Fresh session: the stale indicator must not swallow the block
        assert_eq!(h.front(GAMES).await.unwrap().action, LockAction::Block);
        assert_eq!(h.enforcer.enforce_count(GAMES), 2);
    }
}
