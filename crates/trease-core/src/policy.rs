//! Per-tick allow/block decision.
//!
//! `LockPolicy::decide` is the only place that interprets a foreground
//! sample against the session. Its sole side effect is on `BlockState`,
//! the de-duplication fields owned by the polling loop.

use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::session::{ApplicationId, Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAction {
    Allow,
    Block,
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockDecision {
    pub foreground_id: Option<ApplicationId>,
    pub is_home_screen: bool,
    pub is_locked: bool,
    pub is_exempt: bool,
    pub action: LockAction,
    /// The blocked app came back to the front while its lock screen is up.
    pub refresh_block: bool,
    /// This call cleared the currently-blocking indicator.
    pub cleared_block: bool,
    /// Start the supplementary countdown for this exemption.
    pub start_exemption_countdown: bool,
}

impl LockDecision {
    fn new(foreground_id: Option<&str>, action: LockAction) -> Self {
        Self {
            foreground_id: foreground_id.map(ToString::to_string),
            is_home_screen: false,
            is_locked: false,
            is_exempt: false,
            action,
            refresh_block: false,
            cleared_block: false,
            start_exemption_countdown: false,
        }
    }
}

/// Mutable fields the polling loop keeps between ticks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockState {
    /// The app whose lock screen is currently up.
    pub currently_blocking: Option<ApplicationId>,
    /// The exemption that owns the supplementary countdown.
    pub exemption_countdown: Option<ApplicationId>,
}

impl BlockState {
    fn clear_block(&mut self) -> bool {
        self.currently_blocking.take().is_some()
    }
}

#[derive(Debug, Clone)]
pub struct LockPolicy {
    home_ids: HashSet<ApplicationId>,
    self_id: ApplicationId,
}

impl LockPolicy {
    #[must_use]
    pub fn new(home_ids: impl IntoIterator<Item = ApplicationId>, self_id: ApplicationId) -> Self {
        Self {
            home_ids: home_ids.into_iter().collect(),
            self_id,
        }
    }

    /// Add a launcher id reported by the platform at runtime.
    pub fn add_home_id(&mut self, id: ApplicationId) {
        self.home_ids.insert(id);
    }

    #[must_use]
    pub fn is_home_screen(&self, app_id: &str) -> bool {
        self.home_ids.contains(app_id)
    }

    #[must_use]
    pub fn decide(
        &self,
        session: &Session,
        state: &mut BlockState,
        detected: Option<&str>,
        now: DateTime<Utc>,
    ) -> LockDecision {
        let Some(app_id) = detected else {
            return LockDecision::new(None, LockAction::Ignore);
        };

        // Our own lock UI in front is transparent
        if app_id == self.self_id {
            return LockDecision::new(detected, LockAction::Ignore);
        }

        if self.is_home_screen(app_id) {
            let mut decision = LockDecision::new(detected, LockAction::Allow);
            decision.is_home_screen = true;
            decision.cleared_block = state.clear_block();
            return decision;
        }

        let is_locked = session.is_locked(app_id);
        let is_exempt = session.is_exempt(app_id, now);

        if !is_exempt && state.currently_blocking.as_deref() == Some(app_id) {
            let mut decision = LockDecision::new(detected, LockAction::Ignore);
            decision.is_locked = is_locked;
            decision.refresh_block = true;
            return decision;
        }

        if is_exempt {
            let mut decision = LockDecision::new(detected, LockAction::Allow);
            decision.is_locked = is_locked;
            decision.is_exempt = true;
            decision.cleared_block = state.clear_block();
            if state.exemption_countdown.is_none() {
                state.exemption_countdown = Some(app_id.to_string());
                decision.start_exemption_countdown = true;
            }
            return decision;
        }

        if is_locked {
            state.currently_blocking = Some(app_id.to_string());
            let mut decision = LockDecision::new(detected, LockAction::Block);
            decision.is_locked = true;
            return decision;
        }

        let mut decision = LockDecision::new(detected, LockAction::Allow);
        decision.cleared_block = state.clear_block();
        decision
    }
}
