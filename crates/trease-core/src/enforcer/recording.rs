use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::Enforcer;
use crate::events::EventLog;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnforcerCall {
    Enforce(String),
    Refresh(String),
    Release,
}

/// Enforcer that only remembers what it was asked to do.
///
/// Lets daemon and controller tests count lock screens without touching
/// real processes.
pub struct RecordingEnforcer {
    events: Arc<EventLog>,
    calls: Mutex<Vec<EnforcerCall>>,
    failing: AtomicBool,
}

impl RecordingEnforcer {
    #[must_use]
    pub fn new(events: Arc<EventLog>) -> Self {
        Self {
            events,
            calls: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    fn record(&self, call: EnforcerCall) {
        match self.calls.lock() {
            Ok(mut calls) => calls.push(call),
            Err(poisoned) => poisoned.into_inner().push(call),
        }
    }

    #[must_use]
    pub fn calls(&self) -> Vec<EnforcerCall> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    #[must_use]
    pub fn enforce_count(&self, target: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, EnforcerCall::Enforce(t) if t == target))
            .count()
    }

    /// Make every following `enforce` fail until switched back.
    pub fn fail_enforce(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Enforcer for RecordingEnforcer {
    async fn enforce(&self, target: &str) -> Result<()> {
        self.record(EnforcerCall::Enforce(target.to_string()));
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("lock screen could not be shown for {target}");
        }
        Ok(())
    }

    async fn refresh(&self, target: &str) -> Result<()> {
        self.record(EnforcerCall::Refresh(target.to_string()));
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        self.record(EnforcerCall::Release);
        Ok(())
    }

    fn events(&self) -> &EventLog {
        &self.events
    }
}
