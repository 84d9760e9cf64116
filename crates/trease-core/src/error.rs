use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a control message is refused.
///
/// These are the only failures reported back to the UI; everything that
/// goes wrong inside the polling or countdown loops is logged instead.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ControlError {
    #[error("session duration must be at least one second")]
    InvalidDuration,
    #[error("session subject must not be empty")]
    EmptySubject,
    #[error("no focus session is running")]
    NoRunningSession,
    #[error("{0} is not locked in the running session")]
    NotLocked(String),
    #[error("exemption length must be at least one second")]
    InvalidExemption,
}
