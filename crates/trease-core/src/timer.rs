//! Countdown state machine behind every focus session.
//!
//! `Countdown` is pure: it never reads the clock itself, every transition
//! takes `now`. The controller owns one per session and drives it from a
//! one-second tokio interval.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Countdown lifecycle. `Expired` and `Cancelled` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerState {
    NotStarted,
    Running,
    Expired,
    Cancelled,
}

impl TimerState {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Expired | Self::Cancelled)
    }
}

/// Snapshot emitted on every tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub remaining_seconds: u64,
    pub fraction_elapsed: f64,
}

/// Result of feeding one tick to a running countdown.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tick {
    Progress(Progress),
    /// Final tick. Carries `remaining_seconds == 0` and `fraction_elapsed == 1.0`.
    Expired(Progress),
    /// The countdown is not running; nothing to report.
    Inactive,
}

#[derive(Debug, Clone)]
pub struct Countdown {
    state: TimerState,
    initial_seconds: u64,
    expires_at: Option<DateTime<Utc>>,
    last_fraction: f64,
}

impl Countdown {
    #[must_use]
    pub fn new(duration_seconds: u64) -> Self {
        Self {
            state: TimerState::NotStarted,
            initial_seconds: duration_seconds,
            expires_at: None,
            last_fraction: 0.0,
        }
    }

    /// Rebuild a countdown that was running before a restart.
    ///
    /// The deadline is taken from the checkpoint so a crash never extends
    /// the session. A deadline already in the past yields an `Expired`
    /// countdown that never entered `Running`.
    #[must_use]
    pub fn resume(
        expires_at: DateTime<Utc>,
        duration_seconds: u64,
        now: DateTime<Utc>,
    ) -> Self {
        let mut countdown = Self::new(duration_seconds);
        countdown.expires_at = Some(expires_at);
        if now >= expires_at {
            countdown.state = TimerState::Expired;
            countdown.last_fraction = 1.0;
        } else {
            countdown.state = TimerState::Running;
            countdown.last_fraction = countdown.fraction_for(countdown.remaining_at(now));
        }
        countdown
    }

    /// `NotStarted -> Running`. Returns `false` in any other state.
    pub fn start(&mut self, now: DateTime<Utc>) -> bool {
        if self.state != TimerState::NotStarted {
            return false;
        }
        let seconds = i64::try_from(self.initial_seconds).unwrap_or(i64::MAX);
        self.expires_at = Some(
            now.checked_add_signed(Duration::seconds(seconds))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        );
        self.state = TimerState::Running;
        true
    }

    /// Advance to `now`. Transitions to `Expired` once nothing remains.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Tick {
        if self.state != TimerState::Running {
            return Tick::Inactive;
        }
        let remaining = self.remaining_at(now);
        if remaining <= Duration::zero() {
            self.state = TimerState::Expired;
            self.last_fraction = 1.0;
            return Tick::Expired(Progress {
                remaining_seconds: 0,
                fraction_elapsed: 1.0,
            });
        }

        // Clock steps backwards must not make progress go backwards
        let fraction = self.fraction_for(remaining).max(self.last_fraction);
        self.last_fraction = fraction;
        Tick::Progress(Progress {
            remaining_seconds: ceil_seconds(remaining),
            fraction_elapsed: fraction,
        })
    }

    /// `Running -> Cancelled`. Returns `false` in any other state.
    pub fn cancel(&mut self) -> bool {
        if self.state != TimerState::Running {
            return false;
        }
        self.state = TimerState::Cancelled;
        true
    }

    #[must_use]
    pub fn state(&self) -> TimerState {
        self.state
    }

    /// Progress at `now` without advancing the state machine.
    #[must_use]
    pub fn progress(&self, now: DateTime<Utc>) -> Progress {
        match self.state {
            TimerState::NotStarted => Progress {
                remaining_seconds: self.initial_seconds,
                fraction_elapsed: 0.0,
            },
            TimerState::Running => Progress {
                remaining_seconds: self.remaining_seconds(now),
                fraction_elapsed: self
                    .fraction_for(self.remaining_at(now))
                    .max(self.last_fraction),
            },
            TimerState::Expired | TimerState::Cancelled => Progress {
                remaining_seconds: 0,
                fraction_elapsed: self.last_fraction,
            },
        }
    }

    /// Remaining whole seconds at `now`, rounded up; zero unless running.
    #[must_use]
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> u64 {
        if self.state != TimerState::Running {
            return 0;
        }
        ceil_seconds(self.remaining_at(now))
    }

    fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at
            .map_or_else(Duration::zero, |expires_at| expires_at - now)
    }

    #[allow(clippy::cast_precision_loss)]
    fn fraction_for(&self, remaining: Duration) -> f64 {
        if self.initial_seconds == 0 {
            return 1.0;
        }
        let remaining_ms = remaining.num_milliseconds().max(0) as f64;
        let initial_ms = self.initial_seconds as f64 * 1000.0;
        (1.0 - remaining_ms / initial_ms).clamp(0.0, 1.0)
    }
}

fn ceil_seconds(duration: Duration) -> u64 {
    let ms = duration.num_milliseconds().max(0);
    u64::try_from((ms + 999) / 1000).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_start_then_expire_exactly_on_deadline() {
        let mut countdown = Countdown::new(3);
        assert_eq!(countdown.state(), TimerState::NotStarted);
        assert!(countdown.start(t0()));
        assert!(!countdown.start(t0()));

        let mut fractions = Vec::new();
        for s in 1..=2 {
            match countdown.tick(t0() + Duration::seconds(s)) {
                Tick::Progress(p) => fractions.push(p.fraction_elapsed),
                other => panic!("unexpected tick {other:?}"),
            }
        }
        assert_eq!(countdown.state(), TimerState::Running);

        let last = countdown.tick(t0() + Duration::seconds(3));
        assert_eq!(
            last,
            Tick::Expired(Progress {
                remaining_seconds: 0,
                fraction_elapsed: 1.0
            })
        );
        assert_eq!(countdown.state(), TimerState::Expired);
        assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
        assert!(fractions.iter().all(|f| *f < 1.0));
    }

    #[test]
    fn test_progress_is_monotonic_for_many_durations() {
        for duration in [1_u64, 2, 7, 60, 1500] {
            let mut countdown = Countdown::new(duration);
            countdown.start(t0());
            let mut last = 0.0;
            let mut expired_at = None;
            for s in 1..=(duration + 5) {
                let now = t0() + Duration::seconds(i64::try_from(s).unwrap());
                match countdown.tick(now) {
                    Tick::Progress(p) => {
                        assert!(p.fraction_elapsed >= last);
                        assert!(p.remaining_seconds > 0);
                        last = p.fraction_elapsed;
                    }
                    Tick::Expired(p) => {
                        assert!((p.fraction_elapsed - 1.0).abs() < f64::EPSILON);
                        expired_at = Some(s);
                    }
                    Tick::Inactive => {}
                }
            }
            assert_eq!(expired_at, Some(duration), "duration {duration}");
        }
    }

    #[test]
    fn test_cancel_only_while_running() {
        let mut countdown = Countdown::new(10);
        assert!(!countdown.cancel());
        countdown.start(t0());
        assert!(countdown.cancel());
        assert_eq!(countdown.state(), TimerState::Cancelled);
        assert!(!countdown.cancel());
        assert_eq!(countdown.tick(t0() + Duration::seconds(20)), Tick::Inactive);
        assert_eq!(countdown.state(), TimerState::Cancelled);
    }

    #[test]
    fn test_resume_uses_checkpoint_deadline() {
        let started = t0();
        let expires = started + Duration::seconds(1500);
        let now = expires - Duration::seconds(5);

        let countdown = Countdown::resume(expires, 1500, now);
        assert_eq!(countdown.state(), TimerState::Running);
        assert_eq!(countdown.remaining_seconds(now), 5);
    }

    #[test]
    fn test_resume_after_deadline_is_expired() {
        let started = t0();
        let expires = started + Duration::seconds(60);

        let mut countdown = Countdown::resume(expires, 60, expires);
        assert_eq!(countdown.state(), TimerState::Expired);
        assert_eq!(countdown.tick(expires), Tick::Inactive);
        assert!(!countdown.cancel());
    }

    #[test]
    fn test_backwards_clock_does_not_regress_progress() {
        let mut countdown = Countdown::new(100);
        countdown.start(t0());
        let Tick::Progress(ahead) = countdown.tick(t0() + Duration::seconds(50)) else {
            panic!("expected progress");
        };
        let Tick::Progress(behind) = countdown.tick(t0() + Duration::seconds(40)) else {
            panic!("expected progress");
        };
        assert!(behind.fraction_elapsed >= ahead.fraction_elapsed);
    }
}
