//! Helper utility functions for CLI commands

use chrono::{DateTime, Local, Utc};
use trease_core::events::UiEvent;

/// Safely truncate a string to a maximum number of characters (not bytes).
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    let char_count = s.chars().count();
    if char_count > max_chars {
        let truncated: String = s.chars().take(max_chars).collect();
        format!("{truncated}...")
    } else {
        s.to_string()
    }
}

/// `1h 05m`, `25m 00s`, `42s`.
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else if minutes > 0 {
        format!("{minutes}m {secs:02}s")
    } else {
        format!("{secs}s")
    }
}

pub fn format_local(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn describe_event(event: &UiEvent) -> String {
    match event {
        UiEvent::SessionStarted {
            session_id,
            subject_id,
        } => format!("session {session_id} started ({subject_id})"),
        UiEvent::LockScreen { target } => format!("lock screen for {target}"),
        UiEvent::LockScreenRefresh { target } => format!("lock screen raised again for {target}"),
        UiEvent::LockScreenDismissed => "lock screen dismissed".to_string(),
        UiEvent::Progress(progress) => format!(
            "{} left ({:.0}%)",
            format_duration(progress.remaining_seconds),
            progress.fraction_elapsed * 100.0
        ),
        UiEvent::ExemptionProgress { app_id, progress } => format!(
            "{app_id} exempt for {}",
            format_duration(progress.remaining_seconds)
        ),
        UiEvent::SessionEnded {
            session_id,
            outcome,
        } => format!("session {session_id} {outcome}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trease_core::timer::Progress;

    #[test]
    fn test_truncate_str_short() {
        assert_eq!(truncate_str("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_str_long() {
        assert_eq!(truncate_str("hello world", 5), "hello...");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(42), "42s");
        assert_eq!(format_duration(1500), "25m 00s");
        assert_eq!(format_duration(3900), "1h 05m");
    }

    #[test]
    fn test_describe_event() {
        assert_eq!(
            describe_event(&UiEvent::LockScreen {
                target: "steam".to_string()
            }),
            "lock screen for steam"
        );
        assert_eq!(
            describe_event(&UiEvent::Progress(Progress {
                remaining_seconds: 90,
                fraction_elapsed: 0.5
            })),
            "1m 30s left (50%)"
        );
    }
}
