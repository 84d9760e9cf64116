use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cocoa::base::{id, nil};
use cocoa::foundation::NSAutoreleasePool;
use objc::{class, msg_send, sel, sel_impl};
use tokio::process::Command;

use super::probe::ProbeLog;
use super::{ActivityEvent, ActivitySource, UsageStat};
use crate::session::ApplicationId;

/// Frontmost-application probe keyed by bundle identifier.
pub struct MacOSActivitySource {
    log: ProbeLog,
}

impl MacOSActivitySource {
    #[must_use]
    pub fn new(window: std::time::Duration) -> Self {
        Self {
            log: ProbeLog::new(window),
        }
    }

    fn frontmost_bundle_id() -> Option<ApplicationId> {
        unsafe {
            let _pool = NSAutoreleasePool::new(nil);

            let workspace: id = msg_send![class!(NSWorkspace), sharedWorkspace];
            let frontmost_app: id = msg_send![workspace, frontmostApplication];
            if frontmost_app == nil {
                return None;
            }

            let bundle_id: id = msg_send![frontmost_app, bundleIdentifier];
            if bundle_id.is_null() {
                return None;
            }
            let bytes: *const u8 = msg_send![bundle_id, UTF8String];
            if bytes.is_null() {
                return None;
            }
            let len: usize = msg_send![bundle_id, lengthOfBytesUsingEncoding: 4_usize];
            let slice = std::slice::from_raw_parts(bytes, len);
            Some(String::from_utf8_lossy(slice).to_string())
        }
    }

    async fn focused_app() -> Option<ApplicationId> {
        let script = r#"
            tell application "System Events"
                return bundle identifier of first application process whose frontmost is true
            end tell
        "#;

        let output = Command::new("osascript")
            .arg("-e")
            .arg(script)
            .output()
            .await;

        if let Ok(output) = output {
            if output.status.success() {
                let bundle_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !bundle_id.is_empty() {
                    return Some(bundle_id);
                }
            }
        }

        // Fallback to Cocoa API if AppleScript fails
        Self::frontmost_bundle_id()
    }
}

#[async_trait]
impl ActivitySource for MacOSActivitySource {
    async fn query_events(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<ActivityEvent>> {
        let focused = Self::focused_app().await;
        self.log.record(focused, until);
        Ok(self.log.events(since, until))
    }

    async fn query_usage(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<UsageStat>> {
        Ok(self.log.usage(since, until))
    }

    async fn home_screen_id(&self) -> Result<Option<ApplicationId>> {
        Ok(Some("com.apple.finder".to_string()))
    }
}
