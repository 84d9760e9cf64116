//! Installed-application catalog, used to turn an allow-list into the
//! locked set of a session.

use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::session::ApplicationId;

/// Well-known GUI executables that often ship without a `.desktop` entry.
const COMMON_EXECUTABLES: &[&str] = &[
    "firefox",
    "chromium",
    "google-chrome",
    "code",
    "slack",
    "discord",
    "steam",
    "spotify",
    "telegram-desktop",
    "thunderbird",
    "vlc",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    pub name: String,
    pub app_id: ApplicationId,
}

struct DesktopEntryParser {
    name: Regex,
    exec: Regex,
    no_display: Regex,
}

impl DesktopEntryParser {
    fn new() -> Result<Self> {
        Ok(Self {
            name: Regex::new(r"(?m)^Name=(.+)$")?,
            exec: Regex::new(r"(?m)^Exec=(.+)$")?,
            no_display: Regex::new(r"(?m)^NoDisplay=true\s*$")?,
        })
    }

    fn parse(&self, contents: &str) -> Option<AppInfo> {
        if self.no_display.is_match(contents) {
            return None;
        }
        let name = self.name.captures(contents)?.get(1)?.as_str().trim();
        let exec = self.exec.captures(contents)?.get(1)?.as_str();
        let app_id = exec_identifier(exec)?;
        Some(AppInfo {
            name: name.to_string(),
            app_id,
        })
    }
}

/// Longest name the kernel keeps for a process (`TASK_COMM_LEN` minus the NUL).
const COMM_MAX_LEN: usize = 15;

/// Basename of the program an `Exec=` line launches.
fn exec_identifier(exec: &str) -> Option<ApplicationId> {
    let program = exec
        .split_whitespace()
        .filter(|token| !token.starts_with('%'))
        .find(|token| *token != "env" && !token.contains('='))?;
    program_basename(program)
}

fn program_basename(program: &str) -> Option<ApplicationId> {
    let program = program.trim_matches('"');
    Path::new(program)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .filter(|name| !name.is_empty())
}

/// Identifier of a running process, in the same form `.desktop` scanning
/// produces.
///
/// `comm` is the kernel's process name, cut to 15 bytes. A name at that
/// limit is widened to the `argv[0]` basename it is a prefix of, so
/// `telegram-deskto` becomes `telegram-desktop` again.
#[must_use]
pub fn process_identifier(comm: &str, argv0: Option<&str>) -> Option<ApplicationId> {
    let comm = comm.trim();
    if comm.is_empty() {
        return None;
    }
    if comm.len() >= COMM_MAX_LEN {
        let full = argv0
            .and_then(|arg| arg.split_whitespace().next())
            .and_then(program_basename)
            .filter(|full| full.len() > comm.len() && full.starts_with(comm));
        if full.is_some() {
            return full;
        }
    }
    Some(comm.to_string())
}

/// Launchable applications from `.desktop` files under `dirs`.
///
/// The first entry seen for an identifier wins.
///
/// # Errors
///
/// Returns an error only if the entry patterns fail to compile.
pub fn scan_desktop_entries(dirs: &[PathBuf]) -> Result<Vec<AppInfo>> {
    let parser = DesktopEntryParser::new()?;
    let mut seen = HashSet::new();
    let mut apps = Vec::new();

    for dir in dirs {
        if !dir.exists() {
            log::debug!("Skipping missing application dir {}", dir.display());
            continue;
        }
        let mut entries: Vec<PathBuf> = WalkDir::new(dir)
            .follow_links(true)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "desktop"))
            .map(walkdir::DirEntry::into_path)
            .collect();
        entries.sort();

        for path in entries {
            let contents = match std::fs::read_to_string(&path) {
                Ok(contents) => contents,
                Err(e) => {
                    log::debug!("Unreadable desktop entry {}: {e}", path.display());
                    continue;
                }
            };
            if let Some(app) = parser.parse(&contents) {
                if seen.insert(app.app_id.clone()) {
                    apps.push(app);
                }
            }
        }
    }
    Ok(apps)
}

/// Well-known executables present in `bin_dir`.
#[must_use]
pub fn common_executables(bin_dir: &Path) -> Vec<AppInfo> {
    COMMON_EXECUTABLES
        .iter()
        .filter(|name| bin_dir.join(name).exists())
        .map(|name| AppInfo {
            name: (*name).to_string(),
            app_id: (*name).to_string(),
        })
        .collect()
}

/// Everything the user could launch: desktop entries, then well-known
/// binaries from `/usr/bin` not already listed.
///
/// # Errors
///
/// See [`scan_desktop_entries`].
pub fn installed_apps(dirs: &[PathBuf]) -> Result<Vec<AppInfo>> {
    let mut apps = scan_desktop_entries(dirs)?;
    let known: HashSet<ApplicationId> = apps.iter().map(|a| a.app_id.clone()).collect();
    apps.extend(
        common_executables(Path::new("/usr/bin"))
            .into_iter()
            .filter(|a| !known.contains(&a.app_id)),
    );
    Ok(apps)
}

/// Invert an allow-list: every installed app that is not allowed and is not
/// the controlling UI itself.
#[must_use]
pub fn locked_set_from_allow_list(
    installed: &[AppInfo],
    allowed: &BTreeSet<ApplicationId>,
    self_id: &str,
) -> BTreeSet<ApplicationId> {
    installed
        .iter()
        .map(|a| a.app_id.clone())
        .filter(|id| id != self_id && !allowed.contains(id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_entry(dir: &Path, file: &str, body: &str) {
        fs::write(dir.join(file), body).unwrap();
    }

    #[test]
    fn test_exec_identifier() {
        assert_eq!(
            exec_identifier("/usr/bin/firefox %u").as_deref(),
            Some("firefox")
        );
        assert_eq!(
            exec_identifier("env GDK_BACKEND=x11 /opt/app/bin/slack %U").as_deref(),
            Some("slack")
        );
        assert_eq!(exec_identifier("%F"), None);
    }

    #[test]
    fn test_scan_desktop_entries() {
        let dir = tempfile::tempdir().unwrap();
        write_entry(
            dir.path(),
            "a-firefox.desktop",
            "[Desktop Entry]\nName=Firefox\nExec=/usr/bin/firefox %u\n",
        );
        write_entry(
            dir.path(),
            "b-firefox-private.desktop",
            "[Desktop Entry]\nName=Firefox Private\nExec=firefox --private-window\n",
        );
        write_entry(
            dir.path(),
            "c-hidden.desktop",
            "[Desktop Entry]\nName=Helper\nExec=helper\nNoDisplay=true\n",
        );
        write_entry(dir.path(), "notes.txt", "Name=Nope\nExec=nope\n");

        let apps = scan_desktop_entries(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(
            apps,
            vec![AppInfo {
                name: "Firefox".to_string(),
                app_id: "firefox".to_string()
            }]
        );
    }

    #[test]
    fn test_process_identifier_widens_cut_names() {
        assert_eq!(
            process_identifier("telegram-deskto", Some("/usr/bin/telegram-desktop")).as_deref(),
            Some("telegram-desktop")
        );
        // Short names are already whole
        assert_eq!(
            process_identifier("firefox", Some("/usr/lib/firefox/firefox")).as_deref(),
            Some("firefox")
        );
        // A renamed process keeps its own name
        assert_eq!(
            process_identifier("Isolated Web Co", Some("/usr/lib/firefox/firefox")).as_deref(),
            Some("Isolated Web Co")
        );
        assert_eq!(
            process_identifier("telegram-deskto", None).as_deref(),
            Some("telegram-deskto")
        );
        assert_eq!(process_identifier("  ", None), None);
    }

    #[test]
    fn test_long_exec_name_matches_running_process() {
        let dir = tempfile::tempdir().unwrap();
        write_entry(
            dir.path(),
            "telegram.desktop",
            "[Desktop Entry]\nName=Telegram\nExec=telegram-desktop -- %u\n",
        );
        let installed = scan_desktop_entries(&[dir.path().to_path_buf()]).unwrap();
        let locked = locked_set_from_allow_list(&installed, &BTreeSet::new(), "trease");

        let detected =
            process_identifier("telegram-deskto", Some("/usr/bin/telegram-desktop")).unwrap();
        assert!(locked.contains(&detected));
    }

    #[test]
    fn test_missing_dirs_are_skipped() {
        let apps = scan_desktop_entries(&[PathBuf::from("/nonexistent/applications")]).unwrap();
        assert!(apps.is_empty());
    }

    #[test]
    fn test_common_executables() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("steam"), "").unwrap();
        let apps = common_executables(dir.path());
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].app_id, "steam");
    }

    #[test]
    fn test_allow_list_inversion_excludes_self() {
        let installed: Vec<AppInfo> = ["firefox", "steam", "trease", "code"]
            .iter()
            .map(|id| AppInfo {
                name: (*id).to_string(),
                app_id: (*id).to_string(),
            })
            .collect();
        let allowed = BTreeSet::from(["code".to_string()]);

        let locked = locked_set_from_allow_list(&installed, &allowed, "trease");
        assert_eq!(
            locked,
            BTreeSet::from(["firefox".to_string(), "steam".to_string()])
        );
    }
}
