use super::command::run_tool;
use super::SourceError;
use crate::snapshot::Identity;
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::{System, SystemExt};
use tracing::debug;

const KERNEL_FAMILY_FALLBACK: &str = "Linux";

pub trait IdentitySource: Send + Sync {
    fn identity(&self) -> Result<Identity, SourceError>;
}

pub struct NativeIdentity {
    proc_root: PathBuf,
    os_release: PathBuf,
}

impl NativeIdentity {
    pub fn new(proc_root: impl Into<PathBuf>, os_release: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            os_release: os_release.into(),
        }
    }
}

impl IdentitySource for NativeIdentity {
    fn identity(&self) -> Result<Identity, SourceError> {
        let system = System::new();
        let os_name = read_os_release(&self.os_release).or_else(|| {
            fs::read_to_string(self.proc_root.join("sys/kernel/ostype"))
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        });
        let uptime_secs = system.uptime();

        Ok(Identity {
            os_name: Some(os_name.unwrap_or_else(|| KERNEL_FAMILY_FALLBACK.to_string())),
            kernel: system.kernel_version(),
            hostname: system.host_name(),
            uptime_secs: Some(uptime_secs),
            uptime_human: Some(humanize_uptime(uptime_secs)),
            now: Local::now(),
        })
    }
}

pub struct ToolIdentity {
    os_release: PathBuf,
}

impl ToolIdentity {
    pub fn new(os_release: impl Into<PathBuf>) -> Self {
        Self {
            os_release: os_release.into(),
        }
    }
}

impl IdentitySource for ToolIdentity {
    fn identity(&self) -> Result<Identity, SourceError> {
        let os_name = read_os_release(&self.os_release)
            .or_else(|| tool_line("uname", &["-s"]))
            .unwrap_or_else(|| KERNEL_FAMILY_FALLBACK.to_string());

        Ok(Identity {
            os_name: Some(os_name),
            kernel: tool_line("uname", &["-r"]),
            hostname: tool_line("hostname", &[]),
            uptime_secs: None,
            uptime_human: tool_line("uptime", &["-p"]).map(|s| strip_up_prefix(&s).to_string()),
            now: Local::now(),
        })
    }
}

fn tool_line(tool: &str, args: &[&str]) -> Option<String> {
    match run_tool(tool, args) {
        Ok(out) => Some(out.trim().to_string()).filter(|s| !s.is_empty()),
        Err(err) => {
            debug!(tool, error = %err, "identity field unavailable");
            None
        }
    }
}

fn read_os_release(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(text) => parse_os_release(&text),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "os-release not readable");
            None
        }
    }
}

/// `PRETTY_NAME`, else `NAME`, from an os-release document.
pub fn parse_os_release(text: &str) -> Option<String> {
    let mut name = None;
    let mut pretty = None;
    for line in text.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches(|c: char| c == '"' || c == '\'').trim();
        if value.is_empty() {
            continue;
        }
        match key.trim() {
            "PRETTY_NAME" => pretty = Some(value.to_string()),
            "NAME" => name = Some(value.to_string()),
            _ => {}
        }
    }
    pretty.or(name)
}

/// Uptime at minute resolution, e.g. `3days 4h 12m`.
pub fn humanize_uptime(secs: u64) -> String {
    let rounded = if secs >= 60 { secs - secs % 60 } else { secs };
    humantime::format_duration(Duration::from_secs(rounded)).to_string()
}

pub fn strip_up_prefix(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed.strip_prefix("up ").unwrap_or(trimmed).trim_start()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pretty_name_wins_over_name() {
        let text = "NAME=\"Debian GNU/Linux\"\nVERSION_ID=\"12\"\nPRETTY_NAME=\"Debian GNU/Linux 12 (bookworm)\"\n";
        assert_eq!(
            parse_os_release(text).as_deref(),
            Some("Debian GNU/Linux 12 (bookworm)")
        );
    }

    #[test]
    fn name_used_without_pretty_name() {
        assert_eq!(parse_os_release("NAME=Alpine\n").as_deref(), Some("Alpine"));
        assert_eq!(parse_os_release("# empty\n"), None);
    }

    #[test]
    fn uptime_prefix_is_stripped() {
        assert_eq!(strip_up_prefix("up 2 days, 3 hours\n"), "2 days, 3 hours");
        assert_eq!(strip_up_prefix("5 minutes"), "5 minutes");
    }

    #[test]
    fn uptime_is_humanized_to_minutes() {
        assert_eq!(humanize_uptime(90_061), "1day 1h 1m");
        assert_eq!(humanize_uptime(42), "42s");
    }

    #[test]
    fn os_name_falls_back_to_kernel_family() {
        let dir = tempfile::tempdir().unwrap();
        let proc_root = dir.path().join("proc");
        std::fs::create_dir_all(proc_root.join("sys/kernel")).unwrap();
        std::fs::write(proc_root.join("sys/kernel/ostype"), "Linux\n").unwrap();

        let source = NativeIdentity::new(&proc_root, dir.path().join("missing-os-release"));
        let identity = source.identity().unwrap();
        assert_eq!(identity.os_name.as_deref(), Some("Linux"));
    }
}
