use crate::collectors::auth_log::collect_failed_logins;
use crate::collectors::cpu::collect_cpu;
use crate::collectors::disk::collect_disks;
use crate::collectors::identity::IdentitySource;
use crate::collectors::memory::collect_memory;
use crate::collectors::network::collect_network;
use crate::collectors::privilege::is_privileged_user;
use crate::collectors::process::{top_by_cpu, top_by_memory, ProcessSource};
use crate::collectors::session::collect_sessions;
use crate::collectors::{SourceError, Sources};
use crate::config::Config;
use crate::render::{self, Palette};
use crate::snapshot::{
    CpuReport, DiskReport, FailedLoginReport, Identity, MemoryReport, NetworkReport, ProcessEntry,
    Section, SessionReport,
};
use chrono::Local;
use serde::Serialize;
use tokio::task::{self, JoinHandle};
use tracing::{debug, error};

/// Everything one run collects, in display order.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub privileged: bool,
    pub identity: Section<Identity>,
    pub cpu: Section<CpuReport>,
    pub memory: Section<MemoryReport>,
    pub disk: Section<DiskReport>,
    pub top_cpu: Section<Vec<ProcessEntry>>,
    pub top_memory: Section<Vec<ProcessEntry>>,
    pub sessions: Section<SessionReport>,
    pub failed_logins: Section<FailedLoginReport>,
    pub network: Section<NetworkReport>,
}

/// Runs every collector on the blocking pool and gathers the results.
///
/// Collectors run concurrently; a failing or panicking one only marks its own
/// section unavailable.
pub async fn collect(sources: &Sources, cfg: &Config) -> Report {
    let privileged = is_privileged_user();

    let identity = {
        let src = sources.identity.clone();
        task::spawn_blocking(move || src.identity())
    };
    let cpu = {
        let src = sources.cpu.clone();
        let sample = cfg.cpu_sample;
        task::spawn_blocking(move || collect_cpu(src.as_ref(), sample))
    };
    let memory = {
        let src = sources.memory.clone();
        task::spawn_blocking(move || collect_memory(src.as_ref()))
    };
    let disk = {
        let src = sources.disk.clone();
        task::spawn_blocking(move || collect_disks(src.as_ref()))
    };
    let processes = {
        let src = sources.process.clone();
        task::spawn_blocking(move || src.processes())
    };
    let sessions = {
        let src = sources.session.clone();
        let limit = cfg.session_limit;
        task::spawn_blocking(move || collect_sessions(src.as_ref(), limit))
    };
    let failed_logins = {
        let src = sources.auth_log.clone();
        let marker = cfg.failed_login_marker.clone();
        let tail = cfg.failed_login_tail;
        let now = Local::now().naive_local();
        task::spawn_blocking(move || collect_failed_logins(src.as_ref(), &marker, now, tail))
    };
    let network = {
        let src = sources.network.clone();
        let limit = cfg.listener_limit;
        task::spawn_blocking(move || Ok::<_, SourceError>(collect_network(src.as_ref(), limit)))
    };

    let identity = join("identity", identity).await;
    let cpu = join("cpu", cpu).await;
    let memory = join("memory", memory).await;
    let disk = join("disk", disk).await;
    let processes = join("processes", processes).await;
    let sessions = join("sessions", sessions).await;
    let failed_logins = join("failed_logins", failed_logins).await;
    let network = join("network", network).await;

    let top = cfg.top_processes;
    Report {
        privileged,
        identity,
        cpu,
        memory,
        disk,
        top_cpu: processes.as_ref().map(|p| top_by_cpu(p, top)),
        top_memory: processes.as_ref().map(|p| top_by_memory(p, top)),
        sessions,
        failed_logins,
        network,
    }
}

async fn join<T>(name: &'static str, handle: JoinHandle<Result<T, SourceError>>) -> Section<T> {
    match handle.await {
        Ok(result) => {
            if let Err(err) = &result {
                debug!(section = name, error = %err, "section unavailable");
            }
            Section::from(result)
        }
        Err(err) => {
            error!(section = name, error = %err, "collector task failed");
            Section::Unavailable(format!("collector task failed: {err}"))
        }
    }
}

pub fn render_report(report: &Report, palette: Palette) -> String {
    let mut out = Vec::new();
    if report.privileged {
        out.push(render::privilege_warning(palette));
    }

    let mut section = |title: &str, lines: Vec<String>| {
        if !out.is_empty() {
            out.push(String::new());
        }
        out.extend(render::header(title, palette));
        out.extend(lines);
    };

    section(
        "System",
        render::section_lines(&report.identity, palette, render::identity_lines),
    );
    section(
        "CPU",
        render::section_lines(&report.cpu, palette, render::cpu_lines),
    );
    section(
        "Memory",
        render::section_lines(&report.memory, palette, render::memory_lines),
    );
    section(
        "Disk",
        render::section_lines(&report.disk, palette, render::disk_lines),
    );
    section(
        "Top processes by CPU",
        render::section_lines(&report.top_cpu, palette, |p, pal| render::process_lines(p, pal)),
    );
    section(
        "Top processes by memory",
        render::section_lines(&report.top_memory, palette, |p, pal| {
            render::process_lines(p, pal)
        }),
    );
    section(
        "Sessions",
        render::section_lines(&report.sessions, palette, render::session_lines),
    );
    section(
        "Failed logins",
        render::failed_login_lines(&report.failed_logins, palette),
    );
    section(
        "Network",
        render::section_lines(&report.network, palette, render::network_lines),
    );

    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::auth_log::FileAuthLog;
    use crate::collectors::cpu::CpuSource;
    use crate::collectors::disk::DiskSource;
    use crate::collectors::memory::MemorySource;
    use crate::collectors::network::NetworkSource;
    use crate::collectors::session::SessionSource;
    use crate::snapshot::{
        CpuSnapshot, DiskTable, InterfaceAddress, LoadAverage, MemorySnapshot, NetworkListener,
        UserSession,
    };
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    struct FakeIdentity;

    impl IdentitySource for FakeIdentity {
        fn identity(&self) -> Result<Identity, SourceError> {
            Ok(Identity {
                os_name: Some("Debian GNU/Linux 12 (bookworm)".to_string()),
                kernel: Some("6.1.0-26-amd64".to_string()),
                hostname: Some("web01".to_string()),
                uptime_secs: Some(90_060),
                uptime_human: Some("1day 1h 1m".to_string()),
                now: Local::now(),
            })
        }
    }

    struct FakeCpu;

    impl CpuSource for FakeCpu {
        fn counters(&self) -> Result<CpuSnapshot, SourceError> {
            Ok(CpuSnapshot {
                user: 300,
                system: 100,
                idle: 600,
                ..CpuSnapshot::default()
            })
        }

        fn sample_usage(&self, _interval: Duration) -> Option<f64> {
            None
        }

        fn core_count(&self) -> usize {
            4
        }

        fn load_average(&self) -> LoadAverage {
            LoadAverage::default()
        }
    }

    struct FakeMemory;

    impl MemorySource for FakeMemory {
        fn meminfo(&self) -> Result<MemorySnapshot, SourceError> {
            Ok(MemorySnapshot {
                total_kb: 8_039_600,
                free_kb: 1_000_000,
                available_kb: 5_247_000,
                buffers_kb: 200_000,
                cached_kb: 3_000_000,
                swap_total_kb: None,
                swap_free_kb: None,
            })
        }
    }

    struct FakeDisks;

    impl DiskSource for FakeDisks {
        fn filesystems(&self) -> Result<DiskTable, SourceError> {
            Ok(DiskTable::default())
        }
    }

    struct NoPs;

    impl ProcessSource for NoPs {
        fn processes(&self) -> Result<Vec<ProcessEntry>, SourceError> {
            Err(SourceError::ToolUnavailable {
                tool: "ps".to_string(),
            })
        }
    }

    struct FakeSessions(Vec<UserSession>);

    impl SessionSource for FakeSessions {
        fn sessions(&self) -> Result<Vec<UserSession>, SourceError> {
            Ok(self.0.clone())
        }
    }

    struct FakeNetwork;

    impl NetworkSource for FakeNetwork {
        fn addresses(&self) -> Result<Vec<InterfaceAddress>, SourceError> {
            Ok(vec![InterfaceAddress {
                interface: "eth0".to_string(),
                address: "10.0.0.5".to_string(),
            }])
        }

        fn listeners(&self) -> Result<Vec<NetworkListener>, SourceError> {
            Ok(vec![NetworkListener {
                protocol: "tcp".to_string(),
                local_address: "0.0.0.0".to_string(),
                local_port: 22,
                state: "LISTEN".to_string(),
            }])
        }
    }

    fn sources(log_dir: &Path, sessions: Vec<UserSession>) -> Sources {
        Sources {
            identity: Arc::new(FakeIdentity),
            cpu: Arc::new(FakeCpu),
            memory: Arc::new(FakeMemory),
            disk: Arc::new(FakeDisks),
            process: Arc::new(NoPs),
            session: Arc::new(FakeSessions(sessions)),
            auth_log: Arc::new(FileAuthLog::new(vec![
                log_dir.join("auth.log"),
                log_dir.join("secure"),
            ])),
            network: Arc::new(FakeNetwork),
        }
    }

    fn config() -> Config {
        Config {
            cpu_sample: false,
            ..Config::default()
        }
    }

    async fn render_plain(sources: &Sources) -> Vec<String> {
        let report = collect(sources, &config()).await;
        render_report(&report, Palette::new(false))
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn position(lines: &[String], wanted: &str) -> usize {
        lines
            .iter()
            .position(|l| l == wanted)
            .unwrap_or_else(|| panic!("{wanted:?} not in report:\n{}", lines.join("\n")))
    }

    #[tokio::test]
    async fn sections_appear_once_in_fixed_order() {
        let dir = tempfile::tempdir().unwrap();
        let lines = render_plain(&sources(dir.path(), Vec::new())).await;

        let titles = [
            "System",
            "CPU",
            "Memory",
            "Disk",
            "Top processes by CPU",
            "Top processes by memory",
            "Sessions",
            "Failed logins",
            "Network",
        ];
        let positions: Vec<usize> = titles.iter().map(|t| position(&lines, t)).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        for t in titles {
            assert_eq!(lines.iter().filter(|l| l.as_str() == t).count(), 1, "{t}");
        }
    }

    #[tokio::test]
    async fn zero_users_does_not_stop_later_sections() {
        let dir = tempfile::tempdir().unwrap();
        let lines = render_plain(&sources(dir.path(), Vec::new())).await;

        let sessions = position(&lines, "Sessions");
        assert_eq!(lines[sessions + 2], "Logged-in users (0): none");
        assert_eq!(lines[sessions + 3], "Sessions: 0");
        assert!(position(&lines, "Network") > sessions);
        assert!(lines.iter().any(|l| l.contains("10.0.0.5")));
    }

    #[tokio::test]
    async fn missing_auth_log_is_one_warning_then_network() {
        let dir = tempfile::tempdir().unwrap();
        let lines = render_plain(&sources(dir.path(), Vec::new())).await;

        let failed = position(&lines, "Failed logins");
        let network = position(&lines, "Network");
        // title, rule, warning, blank, rule, title
        assert_eq!(network - failed, 5);
        assert!(lines[failed + 2].starts_with("Warning: no authentication log found"));
    }

    #[tokio::test]
    async fn missing_process_tool_is_localized() {
        let dir = tempfile::tempdir().unwrap();
        let report = collect(&sources(dir.path(), Vec::new()), &config()).await;

        assert!(matches!(report.top_cpu, Section::Unavailable(ref r) if r.contains("`ps`")));
        assert!(matches!(report.top_memory, Section::Unavailable(_)));
        assert_eq!(report.cpu.ok().map(|c| c.usage_percent), Some(40));
        assert_eq!(report.memory.ok().map(|m| m.used_percent), Some(34));
        assert!(report.sessions.ok().is_some());
    }

    #[tokio::test]
    async fn sessions_and_failed_logins_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let now = Local::now().format("%b %e %H:%M:%S").to_string();
        let log = (0..3)
            .map(|i| format!("{now} web01 sshd[{i}]: Failed password for root from 203.0.113.9\n"))
            .collect::<String>();
        std::fs::write(dir.path().join("secure"), log).unwrap();

        let sessions = vec![UserSession {
            username: "alice".to_string(),
            tty: "pts/0".to_string(),
            login_time: "2026-10-17 09:12".to_string(),
            remote_host: Some("10.0.0.7".to_string()),
        }];
        let report = collect(&sources(dir.path(), sessions), &config()).await;

        let failed = report.failed_logins.ok().expect("log is readable");
        assert_eq!(failed.count, 3);
        assert_eq!(failed.recent.len(), 3);
        assert_eq!(report.sessions.ok().map(|s| s.users.clone()), Some(vec!["alice".to_string()]));
    }

    #[tokio::test]
    async fn report_serializes_with_section_status() {
        let dir = tempfile::tempdir().unwrap();
        let report = collect(&sources(dir.path(), Vec::new()), &config()).await;
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["cpu"]["status"], "ok");
        assert_eq!(json["cpu"]["data"]["usage_percent"], 40);
        assert_eq!(json["top_cpu"]["status"], "unavailable");
        assert_eq!(json["failed_logins"]["status"], "unavailable");
        assert_eq!(json["network"]["data"]["listeners"]["data"][0]["local_port"], 22);
    }
}
