use crate::snapshot::{
    CpuReport, DiskReport, FailedLoginReport, Identity, MemoryReport, NetworkReport, ProcessEntry,
    Section, SessionReport,
};
use crossterm::style::{style, Color, Stylize};
use std::io::IsTerminal;

const RULE_WIDTH: usize = 72;

/// Colors for the text report. Plain when disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    enabled: bool,
}

impl Palette {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Color only for a terminal, and never when `NO_COLOR` is set.
    pub fn detect() -> Self {
        let no_color = std::env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty());
        Self::new(std::io::stdout().is_terminal() && !no_color)
    }

    fn paint(&self, text: &str, color: Color) -> String {
        if self.enabled {
            style(text).with(color).to_string()
        } else {
            text.to_string()
        }
    }

    fn title(&self, text: &str) -> String {
        if self.enabled {
            style(text).with(Color::Cyan).bold().to_string()
        } else {
            text.to_string()
        }
    }

    pub fn label(&self, text: &str) -> String {
        self.paint(text, Color::Green)
    }

    pub fn warning(&self, text: &str) -> String {
        self.paint(&format!("Warning: {text}"), Color::Yellow)
    }

    pub fn error(&self, text: &str) -> String {
        self.paint(&format!("Error: {text}"), Color::Red)
    }
}

pub fn header(title: &str, palette: Palette) -> Vec<String> {
    let rule = palette.paint(&"=".repeat(RULE_WIDTH), Color::DarkGrey);
    vec![rule.clone(), palette.title(title), rule]
}

pub fn privilege_warning(palette: Palette) -> String {
    palette.warning("running with root privileges; the report is read-only but take care")
}

/// Lines for a section, or a single error line when it could not be collected.
pub fn section_lines<T>(
    section: &Section<T>,
    palette: Palette,
    render: impl FnOnce(&T, Palette) -> Vec<String>,
) -> Vec<String> {
    match section {
        Section::Ok(value) => render(value, palette),
        Section::Unavailable(reason) => vec![palette.error(reason)],
    }
}

fn field(palette: Palette, name: &str, value: impl std::fmt::Display) -> String {
    format!("{} {value}", palette.label(&format!("{name}:")))
}

fn or_na(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("n/a")
}

pub fn identity_lines(identity: &Identity, palette: Palette) -> Vec<String> {
    vec![
        field(palette, "OS", or_na(&identity.os_name)),
        field(palette, "Kernel", or_na(&identity.kernel)),
        field(palette, "Hostname", or_na(&identity.hostname)),
        field(palette, "Uptime", or_na(&identity.uptime_human)),
        field(palette, "Date", identity.now.format("%Y-%m-%d %H:%M:%S %Z")),
    ]
}

pub fn cpu_lines(cpu: &CpuReport, palette: Palette) -> Vec<String> {
    let sampled = cpu
        .sampled_usage_percent
        .map_or_else(|| "n/a".to_string(), |v| format!("{v:.1}%"));
    vec![
        field(palette, "Usage since boot", format!("{}%", cpu.usage_percent)),
        field(palette, "Usage (1s sample)", sampled),
        field(palette, "Cores", cpu.core_count),
        field(
            palette,
            "Load average",
            format!("{:.2}, {:.2}, {:.2}", cpu.load.one, cpu.load.five, cpu.load.fifteen),
        ),
    ]
}

pub fn memory_lines(mem: &MemoryReport, palette: Palette) -> Vec<String> {
    let mut lines = vec![
        field(palette, "Total", format!("{} MB", mem.total_mb)),
        field(palette, "Used", format!("{} MB ({}%)", mem.used_mb, mem.used_percent)),
        field(palette, "Free", format!("{} MB", mem.free_mb)),
        field(
            palette,
            "Available",
            format!("{} MB ({}%)", mem.available_mb, mem.available_percent),
        ),
        field(palette, "Buffers", format!("{} MB", mem.buffers_mb)),
        field(palette, "Cached", format!("{} MB", mem.cached_mb)),
    ];
    match &mem.swap {
        Some(swap) => lines.push(field(
            palette,
            "Swap",
            format!(
                "{} MB used of {} MB ({}%), {} MB free",
                swap.used_mb, swap.total_mb, swap.used_percent, swap.free_mb
            ),
        )),
        None => lines.push(field(palette, "Swap", "n/a")),
    }
    lines
}

fn kb_as_gb(kb: u64) -> f64 {
    kb as f64 / 1024.0 / 1024.0
}

pub fn disk_lines(disk: &DiskReport, palette: Palette) -> Vec<String> {
    let mut lines = vec![palette.label(&format!(
        "{:<24} {:>9} {:>9} {:>9} {:>5}  {}",
        "Filesystem", "Size", "Used", "Avail", "Use%", "Mounted on"
    ))];
    lines.extend(disk.entries.iter().map(|d| {
        format!(
            "{:<24} {:>8.1}G {:>8.1}G {:>8.1}G {:>5}  {}",
            d.device,
            kb_as_gb(d.size_kb),
            kb_as_gb(d.used_kb),
            kb_as_gb(d.avail_kb),
            d.use_percent,
            d.mountpoint
        )
    }));
    lines.push(field(
        palette,
        "Total",
        format!(
            "{} GB, used {} GB, available {} GB ({})",
            disk.total_gb, disk.used_gb, disk.avail_gb, disk.use_percent
        ),
    ));
    lines
}

pub fn process_lines(procs: &[ProcessEntry], palette: Palette) -> Vec<String> {
    let mut lines = vec![palette.label(&format!(
        "{:<12} {:>8} {:>6} {:>6}  {}",
        "USER", "PID", "%CPU", "%MEM", "COMMAND"
    ))];
    lines.extend(procs.iter().map(|p| {
        format!(
            "{:<12} {:>8} {:>6.1} {:>6.1}  {}",
            truncate(&p.user, 12),
            p.pid,
            p.cpu_percent,
            p.mem_percent,
            p.command
        )
    }));
    lines
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut out: String = text.chars().take(width - 1).collect();
    out.push('+');
    out
}

pub fn session_lines(report: &SessionReport, palette: Palette) -> Vec<String> {
    let users = if report.users.is_empty() {
        "none".to_string()
    } else {
        report.users.join(", ")
    };
    let mut lines = vec![
        field(palette, &format!("Logged-in users ({})", report.users.len()), users),
        field(palette, "Sessions", report.session_count),
    ];
    lines.extend(report.sessions.iter().map(|s| {
        let origin = s
            .remote_host
            .as_deref()
            .map(|h| format!(" ({h})"))
            .unwrap_or_default();
        format!("  {:<10} {:<12} {}{origin}", s.username, s.tty, s.login_time)
    }));
    lines
}

/// A missing or unreadable log is a warning, not an error.
pub fn failed_login_lines(section: &Section<FailedLoginReport>, palette: Palette) -> Vec<String> {
    let report = match section {
        Section::Ok(report) => report,
        Section::Unavailable(reason) => return vec![palette.warning(reason)],
    };

    let mut lines = vec![field(
        palette,
        "Failed password attempts (last day)",
        format!("{} in {}", report.count, report.log_path),
    )];
    if report.count > 0 {
        lines.push(palette.label(&format!("Last {} attempts:", report.recent.len())));
        lines.extend(report.recent.iter().map(|e| format!("  {}", e.raw_line)));
    }
    lines
}

pub fn network_lines(report: &NetworkReport, palette: Palette) -> Vec<String> {
    let mut lines = vec![palette.label("Private IPv4 addresses:")];
    lines.extend(section_lines(&report.addresses, palette, |addrs, _| {
        if addrs.is_empty() {
            return vec!["  none".to_string()];
        }
        addrs
            .iter()
            .map(|a| format!("  {:<16} {}", a.interface, a.address))
            .collect()
    }));

    lines.push(palette.label("Listening sockets:"));
    lines.extend(section_lines(&report.listeners, palette, |listeners, p| {
        let mut rows = vec![p.label(&format!(
            "  {:<6} {:<40} {:>6}  {}",
            "PROTO", "LOCAL ADDRESS", "PORT", "STATE"
        ))];
        rows.extend(listeners.iter().map(|l| {
            format!(
                "  {:<6} {:<40} {:>6}  {}",
                l.protocol, l.local_address, l.local_port, l.state
            )
        }));
        rows
    }));
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{LoginFailureEvent, UserSession};
    use chrono::NaiveDate;

    fn plain() -> Palette {
        Palette::new(false)
    }

    #[test]
    fn plain_palette_has_no_escapes() {
        let lines = header("CPU", plain());
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "CPU");
        assert!(lines.iter().all(|l| !l.contains('\x1b')));
    }

    #[test]
    fn colored_palette_emits_ansi() {
        let line = Palette::new(true).error("`ps` is not available on this host");
        assert!(line.contains('\x1b'));
        assert!(line.contains("Error: `ps` is not available"));
    }

    #[test]
    fn unavailable_section_is_one_error_line() {
        let section: Section<Vec<ProcessEntry>> =
            Section::Unavailable("`ps` is not available on this host".to_string());
        let lines = section_lines(&section, plain(), |p, pal| process_lines(p, pal));
        assert_eq!(lines, ["Error: `ps` is not available on this host"]);
    }

    #[test]
    fn process_table_has_header_and_rows() {
        let procs = vec![ProcessEntry {
            user: "postgres".to_string(),
            pid: 1402,
            cpu_percent: 12.5,
            mem_percent: 8.25,
            command: "postgres".to_string(),
        }];
        let lines = process_lines(&procs, plain());
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("USER"));
        assert!(lines[1].contains("1402"));
        assert!(lines[1].contains("12.5"));
        assert_eq!(lines[0].find("COMMAND"), lines[1].rfind("postgres"));
    }

    #[test]
    fn long_user_names_are_cut() {
        assert_eq!(truncate("systemd-network", 12), "systemd-net+");
        assert_eq!(truncate("root", 12), "root");
    }

    #[test]
    fn sessions_summary_and_records() {
        let report = SessionReport {
            users: vec!["alice".to_string()],
            session_count: 1,
            sessions: vec![UserSession {
                username: "alice".to_string(),
                tty: "pts/0".to_string(),
                login_time: "2026-10-17 09:12".to_string(),
                remote_host: Some("10.0.0.5".to_string()),
            }],
        };
        let lines = session_lines(&report, plain());
        assert_eq!(lines[0], "Logged-in users (1): alice");
        assert_eq!(lines[1], "Sessions: 1");
        assert!(lines[2].ends_with("2026-10-17 09:12 (10.0.0.5)"));
    }

    #[test]
    fn missing_auth_log_is_a_single_warning() {
        let section = Section::Unavailable("no authentication log found".to_string());
        let lines = failed_login_lines(&section, plain());
        assert_eq!(lines, ["Warning: no authentication log found"]);
    }

    #[test]
    fn failed_logins_list_recent_only_when_present() {
        let none = Section::Ok(FailedLoginReport {
            log_path: "/var/log/auth.log".to_string(),
            count: 0,
            recent: Vec::new(),
        });
        assert_eq!(failed_login_lines(&none, plain()).len(), 1);

        let some = Section::Ok(FailedLoginReport {
            log_path: "/var/log/auth.log".to_string(),
            count: 2,
            recent: vec![
                LoginFailureEvent {
                    date: NaiveDate::from_ymd_opt(2026, 10, 17).unwrap(),
                    raw_line: "a".to_string(),
                },
                LoginFailureEvent {
                    date: NaiveDate::from_ymd_opt(2026, 10, 17).unwrap(),
                    raw_line: "b".to_string(),
                },
            ],
        });
        let lines = failed_login_lines(&some, plain());
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1], "Last 2 attempts:");
    }
}
