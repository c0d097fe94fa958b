use super::command::{parse_f64_loose, run_tool};
use super::SourceError;
use crate::snapshot::ProcessEntry;
use std::thread;
use std::time::Duration;
use sysinfo::{PidExt, ProcessExt, System, SystemExt, UserExt};

/// Gap between the two process refreshes sysinfo needs to compute CPU usage.
const CPU_SETTLE: Duration = Duration::from_millis(500);

pub trait ProcessSource: Send + Sync {
    fn processes(&self) -> Result<Vec<ProcessEntry>, SourceError>;
}

pub struct NativeProcesses;

impl ProcessSource for NativeProcesses {
    fn processes(&self) -> Result<Vec<ProcessEntry>, SourceError> {
        let mut system = System::new();
        system.refresh_users_list();
        system.refresh_memory();
        system.refresh_processes();
        thread::sleep(CPU_SETTLE);
        system.refresh_processes();

        let total_memory = system.total_memory();
        let entries = system
            .processes()
            .values()
            .map(|p| {
                let user = p
                    .user_id()
                    .and_then(|uid| system.get_user_by_id(uid))
                    .map(|u| u.name().to_string())
                    .unwrap_or_else(|| "?".to_string());
                let mem_percent = if total_memory > 0 {
                    p.memory() as f64 * 100.0 / total_memory as f64
                } else {
                    0.0
                };
                ProcessEntry {
                    user,
                    pid: p.pid().as_u32(),
                    cpu_percent: f64::from(p.cpu_usage()),
                    mem_percent,
                    command: p.name().to_string(),
                }
            })
            .collect();

        Ok(entries)
    }
}

pub struct PsProcesses;

impl ProcessSource for PsProcesses {
    fn processes(&self) -> Result<Vec<ProcessEntry>, SourceError> {
        let out = run_tool("ps", &["-eo", "user,pid,%cpu,%mem,comm", "--no-headers"])?;
        Ok(parse_ps(&out))
    }
}

pub fn parse_ps(text: &str) -> Vec<ProcessEntry> {
    text.lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 5 {
                return None;
            }
            Some(ProcessEntry {
                user: cols[0].to_string(),
                pid: cols[1].parse().ok()?,
                cpu_percent: parse_f64_loose(cols[2])?,
                mem_percent: parse_f64_loose(cols[3])?,
                command: cols[4..].join(" "),
            })
        })
        .collect()
}

/// The `n` entries with the highest `key`, highest first.
pub fn top_by(entries: &[ProcessEntry], n: usize, key: impl Fn(&ProcessEntry) -> f64) -> Vec<ProcessEntry> {
    let mut sorted = entries.to_vec();
    sorted.sort_by(|a, b| key(b).total_cmp(&key(a)));
    sorted.truncate(n);
    sorted
}

pub fn top_by_cpu(entries: &[ProcessEntry], n: usize) -> Vec<ProcessEntry> {
    top_by(entries, n, |p| p.cpu_percent)
}

pub fn top_by_memory(entries: &[ProcessEntry], n: usize) -> Vec<ProcessEntry> {
    top_by(entries, n, |p| p.mem_percent)
}
