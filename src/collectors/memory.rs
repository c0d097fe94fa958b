use super::command::{parse_u64_loose, run_tool};
use super::SourceError;
use crate::snapshot::{MemoryReport, MemorySnapshot, SwapReport};
use std::fs;
use std::path::PathBuf;
use tracing::warn;

pub trait MemorySource: Send + Sync {
    fn meminfo(&self) -> Result<MemorySnapshot, SourceError>;
}

pub struct ProcMeminfo {
    proc_root: PathBuf,
}

impl ProcMeminfo {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }
}

impl MemorySource for ProcMeminfo {
    fn meminfo(&self) -> Result<MemorySnapshot, SourceError> {
        let path = self.proc_root.join("meminfo");
        let text = fs::read_to_string(&path).map_err(|err| SourceError::unreadable(&path, err))?;
        parse_meminfo(&text)
    }
}

/// `free -k -w`: wide output keeps buffers and cache in separate columns.
pub struct FreeMemory;

impl MemorySource for FreeMemory {
    fn meminfo(&self) -> Result<MemorySnapshot, SourceError> {
        let out = run_tool("free", &["-k", "-w"])?;
        parse_free_wide(&out)
    }
}

pub fn collect_memory(source: &dyn MemorySource) -> Result<MemoryReport, SourceError> {
    let snapshot = source.meminfo()?;
    let report = memory_report(&snapshot);
    if report.anomaly {
        warn!(
            total_kb = snapshot.total_kb,
            available_kb = snapshot.available_kb,
            "available memory exceeds total, used clamped to 0"
        );
    }
    Ok(report)
}

pub fn memory_report(m: &MemorySnapshot) -> MemoryReport {
    let anomaly = m.available_kb > m.total_kb;
    let used_kb = m.total_kb.saturating_sub(m.available_kb);

    let swap = m.swap_total_kb.map(|swap_total| {
        let swap_free = m.swap_free_kb.unwrap_or(swap_total).min(swap_total);
        let swap_used = swap_total - swap_free;
        SwapReport {
            total_mb: kb_to_mb(swap_total),
            used_mb: kb_to_mb(swap_used),
            free_mb: kb_to_mb(swap_free),
            used_percent: percent_of(swap_used, swap_total),
        }
    });

    MemoryReport {
        total_mb: kb_to_mb(m.total_kb),
        used_mb: kb_to_mb(used_kb),
        free_mb: kb_to_mb(m.free_kb),
        available_mb: kb_to_mb(m.available_kb),
        buffers_mb: kb_to_mb(m.buffers_kb),
        cached_mb: kb_to_mb(m.cached_kb),
        used_kb,
        used_percent: percent_of(used_kb, m.total_kb),
        available_percent: percent_of(m.available_kb, m.total_kb),
        anomaly,
        swap,
    }
}

pub fn kb_to_mb(kb: u64) -> u64 {
    kb / 1024
}

/// Truncating integer percentage, 0 when `total` is 0.
pub fn percent_of(part: u64, total: u64) -> u64 {
    if total == 0 {
        return 0;
    }
    (u128::from(part) * 100 / u128::from(total)) as u64
}

pub fn parse_meminfo(text: &str) -> Result<MemorySnapshot, SourceError> {
    let mut total = None;
    let mut available = None;
    let mut m = MemorySnapshot::default();

    for line in text.lines() {
        let mut parts = line.split_whitespace();
        let Some(key) = parts.next().map(|k| k.trim_end_matches(':')) else {
            continue;
        };
        let Some(value) = parts.next().and_then(|v| v.parse::<u64>().ok()) else {
            continue;
        };

        match key {
            "MemTotal" => total = Some(value),
            "MemFree" => m.free_kb = value,
            "MemAvailable" => available = Some(value),
            "Buffers" => m.buffers_kb = value,
            "Cached" => m.cached_kb = value,
            "SwapTotal" => m.swap_total_kb = Some(value),
            "SwapFree" => m.swap_free_kb = Some(value),
            _ => {}
        }
    }

    m.total_kb = total.ok_or_else(|| SourceError::parse("/proc/meminfo", "MemTotal missing"))?;
    // Kernels before 3.14 have no MemAvailable.
    m.available_kb = available.unwrap_or(m.free_kb + m.buffers_kb + m.cached_kb);
    Ok(m)
}

pub fn parse_free_wide(text: &str) -> Result<MemorySnapshot, SourceError> {
    let mut m = MemorySnapshot::default();
    let mut saw_mem = false;

    for line in text.lines() {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("Mem:") => {
                // total used free shared buffers cache available
                let cols: Vec<u64> = parts.filter_map(parse_u64_loose).collect();
                if cols.len() < 7 {
                    return Err(SourceError::parse(
                        "free -w",
                        format!("expected 7 memory columns, got {}", cols.len()),
                    ));
                }
                m.total_kb = cols[0];
                m.free_kb = cols[2];
                m.buffers_kb = cols[4];
                m.cached_kb = cols[5];
                m.available_kb = cols[6];
                saw_mem = true;
            }
            Some("Swap:") => {
                let cols: Vec<u64> = parts.filter_map(parse_u64_loose).collect();
                if cols.len() >= 3 {
                    m.swap_total_kb = Some(cols[0]);
                    m.swap_free_kb = Some(cols[2]);
                }
            }
            _ => {}
        }
    }

    if !saw_mem {
        return Err(SourceError::parse("free -w", "no Mem: row"));
    }
    Ok(m)
}
