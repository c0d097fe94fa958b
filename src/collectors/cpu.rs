use super::command::{parse_f64_loose, run_tool};
use super::SourceError;
use crate::snapshot::{CpuReport, CpuSnapshot, LoadAverage};
use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use sysinfo::{System, SystemExt};
use tracing::debug;

pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

pub trait CpuSource: Send + Sync {
    fn counters(&self) -> Result<CpuSnapshot, SourceError>;
    /// Busy percent over `interval`, `None` when sampling is not possible.
    fn sample_usage(&self, interval: Duration) -> Option<f64>;
    fn core_count(&self) -> usize;
    fn load_average(&self) -> LoadAverage;
}

pub fn collect_cpu(source: &dyn CpuSource, sample: bool) -> Result<CpuReport, SourceError> {
    let counters = source.counters()?;
    let sampled_usage_percent = if sample {
        source.sample_usage(SAMPLE_INTERVAL)
    } else {
        None
    };

    Ok(CpuReport {
        counters,
        usage_percent: counters.usage_percent(),
        sampled_usage_percent,
        core_count: source.core_count(),
        load: source.load_average(),
    })
}

pub struct ProcStatCpu {
    proc_root: PathBuf,
}

impl ProcStatCpu {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }
}

impl CpuSource for ProcStatCpu {
    fn counters(&self) -> Result<CpuSnapshot, SourceError> {
        let path = self.proc_root.join("stat");
        let text = fs::read_to_string(&path).map_err(|err| SourceError::unreadable(&path, err))?;
        parse_cpu_line(&text)
    }

    fn sample_usage(&self, interval: Duration) -> Option<f64> {
        let before = self.counters().ok()?;
        thread::sleep(interval);
        let after = self.counters().ok()?;
        usage_between(&before, &after)
    }

    fn core_count(&self) -> usize {
        let mut system = System::new();
        system.refresh_cpu();
        match system.cpus().len() {
            0 => thread::available_parallelism().map_or(1, |n| n.get()),
            n => n,
        }
    }

    fn load_average(&self) -> LoadAverage {
        let load = System::new().load_average();
        LoadAverage {
            one: load.one,
            five: load.five,
            fifteen: load.fifteen,
        }
    }
}

/// Counters from `/proc/stat`, everything else from `mpstat`, `nproc` and `uptime`.
pub struct ToolCpu;

impl CpuSource for ToolCpu {
    fn counters(&self) -> Result<CpuSnapshot, SourceError> {
        ProcStatCpu::new("/proc").counters()
    }

    fn sample_usage(&self, interval: Duration) -> Option<f64> {
        let secs = interval.as_secs().max(1).to_string();
        match run_tool("mpstat", &[&secs, "1"]) {
            Ok(out) => parse_mpstat_idle(&out).map(|idle| (100.0 - idle).clamp(0.0, 100.0)),
            Err(err) => {
                debug!(error = %err, "cpu sampling unavailable");
                None
            }
        }
    }

    fn core_count(&self) -> usize {
        run_tool("nproc", &[])
            .ok()
            .and_then(|out| out.trim().parse::<usize>().ok())
            .unwrap_or_else(|| thread::available_parallelism().map_or(1, |n| n.get()))
    }

    fn load_average(&self) -> LoadAverage {
        run_tool("uptime", &[])
            .ok()
            .and_then(|out| parse_uptime_load(&out))
            .unwrap_or_default()
    }
}

/// Parses the aggregate `cpu ` line of a `/proc/stat` document.
pub fn parse_cpu_line(text: &str) -> Result<CpuSnapshot, SourceError> {
    let line = text
        .lines()
        .find(|l| l.starts_with("cpu "))
        .ok_or_else(|| SourceError::parse("/proc/stat", "no aggregate cpu line"))?;

    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|v| v.parse::<u64>())
        .collect::<Result<_, _>>()
        .map_err(|err| SourceError::parse("/proc/stat", err.to_string()))?;
    if fields.len() < 4 {
        return Err(SourceError::parse(
            "/proc/stat",
            format!("expected at least 4 counters, got {}", fields.len()),
        ));
    }

    let at = |i: usize| fields.get(i).copied().unwrap_or(0);
    Ok(CpuSnapshot {
        user: at(0),
        nice: at(1),
        system: at(2),
        idle: at(3),
        iowait: at(4),
        irq: at(5),
        softirq: at(6),
        steal: at(7),
    })
}

/// `100 - idle%` between two readings of the same counters.
pub fn usage_between(before: &CpuSnapshot, after: &CpuSnapshot) -> Option<f64> {
    let total = after.total().checked_sub(before.total())?;
    let idle = after.idle.checked_sub(before.idle)?;
    if total == 0 {
        return None;
    }
    let idle_pct = idle as f64 * 100.0 / total as f64;
    Some((100.0 - idle_pct).clamp(0.0, 100.0))
}

/// `%idle` from the `Average: all` row of `mpstat` output.
pub fn parse_mpstat_idle(text: &str) -> Option<f64> {
    text.lines()
        .filter(|l| l.starts_with("Average:"))
        .find(|l| l.split_whitespace().nth(1) == Some("all"))
        .and_then(|l| l.split_whitespace().last())
        .and_then(parse_f64_loose)
}

pub fn parse_uptime_load(text: &str) -> Option<LoadAverage> {
    let (_, tail) = text.split_once("load average:")?;
    let mut values = tail.split(',').map(parse_f64_loose);
    Some(LoadAverage {
        one: values.next()??,
        five: values.next()??,
        fifteen: values.next()??,
    })
}
