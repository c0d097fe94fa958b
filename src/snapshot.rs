use crate::collectors::SourceError;
use chrono::{DateTime, Local, NaiveDate};
use serde::Serialize;

/// Outcome of one report section: data, or the reason it is missing.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum Section<T> {
    Ok(T),
    Unavailable(String),
}

impl<T> Section<T> {
    pub fn as_ref(&self) -> Section<&T> {
        match self {
            Section::Ok(v) => Section::Ok(v),
            Section::Unavailable(reason) => Section::Unavailable(reason.clone()),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Section<U> {
        match self {
            Section::Ok(v) => Section::Ok(f(v)),
            Section::Unavailable(reason) => Section::Unavailable(reason),
        }
    }

    pub fn ok(&self) -> Option<&T> {
        match self {
            Section::Ok(v) => Some(v),
            Section::Unavailable(_) => None,
        }
    }
}

impl<T> From<Result<T, SourceError>> for Section<T> {
    fn from(result: Result<T, SourceError>) -> Self {
        match result {
            Ok(v) => Section::Ok(v),
            Err(err) => Section::Unavailable(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub os_name: Option<String>,
    pub kernel: Option<String>,
    pub hostname: Option<String>,
    pub uptime_secs: Option<u64>,
    pub uptime_human: Option<String>,
    pub now: DateTime<Local>,
}

/// Aggregate tick counters from the `cpu` line of `/proc/stat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CpuSnapshot {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuSnapshot {
    pub fn total(&self) -> u64 {
        [
            self.user,
            self.nice,
            self.system,
            self.idle,
            self.iowait,
            self.irq,
            self.softirq,
            self.steal,
        ]
        .iter()
        .fold(0_u64, |acc, v| acc.saturating_add(*v))
    }

    /// Busy share since boot, truncated to a whole percent.
    ///
    /// This is a cumulative ratio over the whole uptime, not the current load:
    /// the figure drifts toward a stable value the longer the host runs.
    pub fn usage_percent(&self) -> u64 {
        let total = self.total();
        if total == 0 {
            return 0;
        }
        let busy = total.saturating_sub(self.idle);
        (u128::from(busy) * 100 / u128::from(total)) as u64
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CpuReport {
    pub counters: CpuSnapshot,
    pub usage_percent: u64,
    pub sampled_usage_percent: Option<f64>,
    pub core_count: usize,
    pub load: LoadAverage,
}

/// Values in kilobytes, as `/proc/meminfo` reports them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemorySnapshot {
    pub total_kb: u64,
    pub free_kb: u64,
    pub available_kb: u64,
    pub buffers_kb: u64,
    pub cached_kb: u64,
    pub swap_total_kb: Option<u64>,
    pub swap_free_kb: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryReport {
    pub total_mb: u64,
    pub used_mb: u64,
    pub free_mb: u64,
    pub available_mb: u64,
    pub buffers_mb: u64,
    pub cached_mb: u64,
    pub used_kb: u64,
    pub used_percent: u64,
    pub available_percent: u64,
    /// Set when the source claimed more available than total memory.
    pub anomaly: bool,
    pub swap: Option<SwapReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SwapReport {
    pub total_mb: u64,
    pub used_mb: u64,
    pub free_mb: u64,
    pub used_percent: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskEntry {
    pub device: String,
    pub size_kb: u64,
    pub used_kb: u64,
    pub avail_kb: u64,
    pub use_percent: String,
    pub mountpoint: String,
}

/// Filesystem rows plus the aggregate use-percent when the source reports one.
#[derive(Debug, Clone, Default)]
pub struct DiskTable {
    pub entries: Vec<DiskEntry>,
    pub reported_total_percent: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiskReport {
    pub entries: Vec<DiskEntry>,
    pub total_gb: u64,
    pub used_gb: u64,
    pub avail_gb: u64,
    pub use_percent: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessEntry {
    pub user: String,
    pub pid: u32,
    pub cpu_percent: f64,
    pub mem_percent: f64,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSession {
    pub username: String,
    pub tty: String,
    pub login_time: String,
    pub remote_host: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub users: Vec<String>,
    pub session_count: usize,
    pub sessions: Vec<UserSession>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginFailureEvent {
    pub date: NaiveDate,
    pub raw_line: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedLoginReport {
    pub log_path: String,
    pub count: usize,
    pub recent: Vec<LoginFailureEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceAddress {
    pub interface: String,
    pub address: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkReport {
    pub addresses: Section<Vec<InterfaceAddress>>,
    pub listeners: Section<Vec<NetworkListener>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkListener {
    pub protocol: String,
    pub local_address: String,
    pub local_port: u16,
    pub state: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_is_busy_share_of_total() {
        let cpu = CpuSnapshot {
            user: 300,
            nice: 0,
            system: 100,
            idle: 600,
            ..CpuSnapshot::default()
        };
        assert_eq!(cpu.total(), 1000);
        assert_eq!(cpu.usage_percent(), 40);
    }

    #[test]
    fn usage_truncates() {
        let cpu = CpuSnapshot {
            user: 2,
            idle: 1,
            ..CpuSnapshot::default()
        };
        // 2/3 = 66.6..%
        assert_eq!(cpu.usage_percent(), 66);
    }

    #[test]
    fn zero_total_is_zero_usage() {
        assert_eq!(CpuSnapshot::default().usage_percent(), 0);
    }

    #[test]
    fn usage_stays_in_range_for_extreme_counters() {
        let samples = [
            CpuSnapshot {
                user: u64::MAX / 4,
                idle: 0,
                ..CpuSnapshot::default()
            },
            CpuSnapshot {
                idle: u64::MAX / 2,
                ..CpuSnapshot::default()
            },
            CpuSnapshot {
                user: 1,
                nice: 1,
                system: 1,
                idle: 1,
                iowait: 1,
                irq: 1,
                softirq: 1,
                steal: 1,
            },
        ];
        for s in samples {
            assert!(s.usage_percent() <= 100, "{s:?}");
        }
    }
}
