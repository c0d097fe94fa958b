pub mod auth_log;
pub mod command;
pub mod cpu;
pub mod disk;
pub mod identity;
pub mod memory;
pub mod network;
pub mod privilege;
pub mod process;
pub mod session;

use crate::config::Config;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Where a metric family gets its data from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// sysinfo, procfs, getifaddrs and utmp.
    #[default]
    Native,
    /// Output of the classic command-line utilities.
    Tool,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("`{tool}` is not available on this host")]
    ToolUnavailable { tool: String },
    #[error("none of {tools} is available on this host")]
    NoToolAvailable { tools: String },
    #[error("`{tool}` failed: {detail}")]
    ToolFailed { tool: String, detail: String },
    #[error("no authentication log found (checked {candidates})")]
    NoAuthLog { candidates: String },
    #[error("cannot read {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("unexpected {what} format: {detail}")]
    Parse { what: &'static str, detail: String },
}

impl SourceError {
    pub fn unreadable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Unreadable {
            path: path.into(),
            source,
        }
    }

    pub fn parse(what: &'static str, detail: impl Into<String>) -> Self {
        Self::Parse {
            what,
            detail: detail.into(),
        }
    }
}

/// One source per metric family, shared with the collector tasks.
#[derive(Clone)]
pub struct Sources {
    pub identity: Arc<dyn identity::IdentitySource>,
    pub cpu: Arc<dyn cpu::CpuSource>,
    pub memory: Arc<dyn memory::MemorySource>,
    pub disk: Arc<dyn disk::DiskSource>,
    pub process: Arc<dyn process::ProcessSource>,
    pub session: Arc<dyn session::SessionSource>,
    pub auth_log: Arc<dyn auth_log::AuthLogSource>,
    pub network: Arc<dyn network::NetworkSource>,
}

impl Sources {
    pub fn for_config(cfg: &Config) -> Self {
        let auth_log = Arc::new(auth_log::FileAuthLog::new(cfg.auth_log_paths.clone()));
        match cfg.backend {
            Backend::Native => Self {
                identity: Arc::new(identity::NativeIdentity::new(PROC_ROOT, OS_RELEASE)),
                cpu: Arc::new(cpu::ProcStatCpu::new(PROC_ROOT)),
                memory: Arc::new(memory::ProcMeminfo::new(PROC_ROOT)),
                disk: Arc::new(disk::NativeDisks),
                process: Arc::new(process::NativeProcesses),
                session: Arc::new(session::UtmpSessions::new(UTMP_PATH)),
                auth_log,
                network: Arc::new(network::NativeNetwork::new(PROC_ROOT)),
            },
            Backend::Tool => Self {
                identity: Arc::new(identity::ToolIdentity::new(OS_RELEASE)),
                cpu: Arc::new(cpu::ToolCpu),
                memory: Arc::new(memory::FreeMemory),
                disk: Arc::new(disk::DfDisks),
                process: Arc::new(process::PsProcesses),
                session: Arc::new(session::WhoSessions),
                auth_log,
                network: Arc::new(network::ToolNetwork),
            },
        }
    }
}

const PROC_ROOT: &str = "/proc";
const OS_RELEASE: &str = "/etc/os-release";
const UTMP_PATH: &str = "/var/run/utmp";
