use super::command::run_tool;
use super::SourceError;
use crate::snapshot::{SessionReport, UserSession};
use chrono::{Local, TimeZone};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::debug;

pub trait SessionSource: Send + Sync {
    fn sessions(&self) -> Result<Vec<UserSession>, SourceError>;
}

pub fn collect_sessions(source: &dyn SessionSource, limit: usize) -> Result<SessionReport, SourceError> {
    let mut sessions = source.sessions()?;
    let users: BTreeSet<String> = sessions.iter().map(|s| s.username.clone()).collect();
    let session_count = sessions.len();
    sessions.truncate(limit);

    Ok(SessionReport {
        users: users.into_iter().collect(),
        session_count,
        sessions,
    })
}

/// Reads `struct utmp` records (glibc layout, Linux).
pub struct UtmpSessions {
    path: PathBuf,
}

impl UtmpSessions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SessionSource for UtmpSessions {
    fn sessions(&self) -> Result<Vec<UserSession>, SourceError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(parse_utmp(&bytes, process_alive)),
            // Same as `who`: no utmp file means nobody is logged in.
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "utmp file missing");
                Ok(Vec::new())
            }
            Err(err) => Err(SourceError::unreadable(&self.path, err)),
        }
    }
}

pub struct WhoSessions;

impl SessionSource for WhoSessions {
    fn sessions(&self) -> Result<Vec<UserSession>, SourceError> {
        let out = run_tool("who", &[])?;
        Ok(parse_who(&out))
    }
}

const UTMP_RECORD_SIZE: usize = 384;
const USER_PROCESS: i16 = 7;
const PID_OFFSET: usize = 4;
const LINE_FIELD: (usize, usize) = (8, 32);
const USER_FIELD: (usize, usize) = (44, 32);
const HOST_FIELD: (usize, usize) = (76, 256);
const TV_SEC_OFFSET: usize = 340;

/// Login records whose session process `is_alive` accepts. Like `who`,
/// records left behind by a killed session are skipped.
pub fn parse_utmp(bytes: &[u8], is_alive: impl Fn(i32) -> bool) -> Vec<UserSession> {
    bytes
        .chunks_exact(UTMP_RECORD_SIZE)
        .filter_map(|rec| {
            let ut_type = i16::from_ne_bytes([rec[0], rec[1]]);
            if ut_type != USER_PROCESS {
                return None;
            }
            let pid = i32::from_ne_bytes([
                rec[PID_OFFSET],
                rec[PID_OFFSET + 1],
                rec[PID_OFFSET + 2],
                rec[PID_OFFSET + 3],
            ]);
            if !is_alive(pid) {
                debug!(pid, "skipping stale utmp record");
                return None;
            }
            let username = c_field(rec, USER_FIELD);
            if username.is_empty() {
                return None;
            }
            let secs = i32::from_ne_bytes([
                rec[TV_SEC_OFFSET],
                rec[TV_SEC_OFFSET + 1],
                rec[TV_SEC_OFFSET + 2],
                rec[TV_SEC_OFFSET + 3],
            ]);
            let login_time = Local
                .timestamp_opt(i64::from(secs), 0)
                .single()
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default();
            let host = c_field(rec, HOST_FIELD);

            Some(UserSession {
                username,
                tty: c_field(rec, LINE_FIELD),
                login_time,
                remote_host: Some(host).filter(|h| !h.is_empty()),
            })
        })
        .collect()
}

/// Sends signal 0. Only ESRCH means gone; EPERM is someone else's live process.
pub fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return true;
    }
    !matches!(kill(Pid::from_raw(pid), None), Err(Errno::ESRCH))
}

fn c_field(rec: &[u8], (offset, len): (usize, usize)) -> String {
    let raw = &rec[offset..offset + len];
    let end = raw.iter().position(|b| *b == 0).unwrap_or(len);
    String::from_utf8_lossy(&raw[..end]).trim().to_string()
}

/// `who` rows: `user tty <time tokens...> [(host)]`.
pub fn parse_who(text: &str) -> Vec<UserSession> {
    text.lines()
        .filter_map(|line| {
            let (main, host) = match line.find('(') {
                Some(idx) => (
                    &line[..idx],
                    Some(line[idx + 1..].trim_end().trim_end_matches(')').to_string()),
                ),
                None => (line, None),
            };
            let mut tokens = main.split_whitespace();
            let username = tokens.next()?.to_string();
            let tty = tokens.next()?.to_string();
            let login_time = tokens.collect::<Vec<_>>().join(" ");
            Some(UserSession {
                username,
                tty,
                login_time,
                remote_host: host.filter(|h| !h.is_empty()),
            })
        })
        .collect()
}
