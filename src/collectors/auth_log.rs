use super::SourceError;
use crate::snapshot::{FailedLoginReport, LoginFailureEvent};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use tracing::debug;

/// An opened authentication log, read line by line.
pub struct AuthLog {
    pub path: PathBuf,
    pub reader: Box<dyn BufRead + Send>,
}

pub trait AuthLogSource: Send + Sync {
    fn open_log(&self) -> Result<AuthLog, SourceError>;
}

/// The first candidate path that exists is the log; later ones are not tried.
pub struct FileAuthLog {
    candidates: Vec<PathBuf>,
}

impl FileAuthLog {
    pub fn new(candidates: Vec<PathBuf>) -> Self {
        Self { candidates }
    }
}

impl AuthLogSource for FileAuthLog {
    fn open_log(&self) -> Result<AuthLog, SourceError> {
        let Some(path) = self.candidates.iter().find(|p| p.exists()) else {
            return Err(SourceError::NoAuthLog {
                candidates: self
                    .candidates
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        };

        debug!(path = %path.display(), "reading authentication log");
        let file = File::open(path).map_err(|err| SourceError::unreadable(path, err))?;
        Ok(AuthLog {
            path: path.clone(),
            reader: Box::new(BufReader::new(file)),
        })
    }
}

pub fn collect_failed_logins(
    source: &dyn AuthLogSource,
    marker: &str,
    now: NaiveDateTime,
    tail: usize,
) -> Result<FailedLoginReport, SourceError> {
    let AuthLog { path, reader } = source.open_log()?;
    let (count, recent) = scan_failed_logins(reader, marker, now, tail)
        .map_err(|err| SourceError::unreadable(&path, err))?;

    Ok(FailedLoginReport {
        log_path: path.display().to_string(),
        count,
        recent,
    })
}

/// Counts lines carrying `marker` whose stamp falls on or after the calendar
/// day of `now - 24h`, keeping only the last `tail` of them.
///
/// The window is day-granular, not a rolling 24 hours: late in the day it
/// reaches back almost 48 hours. Invalid UTF-8 is replaced, not rejected.
pub fn scan_failed_logins(
    mut reader: impl BufRead,
    marker: &str,
    now: NaiveDateTime,
    tail: usize,
) -> io::Result<(usize, Vec<LoginFailureEvent>)> {
    let today = now.date();
    let cutoff = (now - Duration::hours(24)).date();
    let mut count = 0;
    let mut recent = VecDeque::with_capacity(tail);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']);
        if !line.contains(marker) {
            continue;
        }
        let Some(date) = line_date(line, today) else {
            continue;
        };
        if date < cutoff {
            continue;
        }
        count += 1;
        if tail == 0 {
            continue;
        }
        if recent.len() == tail {
            recent.pop_front();
        }
        recent.push_back(LoginFailureEvent {
            date,
            raw_line: line.to_string(),
        });
    }

    Ok((count, recent.into()))
}

/// Date of a log line in either the classic syslog or the RFC 3339 format.
pub fn line_date(line: &str, today: NaiveDate) -> Option<NaiveDate> {
    let first = line.split_whitespace().next()?;
    if let Ok(stamp) = DateTime::parse_from_rfc3339(first) {
        return Some(stamp.date_naive());
    }
    syslog_date(line, today)
}

/// `Oct 17 10:22:01 host sshd[...]`. The year is not logged: assume the
/// current one unless that lands after `today`.
fn syslog_date(line: &str, today: NaiveDate) -> Option<NaiveDate> {
    let mut tokens = line.split_whitespace();
    let month = month_number(tokens.next()?)?;
    let day: u32 = tokens.next()?.parse().ok()?;

    match NaiveDate::from_ymd_opt(today.year(), month, day) {
        Some(date) if date <= today => Some(date),
        _ => NaiveDate::from_ymd_opt(today.year() - 1, month, day),
    }
}

fn month_number(name: &str) -> Option<u32> {
    let n = match name {
        "Jan" => 1,
        "Feb" => 2,
        "Mar" => 3,
        "Apr" => 4,
        "May" => 5,
        "Jun" => 6,
        "Jul" => 7,
        "Aug" => 8,
        "Sep" => 9,
        "Oct" => 10,
        "Nov" => 11,
        "Dec" => 12,
        _ => return None,
    };
    Some(n)
}
