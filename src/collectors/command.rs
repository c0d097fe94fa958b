use super::SourceError;
use std::io::ErrorKind;
use std::process::Command;
use tracing::debug;

/// Runs `tool` with a C locale and returns its stdout.
pub fn run_tool(tool: &str, args: &[&str]) -> Result<String, SourceError> {
    let output = Command::new(tool)
        .args(args)
        .env("LC_ALL", "C")
        .output()
        .map_err(|err| match err.kind() {
            ErrorKind::NotFound => SourceError::ToolUnavailable {
                tool: tool.to_string(),
            },
            _ => SourceError::ToolFailed {
                tool: tool.to_string(),
                detail: err.to_string(),
            },
        })?;

    if !output.status.success() {
        let stderr = decode_cmd_stdout(&output.stderr);
        debug!(tool, status = %output.status, "external tool exited with failure");
        return Err(SourceError::ToolFailed {
            tool: tool.to_string(),
            detail: match stderr.trim() {
                "" => output.status.to_string(),
                msg => msg.to_string(),
            },
        });
    }

    Ok(decode_cmd_stdout(&output.stdout))
}

/// Tries each candidate in order; the first one that is installed wins.
///
/// A tool that exists but fails is reported as such and does not fall
/// through to the next candidate.
pub fn run_first_available<'a>(
    candidates: &[(&'a str, &[&str])],
) -> Result<(&'a str, String), SourceError> {
    for (tool, args) in candidates {
        match run_tool(tool, args) {
            Ok(out) => return Ok((tool, out)),
            Err(SourceError::ToolUnavailable { .. }) => {
                debug!(tool, "tool not installed, trying next candidate");
            }
            Err(err) => return Err(err),
        }
    }

    Err(SourceError::NoToolAvailable {
        tools: candidates
            .iter()
            .map(|(tool, _)| format!("`{tool}`"))
            .collect::<Vec<_>>()
            .join(", "),
    })
}

pub fn decode_cmd_stdout(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(utf8) => utf8.to_string(),
        Err(_) => String::from_utf8_lossy(bytes).to_string(),
    }
}

pub fn parse_f64_loose(input: &str) -> Option<f64> {
    let trimmed = input.trim();
    if let Ok(v) = trimmed.parse::<f64>() {
        return Some(v);
    }

    if let Ok(v) = trimmed.replace(',', ".").parse::<f64>() {
        return Some(v);
    }

    let filtered: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-' | '+'))
        .collect();
    if filtered.is_empty() {
        return None;
    }

    filtered.replace(',', ".").parse::<f64>().ok()
}

pub fn parse_u64_loose(input: &str) -> Option<u64> {
    parse_f64_loose(input).map(|v| if v < 0.0 { 0 } else { v as u64 })
}
