use crate::collectors::Backend;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub backend: Backend,
    #[serde(default = "default_auth_log_paths")]
    pub auth_log_paths: Vec<PathBuf>,
    #[serde(default = "default_failed_login_marker")]
    pub failed_login_marker: String,
    #[serde(default = "default_failed_login_tail")]
    pub failed_login_tail: usize,
    #[serde(default = "default_top_processes")]
    pub top_processes: usize,
    #[serde(default = "default_session_limit")]
    pub session_limit: usize,
    #[serde(default = "default_listener_limit")]
    pub listener_limit: usize,
    #[serde(default = "default_cpu_sample")]
    pub cpu_sample: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            auth_log_paths: default_auth_log_paths(),
            failed_login_marker: default_failed_login_marker(),
            failed_login_tail: default_failed_login_tail(),
            top_processes: default_top_processes(),
            session_limit: default_session_limit(),
            listener_limit: default_listener_limit(),
            cpu_sample: default_cpu_sample(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_auth_log_paths(&self.auth_log_paths)?;
        if self.failed_login_marker.trim().is_empty() {
            return Err(ConfigError::Validation(
                "failed_login_marker must not be empty".to_string(),
            ));
        }
        for (field, value) in [
            ("failed_login_tail", self.failed_login_tail),
            ("top_processes", self.top_processes),
            ("session_limit", self.session_limit),
            ("listener_limit", self.listener_limit),
        ] {
            if value < 1 {
                return Err(ConfigError::Validation(format!("{field} must be >= 1")));
            }
        }

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_auth_log_paths(paths: &[PathBuf]) -> Result<(), ConfigError> {
    if paths.is_empty() {
        return Err(ConfigError::Validation(
            "auth_log_paths needs at least one candidate".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for path in paths {
        if path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "auth_log_paths[*] must not be empty".to_string(),
            ));
        }
        if !seen.insert(path) {
            return Err(ConfigError::Validation(format!(
                "auth log path '{}' is listed twice",
                path.display()
            )));
        }
    }
    Ok(())
}

fn default_auth_log_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/var/log/auth.log"),
        PathBuf::from("/var/log/secure"),
    ]
}

fn default_failed_login_marker() -> String {
    "Failed password".to_string()
}

const fn default_failed_login_tail() -> usize {
    5
}

const fn default_top_processes() -> usize {
    5
}

const fn default_session_limit() -> usize {
    10
}

const fn default_listener_limit() -> usize {
    10
}

const fn default_cpu_sample() -> bool {
    true
}
