use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const BASE_URL_ENV_VAR: &str = "CAUSETTE_BASE_URL";

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct Config {
    /// Root of the agent service API, e.g. `http://localhost:8000/api`
    pub base_url: Option<String>,
    /// Timeout for non-streaming requests, in seconds
    pub request_timeout_secs: Option<u64>,
    /// Longest silence tolerated while a reply is streaming, in seconds.
    /// Unset (or zero) leaves streams without an idle timeout.
    pub stream_idle_timeout_secs: Option<u64>,
    /// Session selected when the chat starts
    pub default_session: Option<String>,
}

impl Config {
    /// The service URL, honouring `CAUSETTE_BASE_URL` over the file.
    pub fn effective_base_url(&self) -> String {
        env::var(BASE_URL_ENV_VAR)
            .ok()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .or_else(|| self.base_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.request_timeout_secs
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    pub fn stream_idle_timeout(&self) -> Option<Duration> {
        self.stream_idle_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
