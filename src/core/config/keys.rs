use crate::core::config::data::Config;
use std::fmt;
use std::str::FromStr;

/// The settings `causette set`/`unset` can edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    BaseUrl,
    RequestTimeout,
    StreamIdleTimeout,
    DefaultSession,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 4] = [
        ConfigKey::BaseUrl,
        ConfigKey::RequestTimeout,
        ConfigKey::StreamIdleTimeout,
        ConfigKey::DefaultSession,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ConfigKey::BaseUrl => "base-url",
            ConfigKey::RequestTimeout => "request-timeout",
            ConfigKey::StreamIdleTimeout => "stream-idle-timeout",
            ConfigKey::DefaultSession => "default-session",
        }
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        let normalized = normalized.strip_suffix("-secs").unwrap_or(&normalized);
        ConfigKey::ALL
            .into_iter()
            .find(|key| key.name() == normalized)
            .ok_or_else(|| ConfigValueError::UnknownKey(s.to_string()))
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigValueError {
    UnknownKey(String),
    InvalidValue { key: ConfigKey, value: String },
}

impl fmt::Display for ConfigValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValueError::UnknownKey(key) => {
                let known: Vec<&str> = ConfigKey::ALL.iter().map(|key| key.name()).collect();
                write!(f, "Unknown config key '{key}' (expected one of: {})", known.join(", "))
            }
            ConfigValueError::InvalidValue { key, value } => match key {
                ConfigKey::BaseUrl => {
                    write!(f, "Invalid {}: '{value}' is not an http(s) URL", key.name())
                }
                _ => write!(f, "Invalid {}: '{value}' is not a number of seconds", key.name()),
            },
        }
    }
}

impl std::error::Error for ConfigValueError {}

impl Config {
    pub fn set_value(&mut self, key: ConfigKey, value: &str) -> Result<(), ConfigValueError> {
        let value = value.trim();
        let invalid = || ConfigValueError::InvalidValue {
            key,
            value: value.to_string(),
        };
        match key {
            ConfigKey::BaseUrl => {
                if !(value.starts_with("http://") || value.starts_with("https://")) {
                    return Err(invalid());
                }
                self.base_url = Some(value.trim_end_matches('/').to_string());
            }
            ConfigKey::RequestTimeout => {
                self.request_timeout_secs = Some(value.parse().map_err(|_| invalid())?);
            }
            ConfigKey::StreamIdleTimeout => {
                self.stream_idle_timeout_secs = Some(value.parse().map_err(|_| invalid())?);
            }
            ConfigKey::DefaultSession => {
                if value.is_empty() {
                    return Err(invalid());
                }
                self.default_session = Some(value.to_string());
            }
        }
        Ok(())
    }

    pub fn unset_value(&mut self, key: ConfigKey) {
        match key {
            ConfigKey::BaseUrl => self.base_url = None,
            ConfigKey::RequestTimeout => self.request_timeout_secs = None,
            ConfigKey::StreamIdleTimeout => self.stream_idle_timeout_secs = None,
            ConfigKey::DefaultSession => self.default_session = None,
        }
    }
}
