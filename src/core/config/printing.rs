use crate::core::config::data::{path_display, Config, DEFAULT_BASE_URL};
use crate::core::config::keys::ConfigKey;

impl Config {
    /// Renders every editable key, marking unset ones.
    pub fn describe(&self) -> Vec<String> {
        ConfigKey::ALL
            .into_iter()
            .map(|key| {
                let value = match key {
                    ConfigKey::BaseUrl => self
                        .base_url
                        .clone()
                        .unwrap_or_else(|| format!("(unset, default {DEFAULT_BASE_URL})")),
                    ConfigKey::RequestTimeout => match self.request_timeout_secs {
                        Some(secs) => format!("{secs}s"),
                        None => format!("(unset, default {}s)", self.request_timeout().as_secs()),
                    },
                    ConfigKey::StreamIdleTimeout => match self.stream_idle_timeout() {
                        Some(timeout) => format!("{}s", timeout.as_secs()),
                        None => "(unset)".to_string(),
                    },
                    ConfigKey::DefaultSession => self
                        .default_session
                        .clone()
                        .unwrap_or_else(|| "(unset)".to_string()),
                };
                format!("  {}: {value}", key.name())
            })
            .collect()
    }

    pub fn print_all(&self) {
        println!("Current configuration ({}):", path_display(Config::active_path()));
        for line in self.describe() {
            println!("{line}");
        }
    }
}
