use std::collections::HashMap;
use std::env;
use std::ffi::OsString;
use std::sync::{Mutex, MutexGuard};

use crate::core::config::data::Config;

static ENV_LOCK: Mutex<()> = Mutex::new(());
static CONFIG_LOCK: Mutex<()> = Mutex::new(());

/// Serializes environment mutation across tests and restores every touched
/// variable on drop.
pub struct TestEnvVarGuard {
    saved: HashMap<String, Option<OsString>>,
    _lock: MutexGuard<'static, ()>,
}

impl TestEnvVarGuard {
    pub fn new() -> Self {
        Self {
            saved: HashMap::new(),
            _lock: ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner()),
        }
    }

    pub fn set_var(&mut self, key: &str, value: &str) {
        self.remember(key);
        env::set_var(key, value);
    }

    pub fn remove_var(&mut self, key: &str) {
        self.remember(key);
        env::remove_var(key);
    }

    fn remember(&mut self, key: &str) {
        self.saved
            .entry(key.to_string())
            .or_insert_with(|| env::var_os(key));
    }
}

impl Drop for TestEnvVarGuard {
    fn drop(&mut self) {
        for (key, value) in self.saved.drain() {
            match value {
                Some(value) => env::set_var(&key, value),
                None => env::remove_var(&key),
            }
        }
    }
}

/// Points configuration loading at a temporary file for the duration of `f`.
pub fn with_test_config_env<F, T>(f: F) -> T
where
    F: FnOnce(&std::path::Path) -> T,
{
    let _lock = CONFIG_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let temp_dir = tempfile::TempDir::new().expect("temp dir");
    let config_path = temp_dir.path().join("config.toml");
    Config::set_test_config_path(config_path.clone());
    let result = f(&config_path);
    Config::clear_test_config_override();
    result
}
