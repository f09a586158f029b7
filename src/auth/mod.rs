//! Bearer credential storage.
//!
//! Tokens are opaque to the client: they are obtained elsewhere, stored in
//! the system keyring under the service's base URL, and attached to every
//! request. `CAUSETTE_TOKEN` serves as a fallback when the keyring holds
//! nothing for the configured service.

use std::env;
use std::sync::Mutex;

use keyring::Entry;
use tracing::{debug, warn};

use crate::core::keyring::KeyringAccessError;
use crate::core::notify::CredentialStore;

pub const KEYRING_SERVICE: &str = "causette";
pub const TOKEN_ENV_VAR: &str = "CAUSETTE_TOKEN";

#[derive(Clone, Debug, PartialEq, Eq)]
enum CachedToken {
    Present(String),
    Missing,
}

impl CachedToken {
    fn token(&self) -> Option<String> {
        match self {
            CachedToken::Present(token) => Some(token.clone()),
            CachedToken::Missing => None,
        }
    }
}

/// Credentials backed by the system keyring, one entry per service URL.
pub struct KeyringCredentials {
    account: String,
    use_keyring: bool,
    cached: Mutex<Option<CachedToken>>,
}

impl KeyringCredentials {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_keyring(base_url, true)
    }

    /// Construct credentials, optionally disabling keyring access (useful for tests).
    pub fn with_keyring(base_url: impl Into<String>, use_keyring: bool) -> Self {
        Self {
            account: base_url.into(),
            use_keyring,
            cached: Mutex::new(None),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn store_token(&self, token: &str) -> Result<(), KeyringAccessError> {
        if self.use_keyring {
            let entry = Entry::new(KEYRING_SERVICE, &self.account)?;
            entry.set_password(token)?;
        }
        self.cache(CachedToken::Present(token.to_string()));
        Ok(())
    }

    /// Deletes the stored token. Returns whether an entry existed.
    pub fn remove_token(&self) -> Result<bool, KeyringAccessError> {
        let removed = if self.use_keyring {
            let entry = Entry::new(KEYRING_SERVICE, &self.account)?;
            match entry.delete_credential() {
                Ok(()) => true,
                Err(keyring::Error::NoEntry) => false,
                Err(err) => return Err(err.into()),
            }
        } else {
            matches!(self.cached(), Some(CachedToken::Present(_)))
        };
        self.cache(CachedToken::Missing);
        Ok(removed)
    }

    fn lookup_keyring(&self) -> Result<Option<String>, KeyringAccessError> {
        if !self.use_keyring {
            return Ok(None);
        }
        let entry = Entry::new(KEYRING_SERVICE, &self.account)?;
        match entry.get_password() {
            Ok(token) => Ok(Some(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn resolve(&self) -> Option<CachedToken> {
        match self.lookup_keyring() {
            Ok(Some(token)) => return Some(CachedToken::Present(token)),
            Ok(None) => {}
            Err(err) if err.is_recoverable() => {
                // Leave the cache empty so the next request retries the keyring.
                warn!(account = %self.account, error = %err, "keyring lookup failed");
                return None;
            }
            Err(err) => warn!(account = %self.account, error = %err, "keyring lookup failed"),
        }
        Some(env_token().map_or(CachedToken::Missing, CachedToken::Present))
    }

    fn cached(&self) -> Option<CachedToken> {
        self.cached
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn cache(&self, entry: CachedToken) {
        *self
            .cached
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(entry);
    }
}

impl CredentialStore for KeyringCredentials {
    fn bearer(&self) -> Option<String> {
        if let Some(cached) = self.cached() {
            return cached.token();
        }
        match self.resolve() {
            Some(entry) => {
                let token = entry.token();
                self.cache(entry);
                token
            }
            None => env_token(),
        }
    }

    fn invalidate(&self) {
        if self.use_keyring {
            match Entry::new(KEYRING_SERVICE, &self.account).and_then(|e| e.delete_credential()) {
                Ok(()) | Err(keyring::Error::NoEntry) => {}
                Err(err) => warn!(account = %self.account, error = %err, "failed to delete token"),
            }
        }
        debug!(account = %self.account, "credential invalidated");
        self.cache(CachedToken::Missing);
    }
}

fn env_token() -> Option<String> {
    env::var(TOKEN_ENV_VAR)
        .ok()
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// An in-memory token, used for `--token` and in tests.
#[derive(Debug, Default)]
pub struct StaticCredentials {
    token: Mutex<Option<String>>,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

impl CredentialStore for StaticCredentials {
    fn bearer(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn invalidate(&self) {
        self.token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }
}
