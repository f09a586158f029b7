//! Collaborators that receive failures: the notification surface and the
//! credential holder that must be cleared when the service rejects the token.

use std::sync::Arc;

use tracing::warn;

use crate::core::error::{ApiError, Severity};

/// One user-facing notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub severity: Severity,
    pub title: String,
    pub message: String,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Holder of the opaque bearer credential.
pub trait CredentialStore: Send + Sync {
    fn bearer(&self) -> Option<String>;

    /// Forgets the stored credential so the next run has to authenticate again.
    fn invalidate(&self);
}

/// Per-call overrides for how a failure is surfaced.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Replaces the message that would otherwise be shown.
    pub custom_message: Option<String>,
    /// Leaves a 401/403 to the caller instead of clearing the credential.
    pub skip_auth_handler: bool,
}

impl CallOptions {
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            custom_message: Some(message.into()),
            skip_auth_handler: false,
        }
    }

    pub fn skipping_auth_handler(mut self) -> Self {
        self.skip_auth_handler = true;
        self
    }
}

/// Applies the failure policy: every error is announced exactly once, and an
/// authentication failure additionally invalidates the credential unless the
/// call opted out.
#[derive(Clone)]
pub struct ErrorReporter {
    notifier: Arc<dyn Notifier>,
    credentials: Arc<dyn CredentialStore>,
}

impl ErrorReporter {
    pub fn new(notifier: Arc<dyn Notifier>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            notifier,
            credentials,
        }
    }

    pub fn report(&self, error: &ApiError, options: &CallOptions) {
        let message = options
            .custom_message
            .clone()
            .unwrap_or_else(|| error.user_message().to_string());

        warn!(kind = ?error.kind, status = ?error.status, "request failed: {}", error);

        self.notifier.notify(Notice {
            severity: error.kind.severity(),
            title: error.kind.title().to_string(),
            message,
        });

        if error.is_auth() && !options.skip_auth_handler {
            self.credentials.invalidate();
        }
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingNotifier {
        notices: Mutex<Vec<Notice>>,
    }

    impl RecordingNotifier {
        pub fn notices(&self) -> Vec<Notice> {
            self.notices.lock().unwrap().clone()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, notice: Notice) {
            self.notices.lock().unwrap().push(notice);
        }
    }

    pub fn reporter_with(
        token: &str,
    ) -> (
        ErrorReporter,
        Arc<RecordingNotifier>,
        Arc<crate::auth::StaticCredentials>,
    ) {
        let notifier = Arc::new(RecordingNotifier::default());
        let credentials = Arc::new(crate::auth::StaticCredentials::new(token));
        let reporter = ErrorReporter::new(notifier.clone(), credentials.clone());
        (reporter, notifier, credentials)
    }
}
