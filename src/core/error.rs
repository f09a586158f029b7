//! Error taxonomy for calls against the agent service.

use std::error::Error as StdError;
use std::fmt;

use serde_json::Value;

/// Coarse classification used to pick a notification and the global
/// side effects of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connect failures, timeouts, and broken response bodies.
    Transport,
    /// 5xx responses.
    Server,
    /// 4xx responses other than authentication and validation.
    Client,
    /// 401 and 403 responses.
    Auth,
    /// A response body (or event-stream frame) that could not be decoded.
    Decode,
    /// Well-formed input the service rejected on semantic grounds.
    Validation,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

impl ErrorKind {
    pub fn title(self) -> &'static str {
        match self {
            ErrorKind::Transport => "Network error",
            ErrorKind::Server => "Server error",
            ErrorKind::Client => "Request error",
            ErrorKind::Auth => "Authentication failed",
            ErrorKind::Decode => "Unreadable response",
            ErrorKind::Validation => "Validation error",
            ErrorKind::Unknown => "Unknown error",
        }
    }

    pub fn default_message(self) -> &'static str {
        match self {
            ErrorKind::Transport => {
                "Unable to reach the server. Check your network connection and try again."
            }
            ErrorKind::Server => "The server is temporarily unavailable. Please try again later.",
            ErrorKind::Client => "The request was invalid. Please check it and try again.",
            ErrorKind::Auth => "Your login has expired. Please sign in again.",
            ErrorKind::Decode => "The server sent a response that could not be read.",
            ErrorKind::Validation => "The submitted data is not in the expected format.",
            ErrorKind::Unknown => {
                "An unknown error occurred. Please try again later or contact an administrator."
            }
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            ErrorKind::Client | ErrorKind::Validation => Severity::Warning,
            _ => Severity::Error,
        }
    }

    /// Maps a non-success HTTP status onto the taxonomy.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => ErrorKind::Auth,
            422 => ErrorKind::Validation,
            400..=499 => ErrorKind::Client,
            500..=599 => ErrorKind::Server,
            _ => ErrorKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub status: Option<u16>,
    /// Server-provided explanation, when the error body carried one.
    pub detail: Option<String>,
}

impl ApiError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            status: None,
            detail: None,
        }
    }

    pub fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            detail: Some(detail.into()),
        }
    }

    pub fn transport(detail: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Transport, detail)
    }

    pub fn decode(detail: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Decode, detail)
    }

    /// Builds an error from a non-success status and whatever body came with it.
    pub fn from_response(status: u16, body: &str) -> Self {
        Self {
            kind: ErrorKind::from_status(status),
            status: Some(status),
            detail: extract_error_detail(body),
        }
    }

    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self {
                kind: ErrorKind::from_status(status.as_u16()),
                status: Some(status.as_u16()),
                detail: Some(err.to_string()),
            };
        }

        let kind = if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            ErrorKind::Transport
        } else if err.is_decode() {
            ErrorKind::Decode
        } else {
            ErrorKind::Unknown
        };
        Self::with_detail(kind, err.to_string())
    }

    pub fn is_auth(&self) -> bool {
        self.kind == ErrorKind::Auth
    }

    /// The message shown to the user when no caller override applies.
    pub fn user_message(&self) -> &str {
        self.detail
            .as_deref()
            .filter(|detail| !detail.trim().is_empty())
            .unwrap_or_else(|| self.kind.default_message())
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} ({}): {}", self.kind.title(), status, self.user_message()),
            None => write!(f, "{}: {}", self.kind.title(), self.user_message()),
        }
    }
}

impl StdError for ApiError {}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        Self::from_reqwest(&err)
    }
}

/// Pulls a human-readable explanation out of an error body.
///
/// FastAPI answers with `{"detail": ...}`; other layers use `message` or an
/// OpenAI-style `error.message`. Plain-text bodies are used as-is.
pub fn extract_error_detail(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
        return Some(collapse_whitespace(trimmed));
    };

    let summary = match value.get("detail") {
        Some(Value::String(text)) => Some(text.clone()),
        Some(Value::Array(items)) => items
            .iter()
            .find_map(|item| item.get("msg").and_then(Value::as_str))
            .map(str::to_owned),
        _ => None,
    }
    .or_else(|| {
        value
            .pointer("/error/message")
            .and_then(Value::as_str)
            .map(str::to_owned)
    })
    .or_else(|| value.get("message").and_then(Value::as_str).map(str::to_owned));

    summary
        .map(|text| collapse_whitespace(&text))
        .filter(|text| !text.is_empty())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
