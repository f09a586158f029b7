//! Wire payloads exchanged with the agent service.
//!
//! Request bodies mirror what the service's session routes accept; response
//! types only declare the fields the client reads, everything else is ignored
//! by serde.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod client;

/// Tool name the service expects on every authorization decision.
pub const AUTHORIZED_TOOL_NAME: &str = "send_email";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Agent,
}

/// Body of `POST /sessions/{id}/messages/`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateMessageRequest {
    pub text: String,
    pub metadata: Map<String, Value>,
    pub sender: Sender,
}

impl CreateMessageRequest {
    pub fn from_user(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: Map::new(),
            sender: Sender::User,
        }
    }
}

/// Body of `POST /sessions/{id}/messages/tools/`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDecisionRequest {
    pub tool_name: String,
    pub parameters: Map<String, Value>,
    pub is_authorized: bool,
}

impl ToolDecisionRequest {
    pub fn new(parameters: Map<String, Value>, is_authorized: bool) -> Self {
        Self {
            tool_name: AUTHORIZED_TOOL_NAME.to_string(),
            parameters,
            is_authorized,
        }
    }
}

/// Body of `POST /sessions/`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateSessionRequest {
    pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionListItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub last_message_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionListResponse {
    #[serde(default)]
    pub data: Vec<SessionListItem>,
}

/// A created session as returned by `POST /sessions/`.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// One entry of `GET /sessions/{id}/messages/`.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub sender: Sender,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Envelope returned by endpoints that only acknowledge.
#[derive(Debug, Clone, Deserialize)]
pub struct BaseResponse {
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

fn default_success() -> bool {
    true
}
