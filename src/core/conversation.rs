//! In-memory conversation model: sessions, their messages, and the sections
//! of streamed agent turns.
//!
//! [`ConversationStore`] is the single mutation point. Observers subscribe to
//! [`StoreEvent`]s and re-read whatever changed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::api::{MessageRecord, Sender, SessionListItem, SessionRecord};

pub type SessionId = String;
pub type MessageId = String;

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: SessionId,
    pub title: String,
    /// Denormalized preview of the latest message.
    pub preview: Option<String>,
    pub last_activity: Option<DateTime<Utc>>,
}

impl From<SessionListItem> for Session {
    fn from(item: SessionListItem) -> Self {
        Self {
            id: item.id,
            title: item.title,
            preview: item.last_message,
            last_activity: item.last_message_time.or(item.created_at),
        }
    }
}

impl From<SessionRecord> for Session {
    fn from(record: SessionRecord) -> Self {
        Self {
            id: record.id,
            title: record.title,
            preview: None,
            last_activity: record.updated_at.or(record.created_at),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Agent,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Agent => "agent",
        }
    }
}

impl From<Sender> for Role {
    fn from(sender: Sender) -> Self {
        match sender {
            Sender::User => Role::User,
            Sender::Agent => Role::Agent,
        }
    }
}

/// One block of a streamed agent turn.
#[derive(Debug, Clone, PartialEq)]
pub enum Section {
    Text(String),
    ToolOutput(Value),
}

impl Section {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Section::Text(content) => Some(content),
            Section::ToolOutput(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    /// User messages carry one opaque text payload.
    Text(String),
    /// Agent messages are entirely described by their sections.
    Sections(Vec<Section>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: MessageContent,
    pub created_at: DateTime<Utc>,
    /// Set once the stream that produced the message has terminated.
    pub finalized: bool,
}

impl Message {
    pub fn user(id: MessageId, text: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            role: Role::User,
            content: MessageContent::Text(text.into()),
            created_at,
            finalized: true,
        }
    }

    pub fn agent(id: MessageId, sections: Vec<Section>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            role: Role::Agent,
            content: MessageContent::Sections(sections),
            created_at,
            finalized: false,
        }
    }

    pub fn sections(&self) -> &[Section] {
        match &self.content {
            MessageContent::Sections(sections) => sections,
            MessageContent::Text(_) => &[],
        }
    }

    /// Content of the last text section, or the text of a user message.
    pub fn last_text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(text) => Some(text),
            MessageContent::Sections(sections) => sections.iter().rev().find_map(Section::as_text),
        }
    }

    fn from_record(record: MessageRecord, fallback_time: DateTime<Utc>) -> Self {
        let created_at = record.timestamp.unwrap_or(fallback_time);
        let mut message = match Role::from(record.sender) {
            Role::User => Message::user(record.id, record.text, created_at),
            Role::Agent => Message::agent(record.id, vec![Section::Text(record.text)], created_at),
        };
        message.finalized = true;
        message
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    SessionsChanged,
    MessagesReplaced {
        session_id: SessionId,
    },
    MessageAdded {
        session_id: SessionId,
        message_id: MessageId,
    },
    SectionsUpdated {
        session_id: SessionId,
        message_id: MessageId,
    },
    MessageFinalized {
        session_id: SessionId,
        message_id: MessageId,
    },
}

#[derive(Debug, Default)]
pub struct ConversationStore {
    sessions: Vec<Session>,
    messages: HashMap<SessionId, Vec<Message>>,
    selected: Option<SessionId>,
    next_local_id: u64,
    events: Option<mpsc::UnboundedSender<StoreEvent>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts delivering change notifications. A later call replaces the
    /// previous subscriber.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<StoreEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn session(&self, session_id: &str) -> Option<&Session> {
        self.sessions.iter().find(|session| session.id == session_id)
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn select(&mut self, session_id: &str) -> bool {
        if self.session(session_id).is_none() {
            return false;
        }
        self.selected = Some(session_id.to_string());
        true
    }

    /// Replaces the session list with a fresh listing. Previews refreshed
    /// locally survive when the listing carries none.
    pub fn replace_sessions(&mut self, sessions: Vec<Session>) {
        let previous: HashMap<SessionId, Session> = self
            .sessions
            .drain(..)
            .map(|session| (session.id.clone(), session))
            .collect();

        self.sessions = sessions
            .into_iter()
            .map(|mut session| {
                if let Some(known) = previous.get(&session.id) {
                    if session.preview.is_none() {
                        session.preview = known.preview.clone();
                    }
                    if known.last_activity > session.last_activity {
                        session.last_activity = known.last_activity;
                    }
                }
                session
            })
            .collect();

        self.messages
            .retain(|id, _| self.sessions.iter().any(|session| &session.id == id));

        let selection_valid = self
            .selected
            .as_deref()
            .is_some_and(|id| self.session(id).is_some());
        if !selection_valid {
            self.selected = self.sessions.first().map(|session| session.id.clone());
        }
        self.emit(StoreEvent::SessionsChanged);
    }

    /// Adds a session at the front of the list and selects it.
    pub fn insert_session(&mut self, session: Session) {
        self.sessions.retain(|existing| existing.id != session.id);
        self.selected = Some(session.id.clone());
        self.sessions.insert(0, session);
        self.emit(StoreEvent::SessionsChanged);
    }

    pub fn remove_session(&mut self, session_id: &str) -> Option<Session> {
        let index = self
            .sessions
            .iter()
            .position(|session| session.id == session_id)?;
        let removed = self.sessions.remove(index);
        self.messages.remove(session_id);
        if self.selected.as_deref() == Some(session_id) {
            self.selected = None;
        }
        self.emit(StoreEvent::SessionsChanged);
        Some(removed)
    }

    pub fn messages(&self, session_id: &str) -> &[Message] {
        self.messages
            .get(session_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn message(&self, session_id: &str, message_id: &str) -> Option<&Message> {
        self.messages(session_id)
            .iter()
            .find(|message| message.id == message_id)
    }

    /// Replaces a session's history with records fetched from the service.
    pub fn replace_messages(&mut self, session_id: &str, records: Vec<MessageRecord>) {
        let now = Utc::now();
        let messages = records
            .into_iter()
            .map(|record| Message::from_record(record, now))
            .collect();
        self.messages.insert(session_id.to_string(), messages);
        self.emit(StoreEvent::MessagesReplaced {
            session_id: session_id.to_string(),
        });
    }

    pub fn push_user_message(
        &mut self,
        session_id: &str,
        text: impl Into<String>,
        at: DateTime<Utc>,
    ) -> MessageId {
        let id = self.next_id("user");
        self.push_message(session_id, Message::user(id.clone(), text, at));
        id
    }

    /// Creates the empty placeholder an agent stream folds into.
    pub fn begin_agent_message(&mut self, session_id: &str, at: DateTime<Utc>) -> MessageId {
        let id = self.next_id("agent");
        self.push_message(session_id, Message::agent(id.clone(), Vec::new(), at));
        id
    }

    /// Runs `update` against the sections of a live agent message. Returns
    /// `None` when the message is unknown, is a user message, or has been
    /// finalized.
    pub fn update_sections<R>(
        &mut self,
        session_id: &str,
        message_id: &str,
        update: impl FnOnce(&mut Vec<Section>) -> R,
    ) -> Option<R> {
        let message = self
            .messages
            .get_mut(session_id)?
            .iter_mut()
            .find(|message| message.id == message_id)?;
        if message.finalized {
            return None;
        }
        let MessageContent::Sections(sections) = &mut message.content else {
            return None;
        };

        let result = update(sections);
        self.emit(StoreEvent::SectionsUpdated {
            session_id: session_id.to_string(),
            message_id: message_id.to_string(),
        });
        Some(result)
    }

    /// Marks a message immutable.
    pub fn finalize_message(&mut self, session_id: &str, message_id: &str) -> bool {
        let Some(message) = self
            .messages
            .get_mut(session_id)
            .and_then(|messages| messages.iter_mut().find(|message| message.id == message_id))
        else {
            return false;
        };
        if message.finalized {
            return false;
        }
        message.finalized = true;
        self.emit(StoreEvent::MessageFinalized {
            session_id: session_id.to_string(),
            message_id: message_id.to_string(),
        });
        true
    }

    /// Sets the session preview to `text` and bumps its activity time.
    pub fn touch_session(&mut self, session_id: &str, text: &str, at: DateTime<Utc>) {
        let Some(session) = self
            .sessions
            .iter_mut()
            .find(|session| session.id == session_id)
        else {
            return;
        };
        session.preview = Some(text.to_string());
        session.last_activity = Some(at);
        self.emit(StoreEvent::SessionsChanged);
    }

    /// Refreshes the session preview from the message's last text section.
    /// Returns false, leaving the session untouched, when there is none.
    pub fn refresh_preview(&mut self, session_id: &str, message_id: &str, at: DateTime<Utc>) -> bool {
        let Some(text) = self
            .message(session_id, message_id)
            .filter(|message| message.role == Role::Agent)
            .and_then(Message::last_text)
            .map(str::to_owned)
        else {
            return false;
        };
        self.touch_session(session_id, &text, at);
        true
    }

    fn push_message(&mut self, session_id: &str, message: Message) {
        let message_id = message.id.clone();
        self.messages
            .entry(session_id.to_string())
            .or_default()
            .push(message);
        self.emit(StoreEvent::MessageAdded {
            session_id: session_id.to_string(),
            message_id,
        });
    }

    fn next_id(&mut self, prefix: &str) -> MessageId {
        self.next_local_id += 1;
        format!("local-{prefix}-{}", self.next_local_id)
    }

    fn emit(&self, event: StoreEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

/// Shared handle to the store. Writers hold the lock only for synchronous
/// updates, which serializes mutations of any one message.
#[derive(Debug, Clone, Default)]
pub struct SharedStore(Arc<Mutex<ConversationStore>>);

impl SharedStore {
    pub fn new(store: ConversationStore) -> Self {
        Self(Arc::new(Mutex::new(store)))
    }

    pub fn lock(&self) -> MutexGuard<'_, ConversationStore> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session(id: &str) -> Session {
        Session {
            id: id.to_string(),
            title: format!("Session {id}"),
            preview: None,
            last_activity: None,
        }
    }

    #[test]
    fn replace_sessions_selects_first_and_keeps_local_previews() {
        let mut store = ConversationStore::new();
        store.replace_sessions(vec![session("a"), session("b")]);
        assert_eq!(store.selected(), Some("a"));

        let now = Utc::now();
        store.touch_session("b", "local preview", now);
        store.select("b");
        store.replace_sessions(vec![session("b"), session("c")]);

        assert_eq!(store.selected(), Some("b"));
        let b = store.session("b").unwrap();
        assert_eq!(b.preview.as_deref(), Some("local preview"));
        assert_eq!(b.last_activity, Some(now));
    }

    #[test]
    fn insert_session_goes_first_and_is_selected() {
        let mut store = ConversationStore::new();
        store.replace_sessions(vec![session("a")]);
        store.insert_session(session("n"));
        assert_eq!(store.sessions()[0].id, "n");
        assert_eq!(store.selected(), Some("n"));
    }

    #[test]
    fn remove_session_drops_messages_and_selection() {
        let mut store = ConversationStore::new();
        store.replace_sessions(vec![session("a")]);
        store.push_user_message("a", "hi", Utc::now());
        assert!(store.remove_session("a").is_some());
        assert!(store.messages("a").is_empty());
        assert_eq!(store.selected(), None);
        assert!(store.remove_session("a").is_none());
    }

    #[test]
    fn sections_only_update_on_live_agent_messages() {
        let mut store = ConversationStore::new();
        store.replace_sessions(vec![session("a")]);
        let user_id = store.push_user_message("a", "hi", Utc::now());
        let agent_id = store.begin_agent_message("a", Utc::now());

        assert!(store
            .update_sections("a", &user_id, |sections| sections.push(Section::Text("x".into())))
            .is_none());
        assert!(store
            .update_sections("a", &agent_id, |sections| sections.push(Section::Text("x".into())))
            .is_some());

        assert!(store.finalize_message("a", &agent_id));
        assert!(!store.finalize_message("a", &agent_id));
        assert!(store
            .update_sections("a", &agent_id, |sections| sections.push(Section::Text("y".into())))
            .is_none());
        assert_eq!(
            store.message("a", &agent_id).unwrap().sections(),
            &[Section::Text("x".into())]
        );
    }

    #[test]
    fn refresh_preview_uses_last_text_section() {
        let mut store = ConversationStore::new();
        store.replace_sessions(vec![session("a")]);
        let agent_id = store.begin_agent_message("a", Utc::now());
        assert!(!store.refresh_preview("a", &agent_id, Utc::now()));
        assert_eq!(store.session("a").unwrap().preview, None);

        store.update_sections("a", &agent_id, |sections| {
            sections.push(Section::Text("first".into()));
            sections.push(Section::ToolOutput(json!({"k": 1})));
            sections.push(Section::Text("second".into()));
            sections.push(Section::ToolOutput(json!(null)));
        });
        assert!(store.refresh_preview("a", &agent_id, Utc::now()));
        assert_eq!(
            store.session("a").unwrap().preview.as_deref(),
            Some("second")
        );
    }

    #[test]
    fn fetched_history_maps_agent_text_to_one_section() {
        let mut store = ConversationStore::new();
        store.replace_sessions(vec![session("a")]);
        let records: Vec<MessageRecord> = serde_json::from_value(json!([
            {"id": "1", "sender": "user", "text": "hi"},
            {"id": "2", "sender": "agent", "text": "hello"}
        ]))
        .unwrap();
        store.replace_messages("a", records);

        let messages = store.messages("a");
        assert_eq!(messages[0].content, MessageContent::Text("hi".into()));
        assert_eq!(messages[1].sections(), &[Section::Text("hello".into())]);
        assert!(messages.iter().all(|message| message.finalized));
    }

    #[test]
    fn subscribers_see_mutations_in_order() {
        let mut store = ConversationStore::new();
        let mut rx = store.subscribe();
        store.replace_sessions(vec![session("a")]);
        let agent_id = store.begin_agent_message("a", Utc::now());
        store.update_sections("a", &agent_id, |sections| sections.push(Section::Text("x".into())));

        assert_eq!(rx.try_recv().unwrap(), StoreEvent::SessionsChanged);
        assert_eq!(
            rx.try_recv().unwrap(),
            StoreEvent::MessageAdded {
                session_id: "a".into(),
                message_id: agent_id.clone()
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            StoreEvent::SectionsUpdated {
                session_id: "a".into(),
                message_id: agent_id
            }
        );
        assert!(rx.try_recv().is_err());
    }
}
