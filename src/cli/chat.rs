//! The line-oriented chat loop.
//!
//! Input is read from stdin; replies are printed as the conversation store
//! reports section updates, so text shows up while it streams.

use std::collections::HashMap;
use std::error::Error;
use std::future::Future;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, warn};

use crate::api::client::ApiClient;
use crate::api::AUTHORIZED_TOOL_NAME;
use crate::cli::{one_line, StderrNotifier};
use crate::commands::{help_text, process_input, CommandResult};
use crate::core::conversation::{
    ConversationStore, Message, MessageId, Role, Section, Session, SessionId, SharedStore,
    StoreEvent,
};
use crate::core::notify::{CallOptions, CredentialStore, ErrorReporter};
use crate::core::stream::{
    AuthorizationDecision, AuthorizationRequest, ChatTransport, RejectReason, StreamOutcome,
    StreamSession,
};
use crate::utils::logging::{render_entry, render_section, TranscriptLog};

type InputLines = Lines<BufReader<Stdin>>;

pub struct ChatOptions {
    pub session: Option<String>,
    pub log_file: Option<String>,
    pub idle_timeout: Option<Duration>,
}

pub async fn run_chat(
    client: Arc<ApiClient>,
    credentials: Arc<dyn CredentialStore>,
    options: ChatOptions,
) -> Result<(), Box<dyn Error>> {
    let store = SharedStore::new(ConversationStore::new());
    let events = store.lock().subscribe();
    let mut chat = ChatLoop {
        reporter: ErrorReporter::new(Arc::new(StderrNotifier), credentials),
        transcript: TranscriptLog::new(options.log_file)?,
        idle_timeout: options.idle_timeout,
        streams: HashMap::new(),
        renderer: Renderer::default(),
        client,
        store,
        events,
    };

    println!(
        "Connected to {}. Type /help for commands.",
        chat.client.base_url()
    );
    chat.load_sessions(options.session.as_deref()).await;

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let line = tokio::select! {
            line = input.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        match process_input(&line) {
            CommandResult::Quit => break,
            result => chat.execute(result, &mut input).await?,
        }
    }
    Ok(())
}

enum Step {
    Done(StreamOutcome),
    Event(StoreEvent),
    Interrupt,
}

struct ChatLoop {
    client: Arc<ApiClient>,
    store: SharedStore,
    events: UnboundedReceiver<StoreEvent>,
    reporter: ErrorReporter,
    streams: HashMap<SessionId, Arc<StreamSession>>,
    renderer: Renderer,
    transcript: TranscriptLog,
    idle_timeout: Option<Duration>,
}

impl ChatLoop {
    async fn execute(
        &mut self,
        result: CommandResult,
        input: &mut InputLines,
    ) -> Result<(), Box<dyn Error>> {
        match result {
            CommandResult::ProcessAsMessage(text) => self.send(&text, input).await?,
            CommandResult::ListSessions => self.print_sessions(),
            CommandResult::NewSession(title) => self.create_session(title).await,
            CommandResult::SwitchSession(id) => self.switch_session(&id).await,
            CommandResult::DeleteSession(id) => self.delete_session(&id).await,
            CommandResult::ShowHistory => match self.selected() {
                Some(id) => {
                    self.load_history(&id).await;
                    self.print_history(&id);
                }
                None => eprintln!("No session selected. Use /new to create one."),
            },
            CommandResult::Log(None) => match self.transcript.toggle_logging() {
                Ok(message) => println!("{message}"),
                Err(err) => eprintln!("Log error: {err}"),
            },
            CommandResult::Log(Some(file)) => match self.transcript.set_log_file(file) {
                Ok(message) => println!("{message}"),
                Err(err) => eprintln!("Log error: {err}"),
            },
            CommandResult::Help => println!("{}", help_text()),
            CommandResult::Usage(usage) => eprintln!("Usage: {usage}"),
            CommandResult::Quit => {}
        }
        Ok(())
    }

    async fn send(&mut self, text: &str, input: &mut InputLines) -> Result<(), Box<dyn Error>> {
        let Some(session_id) = self.selected() else {
            eprintln!("No session selected. Use /new to create one.");
            return Ok(());
        };
        let stream = self.stream_for(&session_id);

        let mut outcome = self.drive(&stream, stream.send(text)).await;
        loop {
            match outcome {
                StreamOutcome::AwaitingAuthorization(request) => {
                    let decision = self.ask_authorization(&request, input).await?;
                    outcome = self
                        .drive(&stream, stream.resolve_authorization(decision))
                        .await;
                }
                StreamOutcome::Rejected(reason) => {
                    eprintln!("{}", describe_rejection(reason));
                    break;
                }
                StreamOutcome::Aborted => {
                    println!("(stopped)");
                    break;
                }
                StreamOutcome::Completed | StreamOutcome::Failed(_) => break,
            }
        }
        Ok(())
    }

    /// Runs one request/stream cycle, printing updates as they land.
    /// Ctrl-C cancels the cycle.
    async fn drive(
        &mut self,
        stream: &StreamSession,
        turn: impl Future<Output = StreamOutcome>,
    ) -> StreamOutcome {
        tokio::pin!(turn);
        let outcome = loop {
            let step = tokio::select! {
                outcome = &mut turn => Step::Done(outcome),
                Some(event) = self.events.recv() => Step::Event(event),
                _ = tokio::signal::ctrl_c() => Step::Interrupt,
            };
            match step {
                Step::Done(outcome) => break outcome,
                Step::Event(event) => self.render(event),
                Step::Interrupt => {
                    if stream.cancel().await {
                        debug!(session_id = stream.session_id(), "turn cancelled by user");
                    }
                }
            }
        };
        while let Ok(event) = self.events.try_recv() {
            self.render(event);
        }
        outcome
    }

    fn render(&mut self, event: StoreEvent) {
        let mut out = io::stdout();
        let store = self.store.lock();
        let result = match event {
            StoreEvent::SectionsUpdated {
                session_id,
                message_id,
            } => match store.message(&session_id, &message_id) {
                Some(message) => self.renderer.render_update(message, &mut out),
                None => Ok(()),
            },
            StoreEvent::MessageAdded {
                session_id,
                message_id,
            } => {
                if let Some(message) = store
                    .message(&session_id, &message_id)
                    .filter(|message| message.role == Role::User)
                {
                    self.log(message);
                }
                Ok(())
            }
            StoreEvent::MessageFinalized {
                session_id,
                message_id,
            } => {
                if let Some(message) = store.message(&session_id, &message_id) {
                    self.log(message);
                }
                self.renderer.finish(&message_id, &mut out)
            }
            StoreEvent::SessionsChanged | StoreEvent::MessagesReplaced { .. } => Ok(()),
        };
        if let Err(err) = result {
            warn!(error = %err, "failed to write to stdout");
        }
    }

    fn log(&self, message: &Message) {
        if let Err(err) = self.transcript.log_message(message) {
            warn!(error = %err, "failed to write transcript");
        }
    }

    async fn ask_authorization(
        &mut self,
        request: &AuthorizationRequest,
        input: &mut InputLines,
    ) -> Result<AuthorizationDecision, Box<dyn Error>> {
        self.renderer.break_line(&mut io::stdout())?;
        println!("The agent asks to run {AUTHORIZED_TOOL_NAME}:");
        if let Some(to) = request.to() {
            println!("  To:      {to}");
        }
        if let Some(subject) = request.subject() {
            println!("  Subject: {subject}");
        }
        if let Some(body) = request.body() {
            println!();
            for line in body.lines() {
                println!("    {line}");
            }
        }

        loop {
            print!("Allow? [y/n] ");
            io::stdout().flush()?;
            let answer = tokio::select! {
                line = input.next_line() => line?,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(answer) = answer else {
                println!();
                return Ok(AuthorizationDecision::Deny);
            };
            match answer.trim().to_ascii_lowercase().as_str() {
                "y" | "yes" => return Ok(AuthorizationDecision::Approve),
                "n" | "no" => return Ok(AuthorizationDecision::Deny),
                _ => continue,
            }
        }
    }

    async fn load_sessions(&mut self, preferred: Option<&str>) {
        match self.client.list_sessions().await {
            Ok(items) => self
                .store
                .lock()
                .replace_sessions(items.into_iter().map(Session::from).collect()),
            Err(err) => {
                self.reporter
                    .report(&err, &CallOptions::with_message("Failed to load sessions"));
                return;
            }
        }

        if let Some(id) = preferred {
            if !self.store.lock().select(id) {
                eprintln!("⚠️  Session {id} not found; opening the most recent one.");
            }
        }
        match self.selected() {
            Some(id) => {
                self.load_history(&id).await;
                self.print_history(&id);
            }
            None => self.create_session(None).await,
        }
    }

    async fn create_session(&mut self, title: Option<String>) {
        let title = title.unwrap_or_else(|| {
            format!("New session {}", self.store.lock().sessions().len() + 1)
        });
        match self.client.create_session(&title).await {
            Ok(record) => {
                let id = record.id.clone();
                {
                    let mut store = self.store.lock();
                    store.insert_session(Session::from(record));
                    store.replace_messages(&id, Vec::new());
                }
                println!("Switched to new session {id} ({title})");
            }
            Err(err) => self
                .reporter
                .report(&err, &CallOptions::with_message("Failed to create session")),
        }
    }

    async fn switch_session(&mut self, id: &str) {
        if !self.store.lock().select(id) {
            eprintln!("Unknown session {id}. Use /sessions to list them.");
            return;
        }
        self.load_history(id).await;
        self.print_history(id);
    }

    async fn delete_session(&mut self, id: &str) {
        if self
            .streams
            .get(id)
            .is_some_and(|stream| stream.phase().is_active())
        {
            eprintln!("A reply is still streaming in session {id}.");
            return;
        }
        if self.store.lock().session(id).is_none() {
            eprintln!("Unknown session {id}. Use /sessions to list them.");
            return;
        }
        if let Err(err) = self.client.delete_session(id).await {
            self.reporter
                .report(&err, &CallOptions::with_message("Failed to delete session"));
            return;
        }

        self.streams.remove(id);
        let reselected = {
            let mut store = self.store.lock();
            store.remove_session(id);
            match store.selected() {
                Some(_) => None,
                None => {
                    let first = store.sessions().first().map(|session| session.id.clone());
                    if let Some(first) = &first {
                        store.select(first);
                    }
                    first
                }
            }
        };
        println!("Deleted session {id}");
        if let Some(next) = reselected {
            println!("Now in session {next}");
            self.load_history(&next).await;
        }
    }

    async fn load_history(&mut self, id: &str) {
        match self.client.fetch_messages(id).await {
            Ok(records) => self.store.lock().replace_messages(id, records),
            Err(err) => self
                .reporter
                .report(&err, &CallOptions::with_message("Failed to load messages")),
        }
    }

    fn print_history(&self, id: &str) {
        let store = self.store.lock();
        for message in store.messages(id) {
            let entry = render_entry(message);
            if !entry.is_empty() {
                println!("{entry}\n");
            }
        }
    }

    fn print_sessions(&self) {
        let store = self.store.lock();
        if store.sessions().is_empty() {
            println!("No sessions yet. Use /new to create one.");
        }
        for session in store.sessions() {
            let marker = if store.selected() == Some(session.id.as_str()) {
                '*'
            } else {
                ' '
            };
            let preview = session.preview.as_deref().unwrap_or_default();
            println!(
                "{marker} {}  {}  {}",
                session.id,
                session.title,
                one_line(preview, 60)
            );
        }
    }

    fn selected(&self) -> Option<SessionId> {
        self.store.lock().selected().map(str::to_owned)
    }

    fn stream_for(&mut self, session_id: &str) -> Arc<StreamSession> {
        let transport: Arc<dyn ChatTransport> = self.client.clone();
        let store = self.store.clone();
        let reporter = self.reporter.clone();
        let idle_timeout = self.idle_timeout;
        self.streams
            .entry(session_id.to_string())
            .or_insert_with(|| {
                Arc::new(
                    StreamSession::new(session_id, transport, store, reporter)
                        .with_idle_timeout(idle_timeout),
                )
            })
            .clone()
    }
}

fn describe_rejection(reason: RejectReason) -> &'static str {
    match reason {
        RejectReason::EmptyInput => "Nothing to send.",
        RejectReason::UnknownSession => "The selected session no longer exists.",
        RejectReason::StreamActive => "A reply is still streaming.",
        RejectReason::AuthorizationPending => "Answer the pending authorization request first.",
        RejectReason::NoPendingAuthorization => "There is no pending authorization request.",
    }
}

#[derive(Debug, Default)]
struct Progress {
    sections: usize,
    text_len: usize,
}

/// Prints the part of each agent message not yet on screen.
#[derive(Debug, Default)]
struct Renderer {
    progress: HashMap<MessageId, Progress>,
    line_open: bool,
}

impl Renderer {
    fn render_update(&mut self, message: &Message, out: &mut impl Write) -> io::Result<()> {
        let progress = self.progress.entry(message.id.clone()).or_default();
        // Only the last section seen so far can still grow.
        let resume_from = progress.sections.saturating_sub(1);
        for (index, section) in message.sections().iter().enumerate().skip(resume_from) {
            let continuing = index + 1 == progress.sections;
            if !continuing && index > 0 {
                write!(out, "{}", if self.line_open { "\n\n" } else { "\n" })?;
            }
            match section {
                Section::Text(text) => {
                    let start = if continuing { progress.text_len } else { 0 };
                    let fresh = text.get(start..).unwrap_or_default();
                    if !fresh.is_empty() {
                        write!(out, "{fresh}")?;
                        self.line_open = true;
                    }
                    progress.text_len = text.len();
                }
                Section::ToolOutput(_) if continuing => {}
                Section::ToolOutput(_) => {
                    write!(out, "{}", render_section(section))?;
                    self.line_open = true;
                    progress.text_len = 0;
                }
            }
            progress.sections = index + 1;
        }
        out.flush()
    }

    fn finish(&mut self, message_id: &str, out: &mut impl Write) -> io::Result<()> {
        self.progress.remove(message_id);
        self.break_line(out)
    }

    fn break_line(&mut self, out: &mut impl Write) -> io::Result<()> {
        if self.line_open {
            writeln!(out)?;
            self.line_open = false;
        }
        Ok(())
    }
}
