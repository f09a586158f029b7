use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::assembler::SectionAssembler;
use super::frame::{parse_frame, AuthorizationRequest, StreamEvent};
use super::line_buffer::EventLineBuffer;
use super::{ChatTransport, ChunkStream};
use crate::api::{CreateMessageRequest, ToolDecisionRequest};
use crate::core::conversation::{MessageId, SessionId, SharedStore};
use crate::core::error::ApiError;
use crate::core::notify::{CallOptions, ErrorReporter};

const SEND_FAILED_MESSAGE: &str = "Failed to send message, please try again later";
const DECISION_FAILED_MESSAGE: &str = "Failed to process the tool call";
const STOP_FAILED_MESSAGE: &str = "Failed to stop generation, please try again later";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Idle,
    Requesting,
    Streaming,
    AwaitingAuthorization,
    Completed,
    Aborted,
    Failed,
}

impl StreamPhase {
    /// A request or stream is in flight.
    pub fn is_active(self) -> bool {
        matches!(self, StreamPhase::Requesting | StreamPhase::Streaming)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationDecision {
    Approve,
    Deny,
}

impl AuthorizationDecision {
    pub fn is_authorized(self) -> bool {
        self == AuthorizationDecision::Approve
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    EmptyInput,
    UnknownSession,
    StreamActive,
    AuthorizationPending,
    NoPendingAuthorization,
}

/// How one call to [`StreamSession::send`] or
/// [`StreamSession::resolve_authorization`] ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    Completed,
    /// The turn is paused until [`StreamSession::resolve_authorization`].
    AwaitingAuthorization(AuthorizationRequest),
    /// Cancelled by the user. Not an error.
    Aborted,
    /// Already reported through the error reporter.
    Failed(ApiError),
    /// The call was a no-op.
    Rejected(RejectReason),
}

/// Cancellation token of the one in-flight stream.
#[derive(Debug)]
struct StreamHandle {
    id: u64,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct Control {
    phase: StreamPhase,
    handle: Option<StreamHandle>,
    message_id: Option<MessageId>,
    pending: Option<AuthorizationRequest>,
    assembler: SectionAssembler,
    next_handle_id: u64,
}

impl Control {
    fn new() -> Self {
        Self {
            phase: StreamPhase::Idle,
            handle: None,
            message_id: None,
            pending: None,
            assembler: SectionAssembler::new(),
            next_handle_id: 0,
        }
    }

    fn open_handle(&mut self) -> (u64, CancellationToken) {
        self.next_handle_id += 1;
        let cancel = CancellationToken::new();
        self.handle = Some(StreamHandle {
            id: self.next_handle_id,
            cancel: cancel.clone(),
        });
        self.phase = StreamPhase::Requesting;
        (self.next_handle_id, cancel)
    }

    fn owns(&self, handle_id: u64, phase: StreamPhase) -> bool {
        self.phase == phase && self.handle.as_ref().is_some_and(|handle| handle.id == handle_id)
    }
}

enum Folded {
    Continue,
    Gate(AuthorizationRequest),
    Stopped,
}

/// Drives request/stream cycles for one conversation session.
///
/// Every phase change, including cancellation and the authorization gate,
/// happens under one lock, and a line is folded only while that lock shows
/// the stream still owns the session. A cancel that lands after the gate
/// closed the stream is therefore a no-op, and nothing is folded after a
/// cancel returns.
pub struct StreamSession {
    session_id: SessionId,
    transport: Arc<dyn ChatTransport>,
    store: SharedStore,
    reporter: ErrorReporter,
    idle_timeout: Option<Duration>,
    control: Mutex<Control>,
}

impl StreamSession {
    pub fn new(
        session_id: impl Into<SessionId>,
        transport: Arc<dyn ChatTransport>,
        store: SharedStore,
        reporter: ErrorReporter,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            transport,
            store,
            reporter,
            idle_timeout: None,
            control: Mutex::new(Control::new()),
        }
    }

    /// Fails the stream when the transport delivers nothing for `timeout`.
    /// Without it only the transport's own timeouts apply.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn phase(&self) -> StreamPhase {
        self.lock_control().phase
    }

    pub fn pending_authorization(&self) -> Option<AuthorizationRequest> {
        self.lock_control().pending.clone()
    }

    /// The agent message the latest turn folds into.
    pub fn message_id(&self) -> Option<MessageId> {
        self.lock_control().message_id.clone()
    }

    /// Sends a user message and streams the reply into a new agent message.
    pub async fn send(&self, text: &str) -> StreamOutcome {
        let text = text.trim();
        let (handle_id, cancel, message_id) = match self.begin_turn(text) {
            Ok(started) => started,
            Err(reason) => return StreamOutcome::Rejected(reason),
        };
        info!(session_id = %self.session_id, "sending message");

        let request = self
            .transport
            .open_message_stream(&self.session_id, CreateMessageRequest::from_user(text));
        self.stream_turn(
            handle_id,
            &cancel,
            &message_id,
            request,
            CallOptions::with_message(SEND_FAILED_MESSAGE),
        )
        .await
    }

    /// Answers the pending authorization request and streams the rest of
    /// the turn into the same agent message.
    pub async fn resolve_authorization(&self, decision: AuthorizationDecision) -> StreamOutcome {
        let (handle_id, cancel, message_id, request) = match self.begin_resume() {
            Ok(resumed) => resumed,
            Err(reason) => return StreamOutcome::Rejected(reason),
        };
        info!(session_id = %self.session_id, ?decision, "resuming after authorization");

        let body = ToolDecisionRequest::new(request.into_payload(), decision.is_authorized());
        let request = self.transport.open_decision_stream(&self.session_id, body);
        self.stream_turn(
            handle_id,
            &cancel,
            &message_id,
            request,
            CallOptions::with_message(DECISION_FAILED_MESSAGE),
        )
        .await
    }

    /// Stops the in-flight stream locally. Sections folded so far stay as
    /// they are. Returns false when no request or stream was active.
    pub fn abort(&self) -> bool {
        let mut control = self.lock_control();
        if !control.phase.is_active() {
            return false;
        }
        if let Some(handle) = control.handle.take() {
            handle.cancel.cancel();
        }
        self.settle(&mut control, StreamPhase::Aborted);
        debug!(session_id = %self.session_id, "stream aborted");
        true
    }

    /// Aborts locally and asks the service to stop generating.
    pub async fn cancel(&self) -> bool {
        if !self.abort() {
            return false;
        }
        if let Err(err) = self.transport.stop_generation(&self.session_id).await {
            self.reporter
                .report(&err, &CallOptions::with_message(STOP_FAILED_MESSAGE));
        }
        true
    }

    fn begin_turn(&self, text: &str) -> Result<(u64, CancellationToken, MessageId), RejectReason> {
        if text.is_empty() {
            return Err(RejectReason::EmptyInput);
        }

        let mut control = self.lock_control();
        match control.phase {
            StreamPhase::Requesting | StreamPhase::Streaming => {
                return Err(RejectReason::StreamActive)
            }
            StreamPhase::AwaitingAuthorization => return Err(RejectReason::AuthorizationPending),
            _ => {}
        }

        let message_id = {
            let mut store = self.store.lock();
            if store.session(&self.session_id).is_none() {
                return Err(RejectReason::UnknownSession);
            }
            let now = Utc::now();
            store.push_user_message(&self.session_id, text, now);
            store.touch_session(&self.session_id, text, now);
            store.begin_agent_message(&self.session_id, now)
        };

        control.message_id = Some(message_id.clone());
        control.pending = None;
        control.assembler = SectionAssembler::new();
        let (handle_id, cancel) = control.open_handle();
        Ok((handle_id, cancel, message_id))
    }

    #[allow(clippy::type_complexity)]
    fn begin_resume(
        &self,
    ) -> Result<(u64, CancellationToken, MessageId, AuthorizationRequest), RejectReason> {
        let mut control = self.lock_control();
        if control.phase != StreamPhase::AwaitingAuthorization {
            return Err(RejectReason::NoPendingAuthorization);
        }
        let (Some(request), Some(message_id)) = (control.pending.take(), control.message_id.clone())
        else {
            return Err(RejectReason::NoPendingAuthorization);
        };

        control.assembler.seal_text();
        let (handle_id, cancel) = control.open_handle();
        Ok((handle_id, cancel, message_id, request))
    }

    async fn stream_turn<F>(
        &self,
        handle_id: u64,
        cancel: &CancellationToken,
        message_id: &str,
        request: F,
        options: CallOptions,
    ) -> StreamOutcome
    where
        F: Future<Output = Result<ChunkStream, ApiError>>,
    {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return StreamOutcome::Aborted,
            opened = self.with_timeout(request) => opened,
        };

        let stream = match opened {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) | Err(err) => return self.fail(handle_id, err, &options),
        };

        if !self.mark_streaming(handle_id) {
            return StreamOutcome::Aborted;
        }
        self.drive(handle_id, cancel, message_id, stream, &options)
            .await
    }

    async fn drive(
        &self,
        handle_id: u64,
        cancel: &CancellationToken,
        message_id: &str,
        mut stream: ChunkStream,
        options: &CallOptions,
    ) -> StreamOutcome {
        let mut lines = EventLineBuffer::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return StreamOutcome::Aborted,
                next = self.with_timeout(stream.next()) => next,
            };

            let chunk = match next {
                Ok(Some(Ok(chunk))) => chunk,
                Ok(Some(Err(err))) | Err(err) => return self.fail(handle_id, err, options),
                Ok(None) => {
                    lines.finish();
                    return self.complete(handle_id);
                }
            };

            for line in lines.feed(&chunk) {
                match self.fold_line(handle_id, message_id, &line) {
                    Folded::Continue => {}
                    Folded::Gate(request) => return StreamOutcome::AwaitingAuthorization(request),
                    Folded::Stopped => return StreamOutcome::Aborted,
                }
            }
        }
    }

    async fn with_timeout<F: Future>(&self, future: F) -> Result<F::Output, ApiError> {
        match self.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, future).await.map_err(|_| {
                ApiError::transport(format!(
                    "No data received from the server for {} seconds",
                    limit.as_secs()
                ))
            }),
            None => Ok(future.await),
        }
    }

    fn fold_line(&self, handle_id: u64, message_id: &str, line: &str) -> Folded {
        let mut control = self.lock_control();
        if !control.owns(handle_id, StreamPhase::Streaming) {
            return Folded::Stopped;
        }

        match parse_frame(line) {
            StreamEvent::AuthorizationRequest(request) => {
                control.handle = None;
                control.pending = Some(request.clone());
                control.phase = StreamPhase::AwaitingAuthorization;
                self.store
                    .lock()
                    .refresh_preview(&self.session_id, message_id, Utc::now());
                info!(session_id = %self.session_id, "stream paused for authorization");
                Folded::Gate(request)
            }
            StreamEvent::Ignorable(reason) => {
                debug!(?reason, "skipping stream line");
                Folded::Continue
            }
            event => {
                let assembler = &mut control.assembler;
                let folded = self
                    .store
                    .lock()
                    .update_sections(&self.session_id, message_id, |sections| {
                        assembler.apply_to(event, sections)
                    });
                match folded {
                    Some(applied) => {
                        debug!(?applied, "folded stream event");
                        Folded::Continue
                    }
                    None => {
                        // The message vanished underneath the stream.
                        control.handle = None;
                        self.settle(&mut control, StreamPhase::Aborted);
                        Folded::Stopped
                    }
                }
            }
        }
    }

    fn mark_streaming(&self, handle_id: u64) -> bool {
        let mut control = self.lock_control();
        if !control.owns(handle_id, StreamPhase::Requesting) {
            return false;
        }
        control.phase = StreamPhase::Streaming;
        true
    }

    fn complete(&self, handle_id: u64) -> StreamOutcome {
        let mut control = self.lock_control();
        if !control.owns(handle_id, StreamPhase::Streaming) {
            return StreamOutcome::Aborted;
        }
        control.handle = None;
        self.settle(&mut control, StreamPhase::Completed);
        info!(session_id = %self.session_id, "stream completed");
        StreamOutcome::Completed
    }

    fn fail(&self, handle_id: u64, err: ApiError, options: &CallOptions) -> StreamOutcome {
        {
            let mut control = self.lock_control();
            let owned = control.phase.is_active()
                && control
                    .handle
                    .as_ref()
                    .is_some_and(|handle| handle.id == handle_id);
            if !owned {
                return StreamOutcome::Aborted;
            }
            control.handle = None;
            self.settle(&mut control, StreamPhase::Failed);
        }
        self.reporter.report(&err, options);
        StreamOutcome::Failed(err)
    }

    /// Enters a terminal phase: the message becomes immutable and the
    /// session preview follows its last text section.
    fn settle(&self, control: &mut Control, phase: StreamPhase) {
        control.phase = phase;
        control.pending = None;
        let Some(message_id) = control.message_id.as_deref() else {
            return;
        };
        let mut store = self.store.lock();
        store.refresh_preview(&self.session_id, message_id, Utc::now());
        store.finalize_message(&self.session_id, message_id);
    }

    fn lock_control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
