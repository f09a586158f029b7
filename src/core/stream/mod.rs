//! Incremental assembly of streamed agent turns.
//!
//! Bytes from the transport pass through [`EventLineBuffer`], each complete
//! line is decoded by [`parse_frame`], and [`SectionAssembler`] folds the
//! resulting events into the agent message held by the conversation store.
//! [`StreamSession`] drives that pipeline and owns the request lifecycle,
//! including the pause for tool authorization and user cancellation.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::api::{CreateMessageRequest, ToolDecisionRequest};
use crate::core::error::ApiError;

pub mod assembler;
pub mod frame;
pub mod line_buffer;
pub mod session;


pub use assembler::{apply, Applied, SectionAssembler};
pub use frame::{parse_frame, AuthorizationRequest, IgnoredFrame, StreamEvent};
pub use line_buffer::EventLineBuffer;
pub use session::{
    AuthorizationDecision, RejectReason, StreamOutcome, StreamPhase, StreamSession,
};

/// Raw body chunks of one streaming response.
pub type ChunkStream = BoxStream<'static, Result<Vec<u8>, ApiError>>;

/// The requests a stream session issues against the agent service.
///
/// Opening a stream resolves once the response headers arrived with a
/// success status; any other status is returned as an error.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn open_message_stream(
        &self,
        session_id: &str,
        request: CreateMessageRequest,
    ) -> Result<ChunkStream, ApiError>;

    async fn open_decision_stream(
        &self,
        session_id: &str,
        request: ToolDecisionRequest,
    ) -> Result<ChunkStream, ApiError>;

    /// Asks the service to stop generating for the session.
    async fn stop_generation(&self, session_id: &str) -> Result<(), ApiError>;
}
