//! HTTP client for the agent service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::api::{
    BaseResponse, CreateMessageRequest, CreateSessionRequest, MessageRecord, SessionListItem,
    SessionListResponse, SessionRecord, ToolDecisionRequest,
};
use crate::core::error::{ApiError, ErrorKind};
use crate::core::notify::CredentialStore;
use crate::core::stream::{ChatTransport, ChunkStream};
use crate::utils::url::construct_api_url;

#[cfg(test)]
mod tests;

pub const EVENT_STREAM_ACCEPT: &str = "text/event-stream";

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialStore>,
    request_timeout: Duration,
}

impl ApiClient {
    pub fn new(
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialStore>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            credentials,
            request_timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionListItem>, ApiError> {
        let response = self.send(self.request(Method::GET, "sessions/")).await?;
        let listing: SessionListResponse = read_json(response).await?;
        Ok(listing.data)
    }

    pub async fn create_session(&self, title: &str) -> Result<SessionRecord, ApiError> {
        let body = CreateSessionRequest {
            title: title.to_string(),
        };
        let response = self
            .send(self.request(Method::POST, "sessions/").json(&body))
            .await?;
        read_json(response).await
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<(), ApiError> {
        let path = format!("sessions/{session_id}");
        let response = self.send(self.request(Method::DELETE, &path)).await?;
        let ack: BaseResponse = read_json(response).await?;
        if ack.success {
            Ok(())
        } else {
            Err(ApiError::with_detail(
                ErrorKind::Validation,
                ack.message.unwrap_or_default(),
            ))
        }
    }

    pub async fn fetch_messages(&self, session_id: &str) -> Result<Vec<MessageRecord>, ApiError> {
        let path = format!("sessions/{session_id}/messages/");
        let response = self.send(self.request(Method::GET, &path)).await?;
        read_json(response).await
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = construct_api_url(&self.base_url, path);
        let request = self.http.request(method, url);
        match self.credentials.bearer() {
            Some(token) => request.header("Authorization", format!("Bearer {token}")),
            None => request,
        }
    }

    /// Sends a short request under the configured timeout.
    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request.timeout(self.request_timeout).send().await?;
        ensure_success(response).await
    }

    async fn open_stream<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ChunkStream, ApiError> {
        // No overall timeout here: a turn may legitimately stream for minutes.
        let response = self
            .request(Method::POST, path)
            .header("Accept", EVENT_STREAM_ACCEPT)
            .json(body)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        debug!(path, status = %response.status(), "event stream opened");

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(ApiError::from))
            .boxed())
    }
}

#[async_trait]
impl ChatTransport for ApiClient {
    async fn open_message_stream(
        &self,
        session_id: &str,
        request: CreateMessageRequest,
    ) -> Result<ChunkStream, ApiError> {
        self.open_stream(&format!("sessions/{session_id}/messages/"), &request)
            .await
    }

    async fn open_decision_stream(
        &self,
        session_id: &str,
        request: ToolDecisionRequest,
    ) -> Result<ChunkStream, ApiError> {
        self.open_stream(&format!("sessions/{session_id}/messages/tools/"), &request)
            .await
    }

    async fn stop_generation(&self, session_id: &str) -> Result<(), ApiError> {
        let path = format!("sessions/{session_id}/stop");
        self.send(self.request(Method::POST, &path)).await?;
        Ok(())
    }
}

async fn ensure_success(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::from_response(status.as_u16(), &body))
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|err| ApiError::decode(err.to_string()))
}
