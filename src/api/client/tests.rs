use super::*;
use crate::auth::StaticCredentials;
use crate::core::conversation::{ConversationStore, Section, Session, SharedStore};
use crate::core::notify::test_support::reporter_with;
use crate::core::stream::{AuthorizationDecision, StreamOutcome, StreamSession};
use crate::utils::test_utils::TestEnvVarGuard;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
struct CapturedRequest {
    request_line: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl CapturedRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("request body should be JSON")
    }
}

enum MockResponse {
    Json(u16, Value),
    /// Event-stream body written chunk by chunk, delimited by connection close.
    EventStream(Vec<&'static str>),
}

async fn read_http_request(stream: &mut tokio::net::TcpStream) -> Result<CapturedRequest, String> {
    use tokio::io::AsyncReadExt;

    let mut buffer = Vec::new();
    let mut header_end = None;
    while header_end.is_none() {
        let mut chunk = [0_u8; 1024];
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("Unexpected EOF while reading HTTP headers".to_string());
        }
        buffer.extend_from_slice(&chunk[..read]);
        header_end = buffer
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
            .map(|index| index + 4);
    }

    let header_end = header_end.expect("header end should exist");
    let header_text =
        std::str::from_utf8(&buffer[..header_end]).map_err(|err| err.to_string())?;
    let mut lines = header_text.split("\r\n").filter(|line| !line.is_empty());
    let request_line = lines
        .next()
        .ok_or_else(|| "Missing HTTP request line".to_string())?
        .to_string();

    let mut headers = Vec::new();
    let mut content_length = 0_usize;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse::<usize>().map_err(|err| err.to_string())?;
        }
        headers.push((name.to_string(), value));
    }

    let mut body = buffer[header_end..].to_vec();
    while body.len() < content_length {
        let mut chunk = vec![0_u8; content_length - body.len()];
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("Unexpected EOF while reading HTTP body".to_string());
        }
        body.extend_from_slice(&chunk[..read]);
    }
    body.truncate(content_length);

    Ok(CapturedRequest {
        request_line,
        headers,
        body,
    })
}

async fn write_response(
    stream: &mut tokio::net::TcpStream,
    response: MockResponse,
) -> Result<(), String> {
    match response {
        MockResponse::Json(status, body) => {
            let body = body.to_string();
            let head = format!(
                "HTTP/1.1 {status} Mock\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream
                .write_all(head.as_bytes())
                .await
                .map_err(|err| err.to_string())?;
            stream
                .write_all(body.as_bytes())
                .await
                .map_err(|err| err.to_string())?;
        }
        MockResponse::EventStream(chunks) => {
            stream
                .write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n",
                )
                .await
                .map_err(|err| err.to_string())?;
            for chunk in chunks {
                // The client may already have hung up after a gate.
                if stream.write_all(chunk.as_bytes()).await.is_err() {
                    break;
                }
                let _ = stream.flush().await;
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
    let _ = stream.shutdown().await;
    Ok(())
}

/// Serves one scripted response per connection, in order, and hands back
/// every request it saw.
async fn serve(
    responses: Vec<MockResponse>,
) -> (String, JoinHandle<Result<Vec<CapturedRequest>, String>>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("local addr should resolve");

    let server = tokio::spawn(async move {
        let mut captured = Vec::new();
        for response in responses {
            let (mut stream, _) = listener.accept().await.map_err(|err| err.to_string())?;
            captured.push(read_http_request(&mut stream).await?);
            write_response(&mut stream, response).await?;
        }
        Ok(captured)
    });

    (format!("http://{addr}/api"), server)
}

fn bypass_proxies() -> TestEnvVarGuard {
    let mut env = TestEnvVarGuard::new();
    for key in ["HTTP_PROXY", "HTTPS_PROXY", "ALL_PROXY", "http_proxy", "https_proxy", "all_proxy"] {
        env.remove_var(key);
    }
    env.set_var("NO_PROXY", "127.0.0.1,localhost");
    env
}

fn client_for(base_url: &str, token: &str) -> ApiClient {
    ApiClient::new(
        base_url,
        Arc::new(StaticCredentials::new(token)),
        Duration::from_secs(5),
    )
}

fn store_with_session(id: &str) -> SharedStore {
    let store = SharedStore::new(ConversationStore::new());
    store.lock().replace_sessions(vec![Session {
        id: id.to_string(),
        title: "Errands".to_string(),
        preview: None,
        last_activity: None,
    }]);
    store
}

#[tokio::test]
async fn list_sessions_reads_the_data_envelope() {
    let _env = bypass_proxies();
    let (base_url, server) = serve(vec![MockResponse::Json(
        200,
        json!({
            "success": true,
            "data": [
                {"id": "s1", "title": "First", "last_message": "hi"},
                {"id": "s2", "title": "Second"}
            ]
        }),
    )])
    .await;

    let sessions = client_for(&base_url, "tok")
        .list_sessions()
        .await
        .expect("listing should succeed");

    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].last_message.as_deref(), Some("hi"));

    let requests = server.await.expect("server task").expect("server run");
    assert_eq!(requests[0].request_line, "GET /api/sessions/ HTTP/1.1");
    assert_eq!(requests[0].header("authorization"), Some("Bearer tok"));
}

#[tokio::test]
async fn requests_omit_authorization_without_a_token() {
    let _env = bypass_proxies();
    let (base_url, server) = serve(vec![MockResponse::Json(200, json!({"data": []}))]).await;

    let client = ApiClient::new(
        base_url,
        Arc::new(StaticCredentials::empty()),
        Duration::from_secs(5),
    );
    assert!(client.list_sessions().await.expect("listing").is_empty());

    let requests = server.await.expect("server task").expect("server run");
    assert_eq!(requests[0].header("authorization"), None);
}

#[tokio::test]
async fn session_routes_use_expected_paths() {
    let _env = bypass_proxies();
    let (base_url, server) = serve(vec![
        MockResponse::Json(200, json!({"id": "s9", "title": "Trip"})),
        MockResponse::Json(
            200,
            json!([
                {"id": "m1", "sender": "user", "text": "hi"},
                {"id": "m2", "sender": "agent", "text": "hello"}
            ]),
        ),
        MockResponse::Json(200, json!({"success": true})),
    ])
    .await;
    let client = client_for(&base_url, "tok");

    let created = client.create_session("Trip").await.expect("create");
    assert_eq!(created.id, "s9");
    let messages = client.fetch_messages("s9").await.expect("history");
    assert_eq!(messages.len(), 2);
    client.delete_session("s9").await.expect("delete");

    let requests = server.await.expect("server task").expect("server run");
    assert_eq!(requests[0].request_line, "POST /api/sessions/ HTTP/1.1");
    assert_eq!(requests[0].json(), json!({"title": "Trip"}));
    assert_eq!(
        requests[1].request_line,
        "GET /api/sessions/s9/messages/ HTTP/1.1"
    );
    assert_eq!(requests[2].request_line, "DELETE /api/sessions/s9 HTTP/1.1");
}

#[tokio::test]
async fn unsuccessful_delete_is_a_validation_error() {
    let _env = bypass_proxies();
    let (base_url, server) = serve(vec![MockResponse::Json(
        200,
        json!({"success": false, "message": "Session is busy"}),
    )])
    .await;

    let err = client_for(&base_url, "tok")
        .delete_session("s1")
        .await
        .expect_err("delete should be refused");

    assert_eq!(err.kind, ErrorKind::Validation);
    assert_eq!(err.detail.as_deref(), Some("Session is busy"));
    server.await.expect("server task").expect("server run");
}

#[tokio::test]
async fn error_statuses_carry_the_server_detail() {
    let _env = bypass_proxies();
    let (base_url, server) = serve(vec![
        MockResponse::Json(401, json!({"detail": "Token expired"})),
        MockResponse::Json(422, json!({"detail": [{"msg": "field required"}]})),
    ])
    .await;
    let client = client_for(&base_url, "tok");

    let err = client.list_sessions().await.expect_err("401");
    assert!(err.is_auth());
    assert_eq!(err.status, Some(401));
    assert_eq!(err.detail.as_deref(), Some("Token expired"));

    let err = client.create_session("x").await.expect_err("422");
    assert_eq!(err.kind, ErrorKind::Validation);
    server.await.expect("server task").expect("server run");
}

#[tokio::test]
async fn undecodable_body_is_a_decode_error() {
    let _env = bypass_proxies();
    let (base_url, server) = serve(vec![MockResponse::Json(200, json!({"unexpected": true}))]).await;

    let err = client_for(&base_url, "tok")
        .create_session("x")
        .await
        .expect_err("missing fields");
    assert_eq!(err.kind, ErrorKind::Decode);
    server.await.expect("server task").expect("server run");
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() {
    let _env = bypass_proxies();
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let err = client_for(&format!("http://{addr}/api"), "tok")
        .list_sessions()
        .await
        .expect_err("nothing listens");
    assert_eq!(err.kind, ErrorKind::Transport);
}

#[tokio::test]
async fn message_stream_posts_json_and_accepts_event_stream() {
    let _env = bypass_proxies();
    let (base_url, server) = serve(vec![MockResponse::EventStream(vec![
        "data :{\"ai_message\":\"Hel\"}\n",
        "data :{\"ai_message\":\"lo\"}\ndata :{\"tool_",
        "message\":{\"rows\":[1,2]}}\n",
    ])])
    .await;

    let client = Arc::new(client_for(&base_url, "tok"));
    let store = store_with_session("s1");
    let (reporter, notifier, _) = reporter_with("tok");
    let session = StreamSession::new("s1", client, store.clone(), reporter);

    let outcome = session.send("hello there").await;

    assert_eq!(outcome, StreamOutcome::Completed);
    let message_id = session.message_id().expect("agent message");
    assert_eq!(
        store.lock().message("s1", &message_id).expect("message").sections(),
        &[
            Section::Text("Hello".to_string()),
            Section::ToolOutput(json!({"rows": [1, 2]})),
        ]
    );
    assert!(notifier.notices().is_empty());

    let requests = server.await.expect("server task").expect("server run");
    let request = &requests[0];
    assert_eq!(request.request_line, "POST /api/sessions/s1/messages/ HTTP/1.1");
    assert_eq!(request.header("accept"), Some(EVENT_STREAM_ACCEPT));
    assert_eq!(request.header("content-type"), Some("application/json"));
    assert_eq!(request.header("authorization"), Some("Bearer tok"));
    assert_eq!(
        request.json(),
        json!({"text": "hello there", "metadata": {}, "sender": "user"})
    );
}

#[tokio::test]
async fn rejected_stream_reports_and_invalidates_on_auth_failure() {
    let _env = bypass_proxies();
    let (base_url, server) = serve(vec![MockResponse::Json(
        403,
        json!({"detail": "Not allowed"}),
    )])
    .await;

    let client = Arc::new(client_for(&base_url, "tok"));
    let (reporter, notifier, credentials) = reporter_with("tok");
    let session = StreamSession::new("s1", client, store_with_session("s1"), reporter);

    let outcome = session.send("hello").await;

    assert!(matches!(outcome, StreamOutcome::Failed(ref err) if err.is_auth()));
    assert_eq!(credentials.bearer(), None);
    assert_eq!(notifier.notices().len(), 1);
    server.await.expect("server task").expect("server run");
}

#[tokio::test]
async fn authorization_gate_resumes_over_http() {
    let _env = bypass_proxies();
    let (base_url, server) = serve(vec![
        MockResponse::EventStream(vec![
            "data :{\"ai_message\":\"Drafting the email\"}\n",
            "data :{\"func_call\":{\"to\":\"ana@example.com\",\"subject\":\"Lunch\",\"body\":\"Noon?\"}}\n",
            "data :{\"ai_message\":\"never folded\"}\n",
        ]),
        MockResponse::EventStream(vec!["data :{\"ai_message\":\"Email sent.\"}\n"]),
    ])
    .await;

    let client = Arc::new(client_for(&base_url, "tok"));
    let store = store_with_session("s1");
    let (reporter, _, _) = reporter_with("tok");
    let session = StreamSession::new("s1", client, store.clone(), reporter);

    let outcome = session.send("email Ana about lunch").await;
    let StreamOutcome::AwaitingAuthorization(request) = outcome else {
        panic!("expected the authorization gate, got {outcome:?}");
    };
    assert_eq!(request.to(), Some("ana@example.com"));

    let outcome = session
        .resolve_authorization(AuthorizationDecision::Approve)
        .await;
    assert_eq!(outcome, StreamOutcome::Completed);

    let message_id = session.message_id().expect("agent message");
    assert_eq!(
        store.lock().message("s1", &message_id).expect("message").sections(),
        &[
            Section::Text("Drafting the email".to_string()),
            Section::Text("Email sent.".to_string()),
        ]
    );

    let requests = server.await.expect("server task").expect("server run");
    assert_eq!(
        requests[1].request_line,
        "POST /api/sessions/s1/messages/tools/ HTTP/1.1"
    );
    assert_eq!(
        requests[1].json(),
        json!({
            "tool_name": "send_email",
            "parameters": {"to": "ana@example.com", "subject": "Lunch", "body": "Noon?"},
            "is_authorized": true
        })
    );
}

#[tokio::test]
async fn stop_generation_posts_to_the_stop_route() {
    let _env = bypass_proxies();
    let (base_url, server) = serve(vec![MockResponse::Json(200, json!({"success": true}))]).await;

    client_for(&base_url, "tok")
        .stop_generation("s1")
        .await
        .expect("stop");

    let requests = server.await.expect("server task").expect("server run");
    assert_eq!(requests[0].request_line, "POST /api/sessions/s1/stop HTTP/1.1");
}
