use serde_json::{Map, Value};

/// Marker that opens every frame line. The space before the colon is part
/// of the service's protocol.
pub const FRAME_PREFIX: &str = "data :";

/// Payload the service sends after its last frame.
pub const END_SENTINEL: &str = "[DONE]";

/// One decoded event-stream line.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta(String),
    ToolOutput(Value),
    AuthorizationRequest(AuthorizationRequest),
    /// A line that carries nothing for the assembler. Streaming continues.
    Ignorable(IgnoredFrame),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoredFrame {
    /// Blank lines, comments, keepalives and any other non-frame text.
    NotAFrame,
    EndSentinel,
    /// The payload was not valid JSON.
    Malformed(String),
    /// Valid JSON that matches none of the known event shapes.
    UnrecognizedShape,
}

impl StreamEvent {
    pub fn is_ignorable(&self) -> bool {
        matches!(self, StreamEvent::Ignorable(_))
    }
}

/// A pending tool invocation that needs a human decision before the turn
/// can continue. The fields are forwarded to the service untouched.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AuthorizationRequest {
    payload: Map<String, Value>,
}

impl AuthorizationRequest {
    pub fn new(payload: Map<String, Value>) -> Self {
        Self { payload }
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn into_payload(self) -> Map<String, Value> {
        self.payload
    }

    pub fn to(&self) -> Option<&str> {
        self.field("to")
    }

    pub fn subject(&self) -> Option<&str> {
        self.field("subject")
    }

    pub fn body(&self) -> Option<&str> {
        self.field("body")
    }

    fn field(&self, name: &str) -> Option<&str> {
        self.payload.get(name).and_then(Value::as_str)
    }
}

/// Decodes one line into an event.
///
/// Only lines that start with [`FRAME_PREFIX`] after trimming are frames.
/// When a payload carries more than one known key the authorization request
/// wins over tool output, which wins over a text delta.
pub fn parse_frame(line: &str) -> StreamEvent {
    let Some(payload) = line.trim().strip_prefix(FRAME_PREFIX) else {
        return StreamEvent::Ignorable(IgnoredFrame::NotAFrame);
    };
    let payload = payload.trim();

    if payload == END_SENTINEL {
        return StreamEvent::Ignorable(IgnoredFrame::EndSentinel);
    }

    let value = match serde_json::from_str::<Value>(payload) {
        Ok(value) => value,
        Err(err) => return StreamEvent::Ignorable(IgnoredFrame::Malformed(err.to_string())),
    };

    classify(value)
}

fn classify(value: Value) -> StreamEvent {
    let Value::Object(mut fields) = value else {
        return StreamEvent::Ignorable(IgnoredFrame::UnrecognizedShape);
    };

    if let Some(Value::Object(request)) = fields.remove("func_call") {
        return StreamEvent::AuthorizationRequest(AuthorizationRequest::new(request));
    }

    if let Some(output) = fields.remove("tool_message").filter(is_present) {
        return StreamEvent::ToolOutput(output);
    }

    match fields.remove("ai_message") {
        Some(Value::String(delta)) if !delta.is_empty() => StreamEvent::TextDelta(delta),
        _ => StreamEvent::Ignorable(IgnoredFrame::UnrecognizedShape),
    }
}

// Empty strings, `false`, zero and null are what the service sends for
// "no tool output in this frame".
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::String(text) => !text.is_empty(),
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_delta_frames_decode() {
        assert_eq!(
            parse_frame(r#"data :{"ai_message":"Hel"}"#),
            StreamEvent::TextDelta("Hel".to_string())
        );
        assert_eq!(
            parse_frame(r#"   data : {"ai_message":" world"}  "#),
            StreamEvent::TextDelta(" world".to_string())
        );
    }

    #[test]
    fn tool_output_keeps_arbitrary_json() {
        assert_eq!(
            parse_frame(r#"data :{"tool_message":{"k":1}}"#),
            StreamEvent::ToolOutput(json!({"k": 1}))
        );
        assert_eq!(
            parse_frame(r#"data :{"tool_message":"search results"}"#),
            StreamEvent::ToolOutput(json!("search results"))
        );
    }

    #[test]
    fn authorization_request_exposes_known_fields() {
        let event = parse_frame(
            r#"data :{"func_call":{"to":"a@b.com","subject":"Hi","body":"Text","cc":[]}}"#,
        );
        let StreamEvent::AuthorizationRequest(request) = event else {
            panic!("expected authorization request, got {event:?}");
        };
        assert_eq!(request.to(), Some("a@b.com"));
        assert_eq!(request.subject(), Some("Hi"));
        assert_eq!(request.body(), Some("Text"));
        assert_eq!(request.payload().get("cc"), Some(&json!([])));
    }

    #[test]
    fn precedence_is_authorization_then_tool_then_text() {
        let all = r#"data :{"ai_message":"x","tool_message":"y","func_call":{"to":"z"}}"#;
        assert!(matches!(
            parse_frame(all),
            StreamEvent::AuthorizationRequest(_)
        ));

        let tool_and_text = r#"data :{"ai_message":"x","tool_message":"y"}"#;
        assert_eq!(
            parse_frame(tool_and_text),
            StreamEvent::ToolOutput(json!("y"))
        );
    }

    #[test]
    fn non_object_func_call_falls_through() {
        assert_eq!(
            parse_frame(r#"data :{"func_call":"nope","ai_message":"ok"}"#),
            StreamEvent::TextDelta("ok".to_string())
        );
    }

    #[test]
    fn lines_without_the_exact_marker_are_not_frames() {
        for line in [
            "",
            ": keepalive",
            r#"data: {"ai_message":"no space before colon"}"#,
            r#"event :{"ai_message":"x"}"#,
            r#"xdata :{"ai_message":"x"}"#,
        ] {
            assert_eq!(
                parse_frame(line),
                StreamEvent::Ignorable(IgnoredFrame::NotAFrame),
                "line {line:?}"
            );
        }
    }

    #[test]
    fn malformed_payloads_are_ignorable() {
        let event = parse_frame(r#"data :{"ai_message":"unterminated"#);
        assert!(matches!(
            event,
            StreamEvent::Ignorable(IgnoredFrame::Malformed(_))
        ));
        assert!(event.is_ignorable());
    }

    #[test]
    fn unknown_and_empty_shapes_are_ignorable() {
        for line in [
            r#"data :{"status":"thinking"}"#,
            r#"data :{"ai_message":""}"#,
            r#"data :{"ai_message":42}"#,
            r#"data :{"tool_message":null}"#,
            r#"data :{"tool_message":""}"#,
            r#"data :[1,2,3]"#,
            r#"data :"text""#,
        ] {
            assert_eq!(
                parse_frame(line),
                StreamEvent::Ignorable(IgnoredFrame::UnrecognizedShape),
                "line {line:?}"
            );
        }
    }

    #[test]
    fn end_sentinel_is_classified_explicitly() {
        assert_eq!(
            parse_frame("data : [DONE]"),
            StreamEvent::Ignorable(IgnoredFrame::EndSentinel)
        );
    }
}
