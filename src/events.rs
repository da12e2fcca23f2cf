use serde::{Deserialize, Serialize};

// ============================================================================
// Upstream events
// ============================================================================

/// One item from the generation service: `{ "<agent>": { messages, analysisResult? } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpstreamEvent(serde_json::Value);

impl UpstreamEvent {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Key naming the producing agent. `None` for non-objects and `{}`.
    pub fn agent_tag(&self) -> Option<&str> {
        self.0.as_object()?.keys().next().map(String::as_str)
    }

    /// The value stored under the agent tag.
    pub fn body(&self) -> Option<&serde_json::Value> {
        self.0.as_object()?.values().next()
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

impl From<serde_json::Value> for UpstreamEvent {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

// ============================================================================
// Outbound SSE messages
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Markdown,
    Error,
}

/// `data:` payload of every non-terminal SSE event sent to the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_markdown: Option<bool>,
}

impl OutboundMessage {
    pub fn markdown(content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Markdown,
            content: content.into(),
            is_markdown: Some(true),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Error,
            content: content.into(),
            is_markdown: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == MessageKind::Error
    }
}

/// What the relay hands to the SSE writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayFrame {
    Message(OutboundMessage),
    /// `event: complete` / `data: done`, always the last frame.
    Complete,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_agent_tag_is_top_level_key() {
        let event = UpstreamEvent::new(json!({ "Formatter": { "messages": [] } }));
        assert_eq!(event.agent_tag(), Some("Formatter"));
        assert_eq!(event.body(), Some(&json!({ "messages": [] })));
    }

    #[test]
    fn test_non_object_event_has_no_tag() {
        assert_eq!(UpstreamEvent::new(json!("text")).agent_tag(), None);
        assert_eq!(UpstreamEvent::new(json!({})).agent_tag(), None);
    }

    #[test]
    fn test_markdown_message_wire_shape() {
        let json = serde_json::to_string(&OutboundMessage::markdown("Q1")).unwrap();
        assert_eq!(json, r#"{"type":"markdown","content":"Q1","isMarkdown":true}"#);
    }

    #[test]
    fn test_error_message_omits_markdown_flag() {
        let json = serde_json::to_string(&OutboundMessage::error("boom")).unwrap();
        assert_eq!(json, r#"{"type":"error","content":"boom"}"#);
    }
}
