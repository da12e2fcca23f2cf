//! Reformats the generation service's event stream for the browser.
//!
//! Only the `Formatter` agent reaches the client. Its content is unwrapped
//! from code fences and relayed as markdown, unless it looks like JSON, which
//! the service only produces when it is overloaded.

use crate::events::{OutboundMessage, RelayFrame, UpstreamEvent};
use crate::generator::EventStream;
use futures::StreamExt;
use regex::Regex;
use std::sync::LazyLock;
use tokio::sync::mpsc;

pub const FORMATTER_AGENT: &str = "Formatter";
pub const BUSY_MESSAGE: &str = "server is busy currently try again later";
pub const UNKNOWN_ERROR: &str = "unknown error";

const RELAY_BUFFER: usize = 32;

static OPENING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*```(?i:json)?[ \t]*\r?\n?").expect("valid fence regex"));
static CLOSING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r?\n?```\s*$").expect("valid fence regex"));

// ============================================================================
// Content policy
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Json,
    Markdown,
}

/// JSON-shaped output from the formatter is treated as a busy signal.
pub fn classify_content(text: &str) -> ContentKind {
    match text.trim_start().chars().next() {
        Some('{') | Some('[') => ContentKind::Json,
        _ => ContentKind::Markdown,
    }
}

/// `analysisResult`, else the first message's `content`, else the whole event.
pub fn extract_content(event: &UpstreamEvent) -> String {
    let body = event.body();

    let field = body
        .and_then(|b| b.get("analysisResult"))
        .filter(|v| !v.is_null())
        .or_else(|| {
            body.and_then(|b| b.get("messages"))
                .and_then(|m| m.get(0))
                .and_then(|m| m.get("content"))
                .filter(|v| !v.is_null())
        });

    match field {
        Some(serde_json::Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => event.as_value().to_string(),
    }
}

/// Drop a leading ```` ``` ```` / ```` ```json ```` fence and a trailing ```` ``` ````.
pub fn strip_code_fences(text: &str) -> String {
    let text = OPENING_FENCE.replace(text, "");
    let text = CLOSING_FENCE.replace(&text, "");
    text.trim().to_string()
}

// ============================================================================
// State machine
// ============================================================================

/// Why a relay reached `Complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionReason {
    /// Upstream ran out of events.
    Exhausted,
    /// The formatter produced JSON.
    Busy,
    /// Upstream failed mid-stream.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Streaming,
    Complete(CompletionReason),
}

/// Per-connection relay. Every input returns the frames to write, in order.
///
/// Errors pass through straight to `Complete`: the error message and the
/// completion marker are always produced together.
#[derive(Debug)]
pub struct StreamRelay {
    state: RelayState,
}

impl Default for StreamRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamRelay {
    pub fn new() -> Self {
        Self {
            state: RelayState::Streaming,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, RelayState::Complete(_))
    }

    pub fn on_event(&mut self, event: &UpstreamEvent) -> Vec<RelayFrame> {
        if self.is_finished() {
            return Vec::new();
        }
        if event.agent_tag() != Some(FORMATTER_AGENT) {
            log::debug!("Dropping event from agent {:?}", event.agent_tag());
            return Vec::new();
        }

        let content = strip_code_fences(&extract_content(event));
        match classify_content(&content) {
            ContentKind::Json => {
                log::warn!("Formatter returned JSON, reporting server busy");
                self.fail(CompletionReason::Busy, BUSY_MESSAGE)
            }
            ContentKind::Markdown => vec![RelayFrame::Message(OutboundMessage::markdown(content))],
        }
    }

    pub fn on_error(&mut self, description: &str) -> Vec<RelayFrame> {
        if self.is_finished() {
            return Vec::new();
        }
        log::error!("Upstream stream failed: {}", description);
        let description = if description.trim().is_empty() {
            UNKNOWN_ERROR
        } else {
            description
        };
        self.fail(CompletionReason::Failed, description)
    }

    pub fn on_end(&mut self) -> Vec<RelayFrame> {
        self.complete(CompletionReason::Exhausted)
    }

    fn complete(&mut self, reason: CompletionReason) -> Vec<RelayFrame> {
        if self.is_finished() {
            return Vec::new();
        }
        self.state = RelayState::Complete(reason);
        vec![RelayFrame::Complete]
    }

    fn fail(&mut self, reason: CompletionReason, content: &str) -> Vec<RelayFrame> {
        let mut frames = vec![RelayFrame::Message(OutboundMessage::error(content))];
        frames.extend(self.complete(reason));
        frames
    }
}

// ============================================================================
// Relay task
// ============================================================================

/// Start relaying on a background task and return the frame receiver.
///
/// The task lives as long as the receiver: dropping it (client gone) stops
/// the task and drops the upstream stream.
pub fn spawn_relay(stream: EventStream) -> mpsc::Receiver<RelayFrame> {
    let (tx, rx) = mpsc::channel(RELAY_BUFFER);
    tokio::spawn(run_relay(stream, tx));
    rx
}

pub async fn run_relay(mut stream: EventStream, tx: mpsc::Sender<RelayFrame>) {
    let mut relay = StreamRelay::new();
    let mut relayed = 0usize;

    while !relay.is_finished() {
        let next = tokio::select! {
            _ = tx.closed() => {
                log::info!("Client disconnected, stopping relay after {} messages", relayed);
                return;
            }
            next = stream.next() => next,
        };

        let frames = match next {
            Some(Ok(event)) => relay.on_event(&event),
            Some(Err(e)) => relay.on_error(&e.to_string()),
            None => relay.on_end(),
        };

        for frame in frames {
            if matches!(frame, RelayFrame::Message(_)) {
                relayed += 1;
            }
            if tx.send(frame).await.is_err() {
                log::info!("Client disconnected, stopping relay after {} messages", relayed);
                return;
            }
        }
    }

    log::debug!("Relay finished in state {:?} ({} messages)", relay.state(), relayed);
}
