use serde::Serialize;

use crate::protocol::Message;

/// Request body for the Messages API.
#[derive(Debug, Serialize)]
pub struct CreateMessageRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<Message>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

/// Streamed SSE event types from the Messages API. Only text blocks are
/// surfaced; other block kinds are skipped by the parser.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextBlockStart { index: usize, text: String },
    TextDelta { index: usize, text: String },
    ContentBlockStop { index: usize },
    MessageDelta { stop_reason: Option<String> },
    MessageStop,
    /// Server-side error event inside an otherwise successful stream.
    Error { message: String },
}
