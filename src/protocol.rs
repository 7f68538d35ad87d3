use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Separator inserted before a fragment that opens a new block.
pub const BLOCK_SEPARATOR: &str = "\r\r";

/// Unique identifier for a turn.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct TurnId(pub String);

impl TurnId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string()[..8].to_string())
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Output events (worker → coordinator) ──

/// Category tag of an output event.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub enum Channel {
    /// Turn complete. Always the last event of a turn.
    Terminal,
    /// Diagnostics from a failed turn, delivered as ordinary text.
    Error,
    Tag(String),
}

impl Channel {
    pub const TERMINAL_TAG: &'static str = ">";
    pub const ERROR_TAG: &'static str = "!";
    pub const DEFAULT_TAG: &'static str = "*";

    pub fn assistant() -> Self {
        Self::Tag(Self::DEFAULT_TAG.to_string())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Terminal => Self::TERMINAL_TAG,
            Self::Error => Self::ERROR_TAG,
            Self::Tag(tag) => tag,
        }
    }
}

impl From<&str> for Channel {
    fn from(tag: &str) -> Self {
        match tag {
            Self::TERMINAL_TAG => Self::Terminal,
            Self::ERROR_TAG => Self::Error,
            other => Self::Tag(other.to_string()),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rendering hint attached to an event.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Action {
    /// Start a new block: the consumer inserts a separator first.
    Open,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct OutputEvent {
    pub channel: Channel,
    pub text: String,
    pub action: Option<Action>,
}

impl OutputEvent {
    pub fn new(channel: impl Into<Channel>, text: impl Into<String>, action: Option<Action>) -> Self {
        Self {
            channel: channel.into(),
            text: text.into(),
            action,
        }
    }

    /// A plain assistant fragment on the default channel.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Channel::assistant(), text, None)
    }

    /// An assistant fragment that starts a new block.
    pub fn open(text: impl Into<String>) -> Self {
        Self::new(Channel::assistant(), text, Some(Action::Open))
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(Channel::Error, text, Some(Action::Open))
    }

    pub(crate) fn terminal() -> Self {
        Self::new(Channel::Terminal, "", None)
    }

    pub fn is_terminal(&self) -> bool {
        self.channel == Channel::Terminal
    }
}

// ── Turns ──

/// One sample-rate/waveform pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFrame {
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl AudioFrame {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

/// What the user handed to the coordinator for a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserInput {
    Text { text: String },
    Image { path: PathBuf },
    /// A recording; transcribed before the turn starts.
    Speech {
        #[serde(skip)]
        frame: AudioFrame,
    },
}

impl UserInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(path: impl Into<PathBuf>) -> Self {
        Self::Image { path: path.into() }
    }

    pub fn speech(frame: AudioFrame) -> Self {
        Self::Speech { frame }
    }
}

impl Default for AudioFrame {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            samples: Vec::new(),
        }
    }
}

/// Prompt sent to the engine for an attached image.
pub fn image_prompt(path: &std::path::Path) -> String {
    format!("Please observe this image. \n![]({})\n", path.display())
}

/// A request/response cycle. Sealed once its worker has been joined.
#[derive(Debug, Clone, Serialize)]
pub struct TurnRecord {
    pub id: TurnId,
    pub input: UserInput,
    /// The text the engine actually received.
    pub prompt: String,
    pub response: String,
    pub started_at: DateTime<Utc>,
    pub sealed: bool,
}

impl TurnRecord {
    pub fn new(id: TurnId, input: UserInput, prompt: String) -> Self {
        Self {
            id,
            input,
            prompt,
            response: String::new(),
            started_at: Utc::now(),
            sealed: false,
        }
    }

    /// Accumulate one non-terminal event into the response.
    pub fn append(&mut self, event: &OutputEvent) {
        debug_assert!(!self.sealed, "append to sealed turn");
        if event.action == Some(Action::Open) {
            self.response.push_str(BLOCK_SEPARATOR);
        }
        self.response.push_str(&event.text);
    }
}

// ── Engine conversation format (Anthropic Messages API compatible) ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
}

pub fn user_message(text: &str) -> Message {
    Message {
        role: "user".to_string(),
        content: vec![ContentBlock::Text {
            text: text.to_string(),
        }],
    }
}

pub fn assistant_message(text: &str) -> Message {
    Message {
        role: "assistant".to_string(),
        content: vec![ContentBlock::Text {
            text: text.to_string(),
        }],
    }
}
