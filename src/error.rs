use thiserror::Error;

use crate::message::Message;
use crate::runner::RunState;
use crate::schema::ValidationError;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("no API key configured; call `set_default_api_key` or `Runner::with_api_key` first")]
    MissingCredential,

    #[error("agent name `{0}` is used by more than one agent in the handoff graph")]
    DuplicateAgentName(String),

    #[error("tool `{0}` is already registered")]
    DuplicateToolName(String),

    #[error("tool `{0}` not found")]
    UnknownTool(String),

    #[error("agent `{from}` cannot hand off to `{to}`")]
    InvalidHandoff { from: String, to: String },

    #[error("language model error: {0}")]
    ModelCapability(String),

    #[error("tool `{name}` failed: {message}")]
    ToolExecution {
        name: String,
        message: String,
        fatal: bool,
    },

    #[error("final output of agent `{agent}` failed validation: {source}")]
    OutputValidation {
        agent: String,
        #[source]
        source: ValidationError,
    },

    #[error("run exceeded the maximum of {max_turns} turns")]
    MaxTurnsExceeded { max_turns: usize },

    #[error("`{event}` hook of agent `{agent}` failed: {source}")]
    Hook {
        event: &'static str,
        agent: String,
        #[source]
        source: Box<RelayError>,
    },

    #[error("run cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// A tool error the model gets to see and react to.
    pub fn tool(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            name: name.into(),
            message: message.into(),
            fatal: false,
        }
    }

    /// A tool error that aborts the whole run.
    pub fn fatal_tool(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            name: name.into(),
            message: message.into(),
            fatal: true,
        }
    }

    pub fn is_fatal_tool_error(&self) -> bool {
        matches!(self, Self::ToolExecution { fatal: true, .. })
    }
}

/// A run that ended in the `Failed` state, with enough context to diagnose it.
#[derive(Debug, Error)]
#[error("run failed at turn {turn} (active agent `{agent}`): {error}")]
pub struct RunFailure {
    #[source]
    pub error: RelayError,
    /// Agent that was active when the run failed. Empty if the run never started.
    pub agent: String,
    /// Number of model invocations started, including the one that failed.
    pub turn: usize,
    /// State the run was in when the error surfaced.
    pub state: RunState,
    pub last_entry: Option<Message>,
    /// Transcript up to the failure, including tool results completed before a cancellation.
    pub history: Vec<Message>,
}

impl RunFailure {
    pub fn kind(&self) -> &RelayError {
        &self.error
    }

    pub fn into_error(self) -> RelayError {
        self.error
    }
}
