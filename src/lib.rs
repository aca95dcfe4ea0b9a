//! An agent orchestration runtime.
//!
//! The crate provides:
//! - A language model abstraction (`LanguageModel`) the runner drives turn by turn.
//! - Agents with instructions, tools, an optional output schema and handoff targets.
//! - A `Runner` that executes tool calls concurrently, follows handoffs, enforces a
//!   turn budget and validates the final output.
//! - Lifecycle hooks (`AgentHooks`) observing every step of a run.
//!
//! ```
//! use std::sync::Arc;
//! use relay_engine::{Agent, FieldType, RunOptions, Runner, Schema, StubModel};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let model = StubModel::new(vec![r#"{"action":"respond_structured","output":{"number":4}}"#.into()]);
//! let agent = Arc::new(
//!     Agent::new("Start Agent")
//!         .with_output_schema(Schema::new("FinalResult").field("number", FieldType::Integer)),
//! );
//!
//! let result = Runner::new(model)
//!     .with_api_key("sk-test")
//!     .unwrap()
//!     .run(&agent, "Generate a random number", RunOptions::default())
//!     .await
//!     .unwrap();
//! assert_eq!(result.final_output.to_string(), r#"{"number":4}"#);
//! # }
//! ```

mod agent;
mod config;
mod context;
mod credentials;
mod error;
mod graph;
mod hooks;
mod llm;
mod memory;
mod message;
mod runner;
mod schema;
mod telemetry;
mod tool;

pub use agent::{Agent, Handoff};
pub use config::{AppConfig, LoggingConfig, ModelConfig, RunnerConfig};
pub use context::SharedContext;
pub use credentials::{default_api_key, set_default_api_key, ApiKey};
pub use error::{RelayError, Result, RunFailure};
pub use graph::AgentGraph;
pub use hooks::{AgentHooks, CountedEvent, CountingHooks, HookEvent};
pub use llm::{
    AgentConfig, FnModel, HandoffDescription, LanguageModel, ModelRequest, ModelResponse,
    RetryingModel, StubModel,
};
pub use memory::ConversationMemory;
pub use message::{Message, Role, ToolCall, ToolResult, Transfer};
pub use runner::{
    FinalOutput, RunInput, RunOptions, RunOutcome, RunResult, RunState, Runner, DEFAULT_MAX_TURNS,
};
pub use schema::{
    CoercionPolicy, Field, FieldType, Schema, UnknownFields, ValidationError, ValidationIssue,
};
pub use telemetry::{init_tracing, RetryPolicy};
pub use tool::{FunctionTool, Tool, ToolContext, ToolDescription, ToolRegistry};

/// Re-exported so callers can cancel runs without depending on `tokio-util` directly.
pub use tokio_util::sync::CancellationToken;
