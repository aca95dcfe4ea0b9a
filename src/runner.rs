//! The run loop: turns an entry agent and a user input into model invocations,
//! tool executions, handoffs and hook notifications until a validated final
//! output is produced or the run fails.
//!
//! A run moves through the [`RunState`]s
//!
//! ```text
//! Starting -> Invoking -+-> ExecutingTools -> Invoking
//!                       +-> HandingOff     -> Invoking
//!                       +-> Validating     -> Done
//! ```
//!
//! and ends in `Failed` from any state on a fatal error. It suspends only while
//! waiting for the model or for tools.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::agent::Agent;
use crate::config::RunnerConfig;
use crate::context::SharedContext;
use crate::credentials::{default_api_key, ApiKey};
use crate::error::{RelayError, Result, RunFailure};
use crate::graph::AgentGraph;
use crate::hooks::{dispatch, Lifecycle};
use crate::llm::{AgentConfig, LanguageModel, ModelRequest, ModelResponse};
use crate::memory::ConversationMemory;
use crate::message::{Message, ToolCall, ToolResult};
use crate::tool::{Tool, ToolContext};

/// Model invocations allowed per run unless [`RunOptions::with_max_turns`] says otherwise.
pub const DEFAULT_MAX_TURNS: usize = 10;

/// Outcome of [`Runner::run`].
pub type RunOutcome = std::result::Result<RunResult, RunFailure>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Starting,
    Invoking,
    ExecutingTools,
    HandingOff,
    Validating,
    Done,
    Failed,
}

/// User input that starts a run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunInput {
    Text(String),
    Structured(Value),
}

impl RunInput {
    fn into_message(self) -> Message {
        match self {
            RunInput::Text(text) => Message::user(text),
            RunInput::Structured(value) => Message::user(value.to_string()),
        }
    }
}

impl From<&str> for RunInput {
    fn from(text: &str) -> Self {
        RunInput::Text(text.to_string())
    }
}

impl From<String> for RunInput {
    fn from(text: String) -> Self {
        RunInput::Text(text)
    }
}

impl From<Value> for RunInput {
    fn from(value: Value) -> Self {
        RunInput::Structured(value)
    }
}

/// Final result of a run: raw text, or a value that passed the agent's output schema.
#[derive(Debug, Clone, PartialEq)]
pub enum FinalOutput {
    Text(String),
    Structured(Value),
}

impl FinalOutput {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FinalOutput::Text(text) => Some(text),
            FinalOutput::Structured(_) => None,
        }
    }

    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            FinalOutput::Structured(value) => Some(value),
            FinalOutput::Text(_) => None,
        }
    }

    /// Typed view of the output.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        match self {
            FinalOutput::Text(text) => Ok(serde_json::from_str(text)?),
            FinalOutput::Structured(value) => Ok(T::deserialize(value)?),
        }
    }
}

impl fmt::Display for FinalOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinalOutput::Text(text) => f.write_str(text),
            FinalOutput::Structured(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    max_turns: usize,
    context: SharedContext,
    cancellation: Option<CancellationToken>,
    max_tool_concurrency: Option<usize>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            context: SharedContext::default(),
            cancellation: None,
            max_tool_concurrency: None,
        }
    }
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            max_turns: config.max_turns,
            max_tool_concurrency: config.max_tool_concurrency.map(|limit| limit.max(1)),
            ..Self::default()
        }
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// The bag handed to every hook and tool of the run.
    pub fn with_context(mut self, context: SharedContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn with_max_tool_concurrency(mut self, limit: usize) -> Self {
        self.max_tool_concurrency = Some(limit.max(1));
        self
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    pub fn context(&self) -> &SharedContext {
        &self.context
    }
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: Uuid,
    pub final_output: FinalOutput,
    /// Name of the agent that produced the final output.
    pub last_agent: String,
    pub history: Vec<Message>,
    /// Model invocations used.
    pub turns: usize,
}

/// Drives agents against one model capability.
///
/// ```no_run
/// use std::sync::Arc;
/// use relay_engine::{Agent, RunOptions, Runner, StubModel};
///
/// # async fn demo() -> Result<(), relay_engine::RunFailure> {
/// let model = StubModel::new(vec![r#"{"action":"respond","content":"Hi!"}"#.into()]);
/// let agent = Arc::new(Agent::new("Assistant").with_instructions("You only respond in haikus."));
/// let result = Runner::new(model)
///     .run(&agent, "Tell me about recursion in programming.", RunOptions::default())
///     .await?;
/// println!("{}", result.final_output);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Runner {
    model: Arc<dyn LanguageModel>,
    api_key: Option<ApiKey>,
    agents: Vec<Arc<Agent>>,
}

impl Runner {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            api_key: None,
            agents: Vec::new(),
        }
    }

    /// Use this key instead of the process-wide default.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Result<Self> {
        self.api_key = Some(ApiKey::new(key)?);
        Ok(self)
    }

    /// Make `agent` available as a target of name-based handoffs.
    pub fn with_agent(mut self, agent: Arc<Agent>) -> Self {
        self.agents.push(agent);
        self
    }

    pub async fn run(
        &self,
        entry: &Arc<Agent>,
        input: impl Into<RunInput>,
        options: RunOptions,
    ) -> RunOutcome {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", %run_id, entry = %entry.name());
        self.execute(run_id, entry, input.into(), options)
            .instrument(span)
            .await
    }

    async fn execute(
        &self,
        run_id: Uuid,
        entry: &Arc<Agent>,
        input: RunInput,
        options: RunOptions,
    ) -> RunOutcome {
        let rejected = |error: RelayError| {
            warn!(error = %error, "run rejected before start");
            RunFailure {
                error,
                agent: entry.name().to_string(),
                turn: 0,
                state: RunState::Starting,
                last_entry: None,
                history: Vec::new(),
            }
        };

        let api_key = self
            .api_key
            .clone()
            .or_else(|| default_api_key().cloned())
            .ok_or(RelayError::MissingCredential)
            .map_err(rejected)?;
        let graph = AgentGraph::build(entry, &self.agents).map_err(rejected)?;

        info!(
            agents = graph.len(),
            max_turns = options.max_turns,
            "run started"
        );
        let mut run = Run {
            model: self.model.as_ref(),
            graph,
            api_key,
            options,
            active: Arc::clone(entry),
            memory: ConversationMemory::default(),
            turn: 0,
            state: RunState::Starting,
        };
        run.memory.push(input.into_message());

        match run.drive().await {
            Ok(final_output) => {
                info!(agent = %run.active.name(), turns = run.turn, "run finished");
                Ok(RunResult {
                    run_id,
                    final_output,
                    last_agent: run.active.name().to_string(),
                    history: run.memory.into_messages(),
                    turns: run.turn,
                })
            }
            Err(error) => {
                let failure = run.fail(error);
                warn!(
                    agent = %failure.agent,
                    turn = failure.turn,
                    state = ?failure.state,
                    error = %failure.error,
                    "run failed"
                );
                Err(failure)
            }
        }
    }
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("api_key", &self.api_key)
            .field("agents", &self.agents.len())
            .finish()
    }
}

/// Next step of the loop, with the data it needs.
enum Phase {
    Invoking,
    ExecutingTools(Vec<ToolCall>),
    HandingOff(String),
    Validating(FinalOutput),
}

impl Phase {
    fn state(&self) -> RunState {
        match self {
            Phase::Invoking => RunState::Invoking,
            Phase::ExecutingTools(_) => RunState::ExecutingTools,
            Phase::HandingOff(_) => RunState::HandingOff,
            Phase::Validating(_) => RunState::Validating,
        }
    }
}

/// Per-run state, exclusively owned by one [`Runner::run`] call.
struct Run<'r> {
    model: &'r dyn LanguageModel,
    graph: AgentGraph,
    api_key: ApiKey,
    options: RunOptions,
    active: Arc<Agent>,
    memory: ConversationMemory,
    turn: usize,
    state: RunState,
}

impl Run<'_> {
    async fn drive(&mut self) -> Result<FinalOutput> {
        let entry = Arc::clone(&self.active);
        dispatch(&entry, &self.options.context, Lifecycle::Start).await?;

        let mut phase = Phase::Invoking;
        loop {
            self.enter(phase.state());
            phase = match phase {
                Phase::Invoking => self.invoke().await?,
                Phase::ExecutingTools(calls) => {
                    self.execute_tools(calls).await?;
                    Phase::Invoking
                }
                Phase::HandingOff(target) => {
                    self.hand_off(&target).await?;
                    Phase::Invoking
                }
                Phase::Validating(candidate) => {
                    let output = self.finish(candidate).await?;
                    self.enter(RunState::Done);
                    return Ok(output);
                }
            };
        }
    }

    fn enter(&mut self, state: RunState) {
        self.state = state;
        debug!(?state, agent = %self.active.name(), turn = self.turn, "state transition");
    }

    fn fail(self, error: RelayError) -> RunFailure {
        RunFailure {
            error,
            agent: self.active.name().to_string(),
            turn: self.turn,
            state: self.state,
            last_entry: self.memory.last().cloned(),
            history: self.memory.into_messages(),
        }
    }

    async fn invoke(&mut self) -> Result<Phase> {
        self.turn += 1;
        if self.turn > self.options.max_turns {
            return Err(RelayError::MaxTurnsExceeded {
                max_turns: self.options.max_turns,
            });
        }

        let response = {
            let request = ModelRequest {
                agent: AgentConfig::for_agent(&self.active, &self.graph),
                history: self.memory.messages(),
                api_key: &self.api_key,
                turn: self.turn,
            };
            cancellable(&self.options.cancellation, self.model.invoke(&request))
                .await?
                .map_err(model_error)?
        };

        match response {
            ModelResponse::ToolCalls(calls) if calls.is_empty() => Err(RelayError::Protocol(
                "model requested an empty list of tool calls".into(),
            )),
            ModelResponse::ToolCalls(calls) => Ok(Phase::ExecutingTools(calls)),
            ModelResponse::Handoff { agent } => Ok(Phase::HandingOff(agent)),
            ModelResponse::FinalText(text) => Ok(Phase::Validating(FinalOutput::Text(text))),
            ModelResponse::FinalStructured(value) => {
                Ok(Phase::Validating(FinalOutput::Structured(value)))
            }
        }
    }

    async fn execute_tools(&mut self, calls: Vec<ToolCall>) -> Result<()> {
        let agent = Arc::clone(&self.active);

        let mut resolved: Vec<(ToolCall, Arc<dyn Tool>)> = Vec::with_capacity(calls.len());
        for mut call in calls {
            let tool = agent.tools().get(&call.name)?;
            if call.id.is_none() {
                call.id = Some(format!("call-{}", self.memory.len() + resolved.len()));
            }
            resolved.push((call, tool));
        }

        for (call, _) in &resolved {
            self.memory.push(Message::tool_call(agent.name(), call.clone()));
        }
        for (_, tool) in &resolved {
            dispatch(&agent, &self.options.context, Lifecycle::ToolStart(tool.as_ref())).await?;
        }

        let (outcomes, cancelled) = self.run_tool_tasks(&agent, &resolved).await;

        let mut fatal = None;
        for ((call, tool), outcome) in resolved.iter().zip(outcomes) {
            let Some(outcome) = outcome else { continue };
            let result = tool_result(call, outcome, &mut fatal);
            if !cancelled {
                dispatch(
                    &agent,
                    &self.options.context,
                    Lifecycle::ToolEnd(tool.as_ref(), &result),
                )
                .await?;
            }
            self.memory.push(Message::tool_result(agent.name(), result));
        }

        if cancelled {
            return Err(RelayError::Cancelled);
        }
        match fatal {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Run every call on its own task and collect outcomes in request order.
    /// Returns `true` alongside when the run was cancelled before all calls
    /// finished; the missing outcomes are then `None`.
    async fn run_tool_tasks(
        &self,
        agent: &Agent,
        resolved: &[(ToolCall, Arc<dyn Tool>)],
    ) -> (Vec<Option<Result<Value>>>, bool) {
        let run_token = self.options.cancellation.clone().unwrap_or_default();
        let tool_token = run_token.child_token();
        let limit = self
            .options
            .max_tool_concurrency
            .map(|limit| Arc::new(Semaphore::new(limit)));

        let mut tasks = JoinSet::new();
        for (index, (call, tool)) in resolved.iter().enumerate() {
            let tool = Arc::clone(tool);
            let name = call.name.clone();
            let arguments = call.arguments.clone();
            let call_id = call.id.clone().unwrap_or_default();
            let span = info_span!("tool", tool.name = %name, tool.id = %call_id);
            let ctx = ToolContext::new(agent.name(), call_id)
                .with_context(self.options.context.clone())
                .with_cancellation(tool_token.clone());
            let limit = limit.clone();

            tasks.spawn(
                async move {
                    let _permit = match limit {
                        Some(semaphore) => semaphore.acquire_owned().await.ok(),
                        None => None,
                    };
                    let outcome = AssertUnwindSafe(tool.call(arguments, &ctx))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| Err(RelayError::tool(&name, "tool panicked")));
                    (index, outcome)
                }
                .instrument(span),
            );
        }

        let mut outcomes: Vec<Option<Result<Value>>> = resolved.iter().map(|_| None).collect();
        let cancelled = loop {
            let next = tokio::select! {
                biased;
                _ = run_token.cancelled() => break true,
                next = tasks.join_next() => next,
            };
            match next {
                Some(Ok((index, outcome))) => outcomes[index] = Some(outcome),
                Some(Err(err)) => warn!(error = %err, "tool task did not complete"),
                None => break false,
            }
        };

        if cancelled {
            tool_token.cancel();
            tasks.abort_all();
        }
        (outcomes, cancelled)
    }

    async fn hand_off(&mut self, target: &str) -> Result<()> {
        let source = Arc::clone(&self.active);
        let next = self.graph.handoff_target(&source, target)?;

        info!(from = %source.name(), to = %next.name(), "handoff");
        self.memory.push(Message::transfer(source.name(), next.name()));
        self.active = Arc::clone(&next);

        dispatch(
            &next,
            &self.options.context,
            Lifecycle::Handoff {
                source: source.as_ref(),
            },
        )
        .await?;
        dispatch(&next, &self.options.context, Lifecycle::Start).await
    }

    async fn finish(&mut self, candidate: FinalOutput) -> Result<FinalOutput> {
        let agent = Arc::clone(&self.active);
        let invalid = |source| RelayError::OutputValidation {
            agent: agent.name().to_string(),
            source,
        };
        let output = match (agent.output_schema(), candidate) {
            (Some(schema), FinalOutput::Text(text)) => {
                FinalOutput::Structured(schema.validate_text(&text).map_err(invalid)?)
            }
            (Some(schema), FinalOutput::Structured(value)) => {
                FinalOutput::Structured(schema.validate(&value).map_err(invalid)?)
            }
            (None, FinalOutput::Structured(value)) => FinalOutput::Text(value.to_string()),
            (None, text) => text,
        };
        self.memory
            .push(Message::assistant(output.to_string()).from_agent(agent.name()));

        dispatch(&agent, &self.options.context, Lifecycle::End(&output)).await?;
        Ok(output)
    }
}

/// Await `fut` unless the run is cancelled first.
async fn cancellable<T>(
    token: &Option<CancellationToken>,
    fut: impl std::future::Future<Output = T>,
) -> Result<T> {
    match token {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(RelayError::Cancelled),
            value = fut => Ok(value),
        },
        None => Ok(fut.await),
    }
}

fn model_error(err: RelayError) -> RelayError {
    match err {
        RelayError::ModelCapability(_) => err,
        other => RelayError::ModelCapability(other.to_string()),
    }
}

/// Convert a tool outcome into the entry fed back to the model. The first fatal
/// error is kept in `fatal`.
fn tool_result(call: &ToolCall, outcome: Result<Value>, fatal: &mut Option<RelayError>) -> ToolResult {
    let (output, is_error) = match outcome {
        Ok(value) => (value, false),
        Err(err) => {
            warn!(tool = %call.name, error = %err, "tool call failed");
            let message = Value::String(err.to_string());
            if err.is_fatal_tool_error() && fatal.is_none() {
                *fatal = Some(err);
            }
            (message, true)
        }
    };
    ToolResult {
        name: call.name.clone(),
        output,
        tool_call_id: call.id.clone(),
        is_error,
    }
}
