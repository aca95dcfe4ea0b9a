//! The model capability the runner drives, plus deterministic implementations
//! for tests and demos.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::Agent;
use crate::credentials::ApiKey;
use crate::error::{RelayError, Result};
use crate::graph::AgentGraph;
use crate::message::{Message, ToolCall};
use crate::telemetry::RetryPolicy;
use crate::tool::ToolDescription;

/// An agent this agent may transfer control to, as presented to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandoffDescription {
    pub name: String,
    pub description: Option<String>,
}

/// What the model gets to know about the active agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentConfig {
    pub name: String,
    pub instructions: String,
    pub tools: Vec<ToolDescription>,
    pub handoffs: Vec<HandoffDescription>,
    /// JSON Schema of the expected final output, if the agent declares one.
    pub output_schema: Option<Value>,
}

impl AgentConfig {
    pub fn for_agent(agent: &Agent, graph: &AgentGraph) -> Self {
        let handoffs = agent
            .handoffs()
            .iter()
            .map(|handoff| {
                let name = handoff.target_name();
                HandoffDescription {
                    name: name.to_string(),
                    description: graph
                        .get(name)
                        .and_then(|target| target.handoff_description())
                        .map(str::to_string),
                }
            })
            .collect();

        Self {
            name: agent.name().to_string(),
            instructions: agent.instructions().to_string(),
            tools: agent.tools().describe(),
            handoffs,
            output_schema: agent.output_schema().map(|schema| schema.to_json_schema()),
        }
    }
}

/// One invocation of the model for the active agent.
#[derive(Debug, Clone)]
pub struct ModelRequest<'a> {
    pub agent: AgentConfig,
    pub history: &'a [Message],
    pub api_key: &'a ApiKey,
    /// 1-based index of this invocation within the run.
    pub turn: usize,
}

/// How the model wants the run to proceed.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelResponse {
    FinalText(String),
    FinalStructured(Value),
    ToolCalls(Vec<ToolCall>),
    Handoff { agent: String },
}

impl ModelResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self::FinalText(content.into())
    }

    pub fn tool_call(name: impl Into<String>, arguments: Value) -> Self {
        Self::ToolCalls(vec![ToolCall::new(name, arguments)])
    }

    pub fn handoff(agent: impl Into<String>) -> Self {
        Self::Handoff {
            agent: agent.into(),
        }
    }
}

/// The injected language-model capability. Possibly remote, possibly failing.
///
/// The runner never retries a failed invocation; wrap an implementation in
/// [`RetryingModel`] to get retries.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn invoke(&self, request: &ModelRequest<'_>) -> Result<ModelResponse>;
}

/// A deterministic model used for tests and demos. Replays scripted JSON
/// directives in order:
///
/// - `{"action":"respond","content":"..."}`
/// - `{"action":"respond_structured","output":{...}}`
/// - `{"action":"call_tool","name":"...","arguments":{...}}`
/// - `{"action":"call_tools","calls":[{"name":"...","arguments":{...}}]}`
/// - `{"action":"handoff","agent":"..."}`
/// - `{"action":"fail","message":"..."}`
///
/// Anything that is not a directive is returned as final text.
pub struct StubModel {
    responses: Mutex<VecDeque<String>>,
    invocations: AtomicUsize,
    agents: Mutex<Vec<String>>,
}

impl StubModel {
    pub fn new(responses: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            invocations: AtomicUsize::new(0),
            agents: Mutex::new(Vec::new()),
        })
    }

    /// Number of times the model was invoked.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Name of the active agent for every invocation so far.
    pub fn seen_agents(&self) -> Vec<String> {
        self.agents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum StubDirective {
    Respond { content: String },
    RespondStructured { output: Value },
    CallTool {
        name: String,
        #[serde(default)]
        arguments: Value,
    },
    CallTools { calls: Vec<ToolCall> },
    Handoff { agent: String },
    Fail { message: String },
}

#[async_trait]
impl LanguageModel for StubModel {
    async fn invoke(&self, request: &ModelRequest<'_>) -> Result<ModelResponse> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.agents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.agent.name.clone());

        let raw = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| {
                RelayError::ModelCapability("StubModel ran out of scripted responses".into())
            })?;

        match serde_json::from_str::<StubDirective>(&raw) {
            Ok(StubDirective::Respond { content }) => Ok(ModelResponse::FinalText(content)),
            Ok(StubDirective::RespondStructured { output }) => {
                Ok(ModelResponse::FinalStructured(output))
            }
            Ok(StubDirective::CallTool { name, arguments }) => {
                Ok(ModelResponse::tool_call(name, arguments))
            }
            Ok(StubDirective::CallTools { calls }) => Ok(ModelResponse::ToolCalls(calls)),
            Ok(StubDirective::Handoff { agent }) => Ok(ModelResponse::Handoff { agent }),
            Ok(StubDirective::Fail { message }) => Err(RelayError::ModelCapability(message)),
            Err(_) => Ok(ModelResponse::FinalText(raw)),
        }
    }
}

/// A model backed by a plain function of the request, typically deciding from
/// the active agent and the last history entry.
pub struct FnModel<F> {
    f: F,
}

impl<F> FnModel<F>
where
    F: Fn(&ModelRequest<'_>) -> Result<ModelResponse> + Send + Sync,
{
    pub fn new(f: F) -> Arc<Self> {
        Arc::new(Self { f })
    }
}

#[async_trait]
impl<F> LanguageModel for FnModel<F>
where
    F: Fn(&ModelRequest<'_>) -> Result<ModelResponse> + Send + Sync,
{
    async fn invoke(&self, request: &ModelRequest<'_>) -> Result<ModelResponse> {
        (self.f)(request)
    }
}

/// Decorator that retries failed invocations of another model.
pub struct RetryingModel {
    inner: Arc<dyn LanguageModel>,
    policy: RetryPolicy,
}

impl RetryingModel {
    pub fn new(inner: Arc<dyn LanguageModel>, policy: RetryPolicy) -> Arc<Self> {
        Arc::new(Self { inner, policy })
    }
}

#[async_trait]
impl LanguageModel for RetryingModel {
    async fn invoke(&self, request: &ModelRequest<'_>) -> Result<ModelResponse> {
        self.policy
            .retry(|_attempt| self.inner.invoke(request))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldType, Schema};
    use crate::tool::FunctionTool;
    use std::time::Duration;

    fn request<'a>(key: &'a ApiKey, agent: &Agent) -> ModelRequest<'a> {
        let graph = AgentGraph::build(&Arc::new(Agent::new(agent.name())), &[]).unwrap();
        ModelRequest {
            agent: AgentConfig::for_agent(agent, &graph),
            history: &[],
            api_key: key,
            turn: 1,
        }
    }

    #[tokio::test]
    async fn stub_replays_directives_in_order() {
        let model = StubModel::new(vec![
            r#"{"action":"call_tool","name":"echo","arguments":{"text":"ping"}}"#.into(),
            r#"{"action":"handoff","agent":"Other"}"#.into(),
            r#"{"action":"respond_structured","output":{"number":2}}"#.into(),
            "plain words".into(),
        ]);
        let key = ApiKey::new("test").unwrap();
        let agent = Agent::new("Stubbed");
        let req = request(&key, &agent);

        assert_eq!(
            model.invoke(&req).await.unwrap(),
            ModelResponse::tool_call("echo", serde_json::json!({"text": "ping"}))
        );
        assert_eq!(model.invoke(&req).await.unwrap(), ModelResponse::handoff("Other"));
        assert_eq!(
            model.invoke(&req).await.unwrap(),
            ModelResponse::FinalStructured(serde_json::json!({"number": 2}))
        );
        assert_eq!(model.invoke(&req).await.unwrap(), ModelResponse::text("plain words"));
        assert!(matches!(
            model.invoke(&req).await,
            Err(RelayError::ModelCapability(_))
        ));
        assert_eq!(model.invocations(), 5);
        assert_eq!(model.seen_agents().len(), 5);
    }

    #[test]
    fn agent_config_describes_tools_schema_and_handoffs() {
        let helper = Arc::new(
            Agent::new("Helper").with_handoff_description("Handles the hard part."),
        );
        let agent = Arc::new(
            Agent::new("Lead")
                .with_instructions("Lead the way.")
                .with_tool(FunctionTool::from_fn(
                    "noop",
                    "Does nothing.",
                    Schema::new("noop"),
                    |_: Value| Ok(Value::Null),
                ))
                .unwrap()
                .with_output_schema(Schema::new("Answer").field("text", FieldType::String))
                .with_handoff(helper),
        );
        let graph = AgentGraph::build(&agent, &[]).unwrap();

        let config = AgentConfig::for_agent(&agent, &graph);
        assert_eq!(config.instructions, "Lead the way.");
        assert_eq!(config.tools[0].name, "noop");
        assert_eq!(
            config.handoffs,
            vec![HandoffDescription {
                name: "Helper".into(),
                description: Some("Handles the hard part.".into()),
            }]
        );
        assert_eq!(config.output_schema.unwrap()["title"], "Answer");
    }

    #[tokio::test]
    async fn retrying_model_retries_failed_invocations() {
        let inner = StubModel::new(vec![
            r#"{"action":"fail","message":"overloaded"}"#.into(),
            r#"{"action":"respond","content":"ok"}"#.into(),
        ]);
        let model = RetryingModel::new(
            inner.clone(),
            RetryPolicy {
                max_retries: 2,
                backoff: Duration::from_millis(1),
            },
        );
        let key = ApiKey::new("test").unwrap();
        let agent = Agent::new("Retry");

        let response = model.invoke(&request(&key, &agent)).await.unwrap();
        assert_eq!(response, ModelResponse::text("ok"));
        assert_eq!(inner.invocations(), 2);
    }
}
