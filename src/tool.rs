use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{self, BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::context::SharedContext;
use crate::error::{RelayError, Result};
use crate::schema::Schema;

/// Everything a tool invocation can see besides its arguments.
#[derive(Debug, Clone)]
pub struct ToolContext {
    agent: String,
    call_id: String,
    context: SharedContext,
    cancellation: CancellationToken,
}

impl ToolContext {
    pub fn new(agent: impl Into<String>, call_id: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            call_id: call_id.into(),
            context: SharedContext::default(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_context(mut self, context: SharedContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Name of the agent that requested the call.
    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    /// Cancelled when the run is cancelled. Long-running tools should watch it.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    /// Optionally return a JSON Schema-like object describing the expected arguments.
    fn parameters(&self) -> Option<Value> {
        None
    }

    /// Errors are reported back to the model unless built with [`RelayError::fatal_tool`].
    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Static description of a tool that can be handed to the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescription {
    pub name: String,
    pub description: String,
    pub parameters: Option<Value>,
}

impl ToolDescription {
    pub fn of(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            parameters: tool.parameters(),
        }
    }
}

type Handler = Arc<dyn Fn(Value, ToolContext) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Adapter that turns a plain function into a named, schema-described [`Tool`].
///
/// Arguments are checked against `parameters` before the function runs; a
/// mismatch is returned to the model as a regular tool error.
#[derive(Clone)]
pub struct FunctionTool {
    name: String,
    description: String,
    parameters: Schema,
    handler: Handler,
}

impl FunctionTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Schema,
        f: F,
    ) -> Self
    where
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Arc::new(move |input: Value, ctx: ToolContext| f(input, ctx).boxed()),
        }
    }

    /// Wrap a synchronous function with typed arguments and result.
    pub fn from_fn<A, R, F>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Schema,
        f: F,
    ) -> Self
    where
        A: DeserializeOwned + 'static,
        R: Serialize + 'static,
        F: Fn(A) -> Result<R> + Send + Sync + 'static,
    {
        let name = name.into();
        let tool_name = name.clone();
        Self::new(name, description, parameters, move |input, _ctx| {
            let outcome = serde_json::from_value::<A>(input)
                .map_err(|err| RelayError::tool(&tool_name, format!("invalid arguments: {err}")))
                .and_then(&f)
                .and_then(|output| serde_json::to_value(output).map_err(RelayError::from));
            future::ready(outcome)
        })
    }

    pub fn parameter_schema(&self) -> &Schema {
        &self.parameters
    }
}

impl std::fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.name)
            .field("parameters", &self.parameters.name())
            .finish()
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Option<Value> {
        Some(self.parameters.to_json_schema())
    }

    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value> {
        let input = if input.is_null() { json!({}) } else { input };
        let arguments = self
            .parameters
            .validate(&input)
            .map_err(|err| RelayError::tool(&self.name, err.to_string()))?;
        (self.handler)(arguments, ctx.clone()).await
    }
}

/// Tools owned by one agent, unique by name. Filled while the agent is built,
/// read-only afterwards.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        self.register_shared(Arc::new(tool))
    }

    /// Register a tool that is also used elsewhere, e.g. by another agent.
    pub fn register_shared(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(RelayError::DuplicateToolName(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Tool>> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| RelayError::UnknownTool(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn describe(&self) -> Vec<ToolDescription> {
        let mut descriptions: Vec<ToolDescription> = self
            .tools
            .values()
            .map(|tool| ToolDescription::of(tool.as_ref()))
            .collect();

        descriptions.sort_by(|a, b| a.name.cmp(&b.name));
        descriptions
    }

    pub async fn call(&self, name: &str, input: Value, ctx: &ToolContext) -> Result<Value> {
        self.get(name)?.call(input, ctx).await
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;
    use serde::Deserialize;

    struct First;
    struct Second;

    #[async_trait]
    impl Tool for First {
        fn name(&self) -> &str {
            "a_first"
        }

        fn description(&self) -> &str {
            "First tool"
        }

        async fn call(&self, input: Value, _ctx: &ToolContext) -> Result<Value> {
            Ok(input)
        }
    }

    #[async_trait]
    impl Tool for Second {
        fn name(&self) -> &str {
            "second"
        }

        fn description(&self) -> &str {
            "Second tool"
        }

        async fn call(&self, input: Value, _ctx: &ToolContext) -> Result<Value> {
            Ok(input)
        }
    }

    #[derive(Deserialize)]
    struct MultiplyArgs {
        x: i64,
    }

    fn multiply_by_two() -> FunctionTool {
        FunctionTool::from_fn(
            "multiply_by_two",
            "Simple multiplication by two.",
            Schema::new("multiply_by_two").field("x", FieldType::Integer),
            |args: MultiplyArgs| Ok(args.x * 2),
        )
    }

    #[tokio::test]
    async fn returns_sorted_descriptions() {
        let mut registry = ToolRegistry::new();
        registry.register(Second).unwrap();
        registry.register(First).unwrap();

        let names: Vec<String> = registry.describe().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["a_first", "second"]);
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut registry = ToolRegistry::new();
        registry.register(First).unwrap();

        let err = registry.register(First).unwrap_err();
        assert!(matches!(err, RelayError::DuplicateToolName(name) if name == "a_first"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn lookup_of_missing_tool_fails() {
        let registry = ToolRegistry::new();
        assert!(matches!(
            registry.get("nope"),
            Err(RelayError::UnknownTool(name)) if name == "nope"
        ));
    }

    #[tokio::test]
    async fn function_tool_deserializes_arguments() {
        let mut registry = ToolRegistry::new();
        registry.register(multiply_by_two()).unwrap();

        let ctx = ToolContext::new("tester", "call-1");
        let output = registry
            .call("multiply_by_two", json!({"x": 21}), &ctx)
            .await
            .unwrap();
        assert_eq!(output, json!(42));

        let description = &registry.describe()[0];
        let params = description.parameters.as_ref().unwrap();
        assert_eq!(params["properties"]["x"]["type"], "integer");
    }

    #[tokio::test]
    async fn invalid_arguments_are_recoverable_tool_errors() {
        let tool = multiply_by_two();
        let ctx = ToolContext::new("tester", "call-1");

        let err = tool.call(json!({"x": "21"}), &ctx).await.unwrap_err();
        match err {
            RelayError::ToolExecution { name, fatal, .. } => {
                assert_eq!(name, "multiply_by_two");
                assert!(!fatal);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn async_tool_sees_shared_context() {
        let tool = FunctionTool::new(
            "remember",
            "Stores a value in the run context.",
            Schema::new("remember").field("value", FieldType::String),
            |input: Value, ctx: ToolContext| async move {
                ctx.context().insert("remembered", input["value"].clone()).await;
                Ok::<_, RelayError>(json!({"stored": true, "by": ctx.agent()}))
            },
        );

        let shared = SharedContext::new();
        let ctx = ToolContext::new("keeper", "call-7").with_context(shared.clone());
        let output = tool.call(json!({"value": "hi"}), &ctx).await.unwrap();

        assert_eq!(output, json!({"stored": true, "by": "keeper"}));
        assert_eq!(shared.get("remembered").await, Some(json!("hi")));
    }

    #[tokio::test]
    async fn parameterless_tools_accept_null_input() {
        let tool = FunctionTool::from_fn(
            "ping",
            "Replies pong.",
            Schema::new("ping"),
            |_: Value| Ok("pong"),
        );
        let ctx = ToolContext::new("tester", "call-2");
        assert_eq!(tool.call(Value::Null, &ctx).await.unwrap(), json!("pong"));
    }
}
