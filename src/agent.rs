use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::hooks::AgentHooks;
use crate::schema::Schema;
use crate::tool::{Tool, ToolRegistry};

/// A handoff target declared on an agent.
#[derive(Clone)]
pub enum Handoff {
    /// Direct link to another agent.
    Agent(Arc<Agent>),
    /// Link by name, resolved against the agents known to the run. Lets two
    /// agents hand off to each other.
    Named(String),
}

impl Handoff {
    pub fn target_name(&self) -> &str {
        match self {
            Handoff::Agent(agent) => agent.name(),
            Handoff::Named(name) => name,
        }
    }
}

impl fmt::Debug for Handoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handoff::Agent(agent) => write!(f, "Agent({:?})", agent.name()),
            Handoff::Named(name) => write!(f, "Named({name:?})"),
        }
    }
}

/// Immutable description of an agent: instructions, tools, expected output and
/// who it may hand off to.
///
/// Build it once, wrap it in an [`Arc`], and reuse it across runs:
///
/// ```
/// use std::sync::Arc;
/// use relay_engine::{Agent, FieldType, Schema};
///
/// let multiply = Arc::new(
///     Agent::new("Multiply Agent")
///         .with_instructions("Multiply the number by 2 and then return the final result.")
///         .with_output_schema(Schema::new("FinalResult").field("number", FieldType::Integer)),
/// );
/// let start = Agent::new("Start Agent").with_handoff(multiply);
/// assert!(start.can_hand_off_to("Multiply Agent"));
/// ```
pub struct Agent {
    name: String,
    instructions: String,
    handoff_description: Option<String>,
    tools: ToolRegistry,
    output_schema: Option<Schema>,
    handoffs: Vec<Handoff>,
    hooks: Vec<Arc<dyn AgentHooks>>,
}

impl Agent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: "You are a helpful agent.".to_string(),
            handoff_description: None,
            tools: ToolRegistry::new(),
            output_schema: None,
            handoffs: Vec::new(),
            hooks: Vec::new(),
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    /// Shown to other agents' models when this agent is offered as a handoff.
    pub fn with_handoff_description(mut self, description: impl Into<String>) -> Self {
        self.handoff_description = Some(description.into());
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Register one more tool. Fails if the name is taken.
    pub fn with_tool<T: Tool + 'static>(mut self, tool: T) -> Result<Self> {
        self.tools.register(tool)?;
        Ok(self)
    }

    pub fn with_output_schema(mut self, schema: Schema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn with_handoff(mut self, target: Arc<Agent>) -> Self {
        self.handoffs.push(Handoff::Agent(target));
        self
    }

    pub fn with_handoff_to(mut self, name: impl Into<String>) -> Self {
        self.handoffs.push(Handoff::Named(name.into()));
        self
    }

    pub fn with_hooks<H: AgentHooks + 'static>(self, hooks: H) -> Self {
        self.with_shared_hooks(Arc::new(hooks))
    }

    pub fn with_shared_hooks(mut self, hooks: Arc<dyn AgentHooks>) -> Self {
        self.hooks.push(hooks);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn handoff_description(&self) -> Option<&str> {
        self.handoff_description.as_deref()
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn output_schema(&self) -> Option<&Schema> {
        self.output_schema.as_ref()
    }

    pub fn handoffs(&self) -> &[Handoff] {
        &self.handoffs
    }

    pub fn hooks(&self) -> &[Arc<dyn AgentHooks>] {
        &self.hooks
    }

    pub fn can_hand_off_to(&self, name: &str) -> bool {
        self.handoffs.iter().any(|h| h.target_name() == name)
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("tools", &self.tools)
            .field("output_schema", &self.output_schema.as_ref().map(Schema::name))
            .field("handoffs", &self.handoffs)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}
