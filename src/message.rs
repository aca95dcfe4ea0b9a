use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: None,
            name: name.into(),
            arguments,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Outcome of a tool invocation as fed back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub name: String,
    pub output: Value,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub is_error: bool,
}

/// Record of control moving from one agent to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Agent that produced this entry, when it came from an agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer: Option<Transfer>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            agent: None,
            tool_call: None,
            tool_result: None,
            transfer: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn tool_call(agent: &str, call: ToolCall) -> Self {
        Self {
            agent: Some(agent.to_string()),
            tool_call: Some(call.clone()),
            ..Self::plain(Role::Assistant, format!("Calling tool `{}`", call.name))
        }
    }

    pub fn tool_result(agent: &str, result: ToolResult) -> Self {
        let content = match &result.output {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        Self {
            agent: Some(agent.to_string()),
            tool_result: Some(result),
            ..Self::plain(Role::Tool, content)
        }
    }

    pub fn transfer(from: &str, to: &str) -> Self {
        Self {
            agent: Some(from.to_string()),
            transfer: Some(Transfer {
                from: from.to_string(),
                to: to.to_string(),
            }),
            ..Self::plain(Role::Assistant, format!("Transferring to `{to}`"))
        }
    }

    pub fn from_agent(mut self, agent: &str) -> Self {
        self.agent = Some(agent.to_string());
        self
    }
}
