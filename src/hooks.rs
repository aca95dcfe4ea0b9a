use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::info;

use crate::agent::Agent;
use crate::context::SharedContext;
use crate::error::{RelayError, Result};
use crate::message::ToolResult;
use crate::runner::FinalOutput;
use crate::tool::Tool;

/// Lifecycle callbacks bound to an agent. Every method defaults to a no-op.
///
/// Returning an error aborts the run with [`RelayError::Hook`].
#[async_trait]
pub trait AgentHooks: Send + Sync {
    /// The agent became active, either as the entry agent or after a handoff.
    async fn on_start(&self, _ctx: &SharedContext, _agent: &Agent) -> Result<()> {
        Ok(())
    }

    /// The agent produced the final output of the run.
    async fn on_end(&self, _ctx: &SharedContext, _agent: &Agent, _output: &FinalOutput) -> Result<()> {
        Ok(())
    }

    /// Control moved from `source` to `agent`.
    async fn on_handoff(&self, _ctx: &SharedContext, _agent: &Agent, _source: &Agent) -> Result<()> {
        Ok(())
    }

    async fn on_tool_start(&self, _ctx: &SharedContext, _agent: &Agent, _tool: &dyn Tool) -> Result<()> {
        Ok(())
    }

    /// Fired for failed invocations too; `result.is_error` tells them apart.
    async fn on_tool_end(
        &self,
        _ctx: &SharedContext,
        _agent: &Agent,
        _tool: &dyn Tool,
        _result: &ToolResult,
    ) -> Result<()> {
        Ok(())
    }
}

/// A lifecycle event as observed by [`CountingHooks`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookEvent {
    Start { agent: String },
    End { agent: String, output: String },
    Handoff { agent: String, source: String },
    ToolStart { agent: String, tool: String },
    ToolEnd { agent: String, tool: String, result: String },
}

impl HookEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            HookEvent::Start { .. } => "on_start",
            HookEvent::End { .. } => "on_end",
            HookEvent::Handoff { .. } => "on_handoff",
            HookEvent::ToolStart { .. } => "on_tool_start",
            HookEvent::ToolEnd { .. } => "on_tool_end",
        }
    }

    pub fn agent(&self) -> &str {
        match self {
            HookEvent::Start { agent }
            | HookEvent::End { agent, .. }
            | HookEvent::Handoff { agent, .. }
            | HookEvent::ToolStart { agent, .. }
            | HookEvent::ToolEnd { agent, .. } => agent,
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookEvent::Start { agent } => write!(f, "Agent {agent} started"),
            HookEvent::End { agent, output } => {
                write!(f, "Agent {agent} ended with output {output}")
            }
            HookEvent::Handoff { agent, source } => {
                write!(f, "Agent {source} handed off to {agent}")
            }
            HookEvent::ToolStart { agent, tool } => write!(f, "Agent {agent} started tool {tool}"),
            HookEvent::ToolEnd { agent, tool, result } => {
                write!(f, "Agent {agent} ended tool {tool} with result {result}")
            }
        }
    }
}

/// A [`HookEvent`] stamped with the counter value it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountedEvent {
    pub count: usize,
    pub event: HookEvent,
}

#[derive(Debug, Default)]
struct Journal {
    counter: usize,
    events: Vec<CountedEvent>,
}

/// Hook bundle whose five callbacks share one event counter.
///
/// Clones share the counter, so attaching clones of one bundle to several
/// agents gives them a common count; separate `CountingHooks::new` calls give
/// independent counts.
#[derive(Debug, Clone)]
pub struct CountingHooks {
    display_name: String,
    journal: Arc<Mutex<Journal>>,
}

impl CountingHooks {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            journal: Arc::new(Mutex::new(Journal::default())),
        }
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn count(&self) -> usize {
        self.lock().counter
    }

    pub fn events(&self) -> Vec<CountedEvent> {
        self.lock().events.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Journal> {
        self.journal.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, event: HookEvent) {
        let count = {
            let mut journal = self.lock();
            journal.counter += 1;
            let count = journal.counter;
            journal.events.push(CountedEvent {
                count,
                event: event.clone(),
            });
            count
        };
        info!(hooks = %self.display_name, count, "### ({}) {count}: {event}", self.display_name);
    }
}

#[async_trait]
impl AgentHooks for CountingHooks {
    async fn on_start(&self, _ctx: &SharedContext, agent: &Agent) -> Result<()> {
        self.record(HookEvent::Start {
            agent: agent.name().to_string(),
        });
        Ok(())
    }

    async fn on_end(&self, _ctx: &SharedContext, agent: &Agent, output: &FinalOutput) -> Result<()> {
        self.record(HookEvent::End {
            agent: agent.name().to_string(),
            output: output.to_string(),
        });
        Ok(())
    }

    async fn on_handoff(&self, _ctx: &SharedContext, agent: &Agent, source: &Agent) -> Result<()> {
        self.record(HookEvent::Handoff {
            agent: agent.name().to_string(),
            source: source.name().to_string(),
        });
        Ok(())
    }

    async fn on_tool_start(&self, _ctx: &SharedContext, agent: &Agent, tool: &dyn Tool) -> Result<()> {
        self.record(HookEvent::ToolStart {
            agent: agent.name().to_string(),
            tool: tool.name().to_string(),
        });
        Ok(())
    }

    async fn on_tool_end(
        &self,
        _ctx: &SharedContext,
        agent: &Agent,
        tool: &dyn Tool,
        result: &ToolResult,
    ) -> Result<()> {
        self.record(HookEvent::ToolEnd {
            agent: agent.name().to_string(),
            tool: tool.name().to_string(),
            result: result.output.to_string(),
        });
        Ok(())
    }
}

/// One dispatch of a lifecycle event to every hook of an agent.
#[derive(Clone, Copy)]
pub(crate) enum Lifecycle<'a> {
    Start,
    End(&'a FinalOutput),
    Handoff { source: &'a Agent },
    ToolStart(&'a dyn Tool),
    ToolEnd(&'a dyn Tool, &'a ToolResult),
}

impl Lifecycle<'_> {
    fn name(&self) -> &'static str {
        match self {
            Lifecycle::Start => "on_start",
            Lifecycle::End(_) => "on_end",
            Lifecycle::Handoff { .. } => "on_handoff",
            Lifecycle::ToolStart(_) => "on_tool_start",
            Lifecycle::ToolEnd(..) => "on_tool_end",
        }
    }
}

/// Run the agent's hooks for `event` one after another, in registration order.
pub(crate) async fn dispatch(agent: &Agent, ctx: &SharedContext, event: Lifecycle<'_>) -> Result<()> {
    for hook in agent.hooks() {
        let outcome = match event {
            Lifecycle::Start => hook.on_start(ctx, agent).await,
            Lifecycle::End(output) => hook.on_end(ctx, agent, output).await,
            Lifecycle::Handoff { source } => hook.on_handoff(ctx, agent, source).await,
            Lifecycle::ToolStart(tool) => hook.on_tool_start(ctx, agent, tool).await,
            Lifecycle::ToolEnd(tool, result) => hook.on_tool_end(ctx, agent, tool, result).await,
        };
        outcome.map_err(|source| RelayError::Hook {
            event: event.name(),
            agent: agent.name().to_string(),
            source: Box::new(source),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    #[async_trait]
    impl AgentHooks for Failing {
        async fn on_start(&self, _ctx: &SharedContext, _agent: &Agent) -> Result<()> {
            Err(RelayError::Protocol("boom".into()))
        }
    }

    #[tokio::test]
    async fn counting_hooks_share_one_counter() {
        let hooks = CountingHooks::new("demo");
        let first = Agent::new("First").with_hooks(hooks.clone());
        let second = Agent::new("Second").with_hooks(hooks.clone());
        let ctx = SharedContext::new();

        dispatch(&first, &ctx, Lifecycle::Start).await.unwrap();
        dispatch(&second, &ctx, Lifecycle::Handoff { source: &first })
            .await
            .unwrap();

        let events = hooks.events();
        assert_eq!(hooks.count(), 2);
        assert_eq!(events[0].count, 1);
        assert_eq!(events[1].count, 2);
        assert_eq!(events[1].event.to_string(), "Agent First handed off to Second");
    }

    #[tokio::test]
    async fn separate_bundles_count_independently() {
        let a = CountingHooks::new("a");
        let b = CountingHooks::new("b");
        let agent = Agent::new("Both").with_hooks(a.clone()).with_hooks(b.clone());

        dispatch(&agent, &SharedContext::new(), Lifecycle::Start)
            .await
            .unwrap();

        assert_eq!(a.count(), 1);
        assert_eq!(b.count(), 1);
    }

    #[tokio::test]
    async fn hook_failure_is_wrapped_and_stops_later_hooks() {
        let after = CountingHooks::new("after");
        let agent = Agent::new("Fragile")
            .with_hooks(Failing)
            .with_hooks(after.clone());

        let err = dispatch(&agent, &SharedContext::new(), Lifecycle::Start)
            .await
            .unwrap_err();

        match err {
            RelayError::Hook { event, agent, source } => {
                assert_eq!(event, "on_start");
                assert_eq!(agent, "Fragile");
                assert!(matches!(*source, RelayError::Protocol(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(after.count(), 0);
    }
}
