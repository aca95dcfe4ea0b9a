use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::agent::{Agent, Handoff};
use crate::error::{RelayError, Result};

/// Every agent a run can reach from its entry agent, indexed by name.
#[derive(Debug, Clone)]
pub struct AgentGraph {
    agents: HashMap<String, Arc<Agent>>,
    order: Vec<String>,
}

impl AgentGraph {
    /// Walk handoffs breadth-first from `entry`. `registered` agents are part of
    /// the graph too and serve as targets for [`Handoff::Named`] links.
    ///
    /// Fails with [`RelayError::DuplicateAgentName`] when two distinct agents
    /// share a name and with [`RelayError::InvalidHandoff`] when a named link
    /// points at no known agent.
    pub fn build(entry: &Arc<Agent>, registered: &[Arc<Agent>]) -> Result<Self> {
        let mut graph = Self {
            agents: HashMap::new(),
            order: Vec::new(),
        };

        let mut queue: VecDeque<Arc<Agent>> = VecDeque::new();
        queue.push_back(Arc::clone(entry));
        queue.extend(registered.iter().cloned());

        while let Some(agent) = queue.pop_front() {
            if !graph.insert(&agent)? {
                continue;
            }
            for handoff in agent.handoffs() {
                if let Handoff::Agent(target) = handoff {
                    queue.push_back(Arc::clone(target));
                }
            }
        }

        for name in &graph.order {
            let agent = &graph.agents[name];
            for handoff in agent.handoffs() {
                if let Handoff::Named(target) = handoff {
                    if !graph.agents.contains_key(target) {
                        return Err(RelayError::InvalidHandoff {
                            from: agent.name().to_string(),
                            to: target.clone(),
                        });
                    }
                }
            }
        }

        Ok(graph)
    }

    /// Returns `false` when this exact agent was already visited.
    fn insert(&mut self, agent: &Arc<Agent>) -> Result<bool> {
        if agent.name().trim().is_empty() {
            return Err(RelayError::Config("agent name must not be empty".into()));
        }
        match self.agents.get(agent.name()) {
            Some(existing) if Arc::ptr_eq(existing, agent) => Ok(false),
            Some(_) => Err(RelayError::DuplicateAgentName(agent.name().to_string())),
            None => {
                self.agents
                    .insert(agent.name().to_string(), Arc::clone(agent));
                self.order.push(agent.name().to_string());
                Ok(true)
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Agent>> {
        self.agents.get(name)
    }

    /// Agent names in discovery order, entry agent first.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// The agent `from` may transfer control to under the name `to`.
    pub fn handoff_target(&self, from: &Agent, to: &str) -> Result<Arc<Agent>> {
        let invalid = || RelayError::InvalidHandoff {
            from: from.name().to_string(),
            to: to.to_string(),
        };
        if !from.can_hand_off_to(to) {
            return Err(invalid());
        }
        self.agents.get(to).cloned().ok_or_else(invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_reachable_agents_in_discovery_order() {
        let leaf = Arc::new(Agent::new("Leaf"));
        let left = Arc::new(Agent::new("Left").with_handoff(leaf.clone()));
        let right = Arc::new(Agent::new("Right").with_handoff(leaf));
        let entry = Arc::new(Agent::new("Entry").with_handoff(left).with_handoff(right));

        let graph = AgentGraph::build(&entry, &[]).unwrap();
        assert_eq!(graph.names(), &["Entry", "Left", "Right", "Leaf"]);
    }

    #[test]
    fn distinct_agents_with_same_name_are_rejected() {
        let a = Arc::new(Agent::new("Twin"));
        let b = Arc::new(Agent::new("Twin"));
        let entry = Arc::new(Agent::new("Entry").with_handoff(a).with_handoff(b));

        let err = AgentGraph::build(&entry, &[]).unwrap_err();
        assert!(matches!(err, RelayError::DuplicateAgentName(name) if name == "Twin"));
    }

    #[test]
    fn named_links_allow_cycles() {
        let back = Arc::new(Agent::new("Back").with_handoff_to("Front"));
        let front = Arc::new(Agent::new("Front").with_handoff(back.clone()));

        let graph = AgentGraph::build(&front, &[]).unwrap();
        assert_eq!(graph.len(), 2);
        let target = graph.handoff_target(&back, "Front").unwrap();
        assert!(Arc::ptr_eq(&target, &front));
    }

    #[test]
    fn named_links_resolve_against_registered_agents() {
        let helper = Arc::new(Agent::new("Helper"));
        let entry = Arc::new(Agent::new("Entry").with_handoff_to("Helper"));

        assert!(matches!(
            AgentGraph::build(&entry, &[]),
            Err(RelayError::InvalidHandoff { from, to }) if from == "Entry" && to == "Helper"
        ));
        let graph = AgentGraph::build(&entry, &[helper]).unwrap();
        assert!(graph.get("Helper").is_some());
    }

    #[test]
    fn empty_names_are_rejected() {
        let entry = Arc::new(Agent::new("  "));
        assert!(matches!(
            AgentGraph::build(&entry, &[]),
            Err(RelayError::Config(_))
        ));
    }

    #[test]
    fn handoff_target_requires_declared_link() {
        let other = Arc::new(Agent::new("Other"));
        let entry = Arc::new(Agent::new("Entry"));
        let graph = AgentGraph::build(&entry, &[other]).unwrap();

        assert!(matches!(
            graph.handoff_target(&entry, "Other"),
            Err(RelayError::InvalidHandoff { .. })
        ));
    }
}
