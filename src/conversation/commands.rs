use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::conversation::{ConversationGraph, GraphError, NodeId};
use crate::dispatcher::SharedAction;

/// What a command trigger leads to.
#[derive(Clone)]
pub enum CommandTarget {
    /// Move the subject to this node and run its action.
    Node(NodeId),
    /// Run a standalone action; the subject's state is left alone.
    Handler(SharedAction),
}

impl fmt::Debug for CommandTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandTarget::Node(id) => f.debug_tuple("Node").field(id).finish(),
            CommandTarget::Handler(_) => f.write_str("Handler"),
        }
    }
}

/// Trigger text to target. Filled before polling starts, read-only after.
#[derive(Debug, Default, Clone)]
pub struct CommandRegistry {
    commands: HashMap<String, CommandTarget>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `trigger`. A later registration of the same trigger replaces
    /// the earlier one.
    pub fn register(&mut self, trigger: impl Into<String>, target: CommandTarget) {
        let trigger = trigger.into();
        if let Some(previous) = self.commands.insert(trigger.clone(), target) {
            debug!("Command {} re-registered, replacing {:?}", trigger, previous);
        }
    }

    /// Exact match on the full event text.
    pub fn lookup(&self, text: &str) -> Option<&CommandTarget> {
        self.commands.get(text)
    }

    pub fn triggers(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Every node target must belong to `graph`.
    pub fn check_targets(&self, graph: &ConversationGraph) -> Result<(), GraphError> {
        for target in self.commands.values() {
            if let CommandTarget::Node(id) = target {
                if graph.get(*id).is_none() {
                    return Err(GraphError::UnknownNode(*id));
                }
            }
        }
        Ok(())
    }
}
