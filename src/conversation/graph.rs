use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::dispatcher::{Action, SharedAction};

/// Handle to a node. Only meaningful for the builder (and graph) that
/// issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),
    #[error("node '{child}' is already attached under '{parent}'")]
    AlreadyAttached { child: String, parent: String },
    #[error("attaching '{child}' under '{parent}' would create a cycle")]
    WouldCycle { child: String, parent: String },
    #[error("node name '{0}' is used more than once")]
    DuplicateName(String),
    #[error("node '{0}' is not reachable from the start node")]
    Unreachable(String),
}

/// A conversation state: what to run when a subject sits here, and where
/// it may go next.
pub struct StateNode {
    name: String,
    condition: Option<String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    action: SharedAction,
}

impl StateNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Text an event must carry to select this node among its siblings.
    pub fn condition(&self) -> Option<&str> {
        self.condition.as_deref()
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_terminal(&self) -> bool {
        self.children.is_empty()
    }

    pub(crate) fn action(&self) -> SharedAction {
        Arc::clone(&self.action)
    }
}

impl fmt::Debug for StateNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateNode")
            .field("name", &self.name)
            .field("condition", &self.condition)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}

/// Collects nodes and edges before polling starts. Consumed by
/// [`GraphBuilder::build`], after which the structure cannot change.
#[derive(Default)]
pub struct GraphBuilder {
    nodes: Vec<StateNode>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node<A: Action>(
        &mut self,
        name: impl Into<String>,
        condition: Option<&str>,
        action: A,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(StateNode {
            name: name.into(),
            condition: condition.map(str::to_string),
            parent: None,
            children: Vec::new(),
            action: Arc::new(action),
        });
        id
    }

    /// Append `child` to `parent`'s children. Children are matched in the
    /// order they were added.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), GraphError> {
        self.check(parent)?;
        self.check(child)?;

        if let Some(existing) = self.nodes[child.0].parent {
            return Err(GraphError::AlreadyAttached {
                child: self.nodes[child.0].name.clone(),
                parent: self.nodes[existing.0].name.clone(),
            });
        }

        // Walk up from the new parent; meeting the child means a loop.
        let mut cursor = Some(parent);
        while let Some(id) = cursor {
            if id == child {
                return Err(GraphError::WouldCycle {
                    child: self.nodes[child.0].name.clone(),
                    parent: self.nodes[parent.0].name.clone(),
                });
            }
            cursor = self.nodes[id.0].parent;
        }

        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn check(&self, id: NodeId) -> Result<(), GraphError> {
        if id.0 < self.nodes.len() {
            Ok(())
        } else {
            Err(GraphError::UnknownNode(id))
        }
    }

    /// Freeze the tree. `reset` is where subjects without a recorded state
    /// start out.
    pub fn build(self, start: NodeId, reset: NodeId) -> Result<ConversationGraph, GraphError> {
        self.check(start)?;
        self.check(reset)?;

        let mut names = HashSet::new();
        for node in &self.nodes {
            if !names.insert(node.name.as_str()) {
                return Err(GraphError::DuplicateName(node.name.clone()));
            }
        }

        let mut reachable = vec![false; self.nodes.len()];
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            reachable[id.0] = true;
            stack.extend_from_slice(&self.nodes[id.0].children);
        }
        if let Some(index) = reachable.iter().position(|seen| !seen) {
            return Err(GraphError::Unreachable(self.nodes[index].name.clone()));
        }

        debug!(
            "Conversation graph built: {} node(s), start '{}', reset '{}'",
            self.nodes.len(),
            self.nodes[start.0].name,
            self.nodes[reset.0].name
        );

        Ok(ConversationGraph {
            nodes: self.nodes,
            start,
            reset,
        })
    }
}

/// Immutable tree of conversation states.
#[derive(Debug)]
pub struct ConversationGraph {
    nodes: Vec<StateNode>,
    start: NodeId,
    reset: NodeId,
}

impl ConversationGraph {
    pub fn start(&self) -> NodeId {
        self.start
    }

    pub fn reset(&self) -> NodeId {
        self.reset
    }

    /// Panics on an id issued by a different builder.
    pub fn node(&self, id: NodeId) -> &StateNode {
        &self.nodes[id.0]
    }

    pub fn get(&self, id: NodeId) -> Option<&StateNode> {
        self.nodes.get(id.0)
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|node| node.name == name)
            .map(NodeId)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Where a subject at `current` moves on an event carrying `text`.
    ///
    /// No children: stay. One child: always advance to it. Several: the
    /// first child whose condition equals `text`, otherwise stay.
    pub fn transition(&self, current: NodeId, text: Option<&str>) -> Option<NodeId> {
        match self.node(current).children.as_slice() {
            [] => None,
            [only] => Some(*only),
            children => {
                let text = text?;
                children
                    .iter()
                    .copied()
                    .find(|child| self.node(*child).condition() == Some(text))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::noop;

    fn chain() -> (ConversationGraph, NodeId, NodeId, NodeId) {
        let mut builder = GraphBuilder::new();
        let a = builder.add_node("a", None, noop);
        let b = builder.add_node("b", None, noop);
        let c = builder.add_node("c", None, noop);
        builder.add_child(a, b).unwrap();
        builder.add_child(b, c).unwrap();
        (builder.build(a, a).unwrap(), a, b, c)
    }

    #[test]
    fn test_linear_chain_advances_unconditionally() {
        let (graph, a, b, c) = chain();
        assert_eq!(graph.transition(a, None), Some(b));
        assert_eq!(graph.transition(b, Some("anything")), Some(c));
        assert_eq!(graph.transition(c, Some("anything")), None);
        assert!(graph.node(c).is_terminal());
    }

    #[test]
    fn test_branching_matches_first_condition() {
        let mut builder = GraphBuilder::new();
        let menu = builder.add_node("menu", None, noop);
        let x = builder.add_node("x", Some("1"), noop);
        let y = builder.add_node("y", Some("2"), noop);
        let x_again = builder.add_node("x-again", Some("1"), noop);
        builder.add_child(menu, x).unwrap();
        builder.add_child(menu, y).unwrap();
        builder.add_child(menu, x_again).unwrap();
        let graph = builder.build(menu, menu).unwrap();

        assert_eq!(graph.transition(menu, Some("1")), Some(x));
        assert_eq!(graph.transition(menu, Some("2")), Some(y));
        assert_eq!(graph.transition(menu, Some("3")), None);
        assert_eq!(graph.transition(menu, None), None);
    }

    #[test]
    fn test_child_cannot_have_two_parents() {
        let mut builder = GraphBuilder::new();
        let a = builder.add_node("a", None, noop);
        let b = builder.add_node("b", None, noop);
        let c = builder.add_node("c", None, noop);
        builder.add_child(a, c).unwrap();
        let err = builder.add_child(b, c).unwrap_err();
        assert_eq!(
            err,
            GraphError::AlreadyAttached {
                child: "c".to_string(),
                parent: "a".to_string()
            }
        );
    }

    #[test]
    fn test_cycles_rejected() {
        let mut builder = GraphBuilder::new();
        let a = builder.add_node("a", None, noop);
        let b = builder.add_node("b", None, noop);
        builder.add_child(a, b).unwrap();
        assert!(matches!(
            builder.add_child(b, a),
            Err(GraphError::WouldCycle { .. })
        ));
        assert!(matches!(
            builder.add_child(a, a),
            Err(GraphError::WouldCycle { .. })
        ));
    }

    #[test]
    fn test_unreachable_node_fails_build() {
        let mut builder = GraphBuilder::new();
        let a = builder.add_node("a", None, noop);
        builder.add_node("orphan", None, noop);
        assert_eq!(
            builder.build(a, a).unwrap_err(),
            GraphError::Unreachable("orphan".to_string())
        );
    }

    #[test]
    fn test_duplicate_names_fail_build() {
        let mut builder = GraphBuilder::new();
        let a = builder.add_node("a", None, noop);
        let b = builder.add_node("a", None, noop);
        builder.add_child(a, b).unwrap();
        assert_eq!(
            builder.build(a, a).unwrap_err(),
            GraphError::DuplicateName("a".to_string())
        );
    }

    #[test]
    fn test_unknown_ids_rejected() {
        let mut other = GraphBuilder::new();
        other.add_node("x", None, noop);
        let foreign = other.add_node("y", None, noop);

        let mut builder = GraphBuilder::new();
        let a = builder.add_node("a", None, noop);
        assert_eq!(
            builder.add_child(a, foreign),
            Err(GraphError::UnknownNode(foreign))
        );
        assert_eq!(
            builder.build(a, foreign).unwrap_err(),
            GraphError::UnknownNode(foreign)
        );
    }

    #[test]
    fn test_find_by_name() {
        let (graph, _, b, _) = chain();
        assert_eq!(graph.find("b"), Some(b));
        assert_eq!(graph.find("missing"), None);
        assert_eq!(graph.len(), 3);
    }
}
