pub mod commands;
pub mod graph;
pub mod store;

use serde::Deserialize;

pub use commands::{CommandRegistry, CommandTarget};
pub use graph::{ConversationGraph, GraphBuilder, GraphError, NodeId, StateNode};
pub use store::SubjectStateStore;

/// What `next_state` does on the event that first introduces a subject,
/// i.e. while the subject sits on the reset node without having been
/// placed there by a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FirstContact {
    /// Transition out of the reset node like from any other node.
    #[default]
    Advance,
    /// Only record the reset node; the first `next_state` is a no-op.
    Hold,
}
