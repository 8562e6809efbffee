use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::conversation::NodeId;
use crate::types::SubjectId;

/// Current node per subject. Entries are created on first contact and kept
/// for the lifetime of the process.
///
/// The store only guards its map; ordering of writes for one subject is the
/// dispatcher's job (one worker per subject).
#[derive(Debug, Default)]
pub struct SubjectStateStore {
    states: RwLock<HashMap<SubjectId, NodeId>>,
}

impl SubjectStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, subject: SubjectId) -> Option<NodeId> {
        let states = self.states.read().unwrap_or_else(PoisonError::into_inner);
        states.get(&subject).copied()
    }

    /// Record `node` as the subject's position, returning the previous one.
    pub fn set(&self, subject: SubjectId, node: NodeId) -> Option<NodeId> {
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        states.insert(subject, node)
    }

    /// Current node, inserting `default` for an unseen subject. The flag is
    /// true when the entry was created by this call.
    pub fn get_or_insert(&self, subject: SubjectId, default: NodeId) -> (NodeId, bool) {
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        match states.get(&subject) {
            Some(node) => (*node, false),
            None => {
                states.insert(subject, default);
                (default, true)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.states.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
