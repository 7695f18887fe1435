use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::node::{FieldState, GateFlags, NodeId};

/// Callback fired when a node's state or gating flags change.
pub type Listener = Arc<dyn Fn(&FieldUpdate) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Snapshot delivered to listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldUpdate {
    pub node: NodeId,
    pub path: String,
    pub state: FieldState,
    pub gate: GateFlags,
}

/// Per-node listener registry.
#[derive(Default)]
pub(crate) struct Observers {
    next_id: u64,
    listeners: HashMap<NodeId, Vec<(SubscriptionId, Listener)>>,
}

impl Observers {
    pub(crate) fn subscribe(&mut self, node: NodeId, listener: Listener) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.listeners.entry(node).or_default().push((id, listener));
        id
    }

    pub(crate) fn unsubscribe(&mut self, subscription: SubscriptionId) -> bool {
        let mut removed = false;
        self.listeners.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|(id, _)| *id != subscription);
            removed |= entries.len() != before;
            !entries.is_empty()
        });
        removed
    }

    pub(crate) fn forget(&mut self, node: NodeId) {
        self.listeners.remove(&node);
    }

    pub(crate) fn has_listeners(&self, node: NodeId) -> bool {
        self.listeners.contains_key(&node)
    }

    pub(crate) fn notify(&self, update: &FieldUpdate) {
        if let Some(entries) = self.listeners.get(&update.node) {
            for (_, listener) in entries {
                listener(update);
            }
        }
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("nodes", &self.listeners.len())
            .finish()
    }
}
