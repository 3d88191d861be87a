//! Pass-scoped identity memo.
//!
//! Maps a node's identity (address plus kind) to the preorder ordinal it was
//! assigned in this pass. Entries are recorded on entry, before any child is
//! visited, so a reference back to a node still being keyed resolves to a
//! back-reference instead of recursing.

use crate::node::Node;
use std::collections::HashMap;

///
/// NodeIdentity
///
/// Address of the node's data plus its kind. The kind disambiguates a node
/// from an inline child stored at offset zero.
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) struct NodeIdentity {
    addr: usize,
    kind: &'static str,
}

impl NodeIdentity {
    pub(crate) fn of(node: &dyn Node) -> Self {
        Self {
            addr: std::ptr::from_ref(node).cast::<()>().addr(),
            kind: node.kind(),
        }
    }
}

///
/// MemoState
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum MemoState {
    InProgress(u32),
    Complete(u32),
}

impl MemoState {
    pub(crate) const fn ordinal(self) -> u32 {
        match self {
            Self::InProgress(ordinal) | Self::Complete(ordinal) => ordinal,
        }
    }
}

///
/// IdentityMemo
///

#[derive(Debug, Default)]
pub(crate) struct IdentityMemo {
    entries: HashMap<NodeIdentity, MemoState>,
    next: u32,
}

impl IdentityMemo {
    pub(crate) fn lookup(&self, identity: NodeIdentity) -> Option<MemoState> {
        self.entries.get(&identity).copied()
    }

    /// Assign the next preorder ordinal and mark the node in progress.
    pub(crate) fn enter(&mut self, identity: NodeIdentity) {
        let ordinal = self.next;
        self.next = self.next.saturating_add(1);
        self.entries
            .insert(identity, MemoState::InProgress(ordinal));
    }

    pub(crate) fn complete(&mut self, identity: NodeIdentity) {
        if let Some(state) = self.entries.get_mut(&identity) {
            *state = MemoState::Complete(state.ordinal());
        }
    }
}
