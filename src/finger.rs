use serde::{Deserialize, Serialize};

use crate::ring::{Id, IdSpace};

/// One routing slot: `start` is the identifier the slot asks about and never
/// changes; `node` is the current best-known successor of `start`. `None` is
/// only seen during an incremental join, before the first successful lookup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FingerEntry {
    start: Id,
    node: Option<Id>,
}

impl FingerEntry {
    pub fn start(&self) -> Id {
        self.start
    }

    pub fn node(&self) -> Option<Id> {
        self.node
    }
}

/// The m+1 routing slots of one node. Slot 0 holds the predecessor (its
/// `start` is the owner's own id and is never asked about); slot i in 1..=m
/// targets `(owner + 2^(i-1)) mod N`. Slot 1 is the direct successor.
#[derive(Debug, Clone)]
pub struct FingerTable {
    owner: Id,
    entries: Vec<FingerEntry>,
}

impl FingerTable {
    /// A fresh table points every slot at the owner itself, which is exactly
    /// the correct state for a singleton ring.
    pub fn new(owner: Id, space: &IdSpace) -> FingerTable {
        let mut entries = Vec::with_capacity(space.bits() as usize + 1);
        entries.push(FingerEntry {
            start: owner,
            node: Some(owner),
        });
        for i in 1..=space.bits() {
            entries.push(FingerEntry {
                start: Self::start_index(owner, space, i as usize),
                node: Some(owner),
            });
        }
        FingerTable { owner, entries }
    }

    pub fn start_index(owner: Id, space: &IdSpace, i: usize) -> Id {
        space.add(owner, 1u64 << (i - 1))
    }

    pub fn owner(&self) -> Id {
        self.owner
    }

    /// Number of finger slots, i.e. m (slot 0 not counted).
    pub fn fingers(&self) -> usize {
        self.entries.len() - 1
    }

    pub fn entry(&self, slot: usize) -> FingerEntry {
        self.entries[slot]
    }

    pub fn set_node(&mut self, slot: usize, node: Option<Id>) {
        self.entries[slot].node = node;
    }

    pub fn predecessor(&self) -> Option<Id> {
        self.entries[0].node
    }

    pub fn set_predecessor(&mut self, node: Option<Id>) {
        self.entries[0].node = node;
    }

    pub fn successor(&self) -> Option<Id> {
        self.entries[1].node
    }

    pub fn set_successor(&mut self, node: Option<Id>) {
        self.entries[1].node = node;
    }

    /// Forget everything; the incremental join starts from a blank table.
    pub fn clear_nodes(&mut self) {
        for entry in &mut self.entries {
            entry.node = None;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &FingerEntry> {
        self.entries.iter()
    }

    /// Slot-ordered copy for the diagnostic dump.
    pub fn dump(&self) -> Vec<FingerEntry> {
        self.entries.clone()
    }
}
