//! Dense integer indexing of task ids.
//!
//! The solver works on `Vec`s indexed by node number instead of hashing
//! `TaskId` strings in its inner loops.

use rustc_hash::FxHashMap;

use crate::models::TaskId;

/// Interned node number (u32 for compact storage and fast hashing).
pub type NodeId = u32;

/// Bidirectional `TaskId` <-> `NodeId` map.
#[derive(Debug, Clone)]
pub struct TaskIdInterner {
    to_int: FxHashMap<TaskId, NodeId>,
    from_int: Vec<TaskId>,
}

impl TaskIdInterner {
    /// Create a new interner with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            to_int: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            from_int: Vec::with_capacity(capacity),
        }
    }

    /// Intern an id, returning its node number.
    /// If already interned, returns the existing number.
    pub fn intern(&mut self, id: &TaskId) -> NodeId {
        if let Some(&node) = self.to_int.get(id) {
            return node;
        }
        let node = self.from_int.len() as NodeId;
        self.from_int.push(id.clone());
        self.to_int.insert(id.clone(), node);
        node
    }

    #[inline]
    pub fn get(&self, id: &TaskId) -> Option<NodeId> {
        self.to_int.get(id).copied()
    }

    #[inline]
    pub fn resolve(&self, node: NodeId) -> Option<&TaskId> {
        self.from_int.get(node as usize)
    }

    pub fn len(&self) -> usize {
        self.from_int.len()
    }

    pub fn is_empty(&self) -> bool {
        self.from_int.is_empty()
    }
}

impl Default for TaskIdInterner {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}
