//! The checker's output: expression node → resolved type.

use rustc_hash::FxHashMap;

use tsr_parser::NodeId;

use crate::types::{Type, TypeRef};

/// Records the resolved type of every checked expression so the backends can
/// specialize on it (numeric fast paths, const-enum inlining).
#[derive(Debug, Default)]
pub struct TypeMap {
    entries: FxHashMap<NodeId, TypeRef>,
}

impl TypeMap {
    pub fn new() -> Self {
        TypeMap::default()
    }

    pub fn record(&mut self, id: NodeId, ty: TypeRef) {
        self.entries.insert(id, ty);
    }

    pub fn get(&self, id: NodeId) -> Option<&TypeRef> {
        self.entries.get(&id)
    }

    /// The resolved type, or `any` when the node was never checked (dead
    /// code, synthetic nodes).
    pub fn type_of(&self, id: NodeId) -> TypeRef {
        self.entries.get(&id).cloned().unwrap_or_else(Type::any)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
