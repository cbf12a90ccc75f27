//! Schema lookups needed while merging.
//!
//! The engine only asks one question of the schema: whether one concept is
//! a (transitive) subtype of another, so a merged node can adopt the more
//! specific type of the two sides.

use std::collections::{BTreeMap, BTreeSet};

use super::path_id::TypeName;

/// Provides subtype checks for node type narrowing.
pub trait SchemaProvider {
    /// Returns `true` when `child` equals `parent` or inherits from it.
    fn is_subtype(&self, child: &TypeName, parent: &TypeName) -> bool;
}

/// Schema with no inheritance: every type is only a subtype of itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct FlatSchema;

impl SchemaProvider for FlatSchema {
    fn is_subtype(&self, child: &TypeName, parent: &TypeName) -> bool {
        child == parent
    }
}

/// Simple in-memory inheritance table used for tests or prototyping.
#[derive(Clone, Debug, Default)]
pub struct InMemorySchema {
    parents: BTreeMap<TypeName, BTreeSet<TypeName>>,
}

impl InMemorySchema {
    /// Creates an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `name` with its direct parent types.
    pub fn with_type(mut self, name: &str, parents: &[&str]) -> Self {
        self.parents
            .entry(TypeName::from(name))
            .or_default()
            .extend(parents.iter().map(|p| TypeName::from(*p)));
        self
    }
}

impl SchemaProvider for InMemorySchema {
    fn is_subtype(&self, child: &TypeName, parent: &TypeName) -> bool {
        let mut stack = vec![child];
        let mut seen = BTreeSet::new();
        while let Some(current) = stack.pop() {
            if current == parent {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(parents) = self.parents.get(current) {
                stack.extend(parents.iter());
            }
        }
        false
    }
}
