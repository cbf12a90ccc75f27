//! Canonical traversal identities.
//!
//! A [`PathId`] names the chain of relationship steps that reaches a set of
//! entities from a query root. Structural equality of two path fragments is
//! decided on these identities.

use std::fmt;

use serde::Serialize;
use smallvec::SmallVec;

/// Name of a schema type (concept).
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
pub struct TypeName(pub String);

impl From<&str> for TypeName {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of a relationship (link) declared in the schema.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
pub struct LinkName(pub String);

impl From<&str> for LinkName {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for LinkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Direction selector for link traversals.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
pub enum Direction {
    /// From the link source to its target.
    #[default]
    Outbound,
    /// From the link target back to its source.
    Inbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Outbound => f.write_str(">"),
            Direction::Inbound => f.write_str("<"),
        }
    }
}

/// Single traversal step inside a [`PathId`].
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize)]
pub struct PathStep {
    /// Relationship followed by this step.
    pub link: LinkName,
    /// Traversal direction.
    pub direction: Direction,
    /// Target type, or `None` for a wildcard step.
    pub target: Option<TypeName>,
}

impl PathStep {
    fn same_edge(&self, other: &PathStep) -> bool {
        self.link == other.link && self.direction == other.direction
    }
}

/// Ordered step sequence identifying a traversal from a query root.
///
/// The derived `Eq` is exact structural equality. Prefix matching uses
/// [`PathId::matches`], which additionally lets a trailing wildcard step
/// stand in for any concrete final target.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize)]
pub struct PathId {
    root: TypeName,
    steps: SmallVec<[PathStep; 4]>,
}

impl PathId {
    /// Creates the identity of a query root.
    pub fn root(root: impl Into<TypeName>) -> Self {
        Self {
            root: root.into(),
            steps: SmallVec::new(),
        }
    }

    /// Returns a copy of this identity extended by one step.
    pub fn extend(
        &self,
        link: impl Into<LinkName>,
        direction: Direction,
        target: Option<TypeName>,
    ) -> Self {
        let mut next = self.clone();
        next.steps.push(PathStep {
            link: link.into(),
            direction,
            target,
        });
        next
    }

    /// Root type of the traversal.
    pub fn root_type(&self) -> &TypeName {
        &self.root
    }

    /// Steps after the root.
    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    /// Number of steps after the root.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` for a bare root identity.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns `true` when the final step targets no concrete type.
    pub fn is_wildcard(&self) -> bool {
        self.steps.last().is_some_and(|step| step.target.is_none())
    }

    /// Equality under the trailing-wildcard rule.
    pub fn matches(&self, other: &PathId) -> bool {
        if self.root != other.root || self.steps.len() != other.steps.len() {
            return false;
        }
        let Some((ours_last, ours)) = self.steps.split_last() else {
            return true;
        };
        let Some((theirs_last, theirs)) = other.steps.split_last() else {
            return false;
        };
        if ours != theirs || !ours_last.same_edge(theirs_last) {
            return false;
        }
        match (&ours_last.target, &theirs_last.target) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)?;
        for step in &self.steps {
            write!(f, ".{}{}", step.direction, step.link)?;
            match &step.target {
                Some(target) => write!(f, "[{target}]")?,
                None => f.write_str("[*]")?,
            }
        }
        Ok(())
    }
}
