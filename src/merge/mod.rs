#![forbid(unsafe_code)]

//! Path unification engine.
//!
//! [`PathMerger`] carries the per-compilation context (graph, schema,
//! configuration, current clause and recursion depth) through the prefix
//! matcher, the set merger, the unification driver and the expression walk.
//! Each of those lives in its own module as an `impl PathMerger` block.

/// Two-level boolean minimization over bit cubes.
pub mod boolean;

/// Path extraction from expressions and fragments.
pub mod extract;

/// Structural prefix matching between fragments.
mod matcher;

/// Absorption of one matched fragment into another.
mod merger;

/// Path-merge pass over expressions and generator promotion.
mod pass;

/// Unification driver and disjunction minimization.
mod unify;

pub use extract::{extract_fragment, extract_paths};
pub use unify::{flatten, minimize_disjunction};

use crate::config::MergeConfig;
use crate::error::{CompileError, Result};
use crate::ir::{ClauseKind, Operator, PathGraph, SchemaProvider};

/// How filters of matched nodes are combined during a union merge.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FilterMerge {
    /// Filtered or conjoined nodes do not match.
    Disabled,
    /// Filters are ignored for matching and AND-combined.
    Conjunctive,
    /// Filters are ignored for matching and OR-combined; the survivor's
    /// disjunction becomes fixed.
    Disjunctive,
}

impl FilterMerge {
    /// Returns `true` when filters do not prevent a match.
    pub fn enabled(self) -> bool {
        !matches!(self, FilterMerge::Disabled)
    }

    /// Operator used to combine two filters.
    pub fn combinator(self) -> Operator {
        match self {
            FilterMerge::Disjunctive => Operator::Or,
            FilterMerge::Disabled | FilterMerge::Conjunctive => Operator::And,
        }
    }
}

/// Per-compilation merge context.
pub struct PathMerger<'a> {
    graph: &'a mut PathGraph,
    schema: &'a dyn SchemaProvider,
    config: &'a MergeConfig,
    location: ClauseKind,
    depth: usize,
}

impl<'a> PathMerger<'a> {
    /// Creates a merger positioned at `location`.
    pub fn new(
        graph: &'a mut PathGraph,
        schema: &'a dyn SchemaProvider,
        config: &'a MergeConfig,
        location: ClauseKind,
    ) -> Self {
        Self {
            graph,
            schema,
            config,
            location,
            depth: 0,
        }
    }

    /// Clause currently being merged.
    pub fn location(&self) -> ClauseKind {
        self.location
    }

    /// Moves the merger to another clause.
    pub fn set_location(&mut self, location: ClauseKind) {
        self.location = location;
    }

    /// Read access to the graph being merged.
    pub fn graph(&self) -> &PathGraph {
        self.graph
    }

    /// Weak operators never limit cardinality; outside the generator every
    /// operator is weak.
    pub fn is_weak_op(&self, op: Operator) -> bool {
        op.is_weak() || self.location != ClauseKind::Generator
    }

    /// Runs `f` one recursion level deeper, failing past the configured bound.
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.depth += 1;
        if self.depth > self.config.max_depth {
            let depth = self.depth;
            self.depth -= 1;
            return Err(CompileError::NestingTooDeep {
                depth,
                max: self.config.max_depth,
            });
        }
        let out = f(self);
        self.depth -= 1;
        out
    }
}
