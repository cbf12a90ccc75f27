#![forbid(unsafe_code)]

//! Intermediate representation consumed and produced by the merge pass.
//!
//! A query is an arena of entity nodes and link edges plus clause
//! expressions that point into it by id.

/// Canonical traversal identities.
///
/// Step sequences from a query root, compared under the trailing-wildcard rule.
pub mod path_id;

/// Expression tree, operators, literals and clause kinds.
pub mod expr;

/// Arena of nodes and links, path fragments and redirects.
pub mod graph;

/// Schema collaborator used for type narrowing.
pub mod schema;

/// Programmatic IR construction.
pub mod builder;

pub use builder::IrBuilder;
pub use expr::{
    ClauseKind, Expr, FunctionCall, Literal, Operator, SortDirection, SortExpr, Span,
};
pub use graph::{
    EntityNode, Fragment, LinkEdge, LinkId, NodeId, PathGraph, PathSet, RedirectMap, Redirects,
    SetKind,
};
pub use path_id::{Direction, LinkName, PathId, PathStep, TypeName};
pub use schema::{FlatSchema, InMemorySchema, SchemaProvider};

/// Result target with an optional output alias.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectorExpr {
    /// Target expression.
    pub expr: Expr,
    /// Output name.
    pub alias: Option<String>,
}

impl SelectorExpr {
    /// Unaliased target.
    pub fn new(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    /// Target bound to `alias`.
    pub fn aliased(expr: Expr, alias: &str) -> Self {
        Self {
            expr,
            alias: Some(alias.to_owned()),
        }
    }
}

/// Clause container the pass runs over.
#[derive(Clone, Debug, Default)]
pub struct Query {
    /// Arena owning every node and link the clauses reference.
    pub graph: PathGraph,
    /// Top-level filter.
    pub generator: Option<Expr>,
    /// Result targets.
    pub selector: Vec<SelectorExpr>,
    /// Ordering keys.
    pub sorter: Vec<SortExpr>,
    /// Grouping keys.
    pub grouper: Vec<Expr>,
}

impl Query {
    /// Query with no clauses over `graph`.
    pub fn new(graph: PathGraph) -> Self {
        Self {
            graph,
            ..Self::default()
        }
    }

    /// Sets the generator clause.
    pub fn with_generator(mut self, expr: Expr) -> Self {
        self.generator = Some(expr);
        self
    }

    /// Appends a selector target.
    pub fn select(mut self, expr: Expr) -> Self {
        self.selector.push(SelectorExpr::new(expr));
        self
    }

    /// Appends an ascending sort key.
    pub fn order_by(mut self, expr: Expr) -> Self {
        self.sorter.push(SortExpr::asc(expr));
        self
    }

    /// Appends a grouping key.
    pub fn group_by(mut self, expr: Expr) -> Self {
        self.grouper.push(expr);
        self
    }
}
