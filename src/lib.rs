//! Path unification for query graphs.
//!
//! A compiled query refers to entities through traversal paths. Front ends
//! translate every path expression on its own, so the same traversal shows
//! up many times in the intermediate graph. This crate folds structurally
//! identical prefixes into single nodes, combines their filters according to
//! the surrounding set operation, and minimizes the resulting disjunctions
//! before the graph is lowered to joins.
//!
//! ```ignore
//! let mut query = Query::new(graph).with_generator(filter);
//! let output = Compiler::new(&schema).compile(&mut query)?;
//! println!("{}", output.explain);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Error types and the crate-wide `Result` alias.
pub mod error;

/// Pass configuration.
pub mod config;

/// Intermediate representation.
pub mod ir;

/// Prefix matching, set merging, unification and minimization.
pub mod merge;

/// Aggregate reordering and membership fixup.
pub mod fixup;

/// Compilation entry point.
pub mod compiler;

/// Graph dumps.
pub mod explain;

pub use compiler::{Compiler, MergeOutput, MergeStats};
pub use config::{ConfigError, MergeConfig};
pub use error::{CompileError, CompileErrorWithCode, Result};
pub use explain::{ExplainNode, ExplainProp, GraphExplain};
pub use ir::{Expr, Fragment, IrBuilder, LinkId, NodeId, PathGraph, PathSet, Query};
pub use merge::{FilterMerge, PathMerger};
