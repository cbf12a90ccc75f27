#![forbid(unsafe_code)]

//! Post-passes run once the clauses have been merged.

/// Aggregate classification and operand reordering.
pub mod reorder;

/// Conjunction membership fixup and structural invariant checks.
pub mod membership;

pub use membership::{apply_membership_fixup, check_expr, check_invariants};
pub use reorder::reorder_aggregates;
