//! Aggregate reorder.
//!
//! Marks expressions that aggregate, rejects operands that mix aggregates
//! with plain per-row values, and moves the aggregating operand of an `AND`
//! to the left so the grouping scope is taken from it.

use std::mem;

use tracing::trace;

use crate::error::{CompileError, Result};
use crate::ir::{Expr, Operator, Span};

/// Classifies `expr` and its subexpressions in place.
///
/// Constants never break an aggregate: `count(x) > 1` aggregates, while
/// `count(x) > y.z` is rejected with [`CompileError::AggregateMix`].
pub fn reorder_aggregates(expr: &mut Expr) -> Result<()> {
    if expr.is_aggregating() {
        return Ok(());
    }
    match expr {
        Expr::BinOp {
            left,
            op,
            right,
            aggregates,
            span,
        } => {
            reorder_aggregates(left)?;
            reorder_aggregates(right)?;
            let (la, ra) = (left.is_aggregating(), right.is_aggregating());
            let (lc, rc) = (left.is_constant(), right.is_constant());
            if (la && (ra || rc)) || (lc && ra) {
                *aggregates = true;
                if *op == Operator::And && !la && ra {
                    trace!(op = %op, "moving aggregate operand to the left");
                    mem::swap(left, right);
                }
            } else if la || ra {
                return Err(CompileError::AggregateMix { span: *span });
            }
        }
        Expr::FunctionCall(call) => {
            call.aggregates = classify_elements(&mut call.args, call.span)?;
        }
        Expr::Sequence {
            elements,
            aggregates,
            ..
        }
        | Expr::Record {
            elements,
            aggregates,
            ..
        } => {
            *aggregates = classify_elements(elements, None)?;
        }
        Expr::UnaryOp { expr, .. }
        | Expr::Exists(expr)
        | Expr::NoneTest(expr)
        | Expr::TypeCast { expr, .. } => reorder_aggregates(expr)?,
        Expr::Constant(_)
        | Expr::Path(_)
        | Expr::AtomicRef { .. }
        | Expr::MetaRef { .. }
        | Expr::LinkPropRef { .. }
        | Expr::AtomicRefExpr { .. }
        | Expr::LinkPropRefExpr { .. }
        | Expr::InlineFilter { .. }
        | Expr::InlinePropFilter { .. } => {}
    }
    Ok(())
}

/// Returns whether any element aggregates, failing when aggregating and
/// non-constant plain elements are mixed.
fn classify_elements(elements: &mut [Expr], span: Option<Span>) -> Result<bool> {
    let mut aggregating = false;
    let mut plain = false;
    for element in elements.iter_mut() {
        reorder_aggregates(element)?;
        if element.is_aggregating() {
            aggregating = true;
        } else if !element.is_constant() {
            plain = true;
        }
        if aggregating && plain {
            return Err(CompileError::AggregateMix { span });
        }
    }
    Ok(aggregating)
}
