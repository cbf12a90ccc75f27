//! Path extraction.
//!
//! Turns an expression, or an already-built fragment, into the path
//! fragment the unification driver works on. With `reverse` set every entity
//! is replaced by the root of its traversal, which is what clause-level
//! unification compares.

use crate::ir::{Expr, Fragment, Operator, PathGraph, PathSet, SetKind};

/// Resolved, flattened copy of `fragment`.
///
/// Empty sets extract to `None` and single-member sets to their member.
pub fn extract_fragment(graph: &PathGraph, fragment: &Fragment, reverse: bool) -> Option<Fragment> {
    match fragment {
        Fragment::Node(node) => {
            let node = graph.resolve_node(*node);
            Some(Fragment::Node(if reverse { graph.root_of(node) } else { node }))
        }
        Fragment::Link(link) => {
            let link = graph.resolve_link(*link);
            if reverse {
                Some(Fragment::Node(graph.root_of(graph.link(link).source)))
            } else {
                Some(Fragment::Link(link))
            }
        }
        Fragment::Conjunction(set) => {
            collect(graph, SetKind::Conjunction, set.iter(), set.fixed, reverse)
        }
        Fragment::Disjunction(set) => {
            collect(graph, SetKind::Disjunction, set.iter(), set.fixed, reverse)
        }
    }
}

fn collect<'a>(
    graph: &PathGraph,
    kind: SetKind,
    members: impl Iterator<Item = &'a Fragment>,
    fixed: bool,
    reverse: bool,
) -> Option<Fragment> {
    let mut set = PathSet::new();
    for member in members {
        if let Some(path) = extract_fragment(graph, member, reverse) {
            set.update(kind, path);
        }
    }
    set.fixed |= fixed;
    single_or_set(kind, set)
}

fn single_or_set(kind: SetKind, set: PathSet) -> Option<Fragment> {
    match set.len() {
        0 => None,
        1 if !set.fixed => set.into_paths().into_iter().next(),
        _ => Some(Fragment::set(kind, set)),
    }
}

fn from_exprs<'a>(
    graph: &PathGraph,
    kind: SetKind,
    exprs: impl IntoIterator<Item = &'a Expr>,
    reverse: bool,
) -> Option<Fragment> {
    let mut set = PathSet::new();
    for expr in exprs {
        if let Some(path) = extract_paths(graph, expr, reverse) {
            set.update(kind, path);
        }
    }
    single_or_set(kind, set)
}

/// Paths referenced by `expr`, combined the way the expression combines
/// them: `OR` operands and sequence elements as a disjunction, everything
/// else as a conjunction.
pub fn extract_paths(graph: &PathGraph, expr: &Expr, reverse: bool) -> Option<Fragment> {
    match expr {
        Expr::Constant(_) => None,
        Expr::Path(fragment) => extract_fragment(graph, fragment, reverse),
        Expr::AtomicRef { node, .. }
        | Expr::MetaRef { node, .. }
        | Expr::AtomicRefExpr { node, .. }
        | Expr::InlineFilter { node } => {
            extract_fragment(graph, &Fragment::Node(*node), reverse)
        }
        Expr::LinkPropRef { link, .. }
        | Expr::LinkPropRefExpr { link, .. }
        | Expr::InlinePropFilter { link } => {
            extract_fragment(graph, &Fragment::Link(*link), reverse)
        }
        Expr::BinOp {
            left, op, right, ..
        } => {
            let kind = if *op == Operator::Or {
                SetKind::Disjunction
            } else {
                SetKind::Conjunction
            };
            from_exprs(graph, kind, [left.as_ref(), right.as_ref()], reverse)
        }
        Expr::UnaryOp { expr, .. }
        | Expr::Exists(expr)
        | Expr::NoneTest(expr)
        | Expr::TypeCast { expr, .. } => extract_paths(graph, expr, reverse),
        Expr::FunctionCall(call) => {
            let exprs = call
                .args
                .iter()
                .chain(call.agg_sort.iter().map(|sort| &sort.expr))
                .chain(call.agg_filter.iter().map(|filter| filter.as_ref()))
                .chain(call.partition.iter());
            from_exprs(graph, SetKind::Conjunction, exprs, reverse)
        }
        Expr::Sequence { elements, .. } | Expr::Record { elements, .. } => {
            from_exprs(graph, SetKind::Disjunction, elements, reverse)
        }
    }
}
