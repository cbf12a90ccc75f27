//! Conjunction membership fixup.
//!
//! A node's conjunction is reserved for paths that constrain the result,
//! which are exactly the ones the generator uses. Everything else is moved
//! to the disjunction.
//!
//! The id checks here also run before any merging starts, so a corrupted
//! arena or a clause holding a foreign id aborts the compile with
//! [`CompileError::Invariant`] instead of reaching an arena index.

use std::mem;

use tracing::debug;

use crate::error::{CompileError, Result};
use crate::ir::{ClauseKind, Expr, Fragment, PathGraph, PathSet};

fn check_fragment(graph: &PathGraph, owner: &str, fragment: &Fragment) -> Result<()> {
    let mut stack = vec![fragment];
    while let Some(fragment) = stack.pop() {
        match fragment {
            Fragment::Node(node) if !graph.has_node(*node) => {
                return Err(CompileError::invariant(format!(
                    "{owner} references unknown node {node}"
                )));
            }
            Fragment::Link(link) if !graph.has_link(*link) => {
                return Err(CompileError::invariant(format!(
                    "{owner} references unknown link {link}"
                )));
            }
            Fragment::Node(_) | Fragment::Link(_) => {}
            Fragment::Conjunction(set) | Fragment::Disjunction(set) => stack.extend(set.iter()),
        }
    }
    Ok(())
}

/// Verifies that every id mentioned by `expr` was allocated by `graph`.
pub fn check_expr(graph: &PathGraph, owner: &str, expr: &Expr) -> Result<()> {
    let mut failure = None;
    expr.walk(&mut |expr| {
        if failure.is_some() {
            return;
        }
        let outcome = match expr {
            Expr::Path(fragment) => check_fragment(graph, owner, fragment),
            Expr::AtomicRef { node, .. }
            | Expr::MetaRef { node, .. }
            | Expr::AtomicRefExpr { node, .. }
            | Expr::InlineFilter { node } => check_fragment(graph, owner, &Fragment::Node(*node)),
            Expr::LinkPropRef { link, .. }
            | Expr::LinkPropRefExpr { link, .. }
            | Expr::InlinePropFilter { link } => {
                check_fragment(graph, owner, &Fragment::Link(*link))
            }
            _ => Ok(()),
        };
        failure = outcome.err();
    });
    failure.map_or(Ok(()), Err)
}

/// Verifies that every live entity only refers to allocated ids and that
/// node/link back-references agree.
pub fn check_invariants(graph: &PathGraph) -> Result<()> {
    for node in graph.live_nodes() {
        let entry = graph.node(node);
        let owner = format!("node {node}");
        for member in entry.conjunction.iter().chain(entry.disjunction.iter()) {
            check_fragment(graph, &owner, member)?;
        }
        if let Some(filter) = &entry.filter {
            check_expr(graph, &owner, filter)?;
        }
        if let Some(origin) = entry.origin {
            if !graph.has_node(origin) {
                return Err(CompileError::invariant(format!(
                    "{owner} originates from unknown node {origin}"
                )));
            }
        }
        if let Some(rlink) = entry.rlink {
            if !graph.has_link(rlink) {
                return Err(CompileError::invariant(format!(
                    "{owner} was produced by unknown link {rlink}"
                )));
            }
            let target = graph.link(graph.resolve_link(rlink)).target;
            if target.map(|t| graph.resolve_node(t)) != Some(node) {
                return Err(CompileError::invariant(format!(
                    "{owner} is not the target of its producing link {rlink}"
                )));
            }
        }
        for join in &entry.joins {
            if !graph.has_node(*join) {
                return Err(CompileError::invariant(format!(
                    "{owner} joins unknown node {join}"
                )));
            }
        }
    }
    for link in graph.live_links() {
        let edge = graph.link(link);
        if !graph.has_node(edge.source) {
            return Err(CompileError::invariant(format!(
                "link {link} starts at unknown node {}",
                edge.source
            )));
        }
        if let Some(target) = edge.target {
            if !graph.has_node(target) {
                return Err(CompileError::invariant(format!(
                    "link {link} points at unknown node {target}"
                )));
            }
        }
        let owner = format!("link {link}");
        for expr in edge.computed.iter().chain(edge.propfilter.iter()) {
            check_expr(graph, &owner, expr)?;
        }
    }
    Ok(())
}

fn used_by_generator(graph: &PathGraph, member: &Fragment) -> bool {
    match member {
        Fragment::Node(node) => graph
            .node(graph.resolve_node(*node))
            .users
            .contains(&ClauseKind::Generator),
        Fragment::Link(link) => {
            let edge = graph.link(graph.resolve_link(*link));
            match edge.target {
                Some(target) => {
                    edge.users.contains(&ClauseKind::Generator)
                        || graph
                            .node(graph.resolve_node(target))
                            .users
                            .contains(&ClauseKind::Generator)
                }
                None => true,
            }
        }
        Fragment::Conjunction(_) | Fragment::Disjunction(_) => true,
    }
}

/// Moves conjunction members the generator does not use into the
/// disjunction of their node. Returns the number of members moved.
pub fn apply_membership_fixup(graph: &mut PathGraph) -> Result<usize> {
    check_invariants(graph)?;
    let nodes: Vec<_> = graph.live_nodes().collect();
    let mut moved = 0;
    for node in nodes {
        if graph.node(node).conjunction.is_empty() {
            continue;
        }
        let conjunction = mem::take(&mut graph.node_mut(node).conjunction);
        let mut kept = PathSet::new();
        let mut demoted = Vec::new();
        for member in conjunction.into_paths() {
            if used_by_generator(graph, &member) {
                kept.insert(member);
            } else {
                demoted.push(member);
            }
        }
        if !demoted.is_empty() {
            debug!(%node, count = demoted.len(), "moving unused conjunction members");
            moved += demoted.len();
        }
        let entry = graph.node_mut(node);
        entry.conjunction = kept;
        entry.disjunction.extend(demoted);
    }
    Ok(moved)
}
