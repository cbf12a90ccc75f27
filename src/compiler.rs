//! Compilation entry point.
//!
//! [`Compiler::compile`] runs the path-merge pass over every clause of a
//! [`Query`], unifies the clauses with each other, applies the aggregate and
//! membership fixups, and finally rewrites every stored id to its survivor.

use serde::Serialize;
use tracing::debug;

use crate::config::MergeConfig;
use crate::error::Result;
use crate::explain::GraphExplain;
use crate::fixup::{apply_membership_fixup, check_expr, check_invariants, reorder_aggregates};
use crate::ir::{
    ClauseKind, Expr, Fragment, PathGraph, Query, Redirects, SchemaProvider, SelectorExpr,
    SetKind, SortExpr,
};
use crate::merge::{extract_paths, FilterMerge, PathMerger};

/// Live entity counts around a compilation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    /// Live nodes before the pass.
    pub nodes_before: usize,
    /// Live nodes after the pass.
    pub nodes_after: usize,
    /// Live links before the pass.
    pub links_before: usize,
    /// Live links after the pass.
    pub links_after: usize,
}

impl MergeStats {
    /// Number of nodes absorbed by the pass.
    pub fn nodes_merged(&self) -> usize {
        self.nodes_before.saturating_sub(self.nodes_after)
    }

    /// Number of links absorbed by the pass.
    pub fn links_merged(&self) -> usize {
        self.links_before.saturating_sub(self.links_after)
    }
}

/// Result of a successful compilation.
#[derive(Clone, Debug)]
pub struct MergeOutput {
    /// Absorbed id to surviving id, for callers holding pre-merge ids.
    pub redirects: Redirects,
    /// Entity counts before and after.
    pub stats: MergeStats,
    /// Canonical graph dump.
    pub explain: GraphExplain,
}

/// Runs the path-merge pass over queries.
pub struct Compiler<'s> {
    schema: &'s dyn SchemaProvider,
    config: MergeConfig,
}

impl<'s> Compiler<'s> {
    /// Compiler with the default configuration.
    pub fn new(schema: &'s dyn SchemaProvider) -> Self {
        Self::with_config(schema, MergeConfig::default())
    }

    /// Compiler with an explicit configuration.
    pub fn with_config(schema: &'s dyn SchemaProvider, config: MergeConfig) -> Self {
        Self { schema, config }
    }

    /// Active configuration.
    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Canonicalizes `query` in place.
    ///
    /// A query holding dangling ids is rejected untouched. On any later error
    /// the query is left half-merged with its clauses removed and must be
    /// discarded.
    pub fn compile(&self, query: &mut Query) -> Result<MergeOutput> {
        check_query(query)?;
        let nodes_before = query.graph.node_count();
        let links_before = query.graph.link_count();

        let generator = query.generator.take();
        let selector = std::mem::take(&mut query.selector);
        let sorter = std::mem::take(&mut query.sorter);
        let grouper = std::mem::take(&mut query.grouper);

        let mut clauses = self.merge_clauses(
            &mut query.graph,
            Clauses {
                generator,
                selector,
                sorter,
                grouper,
            },
        )?;

        if let Some(expr) = clauses.generator.as_mut() {
            reorder_aggregates(expr)?;
        }
        let demoted = apply_membership_fixup(&mut query.graph)?;
        debug!(demoted, "membership fixup");

        query.graph.finalize();
        clauses.remap(&query.graph);
        let redirects = query.graph.redirects().flattened();

        query.generator = clauses.generator;
        query.selector = clauses.selector;
        query.sorter = clauses.sorter;
        query.grouper = clauses.grouper;

        let stats = MergeStats {
            nodes_before,
            nodes_after: query.graph.node_count(),
            links_before,
            links_after: query.graph.link_count(),
        };
        let explain = GraphExplain::build(&query.graph);
        debug!(
            nodes_before,
            nodes_after = stats.nodes_after,
            links_before,
            links_after = stats.links_after,
            "path merge complete"
        );
        if self.config.dump_graph {
            debug!(graph_hash = explain.graph_hash, "merged graph\n{explain}");
        }
        Ok(MergeOutput {
            redirects,
            stats,
            explain,
        })
    }

    fn merge_clauses(&self, graph: &mut PathGraph, clauses: Clauses) -> Result<Clauses> {
        let mut merger = PathMerger::new(graph, self.schema, &self.config, ClauseKind::Generator);

        let generator = match clauses.generator {
            Some(expr) => {
                let expr = merger.merge_expr(expr)?;
                merger.promote_generator_paths(&expr);
                Some(expr)
            }
            None => None,
        };
        debug!(
            stage = %ClauseKind::Generator,
            nodes = merger.graph().node_count(),
            "clause merged"
        );

        merger.set_location(ClauseKind::Selector);
        let selector = clauses
            .selector
            .into_iter()
            .map(|target| {
                Ok(SelectorExpr {
                    expr: merger.merge_expr(target.expr)?,
                    alias: target.alias,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        merger.set_location(ClauseKind::Sorter);
        let sorter = clauses
            .sorter
            .into_iter()
            .map(|sort| {
                Ok(SortExpr {
                    expr: merger.merge_expr(sort.expr)?,
                    ..sort
                })
            })
            .collect::<Result<Vec<_>>>()?;

        merger.set_location(ClauseKind::Grouper);
        let grouper = clauses
            .grouper
            .into_iter()
            .map(|expr| merger.merge_expr(expr))
            .collect::<Result<Vec<_>>>()?;
        debug!(
            selector = selector.len(),
            sorter = sorter.len(),
            grouper = grouper.len(),
            nodes = merger.graph().node_count(),
            "clauses merged"
        );

        if generator.is_none() {
            if let [target] = selector.as_slice() {
                if let Expr::Path(path @ (Fragment::Node(_) | Fragment::Link(_))) = &target.expr {
                    promote_node_selector(&mut merger, path);
                }
            }
        }

        merger.set_location(ClauseKind::Top);
        let clause_exprs: Vec<&Expr> = selector
            .iter()
            .map(|target| &target.expr)
            .chain(sorter.iter().map(|sort| &sort.expr))
            .chain(grouper.iter())
            .collect();
        let union = merger.unify_exprs(&clause_exprs, SetKind::Disjunction, FilterMerge::Conjunctive)?;
        if let Some(expr) = &generator {
            let mut members: Vec<Fragment> = extract_paths(merger.graph(), expr, true)
                .into_iter()
                .collect();
            members.extend(union);
            merger.unify_fragments(members, SetKind::Disjunction, true, FilterMerge::Conjunctive)?;
        }
        debug!(
            stage = %ClauseKind::Top,
            nodes = merger.graph().node_count(),
            links = merger.graph().link_count(),
            "clauses unified"
        );

        Ok(Clauses {
            generator,
            selector,
            sorter,
            grouper,
        })
    }
}

struct Clauses {
    generator: Option<Expr>,
    selector: Vec<SelectorExpr>,
    sorter: Vec<SortExpr>,
    grouper: Vec<Expr>,
}

impl Clauses {
    fn remap(&mut self, graph: &PathGraph) {
        let redirects = graph.redirects();
        if let Some(expr) = self.generator.as_mut() {
            expr.remap(redirects);
        }
        for target in &mut self.selector {
            target.expr.remap(redirects);
        }
        for sort in &mut self.sorter {
            sort.expr.remap(redirects);
        }
        for expr in &mut self.grouper {
            expr.remap(redirects);
        }
    }
}

/// Rejects graphs and clauses that mention ids the arena never allocated.
/// Runs before any merging so a bad id cannot reach an arena lookup.
fn check_query(query: &Query) -> Result<()> {
    check_invariants(&query.graph)?;
    if let Some(expr) = &query.generator {
        check_expr(&query.graph, "generator", expr)?;
    }
    for target in &query.selector {
        check_expr(&query.graph, "selector", &target.expr)?;
    }
    for sort in &query.sorter {
        check_expr(&query.graph, "sorter", &sort.expr)?;
    }
    for expr in &query.grouper {
        check_expr(&query.graph, "grouper", expr)?;
    }
    Ok(())
}

/// Treats a lone bare-path selector as the generator: every entity on the
/// way back to its root becomes a generator user and lone optional paths
/// below that root become required.
fn promote_node_selector(merger: &mut PathMerger<'_>, path: &Fragment) {
    if let Some(root) = merger.tag_generator_chain(path) {
        merger.promote_from(vec![Fragment::Node(root)]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FlatSchema, IrBuilder, Operator};

    #[test]
    fn stats_count_absorbed_entities() {
        let mut builder = IrBuilder::new();
        let a = builder.path("User", &[("friends", "User")]);
        let b = builder.path("User", &[("friends", "User")]);
        let mut query = Query::new(builder.finish()).with_generator(Expr::or(
            Expr::filter(a, "name", Operator::Eq, "Bob"),
            Expr::filter(b, "name", Operator::Eq, "Ann"),
        ));
        let output = Compiler::new(&FlatSchema).compile(&mut query).expect("compile");
        assert_eq!(output.stats.nodes_before, 4);
        assert_eq!(output.stats.nodes_after, 2);
        assert_eq!(output.stats.nodes_merged(), 2);
        assert_eq!(output.stats.links_merged(), 1);
        assert_eq!(output.redirects.nodes.len(), 2);
    }

    #[test]
    fn foreign_ids_are_rejected_before_merging() {
        let mut builder = IrBuilder::new();
        let user = builder.root("User");
        let mut query = Query::new(builder.finish())
            .with_generator(Expr::filter(user, "x", Operator::Eq, 1))
            .order_by(Expr::attr(crate::ir::NodeId(5), "age"));
        let err = Compiler::new(&FlatSchema).compile(&mut query).expect_err("foreign id");
        assert!(err.is_internal());
        assert!(query.generator.is_some());
        assert_eq!(query.sorter.len(), 1);
    }

    #[test]
    fn empty_query_compiles() {
        let mut query = Query::new(PathGraph::new());
        let output = Compiler::new(&FlatSchema).compile(&mut query).expect("compile");
        assert_eq!(output.stats, MergeStats::default());
        assert!(output.explain.roots.is_empty());
    }
}
