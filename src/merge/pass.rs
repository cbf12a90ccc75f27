//! Path-merge pass over clause expressions.
//!
//! Walks an expression bottom-up, folds inline predicates into their nodes
//! when merging the generator, records attribute references, and unifies the
//! paths of every operator, call and literal so identical traversals end up
//! as one node.

use std::collections::BTreeSet;

use rustc_hash::FxHashSet;
use tracing::trace;

use super::extract::extract_paths;
use super::unify::flatten;
use super::{FilterMerge, PathMerger};
use crate::error::Result;
use crate::ir::{
    ClauseKind, Expr, Fragment, FunctionCall, LinkId, NodeId, Operator, PathSet, SetKind,
    SortExpr, Span,
};

impl PathMerger<'_> {
    /// Merges the paths of `expr` and returns the rewritten expression.
    pub fn merge_expr(&mut self, expr: Expr) -> Result<Expr> {
        self.nested(|this| this.merge_inner(expr))
    }

    fn merge_inner(&mut self, expr: Expr) -> Result<Expr> {
        let folding = self.location == ClauseKind::Generator;
        match expr {
            Expr::AtomicRefExpr { node, expr, inline } if inline && folding => {
                Ok(self.fold_node_filter(node, *expr))
            }
            Expr::AtomicRefExpr { node, expr, inline } => Ok(Expr::AtomicRefExpr {
                node,
                expr: Box::new(self.merge_expr(*expr)?),
                inline,
            }),
            Expr::LinkPropRefExpr { link, expr, inline } if inline && folding => {
                Ok(self.fold_link_filter(link, *expr))
            }
            Expr::LinkPropRefExpr { link, expr, inline } => Ok(Expr::LinkPropRefExpr {
                link,
                expr: Box::new(self.merge_expr(*expr)?),
                inline,
            }),
            Expr::AtomicRef { node, name } => {
                let owner = self.graph.resolve_node(node);
                self.graph.node_mut(owner).atomrefs.insert(name.clone());
                Ok(Expr::AtomicRef { node, name })
            }
            Expr::MetaRef { node, name } => {
                let owner = self.graph.resolve_node(node);
                self.graph.node_mut(owner).metarefs.insert(name.clone());
                Ok(Expr::MetaRef { node, name })
            }
            Expr::LinkPropRef { link, name } => {
                let owner = self.graph.resolve_link(link);
                self.graph.link_mut(owner).proprefs.insert(name.clone());
                Ok(Expr::LinkPropRef { link, name })
            }
            Expr::BinOp {
                left,
                op,
                right,
                aggregates,
                span,
            } => self.merge_binop(*left, op, *right, aggregates, span),
            Expr::UnaryOp { op, expr } => Ok(Expr::UnaryOp {
                op,
                expr: Box::new(self.merge_expr(*expr)?),
            }),
            Expr::Exists(expr) => Ok(Expr::Exists(Box::new(self.merge_expr(*expr)?))),
            Expr::NoneTest(expr) => Ok(Expr::NoneTest(Box::new(self.merge_expr(*expr)?))),
            Expr::TypeCast { expr, target } => Ok(Expr::TypeCast {
                expr: Box::new(self.merge_expr(*expr)?),
                target,
            }),
            Expr::FunctionCall(call) => self.merge_call(call).map(Expr::FunctionCall),
            Expr::Sequence {
                elements,
                is_array,
                aggregates,
            } => Ok(Expr::Sequence {
                elements: self.merge_elements(elements)?,
                is_array,
                aggregates,
            }),
            Expr::Record {
                elements,
                concept,
                aggregates,
            } => Ok(Expr::Record {
                elements: self.merge_elements(elements)?,
                concept,
                aggregates,
            }),
            Expr::Path(fragment) => self.merge_fragment(fragment).map(Expr::Path),
            expr @ (Expr::Constant(_) | Expr::InlineFilter { .. } | Expr::InlinePropFilter { .. }) => {
                Ok(expr)
            }
        }
    }

    fn fold_node_filter(&mut self, node: NodeId, predicate: Expr) -> Expr {
        let mut refs: Vec<(NodeId, String)> = Vec::new();
        predicate.walk(&mut |e| {
            if let Expr::AtomicRef { node, name } = e {
                refs.push((*node, name.clone()));
            }
        });
        for (owner, name) in refs {
            let owner = self.graph.resolve_node(owner);
            self.graph.node_mut(owner).atomrefs.insert(name);
        }
        let node = self.graph.resolve_node(node);
        let entry = self.graph.node_mut(node);
        entry.filter = Some(Expr::extend(entry.filter.take(), predicate, Operator::And));
        Expr::InlineFilter { node }
    }

    fn fold_link_filter(&mut self, link: LinkId, predicate: Expr) -> Expr {
        let link = self.graph.resolve_link(link);
        let mut names: BTreeSet<String> = BTreeSet::new();
        let graph = &*self.graph;
        predicate.walk(&mut |e| {
            if let Expr::LinkPropRef { link: owner, name } = e {
                if graph.resolve_link(*owner) == link {
                    names.insert(name.clone());
                }
            }
        });
        let edge = self.graph.link_mut(link);
        edge.proprefs.extend(names);
        edge.propfilter = Some(Expr::extend(edge.propfilter.take(), predicate, Operator::And));
        Expr::InlinePropFilter { link }
    }

    fn merge_binop(
        &mut self,
        left: Expr,
        op: Operator,
        right: Expr,
        aggregates: bool,
        span: Option<Span>,
    ) -> Result<Expr> {
        let left = self.merge_expr(left)?;
        let right = self.merge_expr(right)?;
        let weak = self.is_weak_op(op);
        let (mode, filters) = if weak {
            (SetKind::Disjunction, FilterMerge::Disjunctive)
        } else {
            (SetKind::Conjunction, FilterMerge::Disabled)
        };
        self.unify_exprs(&[&left, &right], mode, filters)?;

        let collapsible = (op == Operator::And && !weak) || op == Operator::Or;
        if collapsible {
            match (&left, &right) {
                (Expr::InlineFilter { node: a }, Expr::InlineFilter { node: b }) => {
                    let survivor = self.graph.resolve_node(*a);
                    if survivor == self.graph.resolve_node(*b) {
                        trace!(depth = self.depth, %survivor, %op, "collapse inline filters");
                        return Ok(Expr::InlineFilter { node: survivor });
                    }
                }
                (Expr::InlinePropFilter { link: a }, Expr::InlinePropFilter { link: b }) => {
                    let survivor = self.graph.resolve_link(*a);
                    if survivor == self.graph.resolve_link(*b) {
                        trace!(depth = self.depth, %survivor, %op, "collapse property filters");
                        return Ok(Expr::InlinePropFilter { link: survivor });
                    }
                }
                _ => {}
            }
        }

        Ok(Expr::BinOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
            aggregates,
            span,
        })
    }

    fn merge_call(&mut self, call: FunctionCall) -> Result<FunctionCall> {
        let FunctionCall {
            name,
            args,
            aggregates,
            agg_sort,
            agg_filter,
            partition,
            span,
        } = call;

        let args = self.merge_all(args)?;
        let mut sorted = Vec::with_capacity(agg_sort.len());
        for sort in agg_sort {
            sorted.push(SortExpr {
                expr: self.merge_expr(sort.expr)?,
                ..sort
            });
        }
        let agg_filter = match agg_filter {
            Some(filter) => Some(Box::new(self.merge_expr(*filter)?)),
            None => None,
        };
        let partition = self.merge_all(partition)?;

        if args.len() > 1 || !sorted.is_empty() || agg_filter.is_some() || !partition.is_empty() {
            let exprs: Vec<&Expr> = args
                .iter()
                .chain(sorted.iter().map(|sort| &sort.expr))
                .chain(agg_filter.iter().map(|filter| filter.as_ref()))
                .chain(partition.iter())
                .collect();
            self.unify_exprs(&exprs, SetKind::Disjunction, FilterMerge::Disabled)?;
        }

        Ok(FunctionCall {
            name,
            args,
            aggregates,
            agg_sort: sorted,
            agg_filter,
            partition,
            span,
        })
    }

    fn merge_all(&mut self, exprs: Vec<Expr>) -> Result<Vec<Expr>> {
        exprs.into_iter().map(|expr| self.merge_expr(expr)).collect()
    }

    fn merge_elements(&mut self, elements: Vec<Expr>) -> Result<Vec<Expr>> {
        let elements = self.merge_all(elements)?;
        let exprs: Vec<&Expr> = elements.iter().collect();
        self.unify_exprs(&exprs, SetKind::Disjunction, FilterMerge::Disabled)?;
        Ok(elements)
    }

    /// Flattens and unifies a bare path combination.
    fn merge_fragment(&mut self, fragment: Fragment) -> Result<Fragment> {
        let (kind, set) = match fragment {
            Fragment::Conjunction(set) => (SetKind::Conjunction, set),
            Fragment::Disjunction(set) => (SetKind::Disjunction, set),
            entity => return Ok(self.graph.resolve(&entity)),
        };
        let flat = flatten(kind, set);
        let fixed = flat.fixed;
        let mut members = PathSet::new();
        for member in flat.into_paths() {
            members.insert(self.nested(|this| this.merge_fragment(member))?);
        }
        self.unify_fragments(members.paths().to_vec(), kind, true, FilterMerge::Disabled)?;
        self.graph.resolve_set(&mut members);
        members.fixed = fixed;
        Ok(Fragment::set(kind, members))
    }

    /// Turns lone optional paths reachable from `expr` into required ones.
    ///
    /// A node whose disjunction holds exactly one unfixed member and whose
    /// conjunction is empty gets that member moved into its conjunction.
    pub fn promote_generator_paths(&mut self, expr: &Expr) {
        let roots = match extract_paths(self.graph, expr, true) {
            Some(Fragment::Conjunction(set)) | Some(Fragment::Disjunction(set)) => {
                set.into_paths()
            }
            Some(entity) => vec![entity],
            None => Vec::new(),
        };
        self.promote_from(roots);
    }

    pub(crate) fn promote_from(&mut self, roots: Vec<Fragment>) {
        let mut stack = roots;
        stack.reverse();
        let mut seen_nodes: FxHashSet<NodeId> = FxHashSet::default();
        let mut seen_links: FxHashSet<LinkId> = FxHashSet::default();

        while let Some(fragment) = stack.pop() {
            match fragment {
                Fragment::Node(node) => {
                    let node = self.graph.resolve_node(node);
                    if !seen_nodes.insert(node) {
                        continue;
                    }
                    let entry = self.graph.node_mut(node);
                    if entry.disjunction.len() == 1
                        && entry.conjunction.is_empty()
                        && !entry.disjunction.fixed
                    {
                        entry.conjunction = std::mem::take(&mut entry.disjunction);
                        trace!(%node, "promote lone disjunct");
                    }
                    let entry = self.graph.node(node);
                    let children: Vec<Fragment> = entry
                        .conjunction
                        .iter()
                        .chain(entry.disjunction.iter())
                        .cloned()
                        .collect();
                    stack.extend(children.into_iter().rev());
                }
                Fragment::Link(link) => {
                    let link = self.graph.resolve_link(link);
                    if !seen_links.insert(link) {
                        continue;
                    }
                    if let Some(target) = self.graph.link(link).target {
                        stack.push(Fragment::Node(target));
                    }
                }
                Fragment::Conjunction(set) | Fragment::Disjunction(set) => {
                    stack.extend(set.into_paths().into_iter().rev());
                }
            }
        }
    }

    /// Tags `path` and every entity above it as a generator user and returns
    /// its query root. Path combinations are left alone.
    pub(crate) fn tag_generator_chain(&mut self, path: &Fragment) -> Option<NodeId> {
        let mut current = match path {
            Fragment::Link(link) => {
                let link = self.graph.resolve_link(*link);
                let edge = self.graph.link_mut(link);
                edge.users.insert(ClauseKind::Generator);
                let source = edge.source;
                self.graph.resolve_node(source)
            }
            Fragment::Node(node) => self.graph.resolve_node(*node),
            Fragment::Conjunction(_) | Fragment::Disjunction(_) => return None,
        };
        let mut hops = 0;
        loop {
            let entry = self.graph.node_mut(current);
            entry.users.insert(ClauseKind::Generator);
            let Some(rlink) = entry.rlink else {
                return Some(current);
            };
            let rlink = self.graph.resolve_link(rlink);
            let edge = self.graph.link_mut(rlink);
            edge.users.insert(ClauseKind::Generator);
            let source = edge.source;
            let source = self.graph.resolve_node(source);
            if source == current || hops > self.graph.node_count() {
                return Some(current);
            }
            current = source;
            hops += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MergeConfig;
    use crate::ir::{FlatSchema, IrBuilder, PathGraph};

    fn generator(graph: &mut PathGraph, expr: Expr) -> Expr {
        let config = MergeConfig::default();
        let mut merger = PathMerger::new(graph, &FlatSchema, &config, ClauseKind::Generator);
        let merged = merger.merge_expr(expr).expect("merge");
        merger.promote_generator_paths(&merged);
        merged
    }

    #[test]
    fn inline_filters_fold_into_one_node() {
        let mut builder = IrBuilder::new();
        let a1 = builder.root("User");
        let a2 = builder.root("User");
        let mut graph = builder.finish();
        let expr = Expr::and(
            Expr::filter(a1, "x", Operator::Eq, 1),
            Expr::filter(a2, "x", Operator::Eq, 2),
        );
        let merged = generator(&mut graph, expr);
        assert_eq!(merged, Expr::InlineFilter { node: a1 });
        assert_eq!(graph.node_count(), 1);
        assert_eq!(
            merged.display(&graph).to_string(),
            "((x) = (1)) AND ((x) = (2))"
        );
        assert!(graph.node(a1).atomrefs.contains("x"));
    }

    #[test]
    fn references_are_registered() {
        let mut builder = IrBuilder::new();
        builder.clause(ClauseKind::Selector);
        let user = builder.root("User");
        let friend = builder.step(user, "friends", "User");
        let link = builder.rlink(friend).expect("rlink");
        let mut graph = builder.finish();
        let config = MergeConfig::default();
        let mut merger = PathMerger::new(&mut graph, &FlatSchema, &config, ClauseKind::Selector);
        let expr = Expr::Sequence {
            elements: vec![
                Expr::attr(user, "name"),
                Expr::MetaRef {
                    node: user,
                    name: "name".into(),
                },
                Expr::prop(link, "since"),
            ],
            is_array: false,
            aggregates: false,
        };
        merger.merge_expr(expr).expect("merge");
        assert!(graph.node(user).atomrefs.contains("name"));
        assert!(graph.node(user).metarefs.contains("name"));
        assert!(graph.link(link).proprefs.contains("since"));
    }

    #[test]
    fn selector_predicates_are_not_folded() {
        let mut builder = IrBuilder::new();
        let user = builder.root("User");
        let mut graph = builder.finish();
        let config = MergeConfig::default();
        let mut merger = PathMerger::new(&mut graph, &FlatSchema, &config, ClauseKind::Selector);
        let expr = Expr::filter(user, "x", Operator::Eq, 1);
        let merged = merger.merge_expr(expr.clone()).expect("merge");
        assert_eq!(merged, expr);
        assert!(graph.node(user).filter.is_none());
    }

    #[test]
    fn property_filters_fold_into_link() {
        let mut builder = IrBuilder::new();
        let user = builder.root("User");
        let friend = builder.step(user, "friends", "User");
        let link = builder.rlink(friend).expect("rlink");
        let mut graph = builder.finish();
        let merged = generator(&mut graph, Expr::prop_filter(link, "since", Operator::Gt, 2020));
        assert_eq!(merged, Expr::InlinePropFilter { link });
        assert!(graph.link(link).proprefs.contains("since"));
        assert_eq!(
            graph.link(link).propfilter.as_ref().map(ToString::to_string).as_deref(),
            Some("(@since) > (2020)")
        );
    }

    #[test]
    fn lone_generator_link_is_promoted() {
        let mut builder = IrBuilder::new();
        let friend = builder.path("User", &[("friends", "User")]);
        let root = builder.graph().root_of(friend);
        let link = builder.rlink(friend).expect("rlink");
        let mut graph = builder.finish();
        generator(&mut graph, Expr::filter(friend, "name", Operator::Eq, "Bob"));
        assert_eq!(graph.node(root).conjunction.paths(), &[Fragment::Link(link)]);
        assert!(graph.node(root).disjunction.is_empty());
    }

    #[test]
    fn or_keeps_paths_optional() {
        let mut builder = IrBuilder::new();
        let f1 = builder.path("User", &[("friends", "User")]);
        let f2 = builder.path("User", &[("friends", "User")]);
        let root = builder.graph().root_of(f1);
        let mut graph = builder.finish();
        let merged = generator(
            &mut graph,
            Expr::or(
                Expr::filter(f1, "name", Operator::Eq, "Bob"),
                Expr::filter(f2, "age", Operator::Gt, 30),
            ),
        );
        assert_eq!(merged, Expr::InlineFilter { node: f1 });
        assert_eq!(graph.node_count(), 2);
        assert!(graph.node(root).conjunction.is_empty());
        assert!(graph.node(root).disjunction.fixed);
        assert!(graph.node(f1).disjunction.fixed);
        assert_eq!(
            graph.node(f1).filter.as_ref().map(ToString::to_string).as_deref(),
            Some("((name) = (\"Bob\")) OR ((age) > (30))")
        );
    }

    #[test]
    fn call_arguments_unify_without_folding() {
        let mut builder = IrBuilder::new();
        builder.clause(ClauseKind::Selector);
        let a = builder.path("User", &[("owner", "Org")]);
        let b = builder.path("User", &[("owner", "Org")]);
        let mut graph = builder.finish();
        let config = MergeConfig::default();
        let mut merger = PathMerger::new(&mut graph, &FlatSchema, &config, ClauseKind::Selector);
        let call = Expr::call("concat", vec![Expr::attr(a, "name"), Expr::attr(b, "name")]);
        merger.merge_expr(call).expect("merge");
        assert_eq!(graph.resolve_node(b), a);
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn bare_path_sets_are_unified() {
        let mut builder = IrBuilder::new();
        let a = builder.root("User");
        let b = builder.root("User");
        let c = builder.root("Org");
        let mut graph = builder.finish();
        let config = MergeConfig::default();
        let mut merger = PathMerger::new(&mut graph, &FlatSchema, &config, ClauseKind::Selector);
        let expr = Expr::Path(Fragment::Disjunction(PathSet::from_paths([
            Fragment::Node(a),
            Fragment::Disjunction(PathSet::from_paths([Fragment::Node(b), Fragment::Node(c)])),
        ])));
        let merged = merger.merge_expr(expr).expect("merge");
        assert_eq!(
            merged,
            Expr::Path(Fragment::Disjunction(PathSet::from_paths([
                Fragment::Node(a),
                Fragment::Node(c)
            ])))
        );
    }

    #[test]
    fn generator_tag_climbs_to_root() {
        let mut builder = IrBuilder::new();
        builder.clause(ClauseKind::Selector);
        let leaf = builder.path("User", &[("owner", "Org"), ("country", "Country")]);
        let root = builder.graph().root_of(leaf);
        let link = builder.rlink(leaf).expect("rlink");
        let mut graph = builder.finish();
        let config = MergeConfig::default();
        let mut merger = PathMerger::new(&mut graph, &FlatSchema, &config, ClauseKind::Selector);
        assert_eq!(merger.tag_generator_chain(&Fragment::Node(leaf)), Some(root));
        assert_eq!(
            merger.tag_generator_chain(&Fragment::Disjunction(PathSet::new())),
            None
        );
        assert!(graph.node(root).users.contains(&ClauseKind::Generator));
        assert!(graph.node(leaf).users.contains(&ClauseKind::Generator));
        assert!(graph.link(link).users.contains(&ClauseKind::Generator));
    }
}
