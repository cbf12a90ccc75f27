//! Absorbing one matched fragment into another.
//!
//! The left operand always survives. The absorbed side is recorded in the
//! redirect map before its state is moved out, so any recursive lookup that
//! reaches it lands on the survivor.

use std::collections::BTreeSet;
use std::mem;

use tracing::trace;

use super::unify::add_conjunctions;
use super::{FilterMerge, PathMerger};
use crate::error::{CompileError, Result};
use crate::ir::{ClauseKind, Expr, Fragment, LinkId, NodeId, Operator, PathSet, SetKind, TypeName};

/// Node and link a matched entity fragment stands for.
#[derive(Clone, Copy)]
struct Side {
    node: Option<NodeId>,
    link: Option<LinkId>,
}

/// Merge semantics applied to a matched pair.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum MergeMode {
    Union,
    Intersection,
}

/// State moved out of an absorbed node.
struct AbsorbedNode {
    filter: Option<Expr>,
    conjunction: PathSet,
    disjunction: PathSet,
    atomrefs: BTreeSet<String>,
    metarefs: BTreeSet<String>,
    users: BTreeSet<ClauseKind>,
    joins: BTreeSet<NodeId>,
    origin: Option<NodeId>,
    concept: TypeName,
}

impl PathMerger<'_> {
    fn side(&self, fragment: &Fragment) -> Side {
        match fragment {
            Fragment::Node(node) => Side {
                node: Some(*node),
                link: self
                    .graph
                    .node(*node)
                    .rlink
                    .map(|link| self.graph.resolve_link(link)),
            },
            Fragment::Link(link) => Side {
                node: self
                    .graph
                    .link(*link)
                    .target
                    .map(|node| self.graph.resolve_node(node)),
                link: Some(*link),
            },
            Fragment::Conjunction(_) | Fragment::Disjunction(_) => Side {
                node: None,
                link: None,
            },
        }
    }

    fn take_node(&mut self, id: NodeId) -> AbsorbedNode {
        let node = self.graph.node_mut(id);
        AbsorbedNode {
            filter: node.filter.take(),
            conjunction: mem::take(&mut node.conjunction),
            disjunction: mem::take(&mut node.disjunction),
            atomrefs: mem::take(&mut node.atomrefs),
            metarefs: mem::take(&mut node.metarefs),
            users: node.users.clone(),
            joins: mem::take(&mut node.joins),
            origin: node.origin.take(),
            concept: node.concept.clone(),
        }
    }

    /// Folds `absorbed` into `survivor`, combining property filters with `op`.
    fn merge_links(&mut self, survivor: LinkId, absorbed: LinkId, op: Operator) {
        if survivor == absorbed {
            return;
        }
        self.graph.absorb_link(absorbed, survivor);
        let (propfilter, proprefs, users, target) = {
            let edge = self.graph.link_mut(absorbed);
            (
                edge.propfilter.take(),
                mem::take(&mut edge.proprefs),
                edge.users.clone(),
                edge.target,
            )
        };
        let edge = self.graph.link_mut(survivor);
        if let Some(propfilter) = propfilter {
            edge.propfilter = Some(Expr::extend(edge.propfilter.take(), propfilter, op));
        }
        edge.proprefs.extend(proprefs);
        edge.users.extend(users);
        let adopted = match (edge.target, target) {
            (None, Some(target)) => {
                edge.target = Some(target);
                Some(target)
            }
            _ => None,
        };
        if let Some(target) = adopted {
            let target = self.graph.resolve_node(target);
            self.graph.node_mut(target).rlink = Some(survivor);
        }
    }

    /// Metadata every merge carries over regardless of mode.
    fn merge_node_metadata(&mut self, survivor: NodeId, absorbed: NodeId, state: &mut AbsorbedNode) {
        let narrow = self.schema.is_subtype(&state.concept, &self.graph.node(survivor).concept);
        let node = self.graph.node_mut(survivor);
        node.atomrefs.append(&mut state.atomrefs);
        node.metarefs.append(&mut state.metarefs);
        node.users.extend(state.users.iter().copied());
        node.joins.append(&mut state.joins);
        node.joins.remove(&survivor);
        node.joins.remove(&absorbed);
        if node.origin.is_none() {
            node.origin = state.origin.take();
        }
        if narrow {
            node.concept = state.concept.clone();
        }
    }

    fn check_node_survivor(&self, node: NodeId) -> Result<()> {
        if self.graph.is_live_node(node) {
            Ok(())
        } else {
            Err(CompileError::invariant(format!(
                "merge survivor {node} was absorbed"
            )))
        }
    }

    /// Union merge of two matched nodes.
    fn union_nodes(&mut self, left: NodeId, right: NodeId, filters: FilterMerge) -> Result<()> {
        self.graph.absorb_node(right, left);
        let mut state = self.take_node(right);

        if let Some(filter) = state.filter.take() {
            let node = self.graph.node_mut(left);
            node.filter = Some(Expr::extend(node.filter.take(), filter, filters.combinator()));
        }

        if filters.enabled() {
            // members already reachable through the survivor's conjunction
            // are merged there instead of being re-added as optional paths
            let mut remaining = PathSet::new();
            remaining.fixed = state.disjunction.fixed;
            for path in mem::take(&mut state.disjunction).into_paths() {
                if path.is_entity() {
                    let conjunction = self.graph.node(left).conjunction.clone();
                    if self.merge_into_members(
                        &conjunction,
                        &path,
                        MergeMode::Intersection,
                        FilterMerge::Disabled,
                    )? {
                        continue;
                    }
                }
                remaining.insert(path);
            }
            state.disjunction = remaining;
        }

        let left_disjunction = mem::take(&mut self.graph.node_mut(left).disjunction);
        let mut disjunction =
            self.add_disjunctions(left_disjunction, mem::take(&mut state.disjunction), filters)?;
        if filters == FilterMerge::Disjunctive {
            disjunction.fixed = true;
        }
        self.graph.node_mut(left).disjunction = disjunction;

        self.merge_node_metadata(left, right, &mut state);

        if filters.enabled() {
            let left_conjunction = mem::take(&mut self.graph.node_mut(left).conjunction);
            let conjunction = self.intersect_conjunctions(
                left_conjunction,
                mem::take(&mut state.conjunction),
                filters,
            )?;
            self.graph.node_mut(left).conjunction = conjunction;

            let node = self.graph.node(left);
            let members: Vec<Fragment> = node
                .conjunction
                .iter()
                .chain(node.disjunction.iter())
                .cloned()
                .collect();
            self.unify_fragments(members, SetKind::Conjunction, false, filters)?;
            self.settle_node_sets(left);
        } else {
            let left_conjunction = mem::take(&mut self.graph.node_mut(left).conjunction);
            let conjunctions = add_conjunctions(left_conjunction, mem::take(&mut state.conjunction));
            let node = self.graph.node_mut(left);
            for path in conjunctions.into_paths() {
                node.disjunction.insert(path);
            }
        }
        self.check_node_survivor(left)
    }

    /// Intersection merge of two matched nodes.
    fn intersect_nodes(&mut self, left: NodeId, right: NodeId, filters: FilterMerge) -> Result<()> {
        self.graph.absorb_node(right, left);
        let mut state = self.take_node(right);

        if let Some(filter) = state.filter.take() {
            let node = self.graph.node_mut(left);
            node.filter = Some(Expr::extend(node.filter.take(), filter, Operator::And));
        }

        let left_conjunction = mem::take(&mut self.graph.node_mut(left).conjunction);
        let conjunction =
            self.intersect_conjunctions(left_conjunction, mem::take(&mut state.conjunction), filters)?;
        self.graph.node_mut(left).conjunction = conjunction;

        self.merge_node_metadata(left, right, &mut state);

        let left_disjunction = mem::take(&mut self.graph.node_mut(left).disjunction);
        let disjunction =
            self.intersect_disjunctions(left_disjunction, mem::take(&mut state.disjunction))?;

        match disjunction {
            Fragment::Disjunction(disjunction) => {
                let members: Vec<Fragment> = self
                    .graph
                    .node(left)
                    .conjunction
                    .iter()
                    .chain(disjunction.iter())
                    .cloned()
                    .collect();
                self.unify_fragments(members, SetKind::Conjunction, false, filters)?;

                let mut disjunction = disjunction;
                self.graph.resolve_set(&mut disjunction);
                let mut conjunction = mem::take(&mut self.graph.node_mut(left).conjunction);
                self.graph.resolve_set(&mut conjunction);
                disjunction.retain(|path| !conjunction.contains(path));
                self.graph.node_mut(left).conjunction = conjunction;
                if let [Fragment::Conjunction(single)] = disjunction.paths() {
                    let single = single.clone();
                    let conjunction = mem::take(&mut self.graph.node_mut(left).conjunction);
                    let conjunction = self.intersect_conjunctions(conjunction, single, filters)?;
                    self.graph.node_mut(left).conjunction = conjunction;
                    disjunction = PathSet::new();
                }
                self.graph.node_mut(left).disjunction = disjunction;
                self.settle_node_sets(left);
            }
            Fragment::Conjunction(extra) if !extra.is_empty() => {
                let conjunction = mem::take(&mut self.graph.node_mut(left).conjunction);
                let mut conjunction = self.intersect_conjunctions(conjunction, extra, filters)?;
                let node = self.graph.node_mut(left);
                if let [Fragment::Disjunction(single)] = conjunction.paths() {
                    node.disjunction = single.clone();
                    conjunction = PathSet::new();
                }
                node.conjunction = conjunction;
            }
            _ => {}
        }
        self.check_node_survivor(left)
    }

    /// Resolves both sets of `node` and drops optional members that are
    /// already required.
    fn settle_node_sets(&mut self, node: NodeId) {
        let mut conjunction = mem::take(&mut self.graph.node_mut(node).conjunction);
        let mut disjunction = mem::take(&mut self.graph.node_mut(node).disjunction);
        self.graph.resolve_set(&mut conjunction);
        self.graph.resolve_set(&mut disjunction);
        disjunction.retain(|path| !conjunction.contains(path));
        let entry = self.graph.node_mut(node);
        entry.conjunction = conjunction;
        entry.disjunction = disjunction;
    }

    /// Merges the link and node halves of a matched pair.
    fn absorb_pair(
        &mut self,
        left: &Fragment,
        right: &Fragment,
        mode: MergeMode,
        filters: FilterMerge,
    ) -> Result<Fragment> {
        let ours = self.side(left);
        let theirs = self.side(right);
        let link_op = match mode {
            MergeMode::Union => filters.combinator(),
            MergeMode::Intersection => Operator::And,
        };

        if let (Some(survivor), Some(absorbed)) = (ours.link, theirs.link) {
            self.merge_links(survivor, absorbed, link_op);
        }

        // a dangling survivor may have just adopted the absorbed target
        let left_node = ours.node.or_else(|| {
            ours.link
                .and_then(|link| self.graph.link(link).target)
                .map(|node| self.graph.resolve_node(node))
        });
        if let (Some(survivor), Some(absorbed)) = (left_node, theirs.node) {
            let absorbed = self.graph.resolve_node(absorbed);
            if survivor != absorbed {
                match mode {
                    MergeMode::Union => self.union_nodes(survivor, absorbed, filters)?,
                    MergeMode::Intersection => self.intersect_nodes(survivor, absorbed, filters)?,
                }
            }
        }

        match (left, ours.link) {
            (Fragment::Node(node), _) => Ok(Fragment::Node(self.graph.resolve_node(*node))),
            (Fragment::Link(_), Some(link)) => Ok(Fragment::Link(self.graph.resolve_link(link))),
            _ => Err(CompileError::invariant(format!(
                "cannot merge non-entity fragment {left}"
            ))),
        }
    }

    /// Union merge of two entity fragments; `None` when they do not match.
    pub(crate) fn try_add_sets(
        &mut self,
        left: Fragment,
        right: Fragment,
        filters: FilterMerge,
    ) -> Result<Option<Fragment>> {
        let left = self.graph.resolve(&left);
        let right = self.graph.resolve(&right);
        if left == right {
            return Ok(Some(left));
        }
        if !self.match_prefixes(&left, &right, filters.enabled()) {
            return Ok(None);
        }
        trace!(depth = self.depth, %left, %right, ?filters, "add sets");
        self.nested(|this| {
            this.absorb_pair(&left, &right, MergeMode::Union, filters)
                .map(Some)
        })
    }

    /// Intersection merge of two entity fragments; `None` when they do not
    /// match. Filters never block an intersection match.
    pub(crate) fn try_intersect_sets(
        &mut self,
        left: Fragment,
        right: Fragment,
        filters: FilterMerge,
    ) -> Result<Option<Fragment>> {
        let left = self.graph.resolve(&left);
        let right = self.graph.resolve(&right);
        if left == right {
            return Ok(Some(left));
        }
        if !self.match_prefixes(&left, &right, true) {
            return Ok(None);
        }
        trace!(depth = self.depth, %left, %right, ?filters, "intersect sets");
        self.nested(|this| {
            this.absorb_pair(&left, &right, MergeMode::Intersection, filters)
                .map(Some)
        })
    }

    /// Union of two entity fragments: the survivor, or a disjunction of both.
    pub(crate) fn add_sets(
        &mut self,
        left: Fragment,
        right: Fragment,
        filters: FilterMerge,
    ) -> Result<Fragment> {
        match self.try_add_sets(left.clone(), right.clone(), filters)? {
            Some(merged) => Ok(merged),
            None => Ok(Fragment::Disjunction(PathSet::from_paths([left, right]))),
        }
    }

    /// Intersection of two entity fragments: the survivor, or a conjunction
    /// of both.
    pub(crate) fn intersect_sets(
        &mut self,
        left: Fragment,
        right: Fragment,
        filters: FilterMerge,
    ) -> Result<Fragment> {
        match self.try_intersect_sets(left.clone(), right.clone(), filters)? {
            Some(merged) => Ok(merged),
            None => Ok(Fragment::Conjunction(PathSet::from_paths([left, right]))),
        }
    }

    /// Tries to merge `path` into the first matching entity member of `set`.
    pub(crate) fn merge_into_members(
        &mut self,
        set: &PathSet,
        path: &Fragment,
        mode: MergeMode,
        filters: FilterMerge,
    ) -> Result<bool> {
        for member in set.iter().filter(|member| member.is_entity()) {
            let merged = match mode {
                MergeMode::Union => self.try_add_sets(member.clone(), path.clone(), filters)?,
                MergeMode::Intersection => {
                    self.try_intersect_sets(member.clone(), path.clone(), filters)?
                }
            };
            if merged.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MergeConfig;
    use crate::ir::{FlatSchema, InMemorySchema, IrBuilder, PathGraph, SchemaProvider};

    fn merger<'a>(
        graph: &'a mut PathGraph,
        schema: &'a dyn SchemaProvider,
        config: &'a MergeConfig,
    ) -> PathMerger<'a> {
        PathMerger::new(graph, schema, config, ClauseKind::Generator)
    }

    fn eq(node: NodeId, attr: &str, value: i64) -> Expr {
        Expr::binop(Expr::attr(node, attr), Operator::Eq, Expr::constant(value))
    }

    #[test]
    fn union_keeps_left_and_redirects_right() {
        let mut builder = IrBuilder::new();
        let a = builder.root("User");
        builder.clause(ClauseKind::Selector);
        let b = builder.root("User");
        let mut graph = builder.finish();
        graph.node_mut(b).atomrefs.insert("name".into());
        let config = MergeConfig::default();
        let mut m = merger(&mut graph, &FlatSchema, &config);
        let out = m
            .add_sets(Fragment::Node(a), Fragment::Node(b), FilterMerge::Disabled)
            .expect("merge");
        assert_eq!(out, Fragment::Node(a));
        assert_eq!(graph.resolve_node(b), a);
        let node = graph.node(a);
        assert!(node.atomrefs.contains("name"));
        assert!(node.users.contains(&ClauseKind::Generator));
        assert!(node.users.contains(&ClauseKind::Selector));
    }

    #[test]
    fn unmatched_union_is_a_disjunction() {
        let mut builder = IrBuilder::new();
        let a = builder.root("User");
        let b = builder.root("Org");
        let mut graph = builder.finish();
        let config = MergeConfig::default();
        let mut m = merger(&mut graph, &FlatSchema, &config);
        let out = m
            .add_sets(Fragment::Node(a), Fragment::Node(b), FilterMerge::Disabled)
            .expect("merge");
        assert_eq!(
            out,
            Fragment::Disjunction(PathSet::from_paths([Fragment::Node(a), Fragment::Node(b)]))
        );
        assert!(graph.redirects().is_empty());
    }

    #[test]
    fn disjunctive_union_ors_filters_and_fixes() {
        let mut builder = IrBuilder::new();
        let a = builder.root("User");
        let b = builder.root("User");
        let mut graph = builder.finish();
        graph.node_mut(a).filter = Some(eq(a, "x", 1));
        graph.node_mut(b).filter = Some(eq(b, "x", 2));
        let config = MergeConfig::default();
        let mut m = merger(&mut graph, &FlatSchema, &config);
        m.add_sets(Fragment::Node(a), Fragment::Node(b), FilterMerge::Disjunctive)
            .expect("merge");
        let node = graph.node(a);
        assert_eq!(
            node.filter.as_ref().map(ToString::to_string).as_deref(),
            Some("((x) = (1)) OR ((x) = (2))")
        );
        assert!(node.disjunction.fixed);
    }

    #[test]
    fn intersection_ands_filters() {
        let mut builder = IrBuilder::new();
        let a = builder.root("User");
        let b = builder.root("User");
        let mut graph = builder.finish();
        graph.node_mut(a).filter = Some(eq(a, "x", 1));
        graph.node_mut(b).filter = Some(eq(b, "y", 2));
        let config = MergeConfig::default();
        let mut m = merger(&mut graph, &FlatSchema, &config);
        let out = m
            .intersect_sets(Fragment::Node(a), Fragment::Node(b), FilterMerge::Disabled)
            .expect("merge");
        assert_eq!(out, Fragment::Node(a));
        assert_eq!(
            graph.node(a).filter.as_ref().map(ToString::to_string).as_deref(),
            Some("((x) = (1)) AND ((y) = (2))")
        );
        assert!(!graph.node(a).disjunction.fixed);
    }

    #[test]
    fn union_narrows_to_subtype() {
        let mut builder = IrBuilder::new();
        let a = builder.root("User");
        let b = builder.root("User");
        let mut graph = builder.finish();
        graph.node_mut(b).concept = TypeName::from("Admin");
        let schema = InMemorySchema::new().with_type("Admin", &["User"]);
        let config = MergeConfig::default();
        let mut m = merger(&mut graph, &schema, &config);
        m.add_sets(Fragment::Node(a), Fragment::Node(b), FilterMerge::Disabled)
            .expect("merge");
        assert_eq!(graph.node(a).concept, TypeName::from("Admin"));
    }

    #[test]
    fn origin_transfers_when_missing() {
        let mut builder = IrBuilder::new();
        let outer = builder.root("User");
        let a = builder.root("User");
        let b = builder.root("User");
        let mut graph = builder.finish();
        graph.node_mut(b).origin = Some(outer);
        graph.node_mut(a).joins.insert(b);
        let config = MergeConfig::default();
        let mut m = merger(&mut graph, &FlatSchema, &config);
        m.add_sets(Fragment::Node(a), Fragment::Node(b), FilterMerge::Disabled)
            .expect("merge");
        assert_eq!(graph.node(a).origin, Some(outer));
        assert!(graph.node(a).joins.is_empty());
    }

    #[test]
    fn union_recurses_into_links() {
        let mut builder = IrBuilder::new();
        let fa = builder.path("User", &[("friends", "User")]);
        let fb = builder.path("User", &[("friends", "User")]);
        let ra = builder.graph().root_of(fa);
        let rb = builder.graph().root_of(fb);
        let la = builder.rlink(fa).expect("rlink");
        let lb = builder.rlink(fb).expect("rlink");
        let mut graph = builder.finish();
        let config = MergeConfig::default();
        let mut m = merger(&mut graph, &FlatSchema, &config);
        m.add_sets(Fragment::Node(ra), Fragment::Node(rb), FilterMerge::Disabled)
            .expect("merge");
        assert_eq!(graph.resolve_node(fb), fa);
        assert_eq!(graph.resolve_link(lb), la);
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.link_count(), 1);
        let mut disjunction = graph.node(ra).disjunction.clone();
        graph.resolve_set(&mut disjunction);
        assert_eq!(disjunction.paths(), &[Fragment::Link(la)]);
    }

    #[test]
    fn dangling_link_adopts_target() {
        let mut builder = IrBuilder::new();
        let root = builder.root("User");
        let dangling = builder.dangling(root, "friends", crate::ir::Direction::Outbound, "User");
        let other = builder.root("User");
        let friend = builder.step(other, "friends", "User");
        let friend_link = builder.rlink(friend).expect("rlink");
        let mut graph = builder.finish();
        let config = MergeConfig::default();
        let mut m = merger(&mut graph, &FlatSchema, &config);
        let out = m
            .add_sets(
                Fragment::Link(dangling),
                Fragment::Link(friend_link),
                FilterMerge::Conjunctive,
            )
            .expect("merge");
        assert_eq!(out, Fragment::Link(dangling));
        assert_eq!(graph.link(dangling).target, Some(friend));
        assert_eq!(graph.node(friend).rlink, Some(dangling));
        assert_eq!(graph.resolve_link(friend_link), dangling);
    }
}
