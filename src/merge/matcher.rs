//! Structural prefix matching.
//!
//! Two entity fragments match when they denote the same traversal step from
//! the same origin. A dangling link stands in for its source node with the
//! path extended by a wildcard step.

use tracing::trace;

use super::PathMerger;
use crate::ir::{Fragment, LinkId, NodeId, PathId};

/// Node, effective path identity and link a fragment is compared through.
struct Anchor {
    node: NodeId,
    path_id: PathId,
    link: Option<LinkId>,
}

impl PathMerger<'_> {
    fn anchor(&self, fragment: &Fragment) -> Option<Anchor> {
        match fragment {
            Fragment::Node(node) => {
                let node = self.graph.resolve_node(*node);
                Some(Anchor {
                    node,
                    path_id: self.graph.node(node).path_id.clone(),
                    link: None,
                })
            }
            Fragment::Link(link) => {
                let link = self.graph.resolve_link(*link);
                let edge = self.graph.link(link);
                match edge.target {
                    Some(target) => {
                        let node = self.graph.resolve_node(target);
                        Some(Anchor {
                            node,
                            path_id: self.graph.node(node).path_id.clone(),
                            link: Some(link),
                        })
                    }
                    None => {
                        let node = self.graph.resolve_node(edge.source);
                        let path_id = self.graph.node(node).path_id.extend(
                            edge.link.clone(),
                            edge.direction,
                            None,
                        );
                        Some(Anchor {
                            node,
                            path_id,
                            link: Some(link),
                        })
                    }
                }
            }
            Fragment::Conjunction(_) | Fragment::Disjunction(_) => None,
        }
    }

    fn same_edge(&self, a: LinkId, b: LinkId) -> bool {
        let a = self.graph.link(self.graph.resolve_link(a));
        let b = self.graph.link(self.graph.resolve_link(b));
        a.link == b.link && a.direction == b.direction
    }

    /// Link check for a link compared against a node: the node must have
    /// been produced by an equivalent link.
    fn link_matches_node(&self, link: LinkId, node: NodeId) -> bool {
        match self.graph.node(node).rlink {
            Some(rlink) => self.same_edge(link, rlink),
            None => false,
        }
    }

    /// Decides whether `ours` and `other` denote the same traversal.
    ///
    /// Unless `ignore_filters` is set, a node carrying a filter or a
    /// non-empty conjunction never matches.
    pub(crate) fn match_prefixes(
        &self,
        ours: &Fragment,
        other: &Fragment,
        ignore_filters: bool,
    ) -> bool {
        let (Some(a), Some(b)) = (self.anchor(ours), self.anchor(other)) else {
            return false;
        };
        if !a.path_id.matches(&b.path_id) {
            return false;
        }
        let node_a = self.graph.node(a.node);
        let node_b = self.graph.node(b.node);
        if node_a.alias != node_b.alias {
            return false;
        }
        if !ignore_filters
            && (node_a.filter.is_some()
                || node_b.filter.is_some()
                || !node_a.conjunction.is_empty()
                || !node_b.conjunction.is_empty())
        {
            return false;
        }
        let links_ok = match (a.link, b.link) {
            (Some(la), Some(lb)) => self.same_edge(la, lb),
            (Some(la), None) => self.link_matches_node(la, b.node),
            (None, Some(lb)) => self.link_matches_node(lb, a.node),
            (None, None) => true,
        };
        trace!(
            depth = self.depth,
            ours = %ours,
            other = %other,
            path = %a.path_id,
            ignore_filters,
            matched = links_ok,
            "match prefixes"
        );
        links_ok
    }
}

#[cfg(test)]
mod tests {
    use crate::config::MergeConfig;
    use crate::ir::{
        ClauseKind, Direction, Expr, FlatSchema, Fragment, IrBuilder, Operator, PathGraph,
    };
    use crate::merge::PathMerger;

    fn check(graph: &mut PathGraph, a: Fragment, b: Fragment, ignore_filters: bool) -> bool {
        let config = MergeConfig::default();
        let merger = PathMerger::new(graph, &FlatSchema, &config, ClauseKind::Generator);
        merger.match_prefixes(&a, &b, ignore_filters)
    }

    #[test]
    fn identical_paths_match() {
        let mut builder = IrBuilder::new();
        let a = builder.path("User", &[("friends", "User")]);
        let b = builder.path("User", &[("friends", "User")]);
        let mut graph = builder.finish();
        assert!(check(&mut graph, Fragment::Node(a), Fragment::Node(b), false));
    }

    #[test]
    fn conflicting_aliases_do_not_match() {
        let mut builder = IrBuilder::new();
        let a = builder.aliased_root("User", "u1");
        let b = builder.aliased_root("User", "u2");
        let c = builder.aliased_root("User", "u1");
        let mut graph = builder.finish();
        assert!(!check(&mut graph, Fragment::Node(a), Fragment::Node(b), true));
        assert!(check(&mut graph, Fragment::Node(a), Fragment::Node(c), true));
    }

    #[test]
    fn filters_block_match_unless_ignored() {
        let mut builder = IrBuilder::new();
        let a = builder.root("User");
        let b = builder.root("User");
        let mut graph = builder.finish();
        graph.node_mut(a).filter = Some(Expr::binop(
            Expr::attr(a, "x"),
            Operator::Eq,
            Expr::constant(1),
        ));
        assert!(!check(&mut graph, Fragment::Node(a), Fragment::Node(b), false));
        assert!(check(&mut graph, Fragment::Node(a), Fragment::Node(b), true));
    }

    #[test]
    fn dangling_link_matches_through_wildcard() {
        let mut builder = IrBuilder::new();
        let user = builder.root("User");
        let dangling = builder.dangling(user, "friends", Direction::Outbound, "User");
        let other_root = builder.root("User");
        let friend = builder.step(other_root, "friends", "Admin");
        let friend_link = builder.rlink(friend).expect("rlink");
        let mut graph = builder.finish();
        assert!(check(
            &mut graph,
            Fragment::Link(dangling),
            Fragment::Link(friend_link),
            true
        ));
        assert!(check(
            &mut graph,
            Fragment::Link(dangling),
            Fragment::Node(friend),
            true
        ));
    }

    #[test]
    fn direction_mismatch_never_matches() {
        let mut builder = IrBuilder::new();
        let a = builder.root("User");
        let out = builder.step_dir(a, "friends", Direction::Outbound, "User");
        let b = builder.root("User");
        let inb = builder.step_dir(b, "friends", Direction::Inbound, "User");
        let mut graph = builder.finish();
        assert!(!check(&mut graph, Fragment::Node(out), Fragment::Node(inb), true));
    }

    #[test]
    fn root_never_matches_link() {
        let mut builder = IrBuilder::new();
        let root = builder.root("User");
        let dangling = builder.dangling(root, "friends", Direction::Outbound, "User");
        let mut graph = builder.finish();
        assert!(!check(&mut graph, Fragment::Link(dangling), Fragment::Node(root), true));
    }
}
