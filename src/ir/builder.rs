//! Programmatic IR construction.
//!
//! Every call allocates fresh entities, the way a front end translates each
//! path expression independently. Identical traversals therefore start out
//! as distinct nodes and are only folded together by the merge pass.

use super::expr::ClauseKind;
use super::graph::{EntityNode, Fragment, LinkEdge, LinkId, NodeId, PathGraph};
use super::path_id::{Direction, LinkName, PathId, TypeName};

/// Fluent builder for [`PathGraph`] arenas.
#[derive(Debug)]
pub struct IrBuilder {
    graph: PathGraph,
    clause: ClauseKind,
}

impl Default for IrBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl IrBuilder {
    /// Creates an empty builder tagging new entities as generator users.
    pub fn new() -> Self {
        Self {
            graph: PathGraph::new(),
            clause: ClauseKind::Generator,
        }
    }

    /// Sets the clause recorded in the `users` of subsequently built paths.
    pub fn clause(&mut self, clause: ClauseKind) -> &mut Self {
        self.clause = clause;
        self
    }

    /// Adds an unaliased query root.
    pub fn root(&mut self, concept: &str) -> NodeId {
        let mut node = EntityNode::new(PathId::root(concept), TypeName::from(concept));
        node.users.insert(self.clause);
        self.graph.add_node(node)
    }

    /// Adds a query root bound to `alias`.
    pub fn aliased_root(&mut self, concept: &str, alias: &str) -> NodeId {
        let node = self.root(concept);
        self.graph.node_mut(node).alias = Some(alias.to_owned());
        node
    }

    /// Follows an outbound link from `source` to a new `target` node.
    pub fn step(&mut self, source: NodeId, link: &str, target: &str) -> NodeId {
        self.step_dir(source, link, Direction::Outbound, target)
    }

    /// Follows a link in `direction` from `source` to a new `target` node.
    pub fn step_dir(
        &mut self,
        source: NodeId,
        link: &str,
        direction: Direction,
        target: &str,
    ) -> NodeId {
        let link_id = self.dangling(source, link, direction, target);
        let path_id = self
            .graph
            .node(source)
            .path_id
            .extend(link, direction, Some(TypeName::from(target)));
        let mut node = EntityNode::new(path_id, TypeName::from(target));
        node.users.insert(self.clause);
        node.rlink = Some(link_id);
        let node_id = self.graph.add_node(node);
        self.graph.link_mut(link_id).target = Some(node_id);
        node_id
    }

    /// Builds a root followed by outbound `(link, target)` steps and returns
    /// the last node.
    pub fn path(&mut self, concept: &str, steps: &[(&str, &str)]) -> NodeId {
        let mut current = self.root(concept);
        for (link, target) in steps {
            current = self.step(current, link, target);
        }
        current
    }

    /// Adds a link from `source` without a target node.
    pub fn dangling(
        &mut self,
        source: NodeId,
        link: &str,
        direction: Direction,
        target_type: &str,
    ) -> LinkId {
        let mut edge = LinkEdge::new(
            source,
            LinkName::from(link),
            direction,
            TypeName::from(target_type),
        );
        edge.users.insert(self.clause);
        let link_id = self.graph.add_link(edge);
        self.graph
            .node_mut(source)
            .disjunction
            .insert(Fragment::Link(link_id));
        link_id
    }

    /// Sets the alias of an existing node.
    pub fn alias(&mut self, node: NodeId, alias: &str) -> &mut Self {
        self.graph.node_mut(node).alias = Some(alias.to_owned());
        self
    }

    /// Link that produced `node`.
    pub fn rlink(&self, node: NodeId) -> Option<LinkId> {
        self.graph.node(node).rlink
    }

    /// Read access to the graph under construction.
    pub fn graph(&self) -> &PathGraph {
        &self.graph
    }

    /// Mutable access to the graph under construction.
    pub fn graph_mut(&mut self) -> &mut PathGraph {
        &mut self.graph
    }

    /// Returns the finished arena.
    pub fn finish(self) -> PathGraph {
        self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_wires_link_and_target() {
        let mut builder = IrBuilder::new();
        let user = builder.root("User");
        let friend = builder.step(user, "friends", "User");
        let link = builder.rlink(friend).expect("rlink");
        let graph = builder.finish();

        assert_eq!(graph.link(link).source, user);
        assert_eq!(graph.link(link).target, Some(friend));
        assert!(graph.node(user).disjunction.contains(&Fragment::Link(link)));
        assert_eq!(graph.node(friend).path_id.to_string(), "User.>friends[User]");
        assert!(graph.node(friend).users.contains(&ClauseKind::Generator));
    }

    #[test]
    fn clause_tags_new_entities() {
        let mut builder = IrBuilder::new();
        builder.clause(ClauseKind::Selector);
        let name = builder.path("User", &[("owner", "Org")]);
        let graph = builder.finish();
        assert_eq!(
            graph.node(name).users.iter().copied().collect::<Vec<_>>(),
            vec![ClauseKind::Selector]
        );
    }

    #[test]
    fn identical_paths_start_distinct() {
        let mut builder = IrBuilder::new();
        let a = builder.path("User", &[("friends", "User")]);
        let b = builder.path("User", &[("friends", "User")]);
        assert_ne!(a, b);
        assert_eq!(builder.graph().node_count(), 4);
    }
}
