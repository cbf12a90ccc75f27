//! Arena-backed path graph.
//!
//! Entity nodes and link edges live in two vectors and refer to each other by
//! index. Merging never frees a slot: the absorbed id is recorded in the
//! [`RedirectMap`] and every later lookup goes through [`PathGraph::resolve`]
//! or one of its typed variants.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use rustc_hash::FxHashMap;
use serde::Serialize;

use super::expr::{ClauseKind, Expr};
use super::path_id::{Direction, LinkName, PathId, TypeName};

/// Arena index of an [`EntityNode`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
pub struct NodeId(pub u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Arena index of a [`LinkEdge`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
pub struct LinkId(pub u32);

impl LinkId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "l{}", self.0)
    }
}

/// Which set operation a [`PathSet`] denotes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
pub enum SetKind {
    /// Every member must hold.
    Conjunction,
    /// At least one member contributes.
    Disjunction,
}

impl fmt::Display for SetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetKind::Conjunction => f.write_str("Conjunction"),
            SetKind::Disjunction => f.write_str("Disjunction"),
        }
    }
}

/// A path fragment: a graph entity or a combination of fragments.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize)]
pub enum Fragment {
    /// Entity node.
    Node(NodeId),
    /// Link edge.
    Link(LinkId),
    /// All members must hold.
    Conjunction(PathSet),
    /// At least one member contributes.
    Disjunction(PathSet),
}

impl Fragment {
    /// Wraps `set` as a fragment of the given kind.
    pub fn set(kind: SetKind, set: PathSet) -> Self {
        match kind {
            SetKind::Conjunction => Fragment::Conjunction(set),
            SetKind::Disjunction => Fragment::Disjunction(set),
        }
    }

    /// Returns `true` for node and link fragments.
    pub fn is_entity(&self) -> bool {
        matches!(self, Fragment::Node(_) | Fragment::Link(_))
    }

    /// Set kind for combinations, `None` for entities.
    pub fn kind(&self) -> Option<SetKind> {
        match self {
            Fragment::Conjunction(_) => Some(SetKind::Conjunction),
            Fragment::Disjunction(_) => Some(SetKind::Disjunction),
            Fragment::Node(_) | Fragment::Link(_) => None,
        }
    }

    /// Rewrites stored ids to their survivors.
    pub fn remap(&mut self, redirects: &RedirectMap) {
        match self {
            Fragment::Node(node) => *node = redirects.node(*node),
            Fragment::Link(link) => *link = redirects.link(*link),
            Fragment::Conjunction(set) | Fragment::Disjunction(set) => set.remap(redirects),
        }
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fragment::Node(node) => write!(f, "{node}"),
            Fragment::Link(link) => write!(f, "{link}"),
            Fragment::Conjunction(set) => write!(f, "Conjunction{set}"),
            Fragment::Disjunction(set) => write!(f, "Disjunction{set}"),
        }
    }
}

/// Insertion-ordered, duplicate-free fragment set.
///
/// `fixed` only matters for disjunctions: a fixed disjunction came from an
/// explicit OR and must never be collapsed into a conjunction.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize)]
pub struct PathSet {
    paths: Vec<Fragment>,
    /// Explicit-OR marker.
    pub fixed: bool,
}

impl PathSet {
    /// Empty, unfixed set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from fragments, dropping duplicates.
    pub fn from_paths(paths: impl IntoIterator<Item = Fragment>) -> Self {
        let mut set = Self::new();
        for path in paths {
            set.insert(path);
        }
        set
    }

    /// Inserts a fragment, returning `false` if it was already present.
    pub fn insert(&mut self, path: Fragment) -> bool {
        if self.paths.contains(&path) {
            return false;
        }
        self.paths.push(path);
        true
    }

    /// Inserts `path`, splicing in its members when it is a set of `kind`.
    pub fn update(&mut self, kind: SetKind, path: Fragment) {
        match path {
            Fragment::Conjunction(set) if kind == SetKind::Conjunction => {
                self.extend(set.paths)
            }
            Fragment::Disjunction(set) if kind == SetKind::Disjunction => {
                self.fixed |= set.fixed;
                self.extend(set.paths)
            }
            other => {
                self.insert(other);
            }
        }
    }

    /// Membership test.
    pub fn contains(&self, path: &Fragment) -> bool {
        self.paths.contains(path)
    }

    /// Removes `path` if present.
    pub fn remove(&mut self, path: &Fragment) -> bool {
        let before = self.paths.len();
        self.paths.retain(|p| p != path);
        before != self.paths.len()
    }

    /// Keeps only the members for which `keep` returns `true`.
    pub fn retain(&mut self, keep: impl FnMut(&Fragment) -> bool) {
        self.paths.retain(keep);
    }

    /// Member count.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Returns `true` if the set has no members.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Members in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Fragment> {
        self.paths.iter()
    }

    /// Members as a slice.
    pub fn paths(&self) -> &[Fragment] {
        &self.paths
    }

    /// Consumes the set, returning its members.
    pub fn into_paths(self) -> Vec<Fragment> {
        self.paths
    }

    /// Empties the set and clears the fixed flag.
    pub fn clear(&mut self) {
        self.paths.clear();
        self.fixed = false;
    }

    /// Rewrites member ids to their survivors and re-deduplicates.
    pub fn remap(&mut self, redirects: &RedirectMap) {
        let paths = std::mem::take(&mut self.paths);
        for mut path in paths {
            path.remap(redirects);
            self.insert(path);
        }
    }
}

impl Extend<Fragment> for PathSet {
    fn extend<T: IntoIterator<Item = Fragment>>(&mut self, iter: T) {
        for path in iter {
            self.insert(path);
        }
    }
}

impl FromIterator<Fragment> for PathSet {
    fn from_iter<T: IntoIterator<Item = Fragment>>(iter: T) -> Self {
        Self::from_paths(iter)
    }
}

impl<'a> IntoIterator for &'a PathSet {
    type Item = &'a Fragment;
    type IntoIter = std::slice::Iter<'a, Fragment>;

    fn into_iter(self) -> Self::IntoIter {
        self.paths.iter()
    }
}

impl fmt::Display for PathSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (idx, path) in self.paths.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{path}")?;
        }
        f.write_str("}")?;
        if self.fixed {
            f.write_str("!")?;
        }
        Ok(())
    }
}

/// Bound set of entities reached at a [`PathId`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EntityNode {
    /// Traversal identity of the node.
    pub path_id: PathId,
    /// Declared alias, if any.
    pub alias: Option<String>,
    /// Schema type of the entities.
    pub concept: TypeName,
    /// Scalar predicate over the node's attributes.
    pub filter: Option<Expr>,
    /// Outgoing paths that constrain the result.
    pub conjunction: PathSet,
    /// Outgoing paths that only contribute values.
    pub disjunction: PathSet,
    /// Attribute names referenced through this node.
    pub atomrefs: BTreeSet<String>,
    /// Derived type attributes referenced through this node.
    pub metarefs: BTreeSet<String>,
    /// Clauses that referenced this node.
    pub users: BTreeSet<ClauseKind>,
    /// Nodes join-equated with this one.
    pub joins: BTreeSet<NodeId>,
    /// Link that produced this node, `None` for roots.
    pub rlink: Option<LinkId>,
    /// Outer-query node this one was copied from.
    pub origin: Option<NodeId>,
}

impl EntityNode {
    /// Unfiltered node at `path_id`.
    pub fn new(path_id: PathId, concept: TypeName) -> Self {
        Self {
            path_id,
            alias: None,
            concept,
            filter: None,
            conjunction: PathSet::new(),
            disjunction: PathSet::new(),
            atomrefs: BTreeSet::new(),
            metarefs: BTreeSet::new(),
            users: BTreeSet::new(),
            joins: BTreeSet::new(),
            rlink: None,
            origin: None,
        }
    }
}

/// One relationship traversal step.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LinkEdge {
    /// Relationship name.
    pub link: LinkName,
    /// Traversal direction.
    pub direction: Direction,
    /// Declared target type.
    pub target_type: TypeName,
    /// Node the traversal starts from.
    pub source: NodeId,
    /// Node reached by the traversal, `None` for dangling references.
    pub target: Option<NodeId>,
    /// Computed-value override.
    pub computed: Option<Expr>,
    /// Predicate over link properties.
    pub propfilter: Option<Expr>,
    /// Link property names referenced through this edge.
    pub proprefs: BTreeSet<String>,
    /// Clauses that referenced this edge.
    pub users: BTreeSet<ClauseKind>,
}

impl LinkEdge {
    /// Dangling edge from `source`.
    pub fn new(
        source: NodeId,
        link: LinkName,
        direction: Direction,
        target_type: TypeName,
    ) -> Self {
        Self {
            link,
            direction,
            target_type,
            source,
            target: None,
            computed: None,
            propfilter: None,
            proprefs: BTreeSet::new(),
            users: BTreeSet::new(),
        }
    }
}

/// Absorbed id to survivor id, for nodes and links.
///
/// Lookups follow chains, so recording `a -> b` after `b -> c` makes `a`
/// resolve to `c`.
#[derive(Clone, Debug, Default)]
pub struct RedirectMap {
    nodes: FxHashMap<NodeId, NodeId>,
    links: FxHashMap<LinkId, LinkId>,
}

impl RedirectMap {
    /// Current survivor of `id`.
    pub fn node(&self, mut id: NodeId) -> NodeId {
        while let Some(next) = self.nodes.get(&id) {
            id = *next;
        }
        id
    }

    /// Current survivor of `id`.
    pub fn link(&self, mut id: LinkId) -> LinkId {
        while let Some(next) = self.links.get(&id) {
            id = *next;
        }
        id
    }

    /// Returns `true` if `id` was absorbed.
    pub fn is_node_redirected(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Returns `true` if `id` was absorbed.
    pub fn is_link_redirected(&self, id: LinkId) -> bool {
        self.links.contains_key(&id)
    }

    fn record_node(&mut self, from: NodeId, to: NodeId) {
        if from != to {
            self.nodes.insert(from, to);
        }
    }

    fn record_link(&mut self, from: LinkId, to: LinkId) {
        if from != to {
            self.links.insert(from, to);
        }
    }

    /// Number of absorbed ids.
    pub fn len(&self) -> usize {
        self.nodes.len() + self.links.len()
    }

    /// Returns `true` when nothing was absorbed.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.links.is_empty()
    }

    /// Chain-free copy keyed in id order.
    pub fn flattened(&self) -> Redirects {
        Redirects {
            nodes: self.nodes.keys().map(|id| (*id, self.node(*id))).collect(),
            links: self.links.keys().map(|id| (*id, self.link(*id))).collect(),
        }
    }
}

/// Flattened redirect table handed to callers holding pre-merge ids.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Redirects {
    /// Absorbed node to live node.
    pub nodes: BTreeMap<NodeId, NodeId>,
    /// Absorbed link to live link.
    pub links: BTreeMap<LinkId, LinkId>,
}

/// Arena of nodes and links plus the redirects recorded while merging.
#[derive(Clone, Debug, Default)]
pub struct PathGraph {
    nodes: Vec<EntityNode>,
    links: Vec<LinkEdge>,
    redirects: RedirectMap,
}

impl PathGraph {
    /// Empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a node.
    pub fn add_node(&mut self, node: EntityNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Allocates a link.
    pub fn add_link(&mut self, link: LinkEdge) -> LinkId {
        let id = LinkId(self.links.len() as u32);
        self.links.push(link);
        id
    }

    /// Node slot for `id`, live or absorbed.
    ///
    /// Ids are only ever handed out by this arena, so an out-of-range id is
    /// a caller bug and panics like slice indexing.
    pub fn node(&self, id: NodeId) -> &EntityNode {
        &self.nodes[id.index()]
    }

    /// Mutable node slot for `id`.
    pub fn node_mut(&mut self, id: NodeId) -> &mut EntityNode {
        &mut self.nodes[id.index()]
    }

    /// Link slot for `id`, live or absorbed.
    pub fn link(&self, id: LinkId) -> &LinkEdge {
        &self.links[id.index()]
    }

    /// Mutable link slot for `id`.
    pub fn link_mut(&mut self, id: LinkId) -> &mut LinkEdge {
        &mut self.links[id.index()]
    }

    /// Returns `true` if `id` was allocated by this arena.
    pub fn has_node(&self, id: NodeId) -> bool {
        id.index() < self.nodes.len()
    }

    /// Returns `true` if `id` was allocated by this arena.
    pub fn has_link(&self, id: LinkId) -> bool {
        id.index() < self.links.len()
    }

    /// Survivor of `id`.
    pub fn resolve_node(&self, id: NodeId) -> NodeId {
        self.redirects.node(id)
    }

    /// Survivor of `id`.
    pub fn resolve_link(&self, id: LinkId) -> LinkId {
        self.redirects.link(id)
    }

    /// Resolves every id inside `fragment`, de-duplicating sets.
    pub fn resolve(&self, fragment: &Fragment) -> Fragment {
        let mut resolved = fragment.clone();
        resolved.remap(&self.redirects);
        resolved
    }

    /// Resolves set members in place.
    pub fn resolve_set(&self, set: &mut PathSet) {
        set.remap(&self.redirects);
    }

    /// Returns `true` if `id` exists and was not absorbed.
    pub fn is_live_node(&self, id: NodeId) -> bool {
        self.has_node(id) && !self.redirects.is_node_redirected(id)
    }

    /// Returns `true` if `id` exists and was not absorbed.
    pub fn is_live_link(&self, id: LinkId) -> bool {
        self.has_link(id) && !self.redirects.is_link_redirected(id)
    }

    /// Live node ids in allocation order.
    pub fn live_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len() as u32)
            .map(NodeId)
            .filter(|id| !self.redirects.is_node_redirected(*id))
    }

    /// Live link ids in allocation order.
    pub fn live_links(&self) -> impl Iterator<Item = LinkId> + '_ {
        (0..self.links.len() as u32)
            .map(LinkId)
            .filter(|id| !self.redirects.is_link_redirected(*id))
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.redirects.nodes.len()
    }

    /// Number of live links.
    pub fn link_count(&self) -> usize {
        self.links.len() - self.redirects.links.len()
    }

    /// Redirects recorded so far.
    pub fn redirects(&self) -> &RedirectMap {
        &self.redirects
    }

    /// Records that `absorbed` now lives on as `survivor`.
    pub(crate) fn absorb_node(&mut self, absorbed: NodeId, survivor: NodeId) {
        self.redirects.record_node(absorbed, survivor);
    }

    /// Records that `absorbed` now lives on as `survivor`.
    pub(crate) fn absorb_link(&mut self, absorbed: LinkId, survivor: LinkId) {
        self.redirects.record_link(absorbed, survivor);
    }

    /// Walks `rlink` back-references up to the query root.
    pub fn root_of(&self, node: NodeId) -> NodeId {
        let mut current = self.resolve_node(node);
        let mut hops = 0;
        while let Some(rlink) = self.node(current).rlink {
            let source = self.resolve_node(self.link(self.resolve_link(rlink)).source);
            // rlink chains are acyclic by construction; the hop bound only
            // guards against hand-built graphs
            if source == current || hops > self.nodes.len() {
                break;
            }
            current = source;
            hops += 1;
        }
        current
    }

    /// Rewrites every stored id of every live entity to its survivor.
    pub fn finalize(&mut self) {
        let redirects = std::mem::take(&mut self.redirects);
        for idx in 0..self.nodes.len() {
            let id = NodeId(idx as u32);
            if redirects.is_node_redirected(id) {
                continue;
            }
            let node = &mut self.nodes[idx];
            node.conjunction.remap(&redirects);
            node.disjunction.remap(&redirects);
            node.rlink = node.rlink.map(|link| redirects.link(link));
            node.origin = node.origin.map(|origin| redirects.node(origin));
            node.joins = node
                .joins
                .iter()
                .map(|join| redirects.node(*join))
                .filter(|join| *join != id)
                .collect();
            if let Some(filter) = &mut node.filter {
                filter.remap(&redirects);
            }
        }
        for idx in 0..self.links.len() {
            if redirects.is_link_redirected(LinkId(idx as u32)) {
                continue;
            }
            let link = &mut self.links[idx];
            link.source = redirects.node(link.source);
            link.target = link.target.map(|target| redirects.node(target));
            if let Some(filter) = &mut link.propfilter {
                filter.remap(&redirects);
            }
            if let Some(computed) = &mut link.computed {
                computed.remap(&redirects);
            }
        }
        self.redirects = redirects;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(graph: &mut PathGraph, root: &str) -> NodeId {
        graph.add_node(EntityNode::new(PathId::root(root), TypeName::from(root)))
    }

    #[test]
    fn path_set_is_insertion_ordered_and_unique() {
        let mut set = PathSet::new();
        assert!(set.insert(Fragment::Node(NodeId(2))));
        assert!(set.insert(Fragment::Node(NodeId(1))));
        assert!(!set.insert(Fragment::Node(NodeId(2))));
        assert_eq!(
            set.paths(),
            &[Fragment::Node(NodeId(2)), Fragment::Node(NodeId(1))]
        );
    }

    #[test]
    fn update_splices_same_kind_only() {
        let inner = PathSet::from_paths([Fragment::Node(NodeId(1)), Fragment::Node(NodeId(2))]);
        let mut set = PathSet::new();
        set.update(SetKind::Disjunction, Fragment::Disjunction(inner.clone()));
        assert_eq!(set.len(), 2);
        set.update(SetKind::Disjunction, Fragment::Conjunction(inner));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn redirects_follow_chains() {
        let mut graph = PathGraph::new();
        let a = node(&mut graph, "A");
        let b = node(&mut graph, "A");
        let c = node(&mut graph, "A");
        graph.absorb_node(c, b);
        graph.absorb_node(b, a);
        assert_eq!(graph.resolve_node(c), a);
        assert_eq!(graph.node_count(), 1);
        let flat = graph.redirects().flattened();
        assert_eq!(flat.nodes.get(&c), Some(&a));
        assert_eq!(flat.nodes.get(&b), Some(&a));
    }

    #[test]
    fn remap_deduplicates_members() {
        let mut graph = PathGraph::new();
        let a = node(&mut graph, "A");
        let b = node(&mut graph, "A");
        graph.absorb_node(b, a);
        let set = Fragment::Disjunction(PathSet::from_paths([
            Fragment::Node(a),
            Fragment::Node(b),
        ]));
        assert_eq!(
            graph.resolve(&set),
            Fragment::Disjunction(PathSet::from_paths([Fragment::Node(a)]))
        );
    }

    #[test]
    fn finalize_rewrites_link_endpoints() {
        let mut graph = PathGraph::new();
        let a = node(&mut graph, "A");
        let b = node(&mut graph, "A");
        let link = graph.add_link(LinkEdge::new(
            b,
            LinkName::from("owner"),
            Direction::Outbound,
            TypeName::from("A"),
        ));
        graph.node_mut(a).joins.insert(b);
        graph.absorb_node(b, a);
        graph.finalize();
        assert_eq!(graph.link(link).source, a);
        assert!(graph.node(a).joins.is_empty());
    }
}
