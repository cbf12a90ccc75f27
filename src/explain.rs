//! Human-readable dump of a merged path graph.
//!
//! Every query root becomes one tree. Links hang under the node they start
//! from, tagged with the membership (`required` for conjunction members,
//! `optional` for disjunction members), and their target hangs under them.

use std::fmt;
use std::hash::Hasher;

use rustc_hash::FxHashSet;
use serde::Serialize;
use xxhash_rust::xxh64::Xxh64;

use crate::ir::{Fragment, LinkId, NodeId, PathGraph};

/// Explain trees for every root of a graph.
#[derive(Clone, Debug, Serialize)]
pub struct GraphExplain {
    /// One tree per query root, in allocation order.
    pub roots: Vec<ExplainNode>,
    /// Deterministic hash of the rendered trees.
    pub graph_hash: u64,
}

/// Explain node describing one entity or path combination.
#[derive(Clone, Debug, Serialize)]
pub struct ExplainNode {
    /// Entity kind
    pub op: String,
    /// Key/value details
    pub props: Vec<ExplainProp>,
    /// Children
    pub inputs: Vec<ExplainNode>,
}

impl ExplainNode {
    /// Creates a node with the given kind.
    pub fn new(op: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            props: Vec::new(),
            inputs: Vec::new(),
        }
    }

    fn prop(mut self, key: &str, value: impl Into<String>) -> Self {
        self.props.push(ExplainProp {
            key: key.to_owned(),
            value: value.into(),
        });
        self
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        write!(f, "{:indent$}{}", "", self.op, indent = depth * 2)?;
        if !self.props.is_empty() {
            f.write_str(" [")?;
            for (idx, prop) in self.props.iter().enumerate() {
                if idx > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}={}", prop.key, prop.value)?;
            }
            f.write_str("]")?;
        }
        writeln!(f)?;
        for input in &self.inputs {
            input.fmt_indented(f, depth + 1)?;
        }
        Ok(())
    }

    fn hash_into(&self, hasher: &mut Xxh64) {
        hasher.write(self.op.as_bytes());
        for prop in &self.props {
            hasher.write(prop.key.as_bytes());
            hasher.write(prop.value.as_bytes());
        }
        hasher.write_u64(self.inputs.len() as u64);
        for input in &self.inputs {
            input.hash_into(hasher);
        }
    }
}

/// Single property of an [`ExplainNode`].
#[derive(Clone, Debug, Serialize)]
pub struct ExplainProp {
    /// Property key.
    pub key: String,
    /// Property value rendered for display.
    pub value: String,
}

impl GraphExplain {
    /// Builds the explain trees of every live root in `graph`.
    pub fn build(graph: &PathGraph) -> Self {
        let mut builder = TreeBuilder {
            graph,
            seen_nodes: FxHashSet::default(),
            seen_links: FxHashSet::default(),
        };
        let roots: Vec<ExplainNode> = graph
            .live_nodes()
            .filter(|node| graph.node(*node).rlink.is_none())
            .map(|node| builder.node(node, None))
            .collect();
        let mut hasher = Xxh64::new(0);
        hasher.write_u64(roots.len() as u64);
        for root in &roots {
            root.hash_into(&mut hasher);
        }
        Self {
            roots,
            graph_hash: hasher.finish(),
        }
    }

    /// Pretty-printed JSON rendering.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for GraphExplain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for root in &self.roots {
            root.fmt_indented(f, 0)?;
        }
        Ok(())
    }
}

struct TreeBuilder<'a> {
    graph: &'a PathGraph,
    seen_nodes: FxHashSet<NodeId>,
    seen_links: FxHashSet<LinkId>,
}

impl TreeBuilder<'_> {
    fn node(&mut self, id: NodeId, membership: Option<&str>) -> ExplainNode {
        let id = self.graph.resolve_node(id);
        let entry = self.graph.node(id);
        let mut out = ExplainNode::new("Node")
            .prop("id", id.to_string())
            .prop("path", entry.path_id.to_string())
            .prop("concept", entry.concept.to_string());
        if let Some(membership) = membership {
            out = out.prop("membership", membership);
        }
        if let Some(alias) = &entry.alias {
            out = out.prop("alias", alias.clone());
        }
        if let Some(filter) = &entry.filter {
            out = out.prop("filter", filter.to_string());
        }
        if !entry.users.is_empty() {
            let users: Vec<&str> = entry.users.iter().map(|u| u.as_str()).collect();
            out = out.prop("users", users.join("|"));
        }
        if !entry.atomrefs.is_empty() {
            let refs: Vec<&str> = entry.atomrefs.iter().map(String::as_str).collect();
            out = out.prop("refs", refs.join("|"));
        }
        if entry.disjunction.fixed {
            out = out.prop("fixed", "true");
        }
        if !self.seen_nodes.insert(id) {
            return out.prop("repeat", "true");
        }
        for member in entry.conjunction.iter() {
            out.inputs.push(self.fragment(member, "required"));
        }
        for member in entry.disjunction.iter() {
            out.inputs.push(self.fragment(member, "optional"));
        }
        out
    }

    fn link(&mut self, id: LinkId, membership: &str) -> ExplainNode {
        let id = self.graph.resolve_link(id);
        let edge = self.graph.link(id);
        let mut out = ExplainNode::new("Link")
            .prop("id", id.to_string())
            .prop("name", edge.link.to_string())
            .prop("dir", edge.direction.to_string())
            .prop("membership", membership);
        if let Some(filter) = &edge.propfilter {
            out = out.prop("propfilter", filter.to_string());
        }
        if !self.seen_links.insert(id) {
            return out.prop("repeat", "true");
        }
        match edge.target {
            Some(target) => out.inputs.push(self.node(target, None)),
            None => out = out.prop("target", edge.target_type.to_string()),
        }
        out
    }

    fn fragment(&mut self, fragment: &Fragment, membership: &str) -> ExplainNode {
        match fragment {
            Fragment::Node(node) => self.node(*node, Some(membership)),
            Fragment::Link(link) => self.link(*link, membership),
            Fragment::Conjunction(set) | Fragment::Disjunction(set) => {
                let op = if matches!(fragment, Fragment::Conjunction(_)) {
                    "Conjunction"
                } else {
                    "Disjunction"
                };
                let mut out = ExplainNode::new(op).prop("membership", membership);
                if set.fixed {
                    out = out.prop("fixed", "true");
                }
                for member in set.iter() {
                    out.inputs.push(self.fragment(member, membership));
                }
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IrBuilder;

    #[test]
    fn renders_indented_tree() {
        let mut builder = IrBuilder::new();
        let user = builder.root("User");
        builder.step(user, "friends", "User");
        let graph = builder.finish();
        let explain = GraphExplain::build(&graph);
        assert_eq!(explain.roots.len(), 1);
        let text = explain.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Node [id=n0, path=User"));
        assert!(lines[1].starts_with("  Link [id=l0, name=friends, dir=>, membership=optional"));
        assert!(lines[2].starts_with("    Node [id=n1, path=User.>friends[User]"));
    }

    #[test]
    fn hash_is_stable_and_json_serializes() {
        let mut builder = IrBuilder::new();
        builder.path("User", &[("owner", "Org")]);
        let graph = builder.finish();
        let a = GraphExplain::build(&graph);
        let b = GraphExplain::build(&graph);
        assert_eq!(a.graph_hash, b.graph_hash);
        let json = a.to_json().expect("json");
        let value: serde_json::Value = serde_json::from_str(&json).expect("parse");
        assert_eq!(value["roots"][0]["op"], "Node");
    }
}
