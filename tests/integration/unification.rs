#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::sync::Once;

use pathmerge::ir::{
    ClauseKind, FlatSchema, Fragment, IrBuilder, LinkId, NodeId, Operator, PathSet, SelectorExpr,
    Span,
};
use pathmerge::merge::minimize_disjunction;
use pathmerge::{CompileError, Compiler, Expr, MergeConfig, Query};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("pathmerge=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

fn filter_text(query: &Query, node: NodeId) -> Option<String> {
    query.graph.node(node).filter.as_ref().map(ToString::to_string)
}

#[test]
fn and_filters_on_one_alias_share_a_node() {
    init_tracing();
    let mut builder = IrBuilder::new();
    let a1 = builder.root("User");
    let a2 = builder.root("User");
    let mut query = Query::new(builder.finish()).with_generator(Expr::and(
        Expr::filter(a1, "x", Operator::Eq, 1),
        Expr::filter(a2, "x", Operator::Eq, 2),
    ));

    let output = Compiler::new(&FlatSchema).compile(&mut query).expect("compile");

    assert_eq!(query.graph.node_count(), 1);
    assert_eq!(query.generator, Some(Expr::InlineFilter { node: a1 }));
    assert_eq!(
        filter_text(&query, a1).as_deref(),
        Some("((x) = (1)) AND ((x) = (2))")
    );
    assert_eq!(output.redirects.nodes.get(&a2), Some(&a1));
}

#[test]
fn or_filters_share_one_fixed_edge() {
    init_tracing();
    let mut builder = IrBuilder::new();
    let f1 = builder.path("User", &[("friends", "User")]);
    let f2 = builder.path("User", &[("friends", "User")]);
    let root = builder.graph().root_of(f1);
    let link = builder.rlink(f1).expect("rlink");
    let other_link = builder.rlink(f2).expect("rlink");
    let mut query = Query::new(builder.finish()).with_generator(Expr::or(
        Expr::filter(f1, "name", Operator::Eq, "Bob"),
        Expr::filter(f2, "age", Operator::Gt, 30),
    ));

    let output = Compiler::new(&FlatSchema).compile(&mut query).expect("compile");

    assert_eq!(query.graph.node_count(), 2);
    assert_eq!(query.graph.link_count(), 1);
    assert_eq!(output.redirects.links.get(&other_link), Some(&link));
    let root_entry = query.graph.node(root);
    assert!(root_entry.conjunction.is_empty());
    assert_eq!(root_entry.disjunction.paths(), &[Fragment::Link(link)]);
    assert!(root_entry.disjunction.fixed);
    assert_eq!(
        filter_text(&query, f1).as_deref(),
        Some("((name) = (\"Bob\")) OR ((age) > (30))")
    );
    assert_eq!(output.explain.roots.len(), 1);
}

#[test]
fn shared_edge_is_factored_out_of_disjunction() {
    let p1 = Fragment::Link(LinkId(1));
    let p2 = Fragment::Link(LinkId(2));
    let p3 = Fragment::Link(LinkId(3));
    let terms = [
        Fragment::Conjunction(PathSet::from_paths([p1.clone(), p2.clone()])),
        Fragment::Conjunction(PathSet::from_paths([p1.clone(), p3.clone()])),
    ];

    let factored = minimize_disjunction(&terms, true);
    assert_eq!(factored.len(), 1);
    assert_eq!(
        factored.paths(),
        &[Fragment::Conjunction(PathSet::from_paths([
            p1,
            Fragment::Disjunction(PathSet::from_paths([p2, p3])),
        ]))]
    );

    let unfactored = minimize_disjunction(&terms, false);
    assert_eq!(unfactored.len(), 2);
}

#[test]
fn selector_targets_merge_when_aliases_agree() {
    init_tracing();
    let mut builder = IrBuilder::new();
    builder.clause(ClauseKind::Selector);
    let a1 = builder.root("User");
    let a2 = builder.root("User");
    let mut query = Query::new(builder.finish());
    query.selector.push(SelectorExpr::aliased(Expr::attr(a1, "id"), "first"));
    query.selector.push(SelectorExpr::aliased(Expr::attr(a2, "id"), "second"));

    Compiler::new(&FlatSchema).compile(&mut query).expect("compile");

    assert_eq!(query.graph.node_count(), 1);
    assert_eq!(query.selector[1].expr, Expr::attr(a1, "id"));
    assert_eq!(query.selector[1].alias.as_deref(), Some("second"));
}

#[test]
fn conflicting_aliases_keep_nodes_apart() {
    let mut builder = IrBuilder::new();
    builder.clause(ClauseKind::Selector);
    let a1 = builder.aliased_root("User", "u1");
    let a2 = builder.aliased_root("User", "u2");
    let mut query = Query::new(builder.finish())
        .select(Expr::attr(a1, "id"))
        .select(Expr::attr(a2, "id"));

    let output = Compiler::new(&FlatSchema).compile(&mut query).expect("compile");

    assert_eq!(query.graph.node_count(), 2);
    assert!(output.redirects.nodes.is_empty());
    assert_eq!(output.explain.roots.len(), 2);
}

#[test]
fn aggregate_mixed_with_row_filter_is_rejected() {
    let mut builder = IrBuilder::new();
    let a = builder.root("User");
    let span = Span::new(7, 31);
    let generator = Expr::and(
        Expr::aggregate("count", vec![Expr::attr(a, "x")]),
        Expr::filter(a, "y", Operator::Eq, 1),
    )
    .with_span(span);
    let mut query = Query::new(builder.finish()).with_generator(generator);

    let err = Compiler::new(&FlatSchema)
        .compile(&mut query)
        .expect_err("aggregate mix");

    assert_eq!(err, CompileError::AggregateMix { span: Some(span) });
    assert_eq!(err.code(), "AggregateMix");
    assert!(!err.is_internal());
}

#[test]
fn aggregate_compared_to_constant_compiles() {
    let mut builder = IrBuilder::new();
    let a = builder.root("User");
    let generator = Expr::binop(
        Expr::aggregate("count", vec![Expr::attr(a, "x")]),
        Operator::Gt,
        Expr::constant(1),
    );
    let mut query = Query::new(builder.finish()).with_generator(generator);

    Compiler::new(&FlatSchema).compile(&mut query).expect("compile");

    assert!(query.generator.as_ref().is_some_and(Expr::is_aggregating));
}

#[test]
fn clauses_unify_with_the_generator() {
    init_tracing();
    let mut builder = IrBuilder::new();
    let filtered = builder.root("User");
    builder.clause(ClauseKind::Selector);
    let selected = builder.root("User");
    builder.clause(ClauseKind::Sorter);
    let sorted = builder.root("User");
    let mut query = Query::new(builder.finish())
        .with_generator(Expr::filter(filtered, "active", Operator::Eq, true))
        .select(Expr::attr(selected, "name"))
        .order_by(Expr::attr(sorted, "age"));

    let output = Compiler::with_config(&FlatSchema, MergeConfig::debugging())
        .compile(&mut query)
        .expect("compile");

    assert_eq!(query.graph.node_count(), 1);
    assert_eq!(output.stats.nodes_merged(), 2);
    assert_eq!(query.selector[0].expr, Expr::attr(filtered, "name"));
    assert_eq!(query.sorter[0].expr, Expr::attr(filtered, "age"));
    let users: Vec<ClauseKind> = query.graph.node(filtered).users.iter().copied().collect();
    assert_eq!(
        users,
        vec![ClauseKind::Generator, ClauseKind::Selector, ClauseKind::Sorter]
    );
    let refs: Vec<&str> = query
        .graph
        .node(filtered)
        .atomrefs
        .iter()
        .map(String::as_str)
        .collect();
    assert_eq!(refs, vec!["active", "age", "name"]);
}

#[test]
fn lone_node_selector_acts_as_generator() {
    let mut builder = IrBuilder::new();
    builder.clause(ClauseKind::Selector);
    let org = builder.path("User", &[("owner", "Org")]);
    let root = builder.graph().root_of(org);
    let link = builder.rlink(org).expect("rlink");
    let mut query = Query::new(builder.finish()).select(Expr::node(org));

    Compiler::new(&FlatSchema).compile(&mut query).expect("compile");

    let root_entry = query.graph.node(root);
    assert!(root_entry.users.contains(&ClauseKind::Generator));
    assert_eq!(root_entry.conjunction.paths(), &[Fragment::Link(link)]);
    assert!(root_entry.disjunction.is_empty());
}

#[test]
fn plain_selector_paths_stay_optional() {
    let mut builder = IrBuilder::new();
    builder.clause(ClauseKind::Selector);
    let org = builder.path("User", &[("owner", "Org")]);
    let root = builder.graph().root_of(org);
    let link = builder.rlink(org).expect("rlink");
    let mut query = Query::new(builder.finish()).select(Expr::attr(org, "name"));

    Compiler::new(&FlatSchema).compile(&mut query).expect("compile");

    let root_entry = query.graph.node(root);
    assert!(!root_entry.users.contains(&ClauseKind::Generator));
    assert!(root_entry.conjunction.is_empty());
    assert_eq!(root_entry.disjunction.paths(), &[Fragment::Link(link)]);
}

#[test]
fn corrupted_graph_aborts_the_compile() {
    let mut builder = IrBuilder::new();
    let user = builder.root("User");
    builder
        .graph_mut()
        .node_mut(user)
        .disjunction
        .insert(Fragment::Link(LinkId(42)));
    let mut query = Query::new(builder.finish());

    let err = Compiler::new(&FlatSchema)
        .compile(&mut query)
        .expect_err("unknown link");

    assert!(err.is_internal());
    assert_eq!(err.code(), "InternalError");
}

#[test]
fn dangling_link_under_filtered_root_is_an_error() {
    let mut builder = IrBuilder::new();
    let user = builder.root("User");
    builder
        .graph_mut()
        .node_mut(user)
        .disjunction
        .insert(Fragment::Link(LinkId(42)));
    let mut query =
        Query::new(builder.finish()).with_generator(Expr::filter(user, "x", Operator::Eq, 1));

    let err = Compiler::new(&FlatSchema)
        .compile(&mut query)
        .expect_err("unknown link");

    assert!(err.is_internal());
    assert!(err.to_string().contains("link"));
}

#[test]
fn clause_holding_unknown_node_is_an_error() {
    let mut builder = IrBuilder::new();
    builder.root("User");
    let mut query = Query::new(builder.finish())
        .with_generator(Expr::filter(NodeId(99), "x", Operator::Eq, 1));

    let err = Compiler::new(&FlatSchema)
        .compile(&mut query)
        .expect_err("unknown node");

    assert!(matches!(err, CompileError::Invariant(_)));
    assert_eq!(query.graph.node_count(), 1);
}

#[test]
fn recursion_bound_comes_from_config() {
    let mut builder = IrBuilder::new();
    let user = builder.root("User");
    let mut expr = Expr::filter(user, "x", Operator::Eq, 0);
    for _ in 0..8 {
        expr = Expr::UnaryOp {
            op: Operator::Not,
            expr: Box::new(expr),
        };
    }
    let mut query = Query::new(builder.finish()).with_generator(expr);
    let config = MergeConfig {
        max_depth: 4,
        ..MergeConfig::default()
    };

    let err = Compiler::with_config(&FlatSchema, config)
        .compile(&mut query)
        .expect_err("too deep");

    assert!(matches!(err, CompileError::NestingTooDeep { max: 4, .. }));
}
