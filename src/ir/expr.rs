//! Expression tree walked by the path-merge pass.
//!
//! Expressions reference graph entities by arena id ([`NodeId`] and
//! [`LinkId`]), never by pointer, so merging two nodes only has to record a
//! redirect. Every id stored in an expression is rewritten to its survivor
//! when the pass finishes.

use std::fmt;

use serde::Serialize;

use super::graph::{Fragment, LinkId, NodeId, PathGraph, RedirectMap};
use super::path_id::TypeName;

/// Byte range of the source text an expression was built from.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
pub struct Span {
    /// Inclusive start offset.
    pub start: usize,
    /// Exclusive end offset.
    pub end: usize,
}

impl Span {
    /// Creates a span covering `start..end`.
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Literal values appearing in predicates.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Literal {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed 64-bit integer value.
    Int(i64),
    /// 64-bit floating point value.
    Float(f64),
    /// String value.
    String(String),
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for Literal {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Literal {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Literal {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => f.write_str("null"),
            Literal::Bool(value) => write!(f, "{value}"),
            Literal::Int(value) => write!(f, "{value}"),
            Literal::Float(value) => write!(f, "{value}"),
            Literal::String(value) => write!(f, "{value:?}"),
        }
    }
}

/// Operators understood by the pass.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
pub enum Operator {
    /// Logical conjunction.
    And,
    /// Logical disjunction.
    Or,
    /// Logical negation.
    Not,
    /// Equality.
    Eq,
    /// Inequality.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
    /// Set membership.
    In,
    /// Negated set membership.
    NotIn,
    /// Pattern match.
    Like,
    /// Type or identity test.
    Is,
    /// Negated type or identity test.
    IsNot,
    /// Addition.
    Add,
    /// Subtraction or negation.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// Remainder.
    Mod,
    /// String or array concatenation.
    Concat,
}

impl Operator {
    /// Returns `true` for operators that never limit the cardinality of
    /// their operands' paths.
    pub fn is_weak(self) -> bool {
        matches!(self, Operator::Or | Operator::In | Operator::NotIn)
    }

    /// Surface spelling of the operator.
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::And => "AND",
            Operator::Or => "OR",
            Operator::Not => "NOT",
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::Like => "LIKE",
            Operator::Is => "IS",
            Operator::IsNot => "IS NOT",
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
            Operator::Mod => "%",
            Operator::Concat => "++",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Query clause a path was referenced from.
///
/// Doubles as the current pass location and as the `users` tag recorded on
/// nodes and links.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
pub enum ClauseKind {
    /// Top-level filter clause.
    Generator,
    /// Result targets.
    Selector,
    /// Ordering clause.
    Sorter,
    /// Grouping clause.
    Grouper,
    /// Values of an insert or update operation.
    OpValues,
    /// Cross-clause unification after every clause has been merged.
    Top,
}

impl ClauseKind {
    /// Lower-case name used in logs and explain output.
    pub fn as_str(self) -> &'static str {
        match self {
            ClauseKind::Generator => "generator",
            ClauseKind::Selector => "selector",
            ClauseKind::Sorter => "sorter",
            ClauseKind::Grouper => "grouper",
            ClauseKind::OpValues => "opvalues",
            ClauseKind::Top => "top",
        }
    }
}

impl fmt::Display for ClauseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordering direction for sort expressions.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub enum SortDirection {
    /// Ascending order.
    #[default]
    Asc,
    /// Descending order.
    Desc,
}

/// Sort key used by the sorter clause and by aggregate ordering.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SortExpr {
    /// Key expression.
    pub expr: Expr,
    /// Ordering direction.
    pub direction: SortDirection,
    /// Whether empty values sort first.
    pub nones_first: bool,
}

impl SortExpr {
    /// Ascending sort key with empty values last.
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            direction: SortDirection::Asc,
            nones_first: false,
        }
    }
}

/// Function invocation, including aggregate and window calls.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FunctionCall {
    /// Function name.
    pub name: String,
    /// Positional arguments.
    pub args: Vec<Expr>,
    /// Set when the call is a declared aggregate or has aggregating
    /// arguments.
    pub aggregates: bool,
    /// Ordering applied to aggregate input.
    pub agg_sort: Vec<SortExpr>,
    /// Filter applied to aggregate input.
    pub agg_filter: Option<Box<Expr>>,
    /// Window partition keys.
    pub partition: Vec<Expr>,
    /// Source location of the call.
    pub span: Option<Span>,
}

/// Expression node.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Expr {
    /// Literal value.
    Constant(Literal),
    /// Bare path or path combination.
    Path(Fragment),
    /// Scalar attribute of a node.
    AtomicRef {
        /// Node owning the attribute.
        node: NodeId,
        /// Attribute name.
        name: String,
    },
    /// Derived type attribute of a node.
    MetaRef {
        /// Node owning the attribute.
        node: NodeId,
        /// Attribute name.
        name: String,
    },
    /// Attribute carried by a link.
    LinkPropRef {
        /// Link owning the property.
        link: LinkId,
        /// Property name.
        name: String,
    },
    /// Predicate over the attributes of a single node.
    AtomicRefExpr {
        /// Node the predicate constrains.
        node: NodeId,
        /// Predicate body.
        expr: Box<Expr>,
        /// Whether the predicate may be folded into the node filter.
        inline: bool,
    },
    /// Predicate over the properties of a single link.
    LinkPropRefExpr {
        /// Link the predicate constrains.
        link: LinkId,
        /// Predicate body.
        expr: Box<Expr>,
        /// Whether the predicate may be folded into the link filter.
        inline: bool,
    },
    /// Stands for the filter folded into a node.
    InlineFilter {
        /// Node carrying the folded filter.
        node: NodeId,
    },
    /// Stands for the property filter folded into a link.
    InlinePropFilter {
        /// Link carrying the folded filter.
        link: LinkId,
    },
    /// Binary operator application.
    BinOp {
        /// Left operand.
        left: Box<Expr>,
        /// Operator.
        op: Operator,
        /// Right operand.
        right: Box<Expr>,
        /// Set when the expression is known to aggregate.
        aggregates: bool,
        /// Source location of the operator expression.
        span: Option<Span>,
    },
    /// Unary operator application.
    UnaryOp {
        /// Operator.
        op: Operator,
        /// Operand.
        expr: Box<Expr>,
    },
    /// Existence test.
    Exists(Box<Expr>),
    /// Empty-set test.
    NoneTest(Box<Expr>),
    /// Conversion to another type.
    TypeCast {
        /// Converted expression.
        expr: Box<Expr>,
        /// Target type.
        target: TypeName,
    },
    /// Function call.
    FunctionCall(FunctionCall),
    /// Tuple or array literal.
    Sequence {
        /// Elements in order.
        elements: Vec<Expr>,
        /// Array rather than tuple.
        is_array: bool,
        /// Set when an element aggregates.
        aggregates: bool,
    },
    /// Shape literal.
    Record {
        /// Elements in order.
        elements: Vec<Expr>,
        /// Type the record describes.
        concept: TypeName,
        /// Set when an element aggregates.
        aggregates: bool,
    },
}

impl Expr {
    /// Literal constant.
    pub fn constant(value: impl Into<Literal>) -> Self {
        Expr::Constant(value.into())
    }

    /// Bare node reference.
    pub fn node(node: NodeId) -> Self {
        Expr::Path(Fragment::Node(node))
    }

    /// Bare link reference.
    pub fn link(link: LinkId) -> Self {
        Expr::Path(Fragment::Link(link))
    }

    /// Attribute reference `node.name`.
    pub fn attr(node: NodeId, name: impl Into<String>) -> Self {
        Expr::AtomicRef {
            node,
            name: name.into(),
        }
    }

    /// Link property reference `link@name`.
    pub fn prop(link: LinkId, name: impl Into<String>) -> Self {
        Expr::LinkPropRef {
            link,
            name: name.into(),
        }
    }

    /// Inlineable comparison `node.name <op> value`.
    pub fn filter(
        node: NodeId,
        name: impl Into<String>,
        op: Operator,
        value: impl Into<Literal>,
    ) -> Self {
        Expr::AtomicRefExpr {
            node,
            expr: Box::new(Expr::binop(
                Expr::attr(node, name),
                op,
                Expr::constant(value),
            )),
            inline: true,
        }
    }

    /// Inlineable comparison `link@name <op> value`.
    pub fn prop_filter(
        link: LinkId,
        name: impl Into<String>,
        op: Operator,
        value: impl Into<Literal>,
    ) -> Self {
        Expr::LinkPropRefExpr {
            link,
            expr: Box::new(Expr::binop(
                Expr::prop(link, name),
                op,
                Expr::constant(value),
            )),
            inline: true,
        }
    }

    /// Binary operator without span.
    pub fn binop(left: Expr, op: Operator, right: Expr) -> Self {
        Expr::BinOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
            aggregates: false,
            span: None,
        }
    }

    /// `left AND right`.
    pub fn and(left: Expr, right: Expr) -> Self {
        Expr::binop(left, Operator::And, right)
    }

    /// `left OR right`.
    pub fn or(left: Expr, right: Expr) -> Self {
        Expr::binop(left, Operator::Or, right)
    }

    /// Plain function call.
    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::FunctionCall(FunctionCall {
            name: name.into(),
            args,
            aggregates: false,
            agg_sort: Vec::new(),
            agg_filter: None,
            partition: Vec::new(),
            span: None,
        })
    }

    /// Call to a declared aggregate function.
    pub fn aggregate(name: impl Into<String>, args: Vec<Expr>) -> Self {
        let mut call = Expr::call(name, args);
        if let Expr::FunctionCall(inner) = &mut call {
            inner.aggregates = true;
        }
        call
    }

    /// Attaches a source span to operator and call expressions.
    pub fn with_span(mut self, at: Span) -> Self {
        match &mut self {
            Expr::BinOp { span, .. } => *span = Some(at),
            Expr::FunctionCall(call) => call.span = Some(at),
            _ => {}
        }
        self
    }

    /// Returns `true` for literal constants.
    pub fn is_constant(&self) -> bool {
        matches!(self, Expr::Constant(_))
    }

    /// Returns `true` when the expression is known to aggregate.
    pub fn is_aggregating(&self) -> bool {
        match self {
            Expr::BinOp { aggregates, .. }
            | Expr::Sequence { aggregates, .. }
            | Expr::Record { aggregates, .. } => *aggregates,
            Expr::FunctionCall(call) => call.aggregates,
            _ => false,
        }
    }

    /// Source span, when the expression carries one.
    pub fn span(&self) -> Option<Span> {
        match self {
            Expr::BinOp { span, .. } => *span,
            Expr::FunctionCall(call) => call.span,
            _ => None,
        }
    }

    /// Combines an optional existing predicate with another one.
    pub fn extend(existing: Option<Expr>, other: Expr, op: Operator) -> Expr {
        match existing {
            Some(existing) => Expr::binop(existing, op, other),
            None => other,
        }
    }

    /// Visits the expression tree in pre-order.
    pub fn walk(&self, f: &mut dyn FnMut(&Expr)) {
        f(self);
        match self {
            Expr::Constant(_)
            | Expr::Path(_)
            | Expr::AtomicRef { .. }
            | Expr::MetaRef { .. }
            | Expr::LinkPropRef { .. }
            | Expr::InlineFilter { .. }
            | Expr::InlinePropFilter { .. } => {}
            Expr::AtomicRefExpr { expr, .. }
            | Expr::LinkPropRefExpr { expr, .. }
            | Expr::UnaryOp { expr, .. }
            | Expr::Exists(expr)
            | Expr::NoneTest(expr)
            | Expr::TypeCast { expr, .. } => expr.walk(f),
            Expr::BinOp { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            Expr::FunctionCall(call) => {
                for arg in &call.args {
                    arg.walk(f);
                }
                for sort in &call.agg_sort {
                    sort.expr.walk(f);
                }
                if let Some(filter) = &call.agg_filter {
                    filter.walk(f);
                }
                for key in &call.partition {
                    key.walk(f);
                }
            }
            Expr::Sequence { elements, .. } | Expr::Record { elements, .. } => {
                for element in elements {
                    element.walk(f);
                }
            }
        }
    }

    /// Rewrites every stored id to its surviving counterpart.
    pub fn remap(&mut self, redirects: &RedirectMap) {
        match self {
            Expr::Constant(_) => {}
            Expr::Path(fragment) => fragment.remap(redirects),
            Expr::AtomicRef { node, .. }
            | Expr::MetaRef { node, .. }
            | Expr::InlineFilter { node } => *node = redirects.node(*node),
            Expr::LinkPropRef { link, .. } | Expr::InlinePropFilter { link } => {
                *link = redirects.link(*link)
            }
            Expr::AtomicRefExpr { node, expr, .. } => {
                *node = redirects.node(*node);
                expr.remap(redirects);
            }
            Expr::LinkPropRefExpr { link, expr, .. } => {
                *link = redirects.link(*link);
                expr.remap(redirects);
            }
            Expr::UnaryOp { expr, .. }
            | Expr::Exists(expr)
            | Expr::NoneTest(expr)
            | Expr::TypeCast { expr, .. } => expr.remap(redirects),
            Expr::BinOp { left, right, .. } => {
                left.remap(redirects);
                right.remap(redirects);
            }
            Expr::FunctionCall(call) => {
                for arg in &mut call.args {
                    arg.remap(redirects);
                }
                for sort in &mut call.agg_sort {
                    sort.expr.remap(redirects);
                }
                if let Some(filter) = &mut call.agg_filter {
                    filter.remap(redirects);
                }
                for key in &mut call.partition {
                    key.remap(redirects);
                }
            }
            Expr::Sequence { elements, .. } | Expr::Record { elements, .. } => {
                for element in elements {
                    element.remap(redirects);
                }
            }
        }
    }

    /// Renders the expression, expanding inline filters from `graph`.
    pub fn display<'a>(&'a self, graph: &'a PathGraph) -> ExprDisplay<'a> {
        ExprDisplay {
            expr: self,
            graph: Some(graph),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        ExprDisplay {
            expr: self,
            graph: None,
        }
        .fmt(f)
    }
}

/// Display adapter returned by [`Expr::display`].
pub struct ExprDisplay<'a> {
    expr: &'a Expr,
    graph: Option<&'a PathGraph>,
}

impl ExprDisplay<'_> {
    fn child<'b>(&'b self, expr: &'b Expr) -> ExprDisplay<'b> {
        ExprDisplay {
            expr,
            graph: self.graph,
        }
    }

    fn list(&self, f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
        for (idx, item) in items.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", self.child(item))?;
        }
        Ok(())
    }
}

impl fmt::Display for ExprDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.expr {
            Expr::Constant(value) => write!(f, "{value}"),
            Expr::Path(fragment) => write!(f, "{fragment}"),
            Expr::AtomicRef { name, .. } => f.write_str(name),
            Expr::MetaRef { name, .. } => write!(f, "__type__.{name}"),
            Expr::LinkPropRef { name, .. } => write!(f, "@{name}"),
            Expr::AtomicRefExpr { expr, .. } | Expr::LinkPropRefExpr { expr, .. } => {
                write!(f, "{}", self.child(expr))
            }
            Expr::InlineFilter { node } => {
                match self.graph.and_then(|g| g.node(*node).filter.as_ref()) {
                    Some(filter) => write!(f, "{}", self.child(filter)),
                    None => write!(f, "filter({node})"),
                }
            }
            Expr::InlinePropFilter { link } => {
                match self.graph.and_then(|g| g.link(*link).propfilter.as_ref()) {
                    Some(filter) => write!(f, "{}", self.child(filter)),
                    None => write!(f, "propfilter({link})"),
                }
            }
            Expr::BinOp {
                left, op, right, ..
            } => write!(f, "({}) {op} ({})", self.child(left), self.child(right)),
            Expr::UnaryOp { op, expr } => write!(f, "{op} ({})", self.child(expr)),
            Expr::Exists(expr) => write!(f, "EXISTS ({})", self.child(expr)),
            Expr::NoneTest(expr) => write!(f, "({}) IS NONE", self.child(expr)),
            Expr::TypeCast { expr, target } => write!(f, "<{target}>({})", self.child(expr)),
            Expr::FunctionCall(call) => {
                write!(f, "{}(", call.name)?;
                self.list(f, &call.args)?;
                f.write_str(")")
            }
            Expr::Sequence {
                elements, is_array, ..
            } => {
                let (open, close) = if *is_array { ("[", "]") } else { ("(", ")") };
                f.write_str(open)?;
                self.list(f, elements)?;
                f.write_str(close)
            }
            Expr::Record {
                elements, concept, ..
            } => {
                write!(f, "{concept} {{")?;
                self.list(f, elements)?;
                f.write_str("}")
            }
        }
    }
}
