#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;
use tracing::error;

use crate::ir::expr::Span;

/// Convenience alias for fallible engine operations.
pub type Result<T> = std::result::Result<T, CompileError>;

/// Errors surfaced by the path-merge engine.
///
/// `AggregateMix` is user-facing and carries the span of the offending
/// expression. `Invariant` signals corrupted IR or a merge logic bug; the
/// compile that produced it must be abandoned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// Aggregating and non-aggregating, non-constant operands were combined.
    #[error("invalid expression mix of aggregates and non-aggregates{}", SpanSuffix(.span))]
    AggregateMix {
        /// Location of the offending expression, when known.
        span: Option<Span>,
    },
    /// Expression nesting or merge recursion went past the configured bound.
    #[error("expression nesting exceeds depth {max} (got {depth})")]
    NestingTooDeep { depth: usize, max: usize },
    /// Structural invariant violation inside the IR graph.
    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

impl CompileError {
    /// Builds an [`CompileError::Invariant`] and logs it.
    pub fn invariant(message: impl Into<String>) -> Self {
        let message = message.into();
        error!(%message, "path merge invariant violated");
        CompileError::Invariant(message)
    }

    /// Returns `true` for internal errors that indicate an upstream IR bug.
    pub fn is_internal(&self) -> bool {
        matches!(self, CompileError::Invariant(_))
    }

    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            CompileError::AggregateMix { .. } => "AggregateMix",
            CompileError::NestingTooDeep { .. } => "NestingTooDeep",
            CompileError::Invariant(_) => "InternalError",
        }
    }
}

struct SpanSuffix<'a>(&'a Option<Span>);

impl fmt::Display for SpanSuffix<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(span) => write!(f, " at {span}"),
            None => Ok(()),
        }
    }
}

/// Formats compile errors together with their codes.
pub struct CompileErrorWithCode<'a>(pub &'a CompileError);

impl fmt::Display for CompileErrorWithCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.0.code(), self.0)
    }
}
