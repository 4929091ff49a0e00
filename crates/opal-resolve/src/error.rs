//! Resolution diagnostics.
//!
//! Every failure mode of the engine is a `Diagnostic` value attached to
//! a span -- collected, never thrown. Rendering is a caller concern;
//! this module only defines the kinds, their attachment data, and a
//! terse `Display` form for tests and logs.

use std::fmt;

use rowan::TextRange;

use opal_types::Ty;

/// Coarse taxonomy of diagnostics, ordered by detection cost.
///
/// Structural faults are cheap shape checks made before any constraint
/// work; type faults come out of constraint contradictions; ambiguity is
/// a property of the candidate set rather than one candidate; inference
/// faults mean the constraint system could not commit a variable.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DiagnosticCategory {
    Structural,
    Type,
    Ambiguity,
    Inference,
}

/// A diagnostic produced during call resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Diagnostic {
    /// An argument's type cannot satisfy the parameter it maps to.
    ArgumentTypeMismatch {
        expected: Ty,
        found: Ty,
        /// Index into the call's argument list.
        arg_index: usize,
        span: TextRange,
    },
    /// The call's receiver cannot satisfy the declared receiver type.
    ReceiverTypeMismatch {
        expected: Ty,
        found: Ty,
        span: TextRange,
    },
    /// The argument list cannot be mapped onto the parameter list.
    WrongNumberOfArguments {
        expected: usize,
        found: usize,
        span: TextRange,
    },
    /// More than one implicit receiver matches an extension candidate.
    AmbiguousReceiver {
        count: usize,
        span: TextRange,
    },
    /// A named argument references no parameter of the candidate.
    UnresolvedReference {
        name: String,
        span: TextRange,
    },
    /// No applicable candidate exists for the call.
    UnresolvedCall {
        name: String,
        span: TextRange,
    },
    /// The inferred return type cannot satisfy the expected type.
    ReturnTypeMismatch {
        expected: Ty,
        found: Ty,
        span: TextRange,
    },
    /// A fixed type variable violates its declared upper bound.
    BoundViolation {
        param: String,
        bound: Ty,
        actual: Ty,
        span: TextRange,
    },
    /// Multiple candidates remain equally good after every tie-break.
    OverloadAmbiguity {
        name: String,
        /// Render keys of the tied candidates, in collector order.
        candidates: Vec<String>,
        span: TextRange,
    },
    /// A postponed lambda's parameter types never became known.
    CannotInferLambdaParameterType {
        arg_index: usize,
        span: TextRange,
    },
    /// The constraint system could not commit a type variable.
    CannotInferTypeVariable {
        param: String,
        span: TextRange,
    },
    /// A call contains itself as its own argument, or nesting exceeded
    /// the resolution depth bound.
    CyclicCall {
        span: TextRange,
    },
}

impl Diagnostic {
    /// The span this diagnostic is attached to.
    pub fn span(&self) -> TextRange {
        match self {
            Diagnostic::ArgumentTypeMismatch { span, .. }
            | Diagnostic::ReceiverTypeMismatch { span, .. }
            | Diagnostic::WrongNumberOfArguments { span, .. }
            | Diagnostic::AmbiguousReceiver { span, .. }
            | Diagnostic::UnresolvedReference { span, .. }
            | Diagnostic::UnresolvedCall { span, .. }
            | Diagnostic::ReturnTypeMismatch { span, .. }
            | Diagnostic::BoundViolation { span, .. }
            | Diagnostic::OverloadAmbiguity { span, .. }
            | Diagnostic::CannotInferLambdaParameterType { span, .. }
            | Diagnostic::CannotInferTypeVariable { span, .. }
            | Diagnostic::CyclicCall { span } => *span,
        }
    }

    pub fn category(&self) -> DiagnosticCategory {
        match self {
            Diagnostic::WrongNumberOfArguments { .. }
            | Diagnostic::UnresolvedReference { .. }
            | Diagnostic::UnresolvedCall { .. }
            | Diagnostic::CyclicCall { .. } => DiagnosticCategory::Structural,
            Diagnostic::ArgumentTypeMismatch { .. }
            | Diagnostic::ReceiverTypeMismatch { .. }
            | Diagnostic::ReturnTypeMismatch { .. }
            | Diagnostic::BoundViolation { .. } => DiagnosticCategory::Type,
            Diagnostic::AmbiguousReceiver { .. } | Diagnostic::OverloadAmbiguity { .. } => {
                DiagnosticCategory::Ambiguity
            }
            Diagnostic::CannotInferLambdaParameterType { .. }
            | Diagnostic::CannotInferTypeVariable { .. } => DiagnosticCategory::Inference,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::ArgumentTypeMismatch { expected, found, arg_index, .. } => {
                write!(
                    f,
                    "argument {}: expected `{}`, found `{}`",
                    arg_index + 1,
                    expected,
                    found
                )
            }
            Diagnostic::ReceiverTypeMismatch { expected, found, .. } => {
                write!(f, "receiver type mismatch: expected `{}`, found `{}`", expected, found)
            }
            Diagnostic::WrongNumberOfArguments { expected, found, .. } => {
                write!(f, "wrong number of arguments: expected {}, found {}", expected, found)
            }
            Diagnostic::AmbiguousReceiver { count, .. } => {
                write!(f, "ambiguous receiver: {} implicit receivers match", count)
            }
            Diagnostic::UnresolvedReference { name, .. } => {
                write!(f, "unresolved reference `{}`", name)
            }
            Diagnostic::UnresolvedCall { name, .. } => {
                write!(f, "unresolved call: no applicable candidate for `{}`", name)
            }
            Diagnostic::ReturnTypeMismatch { expected, found, .. } => {
                write!(f, "return type mismatch: expected `{}`, found `{}`", expected, found)
            }
            Diagnostic::BoundViolation { param, bound, actual, .. } => {
                write!(
                    f,
                    "type argument for `{}` violates its bound: `{}` is not a subtype of `{}`",
                    param, actual, bound
                )
            }
            Diagnostic::OverloadAmbiguity { name, candidates, .. } => {
                write!(
                    f,
                    "overload ambiguity for `{}`: candidates [{}]",
                    name,
                    candidates.join(", ")
                )
            }
            Diagnostic::CannotInferLambdaParameterType { arg_index, .. } => {
                write!(
                    f,
                    "cannot infer parameter types of the lambda at argument {}",
                    arg_index + 1
                )
            }
            Diagnostic::CannotInferTypeVariable { param, .. } => {
                write!(f, "cannot infer type for type parameter `{}`", param)
            }
            Diagnostic::CyclicCall { .. } => {
                write!(f, "cyclic call: a call cannot contain itself as an argument")
            }
        }
    }
}
