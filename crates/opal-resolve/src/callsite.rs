//! Abstract call-site and declaration descriptions.
//!
//! The engine never sees a syntax tree. A caller (the binding phase)
//! describes each call as a `CallSite` tree of already-typed values,
//! local references, nested calls, and syntactic lambdas, and supplies
//! matching declarations through the `SymbolLookup` collaborator.

use rowan::TextRange;

use opal_types::Ty;

/// Build a span from raw offsets. Convenience for callers and tests.
pub fn span(start: u32, end: u32) -> TextRange {
    TextRange::new(start.into(), end.into())
}

/// Identity of a program point for flow-narrowing queries.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProgramPoint(pub u32);

/// Identity of a local binding within the enclosing declaration.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LocalId(pub u32);

/// A local binding: declared type plus whether the reference is stable
/// (immutable local or final member, never reassigned on any path).
/// Only stable locals participate in smart casts.
#[derive(Clone, Debug)]
pub struct LocalDef {
    pub name: String,
    pub declared: Ty,
    pub stable: bool,
}

/// Registry of the enclosing declaration's locals, indexed by `LocalId`.
#[derive(Clone, Debug, Default)]
pub struct Locals {
    defs: Vec<LocalDef>,
}

impl Locals {
    pub fn new() -> Self {
        Locals::default()
    }

    /// Register a local and return its id.
    pub fn declare(&mut self, name: &str, declared: Ty, stable: bool) -> LocalId {
        let id = LocalId(self.defs.len() as u32);
        self.defs.push(LocalDef { name: name.into(), declared, stable });
        id
    }

    pub fn get(&self, id: LocalId) -> &LocalDef {
        &self.defs[id.0 as usize]
    }
}

/// The value of an argument or receiver position.
#[derive(Clone, Debug)]
pub enum ArgValue {
    /// An expression whose type is already known.
    Typed(Ty),
    /// A reference to a local binding; its type consults the smart-cast
    /// narrower before falling back to the declared type.
    Local(LocalId),
    /// A reference to parameter `i` of the innermost enclosing lambda.
    LambdaParam(usize),
    /// A nested call, resolved before the containing candidate is judged.
    Call(Box<CallSite>),
    /// A syntactic lambda; analyzed inline when its parameter types are
    /// known, postponed otherwise.
    Lambda(LambdaArg),
}

/// One argument of a call.
#[derive(Clone, Debug)]
pub struct Argument {
    /// `Some` for a named argument (`f(x = 1)`).
    pub name: Option<String>,
    pub value: ArgValue,
    /// Spread of an array/list into a vararg parameter.
    pub spread: bool,
    pub span: TextRange,
}

impl Argument {
    pub fn positional(value: ArgValue, span: TextRange) -> Self {
        Argument { name: None, value, spread: false, span }
    }

    pub fn named(name: &str, value: ArgValue, span: TextRange) -> Self {
        Argument { name: Some(name.into()), value, spread: false, span }
    }
}

/// A syntactic lambda argument: parameter shape and a body described as
/// the calls it makes, with an optional result value.
///
/// Bodies reference their own parameters through
/// `ArgValue::LambdaParam(i)`.
#[derive(Clone, Debug)]
pub struct LambdaArg {
    /// Per-parameter annotation; `None` means "infer me".
    pub params: Vec<Option<Ty>>,
    /// Calls made by the body, in source order.
    pub body: Vec<CallSite>,
    /// The body's result value, if the lambda returns one.
    pub result: Option<Box<ArgValue>>,
    pub span: TextRange,
}

/// A call site awaiting resolution.
#[derive(Clone, Debug)]
pub struct CallSite {
    pub name: String,
    /// Explicit receiver (`x.f(..)`), if any.
    pub receiver: Option<Box<ArgValue>>,
    /// Implicit receivers in scope, innermost first. Consulted when no
    /// explicit receiver is present and the candidate requires one.
    pub implicit_receivers: Vec<ArgValue>,
    pub args: Vec<Argument>,
    /// Expected type from the surrounding context, if known.
    pub expected: Option<Ty>,
    pub span: TextRange,
}

impl CallSite {
    pub fn new(name: &str, span: TextRange) -> Self {
        CallSite {
            name: name.into(),
            receiver: None,
            implicit_receivers: Vec::new(),
            args: Vec::new(),
            expected: None,
            span,
        }
    }

    pub fn with_receiver(mut self, receiver: ArgValue) -> Self {
        self.receiver = Some(Box::new(receiver));
        self
    }

    pub fn with_args(mut self, args: Vec<Argument>) -> Self {
        self.args = args;
        self
    }

    pub fn with_expected(mut self, expected: Ty) -> Self {
        self.expected = Some(expected);
        self
    }
}

// ── Declarations (the external DeclarationRef contract) ────────────────

/// Visibility of a declaration. Lookup results are expected to be
/// pre-filtered by visibility; the collector only re-checks the one
/// case a name-based lookup cannot, a private declaration surfacing
/// through an import.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Internal,
    Private,
}

/// Which lookup scope produced a declaration. The ordering is the
/// collector's priority and the disambiguator's final tie-break.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ScopeKind {
    Local,
    Member,
    Extension,
    Imported,
}

impl ScopeKind {
    pub fn rank(self) -> u8 {
        match self {
            ScopeKind::Local => 0,
            ScopeKind::Member => 1,
            ScopeKind::Extension => 2,
            ScopeKind::Imported => 3,
        }
    }
}

/// What kind of callable a declaration is. Closed so the collector and
/// checker can match exhaustively.
#[derive(Clone, Debug)]
pub enum DeclKind {
    /// A member function; `owner` is the declaring class type, written
    /// in terms of the class's type parameters.
    Member { owner: Ty },
    /// An extension function; `receiver` is the declared receiver type.
    Extension { receiver: Ty },
    /// A free function.
    TopLevel,
    /// A compiler-synthesized callable (e.g. a functional-value invoke).
    Synthetic,
}

/// A declared type parameter of a callable (or its owner class; members
/// list class-level parameters here too).
#[derive(Clone, Debug)]
pub struct TypeParam {
    pub name: String,
    /// Declared upper bound; `None` means the implicit `Any?`.
    pub upper: Option<Ty>,
}

impl TypeParam {
    pub fn new(name: &str) -> Self {
        TypeParam { name: name.into(), upper: None }
    }

    pub fn bounded(name: &str, upper: Ty) -> Self {
        TypeParam { name: name.into(), upper: Some(upper) }
    }
}

/// A declared value parameter.
#[derive(Clone, Debug)]
pub struct Param {
    pub name: String,
    /// For a vararg parameter this is the element type.
    pub ty: Ty,
    pub has_default: bool,
    pub vararg: bool,
}

impl Param {
    pub fn new(name: &str, ty: Ty) -> Self {
        Param { name: name.into(), ty, has_default: false, vararg: false }
    }

    pub fn defaulted(name: &str, ty: Ty) -> Self {
        Param { name: name.into(), ty, has_default: true, vararg: false }
    }

    pub fn vararg(name: &str, element_ty: Ty) -> Self {
        Param { name: name.into(), ty: element_ty, has_default: false, vararg: true }
    }
}

/// A callable declaration as exposed by the symbol-lookup collaborator.
#[derive(Clone, Debug)]
pub struct Declaration {
    pub name: String,
    pub type_params: Vec<TypeParam>,
    pub params: Vec<Param>,
    pub ret: Ty,
    pub kind: DeclKind,
    pub scope: ScopeKind,
    pub visibility: Visibility,
}

impl Declaration {
    pub fn top_level(name: &str, params: Vec<Param>, ret: Ty) -> Self {
        Declaration {
            name: name.into(),
            type_params: Vec::new(),
            params,
            ret,
            kind: DeclKind::TopLevel,
            scope: ScopeKind::Imported,
            visibility: Visibility::Public,
        }
    }

    pub fn with_type_params(mut self, type_params: Vec<TypeParam>) -> Self {
        self.type_params = type_params;
        self
    }

    pub fn with_kind(mut self, kind: DeclKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_scope(mut self, scope: ScopeKind) -> Self {
        self.scope = scope;
        self
    }

    /// A stable render key for ambiguity diagnostics:
    /// `name(ParamTy, ParamTy)`.
    pub fn render_key(&self) -> String {
        let params = self
            .params
            .iter()
            .map(|p| p.ty.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}({})", self.name, params)
    }

    /// The declared receiver type, if this candidate needs one.
    pub fn receiver_ty(&self) -> Option<&Ty> {
        match &self.kind {
            DeclKind::Member { owner } => Some(owner),
            DeclKind::Extension { receiver } => Some(receiver),
            DeclKind::TopLevel | DeclKind::Synthetic => None,
        }
    }
}

/// The symbol-lookup capability supplied by an earlier phase.
///
/// Implementations must be safe for concurrent read access; the engine
/// only ever reads.
pub trait SymbolLookup {
    /// All statically visible declarations matching `name`, already
    /// deduplicated by visibility and shadowing.
    fn lookup(&self, name: &str) -> Vec<Declaration>;
}
