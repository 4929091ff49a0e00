//! Type representation for the Opal type system.
//!
//! Defines the core `Ty` union, declaration-site variance, use-site
//! projections, and the inference variable key (`InferVar`) used by the
//! constraint system. Every concrete type carries a nullability bit; the
//! `ena` crate handles union-find mechanics for inference variables.

use std::fmt;

/// An inference variable, identified by a `u32` index into the
/// constraint system's unification table.
///
/// Inference variables exist only inside an active `ConstraintSystem`;
/// a `Ty` containing one must never escape resolution of its call site.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct InferVar(pub u32);

/// Declaration-site variance of a class type parameter.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Variance {
    /// Invariant: the argument must match exactly.
    Invariant,
    /// Covariant (`out`): the argument may widen with the parameter.
    Out,
    /// Contravariant (`in`): the argument may narrow with the parameter.
    In,
}

/// A use-site projection on a generic argument.
///
/// `Plain` defers to the declaration-site variance; `Out`/`In` override
/// it at the use site; `Star` is the unknown-argument projection.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TyProj {
    Plain(Ty),
    Out(Ty),
    In(Ty),
    Star,
}

impl TyProj {
    /// The projected type, if any (`Star` has none).
    pub fn ty(&self) -> Option<&Ty> {
        match self {
            TyProj::Plain(t) | TyProj::Out(t) | TyProj::In(t) => Some(t),
            TyProj::Star => None,
        }
    }

    /// The projected type, with `Star` widened to `Any?`.
    pub fn ty_or_top(&self) -> Ty {
        self.ty().cloned().unwrap_or_else(Ty::any_nullable)
    }
}

/// A class (or interface) type: a named constructor with projected
/// generic arguments and a nullability bit.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClassTy {
    pub name: String,
    pub args: Vec<TyProj>,
    pub nullable: bool,
}

/// A function type: `(params) -> ret`, with its own nullability bit
/// (a nullable function reference, `((Int) -> Unit)?`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FnTy {
    pub params: Vec<Ty>,
    pub ret: Box<Ty>,
    pub nullable: bool,
}

/// A reference to a declared type parameter (`T` in `fun <T> f(x: T)`).
///
/// The declared upper bound travels with the reference so subtype queries
/// can consult it without a declaration lookup. It is intentionally
/// excluded from `PartialEq` and `Hash`: two references to `T` are the
/// same type regardless of how much bound information they carry.
#[derive(Clone, Debug)]
pub struct ParamTy {
    pub name: String,
    /// Declared upper bound. `None` means the implicit `Any?`.
    /// NOT part of type identity; only consulted by subtype checks.
    pub upper: Option<Box<Ty>>,
    pub nullable: bool,
}

impl PartialEq for ParamTy {
    fn eq(&self, other: &Self) -> bool {
        // upper intentionally excluded
        self.name == other.name && self.nullable == other.nullable
    }
}

impl Eq for ParamTy {}

impl std::hash::Hash for ParamTy {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state); // upper intentionally excluded
        self.nullable.hash(state);
    }
}

/// An inference-variable occurrence inside a type. The `nullable` marker
/// records a `T?` position: whatever the variable fixes to is made
/// nullable at this occurrence.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct InferTy {
    pub var: InferVar,
    pub nullable: bool,
}

/// A flexible (platform) type: a lower/upper bound pair `(L..U)` for
/// imprecisely-known types. Subtyping consults only the upper bound;
/// the lower bound is used for narrowing.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FlexibleTy {
    pub lower: Ty,
    pub upper: Ty,
}

/// An Opal type.
///
/// - `Class`: a named constructor with projected arguments and nullability
/// - `Fn`: a function type
/// - `Param`: a reference to a declared type parameter
/// - `Infer`: an inference-variable placeholder (constraint system only)
/// - `Intersection`: conjunction of types (smart casts, multiple bounds)
/// - `Flexible`: lower/upper bound pair for imprecisely-known types
/// - `Error`: the recovery type; compatible with everything
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Ty {
    Class(ClassTy),
    Fn(FnTy),
    Param(ParamTy),
    Infer(InferTy),
    Intersection(Vec<Ty>),
    Flexible(Box<FlexibleTy>),
    Error,
}

impl Ty {
    /// A non-generic class type.
    pub fn class(name: &str) -> Ty {
        Ty::Class(ClassTy { name: name.into(), args: Vec::new(), nullable: false })
    }

    /// A generic class type with plain (unprojected) arguments.
    pub fn generic(name: &str, args: Vec<Ty>) -> Ty {
        Ty::Class(ClassTy {
            name: name.into(),
            args: args.into_iter().map(TyProj::Plain).collect(),
            nullable: false,
        })
    }

    /// Create the top type `Any`.
    pub fn any() -> Ty {
        Ty::class("Any")
    }

    /// Create the nullable top type `Any?`.
    pub fn any_nullable() -> Ty {
        Ty::any().nullable()
    }

    /// Create the bottom type `Nothing`.
    pub fn nothing() -> Ty {
        Ty::class("Nothing")
    }

    /// Create the `Unit` type.
    pub fn unit() -> Ty {
        Ty::class("Unit")
    }

    /// Create an `Int` type.
    pub fn int() -> Ty {
        Ty::class("Int")
    }

    /// Create a `Double` type.
    pub fn double() -> Ty {
        Ty::class("Double")
    }

    /// Create a `Number` type.
    pub fn number() -> Ty {
        Ty::class("Number")
    }

    /// Create a `String` type.
    pub fn string() -> Ty {
        Ty::class("String")
    }

    /// Create a `Boolean` type.
    pub fn boolean() -> Ty {
        Ty::class("Boolean")
    }

    /// Create a function type.
    pub fn fun(params: Vec<Ty>, ret: Ty) -> Ty {
        Ty::Fn(FnTy { params, ret: Box::new(ret), nullable: false })
    }

    /// A reference to a declared type parameter with the implicit bound.
    pub fn param(name: &str) -> Ty {
        Ty::Param(ParamTy { name: name.into(), upper: None, nullable: false })
    }

    /// A type-parameter reference with an explicit upper bound.
    pub fn param_bounded(name: &str, upper: Ty) -> Ty {
        Ty::Param(ParamTy { name: name.into(), upper: Some(Box::new(upper)), nullable: false })
    }

    /// An inference-variable occurrence.
    pub fn infer(var: InferVar) -> Ty {
        Ty::Infer(InferTy { var, nullable: false })
    }

    /// A flexible type `(lower..upper)`.
    pub fn flexible(lower: Ty, upper: Ty) -> Ty {
        Ty::Flexible(Box::new(FlexibleTy { lower, upper }))
    }

    /// Whether this type is marked nullable at its outermost shape.
    ///
    /// Intersections are nullable only if every member is; flexible types
    /// report their upper bound; `Error` absorbs nullability questions.
    pub fn is_nullable(&self) -> bool {
        match self {
            Ty::Class(c) => c.nullable,
            Ty::Fn(f) => f.nullable,
            Ty::Param(p) => p.nullable,
            Ty::Infer(i) => i.nullable,
            Ty::Intersection(members) => members.iter().all(|m| m.is_nullable()),
            Ty::Flexible(fx) => fx.upper.is_nullable(),
            Ty::Error => false,
        }
    }

    /// This type with the nullability bit set.
    pub fn nullable(self) -> Ty {
        self.with_nullability(true)
    }

    /// This type with the nullability bit cleared.
    pub fn not_null(self) -> Ty {
        self.with_nullability(false)
    }

    fn with_nullability(self, nullable: bool) -> Ty {
        match self {
            Ty::Class(mut c) => {
                c.nullable = nullable;
                Ty::Class(c)
            }
            Ty::Fn(mut f) => {
                f.nullable = nullable;
                Ty::Fn(f)
            }
            Ty::Param(mut p) => {
                p.nullable = nullable;
                Ty::Param(p)
            }
            Ty::Infer(mut i) => {
                i.nullable = nullable;
                Ty::Infer(i)
            }
            Ty::Intersection(members) => Ty::Intersection(
                members.into_iter().map(|m| m.with_nullability(nullable)).collect(),
            ),
            Ty::Flexible(fx) => {
                let FlexibleTy { lower, upper } = *fx;
                Ty::flexible(lower.with_nullability(nullable), upper.with_nullability(nullable))
            }
            Ty::Error => Ty::Error,
        }
    }

    /// Whether this is the class named `name` (any nullability).
    pub fn is_class_named(&self, name: &str) -> bool {
        matches!(self, Ty::Class(c) if c.name == name)
    }

    /// Whether this type contains any inference-variable occurrence.
    pub fn mentions_infer(&self) -> bool {
        match self {
            Ty::Infer(_) => true,
            Ty::Class(c) => c
                .args
                .iter()
                .any(|a| a.ty().map(Ty::mentions_infer).unwrap_or(false)),
            Ty::Fn(f) => f.params.iter().any(Ty::mentions_infer) || f.ret.mentions_infer(),
            Ty::Param(_) | Ty::Error => false,
            Ty::Intersection(members) => members.iter().any(Ty::mentions_infer),
            Ty::Flexible(fx) => fx.lower.mentions_infer() || fx.upper.mentions_infer(),
        }
    }

    /// Collect every inference variable occurring in this type.
    pub fn collect_infer_vars(&self, out: &mut Vec<InferVar>) {
        match self {
            Ty::Infer(i) => out.push(i.var),
            Ty::Class(c) => {
                for a in &c.args {
                    if let Some(t) = a.ty() {
                        t.collect_infer_vars(out);
                    }
                }
            }
            Ty::Fn(f) => {
                for p in &f.params {
                    p.collect_infer_vars(out);
                }
                f.ret.collect_infer_vars(out);
            }
            Ty::Param(_) | Ty::Error => {}
            Ty::Intersection(members) => {
                for m in members {
                    m.collect_infer_vars(out);
                }
            }
            Ty::Flexible(fx) => {
                fx.lower.collect_infer_vars(out);
                fx.upper.collect_infer_vars(out);
            }
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Class(c) => {
                write!(f, "{}", c.name)?;
                if !c.args.is_empty() {
                    write!(f, "<")?;
                    for (i, a) in c.args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        match a {
                            TyProj::Plain(t) => write!(f, "{}", t)?,
                            TyProj::Out(t) => write!(f, "out {}", t)?,
                            TyProj::In(t) => write!(f, "in {}", t)?,
                            TyProj::Star => write!(f, "*")?,
                        }
                    }
                    write!(f, ">")?;
                }
                if c.nullable {
                    write!(f, "?")?;
                }
                Ok(())
            }
            Ty::Fn(fun) => {
                if fun.nullable {
                    write!(f, "(")?;
                }
                write!(f, "(")?;
                for (i, p) in fun.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                write!(f, ") -> {}", fun.ret)?;
                if fun.nullable {
                    write!(f, ")?")?;
                }
                Ok(())
            }
            Ty::Param(p) => {
                write!(f, "{}", p.name)?;
                if p.nullable {
                    write!(f, "?")?;
                }
                Ok(())
            }
            Ty::Infer(i) => {
                write!(f, "?{}", i.var.0)?;
                if i.nullable {
                    write!(f, "?")?;
                }
                Ok(())
            }
            Ty::Intersection(members) => {
                for (i, m) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, " & ")?;
                    }
                    write!(f, "{}", m)?;
                }
                Ok(())
            }
            Ty::Flexible(fx) => write!(f, "({}..{})", fx.lower, fx.upper),
            Ty::Error => write!(f, "<error>"),
        }
    }
}

// ── ena trait implementations ──────────────────────────────────────────

impl ena::unify::UnifyKey for InferVar {
    type Value = Option<Ty>;

    fn index(&self) -> u32 {
        self.0
    }

    fn from_index(u: u32) -> Self {
        InferVar(u)
    }

    fn tag() -> &'static str {
        "InferVar"
    }
}

impl ena::unify::EqUnifyValue for Ty {}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nullability_roundtrip() {
        let t = Ty::int();
        assert!(!t.is_nullable());
        let n = t.clone().nullable();
        assert!(n.is_nullable());
        assert_eq!(n.not_null(), t);
    }

    #[test]
    fn param_identity_ignores_bound() {
        let a = Ty::param("T");
        let b = Ty::param_bounded("T", Ty::number());
        assert_eq!(a, b);
    }

    #[test]
    fn mentions_infer_walks_arguments() {
        let v = Ty::infer(InferVar(0));
        let list = Ty::generic("List", vec![v]);
        assert!(list.mentions_infer());
        assert!(!Ty::generic("List", vec![Ty::int()]).mentions_infer());
    }

    #[test]
    fn display_forms() {
        assert_eq!(format!("{}", Ty::int()), "Int");
        assert_eq!(format!("{}", Ty::int().nullable()), "Int?");
        assert_eq!(
            format!("{}", Ty::fun(vec![Ty::int(), Ty::string()], Ty::boolean())),
            "(Int, String) -> Boolean"
        );
        assert_eq!(format!("{}", Ty::generic("List", vec![Ty::int()])), "List<Int>");
        assert_eq!(
            format!("{}", Ty::flexible(Ty::string(), Ty::string().nullable())),
            "(String..String?)"
        );
        let star = Ty::Class(ClassTy {
            name: "List".into(),
            args: vec![TyProj::Star],
            nullable: false,
        });
        assert_eq!(format!("{}", star), "List<*>");
    }
}
