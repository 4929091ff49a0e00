//! Type model for the Opal frontend.
//!
//! This crate is the foundation of the call resolution engine: type
//! representations with nullability and variance, the class table,
//! type-parameter substitution, and the subtyping / least-upper-bound
//! relations with their session-scoped cache.
//!
//! It knows nothing about call sites, candidates, or constraints; the
//! `opal-resolve` crate builds those on top.

pub mod relations;
pub mod subst;
pub mod table;
pub mod ty;

pub use relations::{Relations, SubtypeCache};
pub use subst::substitute;
pub use table::{applied, ClassDef, TypeParamDef, TypeTable};
pub use ty::{ClassTy, FlexibleTy, FnTy, InferTy, InferVar, ParamTy, Ty, TyProj, Variance};
