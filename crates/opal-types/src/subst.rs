//! Type-parameter substitution.
//!
//! Replaces `Ty::Param` references by name throughout a type. Used when
//! instantiating declared supertypes, opening a candidate's signature
//! with fresh inference variables, and producing final resolved types.

use rustc_hash::FxHashMap;

use crate::ty::{FlexibleTy, FnTy, Ty, TyProj};

/// Apply a name-keyed substitution to a type.
///
/// A replaced parameter keeps its occurrence's nullability: substituting
/// `T := Int` into `T?` yields `Int?`, and into `T` yields `Int` (or
/// `Int?` if the replacement itself is nullable).
pub fn substitute(ty: &Ty, mapping: &FxHashMap<String, Ty>) -> Ty {
    match ty {
        Ty::Param(p) => match mapping.get(&p.name) {
            Some(replacement) => {
                if p.nullable {
                    replacement.clone().nullable()
                } else {
                    replacement.clone()
                }
            }
            None => ty.clone(),
        },
        Ty::Class(c) => {
            let args = c
                .args
                .iter()
                .map(|a| match a {
                    TyProj::Plain(t) => TyProj::Plain(substitute(t, mapping)),
                    TyProj::Out(t) => TyProj::Out(substitute(t, mapping)),
                    TyProj::In(t) => TyProj::In(substitute(t, mapping)),
                    TyProj::Star => TyProj::Star,
                })
                .collect();
            Ty::Class(crate::ty::ClassTy { name: c.name.clone(), args, nullable: c.nullable })
        }
        Ty::Fn(f) => {
            let params = f.params.iter().map(|p| substitute(p, mapping)).collect();
            let ret = Box::new(substitute(&f.ret, mapping));
            Ty::Fn(FnTy { params, ret, nullable: f.nullable })
        }
        Ty::Intersection(members) => {
            Ty::Intersection(members.iter().map(|m| substitute(m, mapping)).collect())
        }
        Ty::Flexible(fx) => Ty::Flexible(Box::new(FlexibleTy {
            lower: substitute(&fx.lower, mapping),
            upper: substitute(&fx.upper, mapping),
        })),
        Ty::Infer(_) | Ty::Error => ty.clone(),
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(pairs: &[(&str, Ty)]) -> FxHashMap<String, Ty> {
        pairs.iter().map(|(n, t)| (n.to_string(), t.clone())).collect()
    }

    #[test]
    fn substitutes_nested_occurrences() {
        let ty = Ty::generic("List", vec![Ty::param("T")]);
        let out = substitute(&ty, &mapping(&[("T", Ty::int())]));
        assert_eq!(out, Ty::generic("List", vec![Ty::int()]));
    }

    #[test]
    fn nullable_occurrence_keeps_question_mark() {
        let ty = Ty::param("T").nullable();
        let out = substitute(&ty, &mapping(&[("T", Ty::string())]));
        assert_eq!(out, Ty::string().nullable());
    }

    #[test]
    fn unmapped_params_are_untouched() {
        let ty = Ty::fun(vec![Ty::param("A")], Ty::param("B"));
        let out = substitute(&ty, &mapping(&[("A", Ty::int())]));
        assert_eq!(out, Ty::fun(vec![Ty::int()], Ty::param("B")));
    }
}
