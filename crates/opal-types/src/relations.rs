//! Subtyping and least-upper-bound over the type model.
//!
//! `Relations` bundles the type table with a session-scoped memo cache
//! for subtype queries. Types are immutable once constructed, so the
//! cache needs no invalidation during resolution.
//!
//! Inference variables are opaque here: a placeholder is a subtype only
//! of itself. The constraint system intercepts variables before asking
//! these relations.

use rustc_hash::FxHashMap;

use crate::table::TypeTable;
use crate::ty::{ClassTy, Ty, TyProj, Variance};

/// Memoized subtype results, scoped to one compilation session.
#[derive(Debug, Default)]
pub struct SubtypeCache {
    memo: FxHashMap<(Ty, Ty), bool>,
}

impl SubtypeCache {
    pub fn new() -> Self {
        SubtypeCache::default()
    }
}

/// Subtyping and bound computations against a type table.
pub struct Relations<'t> {
    pub table: &'t TypeTable,
    cache: &'t mut SubtypeCache,
}

impl<'t> Relations<'t> {
    pub fn new(table: &'t TypeTable, cache: &'t mut SubtypeCache) -> Self {
        Relations { table, cache }
    }

    /// Whether `a` is a subtype of `b`.
    ///
    /// Reflexive and transitive. `Error` is compatible in both
    /// directions so recovery never cascades. Flexible types relate
    /// through their upper bound on both sides.
    pub fn is_subtype(&mut self, a: &Ty, b: &Ty) -> bool {
        if a == b {
            return true;
        }
        if matches!(a, Ty::Error) || matches!(b, Ty::Error) {
            return true;
        }
        let key = (a.clone(), b.clone());
        if let Some(&hit) = self.cache.memo.get(&key) {
            return hit;
        }
        let result = self.subtype_uncached(a, b);
        self.cache.memo.insert(key, result);
        result
    }

    /// Mutual subtyping. Weaker than `==` (flexible and error aliasing).
    pub fn same_type(&mut self, a: &Ty, b: &Ty) -> bool {
        self.is_subtype(a, b) && self.is_subtype(b, a)
    }

    fn subtype_uncached(&mut self, a: &Ty, b: &Ty) -> bool {
        // Flexible types: only the upper bound participates in subtyping.
        if let Ty::Flexible(fx) = a {
            return self.is_subtype(&fx.upper, b);
        }
        if let Ty::Flexible(fx) = b {
            return self.is_subtype(a, &fx.upper);
        }

        // Intersections: a member on the left suffices, every member on
        // the right is required.
        if let Ty::Intersection(members) = a {
            return members.iter().any(|m| self.is_subtype(m, b));
        }
        if let Ty::Intersection(members) = b {
            return members.iter().all(|m| self.is_subtype(a, m));
        }

        // Nothing is the bottom type; Nothing? additionally carries null.
        if let Ty::Class(c) = a {
            if c.name == "Nothing" {
                return !c.nullable || b.is_nullable();
            }
        }
        // Any is the top of the non-null types; Any? is the top outright.
        if let Ty::Class(c) = b {
            if c.name == "Any" {
                return c.nullable || !a.is_nullable();
            }
        }

        // A nullable type never flows into a non-null one.
        if a.is_nullable() && !b.is_nullable() {
            return false;
        }
        let a = a.clone().not_null();
        let b = b.clone().not_null();

        match (&a, &b) {
            (Ty::Param(p), _) => {
                if let Ty::Param(q) = &b {
                    if p.name == q.name {
                        return true;
                    }
                }
                let upper = p
                    .upper
                    .as_deref()
                    .cloned()
                    .unwrap_or_else(Ty::any_nullable);
                self.is_subtype(&upper, &b)
            }
            (_, Ty::Param(_)) => false,
            (Ty::Infer(_), _) | (_, Ty::Infer(_)) => false,
            (Ty::Fn(f), Ty::Fn(g)) => {
                f.params.len() == g.params.len()
                    && f.params
                        .iter()
                        .zip(g.params.iter())
                        .all(|(fp, gp)| self.is_subtype(gp, fp))
                    && self.is_subtype(&f.ret, &g.ret)
            }
            (Ty::Class(ca), Ty::Class(cb)) => {
                let instance = match self.table.supertype_instance(ca, &cb.name) {
                    Some(instance) => instance,
                    None => return false,
                };
                instance
                    .args
                    .iter()
                    .zip(cb.args.iter())
                    .enumerate()
                    .all(|(i, (lhs, rhs))| {
                        let variance = self.table.variance_of(&cb.name, i);
                        self.arg_subtype(lhs, rhs, variance)
                    })
            }
            _ => false,
        }
    }

    /// Compare one generic argument position under its effective
    /// variance: the declaration-site variance, overridden by any
    /// use-site projection on the supertype side.
    fn arg_subtype(&mut self, lhs: &TyProj, rhs: &TyProj, declared: Variance) -> bool {
        match rhs {
            TyProj::Star => true,
            TyProj::Out(t) => self.is_subtype(&lhs.ty_or_top(), t),
            TyProj::In(t) => match lhs.ty() {
                Some(l) => self.is_subtype(t, l),
                None => false,
            },
            TyProj::Plain(t) => match declared {
                Variance::Out => self.is_subtype(&lhs.ty_or_top(), t),
                Variance::In => match lhs.ty() {
                    Some(l) => self.is_subtype(t, l),
                    None => false,
                },
                Variance::Invariant => match lhs.ty() {
                    Some(l) => self.is_subtype(l, t) && self.is_subtype(t, l),
                    None => false,
                },
            },
        }
    }

    /// Deterministic, total least upper bound over a list of types.
    ///
    /// Never fails: positions that cannot be joined degrade toward
    /// `Any?`. An empty list is the empty join, `Nothing`.
    pub fn least_upper_bound(&mut self, types: &[Ty]) -> Ty {
        let mut iter = types.iter();
        let first = match iter.next() {
            Some(t) => t.clone(),
            None => return Ty::nothing(),
        };
        iter.fold(first, |acc, t| self.lub_pair(&acc, t))
    }

    fn lub_pair(&mut self, a: &Ty, b: &Ty) -> Ty {
        if a == b {
            return a.clone();
        }
        // Error never poisons an inferred type upward.
        if matches!(a, Ty::Error) {
            return b.clone();
        }
        if matches!(b, Ty::Error) {
            return a.clone();
        }
        let nullable = a.is_nullable() || b.is_nullable();
        let a0 = a.clone().not_null();
        let b0 = b.clone().not_null();
        if a0.is_class_named("Nothing") {
            return if nullable { b0.nullable() } else { b0 };
        }
        if b0.is_class_named("Nothing") {
            return if nullable { a0.nullable() } else { a0 };
        }
        if self.is_subtype(&a0, &b0) {
            return if nullable { b0.nullable() } else { b0 };
        }
        if self.is_subtype(&b0, &a0) {
            return if nullable { a0.nullable() } else { a0 };
        }
        if let (Ty::Class(ca), Ty::Class(cb)) = (&a0, &b0) {
            // First common constructor along a's breadth-first chain.
            for candidate in self.table.superclass_chain(ca) {
                if let Some(instance) = self.table.supertype_instance(cb, &candidate.name) {
                    let joined = self.join_args(&candidate, &instance);
                    let ty = Ty::Class(joined);
                    return if nullable { ty.nullable() } else { ty };
                }
            }
        }
        if nullable {
            Ty::any_nullable()
        } else {
            Ty::any()
        }
    }

    fn join_args(&mut self, a: &ClassTy, b: &ClassTy) -> ClassTy {
        let args = a
            .args
            .iter()
            .zip(b.args.iter())
            .enumerate()
            .map(|(i, (x, y))| {
                if x == y {
                    return x.clone();
                }
                match self.table.variance_of(&a.name, i) {
                    Variance::Out => match (x.ty(), y.ty()) {
                        (Some(xt), Some(yt)) => TyProj::Plain(self.lub_pair(xt, yt)),
                        _ => TyProj::Star,
                    },
                    // Disagreeing invariant positions have no exact join;
                    // an out-projection of the join is the closest cover.
                    Variance::Invariant => match (x.ty(), y.ty()) {
                        (Some(xt), Some(yt)) => TyProj::Out(self.lub_pair(xt, yt)),
                        _ => TyProj::Star,
                    },
                    Variance::In => TyProj::Star,
                }
            })
            .collect();
        ClassTy { name: a.name.clone(), args, nullable: false }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn with_relations<R>(f: impl FnOnce(&mut Relations<'_>) -> R) -> R {
        let table = TypeTable::with_builtins();
        let mut cache = SubtypeCache::new();
        let mut rel = Relations::new(&table, &mut cache);
        f(&mut rel)
    }

    #[test]
    fn reflexive_for_everything() {
        with_relations(|rel| {
            for t in [
                Ty::int(),
                Ty::string().nullable(),
                Ty::generic("List", vec![Ty::int()]),
                Ty::fun(vec![Ty::int()], Ty::unit()),
                Ty::param("T"),
            ] {
                assert!(rel.is_subtype(&t, &t), "{} <: {} failed", t, t);
            }
        });
    }

    #[test]
    fn nullability_is_one_way() {
        with_relations(|rel| {
            assert!(rel.is_subtype(&Ty::int(), &Ty::int().nullable()));
            assert!(!rel.is_subtype(&Ty::int().nullable(), &Ty::int()));
        });
    }

    #[test]
    fn class_hierarchy_with_transitivity() {
        with_relations(|rel| {
            let int = Ty::int();
            let number = Ty::number();
            let any = Ty::any();
            assert!(rel.is_subtype(&int, &number));
            assert!(rel.is_subtype(&number, &any));
            assert!(rel.is_subtype(&int, &any));
        });
    }

    #[test]
    fn nothing_is_bottom_any_is_top() {
        with_relations(|rel| {
            assert!(rel.is_subtype(&Ty::nothing(), &Ty::string()));
            assert!(rel.is_subtype(&Ty::string(), &Ty::any()));
            assert!(!rel.is_subtype(&Ty::string().nullable(), &Ty::any()));
            assert!(rel.is_subtype(&Ty::string().nullable(), &Ty::any_nullable()));
        });
    }

    #[test]
    fn covariant_list_contravariant_comparable() {
        with_relations(|rel| {
            let list_int = Ty::generic("List", vec![Ty::int()]);
            let list_number = Ty::generic("List", vec![Ty::number()]);
            assert!(rel.is_subtype(&list_int, &list_number));
            assert!(!rel.is_subtype(&list_number, &list_int));

            let cmp_int = Ty::generic("Comparable", vec![Ty::int()]);
            let cmp_number = Ty::generic("Comparable", vec![Ty::number()]);
            assert!(rel.is_subtype(&cmp_number, &cmp_int));
            assert!(!rel.is_subtype(&cmp_int, &cmp_number));
        });
    }

    #[test]
    fn invariant_mutable_list() {
        with_relations(|rel| {
            let ml_int = Ty::generic("MutableList", vec![Ty::int()]);
            let ml_number = Ty::generic("MutableList", vec![Ty::number()]);
            assert!(!rel.is_subtype(&ml_int, &ml_number));
            // But it widens through its covariant List supertype.
            let list_number = Ty::generic("List", vec![Ty::number()]);
            assert!(rel.is_subtype(&ml_int, &list_number));
        });
    }

    #[test]
    fn use_site_projections() {
        with_relations(|rel| {
            let ml_int = Ty::generic("MutableList", vec![Ty::int()]);
            let ml_out_number = Ty::Class(ClassTy {
                name: "MutableList".into(),
                args: vec![TyProj::Out(Ty::number())],
                nullable: false,
            });
            let ml_star = Ty::Class(ClassTy {
                name: "MutableList".into(),
                args: vec![TyProj::Star],
                nullable: false,
            });
            assert!(rel.is_subtype(&ml_int, &ml_out_number));
            assert!(rel.is_subtype(&ml_int, &ml_star));
        });
    }

    #[test]
    fn flexible_relates_through_upper_bound() {
        with_relations(|rel| {
            let flex = Ty::flexible(Ty::string(), Ty::string().nullable());
            // (String..String?) <: String? via the upper bound, but the
            // nullable upper keeps it out of non-null String.
            assert!(rel.is_subtype(&flex, &Ty::string().nullable()));
            assert!(!rel.is_subtype(&flex, &Ty::string()));
            assert!(rel.is_subtype(&Ty::string(), &flex));
        });
    }

    #[test]
    fn function_types_are_contra_co() {
        with_relations(|rel| {
            let takes_number = Ty::fun(vec![Ty::number()], Ty::int());
            let takes_int = Ty::fun(vec![Ty::int()], Ty::number());
            assert!(rel.is_subtype(&takes_number, &takes_int));
            assert!(!rel.is_subtype(&takes_int, &takes_number));
        });
    }

    #[test]
    fn intersection_member_rules() {
        with_relations(|rel| {
            let both = Ty::Intersection(vec![Ty::any(), Ty::string()]);
            assert!(rel.is_subtype(&both, &Ty::string()));
            assert!(rel.is_subtype(&both, &Ty::class("CharSequence")));
            assert!(rel.is_subtype(&Ty::string(), &Ty::Intersection(vec![
                Ty::any(),
                Ty::class("CharSequence"),
            ])));
        });
    }

    #[test]
    fn lub_is_total_and_deterministic() {
        with_relations(|rel| {
            assert_eq!(rel.least_upper_bound(&[]), Ty::nothing());
            assert_eq!(rel.least_upper_bound(&[Ty::int()]), Ty::int());
            assert_eq!(rel.least_upper_bound(&[Ty::int(), Ty::double()]), Ty::number());
            // Int and String meet at Comparable; its contravariant slot
            // has no join, so it star-projects.
            let comparable_star = Ty::Class(ClassTy {
                name: "Comparable".into(),
                args: vec![TyProj::Star],
                nullable: false,
            });
            assert_eq!(
                rel.least_upper_bound(&[Ty::int(), Ty::string()]),
                comparable_star.clone()
            );
            assert_eq!(
                rel.least_upper_bound(&[Ty::int(), Ty::string().nullable()]),
                comparable_star.nullable()
            );
            // No common superclass at all falls back to Any.
            assert_eq!(rel.least_upper_bound(&[Ty::int(), Ty::boolean()]), Ty::any());
            // Same inputs, same output.
            let once = rel.least_upper_bound(&[Ty::int(), Ty::double(), Ty::string()]);
            let twice = rel.least_upper_bound(&[Ty::int(), Ty::double(), Ty::string()]);
            assert_eq!(once, twice);
        });
    }

    #[test]
    fn lub_joins_covariant_arguments() {
        with_relations(|rel| {
            let list_int = Ty::generic("List", vec![Ty::int()]);
            let list_double = Ty::generic("List", vec![Ty::double()]);
            assert_eq!(
                rel.least_upper_bound(&[list_int, list_double]),
                Ty::generic("List", vec![Ty::number()])
            );
        });
    }

    #[test]
    fn lub_projects_disagreeing_invariant_arguments() {
        with_relations(|rel| {
            let ml_int = Ty::generic("MutableList", vec![Ty::int()]);
            let ml_string = Ty::generic("MutableList", vec![Ty::string()]);
            let joined = rel.least_upper_bound(&[ml_int, ml_string]);
            // The disagreeing element type joins to Comparable<*> (the
            // nearest common superclass of Int and String), covered by
            // an out-projection.
            let element = Ty::Class(ClassTy {
                name: "Comparable".into(),
                args: vec![TyProj::Star],
                nullable: false,
            });
            let expected = Ty::Class(ClassTy {
                name: "MutableList".into(),
                args: vec![TyProj::Out(element)],
                nullable: false,
            });
            assert_eq!(joined, expected);
        });
    }

    #[test]
    fn nothing_vanishes_in_lub() {
        with_relations(|rel| {
            assert_eq!(rel.least_upper_bound(&[Ty::nothing(), Ty::int()]), Ty::int());
            assert_eq!(
                rel.least_upper_bound(&[Ty::nothing().nullable(), Ty::int()]),
                Ty::int().nullable()
            );
        });
    }
}
