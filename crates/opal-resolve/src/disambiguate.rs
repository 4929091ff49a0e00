//! Overload disambiguation.
//!
//! Applies an ordered list of tie-break rules over the applicable
//! candidates, stopping at the first rule that leaves a single
//! survivor. The rule order is product policy and has shifted between
//! language versions, so it lives in a plain replaceable slice instead
//! of interleaved logic.

use opal_types::{substitute, Relations, Ty};
use rustc_hash::FxHashMap;

use crate::callsite::Declaration;
use crate::check::Candidate;

/// One tie-break rule. Each narrows the surviving set; a rule that
/// would eliminate everyone leaves the set unchanged.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TieBreak {
    /// Prefer candidates needing the fewest implicit adjustments
    /// (defaulted parameters, vararg packaging).
    FewestConversions,
    /// Prefer pointwise more specific parameter types.
    MostSpecificParameters,
    /// Prefer a non-generic candidate over a generic one.
    NonGenericOverGeneric,
    /// Prefer the closest lookup scope (local, member, extension,
    /// imported, in that order).
    ClosestScope,
}

pub const DEFAULT_TIE_BREAKS: &[TieBreak] = &[
    TieBreak::FewestConversions,
    TieBreak::MostSpecificParameters,
    TieBreak::NonGenericOverGeneric,
    TieBreak::ClosestScope,
];

/// Outcome of ranking the judged candidates.
#[derive(Debug)]
pub(crate) enum Choice {
    Winner(usize),
    /// Multiple candidates survived every rule.
    Ambiguous(Vec<usize>),
    NoneApplicable,
}

pub(crate) fn disambiguate(candidates: &[Candidate], rel: &mut Relations<'_>) -> Choice {
    disambiguate_with(DEFAULT_TIE_BREAKS, candidates, rel)
}

pub(crate) fn disambiguate_with(
    rules: &[TieBreak],
    candidates: &[Candidate],
    rel: &mut Relations<'_>,
) -> Choice {
    let mut alive: Vec<usize> = candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| c.applicable)
        .map(|(i, _)| i)
        .collect();
    if alive.is_empty() {
        return Choice::NoneApplicable;
    }
    for rule in rules {
        if alive.len() == 1 {
            break;
        }
        let narrowed = apply_rule(*rule, &alive, candidates, rel);
        if !narrowed.is_empty() {
            alive = narrowed;
        }
    }
    if alive.len() == 1 {
        Choice::Winner(alive[0])
    } else {
        Choice::Ambiguous(alive)
    }
}

fn apply_rule(
    rule: TieBreak,
    alive: &[usize],
    candidates: &[Candidate],
    rel: &mut Relations<'_>,
) -> Vec<usize> {
    match rule {
        TieBreak::FewestConversions => {
            let best = alive
                .iter()
                .map(|&i| candidates[i].conversions)
                .min()
                .unwrap_or(0);
            alive.iter().copied().filter(|&i| candidates[i].conversions == best).collect()
        }
        TieBreak::MostSpecificParameters => {
            // Keep the pairwise-maximal candidates.
            alive
                .iter()
                .copied()
                .filter(|&i| {
                    !alive.iter().any(|&j| {
                        j != i && beats(&candidates[j].decl, &candidates[i].decl, rel)
                    })
                })
                .collect()
        }
        TieBreak::NonGenericOverGeneric => alive
            .iter()
            .copied()
            .filter(|&i| candidates[i].decl.type_params.is_empty())
            .collect(),
        TieBreak::ClosestScope => {
            let best = alive
                .iter()
                .map(|&i| candidates[i].decl.scope.rank())
                .min()
                .unwrap_or(0);
            alive.iter().copied().filter(|&i| candidates[i].decl.scope.rank() == best).collect()
        }
    }
}

/// `a` beats `b` when every comparison parameter of `a` is a subtype of
/// `b`'s and at least one is strictly narrower. Comparison types erase
/// type parameters to their declared upper bounds, so a generic
/// candidate competes with the widest types it can accept.
fn beats(a: &Declaration, b: &Declaration, rel: &mut Relations<'_>) -> bool {
    let pa = comparison_types(a);
    let pb = comparison_types(b);
    if pa.len() != pb.len() {
        return false;
    }
    let mut strictly = false;
    for (x, y) in pa.iter().zip(pb.iter()) {
        if !rel.is_subtype(x, y) {
            return false;
        }
        if !rel.is_subtype(y, x) {
            strictly = true;
        }
    }
    strictly
}

fn comparison_types(decl: &Declaration) -> Vec<Ty> {
    let mut erasure = FxHashMap::default();
    for tp in &decl.type_params {
        erasure.insert(tp.name.clone(), tp.upper.clone().unwrap_or_else(Ty::any_nullable));
    }
    decl.params.iter().map(|p| substitute(&p.ty, &erasure)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callsite::{Param, ScopeKind, TypeParam};
    use opal_types::{SubtypeCache, TypeTable};

    fn plain(decl: Declaration) -> Candidate {
        Candidate {
            decl,
            vars: Vec::new(),
            applicable: true,
            diagnostics: Vec::new(),
            conversions: 0,
            narrowing_used: false,
        }
    }

    fn run(candidates: &[Candidate]) -> Choice {
        let table = TypeTable::with_builtins();
        let mut cache = SubtypeCache::new();
        let mut rel = Relations::new(&table, &mut cache);
        disambiguate(candidates, &mut rel)
    }

    #[test]
    fn more_specific_parameter_wins() {
        let candidates = vec![
            plain(Declaration::top_level("f", vec![Param::new("x", Ty::number())], Ty::unit())),
            plain(Declaration::top_level("f", vec![Param::new("x", Ty::int())], Ty::unit())),
        ];
        let Choice::Winner(i) = run(&candidates) else { panic!("expected a winner") };
        assert_eq!(candidates[i].decl.params[0].ty, Ty::int());
    }

    #[test]
    fn conversions_outrank_specificity() {
        let mut defaulted = plain(Declaration::top_level(
            "f",
            vec![Param::new("x", Ty::int()), Param::defaulted("y", Ty::int())],
            Ty::unit(),
        ));
        defaulted.conversions = 1;
        let exact =
            plain(Declaration::top_level("f", vec![Param::new("x", Ty::number())], Ty::unit()));
        let candidates = vec![defaulted, exact];
        let Choice::Winner(i) = run(&candidates) else { panic!("expected a winner") };
        assert_eq!(i, 1);
    }

    #[test]
    fn non_generic_beats_generic_of_equal_specificity() {
        let generic = plain(
            Declaration::top_level("f", vec![Param::new("x", Ty::param("T"))], Ty::unit())
                .with_type_params(vec![TypeParam::new("T")]),
        );
        let concrete =
            plain(Declaration::top_level("f", vec![Param::new("x", Ty::any_nullable())], Ty::unit()));
        let candidates = vec![generic, concrete];
        let Choice::Winner(i) = run(&candidates) else { panic!("expected a winner") };
        assert_eq!(i, 1);
    }

    #[test]
    fn closer_scope_is_the_last_resort() {
        let imported = plain(
            Declaration::top_level("f", vec![Param::new("x", Ty::int())], Ty::unit())
                .with_scope(ScopeKind::Imported),
        );
        let local = plain(
            Declaration::top_level("f", vec![Param::new("x", Ty::int())], Ty::unit())
                .with_scope(ScopeKind::Local),
        );
        let candidates = vec![imported, local];
        let Choice::Winner(i) = run(&candidates) else { panic!("expected a winner") };
        assert_eq!(i, 1);
    }

    #[test]
    fn true_ties_are_ambiguous() {
        let candidates = vec![
            plain(Declaration::top_level("f", vec![Param::new("x", Ty::int())], Ty::unit())),
            plain(Declaration::top_level("f", vec![Param::new("x", Ty::int())], Ty::unit())),
        ];
        assert!(matches!(run(&candidates), Choice::Ambiguous(set) if set.len() == 2));
    }

    #[test]
    fn zero_applicable_is_distinct_from_ambiguity() {
        let mut c = plain(Declaration::top_level("f", vec![], Ty::unit()));
        c.applicable = false;
        assert!(matches!(run(&[c]), Choice::NoneApplicable));
    }
}
