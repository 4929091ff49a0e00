//! Candidate collection.
//!
//! Gathers name-matching declarations from the symbol-lookup
//! collaborator and pre-filters them by the receiver's initial shape,
//! before any constraint solving happens. The output order is
//! significant: candidates are stably sorted by lookup-scope priority
//! (local, member, extension, imported) and that order is the final
//! tie-break input for disambiguation.

use opal_types::{Ty, TypeTable};

use crate::callsite::{CallSite, Declaration, ScopeKind, SymbolLookup, Visibility};

/// Collect the candidate declarations for `call`.
///
/// `receiver_shape` is the explicit receiver's type when it is already
/// known (a typed value or a local); `None` when there is no explicit
/// receiver or its type is not yet available, in which case no shape
/// filtering happens.
pub fn collect_candidates(
    lookup: &dyn SymbolLookup,
    call: &CallSite,
    receiver_shape: Option<&Ty>,
    table: &TypeTable,
) -> Vec<Declaration> {
    let mut candidates: Vec<Declaration> = lookup
        .lookup(&call.name)
        .into_iter()
        .filter(|decl| visible_here(decl))
        .filter(|decl| {
            if call.receiver.is_some() {
                // An explicit receiver rules out receiver-less candidates.
                if decl.receiver_ty().is_none() {
                    return false;
                }
            }
            match (receiver_shape, decl.receiver_ty()) {
                (Some(shape), Some(declared)) => shape_compatible(shape, declared, table),
                _ => true,
            }
        })
        .collect();
    // Stable: within one scope rank, lookup order is preserved.
    candidates.sort_by_key(|decl| decl.scope.rank());
    candidates
}

fn visible_here(decl: &Declaration) -> bool {
    // Visibility is resolved by the lookup phase for all but one case:
    // a private declaration reachable only through an import is never
    // callable here.
    !(decl.visibility == Visibility::Private && decl.scope == ScopeKind::Imported)
}

/// Cheap constructor-level compatibility, used before full subtyping is
/// possible. Only a provable mismatch excludes a candidate; anything
/// involving type parameters or inference stays in for the checker to
/// judge.
fn shape_compatible(shape: &Ty, declared: &Ty, table: &TypeTable) -> bool {
    let declared_class = match declared {
        Ty::Class(c) => c,
        // Parameterized or otherwise non-nominal receivers are judged by
        // the checker, not here.
        _ => return true,
    };
    if declared_class.name == "Any" {
        return true;
    }
    match shape {
        Ty::Class(c) => {
            c.name == declared_class.name
                || table.supertype_instance(c, &declared_class.name).is_some()
        }
        Ty::Intersection(members) => {
            members.iter().any(|m| shape_compatible(m, declared, table))
        }
        Ty::Flexible(fx) => shape_compatible(&fx.upper, declared, table),
        Ty::Fn(_) => declared_class.name == "Function",
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callsite::{span, ArgValue, DeclKind};
    use opal_types::applied;

    struct FixedLookup(Vec<Declaration>);

    impl SymbolLookup for FixedLookup {
        fn lookup(&self, name: &str) -> Vec<Declaration> {
            self.0.iter().filter(|d| d.name == name).cloned().collect()
        }
    }

    fn ext(name: &str, receiver: Ty) -> Declaration {
        Declaration::top_level(name, vec![], Ty::unit())
            .with_kind(DeclKind::Extension { receiver })
            .with_scope(ScopeKind::Extension)
    }

    #[test]
    fn candidates_order_by_scope_rank() {
        let table = TypeTable::with_builtins();
        let lookup = FixedLookup(vec![
            Declaration::top_level("f", vec![], Ty::unit()).with_scope(ScopeKind::Imported),
            Declaration::top_level("f", vec![], Ty::unit()).with_scope(ScopeKind::Local),
            ext("f", Ty::int()),
        ]);
        let call = CallSite::new("f", span(0, 1));
        let found = collect_candidates(&lookup, &call, None, &table);
        let ranks: Vec<u8> = found.iter().map(|d| d.scope.rank()).collect();
        assert_eq!(ranks, vec![0, 2, 3]);
    }

    #[test]
    fn receiver_shape_excludes_foreign_extensions() {
        let table = TypeTable::with_builtins();
        let lookup = FixedLookup(vec![
            ext("pretty", Ty::string()),
            ext("pretty", Ty::int()),
            ext("pretty", Ty::any()),
        ]);
        let call = CallSite::new("pretty", span(0, 6))
            .with_receiver(ArgValue::Typed(Ty::int()));
        let found = collect_candidates(&lookup, &call, Some(&Ty::int()), &table);
        assert_eq!(found.len(), 2);
        assert!(found
            .iter()
            .all(|d| d.receiver_ty() != Some(&Ty::string())));
    }

    #[test]
    fn supertype_receivers_stay_in() {
        let table = TypeTable::with_builtins();
        let lookup = FixedLookup(vec![ext("sum", Ty::Class(applied(
            "Collection",
            vec![Ty::int()],
        )))]);
        let call = CallSite::new("sum", span(0, 3)).with_receiver(ArgValue::Typed(Ty::Class(
            applied("List", vec![Ty::int()]),
        )));
        let shape = Ty::Class(applied("List", vec![Ty::int()]));
        let found = collect_candidates(&lookup, &call, Some(&shape), &table);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn explicit_receiver_rules_out_receiverless_candidates() {
        let table = TypeTable::with_builtins();
        let lookup = FixedLookup(vec![
            Declaration::top_level("f", vec![], Ty::unit()),
            ext("f", Ty::int()),
        ]);
        let call = CallSite::new("f", span(0, 1)).with_receiver(ArgValue::Typed(Ty::int()));
        let found = collect_candidates(&lookup, &call, Some(&Ty::int()), &table);
        assert_eq!(found.len(), 1);
        assert!(found[0].receiver_ty().is_some());
    }
}
