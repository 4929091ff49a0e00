//! Smart-cast narrowing as seen through call resolution.
//!
//! These tests verify that:
//! - A passed `is` check lets a wider local satisfy a narrower
//!   parameter, and the result records that narrowing was used
//! - Facts vanish at merge points unless both branches agree
//! - Assignment invalidates facts
//! - `narrowed_type_at` answers idempotently for marked points

use opal_resolve::callsite::{
    span, ArgValue, Argument, CallSite, Declaration, LocalId, Param, ProgramPoint, SymbolLookup,
};
use opal_resolve::error::Diagnostic;
use opal_resolve::{ResolveError, Resolver};
use opal_types::{Ty, TypeTable};

// ── Helpers ────────────────────────────────────────────────────────────

struct Symbols(Vec<Declaration>);

impl SymbolLookup for Symbols {
    fn lookup(&self, name: &str) -> Vec<Declaration> {
        self.0.iter().filter(|d| d.name == name).cloned().collect()
    }
}

fn shout_decl() -> Declaration {
    Declaration::top_level("shout", vec![Param::new("s", Ty::string())], Ty::string())
}

fn call_with_local(local: LocalId) -> CallSite {
    CallSite::new("shout", span(0, 8))
        .with_args(vec![Argument::positional(ArgValue::Local(local), span(6, 7))])
}

// ── Narrowing in resolution ────────────────────────────────────────────

#[test]
fn test_passed_type_check_narrows_argument() {
    // Scenario: val x: Any = "s"; if (x is String) shout(x)
    let table = TypeTable::with_builtins();
    let symbols = Symbols(vec![shout_decl()]);
    let mut resolver = Resolver::new(&symbols, &table);
    let x = resolver.declare_local("x", Ty::any(), true);

    // Without the fact, Any cannot satisfy String.
    let err = resolver.resolve_call(&call_with_local(x)).unwrap_err();
    assert!(matches!(err, ResolveError::Unresolved(_)));

    resolver.assume_instance(x, &Ty::string());
    let resolved = resolver.resolve_call(&call_with_local(x)).expect("should resolve");
    assert!(resolved.diagnostics.is_empty());
    assert!(resolved.narrowing_used);
}

#[test]
fn test_unstable_local_does_not_narrow() {
    let table = TypeTable::with_builtins();
    let symbols = Symbols(vec![shout_decl()]);
    let mut resolver = Resolver::new(&symbols, &table);
    let x = resolver.declare_local("x", Ty::any(), false);

    resolver.assume_instance(x, &Ty::string());
    let err = resolver.resolve_call(&call_with_local(x)).unwrap_err();
    let ResolveError::Unresolved(diags) = err else { panic!("expected unresolved") };
    assert!(matches!(&diags[0], Diagnostic::ArgumentTypeMismatch { found, .. } if *found == Ty::any()));
}

#[test]
fn test_fact_disappears_at_branch_merge() {
    let table = TypeTable::with_builtins();
    let symbols = Symbols(vec![shout_decl()]);
    let mut resolver = Resolver::new(&symbols, &table);
    let x = resolver.declare_local("x", Ty::any(), true);

    // if (x is String) { ... } else { }: only the then-arm has the fact.
    let base = resolver.narrower_mut().fork();
    resolver.assume_instance(x, &Ty::string());
    let then_arm = resolver.narrower_mut().take_branch(&base);
    let else_arm = resolver.narrower_mut().take_branch(&base);
    resolver.narrower_mut().merge(then_arm, else_arm);

    assert!(resolver.resolve_call(&call_with_local(x)).is_err());
}

#[test]
fn test_agreeing_branches_keep_the_fact() {
    let table = TypeTable::with_builtins();
    let symbols = Symbols(vec![shout_decl()]);
    let mut resolver = Resolver::new(&symbols, &table);
    let x = resolver.declare_local("x", Ty::any(), true);

    let base = resolver.narrower_mut().fork();
    resolver.assume_instance(x, &Ty::string());
    let then_arm = resolver.narrower_mut().take_branch(&base);
    resolver.assume_instance(x, &Ty::string());
    let else_arm = resolver.narrower_mut().take_branch(&base);
    resolver.narrower_mut().merge(then_arm, else_arm);

    assert!(resolver.resolve_call(&call_with_local(x)).is_ok());
}

#[test]
fn test_assignment_invalidates_the_fact() {
    let table = TypeTable::with_builtins();
    let symbols = Symbols(vec![shout_decl()]);
    let mut resolver = Resolver::new(&symbols, &table);
    let x = resolver.declare_local("x", Ty::any(), true);

    resolver.assume_instance(x, &Ty::string());
    assert!(resolver.resolve_call(&call_with_local(x)).is_ok());
    resolver.assign(x);
    assert!(resolver.resolve_call(&call_with_local(x)).is_err());
}

#[test]
fn test_non_null_fact_satisfies_non_null_parameter() {
    let table = TypeTable::with_builtins();
    let symbols = Symbols(vec![shout_decl()]);
    let mut resolver = Resolver::new(&symbols, &table);
    let x = resolver.declare_local("x", Ty::string().nullable(), true);

    assert!(resolver.resolve_call(&call_with_local(x)).is_err());
    resolver.assume_non_null(x);
    let resolved = resolver.resolve_call(&call_with_local(x)).expect("should resolve");
    assert!(resolved.narrowing_used);
}

// ── Program-point queries ──────────────────────────────────────────────

#[test]
fn test_narrowed_type_at_is_idempotent() {
    let table = TypeTable::with_builtins();
    let symbols = Symbols(vec![]);
    let mut resolver = Resolver::new(&symbols, &table);
    let x = resolver.declare_local("x", Ty::any(), true);

    resolver.assume_instance(x, &Ty::string());
    let point = ProgramPoint(42);
    resolver.mark(point);
    resolver.assign(x);

    let first = resolver.narrowed_type_at(point, x);
    let second = resolver.narrowed_type_at(point, x);
    assert_eq!(first, Ty::string());
    assert_eq!(first, second);
}

#[test]
fn test_unmarked_point_answers_the_declared_type() {
    let table = TypeTable::with_builtins();
    let symbols = Symbols(vec![]);
    let mut resolver = Resolver::new(&symbols, &table);
    let x = resolver.declare_local("x", Ty::any(), true);
    assert_eq!(resolver.narrowed_type_at(ProgramPoint(7), x), Ty::any());
}
