//! Opal call resolution: constraint-based type inference and overload
//! selection.
//!
//! This crate takes an abstract description of a call site (receiver,
//! arguments, expected type, syntactic lambdas) plus a symbol-lookup
//! collaborator and produces the chosen declaration, the inferred type
//! arguments, and every diagnostic found along the way. It supports:
//!
//! - Generic inference through lower/upper bound constraints
//! - Overload disambiguation with a replaceable tie-break policy
//! - Named arguments, defaulted parameters, varargs and spread
//! - Postponed lambda analysis ("builder inference")
//! - Flow-sensitive narrowing of stable locals (smart casts)
//!
//! # Architecture
//!
//! - [`callsite`]: Call-site and declaration descriptions (the inputs)
//! - [`constraint`]: Type variables, bounds, fixation, snapshots
//! - [`collect`]: Name-based candidate gathering and shape filtering
//! - `check`: Per-candidate applicability and constraint generation
//! - [`disambiguate`]: Tie-break ranking over applicable candidates
//! - `postpone`: Deferred-lambda rounds feeding constraints back
//! - [`narrow`]: Smart-cast facts over control flow
//! - [`error`]: The diagnostic taxonomy

pub mod callsite;
pub mod collect;
pub mod constraint;
pub mod disambiguate;
pub mod error;
pub mod narrow;

mod check;
mod postpone;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rowan::TextRange;

use opal_types::{substitute, Relations, SubtypeCache, Ty, TypeTable};
use rustc_hash::FxHashMap;

use crate::callsite::{ArgValue, CallSite, Declaration, LocalId, Locals, ProgramPoint, SymbolLookup};
use crate::check::{Candidate, PendingLambda};
use crate::collect::collect_candidates;
use crate::constraint::ConstraintSystem;
use crate::disambiguate::{disambiguate, Choice};
use crate::error::Diagnostic;
use crate::narrow::Narrower;

/// Guards against a call site syntactically containing itself.
const MAX_CALL_DEPTH: usize = 64;

/// The final output for one call site: the chosen declaration, the
/// fixed substitution for its type parameters, and everything the
/// resolution learned on the way. Immutable once produced.
#[derive(Debug)]
pub struct ResolvedCall {
    pub decl: Declaration,
    /// Type arguments in declaration order.
    pub substitution: Vec<(String, Ty)>,
    pub return_ty: Ty,
    /// Diagnostics attached to the winning candidate, including those
    /// from postponed lambdas and fixation. May be non-empty even for a
    /// successful resolution.
    pub diagnostics: Vec<Diagnostic>,
    /// Whether any argument's type came from a smart-cast fact rather
    /// than a declared type.
    pub narrowing_used: bool,
}

/// Failure to produce a [`ResolvedCall`] at all. Everything milder is a
/// diagnostic inside a successful result.
#[derive(Debug)]
pub enum ResolveError {
    /// No candidate could be chosen; the expression's type for
    /// downstream use is the error type.
    Unresolved(Vec<Diagnostic>),
    /// A candidate referenced a class the type table does not know.
    /// The collaborator contract was not honored; this is fatal.
    MissingClass(String),
    Cancelled,
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::Unresolved(diags) => {
                write!(f, "unresolved call ({} diagnostic(s))", diags.len())
            }
            ResolveError::MissingClass(name) => {
                write!(f, "class `{name}` is not registered in the type table")
            }
            ResolveError::Cancelled => write!(f, "resolution cancelled"),
        }
    }
}

impl std::error::Error for ResolveError {}

/// What one call inside [`Resolver::resolve_in_system`] produced.
pub(crate) struct CallOutcome {
    pub ty: Ty,
    pub diagnostics: Vec<Diagnostic>,
    pub winner: Option<Candidate>,
}

/// The resolution engine for one enclosing declaration.
///
/// Owns the smart-cast state and the subtype cache; each
/// [`resolve_call`](Resolver::resolve_call) gets its own constraint
/// system, so independent declarations can be resolved in parallel by
/// giving each its own `Resolver`.
pub struct Resolver<'a> {
    pub(crate) lookup: &'a dyn SymbolLookup,
    pub(crate) table: &'a TypeTable,
    pub(crate) cache: SubtypeCache,
    pub(crate) locals: Locals,
    pub(crate) narrower: Narrower,
    cancel: Option<Arc<AtomicBool>>,
    /// Spans of calls currently being resolved, for the cycle guard.
    active: Vec<TextRange>,
    /// Parameter types of lambdas whose bodies are being analyzed,
    /// innermost last.
    pub(crate) lambda_scopes: Vec<Vec<Ty>>,
    pub(crate) pending: Vec<PendingLambda>,
}

impl<'a> Resolver<'a> {
    pub fn new(lookup: &'a dyn SymbolLookup, table: &'a TypeTable) -> Self {
        Resolver {
            lookup,
            table,
            cache: SubtypeCache::new(),
            locals: Locals::new(),
            narrower: Narrower::new(),
            cancel: None,
            active: Vec::new(),
            lambda_scopes: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// Install a cancellation flag, checked between candidates and
    /// between fixation rounds.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub(crate) fn check_cancelled(&self) -> Result<(), ResolveError> {
        match &self.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(ResolveError::Cancelled),
            _ => Ok(()),
        }
    }

    // ── Locals and narrowing ────────────────────────────────────────────

    /// Register a local of the enclosing declaration.
    pub fn declare_local(&mut self, name: &str, declared: Ty, stable: bool) -> LocalId {
        self.locals.declare(name, declared, stable)
    }

    /// Record an `x is T` fact from a passed condition.
    pub fn assume_instance(&mut self, local: LocalId, ty: &Ty) {
        let mut rel = Relations::new(self.table, &mut self.cache);
        self.narrower.assume_instance(&self.locals, local, ty, &mut rel);
    }

    /// Record an `x != null` fact from a passed condition.
    pub fn assume_non_null(&mut self, local: LocalId) {
        self.narrower.assume_non_null(&self.locals, local);
    }

    /// An assignment to `local` on some path invalidates its facts.
    pub fn assign(&mut self, local: LocalId) {
        self.narrower.on_assign(local);
    }

    /// Pin the facts currently in force to `point`.
    pub fn mark(&mut self, point: ProgramPoint) {
        self.narrower.mark(point);
    }

    /// The flow-narrowed type of `local` at a marked point, for later
    /// phases that need it rather than the declared type.
    pub fn narrowed_type_at(&self, point: ProgramPoint, local: LocalId) -> Ty {
        self.narrower.narrowed_type_at(&self.locals, point, local)
    }

    /// Direct access to the narrower for branch bookkeeping.
    pub fn narrower_mut(&mut self) -> &mut Narrower {
        &mut self.narrower
    }

    // ── Resolution ──────────────────────────────────────────────────────

    /// Resolve one call site to a declaration and a substitution.
    ///
    /// Diagnostics that do not prevent choosing a winner come back
    /// inside the `Ok`; `Err(Unresolved)` means no candidate could be
    /// chosen and downstream should use the error type.
    pub fn resolve_call(&mut self, call: &CallSite) -> Result<ResolvedCall, ResolveError> {
        self.active.clear();
        self.lambda_scopes.clear();
        self.pending.clear();

        let mut cs = ConstraintSystem::new();
        let outcome = self.resolve_in_system(&mut cs, call, None)?;
        let mut diagnostics = outcome.diagnostics;

        diagnostics.extend(self.run_postponed_rounds(&mut cs, call.span)?);
        {
            let mut rel = Relations::new(self.table, &mut self.cache);
            diagnostics.extend(cs.fix_variables(&mut rel, call.span));
        }

        match outcome.winner {
            Some(winner) => {
                let substitution = winner
                    .vars
                    .iter()
                    .map(|(name, var)| (name.clone(), cs.resolved(*var)))
                    .collect();
                let return_ty = cs.resolve(&outcome.ty);
                Ok(ResolvedCall {
                    decl: winner.decl,
                    substitution,
                    return_ty,
                    diagnostics,
                    narrowing_used: winner.narrowing_used,
                })
            }
            None => Err(ResolveError::Unresolved(diagnostics)),
        }
    }

    /// Resolve a call inside an already-open constraint system, so a
    /// nested call's variables stay connected to its parent's.
    pub(crate) fn resolve_in_system(
        &mut self,
        cs: &mut ConstraintSystem,
        call: &CallSite,
        expected: Option<&Ty>,
    ) -> Result<CallOutcome, ResolveError> {
        self.check_cancelled()?;
        if self.active.contains(&call.span) || self.active.len() >= MAX_CALL_DEPTH {
            return Ok(CallOutcome {
                ty: Ty::Error,
                diagnostics: vec![Diagnostic::CyclicCall { span: call.span }],
                winner: None,
            });
        }
        self.active.push(call.span);
        let result = self.resolve_candidates(cs, call, expected);
        self.active.pop();
        result
    }

    fn resolve_candidates(
        &mut self,
        cs: &mut ConstraintSystem,
        call: &CallSite,
        expected: Option<&Ty>,
    ) -> Result<CallOutcome, ResolveError> {
        let shape = self.receiver_shape(cs, call);
        let decls = collect_candidates(self.lookup, call, shape.as_ref(), self.table);
        if decls.is_empty() {
            return Ok(CallOutcome {
                ty: Ty::Error,
                diagnostics: vec![Diagnostic::UnresolvedReference {
                    name: call.name.clone(),
                    span: call.span,
                }],
                winner: None,
            });
        }

        // Judge every candidate speculatively; nothing a candidate does
        // to the system or the pending-lambda list survives its check.
        let mut judged = Vec::new();
        for decl in &decls {
            self.check_cancelled()?;
            let snap = cs.snapshot();
            let pending_base = self.pending.len();
            let candidate = self.check_candidate(cs, call, decl, expected)?;
            cs.rollback(snap);
            self.pending.truncate(pending_base);
            judged.push(candidate);
        }

        let choice = {
            let mut rel = Relations::new(self.table, &mut self.cache);
            disambiguate(&judged, &mut rel)
        };
        match choice {
            Choice::Winner(i) => {
                // Replay the winner's constraints for real.
                let decl = judged[i].decl.clone();
                let snap = cs.snapshot();
                let winner = self.check_candidate(cs, call, &decl, expected)?;
                cs.commit(snap);
                let map: FxHashMap<String, Ty> = winner
                    .vars
                    .iter()
                    .map(|(name, var)| (name.clone(), Ty::infer(*var)))
                    .collect();
                let ty = substitute(&winner.decl.ret, &map);
                Ok(CallOutcome {
                    ty,
                    diagnostics: winner.diagnostics.clone(),
                    winner: Some(winner),
                })
            }
            Choice::Ambiguous(set) => Ok(CallOutcome {
                ty: Ty::Error,
                diagnostics: vec![Diagnostic::OverloadAmbiguity {
                    name: call.name.clone(),
                    candidates: set.iter().map(|&i| judged[i].decl.render_key()).collect(),
                    span: call.span,
                }],
                winner: None,
            }),
            Choice::NoneApplicable => {
                // With a single candidate its own diagnostics say more
                // than a generic unresolved-call report.
                let diagnostics = if judged.len() == 1 {
                    judged.into_iter().next().map(|c| c.diagnostics).unwrap_or_default()
                } else {
                    vec![Diagnostic::UnresolvedCall { name: call.name.clone(), span: call.span }]
                };
                Ok(CallOutcome { ty: Ty::Error, diagnostics, winner: None })
            }
        }
    }

    /// The explicit receiver's type when cheaply known, for the
    /// collector's shape filter.
    fn receiver_shape(&mut self, cs: &mut ConstraintSystem, call: &CallSite) -> Option<Ty> {
        match call.receiver.as_deref() {
            Some(ArgValue::Typed(ty)) => Some(ty.clone()),
            Some(ArgValue::Local(id)) => Some(self.narrower.type_of(&self.locals, *id)),
            Some(ArgValue::LambdaParam(i)) => self
                .lambda_scopes
                .last()
                .and_then(|params| params.get(*i))
                .map(|ty| cs.resolve(ty)),
            _ => None,
        }
    }
}
