//! Postponed-lambda rounds (builder inference).
//!
//! After the winning candidate's direct constraints are in, any lambda
//! whose parameter types still depend on unfixed variables sits in the
//! resolver's pending list. Each round first fixes every variable the
//! pending lambdas do not feed on, then analyzes the lambdas whose
//! parameter shapes have become known -- the constraints their bodies
//! produce flow back into the same system, which is what lets
//! `build { it.add(1) }` pin the container's element type from inside
//! the lambda. Rounds are bounded by the number of pending lambdas, so
//! the loop always terminates.

use rowan::TextRange;
use rustc_hash::FxHashSet;

use opal_types::{Relations, Ty};

use crate::constraint::ConstraintSystem;
use crate::error::Diagnostic;
use crate::{ResolveError, Resolver};

impl<'a> Resolver<'a> {
    pub(crate) fn run_postponed_rounds(
        &mut self,
        cs: &mut ConstraintSystem,
        span: TextRange,
    ) -> Result<Vec<Diagnostic>, ResolveError> {
        let mut diags = Vec::new();
        let max_rounds = self.pending.len();
        for _ in 0..max_rounds {
            if self.pending.is_empty() {
                break;
            }
            self.check_cancelled()?;

            // Fix everything except the variables the lambda bodies are
            // expected to pin down themselves: those a pending lambda's
            // type mentions and nothing else has constrained yet. A
            // variable already determined by an outer argument fixes
            // now, so the lambda sees it concrete.
            let mut keep = FxHashSet::default();
            let declared: Vec<Ty> = self.pending.iter().map(|p| p.declared.clone()).collect();
            for ty in &declared {
                let mut vars = Vec::new();
                match cs.resolve(ty) {
                    Ty::Fn(f) => {
                        for param in &f.params {
                            vars.extend(cs.unfixed_vars_in(param));
                        }
                        vars.extend(cs.unfixed_vars_in(&f.ret));
                    }
                    other => vars.extend(cs.unfixed_vars_in(&other)),
                }
                for var in vars {
                    if !cs.determined(var) {
                        keep.insert(var);
                    }
                }
            }
            {
                let mut rel = Relations::new(self.table, &mut self.cache);
                diags.extend(cs.fix_except(&mut rel, &keep, span));
            }

            let mut analyzed_any = false;
            let mut still_pending = Vec::new();
            for pending in std::mem::take(&mut self.pending) {
                let resolved = cs.resolve(&pending.declared);
                match resolved {
                    // Analyzable once no parameter is a bare variable;
                    // a known constructor whose arguments are still
                    // open is exactly the builder case.
                    Ty::Fn(f) if f.params.iter().all(|p| !matches!(p, Ty::Infer(_))) => {
                        let snap = cs.snapshot();
                        let body_diags = self.analyze_lambda(cs, &f, &pending.lambda)?;
                        // Merged even when the body had errors: partial
                        // constraints beat none for downstream fixation.
                        cs.commit(snap);
                        diags.extend(body_diags);
                        analyzed_any = true;
                    }
                    _ => still_pending.push(pending),
                }
            }
            self.pending.extend(still_pending);
            if !analyzed_any {
                break;
            }
        }

        for pending in std::mem::take(&mut self.pending) {
            diags.push(Diagnostic::CannotInferLambdaParameterType {
                arg_index: pending.arg_index,
                span: pending.span,
            });
        }
        Ok(diags)
    }
}
