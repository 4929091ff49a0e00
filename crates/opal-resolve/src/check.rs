//! Per-candidate applicability checking.
//!
//! One candidate at a time: open the declaration's type parameters as
//! fresh variables, match the receiver and every argument, and turn
//! each mismatch into a diagnostic attached to the candidate. Nothing
//! here throws; an inapplicable candidate is still fully described so
//! the disambiguator and error reporting can rank it.
//!
//! Structural problems (arity, unknown argument names) are checked
//! before any constraint work -- they are cheap and make the candidate
//! inapplicable outright.

use rowan::TextRange;
use rustc_hash::FxHashMap;

use opal_types::{substitute, FnTy, InferVar, Relations, Ty, Variance};

use crate::callsite::{
    ArgValue, Argument, CallSite, DeclKind, Declaration, LambdaArg, Param,
};
use crate::constraint::{ConstraintKind, ConstraintSystem, Polarity};
use crate::error::Diagnostic;
use crate::{ResolveError, Resolver};

/// A judged candidate. Transient: created per call site, dropped once a
/// winner is chosen.
#[derive(Debug)]
pub(crate) struct Candidate {
    pub decl: Declaration,
    /// Opened type variables, in declaration order.
    pub vars: Vec<(String, InferVar)>,
    pub applicable: bool,
    pub diagnostics: Vec<Diagnostic>,
    /// Implicit adjustments this candidate needed: defaulted parameters
    /// filled in and vararg packaging. First disambiguation input.
    pub conversions: u32,
    pub narrowing_used: bool,
}

/// A lambda whose parameter types still depend on unfixed variables.
/// Parked on the resolver until a fixation round makes its shape known.
#[derive(Debug)]
pub(crate) struct PendingLambda {
    /// The function type the lambda must satisfy, in terms of the
    /// owning candidate's variables.
    pub declared: Ty,
    pub lambda: LambdaArg,
    pub arg_index: usize,
    pub span: TextRange,
}

/// The structural mapping from arguments to parameters.
#[derive(Debug)]
struct ArgPlan {
    /// `(argument index, parameter index)` pairs, in argument order.
    pairs: Vec<(usize, usize)>,
    conversions: u32,
}

fn map_arguments(decl: &Declaration, call: &CallSite) -> Result<ArgPlan, Vec<Diagnostic>> {
    let params = &decl.params;
    let mut filled: Vec<Vec<usize>> = vec![Vec::new(); params.len()];
    let mut diags = Vec::new();
    let mut cursor = 0usize;

    for (i, arg) in call.args.iter().enumerate() {
        match &arg.name {
            Some(name) => match params.iter().position(|p| &p.name == name) {
                Some(j) if filled[j].is_empty() => filled[j].push(i),
                Some(_) => diags.push(Diagnostic::WrongNumberOfArguments {
                    expected: params.len(),
                    found: call.args.len(),
                    span: arg.span,
                }),
                None => diags.push(Diagnostic::UnresolvedReference {
                    name: name.clone(),
                    span: arg.span,
                }),
            },
            None => {
                while cursor < params.len()
                    && !params[cursor].vararg
                    && !filled[cursor].is_empty()
                {
                    cursor += 1;
                }
                if cursor >= params.len() {
                    diags.push(Diagnostic::WrongNumberOfArguments {
                        expected: params.len(),
                        found: call.args.len(),
                        span: arg.span,
                    });
                    continue;
                }
                if arg.spread && !params[cursor].vararg {
                    diags.push(Diagnostic::WrongNumberOfArguments {
                        expected: params.len(),
                        found: call.args.len(),
                        span: arg.span,
                    });
                    continue;
                }
                filled[cursor].push(i);
                if !params[cursor].vararg {
                    cursor += 1;
                }
            }
        }
    }

    let mut conversions = 0;
    for (j, param) in params.iter().enumerate() {
        if filled[j].is_empty() {
            if param.has_default || param.vararg {
                conversions += 1;
            } else if diags.is_empty() {
                diags.push(Diagnostic::WrongNumberOfArguments {
                    expected: params.len(),
                    found: call.args.len(),
                    span: call.span,
                });
            }
        } else if param.vararg && filled[j].iter().any(|&i| !call.args[i].spread) {
            // Loose arguments packaged into the vararg array.
            conversions += 1;
        }
    }
    if !diags.is_empty() {
        return Err(diags);
    }

    let mut pairs = Vec::new();
    for (j, argixs) in filled.iter().enumerate() {
        for &i in argixs {
            pairs.push((i, j));
        }
    }
    pairs.sort_by_key(|&(i, _)| i);
    Ok(ArgPlan { pairs, conversions })
}

/// Whether `param` sits in an invariant position of the member's owner
/// class, so the argument pins the class argument exactly instead of
/// merely bounding it (`MutableList<E>.add(e: E)` must not widen `E`).
fn invariant_context(decl: &Declaration, param: &Param, table: &opal_types::TypeTable) -> bool {
    let DeclKind::Member { owner: Ty::Class(owner) } = &decl.kind else {
        return false;
    };
    let Ty::Param(p) = &param.ty else {
        return false;
    };
    owner
        .args
        .iter()
        .position(|a| matches!(a.ty(), Some(Ty::Param(q)) if q.name == p.name))
        .map(|idx| table.variance_of(&owner.name, idx) == Variance::Invariant)
        .unwrap_or(false)
}

impl<'a> Resolver<'a> {
    /// Judge one candidate against the call, inside the caller's
    /// snapshot. Only `Err` is fatal (broken collaborator contract or
    /// cancellation); every ordinary failure lands in the candidate.
    pub(crate) fn check_candidate(
        &mut self,
        cs: &mut ConstraintSystem,
        call: &CallSite,
        decl: &Declaration,
        expected: Option<&Ty>,
    ) -> Result<Candidate, ResolveError> {
        let mut out = Candidate {
            decl: decl.clone(),
            vars: Vec::new(),
            applicable: true,
            diagnostics: Vec::new(),
            conversions: 0,
            narrowing_used: false,
        };
        if let DeclKind::Member { owner: Ty::Class(owner) } = &decl.kind {
            if !self.table.contains(&owner.name) {
                return Err(ResolveError::MissingClass(owner.name.clone()));
            }
        }

        let plan = match map_arguments(decl, call) {
            Ok(plan) => plan,
            Err(diags) => {
                out.diagnostics = diags;
                out.applicable = false;
                return Ok(out);
            }
        };
        out.conversions = plan.conversions;

        let map = self.open_type_params(cs, decl, &mut out);
        for param in &decl.params {
            let ty = substitute(&param.ty, &map);
            cs.note_polarity(&ty, Polarity::Input);
        }
        let ret = substitute(&decl.ret, &map);
        cs.note_polarity(&ret, Polarity::Output);
        if let Some(recv) = decl.receiver_ty() {
            let ty = substitute(recv, &map);
            cs.note_polarity(&ty, Polarity::Input);
        }

        self.constrain_receiver(cs, call, decl, &map, &mut out)?;

        for (arg_idx, param_idx) in plan.pairs {
            let arg = &call.args[arg_idx];
            let param = &decl.params[param_idx];
            let param_ty = substitute(&param.ty, &map);
            self.constrain_argument(cs, decl, arg, arg_idx, param, &param_ty, &mut out)?;
        }

        let effective = call.expected.as_ref().or(expected);
        if let Some(exp) = effective {
            let mut rel = Relations::new(self.table, &mut self.cache);
            if let Err(f) = cs.add_constraint(&ret, exp, ConstraintKind::Subtype, &mut rel) {
                out.diagnostics.push(Diagnostic::ReturnTypeMismatch {
                    expected: f.expected,
                    found: f.found,
                    span: call.span,
                });
                out.applicable = false;
            }
        }
        Ok(out)
    }

    /// Open the declaration's type parameters as variables and record
    /// their declared bounds, returning the name-to-variable mapping.
    fn open_type_params(
        &mut self,
        cs: &mut ConstraintSystem,
        decl: &Declaration,
        out: &mut Candidate,
    ) -> FxHashMap<String, Ty> {
        let mut map = FxHashMap::default();
        let mut vars = Vec::new();
        for tp in &decl.type_params {
            let var = cs.new_var(&tp.name, None);
            vars.push((tp.name.clone(), var));
            map.insert(tp.name.clone(), Ty::infer(var));
        }
        // Bounds may reference sibling parameters (`T : Comparable<T>`),
        // so they go in after every variable exists.
        for (tp, (_, var)) in decl.type_params.iter().zip(&vars) {
            if let Some(upper) = &tp.upper {
                let upper = substitute(upper, &map);
                let mut rel = Relations::new(self.table, &mut self.cache);
                if let Err(f) = cs.add_constraint(
                    &Ty::infer(*var),
                    &upper,
                    ConstraintKind::DeclaredBound,
                    &mut rel,
                ) {
                    out.diagnostics.push(Diagnostic::BoundViolation {
                        param: tp.name.clone(),
                        bound: f.expected,
                        actual: f.found,
                        span: decl_span(decl),
                    });
                    out.applicable = false;
                }
            }
        }
        out.vars = vars;
        map
    }

    fn constrain_receiver(
        &mut self,
        cs: &mut ConstraintSystem,
        call: &CallSite,
        decl: &Declaration,
        map: &FxHashMap<String, Ty>,
        out: &mut Candidate,
    ) -> Result<(), ResolveError> {
        let Some(declared) = decl.receiver_ty() else {
            return Ok(());
        };
        let declared = substitute(declared, map);

        if let Some(receiver) = &call.receiver {
            let found = self.value_type(
                cs,
                receiver,
                None,
                &mut out.diagnostics,
                &mut out.narrowing_used,
            )?;
            let mut rel = Relations::new(self.table, &mut self.cache);
            if let Err(f) = cs.add_constraint(&found, &declared, ConstraintKind::Subtype, &mut rel)
            {
                out.diagnostics.push(Diagnostic::ReceiverTypeMismatch {
                    expected: f.expected,
                    found: f.found,
                    span: call.span,
                });
                out.applicable = false;
            }
            return Ok(());
        }

        if call.implicit_receivers.is_empty() {
            out.diagnostics.push(Diagnostic::ReceiverTypeMismatch {
                expected: cs.resolve(&declared),
                found: Ty::Error,
                span: call.span,
            });
            out.applicable = false;
            return Ok(());
        }

        // Try each implicit receiver speculatively, innermost first.
        let mut compatible: Vec<Ty> = Vec::new();
        let mut innermost: Option<Ty> = None;
        for receiver in &call.implicit_receivers {
            let found = self.value_type(
                cs,
                receiver,
                None,
                &mut out.diagnostics,
                &mut out.narrowing_used,
            )?;
            if innermost.is_none() {
                innermost = Some(found.clone());
            }
            let snap = cs.snapshot();
            let mut rel = Relations::new(self.table, &mut self.cache);
            let ok = cs.add_constraint(&found, &declared, ConstraintKind::Subtype, &mut rel).is_ok();
            cs.rollback(snap);
            if ok {
                compatible.push(found);
            }
        }
        match compatible.len() {
            1 => {
                let mut rel = Relations::new(self.table, &mut self.cache);
                if let Err(f) =
                    cs.add_constraint(&compatible[0], &declared, ConstraintKind::Subtype, &mut rel)
                {
                    out.diagnostics.push(Diagnostic::ReceiverTypeMismatch {
                        expected: f.expected,
                        found: f.found,
                        span: call.span,
                    });
                    out.applicable = false;
                }
            }
            0 => {
                out.diagnostics.push(Diagnostic::ReceiverTypeMismatch {
                    expected: cs.resolve(&declared),
                    found: innermost.unwrap_or(Ty::Error),
                    span: call.span,
                });
                out.applicable = false;
            }
            n => {
                out.diagnostics.push(Diagnostic::AmbiguousReceiver { count: n, span: call.span });
                out.applicable = false;
            }
        }
        Ok(())
    }

    fn constrain_argument(
        &mut self,
        cs: &mut ConstraintSystem,
        decl: &Declaration,
        arg: &Argument,
        arg_idx: usize,
        param: &Param,
        param_ty: &Ty,
        out: &mut Candidate,
    ) -> Result<(), ResolveError> {
        if let ArgValue::Lambda(lambda) = &arg.value {
            return self.constrain_lambda(cs, lambda, param_ty, arg_idx, arg.span, out);
        }

        // A spread must supply a collection of the element type.
        let target = if arg.spread {
            Ty::Class(opal_types::applied("Collection", vec![param_ty.clone()]))
        } else {
            param_ty.clone()
        };
        let found = self.value_type(
            cs,
            &arg.value,
            Some(&target),
            &mut out.diagnostics,
            &mut out.narrowing_used,
        )?;
        let kind = if !arg.spread && invariant_context(decl, param, self.table) {
            ConstraintKind::Equality
        } else {
            ConstraintKind::Subtype
        };
        let mut rel = Relations::new(self.table, &mut self.cache);
        if let Err(f) = cs.add_constraint(&found, &target, kind, &mut rel) {
            out.diagnostics.push(Diagnostic::ArgumentTypeMismatch {
                expected: f.expected,
                found: f.found,
                arg_index: arg_idx,
                span: arg.span,
            });
            out.applicable = false;
        }
        Ok(())
    }

    fn constrain_lambda(
        &mut self,
        cs: &mut ConstraintSystem,
        lambda: &LambdaArg,
        param_ty: &Ty,
        arg_idx: usize,
        span: TextRange,
        out: &mut Candidate,
    ) -> Result<(), ResolveError> {
        let resolved = cs.resolve(param_ty);
        let fn_ty = match resolved {
            Ty::Fn(f) => {
                if f.params.len() != lambda.params.len() {
                    out.diagnostics.push(Diagnostic::ArgumentTypeMismatch {
                        expected: Ty::Fn(f),
                        found: lambda_shape(lambda),
                        arg_index: arg_idx,
                        span,
                    });
                    out.applicable = false;
                    return Ok(());
                }
                f
            }
            Ty::Infer(occ) => {
                // The parameter is a bare variable: give it a function
                // shape around fresh variables so annotations and the
                // body can pin them down.
                let params: Vec<Ty> = lambda
                    .params
                    .iter()
                    .enumerate()
                    .map(|(k, ann)| match ann {
                        Some(t) => t.clone(),
                        None => Ty::infer(cs.new_var(&format!("P{k}"), None)),
                    })
                    .collect();
                let ret = Ty::infer(cs.new_var("R", None));
                let shaped = FnTy { params, ret: Box::new(ret), nullable: false };
                let mut rel = Relations::new(self.table, &mut self.cache);
                if let Err(f) = cs.fix_shape(occ.var, Ty::Fn(shaped.clone()), &mut rel) {
                    out.diagnostics.push(Diagnostic::ArgumentTypeMismatch {
                        expected: f.expected,
                        found: f.found,
                        arg_index: arg_idx,
                        span,
                    });
                    out.applicable = false;
                    return Ok(());
                }
                shaped
            }
            other => {
                out.diagnostics.push(Diagnostic::ArgumentTypeMismatch {
                    expected: other,
                    found: lambda_shape(lambda),
                    arg_index: arg_idx,
                    span,
                });
                out.applicable = false;
                return Ok(());
            }
        };

        // Explicit parameter annotations pin their positions.
        for (ann, declared) in lambda.params.iter().zip(&fn_ty.params) {
            if let Some(ann) = ann {
                let mut rel = Relations::new(self.table, &mut self.cache);
                if let Err(f) = cs.add_constraint(ann, declared, ConstraintKind::Equality, &mut rel)
                {
                    out.diagnostics.push(Diagnostic::ArgumentTypeMismatch {
                        expected: f.expected,
                        found: f.found,
                        arg_index: arg_idx,
                        span,
                    });
                    out.applicable = false;
                    return Ok(());
                }
            }
        }

        let fully_known = fn_ty
            .params
            .iter()
            .all(|p| cs.unfixed_vars_in(p).is_empty());
        if fully_known {
            let diags = self.analyze_lambda(cs, &fn_ty, lambda)?;
            if !diags.is_empty() {
                out.applicable = false;
            }
            out.diagnostics.extend(diags);
        } else {
            self.pending.push(PendingLambda {
                declared: Ty::Fn(fn_ty),
                lambda: lambda.clone(),
                arg_index: arg_idx,
                span,
            });
        }
        Ok(())
    }

    /// Analyze a lambda body with concrete (or at least shaped)
    /// parameter types: resolve each call it makes in the same system
    /// and constrain its result against the declared return type.
    pub(crate) fn analyze_lambda(
        &mut self,
        cs: &mut ConstraintSystem,
        fn_ty: &FnTy,
        lambda: &LambdaArg,
    ) -> Result<Vec<Diagnostic>, ResolveError> {
        let params: Vec<Ty> = fn_ty.params.iter().map(|p| cs.resolve(p)).collect();
        self.lambda_scopes.push(params);
        let result = self.analyze_lambda_body(cs, fn_ty, lambda);
        self.lambda_scopes.pop();
        result
    }

    fn analyze_lambda_body(
        &mut self,
        cs: &mut ConstraintSystem,
        fn_ty: &FnTy,
        lambda: &LambdaArg,
    ) -> Result<Vec<Diagnostic>, ResolveError> {
        let mut diags = Vec::new();
        for call in &lambda.body {
            let outcome = self.resolve_in_system(cs, call, None)?;
            diags.extend(outcome.diagnostics);
        }
        if let Some(result) = &lambda.result {
            let mut narrowed = false;
            let found = self.value_type(cs, result, Some(&fn_ty.ret), &mut diags, &mut narrowed)?;
            let mut rel = Relations::new(self.table, &mut self.cache);
            if let Err(f) =
                cs.add_constraint(&found, &fn_ty.ret, ConstraintKind::Subtype, &mut rel)
            {
                diags.push(Diagnostic::ReturnTypeMismatch {
                    expected: f.expected,
                    found: f.found,
                    span: lambda.span,
                });
            }
        }
        Ok(diags)
    }

    /// The type of an argument or receiver value. Nested calls are
    /// resolved here, in the same constraint system, so their variables
    /// stay connected to the outer candidate's.
    pub(crate) fn value_type(
        &mut self,
        cs: &mut ConstraintSystem,
        value: &ArgValue,
        expected: Option<&Ty>,
        diags: &mut Vec<Diagnostic>,
        narrowing_used: &mut bool,
    ) -> Result<Ty, ResolveError> {
        match value {
            ArgValue::Typed(ty) => Ok(ty.clone()),
            ArgValue::Local(id) => {
                if self.narrower.is_narrowed(*id) {
                    *narrowing_used = true;
                }
                Ok(self.narrower.type_of(&self.locals, *id))
            }
            ArgValue::LambdaParam(i) => Ok(self
                .lambda_scopes
                .last()
                .and_then(|params| params.get(*i))
                .cloned()
                .unwrap_or(Ty::Error)),
            ArgValue::Call(inner) => {
                // Forward the expectation only once it is concrete; a
                // variable-laden expectation constrains the return type
                // through the enclosing argument constraint instead.
                let forwarded = expected.map(|t| cs.resolve(t)).filter(|t| !t.mentions_infer());
                let outcome = self.resolve_in_system(cs, inner, forwarded.as_ref())?;
                diags.extend(outcome.diagnostics);
                Ok(outcome.ty)
            }
            // A lambda outside a parameter position has no type of its
            // own yet; the checker handles lambdas at argument sites.
            ArgValue::Lambda(_) => Ok(Ty::Error),
        }
    }
}

fn lambda_shape(lambda: &LambdaArg) -> Ty {
    let params = lambda
        .params
        .iter()
        .map(|ann| ann.clone().unwrap_or(Ty::Error))
        .collect();
    Ty::fun(params, Ty::Error)
}

fn decl_span(_decl: &Declaration) -> TextRange {
    // Declarations come from the collaborator without source positions.
    crate::callsite::span(0, 0)
}
