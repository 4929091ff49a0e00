//! The constraint system: type variables, bounds, and fixation.
//!
//! Each candidate check opens the declaration's type parameters as fresh
//! inference variables here. `ena`'s union-find table carries var-var
//! equalities and snapshots; bound sets, polarity, and fixation state
//! live in a side table indexed by variable, with a trail (undo log) so
//! `snapshot`/`rollback` give cheap speculative candidate checking.
//!
//! Once a variable is fixed, no later constraint can change its resolved
//! type: contradictions after fixation surface as `ConstraintFailure`
//! values, never panics.

use ena::unify::{InPlace, InPlaceUnificationTable, Snapshot as EnaSnapshot};
use rowan::TextRange;
use rustc_hash::FxHashSet;

use opal_types::{InferTy, InferVar, Relations, Ty};

use crate::error::Diagnostic;

/// How a constraint relates its two sides.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConstraintKind {
    /// The sides must be the same type.
    Equality,
    /// Left must be a subtype of right.
    Subtype,
    /// An upper bound coming from a declared type-parameter bound.
    DeclaredBound,
}

/// One recorded bound on a variable.
#[derive(Clone, Debug)]
pub struct Bound {
    pub ty: Ty,
    pub kind: ConstraintKind,
}

/// Fixation state of a variable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fixation {
    Unfixed,
    Fixed(Ty),
    /// Fixed to the error type after a bound violation; resolution of
    /// sibling variables continues.
    Error,
}

/// Where a variable occurs in the candidate's signature. Drives the
/// default for a variable with no constraints at all.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Polarity {
    Neither,
    Input,
    Output,
    Both,
}

impl Polarity {
    fn join(self, other: Polarity) -> Polarity {
        use Polarity::*;
        match (self, other) {
            (Neither, p) | (p, Neither) => p,
            (Input, Input) => Input,
            (Output, Output) => Output,
            _ => Both,
        }
    }
}

/// A constraint that could not be satisfied. Converted to a positioned
/// diagnostic by whoever added the constraint.
#[derive(Clone, Debug)]
pub struct ConstraintFailure {
    pub expected: Ty,
    pub found: Ty,
}

#[derive(Clone, Debug)]
struct VarData {
    /// The declared type parameter this variable stands for.
    name: String,
    declared_upper: Option<Ty>,
    lower: Vec<Bound>,
    upper: Vec<Bound>,
    polarity: Polarity,
    state: Fixation,
}

/// Undo log entries. Rolled back in reverse order after the ena table
/// itself has been rolled back.
#[derive(Debug)]
enum Trail {
    VarCreated,
    LowerAdded(InferVar),
    UpperAdded(InferVar),
    StateChanged(InferVar, Fixation),
    PolarityChanged(InferVar, Polarity),
    /// Bounds of `from` were appended onto `to` during a var-var merge.
    Merged { from: InferVar, to: InferVar, n_lower: usize, n_upper: usize },
}

/// A restore point: the ena snapshot plus the trail position.
pub struct Snapshot {
    ena: EnaSnapshot<InPlace<InferVar>>,
    trail_len: usize,
    vars_len: usize,
}

/// One call site's constraint state.
pub struct ConstraintSystem {
    table: InPlaceUnificationTable<InferVar>,
    vars: Vec<VarData>,
    trail: Vec<Trail>,
}

enum VarSide {
    /// The variable is on the left of `lhs <: rhs`.
    Lhs,
    /// The variable is on the right.
    Rhs,
}

impl ConstraintSystem {
    pub fn new() -> Self {
        ConstraintSystem { table: InPlaceUnificationTable::new(), vars: Vec::new(), trail: Vec::new() }
    }

    /// Number of variables ever created (including merged-away ones).
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    // ── Variables ───────────────────────────────────────────────────────

    /// Open a fresh variable for the declared type parameter `name`.
    pub fn new_var(&mut self, name: &str, declared_upper: Option<Ty>) -> InferVar {
        let var = self.table.new_key(None);
        debug_assert_eq!(var.0 as usize, self.vars.len());
        self.vars.push(VarData {
            name: name.into(),
            declared_upper,
            lower: Vec::new(),
            upper: Vec::new(),
            polarity: Polarity::Neither,
            state: Fixation::Unfixed,
        });
        self.trail.push(Trail::VarCreated);
        var
    }

    fn root(&mut self, var: InferVar) -> InferVar {
        self.table.find(var)
    }

    fn state_of(&mut self, var: InferVar) -> Fixation {
        let root = self.root(var);
        self.vars[root.0 as usize].state.clone()
    }

    fn set_state(&mut self, root: InferVar, state: Fixation) {
        let old = std::mem::replace(&mut self.vars[root.0 as usize].state, state);
        self.trail.push(Trail::StateChanged(root, old));
    }

    fn push_lower(&mut self, root: InferVar, bound: Bound) {
        self.vars[root.0 as usize].lower.push(bound);
        self.trail.push(Trail::LowerAdded(root));
    }

    fn push_upper(&mut self, root: InferVar, bound: Bound) {
        self.vars[root.0 as usize].upper.push(bound);
        self.trail.push(Trail::UpperAdded(root));
    }

    /// Record where `ty`'s variables occur in the candidate signature.
    pub fn note_polarity(&mut self, ty: &Ty, polarity: Polarity) {
        let mut occurring = Vec::new();
        ty.collect_infer_vars(&mut occurring);
        for var in occurring {
            let root = self.root(var);
            let old = self.vars[root.0 as usize].polarity;
            let joined = old.join(polarity);
            if joined != old {
                self.vars[root.0 as usize].polarity = joined;
                self.trail.push(Trail::PolarityChanged(root, old));
            }
        }
    }

    // ── Resolution ──────────────────────────────────────────────────────

    /// Substitute fixed variables throughout `ty`; unfixed occurrences
    /// normalize to their union-find root so equated variables read the
    /// same.
    pub fn resolve(&mut self, ty: &Ty) -> Ty {
        match ty {
            Ty::Infer(occ) => {
                let root = self.root(occ.var);
                match self.vars[root.0 as usize].state.clone() {
                    Fixation::Fixed(t) => {
                        let resolved = self.resolve(&t);
                        if occ.nullable {
                            resolved.nullable()
                        } else {
                            resolved
                        }
                    }
                    Fixation::Error => Ty::Error,
                    Fixation::Unfixed => Ty::Infer(InferTy { var: root, nullable: occ.nullable }),
                }
            }
            Ty::Class(c) => {
                let args = c
                    .args
                    .iter()
                    .map(|a| match a {
                        opal_types::TyProj::Plain(t) => opal_types::TyProj::Plain(self.resolve(t)),
                        opal_types::TyProj::Out(t) => opal_types::TyProj::Out(self.resolve(t)),
                        opal_types::TyProj::In(t) => opal_types::TyProj::In(self.resolve(t)),
                        opal_types::TyProj::Star => opal_types::TyProj::Star,
                    })
                    .collect();
                Ty::Class(opal_types::ClassTy { name: c.name.clone(), args, nullable: c.nullable })
            }
            Ty::Fn(f) => {
                let params = f.params.iter().map(|p| self.resolve(p)).collect();
                let ret = Box::new(self.resolve(&f.ret));
                Ty::Fn(opal_types::FnTy { params, ret, nullable: f.nullable })
            }
            Ty::Intersection(members) => {
                Ty::Intersection(members.iter().map(|m| self.resolve(m)).collect())
            }
            Ty::Flexible(fx) => Ty::flexible(self.resolve(&fx.lower), self.resolve(&fx.upper)),
            Ty::Param(_) | Ty::Error => ty.clone(),
        }
    }

    /// The resolved type of one variable.
    pub fn resolved(&mut self, var: InferVar) -> Ty {
        self.resolve(&Ty::infer(var))
    }

    /// Distinct unfixed roots occurring in `ty` after resolution.
    pub fn unfixed_vars_in(&mut self, ty: &Ty) -> Vec<InferVar> {
        let resolved = self.resolve(ty);
        let mut raw = Vec::new();
        resolved.collect_infer_vars(&mut raw);
        let mut out = Vec::new();
        for var in raw {
            let root = self.root(var);
            if matches!(self.vars[root.0 as usize].state, Fixation::Unfixed)
                && !out.contains(&root)
            {
                out.push(root);
            }
        }
        out
    }

    /// Whether anything besides a declared bound constrains the
    /// variable yet. Boundless variables are candidates for builder
    /// inference; determined ones can fix from their bounds.
    pub fn determined(&mut self, var: InferVar) -> bool {
        let root = self.root(var);
        let data = &self.vars[root.0 as usize];
        data.lower
            .iter()
            .chain(data.upper.iter())
            .any(|b| b.kind != ConstraintKind::DeclaredBound)
    }

    // ── Constraints ─────────────────────────────────────────────────────

    /// Add `lhs <rel> rhs` where `rel` is given by `kind` (`Subtype` and
    /// `DeclaredBound` read as `lhs <: rhs`).
    pub fn add_constraint(
        &mut self,
        lhs: &Ty,
        rhs: &Ty,
        kind: ConstraintKind,
        rel: &mut Relations<'_>,
    ) -> Result<(), ConstraintFailure> {
        let lhs = self.resolve(lhs);
        let rhs = self.resolve(rhs);
        if matches!(lhs, Ty::Error) || matches!(rhs, Ty::Error) {
            return Ok(());
        }
        match (&lhs, &rhs) {
            (Ty::Infer(a), Ty::Infer(b)) => self.var_vs_var(*a, *b, kind, rel),
            (Ty::Infer(a), _) => self.var_vs_ty(*a, &rhs, VarSide::Lhs, kind, rel),
            (_, Ty::Infer(b)) => self.var_vs_ty(*b, &lhs, VarSide::Rhs, kind, rel),
            _ => {
                if !lhs.mentions_infer() && !rhs.mentions_infer() {
                    let ok = match kind {
                        ConstraintKind::Equality => rel.same_type(&lhs, &rhs),
                        ConstraintKind::Subtype | ConstraintKind::DeclaredBound => {
                            rel.is_subtype(&lhs, &rhs)
                        }
                    };
                    if ok {
                        Ok(())
                    } else {
                        Err(ConstraintFailure { expected: rhs, found: lhs })
                    }
                } else {
                    self.decompose(&lhs, &rhs, kind, rel)
                }
            }
        }
    }

    fn var_vs_var(
        &mut self,
        a: InferTy,
        b: InferTy,
        kind: ConstraintKind,
        rel: &mut Relations<'_>,
    ) -> Result<(), ConstraintFailure> {
        let ra = self.root(a.var);
        let rb = self.root(b.var);
        if ra == rb {
            return Ok(());
        }
        match kind {
            ConstraintKind::Equality => self.merge_vars(ra, rb, rel),
            ConstraintKind::Subtype | ConstraintKind::DeclaredBound => {
                self.push_upper(ra, Bound { ty: Ty::Infer(InferTy { var: rb, nullable: b.nullable }), kind });
                self.push_lower(rb, Bound { ty: Ty::Infer(InferTy { var: ra, nullable: a.nullable }), kind });
                Ok(())
            }
        }
    }

    fn merge_vars(
        &mut self,
        ra: InferVar,
        rb: InferVar,
        rel: &mut Relations<'_>,
    ) -> Result<(), ConstraintFailure> {
        let state_a = self.state_of(ra);
        let state_b = self.state_of(rb);
        match (state_a, state_b) {
            (Fixation::Fixed(ta), Fixation::Fixed(tb)) => {
                self.add_constraint(&ta, &tb, ConstraintKind::Equality, rel)
            }
            (Fixation::Fixed(t), _) => {
                self.var_vs_ty(
                    InferTy { var: rb, nullable: false },
                    &t,
                    VarSide::Rhs,
                    ConstraintKind::Equality,
                    rel,
                )
            }
            (_, Fixation::Fixed(t)) => {
                self.var_vs_ty(
                    InferTy { var: ra, nullable: false },
                    &t,
                    VarSide::Rhs,
                    ConstraintKind::Equality,
                    rel,
                )
            }
            _ => {
                // Both unfixed: union the keys and fold the non-root's
                // bounds into the root.
                self.table
                    .unify_var_var(ra, rb)
                    .expect("unifying two unbound vars should not fail");
                let root = self.table.find(ra);
                let other = if root == ra { rb } else { ra };
                let lower = std::mem::take(&mut self.vars[other.0 as usize].lower);
                let upper = std::mem::take(&mut self.vars[other.0 as usize].upper);
                let n_lower = lower.len();
                let n_upper = upper.len();
                self.vars[root.0 as usize].lower.extend(lower);
                self.vars[root.0 as usize].upper.extend(upper);
                self.trail.push(Trail::Merged { from: other, to: root, n_lower, n_upper });
                if let Some(du) = self.vars[other.0 as usize].declared_upper.clone() {
                    self.push_upper(root, Bound { ty: du, kind: ConstraintKind::DeclaredBound });
                }
                let other_polarity = self.vars[other.0 as usize].polarity;
                let old = self.vars[root.0 as usize].polarity;
                let joined = old.join(other_polarity);
                if joined != old {
                    self.vars[root.0 as usize].polarity = joined;
                    self.trail.push(Trail::PolarityChanged(root, old));
                }
                Ok(())
            }
        }
    }

    fn var_vs_ty(
        &mut self,
        occ: InferTy,
        other: &Ty,
        side: VarSide,
        kind: ConstraintKind,
        rel: &mut Relations<'_>,
    ) -> Result<(), ConstraintFailure> {
        let root = self.root(occ.var);
        match self.state_of(root) {
            Fixation::Error => Ok(()),
            Fixation::Fixed(t) => {
                let fixed = if occ.nullable { t.nullable() } else { t };
                match side {
                    VarSide::Lhs => self.add_constraint(&fixed, other, kind, rel),
                    VarSide::Rhs => self.add_constraint(other, &fixed, kind, rel),
                }
            }
            Fixation::Unfixed => match kind {
                ConstraintKind::Equality => {
                    // An occurrence `T?` equated with `X?` pins `T = X`;
                    // the occurrence's question mark absorbs the null.
                    let target =
                        if occ.nullable { other.clone().not_null() } else { other.clone() };
                    if target.mentions_infer() {
                        self.push_lower(root, Bound { ty: target.clone(), kind });
                        self.push_upper(root, Bound { ty: target, kind });
                        Ok(())
                    } else {
                        self.fix_eagerly(root, target, rel)
                    }
                }
                ConstraintKind::Subtype | ConstraintKind::DeclaredBound => {
                    match side {
                        VarSide::Lhs => {
                            // `T? <: X` constrains T by X without its null.
                            let bound =
                                if occ.nullable { other.clone().not_null() } else { other.clone() };
                            self.push_upper(root, Bound { ty: bound, kind });
                        }
                        VarSide::Rhs => {
                            // `X <: T?`: the null part flows into the `?`,
                            // so T itself only owes the non-null part.
                            let bound =
                                if occ.nullable { other.clone().not_null() } else { other.clone() };
                            self.push_lower(root, Bound { ty: bound, kind });
                        }
                    }
                    Ok(())
                }
            },
        }
    }

    /// Fix a variable the moment an equality with a concrete type
    /// arrives, after verifying every accumulated bound against it.
    /// This is what makes the first builder-lambda call pin an element
    /// type for the calls that follow.
    fn fix_eagerly(
        &mut self,
        root: InferVar,
        ty: Ty,
        rel: &mut Relations<'_>,
    ) -> Result<(), ConstraintFailure> {
        let lower: Vec<Ty> =
            self.vars[root.0 as usize].lower.iter().map(|b| b.ty.clone()).collect();
        let upper: Vec<Ty> =
            self.vars[root.0 as usize].upper.iter().map(|b| b.ty.clone()).collect();
        for b in lower {
            let b = self.resolve(&b);
            if b.mentions_infer() {
                continue;
            }
            if !rel.is_subtype(&b, &ty) {
                return Err(ConstraintFailure { expected: ty, found: b });
            }
        }
        for b in upper {
            let b = self.resolve(&b);
            if b.mentions_infer() {
                continue;
            }
            if !rel.is_subtype(&ty, &b) {
                return Err(ConstraintFailure { expected: b, found: ty });
            }
        }
        self.set_state(root, Fixation::Fixed(ty));
        Ok(())
    }

    /// Give an unfixed variable a function shape built around fresh
    /// variables, so a lambda argument against a bare variable still
    /// gets per-parameter variables to pin down. Falls back to an
    /// equality constraint when the variable is already fixed.
    pub fn fix_shape(
        &mut self,
        var: InferVar,
        ty: Ty,
        rel: &mut Relations<'_>,
    ) -> Result<(), ConstraintFailure> {
        let root = self.root(var);
        match self.state_of(root) {
            Fixation::Unfixed => self.fix_eagerly(root, ty, rel),
            _ => self.add_constraint(&Ty::infer(root), &ty, ConstraintKind::Equality, rel),
        }
    }

    /// Structural decomposition of a constraint whose sides still
    /// mention inference variables beneath concrete constructors.
    fn decompose(
        &mut self,
        lhs: &Ty,
        rhs: &Ty,
        kind: ConstraintKind,
        rel: &mut Relations<'_>,
    ) -> Result<(), ConstraintFailure> {
        let subtype = !matches!(kind, ConstraintKind::Equality);
        let mismatch =
            || Err(ConstraintFailure { expected: rhs.clone(), found: lhs.clone() });

        // Flexible types constrain through their upper bound.
        if let Ty::Flexible(fx) = lhs {
            return self.add_constraint(&fx.upper, rhs, kind, rel);
        }
        if let Ty::Flexible(fx) = rhs {
            return self.add_constraint(lhs, &fx.upper, kind, rel);
        }
        // Intersection on the right requires every member.
        if let Ty::Intersection(members) = rhs {
            for m in members {
                self.add_constraint(lhs, m, kind, rel)?;
            }
            return Ok(());
        }
        // Intersection on the left: one satisfiable member suffices;
        // try each speculatively.
        if let Ty::Intersection(members) = lhs {
            for m in members {
                let snap = self.snapshot();
                match self.add_constraint(m, rhs, kind, rel) {
                    Ok(()) => {
                        self.commit(snap);
                        return Ok(());
                    }
                    Err(_) => self.rollback(snap),
                }
            }
            return mismatch();
        }

        if subtype && lhs.is_class_named("Nothing") && !lhs.is_nullable() {
            return Ok(());
        }
        if subtype && rhs.is_class_named("Any") {
            return if lhs.is_nullable() && !rhs.is_nullable() { mismatch() } else { Ok(()) };
        }

        match (lhs, rhs) {
            (Ty::Fn(f), Ty::Fn(g)) => {
                if f.params.len() != g.params.len() {
                    return mismatch();
                }
                if f.nullable && !g.nullable {
                    return mismatch();
                }
                for (fp, gp) in f.params.iter().zip(g.params.iter()) {
                    // Parameters are contravariant under subtyping.
                    match kind {
                        ConstraintKind::Equality => {
                            self.add_constraint(fp, gp, ConstraintKind::Equality, rel)?
                        }
                        _ => self.add_constraint(gp, fp, ConstraintKind::Subtype, rel)?,
                    }
                }
                self.add_constraint(&f.ret, &g.ret, kind, rel)
            }
            (Ty::Class(ca), Ty::Class(cb)) => {
                if ca.nullable && !cb.nullable {
                    return mismatch();
                }
                if matches!(kind, ConstraintKind::Equality) && ca.nullable != cb.nullable {
                    return mismatch();
                }
                let instance = if ca.name == cb.name {
                    ca.clone()
                } else if subtype {
                    match rel.table.supertype_instance(ca, &cb.name) {
                        Some(instance) => instance,
                        None => return mismatch(),
                    }
                } else {
                    return mismatch();
                };
                if instance.args.len() != cb.args.len() {
                    return mismatch();
                }
                for (i, (lp, rp)) in instance.args.iter().zip(cb.args.iter()).enumerate() {
                    use opal_types::{TyProj, Variance};
                    let declared = rel.table.variance_of(&cb.name, i);
                    match rp {
                        TyProj::Star => continue,
                        TyProj::Out(t) => {
                            self.add_constraint(&lp.ty_or_top(), t, ConstraintKind::Subtype, rel)?
                        }
                        TyProj::In(t) => match lp.ty() {
                            Some(l) => self.add_constraint(t, l, ConstraintKind::Subtype, rel)?,
                            None => return mismatch(),
                        },
                        TyProj::Plain(t) => {
                            let effective = if subtype { declared } else { Variance::Invariant };
                            match effective {
                                Variance::Out => self.add_constraint(
                                    &lp.ty_or_top(),
                                    t,
                                    ConstraintKind::Subtype,
                                    rel,
                                )?,
                                Variance::In => match lp.ty() {
                                    Some(l) => self.add_constraint(
                                        t,
                                        l,
                                        ConstraintKind::Subtype,
                                        rel,
                                    )?,
                                    None => return mismatch(),
                                },
                                Variance::Invariant => match lp.ty() {
                                    Some(l) => self.add_constraint(
                                        l,
                                        t,
                                        ConstraintKind::Equality,
                                        rel,
                                    )?,
                                    None => return mismatch(),
                                },
                            }
                        }
                    }
                }
                Ok(())
            }
            (Ty::Param(p), Ty::Param(q)) if p.name == q.name => Ok(()),
            _ => mismatch(),
        }
    }

    // ── Snapshot / rollback ─────────────────────────────────────────────

    pub fn snapshot(&mut self) -> Snapshot {
        Snapshot {
            ena: self.table.snapshot(),
            trail_len: self.trail.len(),
            vars_len: self.vars.len(),
        }
    }

    pub fn commit(&mut self, snapshot: Snapshot) {
        self.table.commit(snapshot.ena);
    }

    /// Undo everything since `snapshot`, restoring variable data in
    /// reverse trail order and truncating the variable arena.
    pub fn rollback(&mut self, snapshot: Snapshot) {
        self.table.rollback_to(snapshot.ena);
        while self.trail.len() > snapshot.trail_len {
            match self.trail.pop().expect("trail cannot be empty here") {
                Trail::VarCreated => {
                    self.vars.pop();
                }
                Trail::LowerAdded(v) => {
                    self.vars[v.0 as usize].lower.pop();
                }
                Trail::UpperAdded(v) => {
                    self.vars[v.0 as usize].upper.pop();
                }
                Trail::StateChanged(v, old) => {
                    self.vars[v.0 as usize].state = old;
                }
                Trail::PolarityChanged(v, old) => {
                    self.vars[v.0 as usize].polarity = old;
                }
                Trail::Merged { from, to, n_lower, n_upper } => {
                    let to_data = &mut self.vars[to.0 as usize];
                    let lower_tail = to_data.lower.split_off(to_data.lower.len() - n_lower);
                    let upper_tail = to_data.upper.split_off(to_data.upper.len() - n_upper);
                    self.vars[from.0 as usize].lower = lower_tail;
                    self.vars[from.0 as usize].upper = upper_tail;
                }
            }
        }
        debug_assert_eq!(self.vars.len(), snapshot.vars_len);
    }

    // ── Fixation ────────────────────────────────────────────────────────

    /// Fix every remaining variable.
    pub fn fix_variables(&mut self, rel: &mut Relations<'_>, span: TextRange) -> Vec<Diagnostic> {
        self.fix_except(rel, &FxHashSet::default(), span)
    }

    /// Fix every variable not in (and not depending on) `keep`.
    ///
    /// Readiness ordering: a variable is ready when no unfixed variable
    /// occurs in its bounds; among ready variables the one with the
    /// fewest direct bounds goes first, ties broken by lowest index so
    /// fixation is deterministic. When nothing is ready, the unfixed
    /// variable with the most direct constraints breaks the cycle with
    /// an approximated bound set.
    pub fn fix_except(
        &mut self,
        rel: &mut Relations<'_>,
        keep: &FxHashSet<InferVar>,
        span: TextRange,
    ) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        loop {
            let mut ready: Option<(usize, InferVar)> = None;
            let mut fallback: Option<(usize, InferVar)> = None;
            for i in 0..self.vars.len() {
                let var = InferVar(i as u32);
                if self.root(var) != var {
                    continue;
                }
                if keep.contains(&var)
                    || !matches!(self.vars[i].state, Fixation::Unfixed)
                {
                    continue;
                }
                let deps = self.dependencies_of(var);
                if deps.iter().any(|d| keep.contains(d)) {
                    // Depends on a variable the caller wants untouched.
                    continue;
                }
                let direct = self.vars[i].lower.len() + self.vars[i].upper.len();
                if deps.is_empty() {
                    if ready.map(|(n, _)| direct < n).unwrap_or(true) {
                        ready = Some((direct, var));
                    }
                } else if fallback.map(|(n, _)| direct > n).unwrap_or(true) {
                    fallback = Some((direct, var));
                }
            }
            match (ready, fallback) {
                (Some((_, var)), _) => self.fix_one(var, false, rel, &mut diags, span),
                (None, Some((_, var))) => self.fix_one(var, true, rel, &mut diags, span),
                (None, None) => break,
            }
        }
        diags
    }

    fn dependencies_of(&mut self, var: InferVar) -> Vec<InferVar> {
        let bounds: Vec<Ty> = {
            let data = &self.vars[var.0 as usize];
            data.lower.iter().chain(data.upper.iter()).map(|b| b.ty.clone()).collect()
        };
        let mut deps = Vec::new();
        for b in &bounds {
            for d in self.unfixed_vars_in(b) {
                if d != var && !deps.contains(&d) {
                    deps.push(d);
                }
            }
        }
        deps
    }

    fn fix_one(
        &mut self,
        root: InferVar,
        approximate: bool,
        rel: &mut Relations<'_>,
        diags: &mut Vec<Diagnostic>,
        span: TextRange,
    ) {
        let name = self.vars[root.0 as usize].name.clone();
        let raw_lower: Vec<Ty> =
            self.vars[root.0 as usize].lower.iter().map(|b| b.ty.clone()).collect();
        let raw_upper: Vec<(Ty, ConstraintKind)> = self.vars[root.0 as usize]
            .upper
            .iter()
            .map(|b| (b.ty.clone(), b.kind))
            .collect();
        let declared_upper = self.vars[root.0 as usize].declared_upper.clone();
        let polarity = self.vars[root.0 as usize].polarity;

        // In approximate (cycle-break) mode, bounds still mentioning
        // unfixed variables are dropped rather than waited on.
        let mut lower = Vec::new();
        for b in &raw_lower {
            let b = self.resolve(b);
            if !b.mentions_infer() {
                lower.push(b);
            }
        }
        let mut upper = Vec::new();
        for (b, kind) in &raw_upper {
            let b = self.resolve(b);
            if !b.mentions_infer() {
                upper.push((b, *kind));
            }
        }
        let declared = declared_upper.map(|du| self.resolve(&du)).filter(|du| !du.mentions_infer());

        let result = if !lower.is_empty() {
            rel.least_upper_bound(&lower)
        } else if !upper.is_empty() {
            let mut distinct: Vec<Ty> = Vec::new();
            for (b, _) in &upper {
                if !distinct.contains(b) {
                    distinct.push(b.clone());
                }
            }
            if distinct.len() == 1 {
                distinct.pop().expect("one element")
            } else {
                Ty::Intersection(distinct)
            }
        } else if let Some(du) = declared.clone() {
            du
        } else if approximate {
            // Cycle break found nothing usable at all.
            diags.push(Diagnostic::CannotInferTypeVariable { param: name, span });
            self.set_state(root, Fixation::Error);
            return;
        } else if polarity == Polarity::Input {
            // Occurs only in input position: any argument is accepted.
            Ty::any_nullable()
        } else {
            // Output-only or unused: the empty join.
            Ty::nothing()
        };

        let mut violated = None;
        for (b, _) in &upper {
            if !rel.is_subtype(&result, b) {
                violated = Some(b.clone());
                break;
            }
        }
        if violated.is_none() {
            if let Some(du) = &declared {
                if !rel.is_subtype(&result, du) {
                    violated = Some(du.clone());
                }
            }
        }
        match violated {
            Some(bound) => {
                diags.push(Diagnostic::BoundViolation { param: name, bound, actual: result, span });
                self.set_state(root, Fixation::Error);
            }
            None => self.set_state(root, Fixation::Fixed(result)),
        }
    }
}

impl Default for ConstraintSystem {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
