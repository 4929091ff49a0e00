//! Flow-sensitive narrowing of local bindings.
//!
//! Narrowing facts apply only to stable locals (`val`s): a reassignable
//! binding may change between the check and the use, so it never
//! narrows. Facts are plain refined types keyed by local; control flow
//! is modelled with `fork`/`restore`/`merge`, and `mark` pins down the
//! facts in force at a program point so later queries see exactly what
//! the resolver saw.

use rustc_hash::FxHashMap;

use opal_types::{Relations, Ty};

use crate::callsite::{LocalId, Locals, ProgramPoint};

/// The facts of one control-flow branch, detached by [`Narrower::fork`].
#[derive(Clone, Debug, Default)]
pub struct FactFrame {
    facts: FxHashMap<LocalId, Ty>,
}

#[derive(Debug, Default)]
pub struct Narrower {
    facts: FxHashMap<LocalId, Ty>,
    /// Facts in force at each recorded program point.
    marks: FxHashMap<ProgramPoint, FxHashMap<LocalId, Ty>>,
}

impl Narrower {
    pub fn new() -> Self {
        Narrower::default()
    }

    /// The type a use of `local` sees right now: its narrowed type if a
    /// fact is in force, its declared type otherwise.
    pub fn type_of(&self, locals: &Locals, local: LocalId) -> Ty {
        if let Some(narrowed) = self.facts.get(&local) {
            return narrowed.clone();
        }
        locals.get(local).declared.clone()
    }

    /// Record `local is ty`. Unstable locals are left untouched.
    ///
    /// When neither the current type nor `ty` subsumes the other, the
    /// fact becomes their intersection, so `x is A` inside an `x is B`
    /// branch reads as `A & B`.
    pub fn assume_instance(
        &mut self,
        locals: &Locals,
        local: LocalId,
        ty: &Ty,
        rel: &mut Relations<'_>,
    ) {
        let def = locals.get(local);
        if !def.stable {
            return;
        }
        let current = self.facts.get(&local).cloned().unwrap_or_else(|| def.declared.clone());
        let narrowed = if rel.is_subtype(&current, ty) {
            current
        } else if rel.is_subtype(ty, &current) {
            ty.clone()
        } else {
            Ty::Intersection(vec![current, ty.clone()])
        };
        self.facts.insert(local, narrowed);
    }

    /// Record that `local` is known non-null.
    pub fn assume_non_null(&mut self, locals: &Locals, local: LocalId) {
        let def = locals.get(local);
        if !def.stable {
            return;
        }
        let current = self.facts.get(&local).cloned().unwrap_or_else(|| def.declared.clone());
        self.facts.insert(local, current.not_null());
    }

    /// Assignment kills every fact about the local.
    pub fn on_assign(&mut self, local: LocalId) {
        self.facts.remove(&local);
    }

    // ── Control flow ────────────────────────────────────────────────────

    /// Capture the facts at a branch point. The caller mutates `self`
    /// along one arm, banks the result, restores, and walks the other.
    pub fn fork(&self) -> FactFrame {
        FactFrame { facts: self.facts.clone() }
    }

    /// Detach the current facts as a finished branch, resetting to the
    /// state captured at `at`.
    pub fn take_branch(&mut self, at: &FactFrame) -> FactFrame {
        let branch = FactFrame { facts: std::mem::take(&mut self.facts) };
        self.facts = at.facts.clone();
        branch
    }

    pub fn restore(&mut self, frame: FactFrame) {
        self.facts = frame.facts;
    }

    /// Join two finished branches: only facts present and identical in
    /// both survive.
    pub fn merge(&mut self, then_arm: FactFrame, else_arm: FactFrame) {
        let mut merged = FxHashMap::default();
        for (local, ty) in &then_arm.facts {
            if else_arm.facts.get(local) == Some(ty) {
                merged.insert(*local, ty.clone());
            }
        }
        self.facts = merged;
    }

    // ── Program points ──────────────────────────────────────────────────

    /// Pin the facts currently in force to `point`. Re-marking the same
    /// point with unchanged facts is a no-op, so queries after
    /// resolution are idempotent.
    pub fn mark(&mut self, point: ProgramPoint) {
        self.marks.insert(point, self.facts.clone());
    }

    /// The type `local` had at a previously marked point.
    pub fn narrowed_type_at(
        &self,
        locals: &Locals,
        point: ProgramPoint,
        local: LocalId,
    ) -> Ty {
        match self.marks.get(&point).and_then(|facts| facts.get(&local)) {
            Some(narrowed) => narrowed.clone(),
            None => locals.get(local).declared.clone(),
        }
    }

    /// Whether any fact about `local` is currently in force.
    pub fn is_narrowed(&self, local: LocalId) -> bool {
        self.facts.contains_key(&local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opal_types::{SubtypeCache, TypeTable};

    fn rel_ctx() -> (TypeTable, SubtypeCache) {
        (TypeTable::with_builtins(), SubtypeCache::new())
    }

    #[test]
    fn non_null_fact_strips_the_question_mark() {
        let mut locals = Locals::default();
        let x = locals.declare("x", Ty::string().nullable(), true);
        let mut narrower = Narrower::new();
        narrower.assume_non_null(&locals, x);
        assert_eq!(narrower.type_of(&locals, x), Ty::string());
    }

    #[test]
    fn unstable_local_never_narrows() {
        let mut locals = Locals::default();
        let x = locals.declare("x", Ty::string().nullable(), false);
        let mut narrower = Narrower::new();
        narrower.assume_non_null(&locals, x);
        assert_eq!(narrower.type_of(&locals, x), Ty::string().nullable());
    }

    #[test]
    fn instance_fact_refines_and_intersects() {
        let (table, mut cache) = rel_ctx();
        let mut rel = Relations::new(&table, &mut cache);
        let mut locals = Locals::default();
        let x = locals.declare("x", Ty::any(), true);
        let mut narrower = Narrower::new();
        narrower.assume_instance(&locals, x, &Ty::number(), &mut rel);
        assert_eq!(narrower.type_of(&locals, x), Ty::number());
        // A subtype fact replaces the wider one.
        narrower.assume_instance(&locals, x, &Ty::int(), &mut rel);
        assert_eq!(narrower.type_of(&locals, x), Ty::int());
        // An unrelated fact intersects.
        narrower.assume_instance(&locals, x, &Ty::string(), &mut rel);
        assert_eq!(
            narrower.type_of(&locals, x),
            Ty::Intersection(vec![Ty::int(), Ty::string()])
        );
    }

    #[test]
    fn assignment_invalidates_facts() {
        let mut locals = Locals::default();
        let x = locals.declare("x", Ty::string().nullable(), true);
        let mut narrower = Narrower::new();
        narrower.assume_non_null(&locals, x);
        narrower.on_assign(x);
        assert_eq!(narrower.type_of(&locals, x), Ty::string().nullable());
    }

    #[test]
    fn merge_keeps_only_agreeing_facts() {
        let (table, mut cache) = rel_ctx();
        let mut rel = Relations::new(&table, &mut cache);
        let mut locals = Locals::default();
        let x = locals.declare("x", Ty::string().nullable(), true);
        let y = locals.declare("y", Ty::any(), true);
        let mut narrower = Narrower::new();

        let base = narrower.fork();
        narrower.assume_non_null(&locals, x);
        narrower.assume_instance(&locals, y, &Ty::int(), &mut rel);
        let then_arm = narrower.take_branch(&base);
        narrower.assume_non_null(&locals, x);
        narrower.assume_instance(&locals, y, &Ty::string(), &mut rel);
        let else_arm = narrower.take_branch(&base);
        narrower.merge(then_arm, else_arm);

        // Both arms proved x non-null; they disagree about y.
        assert_eq!(narrower.type_of(&locals, x), Ty::string());
        assert_eq!(narrower.type_of(&locals, y), Ty::any());
    }

    #[test]
    fn marked_points_answer_idempotently() {
        let mut locals = Locals::default();
        let x = locals.declare("x", Ty::string().nullable(), true);
        let mut narrower = Narrower::new();
        narrower.assume_non_null(&locals, x);
        let point = ProgramPoint(7);
        narrower.mark(point);
        narrower.on_assign(x);
        let first = narrower.narrowed_type_at(&locals, point, x);
        let second = narrower.narrowed_type_at(&locals, point, x);
        assert_eq!(first, Ty::string());
        assert_eq!(first, second);
    }
}
