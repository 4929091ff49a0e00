//! Class declarations and the type table.
//!
//! The type table is the central store of class declarations the engine
//! knows about: type parameters with declaration-site variance and
//! bounds, and declared supertypes. Subtyping and least-upper-bound
//! computations walk it; callers register their own classes on top of
//! the builtins.

use rustc_hash::FxHashMap;

use crate::subst::substitute;
use crate::ty::{ClassTy, Ty, TyProj, Variance};

/// A declared type parameter of a class.
#[derive(Clone, Debug)]
pub struct TypeParamDef {
    pub name: String,
    pub variance: Variance,
    /// Declared upper bound. `None` means the implicit `Any?`.
    pub upper: Option<Ty>,
}

impl TypeParamDef {
    pub fn invariant(name: &str) -> Self {
        TypeParamDef { name: name.into(), variance: Variance::Invariant, upper: None }
    }

    pub fn out(name: &str) -> Self {
        TypeParamDef { name: name.into(), variance: Variance::Out, upper: None }
    }

    pub fn contra(name: &str) -> Self {
        TypeParamDef { name: name.into(), variance: Variance::In, upper: None }
    }
}

/// A registered class declaration.
#[derive(Clone, Debug)]
pub struct ClassDef {
    pub name: String,
    pub params: Vec<TypeParamDef>,
    /// Declared supertypes, expressed in terms of `params` via `Ty::Param`.
    /// The implicit `Any` supertype is not listed.
    pub supertypes: Vec<Ty>,
}

impl ClassDef {
    pub fn new(name: &str) -> Self {
        ClassDef { name: name.into(), params: Vec::new(), supertypes: Vec::new() }
    }

    pub fn with_params(mut self, params: Vec<TypeParamDef>) -> Self {
        self.params = params;
        self
    }

    pub fn with_supertypes(mut self, supertypes: Vec<Ty>) -> Self {
        self.supertypes = supertypes;
        self
    }
}

/// Registry of class declarations, keyed by class name.
///
/// Immutable during resolution; the caller builds it once per session.
#[derive(Clone, Debug, Default)]
pub struct TypeTable {
    classes: FxHashMap<String, ClassDef>,
}

impl TypeTable {
    /// An empty table with no classes at all.
    pub fn empty() -> Self {
        TypeTable::default()
    }

    /// A table seeded with the built-in class hierarchy:
    /// `Any`, `Nothing`, `Unit`, `Number` (with `Int` and `Double`),
    /// `CharSequence`/`String`, `Boolean`, `Comparable<in T>`,
    /// `Collection<out E>` / `List<out E>` / `MutableList<E>`.
    pub fn with_builtins() -> Self {
        let mut table = TypeTable::default();
        table.register(ClassDef::new("Any"));
        table.register(ClassDef::new("Nothing"));
        table.register(ClassDef::new("Unit"));
        table.register(ClassDef::new("Number"));
        table.register(
            ClassDef::new("Int")
                .with_supertypes(vec![Ty::number(), Ty::generic("Comparable", vec![Ty::int()])]),
        );
        table.register(
            ClassDef::new("Double")
                .with_supertypes(vec![Ty::number(), Ty::generic("Comparable", vec![Ty::double()])]),
        );
        table.register(ClassDef::new("CharSequence"));
        table.register(ClassDef::new("String").with_supertypes(vec![
            Ty::class("CharSequence"),
            Ty::generic("Comparable", vec![Ty::string()]),
        ]));
        table.register(ClassDef::new("Boolean"));
        table.register(ClassDef::new("Comparable").with_params(vec![TypeParamDef::contra("T")]));
        table.register(ClassDef::new("Collection").with_params(vec![TypeParamDef::out("E")]));
        table.register(
            ClassDef::new("List")
                .with_params(vec![TypeParamDef::out("E")])
                .with_supertypes(vec![Ty::generic("Collection", vec![Ty::param("E")])]),
        );
        table.register(
            ClassDef::new("MutableList")
                .with_params(vec![TypeParamDef::invariant("E")])
                .with_supertypes(vec![Ty::generic("List", vec![Ty::param("E")])]),
        );
        table
    }

    /// Register a class declaration, replacing any previous one of the
    /// same name.
    pub fn register(&mut self, def: ClassDef) {
        self.classes.insert(def.name.clone(), def);
    }

    /// Look up a class declaration by name.
    pub fn get(&self, name: &str) -> Option<&ClassDef> {
        self.classes.get(name)
    }

    /// Whether a class of the given name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// The declaration-site variance of parameter `index` of `class_name`,
    /// defaulting to invariant for unknown classes or indices.
    pub fn variance_of(&self, class_name: &str, index: usize) -> Variance {
        self.get(class_name)
            .and_then(|def| def.params.get(index))
            .map(|p| p.variance)
            .unwrap_or(Variance::Invariant)
    }

    /// Find the instantiation of `target` among the (transitive)
    /// supertypes of `class_ty`, substituting actual type arguments down
    /// the inheritance path. Breadth-first, so the nearest instantiation
    /// wins deterministically.
    ///
    /// `supertype_instance(List<Int>, "Collection")` is `Collection<Int>`.
    pub fn supertype_instance(&self, class_ty: &ClassTy, target: &str) -> Option<ClassTy> {
        if class_ty.name == target {
            return Some(class_ty.clone());
        }
        let mut queue: Vec<ClassTy> = vec![class_ty.clone()];
        let mut cursor = 0;
        while cursor < queue.len() {
            let current = queue[cursor].clone();
            cursor += 1;
            let def = match self.get(&current.name) {
                Some(def) => def,
                None => continue,
            };
            // Map this class's parameter names to the actual arguments.
            // Projections are erased along the path; Star widens to Any?.
            let mapping: FxHashMap<String, Ty> = def
                .params
                .iter()
                .zip(current.args.iter())
                .map(|(p, a)| (p.name.clone(), a.ty_or_top()))
                .collect();
            for sup in &def.supertypes {
                let instantiated = substitute(sup, &mapping);
                if let Ty::Class(sup_class) = instantiated {
                    if sup_class.name == target {
                        return Some(sup_class);
                    }
                    queue.push(sup_class);
                }
            }
        }
        None
    }

    /// Transitive closure of supertype class names of `class_ty`,
    /// in breadth-first order, starting with the class itself.
    pub fn superclass_chain(&self, class_ty: &ClassTy) -> Vec<ClassTy> {
        let mut chain = vec![class_ty.clone()];
        let mut cursor = 0;
        while cursor < chain.len() {
            let current = chain[cursor].clone();
            cursor += 1;
            let def = match self.get(&current.name) {
                Some(def) => def,
                None => continue,
            };
            let mapping: FxHashMap<String, Ty> = def
                .params
                .iter()
                .zip(current.args.iter())
                .map(|(p, a)| (p.name.clone(), a.ty_or_top()))
                .collect();
            for sup in &def.supertypes {
                if let Ty::Class(sup_class) = substitute(sup, &mapping) {
                    if !chain.iter().any(|c| c.name == sup_class.name) {
                        chain.push(sup_class);
                    }
                }
            }
        }
        chain
    }
}

/// Build a `ClassTy` for a registered class applied to plain arguments.
pub fn applied(name: &str, args: Vec<Ty>) -> ClassTy {
    ClassTy {
        name: name.into(),
        args: args.into_iter().map(TyProj::Plain).collect(),
        nullable: false,
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_hierarchy_is_registered() {
        let table = TypeTable::with_builtins();
        assert!(table.contains("Any"));
        assert!(table.contains("MutableList"));
        assert_eq!(table.variance_of("List", 0), Variance::Out);
        assert_eq!(table.variance_of("MutableList", 0), Variance::Invariant);
        assert_eq!(table.variance_of("Comparable", 0), Variance::In);
    }

    #[test]
    fn supertype_instance_substitutes_arguments() {
        let table = TypeTable::with_builtins();
        let list_int = applied("MutableList", vec![Ty::int()]);
        let collection = table.supertype_instance(&list_int, "Collection").unwrap();
        assert_eq!(collection.args, vec![TyProj::Plain(Ty::int())]);
    }

    #[test]
    fn supertype_instance_missing_target() {
        let table = TypeTable::with_builtins();
        let int = applied("Int", vec![]);
        assert!(table.supertype_instance(&int, "String").is_none());
        assert!(table.supertype_instance(&int, "Number").is_some());
    }
}
