//! Trait registry, instance database, and instance selection.
//!
//! Traits carry parameter kinds, super-traits, functional dependencies,
//! and method signatures with fixed dictionary offsets. Instances are
//! selected by trial unification against the argument types; functional
//! dependencies restrict matching to determinant positions and then
//! improve the dependent positions of the unique match.

use rustc_hash::FxHashMap;

use funxy_parser::ast::NodeId;

use crate::ty::{Constraint, Kind, Scheme, Ty};
use crate::unify::{subst_scheme, InferCtx};

/// A method signature within a trait, with its dictionary offset.
#[derive(Clone, Debug)]
pub struct TraitMethodSig {
    pub name: String,
    /// The method's scheme, quantified over the trait parameters (and any
    /// method-local variables). Instantiating it yields the call-site type
    /// plus the trait constraint itself.
    pub scheme: Scheme,
    /// Index into the instance dictionary.
    pub offset: usize,
    pub has_default: bool,
}

/// A trait definition.
#[derive(Clone, Debug)]
pub struct TraitDef {
    pub name: String,
    /// Type parameters with kinds.
    pub params: Vec<(String, Kind)>,
    /// Direct super-traits.
    pub supers: Vec<String>,
    /// Functional dependencies as (determinant, dependent) parameter
    /// index lists.
    pub fundeps: Vec<(Vec<usize>, Vec<usize>)>,
    pub methods: Vec<TraitMethodSig>,
}

impl TraitDef {
    pub fn method_index(&self, name: &str) -> Option<usize> {
        self.methods.iter().position(|m| m.name == name)
    }

    /// Parameter positions that determine instance choice: everything not
    /// exclusively on the right-hand side of a functional dependency.
    pub fn determinant_positions(&self) -> Vec<usize> {
        let mut dependent = vec![false; self.params.len()];
        for (_, rhs) in &self.fundeps {
            for &i in rhs {
                if i < dependent.len() {
                    dependent[i] = true;
                }
            }
        }
        (0..self.params.len()).filter(|i| !dependent[*i]).collect()
    }
}

/// The process-wide trait registry (owned by the analyzer context).
#[derive(Default)]
pub struct TraitRegistry {
    traits: FxHashMap<String, TraitDef>,
    /// Bare method name -> owning trait, for resolving `show(x)`-style
    /// calls without qualification.
    method_owner: FxHashMap<String, String>,
}

impl TraitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a trait. Returns the name of the clashing trait when a
    /// method name is already claimed by another trait.
    pub fn register(&mut self, def: TraitDef) -> Result<(), String> {
        for method in &def.methods {
            if let Some(owner) = self.method_owner.get(&method.name) {
                if owner != &def.name {
                    return Err(owner.clone());
                }
            }
        }
        for method in &def.methods {
            self.method_owner.insert(method.name.clone(), def.name.clone());
        }
        self.traits.insert(def.name.clone(), def);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&TraitDef> {
        self.traits.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.traits.contains_key(name)
    }

    /// The trait owning a bare method name.
    pub fn owner_of_method(&self, method: &str) -> Option<&str> {
        self.method_owner.get(method).map(String::as_str)
    }

    /// Transitive super-traits of `name` (deduplicated, excluding `name`).
    pub fn transitive_supers(&self, name: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack = vec![name.to_string()];
        while let Some(current) = stack.pop() {
            if let Some(def) = self.traits.get(&current) {
                for sup in &def.supers {
                    if sup != name && !out.contains(sup) {
                        out.push(sup.clone());
                        stack.push(sup.clone());
                    }
                }
            }
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = &TraitDef> {
        self.traits.values()
    }
}

/// Which infix/prefix operators dispatch through which trait method.
///
/// Each operator trait has exactly one method at dictionary offset 0.
pub fn operator_trait(op: &str) -> Option<(&'static str, &'static str)> {
    match op {
        "+" => Some(("Add", "add")),
        "-" => Some(("Sub", "sub")),
        "*" => Some(("Mul", "mul")),
        "/" => Some(("Div", "div")),
        "%" => Some(("Rem", "rem")),
        "**" => Some(("Pow", "pow")),
        "==" | "!=" => Some(("Eq", "eq")),
        "<" | ">" | "<=" | ">=" => Some(("Ord", "compare")),
        "++" => Some(("Concat", "append")),
        "<>" => Some(("Semigroup", "combine")),
        ">>=" => Some(("Monad", "bind")),
        "neg" => Some(("Neg", "neg")),
        _ => None,
    }
}

/// Identity of a registered instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(pub u32);

/// How one dictionary slot is implemented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodImpl {
    /// A function declaration inside an `instance` block.
    Decl(NodeId),
    /// A host-provided native, looked up by name in the runtime registry.
    Native(String),
    /// Fall back to the trait-level default body.
    Default,
}

/// A registered instance.
#[derive(Debug, Clone)]
pub struct InstanceDef {
    pub trait_name: String,
    /// Argument types; quantified variables appear as rigids named by
    /// `vars` (e.g. `instance Show List<a>`).
    pub args: Vec<Ty>,
    pub vars: Vec<(String, Kind)>,
    /// Constraints on the instance head (`instance Show<a> => Show List<a>`).
    pub constraints: Vec<Constraint>,
    /// Dictionary slots in trait method order.
    pub methods: Vec<MethodImpl>,
    pub origin_module: String,
}

/// The instance database.
#[derive(Default)]
pub struct InstanceDb {
    instances: Vec<InstanceDef>,
    by_trait: FxHashMap<String, Vec<InstanceId>>,
}

/// Result of instance selection for a constraint.
#[derive(Debug)]
pub enum Selection {
    /// Exactly one instance matched; its argument unification has been
    /// committed (functional-dependency improvement included). `deps` are
    /// the instance's own constraints, instantiated at the match -- the
    /// sub-dictionaries a parametric instance needs.
    Unique { id: InstanceId, deps: Vec<Constraint> },
    /// No instance matched concrete arguments.
    NotFound,
    /// More than one instance survives.
    Ambiguous(Vec<InstanceId>),
    /// Arguments are still polymorphic; try again later or generalize.
    Deferred,
}

impl InstanceDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, def: InstanceDef) -> InstanceId {
        let id = InstanceId(self.instances.len() as u32);
        self.by_trait
            .entry(def.trait_name.clone())
            .or_default()
            .push(id);
        self.instances.push(def);
        id
    }

    pub fn get(&self, id: InstanceId) -> &InstanceDef {
        &self.instances[id.0 as usize]
    }

    pub fn instances_of(&self, trait_name: &str) -> &[InstanceId] {
        self.by_trait
            .get(trait_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Check overlap before registration: an instance whose determinant
    /// arguments unify with an existing instance's is rejected.
    pub fn find_overlap(
        &self,
        ctx: &mut InferCtx,
        registry: &TraitRegistry,
        candidate: &InstanceDef,
    ) -> Option<InstanceId> {
        let determinants = registry
            .get(&candidate.trait_name)
            .map(|t| t.determinant_positions())
            .unwrap_or_else(|| (0..candidate.args.len()).collect());

        for &id in self.instances_of(&candidate.trait_name) {
            let existing = self.get(id).clone();
            let snapshot = ctx.snapshot();
            let (cand_args, _) = instantiate_head(ctx, candidate);
            let (exist_args, _) = instantiate_head(ctx, &existing);
            let mut all_ok = true;
            for &i in &determinants {
                let (Some(a), Some(b)) = (cand_args.get(i), exist_args.get(i)) else {
                    all_ok = false;
                    break;
                };
                if ctx.unify(a.clone(), b.clone()).is_err() {
                    all_ok = false;
                    break;
                }
            }
            ctx.rollback_to(snapshot);
            if all_ok {
                return Some(id);
            }
        }
        None
    }

    /// Select the instance for `trait_name<args...>`.
    ///
    /// Matching considers only determinant positions; the unique match is
    /// then committed over all positions, unifying dependent positions as
    /// functional-dependency improvement.
    pub fn select(
        &self,
        ctx: &mut InferCtx,
        registry: &TraitRegistry,
        trait_name: &str,
        args: &[Ty],
    ) -> Selection {
        let determinants = registry
            .get(trait_name)
            .map(|t| t.determinant_positions())
            .unwrap_or_else(|| (0..args.len()).collect());

        let resolved: Vec<Ty> = args.iter().map(|a| ctx.resolve(a.clone())).collect();

        // Fully polymorphic determinants cannot pick an instance yet.
        let any_concrete = determinants
            .iter()
            .filter_map(|&i| resolved.get(i))
            .any(|t| t.head_key().is_some());
        if !any_concrete && !determinants.is_empty() {
            return Selection::Deferred;
        }

        let mut matches = Vec::new();
        for &id in self.instances_of(trait_name) {
            let def = self.get(id).clone();
            if def.args.len() != resolved.len() {
                continue;
            }
            let snapshot = ctx.snapshot();
            let (inst_args, _) = instantiate_head(ctx, &def);
            let mut ok = true;
            for &i in &determinants {
                if ctx
                    .unify(resolved[i].clone(), inst_args[i].clone())
                    .is_err()
                {
                    ok = false;
                    break;
                }
            }
            ctx.rollback_to(snapshot);
            if ok {
                matches.push(id);
            }
        }

        match matches.len() {
            0 => {
                // Unresolved variables in a determinant may still collapse
                // onto an instance later.
                let undetermined = determinants
                    .iter()
                    .filter_map(|&i| resolved.get(i))
                    .any(Ty::mentions_var);
                if undetermined {
                    Selection::Deferred
                } else {
                    Selection::NotFound
                }
            }
            1 => {
                let id = matches[0];
                let def = self.get(id).clone();
                let (inst_args, deps) = instantiate_head(ctx, &def);
                for (actual, inst) in resolved.iter().zip(&inst_args) {
                    // Dependent positions improve here; determinant
                    // positions re-unify harmlessly.
                    if ctx.unify(actual.clone(), inst.clone()).is_err() {
                        return Selection::NotFound;
                    }
                }
                Selection::Unique { id, deps }
            }
            _ => {
                // Several candidates: with unresolved variables this may
                // narrow later; over concrete arguments it is a coherence
                // violation.
                let undetermined = determinants
                    .iter()
                    .filter_map(|&i| resolved.get(i))
                    .any(Ty::mentions_var);
                if undetermined {
                    Selection::Deferred
                } else {
                    Selection::Ambiguous(matches)
                }
            }
        }
    }
}

/// Instantiate an instance head's quantified variables with fresh
/// unification variables. Returns the argument types and the instance's
/// constraints under the same substitution.
fn instantiate_head(ctx: &mut InferCtx, def: &InstanceDef) -> (Vec<Ty>, Vec<Constraint>) {
    let rigids: FxHashMap<String, Ty> = def
        .vars
        .iter()
        .map(|(name, kind)| (name.clone(), Ty::Var(ctx.fresh_var_kinded(kind.clone()))))
        .collect();
    let rows = FxHashMap::default();
    let args = def
        .args
        .iter()
        .map(|a| subst_scheme(a, &rigids, &rows))
        .collect();
    let deps = def
        .constraints
        .iter()
        .map(|c| Constraint {
            trait_name: c.trait_name.clone(),
            args: c.args.iter().map(|a| subst_scheme(a, &rigids, &rows)).collect(),
        })
        .collect();
    (args, deps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ty::Ty;

    fn show_trait() -> TraitDef {
        TraitDef {
            name: "Show".into(),
            params: vec![("a".into(), Kind::Star)],
            supers: Vec::new(),
            fundeps: Vec::new(),
            methods: vec![TraitMethodSig {
                name: "show".into(),
                scheme: Scheme::mono(Ty::func(
                    vec![Ty::Rigid("a".into(), Kind::Star)],
                    Ty::string(),
                )),
                offset: 0,
                has_default: false,
            }],
        }
    }

    fn instance(trait_name: &str, args: Vec<Ty>) -> InstanceDef {
        InstanceDef {
            trait_name: trait_name.into(),
            args,
            vars: Vec::new(),
            constraints: Vec::new(),
            methods: vec![MethodImpl::Native("test".into())],
            origin_module: String::new(),
        }
    }

    #[test]
    fn select_unique_instance() {
        let mut registry = TraitRegistry::new();
        registry.register(show_trait()).unwrap();
        let mut db = InstanceDb::new();
        let int_id = db.register(instance("Show", vec![Ty::int()]));
        db.register(instance("Show", vec![Ty::bool()]));

        let mut ctx = InferCtx::new();
        match db.select(&mut ctx, &registry, "Show", &[Ty::int()]) {
            Selection::Unique { id, .. } => assert_eq!(id, int_id),
            other => panic!("expected unique, got {other:?}"),
        }
    }

    #[test]
    fn select_not_found_for_concrete_type() {
        let mut registry = TraitRegistry::new();
        registry.register(show_trait()).unwrap();
        let db = InstanceDb::new();
        let mut ctx = InferCtx::new();
        assert!(matches!(
            db.select(&mut ctx, &registry, "Show", &[Ty::int()]),
            Selection::NotFound
        ));
    }

    #[test]
    fn select_defers_on_polymorphic_argument() {
        let mut registry = TraitRegistry::new();
        registry.register(show_trait()).unwrap();
        let mut db = InstanceDb::new();
        db.register(instance("Show", vec![Ty::int()]));
        let mut ctx = InferCtx::new();
        let var = ctx.fresh_var();
        assert!(matches!(
            db.select(&mut ctx, &registry, "Show", &[var]),
            Selection::Deferred
        ));
    }

    #[test]
    fn parametric_instance_matches_any_element() {
        let mut registry = TraitRegistry::new();
        registry.register(show_trait()).unwrap();
        let mut db = InstanceDb::new();
        let list_inst = InstanceDef {
            trait_name: "Show".into(),
            args: vec![Ty::list(Ty::Rigid("a".into(), Kind::Star))],
            vars: vec![("a".into(), Kind::Star)],
            constraints: Vec::new(),
            methods: vec![MethodImpl::Native("test".into())],
            origin_module: String::new(),
        };
        let id = db.register(list_inst);

        let mut ctx = InferCtx::new();
        match db.select(&mut ctx, &registry, "Show", &[Ty::list(Ty::int())]) {
            Selection::Unique { id: got, .. } => assert_eq!(got, id),
            other => panic!("expected unique, got {other:?}"),
        }
    }

    #[test]
    fn fundep_improves_dependent_position() {
        let mut registry = TraitRegistry::new();
        registry
            .register(TraitDef {
                name: "Convert".into(),
                params: vec![("a".into(), Kind::Star), ("b".into(), Kind::Star)],
                supers: Vec::new(),
                fundeps: vec![(vec![0], vec![1])],
                methods: vec![TraitMethodSig {
                    name: "convert".into(),
                    scheme: Scheme::mono(Ty::func(
                        vec![Ty::Rigid("a".into(), Kind::Star)],
                        Ty::Rigid("b".into(), Kind::Star),
                    )),
                    offset: 0,
                    has_default: false,
                }],
            })
            .unwrap();

        let mut db = InstanceDb::new();
        db.register(instance("Convert", vec![Ty::int(), Ty::string()]));

        let mut ctx = InferCtx::new();
        let b = ctx.fresh_var();
        match db.select(&mut ctx, &registry, "Convert", &[Ty::int(), b.clone()]) {
            Selection::Unique { .. } => {}
            other => panic!("expected unique, got {other:?}"),
        }
        // The dependent position was improved to String.
        assert_eq!(ctx.resolve(b), Ty::string());
    }

    #[test]
    fn overlap_detection() {
        let mut registry = TraitRegistry::new();
        registry.register(show_trait()).unwrap();
        let mut db = InstanceDb::new();
        db.register(instance("Show", vec![Ty::int()]));

        let mut ctx = InferCtx::new();
        let dup = instance("Show", vec![Ty::int()]);
        assert!(db.find_overlap(&mut ctx, &registry, &dup).is_some());

        let fresh = instance("Show", vec![Ty::bool()]);
        assert!(db.find_overlap(&mut ctx, &registry, &fresh).is_none());
    }

    #[test]
    fn method_owner_lookup() {
        let mut registry = TraitRegistry::new();
        registry.register(show_trait()).unwrap();
        assert_eq!(registry.owner_of_method("show"), Some("Show"));
        assert_eq!(registry.owner_of_method("missing"), None);
    }
}
