//! The four-pass semantic analyzer.
//!
//! 1. **Naming** -- declare every top-level name as pending, catch
//!    duplicates.
//! 2. **Headers** -- resolve type declarations, build function and trait
//!    signatures, register constructor symbols.
//! 3. **Instances** -- validate and register `instance` declarations.
//! 4. **Bodies** -- Algorithm-J style inference over every body, constraint
//!    solving against the instance database, dictionary elaboration
//!    (witness parameters and call-site witness wiring), match
//!    exhaustiveness, and tail-call marking.
//!
//! Passes accumulate diagnostics and keep going; later passes treat
//! missing information defensively instead of panicking.

use rustc_hash::{FxHashMap, FxHashSet};

use funxy_common::{DiagCode, Diagnostic, DiagnosticSink, Severity, Token};
use funxy_parser::ast::{
    BinOp, Block, Expr, ExprKind, FunctionDecl, FunctionLit, ImportDecl, InstanceDecl,
    InterpPart, KindExpr, MatchArm, NodeId, Param, PatKind, PatLit, Pattern, Program, Stmt,
    StmtKind, TraitDecl, TraitMethod, TypeDecl, TypeDeclBody, TypeExpr, TypeExprKind, UnOp,
};

use crate::builtins;
use crate::exhaustiveness::{check_match, Coverage};
use crate::registry::{AdtDef, AliasDef, CtorSig, TypeRegistry};
use crate::scope::{ScopeKind, Symbol, SymbolId, SymbolKind, SymbolTable};
use crate::traits::{
    operator_trait, InstanceDb, InstanceDef, MethodImpl, Selection, TraitDef, TraitMethodSig,
    TraitRegistry,
};
use crate::ty::{Constraint, Kind, Scheme, Ty, TyVar};
use crate::unify::{InferCtx, UnifyError};

/// Maximum alias expansion / dictionary recursion depth.
const MAX_EXPANSION_DEPTH: u32 = 64;

/// Tunable analyzer behavior.
#[derive(Debug, Clone)]
pub struct AnalyzerOptions {
    /// Severity of non-exhaustive ADT matches.
    pub exhaustiveness: Severity,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        AnalyzerOptions { exhaustiveness: Severity::Warning }
    }
}

/// Where a dictionary value comes from at a call site.
#[derive(Debug, Clone, PartialEq)]
pub enum WitnessSource {
    /// A concrete instance dictionary; `deps` feed a parametric
    /// instance's own constraints.
    Instance { id: crate::traits::InstanceId, deps: Vec<WitnessSource> },
    /// The `i`-th witness parameter of the enclosing function.
    Param(usize),
}

/// A call site that dispatches through a trait dictionary.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodRef {
    pub trait_name: String,
    /// Dictionary slot of the method.
    pub method_index: usize,
    /// Index into the call's witness list holding the dispatch dictionary.
    pub witness_slot: usize,
}

/// Everything a module makes visible to its importers.
#[derive(Debug, Default, Clone)]
pub struct ModuleExports {
    pub values: FxHashMap<String, (SymbolKind, Scheme)>,
    pub adts: Vec<AdtDef>,
    pub aliases: Vec<AliasDef>,
    pub traits: Vec<TraitDef>,
    pub instances: Vec<InstanceDef>,
    pub trait_defaults: Vec<((String, String), NodeId)>,
}

/// Pre-resolved dependency context for analyzing one module.
#[derive(Debug, Default)]
pub struct ImportContext {
    /// Symbols injected directly into the module scope.
    pub values: Vec<(String, SymbolKind, Scheme)>,
    /// Module bindings for qualified access (`m.foo`), keyed by the local
    /// binding name (alias or inferred).
    pub modules: FxHashMap<String, ModuleExports>,
    /// Globally visible declarations from every processed dependency.
    pub adts: Vec<AdtDef>,
    pub aliases: Vec<AliasDef>,
    pub traits: Vec<TraitDef>,
    pub instances: Vec<InstanceDef>,
    pub trait_defaults: Vec<((String, String), NodeId)>,
}

/// The result of analyzing one module (a set of ordered files).
pub struct Analysis {
    pub types: FxHashMap<NodeId, Ty>,
    pub resolutions: FxHashMap<NodeId, SymbolId>,
    pub symbols: SymbolTable,
    pub witnesses: FxHashMap<NodeId, Vec<WitnessSource>>,
    pub method_refs: FxHashMap<NodeId, MethodRef>,
    /// Implicit dictionary parameters per function/instance-method node.
    pub fn_constraints: FxHashMap<NodeId, Vec<Constraint>>,
    pub tail_calls: FxHashSet<NodeId>,
    pub trait_registry: TraitRegistry,
    pub instance_db: InstanceDb,
    pub type_registry: TypeRegistry,
    /// Default method bodies: (trait, method) -> `TraitMethod` node.
    pub trait_defaults: FxHashMap<(String, String), NodeId>,
    pub exports: ModuleExports,
    pub diagnostics: DiagnosticSink,
}

impl Analysis {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.has_errors()
    }
}

/// Analyze a module with no dependencies.
pub fn analyze(files: &[&Program], options: AnalyzerOptions) -> Analysis {
    let imports = ImportContext::default();
    analyze_with_imports(files, &imports, options)
}

/// Analyze a module given its resolved dependency context.
pub fn analyze_with_imports(
    files: &[&Program],
    imports: &ImportContext,
    options: AnalyzerOptions,
) -> Analysis {
    let mut analyzer = Analyzer::new(imports, options);
    analyzer.run(files)
}

struct Pending {
    constraint: Constraint,
    node: NodeId,
    slot: usize,
    token: Token,
}

struct Analyzer<'a> {
    ctx: InferCtx,
    table: SymbolTable,
    traits: TraitRegistry,
    instances: InstanceDb,
    types_reg: TypeRegistry,
    options: AnalyzerOptions,
    imports: &'a ImportContext,
    diags: DiagnosticSink,
    file: String,
    module_name: String,

    type_map: FxHashMap<NodeId, Ty>,
    resolutions: FxHashMap<NodeId, SymbolId>,
    witnesses: FxHashMap<NodeId, Vec<Option<WitnessSource>>>,
    method_refs: FxHashMap<NodeId, MethodRef>,
    fn_constraints: FxHashMap<NodeId, Vec<Constraint>>,
    tail_calls: FxHashSet<NodeId>,
    trait_defaults: FxHashMap<(String, String), NodeId>,

    pending: Vec<Pending>,
    /// Constraints available as witness parameters of the function being
    /// checked, in parameter order.
    witness_env: Vec<Constraint>,
    /// Named type variables in scope while checking a body (rigids from
    /// the enclosing signature).
    tyvar_env: FxHashMap<String, Ty>,
    ret_stack: Vec<Ty>,
    loop_depth: u32,

    /// Names of types/traits declared by THIS module (for exports).
    own_types: Vec<String>,
    own_traits: Vec<String>,
    own_instances: Vec<crate::traits::InstanceId>,
}

impl<'a> Analyzer<'a> {
    fn new(imports: &'a ImportContext, options: AnalyzerOptions) -> Self {
        let mut table = SymbolTable::new();
        let mut traits = TraitRegistry::new();
        let mut instances = InstanceDb::new();
        let mut types_reg = TypeRegistry::new();
        builtins::install(&mut table, &mut traits, &mut instances, &mut types_reg);

        // Imported declarations become part of the ambient context.
        for adt in &imports.adts {
            builtins::define_ctor_symbols(&mut table, adt);
            types_reg.register_adt(adt.clone());
        }
        for alias in &imports.aliases {
            types_reg.register_alias(alias.clone());
        }
        for def in &imports.traits {
            let _ = traits.register(def.clone());
        }
        for inst in &imports.instances {
            instances.register(inst.clone());
        }
        let mut trait_defaults = FxHashMap::default();
        for (key, node) in &imports.trait_defaults {
            trait_defaults.insert(key.clone(), *node);
        }
        for (name, kind, scheme) in &imports.values {
            table.define(
                Symbol::new(name.clone(), *kind)
                    .with_scheme(scheme.clone())
                    .with_origin("import"),
            );
        }
        for name in imports.modules.keys() {
            table.define(
                Symbol::new(name.clone(), SymbolKind::Module).with_origin(name.clone()),
            );
        }

        Analyzer {
            ctx: InferCtx::new(),
            table,
            traits,
            instances,
            types_reg,
            options,
            imports,
            diags: DiagnosticSink::new(),
            file: String::new(),
            module_name: String::new(),
            type_map: FxHashMap::default(),
            resolutions: FxHashMap::default(),
            witnesses: FxHashMap::default(),
            method_refs: FxHashMap::default(),
            fn_constraints: FxHashMap::default(),
            tail_calls: FxHashSet::default(),
            trait_defaults,
            pending: Vec::new(),
            witness_env: Vec::new(),
            tyvar_env: FxHashMap::default(),
            ret_stack: Vec::new(),
            loop_depth: 0,
            own_types: Vec::new(),
            own_traits: Vec::new(),
            own_instances: Vec::new(),
        }
    }

    fn run(mut self, files: &[&Program]) -> Analysis {
        if let Some(first) = files.first() {
            self.module_name = first
                .package
                .clone()
                .unwrap_or_else(|| first.file.clone());
        }

        self.pass_naming(files);
        self.pass_headers(files);
        self.pass_instances(files);
        self.pass_bodies(files);

        // Finalize the type map: every entry is fully resolved so no
        // unbound variable leaks to later stages.
        let keys: Vec<NodeId> = self.type_map.keys().copied().collect();
        for key in keys {
            let ty = self.type_map[&key].clone();
            let resolved = self.ctx.resolve(ty);
            self.type_map.insert(key, resolved);
        }

        let exports = self.compute_exports();
        let witnesses = self.finalize_witnesses();

        Analysis {
            types: self.type_map,
            resolutions: self.resolutions,
            symbols: self.table,
            witnesses,
            method_refs: self.method_refs,
            fn_constraints: self.fn_constraints,
            tail_calls: self.tail_calls,
            trait_registry: self.traits,
            instance_db: self.instances,
            type_registry: self.types_reg,
            trait_defaults: self.trait_defaults,
            exports,
            diagnostics: self.diags,
        }
    }

    // ── Diagnostics ────────────────────────────────────────────────────

    fn error(&mut self, code: DiagCode, token: &Token, message: impl Into<String>) {
        self.diags.push(Diagnostic::error(
            code,
            self.file.clone(),
            token.span,
            token.line,
            token.col,
            message,
        ));
    }

    fn warn(&mut self, code: DiagCode, token: &Token, message: impl Into<String>) {
        self.diags.push(Diagnostic::warning(
            code,
            self.file.clone(),
            token.span,
            token.line,
            token.col,
            message,
        ));
    }

    /// Unify and report failure at `token`.
    fn unify_at(&mut self, token: &Token, expected: Ty, found: Ty) -> bool {
        match self.ctx.unify(expected, found) {
            Ok(()) => true,
            Err(err) => {
                let (code, message) = match &err {
                    UnifyError::InfiniteType { .. } => (DiagCode::A005, err.to_string()),
                    UnifyError::ArityMismatch { .. } => (DiagCode::A009, err.to_string()),
                    _ => (DiagCode::A004, err.to_string()),
                };
                self.error(code, token, message);
                false
            }
        }
    }

    // ── Pass 1: naming ─────────────────────────────────────────────────

    fn pass_naming(&mut self, files: &[&Program]) {
        for program in files {
            self.file = program.file.clone();
            for stmt in &program.stmts {
                match &stmt.kind {
                    StmtKind::Function(decl) => {
                        self.declare_top(&decl.name, SymbolKind::Pending, &decl.token, decl.id);
                    }
                    StmtKind::Const { name, value, .. } => {
                        let _ = value;
                        self.declare_top(name, SymbolKind::Pending, &stmt.token, stmt.id);
                    }
                    StmtKind::ConstPattern { pat, .. } => {
                        for name in pat.bound_names() {
                            self.declare_top(&name, SymbolKind::Pending, &pat.token, pat.id);
                        }
                    }
                    StmtKind::TypeDecl(decl) => {
                        self.declare_top(&decl.name, SymbolKind::Type, &decl.token, decl.id);
                        if let TypeDeclBody::Adt(ctors) = &decl.body {
                            for ctor in ctors {
                                self.declare_top(
                                    &ctor.name,
                                    SymbolKind::Pending,
                                    &ctor.token,
                                    ctor.id,
                                );
                            }
                        }
                    }
                    StmtKind::Trait(decl) => {
                        self.declare_top(&decl.name, SymbolKind::Trait, &decl.token, decl.id);
                    }
                    StmtKind::Instance(_)
                    | StmtKind::Expr(_)
                    | StmtKind::Directive { .. }
                    | StmtKind::Break
                    | StmtKind::Continue
                    | StmtKind::Return(_) => {}
                }
            }
        }
    }

    fn declare_top(&mut self, name: &str, kind: SymbolKind, token: &Token, node: NodeId) {
        if let Some(existing) = self.table.lookup_module_scope(name) {
            if self.table.symbol(existing).def_node.is_some() {
                self.error(
                    DiagCode::A002,
                    token,
                    format!("duplicate top-level declaration of `{name}`"),
                );
                return;
            }
        }
        let origin = self.module_name.clone();
        self.table.define(
            Symbol::new(name, kind)
                .with_node(node)
                .with_origin(origin),
        );
    }

    // ── Pass 2: headers ────────────────────────────────────────────────

    fn pass_headers(&mut self, files: &[&Program]) {
        // 2a: pre-declare type names with arity so bodies can refer to
        // each other.
        for program in files {
            for stmt in &program.stmts {
                if let StmtKind::TypeDecl(decl) = &stmt.kind {
                    self.types_reg.predeclare(&decl.name, decl.params.len());
                }
            }
        }

        // 2b: type declaration bodies.
        for program in files {
            self.file = program.file.clone();
            for stmt in &program.stmts {
                if let StmtKind::TypeDecl(decl) = &stmt.kind {
                    self.header_type_decl(decl);
                }
            }
        }

        // 2c: trait declarations.
        for program in files {
            self.file = program.file.clone();
            for stmt in &program.stmts {
                if let StmtKind::Trait(decl) = &stmt.kind {
                    self.header_trait_decl(decl);
                }
            }
        }

        // 2d: function signatures.
        for program in files {
            self.file = program.file.clone();
            for stmt in &program.stmts {
                if let StmtKind::Function(decl) = &stmt.kind {
                    self.header_function(decl);
                }
            }
        }
    }

    fn header_type_decl(&mut self, decl: &TypeDecl) {
        let params: Vec<(String, Kind)> = decl
            .params
            .iter()
            .map(|p| (p.name.clone(), self.convert_kind_opt(&p.kind)))
            .collect();

        let mut env: FxHashMap<String, Ty> = params
            .iter()
            .map(|(n, k)| (n.clone(), Ty::Rigid(n.clone(), k.clone())))
            .collect();

        match &decl.body {
            TypeDeclBody::Alias(body) => {
                let body = self.convert_type_in(body, &mut env, false);
                self.types_reg.register_alias(AliasDef {
                    name: decl.name.clone(),
                    params,
                    body,
                });
            }
            TypeDeclBody::Adt(ctors) => {
                let sigs: Vec<CtorSig> = ctors
                    .iter()
                    .map(|ctor| CtorSig {
                        name: ctor.name.clone(),
                        fields: ctor
                            .fields
                            .iter()
                            .map(|f| self.convert_type_in(f, &mut env, false))
                            .collect(),
                    })
                    .collect();
                let adt = AdtDef {
                    name: decl.name.clone(),
                    params,
                    ctors: sigs,
                };
                // Constructor symbols replace their pending placeholders.
                for ctor in &adt.ctors {
                    let scheme = builtins::ctor_scheme(&adt, ctor);
                    if let Some(sym) = self.table.lookup_module_scope(&ctor.name) {
                        let symbol = self.table.symbol_mut(sym);
                        symbol.kind = SymbolKind::Constructor;
                        symbol.scheme = Some(scheme);
                    }
                }
                self.types_reg.register_adt(adt);
            }
        }
        self.own_types.push(decl.name.clone());
    }

    fn header_trait_decl(&mut self, decl: &TraitDecl) {
        let params: Vec<(String, Kind)> = decl
            .params
            .iter()
            .map(|p| (p.name.clone(), self.convert_kind_opt(&p.kind)))
            .collect();

        // Functional dependencies: variable names -> parameter indexes.
        let mut fundeps = Vec::new();
        for (lhs, rhs) in &decl.fundeps {
            let to_indexes = |names: &[String]| -> Option<Vec<usize>> {
                names
                    .iter()
                    .map(|n| params.iter().position(|(p, _)| p == n))
                    .collect()
            };
            match (to_indexes(lhs), to_indexes(rhs)) {
                (Some(l), Some(r)) => fundeps.push((l, r)),
                _ => {
                    self.error(
                        DiagCode::A001,
                        &decl.token,
                        "functional dependency names a variable that is not a trait parameter",
                    );
                }
            }
        }

        for sup in &decl.supers {
            if !self.traits.contains(sup) {
                self.error(
                    DiagCode::A001,
                    &decl.token,
                    format!("unknown super-trait `{sup}`"),
                );
            }
        }

        let mut methods = Vec::new();
        for (offset, method) in decl.methods.iter().enumerate() {
            let scheme = self.trait_method_scheme(decl, &params, method);
            if method.default_body.is_some() {
                self.trait_defaults
                    .insert((decl.name.clone(), method.name.clone()), method.id);
            }
            methods.push(TraitMethodSig {
                name: method.name.clone(),
                scheme,
                offset,
                has_default: method.default_body.is_some(),
            });
        }

        let def = TraitDef {
            name: decl.name.clone(),
            params,
            supers: decl.supers.clone(),
            fundeps,
            methods,
        };
        if let Err(owner) = self.traits.register(def) {
            self.error(
                DiagCode::A002,
                &decl.token,
                format!("a method of trait `{}` is already defined by trait `{owner}`", decl.name),
            );
        }
        self.own_traits.push(decl.name.clone());
    }

    /// Build the scheme of one trait method, quantified over the trait
    /// parameters plus any method-local type variables. The owning trait's
    /// constraint comes first.
    fn trait_method_scheme(
        &mut self,
        decl: &TraitDecl,
        params: &[(String, Kind)],
        method: &TraitMethod,
    ) -> Scheme {
        let mut env: FxHashMap<String, Ty> = params
            .iter()
            .map(|(n, k)| (n.clone(), Ty::Rigid(n.clone(), k.clone())))
            .collect();

        let param_tys: Vec<Ty> = method
            .params
            .iter()
            .map(|p| match &p.ty {
                Some(te) => self.convert_type_in(te, &mut env, true),
                None => {
                    self.error(
                        DiagCode::A006,
                        &p.token,
                        "trait method parameters must be annotated",
                    );
                    Ty::nil()
                }
            })
            .collect();
        let ret = match &method.ret {
            Some(te) => self.convert_type_in(te, &mut env, true),
            None => Ty::nil(),
        };

        // Deterministic quantifier order: trait parameters first, then
        // method-local variables by first appearance.
        let mut ordered: Vec<String> = params.iter().map(|(n, _)| n.clone()).collect();
        for ty in param_tys.iter().chain(std::iter::once(&ret)) {
            collect_rigid_names(ty, &mut ordered);
        }
        let vars: Vec<(String, Kind)> = ordered
            .into_iter()
            .filter_map(|name| match env.get(&name) {
                Some(Ty::Rigid(_, kind)) => Some((name, kind.clone())),
                _ => None,
            })
            .collect();

        // The owning trait is not registered yet, so its super list comes
        // straight from the declaration.
        let own_constraint = Constraint {
            trait_name: decl.name.clone(),
            args: params
                .iter()
                .map(|(n, k)| Ty::Rigid(n.clone(), k.clone()))
                .collect(),
        };
        let mut constraints = vec![own_constraint.clone()];
        for sup in &decl.supers {
            let arity = self
                .traits
                .get(sup)
                .map(|t| t.params.len())
                .unwrap_or(1)
                .min(own_constraint.args.len());
            let sc = Constraint {
                trait_name: sup.clone(),
                args: own_constraint.args[..arity].to_vec(),
            };
            if !constraints.contains(&sc) {
                constraints.push(sc);
            }
        }

        Scheme {
            vars,
            row_vars: Vec::new(),
            constraints,
            ty: Ty::func(param_tys, ret),
        }
    }

    /// Register a function's signature when it is fully annotated;
    /// unannotated functions stay pending for body inference.
    fn header_function(&mut self, decl: &FunctionDecl) {
        let Some(scheme) = self.function_scheme(decl) else {
            return; // inferred later
        };
        if let Some(sym) = self.table.lookup_module_scope(&decl.name) {
            let symbol = self.table.symbol_mut(sym);
            symbol.kind = SymbolKind::Function;
            symbol.scheme = Some(scheme);
        }
    }

    /// Build a function's declared scheme. `None` when any parameter lacks
    /// an annotation (the body pass infers the type instead).
    fn function_scheme(&mut self, decl: &FunctionDecl) -> Option<Scheme> {
        if decl.params.iter().any(|p| p.ty.is_none()) {
            return None;
        }

        let mut env: FxHashMap<String, Ty> = FxHashMap::default();
        for tp in &decl.type_params {
            let kind = self.convert_kind_opt(&tp.kind);
            env.insert(tp.name.clone(), Ty::Rigid(tp.name.clone(), kind));
        }

        let mut param_tys = Vec::new();
        let mut default_count = 0usize;
        let mut variadic = false;
        for param in &decl.params {
            let te = param.ty.as_ref().expect("checked above");
            let mut ty = self.convert_type_in(te, &mut env, true);
            if param.variadic {
                variadic = true;
                ty = Ty::list(ty);
            }
            if param.default.is_some() {
                default_count += 1;
            }
            param_tys.push(ty);
        }
        let ret = match &decl.ret {
            Some(te) => self.convert_type_in(te, &mut env, true),
            None => Ty::nil(),
        };

        let declared: Vec<Constraint> = decl
            .constraints
            .iter()
            .map(|c| Constraint {
                trait_name: c.trait_name.clone(),
                args: c
                    .args
                    .iter()
                    .map(|a| self.convert_type_in(a, &mut env, true))
                    .collect(),
            })
            .collect();
        let constraints = self.expand_constraints(declared);

        // Deterministic quantifier order: declared parameters first, then
        // implicit variables in order of first appearance.
        let mut ordered: Vec<String> =
            decl.type_params.iter().map(|tp| tp.name.clone()).collect();
        for ty in param_tys.iter().chain(std::iter::once(&ret)) {
            collect_rigid_names(ty, &mut ordered);
        }
        for c in &constraints {
            for a in &c.args {
                collect_rigid_names(a, &mut ordered);
            }
        }
        let vars: Vec<(String, Kind)> = ordered
            .into_iter()
            .filter_map(|name| match env.get(&name) {
                Some(Ty::Rigid(_, kind)) => Some((name, kind.clone())),
                _ => None,
            })
            .collect();

        Some(Scheme {
            vars,
            row_vars: Vec::new(),
            constraints,
            ty: Ty::Func {
                params: param_tys,
                ret: Box::new(ret),
                variadic,
                default_count,
            },
        })
    }

    /// Add the transitive super-trait constraints after the declared ones,
    /// deduplicated.
    fn expand_constraints(&self, declared: Vec<Constraint>) -> Vec<Constraint> {
        let mut out: Vec<Constraint> = Vec::new();
        for c in declared {
            let supers = self.traits.transitive_supers(&c.trait_name);
            if !out.contains(&c) {
                out.push(c.clone());
            }
            for sup in supers {
                let arity = self
                    .traits
                    .get(&sup)
                    .map(|t| t.params.len())
                    .unwrap_or(1)
                    .min(c.args.len());
                let sc = Constraint {
                    trait_name: sup,
                    args: c.args[..arity].to_vec(),
                };
                if !out.contains(&sc) {
                    out.push(sc);
                }
            }
        }
        out
    }

    // ── Pass 3: instances ──────────────────────────────────────────────

    fn pass_instances(&mut self, files: &[&Program]) {
        for program in files {
            self.file = program.file.clone();
            for stmt in &program.stmts {
                if let StmtKind::Instance(decl) = &stmt.kind {
                    self.register_instance(decl);
                }
            }
        }
    }

    fn register_instance(&mut self, decl: &InstanceDecl) {
        let Some(trait_def) = self.traits.get(&decl.trait_name).cloned() else {
            self.error(
                DiagCode::A001,
                &decl.token,
                format!("unknown trait `{}`", decl.trait_name),
            );
            return;
        };

        if decl.args.len() != trait_def.params.len() {
            self.error(
                DiagCode::A009,
                &decl.token,
                format!(
                    "trait `{}` takes {} type argument(s), instance provides {}",
                    decl.trait_name,
                    trait_def.params.len(),
                    decl.args.len()
                ),
            );
            return;
        }

        // Convert argument types; lowercase names become quantified vars
        // (ordered by first appearance for determinism).
        let mut env: FxHashMap<String, Ty> = FxHashMap::default();
        let args: Vec<Ty> = decl
            .args
            .iter()
            .map(|a| self.convert_type_in(a, &mut env, true))
            .collect();
        let mut ordered: Vec<String> = Vec::new();
        for arg in &args {
            collect_rigid_names(arg, &mut ordered);
        }
        let vars: Vec<(String, Kind)> = ordered
            .into_iter()
            .filter_map(|name| match env.get(&name) {
                Some(Ty::Rigid(_, kind)) => Some((name, kind.clone())),
                _ => None,
            })
            .collect();

        // Kind agreement with the trait parameters.
        for ((arg, (_, want)), ast_arg) in
            args.iter().zip(&trait_def.params).zip(&decl.args)
        {
            if let Some(got) = self.kind_of_ty(arg) {
                if &got != want {
                    self.error(
                        DiagCode::A006,
                        &ast_arg.token,
                        format!("instance argument has kind `{got}`, trait expects `{want}`"),
                    );
                }
            }
        }

        // Method set must be exactly the trait's (modulo defaults).
        let mut slots: Vec<MethodImpl> = Vec::new();
        for sig in &trait_def.methods {
            match decl.methods.iter().find(|m| m.name == sig.name) {
                Some(method) => slots.push(MethodImpl::Decl(method.id)),
                None if sig.has_default => slots.push(MethodImpl::Default),
                None => {
                    self.error(
                        DiagCode::A010,
                        &decl.token,
                        format!(
                            "instance of `{}` is missing method `{}`",
                            decl.trait_name, sig.name
                        ),
                    );
                    slots.push(MethodImpl::Default);
                }
            }
        }
        for method in &decl.methods {
            if trait_def.method_index(&method.name).is_none() {
                self.error(
                    DiagCode::A010,
                    &method.token,
                    format!(
                        "`{}` is not a method of trait `{}`",
                        method.name, decl.trait_name
                    ),
                );
            }
        }

        // Super-trait obligations, checked when the arguments are concrete.
        for sup in self.traits.transitive_supers(&decl.trait_name) {
            let arity = self
                .traits
                .get(&sup)
                .map(|t| t.params.len())
                .unwrap_or(1)
                .min(args.len());
            let sup_args = args[..arity].to_vec();
            if sup_args.iter().all(|a| !matches!(a, Ty::Rigid(..))) {
                match self.instances.select(&mut self.ctx, &self.traits, &sup, &sup_args) {
                    Selection::Unique { .. } | Selection::Deferred => {}
                    _ => {
                        self.error(
                            DiagCode::A007,
                            &decl.token,
                            format!(
                                "instance of `{}` requires an instance of super-trait `{sup}`",
                                decl.trait_name
                            ),
                        );
                    }
                }
            }
        }

        let def = InstanceDef {
            trait_name: decl.trait_name.clone(),
            args,
            vars,
            constraints: Vec::new(),
            methods: slots,
            origin_module: self.module_name.clone(),
        };

        if let Some(existing) = self.instances.find_overlap(&mut self.ctx, &self.traits, &def) {
            let other = self.instances.get(existing).origin_module.clone();
            self.error(
                DiagCode::A008,
                &decl.token,
                format!(
                    "overlapping instance of `{}` (already declared in `{other}`)",
                    decl.trait_name
                ),
            );
            return;
        }

        let id = self.instances.register(def);
        self.own_instances.push(id);
    }

    // ── Pass 4: bodies ─────────────────────────────────────────────────

    fn pass_bodies(&mut self, files: &[&Program]) {
        // Give every unannotated top-level function a placeholder so
        // mutual recursion works.
        for program in files {
            for stmt in &program.stmts {
                if let StmtKind::Function(decl) = &stmt.kind {
                    if let Some(sym) = self.table.lookup_module_scope(&decl.name) {
                        if self.table.symbol(sym).scheme.is_none() {
                            let placeholder = self.ctx.fresh_var();
                            let symbol = self.table.symbol_mut(sym);
                            symbol.kind = SymbolKind::Function;
                            symbol.scheme = Some(Scheme::mono(placeholder));
                        }
                    }
                }
            }
        }

        for program in files {
            self.file = program.file.clone();
            self.check_imports(&program.imports);
            for stmt in &program.stmts {
                match &stmt.kind {
                    StmtKind::Function(decl) => self.body_function(decl),
                    StmtKind::Instance(decl) => self.body_instance(decl),
                    StmtKind::Trait(decl) => self.body_trait_defaults(decl),
                    StmtKind::Const { name, ty, value } => {
                        self.body_const(stmt, name, ty.as_ref(), value);
                    }
                    StmtKind::ConstPattern { pat, value } => {
                        let value_ty = self.infer_expr(value);
                        self.infer_pattern_top(pat, value_ty);
                        self.drain_pending(true);
                    }
                    StmtKind::Expr(expr) => {
                        let ty = self.infer_expr(expr);
                        let _ = ty;
                        self.drain_pending(true);
                    }
                    StmtKind::Directive { .. } => {}
                    StmtKind::TypeDecl(_) => {}
                    StmtKind::Break | StmtKind::Continue => {
                        self.error(
                            DiagCode::A010,
                            &stmt.token,
                            "`break`/`continue` outside of a loop",
                        );
                    }
                    StmtKind::Return(_) => {
                        self.error(
                            DiagCode::A010,
                            &stmt.token,
                            "`return` outside of a function",
                        );
                    }
                }
            }
        }
    }

    /// Imports were resolved by the loader; here we only validate that
    /// exposed names actually exist in the source module.
    fn check_imports(&mut self, imports: &[ImportDecl]) {
        for import in imports {
            let key = import
                .alias
                .clone()
                .unwrap_or_else(|| last_segment(&import.path));
            if let Some(exports) = self.imports.modules.get(&key) {
                for symbol in import.symbols.iter().chain(&import.exclude) {
                    if !exports.values.contains_key(symbol)
                        && !exports.adts.iter().any(|a| {
                            a.name == *symbol || a.ctors.iter().any(|c| c.name == *symbol)
                        })
                        && !exports.traits.iter().any(|t| t.name == *symbol)
                        && !exports.aliases.iter().any(|a| a.name == *symbol)
                    {
                        self.error(
                            DiagCode::A003,
                            &import.token,
                            format!("`{}` is not exported by \"{}\"", symbol, import.path),
                        );
                    }
                }
            }
        }
    }

    fn body_const(
        &mut self,
        stmt: &Stmt,
        name: &str,
        annotation: Option<&TypeExpr>,
        value: &Expr,
    ) {
        self.ctx.enter_level();
        let value_ty = self.infer_expr(value);
        self.ctx.leave_level();

        let final_ty = if let Some(te) = annotation {
            let mut env = self.tyvar_env.clone();
            let declared = self.convert_type_in(te, &mut env, false);
            self.unify_at(&stmt.token, declared.clone(), value_ty);
            declared
        } else {
            value_ty
        };

        self.drain_pending(true);

        // Syntactic value restriction: only function values generalize.
        let scheme = if matches!(value.kind, ExprKind::Lambda(_)) {
            self.ctx.generalize(final_ty, Vec::new())
        } else {
            let resolved = self.ctx.resolve(final_ty);
            Scheme::mono(resolved)
        };

        if let Some(sym) = self.table.lookup_module_scope(name) {
            if self.table.symbol(sym).def_node == Some(stmt.id)
                || self.table.symbol(sym).kind == SymbolKind::Pending
            {
                let symbol = self.table.symbol_mut(sym);
                symbol.kind = SymbolKind::Constant;
                symbol.scheme = Some(scheme);
                return;
            }
        }
        let origin = self.module_name.clone();
        self.table.define(
            Symbol::new(name, SymbolKind::Constant)
                .with_scheme(scheme)
                .with_node(stmt.id)
                .with_origin(origin),
        );
    }

    /// Destructuring top-level binding: infer the pattern against the
    /// value and upgrade each pending symbol.
    fn infer_pattern_top(&mut self, pat: &Pattern, value_ty: Ty) {
        let bindings = self.infer_pattern_collect(pat, value_ty);
        for (name, ty) in bindings {
            let resolved = self.ctx.resolve(ty);
            if let Some(sym) = self.table.lookup_module_scope(&name) {
                if self.table.symbol(sym).kind == SymbolKind::Pending {
                    let symbol = self.table.symbol_mut(sym);
                    symbol.kind = SymbolKind::Constant;
                    symbol.scheme = Some(Scheme::mono(resolved));
                    continue;
                }
            }
            let origin = self.module_name.clone();
            self.table.define(
                Symbol::new(name, SymbolKind::Constant)
                    .with_scheme(Scheme::mono(resolved))
                    .with_origin(origin),
            );
        }
    }

    fn body_function(&mut self, decl: &FunctionDecl) {
        let declared = self
            .table
            .lookup_module_scope(&decl.name)
            .and_then(|sym| self.table.symbol(sym).scheme.clone());

        match declared {
            Some(scheme) if !scheme.vars.is_empty() || !matches!(scheme.ty, Ty::Var(_)) => {
                self.check_annotated_function(decl.id, &decl.token, &decl.params, &decl.body, &scheme);
            }
            _ => {
                let scheme = self.infer_unannotated_function(decl);
                if let Some(sym) = self.table.lookup_module_scope(&decl.name) {
                    let symbol = self.table.symbol_mut(sym);
                    symbol.kind = SymbolKind::Function;
                    symbol.scheme = Some(scheme);
                }
            }
        }
    }

    /// Check a body against its declared scheme: parameters bind at the
    /// scheme's (rigid) types, the constraints become the witness
    /// environment, the body must produce the declared return type.
    fn check_annotated_function(
        &mut self,
        fn_node: NodeId,
        token: &Token,
        params: &[Param],
        body: &Expr,
        scheme: &Scheme,
    ) {
        let Ty::Func { params: param_tys, ret, .. } = &scheme.ty else {
            return;
        };

        let saved_env = std::mem::take(&mut self.witness_env);
        let saved_tyvars = std::mem::take(&mut self.tyvar_env);
        self.witness_env = scheme.constraints.clone();
        for (name, kind) in &scheme.vars {
            self.tyvar_env
                .insert(name.clone(), Ty::Rigid(name.clone(), kind.clone()));
        }
        self.fn_constraints.insert(fn_node, scheme.constraints.clone());

        self.table.push_scope(ScopeKind::Function);
        for (param, ty) in params.iter().zip(param_tys) {
            if let Some(default) = &param.default {
                let default_ty = self.infer_expr(default);
                self.unify_at(&param.token, ty.clone(), default_ty);
            }
            self.table.define(
                Symbol::new(param.name.clone(), SymbolKind::Value)
                    .with_scheme(Scheme::mono(ty.clone()))
                    .with_node(param.id),
            );
        }

        self.ret_stack.push((**ret).clone());
        let body_ty = self.infer_expr(body);
        if !matches!(**ret, Ty::Con(ref n) if n == "Nil") {
            self.unify_at(token, (**ret).clone(), body_ty);
        }
        self.ret_stack.pop();

        self.drain_pending(true);
        self.mark_tail_positions(body);
        self.table.pop_scope();
        self.witness_env = saved_env;
        self.tyvar_env = saved_tyvars;
    }

    /// Infer an unannotated function and generalize, folding leftover
    /// deferred constraints into the scheme as witness parameters.
    fn infer_unannotated_function(&mut self, decl: &FunctionDecl) -> Scheme {
        let placeholder = self
            .table
            .lookup_module_scope(&decl.name)
            .and_then(|sym| self.table.symbol(sym).scheme.clone())
            .map(|s| s.ty);

        let saved_env = std::mem::take(&mut self.witness_env);
        let saved_tyvars = std::mem::take(&mut self.tyvar_env);
        let saved_pending = std::mem::take(&mut self.pending);

        self.ctx.enter_level();
        self.table.push_scope(ScopeKind::Function);

        let mut param_tys = Vec::new();
        for param in &decl.params {
            let ty = match &param.ty {
                Some(te) => {
                    let mut env = FxHashMap::default();
                    self.convert_type_in(te, &mut env, false)
                }
                None => self.ctx.fresh_var(),
            };
            let ty = if param.variadic { Ty::list(ty) } else { ty };
            if let Some(default) = &param.default {
                let default_ty = self.infer_expr(default);
                self.unify_at(&param.token, ty.clone(), default_ty);
            }
            self.table.define(
                Symbol::new(param.name.clone(), SymbolKind::Value)
                    .with_scheme(Scheme::mono(ty.clone()))
                    .with_node(param.id),
            );
            param_tys.push(ty);
        }

        let ret = match &decl.ret {
            Some(te) => {
                let mut env = FxHashMap::default();
                self.convert_type_in(te, &mut env, false)
            }
            None => self.ctx.fresh_var(),
        };
        self.ret_stack.push(ret.clone());
        let body_ty = self.infer_expr(&decl.body);
        self.unify_at(&decl.token, ret.clone(), body_ty);
        self.ret_stack.pop();

        let fn_ty = Ty::Func {
            params: param_tys,
            ret: Box::new(ret),
            variadic: decl.params.iter().any(|p| p.variadic),
            default_count: decl.params.iter().filter(|p| p.default.is_some()).count(),
        };
        if let Some(placeholder) = placeholder {
            self.unify_at(&decl.token, placeholder, fn_ty.clone());
        }

        self.table.pop_scope();
        self.ctx.leave_level();

        // Constraints that stayed deferred become the function's witness
        // parameters, in first-encounter order (super-trait expansion may
        // add more, so witness indexes are taken from the expanded list).
        let leftovers = self.drain_pending(false);
        let inferred: Vec<Constraint> = leftovers
            .iter()
            .map(|p| Constraint {
                trait_name: p.constraint.trait_name.clone(),
                args: p
                    .constraint
                    .args
                    .iter()
                    .map(|a| self.ctx.resolve(a.clone()))
                    .collect(),
            })
            .collect();
        let mut deduped: Vec<Constraint> = Vec::new();
        for c in &inferred {
            if !deduped.contains(c) {
                deduped.push(c.clone());
            }
        }
        let expanded = self.expand_constraints(deduped);

        for (pending, c) in leftovers.iter().zip(&inferred) {
            let slot = expanded.iter().position(|e| e == c).unwrap_or(0);
            self.set_witness(pending.node, pending.slot, WitnessSource::Param(slot));
        }

        let scheme = self.ctx.generalize(fn_ty, expanded);
        self.fn_constraints.insert(decl.id, scheme.constraints.clone());
        self.mark_tail_positions(&decl.body);

        self.witness_env = saved_env;
        self.tyvar_env = saved_tyvars;
        self.pending = saved_pending;
        scheme
    }

    fn body_instance(&mut self, decl: &InstanceDecl) {
        let Some(trait_def) = self.traits.get(&decl.trait_name).cloned() else {
            return;
        };

        // Rebuild the instance argument environment.
        let mut env: FxHashMap<String, Ty> = FxHashMap::default();
        let args: Vec<Ty> = decl
            .args
            .iter()
            .map(|a| self.convert_type_in(a, &mut env, true))
            .collect();

        for method in &decl.methods {
            let Some(sig) = trait_def
                .methods
                .iter()
                .find(|m| m.name == method.name)
            else {
                continue;
            };

            // Substitute trait parameters with the instance arguments in
            // the method signature.
            let rigids: FxHashMap<String, Ty> = trait_def
                .params
                .iter()
                .zip(&args)
                .map(|((n, _), a)| (n.clone(), a.clone()))
                .collect();
            let rows = FxHashMap::default();
            let expected = crate::unify::subst_scheme(&sig.scheme.ty, &rigids, &rows);

            let Ty::Func { params: param_tys, ret, .. } = expected else {
                continue;
            };
            if param_tys.len() != method.params.len() {
                self.error(
                    DiagCode::A009,
                    &method.token,
                    format!(
                        "method `{}` takes {} parameter(s), trait expects {}",
                        method.name,
                        method.params.len(),
                        param_tys.len()
                    ),
                );
                continue;
            }

            let expected_scheme = Scheme {
                vars: Vec::new(),
                row_vars: Vec::new(),
                constraints: Vec::new(),
                ty: Ty::Func {
                    params: param_tys,
                    ret,
                    variadic: false,
                    default_count: 0,
                },
            };

            self.table.push_scope(ScopeKind::Instance);
            self.check_annotated_function(
                method.id,
                &method.token,
                &method.params,
                &method.body,
                &expected_scheme,
            );
            self.table.pop_scope();
        }
    }

    /// Check trait default-method bodies under the trait's own constraint.
    fn body_trait_defaults(&mut self, decl: &TraitDecl) {
        let Some(trait_def) = self.traits.get(&decl.name).cloned() else {
            return;
        };
        for method in &decl.methods {
            let Some(body) = &method.default_body else { continue };
            let Some(sig) = trait_def.methods.iter().find(|m| m.name == method.name) else {
                continue;
            };

            let expected = Scheme {
                vars: sig.scheme.vars.clone(),
                row_vars: Vec::new(),
                constraints: sig.scheme.constraints.clone(),
                ty: sig.scheme.ty.clone(),
            };

            self.table.push_scope(ScopeKind::TraitDefaults);
            self.check_annotated_function(
                method.id,
                &method.token,
                &method.params,
                body,
                &expected,
            );
            self.table.pop_scope();
        }
    }

    // ── Constraint solving ─────────────────────────────────────────────

    fn push_constraints(
        &mut self,
        node: NodeId,
        token: &Token,
        constraints: Vec<Constraint>,
    ) {
        if constraints.is_empty() {
            return;
        }
        let slots = self.witnesses.entry(node).or_default();
        let base = slots.len();
        slots.extend(std::iter::repeat_with(|| None).take(constraints.len()));
        for (i, c) in constraints.into_iter().enumerate() {
            self.pending.push(Pending {
                constraint: c,
                node,
                slot: base + i,
                token: token.clone(),
            });
        }
    }

    fn set_witness(&mut self, node: NodeId, slot: usize, source: WitnessSource) {
        if let Some(slots) = self.witnesses.get_mut(&node) {
            if let Some(entry) = slots.get_mut(slot) {
                *entry = Some(source);
            }
        }
    }

    /// Try to discharge pending constraints. With `strict`, everything
    /// must resolve -- leftovers are errors. Without, deferred constraints
    /// are returned for the caller to generalize over.
    fn drain_pending(&mut self, strict: bool) -> Vec<Pending> {
        let pending = std::mem::take(&mut self.pending);
        let mut leftovers = Vec::new();

        for p in pending {
            match self.resolve_constraint(&p.constraint, &p.token, 0) {
                ConstraintOutcome::Resolved(source) => {
                    self.set_witness(p.node, p.slot, source);
                }
                ConstraintOutcome::Failed => {
                    // Diagnostic already emitted.
                }
                ConstraintOutcome::Deferred => {
                    if strict {
                        let shown = self.display_constraint(&p.constraint);
                        self.error(
                            DiagCode::A008,
                            &p.token,
                            format!("ambiguous constraint `{shown}`: the type is never determined"),
                        );
                    } else {
                        leftovers.push(p);
                    }
                }
            }
        }
        leftovers
    }

    fn display_constraint(&mut self, c: &Constraint) -> String {
        let args: Vec<String> = c
            .args
            .iter()
            .map(|a| self.ctx.resolve(a.clone()).to_string())
            .collect();
        format!("{}<{}>", c.trait_name, args.join(", "))
    }

    fn resolve_constraint(
        &mut self,
        constraint: &Constraint,
        token: &Token,
        depth: u32,
    ) -> ConstraintOutcome {
        if depth > MAX_EXPANSION_DEPTH {
            self.error(
                DiagCode::A007,
                token,
                "constraint resolution recursion limit exceeded",
            );
            return ConstraintOutcome::Failed;
        }

        // 1. The enclosing function's witness parameters.
        let resolved_args: Vec<Ty> = constraint
            .args
            .iter()
            .map(|a| self.ctx.resolve(a.clone()))
            .collect();
        for (i, env_c) in self.witness_env.iter().enumerate() {
            if env_c.trait_name == constraint.trait_name && env_c.args == resolved_args {
                return ConstraintOutcome::Resolved(WitnessSource::Param(i));
            }
        }

        // 2. The instance database.
        match self.instances.select(
            &mut self.ctx,
            &self.traits,
            &constraint.trait_name,
            &resolved_args,
        ) {
            Selection::Unique { id, deps } => {
                let mut dep_sources = Vec::new();
                for dep in &deps {
                    match self.resolve_constraint(dep, token, depth + 1) {
                        ConstraintOutcome::Resolved(ws) => dep_sources.push(ws),
                        ConstraintOutcome::Failed => return ConstraintOutcome::Failed,
                        ConstraintOutcome::Deferred => {
                            let shown = self.display_constraint(dep);
                            self.error(
                                DiagCode::A007,
                                token,
                                format!("no instance for `{shown}` required by a parametric instance"),
                            );
                            return ConstraintOutcome::Failed;
                        }
                    }
                }
                ConstraintOutcome::Resolved(WitnessSource::Instance { id, deps: dep_sources })
            }
            Selection::NotFound => {
                let shown = self.display_constraint(constraint);
                self.error(DiagCode::A007, token, format!("no instance for `{shown}`"));
                ConstraintOutcome::Failed
            }
            Selection::Ambiguous(_) => {
                let shown = self.display_constraint(constraint);
                self.error(
                    DiagCode::A008,
                    token,
                    format!("ambiguous instances for `{shown}`"),
                );
                ConstraintOutcome::Failed
            }
            Selection::Deferred => ConstraintOutcome::Deferred,
        }
    }

    // ── Expression inference ───────────────────────────────────────────

    fn infer_expr(&mut self, expr: &Expr) -> Ty {
        let ty = self.infer_expr_inner(expr);
        let entry = self.ctx.resolve(ty.clone());
        self.type_map.insert(expr.id, entry);
        ty
    }

    fn infer_expr_inner(&mut self, expr: &Expr) -> Ty {
        match &expr.kind {
            ExprKind::Int(_) => Ty::int(),
            ExprKind::BigInt(_) => Ty::big_int(),
            ExprKind::Rational(_) => Ty::rational(),
            ExprKind::Float(_) => Ty::float(),
            ExprKind::Bool(_) => Ty::bool(),
            ExprKind::Nil => Ty::nil(),
            ExprKind::Str(_) => Ty::string(),
            ExprKind::Char(_) => Ty::char(),
            ExprKind::Bytes(_) => Ty::bytes(),
            ExprKind::Bits { .. } => Ty::bits(),
            ExprKind::InterpStr(parts) => {
                for part in parts {
                    if let InterpPart::Expr(e) = part {
                        self.infer_expr(e);
                    }
                }
                Ty::string()
            }

            ExprKind::Ident(name) => self.infer_ident(expr, name),

            ExprKind::Tuple(items) => {
                Ty::Tuple(items.iter().map(|e| self.infer_expr(e)).collect())
            }
            ExprKind::List(items) => {
                let elem = self.ctx.fresh_var();
                for item in items {
                    if let ExprKind::Spread(inner) = &item.kind {
                        let inner_ty = self.infer_expr(inner);
                        self.unify_at(&item.token, Ty::list(elem.clone()), inner_ty);
                        self.type_map.insert(item.id, Ty::list(elem.clone()));
                    } else {
                        let item_ty = self.infer_expr(item);
                        self.unify_at(&item.token, elem.clone(), item_ty);
                    }
                }
                Ty::list(elem)
            }
            ExprKind::Map(entries) => {
                let key = self.ctx.fresh_var();
                let value = self.ctx.fresh_var();
                for (k, v) in entries {
                    let k_ty = self.infer_expr(k);
                    self.unify_at(&k.token, key.clone(), k_ty);
                    let v_ty = self.infer_expr(v);
                    self.unify_at(&v.token, value.clone(), v_ty);
                }
                Ty::map(key, value)
            }
            ExprKind::Record { fields, spread } => {
                let mut field_tys = std::collections::BTreeMap::new();
                for (name, value) in fields {
                    let ty = self.infer_expr(value);
                    field_tys.insert(name.clone(), ty);
                }
                match spread {
                    Some(base) => {
                        let base_ty = self.infer_expr(base);
                        let tail = self.ctx.fresh_row();
                        // The base must be some record; its other fields
                        // flow into the result through the shared row.
                        self.unify_at(
                            &base.token,
                            Ty::Record { fields: Default::default(), row: Some(tail) },
                            base_ty,
                        );
                        Ty::Record { fields: field_tys, row: Some(tail) }
                    }
                    None => Ty::Record { fields: field_tys, row: None },
                }
            }

            ExprKind::Prefix { op, rhs } => {
                let rhs_ty = self.infer_expr(rhs);
                match op {
                    UnOp::Not => {
                        self.unify_at(&rhs.token, Ty::bool(), rhs_ty);
                        Ty::bool()
                    }
                    UnOp::Neg => {
                        let constraint = Constraint {
                            trait_name: "Neg".into(),
                            args: vec![rhs_ty.clone()],
                        };
                        self.method_refs.insert(
                            expr.id,
                            MethodRef {
                                trait_name: "Neg".into(),
                                method_index: 0,
                                witness_slot: 0,
                            },
                        );
                        self.push_constraints(expr.id, &expr.token, vec![constraint]);
                        rhs_ty
                    }
                }
            }

            ExprKind::Infix { op, lhs, rhs } => self.infer_infix(expr, *op, lhs, rhs),

            ExprKind::Call { callee, args } => self.infer_call(expr, callee, args),

            ExprKind::Index { obj, index } => {
                let obj_ty = self.infer_expr(obj);
                let index_ty = self.infer_expr(index);
                let resolved = self.ctx.resolve(obj_ty.clone());
                match &resolved {
                    Ty::App(head, app_args) if matches!(head.as_ref(), Ty::Con(n) if n == "Map") => {
                        self.unify_at(&index.token, app_args[0].clone(), index_ty);
                        app_args[1].clone()
                    }
                    Ty::Con(name) if name == "String" => {
                        self.unify_at(&index.token, Ty::int(), index_ty);
                        Ty::char()
                    }
                    Ty::Con(name) if name == "Bytes" => {
                        self.unify_at(&index.token, Ty::int(), index_ty);
                        Ty::int()
                    }
                    Ty::Tuple(items) => {
                        self.unify_at(&index.token, Ty::int(), index_ty);
                        if let ExprKind::Int(i) = index.kind {
                            items
                                .get(i as usize)
                                .cloned()
                                .unwrap_or_else(|| {
                                    self.error(
                                        DiagCode::A009,
                                        &index.token,
                                        "tuple index out of range",
                                    );
                                    self.ctx.fresh_var()
                                })
                        } else {
                            self.error(
                                DiagCode::A010,
                                &index.token,
                                "tuple index must be an integer literal",
                            );
                            self.ctx.fresh_var()
                        }
                    }
                    _ => {
                        let elem = self.ctx.fresh_var();
                        self.unify_at(&obj.token, Ty::list(elem.clone()), obj_ty);
                        self.unify_at(&index.token, Ty::int(), index_ty);
                        elem
                    }
                }
            }

            ExprKind::Member { obj, name } => self.infer_member(expr, obj, name),

            ExprKind::Annotated { expr: inner, ty } => {
                let inner_ty = self.infer_expr(inner);
                let mut env = self.tyvar_env.clone();
                let declared = self.convert_type_in(ty, &mut env, false);
                self.unify_at(&inner.token, declared.clone(), inner_ty);
                declared
            }

            ExprKind::Assign { target, value } => {
                let value_ty = self.infer_expr(value);
                if let ExprKind::Ident(name) = &target.kind {
                    match self.table.lookup(name) {
                        Some(sym) => {
                            let symbol = self.table.symbol(sym);
                            let is_immutable = matches!(
                                symbol.kind,
                                SymbolKind::Constant | SymbolKind::Function | SymbolKind::Constructor
                            );
                            let expected = symbol.scheme.as_ref().map(|scheme| scheme.ty.clone());
                            if is_immutable {
                                self.error(
                                    DiagCode::A010,
                                    &target.token,
                                    format!("`{name}` is a constant and cannot be reassigned"),
                                );
                            }
                            self.resolutions.insert(target.id, sym);
                            if let Some(expected) = expected {
                                self.unify_at(&value.token, expected, value_ty);
                            }
                        }
                        None => {
                            self.error(
                                DiagCode::A001,
                                &target.token,
                                format!("unknown identifier `{name}`"),
                            );
                        }
                    }
                }
                Ty::nil()
            }

            ExprKind::TypeApp { expr: inner, args } => {
                // Valid only in call position; bare type application is
                // checked like its underlying expression.
                let _ = args;
                self.infer_expr(inner)
            }

            ExprKind::Lambda(lit) => self.infer_lambda(expr, lit),

            ExprKind::If { cond, then_branch, else_branch } => {
                let cond_ty = self.infer_expr(cond);
                self.unify_at(&cond.token, Ty::bool(), cond_ty);
                let then_ty = self.infer_expr(then_branch);
                match else_branch {
                    Some(else_expr) => {
                        let else_ty = self.infer_expr(else_expr);
                        self.unify_at(&else_expr.token, then_ty.clone(), else_ty);
                        then_ty
                    }
                    None => Ty::nil(),
                }
            }

            ExprKind::For { pat, iter, body } => {
                let iter_ty = self.infer_expr(iter);
                let elem = self.ctx.fresh_var();
                self.unify_at(&iter.token, Ty::list(elem.clone()), iter_ty);

                self.table.push_scope(ScopeKind::Block);
                self.bind_pattern(pat, elem);
                self.loop_depth += 1;
                self.infer_expr(body);
                self.loop_depth -= 1;
                self.table.pop_scope();
                Ty::nil()
            }

            ExprKind::Match { scrutinee, arms } => self.infer_match(expr, scrutinee, arms),

            ExprKind::Block(block) => self.infer_block(block),

            ExprKind::Spread(inner) => {
                // Outside list literals a spread has no meaning.
                self.error(
                    DiagCode::A010,
                    &expr.token,
                    "spread is only allowed inside list literals",
                );
                self.infer_expr(inner)
            }

            ExprKind::Range { start, end } => {
                let start_ty = self.infer_expr(start);
                self.unify_at(&start.token, Ty::int(), start_ty);
                let end_ty = self.infer_expr(end);
                self.unify_at(&end.token, Ty::int(), end_ty);
                Ty::list(Ty::int())
            }
        }
    }

    fn infer_ident(&mut self, expr: &Expr, name: &str) -> Ty {
        match self.table.lookup(name) {
            Some(sym) => {
                self.resolutions.insert(expr.id, sym);
                let symbol = self.table.symbol(sym);
                if symbol.kind == SymbolKind::Module {
                    // Only meaningful as the object of a member access.
                    return Ty::nil();
                }
                match symbol.scheme.clone() {
                    Some(scheme) => {
                        if !scheme.constraints.is_empty() {
                            self.error(
                                DiagCode::A010,
                                &expr.token,
                                format!(
                                    "`{name}` has constraints and can only be used in call position"
                                ),
                            );
                        }
                        let (ty, _) = self.ctx.instantiate(&scheme);
                        ty
                    }
                    None => {
                        // Pending symbol used before its definition.
                        let var = self.ctx.fresh_var();
                        self.table.symbol_mut(sym).scheme =
                            Some(Scheme::mono(var.clone()));
                        var
                    }
                }
            }
            None => {
                // A bare trait-method reference outside call position.
                if self.traits.owner_of_method(name).is_some() {
                    self.error(
                        DiagCode::A010,
                        &expr.token,
                        format!("trait method `{name}` can only be used in call position"),
                    );
                    return self.ctx.fresh_var();
                }
                self.error(
                    DiagCode::A001,
                    &expr.token,
                    format!("unknown identifier `{name}`"),
                );
                self.ctx.fresh_var()
            }
        }
    }

    fn infer_infix(&mut self, expr: &Expr, op: BinOp, lhs: &Expr, rhs: &Expr) -> Ty {
        match op {
            BinOp::Or | BinOp::And => {
                let l = self.infer_expr(lhs);
                self.unify_at(&lhs.token, Ty::bool(), l);
                let r = self.infer_expr(rhs);
                self.unify_at(&rhs.token, Ty::bool(), r);
                Ty::bool()
            }
            // Structural comparison primitives.
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
                let l = self.infer_expr(lhs);
                let r = self.infer_expr(rhs);
                self.unify_at(&expr.token, l, r);
                Ty::bool()
            }
            // Structural concat primitives.
            BinOp::Concat | BinOp::Combine | BinOp::Alt => {
                let l = self.infer_expr(lhs);
                let r = self.infer_expr(rhs);
                self.unify_at(&expr.token, l.clone(), r);
                l
            }
            BinOp::Shr => {
                let l = self.infer_expr(lhs);
                self.unify_at(&lhs.token, Ty::int(), l);
                let r = self.infer_expr(rhs);
                self.unify_at(&rhs.token, Ty::int(), r);
                Ty::int()
            }
            // Arithmetic dispatches through operator traits.
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem | BinOp::Pow => {
                let l = self.infer_expr(lhs);
                let r = self.infer_expr(rhs);
                self.unify_at(&expr.token, l.clone(), r);
                let (trait_name, _) = operator_trait(op.symbol())
                    .expect("arithmetic operators have trait entries");
                self.method_refs.insert(
                    expr.id,
                    MethodRef {
                        trait_name: trait_name.to_string(),
                        method_index: 0,
                        witness_slot: 0,
                    },
                );
                self.push_constraints(
                    expr.id,
                    &expr.token,
                    vec![Constraint {
                        trait_name: trait_name.to_string(),
                        args: vec![l.clone()],
                    }],
                );
                l
            }
            BinOp::Pipe => {
                // `x |> f` is `f(x)`.
                let x = self.infer_expr(lhs);
                let f = self.infer_expr(rhs);
                let ret = self.ctx.fresh_var();
                self.unify_at(&rhs.token, Ty::func(vec![x], ret.clone()), f);
                ret
            }
            BinOp::Apply => {
                let f = self.infer_expr(lhs);
                let x = self.infer_expr(rhs);
                let ret = self.ctx.fresh_var();
                self.unify_at(&lhs.token, Ty::func(vec![x], ret.clone()), f);
                ret
            }
            BinOp::Bind => {
                let m = Ty::Var(self.ctx.fresh_var_kinded(Kind::arrow_chain(1)));
                let a = self.ctx.fresh_var();
                let b = self.ctx.fresh_var();
                let l = self.infer_expr(lhs);
                self.unify_at(
                    &lhs.token,
                    Ty::App(Box::new(m.clone()), vec![a.clone()]),
                    l,
                );
                let r = self.infer_expr(rhs);
                self.unify_at(
                    &rhs.token,
                    Ty::func(vec![a], Ty::App(Box::new(m.clone()), vec![b.clone()])),
                    r,
                );
                self.method_refs.insert(
                    expr.id,
                    MethodRef {
                        trait_name: "Monad".into(),
                        method_index: 0,
                        witness_slot: 0,
                    },
                );
                self.push_constraints(
                    expr.id,
                    &expr.token,
                    vec![Constraint { trait_name: "Monad".into(), args: vec![m.clone()] }],
                );
                Ty::App(Box::new(m), vec![b])
            }
            BinOp::Cons => {
                let elem = self.infer_expr(lhs);
                let list = self.infer_expr(rhs);
                self.unify_at(&rhs.token, Ty::list(elem.clone()), list);
                Ty::list(elem)
            }
            BinOp::Compose => {
                // `f ,, g` is `\x -> f(g(x))`.
                let a = self.ctx.fresh_var();
                let b = self.ctx.fresh_var();
                let c = self.ctx.fresh_var();
                let f = self.infer_expr(lhs);
                self.unify_at(&lhs.token, Ty::func(vec![b.clone()], c.clone()), f);
                let g = self.infer_expr(rhs);
                self.unify_at(&rhs.token, Ty::func(vec![a.clone()], b), g);
                Ty::func(vec![a], c)
            }
        }
    }

    /// Calls: named callees instantiate their scheme here (so dictionary
    /// witnesses attach to the call node); everything else goes through
    /// plain function-type unification.
    fn infer_call(&mut self, expr: &Expr, callee: &Expr, args: &[Expr]) -> Ty {
        // Explicit type application: `f<Int>(x)`.
        if let ExprKind::TypeApp { expr: inner, args: ty_args } = &callee.kind {
            if let ExprKind::Ident(name) = &inner.kind {
                return self.infer_named_call(expr, callee, inner, name, Some(ty_args), args);
            }
        }
        if let ExprKind::Ident(name) = &callee.kind {
            return self.infer_named_call(expr, callee, callee, name, None, args);
        }
        if let ExprKind::Member { obj, name } = &callee.kind {
            if let Some(exports) = self.module_exports_of(obj) {
                if let Some((kind, scheme)) = exports.values.get(name).cloned() {
                    let _ = kind;
                    self.infer_expr(obj);
                    let (ty, constraints) = self.ctx.instantiate(&scheme);
                    self.type_map.insert(callee.id, self.ctx.resolve(ty.clone()));
                    self.push_constraints(expr.id, &expr.token, constraints);
                    return self.check_call_shape(expr, &ty, args);
                }
                let path = self.module_binding_name(obj).unwrap_or_default();
                self.error(
                    DiagCode::A003,
                    &callee.token,
                    format!("`{name}` is not exported by module `{path}`"),
                );
                return self.ctx.fresh_var();
            }
        }

        let callee_ty = self.infer_expr(callee);
        self.check_call_shape(expr, &callee_ty, args)
    }

    fn infer_named_call(
        &mut self,
        call: &Expr,
        callee_node: &Expr,
        ident_node: &Expr,
        name: &str,
        ty_args: Option<&Vec<TypeExpr>>,
        args: &[Expr],
    ) -> Ty {
        // A known symbol wins over a trait method of the same name.
        if let Some(sym) = self.table.lookup(name) {
            self.resolutions.insert(ident_node.id, sym);
            let symbol = self.table.symbol(sym).clone();
            let scheme = match symbol.scheme {
                Some(scheme) => scheme,
                None => {
                    let var = self.ctx.fresh_var();
                    self.table.symbol_mut(sym).scheme = Some(Scheme::mono(var.clone()));
                    Scheme::mono(var)
                }
            };

            let (ty, constraints) = match ty_args {
                Some(ty_args) => self.instantiate_explicit(callee_node, &scheme, ty_args),
                None => self.ctx.instantiate(&scheme),
            };
            self.type_map.insert(callee_node.id, self.ctx.resolve(ty.clone()));
            self.push_constraints(call.id, &call.token, constraints);
            return self.check_call_shape(call, &ty, args);
        }

        // Trait method dispatch.
        if let Some(owner) = self.traits.owner_of_method(name).map(str::to_string) {
            let trait_def = self
                .traits
                .get(&owner)
                .expect("method owner is registered")
                .clone();
            let sig = trait_def
                .methods
                .iter()
                .find(|m| m.name == name)
                .expect("owner_of_method implies the method exists")
                .clone();

            let (ty, constraints) = self.ctx.instantiate(&sig.scheme);
            self.method_refs.insert(
                call.id,
                MethodRef {
                    trait_name: owner,
                    method_index: sig.offset,
                    witness_slot: 0,
                },
            );
            self.type_map.insert(callee_node.id, self.ctx.resolve(ty.clone()));
            self.push_constraints(call.id, &call.token, constraints);
            return self.check_call_shape(call, &ty, args);
        }

        self.error(
            DiagCode::A001,
            &ident_node.token,
            format!("unknown identifier `{name}`"),
        );
        for arg in args {
            self.infer_expr(arg);
        }
        self.ctx.fresh_var()
    }

    /// Instantiate a scheme with explicit type arguments: the leading
    /// quantified variables take the written types positionally, the rest
    /// become fresh variables.
    fn instantiate_explicit(
        &mut self,
        callee: &Expr,
        scheme: &Scheme,
        ty_args: &[TypeExpr],
    ) -> (Ty, Vec<Constraint>) {
        if ty_args.len() > scheme.vars.len() {
            self.error(
                DiagCode::A009,
                &callee.token,
                format!(
                    "too many type arguments: expected at most {}, found {}",
                    scheme.vars.len(),
                    ty_args.len()
                ),
            );
        }

        let mut env = self.tyvar_env.clone();
        let mut rigids: FxHashMap<String, Ty> = FxHashMap::default();
        for (i, (name, kind)) in scheme.vars.iter().enumerate() {
            let ty = match ty_args.get(i) {
                Some(te) => {
                    let written = self.convert_type_in(te, &mut env, false);
                    if let Some(got) = self.kind_of_ty(&written) {
                        if &got != kind {
                            self.error(
                                DiagCode::A006,
                                &te.token,
                                format!("type argument has kind `{got}`, expected `{kind}`"),
                            );
                        }
                    }
                    written
                }
                None => Ty::Var(self.ctx.fresh_var_kinded(kind.clone())),
            };
            rigids.insert(name.clone(), ty);
        }
        let rows: FxHashMap<TyVar, TyVar> = scheme
            .row_vars
            .iter()
            .map(|v| (*v, self.ctx.fresh_row()))
            .collect();

        let ty = crate::unify::subst_scheme(&scheme.ty, &rigids, &rows);
        let constraints = scheme
            .constraints
            .iter()
            .map(|c| Constraint {
                trait_name: c.trait_name.clone(),
                args: c
                    .args
                    .iter()
                    .map(|a| crate::unify::subst_scheme(a, &rigids, &rows))
                    .collect(),
            })
            .collect();
        (ty, constraints)
    }

    /// Unify a callee type with its arguments, honoring defaults and
    /// variadics, and produce the result type.
    fn check_call_shape(&mut self, call: &Expr, callee_ty: &Ty, args: &[Expr]) -> Ty {
        let resolved = self.ctx.resolve(callee_ty.clone());
        match resolved {
            Ty::Func { params, ret, variadic, default_count } => {
                let fixed = if variadic { params.len() - 1 } else { params.len() };
                let min = fixed.saturating_sub(default_count);
                let max_ok = variadic || args.len() <= params.len();
                if args.len() < min || !max_ok {
                    self.error(
                        DiagCode::A009,
                        &call.token,
                        format!(
                            "wrong number of arguments: expected {}{}, found {}",
                            min,
                            if variadic { "+" } else { "" },
                            args.len()
                        ),
                    );
                }
                for (i, arg) in args.iter().enumerate() {
                    let arg_ty = self.infer_expr(arg);
                    if i < fixed {
                        if let Some(param) = params.get(i) {
                            self.unify_at(&arg.token, param.clone(), arg_ty);
                        }
                    } else if variadic {
                        // Extra arguments unify with the element type of
                        // the trailing list parameter.
                        if let Some(last) = params.last() {
                            let elem = match self.ctx.resolve(last.clone()) {
                                Ty::App(head, mut app_args)
                                    if matches!(head.as_ref(), Ty::Con(n) if n == "List")
                                        && app_args.len() == 1 =>
                                {
                                    app_args.pop().unwrap()
                                }
                                other => other,
                            };
                            self.unify_at(&arg.token, elem, arg_ty);
                        }
                    } else if let Some(param) = params.get(i) {
                        self.unify_at(&arg.token, param.clone(), arg_ty);
                    }
                }
                (*ret).clone()
            }
            other => {
                let arg_tys: Vec<Ty> = args.iter().map(|a| self.infer_expr(a)).collect();
                let ret = self.ctx.fresh_var();
                self.unify_at(&call.token, Ty::func(arg_tys, ret.clone()), other);
                ret
            }
        }
    }

    /// Member access: module-qualified name or record field.
    fn infer_member(&mut self, expr: &Expr, obj: &Expr, name: &str) -> Ty {
        if let Some(exports) = self.module_exports_of(obj) {
            if let Some((_, scheme)) = exports.values.get(name).cloned() {
                self.infer_expr(obj);
                if !scheme.constraints.is_empty() {
                    self.error(
                        DiagCode::A010,
                        &expr.token,
                        format!("`{name}` has constraints and can only be used in call position"),
                    );
                }
                let (ty, _) = self.ctx.instantiate(&scheme);
                return ty;
            }
            self.infer_expr(obj);
            let path = self.module_binding_name(obj).unwrap_or_default();
            self.error(
                DiagCode::A003,
                &expr.token,
                format!("`{name}` is not exported by module `{path}`"),
            );
            return self.ctx.fresh_var();
        }

        let obj_ty = self.infer_expr(obj);
        let field = self.ctx.fresh_var();
        let row = self.ctx.fresh_row();
        let mut fields = std::collections::BTreeMap::new();
        fields.insert(name.to_string(), field.clone());
        self.unify_at(&expr.token, Ty::Record { fields, row: Some(row) }, obj_ty);
        field
    }

    /// When `obj` names an imported module binding, its exports.
    fn module_exports_of(&self, obj: &Expr) -> Option<ModuleExports> {
        let name = self.module_binding_name(obj)?;
        self.imports.modules.get(&name).cloned()
    }

    fn module_binding_name(&self, obj: &Expr) -> Option<String> {
        let ExprKind::Ident(name) = &obj.kind else { return None };
        let sym = self.table.lookup(name)?;
        let symbol = self.table.symbol(sym);
        if symbol.kind == SymbolKind::Module {
            Some(symbol.origin_module.clone())
        } else {
            None
        }
    }

    fn infer_lambda(&mut self, expr: &Expr, lit: &FunctionLit) -> Ty {
        self.table.push_scope(ScopeKind::Function);
        let mut param_tys = Vec::new();
        for param in &lit.params {
            let ty = match &param.ty {
                Some(te) => {
                    let mut env = self.tyvar_env.clone();
                    self.convert_type_in(te, &mut env, false)
                }
                None => self.ctx.fresh_var(),
            };
            self.table.define(
                Symbol::new(param.name.clone(), SymbolKind::Value)
                    .with_scheme(Scheme::mono(ty.clone()))
                    .with_node(param.id),
            );
            param_tys.push(ty);
        }

        let ret = match &lit.ret {
            Some(te) => {
                let mut env = self.tyvar_env.clone();
                self.convert_type_in(te, &mut env, false)
            }
            None => self.ctx.fresh_var(),
        };
        self.ret_stack.push(ret.clone());
        let body_ty = self.infer_expr(&lit.body);
        self.unify_at(&expr.token, ret.clone(), body_ty);
        self.ret_stack.pop();
        self.table.pop_scope();

        Ty::func(param_tys, ret)
    }

    fn infer_match(&mut self, expr: &Expr, scrutinee: &Expr, arms: &[MatchArm]) -> Ty {
        let scrut_ty = self.infer_expr(scrutinee);
        let result = self.ctx.fresh_var();

        for arm in arms {
            self.table.push_scope(ScopeKind::Block);
            self.bind_pattern(&arm.pat, scrut_ty.clone());
            if let Some(guard) = &arm.guard {
                let guard_ty = self.infer_expr(guard);
                self.unify_at(&guard.token, Ty::bool(), guard_ty);
            }
            let body_ty = self.infer_expr(&arm.body);
            self.unify_at(&arm.body.token, result.clone(), body_ty);
            self.table.pop_scope();
        }

        // Exhaustiveness / redundancy over the resolved scrutinee type.
        let resolved = self.ctx.resolve(scrut_ty);
        let (coverage, redundant) = check_match(arms, &resolved, &self.types_reg);
        if let Coverage::Missing(missing) = coverage {
            let message = format!(
                "match on `{resolved}` is not exhaustive; missing: {}",
                missing.join(", ")
            );
            match self.options.exhaustiveness {
                Severity::Error => self.error(DiagCode::A010, &expr.token, message),
                Severity::Warning => self.warn(DiagCode::A010, &expr.token, message),
            }
        }
        for idx in redundant {
            let token = arms[idx].pat.token.clone();
            self.warn(DiagCode::A010, &token, "unreachable match arm");
        }

        result
    }

    fn infer_block(&mut self, block: &Block) -> Ty {
        self.table.push_scope(ScopeKind::Block);
        let mut last = Ty::nil();
        for (i, stmt) in block.stmts.iter().enumerate() {
            last = self.infer_stmt(stmt);
            if i + 1 < block.stmts.len() {
                last = Ty::nil();
            }
        }
        self.table.pop_scope();
        last
    }

    fn infer_stmt(&mut self, stmt: &Stmt) -> Ty {
        match &stmt.kind {
            StmtKind::Expr(e) => self.infer_expr(e),
            StmtKind::Const { name, ty, value } => {
                self.ctx.enter_level();
                let value_ty = self.infer_expr(value);
                self.ctx.leave_level();

                let final_ty = if let Some(te) = ty {
                    let mut env = self.tyvar_env.clone();
                    let declared = self.convert_type_in(te, &mut env, false);
                    self.unify_at(&stmt.token, declared.clone(), value_ty);
                    declared
                } else {
                    value_ty
                };

                let scheme = if matches!(value.kind, ExprKind::Lambda(_)) {
                    self.ctx.generalize(final_ty, Vec::new())
                } else {
                    Scheme::mono(self.ctx.resolve(final_ty))
                };
                self.table.define(
                    Symbol::new(name.clone(), SymbolKind::Constant)
                        .with_scheme(scheme)
                        .with_node(stmt.id),
                );
                Ty::nil()
            }
            StmtKind::ConstPattern { pat, value } => {
                let value_ty = self.infer_expr(value);
                self.bind_pattern(pat, value_ty);
                Ty::nil()
            }
            StmtKind::Function(decl) => {
                // A local function: infer and bind in the block scope.
                let scheme = self.infer_unannotated_function(decl);
                self.table.define(
                    Symbol::new(decl.name.clone(), SymbolKind::Function)
                        .with_scheme(scheme)
                        .with_node(decl.id),
                );
                Ty::nil()
            }
            StmtKind::Trait(_) | StmtKind::Instance(_) | StmtKind::TypeDecl(_) => {
                self.error(
                    DiagCode::A010,
                    &stmt.token,
                    "declarations are only allowed at the top level",
                );
                Ty::nil()
            }
            StmtKind::Directive { args, .. } => {
                for arg in args {
                    self.infer_expr(arg);
                }
                Ty::nil()
            }
            StmtKind::Break | StmtKind::Continue => {
                if self.loop_depth == 0 {
                    self.error(
                        DiagCode::A010,
                        &stmt.token,
                        "`break`/`continue` outside of a loop",
                    );
                }
                Ty::nil()
            }
            StmtKind::Return(value) => {
                let value_ty = match value {
                    Some(e) => self.infer_expr(e),
                    None => Ty::nil(),
                };
                match self.ret_stack.last().cloned() {
                    Some(expected) => {
                        self.unify_at(&stmt.token, expected, value_ty);
                    }
                    None => {
                        self.error(
                            DiagCode::A010,
                            &stmt.token,
                            "`return` outside of a function",
                        );
                    }
                }
                Ty::nil()
            }
        }
    }

    // ── Patterns ───────────────────────────────────────────────────────

    /// Infer a pattern against an expected type, defining its bindings in
    /// the current scope.
    fn bind_pattern(&mut self, pat: &Pattern, expected: Ty) {
        for (name, ty) in self.infer_pattern_collect(pat, expected) {
            self.table.define(
                Symbol::new(name, SymbolKind::Value)
                    .with_scheme(Scheme::mono(ty))
                    .with_node(pat.id),
            );
        }
    }

    /// Infer a pattern, returning the bindings it produces.
    fn infer_pattern_collect(&mut self, pat: &Pattern, expected: Ty) -> Vec<(String, Ty)> {
        let mut bindings = Vec::new();
        self.infer_pattern_inner(pat, expected, &mut bindings);
        bindings
    }

    fn infer_pattern_inner(
        &mut self,
        pat: &Pattern,
        expected: Ty,
        bindings: &mut Vec<(String, Ty)>,
    ) {
        self.type_map.insert(pat.id, self.ctx.resolve(expected.clone()));
        match &pat.kind {
            PatKind::Wildcard => {}
            PatKind::Ident(name) => bindings.push((name.clone(), expected)),
            PatKind::Typed { name, ty } => {
                let mut env = self.tyvar_env.clone();
                let declared = self.convert_type_in(ty, &mut env, false);
                self.unify_at(&pat.token, declared.clone(), expected);
                bindings.push((name.clone(), declared));
            }
            PatKind::Literal(lit) => {
                let lit_ty = match lit {
                    PatLit::Int(_) => Ty::int(),
                    PatLit::BigInt(_) => Ty::big_int(),
                    PatLit::Float(_) => Ty::float(),
                    PatLit::Bool(_) => Ty::bool(),
                    PatLit::Char(_) => Ty::char(),
                    PatLit::Str(_) => Ty::string(),
                    PatLit::Nil => Ty::nil(),
                };
                self.unify_at(&pat.token, expected, lit_ty);
            }
            PatKind::Ctor { name, args } => {
                let Some(sym) = self.table.lookup(name) else {
                    self.error(
                        DiagCode::A001,
                        &pat.token,
                        format!("unknown constructor `{name}`"),
                    );
                    for arg in args {
                        let var = self.ctx.fresh_var();
                        self.infer_pattern_inner(arg, var, bindings);
                    }
                    return;
                };
                let symbol = self.table.symbol(sym).clone();
                if symbol.kind != SymbolKind::Constructor {
                    self.error(
                        DiagCode::A001,
                        &pat.token,
                        format!("`{name}` is not a constructor"),
                    );
                    return;
                }
                let Some(scheme) = symbol.scheme else { return };
                let (ctor_ty, _) = self.ctx.instantiate(&scheme);
                match ctor_ty {
                    Ty::Func { params, ret, .. } => {
                        if params.len() != args.len() {
                            self.error(
                                DiagCode::A009,
                                &pat.token,
                                format!(
                                    "constructor `{name}` takes {} argument(s), pattern has {}",
                                    params.len(),
                                    args.len()
                                ),
                            );
                        }
                        self.unify_at(&pat.token, expected, *ret);
                        for (arg, field_ty) in args.iter().zip(params) {
                            self.infer_pattern_inner(arg, field_ty, bindings);
                        }
                    }
                    value_ty => {
                        if !args.is_empty() {
                            self.error(
                                DiagCode::A009,
                                &pat.token,
                                format!("constructor `{name}` takes no arguments"),
                            );
                        }
                        self.unify_at(&pat.token, expected, value_ty);
                    }
                }
            }
            PatKind::Tuple(items) => {
                let vars: Vec<Ty> = items.iter().map(|_| self.ctx.fresh_var()).collect();
                self.unify_at(&pat.token, expected, Ty::Tuple(vars.clone()));
                for (item, var) in items.iter().zip(vars) {
                    self.infer_pattern_inner(item, var, bindings);
                }
            }
            PatKind::List { elements, rest } => {
                let elem = self.ctx.fresh_var();
                self.unify_at(&pat.token, expected, Ty::list(elem.clone()));
                for item in elements {
                    self.infer_pattern_inner(item, elem.clone(), bindings);
                }
                if let Some(rest) = rest {
                    self.infer_pattern_inner(rest, Ty::list(elem), bindings);
                }
            }
            PatKind::Record { fields, open } => {
                let _ = open;
                let mut field_tys = std::collections::BTreeMap::new();
                let mut subs = Vec::new();
                for (name, sub) in fields {
                    let var = self.ctx.fresh_var();
                    field_tys.insert(name.clone(), var.clone());
                    subs.push((name.clone(), sub, var));
                }
                let row = self.ctx.fresh_row();
                self.unify_at(
                    &pat.token,
                    Ty::Record { fields: field_tys, row: Some(row) },
                    expected,
                );
                for (name, sub, var) in subs {
                    match sub {
                        Some(p) => self.infer_pattern_inner(p, var, bindings),
                        None => bindings.push((name, var)),
                    }
                }
            }
            PatKind::Str(parts) => {
                self.unify_at(&pat.token, expected, Ty::string());
                for part in parts {
                    if let funxy_parser::ast::StrPatPart::Capture(name) = part {
                        bindings.push((name.clone(), Ty::string()));
                    }
                }
            }
            PatKind::Pin(name) => match self.table.lookup(name) {
                Some(sym) => {
                    self.resolutions.insert(pat.id, sym);
                    if let Some(scheme) = self.table.symbol(sym).scheme.clone() {
                        let (ty, _) = self.ctx.instantiate(&scheme);
                        self.unify_at(&pat.token, expected, ty);
                    }
                }
                None => {
                    self.error(
                        DiagCode::A001,
                        &pat.token,
                        format!("unknown identifier `{name}` in pin pattern"),
                    );
                }
            },
        }
    }

    // ── Type conversion ────────────────────────────────────────────────

    fn convert_kind_opt(&mut self, kind: &Option<KindExpr>) -> Kind {
        match kind {
            Some(k) => convert_kind(k),
            None => Kind::Star,
        }
    }

    /// Convert a surface type into a `Ty`.
    ///
    /// `env` maps type-variable names in scope; with `auto_bind`, unknown
    /// lowercase names are added as fresh rigids (implicit quantification
    /// in signatures), otherwise they become unification variables.
    fn convert_type_in(
        &mut self,
        te: &TypeExpr,
        env: &mut FxHashMap<String, Ty>,
        auto_bind: bool,
    ) -> Ty {
        self.convert_type_depth(te, env, auto_bind, 0)
    }

    fn convert_type_depth(
        &mut self,
        te: &TypeExpr,
        env: &mut FxHashMap<String, Ty>,
        auto_bind: bool,
        depth: u32,
    ) -> Ty {
        if depth > MAX_EXPANSION_DEPTH {
            self.error(
                DiagCode::A010,
                &te.token,
                "type alias expansion is too deep (recursive alias?)",
            );
            return Ty::nil();
        }
        match &te.kind {
            TypeExprKind::Named { name, args } => {
                let is_var = name
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_lowercase() || c == '_');
                if is_var {
                    let base = match env.get(name) {
                        Some(ty) => ty.clone(),
                        None => {
                            let ty = if auto_bind {
                                let kind = Kind::arrow_chain(args.len());
                                Ty::Rigid(name.clone(), kind)
                            } else {
                                let kind = Kind::arrow_chain(args.len());
                                Ty::Var(self.ctx.fresh_var_kinded(kind))
                            };
                            env.insert(name.clone(), ty.clone());
                            ty
                        }
                    };
                    if args.is_empty() {
                        return base;
                    }
                    let converted: Vec<Ty> = args
                        .iter()
                        .map(|a| self.convert_type_depth(a, env, auto_bind, depth + 1))
                        .collect();
                    // Kind check on the variable's arity.
                    let base_kind = match &base {
                        Ty::Rigid(_, k) => k.clone(),
                        Ty::Var(v) => self.ctx.kind_of_var(*v),
                        _ => Kind::Star,
                    };
                    if base_kind.arity() < args.len() {
                        self.error(
                            DiagCode::A006,
                            &te.token,
                            format!(
                                "type variable `{name}` of kind `{base_kind}` applied to {} argument(s)",
                                args.len()
                            ),
                        );
                    }
                    return Ty::App(Box::new(base), converted);
                }

                // Alias expansion.
                if let Some(alias) = self.types_reg.alias(name).cloned() {
                    if args.len() != alias.params.len() {
                        self.error(
                            DiagCode::A006,
                            &te.token,
                            format!(
                                "alias `{name}` takes {} argument(s), found {}",
                                alias.params.len(),
                                args.len()
                            ),
                        );
                        return Ty::nil();
                    }
                    let converted: Vec<Ty> = args
                        .iter()
                        .map(|a| self.convert_type_depth(a, env, auto_bind, depth + 1))
                        .collect();
                    let rigids: FxHashMap<String, Ty> = alias
                        .params
                        .iter()
                        .map(|(n, _)| n.clone())
                        .zip(converted)
                        .collect();
                    return crate::unify::subst_scheme(
                        &alias.body,
                        &rigids,
                        &FxHashMap::default(),
                    );
                }

                let Some(kind) = self.types_reg.kind_of(name).cloned() else {
                    self.error(
                        DiagCode::A001,
                        &te.token,
                        format!("unknown type `{name}`"),
                    );
                    return Ty::nil();
                };
                if kind.arity() != args.len() {
                    self.error(
                        DiagCode::A006,
                        &te.token,
                        format!(
                            "type `{name}` has kind `{kind}` but is applied to {} argument(s)",
                            args.len()
                        ),
                    );
                }
                if args.is_empty() {
                    Ty::Con(name.clone())
                } else {
                    let converted: Vec<Ty> = args
                        .iter()
                        .map(|a| self.convert_type_depth(a, env, auto_bind, depth + 1))
                        .collect();
                    // Argument kinds must match the constructor's parameters.
                    let mut expect = &kind;
                    for (arg, ast_arg) in converted.iter().zip(args) {
                        if let (Some(want), Some(got)) =
                            (expect.param(), self.kind_of_ty(arg))
                        {
                            if want != &got {
                                self.error(
                                    DiagCode::A006,
                                    &ast_arg.token,
                                    format!("expected kind `{want}`, found `{got}`"),
                                );
                            }
                        }
                        if let Some(rest) = expect.applied() {
                            expect = rest;
                        }
                    }
                    Ty::App(Box::new(Ty::Con(name.clone())), converted)
                }
            }
            TypeExprKind::Tuple(items) => Ty::Tuple(
                items
                    .iter()
                    .map(|t| self.convert_type_depth(t, env, auto_bind, depth + 1))
                    .collect(),
            ),
            TypeExprKind::Record { fields, row } => {
                let converted: std::collections::BTreeMap<String, Ty> = fields
                    .iter()
                    .map(|(n, t)| {
                        let ty = self.convert_type_depth(t, env, auto_bind, depth + 1);
                        (n.clone(), ty)
                    })
                    .collect();
                let row = row.as_ref().map(|name| match env.get(name) {
                    Some(Ty::Var(v)) => *v,
                    _ => {
                        let v = self.ctx.fresh_row();
                        env.insert(name.clone(), Ty::Var(v));
                        v
                    }
                });
                Ty::Record { fields: converted, row }
            }
            TypeExprKind::Func { params, ret } => Ty::Func {
                params: params
                    .iter()
                    .map(|p| self.convert_type_depth(p, env, auto_bind, depth + 1))
                    .collect(),
                ret: Box::new(self.convert_type_depth(ret, env, auto_bind, depth + 1)),
                variadic: false,
                default_count: 0,
            },
            TypeExprKind::Union(members) => Ty::Union(
                members
                    .iter()
                    .map(|m| self.convert_type_depth(m, env, auto_bind, depth + 1))
                    .collect(),
            ),
            TypeExprKind::Forall { vars, constraints, body } => {
                // Inline foralls contribute their variables to the
                // enclosing signature scope.
                for var in vars {
                    let kind = self.convert_kind_opt(&var.kind);
                    env.entry(var.name.clone())
                        .or_insert_with(|| Ty::Rigid(var.name.clone(), kind));
                }
                let _ = constraints;
                self.convert_type_depth(body, env, auto_bind, depth + 1)
            }
        }
    }

    /// Compute the kind of a converted type when determinable.
    fn kind_of_ty(&self, ty: &Ty) -> Option<Kind> {
        match ty {
            Ty::Con(name) => self.types_reg.kind_of(name).cloned(),
            Ty::Rigid(_, kind) => Some(kind.clone()),
            Ty::Var(v) => Some(self.ctx.kind_of_var(*v)),
            Ty::App(head, args) => {
                let mut kind = self.kind_of_ty(head)?;
                for _ in args {
                    kind = kind.applied()?.clone();
                }
                Some(kind)
            }
            Ty::Func { .. } | Ty::Record { .. } | Ty::Tuple(_) | Ty::Union(_) => {
                Some(Kind::Star)
            }
        }
    }

    // ── Tail calls ─────────────────────────────────────────────────────

    /// Mark calls in tail position. Dictionary-dispatched calls are never
    /// marked (the conservative choice).
    fn mark_tail_positions(&mut self, body: &Expr) {
        self.mark_tail_expr(body);
    }

    fn mark_tail_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Call { .. } => {
                if !self.method_refs.contains_key(&expr.id) {
                    self.tail_calls.insert(expr.id);
                }
            }
            ExprKind::If { then_branch, else_branch, .. } => {
                self.mark_tail_expr(then_branch);
                if let Some(else_branch) = else_branch {
                    self.mark_tail_expr(else_branch);
                }
            }
            ExprKind::Match { arms, .. } => {
                for arm in arms {
                    self.mark_tail_expr(&arm.body);
                }
            }
            ExprKind::Block(block) => {
                if let Some(last) = block.stmts.last() {
                    match &last.kind {
                        StmtKind::Expr(e) => self.mark_tail_expr(e),
                        StmtKind::Return(Some(e)) => self.mark_tail_expr(e),
                        _ => {}
                    }
                }
                // Early returns anywhere in the block are tail positions.
                for stmt in &block.stmts[..block.stmts.len().saturating_sub(1)] {
                    self.mark_return_tails_stmt(stmt);
                }
            }
            _ => {}
        }
    }

    fn mark_return_tails_stmt(&mut self, stmt: &Stmt) {
        if let StmtKind::Return(Some(e)) = &stmt.kind {
            self.mark_tail_expr(e);
        }
    }

    // ── Finalization ───────────────────────────────────────────────────

    fn finalize_witnesses(&mut self) -> FxHashMap<NodeId, Vec<WitnessSource>> {
        let mut out = FxHashMap::default();
        let witnesses = std::mem::take(&mut self.witnesses);
        let had_errors = self.diags.has_errors();
        for (node, slots) in witnesses {
            let mut resolved = Vec::with_capacity(slots.len());
            let mut complete = true;
            for slot in slots {
                match slot {
                    Some(ws) => resolved.push(ws),
                    None => complete = false,
                }
            }
            if complete {
                out.insert(node, resolved);
            } else if !had_errors {
                // A hole without a prior diagnostic is an internal fault,
                // reported instead of crashing later stages.
                self.diags.push(Diagnostic::error(
                    DiagCode::A010,
                    self.file.clone(),
                    funxy_common::Span::point(0),
                    1,
                    1,
                    "internal: unresolved dictionary witness",
                ));
            }
        }
        out
    }

    fn compute_exports(&mut self) -> ModuleExports {
        let mut exports = ModuleExports::default();

        let names: Vec<(String, SymbolId)> = self
            .table
            .module_scope_names()
            .map(|(n, id)| (n.clone(), id))
            .collect();
        for (name, id) in names {
            let symbol = self.table.symbol(id);
            if symbol.def_node.is_none() {
                continue; // builtin or import
            }
            if let Some(scheme) = &symbol.scheme {
                exports
                    .values
                    .insert(name, (symbol.kind, scheme.clone()));
            }
        }

        for name in &self.own_types {
            if let Some(adt) = self.types_reg.adt(name) {
                exports.adts.push(adt.clone());
            }
            if let Some(alias) = self.types_reg.alias(name) {
                exports.aliases.push(alias.clone());
            }
        }
        for name in &self.own_traits {
            if let Some(def) = self.traits.get(name) {
                exports.traits.push(def.clone());
                for method in &def.methods {
                    if let Some(node) =
                        self.trait_defaults.get(&(name.clone(), method.name.clone()))
                    {
                        exports
                            .trait_defaults
                            .push(((name.clone(), method.name.clone()), *node));
                    }
                }
            }
        }
        for id in &self.own_instances {
            exports.instances.push(self.instances.get(*id).clone());
        }

        exports
    }
}

enum ConstraintOutcome {
    Resolved(WitnessSource),
    Failed,
    Deferred,
}

fn convert_kind(kind: &KindExpr) -> Kind {
    match kind {
        KindExpr::Star => Kind::Star,
        KindExpr::Arrow(a, b) => {
            Kind::Arrow(Box::new(convert_kind(a)), Box::new(convert_kind(b)))
        }
    }
}

/// The last `/`-separated segment of an import path.
pub fn last_segment(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

/// Append the names of rigid variables in `ty` to `out`, in order of
/// first appearance.
fn collect_rigid_names(ty: &Ty, out: &mut Vec<String>) {
    match ty {
        Ty::Rigid(name, _) => {
            if !out.contains(name) {
                out.push(name.clone());
            }
        }
        Ty::Var(_) | Ty::Con(_) => {}
        Ty::App(head, args) => {
            collect_rigid_names(head, out);
            for a in args {
                collect_rigid_names(a, out);
            }
        }
        Ty::Func { params, ret, .. } => {
            for p in params {
                collect_rigid_names(p, out);
            }
            collect_rigid_names(ret, out);
        }
        Ty::Record { fields, .. } => {
            for t in fields.values() {
                collect_rigid_names(t, out);
            }
        }
        Ty::Tuple(items) | Ty::Union(items) => {
            for t in items {
                collect_rigid_names(t, out);
            }
        }
    }
}
