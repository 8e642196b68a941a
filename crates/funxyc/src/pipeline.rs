//! The compilation and execution pipeline.
//!
//! Lexing/parsing happen inside the loader; this module drives per-module
//! analysis in dependency order, feeds each module the exports of its
//! dependencies, and runs the result on either backend:
//!
//! - [`evaluate_module`] -- the tree-walk backend
//! - [`compile_source`] -> [`run_bundle`] -- the bytecode backend
//!
//! Stages are skipped once a previous stage reports fatal diagnostics.

use std::path::Path;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use funxy_common::{Diagnostic, Severity};
use funxy_loader::virtualmod::{standard_registry, VirtualRegistry};
use funxy_loader::{load_program, LoadError, LoadedProgram, ModuleId};
use funxy_parser::ast::Program;
use funxy_typeck::infer::{analyze_with_imports, Analysis, ImportContext, ModuleExports};
use funxy_typeck::{AnalyzerOptions, SymbolKind};
use funxy_codegen::{compile_module, compile_trait_defaults, Bundle, BundledModule};
use funxy_runtime::eval::{Env, Evaluator, ExecPlan};
use funxy_runtime::value::{ErrorValue, Value};
use funxy_runtime::vm::Vm;

/// Which execution backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Tree,
    Vm,
}

/// Pipeline failures visible to the CLI.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Load(#[from] LoadError),
    /// Diagnostics were produced; the caller renders them.
    #[error("{} error(s)", .0.iter().filter(|d| d.severity == Severity::Error).count())]
    Diagnostics(Vec<Diagnostic>),
    #[error("runtime error: [{}] {}", .0.code, .0.message)]
    Runtime(ErrorValue),
    #[error(transparent)]
    Decode(#[from] funxy_codegen::DecodeError),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Everything known about a fully analyzed program.
pub struct AnalyzedProgram {
    pub loaded: LoadedProgram,
    /// Per-module analysis, indexed like `loaded.modules`; virtual
    /// modules and package groups have none.
    pub analyses: Vec<Option<Analysis>>,
    pub diagnostics: Vec<Diagnostic>,
    pub registry: VirtualRegistry,
}

impl AnalyzedProgram {
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }
}

/// Load, parse, and analyze a program with the standard virtual modules.
pub fn analyze_program(path: &Path) -> Result<AnalyzedProgram, PipelineError> {
    analyze_program_with(path, AnalyzerOptions::default())
}

pub fn analyze_program_with(
    path: &Path,
    options: AnalyzerOptions,
) -> Result<AnalyzedProgram, PipelineError> {
    let registry = standard_registry();
    let loaded = load_program(path, &registry)?;

    let mut diagnostics: Vec<Diagnostic> =
        loaded.diagnostics.diagnostics().to_vec();
    let mut analyses: Vec<Option<Analysis>> = Vec::new();
    analyses.resize_with(loaded.modules.len(), || None);

    let mut exports: FxHashMap<ModuleId, ModuleExports> = FxHashMap::default();

    for &id in &loaded.order {
        let module = loaded.module(id);

        if module.is_virtual {
            exports.insert(id, virtual_exports(&registry, &module.name));
            continue;
        }
        if module.is_package_group {
            let (group, mut group_diags) =
                group_exports(&loaded, &exports, module.sub_modules.as_slice());
            diagnostics.append(&mut group_diags);
            exports.insert(id, group);
            continue;
        }

        let ctx = build_import_context(&loaded, id, &exports);
        let files: Vec<&Program> = module.files.iter().collect();
        let analysis = analyze_with_imports(&files, &ctx, options.clone());
        diagnostics.extend(analysis.diagnostics.diagnostics().iter().cloned());
        exports.insert(id, analysis.exports.clone());
        analyses[id.0 as usize] = Some(analysis);
    }

    Ok(AnalyzedProgram { loaded, analyses, diagnostics, registry })
}

/// The exports of a virtual module, typed from the registry.
fn virtual_exports(registry: &VirtualRegistry, path: &str) -> ModuleExports {
    let mut exports = ModuleExports::default();
    if let Some(module) = registry.get(path) {
        for entry in &module.entries {
            exports.values.insert(
                entry.name.clone(),
                (SymbolKind::Function, entry.scheme.clone()),
            );
        }
    }
    exports
}

/// A package group's exports: the union of its children, duplicates
/// rejected.
fn group_exports(
    loaded: &LoadedProgram,
    exports: &FxHashMap<ModuleId, ModuleExports>,
    children: &[ModuleId],
) -> (ModuleExports, Vec<Diagnostic>) {
    let mut union = ModuleExports::default();
    let mut diags = Vec::new();
    for &child in children {
        let Some(child_exports) = exports.get(&child) else { continue };
        for (name, entry) in &child_exports.values {
            if union.values.contains_key(name) {
                let module = loaded.module(child);
                diags.push(Diagnostic::error(
                    funxy_common::DiagCode::A003,
                    module.path.display().to_string(),
                    funxy_common::Span::point(0),
                    1,
                    1,
                    format!("package group re-exports `{name}` from two sub-modules"),
                ));
                continue;
            }
            union.values.insert(name.clone(), entry.clone());
        }
        union.adts.extend(child_exports.adts.iter().cloned());
        union.aliases.extend(child_exports.aliases.iter().cloned());
        union.traits.extend(child_exports.traits.iter().cloned());
        union
            .instances
            .extend(child_exports.instances.iter().cloned());
        union
            .trait_defaults
            .extend(child_exports.trait_defaults.iter().cloned());
    }
    (union, diags)
}

/// Assemble the analyzer's import context for one module.
fn build_import_context(
    loaded: &LoadedProgram,
    id: ModuleId,
    exports: &FxHashMap<ModuleId, ModuleExports>,
) -> ImportContext {
    let module = loaded.module(id);
    let mut ctx = ImportContext::default();

    for import in &module.imports {
        let Some(target_exports) = exports.get(&import.target) else { continue };
        let binding = import
            .decl
            .alias
            .clone()
            .unwrap_or_else(|| funxy_typeck::infer::last_segment(&import.decl.path));

        ctx.modules.insert(binding, target_exports.clone());

        // Globally visible declarations.
        ctx.adts.extend(target_exports.adts.iter().cloned());
        ctx.aliases.extend(target_exports.aliases.iter().cloned());
        ctx.traits.extend(target_exports.traits.iter().cloned());
        ctx.instances
            .extend(target_exports.instances.iter().cloned());
        ctx.trait_defaults
            .extend(target_exports.trait_defaults.iter().cloned());

        // Direct symbol injection.
        let inject = |ctx: &mut ImportContext, name: &String| {
            if let Some((kind, scheme)) = target_exports.values.get(name) {
                ctx.values.push((name.clone(), *kind, scheme.clone()));
            }
        };
        if import.decl.import_all {
            for name in target_exports.values.keys() {
                if !import.decl.exclude.contains(name) {
                    inject(&mut ctx, name);
                }
            }
        } else {
            for name in &import.decl.symbols {
                inject(&mut ctx, name);
            }
        }
    }

    ctx
}

// ── Tree-walk backend ──────────────────────────────────────────────────

/// Evaluate a program with the tree-walk backend, returning the entry
/// module's final value.
pub fn evaluate_module(path: &Path) -> Result<Value, PipelineError> {
    let analyzed = analyze_program(path)?;
    if analyzed.has_errors() {
        return Err(PipelineError::Diagnostics(analyzed.diagnostics));
    }
    evaluate_analyzed(&analyzed)
}

pub fn evaluate_analyzed(analyzed: &AnalyzedProgram) -> Result<Value, PipelineError> {
    let loaded = &analyzed.loaded;

    // One evaluator walks every module: node ids are program-global, so
    // the merged plan lets closures cross module boundaries.
    let mut plan = ExecPlan::new();
    for analysis in analyzed.analyses.iter().flatten() {
        plan.add_analysis(analysis);
    }
    let mut evaluator = Evaluator::new(plan);

    let mut module_envs: FxHashMap<ModuleId, Rc<Env>> = FxHashMap::default();
    let mut last = Value::Nil;

    for &id in &loaded.order {
        let module = loaded.module(id);

        if module.is_virtual {
            let env = Env::root();
            if let Some(virtual_module) = analyzed.registry.get(&module.name) {
                for entry in &virtual_module.entries {
                    env.define(
                        entry.name.clone(),
                        Value::Native(Rc::from(entry.native.as_str())),
                    );
                }
            }
            module_envs.insert(id, env);
            continue;
        }
        if module.is_package_group {
            // A group env is the union of its children.
            let env = Env::root();
            for &child in &module.sub_modules {
                if let Some(child_env) = module_envs.get(&child) {
                    for name in child_env.local_names() {
                        if let Some(value) = child_env.get(&name) {
                            env.define(name, value);
                        }
                    }
                }
            }
            module_envs.insert(id, env);
            continue;
        }

        if analyzed.analyses[id.0 as usize].is_none() {
            return Err(PipelineError::Internal(format!(
                "module {} was never analyzed",
                module.name
            )));
        }

        let module_env = evaluator.begin_module();

        for import in &module.imports {
            let binding = import
                .decl
                .alias
                .clone()
                .unwrap_or_else(|| funxy_typeck::infer::last_segment(&import.decl.path));
            let Some(target_env) = module_envs.get(&import.target) else { continue };
            evaluator.register_module(binding, Rc::clone(target_env));

            let names: Vec<String> = if import.decl.import_all {
                target_env
                    .local_names()
                    .into_iter()
                    .filter(|n| !import.decl.exclude.contains(n))
                    .collect()
            } else {
                import.decl.symbols.clone()
            };
            for name in names {
                if let Some(value) = target_env.get(&name) {
                    evaluator.define_global(name, value);
                }
            }
        }

        last = evaluator
            .run_files(&module.files)
            .map_err(PipelineError::Runtime)?;
        module_envs.insert(id, module_env);
    }

    Ok(last)
}

// ── Bytecode backend ───────────────────────────────────────────────────

/// Compile a program into a bundle.
pub fn compile_source(path: &Path) -> Result<Bundle, PipelineError> {
    let analyzed = analyze_program(path)?;
    if analyzed.has_errors() {
        return Err(PipelineError::Diagnostics(analyzed.diagnostics));
    }
    compile_analyzed(&analyzed)
}

pub fn compile_analyzed(analyzed: &AnalyzedProgram) -> Result<Bundle, PipelineError> {
    let loaded = &analyzed.loaded;
    let mut bundle = Bundle {
        source_file: loaded.module(loaded.entry).path.display().to_string(),
        ..Bundle::default()
    };

    // Which import paths refer to each module.
    let mut paths_of: FxHashMap<ModuleId, Vec<String>> = FxHashMap::default();
    for module in &loaded.modules {
        for import in &module.imports {
            paths_of
                .entry(import.target)
                .or_default()
                .push(import.decl.path.clone());
        }
    }

    for &id in &loaded.order {
        let module = loaded.module(id);
        let Some(analysis) = &analyzed.analyses[id.0 as usize] else {
            // Virtual modules and groups carry no chunk.
            let entry = BundledModule {
                dir: module.dir.display().to_string(),
                is_package_group: module.is_package_group,
                sub_module_paths: module
                    .sub_modules
                    .iter()
                    .map(|s| loaded.module(*s).path.display().to_string())
                    .collect(),
                ..BundledModule::default()
            };
            for path in paths_of.get(&id).into_iter().flatten() {
                bundle.modules.insert(path.clone(), entry.clone());
            }
            continue;
        };

        let files: Vec<&Program> = module.files.iter().collect();
        let file_name = module.path.display().to_string();
        let chunk = compile_module(analysis, &files, &file_name);

        for (key, function) in compile_trait_defaults(analysis, &files) {
            bundle.trait_defaults.insert(key, function);
        }

        if id == loaded.entry {
            bundle.main_chunk = chunk;
        } else {
            let entry = BundledModule {
                pending_imports: chunk.pending_imports.clone(),
                exports: analysis.exports.values.keys().cloned().collect(),
                dir: module.dir.display().to_string(),
                chunk: Some(chunk),
                ..BundledModule::default()
            };
            for path in paths_of.get(&id).into_iter().flatten() {
                bundle.modules.insert(path.clone(), entry.clone());
            }
        }
    }

    Ok(bundle)
}

/// Execute a bundle on the VM.
pub fn run_bundle(bundle: &Bundle) -> Result<Value, PipelineError> {
    let mut vm = Vm::new();

    for (key, function) in &bundle.trait_defaults {
        vm.register_default(key.clone(), Rc::clone(function));
    }

    // Run dependency modules in import order (a module's imports must be
    // registered before its chunk runs).
    let mut order: Vec<&String> = bundle.modules.keys().collect();
    order.sort_by_key(|path| {
        bundle
            .modules
            .get(*path)
            .map(|m| m.pending_imports.len())
            .unwrap_or(0)
    });

    let mut remaining: Vec<&String> = order;
    let mut done: Vec<String> = Vec::new();
    let mut progressed = true;
    while progressed && !remaining.is_empty() {
        progressed = false;
        let mut next_round = Vec::new();
        for path in remaining {
            let module = &bundle.modules[path];
            let deps_ready = module
                .pending_imports
                .iter()
                .all(|p| done.contains(&p.path) || !bundle.modules.contains_key(&p.path));
            if !deps_ready {
                next_round.push(path);
                continue;
            }
            if let Some(chunk) = &module.chunk {
                vm.reset_globals();
                vm.run_chunk(chunk.clone()).map_err(PipelineError::Runtime)?;
                let exports: FxHashMap<String, Value> = vm
                    .globals()
                    .iter()
                    .filter(|(name, _)| {
                        module.exports.contains(name) || module.exports.is_empty()
                    })
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                vm.register_module(path.clone(), exports);
            } else if path.starts_with("lib/") {
                // Virtual module: expose its natives directly.
                let exports = virtual_native_exports(path);
                vm.register_module(path.clone(), exports);
            }
            done.push(path.clone());
            progressed = true;
        }
        remaining = next_round;
    }

    vm.reset_globals();
    vm.run_chunk(bundle.main_chunk.clone())
        .map_err(PipelineError::Runtime)
}

fn virtual_native_exports(path: &str) -> FxHashMap<String, Value> {
    let registry = standard_registry();
    let mut exports = FxHashMap::default();
    if let Some(module) = registry.get(path) {
        for entry in &module.entries {
            exports.insert(
                entry.name.clone(),
                Value::Native(Rc::from(entry.native.as_str())),
            );
        }
    }
    exports
}

/// Run a source program end to end on the chosen backend.
pub fn run_file(path: &Path, backend: BackendKind) -> Result<Value, PipelineError> {
    match backend {
        BackendKind::Tree => evaluate_module(path),
        BackendKind::Vm => {
            let bundle = compile_source(path)?;
            run_bundle(&bundle)
        }
    }
}
