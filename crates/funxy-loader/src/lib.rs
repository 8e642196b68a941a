//! Funxy module loader.
//!
//! Walks the import graph from an entry file or package directory,
//! parsing every reachable source file with one shared node-id space,
//! resolving import paths (relative, project-root, virtual `lib/...`,
//! package groups `kit/...`), detecting cycles, and producing modules in
//! dependency order for the analyzer.
//!
//! Only a missing *entry* is a hard error; unresolved imports become
//! `A003` diagnostics so one run reports every broken path.

pub mod discovery;
pub mod graph;
pub mod virtualmod;

use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use thiserror::Error;

use funxy_common::{DiagCode, Diagnostic, DiagnosticSink};
use funxy_parser::ast::visit::{self, Visitor};
use funxy_parser::ast::{ImportDecl, NodeIdGen, Program, StmtKind};

use discovery::{discover_entry, package_files, EntryKind, SOURCE_EXTENSIONS};
use graph::DepGraph;
use virtualmod::VirtualRegistry;

/// Index of a module in the loaded program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(pub u32);

/// One import, resolved to its target module.
#[derive(Debug, Clone)]
pub struct ResolvedImport {
    pub decl: ImportDecl,
    pub target: ModuleId,
    /// Source file the import appeared in (for diagnostics).
    pub file: String,
}

/// A loaded module: one file, a package directory, a virtual module, or a
/// package group.
#[derive(Debug)]
pub struct Module {
    pub id: ModuleId,
    /// Package name (from `package` declarations) or the file stem.
    pub name: String,
    pub dir: PathBuf,
    /// Cache key: canonical file/directory path, or the virtual path.
    pub path: PathBuf,
    pub is_virtual: bool,
    pub is_package_group: bool,
    /// Parsed files in symbol-dependency order.
    pub files: Vec<Program>,
    pub imports: Vec<ResolvedImport>,
    /// Children of a package group.
    pub sub_modules: Vec<ModuleId>,
}

/// The fully loaded program.
pub struct LoadedProgram {
    pub modules: Vec<Module>,
    /// Modules in dependency order (entry last).
    pub order: Vec<ModuleId>,
    pub entry: ModuleId,
    pub diagnostics: DiagnosticSink,
    /// Total AST nodes allocated across every file.
    pub node_count: u32,
}

impl LoadedProgram {
    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[id.0 as usize]
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.has_errors()
    }
}

/// Hard failures establishing the entry point.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no such file or directory: {0}")]
    NotFound(PathBuf),
    #[error("directory {0} contains no Funxy sources")]
    NoSources(PathBuf),
    #[error("directory {0} has no entry file matching its name")]
    NoEntryFile(PathBuf),
}

/// Load a program starting at `entry` (a source file or package
/// directory).
pub fn load_program(
    entry: &Path,
    virtuals: &VirtualRegistry,
) -> Result<LoadedProgram, LoadError> {
    let entry_kind = discover_entry(entry)?;
    let root = match &entry_kind {
        EntryKind::File(path) | EntryKind::Bytecode(path) => path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
        EntryKind::Package { dir, .. } => dir.clone(),
    };

    let mut loader = Loader {
        root,
        virtuals,
        modules: Vec::new(),
        by_path: FxHashMap::default(),
        loading: Vec::new(),
        diags: DiagnosticSink::new(),
        ids: NodeIdGen::new(),
    };

    let entry_id = match entry_kind {
        EntryKind::File(path) => loader.load_path(&path, None)?,
        EntryKind::Package { dir, .. } => loader.load_path(&dir, None)?,
        EntryKind::Bytecode(path) => {
            // Bundles bypass the loader; the driver runs them directly.
            return Err(LoadError::NotFound(path));
        }
    };

    let order = loader.module_order();
    log::debug!(
        "loaded {} module(s), {} diagnostics",
        loader.modules.len(),
        loader.diags.len()
    );

    Ok(LoadedProgram {
        node_count: loader.ids.count(),
        modules: loader.modules,
        order,
        entry: entry_id,
        diagnostics: loader.diags,
    })
}

struct Loader<'a> {
    root: PathBuf,
    virtuals: &'a VirtualRegistry,
    modules: Vec<Module>,
    by_path: FxHashMap<PathBuf, ModuleId>,
    /// Stack of modules currently being loaded, for cycle reporting.
    loading: Vec<(ModuleId, String)>,
    diags: DiagnosticSink,
    ids: NodeIdGen,
}

impl<'a> Loader<'a> {
    /// Load a file or package directory, returning its module id.
    /// Results are cached by canonical path; each module loads once.
    fn load_path(
        &mut self,
        path: &Path,
        import_site: Option<(&ImportDecl, &str)>,
    ) -> Result<ModuleId, LoadError> {
        let canonical = std::fs::canonicalize(path)
            .map_err(|source| LoadError::Io { path: path.to_path_buf(), source })?;

        if let Some(existing) = self.by_path.get(&canonical) {
            let existing = *existing;
            // An import of a module that is still on the loading stack is
            // a cycle.
            if let Some(pos) = self.loading.iter().position(|(id, _)| *id == existing) {
                if let Some((decl, file)) = import_site {
                    let mut names: Vec<String> = self.loading[pos..]
                        .iter()
                        .map(|(_, name)| name.clone())
                        .collect();
                    names.push(self.loading[pos].1.clone());
                    self.diags.push(Diagnostic::error(
                        DiagCode::A010,
                        file.to_string(),
                        decl.token.span,
                        decl.token.line,
                        decl.token.col,
                        format!("import cycle [cycle: {}]", names.join(" -> ")),
                    ));
                }
            }
            return Ok(existing);
        }

        let (files, dir, name) = if canonical.is_dir() {
            let (file_paths, _entry) = package_files(&canonical)?;
            let programs = self.parse_files(&file_paths);
            let name = self.package_name(&programs, &canonical);
            (programs, canonical.clone(), name)
        } else {
            let program = self.parse_file(&canonical)?;
            let name = program.package.clone().unwrap_or_else(|| {
                canonical
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("main")
                    .to_string()
            });
            let dir = canonical
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            (vec![program], dir, name)
        };

        let id = ModuleId(self.modules.len() as u32);
        self.by_path.insert(canonical.clone(), id);
        self.modules.push(Module {
            id,
            name: name.clone(),
            dir: dir.clone(),
            path: canonical,
            is_virtual: false,
            is_package_group: false,
            files: order_files(files),
            imports: Vec::new(),
            sub_modules: Vec::new(),
        });

        self.loading.push((id, name));
        let imports = self.resolve_imports(id, &dir);
        self.modules[id.0 as usize].imports = imports;
        self.loading.pop();

        Ok(id)
    }

    /// Resolve every import of a module's files, loading targets
    /// recursively.
    fn resolve_imports(&mut self, id: ModuleId, dir: &Path) -> Vec<ResolvedImport> {
        let imports: Vec<(ImportDecl, String)> = self.modules[id.0 as usize]
            .files
            .iter()
            .flat_map(|p| {
                p.imports
                    .iter()
                    .cloned()
                    .map(move |decl| (decl, p.file.clone()))
            })
            .collect();

        let mut resolved = Vec::new();
        for (decl, file) in imports {
            match self.resolve_one(&decl, &file, dir) {
                Some(target) => resolved.push(ResolvedImport { decl, target, file }),
                None => {
                    self.diags.push(Diagnostic::error(
                        DiagCode::A003,
                        file,
                        decl.token.span,
                        decl.token.line,
                        decl.token.col,
                        format!("cannot resolve import \"{}\"", decl.path),
                    ));
                }
            }
        }
        resolved
    }

    fn resolve_one(
        &mut self,
        decl: &ImportDecl,
        file: &str,
        dir: &Path,
    ) -> Option<ModuleId> {
        let path = &decl.path;

        // Virtual modules.
        if path.starts_with("lib/") {
            if self.virtuals.contains(path) {
                return Some(self.virtual_module(path));
            }
            return None;
        }

        // Package groups.
        if let Some(rest) = path.strip_prefix("kit/") {
            let group_dir = self.root.join(rest);
            return self.load_group(&group_dir, decl, file);
        }

        // Filesystem paths: relative to the importing file, or to the
        // project root.
        let base = if path.starts_with('.') { dir.to_path_buf() } else { self.root.clone() };
        let target = base.join(path);

        let candidate = self.existing_source(&target)?;
        match self.load_path(&candidate, Some((decl, file))) {
            Ok(id) => Some(id),
            Err(err) => {
                log::debug!("import of {path} failed: {err}");
                None
            }
        }
    }

    /// Find a real file/directory for an import target, trying the
    /// recognized extensions.
    fn existing_source(&self, target: &Path) -> Option<PathBuf> {
        if target.is_dir() {
            return Some(target.to_path_buf());
        }
        if target.is_file() {
            return Some(target.to_path_buf());
        }
        for ext in SOURCE_EXTENSIONS {
            let with_ext = target.with_extension(ext);
            if with_ext.is_file() {
                return Some(with_ext);
            }
        }
        None
    }

    /// Get or create the module record for a virtual path.
    fn virtual_module(&mut self, path: &str) -> ModuleId {
        let key = PathBuf::from(path);
        if let Some(existing) = self.by_path.get(&key) {
            return *existing;
        }
        let id = ModuleId(self.modules.len() as u32);
        self.by_path.insert(key.clone(), id);
        self.modules.push(Module {
            id,
            name: path.to_string(),
            dir: PathBuf::new(),
            path: key,
            is_virtual: true,
            is_package_group: false,
            files: Vec::new(),
            imports: Vec::new(),
            sub_modules: Vec::new(),
        });
        id
    }

    /// Load a `kit/...` package group: every child file or package becomes
    /// a sub-module; the group re-exports their union (duplicate names
    /// are rejected when exports are assembled).
    fn load_group(
        &mut self,
        group_dir: &Path,
        decl: &ImportDecl,
        file: &str,
    ) -> Option<ModuleId> {
        let canonical = std::fs::canonicalize(group_dir).ok()?;
        if let Some(existing) = self.by_path.get(&canonical) {
            return Some(*existing);
        }

        let entries = std::fs::read_dir(&canonical).ok()?;
        let mut children: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir() || discovery::is_source_file(p))
            .collect();
        children.sort();

        let id = ModuleId(self.modules.len() as u32);
        self.by_path.insert(canonical.clone(), id);
        let name = canonical
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("group")
            .to_string();
        self.modules.push(Module {
            id,
            name,
            dir: canonical.clone(),
            path: canonical,
            is_virtual: false,
            is_package_group: true,
            files: Vec::new(),
            imports: Vec::new(),
            sub_modules: Vec::new(),
        });

        let mut sub_modules = Vec::new();
        for child in children {
            match self.load_path(&child, Some((decl, file))) {
                Ok(child_id) => sub_modules.push(child_id),
                Err(err) => {
                    log::debug!("group child {} failed: {err}", child.display());
                }
            }
        }
        self.modules[id.0 as usize].sub_modules = sub_modules;
        Some(id)
    }

    // ── Parsing ────────────────────────────────────────────────────────

    fn parse_file(&mut self, path: &Path) -> Result<Program, LoadError> {
        let source = std::fs::read_to_string(path)
            .map_err(|source| LoadError::Io { path: path.to_path_buf(), source })?;
        let file_name = path.display().to_string();
        let ids = std::mem::take(&mut self.ids);
        let (parse, ids) = funxy_parser::parse_with_ids(&source, &file_name, ids);
        self.ids = ids;
        self.diags.absorb(parse.diagnostics);
        Ok(parse.program)
    }

    fn parse_files(&mut self, paths: &[PathBuf]) -> Vec<Program> {
        let mut programs = Vec::new();
        for path in paths {
            match self.parse_file(path) {
                Ok(program) => programs.push(program),
                Err(err) => {
                    self.diags.push(Diagnostic::error(
                        DiagCode::A003,
                        path.display().to_string(),
                        funxy_common::Span::point(0),
                        1,
                        1,
                        err.to_string(),
                    ));
                }
            }
        }
        programs
    }

    /// All files of a package directory must agree on their `package`
    /// declaration.
    fn package_name(&mut self, programs: &[Program], dir: &Path) -> String {
        let mut name: Option<String> = None;
        for program in programs {
            if let Some(declared) = &program.package {
                match &name {
                    None => name = Some(declared.clone()),
                    Some(existing) if existing != declared => {
                        self.diags.push(Diagnostic::error(
                            DiagCode::A003,
                            program.file.clone(),
                            funxy_common::Span::point(0),
                            1,
                            1,
                            format!(
                                "mismatched packages in directory: `{existing}` vs `{declared}`"
                            ),
                        ));
                    }
                    Some(_) => {}
                }
            }
        }
        name.unwrap_or_else(|| {
            dir.file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("main")
                .to_string()
        })
    }

    // ── Ordering ───────────────────────────────────────────────────────

    /// Topological order of modules by their imports (entry last).
    fn module_order(&mut self) -> Vec<ModuleId> {
        let mut graph = DepGraph::new();
        for module in &self.modules {
            graph.add_node(module.path.display().to_string());
        }
        for module in &self.modules {
            let from = graph
                .resolve(&module.path.display().to_string())
                .expect("every module was added");
            for import in &module.imports {
                let target = &self.modules[import.target.0 as usize];
                let to = graph
                    .resolve(&target.path.display().to_string())
                    .expect("every module was added");
                graph.add_dependency(from, to);
            }
            for &sub in &module.sub_modules {
                let to = graph
                    .resolve(&self.modules[sub.0 as usize].path.display().to_string())
                    .expect("every module was added");
                graph.add_dependency(from, to);
            }
        }

        match graph.topological_sort() {
            Ok(order) => order.into_iter().map(|idx| ModuleId(idx.0)).collect(),
            Err(_cycle) => {
                // Cycles were already diagnosed at their import sites;
                // fall back to load order so analysis can still proceed.
                (0..self.modules.len() as u32).map(ModuleId).collect()
            }
        }
    }
}

/// Order the files of one module so that definers precede users.
///
/// Builds a file-level graph from top-level declared names to top-level
/// uses; a cycle falls back to the original (sorted) order. The analyzer
/// pre-declares all names anyway, so this ordering is a determinism aid,
/// not a correctness requirement.
fn order_files(files: Vec<Program>) -> Vec<Program> {
    if files.len() <= 1 {
        return files;
    }

    let declared: Vec<Vec<String>> = files.iter().map(declared_names).collect();
    let used: Vec<Vec<String>> = files.iter().map(used_names).collect();

    let mut graph = DepGraph::new();
    for program in &files {
        graph.add_node(program.file.clone());
    }
    for (i, uses) in used.iter().enumerate() {
        for (j, decls) in declared.iter().enumerate() {
            if i == j {
                continue;
            }
            if uses.iter().any(|u| decls.contains(u)) {
                let from = graph.resolve(&files[i].file).expect("node added");
                let to = graph.resolve(&files[j].file).expect("node added");
                graph.add_dependency(from, to);
            }
        }
    }

    match graph.topological_sort() {
        Ok(order) => {
            let mut slots: Vec<Option<Program>> = files.into_iter().map(Some).collect();
            order
                .into_iter()
                .map(|idx| slots[idx.0 as usize].take().expect("each file used once"))
                .collect()
        }
        // Mutually referential files: keep the original (sorted) order;
        // the analyzer's naming pass pre-declares across files anyway.
        Err(_) => files,
    }
}

/// Top-level names a file declares.
fn declared_names(program: &Program) -> Vec<String> {
    let mut names = Vec::new();
    for stmt in &program.stmts {
        match &stmt.kind {
            StmtKind::Function(decl) => names.push(decl.name.clone()),
            StmtKind::Const { name, .. } => names.push(name.clone()),
            StmtKind::ConstPattern { pat, .. } => names.extend(pat.bound_names()),
            StmtKind::TypeDecl(decl) => {
                names.push(decl.name.clone());
                if let funxy_parser::ast::TypeDeclBody::Adt(ctors) = &decl.body {
                    names.extend(ctors.iter().map(|c| c.name.clone()));
                }
            }
            StmtKind::Trait(decl) => {
                names.push(decl.name.clone());
                names.extend(decl.methods.iter().map(|m| m.name.clone()));
            }
            _ => {}
        }
    }
    names
}

/// Every identifier a file references.
fn used_names(program: &Program) -> Vec<String> {
    struct Collector {
        names: Vec<String>,
    }
    impl Visitor for Collector {
        fn visit_expr(&mut self, expr: &funxy_parser::ast::Expr) {
            if let funxy_parser::ast::ExprKind::Ident(name) = &expr.kind {
                self.names.push(name.clone());
            }
            visit::walk_expr(self, expr);
        }
    }
    let mut collector = Collector { names: Vec::new() };
    for stmt in &program.stmts {
        collector.visit_stmt(stmt);
    }
    collector.names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_tree(files: &[(&str, &str)]) -> PathBuf {
        let base = std::env::temp_dir().join(format!(
            "funxy-loader-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        let _ = std::fs::remove_dir_all(&base);
        for (rel, content) in files {
            let path = base.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        base
    }

    #[test]
    fn single_file_module_loads() {
        let base = write_tree(&[("main.fx", "x = 1\n")]);
        let registry = virtualmod::standard_registry();
        let loaded = load_program(&base.join("main.fx"), &registry).unwrap();
        assert_eq!(loaded.modules.len(), 1);
        assert!(!loaded.has_errors());
        std::fs::remove_dir_all(&base).unwrap();
    }

    #[test]
    fn imports_load_dependencies_in_order() {
        let base = write_tree(&[
            ("main.fx", "import \"./util\"\ny = 2\n"),
            ("util.fx", "x = 1\n"),
        ]);
        let registry = virtualmod::standard_registry();
        let loaded = load_program(&base.join("main.fx"), &registry).unwrap();
        assert_eq!(loaded.modules.len(), 2);
        // util precedes main in dependency order.
        let names: Vec<&str> = loaded
            .order
            .iter()
            .map(|id| loaded.module(*id).name.as_str())
            .collect();
        assert_eq!(names, vec!["util", "main"]);
        std::fs::remove_dir_all(&base).unwrap();
    }

    #[test]
    fn unknown_import_is_a003_not_fatal() {
        let base = write_tree(&[("main.fx", "import \"nope/x\"\ny = 2\n")]);
        let registry = virtualmod::standard_registry();
        let loaded = load_program(&base.join("main.fx"), &registry).unwrap();
        assert!(loaded
            .diagnostics
            .diagnostics()
            .iter()
            .any(|d| d.code.as_str() == "A003" && d.message.contains("nope/x")));
        std::fs::remove_dir_all(&base).unwrap();
    }

    #[test]
    fn import_cycle_is_reported() {
        let base = write_tree(&[
            ("a.fx", "import \"./b\"\nx = 1\n"),
            ("b.fx", "import \"./a\"\ny = 2\n"),
        ]);
        let registry = virtualmod::standard_registry();
        let loaded = load_program(&base.join("a.fx"), &registry).unwrap();
        assert!(loaded
            .diagnostics
            .diagnostics()
            .iter()
            .any(|d| d.message.contains("[cycle:")));
        std::fs::remove_dir_all(&base).unwrap();
    }

    #[test]
    fn virtual_import_resolves_without_source() {
        let base = write_tree(&[("main.fx", "import \"lib/math\"\ny = 2\n")]);
        let registry = virtualmod::standard_registry();
        let loaded = load_program(&base.join("main.fx"), &registry).unwrap();
        assert!(!loaded.has_errors());
        assert!(loaded.modules.iter().any(|m| m.is_virtual));
        std::fs::remove_dir_all(&base).unwrap();
    }

    #[test]
    fn package_directory_loads_all_files() {
        let base = write_tree(&[
            ("pkg/pkg.fx", "package Pkg\nmain_value = helper_value\n"),
            ("pkg/helper.fx", "package Pkg\nhelper_value = 1\n"),
        ]);
        let registry = virtualmod::standard_registry();
        let loaded = load_program(&base.join("pkg"), &registry).unwrap();
        assert_eq!(loaded.modules.len(), 1);
        let module = loaded.module(loaded.entry);
        assert_eq!(module.files.len(), 2);
        assert_eq!(module.name, "Pkg");
        // helper defines a name main uses, so it comes first.
        assert!(module.files[0].file.ends_with("helper.fx"));
        std::fs::remove_dir_all(&base).unwrap();
    }

    #[test]
    fn module_loads_once_per_path() {
        let base = write_tree(&[
            ("main.fx", "import \"./a\"\nimport \"./b\"\nz = 1\n"),
            ("a.fx", "import \"./shared\"\nx = 1\n"),
            ("b.fx", "import \"./shared\"\ny = 1\n"),
            ("shared.fx", "s = 1\n"),
        ]);
        let registry = virtualmod::standard_registry();
        let loaded = load_program(&base.join("main.fx"), &registry).unwrap();
        assert_eq!(loaded.modules.len(), 4, "shared must not be duplicated");
        std::fs::remove_dir_all(&base).unwrap();
    }
}
