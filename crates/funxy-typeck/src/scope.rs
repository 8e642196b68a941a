//! Symbol table: a tree of scopes with symbol records.
//!
//! Scopes form an arena-indexed tree. Lookup walks parent links from the
//! innermost scope outward; `is_defined_locally` supports the shadowing
//! rules (nested scopes may shadow anything, same-scope redefinition at
//! module level is an error).

use rustc_hash::FxHashMap;

use funxy_parser::ast::NodeId;

use crate::ty::Scheme;

/// Index of a symbol in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(pub u32);

/// Index of a scope in the table's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub u32);

/// What kind of binding a symbol is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Value,
    Function,
    Constant,
    Type,
    Trait,
    Constructor,
    Module,
    /// Declared in the naming pass, signature not yet known.
    Pending,
}

/// What kind of region a scope covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Module,
    Function,
    Block,
    Instance,
    TraitDefaults,
}

/// A named binding.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub scheme: Option<Scheme>,
    /// Module path the symbol originates from (empty for locals/builtins).
    pub origin_module: String,
    /// The declaring AST node, when the symbol comes from source.
    pub def_node: Option<NodeId>,
}

impl Symbol {
    pub fn new(name: impl Into<String>, kind: SymbolKind) -> Self {
        Symbol {
            name: name.into(),
            kind,
            scheme: None,
            origin_module: String::new(),
            def_node: None,
        }
    }

    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = Some(scheme);
        self
    }

    pub fn with_node(mut self, node: NodeId) -> Self {
        self.def_node = Some(node);
        self
    }

    pub fn with_origin(mut self, module: impl Into<String>) -> Self {
        self.origin_module = module.into();
        self
    }
}

struct Scope {
    parent: Option<ScopeId>,
    kind: ScopeKind,
    names: FxHashMap<String, SymbolId>,
}

/// The symbol table: scope arena plus symbol storage.
pub struct SymbolTable {
    scopes: Vec<Scope>,
    symbols: Vec<Symbol>,
    current: ScopeId,
}

impl SymbolTable {
    /// Create a table with one module-kind root scope.
    pub fn new() -> Self {
        SymbolTable {
            scopes: vec![Scope {
                parent: None,
                kind: ScopeKind::Module,
                names: FxHashMap::default(),
            }],
            symbols: Vec::new(),
            current: ScopeId(0),
        }
    }

    pub fn root(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn current_scope(&self) -> ScopeId {
        self.current
    }

    pub fn scope_kind(&self, id: ScopeId) -> ScopeKind {
        self.scopes[id.0 as usize].kind
    }

    /// Enter a fresh child scope of the current one.
    pub fn push_scope(&mut self, kind: ScopeKind) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            parent: Some(self.current),
            kind,
            names: FxHashMap::default(),
        });
        self.current = id;
        id
    }

    /// Return to the parent scope.
    ///
    /// # Panics
    ///
    /// Panics when called on the root scope.
    pub fn pop_scope(&mut self) {
        let parent = self.scopes[self.current.0 as usize]
            .parent
            .expect("cannot pop the module scope");
        self.current = parent;
    }

    /// Define a symbol in the current scope, replacing any same-name
    /// binding in this scope (callers check `is_defined_locally` first
    /// when redefinition is an error).
    pub fn define(&mut self, symbol: Symbol) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        let name = symbol.name.clone();
        self.symbols.push(symbol);
        self.scopes[self.current.0 as usize].names.insert(name, id);
        id
    }

    /// Whether the name is bound in the current scope itself.
    pub fn is_defined_locally(&self, name: &str) -> bool {
        self.scopes[self.current.0 as usize].names.contains_key(name)
    }

    /// Find a name, searching from the current scope outward.
    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        self.lookup_from(self.current, name)
    }

    /// Find a name starting at a specific scope.
    pub fn lookup_from(&self, scope: ScopeId, name: &str) -> Option<SymbolId> {
        let mut cursor = Some(scope);
        while let Some(id) = cursor {
            let scope = &self.scopes[id.0 as usize];
            if let Some(sym) = scope.names.get(name) {
                return Some(*sym);
            }
            cursor = scope.parent;
        }
        None
    }

    /// Find a name only within the root (module) scope.
    pub fn lookup_module_scope(&self, name: &str) -> Option<SymbolId> {
        self.scopes[0].names.get(name).copied()
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0 as usize]
    }

    pub fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.0 as usize]
    }

    /// All names bound in the module scope, for export computation.
    pub fn module_scope_names(&self) -> impl Iterator<Item = (&String, SymbolId)> {
        self.scopes[0].names.iter().map(|(n, id)| (n, *id))
    }

    /// Number of symbols defined.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ty::{Scheme, Ty};

    #[test]
    fn define_and_lookup() {
        let mut table = SymbolTable::new();
        let id = table.define(Symbol::new("x", SymbolKind::Constant).with_scheme(Scheme::mono(Ty::int())));
        assert_eq!(table.lookup("x"), Some(id));
        assert_eq!(table.lookup("y"), None);
    }

    #[test]
    fn inner_scope_shadows_outer() {
        let mut table = SymbolTable::new();
        table.define(Symbol::new("x", SymbolKind::Constant).with_scheme(Scheme::mono(Ty::int())));

        table.push_scope(ScopeKind::Block);
        let inner = table.define(
            Symbol::new("x", SymbolKind::Constant).with_scheme(Scheme::mono(Ty::string())),
        );
        assert_eq!(table.lookup("x"), Some(inner));

        table.pop_scope();
        let outer = table.lookup("x").unwrap();
        assert_ne!(outer, inner);
        assert_eq!(table.symbol(outer).scheme.as_ref().unwrap().ty, Ty::int());
    }

    #[test]
    fn is_defined_locally_ignores_parents() {
        let mut table = SymbolTable::new();
        table.define(Symbol::new("x", SymbolKind::Constant));
        table.push_scope(ScopeKind::Function);
        assert!(!table.is_defined_locally("x"));
        assert!(table.lookup("x").is_some());
    }

    #[test]
    #[should_panic(expected = "cannot pop the module scope")]
    fn popping_root_panics() {
        let mut table = SymbolTable::new();
        table.pop_scope();
    }
}
