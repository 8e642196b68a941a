//! Registry of virtual (built-in) modules.
//!
//! A virtual module under `lib/...` has no source: its symbols are typed by
//! schemes registered here and implemented by named natives in the
//! runtime's native table. Registration happens once at startup; lookups
//! are read-only afterwards.

use rustc_hash::FxHashMap;

use funxy_typeck::Scheme;

/// One exported symbol of a virtual module.
#[derive(Debug, Clone)]
pub struct VirtualEntry {
    pub name: String,
    /// The symbol's type.
    pub scheme: Scheme,
    /// Name of the implementing native in the runtime registry.
    pub native: String,
}

/// A virtual module: a path like `lib/math` plus its entries.
#[derive(Debug, Clone)]
pub struct VirtualModule {
    pub path: String,
    pub entries: Vec<VirtualEntry>,
}

/// All registered virtual modules.
#[derive(Debug, Default)]
pub struct VirtualRegistry {
    modules: FxHashMap<String, VirtualModule>,
}

impl VirtualRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or extend) a virtual module.
    pub fn register_virtual_module(&mut self, path: &str, entries: Vec<VirtualEntry>) {
        let module = self
            .modules
            .entry(path.to_string())
            .or_insert_with(|| VirtualModule {
                path: path.to_string(),
                entries: Vec::new(),
            });
        module.entries.extend(entries);
    }

    pub fn get(&self, path: &str) -> Option<&VirtualModule> {
        self.modules.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.modules.contains_key(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VirtualModule> {
        self.modules.values()
    }
}

/// The standard virtual modules every program can import.
///
/// Each entry names a native the runtime provides; see the runtime's
/// native table for the implementations.
pub fn standard_registry() -> VirtualRegistry {
    use funxy_typeck::{Kind, Ty};

    let mut registry = VirtualRegistry::new();
    let a = || Ty::Rigid("a".into(), Kind::Star);
    let poly1 = |ty: Ty| Scheme {
        vars: vec![("a".into(), Kind::Star)],
        row_vars: Vec::new(),
        constraints: Vec::new(),
        ty,
    };

    registry.register_virtual_module(
        "lib/math",
        vec![
            VirtualEntry {
                name: "abs".into(),
                scheme: Scheme::mono(Ty::func(vec![Ty::int()], Ty::int())),
                native: "math.abs".into(),
            },
            VirtualEntry {
                name: "sqrt".into(),
                scheme: Scheme::mono(Ty::func(vec![Ty::float()], Ty::float())),
                native: "math.sqrt".into(),
            },
            VirtualEntry {
                name: "floor".into(),
                scheme: Scheme::mono(Ty::func(vec![Ty::float()], Ty::int())),
                native: "math.floor".into(),
            },
            VirtualEntry {
                name: "pi".into(),
                scheme: Scheme::mono(Ty::float()),
                native: "math.pi".into(),
            },
        ],
    );

    registry.register_virtual_module(
        "lib/string",
        vec![
            VirtualEntry {
                name: "upper".into(),
                scheme: Scheme::mono(Ty::func(vec![Ty::string()], Ty::string())),
                native: "string.upper".into(),
            },
            VirtualEntry {
                name: "lower".into(),
                scheme: Scheme::mono(Ty::func(vec![Ty::string()], Ty::string())),
                native: "string.lower".into(),
            },
            VirtualEntry {
                name: "split".into(),
                scheme: Scheme::mono(Ty::func(
                    vec![Ty::string(), Ty::string()],
                    Ty::list(Ty::string()),
                )),
                native: "string.split".into(),
            },
        ],
    );

    registry.register_virtual_module(
        "lib/list",
        vec![
            VirtualEntry {
                name: "reverse".into(),
                scheme: poly1(Ty::func(vec![Ty::list(a())], Ty::list(a()))),
                native: "list.reverse".into(),
            },
            VirtualEntry {
                name: "head".into(),
                scheme: poly1(Ty::func(
                    vec![Ty::list(a())],
                    Ty::App(Box::new(Ty::Con("Option".into())), vec![a()]),
                )),
                native: "list.head".into(),
            },
            VirtualEntry {
                name: "sort".into(),
                scheme: poly1(Ty::func(vec![Ty::list(a())], Ty::list(a()))),
                native: "list.sort".into(),
            },
        ],
    );

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_modules_present() {
        let registry = standard_registry();
        assert!(registry.contains("lib/math"));
        assert!(registry.contains("lib/string"));
        assert!(registry.contains("lib/list"));
        assert!(!registry.contains("lib/nope"));

        let math = registry.get("lib/math").unwrap();
        assert!(math.entries.iter().any(|e| e.name == "sqrt"));
    }

    #[test]
    fn registration_extends_existing_module() {
        let mut registry = VirtualRegistry::new();
        registry.register_virtual_module(
            "lib/x",
            vec![VirtualEntry {
                name: "one".into(),
                scheme: Scheme::mono(funxy_typeck::Ty::int()),
                native: "x.one".into(),
            }],
        );
        registry.register_virtual_module(
            "lib/x",
            vec![VirtualEntry {
                name: "two".into(),
                scheme: Scheme::mono(funxy_typeck::Ty::int()),
                native: "x.two".into(),
            }],
        );
        assert_eq!(registry.get("lib/x").unwrap().entries.len(), 2);
    }
}
