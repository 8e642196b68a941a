//! Registry of named types: primitives, ADTs, and aliases.

use rustc_hash::FxHashMap;

use crate::ty::{Kind, Ty};

/// One constructor of an ADT. Field types reference the ADT's parameters
/// as `Ty::Rigid` by name.
#[derive(Clone, Debug)]
pub struct CtorSig {
    pub name: String,
    pub fields: Vec<Ty>,
}

/// An algebraic data type definition.
#[derive(Clone, Debug)]
pub struct AdtDef {
    pub name: String,
    pub params: Vec<(String, Kind)>,
    pub ctors: Vec<CtorSig>,
}

impl AdtDef {
    /// The type this ADT names when applied to its own parameters.
    pub fn self_ty(&self) -> Ty {
        if self.params.is_empty() {
            Ty::Con(self.name.clone())
        } else {
            Ty::App(
                Box::new(Ty::Con(self.name.clone())),
                self.params
                    .iter()
                    .map(|(n, k)| Ty::Rigid(n.clone(), k.clone()))
                    .collect(),
            )
        }
    }
}

/// A type alias. The body references parameters as rigids.
#[derive(Clone, Debug)]
pub struct AliasDef {
    pub name: String,
    pub params: Vec<(String, Kind)>,
    pub body: Ty,
}

/// All named types known to one analysis run.
#[derive(Default)]
pub struct TypeRegistry {
    kinds: FxHashMap<String, Kind>,
    adts: FxHashMap<String, AdtDef>,
    aliases: FxHashMap<String, AliasDef>,
    /// Constructor name -> owning ADT.
    ctor_owner: FxHashMap<String, String>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a primitive or abstract type constructor.
    pub fn register_primitive(&mut self, name: &str, kind: Kind) {
        self.kinds.insert(name.to_string(), kind);
    }

    /// Pre-register a type name with its kind before its body is known,
    /// so mutually recursive declarations resolve.
    pub fn predeclare(&mut self, name: &str, arity: usize) {
        self.kinds.insert(name.to_string(), Kind::arrow_chain(arity));
    }

    pub fn register_adt(&mut self, def: AdtDef) {
        self.kinds
            .insert(def.name.clone(), Kind::arrow_chain(def.params.len()));
        for ctor in &def.ctors {
            self.ctor_owner.insert(ctor.name.clone(), def.name.clone());
        }
        self.adts.insert(def.name.clone(), def);
    }

    pub fn register_alias(&mut self, def: AliasDef) {
        self.kinds
            .insert(def.name.clone(), Kind::arrow_chain(def.params.len()));
        self.aliases.insert(def.name.clone(), def);
    }

    pub fn kind_of(&self, name: &str) -> Option<&Kind> {
        self.kinds.get(name)
    }

    pub fn adt(&self, name: &str) -> Option<&AdtDef> {
        self.adts.get(name)
    }

    pub fn alias(&self, name: &str) -> Option<&AliasDef> {
        self.aliases.get(name)
    }

    /// Resolve a constructor name to its ADT and constructor index.
    pub fn ctor(&self, name: &str) -> Option<(&AdtDef, usize)> {
        let owner = self.ctor_owner.get(name)?;
        let adt = self.adts.get(owner)?;
        let idx = adt.ctors.iter().position(|c| c.name == name)?;
        Some((adt, idx))
    }

    pub fn adts(&self) -> impl Iterator<Item = &AdtDef> {
        self.adts.values()
    }

    pub fn aliases(&self) -> impl Iterator<Item = &AliasDef> {
        self.aliases.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adt_registration_and_ctor_lookup() {
        let mut reg = TypeRegistry::new();
        reg.register_adt(AdtDef {
            name: "Shape".into(),
            params: Vec::new(),
            ctors: vec![
                CtorSig { name: "Circle".into(), fields: vec![Ty::float()] },
                CtorSig { name: "Rect".into(), fields: vec![Ty::float(), Ty::float()] },
            ],
        });

        assert_eq!(reg.kind_of("Shape"), Some(&Kind::Star));
        let (adt, idx) = reg.ctor("Rect").unwrap();
        assert_eq!(adt.name, "Shape");
        assert_eq!(idx, 1);
        assert!(reg.ctor("Triangle").is_none());
    }

    #[test]
    fn parameterized_self_ty() {
        let def = AdtDef {
            name: "Option".into(),
            params: vec![("a".into(), Kind::Star)],
            ctors: Vec::new(),
        };
        assert_eq!(def.self_ty().to_string(), "Option<a>");
    }
}
