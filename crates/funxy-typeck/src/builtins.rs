//! Built-in types, traits, instances, and native function signatures.
//!
//! Arithmetic operators dispatch through the `Add`/`Sub`/... traits so the
//! same dictionary machinery serves built-in and user-defined numeric
//! types; equality, ordering, and concatenation are structural primitives
//! implemented by the backends. `Monad` powers `>>=` and `do`-notation.
//! Native implementations are looked up by name in the runtime registry.

use crate::registry::{AdtDef, CtorSig, TypeRegistry};
use crate::scope::{Symbol, SymbolKind, SymbolTable};
use crate::traits::{InstanceDb, InstanceDef, MethodImpl, TraitDef, TraitMethodSig, TraitRegistry};
use crate::ty::{Constraint, Kind, Scheme, Ty};

/// Install everything built-in into a fresh analysis context.
pub fn install(
    table: &mut SymbolTable,
    traits: &mut TraitRegistry,
    instances: &mut InstanceDb,
    types: &mut TypeRegistry,
) {
    install_primitive_types(types);
    install_builtin_adts(table, types);
    install_operator_traits(traits, instances);
    install_monad(traits, instances);
    install_native_values(table);
}

fn install_primitive_types(types: &mut TypeRegistry) {
    for name in [
        "Int", "BigInt", "Rational", "Float", "Bool", "String", "Char", "Nil", "Bytes", "Bits",
    ] {
        types.register_primitive(name, Kind::Star);
    }
    types.register_primitive("List", Kind::arrow_chain(1));
    types.register_primitive("Map", Kind::arrow_chain(2));
}

fn install_builtin_adts(table: &mut SymbolTable, types: &mut TypeRegistry) {
    let a = || Ty::Rigid("a".into(), Kind::Star);
    let e = || Ty::Rigid("e".into(), Kind::Star);

    let option = AdtDef {
        name: "Option".into(),
        params: vec![("a".into(), Kind::Star)],
        ctors: vec![
            CtorSig { name: "Some".into(), fields: vec![a()] },
            CtorSig { name: "None".into(), fields: Vec::new() },
        ],
    };
    // The value parameter comes last so `Result<e>` partially applies to
    // a `* -> *` monad, exactly like Either in other ML-family languages.
    let result = AdtDef {
        name: "Result".into(),
        params: vec![("e".into(), Kind::Star), ("a".into(), Kind::Star)],
        ctors: vec![
            CtorSig { name: "Ok".into(), fields: vec![a()] },
            CtorSig { name: "Err".into(), fields: vec![e()] },
        ],
    };

    for adt in [option, result] {
        define_ctor_symbols(table, &adt);
        types.register_adt(adt);
    }
}

/// Define a constructor symbol (function-shaped for fielded constructors,
/// value-shaped for nullary ones) for every constructor of an ADT.
pub fn define_ctor_symbols(table: &mut SymbolTable, adt: &AdtDef) {
    for ctor in &adt.ctors {
        let scheme = ctor_scheme(adt, ctor);
        table.define(
            Symbol::new(ctor.name.clone(), SymbolKind::Constructor).with_scheme(scheme),
        );
    }
}

/// The scheme of one constructor.
pub fn ctor_scheme(adt: &AdtDef, ctor: &CtorSig) -> Scheme {
    let self_ty = adt.self_ty();
    let ty = if ctor.fields.is_empty() {
        self_ty
    } else {
        Ty::func(ctor.fields.clone(), self_ty)
    };
    Scheme {
        vars: adt.params.clone(),
        row_vars: Vec::new(),
        constraints: Vec::new(),
        ty,
    }
}

// ── Operator traits ────────────────────────────────────────────────────

/// The numeric types every arithmetic trait is instantiated at.
const NUMERIC: [&str; 4] = ["Int", "Float", "BigInt", "Rational"];

fn binary_op_trait(name: &str, method: &str) -> TraitDef {
    let a = Ty::Rigid("a".into(), Kind::Star);
    TraitDef {
        name: name.into(),
        params: vec![("a".into(), Kind::Star)],
        supers: Vec::new(),
        fundeps: Vec::new(),
        methods: vec![TraitMethodSig {
            name: method.into(),
            scheme: Scheme {
                vars: vec![("a".into(), Kind::Star)],
                row_vars: Vec::new(),
                constraints: vec![Constraint {
                    trait_name: name.into(),
                    args: vec![a.clone()],
                }],
                ty: Ty::func(vec![a.clone(), a.clone()], a),
            },
            offset: 0,
            has_default: false,
        }],
    }
}

fn unary_op_trait(name: &str, method: &str) -> TraitDef {
    let a = Ty::Rigid("a".into(), Kind::Star);
    TraitDef {
        name: name.into(),
        params: vec![("a".into(), Kind::Star)],
        supers: Vec::new(),
        fundeps: Vec::new(),
        methods: vec![TraitMethodSig {
            name: method.into(),
            scheme: Scheme {
                vars: vec![("a".into(), Kind::Star)],
                row_vars: Vec::new(),
                constraints: vec![Constraint {
                    trait_name: name.into(),
                    args: vec![a.clone()],
                }],
                ty: Ty::func(vec![a.clone()], a),
            },
            offset: 0,
            has_default: false,
        }],
    }
}

fn install_operator_traits(traits: &mut TraitRegistry, instances: &mut InstanceDb) {
    let binary = [
        ("Add", "add"),
        ("Sub", "sub"),
        ("Mul", "mul"),
        ("Div", "div"),
        ("Rem", "rem"),
        ("Pow", "pow"),
    ];
    for (trait_name, method) in binary {
        traits
            .register(binary_op_trait(trait_name, method))
            .expect("builtin trait registration cannot clash");
        for ty_name in NUMERIC {
            instances.register(InstanceDef {
                trait_name: trait_name.into(),
                args: vec![Ty::Con(ty_name.into())],
                vars: Vec::new(),
                constraints: Vec::new(),
                methods: vec![MethodImpl::Native(format!("{method}.{ty_name}"))],
                origin_module: String::new(),
            });
        }
    }

    traits
        .register(unary_op_trait("Neg", "neg"))
        .expect("builtin trait registration cannot clash");
    for ty_name in NUMERIC {
        instances.register(InstanceDef {
            trait_name: "Neg".into(),
            args: vec![Ty::Con(ty_name.into())],
            vars: Vec::new(),
            constraints: Vec::new(),
            methods: vec![MethodImpl::Native(format!("neg.{ty_name}"))],
            origin_module: String::new(),
        });
    }

    // String concatenation also answers `Add`-free `++`; nothing to do
    // here -- `++`/`<>` are structural primitives in the backends.
}

fn install_monad(traits: &mut TraitRegistry, instances: &mut InstanceDb) {
    let m = || Ty::Rigid("m".into(), Kind::arrow_chain(1));
    let a = || Ty::Rigid("a".into(), Kind::Star);
    let b = || Ty::Rigid("b".into(), Kind::Star);
    let m_of = |arg: Ty| Ty::App(Box::new(m()), vec![arg]);

    traits
        .register(TraitDef {
            name: "Monad".into(),
            params: vec![("m".into(), Kind::arrow_chain(1))],
            supers: Vec::new(),
            fundeps: Vec::new(),
            methods: vec![TraitMethodSig {
                name: "bind".into(),
                scheme: Scheme {
                    vars: vec![
                        ("m".into(), Kind::arrow_chain(1)),
                        ("a".into(), Kind::Star),
                        ("b".into(), Kind::Star),
                    ],
                    row_vars: Vec::new(),
                    constraints: vec![Constraint {
                        trait_name: "Monad".into(),
                        args: vec![m()],
                    }],
                    ty: Ty::func(
                        vec![m_of(a()), Ty::func(vec![a()], m_of(b()))],
                        m_of(b()),
                    ),
                },
                offset: 0,
                has_default: false,
            }],
        })
        .expect("builtin trait registration cannot clash");

    // Monad (Result e), Monad Option, Monad List.
    instances.register(InstanceDef {
        trait_name: "Monad".into(),
        args: vec![Ty::App(
            Box::new(Ty::Con("Result".into())),
            vec![Ty::Rigid("e".into(), Kind::Star)],
        )],
        vars: vec![("e".into(), Kind::Star)],
        constraints: Vec::new(),
        methods: vec![MethodImpl::Native("bind.Result".into())],
        origin_module: String::new(),
    });
    instances.register(InstanceDef {
        trait_name: "Monad".into(),
        args: vec![Ty::Con("Option".into())],
        vars: Vec::new(),
        constraints: Vec::new(),
        methods: vec![MethodImpl::Native("bind.Option".into())],
        origin_module: String::new(),
    });
    instances.register(InstanceDef {
        trait_name: "Monad".into(),
        args: vec![Ty::Con("List".into())],
        vars: Vec::new(),
        constraints: Vec::new(),
        methods: vec![MethodImpl::Native("bind.List".into())],
        origin_module: String::new(),
    });
}

// ── Native values ──────────────────────────────────────────────────────

fn install_native_values(table: &mut SymbolTable) {
    let star = Kind::Star;
    let a = || Ty::Rigid("a".into(), Kind::Star);
    let b = || Ty::Rigid("b".into(), Kind::Star);

    let mut define = |name: &str, scheme: Scheme| {
        table.define(Symbol::new(name, SymbolKind::Function).with_scheme(scheme));
    };

    define(
        "print",
        Scheme {
            vars: vec![("a".into(), star.clone())],
            row_vars: Vec::new(),
            constraints: Vec::new(),
            ty: Ty::func(vec![a()], Ty::nil()),
        },
    );
    define(
        "toString",
        Scheme {
            vars: vec![("a".into(), star.clone())],
            row_vars: Vec::new(),
            constraints: Vec::new(),
            ty: Ty::func(vec![a()], Ty::string()),
        },
    );
    define("intToStr", Scheme::mono(Ty::func(vec![Ty::int()], Ty::string())));
    define("floatToStr", Scheme::mono(Ty::func(vec![Ty::float()], Ty::string())));
    define("strToInt", Scheme::mono(Ty::func(
        vec![Ty::string()],
        Ty::App(Box::new(Ty::Con("Option".into())), vec![Ty::int()]),
    )));
    define("strLen", Scheme::mono(Ty::func(vec![Ty::string()], Ty::int())));
    define(
        "listLen",
        Scheme {
            vars: vec![("a".into(), star.clone())],
            row_vars: Vec::new(),
            constraints: Vec::new(),
            ty: Ty::func(vec![Ty::list(a())], Ty::int()),
        },
    );
    define(
        "listFlatMap",
        Scheme {
            vars: vec![("a".into(), star.clone()), ("b".into(), star.clone())],
            row_vars: Vec::new(),
            constraints: Vec::new(),
            ty: Ty::func(
                vec![Ty::list(a()), Ty::func(vec![a()], Ty::list(b()))],
                Ty::list(b()),
            ),
        },
    );
    define(
        "listMap",
        Scheme {
            vars: vec![("a".into(), star.clone()), ("b".into(), star.clone())],
            row_vars: Vec::new(),
            constraints: Vec::new(),
            ty: Ty::func(vec![Ty::list(a()), Ty::func(vec![a()], b())], Ty::list(b())),
        },
    );
    define(
        "trap",
        Scheme {
            vars: vec![("a".into(), star.clone())],
            row_vars: Vec::new(),
            constraints: Vec::new(),
            ty: Ty::func(
                vec![Ty::func(Vec::new(), a())],
                Ty::App(
                    Box::new(Ty::Con("Result".into())),
                    vec![Ty::string(), a()],
                ),
            ),
        },
    );
    define(
        "panic",
        Scheme {
            vars: vec![("a".into(), star)],
            row_vars: Vec::new(),
            constraints: Vec::new(),
            ty: Ty::func(vec![Ty::string()], a()),
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_registers_everything() {
        let mut table = SymbolTable::new();
        let mut traits = TraitRegistry::new();
        let mut instances = InstanceDb::new();
        let mut types = TypeRegistry::new();
        install(&mut table, &mut traits, &mut instances, &mut types);

        assert!(types.kind_of("Int").is_some());
        assert_eq!(types.kind_of("List"), Some(&Kind::arrow_chain(1)));
        assert!(types.adt("Result").is_some());
        assert!(table.lookup("Some").is_some());
        assert!(table.lookup("print").is_some());
        assert!(traits.get("Add").is_some());
        assert!(traits.get("Monad").is_some());
        // Four numeric instances per binary trait.
        assert_eq!(instances.instances_of("Add").len(), 4);
        assert_eq!(instances.instances_of("Monad").len(), 3);
    }

    #[test]
    fn ctor_scheme_shapes() {
        let mut table = SymbolTable::new();
        let mut traits = TraitRegistry::new();
        let mut instances = InstanceDb::new();
        let mut types = TypeRegistry::new();
        install(&mut table, &mut traits, &mut instances, &mut types);

        let some = table.lookup("Some").unwrap();
        let scheme = table.symbol(some).scheme.as_ref().unwrap();
        assert_eq!(scheme.to_string(), "forall a. (a) -> Option<a>");

        let none = table.lookup("None").unwrap();
        let scheme = table.symbol(none).scheme.as_ref().unwrap();
        assert_eq!(scheme.to_string(), "forall a. Option<a>");
    }
}
