//! Funxy semantic analyzer: Hindley-Milner inference with type classes.
//!
//! Four passes (naming -> headers -> instances -> bodies) over the ordered
//! files of a module produce a finalized type map, a resolution map, and
//! the dictionary-passing elaboration both backends consume.
//!
//! # Architecture
//!
//! - [`ty`]: type and kind representation, schemes, constraints
//! - [`unify`]: the `ena`-backed unification engine with rows and unions
//! - [`scope`]: symbol table and scope tree
//! - [`registry`]: named types (primitives, ADTs, aliases)
//! - [`traits`]: trait registry, instance database, instance selection
//! - [`builtins`]: the ambient language environment
//! - [`exhaustiveness`]: match coverage analysis
//! - [`infer`]: the pass driver and inference walker

pub mod builtins;
pub mod exhaustiveness;
pub mod infer;
pub mod registry;
pub mod scope;
pub mod traits;
pub mod ty;
pub mod unify;

pub use infer::{
    analyze, analyze_with_imports, Analysis, AnalyzerOptions, ImportContext, MethodRef,
    ModuleExports, WitnessSource,
};
pub use registry::TypeRegistry;
pub use scope::{ScopeKind, Symbol, SymbolId, SymbolKind, SymbolTable};
pub use traits::{InstanceDb, InstanceId, MethodImpl, TraitRegistry};
pub use ty::{Constraint, Kind, Scheme, Ty, TyVar};
