//! Bundles: a self-contained executable image of a compiled program.

use std::collections::BTreeMap;
use std::rc::Rc;

use funxy_runtime::chunk::{Chunk, CompiledFunction, PendingImport};

/// One compiled module inside a bundle.
#[derive(Debug, Clone, Default)]
pub struct BundledModule {
    /// Virtual modules and package groups carry no chunk.
    pub chunk: Option<Chunk>,
    pub pending_imports: Vec<PendingImport>,
    /// Exported names, for import filtering at load time.
    pub exports: Vec<String>,
    pub dir: String,
    pub is_package_group: bool,
    pub sub_module_paths: Vec<String>,
    /// Trait name -> method names, for dictionary reconstruction.
    pub traits: BTreeMap<String, Vec<String>>,
}

/// A serialized program: main chunk, its modules, trait defaults, and
/// embedded resources.
#[derive(Debug, Clone, Default)]
pub struct Bundle {
    pub main_chunk: Chunk,
    /// Modules keyed by their import path (relative or virtual).
    pub modules: BTreeMap<String, BundledModule>,
    /// Compiled trait default bodies, keyed `Trait.method`.
    pub trait_defaults: BTreeMap<String, Rc<CompiledFunction>>,
    /// Embedded resources (opaque to the core).
    pub resources: BTreeMap<String, Vec<u8>>,
    pub source_file: String,
}
