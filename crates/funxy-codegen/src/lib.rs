//! Funxy codegen: the bytecode compiler, bundles, and the versioned
//! `.fbc` serialization format.
//!
//! - [`compile`]: analyzed AST -> [`funxy_runtime::Chunk`]
//! - [`bundle`]: the self-contained executable image
//! - [`serialize`]: the binary wire format (v1 chunk / v2 bundle)

pub mod bundle;
pub mod compile;
pub mod serialize;

pub use bundle::{Bundle, BundledModule};
pub use compile::{compile_module, compile_trait_defaults};
pub use serialize::{
    deserialize_any, deserialize_bundle, serialize_bundle, serialize_chunk, DecodeError,
    EncodeError, Image,
};
