//! The Funxy driver library: the pipeline behind the `funxyc` binary.
//!
//! Exposes `compile_source` -> `run_bundle` (bytecode backend) and
//! `evaluate_module` (tree-walk backend) for embedding and for tests.

pub mod pipeline;

pub use pipeline::{
    analyze_program, analyze_program_with, compile_source, evaluate_module, run_bundle,
    run_file, AnalyzedProgram, BackendKind, PipelineError,
};
