//! Funxy runtime: values, the tree-walk evaluator, and the bytecode VM.
//!
//! Both backends consume the analyzer's dictionary-passing elaboration:
//! functions with constraints grow implicit dictionary parameters, call
//! sites supply them, and trait-method dispatch indexes a dictionary
//! value. The evaluator walks the analyzed AST directly; the VM executes
//! [`chunk::Chunk`]s produced by the compiler crate.

pub mod chunk;
pub mod eval;
pub mod native;
pub mod value;
pub mod vm;

pub use chunk::{Chunk, CompiledFunction, Const, DictConst, DictEntry, Op, PendingImport};
pub use eval::{Env, Evaluator, ExecPlan, TreeClosure};
pub use value::{compare_values, concat_values, values_equal, ErrorValue, Value};
pub use vm::{Vm, VmClosure, MAX_FRAMES, MAX_STACK};
