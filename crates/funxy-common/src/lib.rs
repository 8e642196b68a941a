//! Shared foundation types for the Funxy compiler.
//!
//! Every pipeline stage speaks in terms of the types defined here:
//!
//! - [`span`]: byte-offset spans and the line index used to turn them into
//!   1-based line/column pairs
//! - [`token`]: the token vocabulary produced by the lexer
//! - [`diag`]: diagnostics with stable codes, the accumulating sink, and
//!   both plain and ariadne rendering

pub mod diag;
pub mod span;
pub mod token;

pub use diag::{DiagCode, Diagnostic, DiagnosticSink, Severity};
pub use span::{LineIndex, Span};
pub use token::{Token, TokenKind};
