//! Diagnostics with stable codes.
//!
//! Compiler stages never abort on user errors: they push [`Diagnostic`]
//! values into a [`DiagnosticSink`] and keep going. Codes are stable
//! four-character identifiers (`P...` parser, `A...` analyzer, `R...` runtime)
//! so tests and tooling can match on them across releases.

use std::fmt;

use serde::Serialize;

use crate::span::Span;

/// Stable diagnostic codes.
///
/// The numbering is part of the compiler's public contract; new codes are
/// appended, existing codes never change meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DiagCode {
    // ── Parser ─────────────────────────────────────────────────────────
    /// Unexpected token.
    P001,
    /// Invalid assignment target.
    P002,
    /// Literal conversion failure (reserved).
    P003,
    /// No prefix parse rule / illegal token.
    P004,
    /// Expected closing token.
    P005,
    /// General syntax error with a custom message.
    P006,
    /// Index assignment unsupported.
    P007,

    // ── Analyzer ───────────────────────────────────────────────────────
    /// Unknown identifier.
    A001,
    /// Duplicate declaration.
    A002,
    /// Import error: unknown path or unexported symbol.
    A003,
    /// Type mismatch.
    A004,
    /// Occurs check: infinite type.
    A005,
    /// Kind error.
    A006,
    /// No instance for a constraint.
    A007,
    /// Ambiguous constraint or instance.
    A008,
    /// Arity mismatch.
    A009,
    /// Invalid operation (const reassignment, import cycle, ...).
    A010,

    // ── Runtime ────────────────────────────────────────────────────────
    /// Pattern match failure.
    R001,
    /// Division by zero.
    R002,
    /// Arithmetic overflow.
    R003,
    /// Index out of bounds.
    R004,
    /// Missing field or key.
    R005,
    /// Explicit panic.
    R006,
    /// Stack overflow (frame or operand budget exceeded).
    R007,
    /// Type error at runtime (bad operand).
    R008,
    /// Absent trait method.
    R009,
    /// Uncaught user error.
    R010,
}

impl DiagCode {
    /// The four-character code string.
    pub fn as_str(self) -> &'static str {
        match self {
            DiagCode::P001 => "P001",
            DiagCode::P002 => "P002",
            DiagCode::P003 => "P003",
            DiagCode::P004 => "P004",
            DiagCode::P005 => "P005",
            DiagCode::P006 => "P006",
            DiagCode::P007 => "P007",
            DiagCode::A001 => "A001",
            DiagCode::A002 => "A002",
            DiagCode::A003 => "A003",
            DiagCode::A004 => "A004",
            DiagCode::A005 => "A005",
            DiagCode::A006 => "A006",
            DiagCode::A007 => "A007",
            DiagCode::A008 => "A008",
            DiagCode::A009 => "A009",
            DiagCode::A010 => "A010",
            DiagCode::R001 => "R001",
            DiagCode::R002 => "R002",
            DiagCode::R003 => "R003",
            DiagCode::R004 => "R004",
            DiagCode::R005 => "R005",
            DiagCode::R006 => "R006",
            DiagCode::R007 => "R007",
            DiagCode::R008 => "R008",
            DiagCode::R009 => "R009",
            DiagCode::R010 => "R010",
        }
    }
}

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Error,
    Warning,
}

/// A single diagnostic: code, position, message.
///
/// Line and column are 1-based and precomputed at construction time so the
/// diagnostic is self-contained for plain rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub code: DiagCode,
    pub severity: Severity,
    pub file: String,
    pub span: Span,
    pub line: u32,
    pub col: u32,
    pub message: String,
}

impl Diagnostic {
    /// Create an error diagnostic.
    pub fn error(
        code: DiagCode,
        file: impl Into<String>,
        span: Span,
        line: u32,
        col: u32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            severity: Severity::Error,
            file: file.into(),
            span,
            line,
            col,
            message: message.into(),
        }
    }

    /// Create a warning diagnostic.
    pub fn warning(
        code: DiagCode,
        file: impl Into<String>,
        span: Span,
        line: u32,
        col: u32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(code, file, span, line, col, message)
        }
    }

    /// The stable plain rendering used in tests and scripted consumers:
    /// `- <file>:<line>:<col>: [<code>] <message>`.
    pub fn render_plain(&self) -> String {
        format!(
            "- {}:{}:{}: [{}] {}",
            self.file, self.line, self.col, self.code, self.message
        )
    }

    /// Render a labeled ariadne report to a string, for human consumption.
    pub fn render_pretty(&self, source: &str) -> String {
        use ariadne::{Config, Label, Report, ReportKind, Source};

        let kind = match self.severity {
            Severity::Error => ReportKind::Error,
            Severity::Warning => ReportKind::Warning,
        };
        let range = {
            let start = self.span.start as usize;
            let end = (self.span.end as usize).max(start + 1);
            start..end
        };
        let mut buf = Vec::new();
        let _ = Report::<std::ops::Range<usize>>::build(kind, range.clone())
            .with_config(Config::default().with_color(false))
            .with_code(self.code.as_str())
            .with_message(&self.message)
            .with_label(Label::new(range).with_message(&self.message))
            .finish()
            .write(Source::from(source), &mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// An accumulating diagnostic sink.
///
/// Stages push in encounter order; the driver decides whether to continue
/// the pipeline based on [`DiagnosticSink::has_errors`].
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    diags: Vec<Diagnostic>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push one diagnostic.
    pub fn push(&mut self, diag: Diagnostic) {
        self.diags.push(diag);
    }

    /// Append every diagnostic from another sink, preserving order.
    pub fn absorb(&mut self, other: DiagnosticSink) {
        self.diags.extend(other.diags);
    }

    /// Whether any error-severity diagnostic has been recorded.
    pub fn has_errors(&self) -> bool {
        self.diags.iter().any(|d| d.severity == Severity::Error)
    }

    /// All recorded diagnostics in encounter order.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diags
    }

    /// Number of recorded diagnostics.
    pub fn len(&self) -> usize {
        self.diags.len()
    }

    /// Whether the sink is empty.
    pub fn is_empty(&self) -> bool {
        self.diags.is_empty()
    }

    /// Consume the sink, yielding its diagnostics.
    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.diags
    }

    /// Drop diagnostics recorded past `len`. Used by speculative parses to
    /// roll back messages from an abandoned attempt.
    pub fn truncate(&mut self, len: usize) {
        self.diags.truncate(len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Diagnostic {
        Diagnostic::error(DiagCode::A004, "main.fx", Span::new(10, 14), 2, 5, "type mismatch")
    }

    #[test]
    fn plain_rendering_is_stable() {
        assert_eq!(sample().render_plain(), "- main.fx:2:5: [A004] type mismatch");
    }

    #[test]
    fn sink_tracks_error_presence() {
        let mut sink = DiagnosticSink::new();
        assert!(!sink.has_errors());
        sink.push(Diagnostic::warning(
            DiagCode::A010,
            "main.fx",
            Span::new(0, 1),
            1,
            1,
            "non-exhaustive match",
        ));
        assert!(!sink.has_errors());
        sink.push(sample());
        assert!(sink.has_errors());
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn codes_round_trip_through_display() {
        assert_eq!(DiagCode::P007.to_string(), "P007");
        assert_eq!(DiagCode::R010.as_str(), "R010");
    }
}
