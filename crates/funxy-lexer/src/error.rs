use std::fmt;

use serde::Serialize;

use funxy_common::Span;

/// A lexer error with location information.
///
/// Errors are collected during lexing rather than aborting; the offending
/// region also produces an `Illegal` token so the parser can surface the
/// problem as a positioned diagnostic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LexError {
    pub kind: LexErrorKind,
    pub span: Span,
}

impl LexError {
    pub fn new(kind: LexErrorKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// The specific kind of lexer error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum LexErrorKind {
    /// An unexpected character was encountered.
    UnexpectedCharacter(char),
    /// A string literal was not closed before end of input.
    UnterminatedString,
    /// A `${...}` interpolation was not closed before the string ended.
    UnterminatedInterpolation,
    /// A character literal was malformed or unterminated.
    MalformedChar,
    /// A block comment (`/* ... */`) was not closed before end of input.
    UnterminatedBlockComment,
    /// A bytes or bits literal was not closed or used a bad prefix.
    MalformedBinaryLiteral,
    /// A number literal had a radix prefix but no digits.
    InvalidNumberLiteral(String),
}

impl fmt::Display for LexErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedCharacter(c) => write!(f, "unexpected character: {c:?}"),
            Self::UnterminatedString => write!(f, "unterminated string literal"),
            Self::UnterminatedInterpolation => {
                write!(f, "unterminated string interpolation")
            }
            Self::MalformedChar => write!(f, "malformed character literal"),
            Self::UnterminatedBlockComment => write!(f, "unterminated block comment"),
            Self::MalformedBinaryLiteral => write!(f, "malformed bytes or bits literal"),
            Self::InvalidNumberLiteral(s) => write!(f, "invalid number literal: {s}"),
        }
    }
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for LexError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lex_error_display() {
        let err = LexError::new(LexErrorKind::UnexpectedCharacter('~'), Span::new(0, 1));
        assert_eq!(err.to_string(), "unexpected character: '~'");
        assert_eq!(
            LexErrorKind::InvalidNumberLiteral("0x".into()).to_string(),
            "invalid number literal: 0x"
        );
    }
}
