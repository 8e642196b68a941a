//! Pattern nodes.

use funxy_common::Token;
use num_bigint::BigInt;

use super::{NodeId, TypeExpr};

/// A pattern node.
#[derive(Debug, Clone)]
pub struct Pattern {
    pub id: NodeId,
    pub token: Token,
    pub kind: PatKind,
}

/// Literals that may appear in pattern position.
#[derive(Debug, Clone)]
pub enum PatLit {
    Int(i64),
    BigInt(BigInt),
    Float(f64),
    Bool(bool),
    Char(char),
    Str(String),
    Nil,
}

/// A segment of a string pattern with captures: `"id:${rest}"`.
#[derive(Debug, Clone)]
pub enum StrPatPart {
    /// Literal text that must match exactly.
    Lit(String),
    /// `${name}` -- captures the text between surrounding literals.
    Capture(String),
}

#[derive(Debug, Clone)]
pub enum PatKind {
    /// `_`
    Wildcard,
    /// A literal that must compare equal.
    Literal(PatLit),
    /// A fresh binding.
    Ident(String),
    /// `name: Type` -- binding with an ascription.
    Typed { name: String, ty: TypeExpr },
    /// `Ctor(p, ...)` or bare `Ctor`.
    Ctor { name: String, args: Vec<Pattern> },
    /// `(p, q)`
    Tuple(Vec<Pattern>),
    /// `[p, q, ...rest]`
    List {
        elements: Vec<Pattern>,
        rest: Option<Box<Pattern>>,
    },
    /// `{x, y: p}`; `field: None` binds the field under its own name.
    Record {
        fields: Vec<(String, Option<Pattern>)>,
        /// Whether a trailing `...` allows extra fields.
        open: bool,
    },
    /// A string with `${name}` captures.
    Str(Vec<StrPatPart>),
    /// `^name` -- match against the existing binding's value.
    Pin(String),
}

impl Pattern {
    /// Names bound by this pattern, in left-to-right order.
    pub fn bound_names(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_bound(&mut out);
        out
    }

    fn collect_bound(&self, out: &mut Vec<String>) {
        match &self.kind {
            PatKind::Wildcard | PatKind::Literal(_) | PatKind::Pin(_) => {}
            PatKind::Ident(name) | PatKind::Typed { name, .. } => out.push(name.clone()),
            PatKind::Ctor { args, .. } => {
                for p in args {
                    p.collect_bound(out);
                }
            }
            PatKind::Tuple(ps) => {
                for p in ps {
                    p.collect_bound(out);
                }
            }
            PatKind::List { elements, rest } => {
                for p in elements {
                    p.collect_bound(out);
                }
                if let Some(r) = rest {
                    r.collect_bound(out);
                }
            }
            PatKind::Record { fields, .. } => {
                for (name, sub) in fields {
                    match sub {
                        Some(p) => p.collect_bound(out),
                        None => out.push(name.clone()),
                    }
                }
            }
            PatKind::Str(parts) => {
                for part in parts {
                    if let StrPatPart::Capture(name) = part {
                        out.push(name.clone());
                    }
                }
            }
        }
    }

    /// Whether the pattern matches every value of its type (no refutation).
    pub fn is_irrefutable(&self) -> bool {
        match &self.kind {
            PatKind::Wildcard | PatKind::Ident(_) | PatKind::Typed { .. } => true,
            PatKind::Tuple(ps) => ps.iter().all(|p| p.is_irrefutable()),
            PatKind::Record { fields, .. } => fields
                .iter()
                .all(|(_, sub)| sub.as_ref().map_or(true, |p| p.is_irrefutable())),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use funxy_common::{Span, Token, TokenKind};

    fn tok() -> Token {
        Token::new(TokenKind::IdentLower, Span::new(0, 1), 1, 1)
    }

    fn pat(kind: PatKind) -> Pattern {
        Pattern { id: NodeId(0), token: tok(), kind }
    }

    #[test]
    fn bound_names_walks_nested_patterns() {
        let p = pat(PatKind::Tuple(vec![
            pat(PatKind::Ident("a".into())),
            pat(PatKind::Ctor {
                name: "Some".into(),
                args: vec![pat(PatKind::Ident("b".into()))],
            }),
            pat(PatKind::Pin("c".into())),
        ]));
        assert_eq!(p.bound_names(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn irrefutable_classification() {
        assert!(pat(PatKind::Wildcard).is_irrefutable());
        assert!(pat(PatKind::Tuple(vec![pat(PatKind::Ident("x".into()))])).is_irrefutable());
        assert!(!pat(PatKind::Literal(PatLit::Int(1))).is_irrefutable());
        assert!(!pat(PatKind::Ctor { name: "Some".into(), args: vec![] }).is_irrefutable());
    }
}
