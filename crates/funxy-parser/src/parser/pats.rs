//! The pattern sub-grammar.

use funxy_common::{DiagCode, TokenKind};

use crate::ast::pat::{PatKind, PatLit, Pattern, StrPatPart};

use super::lit::{self, IntParse, RawSegment};
use super::Parser;

impl<'src> Parser<'src> {
    /// Parse a pattern. Pushes diagnostics on malformed input and returns
    /// `None`; callers either recover or run under [`Parser::speculate`].
    pub(crate) fn parse_pattern(&mut self) -> Option<Pattern> {
        let token = self.peek().clone();
        match self.peek_kind() {
            // `_` wildcard, plain binding, or `name: Type`.
            TokenKind::IdentLower => {
                self.advance();
                let name = self.lexeme(&token).to_string();
                if name == "_" {
                    return Some(Pattern {
                        id: self.fresh_id(),
                        token,
                        kind: PatKind::Wildcard,
                    });
                }
                if self.check(TokenKind::Colon) {
                    self.advance();
                    let ty = self.parse_type()?;
                    return Some(Pattern {
                        id: self.fresh_id(),
                        token,
                        kind: PatKind::Typed { name, ty },
                    });
                }
                Some(Pattern {
                    id: self.fresh_id(),
                    token,
                    kind: PatKind::Ident(name),
                })
            }

            // Constructor, with optional parenthesized sub-patterns.
            TokenKind::IdentUpper => {
                self.advance();
                let name = self.lexeme(&token).to_string();
                let mut args = Vec::new();
                if self.check(TokenKind::LParen) {
                    self.advance();
                    self.skip_newlines();
                    if !self.check(TokenKind::RParen) {
                        loop {
                            args.push(self.parse_pattern()?);
                            self.skip_newlines();
                            if !self.eat(TokenKind::Comma) {
                                break;
                            }
                            self.skip_newlines();
                        }
                    }
                    self.expect(TokenKind::RParen, "`)` closing constructor pattern")?;
                }
                Some(Pattern {
                    id: self.fresh_id(),
                    token,
                    kind: PatKind::Ctor { name, args },
                })
            }

            // `^name` pin.
            TokenKind::Caret => {
                self.advance();
                let name_token = self.expect(TokenKind::IdentLower, "name after `^`")?;
                let name = self.lexeme(&name_token).to_string();
                Some(Pattern {
                    id: self.fresh_id(),
                    token,
                    kind: PatKind::Pin(name),
                })
            }

            // Tuple or grouping.
            TokenKind::LParen => {
                self.advance();
                self.skip_newlines();
                let mut items = Vec::new();
                if !self.check(TokenKind::RParen) {
                    loop {
                        items.push(self.parse_pattern()?);
                        self.skip_newlines();
                        if !self.eat(TokenKind::Comma) {
                            break;
                        }
                        self.skip_newlines();
                    }
                }
                self.expect(TokenKind::RParen, "`)` closing tuple pattern")?;
                if items.len() == 1 {
                    return items.into_iter().next();
                }
                Some(Pattern {
                    id: self.fresh_id(),
                    token,
                    kind: PatKind::Tuple(items),
                })
            }

            // List with optional `...rest`.
            TokenKind::LBracket => {
                self.advance();
                self.skip_newlines();
                let mut elements = Vec::new();
                let mut rest = None;
                while !self.check(TokenKind::RBracket) {
                    if self.check(TokenKind::Ellipsis) {
                        let rest_token = self.advance();
                        let rest_pat = if self.check(TokenKind::IdentLower) {
                            self.parse_pattern()?
                        } else {
                            Pattern {
                                id: self.fresh_id(),
                                token: rest_token,
                                kind: PatKind::Wildcard,
                            }
                        };
                        rest = Some(Box::new(rest_pat));
                        self.skip_newlines();
                        break;
                    }
                    elements.push(self.parse_pattern()?);
                    self.skip_newlines();
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                    self.skip_newlines();
                }
                self.expect(TokenKind::RBracket, "`]` closing list pattern")?;
                Some(Pattern {
                    id: self.fresh_id(),
                    token,
                    kind: PatKind::List { elements, rest },
                })
            }

            // Record pattern `{x, y: p, ...}`.
            TokenKind::LBrace => {
                self.advance();
                self.skip_newlines();
                let mut fields = Vec::new();
                let mut open = false;
                while !self.check(TokenKind::RBrace) {
                    if self.check(TokenKind::Ellipsis) {
                        self.advance();
                        open = true;
                        self.skip_newlines();
                        break;
                    }
                    let name_token =
                        self.expect(TokenKind::IdentLower, "record field name")?;
                    let name = self.lexeme(&name_token).to_string();
                    let sub = if self.eat(TokenKind::Colon) {
                        self.skip_newlines();
                        Some(self.parse_pattern()?)
                    } else {
                        None
                    };
                    fields.push((name, sub));
                    self.skip_newlines();
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                    self.skip_newlines();
                }
                self.expect(TokenKind::RBrace, "`}` closing record pattern")?;
                Some(Pattern {
                    id: self.fresh_id(),
                    token,
                    kind: PatKind::Record { fields, open },
                })
            }

            // String pattern, possibly with `${name}` captures.
            TokenKind::Str => {
                self.advance();
                self.parse_str_pattern(token)
            }
            TokenKind::RawStr => {
                self.advance();
                let content = lit::strip_quotes(self.lexeme(&token)).to_string();
                Some(Pattern {
                    id: self.fresh_id(),
                    token,
                    kind: PatKind::Literal(PatLit::Str(content)),
                })
            }

            // Literals.
            TokenKind::Int | TokenKind::BigIntLit => {
                self.advance();
                self.int_pattern(token, false)
            }
            TokenKind::Float => {
                self.advance();
                let value = match lit::parse_float_lexeme(self.lexeme(&token)) {
                    Ok(v) => v,
                    Err(msg) => {
                        self.error_at(DiagCode::P006, &token, msg);
                        return None;
                    }
                };
                Some(Pattern {
                    id: self.fresh_id(),
                    token,
                    kind: PatKind::Literal(PatLit::Float(value)),
                })
            }
            TokenKind::Minus => {
                self.advance();
                let num = self.peek().clone();
                match num.kind {
                    TokenKind::Int | TokenKind::BigIntLit => {
                        self.advance();
                        self.int_pattern_negated(token, num)
                    }
                    TokenKind::Float => {
                        self.advance();
                        let value = match lit::parse_float_lexeme(self.lexeme(&num)) {
                            Ok(v) => -v,
                            Err(msg) => {
                                self.error_at(DiagCode::P006, &num, msg);
                                return None;
                            }
                        };
                        Some(Pattern {
                            id: self.fresh_id(),
                            token,
                            kind: PatKind::Literal(PatLit::Float(value)),
                        })
                    }
                    _ => {
                        self.error_at(DiagCode::P001, &num, "expected number after `-` in pattern");
                        None
                    }
                }
            }
            TokenKind::Char => {
                self.advance();
                let value = match lit::decode_char(self.lexeme(&token)) {
                    Ok(c) => c,
                    Err(msg) => {
                        self.error_at(DiagCode::P006, &token, msg);
                        return None;
                    }
                };
                Some(Pattern {
                    id: self.fresh_id(),
                    token,
                    kind: PatKind::Literal(PatLit::Char(value)),
                })
            }
            TokenKind::True | TokenKind::False => {
                let is_true = self.peek_kind() == TokenKind::True;
                self.advance();
                Some(Pattern {
                    id: self.fresh_id(),
                    token,
                    kind: PatKind::Literal(PatLit::Bool(is_true)),
                })
            }
            TokenKind::Nil => {
                self.advance();
                Some(Pattern {
                    id: self.fresh_id(),
                    token,
                    kind: PatKind::Literal(PatLit::Nil),
                })
            }

            _ => {
                let found = self.lexeme_of_current().to_string();
                self.error_here(DiagCode::P001, format!("expected pattern, found `{found}`"));
                None
            }
        }
    }

    fn int_pattern(
        &mut self,
        token: funxy_common::Token,
        negate: bool,
    ) -> Option<Pattern> {
        let lexeme = self.lexeme(&token).to_string();
        match lit::parse_int_lexeme(&lexeme) {
            Ok(IntParse::Small(v)) => Some(Pattern {
                id: self.fresh_id(),
                token,
                kind: PatKind::Literal(PatLit::Int(if negate { -v } else { v })),
            }),
            Ok(IntParse::Big(b)) => Some(Pattern {
                id: self.fresh_id(),
                token,
                kind: PatKind::Literal(PatLit::BigInt(if negate { -b } else { b })),
            }),
            Err(msg) => {
                self.error_at(DiagCode::P006, &token, msg);
                None
            }
        }
    }

    fn int_pattern_negated(
        &mut self,
        minus_token: funxy_common::Token,
        num_token: funxy_common::Token,
    ) -> Option<Pattern> {
        let lexeme = self.lexeme(&num_token).to_string();
        match lit::parse_int_lexeme(&lexeme) {
            Ok(IntParse::Small(v)) => Some(Pattern {
                id: self.fresh_id(),
                token: minus_token,
                kind: PatKind::Literal(PatLit::Int(-v)),
            }),
            Ok(IntParse::Big(b)) => Some(Pattern {
                id: self.fresh_id(),
                token: minus_token,
                kind: PatKind::Literal(PatLit::BigInt(-b)),
            }),
            Err(msg) => {
                self.error_at(DiagCode::P006, &num_token, msg);
                None
            }
        }
    }

    /// A string pattern. Interpolation segments must be bare identifiers;
    /// they become captures.
    fn parse_str_pattern(&mut self, token: funxy_common::Token) -> Option<Pattern> {
        let raw = lit::strip_quotes(self.lexeme(&token)).to_string();
        let segments = lit::segment_interpolation(&raw);

        let mut parts = Vec::new();
        let mut has_capture = false;
        for segment in segments {
            match segment {
                RawSegment::Lit(text) => match lit::decode_escapes(&text) {
                    Ok(decoded) => parts.push(StrPatPart::Lit(decoded)),
                    Err(msg) => {
                        self.error_at(DiagCode::P006, &token, msg);
                        return None;
                    }
                },
                RawSegment::Expr { text, .. } => {
                    let name = text.trim();
                    let valid = !name.is_empty()
                        && name.chars().next().is_some_and(|c| c.is_lowercase() || c == '_')
                        && name.chars().all(|c| c.is_alphanumeric() || c == '_');
                    if !valid {
                        self.error_at(
                            DiagCode::P006,
                            &token,
                            "string pattern interpolations must be plain identifiers",
                        );
                        return None;
                    }
                    has_capture = true;
                    parts.push(StrPatPart::Capture(name.to_string()));
                }
            }
        }

        if !has_capture {
            let text = parts
                .into_iter()
                .map(|p| match p {
                    StrPatPart::Lit(t) => t,
                    StrPatPart::Capture(_) => unreachable!(),
                })
                .collect::<String>();
            return Some(Pattern {
                id: self.fresh_id(),
                token,
                kind: PatKind::Literal(PatLit::Str(text)),
            });
        }

        Some(Pattern {
            id: self.fresh_id(),
            token,
            kind: PatKind::Str(parts),
        })
    }
}
