//! The type sub-grammar.
//!
//! Recognizes named types with generic arguments, tuples, records with row
//! variables, function arrows, unions, nullable `T?` (desugared to
//! `T | Nil` on the spot), and `forall` with kind annotations and
//! constraints. `>>` tokens are split when they close nested generics.

use funxy_common::{DiagCode, TokenKind};

use crate::ast::types::{ConstraintExpr, KindExpr, TypeExpr, TypeExprKind, TypeVarDecl};

use super::Parser;

impl<'src> Parser<'src> {
    /// Parse a full type: forall, unions, arrows.
    pub(crate) fn parse_type(&mut self) -> Option<TypeExpr> {
        if self.check(TokenKind::Forall) {
            return self.parse_forall();
        }

        let first = self.parse_type_arrow()?;
        if !self.check(TokenKind::Bar) {
            return Some(first);
        }

        // Union: flatten nested alternatives into one node.
        let token = first.token.clone();
        let mut members = vec![first];
        while self.eat(TokenKind::Bar) {
            self.skip_newlines();
            members.push(self.parse_type_arrow()?);
        }
        Some(TypeExpr {
            id: self.fresh_id(),
            token,
            kind: TypeExprKind::Union(members),
        })
    }

    /// `forall a b. C<a> => T`
    fn parse_forall(&mut self) -> Option<TypeExpr> {
        let token = self.advance(); // `forall`
        let mut vars = Vec::new();
        while self.check(TokenKind::IdentLower) {
            vars.push(self.parse_type_var_decl()?);
        }
        self.expect(TokenKind::Dot, "`.` after forall variables")?;
        self.skip_newlines();

        // Optional constraint list `C<a>, D<b> =>`.
        let constraints = self
            .speculate(|p| {
                let list = p.parse_constraint_list()?;
                if p.eat(TokenKind::FatArrow) {
                    Some(list)
                } else {
                    None
                }
            })
            .unwrap_or_default();
        self.skip_newlines();

        let body = self.parse_type()?;
        Some(TypeExpr {
            id: self.fresh_id(),
            token,
            kind: TypeExprKind::Forall {
                vars,
                constraints,
                body: Box::new(body),
            },
        })
    }

    /// A type variable declaration with an optional kind annotation:
    /// `a`, `f: * -> *`.
    pub(crate) fn parse_type_var_decl(&mut self) -> Option<TypeVarDecl> {
        let token = self.expect(TokenKind::IdentLower, "type variable name")?;
        let name = self.lexeme(&token).to_string();
        let kind = if self.check(TokenKind::Colon) && self.kind_follows() {
            self.advance();
            Some(self.parse_kind()?)
        } else {
            None
        };
        Some(TypeVarDecl { name, kind, token })
    }

    /// Whether the token after a `:` starts a kind expression.
    fn kind_follows(&self) -> bool {
        matches!(self.nth_kind(1), TokenKind::Star | TokenKind::LParen)
    }

    /// A kind: `*` or `K1 -> K2` (right-associative).
    pub(crate) fn parse_kind(&mut self) -> Option<KindExpr> {
        let lhs = match self.peek_kind() {
            TokenKind::Star => {
                self.advance();
                KindExpr::Star
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_kind()?;
                self.expect(TokenKind::RParen, "`)` closing kind")?;
                inner
            }
            _ => {
                self.error_here(DiagCode::P001, "expected kind (`*` or `(`)");
                return None;
            }
        };
        if self.eat(TokenKind::Arrow) {
            let rhs = self.parse_kind()?;
            Some(KindExpr::Arrow(Box::new(lhs), Box::new(rhs)))
        } else {
            Some(lhs)
        }
    }

    /// Comma-separated constraints: `Show<a>, Convert<a, b>`.
    pub(crate) fn parse_constraint_list(&mut self) -> Option<Vec<ConstraintExpr>> {
        let mut out = Vec::new();
        loop {
            out.push(self.parse_constraint()?);
            if !self.eat(TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        Some(out)
    }

    /// One constraint: `Trait` or `Trait<args>`.
    pub(crate) fn parse_constraint(&mut self) -> Option<ConstraintExpr> {
        let token = self.expect(TokenKind::IdentUpper, "trait name")?;
        let trait_name = self.lexeme(&token).to_string();
        let args = if self.check(TokenKind::Lt) {
            self.parse_type_args()?
        } else {
            Vec::new()
        };
        Some(ConstraintExpr { trait_name, args, token })
    }

    /// Arrow layer: `T -> U` (right-associative), `(A, B) -> C`.
    fn parse_type_arrow(&mut self) -> Option<TypeExpr> {
        // A parenthesized list is either function params or a tuple/group,
        // decided by whether `->` follows.
        if self.check(TokenKind::LParen) {
            let token = self.advance();
            self.skip_newlines();
            let mut items = Vec::new();
            if !self.check(TokenKind::RParen) {
                loop {
                    items.push(self.parse_type()?);
                    self.skip_newlines();
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                    self.skip_newlines();
                }
            }
            self.expect(TokenKind::RParen, "`)`")?;

            if self.eat(TokenKind::Arrow) {
                self.skip_newlines();
                let ret = self.parse_type_arrow()?;
                return Some(TypeExpr {
                    id: self.fresh_id(),
                    token,
                    kind: TypeExprKind::Func { params: items, ret: Box::new(ret) },
                });
            }

            let base = if items.len() == 1 {
                items.into_iter().next().unwrap()
            } else {
                TypeExpr {
                    id: self.fresh_id(),
                    token: token.clone(),
                    kind: TypeExprKind::Tuple(items),
                }
            };
            return Some(self.apply_nullable(base));
        }

        let lhs = self.parse_type_postfix()?;
        if self.eat(TokenKind::Arrow) {
            self.skip_newlines();
            let ret = self.parse_type_arrow()?;
            let token = lhs.token.clone();
            return Some(TypeExpr {
                id: self.fresh_id(),
                token,
                kind: TypeExprKind::Func { params: vec![lhs], ret: Box::new(ret) },
            });
        }
        Some(lhs)
    }

    /// Primary type plus `?` nullable postfix.
    pub(crate) fn parse_type_postfix(&mut self) -> Option<TypeExpr> {
        let base = self.parse_type_primary()?;
        Some(self.apply_nullable(base))
    }

    /// Wrap in `T | Nil` for each trailing `?`.
    fn apply_nullable(&mut self, mut base: TypeExpr) -> TypeExpr {
        while self.check(TokenKind::Question) {
            let token = self.advance();
            let nil = TypeExpr {
                id: self.fresh_id(),
                token: token.clone(),
                kind: TypeExprKind::Named { name: "Nil".to_string(), args: Vec::new() },
            };
            base = TypeExpr {
                id: self.fresh_id(),
                token: base.token.clone(),
                kind: TypeExprKind::Union(vec![base, nil]),
            };
        }
        base
    }

    fn parse_type_primary(&mut self) -> Option<TypeExpr> {
        match self.peek_kind() {
            TokenKind::IdentUpper | TokenKind::IdentLower => {
                let token = self.advance();
                let name = self.lexeme(&token).to_string();
                let args = if self.check(TokenKind::Lt) {
                    self.parse_type_args()?
                } else {
                    Vec::new()
                };
                Some(TypeExpr {
                    id: self.fresh_id(),
                    token,
                    kind: TypeExprKind::Named { name, args },
                })
            }
            TokenKind::Nil => {
                let token = self.advance();
                Some(TypeExpr {
                    id: self.fresh_id(),
                    token,
                    kind: TypeExprKind::Named { name: "Nil".to_string(), args: Vec::new() },
                })
            }
            TokenKind::LBrace => self.parse_record_type(),
            TokenKind::Forall => self.parse_forall(),
            _ => {
                let found = self.lexeme_of_current().to_string();
                self.error_here(DiagCode::P001, format!("expected type, found `{found}`"));
                None
            }
        }
    }

    /// `{x: Int, y: Bool | r}`; empty `{}` is the empty closed record.
    fn parse_record_type(&mut self) -> Option<TypeExpr> {
        let token = self.advance(); // `{`
        self.skip_newlines();
        let mut fields = Vec::new();
        let mut row = None;

        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Bar) {
            let name_token = self.expect(TokenKind::IdentLower, "record field name")?;
            let name = self.lexeme(&name_token).to_string();
            self.expect(TokenKind::Colon, "`:` after field name")?;
            self.skip_newlines();
            let field_ty = self.parse_type()?;
            fields.push((name, field_ty));
            self.skip_newlines();
            if !self.eat(TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }

        if self.eat(TokenKind::Bar) {
            self.skip_newlines();
            let row_token = self.expect(TokenKind::IdentLower, "row variable name")?;
            row = Some(self.lexeme(&row_token).to_string());
            self.skip_newlines();
        }

        self.expect(TokenKind::RBrace, "`}` closing record type")?;
        Some(TypeExpr {
            id: self.fresh_id(),
            token,
            kind: TypeExprKind::Record { fields, row },
        })
    }

    /// Angle-bracket type arguments `<T, U>`, splitting a closing `>>`.
    pub(crate) fn parse_type_args(&mut self) -> Option<Vec<TypeExpr>> {
        self.expect(TokenKind::Lt, "`<`")?;
        self.skip_newlines();
        let mut args = Vec::new();
        if !self.check(TokenKind::Gt) && !self.check(TokenKind::Shr) {
            loop {
                args.push(self.parse_type()?);
                self.skip_newlines();
                if !self.eat(TokenKind::Comma) {
                    break;
                }
                self.skip_newlines();
            }
        }
        self.close_angle()?;
        Some(args)
    }

    /// Consume a closing `>`, splitting `>>` in half when nested generics
    /// close together.
    pub(crate) fn close_angle(&mut self) -> Option<()> {
        match self.peek_kind() {
            TokenKind::Gt => {
                self.advance();
                Some(())
            }
            TokenKind::Shr => {
                self.split_shr();
                Some(())
            }
            _ => {
                self.expect(TokenKind::Gt, "`>` closing type arguments")?;
                None
            }
        }
    }
}
