//! Declaration parsing: functions, traits, instances, type declarations.

use funxy_common::{DiagCode, TokenKind};

use crate::ast::types::{ConstraintExpr, TypeExpr, TypeExprKind, TypeVarDecl};
use crate::ast::{
    CtorDecl, FunctionDecl, InstanceDecl, TraitDecl, TraitMethod, TypeDecl, TypeDeclBody,
};

use super::Parser;

impl<'src> Parser<'src> {
    /// `fun name<a: Show, ...>(params) [-> T] { ... }`
    pub(crate) fn parse_function_decl(&mut self) -> Option<FunctionDecl> {
        let token = self.advance(); // `fun`
        let name_token = self.expect(TokenKind::IdentLower, "function name")?;
        let name = self.lexeme(&name_token).to_string();

        let (type_params, constraints) = if self.check(TokenKind::Lt) {
            self.parse_type_param_list()?
        } else {
            (Vec::new(), Vec::new())
        };

        let (params, ret) = self.parse_fn_signature()?;

        // Allow the body brace on the next line.
        if self.check(TokenKind::Newline) && self.peek_past_newlines() == TokenKind::LBrace {
            self.skip_newlines();
        }
        let body = self.parse_block();

        Some(FunctionDecl {
            id: self.fresh_id(),
            token,
            name,
            type_params,
            constraints,
            params,
            ret,
            body,
        })
    }

    /// `<a, b: Show, f: * -> *>` -- type parameters with inline kind
    /// annotations or constraint bounds (`a: Show + Eq`).
    pub(crate) fn parse_type_param_list(
        &mut self,
    ) -> Option<(Vec<TypeVarDecl>, Vec<ConstraintExpr>)> {
        self.expect(TokenKind::Lt, "`<`")?;
        self.skip_newlines();
        let mut vars = Vec::new();
        let mut constraints = Vec::new();

        while !self.check(TokenKind::Gt) && !self.check(TokenKind::Shr) {
            let name_token = self.expect(TokenKind::IdentLower, "type parameter name")?;
            let name = self.lexeme(&name_token).to_string();
            let mut kind = None;

            if self.eat(TokenKind::Colon) {
                if matches!(self.peek_kind(), TokenKind::Star | TokenKind::LParen) {
                    kind = Some(self.parse_kind()?);
                } else {
                    // Constraint bounds: `a: Show + Convert<a, b>`.
                    loop {
                        let mut constraint = self.parse_constraint()?;
                        if constraint.args.is_empty() {
                            // `a: Show` means `Show<a>`.
                            constraint.args.push(TypeExpr {
                                id: self.fresh_id(),
                                token: name_token.clone(),
                                kind: TypeExprKind::Named {
                                    name: name.clone(),
                                    args: Vec::new(),
                                },
                            });
                        }
                        constraints.push(constraint);
                        if !self.eat(TokenKind::Plus) {
                            break;
                        }
                        self.skip_newlines();
                    }
                }
            }

            vars.push(TypeVarDecl { name, kind, token: name_token });
            self.skip_newlines();
            if !self.eat(TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.close_angle()?;
        Some((vars, constraints))
    }

    /// `trait Name<a, ...> [: Super + ...] [| a -> b, ...] { fun sig... }`
    pub(crate) fn parse_trait_decl(&mut self) -> Option<TraitDecl> {
        let token = self.advance(); // `trait`
        let name_token = self.expect(TokenKind::IdentUpper, "trait name")?;
        let name = self.lexeme(&name_token).to_string();

        let params = if self.check(TokenKind::Lt) {
            self.parse_trait_params()?
        } else {
            Vec::new()
        };

        let mut supers = Vec::new();
        if self.eat(TokenKind::Colon) {
            loop {
                let s = self.expect(TokenKind::IdentUpper, "super-trait name")?;
                supers.push(self.lexeme(&s).to_string());
                if !self.eat(TokenKind::Plus) {
                    break;
                }
                self.skip_newlines();
            }
        }

        let mut fundeps = Vec::new();
        if self.eat(TokenKind::Bar) {
            loop {
                let mut lhs = Vec::new();
                while self.check(TokenKind::IdentLower) {
                    let t = self.advance();
                    lhs.push(self.lexeme(&t).to_string());
                }
                self.expect(TokenKind::Arrow, "`->` in functional dependency")?;
                let mut rhs = Vec::new();
                while self.check(TokenKind::IdentLower) {
                    let t = self.advance();
                    rhs.push(self.lexeme(&t).to_string());
                }
                if lhs.is_empty() || rhs.is_empty() {
                    self.error_here(
                        DiagCode::P006,
                        "functional dependency needs variables on both sides of `->`",
                    );
                    return None;
                }
                fundeps.push((lhs, rhs));
                if !self.eat(TokenKind::Comma) {
                    break;
                }
                self.skip_newlines();
            }
        }

        self.expect(TokenKind::LBrace, "`{` opening trait body")?;
        self.skip_newlines();

        let mut methods = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            match self.parse_trait_method() {
                Some(method) => methods.push(method),
                None => {
                    self.recover_to_stmt_boundary();
                    if matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Semicolon) {
                        self.advance();
                    }
                }
            }
            self.skip_newlines();
        }
        self.expect(TokenKind::RBrace, "`}` closing trait body")?;

        Some(TraitDecl {
            id: self.fresh_id(),
            token,
            name,
            params,
            supers,
            fundeps,
            methods,
        })
    }

    /// Trait parameter list `<a, f: * -> *>` (kinds only, no bounds).
    fn parse_trait_params(&mut self) -> Option<Vec<TypeVarDecl>> {
        self.expect(TokenKind::Lt, "`<`")?;
        self.skip_newlines();
        let mut params = Vec::new();
        while !self.check(TokenKind::Gt) && !self.check(TokenKind::Shr) {
            params.push(self.parse_type_var_decl()?);
            self.skip_newlines();
            if !self.eat(TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.close_angle()?;
        Some(params)
    }

    /// `fun name(params) [-> T] [{ default body }]`
    fn parse_trait_method(&mut self) -> Option<TraitMethod> {
        let token = self.expect(TokenKind::Fun, "`fun` starting a trait method")?;
        let name_token = self.expect(TokenKind::IdentLower, "method name")?;
        let name = self.lexeme(&name_token).to_string();
        let (params, ret) = self.parse_fn_signature()?;

        let default_body = if self.check(TokenKind::LBrace) {
            Some(self.parse_block())
        } else {
            None
        };

        Some(TraitMethod {
            id: self.fresh_id(),
            token,
            name,
            params,
            ret,
            default_body,
        })
    }

    /// `instance Name TypeArg... { fun ... }`
    pub(crate) fn parse_instance_decl(&mut self) -> Option<InstanceDecl> {
        let token = self.advance(); // `instance`
        let name_token = self.expect(TokenKind::IdentUpper, "trait name after `instance`")?;
        let trait_name = self.lexeme(&name_token).to_string();

        let mut args = Vec::new();
        while !self.check(TokenKind::LBrace) && !self.check(TokenKind::Eof) {
            args.push(self.parse_instance_arg()?);
        }
        if args.is_empty() {
            self.error_at(DiagCode::P006, &token, "instance declaration needs a type argument");
        }

        self.expect(TokenKind::LBrace, "`{` opening instance body")?;
        self.skip_newlines();

        let mut methods = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            if self.check(TokenKind::Fun) {
                match self.parse_function_decl() {
                    Some(decl) => methods.push(decl),
                    None => {
                        self.recover_to_stmt_boundary();
                        if matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Semicolon) {
                            self.advance();
                        }
                    }
                }
            } else {
                self.error_here(DiagCode::P001, "expected `fun` inside instance body");
                self.recover_to_stmt_boundary();
                if matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Semicolon) {
                    self.advance();
                }
            }
            self.skip_newlines();
        }
        self.expect(TokenKind::RBrace, "`}` closing instance body")?;

        Some(InstanceDecl {
            id: self.fresh_id(),
            token,
            trait_name,
            args,
            methods,
        })
    }

    /// One space-separated instance argument: a named type with optional
    /// generic arguments, or a parenthesized type.
    fn parse_instance_arg(&mut self) -> Option<TypeExpr> {
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
            TokenKind::LParen => {
                self.advance();
                self.skip_newlines();
                let ty = self.parse_type()?;
                self.skip_newlines();
                self.expect(TokenKind::RParen, "`)` closing instance argument")?;
                Some(ty)
            }
            TokenKind::Nil => {
                let token = self.advance();
                Some(TypeExpr {
                    id: self.fresh_id(),
                    token,
                    kind: TypeExprKind::Named { name: "Nil".to_string(), args: Vec::new() },
                })
            }
            _ => {
                let found = self.lexeme_of_current().to_string();
                self.error_here(
                    DiagCode::P001,
                    format!("expected instance type argument, found `{found}`"),
                );
                None
            }
        }
    }

    /// `type alias Name<a> = T` or `type Name<a> = Ctor ... | Ctor2 ...`
    pub(crate) fn parse_type_decl(&mut self) -> Option<TypeDecl> {
        let token = self.advance(); // `type`
        let is_alias = self.eat(TokenKind::Alias);

        let name_token = self.expect(TokenKind::IdentUpper, "type name")?;
        let name = self.lexeme(&name_token).to_string();

        let params = if self.check(TokenKind::Lt) {
            self.parse_trait_params()?
        } else {
            Vec::new()
        };

        self.expect(TokenKind::Eq, "`=` in type declaration")?;
        self.skip_newlines();

        let body = if is_alias {
            TypeDeclBody::Alias(self.parse_type()?)
        } else {
            let mut ctors = Vec::new();
            loop {
                ctors.push(self.parse_ctor_decl()?);
                self.skip_newlines_before_bar();
                if !self.eat(TokenKind::Bar) {
                    break;
                }
                self.skip_newlines();
            }
            TypeDeclBody::Adt(ctors)
        };

        Some(TypeDecl {
            id: self.fresh_id(),
            token,
            name,
            params,
            body,
        })
    }

    /// Skip newlines only when the next significant token is a `|`
    /// continuing the constructor list.
    fn skip_newlines_before_bar(&mut self) {
        if self.check(TokenKind::Newline) && self.peek_past_newlines() == TokenKind::Bar {
            self.skip_newlines();
        }
    }

    /// `Ctor`, `Ctor T T` (ML-style), or `Ctor(T, T)` (C-style).
    fn parse_ctor_decl(&mut self) -> Option<CtorDecl> {
        let token = self.expect(TokenKind::IdentUpper, "constructor name")?;
        let name = self.lexeme(&token).to_string();
        let mut fields = Vec::new();

        if self.check(TokenKind::LParen) {
            // C-style: comma-separated field types. A single parenthesized
            // argument is one field; tuples require `Ctor((A, B))`.
            self.advance();
            self.skip_newlines();
            if !self.check(TokenKind::RParen) {
                loop {
                    fields.push(self.parse_type()?);
                    self.skip_newlines();
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                    self.skip_newlines();
                }
            }
            self.expect(TokenKind::RParen, "`)` closing constructor fields")?;
        } else {
            // ML-style: space-separated type atoms until `|` or end.
            loop {
                match self.peek_kind() {
                    TokenKind::IdentUpper | TokenKind::IdentLower => {
                        let t = self.advance();
                        let field_name = self.lexeme(&t).to_string();
                        let args = if self.check(TokenKind::Lt) {
                            self.parse_type_args()?
                        } else {
                            Vec::new()
                        };
                        fields.push(TypeExpr {
                            id: self.fresh_id(),
                            token: t,
                            kind: TypeExprKind::Named { name: field_name, args },
                        });
                    }
                    TokenKind::Nil => {
                        let t = self.advance();
                        fields.push(TypeExpr {
                            id: self.fresh_id(),
                            token: t,
                            kind: TypeExprKind::Named { name: "Nil".to_string(), args: Vec::new() },
                        });
                    }
                    TokenKind::LParen => {
                        self.advance();
                        self.skip_newlines();
                        let ty = self.parse_type()?;
                        self.skip_newlines();
                        self.expect(TokenKind::RParen, "`)`")?;
                        fields.push(ty);
                    }
                    TokenKind::LBrace => {
                        // Record field type; unions cannot appear unbracketed
                        // here (`|` separates constructors).
                        fields.push(self.parse_type_postfix()?);
                    }
                    _ => break,
                }
            }
        }

        Some(CtorDecl {
            id: self.fresh_id(),
            token,
            name,
            fields,
        })
    }
}
