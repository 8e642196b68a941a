//! The Pratt expression parser and parse-time desugarings.
//!
//! Binding-power tables drive infix parsing; postfix operations (call,
//! index, member, type application, trailing blocks) bind tightest.
//! `do`-blocks, list comprehensions, and compound assignment are desugared
//! here into plain AST forms.

use funxy_common::{DiagCode, Token, TokenKind};
use funxy_lexer::Lexer;

use crate::ast::expr::{
    BinOp, Block, Expr, ExprKind, FunctionLit, InterpPart, MatchArm, Param, UnOp,
};
use crate::ast::pat::{PatKind, Pattern};
use crate::ast::{Stmt, StmtKind};

use super::lit::{self, IntParse, RawSegment};
use super::Parser;

/// Binding power of prefix operators.
const PREFIX_BP: u8 = 29;
/// Binding power of postfix operations (call/index/member/type app).
const POSTFIX_BP: u8 = 31;

/// Returns `(left_bp, right_bp, op)` for infix operator tokens.
///
/// Left < right is left-associative; left > right is right-associative.
fn infix_binding_power(kind: TokenKind) -> Option<(u8, u8, BinOp)> {
    let entry = match kind {
        // `$` low-precedence application, right-associative.
        TokenKind::Dollar => (4, 3, BinOp::Apply),
        TokenKind::PipePipe => (5, 6, BinOp::Or),
        TokenKind::AmpAmp => (7, 8, BinOp::And),
        TokenKind::EqEq => (9, 10, BinOp::Eq),
        TokenKind::NotEq => (9, 10, BinOp::Ne),
        TokenKind::Lt => (11, 12, BinOp::Lt),
        TokenKind::Gt => (11, 12, BinOp::Gt),
        TokenKind::LtEq => (11, 12, BinOp::Le),
        TokenKind::GtEq => (11, 12, BinOp::Ge),
        // Concat family.
        TokenKind::Diamond => (15, 16, BinOp::Combine),
        TokenKind::Bar => (15, 16, BinOp::Alt),
        TokenKind::PlusPlus => (15, 16, BinOp::Concat),
        // Pipe and monadic bind.
        TokenKind::PipeGt => (17, 18, BinOp::Pipe),
        TokenKind::Bind => (17, 18, BinOp::Bind),
        // Additive (shifts share the level).
        TokenKind::Plus => (19, 20, BinOp::Add),
        TokenKind::Minus => (19, 20, BinOp::Sub),
        TokenKind::Shr => (19, 20, BinOp::Shr),
        // Multiplicative.
        TokenKind::Star => (21, 22, BinOp::Mul),
        TokenKind::Slash => (21, 22, BinOp::Div),
        TokenKind::Percent => (21, 22, BinOp::Rem),
        // Power, right-associative.
        TokenKind::StarStar => (24, 23, BinOp::Pow),
        // Cons, right-associative.
        TokenKind::ColonColon => (26, 25, BinOp::Cons),
        // Composition, right-associative.
        TokenKind::CommaComma => (28, 27, BinOp::Compose),
        _ => return None,
    };
    Some(entry)
}

/// Operators that continue an expression across a newline when they lead
/// the next line.
fn is_continuation(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::PipeGt | TokenKind::PlusPlus | TokenKind::CommaComma | TokenKind::Dollar
    )
}

impl<'src> Parser<'src> {
    /// Build an expression node with a fresh id.
    pub(crate) fn mk(&mut self, token: Token, kind: ExprKind) -> Expr {
        Expr { id: self.fresh_id(), token, kind }
    }

    /// Parse a full expression (lowest binding power).
    pub(crate) fn parse_expr_entry(&mut self) -> Expr {
        self.parse_expr_bp(0)
    }

    /// The core Pratt loop.
    pub(crate) fn parse_expr_bp(&mut self, min_bp: u8) -> Expr {
        if !self.enter_depth() {
            self.leave_depth();
            let token = self.peek().clone();
            self.recover_to_stmt_boundary();
            return self.mk(token, ExprKind::Nil);
        }

        let mut lhs = self.parse_prefix();

        loop {
            // Newlines end the expression unless the next line leads with a
            // continuation operator.
            if self.check(TokenKind::Newline) {
                if is_continuation(self.peek_past_newlines()) {
                    self.skip_newlines();
                } else {
                    break;
                }
            }

            let kind = self.peek_kind();

            // Postfix: call, index, member, type application, trailing block.
            if POSTFIX_BP >= min_bp {
                match kind {
                    TokenKind::LParen => {
                        lhs = self.parse_call(lhs);
                        continue;
                    }
                    TokenKind::LBracket => {
                        let token = self.advance();
                        self.skip_newlines();
                        let index = self.parse_expr_bp(0);
                        self.skip_newlines();
                        self.expect(TokenKind::RBracket, "`]` closing index");
                        lhs = self.mk(
                            token,
                            ExprKind::Index { obj: Box::new(lhs), index: Box::new(index) },
                        );
                        continue;
                    }
                    TokenKind::Dot => {
                        let token = self.advance();
                        let name = match self.peek_kind() {
                            TokenKind::IdentLower | TokenKind::IdentUpper => {
                                let t = self.advance();
                                self.lexeme(&t).to_string()
                            }
                            _ => {
                                self.error_here(DiagCode::P001, "expected member name after `.`");
                                String::new()
                            }
                        };
                        lhs = self.mk(token, ExprKind::Member { obj: Box::new(lhs), name });
                        continue;
                    }
                    TokenKind::Lt if matches!(lhs.kind, ExprKind::Ident(_) | ExprKind::Member { .. }) => {
                        // Explicit type application: `f<Int>(x)`. Only taken
                        // when the angle-bracket list closes and a call
                        // follows; otherwise `<` is a comparison.
                        if let Some(args) = self.speculate(|p| {
                            let args = p.parse_type_args()?;
                            if p.check(TokenKind::LParen) {
                                Some(args)
                            } else {
                                None
                            }
                        }) {
                            let token = lhs.token.clone();
                            lhs = self.mk(token, ExprKind::TypeApp { expr: Box::new(lhs), args });
                            continue;
                        }
                    }
                    TokenKind::LBrace if !self.no_block_call => {
                        if let Some(new_lhs) = self.parse_trailing_block(lhs.clone()) {
                            lhs = new_lhs;
                            continue;
                        } else {
                            break;
                        }
                    }
                    _ => {}
                }
            }

            // Assignment (right-associative, lowest precedence).
            if kind == TokenKind::Eq && min_bp <= 2 {
                let token = self.advance();
                self.skip_newlines();
                let value = self.parse_expr_bp(1);
                lhs = self.finish_assign(token, lhs, value);
                continue;
            }

            // Compound assignment desugars to `target = target op value`.
            if let Some(op) = compound_op(kind) {
                if min_bp <= 2 {
                    let token = self.advance();
                    self.skip_newlines();
                    let value = self.parse_expr_bp(1);
                    lhs = self.desugar_compound_assign(token, lhs, op, value);
                    continue;
                }
            }

            // Range: `a..b`, between comparison and the concat family.
            if kind == TokenKind::DotDot {
                if 13 < min_bp {
                    break;
                }
                let token = self.advance();
                self.skip_newlines();
                let end = self.parse_expr_bp(14);
                lhs = self.mk(
                    token,
                    ExprKind::Range { start: Box::new(lhs), end: Box::new(end) },
                );
                continue;
            }

            // Inside `[...]`, `|` separates comprehension clauses.
            if kind == TokenKind::Bar && self.no_alt {
                break;
            }

            // Type ascription `expr: Type`, only at statement-ish positions.
            if kind == TokenKind::Colon && min_bp == 0 {
                if let Some(ty) = self.speculate(|p| {
                    p.advance();
                    p.parse_type()
                }) {
                    let token = lhs.token.clone();
                    lhs = self.mk(token, ExprKind::Annotated { expr: Box::new(lhs), ty });
                    continue;
                }
                break;
            }

            let Some((l_bp, r_bp, op)) = infix_binding_power(kind) else {
                break;
            };
            if l_bp < min_bp {
                break;
            }

            let token = self.advance();
            self.skip_newlines();
            let rhs = self.parse_expr_bp(r_bp);
            lhs = self.mk(
                token,
                ExprKind::Infix { op, lhs: Box::new(lhs), rhs: Box::new(rhs) },
            );
        }

        self.leave_depth();
        lhs
    }

    /// Validate an assignment target and build the node.
    fn finish_assign(&mut self, token: Token, target: Expr, value: Expr) -> Expr {
        match &target.kind {
            ExprKind::Ident(_) => {}
            ExprKind::Annotated { expr, .. } if matches!(expr.kind, ExprKind::Ident(_)) => {}
            ExprKind::Index { .. } => {
                self.error_at(
                    DiagCode::P007,
                    &token,
                    "index assignment is not supported; containers are immutable",
                );
            }
            _ => {
                self.error_at(DiagCode::P002, &token, "invalid assignment target");
            }
        }
        self.mk(
            token,
            ExprKind::Assign { target: Box::new(target), value: Box::new(value) },
        )
    }

    /// `x op= e` -> `x = x op e`. The duplicated reference gets a fresh id.
    fn desugar_compound_assign(
        &mut self,
        token: Token,
        target: Expr,
        op: BinOp,
        value: Expr,
    ) -> Expr {
        let ExprKind::Ident(name) = &target.kind else {
            self.error_at(DiagCode::P002, &token, "invalid assignment target");
            return self.mk(
                token,
                ExprKind::Assign { target: Box::new(target), value: Box::new(value) },
            );
        };
        let reread = self.mk(target.token.clone(), ExprKind::Ident(name.clone()));
        let combined = self.mk(
            token.clone(),
            ExprKind::Infix { op, lhs: Box::new(reread), rhs: Box::new(value) },
        );
        self.mk(
            token,
            ExprKind::Assign { target: Box::new(target), value: Box::new(combined) },
        )
    }

    // ── Prefix & primary ───────────────────────────────────────────────

    fn parse_prefix(&mut self) -> Expr {
        let token = self.peek().clone();
        match self.peek_kind() {
            TokenKind::Minus => {
                self.advance();
                let rhs = self.parse_expr_bp(PREFIX_BP);
                self.mk(token, ExprKind::Prefix { op: UnOp::Neg, rhs: Box::new(rhs) })
            }
            TokenKind::Bang => {
                self.advance();
                let rhs = self.parse_expr_bp(PREFIX_BP);
                self.mk(token, ExprKind::Prefix { op: UnOp::Not, rhs: Box::new(rhs) })
            }
            TokenKind::Ellipsis => {
                self.advance();
                let rhs = self.parse_expr_bp(PREFIX_BP);
                self.mk(token, ExprKind::Spread(Box::new(rhs)))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Expr {
        let token = self.peek().clone();
        match self.peek_kind() {
            TokenKind::Int | TokenKind::BigIntLit => {
                self.advance();
                let lexeme = self.lexeme(&token).to_string();
                match lit::parse_int_lexeme(&lexeme) {
                    Ok(IntParse::Small(v)) => self.mk(token, ExprKind::Int(v)),
                    Ok(IntParse::Big(b)) => self.mk(token, ExprKind::BigInt(b)),
                    Err(msg) => {
                        self.error_at(DiagCode::P006, &token, msg);
                        self.mk(token, ExprKind::Nil)
                    }
                }
            }
            TokenKind::RationalLit => {
                self.advance();
                let lexeme = self.lexeme(&token).to_string();
                match lit::parse_rational_lexeme(&lexeme) {
                    Ok(r) => self.mk(token, ExprKind::Rational(r)),
                    Err(msg) => {
                        self.error_at(DiagCode::P006, &token, msg);
                        self.mk(token, ExprKind::Nil)
                    }
                }
            }
            TokenKind::Float => {
                self.advance();
                let lexeme = self.lexeme(&token).to_string();
                match lit::parse_float_lexeme(&lexeme) {
                    Ok(v) => self.mk(token, ExprKind::Float(v)),
                    Err(msg) => {
                        self.error_at(DiagCode::P006, &token, msg);
                        self.mk(token, ExprKind::Nil)
                    }
                }
            }
            TokenKind::True => {
                self.advance();
                self.mk(token, ExprKind::Bool(true))
            }
            TokenKind::False => {
                self.advance();
                self.mk(token, ExprKind::Bool(false))
            }
            TokenKind::Nil => {
                self.advance();
                self.mk(token, ExprKind::Nil)
            }
            TokenKind::Char => {
                self.advance();
                match lit::decode_char(self.lexeme(&token)) {
                    Ok(c) => self.mk(token, ExprKind::Char(c)),
                    Err(msg) => {
                        self.error_at(DiagCode::P006, &token, msg);
                        self.mk(token, ExprKind::Nil)
                    }
                }
            }
            TokenKind::Str => {
                self.advance();
                self.parse_interpolated_string(token)
            }
            TokenKind::RawStr => {
                self.advance();
                let content = lit::strip_quotes(self.lexeme(&token)).to_string();
                self.mk(token, ExprKind::Str(content))
            }
            TokenKind::Bytes(base) => {
                self.advance();
                let raw = self.lexeme(&token);
                // Strip the prefix (`@`, `@x`, `@b`) and quotes.
                let payload = lit::strip_quotes(raw.trim_start_matches(['@', 'x', 'b']));
                match lit::decode_bytes(base, payload) {
                    Ok(bytes) => self.mk(token, ExprKind::Bytes(bytes)),
                    Err(msg) => {
                        self.error_at(DiagCode::P006, &token, msg);
                        self.mk(token, ExprKind::Nil)
                    }
                }
            }
            TokenKind::Bits(base) => {
                self.advance();
                let raw = self.lexeme(&token);
                let payload = lit::strip_quotes(raw.trim_start_matches(['#', 'b', 'x', 'o']));
                match lit::decode_bits(base, payload) {
                    Ok((data, len)) => self.mk(token, ExprKind::Bits { data, len }),
                    Err(msg) => {
                        self.error_at(DiagCode::P006, &token, msg);
                        self.mk(token, ExprKind::Nil)
                    }
                }
            }
            TokenKind::IdentLower | TokenKind::IdentUpper => {
                self.advance();
                let name = self.lexeme(&token).to_string();
                self.mk(token, ExprKind::Ident(name))
            }
            TokenKind::LParen => self.parse_paren(),
            TokenKind::LBracket => self.parse_list_or_comprehension(),
            TokenKind::MapOpen => self.parse_map(),
            TokenKind::LBrace => {
                if self.looks_like_record() {
                    self.parse_record()
                } else {
                    self.parse_block()
                }
            }
            TokenKind::Backslash => self.parse_lambda(),
            TokenKind::Fun => self.parse_fun_literal(),
            TokenKind::If => self.parse_if(),
            TokenKind::Match => self.parse_match(),
            TokenKind::For => self.parse_for(),
            TokenKind::Do => self.parse_do(),
            TokenKind::Illegal => {
                let t = self.advance();
                self.report_illegal(&t);
                self.mk(token, ExprKind::Nil)
            }
            _ => {
                let found = self.lexeme_of_current().to_string();
                self.error_here(
                    DiagCode::P004,
                    format!("no expression can start with `{found}`"),
                );
                self.advance();
                self.mk(token, ExprKind::Nil)
            }
        }
    }

    // ── Strings ────────────────────────────────────────────────────────

    /// Re-lex and parse the `${...}` segments of an interpolated string.
    fn parse_interpolated_string(&mut self, token: Token) -> Expr {
        let raw = lit::strip_quotes(self.lexeme(&token)).to_string();
        let content_base = token.span.start + 1;
        let segments = lit::segment_interpolation(&raw);

        let mut parts = Vec::new();
        let mut any_expr = false;
        for segment in segments {
            match segment {
                RawSegment::Lit(text) => match lit::decode_escapes(&text) {
                    Ok(decoded) => parts.push(InterpPart::Lit(decoded)),
                    Err(msg) => {
                        self.error_at(DiagCode::P006, &token, msg);
                    }
                },
                RawSegment::Expr { offset, text } => {
                    any_expr = true;
                    let base = content_base + offset as u32;
                    let expr = self.parse_embedded_expr(base, &text);
                    parts.push(InterpPart::Expr(Box::new(expr)));
                }
            }
        }

        if !any_expr {
            let text = parts
                .into_iter()
                .map(|p| match p {
                    InterpPart::Lit(t) => t,
                    InterpPart::Expr(_) => unreachable!(),
                })
                .collect::<String>();
            return self.mk(token, ExprKind::Str(text));
        }
        self.mk(token, ExprKind::InterpStr(parts))
    }

    /// Lex `text` (a `${...}` body) and parse it as one expression, with all
    /// token positions shifted to the original file coordinates.
    fn parse_embedded_expr(&mut self, base_offset: u32, text: &str) -> Expr {
        let (mut tokens, _lex_errors) = Lexer::tokenize(text);
        for t in &mut tokens {
            t.span.start += base_offset;
            t.span.end += base_offset;
            let (line, col) = self.position_of(t.span);
            t.line = line;
            t.col = col;
        }

        let saved_tokens = std::mem::replace(&mut self.tokens, tokens);
        let saved_pos = std::mem::replace(&mut self.pos, 0);

        self.skip_newlines();
        let expr = self.parse_expr_entry();
        self.skip_newlines();
        if !self.check(TokenKind::Eof) {
            self.error_here(DiagCode::P006, "unexpected trailing tokens in interpolation");
        }

        self.tokens = saved_tokens;
        self.pos = saved_pos;
        expr
    }

    // ── Bracketed forms ────────────────────────────────────────────────

    /// `()`, `(e)`, `(a, b)`.
    fn parse_paren(&mut self) -> Expr {
        let token = self.advance();
        self.skip_newlines();
        if self.check(TokenKind::RParen) {
            self.advance();
            return self.mk(token, ExprKind::Tuple(Vec::new()));
        }
        let saved_alt = std::mem::replace(&mut self.no_alt, false);
        let saved_block = std::mem::replace(&mut self.no_block_call, false);
        let result = self.parse_paren_tail(token);
        self.no_alt = saved_alt;
        self.no_block_call = saved_block;
        result
    }

    fn parse_paren_tail(&mut self, token: Token) -> Expr {
        let first = self.parse_expr_bp(0);
        self.skip_newlines();
        if self.eat(TokenKind::Comma) {
            let mut items = vec![first];
            self.skip_newlines();
            while !self.check(TokenKind::RParen) {
                items.push(self.parse_expr_bp(0));
                self.skip_newlines();
                if !self.eat(TokenKind::Comma) {
                    break;
                }
                self.skip_newlines();
            }
            self.expect(TokenKind::RParen, "`)` closing tuple");
            return self.mk(token, ExprKind::Tuple(items));
        }
        self.expect(TokenKind::RParen, "`)`");
        first
    }

    /// `[a, b]` or `[out | pat <- iter, cond]`.
    fn parse_list_or_comprehension(&mut self) -> Expr {
        let token = self.advance(); // `[`
        self.skip_newlines();
        if self.check(TokenKind::RBracket) {
            self.advance();
            return self.mk(token, ExprKind::List(Vec::new()));
        }

        let saved_alt = std::mem::replace(&mut self.no_alt, true);
        let saved_block = std::mem::replace(&mut self.no_block_call, false);
        let result = self.parse_list_tail(token);
        self.no_alt = saved_alt;
        self.no_block_call = saved_block;
        result
    }

    fn parse_list_tail(&mut self, token: Token) -> Expr {
        let first = self.parse_expr_bp(0);
        self.skip_newlines();

        if self.check(TokenKind::Bar) {
            self.advance();
            return self.parse_comprehension(token, first);
        }

        let mut items = vec![first];
        while self.eat(TokenKind::Comma) {
            self.skip_newlines();
            if self.check(TokenKind::RBracket) {
                break;
            }
            items.push(self.parse_expr_bp(0));
            self.skip_newlines();
        }
        self.expect(TokenKind::RBracket, "`]` closing list");
        self.mk(token, ExprKind::List(items))
    }

    /// `%{k: v, ...}` map literal.
    fn parse_map(&mut self) -> Expr {
        let token = self.advance(); // `%{`
        self.skip_newlines();
        let saved_alt = std::mem::replace(&mut self.no_alt, false);
        let mut entries = Vec::new();
        while !self.check(TokenKind::RBrace) {
            // Keys at bp 3: the `:` belongs to the map entry, not to a
            // type ascription.
            let key = self.parse_expr_bp(3);
            self.expect(TokenKind::Colon, "`:` between map key and value");
            self.skip_newlines();
            let value = self.parse_expr_bp(0);
            entries.push((key, value));
            self.skip_newlines();
            if !self.eat(TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.no_alt = saved_alt;
        self.expect(TokenKind::RBrace, "`}` closing map");
        self.mk(token, ExprKind::Map(entries))
    }

    /// Whether a `{` at the current position opens a record literal:
    /// first significant content is `ident :` or `...`.
    pub(crate) fn looks_like_record(&self) -> bool {
        debug_assert!(self.check(TokenKind::LBrace));
        let mut idx = self.pos + 1;
        while idx < self.tokens.len() && self.tokens[idx].kind == TokenKind::Newline {
            idx += 1;
        }
        match self.tokens.get(idx).map(|t| t.kind) {
            Some(TokenKind::Ellipsis) => true,
            Some(TokenKind::IdentLower) => {
                matches!(self.tokens.get(idx + 1).map(|t| t.kind), Some(TokenKind::Colon))
            }
            _ => false,
        }
    }

    /// `{x: 1, ...base}` record literal.
    fn parse_record(&mut self) -> Expr {
        let token = self.advance(); // `{`
        self.skip_newlines();
        let mut fields = Vec::new();
        let mut spread = None;
        while !self.check(TokenKind::RBrace) {
            if self.check(TokenKind::Ellipsis) {
                self.advance();
                let base = self.parse_expr_bp(0);
                spread = Some(Box::new(base));
            } else {
                let name_token = match self.expect(TokenKind::IdentLower, "record field name") {
                    Some(t) => t,
                    None => {
                        self.recover_to_stmt_boundary();
                        break;
                    }
                };
                let name = self.lexeme(&name_token).to_string();
                self.expect(TokenKind::Colon, "`:` after record field name");
                self.skip_newlines();
                let value = self.parse_expr_bp(0);
                fields.push((name, value));
            }
            self.skip_newlines();
            if !self.eat(TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.expect(TokenKind::RBrace, "`}` closing record");
        self.mk(token, ExprKind::Record { fields, spread })
    }

    /// `{ stmt... }` block expression.
    pub(crate) fn parse_block(&mut self) -> Expr {
        let token = self.peek().clone();
        self.expect(TokenKind::LBrace, "`{`");
        let saved = self.no_block_call;
        let saved_alt = std::mem::replace(&mut self.no_alt, false);
        self.no_block_call = false;
        let mut stmts = Vec::new();
        loop {
            self.skip_newlines();
            if self.check(TokenKind::RBrace) || self.check(TokenKind::Eof) {
                break;
            }
            if let Some(stmt) = self.parse_stmt() {
                stmts.push(stmt);
            } else {
                // parse_stmt already recovered; consume the boundary token
                // if it is a separator to guarantee progress.
                if matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Semicolon | TokenKind::Comma) {
                    self.advance();
                } else if !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
                    self.advance();
                }
            }
        }
        self.expect(TokenKind::RBrace, "`}` closing block");
        self.no_block_call = saved;
        self.no_alt = saved_alt;
        self.mk(token, ExprKind::Block(Block { stmts }))
    }

    // ── Functions ──────────────────────────────────────────────────────

    /// `\x, y -> expr` lambda.
    fn parse_lambda(&mut self) -> Expr {
        let token = self.advance(); // `\`
        let mut params = Vec::new();
        if !self.check(TokenKind::Arrow) {
            loop {
                let p_token = match self.expect(TokenKind::IdentLower, "lambda parameter") {
                    Some(t) => t,
                    None => break,
                };
                let name = self.lexeme(&p_token).to_string();
                let ty = if self.check(TokenKind::Colon) {
                    self.advance();
                    self.parse_type()
                } else {
                    None
                };
                params.push(Param {
                    id: self.fresh_id(),
                    token: p_token,
                    name,
                    ty,
                    default: None,
                    variadic: false,
                });
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::Arrow, "`->` after lambda parameters");
        self.skip_newlines();
        let body = self.parse_expr_bp(3);
        self.mk(
            token,
            ExprKind::Lambda(FunctionLit {
                type_params: Vec::new(),
                constraints: Vec::new(),
                params,
                ret: None,
                body: Box::new(body),
            }),
        )
    }

    /// `fun(params) [-> T] { ... }` anonymous function literal.
    fn parse_fun_literal(&mut self) -> Expr {
        let token = self.advance(); // `fun`
        let (params, ret) = match self.parse_fn_signature() {
            Some(sig) => sig,
            None => {
                self.recover_to_stmt_boundary();
                return self.mk(token, ExprKind::Nil);
            }
        };
        let body = self.parse_block();
        self.mk(
            token,
            ExprKind::Lambda(FunctionLit {
                type_params: Vec::new(),
                constraints: Vec::new(),
                params,
                ret,
                body: Box::new(body),
            }),
        )
    }

    /// `(p: T = d, ..., ...rest) [-> T]` -- shared by named functions,
    /// anonymous literals, and trait methods.
    pub(crate) fn parse_fn_signature(
        &mut self,
    ) -> Option<(Vec<Param>, Option<crate::ast::TypeExpr>)> {
        self.expect(TokenKind::LParen, "`(` starting parameter list")?;
        self.skip_newlines();
        let mut params = Vec::new();
        while !self.check(TokenKind::RParen) {
            let variadic = self.eat(TokenKind::Ellipsis);
            let p_token = self.expect(TokenKind::IdentLower, "parameter name")?;
            let name = self.lexeme(&p_token).to_string();
            let ty = if self.eat(TokenKind::Colon) {
                Some(self.parse_type()?)
            } else {
                None
            };
            let default = if self.eat(TokenKind::Eq) {
                Some(self.parse_expr_bp(3))
            } else {
                None
            };
            params.push(Param {
                id: self.fresh_id(),
                token: p_token,
                name,
                ty,
                default,
                variadic,
            });
            self.skip_newlines();
            if !self.eat(TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.expect(TokenKind::RParen, "`)` closing parameter list")?;
        let ret = if self.eat(TokenKind::Arrow) {
            Some(self.parse_type()?)
        } else {
            None
        };
        Some((params, ret))
    }

    // ── Control flow ───────────────────────────────────────────────────

    /// `if cond { ... } [else { ... } | else if ...]`.
    fn parse_if(&mut self) -> Expr {
        let token = self.advance(); // `if`
        let saved = self.no_block_call;
        self.no_block_call = true;
        let cond = self.parse_expr_bp(0);
        self.no_block_call = saved;

        let then_branch = self.parse_block();
        let else_branch = if self.peek_past_newlines() == TokenKind::Else {
            self.skip_newlines();
            self.advance(); // `else`
            if self.check(TokenKind::If) {
                Some(Box::new(self.parse_if()))
            } else {
                Some(Box::new(self.parse_block()))
            }
        } else {
            None
        };

        self.mk(
            token,
            ExprKind::If {
                cond: Box::new(cond),
                then_branch: Box::new(then_branch),
                else_branch,
            },
        )
    }

    /// `match scrut { pat [if guard] -> body, ... }`.
    fn parse_match(&mut self) -> Expr {
        let token = self.advance(); // `match`
        let saved = self.no_block_call;
        self.no_block_call = true;
        let scrutinee = self.parse_expr_bp(0);
        self.no_block_call = saved;

        self.expect(TokenKind::LBrace, "`{` opening match arms");
        self.skip_newlines();

        let mut arms = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            match self.parse_match_arm() {
                Some(arm) => arms.push(arm),
                None => {
                    self.recover_to_stmt_boundary();
                    if matches!(self.peek_kind(), TokenKind::Comma | TokenKind::Newline) {
                        self.advance();
                    }
                }
            }
            self.skip_newlines();
            if self.eat(TokenKind::Comma) {
                self.skip_newlines();
            }
        }
        self.expect(TokenKind::RBrace, "`}` closing match");

        if arms.is_empty() {
            self.error_at(DiagCode::P006, &token, "match expression has no arms");
        }

        self.mk(token, ExprKind::Match { scrutinee: Box::new(scrutinee), arms })
    }

    fn parse_match_arm(&mut self) -> Option<MatchArm> {
        let pat = self.parse_pattern()?;
        let guard = if self.check(TokenKind::If) {
            self.advance();
            let saved = self.no_block_call;
            self.no_block_call = true;
            let g = self.parse_expr_bp(0);
            self.no_block_call = saved;
            Some(g)
        } else {
            None
        };
        self.expect(TokenKind::Arrow, "`->` after match pattern")?;
        self.skip_newlines();
        let body = self.parse_expr_bp(3);
        Some(MatchArm { id: self.fresh_id(), pat, guard, body })
    }

    /// `for pat in iter { ... }`.
    fn parse_for(&mut self) -> Expr {
        let token = self.advance(); // `for`
        let pat = match self.parse_pattern() {
            Some(p) => p,
            None => {
                self.recover_to_stmt_boundary();
                return self.mk(token, ExprKind::Nil);
            }
        };
        self.expect(TokenKind::In, "`in` after for pattern");
        let saved = self.no_block_call;
        self.no_block_call = true;
        let iter = self.parse_expr_bp(0);
        self.no_block_call = saved;
        let body = self.parse_block();
        self.mk(
            token,
            ExprKind::For { pat, iter: Box::new(iter), body: Box::new(body) },
        )
    }

    // ── do-notation ────────────────────────────────────────────────────

    /// `do { x <- m; pat <- m; k :- v; expr }` desugared to `>>=` chains.
    fn parse_do(&mut self) -> Expr {
        let token = self.advance(); // `do`
        self.expect(TokenKind::LBrace, "`{` opening do block");
        self.skip_newlines();

        enum DoItem {
            Bind(Pattern, Expr),
            Local(String, Token, Expr),
            Bare(Expr),
        }

        let mut items = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            let item_token = self.peek().clone();
            // `pat <- m` generator?
            if let Some((pat, m)) = self.speculate(|p| {
                let pat = p.parse_pattern()?;
                if !p.check(TokenKind::LArrow) {
                    return None;
                }
                p.advance();
                p.skip_newlines();
                let m = p.parse_expr_entry();
                Some((pat, m))
            }) {
                items.push(DoItem::Bind(pat, m));
            } else if self.check(TokenKind::IdentLower)
                && self.nth_kind(1) == TokenKind::ColonDash
            {
                let name_token = self.advance();
                let name = self.lexeme(&name_token).to_string();
                self.advance(); // `:-`
                self.skip_newlines();
                let value = self.parse_expr_entry();
                items.push(DoItem::Local(name, item_token, value));
            } else {
                items.push(DoItem::Bare(self.parse_expr_entry()));
            }

            self.skip_newlines();
            if self.eat(TokenKind::Semicolon) {
                self.skip_newlines();
            }
        }
        self.expect(TokenKind::RBrace, "`}` closing do block");

        let Some(last) = items.pop() else {
            self.error_at(DiagCode::P006, &token, "do block must contain an expression");
            return self.mk(token, ExprKind::Nil);
        };
        let mut result = match last {
            DoItem::Bare(e) => e,
            DoItem::Bind(pat, m) => {
                let at = pat.token.clone();
                self.error_at(
                    DiagCode::P006,
                    &at,
                    "do block must end with an expression, not a binding",
                );
                m
            }
            DoItem::Local(_, t, v) => {
                self.error_at(
                    DiagCode::P006,
                    &t,
                    "do block must end with an expression, not a binding",
                );
                v
            }
        };

        for item in items.into_iter().rev() {
            result = match item {
                // `x <- m; rest` -> `m >>= \x -> rest`
                DoItem::Bind(pat, m) => {
                    let bind_token = pat.token.clone();
                    match pat.kind {
                        PatKind::Ident(name) => {
                            self.bind_chain(bind_token, m, name, result)
                        }
                        _ => {
                            // `pat <- m; rest` ->
                            // `m >>= \$t -> { pat = $t; rest }`
                            let tmp = self.gensym("t");
                            let tmp_ref = self.mk(
                                bind_token.clone(),
                                ExprKind::Ident(tmp.clone()),
                            );
                            let body_token = bind_token.clone();
                            let assign_stmt = Stmt {
                                id: self.fresh_id(),
                                token: bind_token.clone(),
                                kind: StmtKind::ConstPattern { pat, value: tmp_ref },
                            };
                            let rest_stmt = Stmt {
                                id: self.fresh_id(),
                                token: result.token.clone(),
                                kind: StmtKind::Expr(result),
                            };
                            let block = self.mk(
                                body_token.clone(),
                                ExprKind::Block(Block { stmts: vec![assign_stmt, rest_stmt] }),
                            );
                            self.bind_chain(body_token, m, tmp, block)
                        }
                    }
                }
                // `k :- v; rest` -> `(fun() { k :- v; rest })()`
                DoItem::Local(name, t, value) => {
                    let const_stmt = Stmt {
                        id: self.fresh_id(),
                        token: t.clone(),
                        kind: StmtKind::Const { name, ty: None, value },
                    };
                    let rest_stmt = Stmt {
                        id: self.fresh_id(),
                        token: result.token.clone(),
                        kind: StmtKind::Expr(result),
                    };
                    let block = self.mk(
                        t.clone(),
                        ExprKind::Block(Block { stmts: vec![const_stmt, rest_stmt] }),
                    );
                    let lambda = self.mk(
                        t.clone(),
                        ExprKind::Lambda(FunctionLit {
                            type_params: Vec::new(),
                            constraints: Vec::new(),
                            params: Vec::new(),
                            ret: None,
                            body: Box::new(block),
                        }),
                    );
                    self.mk(
                        t,
                        ExprKind::Call { callee: Box::new(lambda), args: Vec::new() },
                    )
                }
                // `expr; rest` -> `expr >>= \_ -> rest`
                DoItem::Bare(e) => {
                    let t = e.token.clone();
                    let ignored = self.gensym("d");
                    self.bind_chain(t, e, ignored, result)
                }
            };
        }
        result
    }

    /// `m >>= \name -> body`
    fn bind_chain(&mut self, token: Token, m: Expr, name: String, body: Expr) -> Expr {
        let param = Param {
            id: self.fresh_id(),
            token: token.clone(),
            name,
            ty: None,
            default: None,
            variadic: false,
        };
        let lambda = self.mk(
            token.clone(),
            ExprKind::Lambda(FunctionLit {
                type_params: Vec::new(),
                constraints: Vec::new(),
                params: vec![param],
                ret: None,
                body: Box::new(body),
            }),
        );
        self.mk(
            token,
            ExprKind::Infix {
                op: BinOp::Bind,
                lhs: Box::new(m),
                rhs: Box::new(lambda),
            },
        )
    }

    // ── Comprehensions ─────────────────────────────────────────────────

    /// Clauses after the `|`. Desugared into `listFlatMap` calls and
    /// conditionals.
    fn parse_comprehension(&mut self, token: Token, out: Expr) -> Expr {
        enum Clause {
            Generator(Pattern, Expr),
            Filter(Expr),
        }

        let mut clauses = Vec::new();
        loop {
            self.skip_newlines();
            if let Some((pat, iter)) = self.speculate(|p| {
                let pat = p.parse_pattern()?;
                if !p.check(TokenKind::LArrow) {
                    return None;
                }
                p.advance();
                p.skip_newlines();
                let iter = p.parse_expr_bp(0);
                Some((pat, iter))
            }) {
                clauses.push(Clause::Generator(pat, iter));
            } else {
                clauses.push(Clause::Filter(self.parse_expr_bp(0)));
            }
            self.skip_newlines();
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBracket, "`]` closing comprehension");

        // Fold clauses from the inside out.
        let out_token = out.token.clone();
        let mut body = self.mk(out_token, ExprKind::List(vec![out]));
        for clause in clauses.into_iter().rev() {
            body = match clause {
                Clause::Filter(cond) => {
                    let t = cond.token.clone();
                    let empty = self.mk(t.clone(), ExprKind::List(Vec::new()));
                    let then_block = self.wrap_block(body);
                    let else_block = self.wrap_block(empty);
                    self.mk(
                        t,
                        ExprKind::If {
                            cond: Box::new(cond),
                            then_branch: Box::new(then_block),
                            else_branch: Some(Box::new(else_block)),
                        },
                    )
                }
                Clause::Generator(pat, iter) => {
                    let t = pat.token.clone();
                    match pat.kind {
                        PatKind::Ident(ref name) => {
                            let name = name.clone();
                            self.flat_map_call(t, iter, name, body)
                        }
                        PatKind::Wildcard => {
                            let name = self.gensym("c");
                            self.flat_map_call(t, iter, name, body)
                        }
                        _ => {
                            // Refutable generator patterns filter instead of
                            // failing: non-matching elements yield [].
                            let tmp = self.gensym("c");
                            let scrut = self.mk(t.clone(), ExprKind::Ident(tmp.clone()));
                            let empty = self.mk(t.clone(), ExprKind::List(Vec::new()));
                            let wild = Pattern {
                                id: self.fresh_id(),
                                token: t.clone(),
                                kind: PatKind::Wildcard,
                            };
                            let matched_arm_id = self.fresh_id();
                            let wild_arm_id = self.fresh_id();
                            let matched = self.mk(
                                t.clone(),
                                ExprKind::Match {
                                    scrutinee: Box::new(scrut),
                                    arms: vec![
                                        MatchArm {
                                            id: matched_arm_id,
                                            pat,
                                            guard: None,
                                            body,
                                        },
                                        MatchArm {
                                            id: wild_arm_id,
                                            pat: wild,
                                            guard: None,
                                            body: empty,
                                        },
                                    ],
                                },
                            );
                            self.flat_map_call(t, iter, tmp, matched)
                        }
                    }
                }
            };
        }
        body
    }

    /// `listFlatMap(iter, \name -> body)`
    fn flat_map_call(&mut self, token: Token, iter: Expr, name: String, body: Expr) -> Expr {
        let param = Param {
            id: self.fresh_id(),
            token: token.clone(),
            name,
            ty: None,
            default: None,
            variadic: false,
        };
        let lambda = self.mk(
            token.clone(),
            ExprKind::Lambda(FunctionLit {
                type_params: Vec::new(),
                constraints: Vec::new(),
                params: vec![param],
                ret: None,
                body: Box::new(body),
            }),
        );
        let callee = self.mk(token.clone(), ExprKind::Ident("listFlatMap".to_string()));
        self.mk(token, ExprKind::Call { callee: Box::new(callee), args: vec![iter, lambda] })
    }

    fn wrap_block(&mut self, expr: Expr) -> Expr {
        let token = expr.token.clone();
        let stmt = Stmt {
            id: self.fresh_id(),
            token: token.clone(),
            kind: StmtKind::Expr(expr),
        };
        self.mk(token, ExprKind::Block(Block { stmts: vec![stmt] }))
    }

    // ── Calls and trailing blocks ──────────────────────────────────────

    /// Parse `(args)` after a callee.
    fn parse_call(&mut self, callee: Expr) -> Expr {
        let token = self.advance(); // `(`
        self.skip_newlines();
        let saved_alt = std::mem::replace(&mut self.no_alt, false);
        let mut args = Vec::new();
        while !self.check(TokenKind::RParen) {
            args.push(self.parse_expr_bp(0));
            self.skip_newlines();
            if !self.eat(TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.no_alt = saved_alt;
        self.expect(TokenKind::RParen, "`)` closing call arguments");
        self.mk(token, ExprKind::Call { callee: Box::new(callee), args })
    }

    /// Trailing `{...}` after a call or identifier.
    ///
    /// - Record-shaped content becomes a record argument (`Ctor {x: 1}`).
    /// - Otherwise, for lowercase callees, the braces hold a DSL list of
    ///   expressions appended as one list argument; `{}` is the empty list.
    /// - Uppercase callees with non-record content are left alone (the
    ///   brace starts a block statement).
    fn parse_trailing_block(&mut self, lhs: Expr) -> Option<Expr> {
        if self.looks_like_record() {
            let record = self.parse_record();
            return Some(self.append_arg(lhs, record));
        }
        if !dsl_callee(&lhs) {
            return None;
        }

        let token = self.advance(); // `{`
        let mut elements = Vec::new();
        loop {
            self.skip_newlines();
            if self.check(TokenKind::RBrace) || self.check(TokenKind::Eof) {
                break;
            }
            elements.push(self.parse_expr_bp(0));
            self.skip_newlines();
            if self.eat(TokenKind::Semicolon) || self.eat(TokenKind::Comma) {
                continue;
            }
        }
        self.expect(TokenKind::RBrace, "`}` closing trailing block");
        let list = self.mk(token, ExprKind::List(elements));
        Some(self.append_arg(lhs, list))
    }

    /// Append `arg` to an existing call, or build `lhs(arg)`.
    fn append_arg(&mut self, lhs: Expr, arg: Expr) -> Expr {
        match lhs.kind {
            ExprKind::Call { callee, mut args } => {
                args.push(arg);
                Expr {
                    id: lhs.id,
                    token: lhs.token,
                    kind: ExprKind::Call { callee, args },
                }
            }
            _ => {
                let token = lhs.token.clone();
                self.mk(token, ExprKind::Call { callee: Box::new(lhs), args: vec![arg] })
            }
        }
    }
}

/// Whether the leftmost callee of an expression is a lowercase identifier
/// (DSL trailing-block form).
fn dsl_callee(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Ident(name) => name.chars().next().is_some_and(|c| c.is_lowercase() || c == '_'),
        ExprKind::Call { callee, .. } => dsl_callee(callee),
        ExprKind::Member { obj, .. } => dsl_callee(obj),
        ExprKind::TypeApp { expr, .. } => dsl_callee(expr),
        _ => false,
    }
}

fn compound_op(kind: TokenKind) -> Option<BinOp> {
    match kind {
        TokenKind::PlusEq => Some(BinOp::Add),
        TokenKind::MinusEq => Some(BinOp::Sub),
        TokenKind::StarEq => Some(BinOp::Mul),
        TokenKind::SlashEq => Some(BinOp::Div),
        TokenKind::PercentEq => Some(BinOp::Rem),
        TokenKind::PlusPlusEq => Some(BinOp::Concat),
        _ => None,
    }
}
