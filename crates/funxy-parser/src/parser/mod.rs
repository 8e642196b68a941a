//! The Funxy parser.
//!
//! Recursive descent for statements and declarations, Pratt precedence
//! climbing for expressions (`exprs`), dedicated sub-grammars for types
//! (`types`) and patterns (`pats`). The parser owns the [`NodeIdGen`] so
//! every node it builds receives a unique id, and it accumulates
//! diagnostics instead of failing fast: on an error it skips to the next
//! statement boundary and keeps going so one pass reports as much as
//! possible.

mod exprs;
mod items;
mod lit;
mod pats;
mod types;

use funxy_common::{DiagCode, Diagnostic, DiagnosticSink, LineIndex, Span, Token, TokenKind};
use funxy_lexer::{LexError, Lexer};

use crate::ast::{
    Expr, ExprKind, ImportDecl, NodeId, NodeIdGen, Program, Stmt, StmtKind,
};

/// Maximum expression nesting depth before the parser gives up with a
/// diagnostic instead of blowing the host stack.
const MAX_DEPTH: u32 = 500;

/// The result of parsing one source file.
#[derive(Debug)]
pub struct Parse {
    pub program: Program,
    pub diagnostics: DiagnosticSink,
    /// Number of node ids allocated; side tables can size themselves by it.
    pub node_count: u32,
}

impl Parse {
    /// Whether parsing produced any error diagnostics.
    pub fn has_errors(&self) -> bool {
        self.diagnostics.has_errors()
    }
}

/// Parse a source string into a [`Program`].
pub fn parse(source: &str, file: &str) -> Parse {
    let (tokens, lex_errors) = Lexer::tokenize(source);
    let mut parser = Parser::new(source, file, tokens, lex_errors);
    let program = parser.parse_program();
    Parse {
        program,
        node_count: parser.ids.count(),
        diagnostics: parser.diags,
    }
}

/// Parse with an externally provided id generator, so multiple files of a
/// module share one id space. Returns the generator for the next file.
pub fn parse_with_ids(source: &str, file: &str, ids: NodeIdGen) -> (Parse, NodeIdGen) {
    let (tokens, lex_errors) = Lexer::tokenize(source);
    let mut parser = Parser::new(source, file, tokens, lex_errors);
    parser.ids = ids;
    let program = parser.parse_program();
    let node_count = parser.ids.count();
    let ids = std::mem::take(&mut parser.ids);
    (
        Parse {
            program,
            node_count,
            diagnostics: parser.diags,
        },
        ids,
    )
}

pub(crate) struct Parser<'src> {
    source: &'src str,
    file: String,
    line_index: LineIndex,
    tokens: Vec<Token>,
    pos: usize,
    pub(crate) ids: NodeIdGen,
    pub(crate) diags: DiagnosticSink,
    lex_errors: Vec<LexError>,
    /// Current expression nesting depth (see [`MAX_DEPTH`]).
    depth: u32,
    /// Suppresses `{` postfix parsing while an `if`/`for`/`match` header is
    /// being read, so the construct's own block is not eaten as a trailing
    /// DSL block.
    pub(crate) no_block_call: bool,
    /// Suppresses `|` as an infix operator while inside `[...]`, where it
    /// separates a comprehension's output from its clauses.
    pub(crate) no_alt: bool,
    /// Counter for compiler-generated names (`$t0`, `$d1`, ...).
    gensym: u32,
}

impl<'src> Parser<'src> {
    fn new(source: &'src str, file: &str, tokens: Vec<Token>, lex_errors: Vec<LexError>) -> Self {
        Self {
            source,
            file: file.to_string(),
            line_index: LineIndex::new(source),
            tokens,
            pos: 0,
            ids: NodeIdGen::new(),
            diags: DiagnosticSink::new(),
            lex_errors,
            depth: 0,
            no_block_call: false,
            no_alt: false,
            gensym: 0,
        }
    }

    // ── Token navigation ───────────────────────────────────────────────

    pub(crate) fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    pub(crate) fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    /// The `n`th token ahead (0 = current), without skipping newlines.
    pub(crate) fn nth_kind(&self, n: usize) -> TokenKind {
        let idx = (self.pos + n).min(self.tokens.len() - 1);
        self.tokens[idx].kind
    }

    /// The kind of the next non-newline token at or after the current one.
    pub(crate) fn peek_past_newlines(&self) -> TokenKind {
        let mut idx = self.pos;
        while idx < self.tokens.len() && self.tokens[idx].kind == TokenKind::Newline {
            idx += 1;
        }
        self.tokens[idx.min(self.tokens.len() - 1)].kind
    }

    pub(crate) fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    pub(crate) fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    pub(crate) fn eat(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Consume the expected token or report P001/P005.
    pub(crate) fn expect(&mut self, kind: TokenKind, what: &str) -> Option<Token> {
        if self.check(kind) {
            return Some(self.advance());
        }
        let code = if matches!(
            kind,
            TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace | TokenKind::Gt
        ) {
            DiagCode::P005
        } else {
            DiagCode::P001
        };
        let found = self.lexeme_of_current();
        self.error_here(code, format!("expected {what}, found `{found}`"));
        None
    }

    pub(crate) fn skip_newlines(&mut self) {
        while self.check(TokenKind::Newline) {
            self.advance();
        }
    }

    /// The source text of the current token.
    pub(crate) fn lexeme_of_current(&self) -> &'src str {
        self.lexeme(self.peek())
    }

    pub(crate) fn lexeme(&self, token: &Token) -> &'src str {
        if token.kind == TokenKind::Eof {
            return "<eof>";
        }
        &self.source[token.span.to_range()]
    }

    pub(crate) fn fresh_id(&mut self) -> NodeId {
        self.ids.fresh()
    }

    pub(crate) fn gensym(&mut self, prefix: &str) -> String {
        let n = self.gensym;
        self.gensym += 1;
        format!("${prefix}{n}")
    }

    // ── Diagnostics ────────────────────────────────────────────────────

    pub(crate) fn error_at(&mut self, code: DiagCode, token: &Token, message: impl Into<String>) {
        self.diags.push(Diagnostic::error(
            code,
            self.file.clone(),
            token.span,
            token.line,
            token.col,
            message,
        ));
    }

    pub(crate) fn error_here(&mut self, code: DiagCode, message: impl Into<String>) {
        let token = self.peek().clone();
        self.error_at(code, &token, message);
    }

    /// Diagnose an `Illegal` token using the message the lexer recorded
    /// for its span (P004).
    pub(crate) fn report_illegal(&mut self, token: &Token) {
        let detail = self
            .lex_errors
            .iter()
            .find(|e| e.span.start >= token.span.start && e.span.start < token.span.end.max(token.span.start + 1))
            .map(|e| e.to_string())
            .unwrap_or_else(|| "malformed token".to_string());
        self.error_at(DiagCode::P004, token, detail);
    }

    // ── Recovery ───────────────────────────────────────────────────────

    /// Skip tokens to the nearest statement boundary: a newline, `}`, `)`,
    /// `]`, or comma at bracket balance 0, or end of file.
    pub(crate) fn recover_to_stmt_boundary(&mut self) {
        let mut balance: i32 = 0;
        loop {
            match self.peek_kind() {
                TokenKind::Eof => return,
                TokenKind::Newline | TokenKind::Semicolon if balance <= 0 => return,
                TokenKind::RBrace | TokenKind::RParen | TokenKind::RBracket if balance <= 0 => {
                    return
                }
                TokenKind::Comma if balance <= 0 => return,
                TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace | TokenKind::MapOpen => {
                    balance += 1;
                    self.advance();
                }
                TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                    balance -= 1;
                    self.advance();
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    // ── Speculation ────────────────────────────────────────────────────

    /// Run `f`; if it returns `None`, restore the token position and drop
    /// any diagnostics it pushed.
    pub(crate) fn speculate<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Option<T>,
    ) -> Option<T> {
        let pos = self.pos;
        let diag_len = self.diags.len();
        match f(self) {
            Some(value) => Some(value),
            None => {
                self.pos = pos;
                self.diags.truncate(diag_len);
                None
            }
        }
    }

    // ── Depth guard ────────────────────────────────────────────────────

    pub(crate) fn enter_depth(&mut self) -> bool {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            self.error_here(DiagCode::P006, "expression nesting too deep");
            return false;
        }
        true
    }

    pub(crate) fn leave_depth(&mut self) {
        debug_assert!(self.depth > 0);
        self.depth -= 1;
    }

    /// Split a `>>` token into two `>` halves, leaving the second half as
    /// the current token. Used when closing nested generics.
    pub(crate) fn split_shr(&mut self) {
        let token = self.peek().clone();
        debug_assert_eq!(token.kind, TokenKind::Shr);
        let second = Span::new(token.span.start + 1, token.span.end);
        self.tokens[self.pos] = Token::new(TokenKind::Gt, second, token.line, token.col + 1);
    }

    /// Recompute line/column for a span start from the file's line index.
    pub(crate) fn position_of(&self, span: Span) -> (u32, u32) {
        self.line_index.line_col(span.start)
    }

    // ── Program & statements ───────────────────────────────────────────

    fn parse_program(&mut self) -> Program {
        let mut package = None;
        let mut imports = Vec::new();
        let mut stmts = Vec::new();

        self.skip_newlines();

        // `package Name` must be the very first statement.
        if self.check(TokenKind::Package) {
            self.advance();
            if self.check(TokenKind::IdentUpper) || self.check(TokenKind::IdentLower) {
                let token = self.advance();
                package = Some(self.lexeme(&token).to_string());
            } else {
                self.error_here(DiagCode::P001, "expected package name");
                self.recover_to_stmt_boundary();
            }
            self.skip_newlines();
        }

        // Imports are only legal before any other top-level statement.
        while self.check(TokenKind::Import) {
            if let Some(import) = self.parse_import() {
                imports.push(import);
            }
            self.skip_newlines();
        }

        while !self.check(TokenKind::Eof) {
            self.skip_newlines();
            if self.check(TokenKind::Eof) {
                break;
            }
            match self.peek_kind() {
                TokenKind::Package => {
                    self.error_here(
                        DiagCode::P006,
                        "package declaration must be the first statement in a file",
                    );
                    self.advance();
                    self.recover_to_stmt_boundary();
                }
                TokenKind::Import => {
                    self.error_here(
                        DiagCode::P006,
                        "imports must appear before any other top-level statement",
                    );
                    self.advance();
                    self.recover_to_stmt_boundary();
                }
                _ => {
                    if let Some(stmt) = self.parse_stmt() {
                        stmts.push(stmt);
                    }
                }
            }
        }

        Program {
            package,
            imports,
            stmts,
            file: self.file.clone(),
        }
    }

    fn parse_import(&mut self) -> Option<ImportDecl> {
        let token = self.advance(); // `import`
        let id = self.fresh_id();

        let path_token = match self.peek_kind() {
            TokenKind::Str | TokenKind::RawStr => self.advance(),
            _ => {
                self.error_here(DiagCode::P001, "expected import path string");
                self.recover_to_stmt_boundary();
                return None;
            }
        };
        let path = lit::strip_quotes(self.lexeme(&path_token)).to_string();

        let mut alias = None;
        let mut symbols = Vec::new();
        let mut exclude = Vec::new();
        let mut import_all = false;

        if self.eat(TokenKind::As) {
            match self.peek_kind() {
                TokenKind::IdentUpper | TokenKind::IdentLower => {
                    let t = self.advance();
                    alias = Some(self.lexeme(&t).to_string());
                }
                _ => {
                    self.error_here(DiagCode::P001, "expected alias name after `as`");
                }
            }
        }

        if self.eat(TokenKind::Exposing) {
            self.expect(TokenKind::LParen, "`(` after `exposing`")?;
            self.skip_newlines();
            if self.check(TokenKind::DotDot) {
                self.advance();
                import_all = true;
            } else {
                symbols = self.parse_name_list();
            }
            self.skip_newlines();
            self.expect(TokenKind::RParen, "`)` closing the exposing list")?;
        }

        if self.eat(TokenKind::Hiding) {
            self.expect(TokenKind::LParen, "`(` after `hiding`")?;
            self.skip_newlines();
            exclude = self.parse_name_list();
            self.skip_newlines();
            self.expect(TokenKind::RParen, "`)` closing the hiding list")?;
        }

        Some(ImportDecl {
            id,
            token,
            path,
            alias,
            symbols,
            exclude,
            import_all,
        })
    }

    /// A comma-separated list of identifiers (either case).
    fn parse_name_list(&mut self) -> Vec<String> {
        let mut names = Vec::new();
        loop {
            match self.peek_kind() {
                TokenKind::IdentLower | TokenKind::IdentUpper => {
                    let t = self.advance();
                    names.push(self.lexeme(&t).to_string());
                }
                _ => break,
            }
            self.skip_newlines();
            if !self.eat(TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        names
    }

    // ── Statement dispatch ─────────────────────────────────────────────

    pub(crate) fn parse_stmt(&mut self) -> Option<Stmt> {
        self.skip_newlines();
        let token = self.peek().clone();

        let stmt = match self.peek_kind() {
            TokenKind::Illegal => {
                let t = self.advance();
                self.report_illegal(&t);
                self.recover_to_stmt_boundary();
                return None;
            }
            TokenKind::Fun if self.nth_kind(1) == TokenKind::IdentLower => {
                let decl = self.parse_function_decl()?;
                Stmt {
                    id: self.fresh_id(),
                    token,
                    kind: StmtKind::Function(decl),
                }
            }
            TokenKind::Trait => {
                let decl = self.parse_trait_decl()?;
                Stmt {
                    id: self.fresh_id(),
                    token,
                    kind: StmtKind::Trait(decl),
                }
            }
            TokenKind::Instance => {
                let decl = self.parse_instance_decl()?;
                Stmt {
                    id: self.fresh_id(),
                    token,
                    kind: StmtKind::Instance(decl),
                }
            }
            TokenKind::Type => {
                let decl = self.parse_type_decl()?;
                Stmt {
                    id: self.fresh_id(),
                    token,
                    kind: StmtKind::TypeDecl(decl),
                }
            }
            TokenKind::At => self.parse_directive(token.clone())?,
            TokenKind::Break => {
                self.advance();
                Stmt { id: self.fresh_id(), token, kind: StmtKind::Break }
            }
            TokenKind::Continue => {
                self.advance();
                Stmt { id: self.fresh_id(), token, kind: StmtKind::Continue }
            }
            TokenKind::Return => {
                self.advance();
                let value = if self.peek().is_terminator() || self.check(TokenKind::RBrace) {
                    None
                } else {
                    Some(self.parse_expr_entry())
                };
                Stmt {
                    id: self.fresh_id(),
                    token,
                    kind: StmtKind::Return(value),
                }
            }
            _ => self.parse_expr_or_binding(token.clone())?,
        };

        self.expect_stmt_end();
        Some(stmt)
    }

    /// `@name arg...` directive statement.
    fn parse_directive(&mut self, token: Token) -> Option<Stmt> {
        self.advance(); // `@`
        let name = match self.peek_kind() {
            TokenKind::IdentLower | TokenKind::IdentUpper => {
                let t = self.advance();
                self.lexeme(&t).to_string()
            }
            _ => {
                self.error_here(DiagCode::P001, "expected directive name after `@`");
                self.recover_to_stmt_boundary();
                return None;
            }
        };
        let mut args = Vec::new();
        while !self.peek().is_terminator() && !self.check(TokenKind::RBrace) {
            args.push(self.parse_expr_entry());
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        Some(Stmt {
            id: self.fresh_id(),
            token,
            kind: StmtKind::Directive { name, args },
        })
    }

    /// An expression statement, a `name = value` binding, or a
    /// destructuring `pat = value` binding.
    fn parse_expr_or_binding(&mut self, token: Token) -> Option<Stmt> {
        // Destructuring candidates: a pattern shape followed by `=`.
        if matches!(
            self.peek_kind(),
            TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace | TokenKind::IdentUpper
        ) {
            if let Some((pat, value)) = self.speculate(|p| {
                let pat = p.parse_pattern()?;
                if !p.check(TokenKind::Eq) {
                    return None;
                }
                p.advance();
                p.skip_newlines();
                let value = p.parse_expr_entry();
                Some((pat, value))
            }) {
                return Some(Stmt {
                    id: self.fresh_id(),
                    token,
                    kind: StmtKind::ConstPattern { pat, value },
                });
            }
        }

        let expr = self.parse_expr_entry();

        // Statement-position `=` on a name is a constant declaration.
        if let ExprKind::Assign { target, value } = expr.kind {
            match target.kind {
                ExprKind::Ident(name) => {
                    return Some(Stmt {
                        id: self.fresh_id(),
                        token,
                        kind: StmtKind::Const { name, ty: None, value: *value },
                    });
                }
                ExprKind::Annotated { expr: inner, ty } => {
                    if let ExprKind::Ident(name) = inner.kind {
                        return Some(Stmt {
                            id: self.fresh_id(),
                            token,
                            kind: StmtKind::Const { name, ty: Some(ty), value: *value },
                        });
                    }
                    let rebuilt = Expr {
                        id: self.fresh_id(),
                        token: token.clone(),
                        kind: ExprKind::Assign {
                            target: Box::new(Expr {
                                id: inner.id,
                                token: inner.token.clone(),
                                kind: ExprKind::Annotated { expr: inner, ty },
                            }),
                            value,
                        },
                    };
                    return Some(Stmt {
                        id: self.fresh_id(),
                        token,
                        kind: StmtKind::Expr(rebuilt),
                    });
                }
                _ => {
                    let rebuilt = Expr {
                        id: self.fresh_id(),
                        token: token.clone(),
                        kind: ExprKind::Assign { target, value },
                    };
                    return Some(Stmt {
                        id: self.fresh_id(),
                        token,
                        kind: StmtKind::Expr(rebuilt),
                    });
                }
            }
        }

        Some(Stmt {
            id: self.fresh_id(),
            token,
            kind: StmtKind::Expr(expr),
        })
    }

    /// Require a statement terminator (newline, `;`, `}`, or EOF); on
    /// anything else report P001 and recover.
    fn expect_stmt_end(&mut self) {
        match self.peek_kind() {
            TokenKind::Newline | TokenKind::Semicolon => {
                self.advance();
            }
            TokenKind::Eof | TokenKind::RBrace => {}
            _ => {
                let found = self.lexeme_of_current().to_string();
                self.error_here(
                    DiagCode::P001,
                    format!("expected end of statement, found `{found}`"),
                );
                self.recover_to_stmt_boundary();
                // Consume the boundary newline/semicolon if present.
                if matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Semicolon) {
                    self.advance();
                }
            }
        }
    }
}
