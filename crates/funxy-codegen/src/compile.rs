//! The bytecode compiler: analyzed AST to chunks.
//!
//! One `FnState` per function being compiled; the state stack models
//! lexical nesting for upvalue resolution. Locals get compile-time slots,
//! jumps are emitted with placeholders and patched, and every
//! dictionary-dispatch site recorded by the analyzer becomes `LoadDict`
//! (or `GetLocal $wN` for forwarded witnesses) plus `CallMethod`.
//!
//! The compiler runs only on analyses without errors; internal
//! inconsistencies are compiler bugs and panic.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use funxy_parser::ast::{
    Block, Expr, ExprKind, FunctionDecl, FunctionLit, InterpPart, MatchArm, NodeId, Param,
    PatKind, PatLit, Pattern, Program, Stmt, StmtKind, StrPatPart as AstStrPart, TypeDeclBody,
    UnOp,
};
use funxy_parser::ast::BinOp;
use funxy_typeck::infer::{Analysis, WitnessSource};
use funxy_typeck::traits::MethodImpl;
use funxy_typeck::SymbolKind;

use funxy_runtime::chunk::{
    Chunk, CompiledFunction, Const, DictConst, DictEntry, Op, PendingImport, StrPatPart,
};
use funxy_runtime::value::{BitString, CtorFn, CtorValue, Value};

/// Compile the ordered files of a module into one chunk.
pub fn compile_module(analysis: &Analysis, files: &[&Program], file: &str) -> Chunk {
    let mut compiler = Compiler::new(analysis);
    let chunk = compiler.compile_files(files, file);
    log::debug!(
        "compiled {file}: {} bytes, {} constants",
        chunk.code.len(),
        chunk.constants.len()
    );
    chunk
}

/// Compile every trait default body of a module, keyed `Trait.method`.
pub fn compile_trait_defaults(
    analysis: &Analysis,
    files: &[&Program],
) -> Vec<(String, Rc<CompiledFunction>)> {
    let mut compiler = Compiler::new(analysis);
    let mut out = Vec::new();
    for program in files {
        for stmt in &program.stmts {
            if let StmtKind::Trait(decl) = &stmt.kind {
                for method in &decl.methods {
                    if let Some(body) = &method.default_body {
                        compiler.states.push(FnState::new(program.file.clone()));
                        let key = format!("{}.{}", decl.name, method.name);
                        let (function, _) = compiler.compile_function(
                            &key,
                            &method.params,
                            method.id,
                            body,
                            false,
                        );
                        compiler.states.pop();
                        out.push((key, Rc::new(function)));
                    }
                }
            }
        }
    }
    out
}

struct Scope {
    names: FxHashMap<String, u16>,
    start_slot: u16,
}

struct LoopCtx {
    break_sites: Vec<usize>,
    continue_sites: Vec<usize>,
}

struct FnState {
    chunk: Chunk,
    scopes: Vec<Scope>,
    next_slot: u16,
    max_slot: u16,
    /// (captures_enclosing_local, index, name)
    upvalues: Vec<(bool, u16, String)>,
    loops: Vec<LoopCtx>,
}

impl FnState {
    fn new(file: String) -> Self {
        FnState {
            chunk: Chunk::new(file),
            scopes: vec![Scope { names: FxHashMap::default(), start_slot: 0 }],
            next_slot: 0,
            max_slot: 0,
            upvalues: Vec::new(),
            loops: Vec::new(),
        }
    }

    fn begin_scope(&mut self) {
        self.scopes.push(Scope {
            names: FxHashMap::default(),
            start_slot: self.next_slot,
        });
    }

    fn end_scope(&mut self) {
        let scope = self.scopes.pop().expect("scope underflow (compiler bug)");
        self.next_slot = scope.start_slot;
    }

    fn declare(&mut self, name: &str) -> u16 {
        let slot = self.next_slot;
        self.next_slot += 1;
        self.max_slot = self.max_slot.max(self.next_slot);
        self.scopes
            .last_mut()
            .expect("scope")
            .names
            .insert(name.to_string(), slot);
        slot
    }

    /// A throwaway slot for wildcards and temporaries.
    fn scratch(&mut self) -> u16 {
        let slot = self.next_slot;
        self.next_slot += 1;
        self.max_slot = self.max_slot.max(self.next_slot);
        slot
    }

    fn lookup_local(&self, name: &str) -> Option<u16> {
        for scope in self.scopes.iter().rev() {
            if let Some(slot) = scope.names.get(name) {
                return Some(*slot);
            }
        }
        None
    }
}

enum NameRef {
    Local(u16),
    Upvalue(u8),
    Global,
}

struct Compiler<'a> {
    analysis: &'a Analysis,
    states: Vec<FnState>,
    /// Compiled instance methods, shared between dictionary constants.
    instance_fns: FxHashMap<NodeId, Rc<CompiledFunction>>,
}

impl<'a> Compiler<'a> {
    fn new(analysis: &'a Analysis) -> Self {
        Compiler {
            analysis,
            states: Vec::new(),
            instance_fns: FxHashMap::default(),
        }
    }

    fn state(&mut self) -> &mut FnState {
        self.states.last_mut().expect("no active function state")
    }

    fn chunk(&mut self) -> &mut Chunk {
        &mut self.state().chunk
    }

    // ── Module compilation ─────────────────────────────────────────────

    fn compile_files(&mut self, files: &[&Program], file: &str) -> Chunk {
        self.states.push(FnState::new(file.to_string()));

        // Instance methods compile first so dictionary constants can
        // reference them from anywhere in the module.
        for program in files {
            for stmt in &program.stmts {
                if let StmtKind::Instance(decl) = &stmt.kind {
                    for method in &decl.methods {
                        let (function, _) = {
                            let file = self.state().chunk.file.clone();
                            self.states.push(FnState::new(file));
                            let result = self.compile_function(
                                &method.name,
                                &method.params,
                                method.id,
                                &method.body,
                                false,
                            );
                            self.states.pop();
                            result
                        };
                        self.instance_fns.insert(method.id, Rc::new(function));
                    }
                }
            }
        }

        // Deferred imports: recorded in the chunk, executed first.
        let mut pending = Vec::new();
        for program in files {
            for import in &program.imports {
                pending.push(PendingImport {
                    path: import.path.clone(),
                    alias: import.alias.clone(),
                    symbols: import.symbols.clone(),
                    exclude: import.exclude.clone(),
                    import_all: import.import_all,
                });
            }
        }
        let import_count = pending.len();
        self.chunk().pending_imports = pending;
        for i in 0..import_count {
            self.chunk().emit_op(Op::Import, 1);
            self.chunk().emit_u16(i as u16, 1);
        }

        // Top-level statements; the final expression's value stays on the
        // stack for Halt.
        let total: usize = files.iter().map(|p| p.stmts.len()).sum();
        let mut seen = 0usize;
        let mut last_pushes = false;
        for program in files {
            for stmt in &program.stmts {
                seen += 1;
                last_pushes = self.compile_top_stmt(stmt, seen == total);
            }
        }
        if !last_pushes {
            self.push_value(Value::Nil, 0);
        }
        self.chunk().emit_op(Op::Halt, 0);

        let mut state = self.states.pop().expect("module state");
        state.chunk.locals_count = state.max_slot;
        state.chunk
    }

    /// Returns whether the statement left a value on the stack (only the
    /// final expression statement does).
    fn compile_top_stmt(&mut self, stmt: &Stmt, is_last: bool) -> bool {
        let line = stmt.token.line;
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.compile_expr(expr, false);
                if is_last {
                    true
                } else {
                    self.chunk().emit_op(Op::Pop, line);
                    false
                }
            }
            StmtKind::Const { name, value, .. } => {
                self.compile_expr(value, false);
                self.emit_set_global(name, line);
                false
            }
            StmtKind::ConstPattern { pat, value } => {
                self.compile_expr(value, false);
                self.state().begin_scope();
                self.compile_irrefutable_binding(pat, line);
                for name in pat.bound_names() {
                    let slot = self.state().lookup_local(&name).expect("bound name");
                    self.emit_get_local(slot, line);
                    self.emit_set_global(&name, line);
                }
                self.state().end_scope();
                false
            }
            StmtKind::Function(decl) => {
                self.compile_named_function(decl, line);
                self.emit_set_global(&decl.name, line);
                false
            }
            StmtKind::TypeDecl(decl) => {
                if let TypeDeclBody::Adt(ctors) = &decl.body {
                    for (tag, ctor) in ctors.iter().enumerate() {
                        let value = ctor_runtime_value(
                            &decl.name,
                            &ctor.name,
                            tag as u32,
                            ctor.fields.len(),
                        );
                        self.push_value(value, line);
                        self.emit_set_global(&ctor.name, line);
                    }
                }
                false
            }
            // Traits and instances generate no module-level code: their
            // methods live in dictionary constants and the defaults table.
            StmtKind::Trait(_) | StmtKind::Instance(_) | StmtKind::Directive { .. } => false,
            StmtKind::Break | StmtKind::Continue | StmtKind::Return(_) => false,
        }
    }

    // ── Statements inside blocks ───────────────────────────────────────

    /// Returns whether a value was left on the stack.
    fn compile_stmt(&mut self, stmt: &Stmt, want_value: bool, tail: bool) -> bool {
        let line = stmt.token.line;
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.compile_expr(expr, tail && want_value);
                if want_value {
                    true
                } else {
                    self.chunk().emit_op(Op::Pop, line);
                    false
                }
            }
            StmtKind::Const { name, value, .. } => {
                self.compile_expr(value, false);
                let slot = self.state().declare(name);
                self.emit_set_local(slot, line);
                false
            }
            StmtKind::ConstPattern { pat, value } => {
                self.compile_expr(value, false);
                self.compile_irrefutable_binding(pat, line);
                false
            }
            StmtKind::Function(decl) => {
                self.compile_named_function(decl, line);
                let slot = self.state().declare(&decl.name);
                self.emit_set_local(slot, line);
                false
            }
            StmtKind::TypeDecl(_)
            | StmtKind::Trait(_)
            | StmtKind::Instance(_)
            | StmtKind::Directive { .. } => false,
            StmtKind::Break => {
                let site = self.chunk().emit_jump(Op::Jump, line);
                self.state()
                    .loops
                    .last_mut()
                    .expect("break outside loop (analyzer bug)")
                    .break_sites
                    .push(site);
                false
            }
            StmtKind::Continue => {
                let site = self.chunk().emit_jump(Op::Jump, line);
                self.state()
                    .loops
                    .last_mut()
                    .expect("continue outside loop (analyzer bug)")
                    .continue_sites
                    .push(site);
                false
            }
            StmtKind::Return(value) => {
                match value {
                    Some(expr) => self.compile_expr(expr, true),
                    None => self.push_value(Value::Nil, line),
                }
                self.chunk().emit_op(Op::Return, line);
                false
            }
        }
    }

    fn compile_block(&mut self, block: &Block, tail: bool, line: u32) {
        self.state().begin_scope();
        let count = block.stmts.len();
        let mut pushed = false;
        for (i, stmt) in block.stmts.iter().enumerate() {
            let is_last = i + 1 == count;
            pushed = self.compile_stmt(stmt, is_last, tail);
        }
        if !pushed {
            self.push_value(Value::Nil, line);
        }
        self.state().end_scope();
    }

    // ── Functions ──────────────────────────────────────────────────────

    /// Compile a declared function and emit its closure.
    fn compile_named_function(&mut self, decl: &FunctionDecl, line: u32) {
        let file = self.state().chunk.file.clone();
        self.states.push(FnState::new(file));
        let (function, upvalues) = self.compile_function(
            &decl.name,
            &decl.params,
            decl.id,
            &decl.body,
            decl.params.iter().any(|p| p.variadic),
        );
        self.states.pop();
        self.emit_make_closure(function, &upvalues, line);
    }

    fn compile_lambda(&mut self, expr: &Expr, lit: &FunctionLit, line: u32) {
        let file = self.state().chunk.file.clone();
        self.states.push(FnState::new(file));
        let (function, upvalues) =
            self.compile_function("<lambda>", &lit.params, expr.id, &lit.body, false);
        self.states.pop();
        self.emit_make_closure(function, &upvalues, line);
    }

    fn emit_make_closure(
        &mut self,
        function: CompiledFunction,
        upvalues: &[(bool, u16, String)],
        line: u32,
    ) {
        let fn_idx = self.chunk().add_const(Const::Fn(Rc::new(function)));
        self.chunk().emit_op(Op::MakeClosure, line);
        self.chunk().emit_u16(fn_idx, line);
        self.chunk().emit_u8(upvalues.len() as u8, line);
        for (is_local, index, _) in upvalues {
            self.chunk().emit_u8(u8::from(*is_local), line);
            self.chunk().emit_u16(*index, line);
        }
    }

    /// Compile a function body in the CURRENT (already pushed) state.
    /// Returns the function plus its upvalue descriptors.
    fn compile_function(
        &mut self,
        name: &str,
        params: &[Param],
        fn_node: NodeId,
        body: &Expr,
        variadic: bool,
    ) -> (CompiledFunction, Vec<(bool, u16, String)>) {
        self.state().begin_scope();
        for param in params {
            self.state().declare(&param.name);
        }
        let witness_count = self
            .analysis
            .fn_constraints
            .get(&fn_node)
            .map(Vec::len)
            .unwrap_or(0);
        for i in 0..witness_count {
            let wname = format!("$w{i}");
            self.state().declare(&wname);
        }

        // Prologue: fill omitted defaulted parameters (they arrive as
        // nil placeholders).
        for param in params {
            let Some(default) = &param.default else { continue };
            let line = param.token.line;
            let slot = self.state().lookup_local(&param.name).expect("param slot");
            self.emit_get_local(slot, line);
            self.push_value(Value::Nil, line);
            self.chunk().emit_op(Op::Equal, line);
            let skip = self.chunk().emit_jump(Op::JumpIfFalse, line);
            self.compile_expr(default, false);
            self.emit_set_local(slot, line);
            self.chunk().patch_jump(skip);
        }

        self.compile_expr(body, true);
        self.chunk().emit_op(Op::Return, body.token.line);

        let state = self.states.last_mut().expect("function state");
        state.chunk.locals_count = state.max_slot.max((params.len() + witness_count) as u16);
        let chunk = std::mem::take(&mut state.chunk);
        let upvalues = std::mem::take(&mut state.upvalues);
        let default_count = params.iter().filter(|p| p.default.is_some()).count();

        (
            CompiledFunction {
                name: name.to_string(),
                arity: (params.len() + witness_count) as u8,
                default_count: default_count as u8,
                variadic,
                upvalue_count: upvalues.len() as u8,
                chunk,
            },
            upvalues,
        )
    }

    // ── Name resolution ────────────────────────────────────────────────

    fn resolve_name(&mut self, name: &str) -> NameRef {
        let depth = self.states.len() - 1;
        if let Some(slot) = self.states[depth].lookup_local(name) {
            return NameRef::Local(slot);
        }
        match self.resolve_upvalue(depth, name) {
            Some(idx) => NameRef::Upvalue(idx),
            None => NameRef::Global,
        }
    }

    fn resolve_upvalue(&mut self, state_idx: usize, name: &str) -> Option<u8> {
        if state_idx == 0 {
            return None;
        }
        let enclosing = state_idx - 1;
        if let Some(slot) = self.states[enclosing].lookup_local(name) {
            return Some(self.add_upvalue(state_idx, true, slot, name));
        }
        let outer = self.resolve_upvalue(enclosing, name)?;
        Some(self.add_upvalue(state_idx, false, outer as u16, name))
    }

    fn add_upvalue(&mut self, state_idx: usize, is_local: bool, index: u16, name: &str) -> u8 {
        let upvalues = &mut self.states[state_idx].upvalues;
        if let Some(existing) = upvalues
            .iter()
            .position(|(l, i, n)| *l == is_local && *i == index && n == name)
        {
            return existing as u8;
        }
        upvalues.push((is_local, index, name.to_string()));
        (upvalues.len() - 1) as u8
    }

    // ── Small emit helpers ─────────────────────────────────────────────

    fn push_value(&mut self, value: Value, line: u32) {
        let idx = self.chunk().add_value(value);
        self.chunk().emit_op(Op::PushConst, line);
        self.chunk().emit_u16(idx, line);
    }

    fn emit_get_local(&mut self, slot: u16, line: u32) {
        self.chunk().emit_op(Op::GetLocal, line);
        self.chunk().emit_u16(slot, line);
    }

    fn emit_set_local(&mut self, slot: u16, line: u32) {
        self.chunk().emit_op(Op::SetLocal, line);
        self.chunk().emit_u16(slot, line);
    }

    fn emit_set_global(&mut self, name: &str, line: u32) {
        let idx = self.chunk().add_str(name.to_string());
        self.chunk().emit_op(Op::SetGlobal, line);
        self.chunk().emit_u16(idx, line);
    }

    // ── Expressions ────────────────────────────────────────────────────

    fn compile_expr(&mut self, expr: &Expr, tail: bool) {
        let line = expr.token.line;
        match &expr.kind {
            ExprKind::Int(v) => self.push_value(Value::Int(*v), line),
            ExprKind::BigInt(v) => self.push_value(Value::BigInt(Rc::new(v.clone())), line),
            ExprKind::Rational(v) => {
                self.push_value(Value::Rational(Rc::new(v.clone())), line)
            }
            ExprKind::Float(v) => self.push_value(Value::Float(*v), line),
            ExprKind::Bool(v) => self.push_value(Value::Bool(*v), line),
            ExprKind::Nil => self.push_value(Value::Nil, line),
            ExprKind::Str(s) => self.push_value(Value::string(s.clone()), line),
            ExprKind::Char(c) => self.push_value(Value::Char(*c), line),
            ExprKind::Bytes(bytes) => {
                self.push_value(Value::Bytes(Rc::new(bytes.clone())), line)
            }
            ExprKind::Bits { data, len } => self.push_value(
                Value::Bits(Rc::new(BitString { data: data.clone(), len: *len })),
                line,
            ),
            ExprKind::InterpStr(parts) => {
                for part in parts {
                    match part {
                        InterpPart::Lit(text) => {
                            self.push_value(Value::string(text.clone()), line)
                        }
                        InterpPart::Expr(e) => self.compile_expr(e, false),
                    }
                }
                self.chunk().emit_op(Op::BuildString, line);
                self.chunk().emit_u16(parts.len() as u16, line);
            }

            ExprKind::Ident(name) => match self.resolve_name(name) {
                NameRef::Local(slot) => self.emit_get_local(slot, line),
                NameRef::Upvalue(idx) => {
                    self.chunk().emit_op(Op::GetUpvalue, line);
                    self.chunk().emit_u8(idx, line);
                }
                NameRef::Global => {
                    let idx = self.chunk().add_str(name.to_string());
                    self.chunk().emit_op(Op::GetGlobal, line);
                    self.chunk().emit_u16(idx, line);
                }
            },

            ExprKind::Tuple(items) => {
                for item in items {
                    self.compile_expr(item, false);
                }
                self.chunk().emit_op(Op::MakeTuple, line);
                self.chunk().emit_u16(items.len() as u16, line);
            }
            ExprKind::List(items) => self.compile_list(items, line),
            ExprKind::Map(entries) => {
                for (k, v) in entries {
                    self.compile_expr(k, false);
                    self.compile_expr(v, false);
                }
                self.chunk().emit_op(Op::MakeMap, line);
                self.chunk().emit_u16(entries.len() as u16, line);
            }
            ExprKind::Record { fields, spread } => match spread {
                Some(base) => {
                    self.compile_expr(base, false);
                    for (name, value) in fields {
                        self.compile_expr(value, false);
                        let idx = self.chunk().add_str(name.clone());
                        self.chunk().emit_op(Op::RecordExtend, line);
                        self.chunk().emit_u16(idx, line);
                    }
                }
                None => {
                    for (name, value) in fields {
                        let idx = self.chunk().add_str(name.clone());
                        self.chunk().emit_op(Op::PushConst, line);
                        self.chunk().emit_u16(idx, line);
                        self.compile_expr(value, false);
                    }
                    self.chunk().emit_op(Op::MakeRecord, line);
                    self.chunk().emit_u16(fields.len() as u16, line);
                }
            },

            ExprKind::Prefix { op, rhs } => match op {
                UnOp::Not => {
                    self.compile_expr(rhs, false);
                    self.chunk().emit_op(Op::Not, line);
                }
                UnOp::Neg => {
                    self.compile_expr(rhs, false);
                    self.emit_dispatch(expr.id, 1, line);
                }
            },

            ExprKind::Infix { op, lhs, rhs } => self.compile_infix(expr, *op, lhs, rhs, line),
            ExprKind::Call { callee, args } => self.compile_call(expr, callee, args, tail, line),

            ExprKind::Index { obj, index } => {
                self.compile_expr(obj, false);
                self.compile_expr(index, false);
                self.chunk().emit_op(Op::Index, line);
            }

            ExprKind::Member { obj, name } => {
                if let Some(binding) = self.module_binding(obj) {
                    let idx = self.chunk().add_str(format!("{binding}::{name}"));
                    self.chunk().emit_op(Op::GetGlobal, line);
                    self.chunk().emit_u16(idx, line);
                    return;
                }
                self.compile_expr(obj, false);
                let idx = self.chunk().add_str(name.clone());
                self.chunk().emit_op(Op::Member, line);
                self.chunk().emit_u16(idx, line);
            }

            ExprKind::Annotated { expr: inner, .. } => self.compile_expr(inner, tail),
            ExprKind::TypeApp { expr: inner, .. } => self.compile_expr(inner, tail),

            ExprKind::Assign { target, value } => {
                self.compile_expr(value, false);
                if let ExprKind::Ident(name) = &target.kind {
                    match self.resolve_name(name) {
                        NameRef::Local(slot) => self.emit_set_local(slot, line),
                        NameRef::Upvalue(_) | NameRef::Global => {
                            self.emit_set_global(name, line)
                        }
                    }
                } else {
                    self.chunk().emit_op(Op::Pop, line);
                }
                self.push_value(Value::Nil, line);
            }

            ExprKind::Lambda(lit) => self.compile_lambda(expr, lit, line),

            ExprKind::If { cond, then_branch, else_branch } => {
                self.compile_expr(cond, false);
                let else_jump = self.chunk().emit_jump(Op::JumpIfFalse, line);
                self.compile_expr(then_branch, tail);
                let end_jump = self.chunk().emit_jump(Op::Jump, line);
                self.chunk().patch_jump(else_jump);
                match else_branch {
                    Some(else_expr) => self.compile_expr(else_expr, tail),
                    None => self.push_value(Value::Nil, line),
                }
                self.chunk().patch_jump(end_jump);
            }

            ExprKind::For { pat, iter, body } => self.compile_for(pat, iter, body, line),
            ExprKind::Match { scrutinee, arms } => {
                self.compile_match(scrutinee, arms, tail, line)
            }
            ExprKind::Block(block) => self.compile_block(block, tail, line),

            ExprKind::Spread(_) => {
                // The analyzer rejects stray spreads; keep the stack shape.
                self.push_value(Value::Nil, line);
            }

            ExprKind::Range { start, end } => {
                self.compile_expr(start, false);
                self.compile_expr(end, false);
                self.chunk().emit_op(Op::MakeRange, line);
            }
        }
    }

    fn compile_list(&mut self, items: &[Expr], line: u32) {
        let has_spread = items.iter().any(|i| matches!(i.kind, ExprKind::Spread(_)));
        if !has_spread {
            for item in items {
                self.compile_expr(item, false);
            }
            self.chunk().emit_op(Op::MakeList, line);
            self.chunk().emit_u16(items.len() as u16, line);
            return;
        }
        // Accumulate chunks onto an empty list.
        self.chunk().emit_op(Op::MakeList, line);
        self.chunk().emit_u16(0, line);
        for item in items {
            match &item.kind {
                ExprKind::Spread(inner) => {
                    self.compile_expr(inner, false);
                    self.chunk().emit_op(Op::Spread, line);
                }
                _ => {
                    self.compile_expr(item, false);
                    self.chunk().emit_op(Op::MakeList, line);
                    self.chunk().emit_u16(1, line);
                    self.chunk().emit_op(Op::Spread, line);
                }
            }
        }
    }

    fn compile_infix(&mut self, expr: &Expr, op: BinOp, lhs: &Expr, rhs: &Expr, line: u32) {
        match op {
            BinOp::Or => {
                // Short-circuit: lhs true -> true.
                self.compile_expr(lhs, false);
                let rhs_jump = self.chunk().emit_jump(Op::JumpIfFalse, line);
                self.push_value(Value::Bool(true), line);
                let end = self.chunk().emit_jump(Op::Jump, line);
                self.chunk().patch_jump(rhs_jump);
                self.compile_expr(rhs, false);
                self.chunk().patch_jump(end);
            }
            BinOp::And => {
                self.compile_expr(lhs, false);
                let rhs_jump = self.chunk().emit_jump(Op::JumpIfTrue, line);
                self.push_value(Value::Bool(false), line);
                let end = self.chunk().emit_jump(Op::Jump, line);
                self.chunk().patch_jump(rhs_jump);
                self.compile_expr(rhs, false);
                self.chunk().patch_jump(end);
            }
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge
            | BinOp::Concat | BinOp::Combine | BinOp::Alt | BinOp::Shr | BinOp::Cons => {
                self.compile_expr(lhs, false);
                self.compile_expr(rhs, false);
                let opcode = match op {
                    BinOp::Eq => Op::Equal,
                    BinOp::Ne => Op::NotEqual,
                    BinOp::Lt => Op::Less,
                    BinOp::Gt => Op::Greater,
                    BinOp::Le => Op::LessEq,
                    BinOp::Ge => Op::GreaterEq,
                    BinOp::Concat | BinOp::Combine => Op::Concat,
                    BinOp::Alt => Op::Alt,
                    BinOp::Shr => Op::ShiftRight,
                    _ => Op::Cons,
                };
                self.chunk().emit_op(opcode, line);
            }
            BinOp::Pipe => {
                // `x |> f` -- callee below argument on the stack.
                self.compile_expr(rhs, false);
                self.compile_expr(lhs, false);
                self.chunk().emit_op(Op::Call, line);
                self.chunk().emit_u8(1, line);
            }
            BinOp::Apply => {
                self.compile_expr(lhs, false);
                self.compile_expr(rhs, false);
                self.chunk().emit_op(Op::Call, line);
                self.chunk().emit_u8(1, line);
            }
            BinOp::Compose => {
                self.compile_expr(lhs, false);
                self.compile_expr(rhs, false);
                self.chunk().emit_op(Op::MakeComposed, line);
            }
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem | BinOp::Pow
            | BinOp::Bind => {
                self.compile_expr(lhs, false);
                self.compile_expr(rhs, false);
                self.emit_dispatch(expr.id, 2, line);
            }
        }
    }

    /// Emit the dictionary load + `CallMethod` for a dispatch site.
    fn emit_dispatch(&mut self, node: NodeId, arity: u8, line: u32) {
        let method_ref = self
            .analysis
            .method_refs
            .get(&node)
            .unwrap_or_else(|| panic!("no method ref for dispatch node {node:?} (compiler bug)"))
            .clone();
        let witnesses = self
            .analysis
            .witnesses
            .get(&node)
            .unwrap_or_else(|| panic!("no witnesses for dispatch node {node:?} (compiler bug)"))
            .clone();
        let source = witnesses
            .get(method_ref.witness_slot)
            .expect("witness slot in range")
            .clone();
        self.emit_witness(&source, line);
        self.chunk().emit_op(Op::CallMethod, line);
        self.chunk().emit_u8(method_ref.method_index as u8, line);
        self.chunk().emit_u8(arity, line);
    }

    /// Push a dictionary value for a witness source.
    fn emit_witness(&mut self, source: &WitnessSource, line: u32) {
        match source {
            WitnessSource::Param(i) => {
                let name = format!("$w{i}");
                match self.resolve_name(&name) {
                    NameRef::Local(slot) => self.emit_get_local(slot, line),
                    NameRef::Upvalue(idx) => {
                        self.chunk().emit_op(Op::GetUpvalue, line);
                        self.chunk().emit_u8(idx, line);
                    }
                    NameRef::Global => {
                        panic!("witness parameter ${name} resolved to a global (compiler bug)")
                    }
                }
            }
            WitnessSource::Instance { id, .. } => {
                let dict = self.dict_const_for(*id);
                let idx = self.chunk().add_const(Const::Dict(dict));
                self.chunk().emit_op(Op::LoadDict, line);
                self.chunk().emit_u16(idx, line);
            }
        }
    }

    /// Build the dictionary descriptor for an instance, embedding
    /// compiled method functions into the current constant pool.
    fn dict_const_for(&mut self, id: funxy_typeck::InstanceId) -> DictConst {
        let def = self.analysis.instance_db.get(id).clone();
        let mut entries = Vec::with_capacity(def.methods.len());
        let method_names: Vec<String> = self
            .analysis
            .trait_registry
            .get(&def.trait_name)
            .map(|t| t.methods.iter().map(|m| m.name.clone()).collect())
            .unwrap_or_default();
        for (i, slot) in def.methods.iter().enumerate() {
            let entry = match slot {
                MethodImpl::Native(name) => DictEntry::Native(name.clone()),
                MethodImpl::Decl(node) => {
                    let function = self
                        .instance_fns
                        .get(node)
                        .unwrap_or_else(|| {
                            panic!("instance method {node:?} not compiled (compiler bug)")
                        })
                        .clone();
                    let idx = self.chunk().add_const(Const::Fn(function));
                    DictEntry::Fn(idx as u32)
                }
                MethodImpl::Default => {
                    let method = method_names.get(i).cloned().unwrap_or_default();
                    DictEntry::Default(format!("{}.{method}", def.trait_name))
                }
            };
            entries.push(entry);
        }
        DictConst { trait_name: def.trait_name, entries }
    }

    fn compile_call(
        &mut self,
        expr: &Expr,
        callee: &Expr,
        args: &[Expr],
        tail: bool,
        line: u32,
    ) {
        // Trait-method dispatch: args then dictionary then CallMethod.
        if self.analysis.method_refs.contains_key(&expr.id) {
            for arg in args {
                self.compile_expr(arg, false);
            }
            self.emit_dispatch(expr.id, args.len() as u8, line);
            return;
        }

        // Plain call: callee below arguments.
        match &callee.kind {
            ExprKind::TypeApp { expr: inner, .. } => self.compile_expr(inner, false),
            _ => self.compile_expr(callee, false),
        }
        for arg in args {
            self.compile_expr(arg, false);
        }
        let mut arity = args.len();
        if let Some(witnesses) = self.analysis.witnesses.get(&expr.id).cloned() {
            for source in &witnesses {
                self.emit_witness(source, line);
            }
            arity += witnesses.len();
        }

        let op = if tail && self.analysis.tail_calls.contains(&expr.id) {
            Op::TailCall
        } else {
            Op::Call
        };
        self.chunk().emit_op(op, line);
        self.chunk().emit_u8(arity as u8, line);
    }

    /// The local binding name when `obj` is a module reference.
    fn module_binding(&mut self, obj: &Expr) -> Option<String> {
        let ExprKind::Ident(_) = &obj.kind else { return None };
        let sym = self.analysis.resolutions.get(&obj.id)?;
        let symbol = self.analysis.symbols.symbol(*sym);
        if symbol.kind == SymbolKind::Module {
            Some(symbol.origin_module.clone())
        } else {
            None
        }
    }

    // ── Loops ──────────────────────────────────────────────────────────

    fn compile_for(&mut self, pat: &Pattern, iter: &Expr, body: &Expr, line: u32) {
        self.state().begin_scope();

        self.compile_expr(iter, false);
        let list_slot = self.state().scratch();
        self.emit_set_local(list_slot, line);
        self.push_value(Value::Int(0), line);
        let idx_slot = self.state().scratch();
        self.emit_set_local(idx_slot, line);

        let loop_start = self.chunk().code.len();
        self.state().loops.push(LoopCtx {
            break_sites: Vec::new(),
            continue_sites: Vec::new(),
        });

        // idx < listLen(list) ?
        self.emit_get_local(idx_slot, line);
        let len_idx = self.chunk().add_str("listLen");
        self.chunk().emit_op(Op::GetGlobal, line);
        self.chunk().emit_u16(len_idx, line);
        self.emit_get_local(list_slot, line);
        self.chunk().emit_op(Op::Call, line);
        self.chunk().emit_u8(1, line);
        self.chunk().emit_op(Op::Less, line);
        let exit = self.chunk().emit_jump(Op::JumpIfFalse, line);

        // Bind the element.
        self.state().begin_scope();
        self.emit_get_local(list_slot, line);
        self.emit_get_local(idx_slot, line);
        self.chunk().emit_op(Op::Index, line);
        self.compile_irrefutable_binding(pat, line);

        self.compile_expr(body, false);
        self.chunk().emit_op(Op::Pop, line);
        self.state().end_scope();

        // continue lands on the increment.
        let continue_target = self.chunk().code.len();
        let ctx = self.state().loops.last_mut().expect("loop ctx");
        let continue_sites = std::mem::take(&mut ctx.continue_sites);
        for site in continue_sites {
            let target = continue_target;
            let offset = (target as i64) - (site as i64 + 2);
            let bytes = (offset as i16).to_le_bytes();
            self.chunk().code[site] = bytes[0];
            self.chunk().code[site + 1] = bytes[1];
        }

        // idx += 1 (through the Int Add instance native).
        self.emit_get_local(idx_slot, line);
        self.push_value(Value::Int(1), line);
        let add_dict = DictConst {
            trait_name: "Add".to_string(),
            entries: vec![DictEntry::Native("add.Int".to_string())],
        };
        let dict_idx = self.chunk().add_const(Const::Dict(add_dict));
        self.chunk().emit_op(Op::LoadDict, line);
        self.chunk().emit_u16(dict_idx, line);
        self.chunk().emit_op(Op::CallMethod, line);
        self.chunk().emit_u8(0, line);
        self.chunk().emit_u8(2, line);
        self.emit_set_local(idx_slot, line);

        // Jump back.
        let distance = self.chunk().code.len() + 3 - loop_start;
        self.chunk().emit_op(Op::Loop, line);
        self.chunk().emit_u16(distance as u16, line);

        self.chunk().patch_jump(exit);
        let ctx = self.state().loops.pop().expect("loop ctx");
        for site in ctx.break_sites {
            self.chunk().patch_jump(site);
        }

        self.push_value(Value::Nil, line);
        self.state().end_scope();
    }

    // ── Pattern matching ───────────────────────────────────────────────

    /// Destructure the value on the stack with a pattern the analyzer
    /// guaranteed irrefutable in context; a runtime mismatch raises R001
    /// through the `#matchFail` native.
    fn compile_irrefutable_binding(&mut self, pat: &Pattern, line: u32) {
        self.chunk().emit_op(Op::MatchBegin, line);
        let mut fails = Vec::new();
        self.compile_pattern(pat, &mut fails);
        self.chunk().emit_op(Op::MatchEnd, line);
        let done = self.chunk().emit_jump(Op::Jump, line);
        for site in fails {
            self.chunk().patch_jump(site);
        }
        self.chunk().emit_op(Op::MatchEnd, line);
        let fail_idx = self.chunk().add_str("#matchFail");
        self.chunk().emit_op(Op::GetGlobal, line);
        self.chunk().emit_u16(fail_idx, line);
        self.push_value(Value::string("pattern match failed"), line);
        self.chunk().emit_op(Op::Call, line);
        self.chunk().emit_u8(1, line);
        self.chunk().emit_op(Op::Pop, line);
        self.chunk().patch_jump(done);
    }

    fn compile_match(
        &mut self,
        scrutinee: &Expr,
        arms: &[MatchArm],
        tail: bool,
        line: u32,
    ) {
        self.state().begin_scope();
        self.compile_expr(scrutinee, false);
        let scrut_slot = self.state().scratch();
        self.emit_set_local(scrut_slot, line);

        let mut end_jumps = Vec::new();
        for arm in arms {
            let arm_line = arm.pat.token.line;
            self.state().begin_scope();
            self.emit_get_local(scrut_slot, arm_line);
            self.chunk().emit_op(Op::MatchBegin, arm_line);
            let mut fails = Vec::new();
            self.compile_pattern(&arm.pat, &mut fails);
            self.chunk().emit_op(Op::MatchEnd, arm_line);

            // Guard runs after binding; a false guard falls through to
            // the next arm.
            let mut guard_fail = None;
            if let Some(guard) = &arm.guard {
                self.compile_expr(guard, false);
                guard_fail = Some(self.chunk().emit_jump(Op::JumpIfFalse, arm_line));
            }

            self.compile_expr(&arm.body, tail);
            end_jumps.push(self.chunk().emit_jump(Op::Jump, arm_line));

            // Failure paths: clear the focus, continue with the next arm.
            for site in fails {
                self.chunk().patch_jump(site);
            }
            self.chunk().emit_op(Op::MatchEnd, arm_line);
            if let Some(site) = guard_fail {
                self.chunk().patch_jump(site);
            }
            self.state().end_scope();
        }

        // No arm matched.
        let fail_idx = self.chunk().add_str("#matchFail");
        self.chunk().emit_op(Op::GetGlobal, line);
        self.chunk().emit_u16(fail_idx, line);
        self.push_value(Value::string("no pattern matched"), line);
        self.chunk().emit_op(Op::Call, line);
        self.chunk().emit_u8(1, line);

        for site in end_jumps {
            self.chunk().patch_jump(site);
        }
        self.state().end_scope();
    }

    /// Compile one pattern against the focus-stack top; failure sites are
    /// appended for the caller to patch.
    fn compile_pattern(&mut self, pat: &Pattern, fails: &mut Vec<usize>) {
        let line = pat.token.line;
        match &pat.kind {
            PatKind::Wildcard => {
                let slot = self.state().scratch();
                self.chunk().emit_op(Op::Bind, line);
                self.chunk().emit_u16(slot, line);
            }
            PatKind::Ident(name) | PatKind::Typed { name, .. } => {
                let slot = self.state().declare(name);
                self.chunk().emit_op(Op::Bind, line);
                self.chunk().emit_u16(slot, line);
            }
            PatKind::Literal(lit) => {
                let value = literal_value(lit);
                let idx = self.chunk().add_value(value);
                self.chunk().emit_op(Op::MatchLiteral, line);
                self.chunk().emit_u16(idx, line);
                fails.push(self.emit_fail_site(line));
            }
            PatKind::Ctor { name, args } => {
                let idx = self.chunk().add_str(name.clone());
                self.chunk().emit_op(Op::MatchTag, line);
                self.chunk().emit_u16(idx, line);
                fails.push(self.emit_fail_site(line));
                for arg in args {
                    self.compile_pattern(arg, fails);
                }
            }
            PatKind::Tuple(items) => {
                self.chunk().emit_op(Op::MatchTuple, line);
                self.chunk().emit_u16(items.len() as u16, line);
                fails.push(self.emit_fail_site(line));
                for item in items {
                    self.compile_pattern(item, fails);
                }
            }
            PatKind::List { elements, rest } => {
                self.chunk().emit_op(Op::MatchList, line);
                self.chunk().emit_u16(elements.len() as u16, line);
                self.chunk().emit_u8(u8::from(rest.is_some()), line);
                fails.push(self.emit_fail_site(line));
                for element in elements {
                    self.compile_pattern(element, fails);
                }
                if let Some(rest) = rest {
                    self.compile_pattern(rest, fails);
                }
            }
            PatKind::Record { fields, .. } => {
                self.chunk().emit_op(Op::MatchRecord, line);
                self.chunk().emit_u16(fields.len() as u16, line);
                let fail_site = self.emit_fail_site(line);
                fails.push(fail_site);
                for (name, _) in fields {
                    let idx = self.chunk().add_str(name.clone());
                    self.chunk().emit_u16(idx, line);
                }
                for (name, sub) in fields {
                    match sub {
                        Some(p) => self.compile_pattern(p, fails),
                        None => {
                            let slot = self.state().declare(name);
                            self.chunk().emit_op(Op::Bind, line);
                            self.chunk().emit_u16(slot, line);
                        }
                    }
                }
            }
            PatKind::Str(parts) => {
                let compiled: Vec<StrPatPart> = parts
                    .iter()
                    .map(|p| match p {
                        AstStrPart::Lit(text) => StrPatPart::Lit(text.clone()),
                        AstStrPart::Capture(_) => StrPatPart::Capture,
                    })
                    .collect();
                let idx = self.chunk().add_const(Const::StrPat(compiled));
                self.chunk().emit_op(Op::MatchStr, line);
                self.chunk().emit_u16(idx, line);
                fails.push(self.emit_fail_site(line));
                for part in parts {
                    if let AstStrPart::Capture(name) = part {
                        let slot = self.state().declare(name);
                        self.chunk().emit_op(Op::Bind, line);
                        self.chunk().emit_u16(slot, line);
                    }
                }
            }
            PatKind::Pin(name) => {
                match self.resolve_name(name) {
                    NameRef::Local(slot) => self.emit_get_local(slot, line),
                    NameRef::Upvalue(idx) => {
                        self.chunk().emit_op(Op::GetUpvalue, line);
                        self.chunk().emit_u8(idx, line);
                    }
                    NameRef::Global => {
                        let idx = self.chunk().add_str(name.clone());
                        self.chunk().emit_op(Op::GetGlobal, line);
                        self.chunk().emit_u16(idx, line);
                    }
                }
                self.chunk().emit_op(Op::MatchPin, line);
                fails.push(self.emit_fail_site(line));
            }
        }
    }

    /// Reserve the `i16` fail-offset operand of the current match op.
    fn emit_fail_site(&mut self, line: u32) -> usize {
        let site = self.chunk().code.len();
        self.chunk().emit_i16(0, line);
        site
    }
}

fn literal_value(lit: &PatLit) -> Value {
    match lit {
        PatLit::Int(v) => Value::Int(*v),
        PatLit::BigInt(v) => Value::BigInt(Rc::new(v.clone())),
        PatLit::Float(v) => Value::Float(*v),
        PatLit::Bool(v) => Value::Bool(*v),
        PatLit::Char(c) => Value::Char(*c),
        PatLit::Str(s) => Value::string(s.clone()),
        PatLit::Nil => Value::Nil,
    }
}

fn ctor_runtime_value(type_name: &str, name: &str, tag: u32, arity: usize) -> Value {
    if arity == 0 {
        Value::Ctor(Rc::new(CtorValue {
            type_name: Rc::from(type_name),
            name: Rc::from(name),
            tag,
            fields: Vec::new(),
        }))
    } else {
        Value::CtorFn(Rc::new(CtorFn {
            type_name: Rc::from(type_name),
            name: Rc::from(name),
            tag,
            arity,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use funxy_typeck::{analyze, AnalyzerOptions};

    fn compile(source: &str) -> Chunk {
        let parse = funxy_parser::parse(source, "test.fx");
        assert!(!parse.has_errors(), "parse errors: {:?}", parse.diagnostics.diagnostics());
        let analysis = analyze(&[&parse.program], AnalyzerOptions::default());
        assert!(
            !analysis.has_errors(),
            "analysis errors: {:?}",
            analysis.diagnostics.diagnostics()
        );
        compile_module(&analysis, &[&parse.program], "test.fx")
    }

    #[test]
    fn module_chunk_ends_with_halt() {
        let chunk = compile("x = 1 + 2\nx");
        assert_eq!(chunk.code.last().copied(), Some(Op::Halt as u8));
        assert_eq!(chunk.lines.len(), chunk.code.len());
    }

    #[test]
    fn arithmetic_emits_dictionary_dispatch() {
        let chunk = compile("1 + 2");
        assert!(chunk.code.contains(&(Op::LoadDict as u8)));
        assert!(chunk.code.contains(&(Op::CallMethod as u8)));
        assert!(chunk
            .constants
            .iter()
            .any(|c| matches!(c, Const::Dict(d) if d.trait_name == "Add")));
    }

    #[test]
    fn functions_compile_into_constants() {
        let chunk = compile("fun inc(x: Int) -> Int { x + 1 }\ninc(41)");
        let function = chunk.constants.iter().find_map(|c| match c {
            Const::Fn(f) => Some(f),
            _ => None,
        });
        let function = function.expect("inc compiled into the pool");
        assert_eq!(function.name, "inc");
        assert_eq!(function.arity, 1);
        assert_eq!(
            function.chunk.code.last().copied(),
            Some(Op::Return as u8)
        );
    }

    #[test]
    fn tail_recursive_call_uses_tailcall() {
        let chunk = compile(
            "fun count(n: Int) -> Int { if n == 0 { 0 } else { count(n - 1) } }",
        );
        let function = chunk
            .constants
            .iter()
            .find_map(|c| match c {
                Const::Fn(f) if f.name == "count" => Some(f),
                _ => None,
            })
            .expect("count compiled");
        assert!(function.chunk.code.contains(&(Op::TailCall as u8)));
    }

    #[test]
    fn match_compiles_tag_tests() {
        let chunk = compile(
            "type Shape = Circle Float | Rect Float Float\n\
             fun area(s: Shape) -> Float {\n\
               match s { Circle(r) -> r, Rect(w, h) -> w }\n\
             }",
        );
        let function = chunk
            .constants
            .iter()
            .find_map(|c| match c {
                Const::Fn(f) if f.name == "area" => Some(f),
                _ => None,
            })
            .expect("area compiled");
        assert!(function.chunk.code.contains(&(Op::MatchTag as u8)));
        assert!(function.chunk.code.contains(&(Op::MatchBegin as u8)));
    }

    #[test]
    fn imports_become_pending_entries() {
        let parse = funxy_parser::parse("import \"lib/math\"\n1", "test.fx");
        let analysis = analyze(&[&parse.program], AnalyzerOptions::default());
        let chunk = compile_module(&analysis, &[&parse.program], "test.fx");
        assert_eq!(chunk.pending_imports.len(), 1);
        assert_eq!(chunk.pending_imports[0].path, "lib/math");
        assert!(chunk.code.contains(&(Op::Import as u8)));
    }
}
