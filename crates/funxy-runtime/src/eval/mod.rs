//! The tree-walk evaluator.
//!
//! Walks the analyzed AST with a lexical chain of environments. Closures
//! capture environments by reference (`Rc<Env>`); marked tail calls
//! return a trampoline signal that the call loop re-enters without
//! growing the host stack. Runtime errors are `ErrorValue`s propagated as
//! `Err`; the `trap` native converts them into `Result` values.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use funxy_parser::ast::{
    BinOp, Block, Expr, ExprKind, FunctionDecl, FunctionLit, InterpPart, MatchArm, NodeId,
    PatKind, PatLit, Pattern, Program, Stmt, StmtKind, StrPatPart, UnOp,
};
use funxy_typeck::infer::{Analysis, MethodRef, WitnessSource};
use funxy_typeck::traits::MethodImpl;
use funxy_typeck::SymbolKind;

use crate::native::{call_native, NATIVE_NAMES};
use crate::value::{
    compare_values, concat_values, values_equal, BitString, CtorFn, CtorValue, ErrorValue,
    Value,
};

/// A lexical environment frame.
#[derive(Debug)]
pub struct Env {
    vars: RefCell<FxHashMap<String, Value>>,
    parent: Option<Rc<Env>>,
}

impl Env {
    pub fn root() -> Rc<Env> {
        Rc::new(Env { vars: RefCell::new(FxHashMap::default()), parent: None })
    }

    pub fn child(parent: &Rc<Env>) -> Rc<Env> {
        Rc::new(Env {
            vars: RefCell::new(FxHashMap::default()),
            parent: Some(Rc::clone(parent)),
        })
    }

    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.vars.borrow_mut().insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.vars.borrow().get(name) {
            return Some(value.clone());
        }
        self.parent.as_ref().and_then(|p| p.get(name))
    }

    /// Names defined directly in this frame (not in parents).
    pub fn local_names(&self) -> Vec<String> {
        self.vars.borrow().keys().cloned().collect()
    }
}

/// Callable description of a function body.
#[derive(Debug)]
pub struct FnSpec {
    pub name: String,
    pub params: Vec<ParamSpec>,
    /// Names of the implicit dictionary parameters (`$w0`, `$w1`, ...).
    pub witness_names: Vec<String>,
    pub variadic: bool,
    pub body: Expr,
}

#[derive(Debug)]
pub struct ParamSpec {
    pub name: String,
    pub default: Option<Expr>,
}

/// A tree-walking closure: spec plus captured environment.
#[derive(Debug)]
pub struct TreeClosure {
    pub spec: Rc<FnSpec>,
    pub env: Rc<Env>,
}

/// One instance's dictionary recipe inside an [`ExecPlan`].
#[derive(Debug, Clone)]
pub struct PlanInstance {
    pub trait_name: String,
    /// Trait method names in dictionary order (for default lookup).
    pub method_names: Vec<String>,
    pub methods: Vec<MethodImpl>,
}

/// The merged execution view over every analyzed module.
///
/// Node ids are globally unique (the loader threads one id generator
/// through every parse), so the per-module dispatch tables merge into
/// flat maps; instance ids are remapped into one plan-wide space because
/// each module's analysis numbers its instance database independently.
/// Closures cross module boundaries freely once their dispatch data lives
/// here.
#[derive(Debug, Default)]
pub struct ExecPlan {
    method_refs: FxHashMap<NodeId, MethodRef>,
    witnesses: FxHashMap<NodeId, Vec<WitnessSource>>,
    fn_constraint_counts: FxHashMap<NodeId, usize>,
    tail_calls: rustc_hash::FxHashSet<NodeId>,
    instances: Vec<PlanInstance>,
    /// Identifier nodes that resolve to imported modules, with their
    /// local binding name.
    module_refs: FxHashMap<NodeId, String>,
}

impl ExecPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one module's analysis into the plan, remapping its instance
    /// ids onto the plan-wide space.
    pub fn add_analysis(&mut self, analysis: &Analysis) {
        let base = self.instances.len() as u32;

        for id in 0..analysis.instance_db.len() as u32 {
            let def = analysis.instance_db.get(funxy_typeck::InstanceId(id));
            let method_names = analysis
                .trait_registry
                .get(&def.trait_name)
                .map(|t| t.methods.iter().map(|m| m.name.clone()).collect())
                .unwrap_or_default();
            self.instances.push(PlanInstance {
                trait_name: def.trait_name.clone(),
                method_names,
                methods: def.methods.clone(),
            });
        }

        for (node, method_ref) in &analysis.method_refs {
            self.method_refs.insert(*node, method_ref.clone());
        }
        for (node, sources) in &analysis.witnesses {
            let remapped = sources.iter().map(|s| remap_witness(s, base)).collect();
            self.witnesses.insert(*node, remapped);
        }
        for (node, constraints) in &analysis.fn_constraints {
            self.fn_constraint_counts.insert(*node, constraints.len());
        }
        self.tail_calls.extend(analysis.tail_calls.iter().copied());

        for (node, sym) in &analysis.resolutions {
            let symbol = analysis.symbols.symbol(*sym);
            if symbol.kind == SymbolKind::Module {
                self.module_refs.insert(*node, symbol.origin_module.clone());
            }
        }
    }
}

fn remap_witness(source: &WitnessSource, base: u32) -> WitnessSource {
    match source {
        WitnessSource::Param(i) => WitnessSource::Param(*i),
        WitnessSource::Instance { id, deps } => WitnessSource::Instance {
            id: funxy_typeck::InstanceId(id.0 + base),
            deps: deps.iter().map(|d| remap_witness(d, base)).collect(),
        },
    }
}

/// Non-value control flow during evaluation.
enum Control {
    Error(ErrorValue),
    Return(Value),
    Break,
    Continue,
    /// A marked tail call, re-entered by the trampoline.
    Tail(Value, Vec<Value>),
}

impl From<ErrorValue> for Control {
    fn from(e: ErrorValue) -> Control {
        Control::Error(e)
    }
}

type EvalResult = Result<Value, Control>;

fn err(e: ErrorValue) -> Control {
    Control::Error(e)
}

/// The evaluator for a whole program: one instance walks every module in
/// dependency order, so closures, instance methods, and defaults cross
/// module boundaries naturally.
pub struct Evaluator {
    plan: ExecPlan,
    /// Module-level environment of the module being evaluated.
    globals: Rc<Env>,
    /// Closures for instance method declarations, by decl node.
    instance_methods: FxHashMap<NodeId, Value>,
    /// Closures for trait default bodies, by (trait, method).
    default_methods: FxHashMap<(String, String), Value>,
    /// Built dictionaries per (plan-wide) instance id.
    dict_cache: FxHashMap<u32, Value>,
    /// Environments of imported modules, by local binding name.
    module_envs: FxHashMap<String, Rc<Env>>,
    /// Whether the expression currently evaluated sits in tail position.
    in_tail: bool,
}

impl Evaluator {
    pub fn new(plan: ExecPlan) -> Self {
        let globals = Env::root();
        seed_builtins(&globals);
        Evaluator {
            plan,
            globals,
            instance_methods: FxHashMap::default(),
            default_methods: FxHashMap::default(),
            dict_cache: FxHashMap::default(),
            module_envs: FxHashMap::default(),
            in_tail: false,
        }
    }

    /// Convenience for single-module programs.
    pub fn for_analysis(analysis: &Analysis) -> Self {
        let mut plan = ExecPlan::new();
        plan.add_analysis(analysis);
        Evaluator::new(plan)
    }

    pub fn globals(&self) -> Rc<Env> {
        Rc::clone(&self.globals)
    }

    /// Start a fresh module scope; earlier modules' bindings stay
    /// reachable only through their registered environments.
    pub fn begin_module(&mut self) -> Rc<Env> {
        let env = Env::root();
        seed_builtins(&env);
        self.globals = Rc::clone(&env);
        env
    }

    /// Make an already-evaluated module visible for qualified access.
    pub fn register_module(&mut self, binding: impl Into<String>, env: Rc<Env>) {
        self.module_envs.insert(binding.into(), env);
    }

    /// Inject a value directly into the module scope (direct imports,
    /// virtual module natives).
    pub fn define_global(&mut self, name: impl Into<String>, value: Value) {
        self.globals.define(name, value);
    }

    /// Evaluate the files of one module in order. Returns the value of
    /// the last top-level expression (or nil).
    pub fn run_files(&mut self, files: &[Program]) -> Result<Value, ErrorValue> {
        let mut last = Value::Nil;
        for program in files {
            for stmt in &program.stmts {
                match self.exec_top_stmt(stmt) {
                    Ok(value) => last = value,
                    Err(Control::Error(e)) => return Err(e),
                    Err(_) => {
                        return Err(ErrorValue::new(
                            "R008",
                            "control flow escaped the top level",
                        ))
                    }
                }
            }
        }
        Ok(last)
    }

    // ── Statements ─────────────────────────────────────────────────────

    fn exec_top_stmt(&mut self, stmt: &Stmt) -> EvalResult {
        match &stmt.kind {
            StmtKind::TypeDecl(decl) => {
                self.define_ctors(decl);
                Ok(Value::Nil)
            }
            StmtKind::Trait(decl) => {
                for method in &decl.methods {
                    if let Some(body) = &method.default_body {
                        let spec = Rc::new(FnSpec {
                            name: format!("{}.{}", decl.name, method.name),
                            params: method
                                .params
                                .iter()
                                .map(|p| ParamSpec { name: p.name.clone(), default: None })
                                .collect(),
                            witness_names: self.witness_names_of(method.id),
                            variadic: false,
                            body: body.clone(),
                        });
                        let closure = Value::TreeClosure(Rc::new(TreeClosure {
                            spec,
                            env: self.globals(),
                        }));
                        self.default_methods
                            .insert((decl.name.clone(), method.name.clone()), closure);
                    }
                }
                Ok(Value::Nil)
            }
            StmtKind::Instance(decl) => {
                for method in &decl.methods {
                    let closure = self.make_closure_from_decl(method, &self.globals());
                    self.instance_methods.insert(method.id, closure);
                }
                Ok(Value::Nil)
            }
            _ => {
                let env = self.globals();
                self.exec_stmt(stmt, &env)
            }
        }
    }

    fn define_ctors(&mut self, decl: &funxy_parser::ast::TypeDecl) {
        if let funxy_parser::ast::TypeDeclBody::Adt(ctors) = &decl.body {
            for (tag, ctor) in ctors.iter().enumerate() {
                let value = make_ctor_value(&decl.name, &ctor.name, tag as u32, ctor.fields.len());
                self.globals.define(ctor.name.clone(), value);
            }
        }
    }

    fn exec_stmt(&mut self, stmt: &Stmt, env: &Rc<Env>) -> EvalResult {
        match &stmt.kind {
            StmtKind::Expr(expr) => self.eval_expr(expr, env),
            StmtKind::Const { name, value, .. } => {
                let v = self.eval_plain(value, env)?;
                env.define(name.clone(), v);
                Ok(Value::Nil)
            }
            StmtKind::ConstPattern { pat, value } => {
                let v = self.eval_plain(value, env)?;
                if !self.match_pattern(pat, &v, env)? {
                    return Err(err(ErrorValue::new(
                        "R001",
                        format!("pattern did not match value `{v}`"),
                    )
                    .at_line(pat.token.line)));
                }
                Ok(Value::Nil)
            }
            StmtKind::Function(decl) => {
                let closure = self.make_closure_from_decl(decl, env);
                env.define(decl.name.clone(), closure);
                Ok(Value::Nil)
            }
            StmtKind::TypeDecl(decl) => {
                self.define_ctors(decl);
                Ok(Value::Nil)
            }
            StmtKind::Trait(_) | StmtKind::Instance(_) => Ok(Value::Nil),
            StmtKind::Directive { .. } => Ok(Value::Nil),
            StmtKind::Break => Err(Control::Break),
            StmtKind::Continue => Err(Control::Continue),
            StmtKind::Return(value) => {
                let v = match value {
                    Some(e) => self.eval_tailable(e, env)?,
                    None => Value::Nil,
                };
                Err(Control::Return(v))
            }
        }
    }

    // ── Function construction ──────────────────────────────────────────

    fn witness_names_of(&self, fn_node: NodeId) -> Vec<String> {
        let count = self
            .plan
            .fn_constraint_counts
            .get(&fn_node)
            .copied()
            .unwrap_or(0);
        (0..count).map(|i| format!("$w{i}")).collect()
    }

    fn make_closure_from_decl(&self, decl: &FunctionDecl, env: &Rc<Env>) -> Value {
        let spec = Rc::new(FnSpec {
            name: decl.name.clone(),
            params: decl
                .params
                .iter()
                .map(|p| ParamSpec { name: p.name.clone(), default: p.default.clone() })
                .collect(),
            witness_names: self.witness_names_of(decl.id),
            variadic: decl.params.iter().any(|p| p.variadic),
            body: decl.body.clone(),
        });
        Value::TreeClosure(Rc::new(TreeClosure { spec, env: Rc::clone(env) }))
    }

    fn make_closure_from_lit(&self, expr: &Expr, lit: &FunctionLit, env: &Rc<Env>) -> Value {
        let spec = Rc::new(FnSpec {
            name: "<lambda>".to_string(),
            params: lit
                .params
                .iter()
                .map(|p| ParamSpec { name: p.name.clone(), default: p.default.clone() })
                .collect(),
            witness_names: self.witness_names_of(expr.id),
            variadic: false,
            body: (*lit.body).clone(),
        });
        Value::TreeClosure(Rc::new(TreeClosure { spec, env: Rc::clone(env) }))
    }

    // ── Calls ──────────────────────────────────────────────────────────

    /// Call any callable value, trampolining marked tail calls.
    pub fn call_value(&mut self, callee: &Value, args: Vec<Value>) -> Result<Value, ErrorValue> {
        let mut callee = callee.clone();
        let mut args = args;
        loop {
            match callee {
                Value::TreeClosure(ref closure) => {
                    let closure = Rc::clone(closure);
                    match self.exec_closure(&closure, args)? {
                        Trampoline::Done(value) => return Ok(value),
                        Trampoline::Tail(next, next_args) => {
                            callee = next;
                            args = next_args;
                        }
                    }
                }
                Value::Native(ref name) => {
                    let name = name.to_string();
                    return self.call_native_by_name(&name, &args);
                }
                Value::CtorFn(ref ctor) => {
                    if args.len() != ctor.arity {
                        return Err(ErrorValue::new(
                            "R008",
                            format!(
                                "constructor {} takes {} argument(s), got {}",
                                ctor.name,
                                ctor.arity,
                                args.len()
                            ),
                        ));
                    }
                    return Ok(Value::Ctor(Rc::new(CtorValue {
                        type_name: Rc::clone(&ctor.type_name),
                        name: Rc::clone(&ctor.name),
                        tag: ctor.tag,
                        fields: args,
                    })));
                }
                Value::Composed(ref pair) => {
                    let (outer, inner) = (pair.0.clone(), pair.1.clone());
                    let mid = self.call_value(&inner, args)?;
                    callee = outer;
                    args = vec![mid];
                }
                other => {
                    return Err(ErrorValue::new(
                        "R008",
                        format!("value of type {} is not callable", other.type_name()),
                    ))
                }
            }
        }
    }

    fn call_native_by_name(&mut self, name: &str, args: &[Value]) -> Result<Value, ErrorValue> {
        // Natives that call back into the language get a reentrant
        // applier over this evaluator.
        let mut this = std::ptr::NonNull::from(&mut *self);
        let mut apply = move |f: &Value, call_args: &[Value]| -> Result<Value, ErrorValue> {
            // One mutable borrow at a time: natives call the applier
            // synchronously and never hold it across their own return.
            let evaluator = unsafe { this.as_mut() };
            evaluator.call_value(f, call_args.to_vec())
        };
        call_native(name, args, &mut apply)
    }

    fn exec_closure(
        &mut self,
        closure: &TreeClosure,
        mut args: Vec<Value>,
    ) -> Result<Trampoline, ErrorValue> {
        let spec = &closure.spec;
        let env = Env::child(&closure.env);

        // Dictionary-dispatched defaults receive their dictionary from
        // the dispatch site; everything else arrives positionally.
        let expected_witnesses = spec.witness_names.len();
        let fixed = spec.params.len() - usize::from(spec.variadic);

        // Split off witness arguments from the tail.
        let witness_args: Vec<Value> = if expected_witnesses > 0 {
            if args.len() < expected_witnesses {
                return Err(ErrorValue::new(
                    "R009",
                    format!("{}: missing dictionary arguments", spec.name),
                ));
            }
            args.split_off(args.len() - expected_witnesses)
        } else {
            Vec::new()
        };

        if spec.variadic {
            if args.len() < fixed {
                return Err(ErrorValue::new(
                    "R008",
                    format!("{}: not enough arguments", spec.name),
                ));
            }
            let rest = args.split_off(fixed);
            for (param, value) in spec.params[..fixed].iter().zip(args) {
                env.define(param.name.clone(), value);
            }
            let rest_name = &spec.params[fixed].name;
            env.define(rest_name.clone(), Value::list(rest));
        } else {
            if args.len() > spec.params.len() {
                return Err(ErrorValue::new(
                    "R008",
                    format!("{}: too many arguments", spec.name),
                ));
            }
            let provided = args.len();
            for (param, value) in spec.params.iter().zip(args) {
                env.define(param.name.clone(), value);
            }
            // Fill missing trailing parameters from their defaults.
            for param in &spec.params[provided..] {
                match &param.default {
                    Some(default) => {
                        let value = self.eval_plain_control(default, &env)?;
                        env.define(param.name.clone(), value);
                    }
                    None => {
                        return Err(ErrorValue::new(
                            "R008",
                            format!("{}: missing argument `{}`", spec.name, param.name),
                        ))
                    }
                }
            }
        }

        for (name, value) in spec.witness_names.iter().zip(witness_args) {
            env.define(name.clone(), value);
        }

        match self.eval_tail_expr(&spec.body, &env) {
            Ok(value) => Ok(Trampoline::Done(value)),
            Err(Control::Return(value)) => Ok(Trampoline::Done(value)),
            Err(Control::Tail(next, next_args)) => Ok(Trampoline::Tail(next, next_args)),
            Err(Control::Error(e)) => Err(e),
            Err(Control::Break | Control::Continue) => Err(ErrorValue::new(
                "R008",
                "break/continue escaped a function body",
            )),
        }
    }

    // ── Expressions ────────────────────────────────────────────────────

    /// Evaluate in non-tail context, converting control-flow leaks.
    fn eval_plain(&mut self, expr: &Expr, env: &Rc<Env>) -> EvalResult {
        let saved = std::mem::replace(&mut self.in_tail, false);
        let result = self.eval_expr(expr, env);
        self.in_tail = saved;
        result
    }

    fn eval_plain_control(&mut self, expr: &Expr, env: &Rc<Env>) -> Result<Value, ErrorValue> {
        match self.eval_plain(expr, env) {
            Ok(value) => Ok(value),
            Err(Control::Error(e)) => Err(e),
            Err(_) => Err(ErrorValue::new("R008", "unexpected control flow")),
        }
    }

    /// Evaluate a function body: tail positions may yield `Control::Tail`.
    fn eval_tail_expr(&mut self, expr: &Expr, env: &Rc<Env>) -> EvalResult {
        let saved = std::mem::replace(&mut self.in_tail, true);
        let result = self.eval_expr(expr, env);
        self.in_tail = saved;
        result
    }

    /// Evaluate preserving the current tail-ness (if/match branches).
    fn eval_tailable(&mut self, expr: &Expr, env: &Rc<Env>) -> EvalResult {
        self.eval_expr(expr, env)
    }

    fn eval_expr(&mut self, expr: &Expr, env: &Rc<Env>) -> EvalResult {
        match &expr.kind {
            ExprKind::Int(v) => Ok(Value::Int(*v)),
            ExprKind::BigInt(v) => Ok(Value::BigInt(Rc::new(v.clone()))),
            ExprKind::Rational(v) => Ok(Value::Rational(Rc::new(v.clone()))),
            ExprKind::Float(v) => Ok(Value::Float(*v)),
            ExprKind::Bool(v) => Ok(Value::Bool(*v)),
            ExprKind::Nil => Ok(Value::Nil),
            ExprKind::Str(s) => Ok(Value::string(s.clone())),
            ExprKind::Char(c) => Ok(Value::Char(*c)),
            ExprKind::Bytes(bytes) => Ok(Value::Bytes(Rc::new(bytes.clone()))),
            ExprKind::Bits { data, len } => Ok(Value::Bits(Rc::new(BitString {
                data: data.clone(),
                len: *len,
            }))),
            ExprKind::InterpStr(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        InterpPart::Lit(text) => out.push_str(text),
                        InterpPart::Expr(e) => {
                            let value = self.eval_plain(e, env)?;
                            out.push_str(&value.to_string());
                        }
                    }
                }
                Ok(Value::string(out))
            }

            ExprKind::Ident(name) => self.eval_ident(expr, name, env),

            ExprKind::Tuple(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval_plain(item, env)?);
                }
                Ok(Value::Tuple(Rc::new(values)))
            }
            ExprKind::List(items) => {
                let mut values = Vec::new();
                for item in items {
                    if let ExprKind::Spread(inner) = &item.kind {
                        match self.eval_plain(inner, env)? {
                            Value::List(chunk) => values.extend(chunk.iter().cloned()),
                            other => {
                                return Err(err(ErrorValue::new(
                                    "R008",
                                    format!("cannot spread {}", other.type_name()),
                                )
                                .at_line(item.token.line)))
                            }
                        }
                    } else {
                        values.push(self.eval_plain(item, env)?);
                    }
                }
                Ok(Value::list(values))
            }
            ExprKind::Map(entries) => {
                let mut out = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    let key = self.eval_plain(k, env)?;
                    let value = self.eval_plain(v, env)?;
                    out.push((key, value));
                }
                Ok(Value::Map(Rc::new(out)))
            }
            ExprKind::Record { fields, spread } => {
                let mut map = std::collections::BTreeMap::new();
                if let Some(base) = spread {
                    match self.eval_plain(base, env)? {
                        Value::Record(existing) => {
                            map.extend(existing.iter().map(|(k, v)| (k.clone(), v.clone())));
                        }
                        other => {
                            return Err(err(ErrorValue::new(
                                "R008",
                                format!("cannot spread {} into a record", other.type_name()),
                            )
                            .at_line(expr.token.line)))
                        }
                    }
                }
                for (name, value) in fields {
                    let v = self.eval_plain(value, env)?;
                    map.insert(name.clone(), v);
                }
                Ok(Value::Record(Rc::new(map)))
            }

            ExprKind::Prefix { op, rhs } => self.eval_prefix(expr, *op, rhs, env),
            ExprKind::Infix { op, lhs, rhs } => self.eval_infix(expr, *op, lhs, rhs, env),
            ExprKind::Call { callee, args } => self.eval_call(expr, callee, args, env),

            ExprKind::Index { obj, index } => {
                let obj_v = self.eval_plain(obj, env)?;
                let index_v = self.eval_plain(index, env)?;
                self.eval_index(&obj_v, &index_v, expr.token.line).map_err(err)
            }

            ExprKind::Member { obj, name } => self.eval_member(expr, obj, name, env),

            ExprKind::Annotated { expr: inner, .. } => self.eval_tailable(inner, env),

            ExprKind::Assign { target, value } => {
                let v = self.eval_plain(value, env)?;
                if let ExprKind::Ident(name) = &target.kind {
                    env.define(name.clone(), v);
                }
                Ok(Value::Nil)
            }

            ExprKind::TypeApp { expr: inner, .. } => self.eval_tailable(inner, env),

            ExprKind::Lambda(lit) => Ok(self.make_closure_from_lit(expr, lit, env)),

            ExprKind::If { cond, then_branch, else_branch } => {
                let cond_v = self.eval_plain(cond, env)?;
                match cond_v.as_bool() {
                    Some(true) => self.eval_tailable(then_branch, env),
                    Some(false) => match else_branch {
                        Some(e) => self.eval_tailable(e, env),
                        None => Ok(Value::Nil),
                    },
                    None => Err(err(ErrorValue::new(
                        "R008",
                        format!("condition is {}, not Bool", cond_v.type_name()),
                    )
                    .at_line(cond.token.line))),
                }
            }

            ExprKind::For { pat, iter, body } => {
                let iterable = self.eval_plain(iter, env)?;
                let Value::List(items) = iterable else {
                    return Err(err(ErrorValue::new(
                        "R008",
                        format!("cannot iterate over {}", iterable.type_name()),
                    )
                    .at_line(iter.token.line)));
                };
                for item in items.iter() {
                    let loop_env = Env::child(env);
                    if !self.match_pattern(pat, item, &loop_env)? {
                        return Err(err(ErrorValue::new(
                            "R001",
                            "for-loop pattern did not match",
                        )
                        .at_line(pat.token.line)));
                    }
                    match self.eval_plain(body, &loop_env) {
                        Ok(_) => {}
                        Err(Control::Break) => break,
                        Err(Control::Continue) => continue,
                        Err(other) => return Err(other),
                    }
                }
                Ok(Value::Nil)
            }

            ExprKind::Match { scrutinee, arms } => self.eval_match(expr, scrutinee, arms, env),

            ExprKind::Block(block) => self.eval_block(block, env),

            ExprKind::Spread(_) => Err(err(ErrorValue::new(
                "R008",
                "spread outside of a list literal",
            )
            .at_line(expr.token.line))),

            ExprKind::Range { start, end } => {
                let start_v = self.eval_plain(start, env)?;
                let end_v = self.eval_plain(end, env)?;
                match (start_v, end_v) {
                    (Value::Int(a), Value::Int(b)) => {
                        Ok(Value::list((a..b).map(Value::Int).collect()))
                    }
                    (a, b) => Err(err(ErrorValue::new(
                        "R008",
                        format!("range bounds must be Int, got {} and {}", a.type_name(), b.type_name()),
                    )
                    .at_line(expr.token.line))),
                }
            }
        }
    }

    fn eval_ident(&mut self, expr: &Expr, name: &str, env: &Rc<Env>) -> EvalResult {
        if let Some(value) = env.get(name) {
            return Ok(value);
        }
        // Module symbols resolve through the analyzer.
        if self.plan.module_refs.contains_key(&expr.id) {
            // Bare module references have no value; member access
            // handles them.
            return Ok(Value::Nil);
        }
        Err(err(ErrorValue::new(
            "R008",
            format!("undefined identifier `{name}` at runtime"),
        )
        .at_line(expr.token.line)))
    }

    fn eval_member(&mut self, expr: &Expr, obj: &Expr, name: &str, env: &Rc<Env>) -> EvalResult {
        // Qualified module access?
        if let ExprKind::Ident(obj_name) = &obj.kind {
            if let Some(binding) = self.plan.module_refs.get(&obj.id).cloned() {
                if let Some(module_env) = self.module_envs.get(&binding) {
                    if let Some(value) = module_env.get(name) {
                        return Ok(value);
                    }
                }
                return Err(err(ErrorValue::new(
                    "R005",
                    format!("module `{obj_name}` has no member `{name}`"),
                )
                .at_line(expr.token.line)));
            }
        }

        let obj_v = self.eval_plain(obj, env)?;
        match &obj_v {
            Value::Record(fields) => fields.get(name).cloned().ok_or_else(|| {
                err(ErrorValue::new(
                    "R005",
                    format!("record has no field `{name}`"),
                )
                .at_line(expr.token.line))
            }),
            other => Err(err(ErrorValue::new(
                "R008",
                format!("cannot access member `{name}` of {}", other.type_name()),
            )
            .at_line(expr.token.line))),
        }
    }

    fn eval_prefix(&mut self, expr: &Expr, op: UnOp, rhs: &Expr, env: &Rc<Env>) -> EvalResult {
        let value = self.eval_plain(rhs, env)?;
        match op {
            UnOp::Not => match value.as_bool() {
                Some(b) => Ok(Value::Bool(!b)),
                None => Err(err(ErrorValue::new(
                    "R008",
                    format!("cannot negate {}", value.type_name()),
                )
                .at_line(expr.token.line))),
            },
            UnOp::Neg => {
                // Dictionary dispatch through the Neg trait.
                self.dispatch_method(expr.id, vec![value], expr.token.line, env)
            }
        }
    }

    fn eval_infix(
        &mut self,
        expr: &Expr,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        env: &Rc<Env>,
    ) -> EvalResult {
        match op {
            BinOp::Or => {
                let l = self.eval_plain(lhs, env)?;
                match l.as_bool() {
                    Some(true) => Ok(Value::Bool(true)),
                    Some(false) => self.eval_plain(rhs, env),
                    None => Err(err(ErrorValue::new("R008", "`||` needs Bool operands")
                        .at_line(expr.token.line))),
                }
            }
            BinOp::And => {
                let l = self.eval_plain(lhs, env)?;
                match l.as_bool() {
                    Some(false) => Ok(Value::Bool(false)),
                    Some(true) => self.eval_plain(rhs, env),
                    None => Err(err(ErrorValue::new("R008", "`&&` needs Bool operands")
                        .at_line(expr.token.line))),
                }
            }
            BinOp::Eq | BinOp::Ne => {
                let l = self.eval_plain(lhs, env)?;
                let r = self.eval_plain(rhs, env)?;
                let equal = values_equal(&l, &r);
                Ok(Value::Bool(if op == BinOp::Eq { equal } else { !equal }))
            }
            BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
                let l = self.eval_plain(lhs, env)?;
                let r = self.eval_plain(rhs, env)?;
                let ordering = compare_values(&l, &r).ok_or_else(|| {
                    err(ErrorValue::new(
                        "R008",
                        format!("cannot compare {} with {}", l.type_name(), r.type_name()),
                    )
                    .at_line(expr.token.line))
                })?;
                use std::cmp::Ordering::*;
                let result = match op {
                    BinOp::Lt => ordering == Less,
                    BinOp::Gt => ordering == Greater,
                    BinOp::Le => ordering != Greater,
                    _ => ordering != Less,
                };
                Ok(Value::Bool(result))
            }
            BinOp::Concat | BinOp::Combine => {
                let l = self.eval_plain(lhs, env)?;
                let r = self.eval_plain(rhs, env)?;
                concat_values(&l, &r).map_err(|e| err(e.at_line(expr.token.line)))
            }
            BinOp::Alt | BinOp::Shr => {
                let l = self.eval_plain(lhs, env)?;
                let r = self.eval_plain(rhs, env)?;
                match (&l, &r) {
                    (Value::Int(a), Value::Int(b)) => Ok(Value::Int(if op == BinOp::Alt {
                        a | b
                    } else {
                        a.wrapping_shr(*b as u32)
                    })),
                    _ => Err(err(ErrorValue::new(
                        "R008",
                        format!(
                            "`{}` needs Int operands, got {} and {}",
                            op.symbol(),
                            l.type_name(),
                            r.type_name()
                        ),
                    )
                    .at_line(expr.token.line))),
                }
            }
            BinOp::Cons => {
                let head = self.eval_plain(lhs, env)?;
                let tail = self.eval_plain(rhs, env)?;
                match tail {
                    Value::List(items) => {
                        let mut out = Vec::with_capacity(items.len() + 1);
                        out.push(head);
                        out.extend(items.iter().cloned());
                        Ok(Value::list(out))
                    }
                    other => Err(err(ErrorValue::new(
                        "R008",
                        format!("`::` needs a List tail, got {}", other.type_name()),
                    )
                    .at_line(expr.token.line))),
                }
            }
            BinOp::Compose => {
                let f = self.eval_plain(lhs, env)?;
                let g = self.eval_plain(rhs, env)?;
                Ok(Value::Composed(Rc::new((f, g))))
            }
            BinOp::Pipe => {
                let x = self.eval_plain(lhs, env)?;
                let f = self.eval_plain(rhs, env)?;
                self.finish_call(expr, f, vec![x])
            }
            BinOp::Apply => {
                let f = self.eval_plain(lhs, env)?;
                let x = self.eval_plain(rhs, env)?;
                self.finish_call(expr, f, vec![x])
            }
            // Arithmetic and monadic bind dispatch through dictionaries.
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem | BinOp::Pow
            | BinOp::Bind => {
                let l = self.eval_plain(lhs, env)?;
                let r = self.eval_plain(rhs, env)?;
                self.dispatch_method(expr.id, vec![l, r], expr.token.line, env)
            }
        }
    }

    /// Dispatch through the dictionary attached to a node by the
    /// analyzer (operators and trait-method calls).
    fn dispatch_method(
        &mut self,
        node: NodeId,
        args: Vec<Value>,
        line: u32,
        env: &Rc<Env>,
    ) -> EvalResult {
        let Some(method_ref) = self.plan.method_refs.get(&node).cloned() else {
            return Err(err(ErrorValue::new(
                "R009",
                "internal: no method reference for dispatch site",
            )
            .at_line(line)));
        };
        let Some(witnesses) = self.plan.witnesses.get(&node).cloned() else {
            return Err(err(ErrorValue::new(
                "R009",
                "internal: no dictionary witness for dispatch site",
            )
            .at_line(line)));
        };
        let source = witnesses
            .get(method_ref.witness_slot)
            .cloned()
            .ok_or_else(|| {
                err(ErrorValue::new("R009", "internal: witness slot out of range").at_line(line))
            })?;
        let dict = self.witness_value(&source, line, env).map_err(err)?;
        self.call_dict_method(&dict, method_ref.method_index, args, line)
    }

    fn call_dict_method(
        &mut self,
        dict: &Value,
        index: usize,
        mut args: Vec<Value>,
        line: u32,
    ) -> EvalResult {
        let Value::Dict(methods) = dict else {
            return Err(err(
                ErrorValue::new("R009", "internal: dispatch needs a dictionary").at_line(line),
            ));
        };
        let method = methods.get(index).cloned().ok_or_else(|| {
            err(ErrorValue::new("R009", "absent trait method").at_line(line))
        })?;
        // Default methods carry their own dictionary parameter; supply
        // the dictionary being dispatched through.
        if let Value::TreeClosure(closure) = &method {
            if !closure.spec.witness_names.is_empty() {
                args.push(dict.clone());
            }
        }
        self.call_value(&method, args).map_err(err)
    }

    /// Realize a witness source into a dictionary value. Witness
    /// parameters resolve lexically in the current environment.
    fn witness_value(
        &mut self,
        source: &WitnessSource,
        line: u32,
        env: &Rc<Env>,
    ) -> Result<Value, ErrorValue> {
        match source {
            WitnessSource::Param(i) => {
                let name = format!("$w{i}");
                env.get(&name).ok_or_else(|| {
                    ErrorValue::new("R009", "internal: missing witness parameter").at_line(line)
                })
            }
            WitnessSource::Instance { id, .. } => self.instance_dict(id.0),
        }
    }

    /// Build (and cache) the dictionary for a plan-wide instance id.
    fn instance_dict(&mut self, instance: u32) -> Result<Value, ErrorValue> {
        if let Some(existing) = self.dict_cache.get(&instance) {
            return Ok(existing.clone());
        }
        let recipe = self
            .plan
            .instances
            .get(instance as usize)
            .cloned()
            .ok_or_else(|| {
                ErrorValue::new("R009", "internal: unknown instance in dispatch")
            })?;
        let mut methods = Vec::with_capacity(recipe.methods.len());
        for (i, slot) in recipe.methods.iter().enumerate() {
            let value = match slot {
                MethodImpl::Native(name) => Value::Native(Rc::from(name.as_str())),
                MethodImpl::Decl(node) => self
                    .instance_methods
                    .get(node)
                    .cloned()
                    .ok_or_else(|| {
                        ErrorValue::new("R009", "internal: instance method not materialized")
                    })?,
                MethodImpl::Default => {
                    let method_name =
                        recipe.method_names.get(i).cloned().unwrap_or_default();
                    self.default_methods
                        .get(&(recipe.trait_name.clone(), method_name))
                        .cloned()
                        .ok_or_else(|| {
                            ErrorValue::new("R009", "absent trait method (no default body)")
                        })?
                }
            };
            methods.push(value);
        }
        let dict = Value::Dict(Rc::new(methods));
        self.dict_cache.insert(instance, dict.clone());
        Ok(dict)
    }

    // ── Calls ──────────────────────────────────────────────────────────

    fn eval_call(
        &mut self,
        expr: &Expr,
        callee: &Expr,
        args: &[Expr],
        env: &Rc<Env>,
    ) -> EvalResult {
        let mut arg_values = Vec::with_capacity(args.len());
        for arg in args {
            arg_values.push(self.eval_plain(arg, env)?);
        }

        // Trait-method call sites dispatch through their dictionary.
        if self.plan.method_refs.contains_key(&expr.id) {
            let method_ref = self.plan.method_refs[&expr.id].clone();
            let witnesses = self
                .plan
                .witnesses
                .get(&expr.id)
                .cloned()
                .unwrap_or_default();
            let source = witnesses.get(method_ref.witness_slot).cloned();
            let dict = match source {
                Some(WitnessSource::Param(i)) => {
                    let name = format!("$w{i}");
                    env.get(&name).ok_or_else(|| {
                        err(ErrorValue::new("R009", "internal: missing witness parameter")
                            .at_line(expr.token.line))
                    })?
                }
                Some(WitnessSource::Instance { id, .. }) => {
                    self.instance_dict(id.0).map_err(err)?
                }
                None => {
                    return Err(err(ErrorValue::new(
                        "R009",
                        "internal: unresolved dispatch dictionary",
                    )
                    .at_line(expr.token.line)))
                }
            };
            return self.call_dict_method(
                &dict,
                method_ref.method_index,
                arg_values,
                expr.token.line,
            );
        }

        // Plain call: evaluate the callee (the inner identifier for
        // explicit type applications) and append dictionary arguments.
        let callee_value = match &callee.kind {
            ExprKind::TypeApp { expr: inner, .. } => self.eval_plain(inner, env)?,
            _ => self.eval_plain(callee, env)?,
        };

        if let Some(witnesses) = self.plan.witnesses.get(&expr.id).cloned() {
            for source in &witnesses {
                let dict = match source {
                    WitnessSource::Param(i) => {
                        let name = format!("$w{i}");
                        env.get(&name).ok_or_else(|| {
                            err(ErrorValue::new(
                                "R009",
                                "internal: missing witness parameter",
                            )
                            .at_line(expr.token.line))
                        })?
                    }
                    WitnessSource::Instance { id, .. } => {
                        self.instance_dict(id.0).map_err(err)?
                    }
                };
                arg_values.push(dict);
            }
        }

        self.finish_call(expr, callee_value, arg_values)
    }

    /// Complete a call, emitting a trampoline signal in marked tail
    /// positions.
    fn finish_call(&mut self, expr: &Expr, callee: Value, args: Vec<Value>) -> EvalResult {
        if self.in_tail
            && self.plan.tail_calls.contains(&expr.id)
            && matches!(callee, Value::TreeClosure(_))
        {
            return Err(Control::Tail(callee, args));
        }
        self.call_value(&callee, args)
            .map_err(|e| err(e.at_line(expr.token.line)))
    }

    // ── Indexing ───────────────────────────────────────────────────────

    fn eval_index(&self, obj: &Value, index: &Value, line: u32) -> Result<Value, ErrorValue> {
        match (obj, index) {
            (Value::List(items), Value::Int(i)) => {
                usize::try_from(*i)
                    .ok()
                    .and_then(|i| items.get(i))
                    .cloned()
                    .ok_or_else(|| {
                        ErrorValue::new("R004", format!("index {i} out of bounds")).at_line(line)
                    })
            }
            (Value::Tuple(items), Value::Int(i)) => usize::try_from(*i)
                .ok()
                .and_then(|i| items.get(i))
                .cloned()
                .ok_or_else(|| {
                    ErrorValue::new("R004", format!("index {i} out of bounds")).at_line(line)
                }),
            (Value::Str(s), Value::Int(i)) => usize::try_from(*i)
                .ok()
                .and_then(|i| s.chars().nth(i))
                .map(Value::Char)
                .ok_or_else(|| {
                    ErrorValue::new("R004", format!("index {i} out of bounds")).at_line(line)
                }),
            (Value::Bytes(bytes), Value::Int(i)) => usize::try_from(*i)
                .ok()
                .and_then(|i| bytes.get(i))
                .map(|b| Value::Int(*b as i64))
                .ok_or_else(|| {
                    ErrorValue::new("R004", format!("index {i} out of bounds")).at_line(line)
                }),
            (Value::Map(entries), key) => entries
                .iter()
                .find(|(k, _)| values_equal(k, key))
                .map(|(_, v)| v.clone())
                .ok_or_else(|| {
                    ErrorValue::new("R005", format!("missing key `{key}`")).at_line(line)
                }),
            (obj, index) => Err(ErrorValue::new(
                "R008",
                format!("cannot index {} with {}", obj.type_name(), index.type_name()),
            )
            .at_line(line)),
        }
    }

    // ── Match ──────────────────────────────────────────────────────────

    fn eval_match(
        &mut self,
        expr: &Expr,
        scrutinee: &Expr,
        arms: &[MatchArm],
        env: &Rc<Env>,
    ) -> EvalResult {
        let value = self.eval_plain(scrutinee, env)?;
        for arm in arms {
            let arm_env = Env::child(env);
            if !self.match_pattern(&arm.pat, &value, &arm_env)? {
                continue;
            }
            if let Some(guard) = &arm.guard {
                match self.eval_plain(guard, &arm_env)?.as_bool() {
                    Some(true) => {}
                    Some(false) => continue,
                    None => {
                        return Err(err(ErrorValue::new(
                            "R008",
                            "match guard did not produce a Bool",
                        )
                        .at_line(guard.token.line)))
                    }
                }
            }
            return self.eval_tailable(&arm.body, &arm_env);
        }
        Err(err(ErrorValue::new(
            "R001",
            format!("no pattern matched value `{value}`"),
        )
        .at_line(expr.token.line)))
    }

    /// Try a pattern against a value, binding into `env` on success.
    fn match_pattern(
        &mut self,
        pat: &Pattern,
        value: &Value,
        env: &Rc<Env>,
    ) -> Result<bool, Control> {
        match &pat.kind {
            PatKind::Wildcard => Ok(true),
            PatKind::Ident(name) | PatKind::Typed { name, .. } => {
                env.define(name.clone(), value.clone());
                Ok(true)
            }
            PatKind::Literal(lit) => Ok(literal_matches(lit, value)),
            PatKind::Ctor { name, args } => match value {
                Value::Ctor(c) if &*c.name == name.as_str() => {
                    if c.fields.len() != args.len() {
                        return Ok(false);
                    }
                    for (sub, field) in args.iter().zip(&c.fields) {
                        if !self.match_pattern(sub, field, env)? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                _ => Ok(false),
            },
            PatKind::Tuple(items) => match value {
                Value::Tuple(fields) if fields.len() == items.len() => {
                    for (sub, field) in items.iter().zip(fields.iter()) {
                        if !self.match_pattern(sub, field, env)? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                _ => Ok(false),
            },
            PatKind::List { elements, rest } => match value {
                Value::List(items) => {
                    match rest {
                        Some(rest_pat) => {
                            if items.len() < elements.len() {
                                return Ok(false);
                            }
                            for (sub, item) in elements.iter().zip(items.iter()) {
                                if !self.match_pattern(sub, item, env)? {
                                    return Ok(false);
                                }
                            }
                            let remainder =
                                Value::list(items[elements.len()..].to_vec());
                            self.match_pattern(rest_pat, &remainder, env)
                        }
                        None => {
                            if items.len() != elements.len() {
                                return Ok(false);
                            }
                            for (sub, item) in elements.iter().zip(items.iter()) {
                                if !self.match_pattern(sub, item, env)? {
                                    return Ok(false);
                                }
                            }
                            Ok(true)
                        }
                    }
                }
                _ => Ok(false),
            },
            PatKind::Record { fields, .. } => match value {
                Value::Record(map) => {
                    for (name, sub) in fields {
                        let Some(field_value) = map.get(name) else {
                            return Ok(false);
                        };
                        match sub {
                            Some(p) => {
                                if !self.match_pattern(p, field_value, env)? {
                                    return Ok(false);
                                }
                            }
                            None => env.define(name.clone(), field_value.clone()),
                        }
                    }
                    Ok(true)
                }
                _ => Ok(false),
            },
            PatKind::Str(parts) => match value {
                Value::Str(s) => Ok(match_string_pattern(parts, s, env)),
                _ => Ok(false),
            },
            PatKind::Pin(name) => {
                let Some(expected) = env.get(name) else {
                    return Err(err(ErrorValue::new(
                        "R008",
                        format!("pin `^{name}` refers to an undefined binding"),
                    )
                    .at_line(pat.token.line)));
                };
                Ok(values_equal(&expected, value))
            }
        }
    }

    fn eval_block(&mut self, block: &Block, env: &Rc<Env>) -> EvalResult {
        let block_env = Env::child(env);
        let mut last = Value::Nil;
        let count = block.stmts.len();
        for (i, stmt) in block.stmts.iter().enumerate() {
            let is_last = i + 1 == count;
            if is_last {
                if let StmtKind::Expr(e) = &stmt.kind {
                    return self.eval_tailable(e, &block_env);
                }
            }
            last = self.exec_stmt(stmt, &block_env)?;
        }
        let _ = last;
        Ok(Value::Nil)
    }
}

enum Trampoline {
    Done(Value),
    Tail(Value, Vec<Value>),
}

fn literal_matches(lit: &PatLit, value: &Value) -> bool {
    match (lit, value) {
        (PatLit::Int(a), Value::Int(b)) => a == b,
        (PatLit::BigInt(a), Value::BigInt(b)) => a == &**b,
        (PatLit::Float(a), Value::Float(b)) => a == b,
        (PatLit::Bool(a), Value::Bool(b)) => a == b,
        (PatLit::Char(a), Value::Char(b)) => a == b,
        (PatLit::Str(a), Value::Str(b)) => a.as_str() == &**b,
        (PatLit::Nil, Value::Nil) => true,
        _ => false,
    }
}

/// Match a string pattern with captures: literals anchor, captures take
/// the (shortest) text up to the next literal.
pub fn match_string_pattern(parts: &[StrPatPart], text: &str, env: &Env) -> bool {
    let mut remaining = text;
    let mut pending_capture: Option<&str> = None;

    for part in parts {
        match part {
            StrPatPart::Lit(lit) => match pending_capture.take() {
                Some(name) => match remaining.find(lit.as_str()) {
                    Some(pos) => {
                        env.define(name.to_string(), Value::string(&remaining[..pos]));
                        remaining = &remaining[pos + lit.len()..];
                    }
                    None => return false,
                },
                None => match remaining.strip_prefix(lit.as_str()) {
                    Some(rest) => remaining = rest,
                    None => return false,
                },
            },
            StrPatPart::Capture(name) => {
                pending_capture = Some(name);
            }
        }
    }

    match pending_capture {
        Some(name) => {
            env.define(name.to_string(), Value::string(remaining));
            true
        }
        None => remaining.is_empty(),
    }
}

/// Seed the module environment with natives and built-in constructors.
fn seed_builtins(env: &Rc<Env>) {
    for name in ["print", "toString", "intToStr", "floatToStr", "strToInt", "strLen",
        "listLen", "listFlatMap", "listMap", "trap", "panic"]
    {
        debug_assert!(NATIVE_NAMES.contains(&name));
        env.define(name, Value::Native(Rc::from(name)));
    }
    env.define("Some", make_ctor_value("Option", "Some", 0, 1));
    env.define("None", make_ctor_value("Option", "None", 1, 0));
    env.define("Ok", make_ctor_value("Result", "Ok", 0, 1));
    env.define("Err", make_ctor_value("Result", "Err", 1, 1));
}

/// A constructor's runtime value: nullary constructors are the value
/// itself, fielded ones are builder functions.
fn make_ctor_value(type_name: &str, name: &str, tag: u32, arity: usize) -> Value {
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
