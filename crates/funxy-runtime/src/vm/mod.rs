//! The bytecode virtual machine.
//!
//! A stack machine with an operand stack, a frame stack, and a small
//! focus stack for pattern-match destructuring. Language-level failures
//! produce `ErrorValue`s (caught by `trap` or surfaced at exit); internal
//! invariant violations -- stack underflow, an unknown opcode -- panic,
//! because they are compiler bugs, not user faults.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::chunk::{Chunk, CompiledFunction, Const, DictEntry, Op, StrPatPart};
use crate::native::call_native;
use crate::value::{
    compare_values, values_equal, CtorFn, CtorValue, ErrorValue, Value,
};

/// Maximum call-frame depth before `Error("stack overflow")`.
pub const MAX_FRAMES: usize = 1024;
/// Maximum operand-stack depth before `Error("stack overflow")`.
pub const MAX_STACK: usize = 65536;

/// A compiled closure: function plus captured values.
///
/// Bindings are immutable, so upvalues are captured by value at closure
/// creation; there is nothing left to "close" when a frame returns.
#[derive(Debug)]
pub struct VmClosure {
    pub function: Rc<CompiledFunction>,
    pub upvalues: Vec<Value>,
}

struct CallFrame {
    closure: Rc<VmClosure>,
    ip: usize,
    /// Operand-stack index where this frame's locals begin.
    base: usize,
}

/// The virtual machine.
pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    /// Pattern-match focus stack plus the depth marks of open
    /// `MatchBegin`s.
    focus: Vec<Value>,
    focus_marks: Vec<usize>,
    globals: FxHashMap<String, Value>,
    /// Exports of already-executed modules, keyed by import path.
    modules: FxHashMap<String, FxHashMap<String, Value>>,
    /// Compiled trait default methods, keyed `Trait.method`.
    defaults: FxHashMap<String, Value>,
}

impl Vm {
    pub fn new() -> Self {
        let mut globals = FxHashMap::default();
        seed_globals(&mut globals);
        Vm {
            stack: Vec::new(),
            frames: Vec::new(),
            focus: Vec::new(),
            focus_marks: Vec::new(),
            globals,
            modules: FxHashMap::default(),
            defaults: FxHashMap::default(),
        }
    }

    pub fn define_global(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    /// Register an executed module's exports for later `Import` ops.
    pub fn register_module(&mut self, path: impl Into<String>, exports: FxHashMap<String, Value>) {
        self.modules.insert(path.into(), exports);
    }

    /// Register a compiled trait default method.
    pub fn register_default(&mut self, key: impl Into<String>, function: Rc<CompiledFunction>) {
        let closure = Value::VmClosure(Rc::new(VmClosure { function, upvalues: Vec::new() }));
        self.defaults.insert(key.into(), closure);
    }

    /// Current global bindings (a module's exports after running it).
    pub fn globals(&self) -> &FxHashMap<String, Value> {
        &self.globals
    }

    /// Reset globals to the seeded state between module executions, so
    /// one module's bindings do not leak into the next.
    pub fn reset_globals(&mut self) {
        self.globals.clear();
        seed_globals(&mut self.globals);
    }

    /// Execute a module chunk to completion. Returns the value left by
    /// the last expression statement (or nil).
    pub fn run_chunk(&mut self, chunk: Chunk) -> Result<Value, ErrorValue> {
        log::trace!("running chunk {} ({} bytes)", chunk.file, chunk.code.len());
        let function = Rc::new(CompiledFunction {
            name: "<module>".to_string(),
            arity: 0,
            default_count: 0,
            variadic: false,
            upvalue_count: 0,
            chunk,
        });
        let closure = Rc::new(VmClosure { function, upvalues: Vec::new() });
        self.push_frame(closure, 0)?;
        let depth = self.frames.len();
        self.execute(depth)
    }

    // ── Stack helpers ──────────────────────────────────────────────────

    fn push(&mut self, value: Value) -> Result<(), ErrorValue> {
        if self.stack.len() >= MAX_STACK {
            return Err(ErrorValue::new("R007", "stack overflow"));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("operand stack underflow (compiler bug)")
    }

    fn peek(&self, depth: usize) -> &Value {
        &self.stack[self.stack.len() - 1 - depth]
    }

    fn push_frame(&mut self, closure: Rc<VmClosure>, base: usize) -> Result<(), ErrorValue> {
        if self.frames.len() >= MAX_FRAMES {
            return Err(ErrorValue::new("R007", "stack overflow"));
        }
        // Make room for the frame's locals beyond the already-pushed
        // arguments.
        let needed = base + closure.function.chunk.locals_count as usize;
        while self.stack.len() < needed {
            self.push(Value::Nil)?;
        }
        self.frames.push(CallFrame { closure, ip: 0, base });
        Ok(())
    }

    fn current_line(&self) -> u32 {
        self.frames
            .last()
            .map(|f| f.closure.function.chunk.line_at(f.ip.saturating_sub(1)))
            .unwrap_or(0)
    }

    fn fail(&self, e: ErrorValue) -> ErrorValue {
        e.at_line(self.current_line())
    }

    // ── Execution ──────────────────────────────────────────────────────

    /// Run until the frame stack drops below `target_depth`; the frame's
    /// return value is the result.
    fn execute(&mut self, target_depth: usize) -> Result<Value, ErrorValue> {
        loop {
            let (op, frame_ip) = {
                let frame = self.frames.last_mut().expect("no active frame (compiler bug)");
                let byte = frame.closure.function.chunk.code[frame.ip];
                let op = Op::from_u8(byte)
                    .unwrap_or_else(|| panic!("unknown opcode {byte} (compiler bug)"));
                frame.ip += 1;
                (op, frame.ip)
            };
            let _ = frame_ip;

            match op {
                Op::PushConst => {
                    let idx = self.read_u16();
                    let value = self.const_value(idx)?;
                    self.push(value)?;
                }
                Op::Pop => {
                    self.pop();
                }
                Op::Dup => {
                    let top = self.peek(0).clone();
                    self.push(top)?;
                }
                Op::Swap => {
                    let len = self.stack.len();
                    self.stack.swap(len - 1, len - 2);
                }

                Op::GetLocal => {
                    let slot = self.read_u16() as usize;
                    let base = self.frames.last().expect("frame").base;
                    let value = self.stack[base + slot].clone();
                    self.push(value)?;
                }
                Op::SetLocal => {
                    let slot = self.read_u16() as usize;
                    let base = self.frames.last().expect("frame").base;
                    let value = self.pop();
                    self.stack[base + slot] = value;
                }
                Op::GetUpvalue => {
                    let idx = self.read_u8() as usize;
                    let value = self.frames.last().expect("frame").closure.upvalues[idx].clone();
                    self.push(value)?;
                }
                Op::SetUpvalue => {
                    // Bindings are immutable; this opcode is never emitted.
                    panic!("SetUpvalue emitted for immutable bindings (compiler bug)");
                }
                Op::GetGlobal => {
                    let idx = self.read_u16();
                    let name = self.const_str(idx);
                    let value = self.globals.get(&name).cloned().ok_or_else(|| {
                        self.fail(ErrorValue::new(
                            "R008",
                            format!("undefined global `{name}`"),
                        ))
                    })?;
                    self.push(value)?;
                }
                Op::SetGlobal => {
                    let idx = self.read_u16();
                    let name = self.const_str(idx);
                    let value = self.pop();
                    self.globals.insert(name, value);
                }

                Op::Jump => {
                    let offset = self.read_i16();
                    self.jump(offset);
                }
                Op::JumpIfFalse => {
                    let offset = self.read_i16();
                    let cond = self.pop();
                    match cond.as_bool() {
                        Some(false) => self.jump(offset),
                        Some(true) => {}
                        None => {
                            return Err(self.fail(ErrorValue::new(
                                "R008",
                                format!("condition is {}, not Bool", cond.type_name()),
                            )))
                        }
                    }
                }
                Op::JumpIfTrue => {
                    let offset = self.read_i16();
                    let cond = self.pop();
                    match cond.as_bool() {
                        Some(true) => self.jump(offset),
                        Some(false) => {}
                        None => {
                            return Err(self.fail(ErrorValue::new(
                                "R008",
                                format!("condition is {}, not Bool", cond.type_name()),
                            )))
                        }
                    }
                }
                Op::Loop => {
                    let distance = self.read_u16() as usize;
                    let frame = self.frames.last_mut().expect("frame");
                    frame.ip -= distance;
                }

                Op::Call => {
                    let arity = self.read_u8() as usize;
                    self.op_call(arity, false)?;
                }
                Op::TailCall => {
                    let arity = self.read_u8() as usize;
                    self.op_call(arity, true)?;
                }
                Op::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().expect("frame");
                    self.stack.truncate(frame.base);
                    if self.frames.len() < target_depth {
                        return Ok(result);
                    }
                    self.push(result)?;
                }

                Op::MakeTuple => {
                    let n = self.read_u16() as usize;
                    let items = self.pop_n(n);
                    self.push(Value::Tuple(Rc::new(items)))?;
                }
                Op::MakeList => {
                    let n = self.read_u16() as usize;
                    let items = self.pop_n(n);
                    self.push(Value::list(items))?;
                }
                Op::MakeRecord => {
                    let n = self.read_u16() as usize;
                    let mut fields = std::collections::BTreeMap::new();
                    for _ in 0..n {
                        let value = self.pop();
                        let name = match self.pop() {
                            Value::Str(s) => s.to_string(),
                            other => panic!("record key is {} (compiler bug)", other.type_name()),
                        };
                        fields.insert(name, value);
                    }
                    self.push(Value::Record(Rc::new(fields)))?;
                }
                Op::MakeMap => {
                    let n = self.read_u16() as usize;
                    let mut entries = Vec::with_capacity(n);
                    for _ in 0..n {
                        let value = self.pop();
                        let key = self.pop();
                        entries.push((key, value));
                    }
                    entries.reverse();
                    self.push(Value::Map(Rc::new(entries)))?;
                }
                Op::MakeClosure => {
                    let fn_idx = self.read_u16();
                    let upvalue_count = self.read_u8() as usize;
                    let mut upvalues = Vec::with_capacity(upvalue_count);
                    for _ in 0..upvalue_count {
                        let is_local = self.read_u8() == 1;
                        let slot = self.read_u16() as usize;
                        let frame = self.frames.last().expect("frame");
                        let value = if is_local {
                            self.stack[frame.base + slot].clone()
                        } else {
                            frame.closure.upvalues[slot].clone()
                        };
                        upvalues.push(value);
                    }
                    let function = self.const_fn(fn_idx);
                    self.push(Value::VmClosure(Rc::new(VmClosure { function, upvalues })))?;
                }
                Op::Index => {
                    let index = self.pop();
                    let obj = self.pop();
                    let value = index_value(&obj, &index).map_err(|e| self.fail(e))?;
                    self.push(value)?;
                }
                Op::Member => {
                    let idx = self.read_u16();
                    let name = self.const_str(idx);
                    let obj = self.pop();
                    let value = match &obj {
                        Value::Record(fields) => fields.get(&name).cloned().ok_or_else(|| {
                            self.fail(ErrorValue::new(
                                "R005",
                                format!("record has no field `{name}`"),
                            ))
                        })?,
                        other => {
                            return Err(self.fail(ErrorValue::new(
                                "R008",
                                format!(
                                    "cannot access member `{name}` of {}",
                                    other.type_name()
                                ),
                            )))
                        }
                    };
                    self.push(value)?;
                }
                Op::Spread => {
                    let addition = self.pop();
                    let acc = self.pop();
                    let value = match (&acc, &addition) {
                        (Value::List(a), Value::List(b)) => {
                            let mut out = Vec::with_capacity(a.len() + b.len());
                            out.extend(a.iter().cloned());
                            out.extend(b.iter().cloned());
                            Value::list(out)
                        }
                        _ => {
                            return Err(self.fail(ErrorValue::new(
                                "R008",
                                format!("cannot spread {}", addition.type_name()),
                            )))
                        }
                    };
                    self.push(value)?;
                }

                Op::RecordExtend => {
                    let idx = self.read_u16();
                    let name = self.const_str(idx);
                    let value = self.pop();
                    let record = self.pop();
                    match record {
                        Value::Record(fields) => {
                            let mut out = (*fields).clone();
                            out.insert(name, value);
                            self.push(Value::Record(Rc::new(out)))?;
                        }
                        other => {
                            return Err(self.fail(ErrorValue::new(
                                "R008",
                                format!("cannot extend {} as a record", other.type_name()),
                            )))
                        }
                    }
                }

                Op::Equal | Op::NotEqual => {
                    let r = self.pop();
                    let l = self.pop();
                    let equal = values_equal(&l, &r);
                    self.push(Value::Bool(if op == Op::Equal { equal } else { !equal }))?;
                }
                Op::Less | Op::Greater | Op::LessEq | Op::GreaterEq => {
                    let r = self.pop();
                    let l = self.pop();
                    let ordering = compare_values(&l, &r).ok_or_else(|| {
                        self.fail(ErrorValue::new(
                            "R008",
                            format!("cannot compare {} with {}", l.type_name(), r.type_name()),
                        ))
                    })?;
                    use std::cmp::Ordering::*;
                    let result = match op {
                        Op::Less => ordering == Less,
                        Op::Greater => ordering == Greater,
                        Op::LessEq => ordering != Greater,
                        _ => ordering != Less,
                    };
                    self.push(Value::Bool(result))?;
                }
                Op::Concat => {
                    let r = self.pop();
                    let l = self.pop();
                    let value =
                        crate::value::concat_values(&l, &r).map_err(|e| self.fail(e))?;
                    self.push(value)?;
                }
                Op::Alt => {
                    let r = self.pop();
                    let l = self.pop();
                    match (&l, &r) {
                        (Value::Int(a), Value::Int(b)) => self.push(Value::Int(a | b))?,
                        _ => {
                            return Err(self.fail(ErrorValue::new(
                                "R008",
                                "`|` needs Int operands",
                            )))
                        }
                    }
                }
                Op::ShiftRight => {
                    let r = self.pop();
                    let l = self.pop();
                    match (&l, &r) {
                        (Value::Int(a), Value::Int(b)) => {
                            self.push(Value::Int(a.wrapping_shr(*b as u32)))?
                        }
                        _ => {
                            return Err(self.fail(ErrorValue::new(
                                "R008",
                                "`>>` needs Int operands",
                            )))
                        }
                    }
                }
                Op::Not => {
                    let value = self.pop();
                    match value.as_bool() {
                        Some(b) => self.push(Value::Bool(!b))?,
                        None => {
                            return Err(self.fail(ErrorValue::new(
                                "R008",
                                format!("cannot negate {}", value.type_name()),
                            )))
                        }
                    }
                }
                Op::Cons => {
                    let tail = self.pop();
                    let head = self.pop();
                    match tail {
                        Value::List(items) => {
                            let mut out = Vec::with_capacity(items.len() + 1);
                            out.push(head);
                            out.extend(items.iter().cloned());
                            self.push(Value::list(out))?;
                        }
                        other => {
                            return Err(self.fail(ErrorValue::new(
                                "R008",
                                format!("`::` needs a List tail, got {}", other.type_name()),
                            )))
                        }
                    }
                }
                Op::MakeRange => {
                    let end = self.pop();
                    let start = self.pop();
                    match (start, end) {
                        (Value::Int(a), Value::Int(b)) => {
                            self.push(Value::list((a..b).map(Value::Int).collect()))?
                        }
                        _ => {
                            return Err(self.fail(ErrorValue::new(
                                "R008",
                                "range bounds must be Int",
                            )))
                        }
                    }
                }
                Op::BuildString => {
                    let n = self.read_u16() as usize;
                    let parts = self.pop_n(n);
                    let mut out = String::new();
                    for part in parts {
                        out.push_str(&part.to_string());
                    }
                    self.push(Value::string(out))?;
                }
                Op::MakeComposed => {
                    let g = self.pop();
                    let f = self.pop();
                    self.push(Value::Composed(Rc::new((f, g))))?;
                }

                // ── Pattern matching ───────────────────────────────────
                Op::MatchBegin => {
                    let scrutinee = self.pop();
                    self.focus_marks.push(self.focus.len());
                    self.focus.push(scrutinee);
                }
                Op::MatchTag => {
                    let idx = self.read_u16();
                    let offset = self.read_i16();
                    let name = self.const_str(idx);
                    let focus = self.focus_pop();
                    match focus {
                        Value::Ctor(c) if &*c.name == name.as_str() => {
                            for field in c.fields.iter().rev() {
                                self.focus.push(field.clone());
                            }
                        }
                        _ => self.jump(offset),
                    }
                }
                Op::MatchLiteral => {
                    let idx = self.read_u16();
                    let offset = self.read_i16();
                    let expected = self.const_value(idx)?;
                    let focus = self.focus_pop();
                    if !values_equal(&expected, &focus) {
                        self.jump(offset);
                    }
                }
                Op::MatchTuple => {
                    let arity = self.read_u16() as usize;
                    let offset = self.read_i16();
                    let focus = self.focus_pop();
                    match focus {
                        Value::Tuple(items) if items.len() == arity => {
                            for item in items.iter().rev() {
                                self.focus.push(item.clone());
                            }
                        }
                        _ => self.jump(offset),
                    }
                }
                Op::MatchList => {
                    let fixed = self.read_u16() as usize;
                    let has_rest = self.read_u8() == 1;
                    let offset = self.read_i16();
                    let focus = self.focus_pop();
                    match focus {
                        Value::List(items)
                            if (has_rest && items.len() >= fixed)
                                || (!has_rest && items.len() == fixed) =>
                        {
                            if has_rest {
                                self.focus.push(Value::list(items[fixed..].to_vec()));
                            }
                            for item in items[..fixed].iter().rev() {
                                self.focus.push(item.clone());
                            }
                        }
                        _ => self.jump(offset),
                    }
                }
                Op::MatchRecord => {
                    let count = self.read_u16() as usize;
                    let offset = self.read_i16();
                    let mut names = Vec::with_capacity(count);
                    for _ in 0..count {
                        let idx = self.read_u16();
                        names.push(self.const_str(idx));
                    }
                    let focus = self.focus_pop();
                    match &focus {
                        Value::Record(fields)
                            if names.iter().all(|n| fields.contains_key(n)) =>
                        {
                            for name in names.iter().rev() {
                                self.focus.push(fields[name].clone());
                            }
                        }
                        _ => self.jump(offset),
                    }
                }
                Op::MatchStr => {
                    let idx = self.read_u16();
                    let offset = self.read_i16();
                    let parts = self.const_str_pat(idx);
                    let focus = self.focus_pop();
                    match &focus {
                        Value::Str(s) => match match_str_pattern_vm(&parts, s) {
                            Some(captures) => {
                                for capture in captures.into_iter().rev() {
                                    self.focus.push(capture);
                                }
                            }
                            None => self.jump(offset),
                        },
                        _ => self.jump(offset),
                    }
                }
                Op::MatchPin => {
                    let offset = self.read_i16();
                    let expected = self.pop();
                    let focus = self.focus_pop();
                    if !values_equal(&expected, &focus) {
                        self.jump(offset);
                    }
                }
                Op::Bind => {
                    let slot = self.read_u16() as usize;
                    let value = self.focus_pop();
                    let base = self.frames.last().expect("frame").base;
                    self.stack[base + slot] = value;
                }
                Op::MatchEnd => {
                    let mark = self
                        .focus_marks
                        .pop()
                        .expect("MatchEnd without MatchBegin (compiler bug)");
                    self.focus.truncate(mark);
                }

                // ── Trait dispatch ─────────────────────────────────────
                Op::LoadDict => {
                    let idx = self.read_u16();
                    let dict = self.build_dict(idx)?;
                    self.push(dict)?;
                }
                Op::CallMethod => {
                    let method_index = self.read_u8() as usize;
                    let arity = self.read_u8() as usize;
                    let dict = self.pop();
                    let Value::Dict(methods) = &dict else {
                        panic!("CallMethod without a dictionary (compiler bug)");
                    };
                    let method = methods.get(method_index).cloned().ok_or_else(|| {
                        self.fail(ErrorValue::new("R009", "absent trait method"))
                    })?;
                    // Defaults expect the dictionary as a trailing
                    // argument.
                    let mut extra = 0usize;
                    if let Value::VmClosure(closure) = &method {
                        if closure.function.arity as usize == arity + 1 {
                            self.push(dict.clone())?;
                            extra = 1;
                        }
                    }
                    self.call_value_on_stack(method, arity + extra, false)?;
                }
                Op::LoadDefault => {
                    let idx = self.read_u16();
                    let key = self.const_str(idx);
                    let value = self.defaults.get(&key).cloned().ok_or_else(|| {
                        self.fail(ErrorValue::new(
                            "R009",
                            format!("absent trait method `{key}`"),
                        ))
                    })?;
                    self.push(value)?;
                }

                Op::Import => {
                    let idx = self.read_u16() as usize;
                    self.op_import(idx)?;
                }
                Op::Halt => {
                    let result = if self.stack.len()
                        > self.frames.last().map(|f| f.base).unwrap_or(0)
                    {
                        self.pop()
                    } else {
                        Value::Nil
                    };
                    self.frames.pop();
                    return Ok(result);
                }
            }
        }
    }

    // ── Operand reading ────────────────────────────────────────────────

    fn read_u8(&mut self) -> u8 {
        let frame = self.frames.last_mut().expect("frame");
        let value = frame.closure.function.chunk.read_u8(frame.ip);
        frame.ip += 1;
        value
    }

    fn read_u16(&mut self) -> u16 {
        let frame = self.frames.last_mut().expect("frame");
        let value = frame.closure.function.chunk.read_u16(frame.ip);
        frame.ip += 2;
        value
    }

    fn read_i16(&mut self) -> i16 {
        self.read_u16() as i16
    }

    fn jump(&mut self, offset: i16) {
        let frame = self.frames.last_mut().expect("frame");
        frame.ip = (frame.ip as i64 + offset as i64) as usize;
    }

    fn pop_n(&mut self, n: usize) -> Vec<Value> {
        let split = self.stack.len() - n;
        self.stack.split_off(split)
    }

    fn focus_pop(&mut self) -> Value {
        self.focus.pop().expect("focus stack underflow (compiler bug)")
    }

    // ── Constants ──────────────────────────────────────────────────────

    fn const_at(&self, idx: u16) -> &Const {
        let frame = self.frames.last().expect("frame");
        &frame.closure.function.chunk.constants[idx as usize]
    }

    fn const_value(&self, idx: u16) -> Result<Value, ErrorValue> {
        match self.const_at(idx) {
            Const::Value(value) => Ok(value.clone()),
            Const::Str(s) => Ok(Value::string(s.clone())),
            other => panic!("constant {other:?} used as a value (compiler bug)"),
        }
    }

    fn const_str(&self, idx: u16) -> String {
        match self.const_at(idx) {
            Const::Str(s) => s.clone(),
            other => panic!("constant {other:?} used as a name (compiler bug)"),
        }
    }

    fn const_fn(&self, idx: u16) -> Rc<CompiledFunction> {
        match self.const_at(idx) {
            Const::Fn(f) => Rc::clone(f),
            other => panic!("constant {other:?} used as a function (compiler bug)"),
        }
    }

    fn const_str_pat(&self, idx: u16) -> Vec<StrPatPart> {
        match self.const_at(idx) {
            Const::StrPat(parts) => parts.clone(),
            other => panic!("constant {other:?} used as a string pattern (compiler bug)"),
        }
    }

    fn build_dict(&mut self, idx: u16) -> Result<Value, ErrorValue> {
        let dict_const = match self.const_at(idx) {
            Const::Dict(d) => d.clone(),
            other => panic!("constant {other:?} used as a dictionary (compiler bug)"),
        };
        let mut methods = Vec::with_capacity(dict_const.entries.len());
        for entry in &dict_const.entries {
            let value = match entry {
                DictEntry::Native(name) => Value::Native(Rc::from(name.as_str())),
                DictEntry::Fn(fn_idx) => {
                    let function = self.const_fn(*fn_idx as u16);
                    Value::VmClosure(Rc::new(VmClosure { function, upvalues: Vec::new() }))
                }
                DictEntry::Default(key) => {
                    self.defaults.get(key).cloned().ok_or_else(|| {
                        self.fail(ErrorValue::new(
                            "R009",
                            format!("absent trait method `{key}`"),
                        ))
                    })?
                }
            };
            methods.push(value);
        }
        Ok(Value::Dict(Rc::new(methods)))
    }

    // ── Calls ──────────────────────────────────────────────────────────

    /// Call the value sitting under `arity` arguments on the stack.
    fn op_call(&mut self, arity: usize, tail: bool) -> Result<(), ErrorValue> {
        let callee = self.peek(arity).clone();
        self.call_value_on_stack(callee, arity, tail)
    }

    fn call_value_on_stack(
        &mut self,
        callee: Value,
        arity: usize,
        tail: bool,
    ) -> Result<(), ErrorValue> {
        match callee {
            Value::VmClosure(closure) => {
                let function = &closure.function;
                let min = function.arity as usize - function.default_count as usize;
                let fixed = function.arity as usize;
                if arity < min || (!function.variadic && arity > fixed) {
                    return Err(self.fail(ErrorValue::new(
                        "R008",
                        format!(
                            "{} takes {} argument(s), got {arity}",
                            function.name, function.arity
                        ),
                    )));
                }
                // Collapse variadic extras into a trailing list.
                if function.variadic {
                    let extras = arity - (fixed - 1);
                    let values = self.pop_n(extras);
                    self.push(Value::list(values))?;
                }
                // Defaults of omitted trailing parameters are compiled
                // into the callee prologue; push placeholders here.
                let provided = if function.variadic { fixed } else { arity };
                for _ in provided..fixed {
                    self.push(Value::Nil)?;
                }

                let base = self.stack.len() - fixed;
                // Drop the callee slot below the arguments.
                self.stack.remove(base - 1);
                let base = base - 1;

                if tail {
                    // Reuse the current frame: move the arguments down.
                    let frame = self.frames.pop().expect("frame");
                    let args: Vec<Value> = self.stack.split_off(base);
                    self.stack.truncate(frame.base);
                    for arg in args {
                        self.push(arg)?;
                    }
                    let new_base = self.stack.len() - fixed;
                    self.push_frame(Rc::clone(&closure), new_base)?;
                } else {
                    self.push_frame(Rc::clone(&closure), base)?;
                }
                Ok(())
            }
            Value::Native(name) => {
                let args = self.pop_n(arity);
                self.pop(); // callee slot
                let result = self.call_native_reentrant(&name, &args)?;
                self.push(result)
            }
            Value::CtorFn(ctor) => {
                if arity != ctor.arity {
                    return Err(self.fail(ErrorValue::new(
                        "R008",
                        format!(
                            "constructor {} takes {} argument(s), got {arity}",
                            ctor.name, ctor.arity
                        ),
                    )));
                }
                let fields = self.pop_n(arity);
                self.pop(); // callee slot
                self.push(Value::Ctor(Rc::new(CtorValue {
                    type_name: Rc::clone(&ctor.type_name),
                    name: Rc::clone(&ctor.name),
                    tag: ctor.tag,
                    fields,
                })))
            }
            Value::Composed(pair) => {
                let args = self.pop_n(arity);
                self.pop(); // callee slot
                let mid = self.call_function_value(&pair.1, args)?;
                let result = self.call_function_value(&pair.0, vec![mid])?;
                self.push(result)
            }
            other => Err(self.fail(ErrorValue::new(
                "R008",
                format!("value of type {} is not callable", other.type_name()),
            ))),
        }
    }

    /// Call a function value to completion and return its result
    /// (used for natives' call-backs and composition).
    pub fn call_function_value(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
    ) -> Result<Value, ErrorValue> {
        match callee {
            Value::VmClosure(_) => {
                let depth = self.frames.len() + 1;
                self.push(callee.clone())?;
                let arity = args.len();
                for arg in args {
                    self.push(arg)?;
                }
                self.call_value_on_stack(callee.clone(), arity, false)?;
                self.execute(depth)
            }
            Value::Native(name) => {
                let name = name.to_string();
                self.call_native_reentrant(&name, &args)
            }
            Value::CtorFn(ctor) => {
                if args.len() != ctor.arity {
                    return Err(ErrorValue::new(
                        "R008",
                        format!("constructor {} arity mismatch", ctor.name),
                    ));
                }
                Ok(Value::Ctor(Rc::new(CtorValue {
                    type_name: Rc::clone(&ctor.type_name),
                    name: Rc::clone(&ctor.name),
                    tag: ctor.tag,
                    fields: args,
                })))
            }
            Value::Composed(pair) => {
                let mid = self.call_function_value(&pair.1, args)?;
                self.call_function_value(&pair.0, vec![mid])
            }
            other => Err(ErrorValue::new(
                "R008",
                format!("value of type {} is not callable", other.type_name()),
            )),
        }
    }

    fn call_native_reentrant(&mut self, name: &str, args: &[Value]) -> Result<Value, ErrorValue> {
        let mut this = std::ptr::NonNull::from(&mut *self);
        let mut apply = move |f: &Value, call_args: &[Value]| -> Result<Value, ErrorValue> {
            let vm = unsafe { this.as_mut() };
            vm.call_function_value(f, call_args.to_vec())
        };
        call_native(name, args, &mut apply).map_err(|e| self.fail(e))
    }

    // ── Imports ────────────────────────────────────────────────────────

    fn op_import(&mut self, idx: usize) -> Result<(), ErrorValue> {
        let pending = {
            let frame = self.frames.last().expect("frame");
            frame
                .closure
                .function
                .chunk
                .pending_imports
                .get(idx)
                .cloned()
                .unwrap_or_else(|| panic!("pending import {idx} out of range (compiler bug)"))
        };

        let exports = self.modules.get(&pending.path).cloned().ok_or_else(|| {
            self.fail(ErrorValue::new(
                "R008",
                format!("module \"{}\" was not loaded before execution", pending.path),
            ))
        })?;

        let binding = pending
            .alias
            .clone()
            .unwrap_or_else(|| {
                pending
                    .path
                    .rsplit('/')
                    .next()
                    .unwrap_or(&pending.path)
                    .to_string()
            });

        // Qualified access: `binding::name` globals.
        for (name, value) in &exports {
            self.globals
                .insert(format!("{binding}::{name}"), value.clone());
        }
        // Direct injection per the import spec.
        if pending.import_all {
            for (name, value) in &exports {
                if !pending.exclude.contains(name) {
                    self.globals.insert(name.clone(), value.clone());
                }
            }
        } else {
            for name in &pending.symbols {
                if let Some(value) = exports.get(name) {
                    self.globals.insert(name.clone(), value.clone());
                }
            }
        }
        Ok(())
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

fn index_value(obj: &Value, index: &Value) -> Result<Value, ErrorValue> {
    match (obj, index) {
        (Value::List(items), Value::Int(i)) | (Value::Tuple(items), Value::Int(i)) => {
            usize::try_from(*i)
                .ok()
                .and_then(|i| items.get(i))
                .cloned()
                .ok_or_else(|| ErrorValue::new("R004", format!("index {i} out of bounds")))
        }
        (Value::Str(s), Value::Int(i)) => usize::try_from(*i)
            .ok()
            .and_then(|i| s.chars().nth(i))
            .map(Value::Char)
            .ok_or_else(|| ErrorValue::new("R004", format!("index {i} out of bounds"))),
        (Value::Bytes(bytes), Value::Int(i)) => usize::try_from(*i)
            .ok()
            .and_then(|i| bytes.get(i))
            .map(|b| Value::Int(*b as i64))
            .ok_or_else(|| ErrorValue::new("R004", format!("index {i} out of bounds"))),
        (Value::Map(entries), key) => entries
            .iter()
            .find(|(k, _)| values_equal(k, key))
            .map(|(_, v)| v.clone())
            .ok_or_else(|| ErrorValue::new("R005", format!("missing key `{key}`"))),
        (obj, index) => Err(ErrorValue::new(
            "R008",
            format!("cannot index {} with {}", obj.type_name(), index.type_name()),
        )),
    }
}

/// Match a compiled string pattern, returning captures in order.
fn match_str_pattern_vm(parts: &[StrPatPart], text: &str) -> Option<Vec<Value>> {
    let mut remaining = text;
    let mut captures = Vec::new();
    let mut pending = false;

    for part in parts {
        match part {
            StrPatPart::Lit(lit) => {
                if pending {
                    let pos = remaining.find(lit.as_str())?;
                    captures.push(Value::string(&remaining[..pos]));
                    remaining = &remaining[pos + lit.len()..];
                    pending = false;
                } else {
                    remaining = remaining.strip_prefix(lit.as_str())?;
                }
            }
            StrPatPart::Capture => pending = true,
        }
    }

    if pending {
        captures.push(Value::string(remaining));
    } else if !remaining.is_empty() {
        return None;
    }
    Some(captures)
}

/// Seed the VM globals with natives and built-in constructors.
fn seed_globals(globals: &mut FxHashMap<String, Value>) {
    for name in ["print", "toString", "intToStr", "floatToStr", "strToInt", "strLen",
        "listLen", "listFlatMap", "listMap", "trap", "panic", "#matchFail"]
    {
        globals.insert(name.to_string(), Value::Native(Rc::from(name)));
    }
    globals.insert(
        "Some".to_string(),
        Value::CtorFn(Rc::new(CtorFn {
            type_name: Rc::from("Option"),
            name: Rc::from("Some"),
            tag: 0,
            arity: 1,
        })),
    );
    globals.insert("None".to_string(), Value::none());
    globals.insert(
        "Ok".to_string(),
        Value::CtorFn(Rc::new(CtorFn {
            type_name: Rc::from("Result"),
            name: Rc::from("Ok"),
            tag: 0,
            arity: 1,
        })),
    );
    globals.insert(
        "Err".to_string(),
        Value::CtorFn(Rc::new(CtorFn {
            type_name: Rc::from("Result"),
            name: Rc::from("Err"),
            tag: 1,
            arity: 1,
        })),
    );
}
