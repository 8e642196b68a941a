//! Runtime values.
//!
//! Heap-shaped values share via `Rc`; the host's reference counting is
//! the memory model (no tracing collector). Runtime errors are data:
//! [`ErrorValue`] propagates through both backends until trapped or until
//! the program exits.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use num_bigint::BigInt;
use num_rational::BigRational;

/// A packed bit string with an exact bit length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitString {
    /// MSB-first packed bits.
    pub data: Vec<u8>,
    pub len: usize,
}

/// An ADT value: constructor name, tag, and fields.
#[derive(Debug, Clone)]
pub struct CtorValue {
    pub type_name: Rc<str>,
    pub name: Rc<str>,
    pub tag: u32,
    pub fields: Vec<Value>,
}

/// A constructor used as a function (`Some`, `Circle`, ...): calling it
/// with `arity` arguments builds the [`CtorValue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CtorFn {
    pub type_name: Rc<str>,
    pub name: Rc<str>,
    pub tag: u32,
    pub arity: usize,
}

/// A first-class runtime error: stable code, message, source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorValue {
    /// Stable `R...` code.
    pub code: &'static str,
    pub message: String,
    /// 1-based source line, when known.
    pub line: u32,
}

impl ErrorValue {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        ErrorValue { code, message: message.into(), line: 0 }
    }

    pub fn at_line(mut self, line: u32) -> Self {
        if self.line == 0 {
            self.line = line;
        }
        self
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// A Funxy runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    BigInt(Rc<BigInt>),
    Rational(Rc<BigRational>),
    Float(f64),
    Bool(bool),
    Nil,
    Char(char),
    Str(Rc<str>),
    Bytes(Rc<Vec<u8>>),
    Bits(Rc<BitString>),
    Tuple(Rc<Vec<Value>>),
    List(Rc<Vec<Value>>),
    Record(Rc<BTreeMap<String, Value>>),
    /// Insertion-ordered association map.
    Map(Rc<Vec<(Value, Value)>>),
    Ctor(Rc<CtorValue>),
    /// A constructor awaiting its arguments.
    CtorFn(Rc<CtorFn>),
    /// Tree-walking closure (evaluator backend).
    TreeClosure(Rc<crate::eval::TreeClosure>),
    /// Compiled closure (VM backend).
    VmClosure(Rc<crate::vm::VmClosure>),
    /// A host native, dispatched by name through the native table.
    Native(Rc<str>),
    /// `f ,, g` -- calling it applies `g` then `f`.
    Composed(Rc<(Value, Value)>),
    /// A trait dictionary: method implementations in signature order.
    Dict(Rc<Vec<Value>>),
    Error(Rc<ErrorValue>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Value {
        Value::Str(Rc::from(s.into().as_str()))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(items))
    }

    pub fn error(code: &'static str, message: impl Into<String>) -> Value {
        Value::Error(Rc::new(ErrorValue::new(code, message)))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// Truthiness is strict: only Bool is a condition.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// A short name for the value's runtime type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "Int",
            Value::BigInt(_) => "BigInt",
            Value::Rational(_) => "Rational",
            Value::Float(_) => "Float",
            Value::Bool(_) => "Bool",
            Value::Nil => "Nil",
            Value::Char(_) => "Char",
            Value::Str(_) => "String",
            Value::Bytes(_) => "Bytes",
            Value::Bits(_) => "Bits",
            Value::Tuple(_) => "Tuple",
            Value::List(_) => "List",
            Value::Record(_) => "Record",
            Value::Map(_) => "Map",
            Value::Ctor(c) => {
                // The ADT's name outlives the call; leaking is avoided by
                // returning the static family name instead.
                let _ = c;
                "Ctor"
            }
            Value::CtorFn(_) => "Constructor",
            Value::TreeClosure(_) | Value::VmClosure(_) | Value::Native(_)
            | Value::Composed(_) => "Function",
            Value::Dict(_) => "Dict",
            Value::Error(_) => "Error",
        }
    }

    /// Build an `Ok` value of the built-in Result type.
    pub fn ok(value: Value) -> Value {
        Value::Ctor(Rc::new(CtorValue {
            type_name: Rc::from("Result"),
            name: Rc::from("Ok"),
            tag: 0,
            fields: vec![value],
        }))
    }

    /// Build an `Err` value of the built-in Result type.
    pub fn err(value: Value) -> Value {
        Value::Ctor(Rc::new(CtorValue {
            type_name: Rc::from("Result"),
            name: Rc::from("Err"),
            tag: 1,
            fields: vec![value],
        }))
    }

    /// Build a `Some` value of the built-in Option type.
    pub fn some(value: Value) -> Value {
        Value::Ctor(Rc::new(CtorValue {
            type_name: Rc::from("Option"),
            name: Rc::from("Some"),
            tag: 0,
            fields: vec![value],
        }))
    }

    /// The `None` value of the built-in Option type.
    pub fn none() -> Value {
        Value::Ctor(Rc::new(CtorValue {
            type_name: Rc::from("Option"),
            name: Rc::from("None"),
            tag: 1,
            fields: Vec::new(),
        }))
    }
}

/// Structural equality. Functions and dictionaries compare by identity.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::BigInt(x), Value::BigInt(y)) => x == y,
        (Value::Rational(x), Value::Rational(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Nil, Value::Nil) => true,
        (Value::Char(x), Value::Char(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Bytes(x), Value::Bytes(y)) => x == y,
        (Value::Bits(x), Value::Bits(y)) => x == y,
        (Value::Tuple(x), Value::Tuple(y)) | (Value::List(x), Value::List(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| values_equal(a, b))
        }
        (Value::Record(x), Value::Record(y)) => {
            x.len() == y.len()
                && x.iter().zip(y.iter()).all(|((ka, va), (kb, vb))| {
                    ka == kb && values_equal(va, vb)
                })
        }
        (Value::Map(x), Value::Map(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, v)| {
                    y.iter()
                        .find(|(k2, _)| values_equal(k, k2))
                        .is_some_and(|(_, v2)| values_equal(v, v2))
                })
        }
        (Value::Ctor(x), Value::Ctor(y)) => {
            x.name == y.name
                && x.fields.len() == y.fields.len()
                && x.fields
                    .iter()
                    .zip(y.fields.iter())
                    .all(|(a, b)| values_equal(a, b))
        }
        (Value::CtorFn(x), Value::CtorFn(y)) => x == y,
        (Value::TreeClosure(x), Value::TreeClosure(y)) => Rc::ptr_eq(x, y),
        (Value::VmClosure(x), Value::VmClosure(y)) => Rc::ptr_eq(x, y),
        (Value::Composed(x), Value::Composed(y)) => Rc::ptr_eq(x, y),
        (Value::Native(x), Value::Native(y)) => x == y,
        (Value::Error(x), Value::Error(y)) => x == y,
        _ => false,
    }
}

/// Concatenation for `++`/`<>`: strings, lists, and bytes.
pub fn concat_values(l: &Value, r: &Value) -> Result<Value, ErrorValue> {
    match (l, r) {
        (Value::Str(a), Value::Str(b)) => {
            let mut out = String::with_capacity(a.len() + b.len());
            out.push_str(a);
            out.push_str(b);
            Ok(Value::string(out))
        }
        (Value::List(a), Value::List(b)) => {
            let mut out = Vec::with_capacity(a.len() + b.len());
            out.extend(a.iter().cloned());
            out.extend(b.iter().cloned());
            Ok(Value::list(out))
        }
        (Value::Bytes(a), Value::Bytes(b)) => {
            let mut out = Vec::with_capacity(a.len() + b.len());
            out.extend_from_slice(a);
            out.extend_from_slice(b);
            Ok(Value::Bytes(Rc::new(out)))
        }
        (l, r) => Err(ErrorValue::new(
            "R008",
            format!("cannot concatenate {} with {}", l.type_name(), r.type_name()),
        )),
    }
}

/// Structural ordering for the comparison operators. Returns `None` for
/// incomparable values (functions, mixed types).
pub fn compare_values(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    use std::cmp::Ordering;
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::BigInt(x), Value::BigInt(y)) => Some(x.cmp(y)),
        (Value::Rational(x), Value::Rational(y)) => Some(x.cmp(y)),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Char(x), Value::Char(y)) => Some(x.cmp(y)),
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        (Value::Bytes(x), Value::Bytes(y)) => Some(x.cmp(y)),
        (Value::Nil, Value::Nil) => Some(Ordering::Equal),
        (Value::Tuple(x), Value::Tuple(y)) | (Value::List(x), Value::List(y)) => {
            for (a, b) in x.iter().zip(y.iter()) {
                match compare_values(a, b)? {
                    Ordering::Equal => continue,
                    other => return Some(other),
                }
            }
            Some(x.len().cmp(&y.len()))
        }
        _ => None,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::BigInt(v) => write!(f, "{v}"),
            Value::Rational(v) => write!(f, "{}/{}", v.numer(), v.denom()),
            Value::Float(v) => {
                if v.is_finite() && v.fract() == 0.0 {
                    write!(f, "{v:.1}")
                } else {
                    write!(f, "{v}")
                }
            }
            Value::Bool(v) => write!(f, "{v}"),
            Value::Nil => write!(f, "nil"),
            Value::Char(c) => write!(f, "{c}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Bytes(bytes) => {
                write!(f, "@x\"")?;
                for b in bytes.iter() {
                    write!(f, "{b:02x}")?;
                }
                write!(f, "\"")
            }
            Value::Bits(bits) => {
                write!(f, "#b\"")?;
                for i in 0..bits.len {
                    let bit = (bits.data[i / 8] >> (7 - (i % 8))) & 1;
                    write!(f, "{bit}")?;
                }
                write!(f, "\"")
            }
            Value::Tuple(items) => {
                write!(f, "(")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, ")")
            }
            Value::List(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::Record(fields) => {
                write!(f, "{{")?;
                for (i, (name, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {v}")?;
                }
                write!(f, "}}")
            }
            Value::Map(entries) => {
                write!(f, "%{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Value::Ctor(c) => {
                write!(f, "{}", c.name)?;
                if !c.fields.is_empty() {
                    write!(f, "(")?;
                    for (i, v) in c.fields.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{v}")?;
                    }
                    write!(f, ")")?;
                }
                Ok(())
            }
            Value::CtorFn(c) => write!(f, "<constructor {}>", c.name),
            Value::TreeClosure(_) | Value::VmClosure(_) | Value::Composed(_) => {
                write!(f, "<function>")
            }
            Value::Native(name) => write!(f, "<native {name}>"),
            Value::Dict(_) => write!(f, "<dict>"),
            Value::Error(e) => write!(f, "<error {e}>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_scalars() {
        assert_eq!(Value::Int(7).to_string(), "7");
        assert_eq!(Value::Float(12.56).to_string(), "12.56");
        assert_eq!(Value::Float(3.0).to_string(), "3.0");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::Nil.to_string(), "nil");
        assert_eq!(Value::string("hi").to_string(), "hi");
    }

    #[test]
    fn display_composites() {
        let list = Value::list(vec![Value::Int(4), Value::Int(16)]);
        assert_eq!(list.to_string(), "[4, 16]");
        let tuple = Value::Tuple(Rc::new(vec![Value::Int(1), Value::string("a")]));
        assert_eq!(tuple.to_string(), "(1, a)");
        assert_eq!(Value::ok(Value::Int(3)).to_string(), "Ok(3)");
        assert_eq!(Value::none().to_string(), "None");
    }

    #[test]
    fn structural_equality() {
        assert!(values_equal(
            &Value::ok(Value::Int(3)),
            &Value::ok(Value::Int(3))
        ));
        assert!(!values_equal(
            &Value::ok(Value::Int(3)),
            &Value::err(Value::Int(3))
        ));
        assert!(values_equal(
            &Value::list(vec![Value::Int(1)]),
            &Value::list(vec![Value::Int(1)])
        ));
        assert!(!values_equal(&Value::Int(1), &Value::Float(1.0)));
    }

    #[test]
    fn comparisons() {
        use std::cmp::Ordering;
        assert_eq!(
            compare_values(&Value::Int(1), &Value::Int(2)),
            Some(Ordering::Less)
        );
        assert_eq!(
            compare_values(&Value::string("a"), &Value::string("b")),
            Some(Ordering::Less)
        );
        assert_eq!(compare_values(&Value::Int(1), &Value::string("a")), None);
    }

    #[test]
    fn bits_display() {
        let bits = Value::Bits(Rc::new(BitString { data: vec![0b1010_0000], len: 4 }));
        assert_eq!(bits.to_string(), "#b\"1010\"");
    }
}
