//! The native function table.
//!
//! Natives are addressed by stable names: the analyzer's builtin symbols
//! and the instance dictionaries of the built-in operator traits refer to
//! them (`add.Int`, `bind.Result`, `math.sqrt`, ...). Natives that invoke
//! language functions (flatMap, bind, trap) receive an applier callback
//! from the running backend.

use std::rc::Rc;

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{Pow, ToPrimitive, Zero};

use crate::value::{compare_values, values_equal, ErrorValue, Value};

/// Callback for invoking a language-level function from a native.
pub type Applier<'a> = &'a mut dyn FnMut(&Value, &[Value]) -> Result<Value, ErrorValue>;

fn wrong_arg(native: &str, expected: &str, got: &Value) -> ErrorValue {
    ErrorValue::new(
        "R008",
        format!("{native}: expected {expected}, got {}", got.type_name()),
    )
}

fn expect_int(native: &str, v: &Value) -> Result<i64, ErrorValue> {
    match v {
        Value::Int(i) => Ok(*i),
        other => Err(wrong_arg(native, "Int", other)),
    }
}

fn expect_float(native: &str, v: &Value) -> Result<f64, ErrorValue> {
    match v {
        Value::Float(f) => Ok(*f),
        other => Err(wrong_arg(native, "Float", other)),
    }
}

fn expect_str<'v>(native: &str, v: &'v Value) -> Result<&'v str, ErrorValue> {
    match v {
        Value::Str(s) => Ok(s),
        other => Err(wrong_arg(native, "String", other)),
    }
}

fn expect_list<'v>(native: &str, v: &'v Value) -> Result<&'v [Value], ErrorValue> {
    match v {
        Value::List(items) => Ok(items),
        other => Err(wrong_arg(native, "List", other)),
    }
}

fn expect_big<'v>(native: &str, v: &'v Value) -> Result<&'v BigInt, ErrorValue> {
    match v {
        Value::BigInt(b) => Ok(b),
        other => Err(wrong_arg(native, "BigInt", other)),
    }
}

fn expect_rational<'v>(native: &str, v: &'v Value) -> Result<&'v BigRational, ErrorValue> {
    match v {
        Value::Rational(r) => Ok(r),
        other => Err(wrong_arg(native, "Rational", other)),
    }
}

fn overflow(op: &str) -> ErrorValue {
    ErrorValue::new("R003", format!("integer overflow in {op}"))
}

fn div_by_zero() -> ErrorValue {
    ErrorValue::new("R002", "division by zero")
}

/// Whether a native with this name exists.
pub fn has_native(name: &str) -> bool {
    NATIVE_NAMES.contains(&name)
}

/// Every registered native name.
pub const NATIVE_NAMES: &[&str] = &[
    "print", "toString", "intToStr", "floatToStr", "strToInt", "strLen", "listLen",
    "listFlatMap", "listMap", "trap", "panic", "#matchFail",
    "add.Int", "add.Float", "add.BigInt", "add.Rational",
    "sub.Int", "sub.Float", "sub.BigInt", "sub.Rational",
    "mul.Int", "mul.Float", "mul.BigInt", "mul.Rational",
    "div.Int", "div.Float", "div.BigInt", "div.Rational",
    "rem.Int", "rem.Float", "rem.BigInt", "rem.Rational",
    "pow.Int", "pow.Float", "pow.BigInt", "pow.Rational",
    "neg.Int", "neg.Float", "neg.BigInt", "neg.Rational",
    "bind.Result", "bind.Option", "bind.List",
    "math.abs", "math.sqrt", "math.floor", "math.pi",
    "string.upper", "string.lower", "string.split",
    "list.reverse", "list.head", "list.sort",
];

/// Invoke a native by name.
pub fn call_native(
    name: &str,
    args: &[Value],
    apply: Applier<'_>,
) -> Result<Value, ErrorValue> {
    match name {
        // ── Core ───────────────────────────────────────────────────────
        "print" => {
            let text = args
                .iter()
                .map(Value::to_string)
                .collect::<Vec<_>>()
                .join(" ");
            println!("{text}");
            Ok(Value::Nil)
        }
        "toString" => Ok(Value::string(args[0].to_string())),
        "intToStr" => {
            let v = expect_int(name, &args[0])?;
            Ok(Value::string(v.to_string()))
        }
        "floatToStr" => {
            let v = expect_float(name, &args[0])?;
            Ok(Value::string(Value::Float(v).to_string()))
        }
        "strToInt" => {
            let s = expect_str(name, &args[0])?;
            match s.trim().parse::<i64>() {
                Ok(v) => Ok(Value::some(Value::Int(v))),
                Err(_) => Ok(Value::none()),
            }
        }
        "strLen" => {
            let s = expect_str(name, &args[0])?;
            Ok(Value::Int(s.chars().count() as i64))
        }
        "listLen" => {
            let items = expect_list(name, &args[0])?;
            Ok(Value::Int(items.len() as i64))
        }
        "listFlatMap" => {
            let items = expect_list(name, &args[0])?;
            let mut out = Vec::new();
            for item in items {
                let mapped = apply(&args[1], std::slice::from_ref(item))?;
                match mapped {
                    Value::List(chunk) => out.extend(chunk.iter().cloned()),
                    other => return Err(wrong_arg(name, "List", &other)),
                }
            }
            Ok(Value::list(out))
        }
        "listMap" => {
            let items = expect_list(name, &args[0])?;
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(apply(&args[1], std::slice::from_ref(item))?);
            }
            Ok(Value::list(out))
        }
        "trap" => match apply(&args[0], &[]) {
            Ok(Value::Error(e)) => Ok(Value::err(Value::string(e.message.clone()))),
            Ok(value) => Ok(Value::ok(value)),
            Err(e) => Ok(Value::err(Value::string(e.message))),
        },
        "panic" => {
            let message = expect_str(name, &args[0])?;
            Err(ErrorValue::new("R006", message.to_string()))
        }
        "#matchFail" => {
            let message = expect_str(name, &args[0])?;
            Err(ErrorValue::new("R001", message.to_string()))
        }

        // ── Arithmetic (operator trait instances) ──────────────────────
        "add.Int" => {
            let (a, b) = (expect_int(name, &args[0])?, expect_int(name, &args[1])?);
            a.checked_add(b).map(Value::Int).ok_or_else(|| overflow("+"))
        }
        "sub.Int" => {
            let (a, b) = (expect_int(name, &args[0])?, expect_int(name, &args[1])?);
            a.checked_sub(b).map(Value::Int).ok_or_else(|| overflow("-"))
        }
        "mul.Int" => {
            let (a, b) = (expect_int(name, &args[0])?, expect_int(name, &args[1])?);
            a.checked_mul(b).map(Value::Int).ok_or_else(|| overflow("*"))
        }
        "div.Int" => {
            let (a, b) = (expect_int(name, &args[0])?, expect_int(name, &args[1])?);
            if b == 0 {
                return Err(div_by_zero());
            }
            a.checked_div(b).map(Value::Int).ok_or_else(|| overflow("/"))
        }
        "rem.Int" => {
            let (a, b) = (expect_int(name, &args[0])?, expect_int(name, &args[1])?);
            if b == 0 {
                return Err(div_by_zero());
            }
            a.checked_rem(b).map(Value::Int).ok_or_else(|| overflow("%"))
        }
        "pow.Int" => {
            let (a, b) = (expect_int(name, &args[0])?, expect_int(name, &args[1])?);
            if b < 0 {
                return Err(ErrorValue::new("R008", "negative exponent on Int"));
            }
            let exp = u32::try_from(b).map_err(|_| overflow("**"))?;
            a.checked_pow(exp).map(Value::Int).ok_or_else(|| overflow("**"))
        }
        "neg.Int" => {
            let a = expect_int(name, &args[0])?;
            a.checked_neg().map(Value::Int).ok_or_else(|| overflow("-"))
        }

        "add.Float" => float_binop(name, args, |a, b| a + b),
        "sub.Float" => float_binop(name, args, |a, b| a - b),
        "mul.Float" => float_binop(name, args, |a, b| a * b),
        "div.Float" => float_binop(name, args, |a, b| a / b),
        "rem.Float" => float_binop(name, args, |a, b| a % b),
        "pow.Float" => float_binop(name, args, f64::powf),
        "neg.Float" => {
            let a = expect_float(name, &args[0])?;
            Ok(Value::Float(-a))
        }

        "add.BigInt" => big_binop(name, args, |a, b| Ok(a + b)),
        "sub.BigInt" => big_binop(name, args, |a, b| Ok(a - b)),
        "mul.BigInt" => big_binop(name, args, |a, b| Ok(a * b)),
        "div.BigInt" => big_binop(name, args, |a, b| {
            if b.is_zero() {
                Err(div_by_zero())
            } else {
                Ok(a / b)
            }
        }),
        "rem.BigInt" => big_binop(name, args, |a, b| {
            if b.is_zero() {
                Err(div_by_zero())
            } else {
                Ok(a % b)
            }
        }),
        "pow.BigInt" => {
            let a = expect_big(name, &args[0])?;
            let b = expect_big(name, &args[1])?;
            let exp = b
                .to_u32()
                .ok_or_else(|| ErrorValue::new("R008", "exponent out of range"))?;
            Ok(Value::BigInt(Rc::new(Pow::pow(a, exp))))
        }
        "neg.BigInt" => {
            let a = expect_big(name, &args[0])?;
            Ok(Value::BigInt(Rc::new(-a.clone())))
        }

        "add.Rational" => rational_binop(name, args, |a, b| Ok(a + b)),
        "sub.Rational" => rational_binop(name, args, |a, b| Ok(a - b)),
        "mul.Rational" => rational_binop(name, args, |a, b| Ok(a * b)),
        "div.Rational" => rational_binop(name, args, |a, b| {
            if b.is_zero() {
                Err(div_by_zero())
            } else {
                Ok(a / b)
            }
        }),
        "rem.Rational" => rational_binop(name, args, |a, b| {
            if b.is_zero() {
                Err(div_by_zero())
            } else {
                Ok(a % b)
            }
        }),
        "pow.Rational" => {
            let a = expect_rational(name, &args[0])?;
            let b = expect_rational(name, &args[1])?;
            if !b.is_integer() {
                return Err(ErrorValue::new("R008", "rational exponent must be integral"));
            }
            let exp = b
                .numer()
                .to_i32()
                .ok_or_else(|| ErrorValue::new("R008", "exponent out of range"))?;
            Ok(Value::Rational(Rc::new(Pow::pow(a, exp))))
        }
        "neg.Rational" => {
            let a = expect_rational(name, &args[0])?;
            Ok(Value::Rational(Rc::new(-a.clone())))
        }

        // ── Monad instances ────────────────────────────────────────────
        "bind.Result" => match &args[0] {
            Value::Ctor(c) if &*c.name == "Ok" => apply(&args[1], &c.fields),
            Value::Ctor(c) if &*c.name == "Err" => Ok(args[0].clone()),
            other => Err(wrong_arg(name, "Result", other)),
        },
        "bind.Option" => match &args[0] {
            Value::Ctor(c) if &*c.name == "Some" => apply(&args[1], &c.fields),
            Value::Ctor(c) if &*c.name == "None" => Ok(args[0].clone()),
            other => Err(wrong_arg(name, "Option", other)),
        },
        "bind.List" => {
            let items = expect_list(name, &args[0])?;
            let mut out = Vec::new();
            for item in items {
                match apply(&args[1], std::slice::from_ref(item))? {
                    Value::List(chunk) => out.extend(chunk.iter().cloned()),
                    other => return Err(wrong_arg(name, "List", &other)),
                }
            }
            Ok(Value::list(out))
        }

        // ── lib/math ───────────────────────────────────────────────────
        "math.abs" => {
            let a = expect_int(name, &args[0])?;
            a.checked_abs().map(Value::Int).ok_or_else(|| overflow("abs"))
        }
        "math.sqrt" => {
            let a = expect_float(name, &args[0])?;
            Ok(Value::Float(a.sqrt()))
        }
        "math.floor" => {
            let a = expect_float(name, &args[0])?;
            Ok(Value::Int(a.floor() as i64))
        }
        "math.pi" => Ok(Value::Float(std::f64::consts::PI)),

        // ── lib/string ─────────────────────────────────────────────────
        "string.upper" => {
            let s = expect_str(name, &args[0])?;
            Ok(Value::string(s.to_uppercase()))
        }
        "string.lower" => {
            let s = expect_str(name, &args[0])?;
            Ok(Value::string(s.to_lowercase()))
        }
        "string.split" => {
            let s = expect_str(name, &args[0])?;
            let sep = expect_str(name, &args[1])?;
            Ok(Value::list(
                s.split(sep).map(Value::string).collect::<Vec<_>>(),
            ))
        }

        // ── lib/list ───────────────────────────────────────────────────
        "list.reverse" => {
            let items = expect_list(name, &args[0])?;
            let mut out: Vec<Value> = items.to_vec();
            out.reverse();
            Ok(Value::list(out))
        }
        "list.head" => {
            let items = expect_list(name, &args[0])?;
            Ok(match items.first() {
                Some(v) => Value::some(v.clone()),
                None => Value::none(),
            })
        }
        "list.sort" => {
            let items = expect_list(name, &args[0])?;
            let mut out: Vec<Value> = items.to_vec();
            let mut failed = false;
            out.sort_by(|a, b| match compare_values(a, b) {
                Some(ordering) => ordering,
                None => {
                    failed = true;
                    std::cmp::Ordering::Equal
                }
            });
            if failed {
                return Err(ErrorValue::new("R008", "list.sort: incomparable elements"));
            }
            Ok(Value::list(out))
        }

        _ => Err(ErrorValue::new("R009", format!("unknown native `{name}`"))),
    }
}

fn float_binop(
    name: &str,
    args: &[Value],
    op: impl Fn(f64, f64) -> f64,
) -> Result<Value, ErrorValue> {
    let a = expect_float(name, &args[0])?;
    let b = expect_float(name, &args[1])?;
    Ok(Value::Float(op(a, b)))
}

fn big_binop(
    name: &str,
    args: &[Value],
    op: impl Fn(&BigInt, &BigInt) -> Result<BigInt, ErrorValue>,
) -> Result<Value, ErrorValue> {
    let a = expect_big(name, &args[0])?;
    let b = expect_big(name, &args[1])?;
    Ok(Value::BigInt(Rc::new(op(a, b)?)))
}

fn rational_binop(
    name: &str,
    args: &[Value],
    op: impl Fn(&BigRational, &BigRational) -> Result<BigRational, ErrorValue>,
) -> Result<Value, ErrorValue> {
    let a = expect_rational(name, &args[0])?;
    let b = expect_rational(name, &args[1])?;
    Ok(Value::Rational(Rc::new(op(a, b)?)))
}

/// Structural equality as the backends' `==`.
pub fn equal_values(a: &Value, b: &Value) -> Value {
    Value::Bool(values_equal(a, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_apply(_: &Value, _: &[Value]) -> Result<Value, ErrorValue> {
        panic!("native should not call back");
    }

    fn call(name: &str, args: &[Value]) -> Result<Value, ErrorValue> {
        let mut apply = no_apply;
        call_native(name, args, &mut apply)
    }

    #[test]
    fn int_arithmetic() {
        assert!(values_equal(
            &call("add.Int", &[Value::Int(2), Value::Int(3)]).unwrap(),
            &Value::Int(5)
        ));
        assert_eq!(
            call("div.Int", &[Value::Int(1), Value::Int(0)]).unwrap_err().code,
            "R002"
        );
        assert_eq!(
            call("add.Int", &[Value::Int(i64::MAX), Value::Int(1)])
                .unwrap_err()
                .code,
            "R003"
        );
    }

    #[test]
    fn bigint_arithmetic() {
        let a = Value::BigInt(Rc::new(BigInt::from(1) << 100));
        let b = Value::BigInt(Rc::new(BigInt::from(1)));
        let sum = call("add.BigInt", &[a, b]).unwrap();
        match sum {
            Value::BigInt(v) => assert_eq!(*v, (BigInt::from(1) << 100) + 1),
            other => panic!("expected BigInt, got {other}"),
        }
    }

    #[test]
    fn bind_result_threads_ok() {
        let mut apply = |f: &Value, args: &[Value]| {
            assert!(matches!(f, Value::Nil));
            Ok(Value::ok(args[0].clone()))
        };
        let out = call_native(
            "bind.Result",
            &[Value::ok(Value::Int(1)), Value::Nil],
            &mut apply,
        )
        .unwrap();
        assert!(values_equal(&out, &Value::ok(Value::Int(1))));

        let mut apply = no_apply;
        let err_in = Value::err(Value::string("boom"));
        let out = call_native("bind.Result", &[err_in.clone(), Value::Nil], &mut apply).unwrap();
        assert!(values_equal(&out, &err_in));
    }

    #[test]
    fn strings_and_lists() {
        assert!(values_equal(
            &call("string.upper", &[Value::string("ab")]).unwrap(),
            &Value::string("AB")
        ));
        assert!(values_equal(
            &call("list.reverse", &[Value::list(vec![Value::Int(1), Value::Int(2)])]).unwrap(),
            &Value::list(vec![Value::Int(2), Value::Int(1)])
        ));
        assert!(values_equal(
            &call("strToInt", &[Value::string("42")]).unwrap(),
            &Value::some(Value::Int(42))
        ));
    }

    #[test]
    fn unknown_native_is_r009() {
        assert_eq!(call("nope", &[]).unwrap_err().code, "R009");
    }
}
