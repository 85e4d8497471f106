//! Builtin classes, native methods and the generic operator semantics shared
//! by the fallback paths.

use crate::object::ClassTable;
use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use std::cmp::Ordering;
use strand_core::values::{Exception, Value};

/// Binary arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOp {
    pub const ALL: [ArithOp; 4] = [ArithOp::Add, ArithOp::Sub, ArithOp::Mul, ArithOp::Div];

    pub fn selector(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
        }
    }
}

/// Ordering operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl CompareOp {
    pub const ALL: [CompareOp; 4] = [
        CompareOp::Less,
        CompareOp::LessEqual,
        CompareOp::Greater,
        CompareOp::GreaterEqual,
    ];

    pub fn selector(self) -> &'static str {
        match self {
            CompareOp::Less => "<",
            CompareOp::LessEqual => "<=",
            CompareOp::Greater => ">",
            CompareOp::GreaterEqual => ">=",
        }
    }

    pub fn holds(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Less => ordering == Ordering::Less,
            CompareOp::LessEqual => ordering != Ordering::Greater,
            CompareOp::Greater => ordering == Ordering::Greater,
            CompareOp::GreaterEqual => ordering != Ordering::Less,
        }
    }
}

/// Floor division on machine integers; `None` on a zero divisor or overflow.
pub fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if (a % b != 0) && ((a < 0) != (b < 0)) {
        Some(q - 1)
    } else {
        Some(q)
    }
}

fn big_floor_div(a: &BigInt, b: &BigInt) -> BigInt {
    let q = a / b;
    let r = a % b;
    if !r.is_zero() && (r.is_negative() != b.is_negative()) {
        q - 1
    } else {
        q
    }
}

fn is_integer(value: &Value) -> bool {
    matches!(value, Value::Int(_) | Value::BigInt(_))
}

/// Generic arithmetic: machine integers promote to big integers on overflow,
/// mixed integer/float operands compute in floating point.
pub fn arith(op: ArithOp, lhs: &Value, rhs: &Value) -> Result<Value, Exception> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            if op == ArithOp::Div && b == 0 {
                return Err(Exception::zero_division());
            }
            let small = match op {
                ArithOp::Add => a.checked_add(b),
                ArithOp::Sub => a.checked_sub(b),
                ArithOp::Mul => a.checked_mul(b),
                ArithOp::Div => floor_div(a, b),
            };
            match small {
                Some(n) => Ok(Value::Int(n)),
                None => big_arith(op, &BigInt::from(a), &BigInt::from(b)),
            }
        }
        (a, b) if is_integer(a) && is_integer(b) => match (a.as_bigint(), b.as_bigint()) {
            (Some(a), Some(b)) => big_arith(op, &a, &b),
            _ => Err(coercion_error(lhs, rhs)),
        },
        (a, b) if a.is_numeric() && b.is_numeric() => match (a.as_float(), b.as_float()) {
            (Some(a), Some(b)) => Ok(Value::Float(match op {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                ArithOp::Mul => a * b,
                ArithOp::Div => a / b,
            })),
            _ => Err(coercion_error(lhs, rhs)),
        },
        (Value::Str(a), Value::Str(b)) if op == ArithOp::Add => {
            Ok(Value::string(&format!("{}{}", a, b)))
        }
        (Value::Array(a), Value::Array(b)) if op == ArithOp::Add => {
            Ok(Value::array(a.iter().chain(b.iter()).cloned().collect()))
        }
        _ => Err(coercion_error(lhs, rhs)),
    }
}

fn big_arith(op: ArithOp, a: &BigInt, b: &BigInt) -> Result<Value, Exception> {
    let result = match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div => {
            if b.is_zero() {
                return Err(Exception::zero_division());
            }
            big_floor_div(a, b)
        }
    };
    Ok(Value::from_bigint(result))
}

fn coercion_error(lhs: &Value, rhs: &Value) -> Exception {
    Exception::type_error(format!(
        "{} can't be coerced into {}",
        rhs.class_name(),
        lhs.class_name()
    ))
}

/// Generic ordering. NaN compares false; unordered kinds raise `ArgumentError`.
pub fn compare(op: CompareOp, lhs: &Value, rhs: &Value) -> Result<bool, Exception> {
    match lhs.partial_cmp_value(rhs) {
        Some(ordering) => Ok(op.holds(ordering)),
        None if lhs.is_numeric() && rhs.is_numeric() => Ok(false),
        None => Err(Exception::argument_error(format!(
            "comparison of {} with {} failed",
            lhs.class_name(),
            rhs.inspect()
        ))),
    }
}

pub const OBJECT_CLASSES: &[&str] = &[
    "NilClass",
    "TrueClass",
    "FalseClass",
    "Integer",
    "Float",
    "String",
    "Symbol",
    "Array",
    "Exception",
];

pub const ERROR_CLASSES: &[&str] = &[
    "RuntimeError",
    "TypeError",
    "ArgumentError",
    "NoMethodError",
    "ZeroDivisionError",
    "RangeError",
];

/// Install the builtin hierarchy and native methods into `table`.
pub fn install(table: &mut ClassTable) {
    table.define_class("Object", None);
    for class in OBJECT_CLASSES {
        table.define_class(class, Some("Object"));
    }
    table.define_class("StandardError", Some("Exception"));
    for class in ERROR_CLASSES {
        table.define_class(class, Some("StandardError"));
    }

    table
        .define_builtin("Object", "==", Some(1), |recv, args| {
            Ok(Value::Bool(recv.identical(&args[0])))
        })
        .define_builtin("Object", "equal?", Some(1), |recv, args| {
            Ok(Value::Bool(recv.identical(&args[0])))
        })
        .define_builtin("Object", "class", Some(0), |recv, _| {
            Ok(Value::string(recv.class_name()))
        })
        .define_builtin("Object", "inspect", Some(0), |recv, _| {
            Ok(Value::string(&recv.inspect()))
        })
        .define_builtin("Object", "to_s", Some(0), |recv, _| {
            Ok(Value::string(&recv.display_pretty()))
        })
        .define_builtin("Object", "nil?", Some(0), |recv, _| {
            Ok(Value::Bool(matches!(recv, Value::Nil)))
        });

    for class in ["Integer", "Float"] {
        for op in ArithOp::ALL {
            table.define_builtin(class, op.selector(), Some(1), move |recv, args| {
                arith(op, recv, &args[0])
            });
        }
        for op in CompareOp::ALL {
            table.define_builtin(class, op.selector(), Some(1), move |recv, args| {
                compare(op, recv, &args[0]).map(Value::Bool)
            });
        }
        table.define_builtin(class, "==", Some(1), |recv, args| {
            Ok(Value::Bool(recv == &args[0]))
        });
    }

    table
        .define_builtin("String", "+", Some(1), |recv, args| {
            arith(ArithOp::Add, recv, &args[0])
        })
        .define_builtin("String", "==", Some(1), |recv, args| {
            Ok(Value::Bool(recv == &args[0]))
        })
        .define_builtin("String", "<", Some(1), |recv, args| {
            compare(CompareOp::Less, recv, &args[0]).map(Value::Bool)
        })
        .define_builtin("String", "length", Some(0), |recv, _| {
            let len = recv.as_str().map_or(0, |s| s.chars().count());
            Ok(Value::Int(len as i64))
        })
        .define_builtin("String", "upcase", Some(0), |recv, _| {
            Ok(Value::string(&recv.as_str().unwrap_or_default().to_uppercase()))
        });

    table
        .define_builtin("Array", "==", Some(1), |recv, args| {
            Ok(Value::Bool(recv == &args[0]))
        })
        .define_builtin("Array", "+", Some(1), |recv, args| {
            arith(ArithOp::Add, recv, &args[0])
        })
        .define_builtin("Array", "length", Some(0), |recv, _| match recv {
            Value::Array(items) => Ok(Value::Int(items.len() as i64)),
            _ => Ok(Value::Int(0)),
        })
        .define_builtin("Array", "first", Some(0), |recv, _| match recv {
            Value::Array(items) => Ok(items.first().cloned().unwrap_or(Value::Nil)),
            _ => Ok(Value::Nil),
        })
        .define_builtin("Array", "[]", Some(1), array_index);

    table.define_builtin("Exception", "message", Some(0), |recv, _| match recv {
        Value::Exception(exc) => Ok(Value::string(&exc.message)),
        _ => Ok(Value::Nil),
    });
}

/// `Array#[]`: negative indices count from the end, out of range reads nil.
fn array_index(recv: &Value, args: &[Value]) -> Result<Value, Exception> {
    let Value::Array(items) = recv else {
        return Ok(Value::Nil);
    };
    let index = args[0].as_int().ok_or_else(|| {
        Exception::type_error(format!(
            "no implicit conversion of {} into Integer",
            args[0].class_name()
        ))
    })?;
    let len = items.len() as i64;
    let index = if index < 0 { index + len } else { index };
    if (0..len).contains(&index) {
        Ok(items[index as usize].clone())
    } else {
        Ok(Value::Nil)
    }
}
