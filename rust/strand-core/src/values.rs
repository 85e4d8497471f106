//! Tagged value representation for the Strand VM.

use num_bigint::BigInt;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Runtime values in the Strand VM.
///
/// Heap values are reference counted with `Arc` so a value produced on one
/// worker thread can be handed to a machine on another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    BigInt(Arc<BigInt>),
    Float(f64),
    Str(Arc<str>),
    Symbol(Arc<str>),
    Array(Arc<Vec<Value>>),
    Object(Arc<ObjectValue>),
    Exception(Arc<Exception>),
}

/// Instance of a user-level class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectValue {
    pub class: String,
    pub ivars: BTreeMap<String, Value>,
}

/// One activation in a backtrace: method name and instruction pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub method: Arc<str>,
    pub ip: usize,
}

/// A raised exception. `backtrace` is innermost first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exception {
    pub class: String,
    pub message: String,
    pub backtrace: Vec<StackFrame>,
}

impl Exception {
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            message: message.into(),
            backtrace: Vec::new(),
        }
    }

    pub fn with_backtrace(mut self, backtrace: Vec<StackFrame>) -> Self {
        if self.backtrace.is_empty() {
            self.backtrace = backtrace;
        }
        self
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    pub fn argument_error(message: impl Into<String>) -> Self {
        Self::new("ArgumentError", message)
    }

    pub fn zero_division() -> Self {
        Self::new("ZeroDivisionError", "divided by 0")
    }

    /// Format the backtrace the way uncaught exceptions are reported.
    pub fn format_backtrace(&self) -> String {
        let mut out = String::new();
        for frame in &self.backtrace {
            out.push_str(&format!("\n  from {} (ip {})", frame.method, frame.ip));
        }
        out
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.class, self.message)
    }
}

impl Value {
    pub fn string(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }

    pub fn symbol(s: &str) -> Self {
        Value::Symbol(Arc::from(s))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Arc::new(items))
    }

    pub fn object<K: Into<String>>(class: &str, ivars: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Object(Arc::new(ObjectValue {
            class: class.to_string(),
            ivars: ivars.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }))
    }

    pub fn exception(exc: Exception) -> Self {
        Value::Exception(Arc::new(exc))
    }

    /// Wrap a big integer, narrowing to `Int` when it fits.
    pub fn from_bigint(n: BigInt) -> Self {
        match n.to_i64() {
            Some(small) => Value::Int(small),
            None => Value::BigInt(Arc::new(n)),
        }
    }

    /// Only `nil` and `false` are falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    /// Values the comparison fast paths handle without consulting the object model.
    pub fn is_immediate(&self) -> bool {
        matches!(
            self,
            Value::Nil | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Symbol(_)
        )
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::BigInt(_) | Value::Float(_))
    }

    pub fn class_name(&self) -> &str {
        match self {
            Value::Nil => "NilClass",
            Value::Bool(true) => "TrueClass",
            Value::Bool(false) => "FalseClass",
            Value::Int(_) | Value::BigInt(_) => "Integer",
            Value::Float(_) => "Float",
            Value::Str(_) => "String",
            Value::Symbol(_) => "Symbol",
            Value::Array(_) => "Array",
            Value::Object(o) => &o.class,
            Value::Exception(e) => &e.class,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(n) => Some(*n as f64),
            Value::BigInt(n) => n.to_f64(),
            _ => None,
        }
    }

    pub fn as_bigint(&self) -> Option<BigInt> {
        match self {
            Value::Int(n) => Some(BigInt::from(*n)),
            Value::BigInt(n) => Some((**n).clone()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn ivar(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Object(o) => o.ivars.get(name),
            _ => None,
        }
    }

    /// Identity comparison: immediates by value, heap values by address.
    pub fn identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Arc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Exception(a), Value::Exception(b)) => Arc::ptr_eq(a, b),
            (Value::BigInt(a), Value::BigInt(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (a, b) if a.is_immediate() && b.is_immediate() => {
                std::mem::discriminant(a) == std::mem::discriminant(b) && a == b
            }
            _ => false,
        }
    }

    /// Ordering between two numbers, or between two strings.
    pub fn partial_cmp_value(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(_), _) | (_, Value::Float(_)) => {
                self.as_float()?.partial_cmp(&other.as_float()?)
            }
            (Value::Int(_) | Value::BigInt(_), Value::Int(_) | Value::BigInt(_)) => {
                Some(self.as_bigint()?.cmp(&other.as_bigint()?))
            }
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Human readable rendering, strings unquoted.
    pub fn display_pretty(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            _ => self.inspect(),
        }
    }

    /// Debug-style rendering, strings quoted.
    pub fn inspect(&self) -> String {
        match self {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(n) => n.to_string(),
            Value::BigInt(n) => n.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => format!("\"{}\"", s),
            Value::Symbol(s) => format!(":{}", s),
            Value::Array(items) => {
                let items: Vec<String> = items.iter().map(|v| v.inspect()).collect();
                format!("[{}]", items.join(", "))
            }
            Value::Object(o) => {
                if o.ivars.is_empty() {
                    format!("#<{}>", o.class)
                } else {
                    let ivars: Vec<String> =
                        o.ivars.iter().map(|(k, v)| format!("@{}={}", k, v.inspect())).collect();
                    format!("#<{} {}>", o.class, ivars.join(", "))
                }
            }
            Value::Exception(e) => format!("#<{}: {}>", e.class, e.message),
        }
    }
}

/// Format a float keeping at least one decimal
fn format_float(f: f64) -> String {
    if f == f.floor() && f.abs() < 1e15 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_pretty())
    }
}

/// Structural equality; numbers compare across representations.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (a, b) if a.is_numeric() && b.is_numeric() => {
                a.partial_cmp_value(b) == Some(Ordering::Equal)
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.class == b.class && a.ivars == b.ivars,
            (Value::Exception(a), Value::Exception(b)) => {
                a.class == b.class && a.message == b.message
            }
            _ => false,
        }
    }
}
