//! Raw compiled methods as handed over by the compiler.
//!
//! A `CompiledMethod` is the unlinked form: opcode positions in `code` hold the
//! opcode's numeric identity, every other word is operand data.

use serde::{Deserialize, Serialize};

use crate::values::Value;

/// Constant value in the literal pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    Symbol(String),
}

impl Literal {
    /// Name carried by a symbol or string literal.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Literal::Symbol(s) | Literal::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Literal::Int(n) => Value::Int(*n),
            Literal::Float(f) => Value::Float(*f),
            Literal::Str(s) => Value::string(s),
            Literal::Symbol(s) => Value::symbol(s),
        }
    }
}

/// A compiled, not yet linked, method body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledMethod {
    pub name: String,
    /// Number of positional arguments, loaded into registers `0..arity`.
    pub arity: usize,
    /// Size of the register file; at least `arity`.
    pub registers: usize,
    pub literals: Vec<Literal>,
    pub code: Vec<i64>,
}

impl CompiledMethod {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arity: 0,
            registers: 0,
            literals: Vec::new(),
            code: Vec::new(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::Opcode;

    #[test]
    fn test_json_preserves_code_words() {
        let method = CompiledMethod {
            name: "answer".into(),
            arity: 0,
            registers: 0,
            literals: vec![Literal::Symbol("+".into()), Literal::Float(1.5)],
            code: vec![Opcode::PushInt as i64, 42, Opcode::Return as i64],
        };
        let json = method.to_json().unwrap();
        assert!(json.contains("\"kind\": \"symbol\""));
        assert_eq!(CompiledMethod::from_json(&json).unwrap(), method);
    }

    #[test]
    fn test_literal_names() {
        assert_eq!(Literal::Symbol("==".into()).as_name(), Some("=="));
        assert_eq!(Literal::Str("RuntimeError".into()).as_name(), Some("RuntimeError"));
        assert_eq!(Literal::Int(3).as_name(), None);
    }
}
