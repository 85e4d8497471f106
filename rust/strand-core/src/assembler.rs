//! Assembler producing raw `CompiledMethod`s.
//!
//! Branch and unwind targets are written as labels and patched to absolute
//! slot indices when the method is finished.

use thiserror::Error;

use crate::method::{CompiledMethod, Literal};
use crate::opcode::Opcode;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssembleError {
    #[error("{opcode} takes {expected} operand(s), got {got}")]
    OperandCount {
        opcode: Opcode,
        expected: usize,
        got: usize,
    },
    #[error("{0} does not take a target operand")]
    NotABranch(Opcode),
    #[error("label L{0} was never bound")]
    UnboundLabel(usize),
    #[error("label L{0} bound twice")]
    LabelRebound(usize),
}

/// A forward or backward reference to a code position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

pub struct Assembler {
    method: CompiledMethod,
    labels: Vec<Option<usize>>,
    /// Code slots holding a label id until `finish` patches them.
    fixups: Vec<(usize, Label)>,
    error: Option<AssembleError>,
}

impl Assembler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            method: CompiledMethod::new(name),
            labels: Vec::new(),
            fixups: Vec::new(),
            error: None,
        }
    }

    /// Set the arity, growing the register file to hold the arguments.
    pub fn arity(mut self, arity: usize) -> Self {
        self.method.arity = arity;
        self.method.registers = self.method.registers.max(arity);
        self
    }

    pub fn registers(mut self, registers: usize) -> Self {
        self.method.registers = registers;
        self
    }

    /// Current code offset; the slot the next opcode will occupy.
    pub fn offset(&self) -> usize {
        self.method.code.len()
    }

    /// Add a literal, reusing an identical pool entry.
    pub fn literal(&mut self, literal: Literal) -> i64 {
        let idx = match self.method.literals.iter().position(|l| *l == literal) {
            Some(idx) => idx,
            None => {
                self.method.literals.push(literal);
                self.method.literals.len() - 1
            }
        };
        idx as i64
    }

    pub fn symbol(&mut self, name: &str) -> i64 {
        self.literal(Literal::Symbol(name.to_string()))
    }

    pub fn emit(&mut self, op: Opcode, operands: &[i64]) -> &mut Self {
        let expected = op.operands().len();
        if operands.len() != expected {
            self.fail(AssembleError::OperandCount {
                opcode: op,
                expected,
                got: operands.len(),
            });
            return self;
        }
        self.method.code.push(op as i64);
        self.method.code.extend_from_slice(operands);
        self
    }

    pub fn op(&mut self, op: Opcode) -> &mut Self {
        self.emit(op, &[])
    }

    pub fn push_int(&mut self, n: i64) -> &mut Self {
        self.emit(Opcode::PushInt, &[n])
    }

    pub fn push_literal(&mut self, literal: Literal) -> &mut Self {
        let idx = self.literal(literal);
        self.emit(Opcode::PushLiteral, &[idx])
    }

    pub fn push_local(&mut self, reg: usize) -> &mut Self {
        self.emit(Opcode::PushLocal, &[reg as i64])
    }

    pub fn set_local(&mut self, reg: usize) -> &mut Self {
        self.emit(Opcode::SetLocal, &[reg as i64])
    }

    pub fn push_ivar(&mut self, name: &str) -> &mut Self {
        let idx = self.symbol(name);
        self.emit(Opcode::PushIvar, &[idx])
    }

    pub fn send(&mut self, selector: &str, argc: usize) -> &mut Self {
        let idx = self.symbol(selector);
        self.emit(Opcode::Send, &[idx, argc as i64])
    }

    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the current offset.
    pub fn bind(&mut self, label: Label) -> &mut Self {
        if matches!(self.labels.get(label.0), Some(None)) {
            self.labels[label.0] = Some(self.method.code.len());
        } else {
            self.fail(AssembleError::LabelRebound(label.0));
        }
        self
    }

    /// Emit a branch opcode whose target operand is `label`.
    pub fn jump(&mut self, op: Opcode, label: Label) -> &mut Self {
        if !op.is_branch() {
            self.fail(AssembleError::NotABranch(op));
            return self;
        }
        self.method.code.push(op as i64);
        self.fixups.push((self.method.code.len(), label));
        self.method.code.push(0);
        self
    }

    /// Install an unwind handler at `handler`, optionally filtered by class name.
    pub fn setup_unwind(&mut self, handler: Label, class: Option<&str>) -> &mut Self {
        let class = match class {
            Some(name) => self.literal(Literal::Str(name.to_string())),
            None => -1,
        };
        self.method.code.push(Opcode::SetupUnwind as i64);
        self.fixups.push((self.method.code.len(), handler));
        self.method.code.push(0);
        self.method.code.push(class);
        self
    }

    /// Append an already encoded word, bypassing operand checks.
    pub fn raw(&mut self, word: i64) -> &mut Self {
        self.method.code.push(word);
        self
    }

    pub fn finish(mut self) -> Result<CompiledMethod, AssembleError> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        for (slot, label) in &self.fixups {
            let target = self.labels[label.0].ok_or(AssembleError::UnboundLabel(label.0))?;
            self.method.code[*slot] = target as i64;
        }
        Ok(self.method)
    }

    fn fail(&mut self, err: AssembleError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}
