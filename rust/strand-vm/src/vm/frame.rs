//! Execution context of one method activation.

use super::{Failure, LinkedMethod, VmError};
use std::sync::Arc;
use strand_core::values::Value;

/// Lifecycle of a call frame.
///
/// `Entered` covers the whole handler-to-handler chain. An unwind absorbed by
/// one of the frame's own handlers resumes that chain (`Unwinding -> Entered`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameState {
    Entered,
    Returning,
    Unwinding,
    Exited,
}

impl FrameState {
    pub fn can_transition_to(self, to: FrameState) -> bool {
        use FrameState::*;
        matches!(
            (self, to),
            (Entered, Returning)
                | (Entered, Unwinding)
                | (Unwinding, Entered)
                | (Returning, Exited)
                | (Unwinding, Exited)
        )
    }
}

/// An installed unwind handler.
#[derive(Debug, Clone)]
pub(crate) struct UnwindEntry {
    pub target: usize,
    /// Exception class filter; `None` absorbs any raised exception.
    pub class: Option<Arc<str>>,
    /// Operand stack height when the handler was installed.
    pub stack_depth: usize,
}

/// Call frame: the mutable state of one in-progress activation.
#[derive(Debug)]
pub struct CallFrame {
    pub(crate) method: Arc<LinkedMethod>,
    pub(crate) ip: usize,
    pub(crate) stack: Vec<Value>,
    pub(crate) registers: Vec<Value>,
    pub(crate) receiver: Value,
    /// Depth of the calling frame in the VM's call chain.
    pub(crate) caller: Option<usize>,
    pub(crate) depth: usize,
    pub(crate) state: FrameState,
    pub(crate) unwinders: Vec<UnwindEntry>,
}

impl CallFrame {
    pub(crate) fn new(
        method: Arc<LinkedMethod>,
        receiver: Value,
        args: Vec<Value>,
        caller: Option<usize>,
    ) -> Self {
        let mut registers = args;
        registers.resize(method.registers, Value::Nil);
        Self {
            method,
            ip: 0,
            stack: Vec::with_capacity(16),
            registers,
            receiver,
            caller,
            depth: 0,
            state: FrameState::Entered,
            unwinders: Vec::new(),
        }
    }

    pub fn method(&self) -> &LinkedMethod {
        &self.method
    }

    pub fn ip(&self) -> usize {
        self.ip
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn registers(&self) -> &[Value] {
        &self.registers
    }

    pub fn receiver(&self) -> &Value {
        &self.receiver
    }

    pub fn caller(&self) -> Option<usize> {
        self.caller
    }

    #[inline]
    pub(crate) fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    #[inline]
    pub(crate) fn pop(&mut self) -> Result<Value, Failure> {
        match self.stack.pop() {
            Some(value) => Ok(value),
            None => Err(self.underflow()),
        }
    }

    /// Pop the top `n` values, oldest first.
    pub(crate) fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, Failure> {
        if self.stack.len() < n {
            return Err(self.underflow());
        }
        let at = self.stack.len() - n;
        Ok(self.stack.split_off(at))
    }

    pub(crate) fn peek(&self) -> Result<&Value, Failure> {
        self.stack.last().ok_or_else(|| self.underflow())
    }

    /// Move to `to`, returning the previous state.
    pub(crate) fn transition(&mut self, to: FrameState) -> FrameState {
        let from = self.state;
        debug_assert!(
            from.can_transition_to(to),
            "illegal frame transition {:?} -> {:?}",
            from,
            to
        );
        self.state = to;
        from
    }

    fn underflow(&self) -> Failure {
        Failure::Fatal(VmError::StackUnderflow {
            method: self.method.name.to_string(),
            ip: self.ip,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        use FrameState::*;
        assert!(Entered.can_transition_to(Returning));
        assert!(Entered.can_transition_to(Unwinding));
        assert!(Unwinding.can_transition_to(Entered));
        assert!(Returning.can_transition_to(Exited));
        assert!(Unwinding.can_transition_to(Exited));

        assert!(!Exited.can_transition_to(Entered));
        assert!(!Entered.can_transition_to(Exited));
        assert!(!Returning.can_transition_to(Unwinding));
    }
}
