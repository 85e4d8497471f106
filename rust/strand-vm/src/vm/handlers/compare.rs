//! Equality and ordering.
//!
//! `equal`/`not_equal` compare two registers; immediates are compared in
//! place. The ordering opcodes pop their operands and take the numeric fast
//! path when both are `Int`/`Float`. Everything else goes through the
//! configured fallback.

use super::advance;
use crate::builtins::{self, CompareOp};
use crate::config::FallbackPolicy;
use crate::vm::{CallFrame, Control, Failure, OpcodeStream, VM};
use strand_core::opcode::Opcode;
use strand_core::values::{Exception, Value};

fn register_pair(frame: &CallFrame, stream: &OpcodeStream) -> (Value, Value) {
    let lhs = stream.operand(frame.ip, 0) as usize;
    let rhs = stream.operand(frame.ip, 1) as usize;
    (frame.registers[lhs].clone(), frame.registers[rhs].clone())
}

fn immediate_fast_path(vm: &VM, lhs: &Value, rhs: &Value, selector: &str) -> bool {
    lhs.is_immediate() && rhs.is_immediate() && vm.fast_path_allowed(lhs, selector)
}

pub(super) fn equal(vm: &mut VM, frame: &mut CallFrame, stream: &OpcodeStream) -> Control {
    let (lhs, rhs) = register_pair(frame, stream);
    let result = if immediate_fast_path(vm, &lhs, &rhs, "==") {
        lhs == rhs
    } else {
        attempt!(generic_equal(vm, frame, Opcode::Equal, lhs, rhs))
    };
    frame.push(Value::Bool(result));
    advance(frame, stream, Opcode::Equal.width())
}

pub(super) fn not_equal(vm: &mut VM, frame: &mut CallFrame, stream: &OpcodeStream) -> Control {
    let (lhs, rhs) = register_pair(frame, stream);
    let fast = immediate_fast_path(vm, &lhs, &rhs, "!=") && vm.fast_path_allowed(&lhs, "==");
    let result = if fast {
        lhs != rhs
    } else {
        attempt!(generic_not_equal(vm, frame, lhs, rhs))
    };
    frame.push(Value::Bool(result));
    advance(frame, stream, Opcode::NotEqual.width())
}

fn generic_equal(
    vm: &mut VM,
    frame: &CallFrame,
    opcode: Opcode,
    lhs: Value,
    rhs: Value,
) -> Result<bool, Failure> {
    vm.note_fallback(frame, opcode, "==");
    match vm.config().fallback {
        FallbackPolicy::Send => Ok(vm.send(frame, lhs, "==", vec![rhs])?.is_truthy()),
        FallbackPolicy::Builtin => Ok(lhs == rhs),
        FallbackPolicy::Raise => Err(no_fast_path(vm, frame, opcode, &lhs, &rhs)),
    }
}

/// `!=` when the receiver defines it, otherwise the negation of `==`.
fn generic_not_equal(vm: &mut VM, frame: &CallFrame, lhs: Value, rhs: Value) -> Result<bool, Failure> {
    if vm.config().fallback == FallbackPolicy::Send && vm.objects().lookup(&lhs, "!=").is_some() {
        vm.note_fallback(frame, Opcode::NotEqual, "!=");
        return Ok(vm.send(frame, lhs, "!=", vec![rhs])?.is_truthy());
    }
    generic_equal(vm, frame, Opcode::NotEqual, lhs, rhs).map(|equal| !equal)
}

fn no_fast_path(vm: &mut VM, frame: &CallFrame, opcode: Opcode, lhs: &Value, rhs: &Value) -> Failure {
    let exc = Exception::type_error(format!(
        "{} has no fast path for {} and {}",
        opcode,
        lhs.class_name(),
        rhs.class_name()
    ));
    vm.raise(frame, exc)
}

fn ordering(vm: &mut VM, frame: &mut CallFrame, stream: &OpcodeStream, op: CompareOp, opcode: Opcode) -> Control {
    let rhs = attempt!(frame.pop());
    let lhs = attempt!(frame.pop());
    let fast = matches!(
        (&lhs, &rhs),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_))
    ) && vm.fast_path_allowed(&lhs, op.selector());

    let result = if fast {
        Value::Bool(lhs.partial_cmp_value(&rhs).is_some_and(|o| op.holds(o)))
    } else {
        vm.note_fallback(frame, opcode, op.selector());
        match vm.config().fallback {
            FallbackPolicy::Send => attempt!(vm.send(frame, lhs, op.selector(), vec![rhs])),
            FallbackPolicy::Builtin => match builtins::compare(op, &lhs, &rhs) {
                Ok(holds) => Value::Bool(holds),
                Err(exc) => return Control::Unwind(vm.raise(frame, exc)),
            },
            FallbackPolicy::Raise => return Control::Unwind(no_fast_path(vm, frame, opcode, &lhs, &rhs)),
        }
    };
    frame.push(result);
    advance(frame, stream, opcode.width())
}

pub(super) fn less(vm: &mut VM, frame: &mut CallFrame, stream: &OpcodeStream) -> Control {
    ordering(vm, frame, stream, CompareOp::Less, Opcode::Less)
}

pub(super) fn less_equal(vm: &mut VM, frame: &mut CallFrame, stream: &OpcodeStream) -> Control {
    ordering(vm, frame, stream, CompareOp::LessEqual, Opcode::LessEqual)
}

pub(super) fn greater(vm: &mut VM, frame: &mut CallFrame, stream: &OpcodeStream) -> Control {
    ordering(vm, frame, stream, CompareOp::Greater, Opcode::Greater)
}

pub(super) fn greater_equal(vm: &mut VM, frame: &mut CallFrame, stream: &OpcodeStream) -> Control {
    ordering(vm, frame, stream, CompareOp::GreaterEqual, Opcode::GreaterEqual)
}

pub(super) fn not(_vm: &mut VM, frame: &mut CallFrame, stream: &OpcodeStream) -> Control {
    let value = attempt!(frame.pop());
    frame.push(Value::Bool(!value.is_truthy()));
    advance(frame, stream, Opcode::Not.width())
}
