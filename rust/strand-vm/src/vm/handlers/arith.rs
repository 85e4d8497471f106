//! Arithmetic. The fast path covers `Int`/`Float` operands; integer overflow
//! and division by zero leave it for the generic path, which promotes to big
//! integers or raises.

use super::advance;
use crate::builtins::{self, floor_div, ArithOp};
use crate::config::FallbackPolicy;
use crate::vm::{CallFrame, Control, OpcodeStream, VM};
use strand_core::opcode::Opcode;
use strand_core::values::{Exception, Value};

#[inline]
fn fast(op: ArithOp, lhs: &Value, rhs: &Value) -> Option<Value> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => {
            let n = match op {
                ArithOp::Add => a.checked_add(*b),
                ArithOp::Sub => a.checked_sub(*b),
                ArithOp::Mul => a.checked_mul(*b),
                ArithOp::Div => floor_div(*a, *b),
            }?;
            Some(Value::Int(n))
        }
        (Value::Float(_), Value::Int(_) | Value::Float(_)) | (Value::Int(_), Value::Float(_)) => {
            let (a, b) = (lhs.as_float()?, rhs.as_float()?);
            Some(Value::Float(match op {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                ArithOp::Mul => a * b,
                ArithOp::Div => a / b,
            }))
        }
        _ => None,
    }
}

fn binary(vm: &mut VM, frame: &mut CallFrame, stream: &OpcodeStream, op: ArithOp, opcode: Opcode) -> Control {
    let rhs = attempt!(frame.pop());
    let lhs = attempt!(frame.pop());

    let quick = if vm.fast_path_allowed(&lhs, op.selector()) {
        fast(op, &lhs, &rhs)
    } else {
        None
    };
    let result = match quick {
        Some(value) => value,
        None => {
            vm.note_fallback(frame, opcode, op.selector());
            match vm.config().fallback {
                FallbackPolicy::Send => attempt!(vm.send(frame, lhs, op.selector(), vec![rhs])),
                FallbackPolicy::Builtin => match builtins::arith(op, &lhs, &rhs) {
                    Ok(value) => value,
                    Err(exc) => return Control::Unwind(vm.raise(frame, exc)),
                },
                FallbackPolicy::Raise => {
                    let exc = Exception::type_error(format!(
                        "{} has no fast path for {} and {}",
                        opcode,
                        lhs.class_name(),
                        rhs.class_name()
                    ));
                    return Control::Unwind(vm.raise(frame, exc));
                }
            }
        }
    };
    frame.push(result);
    advance(frame, stream, opcode.width())
}

pub(super) fn add(vm: &mut VM, frame: &mut CallFrame, stream: &OpcodeStream) -> Control {
    binary(vm, frame, stream, ArithOp::Add, Opcode::Add)
}

pub(super) fn sub(vm: &mut VM, frame: &mut CallFrame, stream: &OpcodeStream) -> Control {
    binary(vm, frame, stream, ArithOp::Sub, Opcode::Sub)
}

pub(super) fn mul(vm: &mut VM, frame: &mut CallFrame, stream: &OpcodeStream) -> Control {
    binary(vm, frame, stream, ArithOp::Mul, Opcode::Mul)
}

pub(super) fn div(vm: &mut VM, frame: &mut CallFrame, stream: &OpcodeStream) -> Control {
    binary(vm, frame, stream, ArithOp::Div, Opcode::Div)
}
