//! Branches, sends, returns and unwind-handler management.

use super::{advance, jump};
use crate::vm::frame::UnwindEntry;
use crate::vm::{CallFrame, Control, Failure, OpcodeStream, VmError, VM};
use std::sync::Arc;
use strand_core::opcode::Opcode;
use strand_core::values::{Exception, Value};

pub(super) fn goto(_vm: &mut VM, frame: &mut CallFrame, stream: &OpcodeStream) -> Control {
    let target = stream.operand(frame.ip, 0);
    jump(frame, stream, target)
}

pub(super) fn goto_if_true(_vm: &mut VM, frame: &mut CallFrame, stream: &OpcodeStream) -> Control {
    let target = stream.operand(frame.ip, 0);
    let condition = attempt!(frame.pop());
    if condition.is_truthy() {
        jump(frame, stream, target)
    } else {
        advance(frame, stream, Opcode::GotoIfTrue.width())
    }
}

pub(super) fn goto_if_false(_vm: &mut VM, frame: &mut CallFrame, stream: &OpcodeStream) -> Control {
    let target = stream.operand(frame.ip, 0);
    let condition = attempt!(frame.pop());
    if condition.is_truthy() {
        advance(frame, stream, Opcode::GotoIfFalse.width())
    } else {
        jump(frame, stream, target)
    }
}

/// Pop `argc` arguments and the receiver, run the nested send to completion,
/// then push its result and continue.
pub(super) fn send(vm: &mut VM, frame: &mut CallFrame, stream: &OpcodeStream) -> Control {
    let method = Arc::clone(&frame.method);
    let selector = method.literal_name(stream.operand(frame.ip, 0));
    let argc = stream.operand(frame.ip, 1) as usize;

    let args = attempt!(frame.pop_n(argc));
    let receiver = attempt!(frame.pop());
    let result = attempt!(vm.send(frame, receiver, selector, args));
    frame.push(result);
    advance(frame, stream, Opcode::Send.width())
}

/// An empty stack returns nil.
pub(super) fn return_(_vm: &mut VM, frame: &mut CallFrame, _stream: &OpcodeStream) -> Control {
    Control::Return(frame.stack.pop().unwrap_or(Value::Nil))
}

/// Raise the popped exception. Strings become `RuntimeError`s; an exception
/// that already carries a backtrace keeps it.
pub(super) fn raise(vm: &mut VM, frame: &mut CallFrame, _stream: &OpcodeStream) -> Control {
    let exc = match attempt!(frame.pop()) {
        Value::Exception(exc) => Exception::clone(&exc),
        Value::Str(message) => Exception::new("RuntimeError", message.to_string()),
        other => Exception::type_error(format!(
            "exception class/object expected, got {}",
            other.inspect()
        )),
    };
    Control::Unwind(vm.raise(frame, exc))
}

pub(super) fn setup_unwind(_vm: &mut VM, frame: &mut CallFrame, stream: &OpcodeStream) -> Control {
    let target = stream.operand(frame.ip, 0) as usize;
    let class = match stream.operand(frame.ip, 1) {
        -1 => None,
        index => Some(Arc::from(frame.method.literal_name(index))),
    };
    let stack_depth = frame.stack.len();
    frame.unwinders.push(UnwindEntry {
        target,
        class,
        stack_depth,
    });
    advance(frame, stream, Opcode::SetupUnwind.width())
}

pub(super) fn pop_unwind(_vm: &mut VM, frame: &mut CallFrame, stream: &OpcodeStream) -> Control {
    if frame.unwinders.pop().is_none() {
        return Control::Unwind(Failure::Fatal(VmError::UnbalancedUnwind {
            method: frame.method.name.to_string(),
            ip: frame.ip,
        }));
    }
    advance(frame, stream, Opcode::PopUnwind.width())
}
