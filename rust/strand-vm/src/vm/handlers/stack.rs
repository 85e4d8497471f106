//! Constants, registers and stack shuffling.

use super::advance;
use crate::vm::{CallFrame, Control, OpcodeStream, VM};
use strand_core::opcode::Opcode;
use strand_core::values::Value;

pub(super) fn noop(_vm: &mut VM, frame: &mut CallFrame, stream: &OpcodeStream) -> Control {
    advance(frame, stream, Opcode::Noop.width())
}

pub(super) fn push_nil(_vm: &mut VM, frame: &mut CallFrame, stream: &OpcodeStream) -> Control {
    frame.push(Value::Nil);
    advance(frame, stream, Opcode::PushNil.width())
}

pub(super) fn push_true(_vm: &mut VM, frame: &mut CallFrame, stream: &OpcodeStream) -> Control {
    frame.push(Value::Bool(true));
    advance(frame, stream, Opcode::PushTrue.width())
}

pub(super) fn push_false(_vm: &mut VM, frame: &mut CallFrame, stream: &OpcodeStream) -> Control {
    frame.push(Value::Bool(false));
    advance(frame, stream, Opcode::PushFalse.width())
}

pub(super) fn push_int(_vm: &mut VM, frame: &mut CallFrame, stream: &OpcodeStream) -> Control {
    frame.push(Value::Int(stream.operand(frame.ip, 0)));
    advance(frame, stream, Opcode::PushInt.width())
}

pub(super) fn push_literal(_vm: &mut VM, frame: &mut CallFrame, stream: &OpcodeStream) -> Control {
    let index = stream.operand(frame.ip, 0) as usize;
    let value = frame.method.literals[index].clone();
    frame.push(value);
    advance(frame, stream, Opcode::PushLiteral.width())
}

pub(super) fn push_self(_vm: &mut VM, frame: &mut CallFrame, stream: &OpcodeStream) -> Control {
    let receiver = frame.receiver.clone();
    frame.push(receiver);
    advance(frame, stream, Opcode::PushSelf.width())
}

pub(super) fn push_local(_vm: &mut VM, frame: &mut CallFrame, stream: &OpcodeStream) -> Control {
    let reg = stream.operand(frame.ip, 0) as usize;
    let value = frame.registers[reg].clone();
    frame.push(value);
    advance(frame, stream, Opcode::PushLocal.width())
}

/// Store the top of the stack without popping it.
pub(super) fn set_local(_vm: &mut VM, frame: &mut CallFrame, stream: &OpcodeStream) -> Control {
    let reg = stream.operand(frame.ip, 0) as usize;
    let value = attempt!(frame.peek()).clone();
    frame.registers[reg] = value;
    advance(frame, stream, Opcode::SetLocal.width())
}

/// Unset instance variables read as nil.
pub(super) fn push_ivar(_vm: &mut VM, frame: &mut CallFrame, stream: &OpcodeStream) -> Control {
    let name = frame.method.literal_name(stream.operand(frame.ip, 0));
    let value = frame.receiver.ivar(name).cloned().unwrap_or(Value::Nil);
    frame.push(value);
    advance(frame, stream, Opcode::PushIvar.width())
}

pub(super) fn pop(_vm: &mut VM, frame: &mut CallFrame, stream: &OpcodeStream) -> Control {
    attempt!(frame.pop());
    advance(frame, stream, Opcode::Pop.width())
}

pub(super) fn dup(_vm: &mut VM, frame: &mut CallFrame, stream: &OpcodeStream) -> Control {
    let top = attempt!(frame.peek()).clone();
    frame.push(top);
    advance(frame, stream, Opcode::Dup.width())
}

pub(super) fn swap(_vm: &mut VM, frame: &mut CallFrame, stream: &OpcodeStream) -> Control {
    let b = attempt!(frame.pop());
    let a = attempt!(frame.pop());
    frame.push(b);
    frame.push(a);
    advance(frame, stream, Opcode::Swap.width())
}

pub(super) fn make_array(_vm: &mut VM, frame: &mut CallFrame, stream: &OpcodeStream) -> Control {
    let count = stream.operand(frame.ip, 0) as usize;
    let items = attempt!(frame.pop_n(count));
    frame.push(Value::array(items));
    advance(frame, stream, Opcode::MakeArray.width())
}
