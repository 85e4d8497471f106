//! Opcode handlers.
//!
//! Each handler performs its opcode's effect and then schedules the next step
//! itself: advance (or jump), fetch the entry at the new ip and hand it back to
//! the trampoline. Returning and unwinding are the only other exits.

/// Unwrap a `Result<_, Failure>`, leaving the handler through the unwind path
/// on error.
macro_rules! attempt {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(failure) => return $crate::vm::Control::Unwind(failure),
        }
    };
}

mod arith;
mod compare;
mod control;
mod stack;

use super::{CallFrame, Control, Failure, Handler, OpcodeStream, VmError, HANDLERS};
use strand_core::opcode::Opcode;

/// Entry point for `opcode`. Exhaustive, so adding an opcode without a handler
/// does not compile.
pub(crate) fn resolve(opcode: Opcode) -> Handler {
    match opcode {
        Opcode::Noop => stack::noop,
        Opcode::PushNil => stack::push_nil,
        Opcode::PushTrue => stack::push_true,
        Opcode::PushFalse => stack::push_false,
        Opcode::PushInt => stack::push_int,
        Opcode::PushLiteral => stack::push_literal,
        Opcode::PushSelf => stack::push_self,
        Opcode::PushLocal => stack::push_local,
        Opcode::SetLocal => stack::set_local,
        Opcode::PushIvar => stack::push_ivar,
        Opcode::Pop => stack::pop,
        Opcode::Dup => stack::dup,
        Opcode::Swap => stack::swap,
        Opcode::MakeArray => stack::make_array,
        Opcode::Equal => compare::equal,
        Opcode::NotEqual => compare::not_equal,
        Opcode::Less => compare::less,
        Opcode::LessEqual => compare::less_equal,
        Opcode::Greater => compare::greater,
        Opcode::GreaterEqual => compare::greater_equal,
        Opcode::Not => compare::not,
        Opcode::Add => arith::add,
        Opcode::Sub => arith::sub,
        Opcode::Mul => arith::mul,
        Opcode::Div => arith::div,
        Opcode::Goto => control::goto,
        Opcode::GotoIfTrue => control::goto_if_true,
        Opcode::GotoIfFalse => control::goto_if_false,
        Opcode::Send => control::send,
        Opcode::Return => control::return_,
        Opcode::Raise => control::raise,
        Opcode::SetupUnwind => control::setup_unwind,
        Opcode::PopUnwind => control::pop_unwind,
    }
}

/// Fetch the entry stored at the frame's ip.
#[inline(always)]
pub(crate) fn dispatch(frame: &CallFrame, stream: &OpcodeStream) -> Control {
    match stream.entry(frame.ip) {
        Some(index) => Control::Dispatch(HANDLERS.entry(index).handler),
        None => Control::Unwind(Failure::Fatal(VmError::BadInstructionPointer {
            method: frame.method.name.to_string(),
            ip: frame.ip,
        })),
    }
}

#[inline(always)]
fn advance(frame: &mut CallFrame, stream: &OpcodeStream, width: usize) -> Control {
    frame.ip += width;
    dispatch(frame, stream)
}

/// Targets are validated at link time.
#[inline(always)]
fn jump(frame: &mut CallFrame, stream: &OpcodeStream, target: i64) -> Control {
    frame.ip = target as usize;
    dispatch(frame, stream)
}
