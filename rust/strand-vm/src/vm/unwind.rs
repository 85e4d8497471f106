//! Unwind path: consult a frame's installed handlers for a pending failure.

use super::{handlers, CallFrame, Control, DebugEvent, Failure, OpcodeStream, VM};
use std::sync::Arc;
use strand_core::values::Value;
use tracing::{debug, trace};

/// Try to absorb `failure` in `frame`. Handlers are consulted innermost first
/// and are consumed as they are visited; the first whose class filter matches
/// takes over with the stack cut back to its installation depth and the
/// exception on top. Fatal failures skip every handler.
///
/// On `Err` the failure continues into the caller, which sees it as the
/// result of its nested send.
pub(crate) fn absorb(
    vm: &mut VM,
    frame: &mut CallFrame,
    stream: &OpcodeStream,
    failure: Failure,
) -> Result<Control, Failure> {
    let exc = match failure {
        Failure::Raise(exc) => exc,
        fatal @ Failure::Fatal(_) => {
            visited(vm, frame, false);
            return Err(fatal);
        }
    };

    while let Some(entry) = frame.unwinders.pop() {
        let matches = match &entry.class {
            None => true,
            Some(class) => vm.objects().is_kind_of(&exc.class, class),
        };
        if !matches {
            trace!("handler @{} in `{}` skips {}", entry.target, frame.method.name, exc.class);
            continue;
        }
        debug!("{} absorbed by `{}` @{}", exc.class, frame.method.name, entry.target);
        frame.stack.truncate(entry.stack_depth);
        frame.push(Value::exception(exc));
        frame.ip = entry.target;
        visited(vm, frame, true);
        return Ok(handlers::dispatch(frame, stream));
    }

    visited(vm, frame, false);
    match frame.caller {
        Some(depth) => trace!("{} propagates from `{}` to depth {}", exc.class, frame.method.name, depth),
        None => debug!("{} leaves outermost frame `{}`", exc.class, frame.method.name),
    }
    Err(Failure::Raise(exc))
}

fn visited(vm: &mut VM, frame: &CallFrame, absorbed: bool) {
    vm.emit_debug_event(|| DebugEvent::UnwindVisit {
        method: Arc::clone(&frame.method.name),
        depth: frame.depth,
        absorbed,
    });
}
