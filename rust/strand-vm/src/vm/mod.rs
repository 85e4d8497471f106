//! Threaded dispatch: call frames, entry/exit protocol and nested sends.

mod frame;
mod handlers;
mod link;
mod table;
mod unwind;

pub use frame::{CallFrame, FrameState};
pub use link::{link, LinkError, LinkedMethod, OpcodeStream, Slot};
pub use table::{Control, Handler, HandlerEntry, HandlerIndex, HandlerTable, HANDLERS};

use crate::config::VmConfig;
use crate::object::{Method, ObjectModel};
use std::sync::Arc;
use strand_core::opcode::Opcode;
use strand_core::values::{Exception, StackFrame, Value};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Native stack that must remain free before another frame is entered.
/// Nested sends recurse on the host stack, so `max_call_depth` alone cannot
/// bound it.
const NATIVE_STACK_RESERVE: usize = 128 * 1024;

/// Type alias for debug callback to simplify type signatures
pub type DebugCallback = Option<Box<dyn FnMut(&DebugEvent) + Send>>;

/// Debug events emitted during execution.
/// Used for step-through debugging and execution tracing.
#[derive(Debug, Clone)]
pub enum DebugEvent {
    /// A frame was pushed onto the call chain at `depth`.
    Enter { method: Arc<str>, depth: usize },
    /// A handler is about to run at `ip`.
    Step {
        method: Arc<str>,
        ip: usize,
        opcode: Opcode,
    },
    /// A frame changed state.
    Transition {
        method: Arc<str>,
        from: FrameState,
        to: FrameState,
    },
    /// A fast path was skipped in favour of the generic operation `selector`.
    Fallback {
        method: Arc<str>,
        opcode: Opcode,
        selector: &'static str,
    },
    /// A frame's unwind handlers were consulted for a pending failure.
    UnwindVisit {
        method: Arc<str>,
        depth: usize,
        absorbed: bool,
    },
    /// A frame left the call chain.
    Exit { method: Arc<str>, returned: bool },
}

#[derive(Debug, Clone, Error)]
pub enum VmError {
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error("stack overflow: call depth exceeded {0}")]
    StackOverflow(usize),
    #[error("stack overflow: native stack exhausted at call depth {0}")]
    NativeStackExhausted(usize),
    #[error("operand stack underflow in `{method}` at ip {ip}")]
    StackUnderflow { method: String, ip: usize },
    #[error("pop_unwind without an installed handler in `{method}` at ip {ip}")]
    UnbalancedUnwind { method: String, ip: usize },
    #[error("no entry point at ip {ip} in `{method}`")]
    BadInstructionPointer { method: String, ip: usize },
    #[error("instruction limit exceeded: {0}")]
    InstructionLimitExceeded(u64),
    #[error("`{method}` expects {expected} argument(s), got {got}")]
    Arity {
        method: String,
        expected: usize,
        got: usize,
    },
    #[error("uncaught {}{}", .0, .0.format_backtrace())]
    Uncaught(Exception),
}

impl VmError {
    /// Class name of an uncaught exception, if this is one.
    pub fn exception_class(&self) -> Option<&str> {
        match self {
            VmError::Uncaught(exc) => Some(&exc.class),
            _ => None,
        }
    }
}

/// A pending failure travelling through the unwind path.
#[derive(Debug, Clone)]
pub enum Failure {
    /// Recoverable; installed unwind handlers may absorb it.
    Raise(Exception),
    /// Host failure; never absorbed, terminates the whole chain.
    Fatal(VmError),
}

impl Failure {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Failure::Fatal(_))
    }

    pub fn into_error(self) -> VmError {
        match self {
            Failure::Raise(exc) => VmError::Uncaught(exc),
            Failure::Fatal(err) => err,
        }
    }
}

/// How a frame left the call chain.
#[derive(Debug, Clone)]
pub enum Exit {
    Returned(Value),
    Failed(Failure),
}

impl Exit {
    pub fn into_result(self) -> Result<Value, VmError> {
        match self {
            Exit::Returned(value) => Ok(value),
            Exit::Failed(failure) => Err(failure.into_error()),
        }
    }

    fn into_send_result(self) -> Result<Value, Failure> {
        match self {
            Exit::Returned(value) => Ok(value),
            Exit::Failed(failure) => Err(failure),
        }
    }
}

/// The Strand virtual machine: one per worker thread.
pub struct VM {
    config: VmConfig,
    objects: Arc<dyn ObjectModel>,
    /// Call chain, outermost first. A frame's `depth` indexes into it.
    pub(crate) frames: Vec<StackFrame>,
    /// Optional debug callback for step-through debugging
    pub debug_callback: DebugCallback,
    pub(crate) instruction_count: u64,
}

impl VM {
    pub fn new(objects: Arc<dyn ObjectModel>) -> Self {
        Self::with_config(VmConfig::default(), objects)
    }

    pub fn with_config(config: VmConfig, objects: Arc<dyn ObjectModel>) -> Self {
        Self {
            config,
            objects,
            frames: Vec::new(),
            debug_callback: None,
            instruction_count: 0,
        }
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn objects(&self) -> &Arc<dyn ObjectModel> {
        &self.objects
    }

    pub fn set_debug_callback(&mut self, callback: impl FnMut(&DebugEvent) + Send + 'static) {
        self.debug_callback = Some(Box::new(callback));
    }

    /// Handlers executed since the outermost frame was entered.
    pub fn instruction_count(&self) -> u64 {
        self.instruction_count
    }

    pub fn call_depth(&self) -> usize {
        self.frames.len()
    }

    /// Create a frame for `method`, positioned at ip 0 with `args` in the
    /// leading registers. The innermost active frame, if any, becomes its caller.
    pub fn create_context(
        &self,
        method: Arc<LinkedMethod>,
        receiver: Value,
        args: Vec<Value>,
    ) -> Result<CallFrame, VmError> {
        if args.len() != method.arity {
            return Err(VmError::Arity {
                method: method.name.to_string(),
                expected: method.arity,
                got: args.len(),
            });
        }
        let caller = self.frames.len().checked_sub(1);
        Ok(CallFrame::new(method, receiver, args, caller))
    }

    /// Enter a fresh frame: perform the first dispatch, then let handlers
    /// hand control to one another until the frame returns or unwinds out.
    pub fn enter(&mut self, mut frame: CallFrame) -> Exit {
        let method = Arc::clone(&frame.method);
        let stream = &method.stream;

        if self.frames.len() >= self.config.max_call_depth {
            warn!(
                "call depth {} exceeded entering `{}`",
                self.config.max_call_depth, method.name
            );
            return Exit::Failed(Failure::Fatal(VmError::StackOverflow(
                self.config.max_call_depth,
            )));
        }
        if stacker::remaining_stack().is_some_and(|left| left < NATIVE_STACK_RESERVE) {
            warn!(
                "native stack exhausted at call depth {} entering `{}`",
                self.frames.len(),
                method.name
            );
            return Exit::Failed(Failure::Fatal(VmError::NativeStackExhausted(
                self.frames.len(),
            )));
        }
        if self.frames.is_empty() {
            self.instruction_count = 0;
        }
        frame.depth = self.frames.len();
        self.frames.push(StackFrame {
            method: Arc::clone(&method.name),
            ip: 0,
        });
        trace!("enter `{}` at depth {}", method.name, frame.depth);
        self.emit_debug_event(|| DebugEvent::Enter {
            method: Arc::clone(&method.name),
            depth: frame.depth,
        });

        let mut control = handlers::dispatch(&frame, stream);
        let exit = loop {
            match control {
                Control::Dispatch(handler) => {
                    if let Err(failure) = self.tick(&frame, stream) {
                        control = Control::Unwind(failure);
                        continue;
                    }
                    control = handler(self, &mut frame, stream);
                }
                Control::Return(value) => {
                    self.transition(&mut frame, FrameState::Returning);
                    break Exit::Returned(value);
                }
                Control::Unwind(failure) => {
                    self.transition(&mut frame, FrameState::Unwinding);
                    match unwind::absorb(self, &mut frame, stream, failure) {
                        Ok(resume) => {
                            self.transition(&mut frame, FrameState::Entered);
                            control = resume;
                        }
                        Err(failure) => break Exit::Failed(failure),
                    }
                }
            }
        };

        self.transition(&mut frame, FrameState::Exited);
        self.frames.pop();
        let returned = matches!(exit, Exit::Returned(_));
        trace!("exit `{}` (returned: {})", method.name, returned);
        self.emit_debug_event(|| DebugEvent::Exit {
            method: Arc::clone(&method.name),
            returned,
        });
        exit
    }

    /// Create and enter a frame for `method`, mapping an unabsorbed failure to an error.
    pub fn run(
        &mut self,
        method: &Arc<LinkedMethod>,
        receiver: Value,
        args: Vec<Value>,
    ) -> Result<Value, VmError> {
        let frame = self.create_context(Arc::clone(method), receiver, args)?;
        self.enter(frame).into_result()
    }

    /// Nested send on behalf of `caller`. Compiled methods recursively enter a
    /// new frame; control comes back only when that frame has exited.
    pub(crate) fn send(
        &mut self,
        caller: &CallFrame,
        receiver: Value,
        selector: &str,
        args: Vec<Value>,
    ) -> Result<Value, Failure> {
        self.frames[caller.depth].ip = caller.ip;
        let method = match self.objects.lookup(&receiver, selector) {
            Some(method) => method,
            None => {
                let exc = Exception::new(
                    "NoMethodError",
                    format!("undefined method `{}' for {}", selector, receiver.inspect()),
                );
                return Err(self.raise(caller, exc));
            }
        };
        match method {
            Method::Compiled(callee) => {
                let frame = match self.create_context(callee, receiver, args) {
                    Ok(frame) => frame,
                    Err(VmError::Arity { expected, got, .. }) => {
                        let exc = Exception::argument_error(format!(
                            "wrong number of arguments (given {}, expected {})",
                            got, expected
                        ));
                        return Err(self.raise(caller, exc));
                    }
                    Err(err) => return Err(Failure::Fatal(err)),
                };
                self.enter(frame).into_send_result()
            }
            Method::Native(native) => native
                .call(&receiver, &args)
                .map_err(|exc| self.raise(caller, exc)),
        }
    }

    /// Whether the fast path of `opcode` may run for `receiver`.
    pub(crate) fn fast_path_allowed(&self, receiver: &Value, selector: &str) -> bool {
        self.config.fast_paths
            && !(self.config.honor_redefinition && self.objects.is_redefined(receiver, selector))
    }

    pub(crate) fn note_fallback(&mut self, frame: &CallFrame, opcode: Opcode, selector: &'static str) {
        trace!("{} in `{}` fell back to `{}`", opcode, frame.method.name, selector);
        self.emit_debug_event(|| DebugEvent::Fallback {
            method: Arc::clone(&frame.method.name),
            opcode,
            selector,
        });
    }

    /// Stamp `exc` with the current call chain and turn it into a failure.
    pub(crate) fn raise(&mut self, frame: &CallFrame, exc: Exception) -> Failure {
        self.frames[frame.depth].ip = frame.ip;
        debug!("raise {} in `{}` at ip {}", exc, frame.method.name, frame.ip);
        Failure::Raise(exc.with_backtrace(self.backtrace()))
    }

    /// Call chain, innermost first.
    pub fn backtrace(&self) -> Vec<StackFrame> {
        self.frames.iter().rev().cloned().collect()
    }

    pub(crate) fn emit_debug_event(&mut self, event: impl FnOnce() -> DebugEvent) {
        if let Some(ref mut cb) = self.debug_callback {
            cb(&event());
        }
    }

    fn transition(&mut self, frame: &mut CallFrame, to: FrameState) {
        let from = frame.transition(to);
        self.emit_debug_event(|| DebugEvent::Transition {
            method: Arc::clone(&frame.method.name),
            from,
            to,
        });
    }

    /// Per-dispatch bookkeeping: instruction budget and step events.
    #[inline]
    fn tick(&mut self, frame: &CallFrame, stream: &OpcodeStream) -> Result<(), Failure> {
        self.instruction_count += 1;
        if let Some(limit) = self.config.instruction_limit {
            if self.instruction_count > limit {
                return Err(Failure::Fatal(VmError::InstructionLimitExceeded(limit)));
            }
        }
        if self.debug_callback.is_some() {
            if let Some(opcode) = stream.opcode_at(frame.ip) {
                self.emit_debug_event(|| DebugEvent::Step {
                    method: Arc::clone(&frame.method.name),
                    ip: frame.ip,
                    opcode,
                });
            }
        }
        Ok(())
    }
}
