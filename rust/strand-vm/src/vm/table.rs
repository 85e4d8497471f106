//! Process-wide handler table.
//!
//! Built exactly once, on first use, and never mutated afterwards. Linked
//! streams store a `HandlerIndex` into it instead of raw code addresses.

use super::{handlers, CallFrame, Failure, OpcodeStream, VM};
use once_cell::sync::Lazy;
use std::fmt;
use strand_core::opcode::Opcode;
use strand_core::values::Value;
use strum::IntoEnumIterator;
use tracing::debug;

/// Entry point of an opcode handler.
pub type Handler = fn(&mut VM, &mut CallFrame, &OpcodeStream) -> Control;

/// What a handler hands back to the trampoline. Every handler ends in exactly
/// one of these; advancing and jumping both surface as `Dispatch`.
pub enum Control {
    /// Continue with the handler fetched at the frame's new ip.
    Dispatch(Handler),
    /// Leave the frame with a value.
    Return(Value),
    /// Leave the sequential path through the frame's unwind handlers.
    Unwind(Failure),
}

impl fmt::Debug for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Control::Dispatch(handler) => write!(f, "Dispatch({:p})", *handler as *const ()),
            Control::Return(value) => f.debug_tuple("Return").field(value).finish(),
            Control::Unwind(failure) => f.debug_tuple("Unwind").field(failure).finish(),
        }
    }
}

/// Index of a resolved handler in `HANDLERS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerIndex(u16);

impl HandlerIndex {
    pub fn get(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy)]
pub struct HandlerEntry {
    pub opcode: Opcode,
    /// Declared encoded width, in slots.
    pub width: usize,
    pub handler: Handler,
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("opcode", &self.opcode)
            .field("width", &self.width)
            .finish()
    }
}

/// Entries are stored in opcode identity order, so an opcode's identity is
/// its index.
#[derive(Debug)]
pub struct HandlerTable {
    entries: Vec<HandlerEntry>,
}

pub static HANDLERS: Lazy<HandlerTable> = Lazy::new(HandlerTable::build);

impl HandlerTable {
    fn build() -> Self {
        let entries: Vec<HandlerEntry> = Opcode::iter()
            .map(|opcode| HandlerEntry {
                opcode,
                width: opcode.width(),
                handler: handlers::resolve(opcode),
            })
            .collect();
        debug_assert!(entries
            .iter()
            .enumerate()
            .all(|(index, entry)| entry.opcode as usize == index));
        debug!("handler table built with {} entries", entries.len());
        Self { entries }
    }

    /// Resolve a raw stream word to its handler, if it names an opcode.
    pub fn resolve_word(&self, word: i64) -> Option<HandlerIndex> {
        Opcode::from_word(word).map(|opcode| self.resolve(opcode))
    }

    #[inline]
    pub fn resolve(&self, opcode: Opcode) -> HandlerIndex {
        HandlerIndex(opcode as u16)
    }

    #[inline(always)]
    pub fn entry(&self, index: HandlerIndex) -> &HandlerEntry {
        &self.entries[index.get()]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HandlerEntry> {
        self.entries.iter()
    }
}
