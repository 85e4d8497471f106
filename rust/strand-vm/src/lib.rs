//! Strand VM: threaded-dispatch execution kernel for linked opcode streams.
//!
//! Compiled methods are linked once against the process-wide handler table.
//! From then on every handler performs its effect, advances the instruction
//! pointer and hands the next handler back to a thin trampoline; there is no
//! central `match` over opcodes.

pub mod builtins;
pub mod config;
pub mod object;
pub mod vm;

// Re-export shared types from strand-core
pub use strand_core::{assembler, method, opcode, values};
