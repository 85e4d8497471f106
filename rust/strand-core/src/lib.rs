//! Strand Core
//!
//! Opcode metadata, raw compiled methods, the assembler and runtime values shared
//! by the linker and the dispatch kernel.

pub mod assembler;
pub mod method;
pub mod opcode;
pub mod values;

pub use assembler::{AssembleError, Assembler, Label};
pub use method::{CompiledMethod, Literal};
pub use opcode::{Opcode, OperandKind};
pub use values::{Exception, ObjectValue, StackFrame, Value};
