//! Opcode identities and their encoded layout.
//!
//! Every opcode occupies one slot for its own identity followed by a fixed
//! number of operand slots. The layout never changes at runtime: the linker
//! reads it once to decide which slots are entry points and which are data.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumCount, EnumIter, FromRepr, IntoStaticStr};

/// Opcodes for the Strand stack/register VM
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumCount,
    EnumIter,
    FromRepr,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum Opcode {
    Noop = 0,

    // Constants and receiver
    PushNil = 1,
    PushTrue = 2,
    PushFalse = 3,
    PushInt = 4,      // imm:      push immediate integer
    PushLiteral = 5,  // lit:      push literal pool entry
    PushSelf = 6,

    // Registers and instance state
    PushLocal = 7,    // reg:      push register
    SetLocal = 8,     // reg:      register = top (top kept)
    PushIvar = 9,     // lit:      push receiver ivar named by symbol literal

    // Stack shuffles
    Pop = 10,
    Dup = 11,
    Swap = 12,
    MakeArray = 13,   // count:    pop count values into an array

    // Comparison
    Equal = 14,       // reg, reg: push reg0 == reg1
    NotEqual = 15,    // reg, reg: push reg0 != reg1
    Less = 16,
    LessEqual = 17,
    Greater = 18,
    GreaterEqual = 19,
    Not = 20,

    // Arithmetic
    Add = 21,
    Sub = 22,
    Mul = 23,
    Div = 24,

    // Control flow
    Goto = 25,        // target
    GotoIfTrue = 26,  // target:   pop, branch when truthy
    GotoIfFalse = 27, // target:   pop, branch when falsy
    Send = 28,        // lit, count: pop args and receiver, push result
    Return = 29,
    Raise = 30,

    // Unwinding
    SetupUnwind = 31, // target, lit or -1: install an unwind handler
    PopUnwind = 32,
}

/// How an operand slot is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperandKind {
    /// Signed integer stored as-is.
    Immediate,
    /// Index into the method's register file.
    Register,
    /// Index into the method's literal pool.
    Literal,
    /// Literal pool index, or `-1` for none.
    OptionalLiteral,
    /// Non-negative element/argument count.
    Count,
    /// Absolute slot index of another opcode in the same stream.
    Target,
}

use OperandKind::*;

impl Opcode {
    /// Operand layout following the opcode slot.
    pub const fn operands(self) -> &'static [OperandKind] {
        match self {
            Opcode::PushInt => &[Immediate],
            Opcode::PushLiteral | Opcode::PushIvar => &[Literal],
            Opcode::PushLocal | Opcode::SetLocal => &[Register],
            Opcode::MakeArray => &[Count],
            Opcode::Equal | Opcode::NotEqual => &[Register, Register],
            Opcode::Goto | Opcode::GotoIfTrue | Opcode::GotoIfFalse => &[Target],
            Opcode::Send => &[Literal, Count],
            Opcode::SetupUnwind => &[Target, OptionalLiteral],
            Opcode::Noop
            | Opcode::PushNil
            | Opcode::PushTrue
            | Opcode::PushFalse
            | Opcode::PushSelf
            | Opcode::Pop
            | Opcode::Dup
            | Opcode::Swap
            | Opcode::Less
            | Opcode::LessEqual
            | Opcode::Greater
            | Opcode::GreaterEqual
            | Opcode::Not
            | Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Return
            | Opcode::Raise
            | Opcode::PopUnwind => &[],
        }
    }

    /// Encoded width in slots, counting the opcode slot itself.
    pub const fn width(self) -> usize {
        1 + self.operands().len()
    }

    /// Opcodes after which sequential execution never continues.
    pub const fn is_terminator(self) -> bool {
        matches!(self, Opcode::Return | Opcode::Raise | Opcode::Goto)
    }

    pub const fn is_branch(self) -> bool {
        matches!(self, Opcode::Goto | Opcode::GotoIfTrue | Opcode::GotoIfFalse)
    }

    /// Decode a raw stream word into an opcode identity.
    pub fn from_word(word: i64) -> Option<Self> {
        u8::try_from(word).ok().and_then(Self::from_repr)
    }

    pub fn name(self) -> &'static str {
        self.into()
    }
}
