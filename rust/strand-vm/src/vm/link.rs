//! Linking raw compiled methods into dispatchable opcode streams.
//!
//! Linking walks the code once, resolves every opcode identity against the
//! handler table and fixes which slots are entry points and which are operand
//! data. All metadata errors surface here, before any frame is entered.

use super::table::{HandlerIndex, HANDLERS};
use std::fmt;
use std::sync::Arc;
use strand_core::method::{CompiledMethod, Literal};
use strand_core::opcode::{Opcode, OperandKind};
use strand_core::values::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("method `{method}` has an empty opcode stream")]
    EmptyStream { method: String },
    #[error("method `{method}`: unknown opcode {word} at slot {offset}")]
    UnknownOpcode {
        method: String,
        offset: usize,
        word: i64,
    },
    #[error("method `{method}`: {opcode} at slot {offset} needs {width} slots, stream has {len}")]
    Truncated {
        method: String,
        offset: usize,
        opcode: Opcode,
        width: usize,
        len: usize,
    },
    #[error("method `{method}`: register r{register} at slot {offset} out of range ({registers} registers)")]
    RegisterOutOfRange {
        method: String,
        offset: usize,
        register: i64,
        registers: usize,
    },
    #[error("method `{method}`: literal {index} at slot {offset} out of range ({literals} literals)")]
    LiteralOutOfRange {
        method: String,
        offset: usize,
        index: i64,
        literals: usize,
    },
    #[error("method `{method}`: {opcode} at slot {offset} needs a symbol or string literal")]
    NameExpected {
        method: String,
        offset: usize,
        opcode: Opcode,
    },
    #[error("method `{method}`: negative count {count} at slot {offset}")]
    NegativeCount {
        method: String,
        offset: usize,
        count: i64,
    },
    #[error("method `{method}`: target {target} at slot {offset} is not an opcode boundary")]
    BadTarget {
        method: String,
        offset: usize,
        target: i64,
    },
    #[error("method `{method}` ends with {opcode}, execution would run off the stream")]
    FallsOffEnd { method: String, opcode: Opcode },
    #[error("method `{method}` takes {arity} argument(s) but has only {registers} register(s)")]
    ArityExceedsRegisters {
        method: String,
        arity: usize,
        registers: usize,
    },
}

/// One stream slot; its kind is fixed by position at link time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Entry(HandlerIndex),
    Operand(i64),
}

/// Immutable, linked opcode stream.
#[derive(Debug, Clone)]
pub struct OpcodeStream {
    slots: Box<[Slot]>,
}

impl OpcodeStream {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Handler stored at `ip`, if `ip` addresses an opcode.
    #[inline(always)]
    pub fn entry(&self, ip: usize) -> Option<HandlerIndex> {
        match self.slots.get(ip) {
            Some(Slot::Entry(index)) => Some(*index),
            _ => None,
        }
    }

    /// The `n`th operand of the opcode at `ip`.
    #[inline(always)]
    pub fn operand(&self, ip: usize, n: usize) -> i64 {
        match self.slots[ip + 1 + n] {
            Slot::Operand(word) => word,
            Slot::Entry(_) => unreachable!("slot {} is an entry point, not an operand", ip + 1 + n),
        }
    }

    pub fn opcode_at(&self, ip: usize) -> Option<Opcode> {
        self.entry(ip).map(|index| HANDLERS.entry(index).opcode)
    }
}

/// A method ready for execution; shareable across threads.
#[derive(Debug)]
pub struct LinkedMethod {
    pub name: Arc<str>,
    pub arity: usize,
    pub registers: usize,
    pub literals: Vec<Value>,
    pub stream: OpcodeStream,
}

impl LinkedMethod {
    /// Name stored in a symbol/string literal; linking guarantees the kind
    /// wherever an opcode expects a name.
    pub(crate) fn literal_name(&self, index: i64) -> &str {
        self.literals[index as usize].as_str().unwrap_or_default()
    }
}

/// Link `method` against the process-wide handler table.
pub fn link(method: &CompiledMethod) -> Result<LinkedMethod, LinkError> {
    let name = &method.name;
    let code = &method.code;
    if code.is_empty() {
        return Err(LinkError::EmptyStream {
            method: name.clone(),
        });
    }
    if method.arity > method.registers {
        return Err(LinkError::ArityExceedsRegisters {
            method: name.clone(),
            arity: method.arity,
            registers: method.registers,
        });
    }

    let mut slots = Vec::with_capacity(code.len());
    let mut boundaries = vec![false; code.len()];
    let mut targets = Vec::new();
    let mut last = Opcode::Noop;
    let mut ip = 0;

    while ip < code.len() {
        let index = HANDLERS
            .resolve_word(code[ip])
            .ok_or_else(|| LinkError::UnknownOpcode {
                method: name.clone(),
                offset: ip,
                word: code[ip],
            })?;
        let entry = HANDLERS.entry(index);
        let opcode = entry.opcode;
        if ip + entry.width > code.len() {
            return Err(LinkError::Truncated {
                method: name.clone(),
                offset: ip,
                opcode,
                width: entry.width,
                len: code.len(),
            });
        }

        boundaries[ip] = true;
        slots.push(Slot::Entry(index));
        for (n, kind) in opcode.operands().iter().enumerate() {
            let offset = ip + 1 + n;
            let word = code[offset];
            check_operand(method, opcode, *kind, offset, word)?;
            if *kind == OperandKind::Target {
                targets.push((offset, word));
            }
            slots.push(Slot::Operand(word));
        }
        last = opcode;
        ip += entry.width;
    }

    for (offset, target) in targets {
        let lands = usize::try_from(target)
            .ok()
            .and_then(|t| boundaries.get(t).copied())
            .unwrap_or(false);
        if !lands {
            return Err(LinkError::BadTarget {
                method: name.clone(),
                offset,
                target,
            });
        }
    }
    if !last.is_terminator() {
        return Err(LinkError::FallsOffEnd {
            method: name.clone(),
            opcode: last,
        });
    }

    debug!("linked `{}`: {} slots, {} literals", name, slots.len(), method.literals.len());
    Ok(LinkedMethod {
        name: Arc::from(name.as_str()),
        arity: method.arity,
        registers: method.registers,
        literals: method.literals.iter().map(Literal::to_value).collect(),
        stream: OpcodeStream {
            slots: slots.into_boxed_slice(),
        },
    })
}

fn check_operand(
    method: &CompiledMethod,
    opcode: Opcode,
    kind: OperandKind,
    offset: usize,
    word: i64,
) -> Result<(), LinkError> {
    let name = || method.name.clone();
    match kind {
        OperandKind::Immediate | OperandKind::Target => Ok(()),
        OperandKind::Register => {
            if word < 0 || word as usize >= method.registers {
                return Err(LinkError::RegisterOutOfRange {
                    method: name(),
                    offset,
                    register: word,
                    registers: method.registers,
                });
            }
            Ok(())
        }
        OperandKind::Count => {
            if word < 0 {
                return Err(LinkError::NegativeCount {
                    method: name(),
                    offset,
                    count: word,
                });
            }
            Ok(())
        }
        OperandKind::OptionalLiteral if word == -1 => Ok(()),
        OperandKind::Literal | OperandKind::OptionalLiteral => {
            let literal = usize::try_from(word)
                .ok()
                .and_then(|i| method.literals.get(i))
                .ok_or_else(|| LinkError::LiteralOutOfRange {
                    method: name(),
                    offset,
                    index: word,
                    literals: method.literals.len(),
                })?;
            let wants_name = matches!(
                opcode,
                Opcode::Send | Opcode::PushIvar | Opcode::SetupUnwind
            );
            if wants_name && literal.as_name().is_none() {
                return Err(LinkError::NameExpected {
                    method: name(),
                    offset,
                    opcode,
                });
            }
            Ok(())
        }
    }
}

/// Disassembly listing.
impl fmt::Display for LinkedMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "method {} (arity {}, registers {})",
            self.name, self.arity, self.registers
        )?;
        let mut ip = 0;
        while let Some(opcode) = self.stream.opcode_at(ip) {
            write!(f, "{:04}: {}", ip, opcode)?;
            for (n, kind) in opcode.operands().iter().enumerate() {
                let word = self.stream.operand(ip, n);
                match kind {
                    OperandKind::Register => write!(f, " r{}", word)?,
                    OperandKind::Target => write!(f, " @{}", word)?,
                    OperandKind::Literal => write!(f, " {}", self.literals[word as usize].inspect())?,
                    OperandKind::OptionalLiteral if word >= 0 => {
                        write!(f, " {}", self.literals[word as usize].inspect())?
                    }
                    OperandKind::OptionalLiteral => write!(f, " *")?,
                    OperandKind::Immediate | OperandKind::Count => write!(f, " {}", word)?,
                }
            }
            writeln!(f)?;
            ip += opcode.width();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_core::assembler::Assembler;

    fn method(code: Vec<i64>) -> CompiledMethod {
        CompiledMethod {
            name: "m".into(),
            arity: 0,
            registers: 2,
            literals: vec![Literal::Symbol("==".into()), Literal::Int(7)],
            code,
        }
    }

    #[test]
    fn test_slot_kinds_follow_widths() {
        let linked = link(&method(vec![
            Opcode::NotEqual as i64, 0, 1,
            Opcode::Return as i64,
        ]))
        .unwrap();
        let slots = linked.stream.slots();
        assert!(matches!(slots[0], Slot::Entry(_)));
        assert_eq!(slots[1], Slot::Operand(0));
        assert_eq!(slots[2], Slot::Operand(1));
        assert!(matches!(slots[3], Slot::Entry(_)));
        assert_eq!(linked.stream.opcode_at(3), Some(Opcode::Return));
        assert_eq!(linked.stream.opcode_at(1), None);
    }

    #[test]
    fn test_operand_that_looks_like_an_opcode_stays_data() {
        // 29 is `return`'s identity, but here it is push_int's immediate.
        let linked = link(&method(vec![
            Opcode::PushInt as i64, Opcode::Return as i64,
            Opcode::Return as i64,
        ]))
        .unwrap();
        assert_eq!(linked.stream.slots()[1], Slot::Operand(Opcode::Return as i64));
    }

    #[test]
    fn test_unknown_opcode() {
        let err = link(&method(vec![200, Opcode::Return as i64])).unwrap_err();
        assert_eq!(
            err,
            LinkError::UnknownOpcode {
                method: "m".into(),
                offset: 0,
                word: 200
            }
        );
    }

    #[test]
    fn test_truncated_operands() {
        let err = link(&method(vec![Opcode::Return as i64, Opcode::NotEqual as i64, 0])).unwrap_err();
        assert!(matches!(err, LinkError::Truncated { offset: 1, width: 3, .. }));
    }

    #[test]
    fn test_register_and_literal_ranges() {
        let err = link(&method(vec![Opcode::PushLocal as i64, 2, Opcode::Return as i64])).unwrap_err();
        assert!(matches!(err, LinkError::RegisterOutOfRange { register: 2, .. }));

        let err = link(&method(vec![Opcode::PushLiteral as i64, 5, Opcode::Return as i64])).unwrap_err();
        assert!(matches!(err, LinkError::LiteralOutOfRange { index: 5, .. }));

        let err = link(&method(vec![Opcode::Send as i64, 1, 0, Opcode::Return as i64])).unwrap_err();
        assert!(matches!(err, LinkError::NameExpected { opcode: Opcode::Send, .. }));

        let err = link(&method(vec![Opcode::MakeArray as i64, -1, Opcode::Return as i64])).unwrap_err();
        assert!(matches!(err, LinkError::NegativeCount { count: -1, .. }));
    }

    #[test]
    fn test_targets_must_hit_boundaries() {
        let err = link(&method(vec![Opcode::PushInt as i64, 1, Opcode::Goto as i64, 1])).unwrap_err();
        assert!(matches!(err, LinkError::BadTarget { target: 1, .. }));

        let err = link(&method(vec![Opcode::Goto as i64, 99])).unwrap_err();
        assert!(matches!(err, LinkError::BadTarget { target: 99, .. }));
    }

    #[test]
    fn test_stream_must_terminate() {
        let err = link(&method(vec![Opcode::PushNil as i64])).unwrap_err();
        assert!(matches!(err, LinkError::FallsOffEnd { opcode: Opcode::PushNil, .. }));
        assert!(matches!(link(&method(vec![])), Err(LinkError::EmptyStream { .. })));
    }

    #[test]
    fn test_arity_needs_registers() {
        let mut m = method(vec![Opcode::Return as i64]);
        m.arity = 3;
        assert!(matches!(link(&m), Err(LinkError::ArityExceedsRegisters { arity: 3, .. })));
    }

    #[test]
    fn test_disassembly() {
        let mut asm = Assembler::new("demo").arity(2);
        let rescue = asm.label();
        asm.setup_unwind(rescue, Some("TypeError"));
        asm.emit(Opcode::NotEqual, &[0, 1]);
        asm.op(Opcode::Return);
        asm.bind(rescue);
        asm.send("message", 0).op(Opcode::Return);
        let linked = link(&asm.finish().unwrap()).unwrap();
        let listing = linked.to_string();
        assert_eq!(
            listing,
            "method demo (arity 2, registers 2)\n\
             0000: setup_unwind @7 \"TypeError\"\n\
             0003: not_equal r0 r1\n\
             0006: return\n\
             0007: send :message 0\n\
             0010: return\n"
        );
    }
}
