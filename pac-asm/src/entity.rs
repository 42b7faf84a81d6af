//! Typed entities of a parsed PAC file.
//!
//! A parsed file is a gap-free partition of the byte range into entities;
//! shared placement fields live on the envelope and the per-kind payload is
//! a sum type.

use crate::instruction::Instruction;

/// One entity of the stream: placement envelope plus payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    /// Absolute file offset.
    pub offset: u32,
    /// Byte length.
    pub size: u32,
    /// Payload.
    pub kind: EntityKind,
}

/// Entity payload variants.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityKind {
    /// A decoded instruction.
    Instruction(Instruction),
    /// Bytes that look like an instruction but have no template.
    UnknownInstruction {
        /// Big-endian signature word at the start of the span.
        signature: u32,
    },
    /// Alignment filler.
    Padding {
        /// Machine word length the padding restores alignment to.
        word_len: u32,
        /// Every padding byte is zero.
        zeroes_only: bool,
    },
    /// The self-referential message table (words `0, 1, 2, …`).
    MessageTable {
        /// Number of messages (`size / 4`).
        msg_count: u32,
    },
    /// Branch table following `cmd_inxJmp`.
    SwitchTable {
        /// Absolute branch target offsets.
        branches: Vec<u32>,
    },
    /// Trailing bytes that parse as extra argument tuples of the preceding
    /// instruction.
    LeftOutArgs {
        /// Signature of the instruction these bytes would belong to.
        supposed_signature: u32,
        /// Name of that instruction.
        supposed_name: String,
        /// Offset of that instruction.
        supposed_start: u32,
        /// Size the instruction would have with these bytes included.
        supposed_size: u32,
    },
    /// Anything else.
    Raw,
}

impl Entity {
    /// The decoded instruction, if this entity is one.
    pub fn instruction(&self) -> Option<&Instruction> {
        match &self.kind {
            EntityKind::Instruction(instruction) => Some(instruction),
            _ => None,
        }
    }

    /// Whether this entity is a decoded instruction.
    pub fn is_instruction(&self) -> bool {
        matches!(self.kind, EntityKind::Instruction(_))
    }

    /// Whether this entity is unclassified raw memory.
    pub fn is_raw(&self) -> bool {
        matches!(self.kind, EntityKind::Raw)
    }

    /// Offset one past the last byte.
    pub fn end(&self) -> u32 {
        self.offset + self.size
    }
}
