//! Textual disassembly: one line per entity.
//!
//! ```text
//! 00000010  25002F00:cmd_inxJmp(2:1F)
//! ```
//!
//! Offsets are 8-hex-digit zero-padded. Instruction arguments render either
//! verbosely as `{type; name}=value` or tersely as a class prefix plus the
//! hex value.

use std::io::{self, Write};

use itertools::Itertools;

use crate::bytes::decode_shift_jis;
use crate::entity::{Entity, EntityKind};
use crate::file::PacFile;
use crate::instruction::Instruction;
use crate::value::{ArgSlot, SlotClass, TypeByte, Value};

/// Disassembly output settings.
#[derive(Debug, Clone, Copy)]
pub struct DisasmSettings {
    /// Render terse class prefixes instead of `{type; name}=`.
    pub omit_arg_names: bool,
    /// Leave padding lines empty (offset only).
    pub skip_padding_bytes: bool,
    /// Try Shift-JIS on raw entities before falling back to hex.
    pub decode_shift_jis: bool,
    /// Collect the offsets of raw entities that failed to decode.
    pub dump_failed_decodings: bool,
}

impl Default for DisasmSettings {
    fn default() -> DisasmSettings {
        DisasmSettings {
            omit_arg_names: false,
            skip_padding_bytes: false,
            decode_shift_jis: true,
            dump_failed_decodings: false,
        }
    }
}

/// Writes the disassembly of one parsed file.
pub struct Dumper<'a> {
    file: &'a PacFile,
    settings: DisasmSettings,
}

fn terse_prefix(slot: &ArgSlot) -> Option<&'static str> {
    if slot.is_int_const() {
        return Some("2:");
    }
    match slot.class {
        SlotClass::Composite(TypeByte::OneByte) => Some("1:"),
        SlotClass::Composite(TypeByte::IntLocal) => Some("4:"),
        SlotClass::Composite(TypeByte::IntGlobal) => Some("8:"),
        SlotClass::Composite(TypeByte::FloatLocal) => Some("20:"),
        SlotClass::Composite(TypeByte::FloatGlobal) => Some("40:"),
        _ => None,
    }
}

fn write_value(out: &mut impl Write, value: &Value) -> io::Result<()> {
    match value {
        Value::Int(word) => write!(out, "{word:X}"),
        Value::Var(var) => write!(out, "{:X}", var.index),
        Value::Float(float) => write!(out, "{float}"),
        Value::Str(text) => write!(out, "\"{}\"", text.replace('\0', "")),
    }
}

impl<'a> Dumper<'a> {
    /// A dumper for `file` with the given settings.
    pub fn new(file: &'a PacFile, settings: DisasmSettings) -> Dumper<'a> {
        Dumper { file, settings }
    }

    fn write_instruction(&self, out: &mut impl Write, instruction: &Instruction) -> io::Result<()> {
        write!(out, "{:X}:{}(", instruction.signature, instruction.name)?;
        let mut first = true;
        for arg in &instruction.args {
            if !first {
                write!(out, ", ")?;
            }
            first = false;
            if self.settings.omit_arg_names {
                if let Some(prefix) = terse_prefix(&arg.slot) {
                    write!(out, "{prefix}")?;
                }
            } else {
                write!(out, "{{{}; {}}}=", arg.slot.class, arg.slot.name)?;
            }
            write_value(out, &arg.value)?;
        }
        write!(out, ")")?;
        if instruction.cut_off {
            write!(out, " [Warning, instruction unexpectedly ends!]")?;
        }
        Ok(())
    }

    /// Returns true when the Shift-JIS decoding failed.
    fn write_raw(&self, out: &mut impl Write, entity: &Entity) -> io::Result<bool> {
        let raw = self.file.entity_raw(entity);
        write!(out, "Memory entity: size = {} bytes", entity.size)?;
        if self.settings.decode_shift_jis {
            if let Some(text) = decode_shift_jis(raw) {
                write!(out, ", shift-jis = ({text})")?;
                return Ok(false);
            }
        }
        let hex = raw.iter().map(|byte| format!("{byte:02x}")).join(" ");
        write!(out, ", hex = ({hex})")?;
        Ok(self.settings.decode_shift_jis)
    }

    /// Write the whole disassembly; returns the offsets of raw entities
    /// whose Shift-JIS decoding failed (when tracking is enabled).
    pub fn disassemble<W: Write>(&self, out: &mut W) -> io::Result<Vec<u32>> {
        let mut failed = Vec::new();
        for entity in self.file.entities() {
            write!(out, "{:08X}  ", entity.offset)?;
            match &entity.kind {
                EntityKind::Instruction(instruction) => self.write_instruction(out, instruction)?,
                EntityKind::UnknownInstruction { signature } => {
                    write!(out, "{:X}(Unknown instruction): size = {}", signature, entity.size)?;
                }
                EntityKind::Padding { word_len, zeroes_only } => {
                    if !self.settings.skip_padding_bytes {
                        write!(
                            out,
                            "Padding bytes: count = {}, all zeroes = {}, machine word length = {}",
                            entity.size, zeroes_only, word_len
                        )?;
                    }
                }
                EntityKind::MessageTable { msg_count } => {
                    write!(
                        out,
                        "Message table: size = {} bytes, message count = {}",
                        entity.size, msg_count
                    )?;
                }
                EntityKind::SwitchTable { branches } => {
                    let addresses = branches.iter().map(|branch| format!("{branch:X}")).join(", ");
                    write!(
                        out,
                        "Switch-case table: size = {} bytes, branches count = {}, addresses: ({})",
                        entity.size,
                        branches.len(),
                        addresses
                    )?;
                }
                EntityKind::LeftOutArgs { supposed_size, .. } => {
                    write!(
                        out,
                        "Potential left out PAC args: size = {} bytes, \
                         supposed full size of the instruction = {}",
                        entity.size, supposed_size
                    )?;
                }
                EntityKind::Raw => {
                    if self.write_raw(out, entity)? && self.settings.dump_failed_decodings {
                        failed.push(entity.offset);
                    }
                }
            }
            writeln!(out)?;
        }
        Ok(failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::parser::Parser;

    fn disassembly(data: &[u8], settings: DisasmSettings) -> String {
        let catalog = Catalog::parse(
            "\
25000000;nop;0;0;
25000500;cmd_mov;0;0;uint32_t_T;dest;uint32_t_T;src
",
        )
        .unwrap();
        let parser = Parser::new(&catalog);
        let file = parser.parse(data.to_vec(), "dump.pac").unwrap();
        let mut out = Vec::new();
        Dumper::new(&file, settings).disassemble(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn mov(dest_ty: u8, dest: u32, src_ty: u8, src: u32) -> Vec<u8> {
        let mut data = vec![0x25, 0x00, 0x05, 0x00];
        data.extend([dest_ty, 0, 0, 0]);
        data.extend(dest.to_le_bytes());
        data.extend([src_ty, 0, 0, 0]);
        data.extend(src.to_le_bytes());
        data
    }

    #[test]
    fn verbose_instruction_line() {
        let text = disassembly(&mov(0x04, 0x1F, 0x02, 0x2A), DisasmSettings::default());
        assert_eq!(
            text,
            "00000000  25000500:cmd_mov({0x4 variable; dest}=1F, {uint32_t; src}=2A)\n"
        );
    }

    #[test]
    fn terse_instruction_line() {
        let settings = DisasmSettings { omit_arg_names: true, ..DisasmSettings::default() };
        let text = disassembly(&mov(0x04, 0x1F, 0x02, 0x2A), settings);
        assert_eq!(text, "00000000  25000500:cmd_mov(4:1F, 2:2A)\n");
    }

    #[test]
    fn raw_entity_falls_back_to_hex() {
        // 0x82 is a dangling Shift-JIS lead byte.
        let text = disassembly(&[0x82, 0xFF, 0x00, 0x01], DisasmSettings::default());
        assert_eq!(
            text,
            "00000000  Memory entity: size = 4 bytes, hex = (82 ff 00 01)\n"
        );
    }

    #[test]
    fn failed_decodings_are_reported() {
        let catalog = Catalog::parse("25000000;nop;0;0;").unwrap();
        let parser = Parser::new(&catalog);
        let file = parser.parse(vec![0x82, 0xFF, 0x01, 0x02, 0x03], "x").unwrap();
        let settings =
            DisasmSettings { dump_failed_decodings: true, ..DisasmSettings::default() };
        let mut out = Vec::new();
        let failed = Dumper::new(&file, settings).disassemble(&mut out).unwrap();
        assert_eq!(failed, vec![0]);
    }

    #[test]
    fn padding_can_be_skipped() {
        let mut data = vec![0x25, 0, 0, 0];
        data.extend([0, 0, 0, 0]);
        let settings = DisasmSettings { skip_padding_bytes: true, ..DisasmSettings::default() };
        let text = disassembly(&data, settings);
        assert_eq!(text, "00000000  25000000:nop()\n00000004  \n");
    }
}
