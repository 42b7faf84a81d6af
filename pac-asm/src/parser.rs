//! The entity decoder: drives the byte stream top to bottom and produces
//! the ordered entity partition.
//!
//! The scan looks for the next plausible instruction signature (`0x25`
//! first byte), decodes it, and classifies whatever bytes were skipped over
//! as a message table, left-out arguments, padding or raw memory.

use crate::bytes::{read_u32_be, WORD_SIZE};
use crate::catalog::{Catalog, ParamKind, Template};
use crate::entity::{Entity, EntityKind};
use crate::error::DecodeError;
use crate::file::{PacFile, VarUseIndex};
use crate::instruction::Instruction;

/// The default plausibility heuristic for signatures without a template:
/// low byte at most `0x24` and a nonzero class byte.
pub fn default_unknown_heuristic(signature: u32) -> bool {
    if signature & 0xFF > 0x24 {
        return false;
    }
    (signature >> 8) & 0xFF != 0
}

/// Entity decoder configuration.
#[derive(Clone)]
pub struct Parser<'a> {
    catalog: &'a Catalog,
    /// Capture the bytes after every `cmd_inxJmp` as its branch table.
    pub jump_table_next_to_switch: bool,
    /// Signature of `cmd_inxJmp`.
    pub inx_jmp_signature: u32,
    /// Emit unknown-instruction entities for plausible uncataloged
    /// signatures instead of skipping them byte by byte.
    pub find_unknown_instructions: bool,
    /// Plausibility test applied to uncataloged signatures.
    pub unknown_heuristic: fn(u32) -> bool,
}

impl<'a> Parser<'a> {
    /// A parser over `catalog` with the default policies.
    pub fn new(catalog: &'a Catalog) -> Parser<'a> {
        Parser {
            catalog,
            jump_table_next_to_switch: true,
            inx_jmp_signature: 0,
            find_unknown_instructions: true,
            unknown_heuristic: default_unknown_heuristic,
        }
    }

    /// Parse `data` into an entity partition.
    pub fn parse(&self, data: Vec<u8>, name: impl Into<String>) -> Result<PacFile, DecodeError> {
        if data.is_empty() {
            return Err(DecodeError::EmptyFile);
        }
        let mut run = Run {
            parser: self,
            size: data.len() as u32,
            file: PacFile { name: name.into(), data, ..PacFile::default() },
            cur: 0,
            last: 0,
            last_was_instruction: false,
        };
        run.parse()?;
        let mut file = run.file;
        let var_use = VarUseIndex::build(&file);
        file.var_use = var_use;
        Ok(file)
    }
}

struct Run<'a, 'c> {
    parser: &'a Parser<'c>,
    file: PacFile,
    size: u32,
    cur: u32,
    last: u32,
    last_was_instruction: bool,
}

fn is_message_table(raw: &[u8]) -> bool {
    if raw.len() % 4 != 0 || raw.len() < 8 {
        return false;
    }
    raw.chunks_exact(4)
        .enumerate()
        .all(|(i, word)| u32::from_le_bytes([word[0], word[1], word[2], word[3]]) == i as u32)
}

fn is_left_out_args(raw: &[u8]) -> bool {
    if raw.len() % 8 != 0 || raw.is_empty() {
        return false;
    }
    // Every odd word must look like a composite type word: a power of two
    // not above 0x40.
    raw.chunks_exact(8).all(|pair| {
        let ty = u32::from_le_bytes([pair[0], pair[1], pair[2], pair[3]]);
        ty <= 64 && ty & ty.wrapping_sub(1) == 0
    })
}

impl Run<'_, '_> {
    fn data(&self) -> &[u8] {
        self.file.raw()
    }

    /// Advance `cur` to the next catalogued or plausible signature.
    /// Returns false when the rest of the file holds none.
    fn find_next_instruction(&mut self) -> bool {
        loop {
            while self.cur < self.size && self.data()[self.cur as usize] != 0x25 {
                self.cur += 1;
            }
            if self.cur + WORD_SIZE > self.size {
                return false;
            }
            let signature = match read_u32_be(self.data(), self.cur) {
                Ok(signature) => signature,
                Err(_) => return false,
            };
            if self.parser.catalog.contains(signature) {
                return true;
            }
            if self.parser.find_unknown_instructions && (self.parser.unknown_heuristic)(signature) {
                return true;
            }
            self.cur += 1;
        }
    }

    /// Classify the gap `[last, cur)` and emit its entity.
    fn process_gap(&mut self) {
        if self.cur == self.last {
            return;
        }
        let (offset, size) = (self.last, self.cur - self.last);
        let raw = &self.data()[offset as usize..self.cur as usize];

        let preceding = self.file.entities().last().and_then(Entity::instruction);
        let kind = if is_message_table(raw) {
            EntityKind::MessageTable { msg_count: size / 4 }
        } else if raw.len() < 8 && raw.iter().all(|&b| b == 0) {
            // Short zero-only gaps are alignment filler, not data.
            EntityKind::Padding { word_len: WORD_SIZE, zeroes_only: true }
        } else if let Some(instruction) =
            preceding.filter(|_| self.last_was_instruction && is_left_out_args(raw))
        {
            EntityKind::LeftOutArgs {
                supposed_signature: instruction.signature,
                supposed_name: instruction.name.clone(),
                supposed_start: instruction.offset,
                supposed_size: instruction.size + size,
            }
        } else {
            EntityKind::Raw
        };

        self.file.push_entity(Entity { offset, size, kind });
        self.last = self.cur;
        self.last_was_instruction = false;
    }

    fn process_instruction(&mut self, template: &Template) -> Result<(), DecodeError> {
        let signature = template.signature;
        let instruction = Instruction::decode(self.data(), self.cur, template)?;
        let size = instruction.size;
        let string_final = template
            .params
            .last()
            .is_some_and(|param| param.kind == ParamKind::String);

        self.file.push_entity(Entity {
            offset: self.cur,
            size,
            kind: EntityKind::Instruction(instruction),
        });
        self.cur += size;
        self.last += size;

        if self.parser.jump_table_next_to_switch && signature == self.parser.inx_jmp_signature {
            self.find_next_instruction();
            self.process_switch_table();
        }

        if string_final {
            self.fix_alignment();
        }

        self.last_was_instruction = true;
        Ok(())
    }

    /// The bytes between a `cmd_inxJmp` and the next instruction are its
    /// branch table.
    fn process_switch_table(&mut self) {
        if self.cur == self.last {
            return;
        }
        let (offset, size) = (self.last, self.cur - self.last);
        let branches = self.data()[offset as usize..self.cur as usize]
            .chunks_exact(4)
            .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
            .collect();
        self.file.push_entity(Entity { offset, size, kind: EntityKind::SwitchTable { branches } });
        self.last = self.cur;
    }

    fn process_unknown_instruction(&mut self, signature: u32) {
        self.cur += WORD_SIZE;
        if !self.find_next_instruction() {
            // The whole file suffix is one unknown instruction.
            self.cur = self.size;
        }
        let (offset, size) = (self.last, self.cur - self.last);
        self.file.push_entity(Entity {
            offset,
            size,
            kind: EntityKind::UnknownInstruction { signature },
        });
        self.last = self.cur;
        self.last_was_instruction = false;
    }

    fn fix_alignment(&mut self) {
        if self.cur % WORD_SIZE == 0 {
            return;
        }
        let size = WORD_SIZE - self.cur % WORD_SIZE;
        let raw = &self.data()[self.cur as usize..(self.cur + size) as usize];
        let zeroes_only = raw.iter().all(|&b| b == 0);
        self.file.push_entity(Entity {
            offset: self.cur,
            size,
            kind: EntityKind::Padding { word_len: WORD_SIZE, zeroes_only },
        });
        self.cur += size;
        self.last += size;
    }

    fn parse(&mut self) -> Result<(), DecodeError> {
        let catalog = self.parser.catalog;
        while self.cur < self.size {
            if self.find_next_instruction() {
                self.process_gap();
                let signature = read_u32_be(self.data(), self.cur)?;
                match catalog.get(signature) {
                    Some(template) => self.process_instruction(template)?,
                    None => self.process_unknown_instruction(signature),
                }
            } else {
                self.cur = self.size;
                self.process_gap();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn catalog() -> Catalog {
        Catalog::parse(
            "\
25000000;nop;0;0;
25000100;cmd_end;0;0;
25002F00;cmd_inxJmp;0;0;
25000500;cmd_mov;0;0;uint32_t_T;dest;uint32_t_T;src
25000600;cmd_msg;0;0;string;text
",
        )
        .unwrap()
    }

    fn parse(data: &[u8]) -> PacFile {
        let catalog = catalog();
        let mut parser = Parser::new(&catalog);
        parser.inx_jmp_signature = 0x25002F00;
        parser.parse(data.to_vec(), "test.pac").unwrap()
    }

    fn assert_partition(file: &PacFile) {
        let mut expected = 0;
        for entity in file.entities() {
            assert_eq!(entity.offset, expected, "entities must be contiguous");
            assert!(entity.size > 0);
            expected = entity.end();
        }
        assert_eq!(expected, file.len());
    }

    #[test]
    fn single_instruction_with_zero_tail() {
        // One nop followed by a zero word: instruction + padding.
        let file = parse(&[0x25, 0, 0, 0, 0, 0, 0, 0]);
        assert_partition(&file);
        assert_eq!(file.entities().len(), 2);
        assert_eq!(file.instruction_count(), 1);

        let nop = &file.entities()[0];
        assert_eq!((nop.offset, nop.size), (0, 4));
        assert_eq!(nop.instruction().unwrap().name, "nop");

        let padding = &file.entities()[1];
        assert_eq!((padding.offset, padding.size), (4, 4));
        assert_eq!(
            padding.kind,
            EntityKind::Padding { word_len: 4, zeroes_only: true }
        );
    }

    #[test]
    fn switch_table_follows_inx_jmp() {
        let data = [
            0x25, 0x00, 0x2F, 0x00, // cmd_inxJmp
            0xAA, 0xBB, 0xCC, 0xDD, // branch 0
            0x00, 0x00, 0x00, 0x00, // branch 1
        ];
        let file = parse(&data);
        assert_partition(&file);
        assert_eq!(file.entities().len(), 2);
        let (offset, branches) = file.switch_tables().next().unwrap();
        assert_eq!(offset, 4);
        assert_eq!(branches, &[0xDDCCBBAA, 0x00000000]);
    }

    #[test]
    fn message_table_gap() {
        let mut data = vec![0u8; 0];
        data.extend(0u32.to_le_bytes());
        data.extend(1u32.to_le_bytes());
        data.extend(2u32.to_le_bytes());
        data.extend([0x25, 0, 0, 0]); // nop afterwards
        let file = parse(&data);
        assert_partition(&file);
        assert_eq!(
            file.entities()[0].kind,
            EntityKind::MessageTable { msg_count: 3 }
        );
        assert!(file.entities()[1].is_instruction());
    }

    #[test]
    fn left_out_args_after_instruction() {
        let mut data = vec![0x25, 0, 0, 0]; // nop
        data.extend(2u32.to_le_bytes()); // type word: power of two
        data.extend(0xDEADu32.to_le_bytes()); // value word
        let file = parse(&data);
        assert_partition(&file);
        match &file.entities()[1].kind {
            EntityKind::LeftOutArgs { supposed_signature, supposed_size, supposed_start, .. } => {
                assert_eq!(*supposed_signature, 0x25000000);
                assert_eq!(*supposed_start, 0);
                assert_eq!(*supposed_size, 12);
            }
            other => panic!("expected left-out args, got {other:?}"),
        }
    }

    #[test]
    fn data_without_preceding_instruction_is_raw() {
        let mut data = vec![];
        data.extend(2u32.to_le_bytes());
        data.extend(0xDEADu32.to_le_bytes());
        let file = parse(&data);
        assert_partition(&file);
        assert_eq!(file.entities().len(), 1);
        assert!(file.entities()[0].is_raw());
    }

    #[test]
    fn unknown_instruction_span() {
        let mut data = vec![0x25, 0x01, 0x01, 0x01]; // plausible, uncataloged
        data.extend([0x11, 0x22, 0x33, 0x44]);
        data.extend([0x25, 0, 0, 0]); // nop
        let file = parse(&data);
        assert_partition(&file);
        assert_eq!(file.unknown_count(), 1);
        let unknown = &file.entities()[0];
        assert_eq!(unknown.kind, EntityKind::UnknownInstruction { signature: 0x25010101 });
        assert_eq!(unknown.size, 8);
        assert!(file.entities()[1].is_instruction());
    }

    #[test]
    fn signature_too_close_to_eof_is_not_an_instruction() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x25, 0x00, 0x00];
        // The 0x25 at offset 5 has only 3 bytes past it.
        let file = parse(&data);
        assert_partition(&file);
        assert_eq!(file.instruction_count(), 0);
        assert_eq!(file.entities().len(), 1);
        assert!(file.entities()[0].is_raw());
    }

    #[test]
    fn file_with_no_instructions_is_one_raw_entity() {
        let file = parse(&[1, 2, 3, 4, 5]);
        assert_partition(&file);
        assert_eq!(file.entities().len(), 1);
        assert!(file.entities()[0].is_raw());
        assert_eq!(file.instruction_count(), 0);
    }

    #[test]
    fn empty_file_is_an_error() {
        let catalog = catalog();
        let parser = Parser::new(&catalog);
        assert_eq!(parser.parse(vec![], "empty"), Err(DecodeError::EmptyFile));
    }

    #[test]
    fn string_final_instruction_gets_alignment_padding() {
        let mut data = vec![0x25, 0x00, 0x06, 0x00]; // cmd_msg
        data.extend(b"ab\0"); // ends at 7
        data.push(0xFF); // non-zero alignment filler
        data.extend([0x25, 0, 0, 0]); // nop
        let file = parse(&data);
        assert_partition(&file);
        let padding = &file.entities()[1];
        assert_eq!(
            padding.kind,
            EntityKind::Padding { word_len: 4, zeroes_only: false }
        );
        assert_eq!((padding.offset, padding.size), (7, 1));
    }

    #[test]
    fn round_trip_is_lossless() {
        let mut data = vec![0x25, 0x00, 0x2F, 0x00]; // cmd_inxJmp
        data.extend(16u32.to_le_bytes()); // one branch
        data.extend([0x25, 0x00, 0x05, 0x00]); // cmd_mov
        data.extend([0x02, 0, 0, 0]);
        data.extend(7u32.to_le_bytes());
        data.extend([0x02, 0, 0, 0]);
        data.extend(9u32.to_le_bytes());
        data.extend([0xEE; 6]); // trailing junk
        let file = parse(&data);
        assert_partition(&file);

        let mut rebuilt = Vec::new();
        for entity in file.entities() {
            rebuilt.extend_from_slice(file.entity_raw(entity));
        }
        assert_eq!(rebuilt, data);
    }

    #[test]
    fn signature_index_is_ordered() {
        let mut data = vec![];
        for value in [1u32, 2, 3] {
            data.extend([0x25, 0x00, 0x05, 0x00]);
            data.extend([0x02, 0, 0, 0]);
            data.extend(value.to_le_bytes());
            data.extend([0x02, 0, 0, 0]);
            data.extend(value.to_le_bytes());
        }
        let file = parse(&data);
        assert_eq!(file.offsets_with(0x25000500), &[0, 20, 40]);
        let second = file.instructions_with(0x25000500).nth(1).unwrap();
        assert_eq!(second.args[0].value, Value::Int(2));
    }
}
