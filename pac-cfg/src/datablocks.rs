//! Raw-data blocks: the non-code side of a parsed file, plus the
//! instruction arguments that point into it.

use std::collections::BTreeMap;

use pac_asm::{bytes::decode_shift_jis, PacFile};

/// One raw-memory entity viewed as a data block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBlock {
    /// Start offset.
    pub start: u32,
    /// Byte length.
    pub size: u32,
    /// Strict Shift-JIS decoding, when the bytes decode cleanly.
    pub shift_jis: Option<String>,
    /// Offsets of instructions whose arguments point at this block's start.
    pub references_from: Vec<u32>,
}

/// All raw-data blocks of one file.
#[derive(Debug, Clone, Default)]
pub struct DataBlocks {
    blocks: BTreeMap<u32, DataBlock>,
    starts: Vec<u32>,
}

impl DataBlocks {
    /// Collect every raw-memory entity of `file`.
    pub fn build(file: &PacFile) -> DataBlocks {
        let mut blocks = BTreeMap::new();
        for entity in file.raw_entities() {
            blocks.insert(
                entity.offset,
                DataBlock {
                    start: entity.offset,
                    size: entity.size,
                    shift_jis: decode_shift_jis(file.entity_raw(entity)),
                    references_from: Vec::new(),
                },
            );
        }
        let starts = blocks.keys().copied().collect();
        DataBlocks { blocks, starts }
    }

    /// Blocks in ascending start order.
    pub fn blocks(&self) -> impl Iterator<Item = &DataBlock> + '_ {
        self.blocks.values()
    }

    /// Number of blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the file had no raw data.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// The block starting exactly at `start`.
    pub fn get(&self, start: u32) -> Option<&DataBlock> {
        self.blocks.get(&start)
    }

    /// The block containing `offset`, with its start.
    pub fn block_by_offset(&self, offset: u32) -> Option<(u32, &DataBlock)> {
        let index = self.starts.partition_point(|&start| start <= offset).checked_sub(1)?;
        let start = self.starts[index];
        let block = &self.blocks[&start];
        (offset < start + block.size).then_some((start, block))
    }

    /// Scan every instruction's immediate and bare-word arguments and
    /// record the ones that hit a data block exactly at its start.
    pub fn analyze_references(&mut self, file: &PacFile) {
        if self.blocks.is_empty() {
            return;
        }
        for instruction in file.instructions() {
            let mut values: Vec<u32> = instruction
                .one_byte_values()
                .chain(instruction.plain_word_values())
                .collect();
            values.sort_unstable();
            values.dedup();
            for value in values {
                let Some((start, _)) = self.block_by_offset(value) else { continue };
                if start == value {
                    if let Some(block) = self.blocks.get_mut(&start) {
                        if block.references_from.last() != Some(&instruction.offset) {
                            block.references_from.push(instruction.offset);
                        }
                    }
                } else {
                    tracing::debug!(
                        "possible reference from 0x{:X} to 0x{start:X}",
                        instruction.offset
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pac_asm::{Catalog, Parser};

    #[test]
    fn references_hit_block_starts() {
        // One instruction whose 0x1 argument points at the raw tail.
        let catalog =
            Catalog::parse("25000500;cmd_ref;0;0;uint32_t_T;ptr\n25000100;cmd_end;0;0;").unwrap();
        let mut data = vec![0x25, 0x00, 0x05, 0x00];
        data.extend([0x01, 0, 0, 0]);
        data.extend(16u32.to_le_bytes()); // points at the raw block below
        data.extend([0x25, 0x00, 0x01, 0x00]); // cmd_end
        data.extend(*b"\xff\xfe\xfd\xfc"); // raw block at 16
        let file = Parser::new(&catalog).parse(data, "refs.pac").unwrap();

        let mut blocks = DataBlocks::build(&file);
        blocks.analyze_references(&file);
        assert_eq!(blocks.len(), 1);
        let block = blocks.get(16).unwrap();
        assert_eq!(block.references_from, vec![0]);
        assert_eq!(block.shift_jis, None);
    }
}
