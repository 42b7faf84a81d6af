//! Cross-binary block matching by content hash.
//!
//! Blocks from two decompiled files are hashed (by raw bytes, by the bare
//! instruction-signature sequence, or for data blocks by their bytes) and
//! grouped; a hash with exactly one block on each side is a unique match.

use std::collections::HashMap;

use itertools::Itertools;
use md5::{Digest, Md5};
use pac_asm::PacFile;

use crate::datablocks::DataBlocks;
use crate::graph::{CodeBlock, CodeGraph};

/// How a code block is reduced to a hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashKind {
    /// MD5 of the block's raw bytes; arguments included.
    Bytes,
    /// MD5 of the concatenated instruction signatures; arguments ignored.
    InstructionSignatures,
}

/// Matching thresholds and output selection.
#[derive(Debug, Clone, Copy)]
pub struct MatchSettings {
    /// Minimum block byte size to participate.
    pub min_block_size: u32,
    /// Minimum instruction count to participate (code blocks only).
    pub min_block_instr_count: usize,
    /// Report hashes with exactly one block on each side.
    pub unique_matches: bool,
    /// Report the cartesian products of ambiguous hashes.
    pub non_unique_matches: bool,
}

impl Default for MatchSettings {
    fn default() -> MatchSettings {
        MatchSettings {
            min_block_size: 0,
            min_block_instr_count: 0,
            unique_matches: true,
            non_unique_matches: false,
        }
    }
}

/// One reported correspondence between the two files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockMatch {
    /// How many first-file blocks shared the hash.
    pub total_first: usize,
    /// How many second-file blocks shared the hash.
    pub total_second: usize,
    /// Block start in the first file.
    pub first_address: u32,
    /// Block start in the second file.
    pub second_address: u32,
}

type Md5Hash = [u8; 16];

fn hash_code_block(file: &PacFile, block: &CodeBlock, kind: HashKind) -> Md5Hash {
    let mut hasher = Md5::new();
    match kind {
        HashKind::Bytes => {
            let raw = &file.raw()[block.start as usize..block.end() as usize];
            hasher.update(raw);
        }
        HashKind::InstructionSignatures => {
            for &offset in &block.instr_offsets {
                if let Some(instruction) = file.instruction_at(offset) {
                    hasher.update(instruction.signature_bytes());
                }
            }
        }
    }
    hasher.finalize().into()
}

/// Accumulates addresses per hash in first-seen order.
#[derive(Default)]
struct MatchTable {
    order: Vec<Md5Hash>,
    sides: HashMap<Md5Hash, (Vec<u32>, Vec<u32>)>,
}

impl MatchTable {
    fn add(&mut self, hash: Md5Hash, address: u32, is_first: bool) {
        let entry = self.sides.entry(hash).or_insert_with(|| {
            self.order.push(hash);
            (Vec::new(), Vec::new())
        });
        if is_first {
            entry.0.push(address);
        } else {
            entry.1.push(address);
        }
    }

    fn report(self, settings: &MatchSettings) -> Vec<BlockMatch> {
        let mut matches = Vec::new();
        for hash in &self.order {
            let (first, second) = &self.sides[hash];
            let unique = first.len() == 1 && second.len() == 1;
            if settings.unique_matches && unique {
                matches.push(BlockMatch {
                    total_first: 1,
                    total_second: 1,
                    first_address: first[0],
                    second_address: second[0],
                });
            }
            if settings.non_unique_matches && !unique {
                for (&a, &b) in first.iter().cartesian_product(second.iter()) {
                    matches.push(BlockMatch {
                        total_first: first.len(),
                        total_second: second.len(),
                        first_address: a,
                        second_address: b,
                    });
                }
            }
        }
        matches
    }
}

/// Match the code blocks of two decompiled files.
pub fn match_code_blocks(
    first: (&PacFile, &CodeGraph),
    second: (&PacFile, &CodeGraph),
    kind: HashKind,
    settings: &MatchSettings,
) -> Vec<BlockMatch> {
    let mut table = MatchTable::default();
    for (is_first, (file, graph)) in [(true, first), (false, second)] {
        for (_, block) in graph.blocks_in_order() {
            if block.size < settings.min_block_size
                || block.instruction_count() < settings.min_block_instr_count
            {
                continue;
            }
            table.add(hash_code_block(file, block, kind), block.start, is_first);
        }
    }
    table.report(settings)
}

/// Match the raw-data blocks of two decompiled files by their bytes.
pub fn match_data_blocks(
    first: (&PacFile, &DataBlocks),
    second: (&PacFile, &DataBlocks),
    settings: &MatchSettings,
) -> Vec<BlockMatch> {
    let mut table = MatchTable::default();
    for (is_first, (file, data)) in [(true, first), (false, second)] {
        for block in data.blocks() {
            if block.size < settings.min_block_size {
                continue;
            }
            let raw = &file.raw()[block.start as usize..(block.start + block.size) as usize];
            let hash: Md5Hash = Md5::digest(raw).into();
            table.add(hash, block.start, is_first);
        }
    }
    table.report(settings)
}

/// Order matches by the first-side block size, largest first.
pub fn sort_matches_by_size(matches: &mut [BlockMatch], first_graph: &CodeGraph) {
    matches.sort_by_key(|m| {
        let size = first_graph
            .block_at_start(m.first_address)
            .map(|id| first_graph.block(id).size)
            .unwrap_or(0);
        std::cmp::Reverse(size)
    });
}
