//! The parsed-file model: an ordered entity partition plus random-access
//! indexes.
//!
//! The authoritative structure is the ordered entity list; the maps are
//! secondary indexes over it. Nothing here mutates after parsing.

use std::collections::HashMap;

use crate::entity::{Entity, EntityKind};
use crate::instruction::Instruction;
use crate::value::TypeByte;

/// Index from a variable bank slot to the instructions reading or writing it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VarUseIndex {
    map: HashMap<(TypeByte, u32), Vec<u32>>,
}

impl VarUseIndex {
    pub(crate) fn build(file: &PacFile) -> VarUseIndex {
        let mut map: HashMap<(TypeByte, u32), Vec<u32>> = HashMap::new();
        for instruction in file.instructions() {
            let mut used: Vec<_> = instruction.used_variables().collect();
            used.sort();
            used.dedup();
            for var in used {
                map.entry((var.class, var.index)).or_default().push(instruction.offset);
            }
        }
        VarUseIndex { map }
    }

    /// Ascending offsets of instructions touching `class[index]`.
    pub fn uses(&self, class: TypeByte, index: u32) -> &[u32] {
        self.map.get(&(class, index)).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// A fully parsed PAC file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PacFile {
    pub(crate) name: String,
    pub(crate) data: Vec<u8>,
    pub(crate) entities: Vec<Entity>,
    pub(crate) entity_index: HashMap<u32, usize>,
    pub(crate) instruction_offsets: Vec<u32>,
    pub(crate) by_signature: HashMap<u32, Vec<u32>>,
    pub(crate) unknown_by_signature: HashMap<u32, Vec<u32>>,
    pub(crate) cut_off_offsets: Vec<u32>,
    pub(crate) var_use: VarUseIndex,
}

impl PacFile {
    /// File name, if one was attached.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw byte buffer.
    pub fn raw(&self) -> &[u8] {
        &self.data
    }

    /// File length in bytes.
    pub fn len(&self) -> u32 {
        self.data.len() as u32
    }

    /// Whether the file is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The ordered entity partition of `[0, len)`.
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// The bytes covered by `entity`.
    pub fn entity_raw(&self, entity: &Entity) -> &[u8] {
        &self.data[entity.offset as usize..entity.end() as usize]
    }

    /// The entity covering `offset` (not necessarily starting at it).
    pub fn entity_at(&self, offset: u32) -> Option<&Entity> {
        if offset >= self.len() {
            return None;
        }
        let index = self.entities.partition_point(|e| e.offset <= offset);
        self.entities.get(index.checked_sub(1)?)
    }

    /// The entity immediately before the one starting at `offset`.
    pub fn preceding_entity(&self, offset: u32) -> Option<&Entity> {
        let index = *self.entity_index.get(&offset)?;
        self.entities.get(index.checked_sub(1)?)
    }

    /// The instruction starting exactly at `offset`.
    pub fn instruction_at(&self, offset: u32) -> Option<&Instruction> {
        let index = *self.entity_index.get(&offset)?;
        self.entities[index].instruction()
    }

    /// Ascending offsets of all decoded instructions.
    pub fn instruction_offsets(&self) -> &[u32] {
        &self.instruction_offsets
    }

    /// All decoded instructions in file order.
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> + '_ {
        self.entities.iter().filter_map(Entity::instruction)
    }

    /// Ascending offsets of instructions with the given signature.
    pub fn offsets_with(&self, signature: u32) -> &[u32] {
        self.by_signature.get(&signature).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Instructions with the given signature, in file order.
    pub fn instructions_with(&self, signature: u32) -> impl Iterator<Item = &Instruction> + '_ {
        self.offsets_with(signature)
            .iter()
            .filter_map(move |offset| self.instruction_at(*offset))
    }

    /// `signature -> offsets` of unknown-instruction spans.
    pub fn unknown_signatures(&self) -> &HashMap<u32, Vec<u32>> {
        &self.unknown_by_signature
    }

    /// Number of decoded instructions.
    pub fn instruction_count(&self) -> usize {
        self.instruction_offsets.len()
    }

    /// Number of unknown-instruction spans.
    pub fn unknown_count(&self) -> usize {
        self.unknown_by_signature.values().map(Vec::len).sum()
    }

    /// Offsets of instructions whose decoding was cut off.
    pub fn cut_off_offsets(&self) -> &[u32] {
        &self.cut_off_offsets
    }

    /// Switch-case tables as `(table offset, branch targets)`.
    pub fn switch_tables(&self) -> impl Iterator<Item = (u32, &[u32])> + '_ {
        self.entities.iter().filter_map(|entity| match &entity.kind {
            EntityKind::SwitchTable { branches } => Some((entity.offset, branches.as_slice())),
            _ => None,
        })
    }

    /// Raw-memory entities in file order.
    pub fn raw_entities(&self) -> impl Iterator<Item = &Entity> + '_ {
        self.entities.iter().filter(|entity| entity.is_raw())
    }

    /// The variable-use index built after parsing.
    pub fn var_use(&self) -> &VarUseIndex {
        &self.var_use
    }

    pub(crate) fn push_entity(&mut self, entity: Entity) {
        let index = self.entities.len();
        self.entity_index.insert(entity.offset, index);
        if let EntityKind::Instruction(instruction) = &entity.kind {
            self.instruction_offsets.push(entity.offset);
            self.by_signature.entry(instruction.signature).or_default().push(entity.offset);
            if instruction.cut_off {
                self.cut_off_offsets.push(entity.offset);
            }
        }
        if let EntityKind::UnknownInstruction { signature } = &entity.kind {
            self.unknown_by_signature.entry(*signature).or_default().push(entity.offset);
        }
        self.entities.push(entity);
    }
}
