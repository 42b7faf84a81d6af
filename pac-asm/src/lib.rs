//! Decoder for the PAC bytecode format: a signature-directed,
//! variable-length instruction stream with in-line data (message tables,
//! switch-case tables, alignment padding).
//!
//! The crate turns a flat byte buffer plus an instruction catalog into an
//! ordered, gap-free stream of typed entities ([`PacFile`]), and renders it
//! back as textual disassembly ([`Dumper`]). Control-flow reconstruction
//! lives in the sibling `pac-cfg` crate.

#![warn(missing_docs)]

pub mod bytes;
mod catalog;
mod dump;
mod entity;
mod error;
mod file;
mod instruction;
mod parser;
mod value;

pub use catalog::{Catalog, CountElem, CountKind, ParamDesc, ParamKind, Template};
pub use dump::{DisasmSettings, Dumper};
pub use entity::{Entity, EntityKind};
pub use error::{CatalogError, DecodeError};
pub use file::{PacFile, VarUseIndex};
pub use instruction::Instruction;
pub use parser::{default_unknown_heuristic, Parser};
pub use value::{Arg, ArgSlot, SlotClass, TypeByte, Value, VarRef};
