//! Control-flow reconstruction over PAC bytecode: basic blocks, typed
//! edges, entry-point normalization, graph analysis, cross-binary block
//! matching and Graphviz rendering.
//!
//! The pipeline consumes a [`pac_asm::PacFile`] and a set of
//! [`FlowTables`]; the [`Decompiler`] facade runs the phases in their
//! fixed order and hands back a [`Decompilation`].

#![warn(missing_docs)]

mod analyze;
mod datablocks;
mod decompiler;
pub mod dot;
mod edges;
mod error;
mod graph;
mod matcher;
mod normalize;
mod partition;
mod resolve;
mod tables;

pub use analyze::{Condensed, PlainGraph, Visitor};
pub use datablocks::{DataBlock, DataBlocks};
pub use decompiler::{CfgSummary, Decompilation, Decompiler, DecompilerSettings};
pub use edges::EdgeQuery;
pub use error::{GraphError, TablesError};
pub use graph::{
    BlockId, CodeBlock, CodeGraph, ConnectError, Edge, EdgeId, EntryPoint, ExitPoint, Transition,
    UnrecoveredJump,
};
pub use matcher::{
    match_code_blocks, match_data_blocks, sort_matches_by_size, BlockMatch, HashKind,
    MatchSettings,
};
pub use normalize::normalize_entry_points;
pub use partition::{flow_truncators, partition_blocks};
pub use resolve::Resolver;
pub use tables::{
    parse_signature_list, parse_signature_pairs, FlowTables, ImportantSignatures, GET_GATE_INFO,
    SET_GATE_INFO,
};
