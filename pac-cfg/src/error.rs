//! Graph-layer error variants.

use thiserror::Error;

/// Errors raised while building or analyzing the control-flow graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// The file holds no instructions, so there is nothing to partition.
    #[error("the file contains no instructions")]
    NoInstructions,
    /// A block lost its entry point; the graph is corrupt.
    #[error("block at 0x{start:X} has no entry point")]
    MissingEntryPoint {
        /// Block start offset.
        start: u32,
    },
    /// An edge is not mirrored between its exit and entry points.
    #[error("edge {edge} from 0x{from:X} to 0x{to:X} is not mirrored")]
    UnmirroredEdge {
        /// Edge index.
        edge: u32,
        /// Source block start.
        from: u32,
        /// Destination block start.
        to: u32,
    },
    /// The gate dataflow pass met destinations that are not block starts.
    #[error("gate dataflow found {count} destinations that are not block starts")]
    UnknownGateDestinations {
        /// How many destinations were unknown.
        count: usize,
    },
}

/// Errors raised while loading classification lists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TablesError {
    /// A line that is neither a comment nor a well-formed record.
    #[error("classification list line {line}: cannot parse `{text}`")]
    BadLine {
        /// 1-based line number.
        line: usize,
        /// The offending text.
        text: String,
    },
    /// The important-signature list is shorter than the documented order.
    #[error("important signature list has {found} entries, 13 required")]
    TooFewImportant {
        /// Number of entries found.
        found: usize,
    },
    /// A list file could not be read.
    #[error("cannot read classification list: {message}")]
    Io {
        /// The underlying I/O error, rendered.
        message: String,
    },
}
