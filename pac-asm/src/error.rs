//! Decoder and catalog error variants.

use thiserror::Error;

/// Errors raised while decoding a PAC byte stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The buffer ended in the middle of a read.
    #[error("unexpected end of data at offset 0x{offset:X} (needed {needed} more bytes)")]
    UnexpectedEof {
        /// Offset the read started at.
        offset: u32,
        /// Bytes missing from the buffer.
        needed: u32,
    },
    /// A 2-byte composite argument carried the float type byte, which has no
    /// 2-byte encoding.
    #[error("cannot decode a 2-byte float value at offset 0x{offset:X}")]
    TwoByteFloat {
        /// Offset of the value slot.
        offset: u32,
    },
    /// The cut-off fence fired inside a compressed composite argument, where
    /// it is not admitted.
    #[error("compressed composite argument at offset 0x{offset:X} ends in a new instruction")]
    CutOffForbidden {
        /// Offset of the argument.
        offset: u32,
    },
    /// A `COUNT_uint32t_*` argument whose count header is not `0x1`/`0x2`.
    #[error("cannot parse count argument at offset 0x{offset:X}: type byte 0x{found:X}")]
    BadCountHeader {
        /// Offset of the count header.
        offset: u32,
        /// The offending type byte.
        found: u8,
    },
    /// The input buffer is empty.
    #[error("PAC file raw data is empty")]
    EmptyFile,
    /// A string terminated with a NUL but its bytes are not valid Shift-JIS.
    #[error("invalid Shift-JIS string argument at offset 0x{offset:X}")]
    BadString {
        /// Offset of the string argument.
        offset: u32,
    },
}

/// Errors raised while loading the instruction catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// A numeric field failed to parse.
    #[error("catalog line {line}: invalid {field} field `{value}`")]
    BadField {
        /// 1-based line number.
        line: usize,
        /// Field name.
        field: &'static str,
        /// Raw field text.
        value: String,
    },
    /// The descriptor file could not be read.
    #[error("cannot read catalog: {message}")]
    Io {
        /// The underlying I/O error, rendered.
        message: String,
    },
}
