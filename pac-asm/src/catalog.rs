//! The instruction catalog: templates that drive argument decoding.
//!
//! The catalog is loaded from a semicolon-delimited descriptor, one
//! instruction per line:
//!
//! ```text
//! signature_hex;name;overlay_decimal;function_address_hex;param1_type;param1_name;...
//! ```
//!
//! Lines with fewer than four fields are ignored.

use std::collections::HashMap;

use crate::error::CatalogError;

/// How the count header of a `COUNT_*` argument is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CountKind {
    /// Count in the first byte; the header still advances a full word.
    Byte,
    /// Composite count: a `0x1`/`0x2` type word followed by the count word.
    Uint32,
    /// Bare little-endian count word.
    Uint32P,
}

impl CountKind {
    /// The token used in the descriptor file and in decoded slot labels.
    pub fn token(self) -> &'static str {
        match self {
            CountKind::Byte => "byte",
            CountKind::Uint32 => "uint32t",
            CountKind::Uint32P => "uint32tP",
        }
    }
}

/// How each element of a `COUNT_*` argument is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CountElem {
    /// Type word + value word (same shape as `uint32_t_T`).
    Composite,
    /// Bare little-endian value word.
    Plain,
}

/// Parsed form of a template parameter's `type_tag`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParamKind {
    /// `uintX_t`: word-aligned bare integer.
    UintX,
    /// `uintX_t_T`: word-aligned composite.
    UintXT,
    /// `uintXC_t_T`: compressed composite.
    UintXCT,
    /// `uint32_t_T`: composite.
    Uint32T,
    /// `uint16_t_T`: 2-byte composite.
    Uint16T,
    /// `float`: IEEE-754 single.
    Float,
    /// `string`: NUL-terminated Shift-JIS.
    String,
    /// `uint32_t`: bare integer.
    Uint32,
    /// `uint32_t_P`: bare integer (pointer-like).
    Uint32P,
    /// `ENTITY_ID`: padding word, then the id.
    EntityId,
    /// `EQUIP_ID`: padding word, then the id.
    EquipId,
    /// `KEYBIND_ID`: bare id.
    KeybindId,
    /// `COUNT_<count>_<elem>`: a count header followed by that many elements.
    Count {
        /// Count header encoding.
        count: CountKind,
        /// Element encoding.
        elem: CountElem,
    },
    /// `CONTINOUS_*`: consume the rest of the stream as words. The typo is
    /// the descriptor format's own.
    Continuous,
    /// A tag this decoder does not understand; consumes nothing.
    Other(String),
}

impl ParamKind {
    fn parse(tag: &str) -> ParamKind {
        if tag == "uintX_t" {
            ParamKind::UintX
        } else if tag.starts_with("uintX_t_T") {
            ParamKind::UintXT
        } else if tag.starts_with("uintXC_t_T") {
            ParamKind::UintXCT
        } else if tag.starts_with("uint32_t_T") {
            ParamKind::Uint32T
        } else if tag.starts_with("uint16_t_T") {
            ParamKind::Uint16T
        } else if tag == "float" {
            ParamKind::Float
        } else if tag == "string" {
            ParamKind::String
        } else if tag == "uint32_t" {
            ParamKind::Uint32
        } else if tag == "uint32_t_P" {
            ParamKind::Uint32P
        } else if tag == "ENTITY_ID" {
            ParamKind::EntityId
        } else if tag == "EQUIP_ID" {
            ParamKind::EquipId
        } else if tag == "KEYBIND_ID" {
            ParamKind::KeybindId
        } else if let Some(rest) = tag.strip_prefix("COUNT_") {
            Self::parse_count(rest).unwrap_or_else(|| ParamKind::Other(tag.to_owned()))
        } else if tag.starts_with("CONTINOUS_") {
            ParamKind::Continuous
        } else {
            ParamKind::Other(tag.to_owned())
        }
    }

    fn parse_count(rest: &str) -> Option<ParamKind> {
        let mut parts = rest.split('_');
        let count = match parts.next()? {
            "byte" => CountKind::Byte,
            "uint32t" => CountKind::Uint32,
            "uint32tP" => CountKind::Uint32P,
            _ => return None,
        };
        let elem = match parts.next()? {
            "uint32t" => CountElem::Composite,
            "uint32tP" => CountElem::Plain,
            _ => return None,
        };
        Some(ParamKind::Count { count, elem })
    }

    /// The descriptor token this kind displays as.
    pub fn tag(&self) -> &str {
        match self {
            ParamKind::UintX => "uintX_t",
            ParamKind::UintXT => "uintX_t_T",
            ParamKind::UintXCT => "uintXC_t_T",
            ParamKind::Uint32T => "uint32_t_T",
            ParamKind::Uint16T => "uint16_t_T",
            ParamKind::Float => "float",
            ParamKind::String => "string",
            ParamKind::Uint32 => "uint32_t",
            ParamKind::Uint32P => "uint32_t_P",
            ParamKind::EntityId => "ENTITY_ID",
            ParamKind::EquipId => "EQUIP_ID",
            ParamKind::KeybindId => "KEYBIND_ID",
            ParamKind::Count { .. } => "COUNT",
            ParamKind::Continuous => "CONTINOUS",
            ParamKind::Other(tag) => tag,
        }
    }
}

/// One template parameter: the decoding directive and a display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDesc {
    /// Decoding directive.
    pub kind: ParamKind,
    /// Name from the descriptor.
    pub name: String,
}

/// An instruction template from the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    /// 4-byte big-endian signature.
    pub signature: u32,
    /// Human-readable name.
    pub name: String,
    /// Region tag; opaque to the decoder.
    pub overlay: u32,
    /// Address of the native handler.
    pub function_address: u32,
    /// Ordered parameter list.
    pub params: Vec<ParamDesc>,
}

impl Template {
    /// Class byte of the signature.
    pub fn instr_class(&self) -> u8 {
        (self.signature >> 16) as u8
    }

    /// Index half-word of the signature.
    pub fn instr_index(&self) -> u16 {
        self.signature as u16
    }
}

/// The loaded instruction set: `signature -> Template` plus the name map.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    templates: HashMap<u32, Template>,
    names: HashMap<u32, String>,
}

fn parse_hex(line: usize, field: &'static str, value: &str) -> Result<u32, CatalogError> {
    let digits = value.trim().trim_start_matches("0x");
    u32::from_str_radix(digits, 16).map_err(|_| CatalogError::BadField {
        line,
        field,
        value: value.to_owned(),
    })
}

impl Catalog {
    /// Parse a catalog from descriptor text.
    pub fn parse(text: &str) -> Result<Catalog, CatalogError> {
        let mut catalog = Catalog::default();
        for (index, line) in text.lines().enumerate() {
            let line_no = index + 1;
            let words: Vec<&str> = line.trim().split(';').collect();
            if words.len() < 4 {
                continue;
            }

            let signature = parse_hex(line_no, "signature", words[0])?;
            let name = words[1].to_owned();
            let overlay = words[2].trim().parse::<u32>().map_err(|_| CatalogError::BadField {
                line: line_no,
                field: "overlay",
                value: words[2].to_owned(),
            })?;
            let function_address = parse_hex(line_no, "function address", words[3])?;

            let mut args = &words[4..];
            // A trailing semicolon leaves one empty token behind.
            while args.last().is_some_and(|w| w.is_empty()) {
                args = &args[..args.len() - 1];
            }
            if args.len() % 2 != 0 {
                tracing::warn!(line = line_no, "catalog parameter list has an unpaired type tag");
                args = &args[..args.len() - 1];
            }
            let params = args
                .chunks_exact(2)
                .map(|pair| ParamDesc {
                    kind: ParamKind::parse(pair[0]),
                    name: pair[1].to_owned(),
                })
                .collect();

            catalog.names.insert(signature, name.clone());
            catalog.templates.insert(
                signature,
                Template { signature, name, overlay, function_address, params },
            );
        }
        Ok(catalog)
    }

    /// Load a catalog from a descriptor file.
    pub fn from_path(path: &std::path::Path) -> Result<Catalog, CatalogError> {
        let text = std::fs::read_to_string(path)
            .map_err(|error| CatalogError::Io { message: error.to_string() })?;
        Catalog::parse(&text)
    }

    /// Look up the template for `signature`.
    pub fn get(&self, signature: u32) -> Option<&Template> {
        self.templates.get(&signature)
    }

    /// Whether the catalog knows `signature`.
    pub fn contains(&self, signature: u32) -> bool {
        self.templates.contains_key(&signature)
    }

    /// The human name of `signature`, if known.
    pub fn name(&self, signature: u32) -> Option<&str> {
        self.names.get(&signature).map(String::as_str)
    }

    /// `signature -> name` pairs for consumers that label graphs.
    pub fn names(&self) -> &HashMap<u32, String> {
        &self.names
    }

    /// Number of known instructions.
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
