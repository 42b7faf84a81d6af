//! Control-flow classification tables.
//!
//! Which signatures jump, return, save the return address or receive
//! callbacks is configuration, not code: the lists ship next to the
//! instruction catalog as whitespace-separated text with `#` comments.

use std::collections::{HashMap, HashSet};

use crate::error::TablesError;

/// The thirteen distinguished signatures, in their documented order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportantSignatures {
    /// Script terminator.
    pub cmd_end: u32,
    /// Unconditional jump.
    pub cmd_jmp: u32,
    /// Call (jump that saves the return address).
    pub cmd_call: u32,
    /// Indexed jump through a switch-case table.
    pub cmd_inx_jmp: u32,
    /// Stack decrement; truncates flow.
    pub cmd_stk_dec: u32,
    /// Stack clear; truncates flow.
    pub cmd_stk_clr: u32,
    /// Binds a label id to an offset.
    pub cmd_set_label_id: u32,
    /// Call through a label id.
    pub cmd_call_label_id: u32,
    /// Jump through a label id.
    pub cmd_jmp_label_id: u32,
    /// Call through a runtime label variable.
    pub cmd_call_label: u32,
    /// Jump through a runtime label variable.
    pub cmd_jmp_label: u32,
    /// Menu handler that returns control; special edge to its first arg.
    pub do_select: u32,
    /// Cursor variant of [`Self::do_select`].
    pub do_select_cursor: u32,
}

/// Default signature of `setGateInfo`, not part of the shipped lists.
pub const SET_GATE_INFO: u32 = 0x2516BD00;
/// Default signature of `getGateInfo`, not part of the shipped lists.
pub const GET_GATE_INFO: u32 = 0x2516BE00;

/// All classification tables the graph passes consult.
#[derive(Debug, Clone)]
pub struct FlowTables {
    /// Conditional jumps: `signature -> jump-argument index`.
    pub cond_jumps: HashMap<u32, usize>,
    /// Unconditional jumps: `signature -> jump-argument index`.
    pub uncond_jumps: HashMap<u32, usize>,
    /// Every jumping signature (flow truncators).
    pub jumps: HashMap<u32, usize>,
    /// Callback receivers: `signature -> callback-argument index`.
    pub callbacks: HashMap<u32, usize>,
    /// Returning signatures.
    pub returning: Vec<u32>,
    /// Signatures whose transfer saves a return address.
    pub saving_ra: HashSet<u32>,
    /// The distinguished signatures.
    pub important: ImportantSignatures,
    /// `setGateInfo` signature used by the gate dataflow pass.
    pub set_gate_info: u32,
    /// `getGateInfo` signature used by runtime-jump triage.
    pub get_gate_info: u32,
    names: HashMap<u32, String>,
}

fn records(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
}

fn parse_signature(line: usize, text: &str, token: &str) -> Result<u32, TablesError> {
    let digits = token.trim_start_matches("0x");
    u32::from_str_radix(digits, 16)
        .map_err(|_| TablesError::BadLine { line, text: text.to_owned() })
}

/// Parse `signature_hex arg_index` pairs.
pub fn parse_signature_pairs(text: &str) -> Result<HashMap<u32, usize>, TablesError> {
    let mut map = HashMap::new();
    for (line, record) in records(text) {
        let mut tokens = record.split_whitespace();
        let bad = || TablesError::BadLine { line, text: record.to_owned() };
        let signature = parse_signature(line, record, tokens.next().ok_or_else(&bad)?)?;
        let index = tokens.next().ok_or_else(&bad)?.parse::<usize>().map_err(|_| bad())?;
        map.insert(signature, index);
    }
    Ok(map)
}

/// Parse one `signature_hex` per line.
pub fn parse_signature_list(text: &str) -> Result<Vec<u32>, TablesError> {
    records(text)
        .map(|(line, record)| parse_signature(line, record, record))
        .collect()
}

impl ImportantSignatures {
    /// Parse the ordered important-signature list.
    pub fn parse(text: &str) -> Result<ImportantSignatures, TablesError> {
        let list = parse_signature_list(text)?;
        if list.len() < 13 {
            return Err(TablesError::TooFewImportant { found: list.len() });
        }
        Ok(ImportantSignatures {
            cmd_end: list[0],
            cmd_jmp: list[1],
            cmd_call: list[2],
            cmd_inx_jmp: list[3],
            cmd_stk_dec: list[4],
            cmd_stk_clr: list[5],
            cmd_set_label_id: list[6],
            cmd_call_label_id: list[7],
            cmd_jmp_label_id: list[8],
            cmd_call_label: list[9],
            cmd_jmp_label: list[10],
            do_select: list[11],
            do_select_cursor: list[12],
        })
    }
}

impl Default for FlowTables {
    fn default() -> FlowTables {
        FlowTables {
            cond_jumps: HashMap::new(),
            uncond_jumps: HashMap::new(),
            jumps: HashMap::new(),
            callbacks: HashMap::new(),
            returning: Vec::new(),
            saving_ra: HashSet::new(),
            important: ImportantSignatures::default(),
            set_gate_info: SET_GATE_INFO,
            get_gate_info: GET_GATE_INFO,
            names: HashMap::new(),
        }
    }
}

impl FlowTables {
    /// Assemble the tables from the six classification lists plus the
    /// important-signature list.
    #[allow(clippy::too_many_arguments)]
    pub fn load(
        cond: &str,
        uncond: &str,
        jump: &str,
        returning: &str,
        saving: &str,
        callback: &str,
        important: &str,
    ) -> Result<FlowTables, TablesError> {
        Ok(FlowTables {
            cond_jumps: parse_signature_pairs(cond)?,
            uncond_jumps: parse_signature_pairs(uncond)?,
            jumps: parse_signature_pairs(jump)?,
            callbacks: parse_signature_pairs(callback)?,
            returning: parse_signature_list(returning)?,
            saving_ra: parse_signature_list(saving)?.into_iter().collect(),
            important: ImportantSignatures::parse(important)?,
            set_gate_info: SET_GATE_INFO,
            get_gate_info: GET_GATE_INFO,
            names: HashMap::new(),
        })
    }

    /// Read the seven lists from disk and assemble the tables.
    #[allow(clippy::too_many_arguments)]
    pub fn load_from_paths(
        cond: &std::path::Path,
        uncond: &std::path::Path,
        jump: &std::path::Path,
        returning: &std::path::Path,
        saving: &std::path::Path,
        callback: &std::path::Path,
        important: &std::path::Path,
    ) -> Result<FlowTables, TablesError> {
        let read = |path: &std::path::Path| {
            std::fs::read_to_string(path)
                .map_err(|error| TablesError::Io { message: error.to_string() })
        };
        FlowTables::load(
            &read(cond)?,
            &read(uncond)?,
            &read(jump)?,
            &read(returning)?,
            &read(saving)?,
            &read(callback)?,
            &read(important)?,
        )
    }

    /// Attach the `signature -> name` map from the instruction catalog.
    pub fn set_names(&mut self, names: HashMap<u32, String>) {
        self.names = names;
    }

    /// Display name of a signature, falling back to its hex form.
    pub fn name(&self, signature: u32) -> String {
        self.names
            .get(&signature)
            .cloned()
            .unwrap_or_else(|| format!("{signature:X}"))
    }

    /// Whether the signature saves a return address.
    pub fn saves_ra(&self, signature: u32) -> bool {
        self.saving_ra.contains(&signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_with_comments() {
        let text = "# conditional jumps\n25000700 1\n\n25000800 0\n";
        let map = parse_signature_pairs(text).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map[&0x25000700], 1);
        assert_eq!(map[&0x25000800], 0);
    }

    #[test]
    fn bad_pair_reports_line() {
        let err = parse_signature_pairs("25000700\n").unwrap_err();
        assert_eq!(err, TablesError::BadLine { line: 1, text: "25000700".into() });
    }

    #[test]
    fn important_order() {
        let text = "\
25000100
25000200
25000300
25002F00
25003000
25003100
25002A00
25002B00
25002C00
25002D00
25002E00
25001B00
25001C00
";
        let important = ImportantSignatures::parse(text).unwrap();
        assert_eq!(important.cmd_end, 0x25000100);
        assert_eq!(important.cmd_inx_jmp, 0x25002F00);
        assert_eq!(important.do_select_cursor, 0x25001C00);
    }

    #[test]
    fn short_important_list_is_an_error() {
        assert_eq!(
            ImportantSignatures::parse("25000100\n"),
            Err(TablesError::TooFewImportant { found: 1 })
        );
    }
}
