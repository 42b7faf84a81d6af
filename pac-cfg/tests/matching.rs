//! Cross-binary block matching tests.

mod common;

use common::*;
use pac_cfg::{
    match_code_blocks, match_data_blocks, sort_matches_by_size, BlockMatch, HashKind,
    MatchSettings,
};

/// First file: one block of `mov, mov, end`.
fn first_program() -> Vec<u8> {
    let mut data = Vec::new();
    cmd_mov(&mut data, (0x2, 1), (0x2, 2)); // [0, 20)
    cmd_mov(&mut data, (0x2, 3), (0x2, 4)); // [20, 40)
    cmd_end(&mut data); // [40, 44)
    data
}

/// Second file: a decoy block, then the same signature sequence with
/// different arguments at a different offset.
fn second_program() -> Vec<u8> {
    let mut data = Vec::new();
    nop(&mut data); // [0, 4)
    cmd_end(&mut data); // [4, 8), decoy block
    cmd_mov(&mut data, (0x2, 5), (0x2, 6)); // [8, 28)
    cmd_mov(&mut data, (0x2, 7), (0x2, 8)); // [28, 48)
    cmd_end(&mut data); // [48, 52)
    data
}

#[test]
fn unique_signature_match() {
    let first = decompile(&first_program(), "first.pac");
    let second = decompile(&second_program(), "second.pac");
    let settings = MatchSettings::default();

    let matches = match_code_blocks(
        (&first.file, first.graph.as_ref().unwrap()),
        (&second.file, second.graph.as_ref().unwrap()),
        HashKind::InstructionSignatures,
        &settings,
    );
    assert_eq!(
        matches,
        vec![BlockMatch { total_first: 1, total_second: 1, first_address: 0, second_address: 8 }]
    );
}

#[test]
fn byte_hashes_see_the_arguments() {
    let first = decompile(&first_program(), "first.pac");
    let second = decompile(&second_program(), "second.pac");
    let settings = MatchSettings::default();

    // Same signatures, different argument words: no byte-level match.
    let matches = match_code_blocks(
        (&first.file, first.graph.as_ref().unwrap()),
        (&second.file, second.graph.as_ref().unwrap()),
        HashKind::Bytes,
        &settings,
    );
    assert!(matches.is_empty());
}

#[test]
fn thresholds_filter_blocks() {
    let first = decompile(&first_program(), "first.pac");
    let second = decompile(&second_program(), "second.pac");
    let settings = MatchSettings { min_block_instr_count: 4, ..MatchSettings::default() };

    let matches = match_code_blocks(
        (&first.file, first.graph.as_ref().unwrap()),
        (&second.file, second.graph.as_ref().unwrap()),
        HashKind::InstructionSignatures,
        &settings,
    );
    assert!(matches.is_empty());
}

#[test]
fn non_unique_matches_expand_to_pairs() {
    // First file holds the mov-mov-end shape twice.
    let mut data = first_program();
    data.extend(first_program());
    let first = decompile(&data, "first.pac");
    let second = decompile(&second_program(), "second.pac");
    let settings = MatchSettings {
        unique_matches: false,
        non_unique_matches: true,
        ..MatchSettings::default()
    };

    let matches = match_code_blocks(
        (&first.file, first.graph.as_ref().unwrap()),
        (&second.file, second.graph.as_ref().unwrap()),
        HashKind::InstructionSignatures,
        &settings,
    );
    assert_eq!(matches.len(), 2);
    assert!(matches
        .iter()
        .all(|m| m.total_first == 2 && m.total_second == 1 && m.second_address == 8));
    let firsts: Vec<u32> = matches.iter().map(|m| m.first_address).collect();
    assert_eq!(firsts, vec![0, 44]);
}

#[test]
fn matcher_is_deterministic() {
    let first = decompile(&first_program(), "first.pac");
    let second = decompile(&second_program(), "second.pac");
    let settings = MatchSettings {
        unique_matches: true,
        non_unique_matches: true,
        ..MatchSettings::default()
    };

    let run = || {
        match_code_blocks(
            (&first.file, first.graph.as_ref().unwrap()),
            (&second.file, second.graph.as_ref().unwrap()),
            HashKind::InstructionSignatures,
            &settings,
        )
    };
    assert_eq!(run(), run());
}

#[test]
fn data_blocks_match_by_bytes() {
    // Identical raw tails behind different code.
    let mut first_data = first_program();
    first_data.extend(*b"\xff\xfe\x01\x02\x03");
    let mut second_data = second_program();
    second_data.extend(*b"\xff\xfe\x01\x02\x03");
    let first = decompile(&first_data, "first.pac");
    let second = decompile(&second_data, "second.pac");

    let matches = match_data_blocks(
        (&first.file, &first.data),
        (&second.file, &second.data),
        &MatchSettings::default(),
    );
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].first_address, 44);
    assert_eq!(matches[0].second_address, 52);
}

#[test]
fn matches_sort_by_first_block_size() {
    let mut data = Vec::new();
    nop(&mut data); // small block [0, 8)
    cmd_end(&mut data);
    data.extend(first_program()); // large block at 8
    let first = decompile(&data, "first.pac");

    let mut other = Vec::new();
    nop(&mut other);
    cmd_end(&mut other);
    other.extend(first_program());
    let second = decompile(&other, "second.pac");

    let mut matches = match_code_blocks(
        (&first.file, first.graph.as_ref().unwrap()),
        (&second.file, second.graph.as_ref().unwrap()),
        HashKind::InstructionSignatures,
        &MatchSettings::default(),
    );
    sort_matches_by_size(&mut matches, first.graph.as_ref().unwrap());
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].first_address, 8);
    assert_eq!(matches[1].first_address, 0);
}
