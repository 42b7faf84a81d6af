//! Shared fixture: a small instruction set with every flow class, plus
//! byte-level assemblers for the test programs.

#![allow(dead_code)]

use pac_asm::{Catalog, PacFile, Parser};
use pac_cfg::{Decompilation, Decompiler, FlowTables};

pub const NOP: u32 = 0x25000000;
pub const CMD_END: u32 = 0x25000100;
pub const CMD_JMP: u32 = 0x25000200;
pub const CMD_CALL: u32 = 0x25000300;
pub const CMD_MOV: u32 = 0x25000500;
pub const CMD_IF_JMP: u32 = 0x25000700;
pub const DO_SELECT: u32 = 0x25001B00;
pub const CMD_SET_LABEL_ID: u32 = 0x25002A00;
pub const CMD_JMP_LABEL_ID: u32 = 0x25002C00;
pub const CMD_JMP_LABEL: u32 = 0x25002E00;
pub const CMD_INX_JMP: u32 = 0x25002F00;
pub const SET_CALLBACK: u32 = 0x25004000;
pub const CMD_RET: u32 = 0x25004100;
pub const SET_GATE_INFO: u32 = 0x2516BD00;
pub const GET_GATE_INFO: u32 = 0x2516BE00;

const CATALOG: &str = "\
25000000;nop;0;0;
25000100;cmd_end;0;0;
25000200;cmd_jmp;0;0;uintX_t;address
25000300;cmd_call;0;0;uintX_t;address
25000500;cmd_mov;0;0;uint32_t_T;dest;uint32_t_T;src
25000700;cmd_ifJmp;0;0;uint32_t_T;condition;uintX_t;address
25001B00;doSelect;0;0;uintX_t;address
25001C00;doSelectCursor;0;0;uintX_t;address
25002A00;cmd_setLabelId;0;0;uint32_t_T;label;uintX_t;address
25002B00;cmd_callLabelId;0;0;uint32_t_T;label
25002C00;cmd_jmpLabelId;0;0;uint32_t_T;label
25002D00;cmd_callLabel;0;0;uint32_t_T;label
25002E00;cmd_jmpLabel;0;0;uint32_t_T;label
25002F00;cmd_inxJmp;0;0;
25003000;cmd_stkDec;0;0;
25003100;cmd_stkClr;0;0;
25004000;setCallback;0;0;uintX_t;address
25004100;cmd_ret;0;0;
2516BD00;setGateInfo;0;0;uint32_t_T;kind;uint32_t_T;info;uint32_t_T;destination
2516BE00;getGateInfo;0;0;uint32_t_T;destination
";

const COND_JUMPS: &str = "25000700 1\n";
const UNCOND_JUMPS: &str = "25000200 0\n25000300 0\n";
const JUMPS: &str = "\
25000200 0
25000300 0
25000700 1
25002B00 0
25002C00 0
25002D00 0
25002E00 0
25002F00 0
";
const RETURNING: &str = "25001B00\n25001C00\n25004100\n";
const SAVING_RA: &str = "25000300\n25002B00\n25002D00\n";
const CALLBACKS: &str = "25004000 0\n";
const IMPORTANT: &str = "\
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

pub fn catalog() -> Catalog {
    Catalog::parse(CATALOG).expect("fixture catalog parses")
}

pub fn tables() -> FlowTables {
    let mut tables = FlowTables::load(
        COND_JUMPS,
        UNCOND_JUMPS,
        JUMPS,
        RETURNING,
        SAVING_RA,
        CALLBACKS,
        IMPORTANT,
    )
    .expect("fixture tables parse");
    tables.set_names(catalog().names().clone());
    tables
}

pub fn parse(data: &[u8], name: &str) -> PacFile {
    let catalog = catalog();
    let mut parser = Parser::new(&catalog);
    parser.inx_jmp_signature = CMD_INX_JMP;
    parser.parse(data.to_vec(), name).expect("fixture program parses")
}

pub fn decompile(data: &[u8], name: &str) -> Decompilation {
    let tables = tables();
    let decompiler = Decompiler::new(&tables);
    decompiler.decompile(parse(data, name)).expect("fixture program decompiles")
}

/// Append the 4-byte big-endian signature.
pub fn sig(out: &mut Vec<u8>, signature: u32) {
    out.extend(signature.to_be_bytes());
}

/// Append a little-endian word.
pub fn word(out: &mut Vec<u8>, value: u32) {
    out.extend(value.to_le_bytes());
}

/// Append a composite argument: type word plus value word.
pub fn composite(out: &mut Vec<u8>, type_byte: u8, value: u32) {
    out.extend([type_byte, 0, 0, 0]);
    word(out, value);
}

pub fn nop(out: &mut Vec<u8>) {
    sig(out, NOP);
}

pub fn cmd_end(out: &mut Vec<u8>) {
    sig(out, CMD_END);
}

pub fn cmd_jmp(out: &mut Vec<u8>, address: u32) {
    sig(out, CMD_JMP);
    word(out, address);
}

pub fn cmd_call(out: &mut Vec<u8>, address: u32) {
    sig(out, CMD_CALL);
    word(out, address);
}

/// `cmd_ifJmp` with an integer-constant condition.
pub fn cmd_if_jmp(out: &mut Vec<u8>, condition: u32, address: u32) {
    sig(out, CMD_IF_JMP);
    composite(out, 0x2, condition);
    word(out, address);
}

pub fn cmd_mov(out: &mut Vec<u8>, dest: (u8, u32), src: (u8, u32)) {
    sig(out, CMD_MOV);
    composite(out, dest.0, dest.1);
    composite(out, src.0, src.1);
}
