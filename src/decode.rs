//! A 32-bit instruction word is interpreted under one of three fixed
//! bit-field layouts (R/I/J), selected by its primary opcode, and turned
//! into a tagged [`Instr`] value for the execution unit to pattern-match on.

use thiserror::Error;

use crate::utils::extract_field;

// Primary opcodes
pub const OP_RTYPE: u32 = 0x00;
pub const OP_REGIMM: u32 = 0x01;
pub const OP_J: u32 = 0x02;
pub const OP_JAL: u32 = 0x03;
pub const OP_BEQ: u32 = 0x04;
pub const OP_BNE: u32 = 0x05;
pub const OP_BLEZ: u32 = 0x06;
pub const OP_BGTZ: u32 = 0x07;
pub const OP_ADDI: u32 = 0x08;
pub const OP_ADDIU: u32 = 0x09;
pub const OP_SLTI: u32 = 0x0a;
pub const OP_SLTIU: u32 = 0x0b;
pub const OP_ANDI: u32 = 0x0c;
pub const OP_ORI: u32 = 0x0d;
pub const OP_XORI: u32 = 0x0e;
pub const OP_LUI: u32 = 0x0f;
pub const OP_LB: u32 = 0x20;
pub const OP_LW: u32 = 0x23;
pub const OP_SB: u32 = 0x28;
pub const OP_SW: u32 = 0x2b;

// R-type function codes
pub const FUNC_SLL: u32 = 0x00;
pub const FUNC_SRL: u32 = 0x02;
pub const FUNC_SRA: u32 = 0x03;
pub const FUNC_SLLV: u32 = 0x04;
pub const FUNC_SRLV: u32 = 0x05;
pub const FUNC_JR: u32 = 0x08;
pub const FUNC_SYSCALL: u32 = 0x0c;
pub const FUNC_MFHI: u32 = 0x10;
pub const FUNC_MFLO: u32 = 0x11;
pub const FUNC_MULT: u32 = 0x18;
pub const FUNC_MULTU: u32 = 0x19;
pub const FUNC_DIV: u32 = 0x1a;
pub const FUNC_DIVU: u32 = 0x1b;
pub const FUNC_ADD: u32 = 0x20;
pub const FUNC_ADDU: u32 = 0x21;
pub const FUNC_SUB: u32 = 0x22;
pub const FUNC_SUBU: u32 = 0x23;
pub const FUNC_AND: u32 = 0x24;
pub const FUNC_OR: u32 = 0x25;
pub const FUNC_XOR: u32 = 0x26;
pub const FUNC_SLT: u32 = 0x2a;
pub const FUNC_SLTU: u32 = 0x2b;

// REGIMM rt selectors
pub const RT_BLTZ: u32 = 0x00;
pub const RT_BGEZ: u32 = 0x01;
pub const RT_BLTZAL: u32 = 0x10;
pub const RT_BGEZAL: u32 = 0x11;

fn opcode(word: u32) -> u32 {
    extract_field(word, 31, 26)
}

fn rs(word: u32) -> u8 {
    extract_field(word, 25, 21) as u8
}

fn rt(word: u32) -> u8 {
    extract_field(word, 20, 16) as u8
}

fn rd(word: u32) -> u8 {
    extract_field(word, 15, 11) as u8
}

fn shamt(word: u32) -> u8 {
    extract_field(word, 10, 6) as u8
}

fn func(word: u32) -> u32 {
    extract_field(word, 5, 0)
}

fn imm(word: u32) -> u16 {
    extract_field(word, 15, 0) as u16
}

fn jump_addr(word: u32) -> u32 {
    extract_field(word, 25, 0)
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeFault {
    #[error("invalid instruction: unrecognised opcode 0x{opcode:02x} in word 0x{word:08x}")]
    InvalidOpcode { word: u32, opcode: u32 },
    #[error("invalid instruction: unrecognised function code 0x{func:02x} in word 0x{word:08x}")]
    InvalidFunc { word: u32, func: u32 },
    #[error("invalid instruction: unrecognised regimm selector 0x{rt:02x} in word 0x{word:08x}")]
    InvalidRegImm { word: u32, rt: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RType {
    pub func: u32,
    pub rs: u8,
    pub rt: u8,
    pub rd: u8,
    pub shamt: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IType {
    pub op: u32,
    pub rs: u8,
    pub rt: u8,
    pub imm: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JType {
    pub op: u32,
    pub addr: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegImm {
    pub selector: u32,
    pub rs: u8,
    pub imm: u16,
}

/// A decoded instruction, tagged by which of the three bit-field layouts
/// (plus the regimm special case) it was decoded under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instr {
    RType(RType),
    IType(IType),
    JType(JType),
    RegImm(RegImm),
}

impl Instr {
    /// Decode a 32-bit instruction word.
    pub fn decode(word: u32) -> Result<Instr, DecodeFault> {
        let op = opcode(word);
        match op {
            OP_RTYPE => {
                let f = func(word);
                match f {
                    FUNC_SLL | FUNC_SRL | FUNC_SRA | FUNC_SLLV | FUNC_SRLV | FUNC_JR
                    | FUNC_SYSCALL | FUNC_MFHI | FUNC_MFLO | FUNC_MULT | FUNC_MULTU
                    | FUNC_DIV | FUNC_DIVU | FUNC_ADD | FUNC_ADDU | FUNC_SUB | FUNC_SUBU
                    | FUNC_AND | FUNC_OR | FUNC_XOR | FUNC_SLT | FUNC_SLTU => {
                        Ok(Instr::RType(RType {
                            func: f,
                            rs: rs(word),
                            rt: rt(word),
                            rd: rd(word),
                            shamt: shamt(word),
                        }))
                    }
                    _ => Err(DecodeFault::InvalidFunc { word, func: f }),
                }
            }
            OP_REGIMM => {
                let selector = u32::from(rt(word));
                match selector {
                    RT_BLTZ | RT_BGEZ | RT_BLTZAL | RT_BGEZAL => Ok(Instr::RegImm(RegImm {
                        selector,
                        rs: rs(word),
                        imm: imm(word),
                    })),
                    _ => Err(DecodeFault::InvalidRegImm {
                        word,
                        rt: selector,
                    }),
                }
            }
            OP_J | OP_JAL => Ok(Instr::JType(JType {
                op,
                addr: jump_addr(word),
            })),
            OP_BEQ | OP_BNE | OP_BLEZ | OP_BGTZ | OP_ADDI | OP_ADDIU | OP_SLTI | OP_SLTIU
            | OP_ANDI | OP_ORI | OP_XORI | OP_LUI | OP_LB | OP_LW | OP_SB | OP_SW => {
                Ok(Instr::IType(IType {
                    op,
                    rs: rs(word),
                    rt: rt(word),
                    imm: imm(word),
                }))
            }
            _ => Err(DecodeFault::InvalidOpcode { word, opcode: op }),
        }
    }
}
