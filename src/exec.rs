//! One handler per instruction class. Each handler receives the already
//! fetched-and-decoded instruction, mutates the owning [`Simulator`], and
//! reports whether the loop should keep stepping or stop (`StepOutcome`).
//!
//! PC advancement is centralized at the bottom of [`execute`] rather than
//! duplicated in every handler: a handler that wants anything other than
//! the default `pc + 4` sets `next_pc` through the `Flow` it returns.

use std::io::{BufRead, Write};

use crate::decode::*;
use crate::error::Fault;
use crate::simulator::{Simulator, StepOutcome};
use crate::syscall;
use crate::utils::{as_signed, as_unsigned, sign_extend16};

/// Where the next instruction should come from.
enum Flow {
    Next,
    Jump(u32),
}

pub fn execute(
    sim: &mut Simulator,
    instr: Instr,
    out: &mut impl Write,
    in_: &mut impl BufRead,
) -> Result<StepOutcome, Fault> {
    let pc = sim.pc;
    let (flow, outcome) = match instr {
        Instr::RType(r) => execute_rtype(sim, r, pc, out, in_)?,
        Instr::IType(i) => (execute_itype(sim, i, pc)?, StepOutcome::Continue),
        Instr::JType(j) => (execute_jtype(sim, j, pc), StepOutcome::Continue),
        Instr::RegImm(r) => (execute_regimm(sim, r, pc), StepOutcome::Continue),
    };
    sim.pc = match flow {
        Flow::Next => pc.wrapping_add(4),
        Flow::Jump(target) => target,
    };
    Ok(outcome)
}

fn execute_rtype(
    sim: &mut Simulator,
    r: RType,
    pc: u32,
    out: &mut impl Write,
    in_: &mut impl BufRead,
) -> Result<(Flow, StepOutcome), Fault> {
    let rs = sim.registers.read(r.rs).expect("rs is a 5-bit field");
    let rt = sim.registers.read(r.rt).expect("rt is a 5-bit field");
    let mut outcome = StepOutcome::Continue;
    let flow = match r.func {
        FUNC_ADD | FUNC_ADDU => {
            // No overflow trap: the real ISA traps ADD on signed overflow,
            // but this interpreter has no exception path beyond invalid
            // opcodes, so ADD and ADDU behave identically here.
            set_rd(sim, r.rd, rs.wrapping_add(rt))?;
            Flow::Next
        }
        FUNC_SUB | FUNC_SUBU => {
            set_rd(sim, r.rd, rs.wrapping_sub(rt))?;
            Flow::Next
        }
        FUNC_AND => {
            set_rd(sim, r.rd, rs & rt)?;
            Flow::Next
        }
        FUNC_OR => {
            set_rd(sim, r.rd, rs | rt)?;
            Flow::Next
        }
        FUNC_XOR => {
            set_rd(sim, r.rd, rs ^ rt)?;
            Flow::Next
        }
        FUNC_SLT => {
            set_rd(sim, r.rd, u32::from(as_signed(rs) < as_signed(rt)))?;
            Flow::Next
        }
        FUNC_SLTU => {
            set_rd(sim, r.rd, u32::from(rs < rt))?;
            Flow::Next
        }
        FUNC_SLL => {
            set_rd(sim, r.rd, rt << r.shamt)?;
            Flow::Next
        }
        FUNC_SRL => {
            set_rd(sim, r.rd, rt >> r.shamt)?;
            Flow::Next
        }
        FUNC_SRA => {
            // Arithmetic shift: sign bit replicates into the vacated high
            // bits.
            set_rd(sim, r.rd, as_unsigned(as_signed(rt) >> r.shamt))?;
            Flow::Next
        }
        FUNC_SLLV => {
            set_rd(sim, r.rd, rt << (rs & 0x1f))?;
            Flow::Next
        }
        FUNC_SRLV => {
            set_rd(sim, r.rd, rt >> (rs & 0x1f))?;
            Flow::Next
        }
        FUNC_JR => Flow::Jump(rs),
        FUNC_SYSCALL => {
            outcome = syscall::dispatch(sim, out, in_)?;
            Flow::Next
        }
        FUNC_MFHI => {
            set_rd(sim, r.rd, sim.registers.hi)?;
            Flow::Next
        }
        FUNC_MFLO => {
            set_rd(sim, r.rd, sim.registers.lo)?;
            Flow::Next
        }
        FUNC_MULT => {
            // Only LO receives the 32-bit low product; HI is left
            // untouched rather than receiving the sign-extended high word.
            let product = (as_signed(rs) as i64).wrapping_mul(as_signed(rt) as i64);
            sim.registers.lo = product as u32;
            Flow::Next
        }
        FUNC_MULTU => {
            let product = u64::from(rs).wrapping_mul(u64::from(rt));
            sim.registers.lo = product as u32;
            Flow::Next
        }
        FUNC_DIV => {
            if rt == 0 {
                return Err(Fault::DivisionByZero { pc });
            }
            sim.registers.lo = as_unsigned(as_signed(rs).wrapping_div(as_signed(rt)));
            sim.registers.hi = as_unsigned(as_signed(rs).wrapping_rem(as_signed(rt)));
            Flow::Next
        }
        FUNC_DIVU => {
            if rt == 0 {
                return Err(Fault::DivisionByZero { pc });
            }
            sim.registers.lo = rs / rt;
            sim.registers.hi = rs % rt;
            Flow::Next
        }
        other => unreachable!("decode only produces recognised func codes, got 0x{other:02x}"),
    };
    Ok((flow, outcome))
}

fn execute_itype(sim: &mut Simulator, i: IType, pc: u32) -> Result<Flow, Fault> {
    let rs = sim.registers.read(i.rs).expect("rs is a 5-bit field");
    let imm_se = sign_extend16(i.imm);
    let branch_target = |offset: u32| pc.wrapping_add(4).wrapping_add(offset << 2);

    Ok(match i.op {
        OP_ADDI | OP_ADDIU => {
            set_rd(sim, i.rt, rs.wrapping_add(imm_se))?;
            Flow::Next
        }
        OP_SLTI => {
            set_rd(sim, i.rt, u32::from(as_signed(rs) < i32::from(i.imm as i16)))?;
            Flow::Next
        }
        OP_SLTIU => {
            set_rd(sim, i.rt, u32::from(rs < imm_se))?;
            Flow::Next
        }
        OP_ANDI => {
            set_rd(sim, i.rt, rs & u32::from(i.imm))?;
            Flow::Next
        }
        OP_ORI => {
            set_rd(sim, i.rt, rs | u32::from(i.imm))?;
            Flow::Next
        }
        OP_XORI => {
            set_rd(sim, i.rt, rs ^ u32::from(i.imm))?;
            Flow::Next
        }
        OP_LUI => {
            set_rd(sim, i.rt, u32::from(i.imm) << 16)?;
            Flow::Next
        }
        OP_BEQ => {
            if rs == sim.registers.read(i.rt).expect("rt is a 5-bit field") {
                Flow::Jump(branch_target(imm_se))
            } else {
                Flow::Next
            }
        }
        OP_BNE => {
            if rs != sim.registers.read(i.rt).expect("rt is a 5-bit field") {
                Flow::Jump(branch_target(imm_se))
            } else {
                Flow::Next
            }
        }
        OP_BLEZ => {
            if as_signed(rs) <= 0 {
                Flow::Jump(branch_target(imm_se))
            } else {
                Flow::Next
            }
        }
        OP_BGTZ => {
            if as_signed(rs) > 0 {
                Flow::Jump(branch_target(imm_se))
            } else {
                Flow::Next
            }
        }
        OP_LW => {
            let addr = rs.wrapping_add(imm_se);
            let word = sim.address_space.fetch_word(addr)?;
            set_rd(sim, i.rt, word)?;
            Flow::Next
        }
        OP_SW => {
            let addr = rs.wrapping_add(imm_se);
            let value = sim.registers.read(i.rt).expect("rt is a 5-bit field");
            sim.address_space.store_word(addr, value)?;
            Flow::Next
        }
        OP_LB => {
            // Zero-extended, not sign-extended, and the byte lane is
            // selected from the effective address rather than the raw
            // immediate.
            let addr = rs.wrapping_add(imm_se);
            let byte = sim.address_space.load_byte(addr)?;
            set_rd(sim, i.rt, u32::from(byte))?;
            Flow::Next
        }
        OP_SB => {
            let addr = rs.wrapping_add(imm_se);
            let value = sim.registers.read(i.rt).expect("rt is a 5-bit field");
            sim.address_space.store_byte(addr, (value & 0xff) as u8)?;
            Flow::Next
        }
        other => unreachable!("decode only produces recognised i-type opcodes, got 0x{other:02x}"),
    })
}

fn execute_jtype(sim: &mut Simulator, j: JType, pc: u32) -> Flow {
    // The upper bits come from the jump instruction's own pc, not pc + 4.
    let target = (pc & 0xf000_0000) | (j.addr << 2);
    if j.op == OP_JAL {
        set_rd(sim, crate::registers::alias::RA, pc.wrapping_add(8))
            .expect("ra is a valid register index");
    }
    Flow::Jump(target)
}

fn execute_regimm(sim: &mut Simulator, r: RegImm, pc: u32) -> Flow {
    let rs = sim.registers.read(r.rs).expect("rs is a 5-bit field");
    let taken = match r.selector {
        RT_BLTZ | RT_BLTZAL => as_signed(rs) < 0,
        RT_BGEZ | RT_BGEZAL => as_signed(rs) >= 0,
        other => unreachable!("decode only produces recognised regimm selectors, got 0x{other:02x}"),
    };
    if !taken {
        return Flow::Next;
    }
    // ra is linked only on the taken path, not unconditionally.
    if matches!(r.selector, RT_BLTZAL | RT_BGEZAL) {
        set_rd(sim, crate::registers::alias::RA, pc.wrapping_add(8))
            .expect("ra is a valid register index");
    }
    let offset = sign_extend16(r.imm);
    Flow::Jump(pc.wrapping_add(4).wrapping_add(offset << 2))
}

fn set_rd(sim: &mut Simulator, rd: u8, value: u32) -> Result<(), Fault> {
    sim.registers
        .write(rd, value)
        .expect("rd is always a valid 5-bit register index");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_space::{AddressSpace, Region};
    use crate::registers::alias;
    use crate::simulator::Context;
    use std::io::Cursor;

    fn sim_at(pc: u32, words: Vec<u32>) -> Simulator {
        let space = AddressSpace::new(vec![Region::new(pc, words)]);
        Simulator::new(space, Context { pc })
    }

    fn step(sim: &mut Simulator) -> StepOutcome {
        let word = sim.address_space.fetch_word(sim.pc).unwrap();
        let instr = Instr::decode(word).unwrap();
        let mut out = Vec::new();
        let mut in_ = Cursor::new(Vec::new());
        execute(sim, instr, &mut out, &mut in_).unwrap()
    }

    fn rtype(rs: u8, rt: u8, rd: u8, shamt: u8, func: u32) -> u32 {
        (u32::from(rs) << 21)
            | (u32::from(rt) << 16)
            | (u32::from(rd) << 11)
            | (u32::from(shamt) << 6)
            | func
    }

    fn itype(op: u32, rs: u8, rt: u8, imm: u16) -> u32 {
        (op << 26) | (u32::from(rs) << 21) | (u32::from(rt) << 16) | u32::from(imm)
    }

    #[test]
    fn add_sums_two_registers() {
        let mut sim = sim_at(0x1000, vec![rtype(1, 2, 3, 0, FUNC_ADD)]);
        sim.registers.write(1, 5).unwrap();
        sim.registers.write(2, 7).unwrap();
        step(&mut sim);
        assert_eq!(sim.registers.read(3).unwrap(), 12);
        assert_eq!(sim.pc, 0x1004);
    }

    #[test]
    fn sra_is_arithmetic_not_logical() {
        let mut sim = sim_at(0x1000, vec![rtype(0, 1, 2, 4, FUNC_SRA)]);
        sim.registers.write(1, 0x8000_0000).unwrap();
        step(&mut sim);
        assert_eq!(sim.registers.read(2).unwrap(), 0xf800_0000);
    }

    #[test]
    fn mult_writes_lo_only() {
        let mut sim = sim_at(0x1000, vec![rtype(1, 2, 0, 0, FUNC_MULT)]);
        sim.registers.write(1, 1_000_000).unwrap();
        sim.registers.write(2, 1_000_000).unwrap();
        sim.registers.hi = 0xdead_beef;
        step(&mut sim);
        assert_eq!(sim.registers.hi, 0xdead_beef);
        assert_eq!(
            sim.registers.lo,
            (1_000_000i64 * 1_000_000i64) as u32
        );
    }

    #[test]
    fn div_by_zero_is_fatal() {
        let mut sim = sim_at(0x1000, vec![rtype(1, 2, 0, 0, FUNC_DIV)]);
        sim.registers.write(1, 10).unwrap();
        sim.registers.write(2, 0).unwrap();
        let word = sim.address_space.fetch_word(sim.pc).unwrap();
        let instr = Instr::decode(word).unwrap();
        let mut out = Vec::new();
        let mut in_ = Cursor::new(Vec::new());
        assert_eq!(
            execute(&mut sim, instr, &mut out, &mut in_),
            Err(Fault::DivisionByZero { pc: 0x1000 })
        );
    }

    #[test]
    fn lb_zero_extends() {
        let space = AddressSpace::new(vec![
            Region::new(0x1000, vec![itype(OP_LB, 1, 2, 0)]),
            Region::new(0x2000, vec![0xffff_ff80]),
        ]);
        let mut sim = Simulator::new(space, Context { pc: 0x1000 });
        sim.registers.write(1, 0x2000).unwrap();
        step(&mut sim);
        assert_eq!(sim.registers.read(2).unwrap(), 0x80);
    }

    #[test]
    fn beq_taken_jumps_to_branch_target() {
        let mut sim = sim_at(0x1000, vec![itype(OP_BEQ, 1, 2, 2)]);
        sim.registers.write(1, 9).unwrap();
        sim.registers.write(2, 9).unwrap();
        step(&mut sim);
        assert_eq!(sim.pc, 0x1000 + 4 + (2 << 2));
    }

    #[test]
    fn beq_not_taken_falls_through() {
        let mut sim = sim_at(0x1000, vec![itype(OP_BEQ, 1, 2, 2)]);
        sim.registers.write(1, 9).unwrap();
        sim.registers.write(2, 10).unwrap();
        step(&mut sim);
        assert_eq!(sim.pc, 0x1004);
    }

    #[test]
    fn jal_links_ra_and_jumps() {
        let word = (OP_JAL << 26) | 0x10;
        let mut sim = sim_at(0x0040_0000, vec![word]);
        step(&mut sim);
        assert_eq!(sim.registers.read(alias::RA).unwrap(), 0x0040_0008);
        assert_eq!(sim.pc, 0x0000_0040);
    }

    #[test]
    fn jr_jumps_without_pc_plus_four() {
        let mut sim = sim_at(0x1000, vec![rtype(5, 0, 0, 0, FUNC_JR)]);
        sim.registers.write(5, 0x2000).unwrap();
        step(&mut sim);
        assert_eq!(sim.pc, 0x2000);
    }

    #[test]
    fn bltzal_links_ra_only_when_taken() {
        let word = itype(OP_REGIMM, 1, RT_BLTZAL as u8, 4);
        let mut sim = sim_at(0x1000, vec![word]);
        sim.registers.write(1, 5).unwrap();
        step(&mut sim);
        assert_eq!(sim.registers.read(alias::RA).unwrap(), 0);
        assert_eq!(sim.pc, 0x1004);

        let mut sim = sim_at(0x1000, vec![word]);
        sim.registers.write(1, u32::MAX).unwrap();
        step(&mut sim);
        assert_eq!(sim.registers.read(alias::RA).unwrap(), 0x1008);
    }

    #[test]
    fn sb_then_lb_round_trips_through_memory() {
        // sb t1, 1(t0); lb t2, 1(t0)
        let space = AddressSpace::new(vec![
            Region::new(0x0040_0000, vec![itype(OP_SB, 4, 9, 1), itype(OP_LB, 4, 10, 1)]),
            Region::new(0x2000, vec![0]),
        ]);
        let mut sim = Simulator::new(space, Context { pc: 0x0040_0000 });
        sim.registers.write(4, 0x2000).unwrap();
        sim.registers.write(9, 0x7f).unwrap();
        step(&mut sim);
        step(&mut sim);
        assert_eq!(sim.registers.read(10).unwrap(), 0x7f);
    }
}
