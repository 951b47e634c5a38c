//! Syscall dispatch, reached through the `syscall` instruction (func code
//! `FUNC_SYSCALL`). The call number lives in `$v0` (register 2); arguments
//! follow the regular calling convention (`$a0`, `$a1`, ...).
//!
//! Unknown call numbers are ignored rather than raising a fault: the loop
//! just advances past the `syscall` instruction as if it were a no-op.

use std::io::{BufRead, Write};

use crate::error::Fault;
use crate::registers::alias::{A0, A1, V0};
use crate::simulator::{Simulator, StepOutcome};

const PRINT_INT: u32 = 1;
const PRINT_STRING: u32 = 4;
const READ_INT: u32 = 5;
const READ_STRING: u32 = 8;
const EXIT: u32 = 10;

pub fn dispatch(
    sim: &mut Simulator,
    out: &mut impl Write,
    in_: &mut impl BufRead,
) -> Result<StepOutcome, Fault> {
    let code = sim.registers.read(V0).expect("v0 is a valid register");
    match code {
        PRINT_INT => {
            let value = sim.registers.read(A0).expect("a0 is a valid register");
            write!(out, "{}", value as i32).ok();
            Ok(StepOutcome::Continue)
        }
        PRINT_STRING => {
            print_string(sim, out)?;
            Ok(StepOutcome::Continue)
        }
        READ_INT => {
            let line = sim.time_skipped(|| read_line(in_));
            // End-of-input or unparsable input leaves v0 untouched, the
            // way `scanf("%d", ...)` leaves its target alone on a failed
            // match.
            if let Ok(value) = line.trim().parse::<i32>() {
                sim.registers
                    .write(V0, value as u32)
                    .expect("v0 is a valid register");
            }
            Ok(StepOutcome::Continue)
        }
        READ_STRING => {
            read_string(sim, in_)?;
            Ok(StepOutcome::Continue)
        }
        EXIT => Ok(StepOutcome::Exit),
        _ => Ok(StepOutcome::Continue),
    }
}

fn read_line(in_: &mut impl BufRead) -> String {
    let mut line = String::new();
    in_.read_line(&mut line).ok();
    line
}

/// Print the NUL-terminated string at the address in `$a0`, one word (four
/// bytes, low byte first) at a time, stopping at the first zero byte.
fn print_string(sim: &mut Simulator, out: &mut impl Write) -> Result<(), Fault> {
    let mut addr = sim.registers.read(A0).expect("a0 is a valid register");
    'outer: loop {
        let word = sim.address_space.fetch_word(addr & !0b11)?;
        let start_lane = addr & 0b11;
        for lane in start_lane..4 {
            let byte = ((word >> (lane * 8)) & 0xff) as u8;
            if byte == 0 {
                break 'outer;
            }
            out.write_all(&[byte]).ok();
        }
        addr = (addr & !0b11).wrapping_add(4);
    }
    Ok(())
}

/// Read a line from `in_` into the buffer at `$a0`, bounded by the byte
/// count in `$a1`, NUL-terminated like `fgets`.
///
/// The lane selector for each byte is `addr % 4`, not a fixed loop counter:
/// a prior revision of this routine kept a separate counter that diverged
/// from the address once a caller passed an unaligned buffer, writing the
/// terminator into the wrong lane.
fn read_string(sim: &mut Simulator, in_: &mut impl BufRead) -> Result<(), Fault> {
    let base = sim.registers.read(A0).expect("a0 is a valid register");
    let max_len = sim.registers.read(A1).expect("a1 is a valid register") as usize;
    let line = sim.time_skipped(|| read_line(in_));
    let bytes = line.trim_end_matches(['\n', '\r']).as_bytes();

    if max_len == 0 {
        return Ok(());
    }
    let copy_len = bytes.len().min(max_len - 1);
    for (i, &byte) in bytes[..copy_len].iter().enumerate() {
        store_byte_at(sim, base.wrapping_add(i as u32), byte)?;
    }
    store_byte_at(sim, base.wrapping_add(copy_len as u32), 0)?;
    Ok(())
}

fn store_byte_at(sim: &mut Simulator, addr: u32, byte: u8) -> Result<(), Fault> {
    sim.address_space.store_byte(addr, byte)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_space::{AddressSpace, Region};
    use crate::decode::Instr;
    use crate::simulator::{Context, Halt};
    use std::io::Cursor;

    fn syscall_word() -> u32 {
        0x0000_000c
    }

    fn li(rt: u8, imm: u16) -> u32 {
        // addiu rt, zero, imm
        (0x09 << 26) | (u32::from(rt) << 16) | u32::from(imm)
    }

    #[test]
    fn print_int_writes_decimal() {
        let program = vec![li(V0, PRINT_INT as u16), li(A0, 42), syscall_word(), li(V0, EXIT as u16), syscall_word()];
        let space = AddressSpace::new(vec![Region::new(0x0040_0000, program)]);
        let mut sim = Simulator::new(space, Context { pc: 0x0040_0000 });
        let mut out = Vec::new();
        let mut in_ = Cursor::new(Vec::new());
        match sim.run(&mut out, &mut in_) {
            Halt::Exited(_) => {}
            other => panic!("expected exit, got {other:?}"),
        }
        assert_eq!(String::from_utf8(out).unwrap(), "42");
    }

    #[test]
    fn print_string_stops_at_nul() {
        let base = 0x1000u32;
        let mut words = vec![
            li(V0, PRINT_STRING as u16),
            li(A0, 0),
            syscall_word(),
            li(V0, EXIT as u16),
            syscall_word(),
        ];
        // patch the li a0 immediate to point at the data word below; the
        // address fits in 16 unsigned bits so sign extension is a no-op.
        let data_addr = base + (words.len() as u32) * 4;
        words[1] = li(A0, data_addr as u16);
        words.push(u32::from_le_bytes([b'H', b'I', 0, 0]));
        let space = AddressSpace::new(vec![Region::new(base, words)]);
        let mut sim = Simulator::new(space, Context { pc: base });
        let mut out = Vec::new();
        let mut in_ = Cursor::new(Vec::new());
        sim.run(&mut out, &mut in_);
        assert_eq!(String::from_utf8(out).unwrap(), "HI");
    }

    #[test]
    fn read_string_strips_the_trailing_newline() {
        let buf_addr = 0x2000u32;
        let program = vec![
            li(V0, READ_STRING as u16),
            li(A0, buf_addr as u16),
            li(A1, 8),
            syscall_word(),
            li(V0, EXIT as u16),
            syscall_word(),
        ];
        let space = AddressSpace::new(vec![
            Region::new(0x0040_0000, program),
            Region::new(buf_addr, vec![0xffff_ffff, 0xffff_ffff]),
        ]);
        let mut sim = Simulator::new(space, Context { pc: 0x0040_0000 });
        let mut out = Vec::new();
        let mut in_ = Cursor::new(b"hi\r\n".to_vec());
        match sim.run(&mut out, &mut in_) {
            Halt::Exited(_) => {}
            other => panic!("expected exit, got {other:?}"),
        }
        let word0 = sim.address_space.fetch_word(buf_addr).unwrap();
        let bytes = word0.to_le_bytes();
        assert_eq!(&bytes, &[b'h', b'i', 0, 0xff]);
    }

    #[test]
    fn unknown_syscall_is_a_noop() {
        let program = vec![li(V0, 999), syscall_word(), li(V0, EXIT as u16), syscall_word()];
        let space = AddressSpace::new(vec![Region::new(0x0040_0000, program)]);
        let mut sim = Simulator::new(space, Context { pc: 0x0040_0000 });
        let mut out = Vec::new();
        let mut in_ = Cursor::new(Vec::new());
        match sim.run(&mut out, &mut in_) {
            Halt::Exited(report) => assert_eq!(report.instruction_count, 4),
            other => panic!("expected exit, got {other:?}"),
        }
    }

    #[test]
    fn exit_reports_instruction_count_of_itself() {
        let program = vec![li(V0, EXIT as u16), syscall_word()];
        let space = AddressSpace::new(vec![Region::new(0x0040_0000, program)]);
        let mut sim = Simulator::new(space, Context { pc: 0x0040_0000 });
        let mut out = Vec::new();
        let mut in_ = Cursor::new(Vec::new());
        match sim.run(&mut out, &mut in_) {
            Halt::Exited(report) => assert_eq!(report.instruction_count, 2),
            other => panic!("expected exit, got {other:?}"),
        }
    }

    #[test]
    fn decode_accepts_the_syscall_word() {
        Instr::decode(syscall_word()).unwrap();
    }
}
