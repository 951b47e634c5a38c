//! The top-level fetch-decode-execute loop.
//!
//! A [`Simulator`] owns every piece of mutable state for one run: the
//! address space, the register file (including HI/LO), the program
//! counter, the retired-instruction counter, and the timing fields, rather
//! than scattering that state across process-wide globals.

use std::io::{BufRead, Write};
use std::time::{Duration, Instant};

use crate::address_space::AddressSpace;
use crate::decode::Instr;
use crate::error::Fault;
use crate::exec;
use crate::registers::Registers;

/// Initial CPU state handed in by the loader collaborator: just the entry
/// point, since the register file and HI/LO start at zero the way a
/// freshly reset MIPS core does.
#[derive(Debug, Clone, Copy)]
pub struct Context {
    pub pc: u32,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub instruction_count: u64,
    pub elapsed_nanos: u64,
}

/// Why the loop stopped. `Exited` is the only non-fatal reason; everything
/// else is a fault that should be reported and the process exited with
/// status 1.
#[derive(Debug)]
pub enum Halt {
    Exited(RunReport),
    Fault { fault: Fault, pc: u32 },
}

pub struct Simulator {
    pub address_space: AddressSpace,
    pub registers: Registers,
    pub pc: u32,
    instruction_count: u64,
    start: Option<Instant>,
    skip: Duration,
}

impl Simulator {
    pub fn new(address_space: AddressSpace, context: Context) -> Self {
        Self {
            address_space,
            registers: Registers::default(),
            pc: context.pc,
            instruction_count: 0,
            start: None,
            skip: Duration::ZERO,
        }
    }

    pub fn instruction_count(&self) -> u64 {
        self.instruction_count
    }

    /// Run one blocking read through `read`, measuring and accumulating the
    /// time spent so it can be subtracted from the reported elapsed time:
    /// time spent awaiting input is not counted.
    pub(crate) fn time_skipped<T>(&mut self, read: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = read();
        self.skip += start.elapsed();
        result
    }

    /// Drive fetch-decode-execute to completion: either the `exit` syscall
    /// fires (returns `Halt::Exited`) or a fault terminates the run
    /// (returns `Halt::Fault`). `out`/`in_` are the syscall handler's
    /// standard output/input streams.
    pub fn run(&mut self, out: &mut impl Write, in_: &mut impl BufRead) -> Halt {
        self.start = Some(Instant::now());
        loop {
            let pc = self.pc;
            match self.step(out, in_) {
                Ok(StepOutcome::Continue) => {
                    self.instruction_count += 1;
                }
                Ok(StepOutcome::Exit) => {
                    self.instruction_count += 1;
                    let elapsed = self.start.expect("run sets start before stepping").elapsed();
                    let elapsed_nanos = elapsed.saturating_sub(self.skip).as_nanos() as u64;
                    return Halt::Exited(RunReport {
                        instruction_count: self.instruction_count,
                        elapsed_nanos,
                    });
                }
                Err(fault) => return Halt::Fault { fault, pc },
            }
        }
    }

    fn step(&mut self, out: &mut impl Write, in_: &mut impl BufRead) -> Result<StepOutcome, Fault> {
        self.registers.clear_zero_register();

        if self.pc % 4 != 0 {
            return Err(Fault::MisalignedFetch(self.pc));
        }
        let word = self.address_space.fetch_word(self.pc)?;
        let instr = Instr::decode(word)?;
        let outcome = exec::execute(self, instr, out, in_)?;

        self.registers.clear_zero_register();
        Ok(outcome)
    }
}

/// What a single executed instruction asks the loop to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    Exit,
}
