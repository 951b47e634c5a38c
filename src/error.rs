//! Every fault the core can encounter while executing an instruction is
//! folded into [`Fault`], the way `hart.rs`-style interpreters fold a
//! decode error and an execution error into a single trap type that the
//! top-level loop matches on to decide whether to keep stepping.

use thiserror::Error;

use crate::address_space::MemoryFault;
use crate::decode::DecodeFault;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Fault {
    #[error(transparent)]
    Memory(#[from] MemoryFault),
    #[error(transparent)]
    Decode(#[from] DecodeFault),
    #[error("instruction fetch at 0x{0:08x} is not 4-byte aligned")]
    MisalignedFetch(u32),
    #[error("division by zero at pc 0x{pc:08x}")]
    DivisionByZero { pc: u32 },
}
