//! x86-64 machine instruction encoder.
//!
//! This crate knows nothing about the IR or register allocation; it takes
//! fully-selected [`MachineInst`]s (registers assigned, branch targets
//! already resolved to byte offsets) and produces the corresponding
//! instruction bytes.

#![no_std]

extern crate alloc;

mod encode;
mod inst;
mod regs;

pub use encode::{encode, encode_all, EncodedInst};
pub use inst::{MachineInst, Opcode, Operand};
pub use regs::Reg;
