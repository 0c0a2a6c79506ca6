//! The encoder driver (§4.H): resolves every still-symbolic branch/call
//! target in a [`MachineProgram`] to a byte displacement in two passes, then
//! emits the final flat instruction stream.
//!
//! Pass 1 walks the selected instructions left to right, encoding each one
//! with a zero stub in place of any unresolved target to learn its length
//! (branch/call opcodes here are fixed-length regardless of the
//! displacement's value, so a stub of zero never itself trips a range
//! error) and recording where it starts. Pass 2 revisits every instruction
//! with a `Target::Index`, computes the real displacement from the two
//! recorded offsets, and encodes for real.

use alloc::vec::Vec;

use x64_encoder::{MachineInst, Operand};

use crate::error::BackendError;
use crate::select::{MachineProgram, SelInst, SelOperand, Target};

/// Encode a fully-selected program into its final byte stream.
pub fn encode(program: &MachineProgram) -> Result<Vec<u8>, BackendError> {
    let mut starts: Vec<u32> = Vec::with_capacity(program.insts.len());
    let mut offset: u32 = 0;
    for inst in &program.insts {
        starts.push(offset);
        let stub = to_machine_inst(inst, 0);
        let len = x64_encoder::encode(&stub)?.len();
        offset += len as u32;
    }

    let mut bytes = Vec::with_capacity(offset as usize);
    for (i, inst) in program.insts.iter().enumerate() {
        let displacement = branch_displacement(inst, &starts, i);
        let machine = to_machine_inst(inst, displacement);
        let encoded = x64_encoder::encode(&machine)?;
        bytes.extend_from_slice(encoded.as_slice());
    }

    Ok(bytes)
}

fn branch_displacement(inst: &SelInst, starts: &[u32], index: usize) -> i32 {
    for operand in inst.operands.iter().flatten() {
        if let SelOperand::Target(Target::Index(target)) = operand {
            return starts[*target] as i32 - starts[index] as i32;
        }
    }
    0
}

fn to_machine_inst(inst: &SelInst, displacement: i32) -> MachineInst {
    let mut machine = MachineInst::new(inst.opcode, inst.operand_width);
    for (slot, operand) in inst.operands.iter().enumerate() {
        if let Some(operand) = operand {
            machine = machine.with_operand(slot, to_operand(*operand, displacement));
        }
    }
    machine
}

fn to_operand(operand: SelOperand, displacement: i32) -> Operand {
    match operand {
        SelOperand::Reg(reg) => Operand::Reg(reg),
        SelOperand::Imm(imm) => Operand::Imm(imm),
        SelOperand::BaseDisp { base, disp } => Operand::BaseDisp { base, disp },
        SelOperand::Target(_) => Operand::Off(displacement),
    }
}
