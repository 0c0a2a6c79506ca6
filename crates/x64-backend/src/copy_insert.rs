//! Copy insertion (§4.D): rewrites Binary, Call, CondBranch, and Ret
//! operands so that every value the register allocator must place in a
//! specific or freely-chosen register flows through an explicit [`Copy`]
//! instruction, ported from the source's `CopyInserter.cc` almost verbatim.

use alloc::vec::Vec;

use ir::{FunctionId, InstHandle, InstKind, Unit};

use crate::abi::{ARGUMENT_REGISTERS, RETURN_REGISTER};
use crate::error::BackendError;

/// Walk `func`'s instructions in program order and insert the copies §4.D
/// requires. Instructions created by this pass are never themselves
/// revisited: the instruction list is snapshotted up front, matching the
/// source's trick of advancing its iterator past the copies it just
/// inserted before a call.
pub fn insert_copies(unit: &mut Unit, func: FunctionId) -> Result<(), BackendError> {
    let insts: Vec<InstHandle> = unit
        .function(func)
        .blocks()
        .flat_map(|(block, _)| unit.function(func).insts_in(block))
        .collect();

    for inst in insts {
        let kind = unit.function(func).inst(inst).clone();
        match kind {
            InstKind::Binary { lhs, .. } => {
                let vnew = unit.new_virtual();
                unit.insert_inst_before(func, inst, InstKind::Copy { dst: vnew, src: lhs });
                unit.set_use(func, inst, 0, vnew);
            }
            InstKind::CondBranch { cond, .. } => {
                let vnew = unit.new_virtual();
                unit.insert_inst_before(func, inst, InstKind::Copy { dst: vnew, src: cond });
                unit.set_use(func, inst, 0, vnew);
            }
            InstKind::Ret { value: Some(value) } => {
                let phys = unit.physical(RETURN_REGISTER);
                unit.insert_inst_before(func, inst, InstKind::Copy { dst: phys, src: value });
                unit.set_use(func, inst, 0, phys);
            }
            InstKind::Ret { value: None } => {}
            InstKind::Call { callee, args, result } => {
                if args.len() > ARGUMENT_REGISTERS.len() {
                    return Err(BackendError::TooManyArguments {
                        function: unit.function(func).name().into(),
                        callee,
                    });
                }
                for (index, arg) in args.iter().enumerate() {
                    let phys = unit.physical(ARGUMENT_REGISTERS[index]);
                    unit.insert_inst_before(func, inst, InstKind::Copy { dst: phys, src: *arg });
                }
                // The call's own argument references are left untouched
                // (not rewritten to the argument-register copies' results):
                // the copies already realized the calling convention, and
                // instruction selection never consults Call's argument list.
                let ret_phys = unit.physical(RETURN_REGISTER);
                unit.insert_inst_after(func, inst, InstKind::Copy { dst: result, src: ret_phys });
                unit.set_result(func, inst, ret_phys);
            }
            InstKind::Copy { .. } => {
                return Err(BackendError::CopyInsertionAlreadyRan {
                    function: unit.function(func).name().into(),
                });
            }
            InstKind::Branch { .. } | InstKind::Load { .. } | InstKind::Store { .. } => {}
        }
    }

    Ok(())
}
