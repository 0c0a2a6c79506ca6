//! Block builder.

use alloc::string::String;
use alloc::vec::Vec;

use ir::{BinOp, BlockId, CompareKind, FunctionId, InstHandle, InstKind, Unit, Value};

/// Builder for appending instructions to one block.
pub struct BlockBuilder<'a> {
    unit: &'a mut Unit,
    function: FunctionId,
    block: BlockId,
}

impl<'a> BlockBuilder<'a> {
    pub(crate) fn new(unit: &'a mut Unit, function: FunctionId, block: BlockId) -> Self {
        Self { unit, function, block }
    }

    fn push(&mut self, data: InstKind) -> InstHandle {
        self.unit.append_inst(self.function, self.block, data)
    }

    // Arithmetic and comparison instructions.

    pub fn add(&mut self, result: Value, lhs: Value, rhs: Value) -> InstHandle {
        self.push(InstKind::Binary { op: BinOp::Add, result, lhs, rhs })
    }

    pub fn sub(&mut self, result: Value, lhs: Value, rhs: Value) -> InstHandle {
        self.push(InstKind::Binary { op: BinOp::Sub, result, lhs, rhs })
    }

    pub fn cmp(&mut self, kind: CompareKind, result: Value, lhs: Value, rhs: Value) -> InstHandle {
        self.push(InstKind::Binary { op: BinOp::Compare(kind), result, lhs, rhs })
    }

    // Data movement and memory instructions.

    pub fn copy(&mut self, dst: Value, src: Value) -> InstHandle {
        self.push(InstKind::Copy { dst, src })
    }

    pub fn load(&mut self, result: Value, address: Value) -> InstHandle {
        self.push(InstKind::Load { result, address })
    }

    pub fn store(&mut self, address: Value, value: Value) -> InstHandle {
        self.push(InstKind::Store { address, value })
    }

    pub fn call(&mut self, callee: &str, args: Vec<Value>, result: Value) -> InstHandle {
        self.push(InstKind::Call { callee: String::from(callee), args, result })
    }

    // Control flow instructions. Each of these is a terminator and must be
    // the last instruction appended to this block (§3 invariant 1).

    pub fn branch(&mut self, target: BlockId) -> InstHandle {
        self.push(InstKind::Branch { target })
    }

    pub fn cond_branch(&mut self, cond: Value, target_true: BlockId, target_false: BlockId) -> InstHandle {
        self.push(InstKind::CondBranch { cond, target_true, target_false })
    }

    pub fn ret(&mut self, value: Option<Value>) -> InstHandle {
        self.push(InstKind::Ret { value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit_builder::UnitBuilder;

    #[test]
    fn cond_branch_is_recorded_as_block_terminator() {
        let mut ub = UnitBuilder::new();
        let mut fb = ub.declare_function("f", 1);
        let entry = fb.append_block();
        let then_blk = fb.append_block();
        let else_blk = fb.append_block();
        let cond = fb.argument(0);
        {
            let mut bb = fb.block_builder(entry);
            bb.cond_branch(cond, then_blk, else_blk);
        }
        {
            let mut bb = fb.block_builder(then_blk);
            bb.ret(None);
        }
        {
            let mut bb = fb.block_builder(else_blk);
            bb.ret(None);
        }
        let unit = ub.finish();
        let func = unit.function(unit.find_function("f").unwrap());
        let term = func.terminator(entry).unwrap();
        assert!(matches!(func.inst(term), InstKind::CondBranch { .. }));
    }

    #[test]
    fn call_records_callee_name_and_args() {
        let mut ub = UnitBuilder::new();
        let mut fb = ub.declare_function("caller", 1);
        let entry = fb.append_block();
        let arg = fb.argument(0);
        let result = fb.new_virtual();
        {
            let mut bb = fb.block_builder(entry);
            bb.call("callee", alloc::vec![arg], result);
            bb.ret(Some(result));
        }
        let unit = ub.finish();
        let func = unit.function(unit.find_function("caller").unwrap());
        let first = func.insts_in(entry).next().unwrap();
        assert!(matches!(
            func.inst(first),
            InstKind::Call { callee, .. } if callee == "callee"
        ));
    }
}
