//! Instruction selection (§4.G): lowers one function at a time, post copy
//! insertion and register allocation, into a flat ordered sequence of
//! [`SelInst`]s with symbolic branch/call targets still unresolved.
//!
//! The lowering table's "Compare + CondBranch fused" row reads, on this
//! encoder, as two independent rows instead of one: the encoder only knows
//! `Je`/`Jne`/`Jmp` (no `Jl`/`Jg`/...), so a Compare always materializes its
//! 0/1 boolean into a register via `CMP` + `SETcc`, and a CondBranch always
//! tests that boolean against zero. See DESIGN.md's resolved open question.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use ir::{BinOp, BlockId, CompareKind, FunctionId, InstKind, Unit, Value, ValueData};
use x64_encoder::{Opcode, Reg};

use crate::error::BackendError;
use crate::frame::FrameLayout;

/// One operand of a [`SelInst`]: identical to [`x64_encoder::Operand`]
/// except that a branch/call target is a symbolic [`Target`] rather than an
/// already-resolved byte displacement.
#[derive(Debug, Clone, Copy)]
pub enum SelOperand {
    Reg(Reg),
    Imm(i64),
    BaseDisp { base: Reg, disp: i8 },
    Target(Target),
}

/// A branch or call target, in whatever form is known at the point it is
/// created. [`select_and_compile`] resolves every `Block` target by the time
/// its own function is done, and every `Function` target once the whole
/// unit has been selected; only fully-resolved `Index` targets reach
/// [`crate::link::encode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The first selected instruction of a block, within the function
    /// currently being lowered.
    Block(BlockId),
    /// The first selected instruction of a function, anywhere in the unit.
    Function(FunctionId),
    /// A fully-resolved index into [`MachineProgram::insts`].
    Index(usize),
}

#[derive(Debug, Clone)]
pub struct SelInst {
    pub opcode: Opcode,
    pub operand_width: u8,
    pub operands: [Option<SelOperand>; 2],
}

impl SelInst {
    fn new(opcode: Opcode, operand_width: u8) -> Self {
        Self { opcode, operand_width, operands: [None, None] }
    }

    fn with(mut self, index: usize, operand: SelOperand) -> Self {
        self.operands[index] = Some(operand);
        self
    }
}

/// A fully-selected program: one flat instruction stream across every
/// function in the unit, plus where each function's body starts.
pub struct MachineProgram {
    pub insts: Vec<SelInst>,
    pub function_entry: BTreeMap<String, usize>,
}

/// Run instruction selection over every function in `unit`.
///
/// Must run after [`crate::regalloc::register_allocate`]: selection expects
/// every non-constant operand to already be a physical register (§3
/// invariant 6).
pub fn select_and_compile(unit: &Unit) -> Result<MachineProgram, BackendError> {
    let mut insts: Vec<SelInst> = Vec::new();
    let mut function_entry: BTreeMap<String, usize> = BTreeMap::new();
    let mut entry_by_id: BTreeMap<FunctionId, usize> = BTreeMap::new();

    for (func, function) in unit.functions() {
        let entry = insts.len();
        function_entry.insert(String::from(function.name()), entry);
        entry_by_id.insert(func, entry);
        let frame = FrameLayout::compute(unit, func);
        select_function(unit, func, &frame, &mut insts)?;
    }

    for inst in &mut insts {
        for operand in inst.operands.iter_mut().flatten() {
            if let SelOperand::Target(Target::Function(callee)) = operand {
                let index = entry_by_id[callee];
                *operand = SelOperand::Target(Target::Index(index));
            }
        }
    }

    Ok(MachineProgram { insts, function_entry })
}

fn select_function(
    unit: &Unit,
    func: FunctionId,
    frame: &FrameLayout,
    insts: &mut Vec<SelInst>,
) -> Result<(), BackendError> {
    let function = unit.function(func);
    let name = function.name();
    let block_ids: Vec<BlockId> = function.blocks().map(|(id, _)| id).collect();

    let start = insts.len();
    let mut block_entry: BTreeMap<BlockId, usize> = BTreeMap::new();

    if frame.has_prologue() {
        emit_prologue(frame, insts);
    }

    for (i, block) in block_ids.iter().enumerate() {
        block_entry.insert(*block, insts.len());
        let next_block = block_ids.get(i + 1).copied();
        for inst in function.insts_in(*block) {
            let kind = function.inst(inst).clone();
            select_inst(unit, name, frame, &kind, next_block, insts)?;
        }
    }

    // Every block target this function's own instructions could reference
    // is now known; forward branches resolve the same as backward ones.
    for inst in &mut insts[start..] {
        for operand in inst.operands.iter_mut().flatten() {
            if let SelOperand::Target(Target::Block(block)) = operand {
                *operand = SelOperand::Target(Target::Index(block_entry[block]));
            }
        }
    }

    Ok(())
}

fn select_inst(
    unit: &Unit,
    name: &str,
    frame: &FrameLayout,
    kind: &InstKind,
    next_block: Option<BlockId>,
    insts: &mut Vec<SelInst>,
) -> Result<(), BackendError> {
    reject_virtual_operands(unit, name, kind)?;

    match kind {
        InstKind::Copy { dst, src } => {
            let dst_reg = physical_reg(unit, *dst);
            match unit.value_data(*src) {
                ValueData::Constant(k) => {
                    insts.push(
                        SelInst::new(Opcode::Mov, 32)
                            .with(0, SelOperand::Reg(dst_reg))
                            .with(1, SelOperand::Imm(*k)),
                    );
                }
                _ => {
                    let src_reg = physical_reg(unit, *src);
                    if src_reg != dst_reg {
                        insts.push(
                            SelInst::new(Opcode::Mov, 32)
                                .with(0, SelOperand::Reg(dst_reg))
                                .with(1, SelOperand::Reg(src_reg)),
                        );
                    }
                }
            }
        }
        InstKind::Binary { op, result, lhs, rhs } => {
            select_binary(unit, *op, *result, *lhs, *rhs, insts);
        }
        InstKind::Branch { target } => {
            insts.push(SelInst::new(Opcode::Jmp, 64).with(0, SelOperand::Target(Target::Block(*target))));
        }
        InstKind::CondBranch { cond, target_true, target_false } => {
            select_cond_branch(unit, *cond, *target_true, *target_false, next_block, insts);
        }
        InstKind::Call { callee, .. } => {
            let callee_id = unit.find_function(callee).ok_or_else(|| BackendError::UnknownCallee {
                function: String::from(name),
                callee: callee.to_string(),
            })?;
            insts.push(
                SelInst::new(Opcode::Call, 64).with(0, SelOperand::Target(Target::Function(callee_id))),
            );
        }
        InstKind::Load { result, address } => {
            let result_reg = physical_reg(unit, *result);
            let base = physical_reg(unit, *address);
            reject_sib_base(name, base)?;
            insts.push(
                SelInst::new(Opcode::Mov, 64)
                    .with(0, SelOperand::Reg(result_reg))
                    .with(1, SelOperand::BaseDisp { base, disp: 0 }),
            );
        }
        InstKind::Store { address, value } => {
            let base = physical_reg(unit, *address);
            let value_reg = physical_reg(unit, *value);
            reject_sib_base(name, base)?;
            insts.push(
                SelInst::new(Opcode::Mov, 64)
                    .with(0, SelOperand::BaseDisp { base, disp: 0 })
                    .with(1, SelOperand::Reg(value_reg)),
            );
        }
        InstKind::Ret { .. } => {
            if frame.has_prologue() {
                emit_epilogue(frame, insts);
            } else {
                insts.push(SelInst::new(Opcode::Ret, 64));
            }
        }
    }

    Ok(())
}

fn select_binary(unit: &Unit, op: BinOp, result: Value, lhs: Value, rhs: Value, insts: &mut Vec<SelInst>) {
    let result_reg = physical_reg(unit, result);
    let lhs_reg = physical_reg(unit, lhs);

    match op {
        BinOp::Add | BinOp::Sub => {
            if result_reg != lhs_reg {
                insts.push(
                    SelInst::new(Opcode::Mov, 32)
                        .with(0, SelOperand::Reg(result_reg))
                        .with(1, SelOperand::Reg(lhs_reg)),
                );
            }
            let opcode = if matches!(op, BinOp::Add) { Opcode::Add } else { Opcode::Sub };
            insts.push(
                SelInst::new(opcode, 32)
                    .with(0, SelOperand::Reg(result_reg))
                    .with(1, rhs_operand(unit, rhs)),
            );
        }
        BinOp::Compare(kind) => {
            insts.push(
                SelInst::new(Opcode::Cmp, 32)
                    .with(0, SelOperand::Reg(lhs_reg))
                    .with(1, rhs_operand(unit, rhs)),
            );
            // `MOV result, 0` does not touch EFLAGS, so it is safe to run
            // between the CMP that sets the condition and the SETcc that
            // reads it -- even when `result` aliases `lhs` or `rhs`, both
            // already consumed by the CMP above.
            insts.push(
                SelInst::new(Opcode::Mov, 32)
                    .with(0, SelOperand::Reg(result_reg))
                    .with(1, SelOperand::Imm(0)),
            );
            insts.push(SelInst::new(setcc_opcode(kind), 8).with(0, SelOperand::Reg(result_reg)));
        }
    }
}

fn setcc_opcode(kind: CompareKind) -> Opcode {
    match kind {
        CompareKind::Eq => Opcode::Sete,
        CompareKind::Ne => Opcode::Setne,
        CompareKind::Lt => Opcode::Setl,
        CompareKind::Gt => Opcode::Setg,
        CompareKind::Le => Opcode::Setle,
        CompareKind::Ge => Opcode::Setge,
    }
}

fn select_cond_branch(
    unit: &Unit,
    cond: Value,
    target_true: BlockId,
    target_false: BlockId,
    next_block: Option<BlockId>,
    insts: &mut Vec<SelInst>,
) {
    let cond_reg = physical_reg(unit, cond);
    insts.push(
        SelInst::new(Opcode::Cmp, 32).with(0, SelOperand::Reg(cond_reg)).with(1, SelOperand::Imm(0)),
    );

    if next_block == Some(target_false) {
        insts.push(SelInst::new(Opcode::Jne, 64).with(0, SelOperand::Target(Target::Block(target_true))));
    } else if next_block == Some(target_true) {
        insts.push(SelInst::new(Opcode::Je, 64).with(0, SelOperand::Target(Target::Block(target_false))));
    } else {
        insts.push(SelInst::new(Opcode::Je, 64).with(0, SelOperand::Target(Target::Block(target_false))));
        insts.push(SelInst::new(Opcode::Jmp, 64).with(0, SelOperand::Target(Target::Block(target_true))));
    }
}

fn rhs_operand(unit: &Unit, value: Value) -> SelOperand {
    match unit.value_data(value) {
        ValueData::Constant(k) => SelOperand::Imm(*k),
        _ => SelOperand::Reg(physical_reg(unit, value)),
    }
}

fn physical_reg(unit: &Unit, value: Value) -> Reg {
    let number = unit.value_data(value).physical_number().unwrap_or_else(|| {
        panic!("instruction selection expected a physical register, got {:?}", unit.value_data(value))
    });
    crate::abi::encoder_reg(number)
}

/// RSP and R12 both need a SIB byte to appear as a `BaseDisp` base (their
/// ModR/M `rm` encoding is reserved for that purpose); this encoder never
/// emits one, so either one reaching a Load/Store's address operand is an
/// unsupported addressing mode rather than a silently wrong encoding.
fn reject_sib_base(name: &str, base: Reg) -> Result<(), BackendError> {
    if base == Reg::RSP || base == Reg::R12 {
        return Err(BackendError::UnsupportedAddressingMode {
            function: String::from(name),
            base: base.num() as u32,
        });
    }
    Ok(())
}

fn reject_virtual_operands(unit: &Unit, name: &str, kind: &InstKind) -> Result<(), BackendError> {
    for value in kind.uses().into_iter().chain(kind.results()) {
        if unit.value_data(value).is_virtual_register() {
            return Err(BackendError::UnsupportedIrShape {
                function: String::from(name),
                detail: String::from(
                    "a virtual register reached instruction selection (register allocation must run first)",
                ),
            });
        }
    }
    Ok(())
}

fn emit_prologue(frame: &FrameLayout, insts: &mut Vec<SelInst>) {
    insts.push(SelInst::new(Opcode::Push, 64).with(0, SelOperand::Reg(Reg::RBP)));
    insts.push(
        SelInst::new(Opcode::Mov, 64).with(0, SelOperand::Reg(Reg::RBP)).with(1, SelOperand::Reg(Reg::RSP)),
    );
    for &number in frame.callee_saved() {
        insts.push(SelInst::new(Opcode::Push, 64).with(0, SelOperand::Reg(crate::abi::encoder_reg(number))));
    }
}

fn emit_epilogue(frame: &FrameLayout, insts: &mut Vec<SelInst>) {
    for &number in frame.callee_saved().iter().rev() {
        insts.push(SelInst::new(Opcode::Pop, 64).with(0, SelOperand::Reg(crate::abi::encoder_reg(number))));
    }
    insts.push(SelInst::new(Opcode::Leave, 64));
    insts.push(SelInst::new(Opcode::Ret, 64));
}

#[cfg(test)]
mod tests {
    use super::*;
    use ir_builder::UnitBuilder;

    #[test]
    fn ret_of_a_constant_lowers_to_mov_then_ret() {
        let mut ub = UnitBuilder::new();
        let mut fb = ub.declare_function("f", 0);
        let entry = fb.append_block();
        let forty_two = fb.constant(42);
        {
            let mut bb = fb.block_builder(entry);
            bb.ret(Some(forty_two));
        }
        let mut unit = ub.finish();
        let func = unit.find_function("f").unwrap();
        crate::copy_insert::insert_copies(&mut unit, func).unwrap();
        crate::regalloc::register_allocate(&mut unit, func).unwrap();

        let program = select_and_compile(&unit).unwrap();
        assert_eq!(program.insts.len(), 2);
        assert!(matches!(program.insts[0].opcode, Opcode::Mov));
        assert!(matches!(program.insts[1].opcode, Opcode::Ret));
    }

    #[test]
    fn a_call_to_a_later_function_gets_a_resolved_target() {
        let mut ub = UnitBuilder::new();
        let mut caller = ub.declare_function("main", 0);
        let entry = caller.append_block();
        let result = caller.new_virtual();
        {
            let mut bb = caller.block_builder(entry);
            bb.call("callee", alloc::vec![], result);
            bb.ret(Some(result));
        }
        let mut callee = ub.declare_function("callee", 0);
        let callee_entry = callee.append_block();
        let five = callee.constant(5);
        {
            let mut bb = callee.block_builder(callee_entry);
            bb.ret(Some(five));
        }
        let mut unit = ub.finish();

        for (func, _) in unit.functions().map(|(f, func)| (f, func.name().to_string())).collect::<Vec<_>>()
        {
            crate::copy_insert::insert_copies(&mut unit, func).unwrap();
            crate::regalloc::register_allocate(&mut unit, func).unwrap();
        }

        let program = select_and_compile(&unit).unwrap();
        let call = program.insts.iter().find(|i| matches!(i.opcode, Opcode::Call)).unwrap();
        match call.operands[0] {
            Some(SelOperand::Target(Target::Index(idx))) => {
                assert_eq!(idx, program.function_entry["callee"]);
            }
            other => panic!("expected a resolved call target, got {other:?}"),
        }
    }

    #[test]
    fn unallocated_virtual_registers_are_rejected() {
        let mut ub = UnitBuilder::new();
        let mut fb = ub.declare_function("f", 0);
        let entry = fb.append_block();
        let v = fb.new_virtual();
        let one = fb.constant(1);
        {
            let mut bb = fb.block_builder(entry);
            bb.copy(v, one);
            bb.ret(Some(v));
        }
        let unit = ub.finish();

        let err = select_and_compile(&unit).unwrap_err();
        assert!(matches!(err, BackendError::UnsupportedIrShape { .. }));
    }

    #[test]
    fn a_load_addressed_through_rsp_is_rejected_rather_than_mis_encoded() {
        let mut ub = UnitBuilder::new();
        let mut fb = ub.declare_function("f", 0);
        let entry = fb.append_block();
        // Both operands are already physical registers (as they would be
        // post-allocation): this test targets instruction selection's own
        // addressing-mode check, not register allocation.
        let result = fb.physical(0);
        let rsp = fb.physical(4);
        {
            let mut bb = fb.block_builder(entry);
            bb.load(result, rsp);
            bb.ret(Some(result));
        }
        let unit = ub.finish();

        let err = select_and_compile(&unit).unwrap_err();
        assert!(matches!(err, BackendError::UnsupportedAddressingMode { base: 4, .. }));
    }
}
