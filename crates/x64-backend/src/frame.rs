//! Prologue/epilogue frame layout (§4.G): which callee-saved registers this
//! function actually touched, in the order the prologue pushes them.
//!
//! Grounded on the source target's Cranelift-flavored `FrameLayout`, cut
//! down to what this allocator needs: no stack slots, no spilling, so the
//! only frame-relevant fact is the callee-saved register set.

use alloc::vec::Vec;
use alloc::collections::BTreeSet;

use ir::{FunctionId, Unit, ValueData};

use crate::abi::is_callee_saved;

/// The callee-saved registers a function's body defines or uses, lowest
/// number first -- the order the prologue pushes them in and the epilogue
/// pops them back out of, in reverse.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FrameLayout {
    callee_saved: Vec<u32>,
}

impl FrameLayout {
    /// Scan every instruction in `func` (after register allocation has run)
    /// for a callee-saved physical register appearing as an operand. A
    /// function that never touches one needs no frame at all: a bare `RET`
    /// suffices (§4.G: "LEAVE; RET when a prologue was emitted, else RET").
    pub fn compute(unit: &Unit, func: FunctionId) -> Self {
        let function = unit.function(func);
        let mut found: BTreeSet<u32> = BTreeSet::new();

        for (block, _) in function.blocks() {
            for inst in function.insts_in(block) {
                let kind = function.inst(inst);
                for value in kind.uses().into_iter().chain(kind.results()) {
                    if let ValueData::Register { physical: true, number } = unit.value_data(value) {
                        if is_callee_saved(*number) {
                            found.insert(*number);
                        }
                    }
                }
            }
        }

        Self { callee_saved: found.into_iter().collect() }
    }

    /// Whether this function needs a frame-pointer prologue/epilogue at all.
    pub fn has_prologue(&self) -> bool {
        !self.callee_saved.is_empty()
    }

    /// Registers in push order (ascending register number).
    pub fn callee_saved(&self) -> &[u32] {
        &self.callee_saved
    }
}
