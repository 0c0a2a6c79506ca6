//! Instruction variants and the per-function instruction arena.

use alloc::string::String;
use alloc::vec::Vec;

use crate::block::BlockId;
use crate::value::Value;

/// Arena handle for an instruction within its owning [`crate::Function`].
///
/// Instructions form an intrusive doubly-linked list (prev/next handles
/// stored inline) rather than living in a `Vec<Instruction>` per block, so
/// that copy insertion and other passes get O(1) insert-before/unlink
/// (§4.A) without raw pointer aliasing (§9 Design Notes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstHandle(u32);

impl InstHandle {
    pub(crate) fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn index(&self) -> u32 {
        self.0
    }
}

/// Binary arithmetic/comparison kinds (§3: "Binary (Add, Sub, Compare with a
/// comparison kind)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Compare(CompareKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareKind {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// One instruction's operands and result, by variant.
///
/// A tagged sum with exhaustive matching, per §9's Design Notes, in place of
/// the source's virtual-dispatch visitor over `Instruction` subclasses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstKind {
    Binary { op: BinOp, result: Value, lhs: Value, rhs: Value },
    Branch { target: BlockId },
    CondBranch { cond: Value, target_true: BlockId, target_false: BlockId },
    Call { callee: String, args: Vec<Value>, result: Value },
    /// `dst` is itself the defined value (§3: "the destination is itself the
    /// defined value"); `src` is the sole use.
    Copy { dst: Value, src: Value },
    Load { result: Value, address: Value },
    Store { address: Value, value: Value },
    Ret { value: Option<Value> },
}

impl InstKind {
    /// Values this instruction defines (the destination side).
    pub fn results(&self) -> Vec<Value> {
        match self {
            InstKind::Binary { result, .. } => alloc::vec![*result],
            InstKind::Call { result, .. } => alloc::vec![*result],
            InstKind::Copy { dst, .. } => alloc::vec![*dst],
            InstKind::Load { result, .. } => alloc::vec![*result],
            InstKind::Branch { .. }
            | InstKind::CondBranch { .. }
            | InstKind::Store { .. }
            | InstKind::Ret { .. } => Vec::new(),
        }
    }

    /// Values this instruction uses (consumed operands, excluding the
    /// destination of a Copy).
    pub fn uses(&self) -> Vec<Value> {
        match self {
            InstKind::Binary { lhs, rhs, .. } => alloc::vec![*lhs, *rhs],
            InstKind::Branch { .. } => Vec::new(),
            InstKind::CondBranch { cond, .. } => alloc::vec![*cond],
            InstKind::Call { args, .. } => args.clone(),
            InstKind::Copy { src, .. } => alloc::vec![*src],
            InstKind::Load { address, .. } => alloc::vec![*address],
            InstKind::Store { address, value } => alloc::vec![*address, *value],
            InstKind::Ret { value } => value.iter().copied().collect(),
        }
    }

    /// True for Branch, CondBranch, and Ret -- the only instructions
    /// allowed to end a basic block (§3 invariant 1).
    pub fn is_terminator(&self) -> bool {
        matches!(self, InstKind::Branch { .. } | InstKind::CondBranch { .. } | InstKind::Ret { .. })
    }
}

/// One arena slot: the instruction's data plus its position in the
/// intrusive list for the owning block.
#[derive(Debug, Clone)]
pub(crate) struct InstNode {
    pub data: InstKind,
    pub block: BlockId,
    pub prev: Option<InstHandle>,
    pub next: Option<InstHandle>,
}
