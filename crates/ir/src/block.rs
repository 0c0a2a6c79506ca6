//! Basic blocks: an intrusive ordered list of instructions.

use crate::inst::InstHandle;

/// Index of a [`BasicBlock`] within its owning [`crate::Function`]'s block
/// list. Stable for the lifetime of the function: blocks are never removed,
/// only appended (§4.B).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(u32);

impl BlockId {
    pub(crate) fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn index(&self) -> u32 {
        self.0
    }
}

/// An empty-on-creation block; instructions are linked in via
/// [`crate::Function::append_inst`] / `prepend_inst` / `insert_inst_before`.
#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    pub(crate) head: Option<InstHandle>,
    pub(crate) tail: Option<InstHandle>,
}

impl BasicBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn head(&self) -> Option<InstHandle> {
        self.head
    }

    pub fn tail(&self) -> Option<InstHandle> {
        self.tail
    }
}
