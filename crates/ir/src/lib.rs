//! Value graph, instructions, basic blocks, functions, and the
//! control-flow graph they induce.
//!
//! This crate has no notion of registers being allocated, calling
//! conventions, or machine code; it is the data model those later passes
//! operate on.

#![no_std]

extern crate alloc;

mod block;
mod cfg;
mod function;
mod inst;
mod unit;
mod value;

pub use block::{BasicBlock, BlockId};
pub use cfg::Cfg;
pub use function::{Function, FunctionId, InsertPos, InstIter};
pub use inst::{BinOp, CompareKind, InstHandle, InstKind};
pub use unit::Unit;
pub use value::{Use, Value, ValueData, ValueStore};
