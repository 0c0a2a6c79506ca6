//! Function builder.

use ir::{BlockId, Function, FunctionId, Unit, Value};

use crate::block_builder::BlockBuilder;

/// Builder for adding blocks to one function.
///
/// Borrows the owning [`Unit`] rather than an isolated [`Function`]: values
/// (constants, physical registers, virtual registers) are interned
/// unit-wide, so even per-function construction needs access to the whole
/// arena.
pub struct FunctionBuilder<'a> {
    unit: &'a mut Unit,
    id: FunctionId,
}

impl<'a> FunctionBuilder<'a> {
    pub(crate) fn new(unit: &'a mut Unit, id: FunctionId) -> Self {
        Self { unit, id }
    }

    pub fn id(&self) -> FunctionId {
        self.id
    }

    pub fn function(&self) -> &Function {
        self.unit.function(self.id)
    }

    /// Append a new, empty block and return its id.
    pub fn append_block(&mut self) -> BlockId {
        self.unit.function_mut(self.id).append_block()
    }

    /// The value bound to the `index`-th formal parameter.
    pub fn argument(&self, index: u32) -> Value {
        self.unit.argument(self.id, index)
    }

    pub fn new_virtual(&mut self) -> Value {
        self.unit.new_virtual()
    }

    pub fn constant(&mut self, n: i64) -> Value {
        self.unit.constant(n)
    }

    pub fn physical(&mut self, number: u32) -> Value {
        self.unit.physical(number)
    }

    /// Switch to building the given block.
    pub fn block_builder(&mut self, block: BlockId) -> BlockBuilder<'_> {
        BlockBuilder::new(self.unit, self.id, block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit_builder::UnitBuilder;

    #[test]
    fn append_block_grows_block_count() {
        let mut ub = UnitBuilder::new();
        let mut fb = ub.declare_function("f", 0);
        assert_eq!(fb.function().block_count(), 0);
        fb.append_block();
        fb.append_block();
        assert_eq!(fb.function().block_count(), 2);
    }

    #[test]
    fn build_add_function() {
        let mut ub = UnitBuilder::new();
        let mut fb = ub.declare_function("add2", 2);
        let entry = fb.append_block();
        let a = fb.argument(0);
        let b = fb.argument(1);
        let result = fb.new_virtual();
        {
            let mut bb = fb.block_builder(entry);
            bb.add(result, a, b);
            bb.ret(Some(result));
        }
        let unit = ub.finish();
        let func = unit.function(unit.find_function("add2").unwrap());
        assert_eq!(func.insts_in(entry).count(), 2);
    }
}
