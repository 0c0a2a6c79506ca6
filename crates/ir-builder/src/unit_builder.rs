//! Unit builder.

use ir::{FunctionId, Unit, Value};

use crate::function_builder::FunctionBuilder;

/// Builder for constructing a [`Unit`] one function at a time.
#[derive(Debug, Default)]
pub struct UnitBuilder {
    unit: Unit,
}

impl UnitBuilder {
    pub fn new() -> Self {
        Self { unit: Unit::new() }
    }

    /// Declare a new function with `arg_count` arguments and switch to
    /// building it.
    pub fn declare_function(&mut self, name: &str, arg_count: u32) -> FunctionBuilder<'_> {
        let id = self.unit.append_function(name, arg_count);
        FunctionBuilder::new(&mut self.unit, id)
    }

    /// Resume building an already-declared function.
    pub fn function_builder(&mut self, id: FunctionId) -> FunctionBuilder<'_> {
        FunctionBuilder::new(&mut self.unit, id)
    }

    pub fn constant(&mut self, n: i64) -> Value {
        self.unit.constant(n)
    }

    pub fn physical(&mut self, number: u32) -> Value {
        self.unit.physical(number)
    }

    /// Finish building and return the unit.
    pub fn finish(self) -> Unit {
        self.unit
    }
}
