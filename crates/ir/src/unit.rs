//! The top-level container: a set of functions sharing one value arena.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use crate::block::BlockId;
use crate::function::{Function, FunctionId, InsertPos};
use crate::inst::{InstHandle, InstKind};
use crate::value::{Use, Value, ValueStore};

/// Owns every [`Function`] and the unit-wide [`ValueStore`].
///
/// All mutation that needs to keep a value's use-list consistent with the
/// instructions that reference it goes through methods here rather than
/// through `Function` directly (§5: "a central set_operand primitive").
#[derive(Default)]
pub struct Unit {
    functions: Vec<Function>,
    name_index: BTreeMap<String, usize>,
    values: ValueStore,
}

impl Unit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn values(&self) -> &ValueStore {
        &self.values
    }

    pub fn value_data(&self, value: Value) -> &crate::value::ValueData {
        self.values.data(value)
    }

    pub fn constant(&mut self, n: i64) -> Value {
        self.values.constant(n)
    }

    pub fn physical(&mut self, number: u32) -> Value {
        self.values.physical(number)
    }

    pub fn new_virtual(&mut self) -> Value {
        self.values.new_virtual()
    }

    /// Append a new, empty function, with `arg_count` arguments already
    /// materialized as distinct [`Value`]s.
    pub fn append_function(&mut self, name: &str, arg_count: u32) -> FunctionId {
        let id = FunctionId::new(self.functions.len() as u32);
        let mut function = Function::new(String::from(name), arg_count);
        let args = (0..arg_count).map(|i| self.values.argument(id, i)).collect();
        function.set_args(args);
        // entry block is not created automatically; callers append blocks
        // explicitly (§4.B), matching the builder's own block construction.
        self.name_index.insert(String::from(name), id.index() as usize);
        self.functions.push(function);
        id
    }

    pub fn find_function(&self, name: &str) -> Option<FunctionId> {
        self.name_index.get(name).map(|&i| FunctionId::new(i as u32))
    }

    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id.index() as usize]
    }

    pub fn function_mut(&mut self, id: FunctionId) -> &mut Function {
        &mut self.functions[id.index() as usize]
    }

    pub fn functions(&self) -> impl Iterator<Item = (FunctionId, &Function)> {
        self.functions.iter().enumerate().map(|(i, f)| (FunctionId::new(i as u32), f))
    }

    /// The argument value for `function`'s `index`-th parameter.
    pub fn argument(&self, function: FunctionId, index: u32) -> Value {
        self.function(function).argument(index)
    }

    fn link_and_register(
        &mut self,
        func: FunctionId,
        pos: InsertPos,
        data: InstKind,
    ) -> InstHandle {
        let uses = data.uses();
        let handle = self.function_mut(func).link_inst(pos, data);
        for (slot, value) in uses.into_iter().enumerate() {
            self.values.add_use(value, Use { function: func, inst: handle, slot: slot as u8 });
        }
        handle
    }

    pub fn append_inst(&mut self, func: FunctionId, block: BlockId, data: InstKind) -> InstHandle {
        self.link_and_register(func, InsertPos::AppendTo(block), data)
    }

    pub fn prepend_inst(&mut self, func: FunctionId, block: BlockId, data: InstKind) -> InstHandle {
        self.link_and_register(func, InsertPos::PrependTo(block), data)
    }

    pub fn insert_inst_before(&mut self, func: FunctionId, at: InstHandle, data: InstKind) -> InstHandle {
        self.link_and_register(func, InsertPos::Before(at), data)
    }

    pub fn insert_inst_after(&mut self, func: FunctionId, at: InstHandle, data: InstKind) -> InstHandle {
        self.link_and_register(func, InsertPos::After(at), data)
    }

    /// Rewrite a single use-slot, keeping the old and new values' use-lists
    /// consistent with the new operand.
    pub fn set_use(&mut self, func: FunctionId, inst: InstHandle, slot: u8, new: Value) {
        let old = self.function_mut(func).set_use_at(inst, slot, new);
        self.values.remove_use(old, Use { function: func, inst, slot });
        self.values.add_use(new, Use { function: func, inst, slot });
    }

    /// Overwrite an instruction's result (definition). Does not touch any
    /// use-list: a value's own defining instruction is not among its uses.
    pub fn set_result(&mut self, func: FunctionId, inst: InstHandle, new: Value) {
        self.function_mut(func).set_result(inst, new);
    }

    /// For every instruction currently using `old`, rewrite that operand to
    /// `new` and migrate the use-list entry (§5).
    pub fn replace_all_uses_with(&mut self, old: Value, new: Value) {
        let uses: Vec<Use> = self.values.uses(old).to_vec();
        for use_ in uses {
            self.function_mut(use_.function).set_use_at(use_.inst, use_.slot, new);
            self.values.add_use(new, use_);
        }
        self.values.clear_uses(old);
    }

    /// Detach an instruction from its block. The instruction must define no
    /// value still in use, and its own uses are retired from their
    /// targets' use-lists before unlinking.
    pub fn remove_inst(&mut self, func: FunctionId, inst: InstHandle) {
        let uses = self.function(func).inst(inst).uses();
        for (slot, value) in uses.into_iter().enumerate() {
            self.values.remove_use(value, Use { function: func, inst, slot: slot as u8 });
        }
        self.function_mut(func).unlink_inst(inst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inst::{BinOp, CompareKind};

    #[test]
    fn append_function_materializes_arguments() {
        let mut unit = Unit::new();
        let f = unit.append_function("add2", 2);
        let a0 = unit.argument(f, 0);
        let a1 = unit.argument(f, 1);
        assert_ne!(a0, a1);
    }

    #[test]
    fn append_inst_registers_uses() {
        let mut unit = Unit::new();
        let f = unit.append_function("f", 2);
        let a0 = unit.argument(f, 0);
        let a1 = unit.argument(f, 1);
        let result = unit.new_virtual();
        let block = unit.function_mut(f).append_block();
        let add = unit.append_inst(
            f,
            block,
            InstKind::Binary { op: BinOp::Add, result, lhs: a0, rhs: a1 },
        );
        assert_eq!(unit.values().use_count(a0), 1);
        assert_eq!(unit.values().use_count(a1), 1);
        assert_eq!(unit.values().uses(a0)[0].inst, add);
    }

    #[test]
    fn replace_all_uses_with_migrates_every_use() {
        let mut unit = Unit::new();
        let f = unit.append_function("f", 1);
        let a0 = unit.argument(f, 0);
        let phys = unit.physical(7);
        let block = unit.function_mut(f).append_block();
        let ret1 = unit.append_inst(f, block, InstKind::Ret { value: Some(a0) });
        let _cmp = unit.append_inst(
            f,
            block,
            InstKind::Binary { op: BinOp::Compare(CompareKind::Eq), result: unit.new_virtual(), lhs: a0, rhs: a0 },
        );
        unit.replace_all_uses_with(a0, phys);
        assert_eq!(unit.values().use_count(a0), 0);
        assert_eq!(unit.values().use_count(phys), 3);
        assert!(matches!(unit.function(f).inst(ret1), InstKind::Ret { value: Some(v) } if *v == phys));
    }

    #[test]
    fn remove_inst_retires_its_uses() {
        let mut unit = Unit::new();
        let f = unit.append_function("f", 1);
        let a0 = unit.argument(f, 0);
        let block = unit.function_mut(f).append_block();
        let ret = unit.append_inst(f, block, InstKind::Ret { value: Some(a0) });
        assert_eq!(unit.values().use_count(a0), 1);
        unit.remove_inst(f, ret);
        assert_eq!(unit.values().use_count(a0), 0);
    }
}
