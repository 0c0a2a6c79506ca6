//! Register allocation (§4.F): a single linear scan over the function's
//! instructions (blocks in listing order, instructions in block order),
//! killing dead operands before assigning each instruction's own
//! definitions. API shape (a `value_to_reg`-style map, caller/callee-saved
//! awareness) follows the source's `regalloc.rs`; the kill/assign/rewrite
//! walk itself is new, since that allocator's `spill_reload.rs` has no
//! counterpart here -- this one fails fast on exhaustion instead.

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::string::String;
use alloc::vec::Vec;

use ir::{Cfg, FunctionId, InstKind, Unit, Value, ValueData};

use crate::abi::{allocatable_registers, ARGUMENT_REGISTERS};
use crate::error::BackendError;
use crate::liveness::Liveness;

/// The physical register, if any, each virtual register ended up in. The
/// instruction selector consults this only incidentally: by the time
/// allocation finishes, every virtual-register operand in the IR has
/// already been rewritten in place to its physical register, so selection
/// never needs to look a value up itself.
///
/// Entries are permanent once assigned (never removed): the instruction at
/// which a virtual register dies still needs to resolve that same operand
/// to its register for its own rewrite step, so "killing" a register only
/// returns it to the free pool (see `free` in [`register_allocate`]) -- it
/// never erases the historical record of what it was assigned to.
#[derive(Debug, Default)]
pub struct Allocation {
    assignments: BTreeMap<Value, u32>,
}

impl Allocation {
    pub fn physical_register(&self, value: Value) -> Option<u32> {
        self.assignments.get(&value).copied()
    }
}

/// Run register allocation over `func`, rewriting every virtual-register
/// use and def in place to the physical register chosen for it.
///
/// Must run after [`crate::copy_insert::insert_copies`]: that pass is what
/// guarantees every value needing a register has a dedicated Copy (or is
/// already a fixed physical register) rather than an operand shared
/// awkwardly across instructions (§3 invariant 5).
pub fn register_allocate(unit: &mut Unit, func: FunctionId) -> Result<Allocation, BackendError> {
    let cfg = Cfg::build(unit.function(func));
    let liveness = Liveness::compute(unit, func, &cfg)?;

    let mut free: Vec<u32> = allocatable_registers().collect();
    // Occupancy of the fixed physical registers ABI copies target: tracked
    // locally, not via `liveness` (which does not model physical-register
    // values at all -- §4.E: "Constants and physical registers are ignored
    // as uses"). Each fixed-register def in this pipeline is consumed
    // exactly once, by the instruction immediately following it, so a
    // def-then-immediate-use bookkeeping is sufficient and never stale.
    let mut physical_in_use: BTreeMap<u32, ()> = BTreeMap::new();
    for reserved in crate::abi::RESERVED_REGISTERS {
        physical_in_use.insert(reserved, ());
    }
    // Arguments arrive live in their ABI-designated registers before the
    // function's first instruction runs; reserve those up front so an
    // unrelated virtual is never assigned one out from under a still-live
    // argument (freed below, same as any other physical use, once the
    // argument's own liveness says it is dead).
    let arg_count = (unit.function(func).arg_count() as usize).min(ARGUMENT_REGISTERS.len());
    for &reg in &ARGUMENT_REGISTERS[..arg_count] {
        physical_in_use.insert(reg, ());
        free.retain(|r| *r != reg);
    }

    let mut allocation = Allocation::default();
    // Guards against freeing the same virtual register's physical register
    // twice (e.g. a Binary whose lhs and rhs are the same dying value) now
    // that `allocation.assignments` is never cleared.
    let mut freed: BTreeSet<Value> = BTreeSet::new();

    let insts: Vec<_> = unit
        .function(func)
        .blocks()
        .flat_map(|(block, _)| unit.function(func).insts_in(block))
        .collect();

    for inst in insts {
        let kind = unit.function(func).inst(inst).clone();

        // 1. Kill: free every dead virtual-register use, plus every
        // fixed-physical use (always dead immediately, by construction).
        for (slot, used) in kind.uses().into_iter().enumerate() {
            match unit.value_data(used) {
                ValueData::Register { physical: false, .. } => {
                    if !liveness.live_after(used, inst) && freed.insert(used) {
                        if let Some(&reg) = allocation.assignments.get(&used) {
                            free.push(reg);
                        }
                    }
                }
                ValueData::Register { physical: true, number } => {
                    let number = *number;
                    physical_in_use.remove(&number);
                    if !free.contains(&number) {
                        free.push(number);
                    }
                }
                ValueData::Argument { index, .. } => {
                    let index = *index as usize;
                    if index < ARGUMENT_REGISTERS.len() && !liveness.live_after(used, inst) {
                        let number = ARGUMENT_REGISTERS[index];
                        physical_in_use.remove(&number);
                        if !free.contains(&number) {
                            free.push(number);
                        }
                    }
                }
                ValueData::Constant(_) => {}
            }
            let _ = slot;
        }

        // A Call consumes the ABI argument registers the copies immediately
        // preceding it just defined, but (per §4.D) a Call's own operand
        // list is never rewritten to reference those physical registers, so
        // they never show up as a `uses()` operand for the loop above to
        // free. The Call is their one and only point of consumption, so
        // free them here instead (§4.F: "treat each fixed-reg copy as both
        // a kill and a def of that physical register at exactly its
        // program point"), the same way an incoming `Argument` register is
        // freed once it is known dead.
        if let InstKind::Call { args, .. } = &kind {
            for &number in &ARGUMENT_REGISTERS[..args.len()] {
                physical_in_use.remove(&number);
                if !free.contains(&number) {
                    free.push(number);
                }
            }
        }

        // 2. Assign: give each result a register.
        for result in kind.results() {
            match unit.value_data(result) {
                ValueData::Register { physical: false, .. } => {
                    free.sort_unstable();
                    let reg = free.first().copied().ok_or_else(|| {
                        BackendError::AllocatorExhaustion {
                            function: String::from(unit.function(func).name()),
                        }
                    })?;
                    free.retain(|r| *r != reg);
                    allocation.assignments.insert(result, reg);
                }
                ValueData::Register { physical: true, number } => {
                    let number = *number;
                    if physical_in_use.contains_key(&number) {
                        return Err(BackendError::AllocatorExhaustion {
                            function: String::from(unit.function(func).name()),
                        });
                    }
                    free.retain(|r| *r != number);
                    physical_in_use.insert(number, ());
                }
                other => unreachable!("instruction result is not a register: {other:?}"),
            }
        }

        // 3. Rewrite: replace every virtual-register operand with its
        // assigned physical register, and every argument operand with the
        // ABI register it always lives in. Fixed physical and constant
        // operands are already final.
        let kind = unit.function(func).inst(inst).clone();
        for (slot, used) in kind.uses().into_iter().enumerate() {
            match unit.value_data(used) {
                ValueData::Register { physical: false, .. } => {
                    let reg = allocation.assignments[&used];
                    let phys = unit.physical(reg);
                    unit.set_use(func, inst, slot as u8, phys);
                }
                ValueData::Argument { index, .. } if (*index as usize) < ARGUMENT_REGISTERS.len() => {
                    let phys = unit.physical(ARGUMENT_REGISTERS[*index as usize]);
                    unit.set_use(func, inst, slot as u8, phys);
                }
                _ => {}
            }
        }
        for result in kind.results() {
            if let ValueData::Register { physical: false, .. } = unit.value_data(result) {
                let reg = allocation.assignments[&result];
                let phys = unit.physical(reg);
                unit.set_result(func, inst, phys);
            }
        }
    }

    remove_redundant_copies(unit, func);

    Ok(allocation)
}

/// §4.F cleanup: a `Copy` whose source and destination resolved to the same
/// physical register moves nothing and is dropped.
fn remove_redundant_copies(unit: &mut Unit, func: FunctionId) {
    let insts: Vec<_> = unit
        .function(func)
        .blocks()
        .flat_map(|(block, _)| unit.function(func).insts_in(block))
        .collect();

    for inst in insts {
        if let InstKind::Copy { dst, src } = *unit.function(func).inst(inst) {
            let same = matches!(
                (unit.value_data(dst), unit.value_data(src)),
                (
                    ValueData::Register { physical: true, number: a },
                    ValueData::Register { physical: true, number: b },
                ) if a == b
            );
            if same {
                unit.remove_inst(func, inst);
            }
        }
    }
}
