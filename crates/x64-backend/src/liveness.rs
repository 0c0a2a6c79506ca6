//! Liveness (§4.E): a backward-worklist analysis over the function's CFG,
//! algorithmically grounded on the source's `Liveness.cc` (def tracked per
//! block, visit a use by walking backward to the block head or the def,
//! then fanning out to predecessors) but made precise where the source left
//! a `TODO`: a use in the same block as its def stops exactly at the def
//! instruction rather than drifting past it.

use alloc::collections::{BTreeMap, BTreeSet, VecDeque};
use alloc::string::String;
use alloc::vec::Vec;

use ir::{BlockId, Cfg, Function, FunctionId, InstHandle, Unit, Value};

use crate::error::BackendError;

/// Where a value is considered defined, for liveness purposes only.
/// Arguments have no defining instruction (§4.E item 1: "each Argument is
/// considered defined at the entry block"); everything else is pinned to
/// the instruction that defines it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DefPoint {
    EntryOfBlock(BlockId),
    AtInst(InstHandle),
}

/// Per-instruction live sets for one function, queryable by value and
/// instruction point.
pub struct Liveness {
    /// `live_at[inst]` is the set of values live at `inst`'s point, i.e.
    /// defined strictly before `inst` (or an argument, defined at block
    /// entry) and used at or after `inst` on some path.
    live_at: BTreeMap<InstHandle, BTreeSet<Value>>,
    /// Precomputed successor points for `live_after`'s reachability check:
    /// the next instruction in the same block, or the head instruction of
    /// each CFG successor block if `inst` is a terminator.
    successors: BTreeMap<InstHandle, Vec<InstHandle>>,
}

impl Liveness {
    /// Compute liveness for `unit`'s function `func`, whose control flow is
    /// described by `cfg`.
    pub fn compute(unit: &Unit, func: FunctionId, cfg: &Cfg) -> Result<Self, BackendError> {
        let function = unit.function(func);
        let block_insts: BTreeMap<BlockId, Vec<InstHandle>> = function
            .blocks()
            .map(|(id, _)| (id, function.insts_in(id).collect()))
            .collect();
        let position: BTreeMap<InstHandle, usize> = block_insts
            .values()
            .flat_map(|insts| insts.iter().enumerate().map(|(i, h)| (*h, i)))
            .collect();

        let mut def_point: BTreeMap<Value, DefPoint> = BTreeMap::new();
        for argument in function.arguments() {
            def_point.insert(*argument, DefPoint::EntryOfBlock(function.entry_block()));
        }
        for insts in block_insts.values() {
            for inst in insts {
                for result in function.inst(*inst).results() {
                    def_point.insert(result, DefPoint::AtInst(*inst));
                }
            }
        }

        let successors = build_successor_map(function, cfg, &block_insts);

        let mut live_at: BTreeMap<InstHandle, BTreeSet<Value>> = BTreeMap::new();
        for (block, insts) in &block_insts {
            for inst in insts {
                for used in function.inst(*inst).uses() {
                    let data = unit.value_data(used);
                    if data.is_constant() || data.is_physical_register() {
                        continue;
                    }
                    visit_use(
                        used,
                        *block,
                        *inst,
                        function,
                        cfg,
                        &block_insts,
                        &position,
                        &def_point,
                        &mut live_at,
                    )?;
                }
            }
        }

        Ok(Self { live_at, successors })
    }

    /// True if `value` is live at `inst`'s point (defined before it, used
    /// at or after it on some path).
    pub fn is_live(&self, value: Value, inst: InstHandle) -> bool {
        self.live_at.get(&inst).is_some_and(|set| set.contains(&value))
    }

    /// True if `value` is still needed once `inst` has executed: live at any
    /// of `inst`'s successor points.
    pub fn live_after(&self, value: Value, inst: InstHandle) -> bool {
        self.successors
            .get(&inst)
            .is_some_and(|succs| succs.iter().any(|s| self.is_live(value, *s)))
    }
}

fn build_successor_map(
    function: &Function,
    cfg: &Cfg,
    block_insts: &BTreeMap<BlockId, Vec<InstHandle>>,
) -> BTreeMap<InstHandle, Vec<InstHandle>> {
    let mut map = BTreeMap::new();
    for (block, insts) in block_insts {
        for (i, inst) in insts.iter().enumerate() {
            let succs = if let Some(next) = insts.get(i + 1) {
                alloc::vec![*next]
            } else {
                cfg.successors(*block)
                    .iter()
                    .filter_map(|b| function.block(*b).head())
                    .collect()
            };
            map.insert(*inst, succs);
        }
    }
    map
}

/// A single entry in the backward walk's worklist: resume walking `block`
/// backward starting just before `from` (the terminator, if `None`).
struct Frame {
    block: BlockId,
    from: Option<InstHandle>,
}

#[allow(clippy::too_many_arguments)]
fn visit_use(
    value: Value,
    use_block: BlockId,
    use_inst: InstHandle,
    function: &Function,
    cfg: &Cfg,
    block_insts: &BTreeMap<BlockId, Vec<InstHandle>>,
    position: &BTreeMap<InstHandle, usize>,
    def_point: &BTreeMap<Value, DefPoint>,
    live_at: &mut BTreeMap<InstHandle, BTreeSet<Value>>,
) -> Result<(), BackendError> {
    // A value with no recorded def (e.g. a physical register slipping
    // through, or a value from another function) cannot be live-range
    // tracked; nothing to do.
    let Some(def) = def_point.get(&value) else { return Ok(()) };

    if let DefPoint::AtInst(def_inst) = def {
        let def_block = function.inst_block(*def_inst);
        if def_block == use_block && position[def_inst] > position[&use_inst] {
            return Err(BackendError::UseBeforeDef { function: String::from(function.name()) });
        }
    }

    let mut worklist: VecDeque<Frame> = VecDeque::new();
    let mut visited: BTreeSet<BlockId> = BTreeSet::new();
    worklist.push_back(Frame { block: use_block, from: Some(use_inst) });

    while let Some(Frame { block, from }) = worklist.pop_front() {
        let insts = &block_insts[&block];
        if insts.is_empty() {
            continue;
        }
        let start_idx = match from {
            Some(inst) => position[&inst],
            None => insts.len() - 1,
        };

        let mut stopped_at_def = false;
        for idx in (0..=start_idx).rev() {
            let here = insts[idx];
            if let DefPoint::AtInst(def_inst) = def {
                if *def_inst == here {
                    stopped_at_def = true;
                    break;
                }
            }
            live_at.entry(here).or_default().insert(value);
        }

        if stopped_at_def {
            continue;
        }
        if matches!(def, DefPoint::EntryOfBlock(entry) if *entry == block) {
            continue;
        }

        for pred in cfg.predecessors(block) {
            if visited.insert(*pred) {
                worklist.push_back(Frame { block: *pred, from: None });
            }
        }
    }

    Ok(())
}
