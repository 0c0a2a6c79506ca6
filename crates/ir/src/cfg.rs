//! Control-flow graph derived from each block's terminator.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::block::BlockId;
use crate::function::Function;
use crate::inst::InstKind;

/// Successor/predecessor edges for one function, computed once from its
/// blocks' terminators (§4.C).
///
/// Rebuilt on demand rather than kept incrementally in sync with the
/// instruction arena: passes that restructure control flow (none currently
/// do; copy insertion only ever inserts non-terminators) call
/// [`Cfg::build`] again if they need a fresh view.
#[derive(Debug, Default)]
pub struct Cfg {
    successors: BTreeMap<BlockId, Vec<BlockId>>,
    predecessors: BTreeMap<BlockId, Vec<BlockId>>,
}

impl Cfg {
    pub fn build(function: &Function) -> Self {
        let mut successors: BTreeMap<BlockId, Vec<BlockId>> = BTreeMap::new();
        let mut predecessors: BTreeMap<BlockId, Vec<BlockId>> = BTreeMap::new();

        for (id, _) in function.blocks() {
            successors.entry(id).or_default();
            predecessors.entry(id).or_default();
        }

        for (id, block) in function.blocks() {
            let term = block.tail().expect("block has no terminator");
            let targets = match function.inst(term) {
                InstKind::Branch { target } => alloc::vec![*target],
                InstKind::CondBranch { target_true, target_false, .. } => {
                    alloc::vec![*target_true, *target_false]
                }
                InstKind::Ret { .. } => Vec::new(),
                other => panic!("block tail {other:?} is not a terminator"),
            };
            for target in &targets {
                predecessors.entry(*target).or_default().push(id);
            }
            successors.insert(id, targets);
        }

        Self { successors, predecessors }
    }

    pub fn successors(&self, block: BlockId) -> &[BlockId] {
        self.successors.get(&block).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn predecessors(&self, block: BlockId) -> &[BlockId] {
        self.predecessors.get(&block).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_entry(&self, block: BlockId) -> bool {
        block.index() == 0
    }

    pub fn is_exit(&self, block: BlockId) -> bool {
        self.successors(block).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{Function, InsertPos};
    use crate::inst::BinOp;
    use crate::value::Value;

    fn v(n: u32) -> Value {
        Value::for_test(n)
    }

    #[test]
    fn straight_line_has_no_edges() {
        let mut f = Function::new("f".into(), 0);
        let b = f.append_block();
        f.link_inst(InsertPos::AppendTo(b), InstKind::Ret { value: None });
        let cfg = Cfg::build(&f);
        assert!(cfg.successors(b).is_empty());
        assert!(cfg.predecessors(b).is_empty());
        assert!(cfg.is_exit(b));
    }

    #[test]
    fn cond_branch_has_two_successors_and_matching_predecessors() {
        let mut f = Function::new("f".into(), 0);
        let entry = f.append_block();
        let then_blk = f.append_block();
        let else_blk = f.append_block();
        f.link_inst(
            InsertPos::AppendTo(entry),
            InstKind::CondBranch { cond: v(0), target_true: then_blk, target_false: else_blk },
        );
        f.link_inst(InsertPos::AppendTo(then_blk), InstKind::Ret { value: Some(v(1)) });
        f.link_inst(InsertPos::AppendTo(else_blk), InstKind::Ret { value: Some(v(2)) });

        let cfg = Cfg::build(&f);
        assert_eq!(cfg.successors(entry), &[then_blk, else_blk]);
        assert_eq!(cfg.predecessors(then_blk), &[entry]);
        assert_eq!(cfg.predecessors(else_blk), &[entry]);
        assert!(cfg.is_entry(entry));
        assert!(cfg.is_exit(then_blk));
    }

    #[test]
    fn branch_chain_builds_linear_edges() {
        let mut f = Function::new("f".into(), 0);
        let b0 = f.append_block();
        let b1 = f.append_block();
        f.link_inst(InsertPos::AppendTo(b0), InstKind::Branch { target: b1 });
        f.link_inst(
            InsertPos::AppendTo(b1),
            InstKind::Binary { op: BinOp::Add, result: v(0), lhs: v(1), rhs: v(2) },
        );
        f.link_inst(InsertPos::AppendTo(b1), InstKind::Ret { value: Some(v(0)) });
        let cfg = Cfg::build(&f);
        assert_eq!(cfg.successors(b0), &[b1]);
        assert_eq!(cfg.predecessors(b1), &[b0]);
    }
}
