//! Component visitors: exhaustive dispatch over the closed tag set.
//!
//! Instead of double dispatch, visitors declare an `Output` type and one
//! method per component tag; [`dispatch_inspector`] and
//! [`dispatch_mutator`] perform the (exhaustive) match. The def-resolution
//! and def-propagation engines follow the same shape with their own state;
//! the visitors here are the small reusable inspectors.

use crate::component::{Component, Fork, Loop, Sequence};
use crate::function::Function;
use crate::id::{BlockId, CompId};
use crate::link_set::LinkSet;

/// A read-only visitor over components.
pub trait ComponentInspector {
    type Output;

    fn visit_block(&mut self, f: &Function, id: BlockId) -> Self::Output;
    fn visit_sequence(&mut self, f: &Function, id: CompId, seq: &Sequence) -> Self::Output;
    fn visit_fork(&mut self, f: &Function, id: CompId, fork: &Fork) -> Self::Output;
    fn visit_loop(&mut self, f: &Function, id: CompId, lp: &Loop) -> Self::Output;
}

/// Dispatches `v` on the component tag of `comp`.
pub fn dispatch_inspector<V: ComponentInspector>(
    f: &Function,
    comp: CompId,
    v: &mut V,
) -> V::Output {
    match f.component(comp) {
        Component::Block(_) => v.visit_block(f, BlockId(comp.0)),
        Component::Sequence(seq) => v.visit_sequence(f, comp, seq),
        Component::Fork(fork) => v.visit_fork(f, comp, fork),
        Component::Loop(lp) => v.visit_loop(f, comp, lp),
    }
}

/// A mutating visitor over components. Implementations re-fetch the
/// component through the function to keep borrows local.
pub trait ComponentMutator {
    type Output;

    fn visit_block(&mut self, f: &mut Function, id: BlockId) -> Self::Output;
    fn visit_sequence(&mut self, f: &mut Function, id: CompId) -> Self::Output;
    fn visit_fork(&mut self, f: &mut Function, id: CompId) -> Self::Output;
    fn visit_loop(&mut self, f: &mut Function, id: CompId) -> Self::Output;
}

/// Dispatches `v` on the component tag of `comp`.
pub fn dispatch_mutator<V: ComponentMutator>(
    f: &mut Function,
    comp: CompId,
    v: &mut V,
) -> V::Output {
    match f.component(comp) {
        Component::Block(_) => v.visit_block(f, BlockId(comp.0)),
        Component::Sequence(_) => v.visit_sequence(f, comp),
        Component::Fork(_) => v.visit_fork(f, comp),
        Component::Loop(_) => v.visit_loop(f, comp),
    }
}

// ---------------------------------------------------------------------------
// Concrete inspectors
// ---------------------------------------------------------------------------

/// Collects the leaf blocks of a structure: the blocks whose outgoing edges
/// leave it.
pub struct LeafCollector;

impl ComponentInspector for LeafCollector {
    type Output = LinkSet<BlockId>;

    fn visit_block(&mut self, _f: &Function, id: BlockId) -> Self::Output {
        LinkSet::from_one(id)
    }

    fn visit_sequence(&mut self, f: &Function, _id: CompId, seq: &Sequence) -> Self::Output {
        let last = *seq.children.last().expect("sequence is never empty");
        dispatch_inspector(f, last, self)
    }

    fn visit_fork(&mut self, f: &Function, _id: CompId, fork: &Fork) -> Self::Output {
        let mut out = LinkSet::new();
        for case in &fork.cases {
            out.merge(&dispatch_inspector(f, *case, self));
        }
        out
    }

    fn visit_loop(&mut self, _f: &Function, _id: CompId, lp: &Loop) -> Self::Output {
        LinkSet::from_one(lp.after)
    }
}

/// Counts the blocks beneath a component.
pub struct BlockCounter;

impl ComponentInspector for BlockCounter {
    type Output = usize;

    fn visit_block(&mut self, _f: &Function, _id: BlockId) -> Self::Output {
        1
    }

    fn visit_sequence(&mut self, f: &Function, _id: CompId, seq: &Sequence) -> Self::Output {
        seq.children
            .iter()
            .map(|c| dispatch_inspector(f, *c, self))
            .sum()
    }

    fn visit_fork(&mut self, f: &Function, _id: CompId, fork: &Fork) -> Self::Output {
        1 + fork
            .cases
            .iter()
            .map(|c| dispatch_inspector(f, *c, self))
            .sum::<usize>()
    }

    fn visit_loop(&mut self, f: &Function, _id: CompId, lp: &Loop) -> Self::Output {
        // start + condition + body + update + after
        dispatch_inspector(f, lp.start, self)
            + 1
            + dispatch_inspector(f, lp.body, self)
            + 1
            + 1
    }
}

/// Recursively flattens every sequence beneath a component.
pub struct StructureFlattener;

impl ComponentMutator for StructureFlattener {
    type Output = ();

    fn visit_block(&mut self, _f: &mut Function, _id: BlockId) {}

    fn visit_sequence(&mut self, f: &mut Function, id: CompId) {
        f.flatten(id).expect("component is a sequence");
        let children = match f.component(id) {
            Component::Sequence(s) => s.children.clone(),
            _ => unreachable!(),
        };
        for child in children {
            dispatch_mutator(f, child, self);
        }
    }

    fn visit_fork(&mut self, f: &mut Function, id: CompId) {
        let cases = match f.component(id) {
            Component::Fork(fk) => fk.cases.clone(),
            _ => unreachable!(),
        };
        for case in cases {
            dispatch_mutator(f, case, self);
        }
    }

    fn visit_loop(&mut self, f: &mut Function, id: CompId) {
        let (start, body) = match f.component(id) {
            Component::Loop(lp) => (lp.start, lp.body),
            _ => unreachable!(),
        };
        dispatch_mutator(f, start, self);
        dispatch_mutator(f, body, self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IrType, ScalarType};

    fn new_func() -> Function {
        Function::new(
            "f",
            ("z", IrType::Scalar(ScalarType::I32)),
            &[],
        )
    }

    #[test]
    fn leaf_collector_matches_cached_leaves() {
        let mut f = new_func();
        let body = f.body();
        let cv = f.anonymous_variable();
        let fork = f.emplace_back_fork(body, cv).unwrap();
        f.fork_add_case_block(fork).unwrap();
        f.fork_add_case_block(fork).unwrap();

        let collected = dispatch_inspector(&f, body, &mut LeafCollector);
        assert_eq!(collected, f.leaves(body));
        assert_eq!(collected.len(), 2);
    }

    #[test]
    fn block_counter_counts_loop_roles() {
        let mut f = new_func();
        let body = f.body();
        let cv = f.anonymous_variable();
        f.emplace_back_loop(body, cv).unwrap();

        // entry block + (start, condition, body-block, update, after)
        let n = dispatch_inspector(&f, body, &mut BlockCounter);
        assert_eq!(n, 6);
        assert_eq!(n, f.num_blocks());
    }

    #[test]
    fn structure_flattener_flattens_nested() {
        let mut f = new_func();
        let body = f.body();
        let inner = f.alloc_sequence(Some(body));
        match f.component_mut(body) {
            Component::Sequence(s) => s.children.push(inner),
            _ => unreachable!(),
        }
        dispatch_mutator(&mut f, body, &mut StructureFlattener);
        let children = match f.component(body) {
            Component::Sequence(s) => s.children.clone(),
            _ => unreachable!(),
        };
        assert!(children
            .iter()
            .all(|c| matches!(f.component(*c), Component::Block(_))));
    }
}
