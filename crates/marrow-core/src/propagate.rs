//! The def-propagator: repointing downstream joins after a dominator def
//! is installed.
//!
//! When a block acquires its first local def of a variable, everything that
//! used to flow through that block is shadowed. The propagator walks the
//! structure forward from the def's block -- the descending half visits
//! successor subcomponents, the ascending half leaves the enclosing
//! structure and continues into following siblings -- carrying the frontier
//! of pass-through blocks. At each block holding a def-timeline it retargets
//! the incoming nodes whose predecessor edge lies in the frontier and stops;
//! blocks without a def-timeline pass the walk through and join the
//! frontier. Every retarget re-evaluates the affected joins' phi decisions
//! through the successor links.

use crate::component::{Component, LoopRole};
use crate::error::CoreError;
use crate::function::Function;
use crate::id::{BlockId, CompId, DtKey, VarId};
use crate::link_set::LinkSet;

struct DefPropagator {
    dom: DtKey,
}

impl DefPropagator {
    /// Visits one block with the frontier of predecessor edges reaching it.
    /// Returns the pass-through frontier (empty when the block shadows).
    fn visit_block(
        &self,
        f: &mut Function,
        b: BlockId,
        frontier: &LinkSet<BlockId>,
    ) -> Result<LinkSet<BlockId>, CoreError> {
        if b == self.dom.block {
            return Ok(LinkSet::new());
        }
        if f.block(b).dt(self.dom.var).is_some() {
            for pred in frontier.iter() {
                f.retarget_incoming(b, self.dom.var, *pred, self.dom)?;
            }
            return Ok(LinkSet::new());
        }
        Ok(LinkSet::from_one(b))
    }

    /// Descends into `comp`, entered along the edges in `frontier`.
    fn descend(
        &self,
        f: &mut Function,
        comp: CompId,
        frontier: LinkSet<BlockId>,
    ) -> Result<LinkSet<BlockId>, CoreError> {
        if frontier.is_empty() {
            return Ok(frontier);
        }
        enum Shape {
            Block(BlockId),
            Seq(Vec<CompId>),
            Fork(BlockId, Vec<CompId>),
            Loop(crate::component::Loop),
        }
        let shape = match f.component(comp) {
            Component::Block(_) => Shape::Block(BlockId(comp.0)),
            Component::Sequence(s) => Shape::Seq(s.children.clone()),
            Component::Fork(fk) => Shape::Fork(fk.condition, fk.cases.clone()),
            Component::Loop(lp) => Shape::Loop(lp.clone()),
        };
        match shape {
            Shape::Block(b) => self.visit_block(f, b, &frontier),
            Shape::Seq(children) => {
                let mut fr = frontier;
                for child in children {
                    fr = self.descend(f, child, fr)?;
                    if fr.is_empty() {
                        break;
                    }
                }
                Ok(fr)
            }
            Shape::Fork(condition, cases) => {
                let fr = self.visit_block(f, condition, &frontier)?;
                if fr.is_empty() {
                    return Ok(fr);
                }
                let mut out = LinkSet::new();
                for case in cases {
                    out.merge(&self.descend(f, case, fr.clone())?);
                }
                Ok(out)
            }
            Shape::Loop(lp) => {
                let fr = self.descend(f, lp.start, frontier)?;
                if fr.is_empty() {
                    return Ok(LinkSet::new());
                }
                let fr = self.visit_block(f, lp.condition, &fr)?;
                if fr.is_empty() {
                    return Ok(LinkSet::new());
                }
                let bf = self.descend(f, lp.body, fr.clone())?;
                if !bf.is_empty() {
                    // the update result would only feed the condition again;
                    // a condition without a def-timeline has nothing to
                    // retarget, so the cycle ends here
                    self.visit_block(f, lp.update, &bf)?;
                }
                self.visit_block(f, lp.after, &fr)
            }
        }
    }

    /// Leaves `sub` with the given pass-through frontier and continues into
    /// the parent's following regions.
    fn ascend(
        &self,
        f: &mut Function,
        sub: CompId,
        frontier: LinkSet<BlockId>,
    ) -> Result<(), CoreError> {
        if frontier.is_empty() {
            return Ok(());
        }
        let Some(parent) = f.parent(sub) else {
            return Ok(());
        };
        enum Shape {
            Seq(Vec<CompId>, usize),
            ForkCondition(Vec<CompId>),
            ForkCase,
            Loop(crate::component::Loop, LoopRole),
        }
        let shape = match f.component(parent) {
            Component::Block(_) => unreachable!("blocks have no children"),
            Component::Sequence(s) => {
                let pos = s
                    .children
                    .iter()
                    .position(|c| *c == sub)
                    .expect("child not listed in parent");
                Shape::Seq(s.children.clone(), pos)
            }
            Component::Fork(fk) => {
                if sub == fk.condition.into() {
                    Shape::ForkCondition(fk.cases.clone())
                } else {
                    Shape::ForkCase
                }
            }
            Component::Loop(lp) => {
                let role = lp.role_of(sub).expect("subcomponent not part of the loop");
                Shape::Loop(lp.clone(), role)
            }
        };
        match shape {
            Shape::Seq(children, pos) => {
                let mut fr = frontier;
                for child in &children[pos + 1..] {
                    fr = self.descend(f, *child, fr)?;
                    if fr.is_empty() {
                        return Ok(());
                    }
                }
                self.ascend(f, parent, fr)
            }
            Shape::ForkCondition(cases) => {
                let mut out = LinkSet::new();
                for case in cases {
                    out.merge(&self.descend(f, case, frontier.clone())?);
                }
                self.ascend(f, parent, out)
            }
            Shape::ForkCase => self.ascend(f, parent, frontier),
            Shape::Loop(lp, role) => match role {
                LoopRole::Start => {
                    let fr = self.visit_block(f, lp.condition, &frontier)?;
                    if fr.is_empty() {
                        return Ok(());
                    }
                    let bf = self.descend(f, lp.body, fr.clone())?;
                    if !bf.is_empty() {
                        self.visit_block(f, lp.update, &bf)?;
                    }
                    let af = self.visit_block(f, lp.after, &fr)?;
                    self.ascend(f, parent, af)
                }
                LoopRole::Condition => {
                    let bf = self.descend(f, lp.body, frontier.clone())?;
                    if !bf.is_empty() {
                        self.visit_block(f, lp.update, &bf)?;
                    }
                    let af = self.visit_block(f, lp.after, &frontier)?;
                    self.ascend(f, parent, af)
                }
                LoopRole::Body => {
                    let uf = self.visit_block(f, lp.update, &frontier)?;
                    if uf.is_empty() {
                        return Ok(());
                    }
                    let cf = self.visit_block(f, lp.condition, &uf)?;
                    if cf.is_empty() {
                        return Ok(());
                    }
                    let bf = self.descend(f, lp.body, cf.clone())?;
                    if !bf.is_empty() {
                        self.visit_block(f, lp.update, &bf)?;
                    }
                    let af = self.visit_block(f, lp.after, &cf)?;
                    self.ascend(f, parent, af)
                }
                LoopRole::Update => {
                    let cf = self.visit_block(f, lp.condition, &frontier)?;
                    if cf.is_empty() {
                        return Ok(());
                    }
                    let bf = self.descend(f, lp.body, cf.clone())?;
                    if !bf.is_empty() {
                        self.visit_block(f, lp.update, &bf)?;
                    }
                    let af = self.visit_block(f, lp.after, &cf)?;
                    self.ascend(f, parent, af)
                }
                LoopRole::After => self.ascend(f, parent, frontier),
            },
        }
    }
}

impl Function {
    /// Repoints downstream incoming nodes at the new dominator `dom`.
    ///
    /// After this, every incoming node whose predecessor edge is reachable
    /// from `dom.block` through blocks without a def-timeline for the
    /// variable references `dom`; blocks holding a def-timeline shadow the
    /// walk.
    pub fn propagate_def(&mut self, dom: DtKey) -> Result<(), CoreError> {
        let p = DefPropagator { dom };
        p.ascend(self, dom.block.into(), LinkSet::from_one(dom.block))
    }

    /// Repoints the incoming node of `DT(block, var)` for edge
    /// `pred -> block` at `dom`, keeping successor backlinks consistent and
    /// re-evaluating the affected phi decisions.
    pub(crate) fn retarget_incoming(
        &mut self,
        block: BlockId,
        var: VarId,
        pred: BlockId,
        dom: DtKey,
    ) -> Result<(), CoreError> {
        let key = DtKey::new(block, var);
        let olds = match self
            .block(block)
            .dt(var)
            .and_then(|dt| dt.find_incoming(pred).map(|n| n.timelines.clone()))
        {
            Some(olds) => olds,
            None => return Ok(()),
        };
        if olds.len() == 1 && olds.contains(&dom) {
            return Ok(());
        }
        {
            let dt = self.block_mut(block).dt_mut(var).unwrap();
            let node = dt.find_incoming_mut(pred).unwrap();
            node.timelines = LinkSet::from_one(dom);
        }
        for old in olds.iter() {
            if *old == dom {
                continue;
            }
            let still_referenced = self
                .block(block)
                .dt(var)
                .unwrap()
                .incoming()
                .iter()
                .any(|n| n.timelines.contains(old));
            if !still_referenced {
                if let Some(old_dt) = self.block_mut(old.block).dt_mut(old.var) {
                    old_dt.remove_successor(key);
                }
            }
        }
        self.ensure_dt(dom.block, dom.var).add_successor(key);
        self.refresh_joins_from(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::OperandSpec;
    use crate::metadata::Opcode;
    use crate::timeline::TimelineHead;
    use crate::types::{Constant, IrType, ScalarType};

    fn int() -> IrType {
        IrType::Scalar(ScalarType::I32)
    }

    fn c(v: i32) -> OperandSpec {
        OperandSpec::Const(Constant::I32(v))
    }

    #[test]
    fn new_def_repoints_downstream_incoming() {
        // entry: x = 1 ... mid (empty) ... last: z = x + 1
        // Defining x in mid afterwards must repoint last's incoming node.
        let mut f = Function::new("f", ("z", int()), &[]);
        let body = f.body();
        let entry = f.entry();
        let z = f.ret_var();
        let x = f.create_variable("x", Some(int())).unwrap();

        f.append_with_def(entry, Opcode::Assign, x, &[c(1)]).unwrap();
        let mid = f.emplace_back_block(body).unwrap();
        let last = f.emplace_back_block(body).unwrap();
        f.append_with_def(last, Opcode::Add, z, &[OperandSpec::Var(x), c(1)])
            .unwrap();

        // the join initially reaches back to the remote entry timeline
        let node_before = f.block(last).dt(x).unwrap().find_incoming(mid).unwrap();
        assert!(node_before.timelines.contains(&DtKey::new(entry, x)));

        // installing a def in mid shadows the entry def downstream
        f.append_with_def(mid, Opcode::Assign, x, &[c(5)]).unwrap();

        let node_after = f.block(last).dt(x).unwrap().find_incoming(mid).unwrap();
        assert!(node_after.timelines.contains(&DtKey::new(mid, x)));
        assert!(!node_after.timelines.contains(&DtKey::new(entry, x)));

        // successor links follow the repointing
        assert!(f
            .block(mid)
            .dt(x)
            .unwrap()
            .succs()
            .contains(&DtKey::new(last, x)));
        assert!(!f
            .block(entry)
            .dt(x)
            .unwrap()
            .succs()
            .contains(&DtKey::new(last, x)));
    }

    #[test]
    fn propagation_stops_at_local_redefinition() {
        // entry: x = 1 ... mid: x = 2 ... last uses x.
        // A fresh propagation from the entry def must not disturb last's
        // node, because mid's local def shadows it.
        let mut f = Function::new("f", ("z", int()), &[]);
        let body = f.body();
        let entry = f.entry();
        let z = f.ret_var();
        let x = f.create_variable("x", Some(int())).unwrap();

        f.append_with_def(entry, Opcode::Assign, x, &[c(1)]).unwrap();
        let mid = f.emplace_back_block(body).unwrap();
        f.append_with_def(mid, Opcode::Assign, x, &[c(2)]).unwrap();
        let last = f.emplace_back_block(body).unwrap();
        f.append_with_def(last, Opcode::Add, z, &[OperandSpec::Var(x), c(1)])
            .unwrap();

        let before = f
            .block(last)
            .dt(x)
            .unwrap()
            .find_incoming(mid)
            .unwrap()
            .timelines
            .clone();
        assert!(before.contains(&DtKey::new(mid, x)));

        f.propagate_def(DtKey::new(entry, x)).unwrap();

        let after = f
            .block(last)
            .dt(x)
            .unwrap()
            .find_incoming(mid)
            .unwrap()
            .timelines
            .clone();
        assert_eq!(before, after, "the mid redefinition shadows propagation");
    }

    #[test]
    fn propagation_enters_fork_cases() {
        // entry: x = 1; mid (empty); fork with a case using x. The case's
        // node points remotely at the entry timeline until a def lands in
        // mid, which repoints it.
        let mut f = Function::new("f", ("z", int()), &[]);
        let body = f.body();
        let entry = f.entry();
        let z = f.ret_var();
        let cv = f.anonymous_variable();
        let x = f.create_variable("x", Some(int())).unwrap();

        f.append_with_def(entry, Opcode::Assign, x, &[c(1)]).unwrap();
        let mid = f.emplace_back_block(body).unwrap();
        let fork = f.emplace_back_fork(body, cv).unwrap();
        let cond = match f.component(fork) {
            Component::Fork(fk) => fk.condition,
            _ => unreachable!(),
        };
        f.append_with_def(cond, Opcode::Eq, cv, &[c(0), c(0)]).unwrap();
        let t = f.fork_add_case_block(fork).unwrap();
        f.fork_add_case_block(fork).unwrap();
        f.append_with_def(t, Opcode::Add, z, &[OperandSpec::Var(x), c(1)])
            .unwrap();

        // the use inside the case points remotely past cond and mid
        let node = f.block(t).dt(x).unwrap().find_incoming(cond).unwrap();
        assert!(node.timelines.contains(&DtKey::new(entry, x)));
        assert!(f.block(cond).dt(x).is_none());
        assert!(f.block(mid).dt(x).is_none());

        // new dominator in mid repoints the case's node
        f.append_with_def(mid, Opcode::Assign, x, &[c(9)]).unwrap();
        let node = f.block(t).dt(x).unwrap().find_incoming(cond).unwrap();
        assert!(node.timelines.contains(&DtKey::new(mid, x)));
        assert!(!node.timelines.contains(&DtKey::new(entry, x)));
    }

    #[test]
    fn retarget_promotes_join_to_phi() {
        // x = 1 before a fork; a later use joins both cases homogeneously.
        // Defining x inside one case afterwards makes the join heterogeneous
        // and must promote it to a phi.
        let mut f = Function::new("f", ("z", int()), &[]);
        let body = f.body();
        let entry = f.entry();
        let z = f.ret_var();
        let cv = f.anonymous_variable();
        let x = f.create_variable("x", Some(int())).unwrap();

        f.append_with_def(entry, Opcode::Assign, x, &[c(1)]).unwrap();
        let fork = f.emplace_back_fork(body, cv).unwrap();
        let cond = match f.component(fork) {
            Component::Fork(fk) => fk.condition,
            _ => unreachable!(),
        };
        f.append_with_def(cond, Opcode::Eq, cv, &[c(0), c(0)]).unwrap();
        let t = f.fork_add_case_block(fork).unwrap();
        f.fork_add_case_block(fork).unwrap();
        let after = f.emplace_back_block(body).unwrap();
        f.append_with_def(after, Opcode::Assign, z, &[OperandSpec::Var(x)])
            .unwrap();

        assert_eq!(
            f.block(after).dt(x).unwrap().incoming_timeline().unwrap().head,
            TimelineHead::Incoming
        );

        // the new def in the true case reaches the join and promotes it
        f.append_with_def(t, Opcode::Assign, x, &[c(2)]).unwrap();

        let dt = f.block(after).dt(x).unwrap();
        assert!(matches!(
            dt.incoming_timeline().unwrap().head,
            TimelineHead::Instr(_)
        ));
        assert_eq!(f.block(after).phi_instructions().len(), 1);
        assert!(dt
            .find_incoming(t)
            .unwrap()
            .timelines
            .contains(&DtKey::new(t, x)));
    }
}
