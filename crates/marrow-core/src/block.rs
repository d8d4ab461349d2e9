//! Blocks and the instruction mutation surface.
//!
//! A block holds a phi prefix and a body of instructions, plus the
//! def-timeline map for every variable observed in it. All mutation goes
//! through the owning [`Function`], which binds operands against the
//! reaching use-timeline at the insertion position, tracks new defs,
//! splits shadowed timelines, and splices uses backward on erasure.

use indexmap::IndexMap;
use smallvec::{smallvec, SmallVec};

use crate::error::CoreError;
use crate::function::Function;
use crate::id::{BlockId, DtKey, InstrId, TimelineId, VarId};
use crate::instruction::{Instruction, Operand, Use};
use crate::metadata::Opcode;
use crate::timeline::{DefTimeline, TimelineHead, UseId, UseTimeline};
use crate::types::{lca, Constant, IrType};

/// A basic block: phi prefix, body, and per-variable def-timelines.
#[derive(Debug, Clone)]
pub struct Block {
    name: Option<String>,
    pub(crate) phis: Vec<Instruction>,
    pub(crate) body: Vec<Instruction>,
    pub(crate) dts: IndexMap<VarId, DefTimeline>,
    condition_var: Option<VarId>,
}

impl Block {
    pub(crate) fn new(condition_var: Option<VarId>) -> Self {
        Block {
            name: None,
            phis: Vec::new(),
            body: Vec::new(),
            dts: IndexMap::new(),
            condition_var,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = Some(name.to_string());
    }

    /// The variable this block branches on, for fork and loop conditions.
    pub fn condition_variable(&self) -> Option<VarId> {
        self.condition_var
    }

    pub fn phi_instructions(&self) -> &[Instruction] {
        &self.phis
    }

    pub fn body_instructions(&self) -> &[Instruction] {
        &self.body
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// Body position of `instr`, if it is a body instruction of this block.
    pub fn position_of(&self, instr: InstrId) -> Option<usize> {
        self.body.iter().position(|i| i.id == instr)
    }

    /// Looks up an instruction in the phi prefix or the body.
    pub fn instruction(&self, instr: InstrId) -> Option<&Instruction> {
        self.phis
            .iter()
            .chain(self.body.iter())
            .find(|i| i.id == instr)
    }

    pub(crate) fn instruction_mut(&mut self, instr: InstrId) -> Option<&mut Instruction> {
        self.phis
            .iter_mut()
            .chain(self.body.iter_mut())
            .find(|i| i.id == instr)
    }

    /// The def-timeline for `var`, if one exists.
    pub fn dt(&self, var: VarId) -> Option<&DefTimeline> {
        self.dts.get(&var)
    }

    pub(crate) fn dt_mut(&mut self, var: VarId) -> Option<&mut DefTimeline> {
        self.dts.get_mut(&var)
    }

    /// Iterates def-timelines in creation order.
    pub fn dts(&self) -> impl Iterator<Item = (VarId, &DefTimeline)> {
        self.dts.iter().map(|(v, dt)| (*v, dt))
    }
}

/// An operand as supplied to the mutation API, before binding.
#[derive(Debug, Clone, Copy)]
pub enum OperandSpec {
    Const(Constant),
    Var(VarId),
}

impl From<Constant> for OperandSpec {
    fn from(c: Constant) -> Self {
        OperandSpec::Const(c)
    }
}

impl From<VarId> for OperandSpec {
    fn from(v: VarId) -> Self {
        OperandSpec::Var(v)
    }
}

impl Function {
    // -----------------------------------------------------------------------
    // Reaching-def queries
    // -----------------------------------------------------------------------

    /// The reaching use-timeline for `var` strictly before body position
    /// `pos`, without materialising anything.
    pub(crate) fn peek_reaching_before(
        &self,
        block: BlockId,
        pos: usize,
        var: VarId,
    ) -> Option<TimelineId> {
        let b = self.block(block);
        let dt = b.dt(var)?;
        for tl in dt.locals().iter().rev() {
            if let Some(h) = tl.head_instr() {
                if let Some(p) = b.position_of(h) {
                    if p < pos {
                        return Some(tl.id);
                    }
                }
            }
        }
        dt.incoming_timeline().map(|t| t.id)
    }

    /// The reaching use-timeline for `var` before body position `pos`,
    /// materialising the incoming timeline by joining if no def precedes
    /// the position.
    pub fn reaching_timeline_before(
        &mut self,
        block: BlockId,
        pos: usize,
        var: VarId,
    ) -> Result<TimelineId, CoreError> {
        if let Some(tl) = self.peek_reaching_before(block, pos, var) {
            return Ok(tl);
        }
        self.materialize_incoming(block, var)
    }

    /// The use-timeline whose def flows out of `block` for `var`.
    pub fn reaching_timeline_at_end(
        &mut self,
        block: BlockId,
        var: VarId,
    ) -> Result<TimelineId, CoreError> {
        let end = self.block(block).body_len();
        self.reaching_timeline_before(block, end, var)
    }

    pub(crate) fn ensure_dt(&mut self, block: BlockId, var: VarId) -> &mut DefTimeline {
        self.block_mut(block)
            .dts
            .entry(var)
            .or_insert_with(|| DefTimeline::new(block, var))
    }

    // -----------------------------------------------------------------------
    // Append / insert
    // -----------------------------------------------------------------------

    /// Appends a def-producing instruction at the end of `block`.
    pub fn append_with_def(
        &mut self,
        block: BlockId,
        op: Opcode,
        var: VarId,
        operands: &[OperandSpec],
    ) -> Result<InstrId, CoreError> {
        let pos = self.block(block).body_len();
        self.emplace(block, pos, op, Some(var), operands)
    }

    /// Appends a non-def instruction at the end of `block`.
    pub fn append(
        &mut self,
        block: BlockId,
        op: Opcode,
        operands: &[OperandSpec],
    ) -> Result<InstrId, CoreError> {
        let pos = self.block(block).body_len();
        self.emplace(block, pos, op, None, operands)
    }

    /// Inserts a def-producing instruction at body position `pos`.
    ///
    /// Operands bind against the reaching def before `pos`; uses already
    /// attached to a newer local timeline are not transferred, while uses of
    /// the shadowed timeline after `pos` rebind to the new def.
    pub fn insert_with_def(
        &mut self,
        block: BlockId,
        pos: usize,
        op: Opcode,
        var: VarId,
        operands: &[OperandSpec],
    ) -> Result<InstrId, CoreError> {
        self.emplace(block, pos, op, Some(var), operands)
    }

    /// Inserts a non-def instruction at body position `pos`.
    pub fn insert(
        &mut self,
        block: BlockId,
        pos: usize,
        op: Opcode,
        operands: &[OperandSpec],
    ) -> Result<InstrId, CoreError> {
        self.emplace(block, pos, op, None, operands)
    }

    fn emplace(
        &mut self,
        block: BlockId,
        pos: usize,
        op: Opcode,
        def_var: Option<VarId>,
        operands: &[OperandSpec],
    ) -> Result<InstrId, CoreError> {
        if op.is_abstract() {
            return Err(CoreError::AbstractOpcode(op));
        }
        if op == Opcode::Phi {
            return Err(CoreError::DefMismatch {
                op,
                reason: "phi instructions are managed through create_phi",
            });
        }
        if let Some(expected) = op.arity().count() {
            if operands.len() != expected {
                return Err(CoreError::ArityMismatch {
                    op,
                    expected,
                    got: operands.len(),
                });
            }
        }
        match (op.has_def(), def_var.is_some()) {
            (true, false) => {
                return Err(CoreError::DefMismatch {
                    op,
                    reason: "produces a def but no target variable was given",
                })
            }
            (false, true) => {
                return Err(CoreError::DefMismatch {
                    op,
                    reason: "produces no def but a target variable was given",
                })
            }
            _ => {}
        }
        if pos > self.block(block).body_len() {
            return Err(CoreError::PositionOutOfRange { block, pos });
        }

        // Bind operands against the reaching timelines before `pos`. This may
        // materialise incoming timelines (and phis) on demand.
        let mut bound: SmallVec<[Operand; 2]> = SmallVec::with_capacity(operands.len());
        for spec in operands {
            match spec {
                OperandSpec::Const(c) => bound.push(Operand::Constant(*c)),
                OperandSpec::Var(v) => {
                    let tl = self.reaching_timeline_before(block, pos, *v)?;
                    bound.push(Operand::Use(Use {
                        var: *v,
                        timeline: tl,
                    }));
                }
            }
        }

        let id = self.alloc_instr_id();
        let def = match def_var {
            Some(v) => {
                let ty = self.infer_def_ty(op, block, &bound, v);
                Some(self.alloc_def(v, ty))
            }
            None => None,
        };

        // Register the uses on their timelines.
        for (idx, opnd) in bound.iter().enumerate() {
            if let Operand::Use(u) = opnd {
                let use_id = UseId {
                    instr: id,
                    operand: idx as u32,
                };
                let dt = self
                    .block_mut(block)
                    .dt_mut(u.var)
                    .expect("bound timeline lives in this block");
                dt.timeline_mut(u.timeline)
                    .expect("bound timeline exists")
                    .push_use(use_id);
            }
        }

        self.block_mut(block)
            .body
            .insert(pos, Instruction::new(id, op, def, bound));
        self.instr_blocks.insert(id, block);

        if def.is_some() {
            self.track_def_at(block, pos, id, def_var.unwrap())?;
        }
        Ok(id)
    }

    /// Installs the local use-timeline for a def created at `pos`, splits the
    /// shadowed timeline, and propagates when the block starts defining the
    /// variable.
    fn track_def_at(
        &mut self,
        block: BlockId,
        pos: usize,
        instr: InstrId,
        var: VarId,
    ) -> Result<(), CoreError> {
        let had_locals = self
            .block(block)
            .dt(var)
            .map_or(false, |dt| dt.has_local_timelines());

        // Timeline shadowed by the new def. The instruction already sits at
        // `pos` but has no timeline yet, so whatever reaches past it is the
        // timeline it shadows.
        let shadowed = self.peek_reaching_before(block, pos + 1, var);

        let tl_id = self.alloc_timeline_id();
        {
            // insert the local timeline in body-position order
            let b = self.block(block);
            let insert_idx = match b.dt(var) {
                Some(dt) => {
                    let mut idx = 0;
                    for tl in dt.locals() {
                        let hp = tl.head_instr().and_then(|h| b.position_of(h));
                        match hp {
                            Some(p) if p < pos => idx += 1,
                            _ => break,
                        }
                    }
                    idx
                }
                None => 0,
            };
            let dt = self.ensure_dt(block, var);
            dt.locals_mut()
                .insert(insert_idx, UseTimeline::new(tl_id, TimelineHead::Instr(instr)));
        }

        // Rebind uses of the shadowed timeline that the new def dominates.
        if let Some(prev_id) = shadowed {
            let moves: SmallVec<[UseId; 4]> = {
                let b = self.block(block);
                let dt = b.dt(var).expect("def-timeline exists");
                match dt.timeline(prev_id) {
                    Some(tl) => tl
                        .uses()
                        .iter()
                        .copied()
                        .filter(|u| b.position_of(u.instr).map_or(false, |p| p > pos))
                        .collect(),
                    None => SmallVec::new(),
                }
            };
            if !moves.is_empty() {
                {
                    let dt = self.block_mut(block).dt_mut(var).unwrap();
                    for u in &moves {
                        dt.timeline_mut(prev_id).unwrap().remove_use(*u);
                    }
                    dt.timeline_mut(tl_id)
                        .unwrap()
                        .append_uses(moves.iter().copied());
                }
                for u in &moves {
                    let b = self.block_mut(block);
                    if let Some(i) = b.instruction_mut(u.instr) {
                        i.operands[u.operand as usize] = Operand::Use(Use {
                            var,
                            timeline: tl_id,
                        });
                    }
                }
            }
        }

        // A block that starts defining the variable shadows what used to flow
        // through it; downstream incoming nodes must be repointed, and joins
        // already pointing here re-evaluated against the new origin.
        if !had_locals {
            let key = DtKey::new(block, var);
            self.propagate_def(key)?;
            self.refresh_joins_from(key)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Erase
    // -----------------------------------------------------------------------

    /// Erases the body instruction at `pos`.
    ///
    /// If it defines a variable, the uses of its timeline are spliced
    /// backward onto the previous timeline (local, else incoming -- joined on
    /// demand), never orphaned.
    pub fn erase(&mut self, block: BlockId, pos: usize) -> Result<(), CoreError> {
        let instr = {
            let b = self.block(block);
            if pos >= b.body_len() {
                return Err(CoreError::PositionOutOfRange { block, pos });
            }
            b.body[pos].clone()
        };

        // Unregister this instruction's own uses.
        for (idx, opnd) in instr.operands.iter().enumerate() {
            if let Operand::Use(u) = opnd {
                let use_id = UseId {
                    instr: instr.id,
                    operand: idx as u32,
                };
                if let Some(dt) = self.block_mut(block).dt_mut(u.var) {
                    if let Some(tl) = dt.timeline_mut(u.timeline) {
                        tl.remove_use(use_id);
                    }
                }
            }
        }

        if let Some(def) = instr.def {
            let var = def.var;
            let (tl_idx, tl_id, uses) = {
                let dt = self
                    .block(block)
                    .dt(var)
                    .ok_or_else(|| CoreError::InvariantViolation {
                        reason: format!("def without a def-timeline in block {}", block),
                    })?;
                let idx = dt
                    .locals()
                    .iter()
                    .position(|t| t.head_instr() == Some(instr.id))
                    .ok_or_else(|| CoreError::InvariantViolation {
                        reason: "def instruction has no local timeline".to_string(),
                    })?;
                let tl = &dt.locals()[idx];
                let uses: SmallVec<[UseId; 4]> = tl.uses().iter().copied().collect();
                (idx, tl.id, uses)
            };

            if !uses.is_empty() {
                // Splice forward onto the previous timeline.
                let prev_id = {
                    let dt = self.block(block).dt(var).unwrap();
                    if tl_idx > 0 {
                        Some(dt.locals()[tl_idx - 1].id)
                    } else {
                        dt.incoming_timeline().map(|t| t.id)
                    }
                };
                let prev_id = match prev_id {
                    Some(p) => p,
                    None => self.materialize_incoming(block, var)?,
                };
                {
                    let dt = self.block_mut(block).dt_mut(var).unwrap();
                    dt.timeline_mut(prev_id)
                        .expect("previous timeline exists")
                        .append_uses(uses.iter().copied());
                }
                for u in &uses {
                    let b = self.block_mut(block);
                    if let Some(i) = b.instruction_mut(u.instr) {
                        i.operands[u.operand as usize] = Operand::Use(Use {
                            var,
                            timeline: prev_id,
                        });
                    }
                }
            }
            // Drop the local timeline.
            let dt = self.block_mut(block).dt_mut(var).unwrap();
            dt.locals_mut().remove(tl_idx);
        }

        self.block_mut(block).body.remove(pos);
        self.instr_blocks.remove(&instr.id);

        // The block's outgoing origin may have changed; downstream joins
        // re-evaluate against it.
        if let Some(def) = instr.def {
            self.refresh_joins_from(DtKey::new(block, def.var))?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Phi prefix management
    // -----------------------------------------------------------------------

    /// Materialises a phi instruction heading the incoming timeline of
    /// `var` at `block`, creating the timeline if necessary. Returns the
    /// phi's instruction id (the existing one if already materialised).
    pub fn create_phi(&mut self, block: BlockId, var: VarId) -> Result<InstrId, CoreError> {
        let existing_head = self
            .block(block)
            .dt(var)
            .and_then(|dt| dt.incoming_timeline())
            .map(|t| t.head);
        match existing_head {
            Some(TimelineHead::Instr(i)) => return Ok(i),
            Some(TimelineHead::Param) => {
                return Err(CoreError::InvariantViolation {
                    reason: "cannot replace a parameter timeline with a phi".to_string(),
                })
            }
            Some(_) => {}
            None => {
                let tl = self.alloc_timeline_id();
                self.ensure_dt(block, var)
                    .create_incoming_timeline(tl, TimelineHead::Incoming);
            }
        }

        let id = self.alloc_instr_id();
        let def = self.alloc_def(var, None);
        self.block_mut(block)
            .phis
            .push(Instruction::new(id, Opcode::Phi, Some(def), smallvec![]));
        self.instr_blocks.insert(id, block);
        self.block_mut(block)
            .dt_mut(var)
            .unwrap()
            .incoming_timeline_mut()
            .unwrap()
            .head = TimelineHead::Instr(id);
        Ok(id)
    }

    /// Demotes the phi heading `var`'s incoming timeline back to a logical
    /// join head, removing the phi instruction. The timeline and its uses
    /// survive.
    pub fn erase_phi(&mut self, block: BlockId, var: VarId) -> Result<(), CoreError> {
        let phi_id = {
            let dt = self
                .block(block)
                .dt(var)
                .ok_or_else(|| CoreError::InvariantViolation {
                    reason: format!("no def-timeline for variable {} in block {}", var, block),
                })?;
            match dt.incoming_timeline().map(|t| t.head) {
                Some(TimelineHead::Instr(i)) => i,
                _ => {
                    return Err(CoreError::InvariantViolation {
                        reason: "incoming timeline is not headed by a phi".to_string(),
                    })
                }
            }
        };
        let b = self.block_mut(block);
        b.phis.retain(|i| i.id != phi_id);
        b.dt_mut(var).unwrap().incoming_timeline_mut().unwrap().head = TimelineHead::Incoming;
        self.instr_blocks.remove(&phi_id);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Type inference helpers
    // -----------------------------------------------------------------------

    /// Best-effort type of an operand value.
    pub(crate) fn operand_ty(&self, block: BlockId, opnd: &Operand) -> Option<IrType> {
        match opnd {
            Operand::Constant(c) => Some(c.ty()),
            Operand::Use(u) => {
                let fallback = self.variable(u.var).ty;
                let dt = match self.block(block).dt(u.var) {
                    Some(dt) => dt,
                    None => return fallback,
                };
                match dt.timeline(u.timeline).map(|t| t.head) {
                    Some(TimelineHead::Instr(i)) => {
                        self.instr_def(i).and_then(|d| d.ty).or(fallback)
                    }
                    _ => fallback,
                }
            }
        }
    }

    fn infer_def_ty(
        &self,
        op: Opcode,
        block: BlockId,
        operands: &[Operand],
        var: VarId,
    ) -> Option<IrType> {
        use crate::types::ScalarType;
        let vty = self.variable(var).ty;
        if op.is_a(Opcode::Relation) || op.is_a(Opcode::Logical) {
            return Some(IrType::Scalar(ScalarType::Bool));
        }
        match op {
            Opcode::Assign | Opcode::Fetch => operands
                .first()
                .and_then(|o| self.operand_ty(block, o))
                .or(vty),
            Opcode::Convert => vty.or_else(|| {
                operands.first().and_then(|o| self.operand_ty(block, o))
            }),
            Opcode::Phi => None,
            _ if op.is_a(Opcode::Arithmetic) || op.is_a(Opcode::Bitwise) => {
                let mut acc: Option<IrType> = None;
                for o in operands {
                    if let Some(t) = self.operand_ty(block, o) {
                        acc = Some(match acc {
                            Some(a) => lca(a, t),
                            None => t,
                        });
                    }
                }
                acc.or(vty)
            }
            _ => vty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::DefId;
    use crate::types::ScalarType;

    fn int() -> IrType {
        IrType::Scalar(ScalarType::I32)
    }

    fn c(v: i32) -> OperandSpec {
        OperandSpec::Const(Constant::I32(v))
    }

    #[test]
    fn append_allocates_monotone_defs() {
        let mut f = Function::new("f", ("z", int()), &[]);
        let entry = f.entry();
        let z = f.ret_var();
        f.append_with_def(entry, Opcode::Assign, z, &[c(1)]).unwrap();
        f.append_with_def(entry, Opcode::Assign, z, &[c(2)]).unwrap();
        let b = f.block(entry);
        assert_eq!(b.body_len(), 2);
        assert_eq!(b.body_instructions()[0].def.unwrap().id, DefId(0));
        assert_eq!(b.body_instructions()[1].def.unwrap().id, DefId(1));
        assert_eq!(b.dt(z).unwrap().locals().len(), 2);
    }

    #[test]
    fn use_binds_to_latest_preceding_def() {
        let mut f = Function::new("f", ("z", int()), &[]);
        let entry = f.entry();
        let z = f.ret_var();
        let x = f.create_variable("x", Some(int())).unwrap();
        f.append_with_def(entry, Opcode::Assign, x, &[c(1)]).unwrap();
        f.append_with_def(entry, Opcode::Assign, x, &[c(2)]).unwrap();
        f.append_with_def(entry, Opcode::Add, z, &[OperandSpec::Var(x), c(3)])
            .unwrap();

        let b = f.block(entry);
        let add = &b.body_instructions()[2];
        let u = add.operands[0].as_use().unwrap();
        let dt = b.dt(x).unwrap();
        // bound to the second (latest) local timeline
        assert_eq!(dt.locals()[1].id, u.timeline);
        assert_eq!(dt.locals()[1].uses().len(), 1);
        assert!(dt.locals()[0].uses().is_empty());
    }

    #[test]
    fn arity_and_def_validation() {
        let mut f = Function::new("f", ("z", int()), &[]);
        let entry = f.entry();
        let z = f.ret_var();
        assert!(matches!(
            f.append_with_def(entry, Opcode::Add, z, &[c(1)]),
            Err(CoreError::ArityMismatch { .. })
        ));
        assert!(matches!(
            f.append(entry, Opcode::Add, &[c(1), c(2)]),
            Err(CoreError::DefMismatch { .. })
        ));
        assert!(matches!(
            f.append_with_def(entry, Opcode::Arithmetic, z, &[c(1), c(2)]),
            Err(CoreError::AbstractOpcode(_))
        ));
    }

    #[test]
    fn insert_rebinds_dominated_uses() {
        let mut f = Function::new("f", ("z", int()), &[]);
        let entry = f.entry();
        let z = f.ret_var();
        let x = f.create_variable("x", Some(int())).unwrap();
        f.append_with_def(entry, Opcode::Assign, x, &[c(1)]).unwrap();
        f.append_with_def(entry, Opcode::Add, z, &[OperandSpec::Var(x), c(3)])
            .unwrap();

        // insert a second def of x between the first def and the use
        f.insert_with_def(entry, 1, Opcode::Assign, x, &[c(9)]).unwrap();

        let b = f.block(entry);
        assert_eq!(b.body_len(), 3);
        let add = &b.body_instructions()[2];
        let u = add.operands[0].as_use().unwrap();
        let dt = b.dt(x).unwrap();
        assert_eq!(dt.locals().len(), 2);
        // the use now binds to the inserted def's timeline
        assert_eq!(u.timeline, dt.locals()[1].id);
        assert_eq!(
            dt.locals()[1].head_instr(),
            Some(b.body_instructions()[1].id)
        );
        assert!(dt.locals()[0].uses().is_empty());
    }

    #[test]
    fn insert_does_not_steal_newer_uses() {
        let mut f = Function::new("f", ("z", int()), &[]);
        let entry = f.entry();
        let z = f.ret_var();
        let x = f.create_variable("x", Some(int())).unwrap();
        f.append_with_def(entry, Opcode::Assign, x, &[c(1)]).unwrap();
        f.append_with_def(entry, Opcode::Assign, x, &[c(2)]).unwrap();
        f.append_with_def(entry, Opcode::Add, z, &[OperandSpec::Var(x), c(3)])
            .unwrap();

        // insert before the *first* def; the use is attached to the second
        // (newer) local timeline and must stay there
        f.insert_with_def(entry, 0, Opcode::Assign, x, &[c(7)]).unwrap();

        let b = f.block(entry);
        let add = &b.body_instructions()[3];
        let u = add.operands[0].as_use().unwrap();
        let dt = b.dt(x).unwrap();
        assert_eq!(dt.locals().len(), 3);
        assert_eq!(u.timeline, dt.locals()[2].id);
    }

    #[test]
    fn erase_splices_uses_backward() {
        let mut f = Function::new("f", ("z", int()), &[]);
        let entry = f.entry();
        let z = f.ret_var();
        let x = f.create_variable("x", Some(int())).unwrap();
        f.append_with_def(entry, Opcode::Assign, x, &[c(1)]).unwrap();
        f.append_with_def(entry, Opcode::Assign, x, &[c(2)]).unwrap();
        f.append_with_def(entry, Opcode::Add, z, &[OperandSpec::Var(x), c(3)])
            .unwrap();

        // erase the second def of x; the use re-attaches to the first
        f.erase(entry, 1).unwrap();

        let b = f.block(entry);
        assert_eq!(b.body_len(), 2);
        let add = &b.body_instructions()[1];
        let u = add.operands[0].as_use().unwrap();
        let dt = b.dt(x).unwrap();
        assert_eq!(dt.locals().len(), 1);
        assert_eq!(u.timeline, dt.locals()[0].id);
        assert_eq!(dt.locals()[0].uses().len(), 1);
    }

    #[test]
    fn create_and_erase_phi() {
        let mut f = Function::new("f", ("z", int()), &[]);
        let entry = f.entry();
        let z = f.ret_var();
        let phi = f.create_phi(entry, z).unwrap();
        assert_eq!(f.block(entry).phi_instructions().len(), 1);
        assert!(f.block(entry).phi_instructions()[0].is_phi());
        // idempotent
        assert_eq!(f.create_phi(entry, z).unwrap(), phi);

        f.erase_phi(entry, z).unwrap();
        assert!(f.block(entry).phi_instructions().is_empty());
        let dt = f.block(entry).dt(z).unwrap();
        assert_eq!(
            dt.incoming_timeline().unwrap().head,
            TimelineHead::Incoming
        );
    }

    #[test]
    fn relation_defs_are_bool() {
        let mut f = Function::new("f", ("z", IrType::Scalar(ScalarType::Bool)), &[]);
        let entry = f.entry();
        let z = f.ret_var();
        let i = f.append_with_def(entry, Opcode::Lt, z, &[c(1), c(2)]).unwrap();
        assert_eq!(
            f.instr_def(i).unwrap().ty,
            Some(IrType::Scalar(ScalarType::Bool))
        );
    }

    #[test]
    fn arithmetic_def_ty_is_lca_of_operands() {
        let mut f = Function::new("f", ("z", int()), &[]);
        let entry = f.entry();
        let z = f.ret_var();
        let i = f
            .append_with_def(
                entry,
                Opcode::Add,
                z,
                &[
                    OperandSpec::Const(Constant::I32(1)),
                    OperandSpec::Const(Constant::I64(2)),
                ],
            )
            .unwrap();
        assert_eq!(
            f.instr_def(i).unwrap().ty,
            Some(IrType::Scalar(ScalarType::I64))
        );
    }
}
