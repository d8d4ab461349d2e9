//! Flattening a resolved function into its static form.
//!
//! Lowering walks the structured tree in deterministic order and produces
//! numbered blocks, dense per-variable def ids, explicit phi instructions
//! (one `(use, predecessor-id)` pair per incoming edge), synthesized branch
//! instructions, and a `terminate` in the exit block returning the reaching
//! def of the return slot.
//!
//! Variable types are unified to the lca over their defs' types; a phi
//! input whose def carries a narrower type gets a `convert` instruction in
//! the corresponding predecessor block, so every phi sees operands of its
//! result type. Undefined inputs lower to the undefined constant, which the
//! back end turns into a runtime uninitialised-use report.
//!
//! Lowering is idempotent over the dynamic IR it completes (the exit block
//! and `terminate` are only added once), so lowering an unchanged function
//! twice yields identical static functions.

use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use smallvec::{smallvec, SmallVec};

use marrow_core::{
    BlockId, CompId, Component, Constant, DefId, Function, IncomingNode, Instruction, IrType,
    Opcode, Operand, OperandSpec, TimelineHead, VarId,
};

use crate::error::LowerError;
use crate::function::{
    StaticBlock, StaticConstant, StaticDef, StaticFunction, StaticInstruction, StaticOperand,
    StaticVariable,
};

/// Lowers `func` into a [`StaticFunction`].
///
/// The function is completed in place first: a single exit block is ensured
/// and `terminate` instructions are appended to the function leaves (both
/// idempotently), materialising any joins the return slot still needs.
pub fn lower(func: &mut Function) -> Result<StaticFunction, LowerError> {
    finalize_exits(func)?;

    let blocks = collect_blocks(func);
    let mut numbers: HashMap<BlockId, u32> = HashMap::new();
    for (i, b) in blocks.iter().enumerate() {
        numbers.insert(*b, i as u32);
    }

    // Flat CFG for predecessor queries during phi emission.
    let mut cfg: DiGraph<BlockId, ()> = DiGraph::new();
    let mut cfg_idx: HashMap<BlockId, NodeIndex> = HashMap::new();
    for b in &blocks {
        cfg_idx.insert(*b, cfg.add_node(*b));
    }
    for b in &blocks {
        for succ in func.block_successors(*b) {
            cfg.add_edge(cfg_idx[b], cfg_idx[&succ], ());
        }
    }

    let mut ctx = LowerCtx {
        def_numbers: HashMap::new(),
        def_tys: HashMap::new(),
        def_count: vec![0; func.num_variables()],
        var_tys: Vec::new(),
    };
    ctx.number_defs(func, &blocks);
    ctx.unify_var_tys(func);

    // Plan phi pairs and the converts they require in predecessor blocks.
    let mut phi_plans: HashMap<BlockId, Vec<PhiPlan>> = HashMap::new();
    let mut converts: HashMap<BlockId, Vec<StaticInstruction>> = HashMap::new();
    for b in &blocks {
        let plans = ctx.plan_phis(func, *b, &numbers, &cfg, &cfg_idx, &mut converts)?;
        if !plans.is_empty() {
            phi_plans.insert(*b, plans);
        }
    }

    // Emit.
    let mut static_blocks = Vec::with_capacity(blocks.len());
    for (num, b) in blocks.iter().enumerate() {
        let mut instructions = Vec::new();

        for plan in phi_plans.remove(b).unwrap_or_default() {
            let mut operands: SmallVec<[StaticOperand; 2]> = SmallVec::new();
            for (value, pred) in plan.pairs {
                operands.push(value);
                operands.push(StaticOperand::Constant(StaticConstant::block_ref(pred)));
            }
            instructions.push(StaticInstruction {
                op: Opcode::Phi,
                def: Some(plan.def),
                operands,
            });
        }

        for instr in func.block(*b).body_instructions() {
            instructions.push(ctx.lower_instruction(func, *b, instr)?);
        }

        instructions.extend(converts.remove(b).unwrap_or_default());

        // Branch synthesis from the structural successors.
        let succs = func.block_successors(*b);
        match succs.len() {
            0 => {
                let terminated = instructions
                    .iter()
                    .any(|i| i.op == Opcode::Terminate);
                if !terminated {
                    return Err(LowerError::MissingTerminator { block: *b });
                }
            }
            1 => {
                instructions.push(StaticInstruction {
                    op: Opcode::UcBranch,
                    def: None,
                    operands: smallvec![StaticOperand::Constant(StaticConstant::block_ref(
                        numbers[&succs[0]]
                    ))],
                });
            }
            2 => {
                let cond = ctx.condition_use(func, *b)?;
                instructions.push(StaticInstruction {
                    op: Opcode::CBranch,
                    def: None,
                    operands: smallvec![
                        StaticOperand::Use(cond),
                        StaticOperand::Constant(StaticConstant::block_ref(numbers[&succs[0]])),
                    ],
                });
                instructions.push(StaticInstruction {
                    op: Opcode::UcBranch,
                    def: None,
                    operands: smallvec![StaticOperand::Constant(StaticConstant::block_ref(
                        numbers[&succs[1]]
                    ))],
                });
            }
            n => {
                return Err(LowerError::UnsupportedFork {
                    block: *b,
                    cases: n,
                })
            }
        }

        let name = match func.block(*b).name() {
            Some(n) => n.to_string(),
            None => format!("b{}", num),
        };
        static_blocks.push(StaticBlock { name, instructions });
    }

    let variables = func
        .variables()
        .map(|(id, v)| StaticVariable {
            name: if v.name.is_empty() {
                format!("#{}", id)
            } else {
                v.name.clone()
            },
            ty: ctx.var_tys[id.0 as usize],
            num_defs: ctx.def_count[id.0 as usize],
        })
        .collect();

    let mut args = vec![func.ret_var().0];
    args.extend(func.params().iter().map(|p| p.0));

    Ok(StaticFunction {
        name: func.name().to_string(),
        args,
        variables,
        blocks: static_blocks,
    })
}

/// Ensures a single exit block and a `terminate` returning the reaching def
/// of the return slot at every function leaf. Idempotent.
fn finalize_exits(func: &mut Function) -> Result<(), LowerError> {
    let body = func.body();
    if func.leaves(body).len() > 1 {
        func.emplace_back_block(body)?;
    }
    let ret = func.ret_var();
    let leaves: Vec<BlockId> = func.leaves(body).iter().copied().collect();
    for leaf in leaves {
        let terminated = func
            .block(leaf)
            .body_instructions()
            .last()
            .map_or(false, |i| i.op == Opcode::Terminate);
        if !terminated {
            func.append(leaf, Opcode::Terminate, &[OperandSpec::Var(ret)])?;
        }
    }
    Ok(())
}

/// Blocks in deterministic structured-tree order; the entry block is first.
fn collect_blocks(func: &Function) -> Vec<BlockId> {
    fn walk(f: &Function, comp: CompId, out: &mut Vec<BlockId>) {
        match f.component(comp) {
            Component::Block(_) => out.push(BlockId(comp.0)),
            Component::Sequence(seq) => {
                for c in &seq.children {
                    walk(f, *c, out);
                }
            }
            Component::Fork(fork) => {
                walk(f, fork.condition.into(), out);
                for c in &fork.cases {
                    walk(f, *c, out);
                }
            }
            Component::Loop(lp) => {
                walk(f, lp.start, out);
                walk(f, lp.condition.into(), out);
                walk(f, lp.body, out);
                walk(f, lp.update.into(), out);
                walk(f, lp.after.into(), out);
            }
        }
    }
    let mut out = Vec::new();
    walk(func, func.body(), &mut out);
    out
}

struct PhiPlan {
    def: StaticDef,
    pairs: Vec<(StaticOperand, u32)>,
}

struct LowerCtx {
    def_numbers: HashMap<(VarId, DefId), u32>,
    def_tys: HashMap<(VarId, DefId), Option<IrType>>,
    def_count: Vec<u32>,
    var_tys: Vec<IrType>,
}

impl LowerCtx {
    /// Assigns dense per-variable static def ids in block order, phis first
    /// per block, with parameter def 0 leading its variable.
    fn number_defs(&mut self, func: &Function, blocks: &[BlockId]) {
        for p in func.params() {
            self.alloc(*p, DefId(0), func.variable(*p).ty);
        }
        for b in blocks {
            let block = func.block(*b);
            for instr in block.phi_instructions().iter().chain(block.body_instructions()) {
                if let Some(d) = instr.def {
                    self.alloc(d.var, d.id, d.ty);
                }
            }
        }
    }

    fn alloc(&mut self, var: VarId, def: DefId, ty: Option<IrType>) -> u32 {
        let n = self.def_count[var.0 as usize];
        self.def_count[var.0 as usize] = n + 1;
        self.def_numbers.insert((var, def), n);
        self.def_tys.insert((var, def), ty);
        n
    }

    /// Each variable's static type: the lca over its defs' known types,
    /// falling back to the declared type and finally `any`.
    fn unify_var_tys(&mut self, func: &Function) {
        self.var_tys = func
            .variables()
            .map(|(id, v)| {
                let mut acc: Option<IrType> = None;
                for ((var, _), ty) in &self.def_tys {
                    if *var == id {
                        if let Some(t) = ty {
                            acc = Some(match acc {
                                Some(a) => marrow_core::lca(a, *t),
                                None => *t,
                            });
                        }
                    }
                }
                acc.or(v.ty).unwrap_or(IrType::Any)
            })
            .collect();
    }

    fn static_def(&self, var: VarId, def: DefId) -> StaticDef {
        StaticDef::new(
            var.0,
            *self
                .def_numbers
                .get(&(var, def))
                .expect("def numbered during the walk"),
        )
    }

    /// Plans the phi instructions of `b` and the converts their inputs need.
    fn plan_phis(
        &mut self,
        func: &Function,
        b: BlockId,
        numbers: &HashMap<BlockId, u32>,
        cfg: &DiGraph<BlockId, ()>,
        cfg_idx: &HashMap<BlockId, NodeIndex>,
        converts: &mut HashMap<BlockId, Vec<StaticInstruction>>,
    ) -> Result<Vec<PhiPlan>, LowerError> {
        let block = func.block(b);
        let mut plans = Vec::new();
        for phi in block.phi_instructions() {
            let def = phi.def.expect("phi instructions carry a def");
            let var = def.var;
            let dt = block.dt(var).expect("phi heads a def-timeline");

            // The phi's incoming predecessors must be exactly the CFG
            // predecessors of the block.
            let cfg_preds: Vec<BlockId> = cfg
                .neighbors_directed(cfg_idx[&b], Direction::Incoming)
                .map(|i| cfg[i])
                .collect();
            if cfg_preds.len() != dt.incoming().len()
                || !dt.incoming().iter().all(|n| cfg_preds.contains(&n.pred))
            {
                return Err(LowerError::PhiPredecessorMismatch { block: b });
            }

            let var_ty = self.var_tys[var.0 as usize];
            let mut pairs = Vec::with_capacity(dt.incoming().len());
            for node in dt.incoming() {
                let pred_num = numbers[&node.pred];
                let value = match self.edge_origin(func, b, var, node)? {
                    Some(origin) => {
                        let use_def = self.static_def(var, origin);
                        let dyn_ty = self.def_tys.get(&(var, origin)).copied().flatten();
                        match dyn_ty {
                            Some(t) if t != var_ty => {
                                // bring the input to the phi's result type in
                                // the predecessor block
                                let conv = self.alloc(var, synth_def_id(origin, pred_num), Some(var_ty));
                                converts.entry(node.pred).or_default().push(StaticInstruction {
                                    op: Opcode::Convert,
                                    def: Some(StaticDef::new(var.0, conv)),
                                    operands: smallvec![StaticOperand::Use(use_def)],
                                });
                                StaticOperand::Use(StaticDef::new(var.0, conv))
                            }
                            _ => StaticOperand::Use(use_def),
                        }
                    }
                    None => StaticOperand::Constant(StaticConstant::undefined(var_ty)),
                };
                pairs.push((value, pred_num));
            }
            plans.push(PhiPlan {
                def: self.static_def(var, def.id),
                pairs,
            });
        }
        Ok(plans)
    }

    /// The single origin def flowing along one incoming edge, or `None` for
    /// an undefined edge.
    fn edge_origin(
        &self,
        func: &Function,
        block: BlockId,
        var: VarId,
        node: &IncomingNode,
    ) -> Result<Option<DefId>, LowerError> {
        if node.timelines.is_empty() {
            return Ok(None);
        }
        let mut found: Option<DefId> = None;
        for key in node.timelines.iter() {
            let (defs, _undefined) = func.outgoing_origin_info(*key);
            for d in defs {
                match found {
                    None => found = Some(d),
                    Some(prev) if prev == d => {}
                    Some(_) => return Err(LowerError::HeterogeneousEdge { block, var }),
                }
            }
        }
        Ok(found)
    }

    /// Lowers one body instruction.
    fn lower_instruction(
        &self,
        func: &Function,
        b: BlockId,
        instr: &Instruction,
    ) -> Result<StaticInstruction, LowerError> {
        let mut operands: SmallVec<[StaticOperand; 2]> = SmallVec::new();
        for opnd in &instr.operands {
            operands.push(match opnd {
                Operand::Constant(c) => {
                    StaticOperand::Constant(StaticConstant::from_constant(c))
                }
                Operand::Use(u) => self.lower_use(func, b, u.var, u.timeline)?,
            });
        }
        Ok(StaticInstruction {
            op: instr.op,
            def: instr.def.map(|d| self.static_def(d.var, d.id)),
            operands,
        })
    }

    /// Resolves a use through its bound timeline to a static def.
    fn lower_use(
        &self,
        func: &Function,
        b: BlockId,
        var: VarId,
        timeline: marrow_core::TimelineId,
    ) -> Result<StaticOperand, LowerError> {
        let var_ty = self.var_tys[var.0 as usize];
        let dt = func
            .block(b)
            .dt(var)
            .expect("use timelines live in their block");
        let tl = dt.timeline(timeline).expect("bound timeline exists");
        match tl.head {
            TimelineHead::Instr(i) => {
                let d = func.instr_def(i).expect("def instruction heads the timeline");
                Ok(StaticOperand::Use(self.static_def(d.var, d.id)))
            }
            TimelineHead::Param => Ok(StaticOperand::Use(self.static_def(var, DefId(0)))),
            TimelineHead::Uninit => Ok(StaticOperand::Constant(StaticConstant::undefined(var_ty))),
            TimelineHead::Incoming => {
                // forwarded join: all edges carry the same origin
                let mut found: Option<DefId> = None;
                for node in dt.incoming() {
                    match self.edge_origin(func, b, var, node)? {
                        Some(d) => match found {
                            None => found = Some(d),
                            Some(prev) if prev == d => {}
                            Some(_) => {
                                return Err(LowerError::HeterogeneousEdge { block: b, var })
                            }
                        },
                        None => {}
                    }
                }
                match found {
                    Some(d) => Ok(StaticOperand::Use(self.static_def(var, d))),
                    None => Ok(StaticOperand::Constant(StaticConstant::undefined(var_ty))),
                }
            }
        }
    }

    /// The condition def a two-way block branches on.
    fn condition_use(&self, func: &Function, b: BlockId) -> Result<StaticDef, LowerError> {
        let block = func.block(b);
        let cv = block
            .condition_variable()
            .ok_or(LowerError::MissingCondition { block: b })?;
        let dt = block
            .dt(cv)
            .ok_or(LowerError::MissingCondition { block: b })?;
        let tl = dt
            .outgoing_timeline()
            .ok_or(LowerError::MissingCondition { block: b })?;
        match tl.head {
            TimelineHead::Instr(i) => {
                let d = func
                    .instr_def(i)
                    .ok_or(LowerError::MissingCondition { block: b })?;
                Ok(self.static_def(d.var, d.id))
            }
            _ => Err(LowerError::MissingCondition { block: b }),
        }
    }
}

/// A fresh dynamic def id for a lowering-synthesized convert. These ids only
/// key the numbering maps; they never appear in the dynamic IR, so they are
/// carved out of the high end of the id space per (origin, predecessor).
fn synth_def_id(origin: DefId, pred_num: u32) -> DefId {
    DefId(u32::MAX - (origin.0 << 8) - pred_num)
}
