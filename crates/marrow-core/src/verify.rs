//! Whole-function invariant checks.
//!
//! `validate` walks every block and def-timeline and verifies the
//! structural invariants the SSA machinery maintains:
//!
//! 1. every use is bound to the latest timeline whose head precedes it;
//! 2. a def-timeline with incoming nodes has an incoming use-timeline whose
//!    head is a logical join, a phi in the block's phi prefix, or the
//!    parameter seed;
//! 3. incoming nodes and successor links are bidirectionally consistent;
//! 4. incoming predecessor blocks are actual CFG predecessors;
//! 5. local timelines are ordered by body position and headed by local
//!    def instructions.
//!
//! Intended for tests and debug assertions; violations indicate a bug in
//! the mutation paths, so they surface as `CoreError::InvariantViolation`.

use crate::error::CoreError;
use crate::function::Function;
use crate::id::DtKey;
use crate::instruction::Operand;
use crate::timeline::TimelineHead;

/// Validates the SSA invariants of the whole function.
pub fn validate(f: &Function) -> Result<(), CoreError> {
    for block in f.block_ids() {
        let b = f.block(block);

        // 1. uses bind to the latest preceding timeline
        for (pos, instr) in b.body_instructions().iter().enumerate() {
            for opnd in &instr.operands {
                if let Operand::Use(u) = opnd {
                    let dt = b.dt(u.var).ok_or_else(|| violation(format!(
                        "use of variable {} in block {} has no def-timeline",
                        u.var, block
                    )))?;
                    dt.timeline(u.timeline).ok_or_else(|| violation(format!(
                        "use in block {} bound to missing timeline {}",
                        block, u.timeline
                    )))?;
                    let expected = latest_before(f, block, pos, u.var);
                    if expected != Some(u.timeline) {
                        return Err(violation(format!(
                            "use of variable {} at {}:{} bound to timeline {} \
                             but the latest preceding timeline is {:?}",
                            u.var, block, pos, u.timeline, expected
                        )));
                    }
                }
            }
        }

        for (var, dt) in b.dts() {
            // 2. incoming nodes imply an incoming timeline with a join head
            if dt.has_incoming() {
                let tl = dt.incoming_timeline().ok_or_else(|| violation(format!(
                    "def-timeline ({}, {}) has incoming nodes but no incoming timeline",
                    block, var
                )))?;
                match tl.head {
                    TimelineHead::Incoming | TimelineHead::Param => {}
                    TimelineHead::Instr(i) => {
                        if !b.phi_instructions().iter().any(|p| p.id == i) {
                            return Err(violation(format!(
                                "incoming timeline of ({}, {}) headed by {} which is \
                                 not in the phi prefix",
                                block, var, i
                            )));
                        }
                    }
                    TimelineHead::Uninit => {
                        return Err(violation(format!(
                            "orphaned timeline of ({}, {}) must not have incoming nodes",
                            block, var
                        )));
                    }
                }
            }

            // 3. + 4. node consistency
            let preds = f.block_predecessors(block);
            for node in dt.incoming() {
                if !preds.contains(&node.pred) {
                    return Err(violation(format!(
                        "incoming node of ({}, {}) names {} which is not a predecessor",
                        block, var, node.pred
                    )));
                }
                for key in node.timelines.iter() {
                    let pred_dt = f
                        .block(key.block)
                        .dt(key.var)
                        .ok_or_else(|| violation(format!(
                            "incoming node of ({}, {}) references missing timeline {}",
                            block, var, key
                        )))?;
                    if !pred_dt.succs().contains(&DtKey::new(block, var)) {
                        return Err(violation(format!(
                            "predecessor timeline {} does not list ({}, {}) as successor",
                            key, block, var
                        )));
                    }
                }
            }

            // 5. local timelines ordered by position, headed by local defs
            let mut last_pos = None;
            for tl in dt.locals() {
                let head = tl.head_instr().ok_or_else(|| violation(format!(
                    "local timeline of ({}, {}) has a non-instruction head",
                    block, var
                )))?;
                let pos = b.position_of(head).ok_or_else(|| violation(format!(
                    "local timeline of ({}, {}) headed by {} outside the block body",
                    block, var, head
                )))?;
                if let Some(prev) = last_pos {
                    if pos <= prev {
                        return Err(violation(format!(
                            "local timelines of ({}, {}) out of order",
                            block, var
                        )));
                    }
                }
                last_pos = Some(pos);
            }
        }

        // phi prefix instructions are phis defining joined variables
        for phi in b.phi_instructions() {
            if phi.op != crate::metadata::Opcode::Phi {
                return Err(violation(format!(
                    "non-phi instruction {} in the phi prefix of {}",
                    phi.id, block
                )));
            }
            let def = phi.def.ok_or_else(|| violation(format!(
                "phi {} in block {} has no def",
                phi.id, block
            )))?;
            let dt = b.dt(def.var).ok_or_else(|| violation(format!(
                "phi {} in block {} has no def-timeline",
                phi.id, block
            )))?;
            if dt.incoming_timeline().map(|t| t.head) != Some(TimelineHead::Instr(phi.id)) {
                return Err(violation(format!(
                    "phi {} in block {} does not head its incoming timeline",
                    phi.id, block
                )));
            }
        }
    }
    Ok(())
}

fn violation(reason: String) -> CoreError {
    CoreError::InvariantViolation { reason }
}

/// The timeline the use at `(block, pos)` should be bound to.
fn latest_before(
    f: &Function,
    block: crate::id::BlockId,
    pos: usize,
    var: crate::id::VarId,
) -> Option<crate::id::TimelineId> {
    f.peek_reaching_before(block, pos, var)
}
