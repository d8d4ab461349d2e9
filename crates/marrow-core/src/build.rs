//! The IR builder: lowering the source AST into the structured CFG.
//!
//! The builder holds the function under construction and a cursor naming
//! the sequence and block new instructions land in. Every AST statement
//! kind has an acceptor; the kinds outside the lowered subset are NOP
//! acceptors, the stable extension point for front ends.
//!
//! `compile` applies the error policy: *stable* errors (bad identifiers,
//! missing operands) leave the partially-built function for the caller,
//! *fatal* errors (structural violations underneath) reset the builder.

use crate::ast::{BinaryOp, Expr, ExprKind, Stmt, StmtKind, UnaryOp};
use crate::block::OperandSpec;
use crate::component::Component;
use crate::error::{CompileError, ErrorState};
use crate::function::Function;
use crate::id::{BlockId, CompId, VarId};
use crate::metadata::Opcode;
use crate::types::IrType;

/// Where the next instruction goes.
#[derive(Debug, Clone, Copy)]
struct Cursor {
    seq: CompId,
    block: BlockId,
}

/// Builds a [`Function`] from AST statements.
#[derive(Debug)]
pub struct IrBuilder {
    func: Function,
    cursor: Cursor,
    proto: Prototype,
    next_temp: u32,
}

#[derive(Debug, Clone)]
struct Prototype {
    name: String,
    ret: (String, IrType),
    params: Vec<(String, IrType)>,
}

impl IrBuilder {
    /// Creates a builder for a function with the given return slot and
    /// parameters.
    pub fn new(name: &str, ret: (&str, IrType), params: &[(&str, IrType)]) -> IrBuilder {
        let func = Function::new(name, ret, params);
        let cursor = Cursor {
            seq: func.body(),
            block: func.entry(),
        };
        IrBuilder {
            func,
            cursor,
            proto: Prototype {
                name: name.to_string(),
                ret: (ret.0.to_string(), ret.1),
                params: params
                    .iter()
                    .map(|(n, t)| (n.to_string(), *t))
                    .collect(),
            },
            next_temp: 0,
        }
    }

    /// Compiles a statement list into the function.
    ///
    /// Stable errors propagate with the builder state intact; fatal errors
    /// reset the builder to a fresh function before propagating.
    pub fn compile(&mut self, stmts: &[Stmt]) -> Result<(), CompileError> {
        let result = self.visit_stmts(stmts);
        if let Err(e) = &result {
            if e.state() == ErrorState::Fatal {
                self.reset();
            }
        }
        result
    }

    /// Discards the partially-built function.
    pub fn reset(&mut self) {
        let params: Vec<(&str, IrType)> = self
            .proto
            .params
            .iter()
            .map(|(n, t)| (n.as_str(), *t))
            .collect();
        self.func = Function::new(
            &self.proto.name,
            (self.proto.ret.0.as_str(), self.proto.ret.1),
            &params,
        );
        self.cursor = Cursor {
            seq: self.func.body(),
            block: self.func.entry(),
        };
        self.next_temp = 0;
    }

    /// Takes the built function.
    pub fn finish(self) -> Function {
        self.func
    }

    pub fn function(&self) -> &Function {
        &self.func
    }

    pub fn function_mut(&mut self) -> &mut Function {
        &mut self.func
    }

    // -----------------------------------------------------------------------
    // Statement acceptors
    // -----------------------------------------------------------------------

    fn visit_stmts(&mut self, stmts: &[Stmt]) -> Result<(), CompileError> {
        for stmt in stmts {
            self.visit_stmt(stmt)?;
        }
        Ok(())
    }

    fn visit_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match &stmt.kind {
            StmtKind::Assign { target, value } => self.visit_assign(target, value),
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => self.visit_if(cond, then_body, else_body),
            StmtKind::While { cond, body } => self.visit_while(cond, body),
            StmtKind::For {
                var,
                from,
                to,
                body,
            } => self.visit_for(var, from, to, body),

            // NOP acceptors: stable extension points
            StmtKind::DoUntil { .. }
            | StmtKind::Switch { .. }
            | StmtKind::TryCatch { .. }
            | StmtKind::UnwindProtect { .. }
            | StmtKind::FunctionDef { .. }
            | StmtKind::Break
            | StmtKind::Continue
            | StmtKind::Return
            | StmtKind::NoOp => Ok(()),
        }
    }

    fn visit_assign(&mut self, target: &str, value: &Expr) -> Result<(), CompileError> {
        let var = self.lookup_or_create(target)?;
        let block = self.cursor.block;
        self.eval_into(block, var, value)?;
        Ok(())
    }

    fn visit_if(
        &mut self,
        cond: &Expr,
        then_body: &[Stmt],
        else_body: &[Stmt],
    ) -> Result<(), CompileError> {
        let cv = self.func.anonymous_variable();
        let fork = self.func.emplace_back_fork(self.cursor.seq, cv)?;
        let cond_block = match self.func.component(fork) {
            Component::Fork(fk) => fk.condition,
            _ => unreachable!(),
        };
        self.eval_into(cond_block, cv, cond)?;

        let saved = self.cursor;

        let then_seq = self.func.fork_add_case_sequence(fork)?;
        self.cursor = Cursor {
            seq: then_seq,
            block: self.func.entry_block(then_seq),
        };
        self.visit_stmts(then_body)?;

        let else_seq = self.func.fork_add_case_sequence(fork)?;
        self.cursor = Cursor {
            seq: else_seq,
            block: self.func.entry_block(else_seq),
        };
        self.visit_stmts(else_body)?;

        // continue after the fork
        let after = self.func.emplace_back_block(saved.seq)?;
        self.cursor = Cursor {
            seq: saved.seq,
            block: after,
        };
        Ok(())
    }

    fn visit_while(&mut self, cond: &Expr, body: &[Stmt]) -> Result<(), CompileError> {
        let cv = self.func.anonymous_variable();
        let lp = self.func.emplace_back_loop(self.cursor.seq, cv)?;
        let (cond_block, body_seq) = match self.func.component(lp) {
            Component::Loop(l) => (l.condition, l.body),
            _ => unreachable!(),
        };
        self.eval_into(cond_block, cv, cond)?;

        let saved = self.cursor;
        self.cursor = Cursor {
            seq: body_seq,
            block: self.func.entry_block(body_seq),
        };
        self.visit_stmts(body)?;

        // continue after the loop
        let after = self.func.emplace_back_block(saved.seq)?;
        self.cursor = Cursor {
            seq: saved.seq,
            block: after,
        };
        Ok(())
    }

    fn visit_for(
        &mut self,
        var: &str,
        from: &Expr,
        to: &Expr,
        body: &[Stmt],
    ) -> Result<(), CompileError> {
        let iv = self.lookup_or_create(var)?;
        let cv = self.func.anonymous_variable();
        let lp = self.func.emplace_back_loop(self.cursor.seq, cv)?;
        let (start, cond_block, body_seq, update) = match self.func.component(lp) {
            Component::Loop(l) => (l.start, l.condition, l.body, l.update),
            _ => unreachable!(),
        };
        let start_block = self.func.entry_block(start);

        // start: iv = from
        self.eval_into(start_block, iv, from)?;
        // condition: cv = iv < to
        let bound = self.eval_operand(cond_block, to)?;
        self.func.append_with_def(
            cond_block,
            Opcode::Lt,
            cv,
            &[OperandSpec::Var(iv), bound],
        )?;
        // update: iv = iv + 1
        self.func.append_with_def(
            update,
            Opcode::Add,
            iv,
            &[
                OperandSpec::Var(iv),
                OperandSpec::Const(crate::types::Constant::I32(1)),
            ],
        )?;

        let saved = self.cursor;
        self.cursor = Cursor {
            seq: body_seq,
            block: self.func.entry_block(body_seq),
        };
        self.visit_stmts(body)?;

        let after = self.func.emplace_back_block(saved.seq)?;
        self.cursor = Cursor {
            seq: saved.seq,
            block: after,
        };
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Expression lowering
    // -----------------------------------------------------------------------

    /// Evaluates `expr` into a def of `var` at the end of `block`.
    fn eval_into(&mut self, block: BlockId, var: VarId, expr: &Expr) -> Result<(), CompileError> {
        match &expr.kind {
            ExprKind::Binary { op, lhs, rhs } => {
                let l = self.eval_operand(block, lhs)?;
                let r = self.eval_operand(block, rhs)?;
                self.func
                    .append_with_def(block, binary_opcode(*op), var, &[l, r])?;
                Ok(())
            }
            ExprKind::Unary { op, operand } => {
                let o = self.eval_operand(block, operand)?;
                self.func
                    .append_with_def(block, unary_opcode(*op), var, &[o])?;
                Ok(())
            }
            _ => {
                let o = self.eval_operand(block, expr)?;
                self.func.append_with_def(block, Opcode::Assign, var, &[o])?;
                Ok(())
            }
        }
    }

    /// Evaluates `expr` to an operand, materialising temporaries for
    /// compound subexpressions.
    fn eval_operand(&mut self, block: BlockId, expr: &Expr) -> Result<OperandSpec, CompileError> {
        match &expr.kind {
            ExprKind::Constant(c) => Ok(OperandSpec::Const(*c)),
            ExprKind::Ident(name) => {
                let var = self
                    .func
                    .find_variable(name)
                    .ok_or_else(|| CompileError::UndefinedVariable {
                        name: name.clone(),
                        loc: expr.loc,
                    })?;
                Ok(OperandSpec::Var(var))
            }
            ExprKind::Unary { op, operand } => {
                let o = self.eval_operand(block, operand)?;
                let tmp = self.fresh_temp()?;
                self.func
                    .append_with_def(block, unary_opcode(*op), tmp, &[o])?;
                Ok(OperandSpec::Var(tmp))
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let l = self.eval_operand(block, lhs)?;
                let r = self.eval_operand(block, rhs)?;
                let tmp = self.fresh_temp()?;
                self.func
                    .append_with_def(block, binary_opcode(*op), tmp, &[l, r])?;
                Ok(OperandSpec::Var(tmp))
            }
        }
    }

    fn fresh_temp(&mut self) -> Result<VarId, CompileError> {
        let name = format!("#t{}", self.next_temp);
        self.next_temp += 1;
        Ok(self.func.create_variable(&name, None)?)
    }

    /// Assignment targets create variables on first sight; reads of unknown
    /// names are reported by `eval_operand`.
    fn lookup_or_create(&mut self, name: &str) -> Result<VarId, CompileError> {
        match self.func.find_variable(name) {
            Some(v) => Ok(v),
            None => Ok(self.func.create_variable(name, None)?),
        }
    }
}

fn binary_opcode(op: BinaryOp) -> Opcode {
    match op {
        BinaryOp::Add => Opcode::Add,
        BinaryOp::Sub => Opcode::Sub,
        BinaryOp::Mul => Opcode::Mul,
        BinaryOp::Div => Opcode::Div,
        BinaryOp::Mod => Opcode::Mod,
        BinaryOp::Rem => Opcode::Rem,
        BinaryOp::Eq => Opcode::Eq,
        BinaryOp::Ne => Opcode::Ne,
        BinaryOp::Lt => Opcode::Lt,
        BinaryOp::Le => Opcode::Le,
        BinaryOp::Gt => Opcode::Gt,
        BinaryOp::Ge => Opcode::Ge,
        BinaryOp::And => Opcode::LAnd,
        BinaryOp::Or => Opcode::LOr,
        BinaryOp::BitAnd => Opcode::BAnd,
        BinaryOp::BitOr => Opcode::BOr,
        BinaryOp::BitXor => Opcode::BXor,
        BinaryOp::ShiftLeft => Opcode::BShiftL,
        BinaryOp::ShiftRightArith => Opcode::BAShiftR,
        BinaryOp::ShiftRightLogical => Opcode::BLShiftR,
    }
}

fn unary_opcode(op: UnaryOp) -> Opcode {
    match op {
        UnaryOp::Neg => Opcode::Neg,
        UnaryOp::Not => Opcode::LNot,
        UnaryOp::BitNot => Opcode::BNot,
    }
}
