//! The LLVM JIT implementation of [`CompilerImpl`].
//!
//! Each compiled function gets its own module and execution engine; the
//! engines stay alive inside the compiler so resolved symbol addresses
//! remain valid. Basic blocks are materialised in the static numbering
//! order, instructions translate through an opcode-indexed match, and phi
//! incoming pairs are filled in a second pass (phi arguments may refer to
//! later blocks).
//!
//! Undefined operands lower to a call of the mapped
//! [`runtime::marrow_report_uninit`] hook followed by a zero of the
//! expected type, inserted on the path that actually carries the undefined
//! value.

use std::collections::HashMap;

use inkwell::basic_block::BasicBlock;
use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::execution_engine::ExecutionEngine;
use inkwell::module::Module;
use inkwell::targets::{InitializationConfig, Target};
use inkwell::types::{BasicMetadataTypeEnum, BasicType, BasicTypeEnum, IntType};
use inkwell::values::{BasicValueEnum, FunctionValue, IntValue, PhiValue};
use inkwell::{FloatPredicate, IntPredicate, OptimizationLevel};

use marrow_core::{lca, IrType, Opcode, ScalarType};
use marrow_static::{StaticConstant, StaticFunction, StaticInstruction, StaticOperand};

use crate::error::CodegenError;
use crate::{runtime, CompiledFunction, CompilerImpl};

/// The LLVM-backed JIT compiler.
pub struct LlvmCompiler {
    context: &'static Context,
    printing: bool,
    artifacts: Vec<(Module<'static>, ExecutionEngine<'static>)>,
    counter: u32,
}

impl LlvmCompiler {
    /// Creates a compiler with its own (leaked) LLVM context, so compiled
    /// symbols live as long as the compiler.
    pub fn new() -> Result<LlvmCompiler, CodegenError> {
        Target::initialize_native(&InitializationConfig::default())
            .map_err(|e| CodegenError::Llvm(format!("failed to initialize native target: {}", e)))?;
        let context: &'static Context = Box::leak(Box::new(Context::create()));
        Ok(LlvmCompiler {
            context,
            printing: false,
            artifacts: Vec::new(),
            counter: 0,
        })
    }
}

impl CompilerImpl for LlvmCompiler {
    fn enable_printing(&mut self, on: bool) {
        self.printing = on;
    }

    fn compile(&mut self, func: &StaticFunction) -> Result<CompiledFunction, CodegenError> {
        let module = self
            .context
            .create_module(&format!("marrow_{}_{}", func.name, self.counter));
        self.counter += 1;

        let translator = FnTranslator::new(self.context, &module, func)?;
        translator.run()?;

        if self.printing {
            eprintln!("{}", module.print_to_string().to_string());
        }
        module
            .verify()
            .map_err(|e| CodegenError::Llvm(format!("module verification failed: {}", e)))?;

        let engine = module
            .create_jit_execution_engine(OptimizationLevel::None)
            .map_err(|e| CodegenError::Llvm(e.to_string()))?;
        if let Some(hook) = module.get_function(HOOK_NAME) {
            engine.add_global_mapping(&hook, runtime::marrow_report_uninit as usize);
        }
        let addr = engine
            .get_function_address(&func.name)
            .map_err(|e| CodegenError::Lookup(e.to_string()))?;

        self.artifacts.push((module, engine));
        Ok(CompiledFunction::new(addr))
    }
}

const HOOK_NAME: &str = "marrow_report_uninit";

struct PendingPhi<'ctx> {
    phi: PhiValue<'ctx>,
    ty: IrType,
    pairs: Vec<(StaticOperand, u32)>,
}

struct FnTranslator<'ctx, 'a> {
    ctx: &'ctx Context,
    builder: Builder<'ctx>,
    func: &'a StaticFunction,
    hook: FunctionValue<'ctx>,
    bbs: Vec<BasicBlock<'ctx>>,
}

impl<'ctx, 'a> FnTranslator<'ctx, 'a> {
    fn new(
        ctx: &'ctx Context,
        module: &Module<'ctx>,
        func: &'a StaticFunction,
    ) -> Result<Self, CodegenError> {
        let ret_ty = func.variable(func.ret_var()).ty;
        let mut params: Vec<BasicMetadataTypeEnum<'ctx>> = Vec::new();
        for p in func.param_vars() {
            params.push(basic_type(ctx, func.variable(*p).ty)?.into());
        }
        let fn_type = if ret_ty == IrType::Void {
            ctx.void_type().fn_type(&params, false)
        } else {
            basic_type(ctx, ret_ty)?.fn_type(&params, false)
        };
        let llvm_fn = module.add_function(&func.name, fn_type, None);

        let hook_ty = ctx.void_type().fn_type(&[], false);
        let hook = module.add_function(HOOK_NAME, hook_ty, None);

        let mut bbs = Vec::with_capacity(func.blocks.len());
        for block in &func.blocks {
            bbs.push(ctx.append_basic_block(llvm_fn, &block.name));
        }

        Ok(FnTranslator {
            ctx,
            builder: ctx.create_builder(),
            func,
            hook,
            bbs,
        })
    }

    fn run(self) -> Result<(), CodegenError> {
        let llvm_fn = self.bbs[0].get_parent().expect("block belongs to function");
        let mut values: HashMap<(u32, u32), (BasicValueEnum<'ctx>, IrType)> = HashMap::new();
        for (i, var) in self.func.param_vars().iter().enumerate() {
            let v = llvm_fn
                .get_nth_param(i as u32)
                .ok_or_else(|| CodegenError::Llvm("missing parameter".to_string()))?;
            values.insert((*var, 0), (v, self.func.variable(*var).ty));
        }

        let mut pending: Vec<PendingPhi<'ctx>> = Vec::new();

        for (bi, block) in self.func.blocks.iter().enumerate() {
            self.builder.position_at_end(self.bbs[bi]);
            let mut i = 0;
            while i < block.instructions.len() {
                let instr = &block.instructions[i];
                match instr.op {
                    Opcode::Phi => {
                        let def = instr.def.expect("phi carries a def");
                        let ty = self.func.variable(def.var).ty;
                        let phi = self
                            .builder
                            .build_phi(basic_type(self.ctx, ty)?, &format!("phi_{}", def.var))
                            .map_err(|e| CodegenError::Llvm(e.to_string()))?;
                        let mut pairs = Vec::new();
                        for pair in instr.operands.chunks(2) {
                            let value = pair[0].clone();
                            let pred = match &pair[1] {
                                StaticOperand::Constant(c) => c.as_u32().ok_or_else(|| {
                                    CodegenError::Unsupported(
                                        "phi pair without a block id".to_string(),
                                    )
                                })?,
                                _ => {
                                    return Err(CodegenError::Unsupported(
                                        "phi pair without a block id".to_string(),
                                    ))
                                }
                            };
                            pairs.push((value, pred));
                        }
                        values.insert((def.var, def.def), (phi.as_basic_value(), ty));
                        pending.push(PendingPhi { phi, ty, pairs });
                        i += 1;
                    }
                    Opcode::CBranch => {
                        let next = block.instructions.get(i + 1);
                        let false_target = match next {
                            Some(n) if n.op == Opcode::UcBranch => {
                                block_ref(&n.operands[0])?
                            }
                            _ => {
                                return Err(CodegenError::Unsupported(
                                    "cbranch without a trailing ucbranch".to_string(),
                                ))
                            }
                        };
                        let true_target = block_ref(&instr.operands[1])?;
                        let (cv, ct) = self.operand(&values, &instr.operands[0])?;
                        let cond = self.truthy(cv, ct)?;
                        self.builder
                            .build_conditional_branch(
                                cond,
                                self.bbs[true_target as usize],
                                self.bbs[false_target as usize],
                            )
                            .map_err(|e| CodegenError::Llvm(e.to_string()))?;
                        i += 2;
                    }
                    Opcode::UcBranch => {
                        let target = block_ref(&instr.operands[0])?;
                        self.builder
                            .build_unconditional_branch(self.bbs[target as usize])
                            .map_err(|e| CodegenError::Llvm(e.to_string()))?;
                        i += 1;
                    }
                    Opcode::Terminate => {
                        let ret_ty = self.func.variable(self.func.ret_var()).ty;
                        if ret_ty == IrType::Void {
                            self.builder
                                .build_return(None)
                                .map_err(|e| CodegenError::Llvm(e.to_string()))?;
                        } else {
                            let (v, t) = self.operand(&values, &instr.operands[0])?;
                            let v = self.coerce(v, t, ret_ty)?;
                            self.builder
                                .build_return(Some(&v))
                                .map_err(|e| CodegenError::Llvm(e.to_string()))?;
                        }
                        i += 1;
                    }
                    _ => {
                        let (v, t) = self.value_instruction(&values, instr)?;
                        if let Some(def) = instr.def {
                            values.insert((def.var, def.def), (v, t));
                        }
                        i += 1;
                    }
                }
            }
        }

        // Second pass: fill phi incoming pairs; values may come from later
        // blocks, which is why this cannot happen inline.
        for p in pending {
            let phi_bt = basic_type(self.ctx, p.ty)?;
            for (operand, pred) in &p.pairs {
                let bb = self.bbs[*pred as usize];
                let term = bb.get_terminator().ok_or_else(|| {
                    CodegenError::Llvm("predecessor block has no terminator".to_string())
                })?;
                let val: BasicValueEnum<'ctx> = match operand {
                    StaticOperand::Use(d) => {
                        let (v, t) = *values
                            .get(&(d.var, d.def))
                            .ok_or(CodegenError::UnknownDef {
                                var: d.var,
                                def: d.def,
                            })?;
                        if v.get_type() != phi_bt {
                            self.builder.position_before(&term);
                            self.coerce(v, t, p.ty)?
                        } else {
                            v
                        }
                    }
                    StaticOperand::Constant(c) if c.is_undefined() => {
                        self.builder.position_before(&term);
                        self.report_uninit()?;
                        phi_bt.const_zero()
                    }
                    StaticOperand::Constant(c) => {
                        let (v, t) = self.constant(c)?;
                        if v.get_type() != phi_bt {
                            self.builder.position_before(&term);
                            self.coerce(v, t, p.ty)?
                        } else {
                            v
                        }
                    }
                };
                p.phi.add_incoming(&[(&val, bb)]);
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Instruction translation
    // -----------------------------------------------------------------------

    fn value_instruction(
        &self,
        values: &HashMap<(u32, u32), (BasicValueEnum<'ctx>, IrType)>,
        instr: &StaticInstruction,
    ) -> Result<(BasicValueEnum<'ctx>, IrType), CodegenError> {
        use Opcode as Op;
        match instr.op {
            Op::Assign | Op::Fetch => self.operand(values, &instr.operands[0]),
            Op::Convert => {
                let (v, t) = self.operand(values, &instr.operands[0])?;
                let target = self
                    .func
                    .variable(instr.def.expect("convert carries a def").var)
                    .ty;
                Ok((self.coerce(v, t, target)?, target))
            }
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod | Op::Rem => {
                self.arith(values, instr)
            }
            Op::Neg => {
                let (v, t) = self.operand(values, &instr.operands[0])?;
                if t.is_floating() {
                    let r = self
                        .builder
                        .build_float_neg(v.into_float_value(), "neg")
                        .map_err(|e| CodegenError::Llvm(e.to_string()))?;
                    Ok((r.into(), t))
                } else if t.is_integral() {
                    let r = self
                        .builder
                        .build_int_neg(v.into_int_value(), "neg")
                        .map_err(|e| CodegenError::Llvm(e.to_string()))?;
                    Ok((r.into(), t))
                } else {
                    Err(CodegenError::Unsupported(format!("neg of {}", t)))
                }
            }
            Op::Eq | Op::Ne | Op::Lt | Op::Le | Op::Gt | Op::Ge => self.compare(values, instr),
            Op::LAnd | Op::LOr => {
                let (a, ta) = self.operand(values, &instr.operands[0])?;
                let (b, tb) = self.operand(values, &instr.operands[1])?;
                let a = self.truthy(a, ta)?;
                let b = self.truthy(b, tb)?;
                let r = if instr.op == Op::LAnd {
                    self.builder.build_and(a, b, "land")
                } else {
                    self.builder.build_or(a, b, "lor")
                }
                .map_err(|e| CodegenError::Llvm(e.to_string()))?;
                Ok((r.into(), IrType::Scalar(ScalarType::Bool)))
            }
            Op::LNot => {
                let (v, t) = self.operand(values, &instr.operands[0])?;
                let truthy = self.truthy(v, t)?;
                let r = self
                    .builder
                    .build_xor(truthy, self.ctx.bool_type().const_int(1, false), "lnot")
                    .map_err(|e| CodegenError::Llvm(e.to_string()))?;
                Ok((r.into(), IrType::Scalar(ScalarType::Bool)))
            }
            Op::BAnd | Op::BOr | Op::BXor | Op::BShiftL | Op::BAShiftR | Op::BLShiftR => {
                let (a, b, ty) = self.int_pair(values, instr)?;
                let r = match instr.op {
                    Op::BAnd => self.builder.build_and(a, b, "band"),
                    Op::BOr => self.builder.build_or(a, b, "bor"),
                    Op::BXor => self.builder.build_xor(a, b, "bxor"),
                    Op::BShiftL => self.builder.build_left_shift(a, b, "bshl"),
                    Op::BAShiftR => self.builder.build_right_shift(a, b, true, "bashr"),
                    Op::BLShiftR => self.builder.build_right_shift(a, b, false, "blshr"),
                    _ => unreachable!(),
                }
                .map_err(|e| CodegenError::Llvm(e.to_string()))?;
                Ok((r.into(), ty))
            }
            Op::BNot => {
                let (v, t) = self.operand(values, &instr.operands[0])?;
                if !t.is_integral() {
                    return Err(CodegenError::Unsupported(format!("bnot of {}", t)));
                }
                let r = self
                    .builder
                    .build_not(v.into_int_value(), "bnot")
                    .map_err(|e| CodegenError::Llvm(e.to_string()))?;
                Ok((r.into(), t))
            }
            Op::Call => Err(CodegenError::Unsupported(
                "call lowering requires the runtime value model".to_string(),
            )),
            other => Err(CodegenError::Unsupported(format!(
                "opcode {:?} in value position",
                other
            ))),
        }
    }

    fn arith(
        &self,
        values: &HashMap<(u32, u32), (BasicValueEnum<'ctx>, IrType)>,
        instr: &StaticInstruction,
    ) -> Result<(BasicValueEnum<'ctx>, IrType), CodegenError> {
        use Opcode as Op;
        let (a, ta) = self.operand(values, &instr.operands[0])?;
        let (b, tb) = self.operand(values, &instr.operands[1])?;
        let common = lca(ta, tb);
        let a = self.coerce(a, ta, common)?;
        let b = self.coerce(b, tb, common)?;
        if common.is_floating() {
            let (x, y) = (a.into_float_value(), b.into_float_value());
            let r = match instr.op {
                Op::Add => self.builder.build_float_add(x, y, "fadd"),
                Op::Sub => self.builder.build_float_sub(x, y, "fsub"),
                Op::Mul => self.builder.build_float_mul(x, y, "fmul"),
                Op::Div => self.builder.build_float_div(x, y, "fdiv"),
                Op::Mod | Op::Rem => self.builder.build_float_rem(x, y, "frem"),
                _ => unreachable!(),
            }
            .map_err(|e| CodegenError::Llvm(e.to_string()))?;
            return Ok((r.into(), common));
        }
        if !common.is_integral() {
            return Err(CodegenError::Unsupported(format!(
                "arithmetic on {}",
                common
            )));
        }
        let (x, y) = (a.into_int_value(), b.into_int_value());
        let unsigned = common.is_unsigned();
        let r = match instr.op {
            Op::Add => self.builder.build_int_add(x, y, "add"),
            Op::Sub => self.builder.build_int_sub(x, y, "sub"),
            Op::Mul => self.builder.build_int_mul(x, y, "mul"),
            Op::Div => {
                if unsigned {
                    self.builder.build_int_unsigned_div(x, y, "udiv")
                } else {
                    self.builder.build_int_signed_div(x, y, "sdiv")
                }
            }
            Op::Rem => {
                if unsigned {
                    self.builder.build_int_unsigned_rem(x, y, "urem")
                } else {
                    self.builder.build_int_signed_rem(x, y, "srem")
                }
            }
            Op::Mod => {
                if unsigned {
                    self.builder.build_int_unsigned_rem(x, y, "umod")
                } else {
                    // floored modulo: srem adjusted when the signs differ
                    return self.floored_mod(x, y, common);
                }
            }
            _ => unreachable!(),
        }
        .map_err(|e| CodegenError::Llvm(e.to_string()))?;
        Ok((r.into(), common))
    }

    fn floored_mod(
        &self,
        x: IntValue<'ctx>,
        y: IntValue<'ctx>,
        ty: IrType,
    ) -> Result<(BasicValueEnum<'ctx>, IrType), CodegenError> {
        let m = |e: inkwell::builder::BuilderError| CodegenError::Llvm(e.to_string());
        let rem = self.builder.build_int_signed_rem(x, y, "mod_rem").map_err(m)?;
        let zero = rem.get_type().const_zero();
        let rem_nonzero = self
            .builder
            .build_int_compare(IntPredicate::NE, rem, zero, "mod_nz")
            .map_err(m)?;
        let rem_neg = self
            .builder
            .build_int_compare(IntPredicate::SLT, rem, zero, "mod_rn")
            .map_err(m)?;
        let y_neg = self
            .builder
            .build_int_compare(IntPredicate::SLT, y, zero, "mod_yn")
            .map_err(m)?;
        let signs_differ = self.builder.build_xor(rem_neg, y_neg, "mod_sd").map_err(m)?;
        let need_fix = self
            .builder
            .build_and(rem_nonzero, signs_differ, "mod_fix")
            .map_err(m)?;
        let adjusted = self.builder.build_int_add(rem, y, "mod_adj").map_err(m)?;
        let r = self
            .builder
            .build_select(need_fix, adjusted, rem, "mod")
            .map_err(m)?;
        Ok((r, ty))
    }

    fn compare(
        &self,
        values: &HashMap<(u32, u32), (BasicValueEnum<'ctx>, IrType)>,
        instr: &StaticInstruction,
    ) -> Result<(BasicValueEnum<'ctx>, IrType), CodegenError> {
        use Opcode as Op;
        let (a, ta) = self.operand(values, &instr.operands[0])?;
        let (b, tb) = self.operand(values, &instr.operands[1])?;
        let common = lca(ta, tb);
        let a = self.coerce(a, ta, common)?;
        let b = self.coerce(b, tb, common)?;
        let r: IntValue<'ctx> = if common.is_floating() {
            let pred = match instr.op {
                Op::Eq => FloatPredicate::OEQ,
                Op::Ne => FloatPredicate::UNE,
                Op::Lt => FloatPredicate::OLT,
                Op::Le => FloatPredicate::OLE,
                Op::Gt => FloatPredicate::OGT,
                Op::Ge => FloatPredicate::OGE,
                _ => unreachable!(),
            };
            self.builder
                .build_float_compare(pred, a.into_float_value(), b.into_float_value(), "fcmp")
                .map_err(|e| CodegenError::Llvm(e.to_string()))?
        } else if common.is_integral() {
            let unsigned = common.is_unsigned();
            let pred = match (instr.op, unsigned) {
                (Op::Eq, _) => IntPredicate::EQ,
                (Op::Ne, _) => IntPredicate::NE,
                (Op::Lt, false) => IntPredicate::SLT,
                (Op::Le, false) => IntPredicate::SLE,
                (Op::Gt, false) => IntPredicate::SGT,
                (Op::Ge, false) => IntPredicate::SGE,
                (Op::Lt, true) => IntPredicate::ULT,
                (Op::Le, true) => IntPredicate::ULE,
                (Op::Gt, true) => IntPredicate::UGT,
                (Op::Ge, true) => IntPredicate::UGE,
                _ => unreachable!(),
            };
            self.builder
                .build_int_compare(pred, a.into_int_value(), b.into_int_value(), "icmp")
                .map_err(|e| CodegenError::Llvm(e.to_string()))?
        } else {
            return Err(CodegenError::Unsupported(format!("compare on {}", common)));
        };
        Ok((r.into(), IrType::Scalar(ScalarType::Bool)))
    }

    fn int_pair(
        &self,
        values: &HashMap<(u32, u32), (BasicValueEnum<'ctx>, IrType)>,
        instr: &StaticInstruction,
    ) -> Result<(IntValue<'ctx>, IntValue<'ctx>, IrType), CodegenError> {
        let (a, ta) = self.operand(values, &instr.operands[0])?;
        let (b, tb) = self.operand(values, &instr.operands[1])?;
        let common = lca(ta, tb);
        if !common.is_integral() {
            return Err(CodegenError::Unsupported(format!(
                "bitwise operation on {}",
                common
            )));
        }
        let a = self.coerce(a, ta, common)?.into_int_value();
        let b = self.coerce(b, tb, common)?.into_int_value();
        Ok((a, b, common))
    }

    // -----------------------------------------------------------------------
    // Operands, constants, conversions
    // -----------------------------------------------------------------------

    fn operand(
        &self,
        values: &HashMap<(u32, u32), (BasicValueEnum<'ctx>, IrType)>,
        operand: &StaticOperand,
    ) -> Result<(BasicValueEnum<'ctx>, IrType), CodegenError> {
        match operand {
            StaticOperand::Use(d) => values
                .get(&(d.var, d.def))
                .copied()
                .ok_or(CodegenError::UnknownDef {
                    var: d.var,
                    def: d.def,
                }),
            StaticOperand::Constant(c) if c.is_undefined() => {
                self.report_uninit()?;
                let ty = c.ty;
                Ok((basic_type(self.ctx, ty)?.const_zero(), ty))
            }
            StaticOperand::Constant(c) => self.constant(c),
        }
    }

    fn constant(&self, c: &StaticConstant) -> Result<(BasicValueEnum<'ctx>, IrType), CodegenError> {
        let ty = c.ty;
        if ty.is_floating() {
            let v = c
                .as_f64()
                .ok_or_else(|| CodegenError::Llvm("bad float payload".to_string()))?;
            let ft = match ty {
                IrType::Scalar(ScalarType::Single) => self.ctx.f32_type(),
                _ => self.ctx.f64_type(),
            };
            return Ok((ft.const_float(v).into(), ty));
        }
        let v = c
            .as_i64()
            .ok_or_else(|| CodegenError::Unsupported(format!("constant of type {}", ty)))?;
        let it = int_type(self.ctx, ty)?;
        Ok((it.const_int(v as u64, !ty.is_unsigned()).into(), ty))
    }

    /// Emits the uninitialised-read report at the current position.
    fn report_uninit(&self) -> Result<(), CodegenError> {
        self.builder
            .build_call(self.hook, &[], "uninit")
            .map_err(|e| CodegenError::Llvm(e.to_string()))?;
        Ok(())
    }

    /// Converts `v` from `from` to `to`, selecting the LLVM cast by the type
    /// pair.
    fn coerce(
        &self,
        v: BasicValueEnum<'ctx>,
        from: IrType,
        to: IrType,
    ) -> Result<BasicValueEnum<'ctx>, CodegenError> {
        if from == to {
            return Ok(v);
        }
        let m = |e: inkwell::builder::BuilderError| CodegenError::Llvm(e.to_string());
        match (from.is_integral(), from.is_floating(), to.is_integral(), to.is_floating()) {
            (true, _, true, _) => {
                let iv = v.into_int_value();
                let target = int_type(self.ctx, to)?;
                let fw = iv.get_type().get_bit_width();
                let tw = target.get_bit_width();
                let r = if fw == tw {
                    iv
                } else if fw < tw {
                    if from.is_unsigned() || from == IrType::Scalar(ScalarType::Bool) {
                        self.builder.build_int_z_extend(iv, target, "zext").map_err(m)?
                    } else {
                        self.builder.build_int_s_extend(iv, target, "sext").map_err(m)?
                    }
                } else {
                    self.builder.build_int_truncate(iv, target, "trunc").map_err(m)?
                };
                Ok(r.into())
            }
            (true, _, _, true) => {
                let ft = float_type(self.ctx, to)?;
                let iv = v.into_int_value();
                let r = if from.is_unsigned() || from == IrType::Scalar(ScalarType::Bool) {
                    self.builder
                        .build_unsigned_int_to_float(iv, ft, "uitofp")
                        .map_err(m)?
                } else {
                    self.builder
                        .build_signed_int_to_float(iv, ft, "sitofp")
                        .map_err(m)?
                };
                Ok(r.into())
            }
            (_, true, true, _) => {
                let it = int_type(self.ctx, to)?;
                let fv = v.into_float_value();
                let r = if to.is_unsigned() {
                    self.builder
                        .build_float_to_unsigned_int(fv, it, "fptoui")
                        .map_err(m)?
                } else {
                    self.builder
                        .build_float_to_signed_int(fv, it, "fptosi")
                        .map_err(m)?
                };
                Ok(r.into())
            }
            (_, true, _, true) => {
                let fv = v.into_float_value();
                let target = float_type(self.ctx, to)?;
                let r = if target == self.ctx.f64_type() && fv.get_type() == self.ctx.f32_type() {
                    self.builder.build_float_ext(fv, target, "fpext").map_err(m)?
                } else if target == self.ctx.f32_type() && fv.get_type() == self.ctx.f64_type() {
                    self.builder.build_float_trunc(fv, target, "fptrunc").map_err(m)?
                } else {
                    fv
                };
                Ok(r.into())
            }
            _ => Err(CodegenError::Unsupported(format!(
                "conversion from {} to {}",
                from, to
            ))),
        }
    }

    /// The truth value of `v`: nonzero for numbers, identity for `bool`.
    fn truthy(&self, v: BasicValueEnum<'ctx>, ty: IrType) -> Result<IntValue<'ctx>, CodegenError> {
        let m = |e: inkwell::builder::BuilderError| CodegenError::Llvm(e.to_string());
        if ty == IrType::Scalar(ScalarType::Bool) {
            return Ok(v.into_int_value());
        }
        if ty.is_floating() {
            let fv = v.into_float_value();
            let zero = fv.get_type().const_zero();
            return self
                .builder
                .build_float_compare(FloatPredicate::ONE, fv, zero, "truthy")
                .map_err(m);
        }
        if ty.is_integral() {
            let iv = v.into_int_value();
            let zero = iv.get_type().const_zero();
            return self
                .builder
                .build_int_compare(IntPredicate::NE, iv, zero, "truthy")
                .map_err(m);
        }
        Err(CodegenError::Unsupported(format!("truth value of {}", ty)))
    }
}

fn block_ref(operand: &StaticOperand) -> Result<u32, CodegenError> {
    match operand {
        StaticOperand::Constant(c) => c
            .as_u32()
            .ok_or_else(|| CodegenError::Unsupported("branch without a block id".to_string())),
        _ => Err(CodegenError::Unsupported(
            "branch target must be a block id constant".to_string(),
        )),
    }
}

fn int_type<'ctx>(ctx: &'ctx Context, ty: IrType) -> Result<IntType<'ctx>, CodegenError> {
    use ScalarType::*;
    match ty {
        IrType::Scalar(Bool) => Ok(ctx.bool_type()),
        IrType::Scalar(I8 | U8) => Ok(ctx.i8_type()),
        IrType::Scalar(I16 | U16) => Ok(ctx.i16_type()),
        IrType::Scalar(I32 | U32 | Char | WChar | Char16 | Char32) => Ok(ctx.i32_type()),
        IrType::Scalar(I64 | U64) => Ok(ctx.i64_type()),
        _ => Err(CodegenError::Unsupported(format!("integer type {}", ty))),
    }
}

fn float_type<'ctx>(
    ctx: &'ctx Context,
    ty: IrType,
) -> Result<inkwell::types::FloatType<'ctx>, CodegenError> {
    use ScalarType::*;
    match ty {
        IrType::Scalar(Single) => Ok(ctx.f32_type()),
        IrType::Scalar(Double | LongDouble) => Ok(ctx.f64_type()),
        _ => Err(CodegenError::Unsupported(format!("float type {}", ty))),
    }
}

fn basic_type<'ctx>(ctx: &'ctx Context, ty: IrType) -> Result<BasicTypeEnum<'ctx>, CodegenError> {
    if ty.is_floating() {
        return Ok(float_type(ctx, ty)?.into());
    }
    if ty.is_integral() || matches!(ty, IrType::Scalar(ScalarType::Char | ScalarType::WChar | ScalarType::Char16 | ScalarType::Char32)) {
        return Ok(int_type(ctx, ty)?.into());
    }
    Err(CodegenError::Unsupported(format!(
        "type {} has no JIT representation",
        ty
    )))
}
