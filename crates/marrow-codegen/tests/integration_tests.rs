//! End-to-end JIT tests.
//!
//! Each test builds a function through the dynamic IR (directly or via the
//! AST builder), lowers it to static form, JIT compiles it, and executes
//! the native code. The static shapes the SSA machinery must produce (phi
//! placement, def numbering) are asserted alongside the runtime results.

use marrow_codegen::{runtime, CompilerImpl, LlvmCompiler};
use marrow_core::{
    BinaryOp, Constant, Expr, Function, IrBuilder, IrType, Opcode, OperandSpec, ScalarType, Stmt,
};
use marrow_static::{lower, StaticFunction, StaticOperand};

fn int() -> IrType {
    IrType::Scalar(ScalarType::I32)
}

fn boolean() -> IrType {
    IrType::Scalar(ScalarType::Bool)
}

fn c(v: i32) -> OperandSpec {
    OperandSpec::Const(Constant::I32(v))
}

fn jit() -> LlvmCompiler {
    LlvmCompiler::new().expect("native target available")
}

fn compile(func: &mut Function) -> (StaticFunction, usize) {
    let sf = lower(func).expect("lowering succeeds");
    let mut jit = jit();
    let compiled = jit.compile(&sf).expect("compilation succeeds");
    // keep the engine alive for the duration of the test
    std::mem::forget(jit);
    (sf, compiled.address())
}

/// Blocks that end in a conditional branch (fork and loop conditions).
fn condition_blocks(sf: &StaticFunction) -> Vec<usize> {
    sf.blocks
        .iter()
        .enumerate()
        .filter(|(_, b)| b.instructions.iter().any(|i| i.op == Opcode::CBranch))
        .map(|(i, _)| i)
        .collect()
}

// ---------------------------------------------------------------------------
// S1: add of constants
// ---------------------------------------------------------------------------

#[test]
fn s1_add_of_constants() {
    let mut f = Function::new("s1_add", ("z", int()), &[]);
    let entry = f.entry();
    let z = f.ret_var();
    f.append_with_def(entry, Opcode::Add, z, &[c(1), c(1)]).unwrap();
    marrow_core::validate(&f).unwrap();

    let (sf, addr) = compile(&mut f);

    // one add producing z#0 in the entry block
    let adds: Vec<_> = sf.blocks[0]
        .instructions
        .iter()
        .filter(|i| i.op == Opcode::Add)
        .collect();
    assert_eq!(adds.len(), 1);
    let d = adds[0].def.unwrap();
    assert_eq!((d.var, d.def), (z.0, 0));

    let run: extern "C" fn() -> i32 = unsafe { std::mem::transmute(addr) };
    assert_eq!(run(), 2);
}

// ---------------------------------------------------------------------------
// S2: if producing a value
// ---------------------------------------------------------------------------

#[test]
fn s2_if_produces_value_through_phi() {
    // out = false; if (inp == 1) out = true; return out
    let mut b = IrBuilder::new("s2_if", ("out", boolean()), &[("inp", int())]);
    b.compile(&[
        Stmt::assign("out", Expr::constant(Constant::Bool(false))),
        Stmt::if_else(
            Expr::binary(
                BinaryOp::Eq,
                Expr::ident("inp"),
                Expr::constant(Constant::I32(1)),
            ),
            vec![Stmt::assign("out", Expr::constant(Constant::Bool(true)))],
            vec![],
        ),
    ])
    .unwrap();
    let mut f = b.finish();

    let (sf, addr) = compile(&mut f);

    // one eq in the condition block
    let eqs: usize = sf
        .blocks
        .iter()
        .map(|b| b.instructions.iter().filter(|i| i.op == Opcode::Eq).count())
        .sum();
    assert_eq!(eqs, 1);

    // a phi for `out` with two predecessors at the join
    let out = sf.ret_var();
    let phis: Vec<_> = sf
        .blocks
        .iter()
        .flat_map(|b| b.instructions.iter())
        .filter(|i| i.op == Opcode::Phi && i.def.map(|d| d.var) == Some(out))
        .collect();
    assert_eq!(phis.len(), 1);
    assert_eq!(phis[0].operands.len(), 4, "two (use, block) pairs");

    let run: extern "C" fn(i32) -> bool = unsafe { std::mem::transmute(addr) };
    assert!(run(1));
    assert!(!run(0));
}

// ---------------------------------------------------------------------------
// S3: loop accumulator
// ---------------------------------------------------------------------------

#[test]
fn s3_loop_accumulator() {
    // x = 1; for i in 0..5 { x = x + 2 }; return x
    let mut b = IrBuilder::new("s3_loop", ("x", int()), &[]);
    b.compile(&[
        Stmt::assign("x", Expr::constant(Constant::I32(1))),
        Stmt::for_loop(
            "i",
            Expr::constant(Constant::I32(0)),
            Expr::constant(Constant::I32(5)),
            vec![Stmt::assign(
                "x",
                Expr::binary(
                    BinaryOp::Add,
                    Expr::ident("x"),
                    Expr::constant(Constant::I32(2)),
                ),
            )],
        ),
    ])
    .unwrap();
    let mut f = b.finish();

    let (sf, addr) = compile(&mut f);

    // the condition block carries a phi for x joining start and update
    let conds = condition_blocks(&sf);
    assert_eq!(conds.len(), 1);
    let x = sf.ret_var();
    let x_phis: Vec<_> = sf.blocks[conds[0]]
        .instructions
        .iter()
        .filter(|i| i.op == Opcode::Phi && i.def.map(|d| d.var) == Some(x))
        .collect();
    assert_eq!(x_phis.len(), 1);
    assert_eq!(x_phis[0].operands.len(), 4);

    let run: extern "C" fn() -> i32 = unsafe { std::mem::transmute(addr) };
    assert_eq!(run(), 11);
}

// ---------------------------------------------------------------------------
// S4: nested loops
// ---------------------------------------------------------------------------

#[test]
fn s4_nested_loops() {
    // x = 1; for i in 0..5 { for j in 0..3 { x = x + 2 } }; return x
    let mut b = IrBuilder::new("s4_nested", ("x", int()), &[]);
    b.compile(&[
        Stmt::assign("x", Expr::constant(Constant::I32(1))),
        Stmt::for_loop(
            "i",
            Expr::constant(Constant::I32(0)),
            Expr::constant(Constant::I32(5)),
            vec![Stmt::for_loop(
                "j",
                Expr::constant(Constant::I32(0)),
                Expr::constant(Constant::I32(3)),
                vec![Stmt::assign(
                    "x",
                    Expr::binary(
                        BinaryOp::Add,
                        Expr::ident("x"),
                        Expr::constant(Constant::I32(2)),
                    ),
                )],
            )],
        ),
    ])
    .unwrap();
    let mut f = b.finish();

    let (sf, addr) = compile(&mut f);

    // one phi for x per loop condition
    let conds = condition_blocks(&sf);
    assert_eq!(conds.len(), 2);
    let x = sf.ret_var();
    for cond in conds {
        let x_phis = sf.blocks[cond]
            .instructions
            .iter()
            .filter(|i| i.op == Opcode::Phi && i.def.map(|d| d.var) == Some(x))
            .count();
        assert_eq!(x_phis, 1, "one phi for x at block {}", cond);
    }

    let run: extern "C" fn() -> i32 = unsafe { std::mem::transmute(addr) };
    assert_eq!(run(), 31);
}

// ---------------------------------------------------------------------------
// S5: logical not
// ---------------------------------------------------------------------------

#[test]
fn s5_lnot_integers() {
    let mut f = Function::new("s5_lnot_i", ("z", boolean()), &[("a", IrType::Scalar(ScalarType::I64))]);
    let entry = f.entry();
    let z = f.ret_var();
    let a = f.params()[0];
    f.append_with_def(entry, Opcode::LNot, z, &[OperandSpec::Var(a)])
        .unwrap();

    let (_, addr) = compile(&mut f);
    let run: extern "C" fn(i64) -> bool = unsafe { std::mem::transmute(addr) };
    assert!(run(0));
    assert!(!run(1));
    assert!(!run(-3));
}

#[test]
fn s5_lnot_floats() {
    let mut f = Function::new(
        "s5_lnot_f",
        ("z", boolean()),
        &[("a", IrType::Scalar(ScalarType::Double))],
    );
    let entry = f.entry();
    let z = f.ret_var();
    let a = f.params()[0];
    f.append_with_def(entry, Opcode::LNot, z, &[OperandSpec::Var(a)])
        .unwrap();

    let (_, addr) = compile(&mut f);
    let run: extern "C" fn(f64) -> bool = unsafe { std::mem::transmute(addr) };
    assert!(run(0.0));
    assert!(!run(1.0));
}

// ---------------------------------------------------------------------------
// S6: uninitialised read
// ---------------------------------------------------------------------------

#[test]
fn s6_uninitialised_read_is_reported() {
    let mut f = Function::new("s6_uninit", ("z", int()), &[]);
    let entry = f.entry();
    let z = f.ret_var();
    let x = f.create_variable("x", Some(int())).unwrap();
    f.append_with_def(entry, Opcode::Assign, z, &[OperandSpec::Var(x)])
        .unwrap();

    let (sf, addr) = compile(&mut f);

    // the undefined value is encoded in the static form
    let has_undef = sf
        .blocks
        .iter()
        .flat_map(|b| b.instructions.iter())
        .any(|i| {
            i.operands.iter().any(|o| match o {
                StaticOperand::Constant(c) => c.is_undefined(),
                _ => false,
            })
        });
    assert!(has_undef);

    runtime::reset_uninit_flag();
    let run: extern "C" fn() -> i32 = unsafe { std::mem::transmute(addr) };
    let result = run();
    assert!(runtime::uninit_reported(), "the runtime hook must fire");
    assert_eq!(result, 0, "the undefined value reads as zero");
}

// ---------------------------------------------------------------------------
// Operator coverage
// ---------------------------------------------------------------------------

fn run_binary(name: &str, op: Opcode, lhs: i32, rhs: i32) -> i32 {
    let mut f = Function::new(name, ("z", int()), &[]);
    let entry = f.entry();
    let z = f.ret_var();
    f.append_with_def(entry, op, z, &[c(lhs), c(rhs)]).unwrap();
    let (_, addr) = compile(&mut f);
    let run: extern "C" fn() -> i32 = unsafe { std::mem::transmute(addr) };
    run()
}

#[test]
fn arithmetic_operators() {
    assert_eq!(run_binary("op_sub", Opcode::Sub, 7, 2), 5);
    assert_eq!(run_binary("op_mul", Opcode::Mul, 6, 7), 42);
    assert_eq!(run_binary("op_div", Opcode::Div, 10, 3), 3);
    assert_eq!(run_binary("op_rem", Opcode::Rem, -7, 3), -1);
    assert_eq!(run_binary("op_mod", Opcode::Mod, -7, 3), 2);
}

#[test]
fn bitwise_operators() {
    assert_eq!(run_binary("op_band", Opcode::BAnd, 6, 3), 2);
    assert_eq!(run_binary("op_bor", Opcode::BOr, 6, 3), 7);
    assert_eq!(run_binary("op_bxor", Opcode::BXor, 6, 3), 5);
    assert_eq!(run_binary("op_shl", Opcode::BShiftL, 1, 4), 16);
    assert_eq!(run_binary("op_ashr", Opcode::BAShiftR, -8, 1), -4);
}

#[test]
fn relational_operators() {
    let mut f = Function::new("op_lt", ("z", boolean()), &[("a", int()), ("b", int())]);
    let entry = f.entry();
    let z = f.ret_var();
    let a = f.params()[0];
    let b = f.params()[1];
    f.append_with_def(
        entry,
        Opcode::Lt,
        z,
        &[OperandSpec::Var(a), OperandSpec::Var(b)],
    )
    .unwrap();

    let (_, addr) = compile(&mut f);
    let run: extern "C" fn(i32, i32) -> bool = unsafe { std::mem::transmute(addr) };
    assert!(run(2, 3));
    assert!(!run(3, 2));
    assert!(!run(3, 3));
}

#[test]
fn float_arithmetic() {
    let dbl = IrType::Scalar(ScalarType::Double);
    let mut f = Function::new("op_fadd", ("z", dbl), &[("a", dbl), ("b", dbl)]);
    let entry = f.entry();
    let z = f.ret_var();
    let a = f.params()[0];
    let b = f.params()[1];
    f.append_with_def(
        entry,
        Opcode::Mul,
        z,
        &[OperandSpec::Var(a), OperandSpec::Var(b)],
    )
    .unwrap();

    let (_, addr) = compile(&mut f);
    let run: extern "C" fn(f64, f64) -> f64 = unsafe { std::mem::transmute(addr) };
    assert_eq!(run(1.5, 4.0), 6.0);
}

#[test]
fn while_loop_with_condition_on_parameter() {
    // n counts down to zero; returns the number of iterations
    let mut b = IrBuilder::new("count_down", ("z", int()), &[("n", int())]);
    b.compile(&[
        Stmt::assign("z", Expr::constant(Constant::I32(0))),
        Stmt::while_loop(
            Expr::binary(
                BinaryOp::Gt,
                Expr::ident("n"),
                Expr::constant(Constant::I32(0)),
            ),
            vec![
                Stmt::assign(
                    "n",
                    Expr::binary(
                        BinaryOp::Sub,
                        Expr::ident("n"),
                        Expr::constant(Constant::I32(1)),
                    ),
                ),
                Stmt::assign(
                    "z",
                    Expr::binary(
                        BinaryOp::Add,
                        Expr::ident("z"),
                        Expr::constant(Constant::I32(1)),
                    ),
                ),
            ],
        ),
    ])
    .unwrap();
    let mut f = b.finish();

    let (_, addr) = compile(&mut f);
    let run: extern "C" fn(i32) -> i32 = unsafe { std::mem::transmute(addr) };
    assert_eq!(run(4), 4);
    assert_eq!(run(0), 0);
}

// ---------------------------------------------------------------------------
// Determinism across the whole pipeline
// ---------------------------------------------------------------------------

#[test]
fn lowering_is_deterministic_for_structured_functions() {
    let build = || {
        let mut b = IrBuilder::new("det", ("x", int()), &[]);
        b.compile(&[
            Stmt::assign("x", Expr::constant(Constant::I32(1))),
            Stmt::for_loop(
                "i",
                Expr::constant(Constant::I32(0)),
                Expr::constant(Constant::I32(3)),
                vec![Stmt::assign(
                    "x",
                    Expr::binary(
                        BinaryOp::Add,
                        Expr::ident("x"),
                        Expr::constant(Constant::I32(2)),
                    ),
                )],
            ),
        ])
        .unwrap();
        let mut f = b.finish();
        serde_json::to_vec(&lower(&mut f).unwrap()).unwrap()
    };
    assert_eq!(build(), build());

    // and lowering the same function twice is byte-identical
    let mut b = IrBuilder::new("det", ("x", int()), &[]);
    b.compile(&[Stmt::assign("x", Expr::constant(Constant::I32(1)))])
        .unwrap();
    let mut f = b.finish();
    let first = serde_json::to_vec(&lower(&mut f).unwrap()).unwrap();
    let second = serde_json::to_vec(&lower(&mut f).unwrap()).unwrap();
    assert_eq!(first, second);
}
