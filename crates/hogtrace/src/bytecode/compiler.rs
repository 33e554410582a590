//! AST → bytecode lowering (spec §4.4).
//!
//! Each [`crate::ast::AstProbe`] compiles to two independent byte streams —
//! predicate and body — sharing one [`ConstantPool`]. There is no control
//! flow in either stream: a probe's predicate is one expression evaluated
//! for its truthiness, and its body is a flat sequence of statements that
//! always all run once the predicate passes.
//!
//! Per-probe `sample` directives fold entirely into the predicate stream
//! (ANDed with any source predicate) rather than gating the body with a
//! conditional skip, since there is no jump opcode to skip with: `sample
//! 1/4;` lowers to the same three opcodes a `/ rand() < 0.25 /` predicate
//! would, so by the time the body stream runs its probe has unconditionally
//! earned the right to.

use crate::ast::{AstProbe, AstProgram, BinaryOp, CaptureArg, Expr, SampleRate, Stmt, UnaryOp};
use crate::error::CompileError;
use crate::intern::{Constant, ConstantPool};

use super::builder::BytecodeBuilder;
use super::op::Opcode;

/// One compiled probe: its specifier metadata lives in
/// [`crate::program::ProbeEntry`]; this is just the two code streams.
#[derive(Debug, Clone)]
pub struct CompiledProbe {
    pub predicate: Vec<u8>,
    pub body: Vec<u8>,
    pub max_stack_depth: u16,
}

/// Lowers every probe in `program`, sharing one constant pool across all of
/// them (spec §4.3: the pool belongs to the program, not to a single probe).
///
/// # Errors
/// Returns [`CompileError::PoolOverflow`] if the program interns more than
/// [`crate::intern::MAX_ENTRIES`] distinct constants.
pub fn compile(program: &AstProgram) -> Result<(Vec<CompiledProbe>, ConstantPool), CompileError> {
    let mut pool = ConstantPool::new();
    let mut compiled = Vec::with_capacity(program.probes.len());
    for probe in &program.probes {
        compiled.push(compile_probe(probe, &mut pool)?);
    }
    Ok((compiled, pool))
}

fn compile_probe(probe: &AstProbe, pool: &mut ConstantPool) -> Result<CompiledProbe, CompileError> {
    let mut pred_builder = BytecodeBuilder::new();
    let mut has_predicate = false;

    if let Some(expr) = &probe.predicate {
        compile_expr(expr, pool, &mut pred_builder)?;
        has_predicate = true;
    }

    // Fold any `sample` directives into the predicate stream as `AND`ed
    // conditions: `sample 1/4;` becomes `rand() < 0.25`.
    for stmt in &probe.body {
        if let Stmt::Sample { rate, .. } = stmt {
            emit_sample_check(*rate, pool, &mut pred_builder)?;
            if has_predicate {
                pred_builder.emit(Opcode::And, -1);
            }
            has_predicate = true;
        }
    }

    let mut body_builder = BytecodeBuilder::new();
    for stmt in &probe.body {
        match stmt {
            Stmt::Sample { .. } => {} // already folded into the predicate above
            Stmt::RequestAssign { name, value, .. } => {
                compile_expr(value, pool, &mut body_builder)?;
                let idx = pool.intern(Constant::Identifier(name.clone()))?;
                body_builder.emit_u16(Opcode::StoreReq, idx, -1);
            }
            Stmt::Capture { args, .. } => compile_capture(args, pool, &mut body_builder)?,
        }
    }

    let max_stack_depth = pred_builder.max_stack_depth().max(body_builder.max_stack_depth());
    Ok(CompiledProbe {
        predicate: pred_builder.build(),
        body: body_builder.build(),
        max_stack_depth,
    })
}

/// `sample RATE;` lowers to `rand() < rate`, using the ordinary
/// `CALL_FUNC`/`PUSH_CONST`/`LT` opcodes — there's no dedicated sampling
/// opcode, since a dispatcher-provided `rand()` plus a comparison says the
/// same thing.
fn emit_sample_check(rate: SampleRate, pool: &mut ConstantPool, builder: &mut BytecodeBuilder) -> Result<(), CompileError> {
    let threshold = match rate {
        SampleRate::Percent(fraction) => fraction,
        SampleRate::Ratio { numerator, denominator } => numerator as f64 / denominator as f64,
    };
    let rand_idx = pool.intern(Constant::Function("rand".to_owned()))?;
    builder.emit_call(rand_idx, 0, 1);
    let threshold_idx = pool.intern(Constant::Float(threshold))?;
    builder.emit_u16(Opcode::PushConst, threshold_idx, 1);
    builder.emit(Opcode::Lt, -1);
    Ok(())
}

fn compile_capture(args: &[CaptureArg], pool: &mut ConstantPool, builder: &mut BytecodeBuilder) -> Result<(), CompileError> {
    let all_named = !args.is_empty() && args.iter().all(|a| a.name.is_some());
    for arg in args {
        compile_expr(&arg.value, pool, builder)?;
    }
    if all_named {
        for arg in args {
            let name = arg.name.as_ref().expect("checked all_named above");
            let idx = pool.intern(Constant::Field(name.clone()))?;
            builder.emit_u16(Opcode::PushConst, idx, 1);
        }
        let argc = args.len() as u8;
        builder.emit_capture(0, argc, -(2 * args.len() as i32));
    } else {
        let argc = args.len() as u8;
        builder.emit_capture(argc, 0, -(args.len() as i32));
    }
    Ok(())
}

fn compile_expr(expr: &Expr, pool: &mut ConstantPool, builder: &mut BytecodeBuilder) -> Result<(), CompileError> {
    match expr {
        Expr::IntLit(n, _) => {
            let idx = pool.intern(Constant::Int(*n))?;
            builder.emit_u16(Opcode::PushConst, idx, 1);
        }
        Expr::FloatLit(f, _) => {
            let idx = pool.intern(Constant::Float(*f))?;
            builder.emit_u16(Opcode::PushConst, idx, 1);
        }
        Expr::StringLit(s, _) => {
            let idx = pool.intern(Constant::Str(s.clone()))?;
            builder.emit_u16(Opcode::PushConst, idx, 1);
        }
        Expr::BoolLit(b, _) => {
            let idx = pool.intern(Constant::Bool(*b))?;
            builder.emit_u16(Opcode::PushConst, idx, 1);
        }
        Expr::NoneLit(_) => {
            let idx = pool.intern(Constant::None)?;
            builder.emit_u16(Opcode::PushConst, idx, 1);
        }
        Expr::Identifier(name, _) => {
            let idx = pool.intern(Constant::Identifier(name.clone()))?;
            builder.emit_u16(Opcode::LoadVar, idx, 1);
        }
        Expr::RequestVar(name, _) => {
            let idx = pool.intern(Constant::Identifier(name.clone()))?;
            builder.emit_u16(Opcode::LoadReq, idx, 1);
        }
        Expr::Attr { base, field, .. } => {
            compile_expr(base, pool, builder)?;
            let idx = pool.intern(Constant::Field(field.clone()))?;
            builder.emit_u16(Opcode::GetAttr, idx, 0);
        }
        Expr::Index { base, key, .. } => {
            compile_expr(base, pool, builder)?;
            compile_expr(key, pool, builder)?;
            builder.emit(Opcode::GetItem, -1);
        }
        Expr::Call { name, args, .. } => {
            for arg in args {
                compile_expr(arg, pool, builder)?;
            }
            let idx = pool.intern(Constant::Function(name.clone()))?;
            builder.emit_call(idx, args.len() as u8, 1 - args.len() as i32);
        }
        Expr::Unary { op, operand, .. } => {
            compile_expr(operand, pool, builder)?;
            match op {
                UnaryOp::Not => builder.emit(Opcode::Not, 0),
            }
        }
        Expr::Binary { op, lhs, rhs, .. } => {
            compile_expr(lhs, pool, builder)?;
            compile_expr(rhs, pool, builder)?;
            let opcode = match op {
                BinaryOp::Or => Opcode::Or,
                BinaryOp::And => Opcode::And,
                BinaryOp::Eq => Opcode::Eq,
                BinaryOp::Ne => Opcode::Ne,
                BinaryOp::Lt => Opcode::Lt,
                BinaryOp::Le => Opcode::Le,
                BinaryOp::Gt => Opcode::Gt,
                BinaryOp::Ge => Opcode::Ge,
                BinaryOp::Add => Opcode::Add,
                BinaryOp::Sub => Opcode::Sub,
                BinaryOp::Mul => Opcode::Mul,
                BinaryOp::Div => Opcode::Div,
                BinaryOp::Mod => Opcode::Mod,
            };
            builder.emit(opcode, -1);
        }
    }
    Ok(())
}
