//! The bytecode executor (spec §4.6).
//!
//! A linear stack machine: no control flow, no suspension, one instance
//! runs one stream to completion on the calling thread. Every runtime
//! failure is caught here and converted into a safe, non-fatal outcome —
//! predicates coerce to `false`, bodies abort and keep whatever captures
//! they'd already emitted (spec §7's foundational safety property: probes
//! never propagate runtime failures to the host).

pub mod dispatcher;
pub mod value;

use crate::bytecode::op::Opcode;
use crate::capture::{build_values, CaptureBatch, CaptureEvent};
use crate::error::{DispatcherError, Limit, VmError};
use crate::intern::{Constant, ConstantPool};
use crate::program::{Program, ProbeEntry};
use crate::request_store::RequestStore;
use crate::tracer::{NoopTracer, Tracer};

pub use dispatcher::{coerce_bool, Dispatcher, SAMPLE_OK_IDENT};
pub use value::Value;

/// Resource bounds enforced for a single probe execution (spec §4.6).
#[derive(Debug, Clone, Copy)]
pub struct ExecutorLimits {
    pub max_stack_slots: usize,
    pub max_instructions: usize,
    pub max_capture_bytes: usize,
}

impl Default for ExecutorLimits {
    fn default() -> Self {
        Self {
            max_stack_slots: 256,
            max_instructions: 10_000,
            max_capture_bytes: 1_000_000,
        }
    }
}

/// Identifying context a host passes alongside a probe run, used only to
/// stamp emitted [`CaptureEvent`]s — the VM never interprets these fields.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub session_id: String,
    pub request_id: String,
    pub timestamp: f64,
}

/// Runs `probe`'s predicate (if any), and on a truthy result its body,
/// against `dispatcher` and `request_store`.
///
/// Returns `None` when the predicate is false (including when it fails at
/// runtime — spec §4.6 coerces any predicate-time `VmError` to `false`).
/// Returns `Some(batch)` otherwise, where `batch.errors` is non-empty only
/// if the body aborted partway through.
pub fn execute_probe<D: Dispatcher>(
    program: &Program,
    probe: &ProbeEntry,
    dispatcher: &mut D,
    request_store: &mut RequestStore<D::Object>,
    ctx: &RunContext,
    limits: &ExecutorLimits,
) -> Option<CaptureBatch<D::Object>> {
    execute_probe_traced(program, probe, dispatcher, request_store, ctx, limits, &mut NoopTracer)
}

/// Same as [`execute_probe`], but reporting execution events to `tracer`.
/// With [`NoopTracer`] this monomorphizes down to the exact same code path.
pub fn execute_probe_traced<D: Dispatcher, T: Tracer>(
    program: &Program,
    probe: &ProbeEntry,
    dispatcher: &mut D,
    request_store: &mut RequestStore<D::Object>,
    ctx: &RunContext,
    limits: &ExecutorLimits,
    tracer: &mut T,
) -> Option<CaptureBatch<D::Object>> {
    let mut exec = Executor::new(&program.constants, dispatcher, request_store, limits);

    let predicate_passed = match exec.run_stream(&probe.predicate, tracer) {
        Ok(stack) => match stack.last() {
            Some(top) => coerce_bool(top, exec.dispatcher),
            None => true, // empty predicate bytecode (spec §8 invariant)
        },
        Err(_) => false,
    };
    tracer.on_predicate_result(&probe.id, predicate_passed);
    if !predicate_passed {
        return None;
    }

    exec.stack.clear();
    exec.instruction_count = 0;
    let mut batch = CaptureBatch::new();
    if let Err(err) = exec.run_body(&probe.body, probe.id.as_str(), ctx, &mut batch, tracer) {
        tracer.on_error(&probe.id, &err.to_string());
        batch.errors.push(err.to_string());
    }
    Some(batch)
}

struct Executor<'a, D: Dispatcher> {
    constants: &'a ConstantPool,
    dispatcher: &'a mut D,
    request_store: &'a mut RequestStore<D::Object>,
    limits: &'a ExecutorLimits,
    stack: Vec<Value<D::Object>>,
    instruction_count: usize,
    captured_bytes: usize,
}

impl<'a, D: Dispatcher> Executor<'a, D> {
    fn new(
        constants: &'a ConstantPool,
        dispatcher: &'a mut D,
        request_store: &'a mut RequestStore<D::Object>,
        limits: &'a ExecutorLimits,
    ) -> Self {
        Self {
            constants,
            dispatcher,
            request_store,
            limits,
            stack: Vec::new(),
            instruction_count: 0,
            captured_bytes: 0,
        }
    }

    fn push(&mut self, value: Value<D::Object>) -> Result<(), VmError> {
        if self.stack.len() >= self.limits.max_stack_slots {
            return Err(VmError::Limit(Limit::StackDepth));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value<D::Object>, VmError> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<Value<D::Object>>, VmError> {
        if self.stack.len() < n {
            return Err(VmError::StackUnderflow);
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    fn const_str(&self, idx: u16, expected: &'static str) -> Result<&'a str, VmError> {
        match self.constants.get(idx) {
            Some(Constant::Identifier(s) | Constant::Field(s) | Constant::Function(s)) => Ok(s.as_str()),
            Some(_) => Err(VmError::TypeMismatch {
                op: expected,
                detail: "constant pool entry is not a name".to_owned(),
            }),
            None => Err(VmError::ConstPoolIndexOutOfRange {
                index: idx,
                len: self.constants.len() as u16,
            }),
        }
    }

    fn const_value(&self, idx: u16) -> Result<Value<D::Object>, VmError> {
        match self.constants.get(idx) {
            Some(Constant::Int(n)) => Ok(Value::Int(*n)),
            Some(Constant::Float(f)) => Ok(Value::Float(*f)),
            Some(Constant::Str(s)) => Ok(Value::String(s.clone())),
            Some(Constant::Bool(b)) => Ok(Value::Bool(*b)),
            Some(Constant::None) => Ok(Value::None),
            Some(Constant::Identifier(_) | Constant::Field(_) | Constant::Function(_)) => Err(VmError::TypeMismatch {
                op: "PUSH_CONST",
                detail: "constant pool entry is a name, not a value".to_owned(),
            }),
            None => Err(VmError::ConstPoolIndexOutOfRange {
                index: idx,
                len: self.constants.len() as u16,
            }),
        }
    }

    /// Runs `bytecode` to completion and returns the final operand stack.
    /// Used for predicate streams, where the caller only cares about the
    /// top value; also reused by [`Self::run_body`] for the shared decode
    /// loop.
    fn run_stream<T: Tracer>(&mut self, bytecode: &[u8], tracer: &mut T) -> Result<Vec<Value<D::Object>>, VmError> {
        let mut sink = None;
        self.interpret(bytecode, &mut sink, tracer)?;
        Ok(std::mem::take(&mut self.stack))
    }

    fn run_body<T: Tracer>(
        &mut self,
        bytecode: &[u8],
        probe_id: &str,
        ctx: &RunContext,
        batch: &mut CaptureBatch<D::Object>,
        tracer: &mut T,
    ) -> Result<(), VmError> {
        let mut sink = Some(CaptureSink {
            batch,
            probe_id,
            ctx,
        });
        self.interpret(bytecode, &mut sink, tracer)
    }

    fn interpret<T: Tracer>(&mut self, bytecode: &[u8], sink: &mut Option<CaptureSink<'_, '_, D::Object>>, tracer: &mut T) -> Result<(), VmError> {
        let mut ip = 0usize;
        while ip < bytecode.len() {
            self.instruction_count += 1;
            if self.instruction_count > self.limits.max_instructions {
                return Err(VmError::Limit(Limit::Instructions));
            }

            let byte = bytecode[ip];
            let op = Opcode::from_byte(byte).ok_or(VmError::BadOpcode(byte))?;
            tracer.on_instruction(ip - 1, op, self.stack.len());
            ip += 1;

            if bytecode.len() - ip < op.operand_width() {
                return Err(VmError::StackUnderflow);
            }

            macro_rules! read_u16 {
                () => {{
                    let bytes = [bytecode[ip], bytecode[ip + 1]];
                    ip += 2;
                    u16::from_le_bytes(bytes)
                }};
            }
            macro_rules! read_u8 {
                () => {{
                    let b = bytecode[ip];
                    ip += 1;
                    b
                }};
            }

            match op {
                Opcode::PushConst => {
                    let idx = read_u16!();
                    let v = self.const_value(idx)?;
                    self.push(v)?;
                }
                Opcode::Pop => {
                    self.pop()?;
                }
                Opcode::LoadVar => {
                    let idx = read_u16!();
                    let name = self.const_str(idx, "LOAD_VAR")?.to_owned();
                    let v = self.dispatcher.load_variable(&name).map_err(VmError::from)?;
                    self.push(v)?;
                }
                Opcode::StoreVar => {
                    return Err(VmError::ReservedOpcode(byte));
                }
                Opcode::LoadReq => {
                    let idx = read_u16!();
                    let name = self.const_str(idx, "LOAD_REQ")?.to_owned();
                    let v = self.request_store.get(&name);
                    self.push(v)?;
                }
                Opcode::StoreReq => {
                    let idx = read_u16!();
                    let name = self.const_str(idx, "STORE_REQ")?.to_owned();
                    let v = self.pop()?;
                    self.request_store.set(name, v);
                }
                Opcode::GetAttr => {
                    let idx = read_u16!();
                    let field = self.const_str(idx, "GET_ATTR")?.to_owned();
                    let obj = self.pop()?;
                    let v = self.dispatcher.get_attribute(&obj, &field).map_err(VmError::from)?;
                    self.push(v)?;
                }
                Opcode::GetItem => {
                    let key = self.pop()?;
                    let obj = self.pop()?;
                    let v = self.dispatcher.get_item(&obj, &key).map_err(VmError::from)?;
                    self.push(v)?;
                }
                Opcode::CallFunc => {
                    let idx = read_u16!();
                    let argc = read_u8!() as usize;
                    let name = self.const_str(idx, "CALL_FUNC")?.to_owned();
                    let args = self.pop_n(argc)?;
                    let v = self.dispatcher.call_function(&name, &args).map_err(VmError::from)?;
                    self.push(v)?;
                }
                Opcode::Capture => {
                    let argc = read_u8!() as usize;
                    let namedc = read_u8!() as usize;
                    self.exec_capture(argc, namedc, sink, tracer)?;
                }
                Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => self.exec_arith(op)?,
                Opcode::Eq | Opcode::Ne | Opcode::Lt | Opcode::Gt | Opcode::Le | Opcode::Ge => self.exec_cmp(op)?,
                Opcode::And | Opcode::Or => self.exec_logical(op)?,
                Opcode::Not => {
                    let v = self.pop()?;
                    let b = coerce_bool(&v, self.dispatcher);
                    self.push(Value::Bool(!b))?;
                }
                Opcode::Halt => break,
            }
        }
        Ok(())
    }

    fn exec_capture<T: Tracer>(
        &mut self,
        argc: usize,
        namedc: usize,
        sink: &mut Option<CaptureSink<'_, '_, D::Object>>,
        tracer: &mut T,
    ) -> Result<(), VmError> {
        let (positional, named) = if namedc > 0 {
            let mut pairs = Vec::with_capacity(namedc);
            for _ in 0..namedc {
                let name_val = self.pop()?;
                let value = self.pop()?;
                let name = match name_val {
                    Value::String(s) => s,
                    other => {
                        return Err(VmError::TypeMismatch {
                            op: "CAPTURE",
                            detail: format!("named arg name must be a string, got {}", other.type_name()),
                        })
                    }
                };
                pairs.push((name, value));
            }
            pairs.reverse();
            (Vec::new(), pairs)
        } else {
            let values = self.pop_n(argc)?;
            (values, Vec::new())
        };

        let Some(sink) = sink else {
            return Ok(()); // CAPTURE in a predicate stream is inert; compiler never emits it there.
        };
        let values = build_values(positional, named);
        let approx_bytes: usize = values
            .iter()
            .map(|(k, v)| k.len() + v.to_string().len())
            .sum();
        self.captured_bytes += approx_bytes;
        if self.captured_bytes > self.limits.max_capture_bytes {
            return Err(VmError::Limit(Limit::CaptureBytes));
        }
        tracer.on_capture(sink.probe_id, values.len());
        sink.batch.events.push(CaptureEvent {
            session_id: sink.ctx.session_id.clone(),
            probe_id: sink.probe_id.to_owned(),
            request_id: sink.ctx.request_id.clone(),
            timestamp: sink.ctx.timestamp,
            values,
        });
        Ok(())
    }

    fn exec_arith(&mut self, op: Opcode) -> Result<(), VmError> {
        let b = self.pop()?;
        let a = self.pop()?;
        let result = match (&a, &b) {
            (Value::Int(x), Value::Int(y)) => match op {
                Opcode::Add => Value::Int(x.wrapping_add(*y)),
                Opcode::Sub => Value::Int(x.wrapping_sub(*y)),
                Opcode::Mul => Value::Int(x.wrapping_mul(*y)),
                Opcode::Div => int_div(*x, *y, op)?,
                Opcode::Mod => int_div(*x, *y, op)?,
                _ => unreachable!(),
            },
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                let x = as_f64(&a);
                let y = as_f64(&b);
                match op {
                    Opcode::Add => Value::Float(x + y),
                    Opcode::Sub => Value::Float(x - y),
                    Opcode::Mul => Value::Float(x * y),
                    Opcode::Div => Value::Float(x / y),
                    Opcode::Mod => Value::Float(x % y),
                    _ => unreachable!(),
                }
            }
            _ => {
                return Err(VmError::TypeMismatch {
                    op: opcode_name(op),
                    detail: format!("incompatible operand kinds {} and {}", a.type_name(), b.type_name()),
                })
            }
        };
        self.push(result)
    }

    fn exec_cmp(&mut self, op: Opcode) -> Result<(), VmError> {
        let b = self.pop()?;
        let a = self.pop()?;
        let ordering = numeric_or_string_cmp(&a, &b, op)?;
        self.push(Value::Bool(ordering))
    }

    fn exec_logical(&mut self, op: Opcode) -> Result<(), VmError> {
        // Strict: both operands are already on the stack by the time we
        // get here (spec §4.4 — the VM never short-circuits).
        let b = self.pop()?;
        let a = self.pop()?;
        let ab = coerce_bool(&a, self.dispatcher);
        let bb = coerce_bool(&b, self.dispatcher);
        let result = match op {
            Opcode::And => ab && bb,
            Opcode::Or => ab || bb,
            _ => unreachable!(),
        };
        self.push(Value::Bool(result))
    }
}

struct CaptureSink<'b, 'c, O> {
    batch: &'b mut CaptureBatch<O>,
    probe_id: &'b str,
    ctx: &'c RunContext,
}

fn as_f64<O>(v: &Value<O>) -> f64 {
    match v {
        Value::Int(n) => *n as f64,
        Value::Float(f) => *f,
        _ => f64::NAN,
    }
}

fn int_div<O>(x: i64, y: i64, op: Opcode) -> Result<Value<O>, VmError> {
    if y == 0 {
        return Err(VmError::TypeMismatch {
            op: opcode_name(op),
            detail: "division by zero".to_owned(),
        });
    }
    Ok(match op {
        Opcode::Div => Value::Int(x / y),
        Opcode::Mod => Value::Int(x % y),
        _ => unreachable!(),
    })
}

fn numeric_or_string_cmp<O: PartialEq>(a: &Value<O>, b: &Value<O>, op: Opcode) -> Result<bool, VmError> {
    use std::cmp::Ordering;
    let ordering = match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => as_f64(a).partial_cmp(&as_f64(b)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ if matches!(op, Opcode::Eq | Opcode::Ne) => None,
        _ => {
            return Err(VmError::TypeMismatch {
                op: opcode_name(op),
                detail: format!("cannot order {} and {}", a.type_name(), b.type_name()),
            })
        }
    };
    Ok(match op {
        Opcode::Eq => a == b,
        Opcode::Ne => a != b,
        Opcode::Lt => ordering == Some(Ordering::Less),
        Opcode::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        Opcode::Gt => ordering == Some(Ordering::Greater),
        Opcode::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        _ => unreachable!(),
    })
}

fn opcode_name(op: Opcode) -> &'static str {
    match op {
        Opcode::Add => "ADD",
        Opcode::Sub => "SUB",
        Opcode::Mul => "MUL",
        Opcode::Div => "DIV",
        Opcode::Mod => "MOD",
        Opcode::Eq => "EQ",
        Opcode::Ne => "NE",
        Opcode::Lt => "LT",
        Opcode::Gt => "GT",
        Opcode::Le => "LE",
        Opcode::Ge => "GE",
        _ => "OP",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::program::compile_program;

    #[derive(Debug, Clone, PartialEq)]
    struct NoObject;
    impl std::fmt::Display for NoObject {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "<object>")
        }
    }

    struct TestDispatcher {
        vars: std::collections::HashMap<String, Value<NoObject>>,
    }

    impl Dispatcher for TestDispatcher {
        type Object = NoObject;

        fn load_variable(&mut self, name: &str) -> Result<Value<NoObject>, DispatcherError> {
            self.vars.get(name).cloned().ok_or_else(|| DispatcherError::new(format!("unknown variable {name}")))
        }

        fn get_attribute(&mut self, _obj: &Value<NoObject>, _field: &str) -> Result<Value<NoObject>, DispatcherError> {
            Err(DispatcherError::new("not supported in test dispatcher"))
        }

        fn get_item(&mut self, _obj: &Value<NoObject>, _key: &Value<NoObject>) -> Result<Value<NoObject>, DispatcherError> {
            Err(DispatcherError::new("not supported in test dispatcher"))
        }

        fn call_function(&mut self, name: &str, args: &[Value<NoObject>]) -> Result<Value<NoObject>, DispatcherError> {
            match name {
                "len" => match args.first() {
                    Some(Value::String(s)) => Ok(Value::Int(s.len() as i64)),
                    _ => Err(DispatcherError::new("len: unsupported argument")),
                },
                "rand" => Ok(Value::Float(0.0)),
                _ => Err(DispatcherError::new(format!("unknown function {name}"))),
            }
        }

        fn truthy(&mut self, _obj: &NoObject) -> bool {
            true
        }
    }

    fn run(src: &str, vars: &[(&str, Value<NoObject>)]) -> Option<CaptureBatch<NoObject>> {
        let ast = parse(src).unwrap();
        let program = compile_program(&ast).unwrap();
        let mut dispatcher = TestDispatcher {
            vars: vars.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        };
        let mut store = RequestStore::new();
        let ctx = RunContext {
            session_id: "s".into(),
            request_id: "r".into(),
            timestamp: 0.0,
        };
        execute_probe(&program, &program.probes[0], &mut dispatcher, &mut store, &ctx, &ExecutorLimits::default())
    }

    #[test]
    fn basic_capture() {
        let batch = run("fn:m.f:entry { capture(arg0); }", &[("arg0", Value::Int(42))]).unwrap();
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.events[0].values.get("arg0"), Some(&Value::Int(42)));
    }

    #[test]
    fn predicate_filters_out_non_matching_frame() {
        let src = "fn:m.f:entry / arg0 == \"admin\" / { capture(arg0); }";
        assert!(run(src, &[("arg0", Value::String("user".into()))]).is_none());
        assert!(run(src, &[("arg0", Value::String("admin".into()))]).is_some());
    }

    #[test]
    fn empty_predicate_is_always_true() {
        assert!(run("fn:m.f:entry { capture(arg0); }", &[("arg0", Value::Int(1))]).is_some());
    }

    #[test]
    fn named_capture_uses_given_names() {
        let batch = run("fn:m.f:entry { capture(v = arg0); }", &[("arg0", Value::Int(9))]).unwrap();
        assert_eq!(batch.events[0].values.get("v"), Some(&Value::Int(9)));
    }

    #[test]
    fn type_mismatch_aborts_body_but_keeps_prior_captures() {
        let src = "fn:m.f:entry { capture(arg0); capture(x = arg0 + self); }";
        let batch = run(src, &[("arg0", Value::Int(1)), ("self", Value::None)]).unwrap();
        assert_eq!(batch.events.len(), 1);
        assert!(!batch.errors.is_empty());
    }

    #[test]
    fn unknown_variable_fails_predicate_to_false() {
        let batch = run("fn:m.f:entry / mystery / { capture(arg0); }", &[("arg0", Value::Int(1))]);
        assert!(batch.is_none());
    }

    #[test]
    fn instruction_cap_returns_partial_captures() {
        let mut src = String::from("fn:m.f:entry { ");
        for _ in 0..10_001 {
            src.push_str("capture(1); ");
        }
        src.push('}');
        let ast = parse(&src).unwrap();
        let program = compile_program(&ast).unwrap();
        let mut dispatcher = TestDispatcher {
            vars: std::collections::HashMap::new(),
        };
        let mut store = RequestStore::new();
        let ctx = RunContext {
            session_id: "s".into(),
            request_id: "r".into(),
            timestamp: 0.0,
        };
        let batch = execute_probe(&program, &program.probes[0], &mut dispatcher, &mut store, &ctx, &ExecutorLimits::default()).unwrap();
        assert!(!batch.events.is_empty());
        assert!(!batch.errors.is_empty());
        assert!(batch.events.len() < 10_001);
    }
}
