//! VM execution tracing.
//!
//! A trait-based tracer with zero-cost abstraction, grounded on the
//! teacher's `VmTracer`/`NoopTracer` pattern: when [`NoopTracer`] is used,
//! every trace call compiles away entirely via monomorphization, so the
//! default production path carries no tracing overhead. There is no
//! `log`/`tracing` crate dependency here — observability is a caller
//! concern the dispatcher and tracer hooks exist to support, not something
//! the core prescribes a backend for.

use crate::bytecode::Opcode;

/// Hook points a caller can observe during a single probe execution.
///
/// Methods take `&mut self` so stateful tracers (counters, recorders) can
/// accumulate data across a run; [`NoopTracer`]'s empty bodies are trivial
/// for the compiler to inline away.
pub trait Tracer {
    /// An opcode is about to be dispatched at `ip` with the given operand
    /// stack depth.
    fn on_instruction(&mut self, ip: usize, opcode: Opcode, stack_depth: usize) {
        let _ = (ip, opcode, stack_depth);
    }

    /// A predicate stream finished; `result` is its coerced boolean.
    fn on_predicate_result(&mut self, probe_id: &str, result: bool) {
        let _ = (probe_id, result);
    }

    /// A `CAPTURE` instruction emitted an event.
    fn on_capture(&mut self, probe_id: &str, field_count: usize) {
        let _ = (probe_id, field_count);
    }

    /// Execution of a stream aborted with `error`.
    fn on_error(&mut self, probe_id: &str, error: &str) {
        let _ = (probe_id, error);
    }
}

/// Zero-cost default: every hook is a no-op that the compiler inlines away.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl Tracer for NoopTracer {}

/// Writes a human-readable line per hook to stderr. Intended for local
/// debugging of probe programs, not production use.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrTracer;

impl Tracer for StderrTracer {
    fn on_instruction(&mut self, ip: usize, opcode: Opcode, stack_depth: usize) {
        eprintln!("[hogtrace] ip={ip} op={opcode:?} stack_depth={stack_depth}");
    }

    fn on_predicate_result(&mut self, probe_id: &str, result: bool) {
        eprintln!("[hogtrace] probe {probe_id} predicate -> {result}");
    }

    fn on_capture(&mut self, probe_id: &str, field_count: usize) {
        eprintln!("[hogtrace] probe {probe_id} captured {field_count} field(s)");
    }

    fn on_error(&mut self, probe_id: &str, error: &str) {
        eprintln!("[hogtrace] probe {probe_id} aborted: {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_tracer_accepts_all_hooks() {
        let mut t = NoopTracer;
        t.on_instruction(0, Opcode::Halt, 0);
        t.on_predicate_result("p0", true);
        t.on_capture("p0", 2);
        t.on_error("p0", "boom");
    }
}
