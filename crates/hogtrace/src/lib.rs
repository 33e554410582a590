#![doc = include_str!("../../../README.md")]

//! HogTrace: a probe-source compiler pipeline and bytecode virtual machine
//! for host-application instrumentation.
//!
//! ```text
//! source --lexer/parser--> AST --analyzer--> AST --compiler--> Program --serialize--> bytes
//!                                                                  |
//!                                                                  v
//!                                              execute_probe(Program, Frame, RequestStore)
//! ```
//!
//! The core is entirely host-language-neutral: host semantics only enter
//! through the [`vm::Dispatcher`] trait a host implements once.

pub mod analyzer;
pub mod ast;
pub mod bytecode;
pub mod capture;
pub mod error;
pub mod intern;
pub mod lexer;
pub mod parser;
pub mod program;
pub mod request_store;
pub mod tracer;
pub mod vm;

pub use ast::AstProgram;
pub use capture::{build_values, CaptureBatch, CaptureEvent};
pub use error::{CompileError, DecodeError, DispatcherError, Limit, Location, SyntaxError, VmError};
pub use intern::{Constant, ConstantPool};
pub use program::{compile_program, Program, ProbeEntry, ProbeSpecEntry, WIRE_VERSION};
pub use request_store::RequestStore;
pub use tracer::{NoopTracer, StderrTracer, Tracer};
pub use vm::{coerce_bool, execute_probe, execute_probe_traced, Dispatcher, ExecutorLimits, RunContext, Value, SAMPLE_OK_IDENT};

/// Parses and compiles `source` into a ready-to-serialize [`Program`]
/// (spec §6's `compile(source) → Program | CompileError` entry point).
///
/// # Errors
/// Returns [`SyntaxError`] for lexer/parser failures (converted to a
/// `String` via `Display` — callers needing the structured form should call
/// [`parser::parse`] directly), or [`CompileError`] for semantic/bytecode
/// failures.
pub fn compile(source: &str) -> Result<Program, CompileSourceError> {
    let ast = parser::parse(source).map_err(CompileSourceError::Syntax)?;
    program::compile_program(&ast).map_err(CompileSourceError::Compile)
}

/// Either stage of failure `compile` can produce.
#[derive(Debug, Clone, PartialEq)]
pub enum CompileSourceError {
    Syntax(SyntaxError),
    Compile(CompileError),
}

impl std::fmt::Display for CompileSourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Syntax(e) => write!(f, "{e}"),
            Self::Compile(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CompileSourceError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_a_simple_probe() {
        let program = compile("fn:m.f:entry { capture(arg0); }").unwrap();
        assert_eq!(program.probes.len(), 1);
    }

    #[test]
    fn surfaces_syntax_errors() {
        let err = compile("not a probe").unwrap_err();
        assert!(matches!(err, CompileSourceError::Syntax(_)));
    }

    #[test]
    fn surfaces_compile_errors() {
        let err = compile("fn:m.f:entry { capture(mystery); }").unwrap_err();
        assert!(matches!(err, CompileSourceError::Compile(_)));
    }
}
