//! Bytecode for probe predicates and bodies (spec §4.4).
//!
//! # Module structure
//!
//! - `op` — the opcode set
//! - `builder` — `BytecodeBuilder` for emitting instructions during
//!   compilation, with running stack-depth tracking
//! - `compiler` — lowers an [`crate::ast::AstProgram`] into per-probe
//!   predicate/body streams sharing one constant pool

pub mod builder;
pub mod compiler;
pub mod op;

pub use builder::BytecodeBuilder;
pub use compiler::{compile, CompiledProbe};
pub use op::Opcode;
