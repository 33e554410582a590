//! The compiled [`Program`] container and its wire format (spec §3, §6).
//!
//! The wire format is hand-rolled rather than routed through a generic
//! serialization crate: spec §6 mandates an exact little-endian,
//! u32-length-prefixed byte layout that a varint-based format like
//! `postcard` cannot reproduce bit-for-bit. This mirrors the teacher's own
//! habit of dropping to manual `to_ne_bytes()`/cursor-based encoding for its
//! bytecode stream (`bytecode/builder.rs`) rather than going through serde
//! for that one boundary.

use std::fmt;

use crate::ast::{AstProgram, ProbeTarget, Provider};
use crate::bytecode::compiler::{self, CompiledProbe};
use crate::error::{CompileError, DecodeError};
use crate::intern::{Constant, ConstantPool};

/// The only wire format version this build understands (spec §6).
pub const WIRE_VERSION: u32 = 1;

/// A fully compiled, immutable probe program (spec §3).
#[derive(Debug, Clone)]
pub struct Program {
    pub version: u32,
    pub sampling: f32,
    pub constants: ConstantPool,
    pub probes: Vec<ProbeEntry>,
}

/// One compiled probe and its spec metadata.
#[derive(Debug, Clone)]
pub struct ProbeEntry {
    /// Stable textual id, a fingerprint of the spec and its position in the
    /// source program (spec §3: "fingerprint of spec + position").
    pub id: String,
    pub spec: ProbeSpecEntry,
    pub predicate: Vec<u8>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSpecEntry {
    pub provider: Provider,
    pub specifier: String,
    pub target: ProbeTarget,
}

/// Compiles `source` all the way to a wire-ready [`Program`] with
/// `sampling = 1.0` (global sampling is a program-level knob set by the
/// host after compilation, not something probe source expresses).
///
/// # Errors
/// Propagates [`crate::error::SyntaxError`] wrapped into a [`CompileError`]
/// is not applicable here — parse failures are reported by
/// [`crate::parser::parse`] directly; this function only surfaces
/// [`CompileError`] from analysis and bytecode lowering.
pub fn compile_program(program: &AstProgram) -> Result<Program, CompileError> {
    crate::analyzer::analyze(program)?;
    let (compiled, constants) = compiler::compile(program)?;
    let probes = program
        .probes
        .iter()
        .zip(compiled)
        .enumerate()
        .map(|(position, (ast_probe, compiled_probe))| ProbeEntry {
            id: fingerprint(&ast_probe.spec, position),
            spec: ProbeSpecEntry {
                provider: ast_probe.spec.provider,
                specifier: ast_probe.spec.specifier.clone(),
                target: ast_probe.spec.target,
            },
            predicate: compiled_probe.predicate,
            body: compiled_probe.body,
        })
        .collect();
    Ok(Program {
        version: WIRE_VERSION,
        sampling: 1.0,
        constants,
        probes,
    })
}

fn fingerprint(spec: &crate::ast::AstProbeSpec, position: usize) -> String {
    let provider = match spec.provider {
        Provider::Fn => "fn",
        Provider::Py => "py",
    };
    let target = match spec.target {
        ProbeTarget::Entry => "entry".to_owned(),
        ProbeTarget::Exit => "exit".to_owned(),
        ProbeTarget::EntryOffset(n) => format!("entry+{n}"),
        ProbeTarget::ExitOffset(n) => format!("exit+{n}"),
    };
    format!("{provider}:{}:{target}#{position}", spec.specifier)
}

impl Program {
    /// Serializes this program to the wire format described in spec §6.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.sampling.to_le_bytes());
        write_u32_list(&mut out, self.constants.entries(), write_constant);
        write_u32_list(&mut out, &self.probes, write_probe);
        out
    }

    /// Deserializes a program previously produced by [`Self::serialize`].
    ///
    /// # Errors
    /// Returns [`DecodeError::IncompatibleVersion`] if `bytes` declares a
    /// version other than [`WIRE_VERSION`], or any other [`DecodeError`]
    /// variant if the byte stream is truncated or structurally invalid.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(bytes);
        let version = r.read_u32("version")?;
        if version != WIRE_VERSION {
            return Err(DecodeError::IncompatibleVersion {
                found: version,
                expected: WIRE_VERSION,
            });
        }
        let sampling = r.read_f32("sampling")?;
        let entries = r.read_list("constant_pool", read_constant)?;
        let probes = r.read_list("probes", read_probe)?;
        Ok(Self {
            version,
            sampling,
            constants: ConstantPool::from_entries(entries),
            probes,
        })
    }
}

fn write_u32_list<T>(out: &mut Vec<u8>, items: &[T], mut write_one: impl FnMut(&mut Vec<u8>, &T)) {
    out.extend_from_slice(&(items.len() as u32).to_le_bytes());
    for item in items {
        write_one(out, item);
    }
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

const TAG_INT: u8 = 0;
const TAG_FLOAT: u8 = 1;
const TAG_STRING: u8 = 2;
const TAG_BOOL: u8 = 3;
const TAG_NONE: u8 = 4;
const TAG_IDENTIFIER: u8 = 5;
const TAG_FIELD: u8 = 6;
const TAG_FUNCTION: u8 = 7;

fn write_constant(out: &mut Vec<u8>, c: &Constant) {
    match c {
        Constant::Int(n) => {
            out.push(TAG_INT);
            out.extend_from_slice(&n.to_le_bytes());
        }
        Constant::Float(f) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(&f.to_le_bytes());
        }
        Constant::Str(s) => {
            out.push(TAG_STRING);
            write_string(out, s);
        }
        Constant::Bool(b) => {
            out.push(TAG_BOOL);
            out.push(u8::from(*b));
        }
        Constant::None => out.push(TAG_NONE),
        Constant::Identifier(s) => {
            out.push(TAG_IDENTIFIER);
            write_string(out, s);
        }
        Constant::Field(s) => {
            out.push(TAG_FIELD);
            write_string(out, s);
        }
        Constant::Function(s) => {
            out.push(TAG_FUNCTION);
            write_string(out, s);
        }
    }
}

fn read_constant(r: &mut Reader) -> Result<Constant, DecodeError> {
    let tag = r.read_u8("constant tag")?;
    Ok(match tag {
        TAG_INT => Constant::Int(r.read_i64("constant int")?),
        TAG_FLOAT => Constant::Float(r.read_f64("constant float")?),
        TAG_STRING => Constant::Str(r.read_string("constant string")?),
        TAG_BOOL => Constant::Bool(r.read_u8("constant bool")? != 0),
        TAG_NONE => Constant::None,
        TAG_IDENTIFIER => Constant::Identifier(r.read_string("constant identifier")?),
        TAG_FIELD => Constant::Field(r.read_string("constant field")?),
        TAG_FUNCTION => Constant::Function(r.read_string("constant function")?),
        other => {
            return Err(DecodeError::BadTag {
                context: "constant tag",
                tag: other,
            })
        }
    })
}

const PROVIDER_FN: u8 = 0;
const PROVIDER_PY: u8 = 1;

const TARGET_ENTRY: u8 = 0;
const TARGET_EXIT: u8 = 1;
const TARGET_ENTRY_OFFSET: u8 = 2;
const TARGET_EXIT_OFFSET: u8 = 3;

fn write_probe(out: &mut Vec<u8>, probe: &ProbeEntry) {
    write_string(out, &probe.id);
    out.push(match probe.spec.provider {
        Provider::Fn => PROVIDER_FN,
        Provider::Py => PROVIDER_PY,
    });
    write_string(out, &probe.spec.specifier);
    let (target_tag, offset) = match probe.spec.target {
        ProbeTarget::Entry => (TARGET_ENTRY, 0),
        ProbeTarget::Exit => (TARGET_EXIT, 0),
        ProbeTarget::EntryOffset(n) => (TARGET_ENTRY_OFFSET, n),
        ProbeTarget::ExitOffset(n) => (TARGET_EXIT_OFFSET, n),
    };
    out.push(target_tag);
    out.extend_from_slice(&offset.to_le_bytes());
    write_bytes(out, &probe.predicate);
    write_bytes(out, &probe.body);
}

fn read_probe(r: &mut Reader) -> Result<ProbeEntry, DecodeError> {
    let id = r.read_string("probe id")?;
    let provider = match r.read_u8("probe provider")? {
        PROVIDER_FN => Provider::Fn,
        PROVIDER_PY => Provider::Py,
        other => {
            return Err(DecodeError::BadTag {
                context: "probe provider",
                tag: other,
            })
        }
    };
    let specifier = r.read_string("probe specifier")?;
    let target_tag = r.read_u8("probe target tag")?;
    let offset = r.read_u32("probe target offset")?;
    let target = match target_tag {
        TARGET_ENTRY => ProbeTarget::Entry,
        TARGET_EXIT => ProbeTarget::Exit,
        TARGET_ENTRY_OFFSET => ProbeTarget::EntryOffset(offset),
        TARGET_EXIT_OFFSET => ProbeTarget::ExitOffset(offset),
        other => {
            return Err(DecodeError::BadTag {
                context: "probe target tag",
                tag: other,
            })
        }
    };
    let predicate = r.read_bytes("probe predicate")?;
    let body = r.read_bytes("probe body")?;
    Ok(ProbeEntry {
        id,
        spec: ProbeSpecEntry { provider, specifier, target },
        predicate,
        body,
    })
}

/// A little-endian cursor over an immutable byte slice.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize, context: &'static str) -> Result<&'a [u8], DecodeError> {
        if self.pos + n > self.bytes.len() {
            return Err(DecodeError::Truncated { context });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self, context: &'static str) -> Result<u8, DecodeError> {
        Ok(self.take(1, context)?[0])
    }

    fn read_u32(&mut self, context: &'static str) -> Result<u32, DecodeError> {
        let bytes = self.take(4, context)?;
        Ok(u32::from_le_bytes(bytes.try_into().expect("size checked by take()")))
    }

    fn read_i64(&mut self, context: &'static str) -> Result<i64, DecodeError> {
        let bytes = self.take(8, context)?;
        Ok(i64::from_le_bytes(bytes.try_into().expect("size checked by take()")))
    }

    fn read_f32(&mut self, context: &'static str) -> Result<f32, DecodeError> {
        let bytes = self.take(4, context)?;
        Ok(f32::from_le_bytes(bytes.try_into().expect("size checked by take()")))
    }

    fn read_f64(&mut self, context: &'static str) -> Result<f64, DecodeError> {
        let bytes = self.take(8, context)?;
        Ok(f64::from_le_bytes(bytes.try_into().expect("size checked by take()")))
    }

    fn read_string(&mut self, context: &'static str) -> Result<String, DecodeError> {
        let len = self.read_u32(context)? as usize;
        let bytes = self.take(len, context)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8 { context })
    }

    fn read_bytes(&mut self, context: &'static str) -> Result<Vec<u8>, DecodeError> {
        let len = self.read_u32(context)? as usize;
        Ok(self.take(len, context)?.to_vec())
    }

    fn read_list<T>(&mut self, context: &'static str, mut read_one: impl FnMut(&mut Self) -> Result<T, DecodeError>) -> Result<Vec<T>, DecodeError> {
        let len = self.read_u32(context)?;
        let mut items = Vec::with_capacity(len.min(1 << 20) as usize);
        for _ in 0..len {
            items.push(read_one(self)?);
        }
        Ok(items)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Program(version={}, sampling={}, {} constants, {} probes)",
            self.version,
            self.sampling,
            self.constants.len(),
            self.probes.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn compile_src(src: &str) -> Program {
        let ast = parse(src).unwrap();
        compile_program(&ast).unwrap()
    }

    #[test]
    fn round_trips_through_wire_format() {
        let program = compile_src("fn:m.f:entry / arg0 == \"admin\" / { capture(arg0); }");
        let bytes = program.serialize();
        let decoded = Program::deserialize(&bytes).unwrap();
        assert_eq!(decoded.version, program.version);
        assert_eq!(decoded.probes.len(), program.probes.len());
        assert_eq!(decoded.probes[0].predicate, program.probes[0].predicate);
        assert_eq!(decoded.probes[0].body, program.probes[0].body);
        assert_eq!(decoded.constants.entries(), program.constants.entries());
    }

    #[test]
    fn rejects_incompatible_version() {
        let mut bytes = compile_src("fn:m.f:entry { capture(arg0); }").serialize();
        bytes[0..4].copy_from_slice(&99u32.to_le_bytes());
        assert!(matches!(Program::deserialize(&bytes), Err(DecodeError::IncompatibleVersion { .. })));
    }

    #[test]
    fn rejects_truncated_input() {
        let bytes = compile_src("fn:m.f:entry { capture(arg0); }").serialize();
        let truncated = &bytes[..bytes.len() - 3];
        assert!(matches!(Program::deserialize(truncated), Err(DecodeError::Truncated { .. })));
    }

    #[test]
    fn preserves_offset_targets() {
        let program = compile_src("fn:m.f:entry+3 { capture(arg0); }");
        assert_eq!(program.probes[0].spec.target, ProbeTarget::EntryOffset(3));
        let decoded = Program::deserialize(&program.serialize()).unwrap();
        assert_eq!(decoded.probes[0].spec.target, ProbeTarget::EntryOffset(3));
    }

    #[test]
    fn assigns_stable_fingerprint_ids() {
        let program = compile_src("fn:m.f:entry { capture(arg0); } fn:m.g:entry { capture(arg0); }");
        assert_ne!(program.probes[0].id, program.probes[1].id);
    }
}
