//! The constant pool (spec §3, §4.3).
//!
//! An append-only, dedup-on-hit table shared by every bytecode stream in a
//! [`crate::program::Program`]. `Identifier`, `Field`, and `Function` are
//! kept as distinct constant kinds even when their text matches, so the
//! VM's opcode dispatch (`LOAD_VAR` vs `GET_ATTR` vs `CALL_FUNC`) can trust
//! the kind tag without re-checking the string at run time.

use indexmap::IndexSet;

use crate::error::CompileError;

/// One entry in the constant pool.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    None,
    /// A bare variable name (`LOAD_VAR` operand).
    Identifier(String),
    /// An attribute/field name (`GET_ATTR` operand).
    Field(String),
    /// A function name (`CALL_FUNC` operand).
    Function(String),
}

/// The maximum number of entries a pool may hold (spec §4.3 invariant:
/// indices must fit a u16, and the spec additionally caps total entries at
/// 65,535 rather than the full 65,536-value range of a u16).
pub const MAX_ENTRIES: usize = 65_535;

/// Hashable/comparable projection of [`Constant`] used for dedup lookups.
/// `f64` isn't `Eq`/`Hash`, so floats are compared by bit pattern — this
/// means `-0.0` and `0.0` intern as distinct constants, which is the
/// correct, unsurprising behavior for a dedup-by-identity-of-bits table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstantKey {
    Int(i64),
    Float(u64),
    Str(String),
    Bool(bool),
    None,
    Identifier(String),
    Field(String),
    Function(String),
}

impl From<&Constant> for ConstantKey {
    fn from(c: &Constant) -> Self {
        match c {
            Constant::Int(n) => Self::Int(*n),
            Constant::Float(f) => Self::Float(f.to_bits()),
            Constant::Str(s) => Self::Str(s.clone()),
            Constant::Bool(b) => Self::Bool(*b),
            Constant::None => Self::None,
            Constant::Identifier(s) => Self::Identifier(s.clone()),
            Constant::Field(s) => Self::Field(s.clone()),
            Constant::Function(s) => Self::Function(s.clone()),
        }
    }
}

/// Append-only, dedup-on-hit constant pool.
///
/// `keys` and `entries` are always the same length and index in lockstep:
/// `keys`'s insertion order doubles as the stable pool index handed back
/// to callers, while `entries` keeps the actual `Constant` payload (which
/// can't itself live in an `IndexSet` because `Float`'s `f64` isn't `Eq`).
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    keys: IndexSet<ConstantKey>,
    entries: Vec<Constant>,
}

impl ConstantPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `constant`, returning its stable pool index. Equal constants
    /// of the same kind reuse the same index (spec §4.3).
    ///
    /// # Errors
    /// Returns [`CompileError::PoolOverflow`] if the pool would grow past
    /// [`MAX_ENTRIES`] distinct constants.
    pub fn intern(&mut self, constant: Constant) -> Result<u16, CompileError> {
        let key = ConstantKey::from(&constant);
        if let Some(idx) = self.keys.get_index_of(&key) {
            return Ok(idx as u16);
        }
        if self.entries.len() >= MAX_ENTRIES {
            return Err(CompileError::PoolOverflow);
        }
        self.keys.insert(key);
        self.entries.push(constant);
        Ok((self.entries.len() - 1) as u16)
    }

    #[must_use]
    pub fn get(&self, index: u16) -> Option<&Constant> {
        self.entries.get(index as usize)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn entries(&self) -> &[Constant] {
        &self.entries
    }

    /// Rebuilds a pool from an already-decoded entry list (used by
    /// [`crate::program::Program::deserialize`]). No dedup is performed —
    /// the wire format stores the exact entries the writer produced.
    #[must_use]
    pub fn from_entries(entries: Vec<Constant>) -> Self {
        let keys = entries.iter().map(ConstantKey::from).collect();
        Self { keys, entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedups_equal_constants() {
        let mut pool = ConstantPool::new();
        let a = pool.intern(Constant::Int(42)).unwrap();
        let b = pool.intern(Constant::Int(42)).unwrap();
        assert_eq!(a, b);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn distinguishes_kinds_with_same_text() {
        let mut pool = ConstantPool::new();
        let ident = pool.intern(Constant::Identifier("x".into())).unwrap();
        let field = pool.intern(Constant::Field("x".into())).unwrap();
        let func = pool.intern(Constant::Function("x".into())).unwrap();
        assert_ne!(ident, field);
        assert_ne!(field, func);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn distinguishes_negative_and_positive_zero() {
        let mut pool = ConstantPool::new();
        let pos = pool.intern(Constant::Float(0.0)).unwrap();
        let neg = pool.intern(Constant::Float(-0.0)).unwrap();
        assert_ne!(pos, neg);
    }
}
