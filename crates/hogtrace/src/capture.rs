//! Capture events emitted by a probe body (spec §6).

use std::collections::BTreeMap;

use crate::vm::value::Value;

/// One `capture`/`send` emission.
///
/// Positional arguments are named `arg0..argN` in emission order (spec
/// §6); named arguments keep their source-given names. `values` is a
/// `BTreeMap` so two runs over identical input produce byte-identical
/// iteration order for the sink — a cheap determinism property worth
/// keeping free in the type rather than documenting as "HashMap, but
/// stable in practice".
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureEvent<O> {
    pub session_id: String,
    pub probe_id: String,
    pub request_id: String,
    pub timestamp: f64,
    pub values: BTreeMap<String, Value<O>>,
}

/// The ordered result of running a probe's body stream to completion (or
/// until a [`crate::error::VmError`] aborted it).
#[derive(Debug, Clone, Default)]
pub struct CaptureBatch<O> {
    pub events: Vec<CaptureEvent<O>>,
    /// Non-fatal errors encountered while executing the body (spec §7:
    /// runtime failures abort the body but never propagate to the host).
    pub errors: Vec<String>,
}

impl<O> CaptureBatch<O> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            errors: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Builds the `values` map for one `CAPTURE` instruction (spec §4.4).
///
/// `positional` values are named `arg0..argN` in order; `named` pairs
/// keep their given names. A `CAPTURE` instruction emits one or the
/// other, never both (enforced at compile time, spec §4.2 rule 2).
#[must_use]
pub fn build_values<O>(positional: Vec<Value<O>>, named: Vec<(String, Value<O>)>) -> BTreeMap<String, Value<O>> {
    let mut values = BTreeMap::new();
    for (i, v) in positional.into_iter().enumerate() {
        values.insert(format!("arg{i}"), v);
    }
    for (name, v) in named {
        values.insert(name, v);
    }
    values
}
