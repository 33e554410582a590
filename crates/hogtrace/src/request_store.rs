//! Per-request keyed state shared across probes firing in one request
//! (spec §3, §5).
//!
//! The store is an explicit collaborator passed into every execution —
//! there is no hidden thread-local inside the core (spec §9). Hosts that
//! want request confinement across threads must serialize writers or wrap
//! this type behind their own mutex; nothing here does that for them.

use std::collections::HashMap;

use crate::vm::value::Value;

/// Per-request `$req.*` slots.
///
/// A single instance is meant to be reused across requests: call
/// [`RequestStore::clear`] when the host starts a new request rather than
/// allocating a fresh store each time.
#[derive(Debug, Clone, Default)]
pub struct RequestStore<O> {
    slots: HashMap<String, Value<O>>,
}

impl<O> RequestStore<O> {
    #[must_use]
    pub fn new() -> Self {
        Self { slots: HashMap::new() }
    }

    /// Reads a slot. An unset slot yields `None`, never an error
    /// (spec §3 invariant 1).
    #[must_use]
    pub fn get(&self, name: &str) -> Value<O>
    where
        O: Clone,
    {
        self.slots.get(name).cloned().unwrap_or(Value::None)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value<O>) {
        self.slots.insert(name.into(), value);
    }

    /// Drops every slot, readying the store for a new request.
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
