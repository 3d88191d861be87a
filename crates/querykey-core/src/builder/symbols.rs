//! Pass-scoped anonymous symbol table.
//!
//! Generated names are replaced by small sequential integers in order of
//! first appearance, so two trees built independently compare equal when
//! their generated names differ but their structure does not.

use crate::node::AnonName;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub(crate) struct SymbolTable {
    symbols: HashMap<u64, u32>,
}

impl SymbolTable {
    /// Sequence number for `name`, assigning the next one on first sight.
    pub(crate) fn resolve(&mut self, name: &AnonName) -> u32 {
        let next = u32::try_from(self.symbols.len()).unwrap_or(u32::MAX);

        *self.symbols.entry(name.id()).or_insert(next)
    }

    pub(crate) fn len(&self) -> usize {
        self.symbols.len()
    }
}
