use std::collections::HashMap;

use super::CompileError;
use super::labels::LabelTable;
use crate::ast::signature;
use crate::vm::builtins;

/// Where a name lives: a frame slot (variables) or an entry label
/// (functions), plus the nesting level it was declared at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    pub location: i64,
    pub nesting_level: usize,
}

/// Names visible in one lexical scope.
#[derive(Debug, Clone)]
pub struct AddressEnvironment {
    names: HashMap<String, Address>,
    nesting_level: usize,
    next_free_slot: i64,
}

impl Default for AddressEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressEnvironment {
    /// Root environment, with every built-in bound at level 0.
    pub fn new() -> Self {
        let names = builtins::all()
            .map(|(name, arity, label)| (signature(name, arity), Address { location: label, nesting_level: 0 }))
            .collect();
        AddressEnvironment { names, nesting_level: 0, next_free_slot: 0 }
    }

    /// Child scope: sees everything `self` sees, allocates slots from 0.
    pub fn derive(&self) -> Self {
        AddressEnvironment {
            names: self.names.clone(),
            nesting_level: self.nesting_level,
            next_free_slot: 0,
        }
    }

    pub fn increase_nesting_level(&mut self) {
        self.nesting_level += 1;
    }

    pub fn nesting_level(&self) -> usize {
        self.nesting_level
    }

    pub fn slots(&self) -> i64 {
        self.next_free_slot
    }

    /// Bind `signature` (`name/arity`) to a fresh label.
    pub fn declare_function(&mut self, signature: String, labels: &mut LabelTable) -> Address {
        let addr = Address { location: labels.new_label(), nesting_level: self.nesting_level };
        self.names.insert(signature, addr);
        addr
    }

    pub fn declare_variable(&mut self, name: &str) -> Address {
        let addr = Address { location: self.next_free_slot, nesting_level: self.nesting_level };
        self.next_free_slot += 1;
        self.names.insert(name.to_string(), addr);
        addr
    }

    pub fn resolve(&self, name: &str) -> Result<Address, CompileError> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| CompileError::Unresolved { name: name.to_string() })
    }

    /// Static-link hops from this scope to `addr`'s scope.
    pub fn distance(&self, addr: Address) -> i64 {
        self.nesting_level.saturating_sub(addr.nesting_level) as i64
    }
}
