use std::collections::HashMap;

use super::CompileError;
use crate::vm::builtins;
use crate::vm::instruction::Instruction;

/// Hands out negative placeholder labels and maps each one to the
/// index of the instruction it marks.
#[derive(Debug)]
pub struct LabelTable {
    next: i64,
    positions: HashMap<i64, usize>,
}

impl Default for LabelTable {
    fn default() -> Self {
        Self::new()
    }
}

impl LabelTable {
    pub fn new() -> Self {
        LabelTable { next: builtins::first_free_label(), positions: HashMap::new() }
    }

    pub fn new_label(&mut self) -> i64 {
        let label = self.next;
        self.next -= 1;
        label
    }

    /// Bind `label` to the instruction at `position`.
    pub fn associate(&mut self, label: i64, position: usize) {
        self.positions.insert(label, position);
    }

    pub fn new_label_at(&mut self, position: usize) -> i64 {
        let label = self.new_label();
        self.associate(label, position);
        label
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Rewrite every label-valued jump operand to its absolute index.
    /// Built-in call targets stay negative. Running it again is a no-op.
    pub fn resolve(&self, code: &mut [Instruction]) -> Result<(), CompileError> {
        for inst in code.iter_mut() {
            let Some(target) = inst.jump_target() else { continue };
            if target >= 0 || builtins::lookup(target).is_some() {
                continue;
            }
            match self.positions.get(&target) {
                Some(&pos) => inst.set_jump_target(pos as i64),
                None => return Err(CompileError::UnboundLabel { label: target }),
            }
        }
        Ok(())
    }
}
