use std::fmt;

use serde::{Deserialize, Serialize};

// ── Opcodes ─────────────────────────────────────────────────────────

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Const = 1,
    Load = 2,
    Store = 3,
    Add = 4,
    Sub = 5,
    Mul = 6,
    Div = 7,
    Lt = 8,
    Gt = 9,
    Eq = 10,
    Neq = 11,
    IfZero = 12,
    Goto = 13,
    Halt = 14,
    Nop = 15,
    Invoke = 16,
    Return = 17,
    Lazy = 18,
    LazyReturn = 19,
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(op: u8) -> Result<Self, u8> {
        Ok(match op {
            1 => Opcode::Const,
            2 => Opcode::Load,
            3 => Opcode::Store,
            4 => Opcode::Add,
            5 => Opcode::Sub,
            6 => Opcode::Mul,
            7 => Opcode::Div,
            8 => Opcode::Lt,
            9 => Opcode::Gt,
            10 => Opcode::Eq,
            11 => Opcode::Neq,
            12 => Opcode::IfZero,
            13 => Opcode::Goto,
            14 => Opcode::Halt,
            15 => Opcode::Nop,
            16 => Opcode::Invoke,
            17 => Opcode::Return,
            18 => Opcode::Lazy,
            19 => Opcode::LazyReturn,
            other => return Err(other),
        })
    }
}

impl Opcode {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Const => "CONST",
            Opcode::Load => "LOAD",
            Opcode::Store => "STORE",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Lt => "LT",
            Opcode::Gt => "GT",
            Opcode::Eq => "EQ",
            Opcode::Neq => "NEQ",
            Opcode::IfZero => "IFZERO",
            Opcode::Goto => "GOTO",
            Opcode::Halt => "HALT",
            Opcode::Nop => "NOP",
            Opcode::Invoke => "INVOKE",
            Opcode::Return => "RETURN",
            Opcode::Lazy => "LAZY",
            Opcode::LazyReturn => "LAZYRETURN",
        }
    }

    /// Index of the operand holding a code address, if the opcode has one.
    pub fn jump_operand(self) -> Option<usize> {
        match self {
            Opcode::IfZero | Opcode::Goto => Some(0),
            Opcode::Invoke | Opcode::Lazy => Some(1),
            _ => None,
        }
    }
}

// ── Instruction ─────────────────────────────────────────────────────

/// One machine instruction: a raw opcode byte plus up to three operands.
///
/// The opcode stays a byte so a hand-assembled program can carry one
/// outside the defined set; the machine rejects it when it is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: u8,
    pub args: [Option<i64>; 3],
}

impl Instruction {
    fn with(opcode: Opcode, args: [Option<i64>; 3]) -> Self {
        Instruction { opcode: opcode as u8, args }
    }

    pub fn raw(opcode: u8, args: [Option<i64>; 3]) -> Self {
        Instruction { opcode, args }
    }

    pub fn constant(value: i64) -> Self {
        Self::with(Opcode::Const, [Some(value), None, None])
    }

    pub fn load(slot: i64, distance: i64) -> Self {
        Self::with(Opcode::Load, [Some(slot), Some(distance), None])
    }

    pub fn store(slot: i64, distance: i64) -> Self {
        Self::with(Opcode::Store, [Some(slot), Some(distance), None])
    }

    /// An operand-free opcode (arithmetic, comparison, HALT, NOP, RETURN, LAZYRETURN).
    pub fn op(opcode: Opcode) -> Self {
        Self::with(opcode, [None, None, None])
    }

    pub fn ifzero(target: i64) -> Self {
        Self::with(Opcode::IfZero, [Some(target), None, None])
    }

    pub fn goto(target: i64) -> Self {
        Self::with(Opcode::Goto, [Some(target), None, None])
    }

    pub fn halt() -> Self {
        Self::op(Opcode::Halt)
    }

    pub fn nop() -> Self {
        Self::op(Opcode::Nop)
    }

    pub fn invoke(argc: i64, target: i64, distance: i64) -> Self {
        Self::with(Opcode::Invoke, [Some(argc), Some(target), Some(distance)])
    }

    pub fn ret() -> Self {
        Self::op(Opcode::Return)
    }

    /// Marks `slot` in the current frame as a pending thunk entering at `entry`.
    pub fn lazy(slot: i64, entry: i64) -> Self {
        Self::with(Opcode::Lazy, [Some(slot), Some(entry), None])
    }

    pub fn lazy_return() -> Self {
        Self::op(Opcode::LazyReturn)
    }

    pub fn opcode(&self) -> Result<Opcode, u8> {
        Opcode::try_from(self.opcode)
    }

    pub fn arg(&self, index: usize) -> Option<i64> {
        self.args.get(index).copied().flatten()
    }

    /// The code-address operand, if this is a control transfer.
    pub fn jump_target(&self) -> Option<i64> {
        let idx = self.opcode().ok()?.jump_operand()?;
        self.arg(idx)
    }

    pub fn set_jump_target(&mut self, target: i64) {
        if let Some(idx) = self.opcode().ok().and_then(Opcode::jump_operand) {
            self.args[idx] = Some(target);
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.opcode() {
            Ok(op) => f.write_str(op.mnemonic())?,
            Err(_) => f.write_str("ERROR")?,
        }
        let present = self.args.iter().rposition(Option::is_some).map_or(0, |i| i + 1);
        for arg in &self.args[..present] {
            match arg {
                Some(v) => write!(f, " {v}")?,
                None => f.write_str(" _")?,
            }
        }
        Ok(())
    }
}

/// One `index: INSTRUCTION` line per instruction.
pub fn disassemble(code: &[Instruction]) -> String {
    let mut out = String::new();
    for (i, inst) in code.iter().enumerate() {
        out.push_str(&format!("{i}: {inst}\n"));
    }
    out
}
