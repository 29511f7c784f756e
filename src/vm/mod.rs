use std::io::{self, Stdout, Write};

use tracing::{debug, trace};

pub mod builtins;
pub mod cell;
pub mod instruction;
pub mod programs;

pub use cell::Cell;
pub use instruction::{Instruction, Opcode};

pub const DEFAULT_STACK_SIZE: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum VmError {
    #[error("type tag mismatch at pc {pc}: expected {expected}, found {found}")]
    TypeTag { pc: i64, expected: char, found: Cell },
    #[error("wrong number of arguments to built-in {name}: expected {expected}, got {got}")]
    Arity { name: &'static str, expected: usize, got: i64 },
    #[error("undefined built-in function with label {label}")]
    UndefinedBuiltin { label: i64 },
    #[error("stack index {index} outside capacity {capacity}")]
    StackOverflow { index: i64, capacity: usize },
    #[error("read of stack cell {index} above top {top}")]
    ReadPastTop { index: i64, top: i64 },
    #[error("program halted with an empty stack")]
    EmptyStack,
    #[error("program counter {pc} outside the program")]
    PcOutOfRange { pc: i64 },
    #[error("unknown opcode {op} at pc {pc}")]
    UnknownOpcode { pc: i64, op: u8 },
    #[error("{opcode} at pc {pc} is missing an operand")]
    MissingOperand { pc: i64, opcode: &'static str },
    #[error("invalid operand {value} at pc {pc}")]
    BadOperand { pc: i64, value: i64 },
    #[error("division by zero at pc {pc}")]
    DivisionByZero { pc: i64 },
    #[error("built-in output failed: {0}")]
    Output(#[from] io::Error),
}

pub type VmResult<T> = Result<T, VmError>;

// ── Machine ─────────────────────────────────────────────────────────
//
// Frame layout after `INVOKE n, target, d` (FP points at the first
// bookkeeping cell):
//
//   PP   -> arg 0 .. arg n-1
//   FP   -> saved PP
//   FP+1 -> saved FP
//   FP+2 -> static PP (spp(d))
//   FP+3 -> static FP (sfp(d))
//   FP+4 -> return PC
//
// The stack is allocated once and never moves, so a pending lazy cell
// keeps its absolute index while the frame that forces it is live.

/// Registers at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    pub pc: i64,
    pub pp: i64,
    pub fp: i64,
    pub top: i64,
}

pub struct Machine<W: Write = Stdout> {
    program: Vec<Instruction>,
    stack: Vec<Cell>,
    pc: i64,
    pp: i64,
    fp: i64,
    top: i64,
    trace: bool,
    steps: u64,
    out: W,
}

impl Machine<Stdout> {
    pub fn new(capacity: usize) -> Self {
        Machine::with_output(capacity, io::stdout())
    }
}

impl Default for Machine<Stdout> {
    fn default() -> Self {
        Machine::new(DEFAULT_STACK_SIZE)
    }
}

impl<W: Write> Machine<W> {
    /// Machine whose built-in output and trace go to `out`.
    pub fn with_output(capacity: usize, out: W) -> Self {
        Machine {
            program: Vec::new(),
            stack: vec![Cell::default(); capacity],
            pc: 0,
            pp: 0,
            fp: 0,
            top: -1,
            trace: false,
            steps: 0,
            out,
        }
    }

    pub fn set_trace(&mut self, on: bool) {
        self.trace = on;
    }

    pub fn capacity(&self) -> usize {
        self.stack.len()
    }

    pub fn registers(&self) -> Registers {
        Registers { pc: self.pc, pp: self.pp, fp: self.fp, top: self.top }
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Install `program` and reset registers and every cell.
    pub fn load(&mut self, program: Vec<Instruction>) {
        self.program = program;
        self.stack.fill(Cell::default());
        self.pc = 0;
        self.pp = 0;
        self.fp = 0;
        self.top = -1;
        self.steps = 0;
    }

    /// Preset TOP after `load`, for hand-assembled programs that keep
    /// variables in the lowest cells. `-1` is the empty stack.
    pub fn set_top(&mut self, top: i64) -> VmResult<()> {
        if top != -1 {
            self.slot(top)?;
        }
        self.top = top;
        Ok(())
    }

    /// Execute until the program counter goes negative; returns the
    /// payload of the top cell.
    pub fn run(&mut self) -> VmResult<i64> {
        while self.pc >= 0 {
            if self.trace {
                self.trace_state()?;
            }
            self.step()?;
            self.steps += 1;
        }
        if self.trace {
            self.trace_state()?;
        }
        if self.top < 0 {
            return Err(VmError::EmptyStack);
        }
        let result = self.stack_at(self.top)?.value();
        debug!(steps = self.steps, result, "machine halted");
        Ok(result)
    }

    /// Cell at `position`; only occupied cells can be read.
    pub fn stack_at(&self, position: i64) -> VmResult<Cell> {
        if position < 0 || position > self.top {
            return Err(VmError::ReadPastTop { index: position, top: self.top });
        }
        self.cell(position)
    }

    // ── Cell access ──────────────────────────────────────────────────

    fn slot(&self, index: i64) -> VmResult<usize> {
        usize::try_from(index)
            .ok()
            .filter(|&i| i < self.stack.len())
            .ok_or(VmError::StackOverflow { index, capacity: self.stack.len() })
    }

    fn cell(&self, index: i64) -> VmResult<Cell> {
        Ok(self.stack[self.slot(index)?])
    }

    fn write(&mut self, index: i64, cell: Cell) -> VmResult<()> {
        let i = self.slot(index)?;
        self.stack[i] = cell;
        Ok(())
    }

    fn push(&mut self, cell: Cell) -> VmResult<()> {
        self.write(self.top + 1, cell)?;
        self.top += 1;
        Ok(())
    }

    fn pop(&mut self) -> VmResult<Cell> {
        if self.top < 0 {
            return Err(VmError::EmptyStack);
        }
        let cell = self.cell(self.top)?;
        self.top -= 1;
        Ok(cell)
    }

    fn expect_int(&self, cell: Cell) -> VmResult<i64> {
        cell.as_int().ok_or(VmError::TypeTag { pc: self.pc, expected: 'I', found: cell })
    }

    fn pop_int(&mut self) -> VmResult<i64> {
        let cell = self.pop()?;
        self.expect_int(cell)
    }

    /// (spp, sfp) after following `distance` static links from the current frame.
    fn static_link(&self, distance: i64) -> VmResult<(i64, i64)> {
        if distance < 0 {
            return Err(VmError::BadOperand { pc: self.pc, value: distance });
        }
        let (mut spp, mut sfp) = (self.pp, self.fp);
        for _ in 0..distance {
            let next_pp = self.cell(sfp + 2)?.value();
            let next_fp = self.cell(sfp + 3)?.value();
            // a chain that stops moving has run out of frames
            if (next_pp, next_fp) == (spp, sfp) {
                return Err(VmError::BadOperand { pc: self.pc, value: distance });
            }
            spp = next_pp;
            sfp = next_fp;
        }
        Ok((spp, sfp))
    }

    /// Push the bookkeeping cells of a new frame.
    fn push_frame(&mut self, spp: i64, sfp: i64) -> VmResult<()> {
        self.push(Cell::Int(self.pp))?;
        self.push(Cell::Int(self.fp))?;
        self.push(Cell::Int(spp))?;
        self.push(Cell::Int(sfp))?;
        self.push(Cell::Code(self.pc + 1))
    }

    /// Collapse the current frame to its result; returns the result.
    fn pop_frame(&mut self) -> VmResult<Cell> {
        let result = self.stack_at(self.top)?;
        let saved_pp = self.cell(self.fp)?.value();
        let saved_fp = self.cell(self.fp + 1)?.value();
        let return_pc = match self.cell(self.fp + 4)? {
            Cell::Code(pc) => pc,
            other => return Err(VmError::TypeTag { pc: self.pc, expected: 'P', found: other }),
        };
        self.top = self.pp;
        self.write(self.top, result)?;
        self.pp = saved_pp;
        self.fp = saved_fp;
        self.pc = return_pc;
        Ok(result)
    }

    // ── Execution ───────────────────────────────────────────────────

    fn operand(&self, inst: &Instruction, index: usize, opcode: Opcode) -> VmResult<i64> {
        inst.arg(index).ok_or(VmError::MissingOperand { pc: self.pc, opcode: opcode.mnemonic() })
    }

    fn step(&mut self) -> VmResult<()> {
        let pc = self.pc;
        let inst = usize::try_from(pc)
            .ok()
            .and_then(|i| self.program.get(i))
            .copied()
            .ok_or(VmError::PcOutOfRange { pc })?;
        let opcode = inst.opcode().map_err(|op| VmError::UnknownOpcode { pc, op })?;

        match opcode {
            Opcode::Const => {
                let k = self.operand(&inst, 0, opcode)?;
                self.push(Cell::Int(k))?;
                self.pc += 1;
            }
            Opcode::Load => {
                let k = self.operand(&inst, 0, opcode)?;
                let d = inst.arg(1).unwrap_or(0);
                let (spp, sfp) = self.static_link(d)?;
                let addr = spp + k;
                match self.stack_at(addr)? {
                    Cell::Thunk(entry) => {
                        // Force: a one-argument frame holding the cell's address,
                        // statically linked to the frame that owns the cell.
                        let base = self.top;
                        self.push(Cell::Int(addr))?;
                        self.push_frame(spp, sfp)?;
                        self.pp = base + 1;
                        self.fp = base + 2;
                        self.pc = entry;
                    }
                    cell => {
                        self.push(cell)?;
                        self.pc += 1;
                    }
                }
            }
            Opcode::Store => {
                let k = self.operand(&inst, 0, opcode)?;
                let d = inst.arg(1).unwrap_or(0);
                let (spp, _) = self.static_link(d)?;
                let value = self.pop()?;
                self.write(spp + k, value)?;
                self.pc += 1;
            }
            Opcode::Add => self.binary(|a, b| Ok(a.wrapping_add(b)))?,
            Opcode::Sub => self.binary(|a, b| Ok(a.wrapping_sub(b)))?,
            Opcode::Mul => self.binary(|a, b| Ok(a.wrapping_mul(b)))?,
            Opcode::Div => self.binary(|a, b| {
                if b == 0 {
                    Err(VmError::DivisionByZero { pc })
                } else {
                    Ok(a.wrapping_div(b))
                }
            })?,
            Opcode::Lt => self.binary(|a, b| Ok((a < b) as i64))?,
            Opcode::Gt => self.binary(|a, b| Ok((a > b) as i64))?,
            Opcode::Eq => self.binary(|a, b| Ok((a == b) as i64))?,
            Opcode::Neq => self.binary(|a, b| Ok((a != b) as i64))?,
            Opcode::IfZero => {
                let target = self.operand(&inst, 0, opcode)?;
                let cond = self.pop_int()?;
                self.pc = if cond == 0 { target } else { pc + 1 };
            }
            Opcode::Goto => {
                self.pc = self.operand(&inst, 0, opcode)?;
            }
            Opcode::Halt => {
                self.pc = -1;
            }
            Opcode::Nop => {
                self.pc += 1;
            }
            Opcode::Invoke => {
                let n = self.operand(&inst, 0, opcode)?;
                let target = self.operand(&inst, 1, opcode)?;
                let d = self.operand(&inst, 2, opcode)?;
                if n < 0 {
                    return Err(VmError::BadOperand { pc, value: n });
                }
                if target < 0 {
                    self.call_builtin(target, n)?;
                } else {
                    let (spp, sfp) = self.static_link(d)?;
                    let base = self.top;
                    self.push_frame(spp, sfp)?;
                    self.pp = base - n + 1;
                    self.fp = base + 1;
                    self.pc = target;
                }
            }
            Opcode::Return => {
                self.pop_frame()?;
            }
            Opcode::Lazy => {
                let k = self.operand(&inst, 0, opcode)?;
                let entry = self.operand(&inst, 1, opcode)?;
                self.write(self.pp + k, Cell::Thunk(entry))?;
                self.pc += 1;
            }
            Opcode::LazyReturn => {
                let cell = self.stack_at(self.pp)?;
                let addr = self.expect_int(cell)?;
                let result = self.pop_frame()?;
                self.write(addr, result)?;
            }
        }
        Ok(())
    }

    fn binary(&mut self, f: impl FnOnce(i64, i64) -> VmResult<i64>) -> VmResult<()> {
        let right = self.pop_int()?;
        let left = self.pop_int()?;
        self.push(Cell::Int(f(left, right)?))?;
        self.pc += 1;
        Ok(())
    }

    fn call_builtin(&mut self, label: i64, n: i64) -> VmResult<()> {
        let builtin = builtins::lookup(label).ok_or(VmError::UndefinedBuiltin { label })?;
        if n != builtin.arity as i64 {
            return Err(VmError::Arity { name: builtin.name, expected: builtin.arity, got: n });
        }
        let mut args = Vec::with_capacity(builtin.arity);
        for pos in self.top - n + 1..=self.top {
            let cell = self.stack_at(pos)?;
            args.push(self.expect_int(cell)?);
        }
        self.top -= n;
        trace!(name = builtin.name, ?args, "calling built-in");
        let result = (builtin.func)(&args, &mut self.out)?;
        self.push(Cell::Int(result))?;
        self.pc += 1;
        Ok(())
    }

    fn trace_state(&mut self) -> VmResult<()> {
        write!(self.out, "PC: {} | PP: {} | FP: {} | TOP: {} | Stack: ", self.pc, self.pp, self.fp, self.top)?;
        if self.top >= 0 {
            for cell in &self.stack[..=self.top as usize] {
                write!(self.out, "{cell} ")?;
            }
        }
        writeln!(self.out)?;
        if let Some(inst) = usize::try_from(self.pc).ok().and_then(|i| self.program.get(i)) {
            writeln!(self.out, "{}: {}", self.pc, inst)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler;
    use crate::lexer;
    use crate::parser;
    use crate::ast::Span;

    fn machine() -> Machine<Vec<u8>> {
        Machine::with_output(DEFAULT_STACK_SIZE, Vec::new())
    }

    fn run(program: Vec<Instruction>) -> i64 {
        let mut m = machine();
        m.load(program);
        m.run().unwrap()
    }

    fn run_err(program: Vec<Instruction>) -> VmError {
        let mut m = machine();
        m.load(program);
        m.run().unwrap_err()
    }

    fn compile_str(source: &str) -> Vec<Instruction> {
        let tokens = lexer::lex(source)
            .unwrap()
            .into_iter()
            .map(|(t, r)| (t, Span { start: r.start, end: r.end }))
            .collect();
        compiler::compile(&parser::parse(tokens).unwrap()).unwrap()
    }

    use Instruction as I;

    #[test]
    fn store_and_load() {
        assert_eq!(
            run(vec![I::constant(42), I::constant(23), I::store(0, 0), I::constant(142), I::load(0, 0), I::halt()]),
            23
        );
        assert_eq!(
            run(vec![
                I::constant(23),
                I::constant(42),
                I::invoke(2, 3, 0),
                I::load(0, 0),
                I::load(1, 0),
                I::op(Opcode::Add),
                I::halt(),
            ]),
            65
        );
    }

    #[test]
    fn invoke_with_distance_greater_zero() {
        let mut m = machine();
        m.load(vec![
            I::constant(23),
            I::invoke(1, 3, 0),
            I::halt(),
            I::constant(42),
            I::invoke(1, 6, 0),
            I::halt(),
            I::constant(2342),
            I::invoke(1, 9, 1),
            I::halt(),
            I::halt(),
        ]);
        m.run().unwrap();
        // static FP one hop up is the first frame's FP
        assert_eq!(m.stack_at(16).unwrap(), Cell::Int(1));
        assert_eq!(m.stack_at(15).unwrap(), Cell::Int(0));
    }

    #[test]
    fn invoke_and_return_with_distance_zero() {
        assert_eq!(
            run(vec![I::constant(42), I::invoke(1, 4, 0), I::constant(23), I::halt(), I::constant(172), I::ret(), I::halt()]),
            23
        );
    }

    #[test]
    fn return_collapses_frame_to_result() {
        let mut m = machine();
        m.load(vec![I::constant(42), I::invoke(1, 3, 0), I::halt(), I::constant(172), I::ret()]);
        assert_eq!(m.run().unwrap(), 172);
        assert_eq!(m.registers(), Registers { pc: -1, pp: 0, fp: 0, top: 0 });
    }

    #[test]
    fn invoke_jumps_to_target() {
        assert_eq!(run(vec![I::constant(42), I::invoke(1, 3, 0), I::halt(), I::constant(23), I::halt()]), 23);
    }

    #[test]
    fn ifzero_and_goto() {
        assert_eq!(run(vec![I::constant(23), I::constant(0), I::ifzero(4), I::constant(42), I::halt()]), 23);
        assert_eq!(
            run(vec![I::goto(3), I::constant(23), I::goto(5), I::constant(42), I::goto(1), I::halt()]),
            23
        );
    }

    #[test]
    fn arithmetic_and_comparison() {
        let cases = [
            (23, 42, Opcode::Neq, 1),
            (23, 42, Opcode::Eq, 0),
            (23, 42, Opcode::Gt, 0),
            (23, 42, Opcode::Lt, 1),
            (84, 2, Opcode::Div, 42),
            (23, 2, Opcode::Mul, 46),
            (65, 23, Opcode::Sub, 42),
            (23, 19, Opcode::Add, 42),
        ];
        for (a, b, op, expected) in cases {
            assert_eq!(run(vec![I::constant(a), I::constant(b), I::op(op), I::halt()]), expected, "{op:?}");
        }
    }

    #[test]
    fn arithmetic_wraps() {
        assert_eq!(run(vec![I::constant(i64::MAX), I::constant(1), I::op(Opcode::Add), I::halt()]), i64::MIN);
    }

    #[test]
    fn builtin_print() {
        let mut m = machine();
        m.load(vec![I::constant(42), I::invoke(1, -1, 0), I::constant(23), I::invoke(1, -1, 0), I::halt()]);
        assert_eq!(m.run().unwrap(), 23);
        assert_eq!(String::from_utf8(m.into_output()).unwrap(), "42\n23\n");
    }

    #[test]
    fn builtin_arity_mismatch() {
        let err = run_err(vec![I::constant(1), I::constant(2), I::invoke(2, -1, 0), I::halt()]);
        assert!(matches!(err, VmError::Arity { name: "print", expected: 1, got: 2 }));
    }

    #[test]
    fn undefined_builtin() {
        let err = run_err(vec![I::invoke(0, -40, 0), I::halt()]);
        assert!(matches!(err, VmError::UndefinedBuiltin { label: -40 }));
    }

    #[test]
    fn arithmetic_rejects_code_cells() {
        // the saved return PC is a P cell
        let err = run_err(vec![I::invoke(0, 1, 0), I::load(4, 0), I::constant(1), I::op(Opcode::Add), I::halt()]);
        assert!(matches!(err, VmError::TypeTag { expected: 'I', found: Cell::Code(1), .. }));
    }

    #[test]
    fn arithmetic_rejects_unforced_thunks() {
        // LAZY overwrites the top cell in place, so ADD sees the thunk itself
        let err = run_err(vec![I::constant(0), I::lazy(0, 5), I::constant(1), I::op(Opcode::Add), I::halt(), I::halt()]);
        assert!(matches!(err, VmError::TypeTag { pc: 3, expected: 'I', found: Cell::Thunk(5) }));
    }

    #[test]
    fn runaway_static_link_distance() {
        let err = run_err(vec![I::constant(1), I::load(0, i64::MAX), I::halt()]);
        assert!(matches!(err, VmError::BadOperand { pc: 1, value: i64::MAX }));
        let err = run_err(vec![I::constant(1), I::invoke(0, 3, 1_000_000_000), I::halt(), I::halt()]);
        assert!(matches!(err, VmError::BadOperand { pc: 1, .. }));
    }

    #[test]
    fn set_top_exposes_preset_cells() {
        let mut m = machine();
        m.load(vec![I::load(1, 0), I::halt()]);
        m.set_top(1).unwrap();
        assert_eq!(m.registers().top, 1);
        assert_eq!(m.run().unwrap(), 0);
    }

    #[test]
    fn set_top_within_capacity() {
        let mut m = Machine::with_output(8, Vec::new());
        assert_eq!(m.capacity(), 8);
        assert!(m.set_top(7).is_ok());
        assert!(matches!(m.set_top(8), Err(VmError::StackOverflow { index: 8, capacity: 8 })));
        assert!(matches!(m.set_top(-2), Err(VmError::StackOverflow { index: -2, .. })));
        assert!(m.set_top(-1).is_ok());
    }

    #[test]
    fn division_by_zero_is_reported() {
        let err = run_err(vec![I::constant(1), I::constant(0), I::op(Opcode::Div), I::halt()]);
        assert!(matches!(err, VmError::DivisionByZero { pc: 2 }));
    }

    #[test]
    fn unknown_opcode() {
        let err = run_err(vec![I::raw(99, [None, None, None])]);
        assert!(matches!(err, VmError::UnknownOpcode { pc: 0, op: 99 }));
    }

    #[test]
    fn missing_operand() {
        let err = run_err(vec![I::raw(Opcode::Const as u8, [None, None, None])]);
        assert!(matches!(err, VmError::MissingOperand { pc: 0, opcode: "CONST" }));
    }

    #[test]
    fn halting_on_empty_stack_fails() {
        assert!(matches!(run_err(vec![I::halt()]), VmError::EmptyStack));
    }

    #[test]
    fn running_off_the_end_fails() {
        assert!(matches!(run_err(vec![I::constant(1)]), VmError::PcOutOfRange { pc: 1 }));
    }

    #[test]
    fn stack_overflow_is_a_fault() {
        let mut m = Machine::with_output(4, Vec::new());
        m.load(vec![I::constant(1), I::goto(0)]);
        let err = m.run().unwrap_err();
        assert!(matches!(err, VmError::StackOverflow { index: 4, capacity: 4 }));
    }

    #[test]
    fn unbounded_recursion_overflows() {
        let mut m = Machine::with_output(64, Vec::new());
        m.load(compile_str("let f(n) { f(n + 1) } in f(0)"));
        assert!(matches!(m.run().unwrap_err(), VmError::StackOverflow { capacity: 64, .. }));
    }

    #[test]
    fn stack_at_refuses_unused_cells() {
        let mut m = machine();
        m.load(vec![I::constant(7), I::halt()]);
        m.run().unwrap();
        assert_eq!(m.stack_at(0).unwrap(), Cell::Int(7));
        assert!(matches!(m.stack_at(1), Err(VmError::ReadPastTop { index: 1, top: 0 })));
    }

    #[test]
    fn load_resets_state() {
        let mut m = machine();
        m.load(vec![I::constant(7), I::constant(8), I::halt()]);
        m.run().unwrap();
        m.load(vec![I::constant(1), I::halt()]);
        assert_eq!(m.registers(), Registers { pc: 0, pp: 0, fp: 0, top: -1 });
        assert_eq!(m.run().unwrap(), 1);
    }

    #[test]
    fn lazy_cell_is_forced_once_and_memoized() {
        let mut m = machine();
        m.load(compile_str("let lazy l = print(7) in l + l"));
        assert_eq!(m.run().unwrap(), 14);
        assert_eq!(String::from_utf8(m.into_output()).unwrap(), "7\n");
    }

    #[test]
    fn unread_lazy_cell_never_runs() {
        let mut m = machine();
        m.load(compile_str("let lazy l = print(7) in 3"));
        assert_eq!(m.run().unwrap(), 3);
        assert!(m.output().is_empty());
    }

    #[test]
    fn lazy_cell_forced_from_nested_function() {
        let mut m = machine();
        m.load(compile_str("let lazy l = print(5) f(a) { l * a } in f(2) + f(3)"));
        assert_eq!(m.run().unwrap(), 25);
        assert_eq!(String::from_utf8(m.into_output()).unwrap(), "5\n");
    }

    #[test]
    fn trace_lines() {
        let mut m = machine();
        m.set_trace(true);
        m.load(vec![I::constant(42), I::halt()]);
        m.run().unwrap();
        let out = String::from_utf8(m.into_output()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(
            lines,
            vec![
                "PC: 0 | PP: 0 | FP: 0 | TOP: -1 | Stack: ",
                "0: CONST 42",
                "PC: 1 | PP: 0 | FP: 0 | TOP: 0 | Stack: I42 ",
                "1: HALT",
                "PC: -1 | PP: 0 | FP: 0 | TOP: 0 | Stack: I42 ",
            ]
        );
    }
}
