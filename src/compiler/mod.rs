use tracing::debug;

use crate::ast::*;
use crate::vm::instruction::{Instruction, Opcode};

pub mod environment;
pub mod labels;

pub use environment::{Address, AddressEnvironment};
pub use labels::LabelTable;

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("unresolved name: {name}")]
    Unresolved { name: String },
    #[error("unknown operator: {op}")]
    UnknownOperator { op: String },
    #[error("empty statement sequence")]
    EmptySequence,
    #[error("label {label} was never placed")]
    UnboundLabel { label: i64 },
}

type CompileResult<T> = Result<T, CompileError>;

/// Compile a whole program into a flat, resolved instruction list ending in HALT.
pub fn compile(expr: &Expr) -> CompileResult<Vec<Instruction>> {
    let mut cg = CodeGen::new();
    let root = AddressEnvironment::new();
    cg.expr(expr, &root)?;
    cg.emit(Instruction::halt());
    cg.labels.resolve(&mut cg.code)?;
    debug!(instructions = cg.code.len(), labels = cg.labels.len(), "compiled program");
    Ok(cg.code)
}

fn opcode_for(op: BinOp) -> Opcode {
    match op {
        BinOp::Add => Opcode::Add,
        BinOp::Subtract => Opcode::Sub,
        BinOp::Multiply => Opcode::Mul,
        BinOp::Divide => Opcode::Div,
        BinOp::Equals => Opcode::Eq,
        BinOp::NotEquals => Opcode::Neq,
        BinOp::LessThan => Opcode::Lt,
        BinOp::GreaterThan => Opcode::Gt,
    }
}

// ── Code generator ───────────────────────────────────────────────────
//
// Everything is appended to one buffer. Labels map to indices into it
// and are patched by `LabelTable::resolve` once the buffer is complete.
// Environments are derived per scope and dropped with it.

struct CodeGen {
    code: Vec<Instruction>,
    labels: LabelTable,
}

impl CodeGen {
    fn new() -> Self {
        CodeGen { code: Vec::new(), labels: LabelTable::new() }
    }

    fn emit(&mut self, inst: Instruction) -> usize {
        let idx = self.code.len();
        self.code.push(inst);
        idx
    }

    /// Point `label` at the next instruction emitted.
    fn place(&mut self, label: i64) {
        self.labels.associate(label, self.code.len());
    }

    fn expr(&mut self, expr: &Expr, env: &AddressEnvironment) -> CompileResult<()> {
        match expr {
            Expr::Constant(n) => {
                self.emit(Instruction::constant(*n));
            }
            Expr::Identifier(name) => {
                let addr = env.resolve(name)?;
                self.emit(Instruction::load(addr.location, env.distance(addr)));
            }
            Expr::Operation { left, op, right } => {
                let binop = BinOp::from_symbol(op)
                    .ok_or_else(|| CompileError::UnknownOperator { op: op.clone() })?;
                self.expr(left, env)?;
                self.expr(right, env)?;
                self.emit(Instruction::op(opcode_for(binop)));
            }
            Expr::Assignment { target, value } => {
                let addr = env.resolve(target)?;
                let d = env.distance(addr);
                self.expr(value, env)?;
                self.emit(Instruction::store(addr.location, d));
                self.emit(Instruction::load(addr.location, d));
            }
            Expr::Sequence(items) => {
                if items.is_empty() {
                    return Err(CompileError::EmptySequence);
                }
                for item in items {
                    self.expr(item, env)?;
                }
            }
            Expr::Conditional { condition, consequent, alternative } => {
                let alt = self.labels.new_label();
                let end = self.labels.new_label();
                self.expr(condition, env)?;
                self.emit(Instruction::ifzero(alt));
                self.expr(consequent, env)?;
                self.emit(Instruction::goto(end));
                self.place(alt);
                self.expr(alternative, env)?;
                self.place(end);
                self.emit(Instruction::nop());
            }
            Expr::Call { callee, args } => {
                let addr = env.resolve(&signature(callee, args.len()))?;
                for arg in args {
                    self.expr(arg, env)?;
                }
                self.emit(Instruction::invoke(args.len() as i64, addr.location, env.distance(addr)));
            }
            Expr::Let(program) => self.block(program, env)?,
        }
        Ok(())
    }

    /// A `let` block runs in its own frame:
    ///
    /// ```text
    ///         GOTO setup
    ///         <function bodies>
    /// block:  <var and lazy code> <body> RETURN
    /// setup:  CONST 0 (once per slot)
    ///         INVOKE slots, block, 0
    /// ```
    fn block(&mut self, program: &Program, env: &AddressEnvironment) -> CompileResult<()> {
        let mut scope = env.derive();
        scope.increase_nesting_level();

        // Declare everything first so bodies can refer forward.
        let mut addrs = Vec::with_capacity(program.declarations.len());
        for decl in &program.declarations {
            let addr = match decl {
                Decl::Function { name, params, .. } => {
                    scope.declare_function(signature(name, params.len()), &mut self.labels)
                }
                Decl::Var { name, .. } | Decl::Lazy { name, .. } => scope.declare_variable(name),
            };
            addrs.push(addr);
        }

        let setup = self.labels.new_label();
        self.emit(Instruction::goto(setup));

        for (decl, addr) in program.declarations.iter().zip(&addrs) {
            if let Decl::Function { params, body, .. } = decl {
                let mut fenv = scope.derive();
                fenv.increase_nesting_level();
                for p in params {
                    fenv.declare_variable(p);
                }
                self.place(addr.location);
                self.expr(body, &fenv)?;
                self.emit(Instruction::ret());
            }
        }

        let entry = self.labels.new_label_at(self.code.len());
        for (decl, addr) in program.declarations.iter().zip(&addrs) {
            match decl {
                Decl::Function { .. } => {}
                Decl::Var { init, .. } => {
                    self.expr(init, &scope)?;
                    self.emit(Instruction::store(addr.location, 0));
                }
                Decl::Lazy { init, .. } => self.lazy(addr.location, init, &scope)?,
            }
        }
        self.expr(&program.body, &scope)?;
        self.emit(Instruction::ret());

        self.place(setup);
        let slots = scope.slots();
        for _ in 0..slots {
            self.emit(Instruction::constant(0));
        }
        self.emit(Instruction::invoke(slots, entry, 0));
        Ok(())
    }

    /// Mark `slot` pending and lay the initializer out of line. The
    /// initializer runs one level deeper, in the frame a forcing LOAD
    /// pushes, whose static link is the block frame.
    fn lazy(&mut self, slot: i64, init: &Expr, scope: &AddressEnvironment) -> CompileResult<()> {
        let entry = self.labels.new_label();
        let after = self.labels.new_label();
        self.emit(Instruction::lazy(slot, entry));
        self.emit(Instruction::goto(after));

        let mut lenv = scope.derive();
        lenv.increase_nesting_level();
        self.place(entry);
        self.expr(init, &lenv)?;
        self.emit(Instruction::lazy_return());

        self.place(after);
        self.emit(Instruction::nop());
        Ok(())
    }
}
