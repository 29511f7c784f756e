use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Stdout, Write};
use std::rc::Rc;

use crate::ast::*;
use crate::vm::builtins::{self, BuiltIn};

/// Deepest call/force nesting before evaluation gives up.
pub const MAX_CALL_DEPTH: usize = 200;

#[derive(Debug, thiserror::Error)]
#[error("Runtime error: {message}")]
pub struct RuntimeError {
    pub message: String,
}

impl RuntimeError {
    fn new(msg: impl Into<String>) -> Self {
        RuntimeError { message: msg.into() }
    }
}

impl From<io::Error> for RuntimeError {
    fn from(e: io::Error) -> Self {
        RuntimeError::new(format!("built-in output failed: {e}"))
    }
}

type Result<T> = std::result::Result<T, RuntimeError>;

/// Tree-walking evaluator with the same observable behavior as the
/// compiled program on the machine: static scoping, call by value,
/// block slots seeded with 0, lazy slots memoized on first read.
pub struct Interpreter<W: Write = Stdout> {
    out: W,
}

impl Interpreter<Stdout> {
    pub fn new() -> Self {
        Interpreter { out: io::stdout() }
    }
}

impl Default for Interpreter<Stdout> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write> Interpreter<W> {
    pub fn with_output(out: W) -> Self {
        Interpreter { out }
    }

    pub fn run(&mut self, expr: &Expr) -> Result<i64> {
        let mut eval = Eval {
            out: &mut self.out,
            functions: Vec::new(),
            thunks: Vec::new(),
            depth: 0,
        };
        eval.expr(expr, &Rc::new(Scope::root()))
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    pub fn into_output(self) -> W {
        self.out
    }
}

// ── Scopes ───────────────────────────────────────────────────────────

/// Locals of one block or call.
type Frame = Rc<RefCell<Vec<Slot>>>;

#[derive(Debug, Clone, Copy)]
enum Slot {
    Value(i64),
    /// Index into the thunk arena
    Pending(usize),
}

#[derive(Clone)]
enum Binding {
    Var(Frame, usize),
    /// Index into the function arena
    Func(usize),
    Builtin(&'static BuiltIn),
}

/// Names visible at one point; variables by name, functions by signature.
#[derive(Clone, Default)]
struct Scope {
    names: HashMap<String, Binding>,
}

impl Scope {
    fn root() -> Self {
        let names = builtins::BUILTINS
            .iter()
            .map(|b| (signature(b.name, b.arity), Binding::Builtin(b)))
            .collect();
        Scope { names }
    }

    fn lookup(&self, name: &str) -> Result<&Binding> {
        self.names
            .get(name)
            .ok_or_else(|| RuntimeError::new(format!("unresolved name: {name}")))
    }
}

struct Function<'a> {
    params: &'a [String],
    body: &'a Expr,
    scope: Rc<Scope>,
}

struct Thunk<'a> {
    init: &'a Expr,
    scope: Rc<Scope>,
}

// Functions and thunks never outlive the block that created them, so
// both arenas are truncated back when a block finishes.
struct Eval<'a, 'o, W: Write> {
    out: &'o mut W,
    functions: Vec<Function<'a>>,
    thunks: Vec<Thunk<'a>>,
    depth: usize,
}

impl<'a, W: Write> Eval<'a, '_, W> {
    fn expr(&mut self, expr: &'a Expr, scope: &Rc<Scope>) -> Result<i64> {
        match expr {
            Expr::Constant(n) => Ok(*n),
            Expr::Identifier(name) => match scope.lookup(name)? {
                Binding::Var(frame, slot) => self.read(frame, *slot),
                _ => Err(RuntimeError::new(format!("{name} is not a variable"))),
            },
            Expr::Operation { left, op, right } => {
                let binop = BinOp::from_symbol(op)
                    .ok_or_else(|| RuntimeError::new(format!("unknown operator: {op}")))?;
                let l = self.expr(left, scope)?;
                let r = self.expr(right, scope)?;
                eval_binop(binop, l, r)
            }
            Expr::Assignment { target, value } => {
                let Binding::Var(frame, slot) = scope.lookup(target)?.clone() else {
                    return Err(RuntimeError::new(format!("{target} is not a variable")));
                };
                let v = self.expr(value, scope)?;
                frame.borrow_mut()[slot] = Slot::Value(v);
                Ok(v)
            }
            Expr::Sequence(items) => {
                let mut last = None;
                for item in items {
                    last = Some(self.expr(item, scope)?);
                }
                last.ok_or_else(|| RuntimeError::new("empty statement sequence"))
            }
            Expr::Conditional { condition, consequent, alternative } => {
                if self.expr(condition, scope)? != 0 {
                    self.expr(consequent, scope)
                } else {
                    self.expr(alternative, scope)
                }
            }
            Expr::Call { callee, args } => {
                let binding = scope.lookup(&signature(callee, args.len()))?.clone();
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.expr(arg, scope)?);
                }
                self.call(binding, values)
            }
            Expr::Let(program) => self.block(program, scope),
        }
    }

    fn read(&mut self, frame: &Frame, slot: usize) -> Result<i64> {
        let current = frame.borrow()[slot];
        match current {
            Slot::Value(v) => Ok(v),
            Slot::Pending(idx) => {
                let (init, tscope) = {
                    let t = &self.thunks[idx];
                    (t.init, t.scope.clone())
                };
                self.enter()?;
                let v = self.expr(init, &tscope);
                self.depth -= 1;
                let v = v?;
                frame.borrow_mut()[slot] = Slot::Value(v);
                Ok(v)
            }
        }
    }

    fn call(&mut self, binding: Binding, args: Vec<i64>) -> Result<i64> {
        match binding {
            Binding::Builtin(b) => Ok((b.func)(&args, &mut *self.out)?),
            Binding::Func(idx) => {
                let (params, body, def_scope) = {
                    let f = &self.functions[idx];
                    (f.params, f.body, f.scope.clone())
                };
                let frame: Frame = Rc::new(RefCell::new(args.into_iter().map(Slot::Value).collect()));
                let mut local = (*def_scope).clone();
                for (i, p) in params.iter().enumerate() {
                    local.names.insert(p.clone(), Binding::Var(frame.clone(), i));
                }
                self.enter()?;
                let result = self.expr(body, &Rc::new(local));
                self.depth -= 1;
                result
            }
            Binding::Var(..) => Err(RuntimeError::new("variables cannot be called")),
        }
    }

    fn enter(&mut self) -> Result<()> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(RuntimeError::new("call depth limit exceeded"));
        }
        self.depth += 1;
        Ok(())
    }

    fn block(&mut self, program: &'a Program, outer: &Rc<Scope>) -> Result<i64> {
        let marks = (self.functions.len(), self.thunks.len());
        let frame: Frame = Rc::new(RefCell::new(Vec::new()));
        let mut inner = (**outer).clone();

        let mut slots = Vec::with_capacity(program.declarations.len());
        let mut next_fn = self.functions.len();
        for decl in &program.declarations {
            match decl {
                Decl::Function { name, params, .. } => {
                    inner.names.insert(signature(name, params.len()), Binding::Func(next_fn));
                    next_fn += 1;
                    slots.push(None);
                }
                Decl::Var { name, .. } | Decl::Lazy { name, .. } => {
                    let slot = frame.borrow().len();
                    frame.borrow_mut().push(Slot::Value(0));
                    inner.names.insert(name.clone(), Binding::Var(frame.clone(), slot));
                    slots.push(Some(slot));
                }
            }
        }

        let inner = Rc::new(inner);
        for decl in &program.declarations {
            if let Decl::Function { params, body, .. } = decl {
                self.functions.push(Function { params, body, scope: inner.clone() });
            }
        }

        let result = self.block_body(program, &slots, &frame, &inner);
        self.functions.truncate(marks.0);
        self.thunks.truncate(marks.1);
        result
    }

    fn block_body(
        &mut self,
        program: &'a Program,
        slots: &[Option<usize>],
        frame: &Frame,
        inner: &Rc<Scope>,
    ) -> Result<i64> {
        for (decl, slot) in program.declarations.iter().zip(slots) {
            match (decl, slot) {
                (Decl::Var { init, .. }, Some(slot)) => {
                    let v = self.expr(init, inner)?;
                    frame.borrow_mut()[*slot] = Slot::Value(v);
                }
                (Decl::Lazy { init, .. }, Some(slot)) => {
                    self.thunks.push(Thunk { init, scope: inner.clone() });
                    frame.borrow_mut()[*slot] = Slot::Pending(self.thunks.len() - 1);
                }
                _ => {}
            }
        }
        self.expr(&program.body, inner)
    }
}

fn eval_binop(op: BinOp, l: i64, r: i64) -> Result<i64> {
    Ok(match op {
        BinOp::Add => l.wrapping_add(r),
        BinOp::Subtract => l.wrapping_sub(r),
        BinOp::Multiply => l.wrapping_mul(r),
        BinOp::Divide => {
            if r == 0 {
                return Err(RuntimeError::new("division by zero"));
            }
            l.wrapping_div(r)
        }
        BinOp::Equals => (l == r) as i64,
        BinOp::NotEquals => (l != r) as i64,
        BinOp::LessThan => (l < r) as i64,
        BinOp::GreaterThan => (l > r) as i64,
    })
}
