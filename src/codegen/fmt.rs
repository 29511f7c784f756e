use crate::ast::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FmtMode {
    /// Everything on one line.
    Dense,
    /// One declaration per line, 2-space indentation inside blocks and bodies.
    Expanded,
}

const INDENT: &str = "  ";

// Binding strength of each form, loosest first. A subexpression weaker
// than its position allows is parenthesized.
const SEQ: u8 = 0;
const ASSIGN: u8 = 1;
const ATOM: u8 = 5;

/// Render `expr` as source text that parses back to the same tree.
pub fn format(expr: &Expr, mode: FmtMode) -> String {
    let mut p = Printer { out: String::new(), mode, indent: 0 };
    p.expr(expr, SEQ);
    p.out
}

fn level(expr: &Expr) -> u8 {
    match expr {
        // `let` bodies and sequences extend as far right as they can
        Expr::Let(_) | Expr::Sequence(_) => SEQ,
        Expr::Assignment { .. } | Expr::Conditional { .. } => ASSIGN,
        Expr::Operation { op, .. } => op_level(op),
        Expr::Identifier(_) | Expr::Constant(_) | Expr::Call { .. } => ATOM,
    }
}

fn op_level(op: &str) -> u8 {
    // comparisons 2, additive 3, multiplicative 4
    BinOp::from_symbol(op).map_or(2, |b| b.precedence() + 1)
}

struct Printer {
    out: String,
    mode: FmtMode,
    indent: usize,
}

impl Printer {
    /// Line break in expanded mode, a space in dense mode.
    fn sep(&mut self) {
        match self.mode {
            FmtMode::Dense => self.out.push(' '),
            FmtMode::Expanded => {
                self.out.push('\n');
                for _ in 0..self.indent {
                    self.out.push_str(INDENT);
                }
            }
        }
    }

    fn expr(&mut self, expr: &Expr, min: u8) {
        if level(expr) < min {
            self.out.push('(');
            self.expr(expr, SEQ);
            self.out.push(')');
            return;
        }
        match expr {
            Expr::Constant(n) => self.constant(*n),
            Expr::Identifier(name) => self.out.push_str(name),
            Expr::Operation { left, op, right } => {
                let lvl = op_level(op);
                self.expr(left, lvl);
                self.out.push(' ');
                self.out.push_str(op);
                self.out.push(' ');
                self.expr(right, lvl + 1);
            }
            Expr::Assignment { target, value } => {
                self.out.push_str(target);
                self.out.push_str(" = ");
                self.expr(value, ASSIGN);
            }
            Expr::Sequence(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.out.push(';');
                        self.sep();
                    }
                    self.expr(item, ASSIGN);
                }
            }
            Expr::Conditional { condition, consequent, alternative } => {
                self.out.push_str("if (");
                self.expr(condition, SEQ);
                self.out.push_str(") then ");
                self.expr(consequent, ASSIGN);
                self.out.push_str(" else ");
                self.expr(alternative, ASSIGN);
            }
            Expr::Call { callee, args } => {
                self.out.push_str(callee);
                self.out.push('(');
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.expr(arg, ASSIGN);
                }
                self.out.push(')');
            }
            Expr::Let(program) => self.block(program),
        }
    }

    fn constant(&mut self, n: i64) {
        // The lexer has no negative literals.
        if n == i64::MIN {
            self.out.push_str(&format!("(0 - {} - 1)", i64::MAX));
        } else if n < 0 {
            self.out.push_str(&format!("(0 - {})", -n));
        } else {
            self.out.push_str(&n.to_string());
        }
    }

    fn block(&mut self, program: &Program) {
        self.out.push_str("let");
        self.indent += 1;
        for decl in &program.declarations {
            self.sep();
            self.decl(decl);
        }
        self.indent -= 1;
        self.sep();
        self.out.push_str("in");
        self.indent += 1;
        self.sep();
        self.expr(&program.body, SEQ);
        self.indent -= 1;
    }

    fn decl(&mut self, decl: &Decl) {
        match decl {
            Decl::Function { name, params, body } => {
                self.out.push_str(name);
                self.out.push('(');
                self.out.push_str(&params.join(", "));
                self.out.push_str(") {");
                self.indent += 1;
                self.sep();
                self.expr(body, SEQ);
                self.indent -= 1;
                self.sep();
                self.out.push('}');
            }
            Decl::Var { name, init } => {
                self.out.push_str("var ");
                self.out.push_str(name);
                self.out.push_str(" = ");
                self.expr(init, ASSIGN);
            }
            Decl::Lazy { name, init } => {
                self.out.push_str("lazy ");
                self.out.push_str(name);
                self.out.push_str(" = ");
                self.expr(init, ASSIGN);
            }
        }
    }
}

// ---- Tests ----
