use serde::{Deserialize, Serialize};

pub mod source_map;
pub use source_map::{Position, SourceMap};

// ---- Span infrastructure ----

/// Byte range within source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const UNKNOWN: Span = Span { start: 0, end: 0 };

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

// ---- Core AST types ----

/// Expressions. A whole program is an `Expr`, usually a `Let`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Name occurrence
    Identifier(String),

    /// Integer literal (`true`/`false` parse to 1/0)
    Constant(i64),

    /// Infix operation: `left op right`. The operator stays a symbol so a
    /// deserialized tree can carry one the compiler rejects.
    Operation {
        left: Box<Expr>,
        op: String,
        right: Box<Expr>,
    },

    /// `if (condition) then consequent else alternative`
    Conditional {
        condition: Box<Expr>,
        consequent: Box<Expr>,
        alternative: Box<Expr>,
    },

    /// `target = value`; evaluates to the assigned value
    Assignment { target: String, value: Box<Expr> },

    /// `e1; e2; ...`; evaluates to the last expression
    Sequence(Vec<Expr>),

    /// `callee(arg, ...)`
    Call { callee: String, args: Vec<Expr> },

    /// `let declarations in body`
    Let(Program),
}

/// A `let ... in ...` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub declarations: Vec<Decl>,
    pub body: Box<Expr>,
}

/// Declarations inside a `let` block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Decl {
    /// `name(p1, ..., pn) { body }`
    Function {
        name: String,
        params: Vec<String>,
        body: Expr,
    },

    /// `var name = init`, evaluated in declaration order
    Var { name: String, init: Expr },

    /// `lazy name = init`, evaluated on first read
    Lazy { name: String, init: Expr },
}

impl Decl {
    pub fn name(&self) -> &str {
        match self {
            Decl::Function { name, .. } | Decl::Var { name, .. } | Decl::Lazy { name, .. } => name,
        }
    }
}

/// `name/arity`, the lookup key of a function.
pub fn signature(name: &str, arity: usize) -> String {
    format!("{name}/{arity}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Equals,
    NotEquals,
    LessThan,
    GreaterThan,
}

impl BinOp {
    pub fn from_symbol(symbol: &str) -> Option<BinOp> {
        Some(match symbol {
            "+" => BinOp::Add,
            "-" => BinOp::Subtract,
            "*" => BinOp::Multiply,
            "/" => BinOp::Divide,
            "==" => BinOp::Equals,
            "!=" => BinOp::NotEquals,
            "<" => BinOp::LessThan,
            ">" => BinOp::GreaterThan,
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Subtract => "-",
            BinOp::Multiply => "*",
            BinOp::Divide => "/",
            BinOp::Equals => "==",
            BinOp::NotEquals => "!=",
            BinOp::LessThan => "<",
            BinOp::GreaterThan => ">",
        }
    }

    /// Binding strength; higher binds tighter.
    pub fn precedence(self) -> u8 {
        match self {
            BinOp::Equals | BinOp::NotEquals | BinOp::LessThan | BinOp::GreaterThan => 1,
            BinOp::Add | BinOp::Subtract => 2,
            BinOp::Multiply | BinOp::Divide => 3,
        }
    }
}

// ---- Builders (tests and hand-built trees) ----

impl Expr {
    pub fn ident(name: &str) -> Expr {
        Expr::Identifier(name.to_string())
    }

    pub fn op(left: Expr, op: &str, right: Expr) -> Expr {
        Expr::Operation {
            left: Box::new(left),
            op: op.to_string(),
            right: Box::new(right),
        }
    }

    pub fn call(callee: &str, args: Vec<Expr>) -> Expr {
        Expr::Call { callee: callee.to_string(), args }
    }

    pub fn let_in(declarations: Vec<Decl>, body: Expr) -> Expr {
        Expr::Let(Program { declarations, body: Box::new(body) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_merge_takes_extremes() {
        let a = Span { start: 5, end: 10 };
        let b = Span { start: 2, end: 15 };
        assert_eq!(a.merge(b), Span { start: 2, end: 15 });
    }

    #[test]
    fn span_default_is_unknown() {
        assert_eq!(Span::default(), Span::UNKNOWN);
    }

    #[test]
    fn signature_includes_arity() {
        assert_eq!(signature("fac", 1), "fac/1");
        assert_ne!(signature("x", 1), signature("x", 2));
    }

    #[test]
    fn binop_symbols_round_trip() {
        for sym in ["+", "-", "*", "/", "==", "!=", "<", ">"] {
            let op = BinOp::from_symbol(sym).unwrap();
            assert_eq!(op.symbol(), sym);
        }
        assert_eq!(BinOp::from_symbol("%"), None);
        assert_eq!(BinOp::from_symbol(">="), None);
    }

    #[test]
    fn precedence_orders_operators() {
        assert!(BinOp::Multiply.precedence() > BinOp::Add.precedence());
        assert!(BinOp::Add.precedence() > BinOp::LessThan.precedence());
    }

    #[test]
    fn decl_name() {
        let d = Decl::Lazy { name: "x".into(), init: Expr::Constant(1) };
        assert_eq!(d.name(), "x");
    }

    #[test]
    fn program_json_round_trip() {
        let prog = Expr::let_in(
            vec![Decl::Function {
                name: "f".to_string(),
                params: vec!["x".to_string()],
                body: Expr::op(Expr::ident("x"), "*", Expr::Constant(2)),
            }],
            Expr::call("f", vec![Expr::Constant(21)]),
        );
        let json = serde_json::to_string_pretty(&prog).unwrap();
        let back: Expr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, prog);
    }

    #[test]
    fn unknown_operator_survives_deserialization() {
        let json = r#"{"Operation":{"left":{"Constant":1},"op":"%","right":{"Constant":2}}}"#;
        let e: Expr = serde_json::from_str(json).unwrap();
        match e {
            Expr::Operation { op, .. } => assert_eq!(op, "%"),
            other => panic!("expected operation, got {:?}", other),
        }
    }
}
