use tripla::ast::{Decl, Expr};
use tripla::codegen::fmt::{self, FmtMode};
use tripla::compiler::{self, CompileError};
use tripla::interpreter::Interpreter;
use tripla::vm::{Machine, Opcode, builtins};
use tripla::{Error, parse_source};

/// Run on the machine, returning the result and everything built-ins printed.
fn machine_expr(expr: &Expr, capacity: usize) -> (i64, String) {
    let mut m = Machine::with_output(capacity, Vec::new());
    let result = tripla::execute(expr, &mut m).unwrap_or_else(|e| panic!("machine failed: {e}"));
    (result, String::from_utf8(m.into_output()).unwrap())
}

fn tree_expr(expr: &Expr) -> (i64, String) {
    let mut i = Interpreter::with_output(Vec::new());
    let result = i.run(expr).unwrap_or_else(|e| panic!("interpreter failed: {e}"));
    (result, String::from_utf8(i.into_output()).unwrap())
}

/// Both engines must agree; returns the machine's answer.
fn both(source: &str) -> (i64, String) {
    let expr = parse_source(source).unwrap();
    let on_machine = machine_expr(&expr, 1024);
    assert_eq!(tree_expr(&expr), on_machine, "engines disagree on {source}");
    on_machine
}

const FACTORIAL: &str = "let fac(n) { if (n == 0) then 1 else n * fac(n - 1) } in ";

// --- Concrete programs ---

#[test]
fn factorial_of_five() {
    assert_eq!(both(&format!("{FACTORIAL}fac(5)")).0, 120);
}

#[test]
fn factorial_of_zero() {
    assert_eq!(both(&format!("{FACTORIAL}fac(0)")).0, 1);
}

#[test]
fn assignment_to_parameter() {
    assert_eq!(both("let x(a) { a = 3; a } in x(5)").0, 3);
}

#[test]
fn print_builtin_output_and_result() {
    assert_eq!(both("let x(a) { print(a) } in x(23)"), (23, "23\n".to_string()));
}

#[test]
fn division() {
    assert_eq!(both("let in 84/2").0, 42);
}

#[test]
fn undeclared_call_fails_at_compile_time() {
    match tripla::compile_source("let x(a) { print(a) } in x(1); foo(1)") {
        Err(Error::Compile(CompileError::Unresolved { name })) => assert_eq!(name, "foo/1"),
        other => panic!("expected unresolved foo/1, got {other:?}"),
    }
}

#[test]
fn arity_is_part_of_the_name() {
    assert!(matches!(
        tripla::compile_source("let x(a) { a } in x(1, 2)"),
        Err(Error::Compile(CompileError::Unresolved { .. }))
    ));
}

// --- Shadowing ---

#[test]
fn later_same_arity_declaration_wins() {
    assert_eq!(both("let x(a) { 1 } x(b) { 2 } in x(5)").0, 2);
}

#[test]
fn different_arities_coexist_across_scopes() {
    assert_eq!(both("let x(a, b) { 42 } in let x(c) { 23 } in x(1, 2)").0, 42);
    assert_eq!(both("let x(a, b) { 42 } in let x(c) { 23 } in x(1)").0, 23);
}

// --- Lazy bindings ---

#[test]
fn eager_redeclaration_hides_lazy_side_effect() {
    let (result, out) = both("let lazy x = y(0) var x = 3 y(a) { print(23) } in x");
    assert_eq!(result, 3);
    assert_eq!(out, "");
}

#[test]
fn final_lazy_binding_prints_once() {
    let (result, out) = both("let var x = 3 lazy x = y(0) y(a) { print(23) } in x; x; x + x");
    assert_eq!(result, 46);
    assert_eq!(out, "23\n");
}

#[test]
fn unread_lazy_never_runs() {
    let (result, out) = both("let lazy x = print(1) in 5");
    assert_eq!(result, 5);
    assert_eq!(out, "");
}

#[test]
fn lazy_runs_on_first_read_not_declaration() {
    let (result, out) = both("let lazy x = print(1) var y = print(2) in y; x; print(3); x");
    assert_eq!(result, 1);
    assert_eq!(out, "2\n1\n3\n");
}

#[test]
fn lazy_read_from_nested_function() {
    let src = "let lazy l = print(7) * 2 f(a) { let g(b) { l + b } in g(a) } in f(1) + f(2)";
    assert_eq!(both(src), (31, "7\n".to_string()));
}

#[test]
fn lazy_initializer_forces_another_lazy() {
    let src = "let lazy one = one(0) var two = two(0) lazy three = three(0) \
               one(a) { print(1) } two(a) { print(2) } three(a) { print(3); 3 * one } \
               in one; two; three";
    assert_eq!(both(src), (3, "2\n1\n3\n".to_string()));
}

#[test]
fn lazy_in_recursive_body_forces_outer_lazy() {
    let src = "let var result = 0 lazy end = mult(2, 5) \
               mult(x, y) { x * y } \
               count(start) { \
                 let lazy final = mult(2, end) \
                 in if (start == final) then result = start else count(start + 1) \
               } \
               in count(0)";
    assert_eq!(both(src), (20, String::new()));
}

// --- Static scoping ---

#[test]
fn three_levels_of_nesting() {
    let src = "let f(a) { let g(b) { let h(c) { a * 100 + b * 10 + c } in h(3) } in g(2) } in f(1)";
    assert_eq!(both(src).0, 123);
}

#[test]
fn static_link_ignores_dynamic_depth() {
    // g recurses five times before reading f's parameter
    let src = "let f(a) { let g(n) { if (n == 0) then a else g(n - 1) } in g(5) } in f(7)";
    assert_eq!(both(src).0, 7);
}

#[test]
fn assignment_through_static_link() {
    let src = "let var total = 0 add(n) { total = total + n } in add(4); add(5); total";
    assert_eq!(both(src).0, 9);
}

#[test]
fn mutual_recursion() {
    let src = "let even(n) { if (n == 0) then 1 else odd(n - 1) } \
               odd(n) { if (n == 0) then 0 else even(n - 1) } in even(10) * 10 + odd(7)";
    assert_eq!(both(src).0, 11);
}

// --- Label resolution ---

#[test]
fn compiled_jumps_are_resolved() {
    let expr = parse_source(&format!("{FACTORIAL}print(fac(4))")).unwrap();
    let code = compiler::compile(&expr).unwrap();
    for inst in &code {
        let Some(target) = inst.jump_target() else { continue };
        if target < 0 {
            assert_eq!(inst.opcode(), Ok(Opcode::Invoke));
            assert!(builtins::lookup(target).is_some(), "unknown built-in {target}");
        } else {
            assert!((target as usize) < code.len(), "jump past end: {inst}");
        }
    }
    assert_eq!(code.last().and_then(|i| i.opcode().ok()), Some(Opcode::Halt));
}

#[test]
fn compilation_is_deterministic() {
    let expr = parse_source("let lazy l = f(1) f(a) { a + 1 } in l * l").unwrap();
    assert_eq!(compiler::compile(&expr).unwrap(), compiler::compile(&expr).unwrap());
}

#[test]
fn machine_stack_is_bounded() {
    let expr = parse_source(&format!("{FACTORIAL}fac(100)")).unwrap();
    let mut m = Machine::with_output(64, Vec::new());
    assert!(matches!(tripla::execute(&expr, &mut m), Err(Error::Vm(_))));
}

// --- Oracle: machine vs. tree-walking evaluator on random programs ---

struct Gen {
    rng: fastrand::Rng,
}

/// Names visible at a point of the generated program.
#[derive(Clone, Default)]
struct Scope {
    vars: Vec<String>,
    funcs: Vec<(String, usize)>,
}

impl Gen {
    fn program(&mut self) -> Expr {
        let nfuncs = self.rng.usize(0..4);
        let nvars = self.rng.usize(0..4);
        let mut decls = Vec::new();
        let mut funcs: Vec<(String, usize)> = Vec::new();
        for i in 0..nfuncs {
            let arity = self.rng.usize(0..3);
            let params: Vec<String> = (0..arity).map(|p| format!("p{i}_{p}")).collect();
            // only earlier functions are callable, so every call terminates
            let scope = Scope { vars: params.clone(), funcs: funcs.clone() };
            let body = self.expr(&scope, 3);
            decls.push(Decl::Function { name: format!("f{i}"), params, body });
            funcs.push((format!("f{i}"), arity));
        }
        let vars: Vec<String> = (0..nvars).map(|i| format!("v{i}")).collect();
        let scope = Scope { vars: vars.clone(), funcs };
        for name in vars {
            let init = self.expr(&scope, 2);
            decls.push(Decl::Var { name, init });
        }
        let body = self.expr(&scope, 4);
        Expr::let_in(decls, body)
    }

    fn expr(&mut self, scope: &Scope, depth: u32) -> Expr {
        if depth == 0 {
            return self.leaf(scope);
        }
        match self.rng.u8(0..10) {
            0 | 1 => self.leaf(scope),
            2 | 3 => {
                let op = ["+", "-", "*", "==", "!=", "<", ">"][self.rng.usize(0..7)];
                Expr::op(self.expr(scope, depth - 1), op, self.expr(scope, depth - 1))
            }
            4 => Expr::op(self.expr(scope, depth - 1), "/", Expr::Constant(self.rng.i64(1..6))),
            5 => Expr::Conditional {
                condition: Box::new(self.expr(scope, depth - 1)),
                consequent: Box::new(self.expr(scope, depth - 1)),
                alternative: Box::new(self.expr(scope, depth - 1)),
            },
            6 if !scope.vars.is_empty() => {
                let target = scope.vars[self.rng.usize(0..scope.vars.len())].clone();
                Expr::Assignment { target, value: Box::new(self.expr(scope, depth - 1)) }
            }
            7 => Expr::Sequence(vec![self.expr(scope, depth - 1), self.expr(scope, depth - 1)]),
            8 if !scope.funcs.is_empty() => {
                let (name, arity) = scope.funcs[self.rng.usize(0..scope.funcs.len())].clone();
                let args = (0..arity).map(|_| self.expr(scope, depth - 1)).collect();
                Expr::call(&name, args)
            }
            9 => {
                let name = format!("w{depth}");
                let init = self.expr(scope, depth - 1);
                let mut inner = scope.clone();
                inner.vars.push(name.clone());
                let body = self.expr(&inner, depth - 1);
                Expr::let_in(vec![Decl::Var { name, init }], body)
            }
            _ => Expr::call("print", vec![self.expr(scope, depth - 1)]),
        }
    }

    fn leaf(&mut self, scope: &Scope) -> Expr {
        if !scope.vars.is_empty() && self.rng.bool() {
            Expr::ident(&scope.vars[self.rng.usize(0..scope.vars.len())])
        } else {
            Expr::Constant(self.rng.i64(0..20))
        }
    }
}

#[test]
fn machine_agrees_with_tree_evaluator() {
    let mut g = Gen { rng: fastrand::Rng::with_seed(0x7419) };
    for _ in 0..300 {
        let program = g.program();
        let text = fmt::format(&program, FmtMode::Dense);
        assert_eq!(parse_source(&text).unwrap(), program, "printer round trip failed: {text}");
        assert_eq!(machine_expr(&program, 4096), tree_expr(&program), "engines disagree on: {text}");
    }
}
