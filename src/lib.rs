//! tripla: a nested-function expression language compiled with lexical
//! addressing and run on the TRAM stack machine.

use std::io::Write;

pub mod ast;
pub mod codegen;
pub mod compiler;
pub mod diagnostic;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod vm;

use ast::{Expr, Span};
use vm::{Instruction, Machine};

/// Any failure along the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] lexer::LexError),
    #[error(transparent)]
    Parse(#[from] parser::ParseError),
    #[error(transparent)]
    Compile(#[from] compiler::CompileError),
    #[error(transparent)]
    Vm(#[from] vm::VmError),
    #[error(transparent)]
    Runtime(#[from] interpreter::RuntimeError),
}

/// Lex and parse source text.
pub fn parse_source(source: &str) -> Result<Expr, Error> {
    let tokens = lexer::lex(source)?
        .into_iter()
        .map(|(t, r)| (t, Span { start: r.start, end: r.end }))
        .collect();
    Ok(parser::parse(tokens)?)
}

pub fn compile_source(source: &str) -> Result<Vec<Instruction>, Error> {
    Ok(compiler::compile(&parse_source(source)?)?)
}

/// Compile `expr`, load it into `machine` and run it.
pub fn execute<W: Write>(expr: &Expr, machine: &mut Machine<W>) -> Result<i64, Error> {
    let code = compiler::compile(expr)?;
    machine.load(code);
    Ok(machine.run()?)
}

/// Compile and run source text on a default-sized machine printing to stdout.
pub fn run_source(source: &str) -> Result<i64, Error> {
    execute(&parse_source(source)?, &mut Machine::default())
}
