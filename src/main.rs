use std::io::IsTerminal;
use std::path::Path;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing::debug;
use tripla::ast::Expr;
use tripla::codegen::fmt::{self, FmtMode};
use tripla::diagnostic::{Diagnostic, ansi::AnsiRenderer, json};
use tripla::interpreter::Interpreter;
use tripla::vm::{self, Machine, instruction::disassemble};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Emit {
    /// Syntax tree as JSON
    Json,
    /// Compiled instruction listing
    Asm,
    /// Source, one declaration per line
    Fmt,
    /// Source on a single line
    FmtDense,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Engine {
    /// Compile and run on the stack machine
    Vm,
    /// Evaluate the syntax tree directly
    Tree,
}

#[derive(Parser, Debug)]
#[command(name = "tripla", version, about = "Compile and run tripla programs on the TRAM stack machine")]
struct Args {
    /// Program file, or inline source when no such file exists
    source: String,

    /// Print an intermediate form instead of running
    #[arg(long, value_enum)]
    emit: Option<Emit>,

    #[arg(long, value_enum, default_value_t = Engine::Vm)]
    engine: Engine,

    /// Print registers, stack and instruction before every machine step
    #[arg(long)]
    trace: bool,

    /// Machine stack capacity in cells
    #[arg(long, default_value_t = vm::DEFAULT_STACK_SIZE)]
    stack_size: usize,

    /// SOURCE holds a JSON syntax tree (as written by --emit json)
    #[arg(long)]
    from_json: bool,

    /// Report errors as JSON on stderr
    #[arg(long)]
    json_errors: bool,
}

struct Reporter {
    json: bool,
    source: Option<String>,
}

impl Reporter {
    fn report(&self, d: Diagnostic) {
        let d = match &self.source {
            Some(s) if !d.labels.is_empty() => d.with_source(s.clone()),
            _ => d,
        };
        if self.json {
            eprintln!("{}", json::render(&d));
        } else {
            let renderer = AnsiRenderer { use_color: std::io::stderr().is_terminal() };
            eprint!("{}", renderer.render(&d));
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut reporter = Reporter { json: args.json_errors, source: None };

    let text = if Path::new(&args.source).is_file() {
        match std::fs::read_to_string(&args.source) {
            Ok(s) => s,
            Err(e) => {
                reporter.report(Diagnostic::error(format!("cannot read {}: {e}", args.source)));
                return ExitCode::FAILURE;
            }
        }
    } else {
        args.source.clone()
    };

    let program: Expr = if args.from_json {
        match serde_json::from_str(&text) {
            Ok(p) => p,
            Err(e) => {
                reporter.report(Diagnostic::error(format!("invalid syntax tree JSON: {e}")).with_code("TRP-J001"));
                return ExitCode::FAILURE;
            }
        }
    } else {
        reporter.source = Some(text.clone());
        match tripla::parse_source(&text) {
            Ok(p) => p,
            Err(e) => {
                reporter.report(Diagnostic::from(&e));
                return ExitCode::FAILURE;
            }
        }
    };

    match run(&args, &program) {
        Ok(()) => ExitCode::SUCCESS,
        Err(d) => {
            reporter.report(d);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args, program: &Expr) -> Result<(), Diagnostic> {
    match args.emit {
        Some(Emit::Json) => {
            let json = serde_json::to_string_pretty(program)
                .map_err(|e| Diagnostic::error(format!("serialization error: {e}")))?;
            println!("{json}");
            return Ok(());
        }
        Some(Emit::Fmt) => {
            println!("{}", fmt::format(program, FmtMode::Expanded));
            return Ok(());
        }
        Some(Emit::FmtDense) => {
            println!("{}", fmt::format(program, FmtMode::Dense));
            return Ok(());
        }
        Some(Emit::Asm) => {
            let code = tripla::compiler::compile(program).map_err(|e| Diagnostic::from(&e))?;
            print!("{}", disassemble(&code));
            return Ok(());
        }
        None => {}
    }

    let result = match args.engine {
        Engine::Vm => {
            let mut machine = Machine::new(args.stack_size);
            machine.set_trace(args.trace);
            debug!(capacity = machine.capacity(), "machine ready");
            tripla::execute(program, &mut machine).map_err(|e| Diagnostic::from(&e))?
        }
        Engine::Tree => {
            if args.trace {
                let warning = Diagnostic::warning("--trace has no effect with --engine tree");
                Reporter { json: args.json_errors, source: None }.report(warning);
            }
            Interpreter::new().run(program).map_err(|e| Diagnostic::from(&e))?
        }
    };
    debug!(result, engine = ?args.engine, "program finished");
    println!("{result}");
    Ok(())
}
