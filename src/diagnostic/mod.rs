pub mod ansi;
pub mod json;

use crate::ast::Span;
use crate::compiler::CompileError;
use crate::interpreter::RuntimeError;
use crate::lexer::LexError;
use crate::parser::ParseError;
use crate::vm::VmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct Label {
    pub span: Span,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: Option<&'static str>,
    pub message: String,
    pub labels: Vec<Label>,
    pub notes: Vec<String>,
    pub suggestion: Option<String>,
    pub source: Option<String>,
}

impl Diagnostic {
    fn new(severity: Severity, message: impl Into<String>) -> Self {
        Diagnostic {
            severity,
            code: None,
            message: message.into(),
            labels: Vec::new(),
            notes: Vec::new(),
            suggestion: None,
            source: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.labels.push(Label { span, message: label.into() });
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

// ---- From impls for each pipeline stage ----

impl From<&LexError> for Diagnostic {
    fn from(e: &LexError) -> Self {
        let span = Span {
            start: e.position,
            end: e.position + e.snippet.len().max(1),
        };
        let mut d = Diagnostic::error(format!("unexpected input '{}'", e.snippet))
            .with_code("TRP-L001")
            .with_span(span, "here");
        if !e.suggestion.is_empty() {
            d = d.with_suggestion(e.suggestion.clone());
        }
        d
    }
}

impl From<&ParseError> for Diagnostic {
    fn from(e: &ParseError) -> Self {
        Diagnostic::error(&e.message).with_code(e.code).with_span(e.span, "here")
    }
}

impl From<&CompileError> for Diagnostic {
    fn from(e: &CompileError) -> Self {
        let d = Diagnostic::error(e.to_string());
        match e {
            CompileError::Unresolved { name } => {
                let d = d.with_code("TRP-C001");
                match name.split_once('/') {
                    Some((f, arity)) => d.with_note(format!(
                        "no function '{f}' taking {arity} argument(s) is declared in an enclosing let block"
                    )),
                    None => d.with_note(format!("'{name}' is not a parameter or variable in scope")),
                }
            }
            CompileError::UnknownOperator { .. } => {
                d.with_code("TRP-C002").with_suggestion("use one of + - * / == != < >")
            }
            CompileError::EmptySequence => d.with_code("TRP-C003"),
            CompileError::UnboundLabel { .. } => d.with_code("TRP-C004"),
        }
    }
}

impl From<&VmError> for Diagnostic {
    fn from(e: &VmError) -> Self {
        let code = match e {
            VmError::TypeTag { .. } => "TRP-R001",
            VmError::Arity { .. } | VmError::UndefinedBuiltin { .. } => "TRP-R002",
            VmError::StackOverflow { .. } => "TRP-R003",
            VmError::ReadPastTop { .. } | VmError::EmptyStack | VmError::PcOutOfRange { .. } => "TRP-R004",
            VmError::UnknownOpcode { .. } | VmError::MissingOperand { .. } | VmError::BadOperand { .. } => {
                "TRP-R005"
            }
            VmError::DivisionByZero { .. } => "TRP-R006",
            VmError::Output(_) => "TRP-R007",
        };
        let d = Diagnostic::error(e.to_string()).with_code(code);
        match e {
            VmError::StackOverflow { .. } => d.with_suggestion("raise --stack-size or reduce recursion depth"),
            _ => d,
        }
    }
}

impl From<&RuntimeError> for Diagnostic {
    fn from(e: &RuntimeError) -> Self {
        Diagnostic::error(&e.message).with_code("TRP-E001")
    }
}

impl From<&crate::Error> for Diagnostic {
    fn from(e: &crate::Error) -> Self {
        match e {
            crate::Error::Lex(e) => e.into(),
            crate::Error::Parse(e) => e.into(),
            crate::Error::Compile(e) => e.into(),
            crate::Error::Vm(e) => e.into(),
            crate::Error::Runtime(e) => e.into(),
        }
    }
}
