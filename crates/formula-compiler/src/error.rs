use core::fmt;

use formula_model::ModelError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    #[must_use]
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub fn add_offset(self, delta: usize) -> Self {
        Self {
            start: self.start.saturating_add(delta),
            end: self.end.saturating_add(delta),
        }
    }
}

/// Malformed formula text. Carries the full source and the offending byte range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseError {
    pub message: String,
    pub source: String,
    pub span: Span,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (at {}..{})",
            self.message, self.span.start, self.span.end
        )
    }
}

impl std::error::Error for ParseError {}

impl ParseError {
    #[must_use]
    pub fn new(message: impl Into<String>, source: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            source: source.into(),
            span,
        }
    }

    #[must_use]
    pub fn add_offset(self, delta: usize) -> Self {
        Self {
            span: self.span.add_offset(delta),
            ..self
        }
    }

    /// Byte offset of the error in [`ParseError::source`].
    pub fn offset(&self) -> usize {
        self.span.start
    }
}

/// A cell that (transitively) depends on itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError {
    /// Source identities along the cycle, starting at the cell that closes it.
    pub path: Vec<String>,
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "circular reference: {}", self.path.join(" -> "))
    }
}

impl std::error::Error for CycleError {}

#[derive(Debug, thiserror::Error)]
pub enum CompilerError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Cycle(#[from] CycleError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("unsupported expression: {message}")]
    UnsupportedExpression { message: String },
    #[error("unsupported function: {name}")]
    UnsupportedFunction { name: String },
}

impl CompilerError {
    pub(crate) fn unsupported(message: impl Into<String>) -> Self {
        CompilerError::UnsupportedExpression {
            message: message.into(),
        }
    }
}

pub type CompilerResult<T> = Result<T, CompilerError>;

/// Failures loading or saving an [`crate::Engine`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unsupported engine format (magic {found:?})")]
    UnsupportedFormat { found: [u8; 4] },
    #[error("unsupported engine format version {found}")]
    UnsupportedVersion { found: u32 },
    #[error("engine i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("engine payload is invalid: {0}")]
    Deserialize(#[from] serde_json::Error),
}

/// Spreadsheet error values produced while evaluating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Div0,
    Value,
    Num,
    Na,
    Ref,
    Name,
    Null,
}

impl ErrorKind {
    pub fn as_code(self) -> &'static str {
        match self {
            ErrorKind::Div0 => "#DIV/0!",
            ErrorKind::Value => "#VALUE!",
            ErrorKind::Num => "#NUM!",
            ErrorKind::Na => "#N/A",
            ErrorKind::Ref => "#REF!",
            ErrorKind::Name => "#NAME?",
            ErrorKind::Null => "#NULL!",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

/// Error raised by a caller-supplied input accessor, surfaced unchanged.
pub type InputError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("{0}")]
    Formula(ErrorKind),
    #[error(transparent)]
    Input(InputError),
    #[error("no output accessor named `{name}`")]
    NameNotFound { name: String },
}

impl From<ErrorKind> for EvalError {
    fn from(kind: ErrorKind) -> Self {
        EvalError::Formula(kind)
    }
}

impl EvalError {
    /// The spreadsheet error, if this is one.
    pub fn formula_error(&self) -> Option<ErrorKind> {
        match self {
            EvalError::Formula(kind) => Some(*kind),
            _ => None,
        }
    }
}
