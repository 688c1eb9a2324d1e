//! Located diagnostics for every pipeline stage.
//!
//! Each error carries a [`Span`]; rendered messages always lead with
//! `line:column:` so the editor can anchor them. The parser and checker
//! accumulate errors; the lexer stops at the first; the interpreter halts at
//! the first unhandled runtime failure.

use thiserror::Error;

use crate::token::{Currency, Span};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LexErrorKind {
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("invalid escape '\\{0}' in string literal")]
    BadEscape(char),
    #[error("invalid date literal \"{0}\"")]
    BadDate(String),
    #[error("expected an amount after currency code {0}")]
    MissingAmount(Currency),
    #[error("invalid number '{0}'")]
    BadNumber(String),
    #[error("invalid range '{word}': {reason}")]
    BadRange { word: String, reason: &'static str },
    #[error("invalid identifier '{0}'")]
    BadIdent(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub kind: LexErrorKind,
    pub span: Span,
}

impl LexError {
    pub fn new(kind: LexErrorKind, span: Span) -> Self {
        LexError { kind, span }
    }
}

impl std::fmt::Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.span.line, self.span.column, self.kind)
    }
}

impl std::error::Error for LexError {}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseErrorKind {
    /// The workhorse, including the dominant missing-period case.
    #[error("Expected {expected}, got {found_kind} '{found_lexeme}'")]
    Unexpected {
        expected: String,
        found_kind: &'static str,
        found_lexeme: String,
    },
    #[error("expected a statement, got {found_kind} '{found_lexeme}'")]
    ExpectedStatement {
        found_kind: &'static str,
        found_lexeme: String,
    },
    #[error("'{0}' is reserved and has no statement form")]
    ReservedWord(&'static str),
    #[error("expected an expression, got {found_kind} '{found_lexeme}'")]
    ExpectedExpression {
        found_kind: &'static str,
        found_lexeme: String,
    },
    #[error("comparisons cannot be chained")]
    ChainedComparison,
    #[error("'{0}' is not a type name (expected String, Number, Money, Date or Boolean)")]
    BadTypeName(String),
    #[error("qualified name '{0}' must have exactly one dot")]
    BadQualifiedName(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub span: Span,
    /// Optional "did you mean" hint, filled by the parser from the keyword
    /// set.
    pub suggestion: Option<String>,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, span: Span) -> Self {
        ParseError { kind, span, suggestion: None }
    }

    pub fn with_suggestion(mut self, suggestion: Option<String>) -> Self {
        self.suggestion = suggestion;
        self
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.span.line, self.span.column, self.kind)?;
        if let Some(hint) = &self.suggestion {
            write!(f, " (did you mean '{hint}'?)")?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TypeErrorKind {
    #[error("unknown table '{0}'")]
    UnknownTable(String),
    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),
    #[error("unknown column '{column}' on table '{table}'")]
    UnknownColumn { table: String, column: String },
    #[error("currency mismatch: {left} vs {right}")]
    CurrencyMismatch { left: Currency, right: Currency },
    #[error("predicate must be a boolean, found {found}")]
    NotBoolean { found: String },
    #[error("sort key of type {found} is not orderable")]
    NotOrderable { found: String },
    #[error("cannot apply '{op}' to {left} and {right}")]
    BadOperands {
        op: &'static str,
        left: String,
        right: String,
    },
    #[error("cannot apply '{op}' to {operand}")]
    BadUnaryOperand { op: &'static str, operand: String },
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("{function}() expects {expected} argument(s), got {found}")]
    WrongArity {
        function: String,
        expected: usize,
        found: usize,
    },
    #[error("aggregate '{0}' is only allowed in Group aggregations")]
    AggregateOutsideGroup(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeError {
    pub kind: TypeErrorKind,
    pub span: Span,
    pub suggestion: Option<String>,
}

impl TypeError {
    pub fn new(kind: TypeErrorKind, span: Span) -> Self {
        TypeError { kind, span, suggestion: None }
    }

    pub fn with_suggestion(mut self, suggestion: Option<String>) -> Self {
        self.suggestion = suggestion;
        self
    }
}

impl std::fmt::Display for TypeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.span.line, self.span.column, self.kind)?;
        if let Some(hint) = &self.suggestion {
            write!(f, " (did you mean '{hint}'?)")?;
        }
        Ok(())
    }
}

impl std::error::Error for TypeError {}

/// A provider failure or evaluation failure surfaced at run time.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct RuntimeError {
    pub message: String,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        RuntimeError { message: message.into() }
    }
}

/// The editor-facing JSON envelope:
/// `{"ok": false, "error": "<file>:<line>:<col>: <message>"}`.
pub fn error_json(file: &str, located_message: &str) -> String {
    serde_json::json!({
        "ok": false,
        "error": format!("{file}:{located_message}"),
    })
    .to_string()
}
