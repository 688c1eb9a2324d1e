//! EAC — "English as Code" — is a controlled natural language for
//! spreadsheet-centric business automations. A source file is a sequence
//! of period-terminated sentences:
//!
//! ```text
//! Open workbook "a.xlsx".
//! In sheet "Open Items", treat range A1G999 as table O.
//! Set today to date "2026-02-11".
//! Filter O where O.Balance > USD 0.00.
//! Export O to "out.csv".
//! ```
//!
//! The crate compiles such text into a deterministic IR (an ordered list
//! of opcode records, with a stable JSON form) and executes the IR against
//! a pluggable [`EffectProvider`], producing a step-by-step trace. The
//! pipeline is strictly staged: lexer → parser → type checker → lowering →
//! interpreter, with an [`explain`] pass that renders IR back to English.
//!
//! ```ignore
//! let ir = eac::compile(source)?;
//! let outcome = eac::run(&ir, &mut eac::DryRunProvider::new());
//! println!("{}", eac::to_json(&ir));
//! ```

pub mod ast;
pub mod check;
#[cfg(feature = "cli")]
pub mod cli;
pub mod error;
pub mod eval;
pub mod explain;
pub mod intern;
pub mod ir;
pub mod lexer;
pub mod lower;
pub mod parser;
pub mod provider;
pub mod suggest;
pub mod token;
pub mod types;
pub mod value;
pub mod interpreter;

pub use ast::{AstContext, Program};
pub use check::check;
pub use error::{error_json, LexError, ParseError, RuntimeError, TypeError};
pub use explain::explain;
pub use intern::{Interner, Symbol};
pub use interpreter::{
    run, run_with_cancel, CancelToken, Environment, RunOutcome, TraceEntry,
};
pub use ir::{to_json, ExprNode, OpCode, OpRecord, Scalar, Value};
pub use lexer::tokenize;
pub use lower::lower;
pub use parser::parse;
pub use provider::{
    DryRunProvider, EffectError, EffectProvider, EffectResult, MemoryProvider, ResolvedArgs,
    ResolvedValue,
};
pub use token::{CellRange, Currency, Keyword, Punct, Span, Token, TokenKind};
pub use types::{SymbolTable, Type};
pub use value::{CellValue, Row, Table};

/// Why a compilation stopped: the lexer stops at its first error, the
/// parser and checker report everything they collected.
#[derive(Debug)]
pub enum CompileError {
    Lex(LexError),
    Parse(Vec<ParseError>),
    Check(Vec<TypeError>),
}

impl CompileError {
    /// Every located message, one per diagnostic, `line:col:` first.
    pub fn messages(&self) -> Vec<String> {
        match self {
            CompileError::Lex(err) => vec![err.to_string()],
            CompileError::Parse(errs) => errs.iter().map(|e| e.to_string()).collect(),
            CompileError::Check(errs) => errs.iter().map(|e| e.to_string()).collect(),
        }
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.messages().join("\n"))
    }
}

impl std::error::Error for CompileError {}

/// Front half of the pipeline: source text through the parser. Returns
/// the number of top-level statements.
pub fn parse_source(source: &str) -> Result<usize, CompileError> {
    let mut interner = Interner::new();
    let tokens = lexer::tokenize(source, &mut interner).map_err(CompileError::Lex)?;
    let bump = bumpalo::Bump::new();
    let ctx = AstContext::new(&bump);
    let program = parser::parse(tokens, ctx, &mut interner).map_err(CompileError::Parse)?;
    Ok(program.stmts.len())
}

/// The whole front end: source text to IR. The AST arena lives and dies
/// inside this call; the returned records are self-contained.
pub fn compile(source: &str) -> Result<Vec<OpRecord>, CompileError> {
    let mut interner = Interner::new();
    let tokens = lexer::tokenize(source, &mut interner).map_err(CompileError::Lex)?;
    let bump = bumpalo::Bump::new();
    let ctx = AstContext::new(&bump);
    let program = parser::parse(tokens, ctx, &mut interner).map_err(CompileError::Parse)?;
    let symtab = check::check(&program, &interner).map_err(CompileError::Check)?;
    Ok(lower::lower(&program, &symtab, &interner))
}
