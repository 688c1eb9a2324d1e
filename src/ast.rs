//! Statement and expression AST.
//!
//! Nodes are arena-allocated and borrow their children; a [`Program`] is
//! only valid while the bump arena behind its [`AstContext`] is alive. The
//! statement and expression sets are closed — downstream passes dispatch
//! exhaustively and a new variant is a compile error everywhere it matters.

use bumpalo::Bump;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::intern::Symbol;
use crate::token::{CellRange, Currency, Span};

/// A parsed source file: top-level statements in source order.
#[derive(Debug)]
pub struct Program<'a> {
    pub stmts: Block<'a>,
}

/// A sequence of statements (a whole program or an indented block).
pub type Block<'a> = &'a [Stmt<'a>];

/// A statement plus the location of its first token.
#[derive(Debug)]
pub struct Stmt<'a> {
    pub kind: StmtKind<'a>,
    pub span: Span,
}

#[derive(Debug)]
pub enum StmtKind<'a> {
    /// `Open workbook "path".`
    OpenWorkbook { path: Symbol },
    /// `In sheet "S", treat range A1G999 as table T.`
    TreatRange {
        sheet: Symbol,
        range: CellRange,
        table: Symbol,
    },
    /// `Set x to expr.`
    SetVar { name: Symbol, value: &'a Expr<'a> },
    /// `Add column C to T as expr.`
    AddColumn {
        column: Symbol,
        table: Symbol,
        expr: &'a Expr<'a>,
    },
    /// `Filter T where predicate.`
    Filter { table: Symbol, predicate: &'a Expr<'a> },
    /// `Sort T by key ascending.`
    Sort {
        table: Symbol,
        key: &'a Expr<'a>,
        ascending: bool,
    },
    /// `Group T by k1, k2 as name = agg(expr), … .`
    Group {
        table: Symbol,
        keys: &'a [&'a Expr<'a>],
        aggregations: &'a [Aggregation<'a>],
    },
    /// `Join L and R where predicate.`
    Join {
        left: Symbol,
        right: Symbol,
        on: &'a Expr<'a>,
    },
    /// `Export source to "path".`
    Export { source: &'a Expr<'a>, path: Symbol },
    /// `For each row r in T:` + indented block.
    ForEach {
        var: Symbol,
        table: Symbol,
        body: Block<'a>,
    },
    /// `If cond:` block, optional `Otherwise:` block.
    If {
        cond: &'a Expr<'a>,
        then_body: Block<'a>,
        else_body: Option<Block<'a>>,
    },
    /// `Use system "name" version "v".`
    UseSystem { name: Symbol, version: Symbol },
    /// `Log in.` / `Log in as credential "c".`
    LogIn { credential: Option<Symbol> },
    /// `Log out.`
    LogOut,
    /// `Go to page "name".`
    GoToPage { name: Symbol },
    /// `Enter "selector" = expr.`
    EnterField { selector: Symbol, value: &'a Expr<'a> },
    /// `Click "selector".`
    Click { selector: Symbol },
    /// `Extract x from field "selector".`
    Extract { var: Symbol, selector: Symbol },
    /// `Define x as TypeName.`
    Define { name: Symbol, ty: TypeName },
    /// `Call result x.`
    Call { result: Symbol },
    /// `On error:` handler for the next statement only.
    OnError { action: Block<'a> },
}

/// One `name = agg(expr)` clause of a `Group` statement.
#[derive(Debug)]
pub struct Aggregation<'a> {
    pub name: Symbol,
    pub expr: &'a Expr<'a>,
}

/// Declarable types for `Define`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeName {
    String,
    Number,
    Money,
    Date,
    Boolean,
}

impl TypeName {
    pub fn from_word(word: &str) -> Option<TypeName> {
        match word {
            "String" => Some(TypeName::String),
            "Number" => Some(TypeName::Number),
            "Money" => Some(TypeName::Money),
            "Date" => Some(TypeName::Date),
            "Boolean" => Some(TypeName::Boolean),
            _ => None,
        }
    }
}

/// An expression plus its source location.
#[derive(Debug)]
pub struct Expr<'a> {
    pub kind: ExprKind<'a>,
    pub span: Span,
}

#[derive(Debug)]
pub enum ExprKind<'a> {
    Literal(Literal),
    /// A bare name: a variable, a table, or (in row context) a column.
    Identifier(Symbol),
    /// `T.Balance` — also `r.Balance` for a row variable `r`.
    ColumnRef { table: Symbol, column: Symbol },
    Binary {
        op: BinaryOp,
        left: &'a Expr<'a>,
        right: &'a Expr<'a>,
    },
    Unary { op: UnaryOp, operand: &'a Expr<'a> },
    /// Function-like built-ins: `today()`, `days_between(a, b)`, and the
    /// aggregates inside `Group`.
    Call {
        function: Symbol,
        args: &'a [&'a Expr<'a>],
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(Symbol),
    Number(f64),
    Money { currency: Currency, amount: Decimal },
    Date(NaiveDate),
    Boolean(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    NotEq,
    Gt,
    Lt,
    GtEq,
    LtEq,
    And,
    Or,
}

impl BinaryOp {
    /// The operator tag carried verbatim into IR expression trees.
    pub fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "!=",
            BinaryOp::Gt => ">",
            BinaryOp::Lt => "<",
            BinaryOp::GtEq => ">=",
            BinaryOp::LtEq => "<=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Gt
                | BinaryOp::Lt
                | BinaryOp::GtEq
                | BinaryOp::LtEq
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

impl UnaryOp {
    pub fn as_str(self) -> &'static str {
        match self {
            UnaryOp::Not => "not",
            UnaryOp::Neg => "-",
        }
    }
}

/// Allocation context for one parse: every node lives in a single bump
/// arena, and the helpers cover the four shapes the parser produces —
/// expressions, statement blocks, expression lists and aggregation lists.
/// None of the node types own heap values that need dropping, which is
/// what makes the bump arena safe here.
pub struct AstContext<'a> {
    bump: &'a Bump,
}

impl<'a> AstContext<'a> {
    pub fn new(bump: &'a Bump) -> Self {
        AstContext { bump }
    }

    pub fn expr(&self, kind: ExprKind<'a>, span: Span) -> &'a Expr<'a> {
        self.bump.alloc(Expr { kind, span })
    }

    pub fn block(&self, stmts: Vec<Stmt<'a>>) -> Block<'a> {
        self.bump.alloc_slice_fill_iter(stmts)
    }

    pub fn expr_list(&self, exprs: Vec<&'a Expr<'a>>) -> &'a [&'a Expr<'a>] {
        self.bump.alloc_slice_fill_iter(exprs)
    }

    pub fn agg_list(&self, aggs: Vec<Aggregation<'a>>) -> &'a [Aggregation<'a>] {
        self.bump.alloc_slice_fill_iter(aggs)
    }
}
