//! The intermediate representation: a linear list of opcode records.
//!
//! The JSON form is a stable interface (the editor and the CLI `lower`
//! command both consume it), so `Serialize` is written by hand to pin the
//! wire shape exactly: money amounts as strings, `{"ref"}` / `{"table"}` /
//! `{"table","column"}` wrappers for references, `{"expr"}` for expression
//! trees and `{"block"}` for nested records. Args live in a `BTreeMap`, so
//! serialisation is byte-deterministic.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::token::{CellRange, Currency};

/// The closed opcode set. Adding a variant forces every exhaustive match —
/// the interpreter dispatch and the explainer templates — to handle it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OpCode {
    ExcelOpenWorkbook,
    ExcelReadTable,
    ExcelExport,
    TableAddColumn,
    TableFilter,
    TableSort,
    TableGroup,
    TableJoin,
    SetVar,
    CallResult,
    WebUseSystem,
    WebLogin,
    WebLogout,
    WebGotoPage,
    WebEnter,
    WebClick,
    WebExtract,
    ControlForEach,
    ControlIf,
    ControlOnError,
}

impl OpCode {
    pub fn as_str(self) -> &'static str {
        match self {
            OpCode::ExcelOpenWorkbook => "excel.open_workbook",
            OpCode::ExcelReadTable => "excel.read_table",
            OpCode::ExcelExport => "excel.export",
            OpCode::TableAddColumn => "table.add_column",
            OpCode::TableFilter => "table.filter",
            OpCode::TableSort => "table.sort",
            OpCode::TableGroup => "table.group",
            OpCode::TableJoin => "table.join",
            OpCode::SetVar => "set_var",
            OpCode::CallResult => "call_result",
            OpCode::WebUseSystem => "web.use_system",
            OpCode::WebLogin => "web.login",
            OpCode::WebLogout => "web.logout",
            OpCode::WebGotoPage => "web.goto_page",
            OpCode::WebEnter => "web.enter",
            OpCode::WebClick => "web.click",
            OpCode::WebExtract => "web.extract",
            OpCode::ControlForEach => "control.for_each",
            OpCode::ControlIf => "control.if",
            OpCode::ControlOnError => "control.on_error",
        }
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One IR record: an opcode plus named arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct OpRecord {
    pub op: OpCode,
    pub args: BTreeMap<String, Value>,
}

impl OpRecord {
    pub fn new(op: OpCode) -> Self {
        OpRecord { op, args: BTreeMap::new() }
    }

    pub fn arg(mut self, name: &str, value: Value) -> Self {
        self.args.insert(name.to_string(), value);
        self
    }
}

/// Argument values.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Literal(Scalar),
    VarRef(String),
    TableRef(String),
    ColRef { table: String, column: String },
    ExprTree(ExprNode),
    Block(Vec<OpRecord>),
    /// Multiple values in one argument (`table.group` keys/aggregations).
    List(Vec<Value>),
}

/// Scalar constants appearing in records and expression trees.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Str(String),
    Number(f64),
    Bool(bool),
    Money { currency: Currency, amount: Decimal },
    Date(NaiveDate),
    Range(CellRange),
}

/// An owned expression tree, lowered verbatim from the AST — no folding,
/// same operator tags.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprNode {
    Literal(Scalar),
    /// A variable (or row-scoped column) reference by name.
    Ref(String),
    Col { table: String, column: String },
    Binary {
        op: String,
        left: Box<ExprNode>,
        right: Box<ExprNode>,
    },
    Unary { op: String, operand: Box<ExprNode> },
    Call { function: String, args: Vec<ExprNode> },
}

/// Render a whole IR as its stable JSON form.
pub fn to_json(records: &[OpRecord]) -> String {
    serde_json::to_string_pretty(records).expect("IR serialisation cannot fail")
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Null => f.write_str("null"),
            Scalar::Str(s) => write!(f, "\"{s}\""),
            Scalar::Number(n) => f.write_str(&crate::value::format_number(*n)),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Money { currency, amount } => write!(f, "{currency} {amount}"),
            Scalar::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            Scalar::Range(range) => write!(f, "{range}"),
        }
    }
}

impl std::fmt::Display for ExprNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExprNode::Literal(scalar) => write!(f, "{scalar}"),
            ExprNode::Ref(name) => f.write_str(name),
            ExprNode::Col { table, column } => write!(f, "{table}.{column}"),
            ExprNode::Binary { op, left, right } => write!(f, "({left} {op} {right})"),
            ExprNode::Unary { op, operand } => match op.as_str() {
                "not" => write!(f, "(not {operand})"),
                _ => write!(f, "({op}{operand})"),
            },
            ExprNode::Call { function, args } => {
                write!(f, "{function}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
        }
    }
}

impl Serialize for OpRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("op", self.op.as_str())?;
        map.serialize_entry("args", &self.args)?;
        map.end()
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Scalar::Null => serializer.serialize_unit(),
            Scalar::Str(s) => serializer.serialize_str(s),
            Scalar::Number(n) => serializer.serialize_f64(*n),
            Scalar::Bool(b) => serializer.serialize_bool(*b),
            Scalar::Money { currency, amount } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("currency", currency.code())?;
                // A string amount preserves scale exactly.
                map.serialize_entry("amount", &amount.to_string())?;
                map.end()
            }
            Scalar::Date(date) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("date", &date.format("%Y-%m-%d").to_string())?;
                map.end()
            }
            Scalar::Range(range) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("range", &range.to_string())?;
                map.end()
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Literal(scalar) => scalar.serialize(serializer),
            Value::VarRef(name) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("ref", name)?;
                map.end()
            }
            Value::TableRef(name) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("table", name)?;
                map.end()
            }
            Value::ColRef { table, column } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("table", table)?;
                map.serialize_entry("column", column)?;
                map.end()
            }
            Value::ExprTree(node) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("expr", node)?;
                map.end()
            }
            Value::Block(records) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("block", records)?;
                map.end()
            }
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

impl Serialize for ExprNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ExprNode::Literal(scalar) => scalar.serialize(serializer),
            ExprNode::Ref(name) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("ref", name)?;
                map.end()
            }
            ExprNode::Col { table, column } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("table", table)?;
                map.serialize_entry("column", column)?;
                map.end()
            }
            ExprNode::Binary { op, left, right } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("op", op)?;
                map.serialize_entry("left", left)?;
                map.serialize_entry("right", right)?;
                map.end()
            }
            ExprNode::Unary { op, operand } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("op", op)?;
                map.serialize_entry("operand", operand)?;
                map.end()
            }
            ExprNode::Call { function, args } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("call", function)?;
                map.serialize_entry("args", args)?;
                map.end()
            }
        }
    }
}
