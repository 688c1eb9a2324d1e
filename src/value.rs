//! Runtime values: what flows through the interpreter, the effect
//! providers and the trace.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::token::Currency;

/// One cell of a row, a scalar variable, or a whole table. The `Row` and
/// `Table` variants let trace results carry row lists.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Str(String),
    Number(f64),
    Bool(bool),
    Money { currency: Currency, amount: Decimal },
    Date(NaiveDate),
    Row(Row),
    Table(Table),
}

/// Column name → value. A BTreeMap keeps row rendering deterministic.
pub type Row = BTreeMap<String, CellValue>;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    pub name: String,
    /// Column order as first seen; lookups go through the rows themselves.
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn empty(name: impl Into<String>) -> Self {
        Table { name: name.into(), columns: Vec::new(), rows: Vec::new() }
    }

    pub fn new(name: impl Into<String>, columns: Vec<String>, rows: Vec<Row>) -> Self {
        Table { name: name.into(), columns, rows }
    }

    /// Same data under a different binding name.
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl CellValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            CellValue::Null => "null",
            CellValue::Str(_) => "String",
            CellValue::Number(_) => "Number",
            CellValue::Bool(_) => "Boolean",
            CellValue::Money { .. } => "Money",
            CellValue::Date(_) => "Date",
            CellValue::Row(_) => "Row",
            CellValue::Table(_) => "Table",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    pub fn to_display_string(&self) -> String {
        match self {
            CellValue::Null => "null".to_string(),
            CellValue::Str(s) => format!("\"{s}\""),
            CellValue::Number(n) => format_number(*n),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Money { currency, amount } => format!("{currency} {amount}"),
            CellValue::Date(date) => date.format("%Y-%m-%d").to_string(),
            CellValue::Row(row) => {
                let fields: Vec<String> = row
                    .iter()
                    .map(|(k, v)| format!("{k}: {}", v.to_display_string()))
                    .collect();
                format!("{{{}}}", fields.join(", "))
            }
            CellValue::Table(table) => {
                format!("<table {} ({} rows)>", table.name, table.rows.len())
            }
        }
    }
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_display_string())
    }
}

pub(crate) fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}
