//! The effect surface the interpreter drives.
//!
//! [`EffectProvider`] has one method per opcode (the `control.*` records
//! never reach a provider — blocks execute in the interpreter). Two
//! implementations ship with the crate: [`DryRunProvider`], which succeeds
//! with synthetic empty results and never raises, and [`MemoryProvider`],
//! an in-memory workbook with a real table algebra and recording web
//! stubs, which backs the end-to-end tests.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};

use thiserror::Error;

use crate::error::RuntimeError;
use crate::eval::{self, Scope};
use crate::ir::ExprNode;
use crate::value::{CellValue, Row, Table};

/// A provider failure, surfaced as a runtime error unless an `On error`
/// handler is armed.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct EffectError {
    pub message: String,
}

impl EffectError {
    pub fn new(message: impl Into<String>) -> Self {
        EffectError { message: message.into() }
    }
}

impl From<RuntimeError> for EffectError {
    fn from(err: RuntimeError) -> Self {
        EffectError { message: err.message }
    }
}

pub type EffectResult = Result<CellValue, EffectError>;

/// An argument after interpreter resolution. Row-scoped expressions stay
/// unevaluated — the provider applies them per row through [`eval`].
#[derive(Debug, Clone)]
pub enum ResolvedValue {
    Value(CellValue),
    Expr(ExprNode),
    ExprList(Vec<ExprNode>),
    Aggregations(Vec<(String, ExprNode)>),
}

impl std::fmt::Display for ResolvedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolvedValue::Value(value) => write!(f, "{value}"),
            ResolvedValue::Expr(expr) => write!(f, "{expr}"),
            ResolvedValue::ExprList(exprs) => {
                for (i, expr) in exprs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{expr}")?;
                }
                Ok(())
            }
            ResolvedValue::Aggregations(aggs) => {
                for (i, (name, expr)) in aggs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name} = {expr}")?;
                }
                Ok(())
            }
        }
    }
}

/// The resolved argument mapping handed to every provider method.
#[derive(Debug, Clone, Default)]
pub struct ResolvedArgs {
    entries: BTreeMap<String, ResolvedValue>,
}

impl ResolvedArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ResolvedValue) {
        self.entries.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&ResolvedValue> {
        self.entries.get(name)
    }

    pub fn value(&self, name: &str) -> Result<&CellValue, EffectError> {
        match self.get(name) {
            Some(ResolvedValue::Value(value)) => Ok(value),
            _ => Err(EffectError::new(format!("missing argument '{name}'"))),
        }
    }

    pub fn text(&self, name: &str) -> Result<&str, EffectError> {
        match self.value(name)? {
            CellValue::Str(s) => Ok(s),
            other => Err(EffectError::new(format!(
                "argument '{name}' must be a string, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn table(&self, name: &str) -> Result<&Table, EffectError> {
        match self.value(name)? {
            CellValue::Table(table) => Ok(table),
            other => Err(EffectError::new(format!(
                "argument '{name}' must be a table, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn flag(&self, name: &str) -> Result<bool, EffectError> {
        match self.value(name)? {
            CellValue::Bool(b) => Ok(*b),
            other => Err(EffectError::new(format!(
                "argument '{name}' must be a boolean, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn expr(&self, name: &str) -> Result<&ExprNode, EffectError> {
        match self.get(name) {
            Some(ResolvedValue::Expr(expr)) => Ok(expr),
            _ => Err(EffectError::new(format!("missing expression argument '{name}'"))),
        }
    }

    pub fn exprs(&self, name: &str) -> Result<&[ExprNode], EffectError> {
        match self.get(name) {
            Some(ResolvedValue::ExprList(exprs)) => Ok(exprs),
            _ => Err(EffectError::new(format!("missing expression list '{name}'"))),
        }
    }

    pub fn aggregations(&self, name: &str) -> Result<&[(String, ExprNode)], EffectError> {
        match self.get(name) {
            Some(ResolvedValue::Aggregations(aggs)) => Ok(aggs),
            _ => Err(EffectError::new(format!("missing aggregations '{name}'"))),
        }
    }

    /// Human-readable rendering for the trace.
    pub fn rendered(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect()
    }
}

/// One method per opcode; each takes the resolved args and returns a value
/// or an error. Implementations own their external resources for the
/// lifetime of a single run.
pub trait EffectProvider {
    fn open_workbook(&mut self, args: &ResolvedArgs) -> EffectResult;
    fn read_table(&mut self, args: &ResolvedArgs) -> EffectResult;
    fn export(&mut self, args: &ResolvedArgs) -> EffectResult;
    fn add_column(&mut self, args: &ResolvedArgs) -> EffectResult;
    fn filter(&mut self, args: &ResolvedArgs) -> EffectResult;
    fn sort(&mut self, args: &ResolvedArgs) -> EffectResult;
    fn group(&mut self, args: &ResolvedArgs) -> EffectResult;
    fn join(&mut self, args: &ResolvedArgs) -> EffectResult;
    /// Notification only; the interpreter owns the binding.
    fn set_var(&mut self, _args: &ResolvedArgs) -> EffectResult {
        Ok(CellValue::Null)
    }
    fn call_result(&mut self, args: &ResolvedArgs) -> EffectResult;
    fn use_system(&mut self, args: &ResolvedArgs) -> EffectResult;
    fn login(&mut self, args: &ResolvedArgs) -> EffectResult;
    fn logout(&mut self, args: &ResolvedArgs) -> EffectResult;
    fn goto_page(&mut self, args: &ResolvedArgs) -> EffectResult;
    fn enter(&mut self, args: &ResolvedArgs) -> EffectResult;
    fn click(&mut self, args: &ResolvedArgs) -> EffectResult;
    fn extract(&mut self, args: &ResolvedArgs) -> EffectResult;
}

/// Succeeds with synthetic empty results and performs no side effects.
/// The primary harness for exercising the pipeline without I/O.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunProvider;

impl DryRunProvider {
    pub fn new() -> Self {
        DryRunProvider
    }

    fn empty_table(&self, args: &ResolvedArgs, name_arg: &str) -> EffectResult {
        let name = match args.value(name_arg) {
            Ok(CellValue::Str(s)) => s.clone(),
            Ok(CellValue::Table(t)) => t.name.clone(),
            _ => String::new(),
        };
        Ok(CellValue::Table(Table::empty(name)))
    }
}

impl EffectProvider for DryRunProvider {
    fn open_workbook(&mut self, _args: &ResolvedArgs) -> EffectResult {
        Ok(CellValue::Null)
    }

    fn read_table(&mut self, args: &ResolvedArgs) -> EffectResult {
        self.empty_table(args, "name")
    }

    fn export(&mut self, _args: &ResolvedArgs) -> EffectResult {
        Ok(CellValue::Null)
    }

    fn add_column(&mut self, args: &ResolvedArgs) -> EffectResult {
        self.empty_table(args, "table")
    }

    fn filter(&mut self, args: &ResolvedArgs) -> EffectResult {
        self.empty_table(args, "table")
    }

    fn sort(&mut self, args: &ResolvedArgs) -> EffectResult {
        self.empty_table(args, "table")
    }

    fn group(&mut self, args: &ResolvedArgs) -> EffectResult {
        self.empty_table(args, "table")
    }

    fn join(&mut self, args: &ResolvedArgs) -> EffectResult {
        self.empty_table(args, "left")
    }

    fn call_result(&mut self, _args: &ResolvedArgs) -> EffectResult {
        Ok(CellValue::Null)
    }

    fn use_system(&mut self, _args: &ResolvedArgs) -> EffectResult {
        Ok(CellValue::Null)
    }

    fn login(&mut self, _args: &ResolvedArgs) -> EffectResult {
        Ok(CellValue::Null)
    }

    fn logout(&mut self, _args: &ResolvedArgs) -> EffectResult {
        Ok(CellValue::Null)
    }

    fn goto_page(&mut self, _args: &ResolvedArgs) -> EffectResult {
        Ok(CellValue::Null)
    }

    fn enter(&mut self, _args: &ResolvedArgs) -> EffectResult {
        Ok(CellValue::Null)
    }

    fn click(&mut self, _args: &ResolvedArgs) -> EffectResult {
        Ok(CellValue::Null)
    }

    fn extract(&mut self, _args: &ResolvedArgs) -> EffectResult {
        Ok(CellValue::Null)
    }
}

/// In-memory workbook plus recording web stubs. Sheets are seeded up
/// front; the table algebra is real and runs on [`eval`].
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    sheets: HashMap<String, Table>,
    pub workbook: Option<String>,
    pub exports: Vec<(String, CellValue)>,
    pub pages: Vec<String>,
    pub clicks: Vec<String>,
    pub entered: Vec<(String, CellValue)>,
    pub logged_in: bool,
    pub system: Option<(String, String)>,
    extracts: HashMap<String, CellValue>,
    call_results: VecDeque<CellValue>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a sheet from column names and row values.
    pub fn with_sheet(mut self, sheet: &str, columns: &[&str], rows: Vec<Vec<CellValue>>) -> Self {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let rows = rows
            .into_iter()
            .map(|values| {
                columns
                    .iter()
                    .cloned()
                    .zip(values)
                    .collect::<Row>()
            })
            .collect();
        self.sheets.insert(
            sheet.to_string(),
            Table::new(sheet.to_string(), columns, rows),
        );
        self
    }

    /// Preset the value `web.extract` yields for a selector.
    pub fn with_extract(mut self, selector: &str, value: CellValue) -> Self {
        self.extracts.insert(selector.to_string(), value);
        self
    }

    /// Queue a value for the next `call_result`.
    pub fn with_call_result(mut self, value: CellValue) -> Self {
        self.call_results.push_back(value);
        self
    }

    pub fn export_to(&self, path: &str) -> Option<&CellValue> {
        self.exports
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, v)| v)
    }

    fn predicate_holds(
        on: &ExprNode,
        scope: &Scope<'_>,
    ) -> Result<bool, EffectError> {
        match eval::evaluate(on, scope)? {
            CellValue::Bool(b) => Ok(b),
            CellValue::Null => Ok(false),
            other => Err(EffectError::new(format!(
                "predicate evaluated to {}, not a boolean",
                other.type_name()
            ))),
        }
    }
}

impl EffectProvider for MemoryProvider {
    fn open_workbook(&mut self, args: &ResolvedArgs) -> EffectResult {
        self.workbook = Some(args.text("path")?.to_string());
        Ok(CellValue::Null)
    }

    fn read_table(&mut self, args: &ResolvedArgs) -> EffectResult {
        let sheet = args.text("sheet")?;
        let name = args.text("name")?;
        // The seeded sheet is the authority; the range is trusted to match.
        let table = self
            .sheets
            .get(sheet)
            .cloned()
            .ok_or_else(|| EffectError::new(format!("unknown sheet '{sheet}'")))?;
        Ok(CellValue::Table(table.renamed(name)))
    }

    fn export(&mut self, args: &ResolvedArgs) -> EffectResult {
        let path = args.text("path")?.to_string();
        let source = args.value("source")?.clone();
        self.exports.push((path, source));
        Ok(CellValue::Null)
    }

    fn add_column(&mut self, args: &ResolvedArgs) -> EffectResult {
        let table = args.table("table")?;
        let column = args.text("column")?.to_string();
        let expr = args.expr("expr")?;
        let binding = table.name.clone();
        let mut rows = Vec::with_capacity(table.rows.len());
        for row in &table.rows {
            let scope = Scope::with_row(&binding, row);
            let value = eval::evaluate(expr, &scope)?;
            let mut row = row.clone();
            row.insert(column.clone(), value);
            rows.push(row);
        }
        let mut columns = table.columns.clone();
        if !columns.contains(&column) {
            columns.push(column);
        }
        Ok(CellValue::Table(Table::new(binding, columns, rows)))
    }

    fn filter(&mut self, args: &ResolvedArgs) -> EffectResult {
        let table = args.table("table")?;
        let predicate = args.expr("predicate")?;
        let binding = table.name.clone();
        let mut rows = Vec::new();
        for row in &table.rows {
            let scope = Scope::with_row(&binding, row);
            if Self::predicate_holds(predicate, &scope)? {
                rows.push(row.clone());
            }
        }
        Ok(CellValue::Table(Table::new(binding, table.columns.clone(), rows)))
    }

    fn sort(&mut self, args: &ResolvedArgs) -> EffectResult {
        let table = args.table("table")?;
        let key = args.expr("key")?;
        let ascending = args.flag("ascending")?;
        let binding = table.name.clone();
        let mut keyed = Vec::with_capacity(table.rows.len());
        for row in &table.rows {
            let scope = Scope::with_row(&binding, row);
            keyed.push((eval::evaluate(key, &scope)?, row.clone()));
        }
        // Stable sort; an incomparable pair keeps source order.
        keyed.sort_by(|a, b| {
            let ordering = eval::compare(&a.0, &b.0).unwrap_or(Ordering::Equal);
            if ascending {
                ordering
            } else {
                ordering.reverse()
            }
        });
        let rows = keyed.into_iter().map(|(_, row)| row).collect();
        Ok(CellValue::Table(Table::new(binding, table.columns.clone(), rows)))
    }

    fn group(&mut self, args: &ResolvedArgs) -> EffectResult {
        let table = args.table("table")?;
        let keys = args.exprs("keys")?;
        let aggregations = args.aggregations("aggregations")?;
        let binding = table.name.clone();

        // Bucket rows by key tuple, first-seen order.
        let mut groups: Vec<(Vec<CellValue>, Vec<Row>)> = Vec::new();
        for row in &table.rows {
            let scope = Scope::with_row(&binding, row);
            let mut key_values = Vec::with_capacity(keys.len());
            for key in keys {
                key_values.push(eval::evaluate(key, &scope)?);
            }
            match groups.iter_mut().find(|(k, _)| *k == key_values) {
                Some((_, rows)) => rows.push(row.clone()),
                None => groups.push((key_values, vec![row.clone()])),
            }
        }

        let key_names: Vec<String> = keys
            .iter()
            .enumerate()
            .map(|(i, key)| key_column_name(key, i))
            .collect();
        let mut columns = key_names.clone();
        columns.extend(aggregations.iter().map(|(name, _)| name.clone()));

        let mut rows = Vec::with_capacity(groups.len());
        for (key_values, group_rows) in groups {
            let mut row = Row::new();
            for (name, value) in key_names.iter().zip(key_values) {
                row.insert(name.clone(), value);
            }
            for (name, expr) in aggregations {
                let value = match expr {
                    ExprNode::Call { function, args } if args.len() == 1 => {
                        eval::evaluate_aggregate(function, &args[0], &binding, &group_rows)?
                    }
                    _ => {
                        return Err(EffectError::new(format!(
                            "aggregation '{name}' must be a single-argument aggregate call"
                        )));
                    }
                };
                row.insert(name.clone(), value);
            }
            rows.push(row);
        }
        Ok(CellValue::Table(Table::new(binding, columns, rows)))
    }

    fn join(&mut self, args: &ResolvedArgs) -> EffectResult {
        let left = args.table("left")?;
        let right = args.table("right")?;
        let on = args.expr("on")?;

        let mut columns = left.columns.clone();
        for column in &right.columns {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }

        let mut rows = Vec::new();
        for left_row in &left.rows {
            for right_row in &right.rows {
                let scope =
                    Scope::with_row(&left.name, left_row).push_row(&right.name, right_row);
                if Self::predicate_holds(on, &scope)? {
                    let mut merged = left_row.clone();
                    for (column, value) in right_row {
                        merged.entry(column.clone()).or_insert_with(|| value.clone());
                    }
                    rows.push(merged);
                }
            }
        }
        Ok(CellValue::Table(Table::new(left.name.clone(), columns, rows)))
    }

    fn call_result(&mut self, _args: &ResolvedArgs) -> EffectResult {
        Ok(self.call_results.pop_front().unwrap_or(CellValue::Null))
    }

    fn use_system(&mut self, args: &ResolvedArgs) -> EffectResult {
        self.system = Some((
            args.text("name")?.to_string(),
            args.text("version")?.to_string(),
        ));
        Ok(CellValue::Null)
    }

    fn login(&mut self, _args: &ResolvedArgs) -> EffectResult {
        self.logged_in = true;
        Ok(CellValue::Null)
    }

    fn logout(&mut self, _args: &ResolvedArgs) -> EffectResult {
        self.logged_in = false;
        Ok(CellValue::Null)
    }

    fn goto_page(&mut self, args: &ResolvedArgs) -> EffectResult {
        self.pages.push(args.text("page")?.to_string());
        Ok(CellValue::Null)
    }

    fn enter(&mut self, args: &ResolvedArgs) -> EffectResult {
        let field = args.text("field")?.to_string();
        let value = args.value("value")?.clone();
        self.entered.push((field, value));
        Ok(CellValue::Null)
    }

    fn click(&mut self, args: &ResolvedArgs) -> EffectResult {
        self.clicks.push(args.text("field")?.to_string());
        Ok(CellValue::Null)
    }

    fn extract(&mut self, args: &ResolvedArgs) -> EffectResult {
        let field = args.text("field")?;
        Ok(self.extracts.get(field).cloned().unwrap_or(CellValue::Null))
    }
}

/// The output column a group key is named after.
fn key_column_name(key: &ExprNode, index: usize) -> String {
    match key {
        ExprNode::Col { column, .. } => column.clone(),
        ExprNode::Ref(name) => name.clone(),
        _ => format!("key_{index}"),
    }
}
