//! Expression-tree evaluation.
//!
//! Shared by the interpreter (eager, environment-scoped arguments) and the
//! table-algebra provider (per-row predicates and derived columns). A
//! [`Scope`] supplies variables and zero or more row bindings; lookups try
//! variables first, then row columns, matching the checker's resolution
//! order.
//!
//! Null behaves like an empty spreadsheet cell: arithmetic propagates it,
//! comparisons against it are false — except `!=`, which is true.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::Duration;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use crate::error::RuntimeError;
use crate::ir::{ExprNode, Scalar};
use crate::value::{CellValue, Row};

/// Name resolution context for one evaluation.
#[derive(Default)]
pub struct Scope<'e> {
    pub variables: Option<&'e HashMap<String, CellValue>>,
    /// Active row bindings, innermost last: `(binding name, row)`. The
    /// binding name is a table name or a `For each row` variable.
    pub rows: Vec<(&'e str, &'e Row)>,
}

impl<'e> Scope<'e> {
    pub fn with_variables(variables: &'e HashMap<String, CellValue>) -> Self {
        Scope { variables: Some(variables), rows: Vec::new() }
    }

    pub fn with_row(binding: &'e str, row: &'e Row) -> Self {
        Scope { variables: None, rows: vec![(binding, row)] }
    }

    pub fn push_row(mut self, binding: &'e str, row: &'e Row) -> Self {
        self.rows.push((binding, row));
        self
    }

    fn lookup(&self, name: &str) -> Option<CellValue> {
        if let Some(vars) = self.variables {
            if let Some(value) = vars.get(name) {
                return Some(value.clone());
            }
        }
        for (_, row) in self.rows.iter().rev() {
            if let Some(value) = row.get(name) {
                return Some(value.clone());
            }
        }
        None
    }

    fn lookup_column(&self, binding: &str, column: &str) -> Option<CellValue> {
        for (name, row) in self.rows.iter().rev() {
            if *name == binding {
                // A missing cell in a bound row is an empty cell.
                return Some(row.get(column).cloned().unwrap_or(CellValue::Null));
            }
        }
        None
    }
}

pub fn evaluate(node: &ExprNode, scope: &Scope<'_>) -> Result<CellValue, RuntimeError> {
    match node {
        ExprNode::Literal(scalar) => Ok(scalar_value(scalar)),

        ExprNode::Ref(name) => scope
            .lookup(name)
            .ok_or_else(|| RuntimeError::new(format!("unknown name '{name}'"))),

        ExprNode::Col { table, column } => {
            scope.lookup_column(table, column).ok_or_else(|| {
                RuntimeError::new(format!("no row in scope for '{table}.{column}'"))
            })
        }

        ExprNode::Binary { op, left, right } => evaluate_binary(op, left, right, scope),

        ExprNode::Unary { op, operand } => {
            let value = evaluate(operand, scope)?;
            match op.as_str() {
                "not" => Ok(CellValue::Bool(!truthy(&value)?)),
                "-" => match value {
                    CellValue::Null => Ok(CellValue::Null),
                    CellValue::Number(n) => Ok(CellValue::Number(-n)),
                    CellValue::Money { currency, amount } => {
                        Ok(CellValue::Money { currency, amount: -amount })
                    }
                    other => Err(RuntimeError::new(format!(
                        "cannot negate {}",
                        other.type_name()
                    ))),
                },
                other => Err(RuntimeError::new(format!("unknown operator '{other}'"))),
            }
        }

        ExprNode::Call { function, args } => evaluate_call(function, args, scope),
    }
}

fn evaluate_binary(
    op: &str,
    left: &ExprNode,
    right: &ExprNode,
    scope: &Scope<'_>,
) -> Result<CellValue, RuntimeError> {
    // Short-circuit before touching the right operand.
    if op == "and" {
        if !truthy(&evaluate(left, scope)?)? {
            return Ok(CellValue::Bool(false));
        }
        return Ok(CellValue::Bool(truthy(&evaluate(right, scope)?)?));
    }
    if op == "or" {
        if truthy(&evaluate(left, scope)?)? {
            return Ok(CellValue::Bool(true));
        }
        return Ok(CellValue::Bool(truthy(&evaluate(right, scope)?)?));
    }

    let lhs = evaluate(left, scope)?;
    let rhs = evaluate(right, scope)?;

    match op {
        "+" | "-" | "*" | "/" => arithmetic(op, lhs, rhs),
        "=" | "!=" | ">" | "<" | ">=" | "<=" => comparison(op, &lhs, &rhs),
        other => Err(RuntimeError::new(format!("unknown operator '{other}'"))),
    }
}

fn arithmetic(op: &str, lhs: CellValue, rhs: CellValue) -> Result<CellValue, RuntimeError> {
    use CellValue::*;

    // Empty cells poison arithmetic rather than failing the run.
    if lhs.is_null() || rhs.is_null() {
        return Ok(Null);
    }

    let incompatible = |l: &CellValue, r: &CellValue| {
        RuntimeError::new(format!(
            "cannot apply '{op}' to {} and {}",
            l.type_name(),
            r.type_name()
        ))
    };

    match (op, &lhs, &rhs) {
        ("+", Number(a), Number(b)) => Ok(Number(a + b)),
        ("-", Number(a), Number(b)) => Ok(Number(a - b)),
        ("*", Number(a), Number(b)) => Ok(Number(a * b)),
        ("/", Number(a), Number(b)) => {
            if *b == 0.0 {
                Err(RuntimeError::new("division by zero"))
            } else {
                Ok(Number(a / b))
            }
        }

        ("+", Money { currency: ca, amount: a }, Money { currency: cb, amount: b }) => {
            require_same_currency(*ca, *cb)?;
            Ok(Money { currency: *ca, amount: a + b })
        }
        ("-", Money { currency: ca, amount: a }, Money { currency: cb, amount: b }) => {
            require_same_currency(*ca, *cb)?;
            Ok(Money { currency: *ca, amount: a - b })
        }
        ("*", Money { currency, amount }, Number(n))
        | ("*", Number(n), Money { currency, amount }) => {
            let factor = Decimal::from_f64(*n)
                .ok_or_else(|| RuntimeError::new(format!("bad money factor {n}")))?;
            Ok(Money { currency: *currency, amount: amount * factor })
        }
        ("/", Money { currency, amount }, Number(n)) => {
            if *n == 0.0 {
                return Err(RuntimeError::new("division by zero"));
            }
            let divisor = Decimal::from_f64(*n)
                .ok_or_else(|| RuntimeError::new(format!("bad money divisor {n}")))?;
            Ok(Money { currency: *currency, amount: amount / divisor })
        }

        ("-", Date(a), Date(b)) => Ok(Number((*a - *b).num_days() as f64)),
        ("+", Date(a), Number(n)) | ("+", Number(n), Date(a)) => {
            Ok(Date(*a + Duration::days(*n as i64)))
        }
        ("-", Date(a), Number(n)) => Ok(Date(*a - Duration::days(*n as i64))),

        ("+", Str(a), Str(b)) => Ok(Str(format!("{a}{b}"))),

        _ => Err(incompatible(&lhs, &rhs)),
    }
}

fn comparison(op: &str, lhs: &CellValue, rhs: &CellValue) -> Result<CellValue, RuntimeError> {
    // Null compares false to everything, except `!=`.
    if lhs.is_null() || rhs.is_null() {
        return Ok(CellValue::Bool(op == "!="));
    }
    if op == "=" || op == "!=" {
        if let Some(eq) = values_equal(lhs, rhs) {
            return Ok(CellValue::Bool(if op == "=" { eq } else { !eq }));
        }
    }
    let ordering = compare(lhs, rhs)?;
    let holds = match op {
        "=" => ordering == Ordering::Equal,
        "!=" => ordering != Ordering::Equal,
        ">" => ordering == Ordering::Greater,
        "<" => ordering == Ordering::Less,
        ">=" => ordering != Ordering::Less,
        "<=" => ordering != Ordering::Greater,
        other => return Err(RuntimeError::new(format!("unknown comparison '{other}'"))),
    };
    Ok(CellValue::Bool(holds))
}

fn values_equal(lhs: &CellValue, rhs: &CellValue) -> Option<bool> {
    match (lhs, rhs) {
        (CellValue::Bool(a), CellValue::Bool(b)) => Some(a == b),
        (CellValue::Str(a), CellValue::Str(b)) => Some(a == b),
        _ => None,
    }
}

/// Ordering for comparisons and `Sort`. Null sorts before everything.
pub fn compare(lhs: &CellValue, rhs: &CellValue) -> Result<Ordering, RuntimeError> {
    use CellValue::*;
    match (lhs, rhs) {
        (Null, Null) => Ok(Ordering::Equal),
        (Null, _) => Ok(Ordering::Less),
        (_, Null) => Ok(Ordering::Greater),
        (Number(a), Number(b)) => Ok(a.partial_cmp(b).unwrap_or(Ordering::Equal)),
        (Money { currency: ca, amount: a }, Money { currency: cb, amount: b }) => {
            require_same_currency(*ca, *cb)?;
            Ok(a.cmp(b))
        }
        (Date(a), Date(b)) => Ok(a.cmp(b)),
        (Str(a), Str(b)) => Ok(a.cmp(b)),
        (Bool(a), Bool(b)) => Ok(a.cmp(b)),
        (l, r) => Err(RuntimeError::new(format!(
            "cannot compare {} with {}",
            l.type_name(),
            r.type_name()
        ))),
    }
}

fn evaluate_call(
    function: &str,
    args: &[ExprNode],
    scope: &Scope<'_>,
) -> Result<CellValue, RuntimeError> {
    match function {
        "today" => Ok(CellValue::Date(chrono::Local::now().date_naive())),
        "days_between" => {
            if args.len() != 2 {
                return Err(RuntimeError::new("days_between() expects 2 arguments"));
            }
            let a = evaluate(&args[0], scope)?;
            let b = evaluate(&args[1], scope)?;
            match (a, b) {
                (CellValue::Null, _) | (_, CellValue::Null) => Ok(CellValue::Null),
                (CellValue::Date(a), CellValue::Date(b)) => {
                    Ok(CellValue::Number((b - a).num_days().abs() as f64))
                }
                (a, b) => Err(RuntimeError::new(format!(
                    "days_between() expects dates, got {} and {}",
                    a.type_name(),
                    b.type_name()
                ))),
            }
        }
        "sum" | "avg" | "min" | "max" | "count" => Err(RuntimeError::new(format!(
            "aggregate '{function}' outside a Group"
        ))),
        other => Err(RuntimeError::new(format!("unknown function '{other}'"))),
    }
}

/// Fold an aggregate over a table's rows; used by the table-algebra
/// provider for `table.group`.
pub fn evaluate_aggregate(
    function: &str,
    arg: &ExprNode,
    binding: &str,
    rows: &[Row],
) -> Result<CellValue, RuntimeError> {
    let mut values = Vec::with_capacity(rows.len());
    for row in rows {
        let scope = Scope::with_row(binding, row);
        let value = evaluate(arg, &scope)?;
        if !value.is_null() {
            values.push(value);
        }
    }

    match function {
        "count" => Ok(CellValue::Number(values.len() as f64)),
        "min" | "max" => {
            let mut best: Option<CellValue> = None;
            for value in values {
                best = Some(match best {
                    None => value,
                    Some(current) => {
                        let ordering = compare(&value, &current)?;
                        let take = if function == "min" {
                            ordering == Ordering::Less
                        } else {
                            ordering == Ordering::Greater
                        };
                        if take {
                            value
                        } else {
                            current
                        }
                    }
                });
            }
            Ok(best.unwrap_or(CellValue::Null))
        }
        "sum" | "avg" => {
            if values.is_empty() {
                return Ok(CellValue::Null);
            }
            let count = values.len();
            let mut acc = values.remove(0);
            for value in values {
                acc = arithmetic("+", acc, value)?;
            }
            if function == "avg" {
                acc = arithmetic("/", acc, CellValue::Number(count as f64))?;
            }
            Ok(acc)
        }
        other => Err(RuntimeError::new(format!("unknown aggregate '{other}'"))),
    }
}

fn truthy(value: &CellValue) -> Result<bool, RuntimeError> {
    match value {
        CellValue::Bool(b) => Ok(*b),
        CellValue::Null => Ok(false),
        other => Err(RuntimeError::new(format!(
            "cannot use {} as a boolean",
            other.type_name()
        ))),
    }
}

pub(crate) fn scalar_value(scalar: &Scalar) -> CellValue {
    match scalar {
        Scalar::Null => CellValue::Null,
        Scalar::Str(s) => CellValue::Str(s.clone()),
        Scalar::Number(n) => CellValue::Number(*n),
        Scalar::Bool(b) => CellValue::Bool(*b),
        Scalar::Money { currency, amount } => {
            CellValue::Money { currency: *currency, amount: *amount }
        }
        Scalar::Date(d) => CellValue::Date(*d),
        Scalar::Range(r) => CellValue::Str(r.to_string()),
    }
}

fn require_same_currency(
    a: crate::token::Currency,
    b: crate::token::Currency,
) -> Result<(), RuntimeError> {
    if a == b {
        Ok(())
    } else {
        Err(RuntimeError::new(format!("currency mismatch: {a} vs {b}")))
    }
}
