//! Inverse pretty-printer: one English sentence per IR record.
//!
//! Total and idempotent — every opcode has a fixed template, a malformed
//! record renders with `?` placeholders, and nothing here can fail. Nested
//! blocks indent by two spaces. This is informational output; it does not
//! round-trip back into the language.

use crate::ir::{OpCode, OpRecord, Scalar, Value};

pub fn explain(records: &[OpRecord]) -> String {
    let mut out = String::new();
    write_records(&mut out, records, 0);
    out
}

fn write_records(out: &mut String, records: &[OpRecord], depth: usize) {
    for record in records {
        write_record(out, record, depth);
    }
}

fn write_record(out: &mut String, record: &OpRecord, depth: usize) {
    let indent = "  ".repeat(depth);
    out.push_str(&indent);
    out.push_str(&sentence(record));
    out.push('\n');

    match record.op {
        OpCode::ControlForEach => {
            if let Some(Value::Block(body)) = record.args.get("body") {
                write_records(out, body, depth + 1);
            }
        }
        OpCode::ControlIf => {
            if let Some(Value::Block(body)) = record.args.get("then") {
                write_records(out, body, depth + 1);
            }
            if let Some(Value::Block(body)) = record.args.get("else") {
                out.push_str(&indent);
                out.push_str("Otherwise:\n");
                write_records(out, body, depth + 1);
            }
        }
        OpCode::ControlOnError => {
            if let Some(Value::Block(body)) = record.args.get("action") {
                write_records(out, body, depth + 1);
            }
        }
        _ => {}
    }
}

fn sentence(record: &OpRecord) -> String {
    let arg = |name: &str| render(record.args.get(name));
    let name = |key: &str| render_name(record.args.get(key));

    match record.op {
        OpCode::ExcelOpenWorkbook => format!("Open the workbook {}.", arg("path")),
        OpCode::ExcelReadTable => format!(
            "Read range {} of sheet {} as table {}.",
            name("range"),
            arg("sheet"),
            name("name"),
        ),
        OpCode::ExcelExport => format!("Export {} to {}.", name("source"), arg("path")),
        OpCode::TableAddColumn => format!(
            "Add a column {} to table {}, computed as {}.",
            name("column"),
            name("table"),
            arg("expr"),
        ),
        OpCode::TableFilter => format!(
            "Keep the rows of {} where {}.",
            name("table"),
            arg("predicate"),
        ),
        OpCode::TableSort => {
            let direction = match record.args.get("ascending") {
                Some(Value::Literal(Scalar::Bool(false))) => "descending",
                _ => "ascending",
            };
            format!(
                "Sort {} by {}, {direction}.",
                name("table"),
                arg("key"),
            )
        }
        OpCode::TableGroup => format!(
            "Group {} by {}, computing {}.",
            name("table"),
            arg("keys"),
            arg("aggregations"),
        ),
        OpCode::TableJoin => format!(
            "Join {} with {} where {}.",
            name("left"),
            name("right"),
            arg("on"),
        ),
        OpCode::SetVar => format!("Set {} to {}.", name("name"), arg("value")),
        OpCode::CallResult => format!("Store the pending call result in {}.", name("name")),
        OpCode::WebUseSystem => format!(
            "Use system {}, version {}.",
            arg("name"),
            arg("version"),
        ),
        OpCode::WebLogin => match record.args.get("credential") {
            Some(credential) => {
                format!("Log in with credential {}.", render(Some(credential)))
            }
            None => "Log in.".to_string(),
        },
        OpCode::WebLogout => "Log out.".to_string(),
        OpCode::WebGotoPage => format!("Go to page {}.", arg("page")),
        OpCode::WebEnter => format!("Enter {} into field {}.", arg("value"), arg("field")),
        OpCode::WebClick => format!("Click {}.", arg("field")),
        OpCode::WebExtract => format!(
            "Extract field {} into {}.",
            arg("field"),
            name("var"),
        ),
        OpCode::ControlForEach => format!(
            "For each row {} of table {}:",
            name("var"),
            name("table"),
        ),
        OpCode::ControlIf => format!("If {}:", arg("cond")),
        OpCode::ControlOnError => "If the next step fails:".to_string(),
    }
}

fn render(value: Option<&Value>) -> String {
    let Some(value) = value else {
        return "?".to_string();
    };
    match value {
        Value::Literal(scalar) => scalar.to_string(),
        Value::VarRef(name) => name.clone(),
        Value::TableRef(name) => name.clone(),
        Value::ColRef { table, column } => format!("{table}.{column}"),
        Value::ExprTree(node) => node.to_string(),
        Value::Block(records) => format!("[{} records]", records.len()),
        Value::List(items) => {
            let parts: Vec<String> = items.iter().map(|item| render(Some(item))).collect();
            parts.join(", ")
        }
    }
}

/// Like [`render`], but string literals drop their quotes — table,
/// variable and column names read better bare.
fn render_name(value: Option<&Value>) -> String {
    match value {
        Some(Value::Literal(Scalar::Str(s))) => s.clone(),
        other => render(other),
    }
}
