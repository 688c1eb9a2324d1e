//! End-to-end pipeline coverage: source text through parse, check, lower
//! and the stable IR JSON form.

use eac::{compile, explain, parse_source, to_json, CompileError, OpCode};

const AGING_REPORT: &str = "Open workbook \"a.xlsx\".\n\
                            In sheet \"Open Items\", treat range A1G999 as table O.\n\
                            Set today to date \"2026-02-11\".\n\
                            Filter O where O.Balance > USD 0.00.\n\
                            Export O to \"out.csv\".\n";

fn opcodes(source: &str) -> Vec<OpCode> {
    compile(source).expect("compilation failed").iter().map(|r| r.op).collect()
}

#[test]
fn empty_program_compiles_to_empty_ir() {
    let ir = compile("").unwrap();
    assert!(ir.is_empty());
    assert_eq!(parse_source("").unwrap(), 0);
}

#[test]
fn open_only_program_has_the_documented_json() {
    let ir = compile("Open workbook \"data/x.xlsx\".").unwrap();
    let json = serde_json::to_string(&ir).unwrap();
    assert_eq!(
        json,
        r#"[{"op":"excel.open_workbook","args":{"path":"data/x.xlsx"}}]"#
    );
}

#[test]
fn aging_report_lowers_to_five_records_in_order() {
    assert_eq!(
        opcodes(AGING_REPORT),
        vec![
            OpCode::ExcelOpenWorkbook,
            OpCode::ExcelReadTable,
            OpCode::SetVar,
            OpCode::TableFilter,
            OpCode::ExcelExport,
        ]
    );
}

#[test]
fn ir_count_is_at_least_statement_count() {
    let count = parse_source(AGING_REPORT).unwrap();
    let ir = compile(AGING_REPORT).unwrap();
    assert!(ir.len() >= count);
}

#[test]
fn lowering_is_deterministic() {
    let first = to_json(&compile(AGING_REPORT).unwrap());
    let second = to_json(&compile(AGING_REPORT).unwrap());
    assert_eq!(first, second);
}

#[test]
fn column_references_resolve_to_an_earlier_read_table() {
    let ops = opcodes(AGING_REPORT);
    let read = ops.iter().position(|op| *op == OpCode::ExcelReadTable).unwrap();
    let filter = ops.iter().position(|op| *op == OpCode::TableFilter).unwrap();
    assert!(read < filter);
}

#[test]
fn set_and_use_fails_with_unknown_table_at_statement_two() {
    let source = "Set today to date \"2026-02-11\".\nAdd column D to T as today.";
    let CompileError::Check(errors) = compile(source).unwrap_err() else {
        panic!("expected a type error");
    };
    assert_eq!(errors.len(), 1);
    assert!(errors[0].to_string().contains("unknown table 'T'"));
    assert_eq!(errors[0].span.line, 2);
}

#[test]
fn missing_trailing_period_is_the_canonical_parse_error() {
    let CompileError::Parse(errors) = compile("Filter T where T.x > 0").unwrap_err() else {
        panic!("expected a parse error");
    };
    let message = errors[0].to_string();
    assert!(message.contains("Expected ., got EOF"), "got: {message}");
    // The location is the end-of-input column.
    assert_eq!(errors[0].span.line, 1);
    assert_eq!(errors[0].span.column, 23);
}

#[test]
fn locally_consistent_currencies_compile() {
    let source = "In sheet \"S\", treat range A1G999 as table T.\n\
                  Filter T where T.a > EUR 1.00 and T.b > USD 2.00.";
    assert!(compile(source).is_ok());
}

#[test]
fn mixed_currency_addition_is_rejected_at_the_operator() {
    let source = "In sheet \"S\", treat range A1G999 as table T.\n\
                  Filter T where T.a > EUR 1.00 + USD 2.00.";
    let CompileError::Check(errors) = compile(source).unwrap_err() else {
        panic!("expected a type error");
    };
    assert!(errors[0].to_string().contains("currency mismatch"));
    assert_eq!(errors[0].span.line, 2);
}

#[test]
fn single_cell_range_is_valid_and_inverted_range_is_not() {
    assert!(compile("In sheet \"S\", treat range A1A1 as table T.").is_ok());
    let err = compile("In sheet \"S\", treat range B1A1 as table T.").unwrap_err();
    assert!(matches!(err, CompileError::Lex(_)));
}

#[test]
fn money_json_preserves_the_amount_as_a_string() {
    let ir = compile(
        "In sheet \"S\", treat range A1G999 as table T.\n\
         Filter T where T.Balance > USD 1_000.50.",
    )
    .unwrap();
    let json = to_json(&ir);
    assert!(json.contains("\"currency\": \"USD\""));
    assert!(json.contains("\"amount\": \"1000.50\""));
}

#[test]
fn date_json_wrapper() {
    let ir = compile("Set today to date \"2026-02-11\".").unwrap();
    let json = to_json(&ir);
    assert!(json.contains("\"date\": \"2026-02-11\""));
}

#[test]
fn range_json_wrapper() {
    let ir = compile("In sheet \"S\", treat range A1G999 as table T.").unwrap();
    let json = to_json(&ir);
    assert!(json.contains("\"range\": \"A1G999\""));
}

#[test]
fn define_lowers_to_a_null_set_var() {
    let ir = compile("Define x as Number.").unwrap();
    assert_eq!(ir.len(), 1);
    assert_eq!(ir[0].op, OpCode::SetVar);
    let json = serde_json::to_string(&ir[0]).unwrap();
    assert_eq!(json, r#"{"op":"set_var","args":{"name":"x","value":null}}"#);
}

#[test]
fn on_error_lowers_to_its_own_record() {
    let source = "On error: Log out.\nLog in.";
    let ops = opcodes(source);
    assert_eq!(ops, vec![OpCode::ControlOnError, OpCode::WebLogin]);
    let ir = compile(source).unwrap();
    let json = serde_json::to_string(&ir[0]).unwrap();
    assert!(json.contains(r#""block":[{"op":"web.logout""#));
}

#[test]
fn for_each_nests_its_body_as_a_block() {
    let source = "In sheet \"S\", treat range A1G999 as table T.\n\
                  For each row r in T:\n    Click \"next\".\n";
    let ir = compile(source).unwrap();
    assert_eq!(ir.len(), 2);
    assert_eq!(ir[1].op, OpCode::ControlForEach);
    let json = serde_json::to_string(&ir[1]).unwrap();
    assert!(json.contains(r#""block":[{"op":"web.click""#));
    assert!(json.contains(r#""var":"r""#));
}

#[test]
fn group_lowers_keys_and_aggregations_as_lists() {
    let source = "In sheet \"S\", treat range A1G999 as table T.\n\
                  Group T by T.Region as total = sum(T.Balance).";
    let ir = compile(source).unwrap();
    assert_eq!(ir[1].op, OpCode::TableGroup);
    let json = serde_json::to_string(&ir[1]).unwrap();
    assert!(json.contains(r#""keys":[{"expr""#), "got: {json}");
    assert!(json.contains(r#""aggregations":[["total""#), "got: {json}");
}

#[test]
fn join_lowers_both_table_refs() {
    let source = "In sheet \"S\", treat range A1G999 as table L.\n\
                  In sheet \"S2\", treat range A1G999 as table R.\n\
                  Join L and R where L.k = R.k.";
    let ir = compile(source).unwrap();
    assert_eq!(ir[2].op, OpCode::TableJoin);
    let json = serde_json::to_string(&ir[2]).unwrap();
    assert!(json.contains(r#""left":{"table":"L"}"#));
    assert!(json.contains(r#""right":{"table":"R"}"#));
}

#[test]
fn predicates_lower_verbatim_without_folding() {
    let ir = compile(
        "In sheet \"S\", treat range A1G999 as table T.\nFilter T where 1 + 2 > 2.",
    )
    .unwrap();
    let json = serde_json::to_string(&ir[1]).unwrap();
    // 1 + 2 survives as a tree; nothing folded it to 3.
    assert!(json.contains(r#"{"op":"+","left":1.0,"right":2.0}"#), "got: {json}");
}

#[test]
fn explain_is_total_and_deterministic_for_the_aging_report() {
    let ir = compile(AGING_REPORT).unwrap();
    let text = explain(&ir);
    assert_eq!(text.lines().count(), 5);
    assert!(text.contains("Open the workbook \"a.xlsx\"."));
    assert!(text.contains("Keep the rows of O where"));
    assert_eq!(text, explain(&ir));
}

#[test]
fn error_json_envelope_shape() {
    let CompileError::Parse(errors) = compile("Filter T where T.x > 0").unwrap_err() else {
        panic!("expected a parse error");
    };
    let json = eac::error_json("report.eac", &errors[0].to_string());
    assert!(json.starts_with(r#"{"error":"report.eac:1:23: Expected"#));
    assert!(json.ends_with(r#""ok":false}"#));
}
