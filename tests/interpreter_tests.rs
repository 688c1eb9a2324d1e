//! Interpreter behaviour against both providers: dry-run traces, the
//! in-memory table algebra, `On error` handling and cancellation.

use eac::{
    compile, run, run_with_cancel, CancelToken, CellValue, Currency, DryRunProvider,
    MemoryProvider, OpCode,
};

fn money(amount: &str) -> CellValue {
    CellValue::Money { currency: Currency::Usd, amount: amount.parse().unwrap() }
}

fn str_value(s: &str) -> CellValue {
    CellValue::Str(s.to_string())
}

/// Three open items, one of them settled.
fn open_items() -> MemoryProvider {
    MemoryProvider::new().with_sheet(
        "Open Items",
        &["Customer", "Balance"],
        vec![
            vec![str_value("acme"), money("120.00")],
            vec![str_value("globex"), money("0.00")],
            vec![str_value("initech"), money("45.50")],
        ],
    )
}

const AGING_REPORT: &str = "Open workbook \"a.xlsx\".\n\
                            In sheet \"Open Items\", treat range A1G999 as table O.\n\
                            Set today to date \"2026-02-11\".\n\
                            Filter O where O.Balance > USD 0.00.\n\
                            Export O to \"out.csv\".\n";

#[test]
fn empty_ir_runs_to_an_empty_trace() {
    let ir = compile("").unwrap();
    let outcome = run(&ir, &mut DryRunProvider::new());
    assert!(outcome.is_ok());
    assert!(outcome.trace.is_empty());
}

#[test]
fn dry_run_produces_one_entry_per_record_and_never_raises() {
    let ir = compile(AGING_REPORT).unwrap();
    let outcome = run(&ir, &mut DryRunProvider::new());
    assert!(outcome.is_ok());
    assert_eq!(outcome.trace.len(), 5);
    assert!(outcome.trace.iter().all(|entry| entry.error.is_none()));
}

#[test]
fn dry_run_traces_are_identical_modulo_duration() {
    let ir = compile(AGING_REPORT).unwrap();
    let first = run(&ir, &mut DryRunProvider::new());
    let second = run(&ir, &mut DryRunProvider::new());
    assert_eq!(first.trace.len(), second.trace.len());
    for (a, b) in first.trace.iter().zip(second.trace.iter()) {
        assert_eq!(a.op, b.op);
        assert_eq!(a.args, b.args);
        assert_eq!(a.result, b.result);
        assert_eq!(a.error, b.error);
    }
}

#[test]
fn dry_run_resolves_args_into_the_trace() {
    let ir = compile(AGING_REPORT).unwrap();
    let outcome = run(&ir, &mut DryRunProvider::new());
    let filter = &outcome.trace[3];
    assert_eq!(filter.op, OpCode::TableFilter);
    assert_eq!(filter.args["predicate"], "(O.Balance > USD 0.00)");
    assert_eq!(filter.args["table"], "<table O (0 rows)>");
}

#[test]
fn memory_provider_filters_and_exports_real_rows() {
    let ir = compile(AGING_REPORT).unwrap();
    let mut provider = open_items();
    let outcome = run(&ir, &mut provider);
    assert!(outcome.is_ok(), "error: {:?}", outcome.error);
    assert_eq!(provider.workbook.as_deref(), Some("a.xlsx"));

    let Some(CellValue::Table(exported)) = provider.export_to("out.csv") else {
        panic!("nothing exported");
    };
    assert_eq!(exported.rows.len(), 2);
    assert_eq!(exported.rows[0]["Customer"], str_value("acme"));
    assert_eq!(exported.rows[1]["Customer"], str_value("initech"));
}

#[test]
fn filter_predicates_see_variables() {
    let source = "In sheet \"Open Items\", treat range A1G999 as table O.\n\
                  Set floor to USD 100.00.\n\
                  Filter O where O.Balance > floor.\n\
                  Export O to \"big.csv\".";
    let ir = compile(source).unwrap();
    let mut provider = open_items();
    let outcome = run(&ir, &mut provider);
    assert!(outcome.is_ok(), "error: {:?}", outcome.error);
    let Some(CellValue::Table(exported)) = provider.export_to("big.csv") else {
        panic!("nothing exported");
    };
    assert_eq!(exported.rows.len(), 1);
    assert_eq!(exported.rows[0]["Customer"], str_value("acme"));
}

#[test]
fn add_column_derives_money_values() {
    let source = "In sheet \"Open Items\", treat range A1G999 as table O.\n\
                  Add column Doubled to O as O.Balance * 2.\n\
                  Export O to \"o.csv\".";
    let ir = compile(source).unwrap();
    let mut provider = open_items();
    let outcome = run(&ir, &mut provider);
    assert!(outcome.is_ok(), "error: {:?}", outcome.error);
    let Some(CellValue::Table(exported)) = provider.export_to("o.csv") else {
        panic!("nothing exported");
    };
    assert_eq!(exported.rows[0]["Doubled"], money("240.00"));
    assert!(exported.columns.contains(&"Doubled".to_string()));
}

#[test]
fn sort_descending_by_balance() {
    let source = "In sheet \"Open Items\", treat range A1G999 as table O.\n\
                  Sort O by O.Balance descending.\n\
                  Export O to \"o.csv\".";
    let ir = compile(source).unwrap();
    let mut provider = open_items();
    run(&ir, &mut provider);
    let Some(CellValue::Table(exported)) = provider.export_to("o.csv") else {
        panic!("nothing exported");
    };
    assert_eq!(exported.rows[0]["Balance"], money("120.00"));
    assert_eq!(exported.rows[2]["Balance"], money("0.00"));
}

#[test]
fn group_aggregates_by_key() {
    let provider = MemoryProvider::new().with_sheet(
        "S",
        &["Region", "Amount"],
        vec![
            vec![str_value("north"), CellValue::Number(10.0)],
            vec![str_value("south"), CellValue::Number(3.0)],
            vec![str_value("north"), CellValue::Number(5.0)],
        ],
    );
    let source = "In sheet \"S\", treat range A1G999 as table T.\n\
                  Group T by T.Region as total = sum(T.Amount), n = count(T.Amount).\n\
                  Export T to \"g.csv\".";
    let ir = compile(source).unwrap();
    let mut provider = provider;
    let outcome = run(&ir, &mut provider);
    assert!(outcome.is_ok(), "error: {:?}", outcome.error);
    let Some(CellValue::Table(exported)) = provider.export_to("g.csv") else {
        panic!("nothing exported");
    };
    assert_eq!(exported.rows.len(), 2);
    assert_eq!(exported.rows[0]["Region"], str_value("north"));
    assert_eq!(exported.rows[0]["total"], CellValue::Number(15.0));
    assert_eq!(exported.rows[0]["n"], CellValue::Number(2.0));
}

#[test]
fn join_merges_matching_rows() {
    let provider = MemoryProvider::new()
        .with_sheet(
            "L",
            &["k", "a"],
            vec![
                vec![CellValue::Number(1.0), str_value("one")],
                vec![CellValue::Number(2.0), str_value("two")],
            ],
        )
        .with_sheet(
            "R",
            &["k", "b"],
            vec![vec![CellValue::Number(2.0), str_value("deux")]],
        );
    let source = "In sheet \"L\", treat range A1B9 as table L.\n\
                  In sheet \"R\", treat range A1B9 as table R.\n\
                  Join L and R where L.k = R.k.\n\
                  Export L to \"j.csv\".";
    let ir = compile(source).unwrap();
    let mut provider = provider;
    let outcome = run(&ir, &mut provider);
    assert!(outcome.is_ok(), "error: {:?}", outcome.error);
    let Some(CellValue::Table(exported)) = provider.export_to("j.csv") else {
        panic!("nothing exported");
    };
    assert_eq!(exported.rows.len(), 1);
    assert_eq!(exported.rows[0]["a"], str_value("two"));
    assert_eq!(exported.rows[0]["b"], str_value("deux"));
}

#[test]
fn for_each_expands_its_body_per_row() {
    let source = "In sheet \"Open Items\", treat range A1G999 as table O.\n\
                  For each row r in O:\n    Enter \"amount\" = r.Balance.\n    Click \"submit\".\n";
    let ir = compile(source).unwrap();
    let mut provider = open_items();
    let outcome = run(&ir, &mut provider);
    assert!(outcome.is_ok(), "error: {:?}", outcome.error);
    assert_eq!(provider.entered.len(), 3);
    assert_eq!(provider.entered[0].1, money("120.00"));
    assert_eq!(provider.clicks.len(), 3);
    // read_table + for_each + 3 × (enter + click)
    assert_eq!(outcome.trace.len(), 8);
}

#[test]
fn if_chooses_the_right_branch() {
    let source = "Set x to 1.\n\
                  If x > 0:\n    Click \"yes\".\nOtherwise:\n    Click \"no\".\n";
    let ir = compile(source).unwrap();
    let mut provider = MemoryProvider::new();
    let outcome = run(&ir, &mut provider);
    assert!(outcome.is_ok(), "error: {:?}", outcome.error);
    assert_eq!(provider.clicks, vec!["yes".to_string()]);
    // set_var, if, click — the untaken branch leaves no trace.
    assert_eq!(outcome.trace.len(), 3);
    assert_eq!(outcome.trace[1].result, CellValue::Bool(true));
}

#[test]
fn unhandled_provider_error_halts_the_run() {
    let source = "In sheet \"missing\", treat range A1A1 as table T.\nLog in.";
    let ir = compile(source).unwrap();
    let mut provider = MemoryProvider::new();
    let outcome = run(&ir, &mut provider);
    assert!(outcome.error.is_some());
    assert_eq!(outcome.trace.len(), 1);
    assert!(outcome.trace[0].error.as_deref().unwrap().contains("unknown sheet"));
    assert!(!provider.logged_in);
}

#[test]
fn on_error_handles_the_next_statement_and_continues() {
    let source = "On error: Click \"recover\".\n\
                  In sheet \"missing\", treat range A1A1 as table T.\n\
                  Log in.";
    let ir = compile(source).unwrap();
    let mut provider = MemoryProvider::new();
    let outcome = run(&ir, &mut provider);
    assert!(outcome.is_ok(), "error: {:?}", outcome.error);
    // on_error, failing read_table, handler click, login.
    assert_eq!(outcome.trace.len(), 4);
    assert!(outcome.trace[1].error.is_some());
    assert_eq!(provider.clicks, vec!["recover".to_string()]);
    assert!(provider.logged_in);
}

#[test]
fn on_error_covers_exactly_one_statement() {
    let source = "On error: Click \"recover\".\n\
                  Log in.\n\
                  In sheet \"missing\", treat range A1A1 as table T.";
    let ir = compile(source).unwrap();
    let mut provider = MemoryProvider::new();
    let outcome = run(&ir, &mut provider);
    // The handler was consumed by the successful `Log in`; the failure two
    // statements later halts the run.
    assert!(outcome.error.is_some());
    assert!(provider.clicks.is_empty());
}

#[test]
fn handled_error_appears_in_the_trace() {
    let source = "On error: Log out.\n\
                  In sheet \"missing\", treat range A1A1 as table T.";
    let ir = compile(source).unwrap();
    let mut provider = MemoryProvider::new();
    let outcome = run(&ir, &mut provider);
    assert!(outcome.is_ok());
    let failed = outcome
        .trace
        .iter()
        .find(|entry| entry.op == OpCode::ExcelReadTable)
        .unwrap();
    assert!(failed.error.is_some());
}

#[test]
fn extract_and_call_result_bind_variables() {
    let source = "Extract ref from field \"confirmation\".\n\
                  Call result status.\n\
                  Enter \"echo\" = ref.\n\
                  Enter \"status\" = status.";
    let ir = compile(source).unwrap();
    let mut provider = MemoryProvider::new()
        .with_extract("confirmation", str_value("OK-42"))
        .with_call_result(str_value("done"));
    let outcome = run(&ir, &mut provider);
    assert!(outcome.is_ok(), "error: {:?}", outcome.error);
    assert_eq!(provider.entered[0].1, str_value("OK-42"));
    assert_eq!(provider.entered[1].1, str_value("done"));
}

#[test]
fn web_session_flow_records_in_order() {
    let source = "Use system \"SAP\" version \"4.7\".\n\
                  Log in as credential \"ops\".\n\
                  Go to page \"invoices\".\n\
                  Click \"new\".\n\
                  Log out.";
    let ir = compile(source).unwrap();
    let mut provider = MemoryProvider::new();
    let outcome = run(&ir, &mut provider);
    assert!(outcome.is_ok(), "error: {:?}", outcome.error);
    assert_eq!(provider.system, Some(("SAP".to_string(), "4.7".to_string())));
    assert_eq!(provider.pages, vec!["invoices".to_string()]);
    assert!(!provider.logged_in); // logged out at the end
    assert_eq!(outcome.trace.len(), 5);
}

#[test]
fn cancellation_stops_between_records() {
    let ir = compile("Log in.\nLog out.").unwrap();
    let token = CancelToken::new();
    token.cancel();
    let outcome = run_with_cancel(&ir, &mut DryRunProvider::new(), token);
    assert!(outcome.cancelled);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.trace.len(), 1);
    assert_eq!(outcome.trace[0].error.as_deref(), Some("cancelled"));
}

#[test]
fn dry_run_for_each_over_an_empty_table_skips_the_body() {
    let source = "In sheet \"S\", treat range A1G999 as table T.\n\
                  For each row r in T:\n    Click \"never\".\n";
    let ir = compile(source).unwrap();
    let outcome = run(&ir, &mut DryRunProvider::new());
    assert!(outcome.is_ok());
    // read_table + for_each; the body never runs over zero rows.
    assert_eq!(outcome.trace.len(), 2);
}

#[test]
fn rebinding_a_table_is_observed_by_later_records() {
    // Filter shrinks O; the second export sees the shrunk table.
    let source = "In sheet \"Open Items\", treat range A1G999 as table O.\n\
                  Export O to \"before.csv\".\n\
                  Filter O where O.Balance > USD 0.00.\n\
                  Export O to \"after.csv\".";
    let ir = compile(source).unwrap();
    let mut provider = open_items();
    let outcome = run(&ir, &mut provider);
    assert!(outcome.is_ok(), "error: {:?}", outcome.error);
    let Some(CellValue::Table(before)) = provider.export_to("before.csv") else { panic!() };
    let Some(CellValue::Table(after)) = provider.export_to("after.csv") else { panic!() };
    assert_eq!(before.rows.len(), 3);
    assert_eq!(after.rows.len(), 2);
}
