use bumpalo::Bump;

use crate::ast::{AstContext, BinaryOp, ExprKind, Program, StmtKind, TypeName, UnaryOp};
use crate::error::{ParseError, ParseErrorKind};
use crate::intern::Interner;
use crate::lexer::tokenize;

fn with_program<R>(src: &str, f: impl FnOnce(&Program, &Interner) -> R) -> R {
    let mut interner = Interner::new();
    let tokens = tokenize(src, &mut interner).expect("lexing failed");
    let bump = Bump::new();
    let ctx = AstContext::new(&bump);
    let program = super::parse(tokens, ctx, &mut interner).expect("parsing failed");
    f(&program, &interner)
}

fn parse_errors(src: &str) -> Vec<ParseError> {
    let mut interner = Interner::new();
    let tokens = tokenize(src, &mut interner).expect("lexing failed");
    let bump = Bump::new();
    let ctx = AstContext::new(&bump);
    super::parse(tokens, ctx, &mut interner).expect_err("parsing unexpectedly succeeded")
}

#[test]
fn empty_program_has_no_statements() {
    with_program("", |program, _| assert!(program.stmts.is_empty()));
}

#[test]
fn comment_only_program_is_empty() {
    with_program("-- nothing to see\n\n-- still nothing\n", |program, _| {
        assert!(program.stmts.is_empty())
    });
}

#[test]
fn open_workbook_parses() {
    with_program("Open workbook \"data/x.xlsx\".", |program, interner| {
        assert_eq!(program.stmts.len(), 1);
        let StmtKind::OpenWorkbook { path } = &program.stmts[0].kind else {
            panic!("wrong kind");
        };
        assert_eq!(interner.resolve(*path), "data/x.xlsx");
    });
}

#[test]
fn aging_report_skeleton_parses_in_order() {
    let src = "Open workbook \"a.xlsx\". \
               In sheet \"Open Items\", treat range A1G999 as table O. \
               Set today to date \"2026-02-11\". \
               Filter O where O.Balance > USD 0.00. \
               Export O to \"out.csv\".";
    with_program(src, |program, _| {
        assert_eq!(program.stmts.len(), 5);
        assert!(matches!(program.stmts[0].kind, StmtKind::OpenWorkbook { .. }));
        assert!(matches!(program.stmts[1].kind, StmtKind::TreatRange { .. }));
        assert!(matches!(program.stmts[2].kind, StmtKind::SetVar { .. }));
        assert!(matches!(program.stmts[3].kind, StmtKind::Filter { .. }));
        assert!(matches!(program.stmts[4].kind, StmtKind::Export { .. }));
    });
}

#[test]
fn statements_carry_their_first_token_location() {
    with_program("Open workbook \"a.xlsx\".\nLog out.", |program, _| {
        assert_eq!(program.stmts[0].span.line, 1);
        assert_eq!(program.stmts[0].span.column, 1);
        assert_eq!(program.stmts[1].span.line, 2);
    });
}

#[test]
fn missing_period_is_the_canonical_error() {
    let errors = parse_errors("Filter T where T.x > 0");
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        &errors[0].kind,
        ParseErrorKind::Unexpected { expected, found_kind, .. }
            if expected == "." && *found_kind == "EOF"
    ));
    assert!(errors[0].to_string().contains("Expected ., got EOF"));
}

#[test]
fn missing_period_points_at_the_next_token() {
    let errors = parse_errors("Log out Log out.");
    assert!(matches!(
        &errors[0].kind,
        ParseErrorKind::Unexpected { expected, found_lexeme, .. }
            if expected == "." && found_lexeme == "Log"
    ));
    assert_eq!(errors[0].span.column, 9);
}

#[test]
fn chained_comparison_is_rejected() {
    let errors = parse_errors("Filter T where T.a > 1 > 2.");
    assert!(errors
        .iter()
        .any(|e| matches!(e.kind, ParseErrorKind::ChainedComparison)));
}

#[test]
fn sort_defaults_to_ascending() {
    with_program("Sort T by T.Balance.", |program, _| {
        assert!(matches!(
            program.stmts[0].kind,
            StmtKind::Sort { ascending: true, .. }
        ));
    });
    with_program("Sort T by T.Balance descending.", |program, _| {
        assert!(matches!(
            program.stmts[0].kind,
            StmtKind::Sort { ascending: false, .. }
        ));
    });
}

#[test]
fn for_each_body_is_indentation_delimited() {
    let src = "For each row r in T:\n    Click \"next\".\n    Click \"save\".\nLog out.";
    with_program(src, |program, _| {
        assert_eq!(program.stmts.len(), 2);
        let StmtKind::ForEach { body, .. } = &program.stmts[0].kind else {
            panic!("wrong kind");
        };
        assert_eq!(body.len(), 2);
        assert!(matches!(program.stmts[1].kind, StmtKind::LogOut));
    });
}

#[test]
fn if_with_otherwise_parses_both_blocks() {
    let src = "If x > 0:\n    Log out.\nOtherwise:\n    Click \"retry\".\n";
    with_program(src, |program, _| {
        let StmtKind::If { then_body, else_body, .. } = &program.stmts[0].kind else {
            panic!("wrong kind");
        };
        assert_eq!(then_body.len(), 1);
        assert_eq!(else_body.unwrap().len(), 1);
    });
}

#[test]
fn nested_blocks_parse() {
    let src = "For each row r in T:\n    If r.x > 0:\n        Click \"go\".\n";
    with_program(src, |program, _| {
        let StmtKind::ForEach { body, .. } = &program.stmts[0].kind else {
            panic!("wrong kind");
        };
        assert!(matches!(body[0].kind, StmtKind::If { .. }));
    });
}

#[test]
fn on_error_accepts_an_inline_statement() {
    with_program("On error: Log out.", |program, _| {
        let StmtKind::OnError { action } = &program.stmts[0].kind else {
            panic!("wrong kind");
        };
        assert_eq!(action.len(), 1);
        assert!(matches!(action[0].kind, StmtKind::LogOut));
    });
}

#[test]
fn on_error_accepts_an_indented_block() {
    with_program("On error:\n    Log out.\n", |program, _| {
        let StmtKind::OnError { action } = &program.stmts[0].kind else {
            panic!("wrong kind");
        };
        assert_eq!(action.len(), 1);
    });
}

#[test]
fn group_parses_keys_and_aggregations() {
    let src = "Group T by T.Region, T.Status as total = sum(T.Balance), n = count(T.Id).";
    with_program(src, |program, interner| {
        let StmtKind::Group { keys, aggregations, .. } = &program.stmts[0].kind else {
            panic!("wrong kind");
        };
        assert_eq!(keys.len(), 2);
        assert_eq!(aggregations.len(), 2);
        assert_eq!(interner.resolve(aggregations[0].name), "total");
        assert!(matches!(aggregations[0].expr.kind, ExprKind::Call { .. }));
    });
}

#[test]
fn join_parses() {
    with_program("Join L and R where L.k = R.k.", |program, _| {
        assert!(matches!(program.stmts[0].kind, StmtKind::Join { .. }));
    });
}

#[test]
fn log_in_variants() {
    with_program("Log in.", |program, _| {
        assert!(matches!(
            program.stmts[0].kind,
            StmtKind::LogIn { credential: None }
        ));
    });
    with_program("Log in as credential \"ops\".", |program, interner| {
        let StmtKind::LogIn { credential: Some(cred) } = &program.stmts[0].kind else {
            panic!("wrong kind");
        };
        assert_eq!(interner.resolve(*cred), "ops");
    });
    with_program("Log out.", |program, _| {
        assert!(matches!(program.stmts[0].kind, StmtKind::LogOut));
    });
}

#[test]
fn web_statements_parse() {
    let src = "Use system \"SAP\" version \"4.7\". Go to page \"invoices\". \
               Enter \"amount\" = T.Balance. Click \"submit\". \
               Extract ref from field \"confirmation\". Call result ref.";
    with_program(src, |program, _| {
        assert_eq!(program.stmts.len(), 6);
        assert!(matches!(program.stmts[0].kind, StmtKind::UseSystem { .. }));
        assert!(matches!(program.stmts[1].kind, StmtKind::GoToPage { .. }));
        assert!(matches!(program.stmts[2].kind, StmtKind::EnterField { .. }));
        assert!(matches!(program.stmts[3].kind, StmtKind::Click { .. }));
        assert!(matches!(program.stmts[4].kind, StmtKind::Extract { .. }));
        assert!(matches!(program.stmts[5].kind, StmtKind::Call { .. }));
    });
}

#[test]
fn define_parses_type_names() {
    with_program("Define x as Number.", |program, _| {
        assert!(matches!(
            program.stmts[0].kind,
            StmtKind::Define { ty: TypeName::Number, .. }
        ));
    });
    let errors = parse_errors("Define x as Widget.");
    assert!(matches!(errors[0].kind, ParseErrorKind::BadTypeName(_)));
}

#[test]
fn reserved_words_are_rejected_with_a_clear_error() {
    let errors = parse_errors("Wait until true.");
    assert!(matches!(errors[0].kind, ParseErrorKind::ReservedWord("Wait")));
}

#[test]
fn statement_typo_gets_a_suggestion() {
    let errors = parse_errors("Fliter T where T.x > 0.");
    assert_eq!(errors[0].suggestion.as_deref(), Some("Filter"));
}

#[test]
fn qualified_name_with_two_dots_is_rejected() {
    let errors = parse_errors("Filter T where A.B.C > 0.");
    assert!(matches!(errors[0].kind, ParseErrorKind::BadQualifiedName(_)));
}

#[test]
fn multiplication_binds_tighter_than_addition() {
    with_program("Set x to 1 + 2 * 3.", |program, _| {
        let StmtKind::SetVar { value, .. } = &program.stmts[0].kind else {
            panic!("wrong kind");
        };
        let ExprKind::Binary { op: BinaryOp::Add, right, .. } = &value.kind else {
            panic!("expected + at the root, got {:?}", value.kind);
        };
        assert!(matches!(
            right.kind,
            ExprKind::Binary { op: BinaryOp::Mul, .. }
        ));
    });
}

#[test]
fn not_binds_tighter_than_and() {
    with_program("Set x to not a and b.", |program, _| {
        let StmtKind::SetVar { value, .. } = &program.stmts[0].kind else {
            panic!("wrong kind");
        };
        let ExprKind::Binary { op: BinaryOp::And, left, .. } = &value.kind else {
            panic!("expected and at the root");
        };
        assert!(matches!(
            left.kind,
            ExprKind::Unary { op: UnaryOp::Not, .. }
        ));
    });
}

#[test]
fn unary_minus_parses_negative_literals() {
    with_program("Set x to -5.", |program, _| {
        let StmtKind::SetVar { value, .. } = &program.stmts[0].kind else {
            panic!("wrong kind");
        };
        assert!(matches!(
            value.kind,
            ExprKind::Unary { op: UnaryOp::Neg, .. }
        ));
    });
}

#[test]
fn parenthesised_expressions_override_precedence() {
    with_program("Set x to (1 + 2) * 3.", |program, _| {
        let StmtKind::SetVar { value, .. } = &program.stmts[0].kind else {
            panic!("wrong kind");
        };
        let ExprKind::Binary { op: BinaryOp::Mul, left, .. } = &value.kind else {
            panic!("expected * at the root");
        };
        assert!(matches!(
            left.kind,
            ExprKind::Binary { op: BinaryOp::Add, .. }
        ));
    });
}

#[test]
fn recovery_reports_multiple_errors() {
    let errors = parse_errors("Filter where x.\nSort T by.\nLog out.");
    assert!(errors.len() >= 2);
}
