//! Integration tests for formula scanning, parsing and printing.

use proptest::prelude::*;
use quarry::formula::{
    self, line_col, render_diagnostic, BinaryOp, Expr, ExprKind, FormulaError, Function, Literal,
    UnaryOp,
};
use rust_decimal::Decimal;

// ============================================================================
// Parsing realistic formulas
// ============================================================================

#[test]
fn test_parse_scaled_aggregation() {
    let expr = formula::parse("2 * Max([Total])").unwrap();
    let ExprKind::BinaryOp { op, left, right } = &expr.kind else {
        panic!("expected a binary operation, got {:?}", expr.kind);
    };
    assert_eq!(*op, BinaryOp::Mul);
    assert_eq!(left.kind, ExprKind::Literal(Literal::Number(Decimal::from(2))));
    assert_eq!(right.as_ref(), &Expr::call("Max", vec![Expr::field("Total")]));
}

#[test]
fn test_parse_joined_filter() {
    let expr = formula::parse(r#"[Product → Category] = "Widget" and [Quantity] > 3"#).unwrap();
    let expected = Expr::binary(
        BinaryOp::And,
        Expr::binary(
            BinaryOp::Eq,
            Expr::field("Product → Category"),
            Expr::string("Widget"),
        ),
        Expr::binary(BinaryOp::Gt, Expr::field("Quantity"), Expr::number(3)),
    );
    assert_eq!(expr, expected);
}

#[test]
fn test_parse_not_wraps_comparison() {
    let expr = formula::parse("NOT [Discount] > 0 OR isnull([Discount])").unwrap();
    let expected = Expr::binary(
        BinaryOp::Or,
        Expr::unary(
            UnaryOp::Not,
            Expr::binary(BinaryOp::Gt, Expr::field("Discount"), Expr::number(0)),
        ),
        Expr::call("isnull", vec![Expr::field("Discount")]),
    );
    assert_eq!(expr, expected);
}

#[test]
fn test_parse_single_quoted_string() {
    let expr = formula::parse(r"concat([Title], ' \'', 'x')").unwrap();
    assert_eq!(
        expr,
        Expr::call(
            "concat",
            vec![Expr::field("Title"), Expr::string(" '"), Expr::string("x")]
        )
    );
}

#[test]
fn test_format_canonicalizes_spacing_and_parens() {
    let cases = [
        ("((1+2))*[A]", "(1 + 2) * [A]"),
        ("[A]-([B]-[C])", "[A] - ([B] - [C])"),
        ("([A]-[B])-[C]", "[A] - [B] - [C]"),
        ("not ([A] and [B])", "NOT ([A] AND [B])"),
        ("-(-[A])", "--[A]"),
        ("Sum( Total )", "Sum([Total])"),
        ("[A] = ([B] = 1)", "[A] = ([B] = 1)"),
    ];
    for (input, expected) in cases {
        let expr = formula::parse(input).unwrap();
        assert_eq!(formula::format(&expr), expected, "formatting {}", input);
    }
}

// ============================================================================
// Errors and diagnostics
// ============================================================================

#[test]
fn test_chained_comparison_is_rejected() {
    let err = formula::parse("1 < [A] < 3").unwrap_err();
    assert!(matches!(err, FormulaError::Parse(_)));
    assert_eq!(err.span(), 8..9);
}

#[test]
fn test_unterminated_reference_span() {
    let err = formula::parse("Sum([Total)").unwrap_err();
    assert!(matches!(err, FormulaError::Lex(_)));
    assert_eq!(err.span().start, 4);
    assert_eq!(err.message(), "unterminated field reference");
}

#[test]
fn test_error_position_on_second_line() {
    let source = "Sum([Total])\n  + *";
    let err = formula::parse(source).unwrap_err();
    assert_eq!(line_col(source, err.span().start), (2, 5));
}

#[test]
fn test_diagnostic_quotes_source() {
    let source = "Max([Total]) +";
    let err = formula::parse(source).unwrap_err();
    let rendered = render_diagnostic(source, err.span(), &err.message());
    assert!(rendered.contains("expected an expression, found end of input"));
    assert!(rendered.contains("Max([Total]) +"));
}

#[test]
fn test_depth_limit_is_configurable() {
    let nested = format!("{}1{}", "(".repeat(10), ")".repeat(10));
    assert!(formula::parse(&nested).is_ok());
    assert!(formula::parse_with_depth(&nested, 5).is_err());
}

// ============================================================================
// Printing round trip
// ============================================================================

fn arb_number() -> impl Strategy<Value = Expr> {
    (0i64..1_000_000, 0u32..4).prop_map(|(n, scale)| Expr::number(Decimal::new(n, scale)))
}

fn arb_leaf() -> impl Strategy<Value = Expr> {
    prop_oneof![
        arb_number(),
        "[a-zA-Z0-9 \"\\\\]{0,8}".prop_map(Expr::string),
        "[a-zA-Z][a-zA-Z0-9]{0,8}".prop_map(Expr::field),
        "[A-Z][a-z]{1,5} → [A-Z][a-z]{1,5}".prop_map(Expr::field),
    ]
}

fn arb_binary_op() -> impl Strategy<Value = BinaryOp> {
    prop::sample::select(vec![
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Mul,
        BinaryOp::Div,
        BinaryOp::Eq,
        BinaryOp::Ne,
        BinaryOp::Lt,
        BinaryOp::Le,
        BinaryOp::Gt,
        BinaryOp::Ge,
        BinaryOp::And,
        BinaryOp::Or,
    ])
}

fn arb_expr() -> impl Strategy<Value = Expr> {
    arb_leaf().prop_recursive(4, 32, 3, |inner| {
        prop_oneof![
            (arb_binary_op(), inner.clone(), inner.clone())
                .prop_map(|(op, l, r)| Expr::binary(op, l, r)),
            inner.clone().prop_map(|e| Expr::unary(UnaryOp::Neg, e)),
            inner.clone().prop_map(|e| Expr::unary(UnaryOp::Not, e)),
            (
                prop::sample::select(Function::ALL.to_vec()),
                prop::collection::vec(inner, 0..3)
            )
                .prop_map(|(f, args)| Expr::call(f.name(), args)),
        ]
    })
}

proptest! {
    #[test]
    fn prop_format_parses_back(expr in arb_expr()) {
        let printed = formula::format(&expr);
        let reparsed = formula::parse(&printed)
            .map_err(|e| TestCaseError::fail(format!("{} did not parse: {}", printed, e)))?;
        prop_assert_eq!(&reparsed, &expr, "printed as {}", printed);
    }

    #[test]
    fn prop_format_is_stable(expr in arb_expr()) {
        let once = formula::format(&expr);
        let twice = formula::format(&formula::parse(&once).unwrap());
        prop_assert_eq!(once, twice);
    }
}
