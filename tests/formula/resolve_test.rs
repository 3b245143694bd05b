//! Reference resolution against contexts built from a catalog.

use quarry::context::{FieldInfo, InMemoryCatalog, QueryContext};
use quarry::formula::{self, Expr, ExprKind, Function};
use quarry::model::{
    Aggregation, Clause, ClauseKind, ClausePosition, CustomColumn, Expression, FieldId,
    Identifier, Maintainer, StructuredQuery, TableId, ValueKind,
};
use quarry::resolve::{ResolveError, Resolver};

/// Orders carries its own Price as well as a foreign key to Products,
/// which has a Price too.
fn catalog() -> InMemoryCatalog {
    InMemoryCatalog::new()
        .with_table(
            1,
            "Orders",
            vec![
                FieldInfo::new(10, "ID", ValueKind::Numeric),
                FieldInfo::new(11, "Product ID", ValueKind::Numeric).references(TableId(2)),
                FieldInfo::new(12, "Price", ValueKind::Numeric),
                FieldInfo::new(13, "Total", ValueKind::Numeric),
            ],
        )
        .with_table(
            2,
            "Products",
            vec![
                FieldInfo::new(20, "ID", ValueKind::Numeric),
                FieldInfo::new(21, "Price", ValueKind::Numeric),
                FieldInfo::new(22, "Category", ValueKind::String),
            ],
        )
}

fn orders() -> StructuredQuery {
    StructuredQuery::new(TableId(1))
}

fn resolve_at(
    query: &StructuredQuery,
    position: ClausePosition,
    source: &str,
) -> Result<Expr, ResolveError> {
    let catalog = catalog();
    let ctx = QueryContext::at(query, &catalog, position).unwrap();
    Resolver::new(&ctx).resolve(&formula::parse(source).unwrap())
}

fn resolve(source: &str) -> Result<Expr, ResolveError> {
    resolve_at(&orders(), ClausePosition::custom_column(0), source)
}

fn target(expr: &Expr) -> Option<Identifier> {
    expr.field_refs()[0].target.clone()
}

// ============================================================================
// Paths
// ============================================================================

#[test]
fn test_joined_field_by_path() {
    let expr = resolve("[Product → Price]").unwrap();
    assert_eq!(
        target(&expr),
        Some(Identifier::ForeignField {
            fk: FieldId(11),
            field: FieldId(21)
        })
    );
    // The text the user typed is kept.
    assert_eq!(formula::format(&expr), "[Product → Price]");
}

#[test]
fn test_source_field_by_table_path() {
    let expr = resolve("[Orders → Price]").unwrap();
    assert_eq!(target(&expr), Some(Identifier::Field(FieldId(12))));
}

#[test]
fn test_bare_name_shared_by_two_tables_is_ambiguous() {
    let err = resolve("[Price] * 2").unwrap_err();
    match err {
        ResolveError::AmbiguousReference {
            name,
            candidates,
            span,
        } => {
            assert_eq!(name, "Price");
            assert_eq!(candidates, vec!["Orders → Price", "Product → Price"]);
            assert_eq!(span, 0..7);
        }
        other => panic!("expected an ambiguity, got {:?}", other),
    }
}

#[test]
fn test_unique_joined_name_resolves_bare() {
    let expr = resolve("[Category]").unwrap();
    assert_eq!(
        target(&expr),
        Some(Identifier::ForeignField {
            fk: FieldId(11),
            field: FieldId(22)
        })
    );
}

#[test]
fn test_segments_are_trimmed_and_case_sensitive() {
    assert!(resolve("[  Product ->   Price ]").is_ok());
    let err = resolve("[product → price]").unwrap_err();
    assert!(matches!(err, ResolveError::UnresolvedReference { .. }));
}

#[test]
fn test_custom_separator() {
    let catalog = catalog();
    let ctx = QueryContext::for_new(&orders(), &catalog, ClauseKind::Filter).unwrap();
    let resolver = Resolver::new(&ctx).with_separators(vec![".".to_string()]);
    let expr = resolver
        .resolve(&formula::parse("[Product.Price] > 10").unwrap())
        .unwrap();
    assert!(matches!(
        target(&expr),
        Some(Identifier::ForeignField { .. })
    ));
}

// ============================================================================
// Visibility by position
// ============================================================================

fn with_revenue() -> StructuredQuery {
    let catalog = catalog();
    let maintainer = Maintainer::new(&catalog);
    let mut query = orders();
    for clause in [
        Clause::CustomColumn(CustomColumn {
            name: "Net".into(),
            expression: Expression::field(13),
        }),
        Clause::Aggregation(Aggregation::named(
            Expression::call(Function::Sum, vec![Expression::field(13)]),
            "Revenue",
        )),
    ] {
        query = maintainer.add_clause(&query, clause).unwrap();
    }
    query
}

#[test]
fn test_earlier_aggregation_is_visible_to_later_ones() {
    let query = with_revenue();
    let expr = resolve_at(&query, ClausePosition::aggregation(1), "[Revenue] / Count").unwrap();
    let ExprKind::BinaryOp { left, right, .. } = &expr.kind else {
        panic!("expected a division");
    };
    assert_eq!(target(left), Some(Identifier::Aggregation(0)));
    assert_eq!(right.as_ref(), &Expr::call("Count", vec![]));
}

#[test]
fn test_aggregation_cannot_see_itself() {
    let query = with_revenue();
    let err = resolve_at(&query, ClausePosition::aggregation(0), "[Revenue] + 1").unwrap_err();
    assert!(matches!(err, ResolveError::UnresolvedReference { ref name, .. } if name == "Revenue"));
}

#[test]
fn test_aggregations_are_invisible_to_filters() {
    let query = with_revenue();
    let err = resolve_at(&query, ClausePosition::filter(0), "[Revenue] > 100").unwrap_err();
    assert!(matches!(err, ResolveError::UnresolvedReference { .. }));
}

#[test]
fn test_custom_column_visible_after_its_definition() {
    let query = with_revenue();
    let expr = resolve_at(&query, ClausePosition::filter(0), "[Net] > 100").unwrap();
    assert_eq!(target(&expr), Some(Identifier::CustomColumn("Net".into())));

    // The column itself sits at index 0 and cannot read its own name.
    let err = resolve_at(&query, ClausePosition::custom_column(0), "[Net] * 2").unwrap_err();
    assert!(matches!(err, ResolveError::UnresolvedReference { .. }));
}

#[test]
fn test_nested_stage_sees_output_columns() {
    let query = with_revenue().nest();
    let expr = resolve_at(&query, ClausePosition::filter(0), "[Revenue] > 1000").unwrap();
    assert!(matches!(
        target(&expr),
        Some(Identifier::StageColumn { ref name, .. }) if name == "Revenue"
    ));

    // Source fields of the inner stage are gone once it is summarized.
    let err = resolve_at(&query, ClausePosition::filter(0), "[Total] > 1000").unwrap_err();
    assert!(matches!(err, ResolveError::UnresolvedReference { .. }));
}
