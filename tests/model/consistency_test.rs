//! Tests for clause consistency maintenance on the sample catalog.

use proptest::prelude::*;
use quarry::context::Catalog;
use quarry::formula::{BinaryOp, Function};
use quarry::model::serialize;
use quarry::model::{
    Aggregation, Breakout, Clause, ClauseKind, ClausePosition, ConsistencyError, CustomColumn,
    Expression, Filter, Identifier, Maintainer, OrderBy, OrderByPolicy, OrderTarget,
    StructuredQuery, TemporalUnit,
};
use quarry::sample::{self, fields::*, REVIEWS};
use serde_json::json;

fn count() -> Clause {
    Clause::Aggregation(Aggregation::new(Expression::call(Function::Count, vec![])))
}

fn sum(field: u64) -> Clause {
    Clause::Aggregation(Aggregation::new(Expression::call(
        Function::Sum,
        vec![Expression::field(field)],
    )))
}

fn order(target: OrderTarget, desc: bool) -> Clause {
    Clause::OrderBy(if desc {
        OrderBy::desc(target)
    } else {
        OrderBy::asc(target)
    })
}

fn created_at_by(unit: TemporalUnit) -> Clause {
    Clause::Breakout(Breakout::with_granularity(
        Identifier::Field(ORDERS_CREATED_AT),
        unit,
    ))
}

fn build(maintainer: &Maintainer<'_>, clauses: Vec<Clause>) -> StructuredQuery {
    clauses
        .into_iter()
        .fold(sample::orders_query(), |q, clause| {
            maintainer.add_clause(&q, clause).unwrap()
        })
}

/// Count, Sum of Subtotal, Sum of Total, sorted descending on the second.
fn three_aggregations(maintainer: &Maintainer<'_>) -> StructuredQuery {
    build(
        maintainer,
        vec![
            count(),
            sum(ORDERS_SUBTOTAL.0),
            sum(ORDERS_TOTAL.0),
            order(OrderTarget::Aggregation(1), true),
        ],
    )
}

// ============================================================================
// Order-by reconciliation
// ============================================================================

#[test]
fn test_removing_sorted_aggregation_retargets_first() {
    let catalog = sample::catalog();
    let m = Maintainer::new(&catalog);
    let query = three_aggregations(&m);

    let next = m
        .remove_clause(&query, ClausePosition::aggregation(1))
        .unwrap();

    assert_eq!(next.aggregations().len(), 2);
    assert_eq!(next.order_by(), &[OrderBy::desc(OrderTarget::Aggregation(0))]);
    assert_eq!(next.revision(), query.revision() + 1);
}

#[test]
fn test_removing_sorted_aggregation_with_drop_policy() {
    let catalog = sample::catalog();
    let m = Maintainer::new(&catalog).with_policy(OrderByPolicy::Drop);
    let query = three_aggregations(&m);

    let next = m
        .remove_clause(&query, ClausePosition::aggregation(1))
        .unwrap();

    assert!(next.order_by().is_empty());
}

#[test]
fn test_removing_earlier_aggregation_shifts_sort() {
    let catalog = sample::catalog();
    let m = Maintainer::new(&catalog);
    let query = three_aggregations(&m);

    let next = m
        .remove_clause(&query, ClausePosition::aggregation(0))
        .unwrap();

    // Still sorted on Sum of Subtotal, now at index 0.
    assert_eq!(next.order_by(), &[OrderBy::desc(OrderTarget::Aggregation(0))]);
    assert_eq!(next.aggregations()[0], query.aggregations()[1]);
}

#[test]
fn test_retarget_that_duplicates_a_sort_is_dropped() {
    let catalog = sample::catalog();
    let m = Maintainer::new(&catalog);
    let query = build(
        &m,
        vec![
            count(),
            sum(ORDERS_TOTAL.0),
            order(OrderTarget::Aggregation(0), false),
            order(OrderTarget::Aggregation(1), true),
        ],
    );

    let next = m
        .remove_clause(&query, ClausePosition::aggregation(1))
        .unwrap();

    assert_eq!(next.order_by(), &[OrderBy::asc(OrderTarget::Aggregation(0))]);
}

#[test]
fn test_removing_last_aggregation_drops_its_sort() {
    let catalog = sample::catalog();
    let m = Maintainer::new(&catalog);
    let query = build(
        &m,
        vec![
            count(),
            created_at_by(TemporalUnit::Month),
            order(OrderTarget::Aggregation(0), true),
            order(OrderTarget::Breakout(0), false),
        ],
    );

    let next = m
        .remove_clause(&query, ClausePosition::aggregation(0))
        .unwrap();

    assert_eq!(next.order_by(), &[OrderBy::asc(OrderTarget::Breakout(0))]);
}

#[test]
fn test_removing_sorted_breakout_retargets_to_aggregation() {
    let catalog = sample::catalog();
    let m = Maintainer::new(&catalog);
    let query = build(
        &m,
        vec![
            sum(ORDERS_TOTAL.0),
            created_at_by(TemporalUnit::Month),
            order(OrderTarget::Breakout(0), false),
        ],
    );

    let next = m.remove_clause(&query, ClausePosition::breakout(0)).unwrap();

    assert_eq!(next.order_by(), &[OrderBy::asc(OrderTarget::Aggregation(0))]);
}

#[test]
fn test_move_keeps_sorts_on_the_same_clause() {
    let catalog = sample::catalog();
    let m = Maintainer::new(&catalog);
    let query = three_aggregations(&m);

    let moved = m
        .move_clause(&query, ClausePosition::aggregation(1), 2)
        .unwrap();

    assert_eq!(moved.aggregations()[2], query.aggregations()[1]);
    assert_eq!(moved.order_by(), &[OrderBy::desc(OrderTarget::Aggregation(2))]);
}

#[test]
fn test_summarized_query_rejects_field_sort() {
    let catalog = sample::catalog();
    let m = Maintainer::new(&catalog);
    let query = build(&m, vec![count()]);

    let err = m
        .add_clause(
            &query,
            order(OrderTarget::Field(Identifier::Field(ORDERS_TOTAL)), true),
        )
        .unwrap_err();

    assert!(matches!(err, ConsistencyError::InvalidOrderTarget { index: 0, .. }));
}

#[test]
fn test_raw_query_sorts_on_fields() {
    let catalog = sample::catalog();
    let m = Maintainer::new(&catalog);
    let query = build(
        &m,
        vec![order(OrderTarget::Field(Identifier::Field(ORDERS_TOTAL)), true)],
    );
    let query = m.set_limit(&query, Some(3)).unwrap();

    let results = sample::executor().run(&query).unwrap();
    let totals: Vec<String> = results
        .column("Total")
        .unwrap()
        .iter()
        .map(|v| v.to_string())
        .collect();
    assert_eq!(totals, vec!["302.48", "156.38", "151.92"]);
}

// ============================================================================
// Granularities
// ============================================================================

#[test]
fn test_granularities_follow_temporal_type() {
    let catalog = sample::catalog();

    let datetime = catalog.granularities(ORDERS_CREATED_AT);
    for unit in [
        TemporalUnit::Day,
        TemporalUnit::Week,
        TemporalUnit::Month,
        TemporalUnit::Quarter,
        TemporalUnit::Year,
        TemporalUnit::HourOfDay,
    ] {
        assert!(datetime.contains(&unit), "missing {}", unit);
    }

    let date = catalog.granularities(REVIEWS_CREATED_AT);
    assert!(date.contains(&TemporalUnit::Month));
    assert!(!date.contains(&TemporalUnit::Hour));

    assert!(catalog.granularities(ORDERS_TOTAL).is_empty());
}

#[test]
fn test_invalid_granularity_is_rejected() {
    let catalog = sample::catalog();
    let m = Maintainer::new(&catalog);

    let err = m
        .add_clause(
            &sample::orders_query(),
            Clause::Breakout(Breakout::with_granularity(
                Identifier::Field(ORDERS_TOTAL),
                TemporalUnit::Month,
            )),
        )
        .unwrap_err();
    assert!(matches!(err, ConsistencyError::InvalidGranularity { .. }));

    let reviews = StructuredQuery::new(REVIEWS);
    let err = m
        .add_clause(
            &reviews,
            Clause::Breakout(Breakout::with_granularity(
                Identifier::Field(REVIEWS_CREATED_AT),
                TemporalUnit::HourOfDay,
            )),
        )
        .unwrap_err();
    assert!(matches!(err, ConsistencyError::InvalidGranularity { .. }));
}

// ============================================================================
// Revisions and failure atomicity
// ============================================================================

#[test]
fn test_revision_counts_committed_changes() {
    let catalog = sample::catalog();
    let m = Maintainer::new(&catalog);
    let query = three_aggregations(&m);
    assert_eq!(query.revision(), 4);

    let limited = m.set_limit(&query, Some(10)).unwrap();
    assert_eq!(limited.revision(), 5);
    assert_eq!(limited.limit(), Some(10));
    // Content equality ignores the revision.
    assert_eq!(m.set_limit(&limited, None).unwrap(), query);
}

#[test]
fn test_failed_change_returns_error_only() {
    let catalog = sample::catalog();
    let m = Maintainer::new(&catalog);
    let query = build(
        &m,
        vec![
            Clause::CustomColumn(CustomColumn {
                name: "Net".into(),
                expression: Expression::binary(
                    BinaryOp::Sub,
                    Expression::field(ORDERS_TOTAL.0),
                    Expression::field(ORDERS_TAX.0),
                ),
            }),
            Clause::Filter(Filter {
                predicate: Expression::binary(
                    BinaryOp::Gt,
                    Expression::custom_column("Net"),
                    Expression::number(100),
                ),
            }),
        ],
    );
    let snapshot = query.clone();

    let err = m
        .remove_clause(&query, ClausePosition::custom_column(0))
        .unwrap_err();
    assert!(matches!(
        err,
        ConsistencyError::ReferencedColumn { ref name, referenced_by }
            if name == "Net" && referenced_by == ClausePosition::filter(0)
    ));

    let err = m
        .insert_clause(&query, ClausePosition::aggregation(3), count())
        .unwrap_err();
    assert!(matches!(err, ConsistencyError::PositionOutOfRange { len: 0, .. }));

    assert_eq!(query, snapshot);
    assert_eq!(query.revision(), snapshot.revision());
}

#[test]
fn test_aggregation_used_by_later_aggregation_cannot_be_removed() {
    let catalog = sample::catalog();
    let m = Maintainer::new(&catalog);
    let query = build(
        &m,
        vec![
            count(),
            Clause::Aggregation(Aggregation::new(Expression::binary(
                BinaryOp::Div,
                Expression::call(Function::Sum, vec![Expression::field(ORDERS_TOTAL.0)]),
                Expression::aggregation(0),
            ))),
        ],
    );

    let err = m
        .remove_clause(&query, ClausePosition::aggregation(0))
        .unwrap_err();
    assert_eq!(
        err,
        ConsistencyError::ReferencedAggregation {
            index: 0,
            referenced_by: 1
        }
    );
}

#[test]
fn test_first_aggregation_drops_field_sorts() {
    let catalog = sample::catalog();
    let m = Maintainer::new(&catalog);
    let query = build(
        &m,
        vec![
            order(OrderTarget::Field(Identifier::Field(ORDERS_TOTAL)), true),
            created_at_by(TemporalUnit::Month),
        ],
    );

    assert!(query.is_summarized());
    assert!(query.order_by().is_empty());
    let query = m
        .add_clause(&query, order(OrderTarget::Breakout(0), false))
        .unwrap();
    assert_eq!(query.order_by(), &[OrderBy::asc(OrderTarget::Breakout(0))]);
}

// ============================================================================
// Decoded queries that break an invariant
// ============================================================================

/// Two counts with a persisted sort on an aggregation that does not exist.
fn dangling_sort() -> StructuredQuery {
    serialize::from_value(&json!({
        "source-table": 1,
        "aggregation": [["count"], ["count"]],
        "order-by": [["desc", ["aggregation", 7]]]
    }))
    .unwrap()
}

fn assert_dangling(result: Result<StructuredQuery, ConsistencyError>) {
    match result {
        Err(ConsistencyError::DanglingOrderBy { index, .. }) => assert_eq!(index, 0),
        other => panic!("expected a dangling order-by, got {:?}", other),
    }
}

#[test]
fn test_move_on_dangling_sort_is_an_error() {
    let catalog = sample::catalog();
    let m = Maintainer::new(&catalog);
    let query = dangling_sort();

    assert_dangling(m.move_clause(&query, ClausePosition::aggregation(1), 0));
    assert_eq!(query, dangling_sort());
}

#[test]
fn test_remove_and_insert_on_dangling_sort_are_errors() {
    let catalog = sample::catalog();
    let m = Maintainer::new(&catalog);
    let query = dangling_sort();

    assert_dangling(m.remove_clause(&query, ClausePosition::aggregation(0)));
    assert_dangling(m.insert_clause(&query, ClausePosition::aggregation(0), count()));
    assert_dangling(m.move_clause(&query, ClausePosition::aggregation(0), 1));
    assert_eq!(query.revision(), 0);
}

#[test]
fn test_dangling_aggregation_reference_is_an_error() {
    let catalog = sample::catalog();
    let m = Maintainer::new(&catalog);
    let query = serialize::from_value(&json!({
        "source-table": 1,
        "aggregation": [["count"], ["+", ["aggregation", 5], 1]]
    }))
    .unwrap();

    for result in [
        m.move_clause(&query, ClausePosition::aggregation(1), 0),
        m.remove_clause(&query, ClausePosition::aggregation(0)),
        m.insert_clause(&query, ClausePosition::aggregation(0), count()),
    ] {
        assert!(
            matches!(result, Err(ConsistencyError::UnresolvedField { .. })),
            "got {:?}",
            result
        );
    }
}

// ============================================================================
// Random edit sequences
// ============================================================================

#[derive(Debug, Clone)]
enum Edit {
    Add(Clause),
    Remove(ClauseKind, usize),
    Move(ClauseKind, usize, usize),
    Limit(Option<u64>),
}

fn arb_kind() -> impl Strategy<Value = ClauseKind> {
    prop::sample::select(vec![
        ClauseKind::Aggregation,
        ClauseKind::Breakout,
        ClauseKind::OrderBy,
    ])
}

fn arb_clause() -> impl Strategy<Value = Clause> {
    prop_oneof![
        Just(count()),
        prop::sample::select(vec![ORDERS_SUBTOTAL.0, ORDERS_TAX.0, ORDERS_TOTAL.0]).prop_map(sum),
        prop::sample::select(TemporalUnit::ALL.to_vec()).prop_map(created_at_by),
        Just(Clause::Breakout(Breakout::new(Identifier::ForeignField {
            fk: ORDERS_PRODUCT_ID,
            field: PRODUCTS_CATEGORY,
        }))),
        (0usize..3, any::<bool>()).prop_map(|(i, d)| order(OrderTarget::Aggregation(i), d)),
        (0usize..3, any::<bool>()).prop_map(|(i, d)| order(OrderTarget::Breakout(i), d)),
    ]
}

fn arb_edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        3 => arb_clause().prop_map(Edit::Add),
        2 => (arb_kind(), 0usize..3).prop_map(|(k, i)| Edit::Remove(k, i)),
        1 => (arb_kind(), 0usize..3, 0usize..3).prop_map(|(k, i, j)| Edit::Move(k, i, j)),
        1 => prop::option::of(1u64..100).prop_map(Edit::Limit),
    ]
}

fn apply(
    m: &Maintainer<'_>,
    query: &StructuredQuery,
    edit: &Edit,
) -> Result<StructuredQuery, ConsistencyError> {
    match edit {
        Edit::Add(clause) => m.add_clause(query, clause.clone()),
        Edit::Remove(kind, i) => m.remove_clause(query, ClausePosition::new(*kind, *i)),
        Edit::Move(kind, i, j) => m.move_clause(query, ClausePosition::new(*kind, *i), *j),
        Edit::Limit(limit) => m.set_limit(query, *limit),
    }
}

proptest! {
    #[test]
    fn prop_every_committed_query_is_consistent(
        edits in prop::collection::vec(arb_edit(), 1..24),
        drop_sorts in any::<bool>(),
    ) {
        let catalog = sample::catalog();
        let policy = if drop_sorts { OrderByPolicy::Drop } else { OrderByPolicy::RetargetFirstAggregation };
        let m = Maintainer::new(&catalog).with_policy(policy);
        let mut query = sample::orders_query();

        for edit in &edits {
            let before = query.clone();
            match apply(&m, &query, edit) {
                Ok(next) => {
                    prop_assert_eq!(next.revision(), before.revision() + 1);
                    prop_assert!(m.validate(&next).is_ok());
                    for o in next.order_by() {
                        match o.target {
                            OrderTarget::Aggregation(i) => prop_assert!(i < next.aggregations().len()),
                            OrderTarget::Breakout(i) => prop_assert!(i < next.breakouts().len()),
                            OrderTarget::Field(_) => prop_assert!(!next.is_summarized()),
                        }
                    }
                    if let Edit::Remove(ClauseKind::Aggregation | ClauseKind::Breakout, _) = edit {
                        prop_assert!(next.order_by().len() <= before.order_by().len());
                    }
                    query = next;
                }
                Err(_) => {
                    prop_assert_eq!(&query, &before);
                    prop_assert_eq!(query.revision(), before.revision());
                }
            }
        }
    }
}
