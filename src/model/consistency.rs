//! Clause consistency maintenance.
//!
//! Every change to a [`StructuredQuery`] goes through a [`Maintainer`]. An
//! operation returns a new query with its revision bumped, or an error and
//! no change at all. After each operation:
//!
//! - every order-by points at an aggregation or breakout that exists,
//!   renumbered so it keeps pointing at the same clause it did before;
//! - every reference inside an expression resolves in the context visible
//!   at that clause's position;
//! - breakout granularities fit their field's temporal type.
//!
//! When the target of an order-by is removed, the [`OrderByPolicy`] decides
//! between retargeting it and dropping it.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::clause::{Clause, ClauseKind, ClausePosition, OrderBy, OrderTarget};
use super::field::{Identifier, TableId};
use super::query::{SourceRef, StructuredQuery};
use super::types::TemporalUnit;
use crate::context::{Catalog, CatalogError, QueryContext};

// ============================================================================
// Policy and errors
// ============================================================================

/// What happens to an order-by whose target is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderByPolicy {
    /// Point it at the first remaining aggregation; drop it if none remain.
    #[default]
    RetargetFirstAggregation,
    /// Always drop it.
    Drop,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsistencyError {
    #[error("order-by {index} points at {target}, which does not exist")]
    DanglingOrderBy { index: usize, target: String },

    #[error("order-by {index} cannot sort on {target}: {reason}")]
    InvalidOrderTarget {
        index: usize,
        target: String,
        reason: String,
    },

    #[error("order-by {index} repeats an earlier sort on {target}")]
    DuplicateOrderBy { index: usize, target: String },

    #[error("aggregation {index} is used by aggregation {referenced_by}")]
    ReferencedAggregation { index: usize, referenced_by: usize },

    #[error("custom column '{name}' is used by {referenced_by}")]
    ReferencedColumn {
        name: String,
        referenced_by: ClausePosition,
    },

    #[error("custom column name '{name}' is used twice")]
    DuplicateColumnName { name: String },

    #[error("cannot put a {found} clause at {position}")]
    KindMismatch {
        position: ClausePosition,
        found: ClauseKind,
    },

    #[error("{position} is out of range; the list has {len} clauses")]
    PositionOutOfRange { position: ClausePosition, len: usize },

    #[error("breakout {index} cannot use granularity '{unit}' on {field} ({kind})")]
    InvalidGranularity {
        index: usize,
        field: String,
        unit: TemporalUnit,
        kind: String,
    },

    #[error("breakout {index} repeats an earlier breakout")]
    DuplicateBreakout { index: usize },

    #[error("{position} refers to {field}, which is not visible there")]
    UnresolvedField {
        position: ClausePosition,
        field: String,
    },

    #[error("{position} is not valid here: {reason}")]
    InvalidExpression {
        position: ClausePosition,
        reason: String,
    },

    #[error("the query reads from unknown table {0}")]
    UnknownSource(TableId),

    #[error("catalog error: {0}")]
    Catalog(String),
}

impl From<CatalogError> for ConsistencyError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::UnknownTable(t) => ConsistencyError::UnknownSource(t),
            other => ConsistencyError::Catalog(other.to_string()),
        }
    }
}

fn describe_target(target: &OrderTarget) -> String {
    match target {
        OrderTarget::Aggregation(i) => format!("aggregation {}", i),
        OrderTarget::Breakout(i) => format!("breakout {}", i),
        OrderTarget::Field(id) => describe_identifier(id),
    }
}

fn describe_identifier(id: &Identifier) -> String {
    match id {
        Identifier::Field(f) => format!("field {}", f),
        Identifier::ForeignField { fk, field } => format!("field {} via {}", field, fk),
        Identifier::CustomColumn(name) | Identifier::StageColumn { name, .. } => {
            format!("[{}]", name)
        }
        Identifier::Aggregation(i) => format!("aggregation {}", i),
    }
}

// ============================================================================
// Maintainer
// ============================================================================

/// Applies checked, value-returning edits to structured queries.
pub struct Maintainer<'a> {
    catalog: &'a dyn Catalog,
    policy: OrderByPolicy,
}

impl<'a> Maintainer<'a> {
    pub fn new(catalog: &'a dyn Catalog) -> Self {
        Self {
            catalog,
            policy: OrderByPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: OrderByPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> OrderByPolicy {
        self.policy
    }

    /// Append a clause to the end of its list.
    pub fn add_clause(
        &self,
        query: &StructuredQuery,
        clause: Clause,
    ) -> Result<StructuredQuery, ConsistencyError> {
        let position = ClausePosition::new(clause.kind(), query.len(clause.kind()));
        self.insert_clause(query, position, clause)
    }

    /// Insert a clause, shifting later clauses of the same list down.
    pub fn insert_clause(
        &self,
        query: &StructuredQuery,
        position: ClausePosition,
        clause: Clause,
    ) -> Result<StructuredQuery, ConsistencyError> {
        check_kind(position, &clause)?;
        let len = query.len(position.kind);
        if position.index > len {
            return Err(ConsistencyError::PositionOutOfRange { position, len });
        }
        self.validate(query)?;

        let mut next = query.clone();
        let at = position.index;
        match position.kind {
            ClauseKind::Aggregation => {
                remap_aggregations(&mut next, |i| if i >= at { i + 1 } else { i })
            }
            ClauseKind::Breakout => remap_breakouts(&mut next, |i| if i >= at { i + 1 } else { i }),
            _ => {}
        }
        if matches!(position.kind, ClauseKind::Aggregation | ClauseKind::Breakout)
            && !query.is_summarized()
        {
            drop_field_sorts(&mut next);
        }
        next.insert_raw(at, clause);
        self.commit(query, next, "insert", Some(position))
    }

    /// Remove a clause, keeping order-bys consistent.
    pub fn remove_clause(
        &self,
        query: &StructuredQuery,
        position: ClausePosition,
    ) -> Result<StructuredQuery, ConsistencyError> {
        check_range(query, position)?;
        self.validate(query)?;
        let at = position.index;
        let mut next = query.clone();

        match position.kind {
            ClauseKind::Aggregation => {
                if let Some(referenced_by) = query
                    .aggregations
                    .iter()
                    .enumerate()
                    .position(|(j, a)| j != at && a.expression.references_aggregation(at))
                {
                    return Err(ConsistencyError::ReferencedAggregation {
                        index: at,
                        referenced_by,
                    });
                }
                next.remove_raw(position);
                for aggregation in &mut next.aggregations {
                    aggregation.expression = aggregation
                        .expression
                        .renumber_aggregations(|i| if i > at { i - 1 } else { i });
                }
                self.reconcile_order_by(&mut next, ClauseKind::Aggregation, at);
            }
            ClauseKind::Breakout => {
                next.remove_raw(position);
                self.reconcile_order_by(&mut next, ClauseKind::Breakout, at);
            }
            ClauseKind::CustomColumn => {
                let name = query.custom_columns[at].name.clone();
                if let Some(referenced_by) = column_user(query, &name, Some(at)) {
                    return Err(ConsistencyError::ReferencedColumn {
                        name,
                        referenced_by,
                    });
                }
                next.remove_raw(position);
            }
            ClauseKind::Filter | ClauseKind::OrderBy => {
                next.remove_raw(position);
            }
        }

        self.commit(query, next, "remove", Some(position))
    }

    /// Replace a clause with another of the same kind.
    pub fn replace_clause(
        &self,
        query: &StructuredQuery,
        position: ClausePosition,
        clause: Clause,
    ) -> Result<StructuredQuery, ConsistencyError> {
        check_kind(position, &clause)?;
        check_range(query, position)?;
        self.validate(query)?;

        if let Clause::CustomColumn(column) = &clause {
            let old = &query.custom_columns[position.index].name;
            if *old != column.name {
                if let Some(referenced_by) = column_user(query, old, Some(position.index)) {
                    return Err(ConsistencyError::ReferencedColumn {
                        name: old.clone(),
                        referenced_by,
                    });
                }
            }
        }

        let mut next = query.clone();
        next.remove_raw(position);
        next.insert_raw(position.index, clause);
        self.commit(query, next, "replace", Some(position))
    }

    /// Move a clause within its list.
    pub fn move_clause(
        &self,
        query: &StructuredQuery,
        position: ClausePosition,
        new_index: usize,
    ) -> Result<StructuredQuery, ConsistencyError> {
        check_range(query, position)?;
        check_range(query, ClausePosition::new(position.kind, new_index))?;
        self.validate(query)?;

        let len = query.len(position.kind);
        let mut order: Vec<usize> = (0..len).collect();
        let moved = order.remove(position.index);
        order.insert(new_index, moved);
        let mut new_index_of = vec![0; len];
        for (new, old) in order.iter().enumerate() {
            new_index_of[*old] = new;
        }

        let mut next = query.clone();
        match position.kind {
            ClauseKind::Aggregation => remap_aggregations(&mut next, |i| {
                new_index_of.get(i).copied().unwrap_or(i)
            }),
            ClauseKind::Breakout => {
                remap_breakouts(&mut next, |i| new_index_of.get(i).copied().unwrap_or(i))
            }
            _ => {}
        }
        let clause = next.remove_raw(position);
        next.insert_raw(new_index, clause);
        self.commit(query, next, "move", Some(position))
    }

    /// Set or clear the row limit.
    pub fn set_limit(
        &self,
        query: &StructuredQuery,
        limit: Option<u64>,
    ) -> Result<StructuredQuery, ConsistencyError> {
        let mut next = query.clone();
        next.limit = limit;
        self.commit(query, next, "limit", None)
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Check every invariant of a query, including nested source stages.
    pub fn validate(&self, query: &StructuredQuery) -> Result<(), ConsistencyError> {
        if let SourceRef::Query(inner) = &query.source {
            self.validate(inner)?;
        }

        let mut names = HashSet::new();
        for column in &query.custom_columns {
            if !names.insert(column.name.as_str()) {
                return Err(ConsistencyError::DuplicateColumnName {
                    name: column.name.clone(),
                });
            }
        }

        let mut breakouts = HashSet::new();
        let mut order_targets = HashSet::new();

        for (position, clause) in query.clauses() {
            let ctx = QueryContext::at(query, self.catalog, position)?;
            match clause {
                Clause::CustomColumn(c) => {
                    check_expression(&ctx, position, &c.expression, false)?;
                }
                Clause::Filter(f) => {
                    check_expression(&ctx, position, &f.predicate, false)?;
                }
                Clause::Aggregation(a) => {
                    check_expression(&ctx, position, &a.expression, true)?;
                }
                Clause::Breakout(b) => {
                    let entry = ctx.lookup(&b.field).ok_or_else(|| {
                        ConsistencyError::UnresolvedField {
                            position,
                            field: describe_identifier(&b.field),
                        }
                    })?;
                    if let Some(unit) = b.granularity {
                        let valid = entry
                            .kind
                            .temporal_type()
                            .is_some_and(|t| unit.valid_for(t));
                        if !valid {
                            return Err(ConsistencyError::InvalidGranularity {
                                index: position.index,
                                field: entry.qualified_name(),
                                unit,
                                kind: entry.kind.describe().to_string(),
                            });
                        }
                    }
                    if !breakouts.insert(b.clone()) {
                        return Err(ConsistencyError::DuplicateBreakout {
                            index: position.index,
                        });
                    }
                }
                Clause::OrderBy(o) => {
                    self.check_order_by(query, &ctx, position.index, &o)?;
                    if !order_targets.insert(o.target.clone()) {
                        return Err(ConsistencyError::DuplicateOrderBy {
                            index: position.index,
                            target: describe_target(&o.target),
                        });
                    }
                }
            }
        }

        Ok(())
    }

    fn check_order_by(
        &self,
        query: &StructuredQuery,
        ctx: &QueryContext,
        index: usize,
        order_by: &OrderBy,
    ) -> Result<(), ConsistencyError> {
        let dangling = || ConsistencyError::DanglingOrderBy {
            index,
            target: describe_target(&order_by.target),
        };
        match &order_by.target {
            OrderTarget::Aggregation(i) if *i >= query.aggregations.len() => Err(dangling()),
            OrderTarget::Breakout(i) if *i >= query.breakouts.len() => Err(dangling()),
            OrderTarget::Field(id) => {
                if query.is_summarized() {
                    return Err(ConsistencyError::InvalidOrderTarget {
                        index,
                        target: describe_identifier(id),
                        reason: "summarized queries sort on aggregations or breakouts".into(),
                    });
                }
                if ctx.lookup(id).is_none() {
                    return Err(ConsistencyError::UnresolvedField {
                        position: ClausePosition::order_by(index),
                        field: describe_identifier(id),
                    });
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn commit(
        &self,
        base: &StructuredQuery,
        mut next: StructuredQuery,
        operation: &'static str,
        position: Option<ClausePosition>,
    ) -> Result<StructuredQuery, ConsistencyError> {
        if let Err(e) = self.validate(&next) {
            debug!(operation, ?position, error = %e, "rejected query change");
            return Err(e);
        }
        next.revision = base.revision + 1;
        debug!(operation, ?position, revision = next.revision, "committed query change");
        Ok(next)
    }

    /// Fix order-bys after the clause at `removed` of `kind` was deleted.
    fn reconcile_order_by(&self, query: &mut StructuredQuery, kind: ClauseKind, removed: usize) {
        let old = std::mem::take(&mut query.order_by);
        let mut entries: Vec<(OrderBy, bool)> = Vec::with_capacity(old.len());

        for order_by in old {
            let index = match (&order_by.target, kind) {
                (OrderTarget::Aggregation(i), ClauseKind::Aggregation)
                | (OrderTarget::Breakout(i), ClauseKind::Breakout) => *i,
                _ => {
                    entries.push((order_by, false));
                    continue;
                }
            };

            if index != removed {
                let shifted = if index > removed { index - 1 } else { index };
                let target = match kind {
                    ClauseKind::Aggregation => OrderTarget::Aggregation(shifted),
                    _ => OrderTarget::Breakout(shifted),
                };
                entries.push((
                    OrderBy {
                        direction: order_by.direction,
                        target,
                    },
                    false,
                ));
                continue;
            }

            match self.policy {
                OrderByPolicy::RetargetFirstAggregation if !query.aggregations.is_empty() => {
                    warn!(removed = %ClausePosition::new(kind, removed), "retargeting order-by to the first aggregation");
                    entries.push((
                        OrderBy {
                            direction: order_by.direction,
                            target: OrderTarget::Aggregation(0),
                        },
                        true,
                    ));
                }
                _ => {
                    warn!(removed = %ClausePosition::new(kind, removed), "dropping order-by on removed clause");
                }
            }
        }

        let mut taken: HashSet<OrderTarget> = entries
            .iter()
            .filter(|(_, retargeted)| !retargeted)
            .map(|(o, _)| o.target.clone())
            .collect();
        query.order_by = entries
            .into_iter()
            .filter(|(order_by, retargeted)| {
                if !retargeted || taken.insert(order_by.target.clone()) {
                    true
                } else {
                    warn!("dropping retargeted order-by that duplicates an existing sort");
                    false
                }
            })
            .map(|(order_by, _)| order_by)
            .collect();
    }
}

fn check_kind(position: ClausePosition, clause: &Clause) -> Result<(), ConsistencyError> {
    if clause.kind() != position.kind {
        return Err(ConsistencyError::KindMismatch {
            position,
            found: clause.kind(),
        });
    }
    Ok(())
}

fn check_range(query: &StructuredQuery, position: ClausePosition) -> Result<(), ConsistencyError> {
    let len = query.len(position.kind);
    if position.index >= len {
        return Err(ConsistencyError::PositionOutOfRange { position, len });
    }
    Ok(())
}

/// Renumber aggregation references in expressions and order-bys.
fn remap_aggregations(query: &mut StructuredQuery, remap: impl Fn(usize) -> usize) {
    for aggregation in &mut query.aggregations {
        aggregation.expression = aggregation.expression.renumber_aggregations(&remap);
    }
    for order_by in &mut query.order_by {
        if let OrderTarget::Aggregation(i) = order_by.target {
            order_by.target = OrderTarget::Aggregation(remap(i));
        }
    }
}

/// A raw query becoming summarized can no longer sort on plain fields.
fn drop_field_sorts(query: &mut StructuredQuery) {
    let before = query.order_by.len();
    query
        .order_by
        .retain(|o| !matches!(o.target, OrderTarget::Field(_)));
    if query.order_by.len() < before {
        warn!(
            dropped = before - query.order_by.len(),
            "dropping field sorts from a query that is now summarized"
        );
    }
}

fn remap_breakouts(query: &mut StructuredQuery, remap: impl Fn(usize) -> usize) {
    for order_by in &mut query.order_by {
        if let OrderTarget::Breakout(i) = order_by.target {
            order_by.target = OrderTarget::Breakout(remap(i));
        }
    }
}

/// The first clause that reads custom column `name`, skipping the column
/// itself.
fn column_user(
    query: &StructuredQuery,
    name: &str,
    own_index: Option<usize>,
) -> Option<ClausePosition> {
    let reads = |id: &Identifier| id.custom_column() == Some(name);
    query
        .clauses()
        .into_iter()
        .find(|(position, clause)| match clause {
            Clause::CustomColumn(c) => {
                Some(position.index) != own_index && c.expression.references_custom_column(name)
            }
            Clause::Filter(f) => f.predicate.references_custom_column(name),
            Clause::Aggregation(a) => a.expression.references_custom_column(name),
            Clause::Breakout(b) => reads(&b.field),
            Clause::OrderBy(o) => matches!(&o.target, OrderTarget::Field(id) if reads(id)),
        })
        .map(|(position, _)| position)
}

/// Every reference must be visible; aggregations must aggregate and nothing
/// else may.
fn check_expression(
    ctx: &QueryContext,
    position: ClausePosition,
    expression: &super::expr::Expression,
    aggregating: bool,
) -> Result<(), ConsistencyError> {
    for id in expression.identifiers() {
        if ctx.lookup(id).is_none() {
            return Err(ConsistencyError::UnresolvedField {
                position,
                field: describe_identifier(id),
            });
        }
    }

    let aggregates = expression.contains_aggregate()
        || expression
            .identifiers()
            .iter()
            .any(|id| id.aggregation_index().is_some());
    let opaque = matches!(expression, super::expr::Expression::Opaque(_));
    if aggregating && !aggregates && !opaque {
        return Err(ConsistencyError::InvalidExpression {
            position,
            reason: "an aggregation must aggregate".into(),
        });
    }
    if !aggregating && expression.contains_aggregate() {
        return Err(ConsistencyError::InvalidExpression {
            position,
            reason: "only aggregations may aggregate".into(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{FieldInfo, InMemoryCatalog};
    use crate::formula::functions::Function;
    use crate::model::clause::{Aggregation, Breakout, CustomColumn, Filter};
    use crate::model::expr::Expression;
    use crate::model::field::FieldId;
    use crate::model::types::{TemporalType, ValueKind};

    fn catalog() -> InMemoryCatalog {
        InMemoryCatalog::new().with_table(
            1,
            "Orders",
            vec![
                FieldInfo::new(1, "Subtotal", ValueKind::Numeric),
                FieldInfo::new(2, "Total", ValueKind::Numeric),
                FieldInfo::new(3, "Created At", ValueKind::Temporal(TemporalType::DateTime)),
            ],
        )
    }

    fn count() -> Clause {
        Clause::Aggregation(Aggregation::new(Expression::call(Function::Count, vec![])))
    }

    fn sum(field: u64) -> Clause {
        Clause::Aggregation(Aggregation::new(Expression::call(
            Function::Sum,
            vec![Expression::field(field)],
        )))
    }

    #[test]
    fn test_insert_shifts_order_by() {
        let catalog = catalog();
        let m = Maintainer::new(&catalog);
        let q = StructuredQuery::new(TableId(1));
        let q = m.add_clause(&q, count()).unwrap();
        let q = m
            .add_clause(&q, Clause::OrderBy(OrderBy::desc(OrderTarget::Aggregation(0))))
            .unwrap();
        let q = m
            .insert_clause(&q, ClausePosition::aggregation(0), sum(2))
            .unwrap();
        assert_eq!(q.order_by()[0].target, OrderTarget::Aggregation(1));
        assert_eq!(q.revision(), 3);
    }

    #[test]
    fn test_move_keeps_order_by_target() {
        let catalog = catalog();
        let m = Maintainer::new(&catalog);
        let mut q = StructuredQuery::new(TableId(1));
        for clause in [count(), sum(1), sum(2)] {
            q = m.add_clause(&q, clause).unwrap();
        }
        q = m
            .add_clause(&q, Clause::OrderBy(OrderBy::asc(OrderTarget::Aggregation(2))))
            .unwrap();
        let moved = m
            .move_clause(&q, ClausePosition::aggregation(2), 0)
            .unwrap();
        assert_eq!(moved.order_by()[0].target, OrderTarget::Aggregation(0));
        assert_eq!(moved.aggregations()[0], q.aggregations()[2].clone());
    }

    #[test]
    fn test_kind_mismatch() {
        let catalog = catalog();
        let m = Maintainer::new(&catalog);
        let q = m.add_clause(&StructuredQuery::new(TableId(1)), count()).unwrap();
        let err = m
            .replace_clause(
                &q,
                ClausePosition::aggregation(0),
                Clause::Filter(Filter {
                    predicate: Expression::field(1),
                }),
            )
            .unwrap_err();
        assert!(matches!(err, ConsistencyError::KindMismatch { .. }));
    }

    #[test]
    fn test_invalid_granularity() {
        let catalog = catalog();
        let m = Maintainer::new(&catalog);
        let q = StructuredQuery::new(TableId(1));
        let err = m
            .add_clause(
                &q,
                Clause::Breakout(Breakout::with_granularity(
                    Identifier::Field(FieldId(2)),
                    TemporalUnit::Month,
                )),
            )
            .unwrap_err();
        assert!(matches!(err, ConsistencyError::InvalidGranularity { .. }));
    }

    #[test]
    fn test_referenced_custom_column_cannot_be_removed() {
        let catalog = catalog();
        let m = Maintainer::new(&catalog);
        let q = StructuredQuery::new(TableId(1));
        let q = m
            .add_clause(
                &q,
                Clause::CustomColumn(CustomColumn {
                    name: "Net".into(),
                    expression: Expression::field(1),
                }),
            )
            .unwrap();
        let q = m
            .add_clause(
                &q,
                Clause::Aggregation(Aggregation::new(Expression::call(
                    Function::Sum,
                    vec![Expression::custom_column("Net")],
                ))),
            )
            .unwrap();
        let err = m
            .remove_clause(&q, ClausePosition::custom_column(0))
            .unwrap_err();
        assert_eq!(
            err,
            ConsistencyError::ReferencedColumn {
                name: "Net".into(),
                referenced_by: ClausePosition::aggregation(0)
            }
        );
    }

    #[test]
    fn test_filter_cannot_aggregate() {
        let catalog = catalog();
        let m = Maintainer::new(&catalog);
        let err = m
            .add_clause(
                &StructuredQuery::new(TableId(1)),
                Clause::Filter(Filter {
                    predicate: Expression::call(Function::Count, vec![]),
                }),
            )
            .unwrap_err();
        assert!(matches!(err, ConsistencyError::InvalidExpression { .. }));
    }

    #[test]
    fn test_policy_parses_from_kebab_case() {
        let policy: OrderByPolicy = serde_json::from_str("\"drop\"").unwrap();
        assert_eq!(policy, OrderByPolicy::Drop);
        assert_eq!(OrderByPolicy::default(), OrderByPolicy::RetargetFirstAggregation);
    }
}
