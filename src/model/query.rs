//! The structured query value.

use super::clause::{
    Aggregation, Breakout, Clause, ClauseKind, ClausePosition, CustomColumn, Filter, OrderBy,
};
use super::field::TableId;

/// Where a query reads its rows from.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceRef {
    Table(TableId),
    /// A prior pipeline stage whose output columns this query reads.
    Query(Box<StructuredQuery>),
}

/// A single-stage analytic query.
///
/// Values are immutable from the outside: every change goes through the
/// [`Maintainer`](super::consistency::Maintainer), which returns a new query
/// with the revision bumped. Equality compares content and ignores the
/// revision.
#[derive(Debug, Clone)]
pub struct StructuredQuery {
    pub(crate) source: SourceRef,
    pub(crate) custom_columns: Vec<CustomColumn>,
    pub(crate) filters: Vec<Filter>,
    pub(crate) aggregations: Vec<Aggregation>,
    pub(crate) breakouts: Vec<Breakout>,
    pub(crate) order_by: Vec<OrderBy>,
    pub(crate) limit: Option<u64>,
    /// Clause kinds this model does not know, preserved verbatim.
    pub(crate) extra: serde_json::Map<String, serde_json::Value>,
    pub(crate) revision: u64,
}

impl PartialEq for StructuredQuery {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
            && self.custom_columns == other.custom_columns
            && self.filters == other.filters
            && self.aggregations == other.aggregations
            && self.breakouts == other.breakouts
            && self.order_by == other.order_by
            && self.limit == other.limit
            && self.extra == other.extra
    }
}

impl StructuredQuery {
    /// An empty query over a table.
    pub fn new(table: TableId) -> Self {
        Self::with_source(SourceRef::Table(table))
    }

    /// An empty query over the output of `inner`.
    pub fn over(inner: StructuredQuery) -> Self {
        Self::with_source(SourceRef::Query(Box::new(inner)))
    }

    fn with_source(source: SourceRef) -> Self {
        Self {
            source,
            custom_columns: Vec::new(),
            filters: Vec::new(),
            aggregations: Vec::new(),
            breakouts: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            extra: serde_json::Map::new(),
            revision: 0,
        }
    }

    /// Wrap this query as the source of a new, empty stage.
    pub fn nest(self) -> StructuredQuery {
        StructuredQuery::over(self)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn source(&self) -> &SourceRef {
        &self.source
    }

    /// The table at the bottom of the stage chain.
    pub fn root_table(&self) -> TableId {
        match &self.source {
            SourceRef::Table(id) => *id,
            SourceRef::Query(inner) => inner.root_table(),
        }
    }

    pub fn custom_columns(&self) -> &[CustomColumn] {
        &self.custom_columns
    }

    pub fn custom_column(&self, name: &str) -> Option<&CustomColumn> {
        self.custom_columns.iter().find(|c| c.name == name)
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn aggregations(&self) -> &[Aggregation] {
        &self.aggregations
    }

    pub fn breakouts(&self) -> &[Breakout] {
        &self.breakouts
    }

    pub fn order_by(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// Unknown clause kinds carried through from the wire.
    pub fn extra(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.extra
    }

    /// Number of committed changes since creation or decoding.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Whether the query groups or aggregates rows.
    pub fn is_summarized(&self) -> bool {
        !self.aggregations.is_empty() || !self.breakouts.is_empty()
    }

    /// Number of clauses in a list.
    pub fn len(&self, kind: ClauseKind) -> usize {
        match kind {
            ClauseKind::CustomColumn => self.custom_columns.len(),
            ClauseKind::Filter => self.filters.len(),
            ClauseKind::Aggregation => self.aggregations.len(),
            ClauseKind::Breakout => self.breakouts.len(),
            ClauseKind::OrderBy => self.order_by.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        [
            ClauseKind::CustomColumn,
            ClauseKind::Filter,
            ClauseKind::Aggregation,
            ClauseKind::Breakout,
            ClauseKind::OrderBy,
        ]
        .iter()
        .all(|k| self.len(*k) == 0)
            && self.limit.is_none()
    }

    /// The clause at `position`, if any.
    pub fn clause(&self, position: ClausePosition) -> Option<Clause> {
        let i = position.index;
        match position.kind {
            ClauseKind::CustomColumn => self.custom_columns.get(i).cloned().map(Clause::from),
            ClauseKind::Filter => self.filters.get(i).cloned().map(Clause::from),
            ClauseKind::Aggregation => self.aggregations.get(i).cloned().map(Clause::from),
            ClauseKind::Breakout => self.breakouts.get(i).cloned().map(Clause::from),
            ClauseKind::OrderBy => self.order_by.get(i).cloned().map(Clause::from),
        }
    }

    /// Every clause with its position, in stage order.
    pub fn clauses(&self) -> Vec<(ClausePosition, Clause)> {
        let mut out = Vec::new();
        for kind in [
            ClauseKind::CustomColumn,
            ClauseKind::Filter,
            ClauseKind::Aggregation,
            ClauseKind::Breakout,
            ClauseKind::OrderBy,
        ] {
            for index in 0..self.len(kind) {
                let position = ClausePosition::new(kind, index);
                if let Some(clause) = self.clause(position) {
                    out.push((position, clause));
                }
            }
        }
        out
    }

    // ========================================================================
    // Raw list edits, unchecked
    // ========================================================================

    /// Insert without validation. `index` must be within `0..=len`.
    pub(crate) fn insert_raw(&mut self, index: usize, clause: Clause) {
        match clause {
            Clause::CustomColumn(c) => self.custom_columns.insert(index, c),
            Clause::Filter(c) => self.filters.insert(index, c),
            Clause::Aggregation(c) => self.aggregations.insert(index, c),
            Clause::Breakout(c) => self.breakouts.insert(index, c),
            Clause::OrderBy(c) => self.order_by.insert(index, c),
        }
    }

    /// Remove without validation. `position` must be in range.
    pub(crate) fn remove_raw(&mut self, position: ClausePosition) -> Clause {
        let i = position.index;
        match position.kind {
            ClauseKind::CustomColumn => Clause::CustomColumn(self.custom_columns.remove(i)),
            ClauseKind::Filter => Clause::Filter(self.filters.remove(i)),
            ClauseKind::Aggregation => Clause::Aggregation(self.aggregations.remove(i)),
            ClauseKind::Breakout => Clause::Breakout(self.breakouts.remove(i)),
            ClauseKind::OrderBy => Clause::OrderBy(self.order_by.remove(i)),
        }
    }
}
