//! Clause types of a structured query.
//!
//! Clauses are listed here in stage order: custom columns are computed
//! first, then rows are filtered, aggregated and grouped, and finally the
//! grouped rows are ordered.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::expr::Expression;
use super::field::Identifier;
use super::types::TemporalUnit;

/// A named derived column.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomColumn {
    pub name: String,
    pub expression: Expression,
}

/// A row predicate. All filters of a query are AND-ed.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub predicate: Expression,
}

/// An aggregation with an optional user-supplied name.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub expression: Expression,
    pub name: Option<String>,
    /// Other `aggregation-options` keys, kept for re-encoding.
    pub options: Map<String, Value>,
}

impl Aggregation {
    pub fn new(expression: Expression) -> Self {
        Self {
            expression,
            name: None,
            options: Map::new(),
        }
    }

    pub fn named(expression: Expression, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new(expression)
        }
    }
}

/// A grouping column, optionally bucketed by a temporal unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Breakout {
    pub field: Identifier,
    pub granularity: Option<TemporalUnit>,
}

impl Breakout {
    pub fn new(field: Identifier) -> Self {
        Self {
            field,
            granularity: None,
        }
    }

    pub fn with_granularity(field: Identifier, unit: TemporalUnit) -> Self {
        Self {
            field,
            granularity: Some(unit),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        }
    }
}

/// What an order-by sorts on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OrderTarget {
    /// An aggregation of the same query, by position.
    Aggregation(usize),
    /// A breakout of the same query, by position.
    Breakout(usize),
    /// A plain column; only valid when the query neither aggregates nor groups.
    Field(Identifier),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderBy {
    pub direction: Direction,
    pub target: OrderTarget,
}

impl OrderBy {
    pub fn asc(target: OrderTarget) -> Self {
        Self {
            direction: Direction::Asc,
            target,
        }
    }

    pub fn desc(target: OrderTarget) -> Self {
        Self {
            direction: Direction::Desc,
            target,
        }
    }
}

// =============================================================================
// Clause variants
// =============================================================================

/// The kind of a clause list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClauseKind {
    CustomColumn,
    Filter,
    Aggregation,
    Breakout,
    OrderBy,
}

impl std::fmt::Display for ClauseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ClauseKind::CustomColumn => "custom column",
            ClauseKind::Filter => "filter",
            ClauseKind::Aggregation => "aggregation",
            ClauseKind::Breakout => "breakout",
            ClauseKind::OrderBy => "order-by",
        };
        f.write_str(s)
    }
}

/// Any clause.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    CustomColumn(CustomColumn),
    Filter(Filter),
    Aggregation(Aggregation),
    Breakout(Breakout),
    OrderBy(OrderBy),
}

impl Clause {
    pub fn kind(&self) -> ClauseKind {
        match self {
            Clause::CustomColumn(_) => ClauseKind::CustomColumn,
            Clause::Filter(_) => ClauseKind::Filter,
            Clause::Aggregation(_) => ClauseKind::Aggregation,
            Clause::Breakout(_) => ClauseKind::Breakout,
            Clause::OrderBy(_) => ClauseKind::OrderBy,
        }
    }
}

impl From<CustomColumn> for Clause {
    fn from(c: CustomColumn) -> Self {
        Clause::CustomColumn(c)
    }
}

impl From<Filter> for Clause {
    fn from(c: Filter) -> Self {
        Clause::Filter(c)
    }
}

impl From<Aggregation> for Clause {
    fn from(c: Aggregation) -> Self {
        Clause::Aggregation(c)
    }
}

impl From<Breakout> for Clause {
    fn from(c: Breakout) -> Self {
        Clause::Breakout(c)
    }
}

impl From<OrderBy> for Clause {
    fn from(c: OrderBy) -> Self {
        Clause::OrderBy(c)
    }
}

/// Where a clause sits: its list and its index in that list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClausePosition {
    pub kind: ClauseKind,
    pub index: usize,
}

impl ClausePosition {
    pub fn new(kind: ClauseKind, index: usize) -> Self {
        Self { kind, index }
    }

    pub fn aggregation(index: usize) -> Self {
        Self::new(ClauseKind::Aggregation, index)
    }

    pub fn breakout(index: usize) -> Self {
        Self::new(ClauseKind::Breakout, index)
    }

    pub fn filter(index: usize) -> Self {
        Self::new(ClauseKind::Filter, index)
    }

    pub fn order_by(index: usize) -> Self {
        Self::new(ClauseKind::OrderBy, index)
    }

    pub fn custom_column(index: usize) -> Self {
        Self::new(ClauseKind::CustomColumn, index)
    }
}

impl std::fmt::Display for ClausePosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.index)
    }
}
