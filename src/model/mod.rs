//! The structured query model.
//!
//! A [`StructuredQuery`] is the canonical, serializable form of an analytic
//! query: a source plus ordered clause lists. Formulas compile into its
//! clauses, the [`Maintainer`] keeps those clauses mutually consistent, and
//! [`serialize`] maps it to and from the JSON wire format.

pub mod clause;
pub mod consistency;
pub mod expr;
pub mod field;
pub mod fingerprint;
pub mod query;
pub mod serialize;
pub mod types;

pub use clause::{
    Aggregation, Breakout, Clause, ClauseKind, ClausePosition, CustomColumn, Direction, Filter,
    OrderBy, OrderTarget,
};
pub use consistency::{ConsistencyError, Maintainer, OrderByPolicy};
pub use expr::Expression;
pub use field::{FieldId, Identifier, TableId};
pub use fingerprint::Fingerprint;
pub use query::{SourceRef, StructuredQuery};
pub use serialize::WireError;
pub use types::{TemporalType, TemporalUnit, ValueKind};
