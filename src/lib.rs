//! # Quarry
//!
//! A structured analytic query model with a custom expression compiler.
//!
//! ## Architecture
//!
//! Formulas typed by a user and clauses built step by step both end up in
//! the same canonical [`StructuredQuery`](model::StructuredQuery):
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  Formula text                            │
//! │            e.g. 2 * Max([Total])                         │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [formula: lexer + parser]
//! ┌─────────────────────────────────────────────────────────┐
//! │                  Expression AST                          │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [resolve: QueryContext]
//! ┌─────────────────────────────────────────────────────────┐
//! │        Resolved AST (bracket names → identifiers)        │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [compile: kind checks + labels]
//! ┌─────────────────────────────────────────────────────────┐
//! │     Clause inserted into the StructuredQuery             │
//! │     (model::consistency keeps clauses in agreement)      │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [execution]
//! ┌─────────────────────────────────────────────────────────┐
//! │     QueryExecutor, stale results dropped by fingerprint  │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod compile;
pub mod config;
pub mod context;
pub mod error;
pub mod execution;
pub mod formula;
pub mod model;
pub mod resolve;
pub mod sample;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::compile::{CompileOptions, CompiledClause, Compiler, TargetKind};
    pub use crate::config::Settings;
    pub use crate::context::{Catalog, FieldInfo, InMemoryCatalog, QueryContext};
    pub use crate::error::{QueryError, QueryResult};
    pub use crate::execution::{
        CellValue, ExecutionTracker, MemoryExecutor, Outcome, QueryExecutor, ResultSet,
    };
    pub use crate::formula::{format, parse};
    pub use crate::model::{
        Aggregation, Breakout, Clause, ClauseKind, ClausePosition, CustomColumn, Direction,
        Expression, FieldId, Filter, Identifier, Maintainer, OrderBy, OrderByPolicy, OrderTarget,
        StructuredQuery, TableId, TemporalType, TemporalUnit, ValueKind,
    };
    pub use crate::resolve::Resolver;
}
