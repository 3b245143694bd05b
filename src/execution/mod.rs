//! The execution boundary.
//!
//! Queries are executed by an external engine behind the [`QueryExecutor`]
//! trait. Requests are tagged with the [`Fingerprint`] of the query state
//! they were made for, and an [`ExecutionTracker`] discards results that
//! arrive after the query has moved on.
//!
//! # Example
//!
//! ```ignore
//! let tracker = ExecutionTracker::new();
//! match tracker.run(&executor, &query).await? {
//!     Outcome::Current(results) => show(results),
//!     Outcome::Stale { .. } => {} // a newer edit superseded this run
//! }
//! ```

pub mod memory;
mod temporal;

use std::cmp::Ordering;
use std::fmt;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::context::CatalogError;
use crate::model::field::TableId;
use crate::model::fingerprint::Fingerprint;
use crate::model::query::StructuredQuery;
use crate::model::serialize::WireError;
use crate::model::types::ValueKind;

pub use memory::{MemoryExecutor, TableData};
pub use temporal::bucket;

// ============================================================================
// Errors
// ============================================================================

/// Result type for execution operations.
pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Errors raised at the executor boundary.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("failed to fingerprint query: {0}")]
    Fingerprint(#[from] WireError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("no data for table {0}")]
    MissingTable(TableId),

    #[error("cannot execute {0}")]
    Unsupported(String),

    #[error("evaluation failed: {0}")]
    Evaluation(String),

    /// The engine itself failed.
    #[error("executor error: {0}")]
    Engine(String),
}

impl ExecutionError {
    pub fn evaluation(reason: impl Into<String>) -> Self {
        Self::Evaluation(reason.into())
    }

    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported(what.into())
    }
}

// ============================================================================
// Results
// ============================================================================

/// One cell of a result set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Boolean(bool),
    Number(Decimal),
    String(String),
    /// ISO-8601 date, date-time or time.
    Temporal(String),
}

impl CellValue {
    pub fn number(value: impl Into<Decimal>) -> Self {
        CellValue::Number(value.into())
    }

    pub fn string(value: impl Into<String>) -> Self {
        CellValue::String(value.into())
    }

    pub fn temporal(value: impl Into<String>) -> Self {
        CellValue::Temporal(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            CellValue::Null => 0,
            CellValue::Boolean(_) => 1,
            CellValue::Number(_) => 2,
            CellValue::String(_) | CellValue::Temporal(_) => 3,
        }
    }

    /// Compare two non-null cells of compatible kinds. Temporal cells
    /// compare with strings by their ISO text.
    pub fn compare(&self, other: &CellValue) -> Option<Ordering> {
        match (self, other) {
            (CellValue::Boolean(a), CellValue::Boolean(b)) => Some(a.cmp(b)),
            (CellValue::Number(a), CellValue::Number(b)) => Some(a.cmp(b)),
            (
                CellValue::String(a) | CellValue::Temporal(a),
                CellValue::String(b) | CellValue::Temporal(b),
            ) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Total order used for sorting: nulls first, then by kind, then by
    /// value.
    pub fn sort_cmp(&self, other: &CellValue) -> Ordering {
        self.compare(other)
            .unwrap_or_else(|| self.rank().cmp(&other.rank()))
    }
}

impl From<Decimal> for CellValue {
    fn from(value: Decimal) -> Self {
        CellValue::Number(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Boolean(value)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::String(value.to_string())
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => f.write_str("null"),
            CellValue::Boolean(b) => write!(f, "{}", b),
            CellValue::Number(n) => write!(f, "{}", n.normalize()),
            CellValue::String(s) | CellValue::Temporal(s) => f.write_str(s),
        }
    }
}

/// A result column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultColumn {
    pub name: String,
    #[serde(rename = "base-type")]
    pub kind: ValueKind,
}

/// Rows produced by an executor.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    pub columns: Vec<ResultColumn>,
    pub rows: Vec<Vec<CellValue>>,
}

impl ResultSet {
    /// Index of the column named `name`.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// All values of the column named `name`.
    pub fn column(&self, name: &str) -> Option<Vec<&CellValue>> {
        let i = self.column_index(name)?;
        Some(self.rows.iter().filter_map(|row| row.get(i)).collect())
    }
}

// ============================================================================
// Executor boundary
// ============================================================================

/// A request to execute one committed query state.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Correlates log lines for one run.
    pub id: Uuid,
    pub fingerprint: Fingerprint,
    pub query: StructuredQuery,
}

impl ExecutionRequest {
    pub fn new(query: StructuredQuery) -> ExecutionResult<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            fingerprint: query.fingerprint()?,
            query,
        })
    }
}

/// An engine that can run structured queries.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult<ResultSet>;
}

/// Whether a finished run still matches the latest submitted query.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Current(T),
    /// The query changed while this run was in flight.
    Stale { fingerprint: Fingerprint },
}

impl<T> Outcome<T> {
    pub fn is_stale(&self) -> bool {
        matches!(self, Outcome::Stale { .. })
    }

    pub fn current(self) -> Option<T> {
        match self {
            Outcome::Current(value) => Some(value),
            Outcome::Stale { .. } => None,
        }
    }
}

/// Tracks the latest submitted fingerprint so late results can be dropped.
///
/// Cloning shares the same tracker.
#[derive(Debug, Clone)]
pub struct ExecutionTracker {
    latest: std::sync::Arc<watch::Sender<Option<Fingerprint>>>,
}

impl Default for ExecutionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            latest: std::sync::Arc::new(tx),
        }
    }

    /// Record `query` as the latest state and build its request.
    pub fn submit(&self, query: &StructuredQuery) -> ExecutionResult<ExecutionRequest> {
        let request = ExecutionRequest::new(query.clone())?;
        self.latest.send_replace(Some(request.fingerprint.clone()));
        debug!(
            request_id = %request.id,
            fingerprint = %request.fingerprint,
            "submitted query"
        );
        Ok(request)
    }

    /// The most recently submitted fingerprint.
    pub fn latest(&self) -> Option<Fingerprint> {
        self.latest.borrow().clone()
    }

    /// Watch for new submissions.
    pub fn subscribe(&self) -> watch::Receiver<Option<Fingerprint>> {
        self.latest.subscribe()
    }

    /// Classify a finished run of `request`.
    pub fn accept<T>(&self, request: &ExecutionRequest, value: T) -> Outcome<T> {
        let latest = self.latest();
        if latest.as_ref() == Some(&request.fingerprint) {
            Outcome::Current(value)
        } else {
            warn!(
                request_id = %request.id,
                fingerprint = %request.fingerprint,
                latest = ?latest.map(|f| f.to_string()),
                "discarding stale results"
            );
            Outcome::Stale {
                fingerprint: request.fingerprint.clone(),
            }
        }
    }

    /// Submit `query`, run it on `executor`, and classify the result.
    pub async fn run(
        &self,
        executor: &dyn QueryExecutor,
        query: &StructuredQuery,
    ) -> ExecutionResult<Outcome<ResultSet>> {
        let request = self.submit(query)?;
        let results = executor.execute(&request).await?;
        debug!(
            request_id = %request.id,
            rows = results.rows.len(),
            "execution finished"
        );
        Ok(self.accept(&request, results))
    }
}
