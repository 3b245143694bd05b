//! Unified error type for the query pipeline.

use thiserror::Error;

use crate::compile::CompileError;
use crate::context::CatalogError;
use crate::formula::{FormulaError, Span};
use crate::model::consistency::ConsistencyError;
use crate::model::serialize::WireError;
use crate::resolve::ResolveError;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Formula(#[from] FormulaError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Consistency(#[from] ConsistencyError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Wire(#[from] WireError),
}

impl QueryError {
    /// Source span in the formula, for errors that have one.
    pub fn span(&self) -> Option<Span> {
        match self {
            QueryError::Formula(e) => Some(e.span()),
            QueryError::Resolve(e) => Some(e.span()),
            QueryError::Compile(e) => e.span(),
            QueryError::Consistency(_) | QueryError::Catalog(_) | QueryError::Wire(_) => None,
        }
    }
}

pub type QueryResult<T> = Result<T, QueryError>;
