//! Compiling formulas into structured query clauses.
//!
//! ```text
//! formula text → parse → resolve (QueryContext) → lower + kind checks → Clause
//! ```
//!
//! # Example
//!
//! ```ignore
//! use quarry::compile::{Compiler, TargetKind};
//! use quarry::sample;
//!
//! let catalog = sample::catalog();
//! let query = sample::orders_query();
//! let compiled = Compiler::new(&catalog).compile(&query, "2 * Max([Total])", TargetKind::Aggregation, None)?;
//! assert_eq!(compiled.display_name, "2 × Max of Total");
//! ```

pub mod label;
pub mod typecheck;

use thiserror::Error;
use tracing::debug;

use crate::config::Settings;
use crate::context::{Catalog, QueryContext};
use crate::error::QueryError;
use crate::formula::ast::{Expr, ExprKind};
use crate::formula::span::Span;
use crate::formula::{self, DEFAULT_MAX_DEPTH};
use crate::model::clause::{Aggregation, Clause, ClauseKind, ClausePosition, CustomColumn, Filter};
use crate::model::consistency::{Maintainer, OrderByPolicy};
use crate::model::field::Identifier;
use crate::model::query::StructuredQuery;
use crate::model::types::ValueKind;
use crate::resolve::{contains_aggregate, Resolver, DEFAULT_SEPARATORS};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("{reason}")]
    TypeError { reason: String, span: Span },

    #[error("a custom column needs a name")]
    MissingName,
}

impl CompileError {
    pub(crate) fn type_error(reason: impl Into<String>, at: &Expr) -> Self {
        CompileError::TypeError {
            reason: reason.into(),
            span: at.span.clone(),
        }
    }

    pub fn span(&self) -> Option<Span> {
        match self {
            CompileError::TypeError { span, .. } => Some(span.clone()),
            CompileError::MissingName => None,
        }
    }
}

// ============================================================================
// Options
// ============================================================================

/// What a formula is compiled into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Aggregation,
    Filter,
    CustomColumn,
}

impl TargetKind {
    pub fn clause_kind(&self) -> ClauseKind {
        match self {
            TargetKind::Aggregation => ClauseKind::Aggregation,
            TargetKind::Filter => ClauseKind::Filter,
            TargetKind::CustomColumn => ClauseKind::CustomColumn,
        }
    }
}

/// Options for compilation.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Path separators recognized inside bracket references.
    pub separators: Vec<String>,
    /// Nesting limit for formulas.
    pub max_depth: usize,
    /// Applied when `add_to_query` commits the clause.
    pub order_by_policy: OrderByPolicy,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
            max_depth: DEFAULT_MAX_DEPTH,
            order_by_policy: OrderByPolicy::default(),
        }
    }
}

impl CompileOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            separators: settings.formula.path_separators.clone(),
            max_depth: settings.formula.max_depth,
            order_by_policy: settings.consistency.order_by_policy,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_order_by_policy(mut self, policy: OrderByPolicy) -> Self {
        self.order_by_policy = policy;
        self
    }
}

// ============================================================================
// Result Types
// ============================================================================

/// A compiled clause ready to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledClause {
    pub clause: Clause,
    /// The user's name, or a generated label.
    pub display_name: String,
    pub kind: ValueKind,
    /// The resolved formula tree.
    pub resolved: Expr,
}

// ============================================================================
// Compiler
// ============================================================================

/// Runs the formula pipeline against a catalog.
pub struct Compiler<'c> {
    catalog: &'c dyn Catalog,
    options: CompileOptions,
}

impl<'c> Compiler<'c> {
    pub fn new(catalog: &'c dyn Catalog) -> Self {
        Self {
            catalog,
            options: CompileOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    /// Compile `source` as a clause appended to the end of its list.
    pub fn compile(
        &self,
        query: &StructuredQuery,
        source: &str,
        target: TargetKind,
        name: Option<&str>,
    ) -> Result<CompiledClause, QueryError> {
        let position = ClausePosition::new(target.clause_kind(), query.len(target.clause_kind()));
        self.compile_at(query, source, target, name, position)
    }

    /// Compile `source` as the clause that will sit at `position`.
    pub fn compile_at(
        &self,
        query: &StructuredQuery,
        source: &str,
        target: TargetKind,
        name: Option<&str>,
        position: ClausePosition,
    ) -> Result<CompiledClause, QueryError> {
        let ctx = QueryContext::at(query, self.catalog, position)?;
        let parsed = formula::parse_with_depth(source, self.options.max_depth)?;
        let resolved = Resolver::new(&ctx)
            .with_separators(self.options.separators.clone())
            .resolve(&parsed)?;
        let compiled = compile_resolved(&resolved, target, name, &ctx)?;
        debug!(
            target_kind = ?target,
            display_name = %compiled.display_name,
            "compiled formula"
        );
        Ok(compiled)
    }

    /// Compile `source` and insert it into `query`.
    ///
    /// `index` defaults to the end of the target's clause list. The query is
    /// validated and its revision bumped; on error the input is unchanged.
    pub fn add_to_query(
        &self,
        query: &StructuredQuery,
        source: &str,
        target: TargetKind,
        name: Option<&str>,
        index: Option<usize>,
    ) -> Result<StructuredQuery, QueryError> {
        let kind = target.clause_kind();
        let position = ClausePosition::new(kind, index.unwrap_or(query.len(kind)));
        let compiled = self.compile_at(query, source, target, name, position)?;
        let updated = Maintainer::new(self.catalog)
            .with_policy(self.options.order_by_policy)
            .insert_clause(query, position, compiled.clause)?;
        Ok(updated)
    }
}

/// Turn a resolved tree into a clause of the requested kind.
pub fn compile_resolved(
    resolved: &Expr,
    target: TargetKind,
    name: Option<&str>,
    ctx: &QueryContext,
) -> Result<CompiledClause, CompileError> {
    let (expression, kind) = typecheck::lower(resolved, ctx)?;

    let clause = match target {
        TargetKind::Aggregation => {
            if !contains_aggregate(resolved) {
                return Err(CompileError::type_error(
                    "an aggregation formula must use an aggregation such as Sum or Count",
                    resolved,
                ));
            }
            if let Some(field) = field_outside_aggregate(resolved) {
                return Err(CompileError::type_error(
                    format!("{} must be inside an aggregation", field),
                    field,
                ));
            }
            Clause::Aggregation(Aggregation {
                expression: expression.clone(),
                name: name.map(str::to_string),
                options: Default::default(),
            })
        }
        TargetKind::Filter => {
            reject_aggregates(resolved, "filters")?;
            if !matches!(kind, ValueKind::Boolean | ValueKind::Unknown) {
                return Err(CompileError::type_error(
                    format!("a filter must be a true/false condition, not {}", kind.describe()),
                    resolved,
                ));
            }
            Clause::Filter(Filter {
                predicate: expression.clone(),
            })
        }
        TargetKind::CustomColumn => {
            reject_aggregates(resolved, "custom columns")?;
            let name = name
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .ok_or(CompileError::MissingName)?;
            Clause::CustomColumn(CustomColumn {
                name: name.to_string(),
                expression: expression.clone(),
            })
        }
    };

    let display_name = match name {
        Some(n) => n.to_string(),
        None => label::describe(&expression, ctx),
    };

    Ok(CompiledClause {
        clause,
        display_name,
        kind,
        resolved: resolved.clone(),
    })
}

fn reject_aggregates(resolved: &Expr, what: &str) -> Result<(), CompileError> {
    if contains_aggregate(resolved) {
        return Err(CompileError::type_error(
            format!("{} cannot use aggregations", what),
            resolved,
        ));
    }
    Ok(())
}

/// The first column reference not wrapped in an aggregation, if any.
fn field_outside_aggregate(expr: &Expr) -> Option<&Expr> {
    match &expr.kind {
        ExprKind::Literal(_) => None,
        ExprKind::FieldRef(r) => match r.target {
            Some(Identifier::Aggregation(_)) => None,
            _ => Some(expr),
        },
        ExprKind::Call { function, args } => {
            if formula::Function::from_name(function).is_some_and(|f| f.is_aggregate()) {
                None
            } else {
                args.iter().find_map(field_outside_aggregate)
            }
        }
        ExprKind::BinaryOp { left, right, .. } => {
            field_outside_aggregate(left).or_else(|| field_outside_aggregate(right))
        }
        ExprKind::UnaryOp { operand, .. } => field_outside_aggregate(operand),
    }
}
