//! Reference resolution.
//!
//! Binds every [`FieldRef`] in a parsed formula to a concrete
//! [`Identifier`] drawn from a [`QueryContext`], and every call to a
//! [`Function`] of the registry. The input tree is never modified; a
//! resolved copy is returned.

use thiserror::Error;
use tracing::debug;

use crate::context::QueryContext;
use crate::formula::ast::{Expr, ExprKind, FieldRef};
use crate::formula::functions::Function;
use crate::formula::span::Span;
use crate::model::field::Identifier;

/// Path separators recognized inside bracket references by default.
pub const DEFAULT_SEPARATORS: &[&str] = &["→", "->"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("unknown name '{name}'")]
    UnresolvedReference { name: String, span: Span },

    #[error("'{name}' is ambiguous; it could mean {}", candidates.join(", "))]
    AmbiguousReference {
        name: String,
        candidates: Vec<String>,
        span: Span,
    },

    #[error("{reason}")]
    TypeError { reason: String, span: Span },
}

impl ResolveError {
    pub fn span(&self) -> Span {
        match self {
            ResolveError::UnresolvedReference { span, .. }
            | ResolveError::AmbiguousReference { span, .. }
            | ResolveError::TypeError { span, .. } => span.clone(),
        }
    }
}

/// Resolves formulas against one query context.
pub struct Resolver<'c> {
    ctx: &'c QueryContext,
    separators: Vec<String>,
}

impl<'c> Resolver<'c> {
    pub fn new(ctx: &'c QueryContext) -> Self {
        Self {
            ctx,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Replace the recognized path separators.
    pub fn with_separators(mut self, separators: Vec<String>) -> Self {
        self.separators = separators;
        self
    }

    /// Resolve every reference and call in `expr`.
    pub fn resolve(&self, expr: &Expr) -> Result<Expr, ResolveError> {
        let resolved = self.resolve_node(expr)?;
        debug!(position = %self.ctx.position(), "resolved formula");
        Ok(resolved)
    }

    fn resolve_node(&self, expr: &Expr) -> Result<Expr, ResolveError> {
        let kind = match &expr.kind {
            ExprKind::Literal(_) => expr.kind.clone(),
            ExprKind::FieldRef(r) => return self.resolve_ref(r, &expr.span),
            ExprKind::Call { function, args } => {
                return self.resolve_call(function, args, &expr.span)
            }
            ExprKind::BinaryOp { op, left, right } => ExprKind::BinaryOp {
                op: *op,
                left: Box::new(self.resolve_node(left)?),
                right: Box::new(self.resolve_node(right)?),
            },
            ExprKind::UnaryOp { op, operand } => ExprKind::UnaryOp {
                op: *op,
                operand: Box::new(self.resolve_node(operand)?),
            },
        };
        Ok(Expr::new(kind, expr.span.clone()))
    }

    /// Split bracket text into trimmed path segments.
    fn segments(&self, name: &str) -> Vec<String> {
        let mut normalized = name.to_string();
        for sep in &self.separators {
            normalized = normalized.replace(sep.as_str(), "\u{0}");
        }
        normalized
            .split('\u{0}')
            .map(|s| s.trim().to_string())
            .collect()
    }

    fn resolve_ref(&self, r: &FieldRef, span: &Span) -> Result<Expr, ResolveError> {
        let segments = self.segments(&r.name);
        let borrowed: Vec<&str> = segments.iter().map(String::as_str).collect();
        let candidates = self.ctx.candidates(&borrowed);

        match candidates.as_slice() {
            [entry] => Ok(Expr::new(
                ExprKind::FieldRef(FieldRef {
                    name: r.name.clone(),
                    target: Some(entry.identifier.clone()),
                }),
                span.clone(),
            )),
            [] => {
                // `Count` on its own is shorthand for `Count()`.
                if let [single] = borrowed.as_slice() {
                    if let Some(function) = Function::from_name(single) {
                        if function.is_aggregate() && function.accepts_arg_count(0) {
                            return Ok(Expr::new(
                                ExprKind::Call {
                                    function: function.name().to_string(),
                                    args: Vec::new(),
                                },
                                span.clone(),
                            ));
                        }
                    }
                }
                Err(ResolveError::UnresolvedReference {
                    name: r.name.trim().to_string(),
                    span: span.clone(),
                })
            }
            many => Err(ResolveError::AmbiguousReference {
                name: r.name.trim().to_string(),
                candidates: many.iter().map(|e| e.qualified_name()).collect(),
                span: span.clone(),
            }),
        }
    }

    fn resolve_call(&self, name: &str, args: &[Expr], span: &Span) -> Result<Expr, ResolveError> {
        let function =
            Function::from_name(name).ok_or_else(|| ResolveError::UnresolvedReference {
                name: name.to_string(),
                span: span.clone(),
            })?;

        if !function.accepts_arg_count(args.len()) {
            return Err(ResolveError::TypeError {
                reason: format!(
                    "{} expects {}, got {}",
                    function.name(),
                    function.describe_arity(),
                    args.len()
                ),
                span: span.clone(),
            });
        }

        let args = args
            .iter()
            .map(|a| self.resolve_node(a))
            .collect::<Result<Vec<_>, _>>()?;

        if function.is_aggregate() {
            if let Some(nested) = args.iter().find(|a| contains_aggregate(a)) {
                return Err(ResolveError::TypeError {
                    reason: format!(
                        "{} cannot contain another aggregation",
                        function.name()
                    ),
                    span: nested.span.clone(),
                });
            }
        }

        Ok(Expr::new(
            ExprKind::Call {
                function: function.name().to_string(),
                args,
            },
            span.clone(),
        ))
    }
}

/// Whether a resolved tree aggregates: an aggregation call or a reference
/// to an earlier aggregation.
pub fn contains_aggregate(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Literal(_) => false,
        ExprKind::FieldRef(r) => matches!(r.target, Some(Identifier::Aggregation(_))),
        ExprKind::Call { function, args } => {
            Function::from_name(function).is_some_and(|f| f.is_aggregate())
                || args.iter().any(contains_aggregate)
        }
        ExprKind::BinaryOp { left, right, .. } => {
            contains_aggregate(left) || contains_aggregate(right)
        }
        ExprKind::UnaryOp { operand, .. } => contains_aggregate(operand),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{FieldInfo, InMemoryCatalog};
    use crate::formula;
    use crate::model::clause::ClauseKind;
    use crate::model::field::{FieldId, TableId};
    use crate::model::query::StructuredQuery;
    use crate::model::types::ValueKind;

    fn context() -> QueryContext {
        let catalog = InMemoryCatalog::new().with_table(
            1,
            "Orders",
            vec![
                FieldInfo::new(1, "Total", ValueKind::Numeric),
                FieldInfo::new(2, "Discount", ValueKind::Numeric),
            ],
        );
        let query = StructuredQuery::new(TableId(1));
        QueryContext::for_new(&query, &catalog, ClauseKind::Aggregation).unwrap()
    }

    fn resolve(source: &str) -> Result<Expr, ResolveError> {
        let ctx = context();
        Resolver::new(&ctx).resolve(&formula::parse(source).unwrap())
    }

    #[test]
    fn test_resolves_field_and_canonicalizes_function() {
        let expr = resolve("max([Total])").unwrap();
        match expr.kind {
            ExprKind::Call { function, args } => {
                assert_eq!(function, "Max");
                assert_eq!(
                    args[0].field_refs()[0].target,
                    Some(Identifier::Field(FieldId(1)))
                );
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_input_is_untouched() {
        let ctx = context();
        let parsed = formula::parse("Sum([Total])").unwrap();
        let _ = Resolver::new(&ctx).resolve(&parsed).unwrap();
        assert!(parsed.field_refs()[0].target.is_none());
    }

    #[test]
    fn test_bare_count_becomes_call() {
        assert_eq!(resolve("Count").unwrap(), Expr::call("Count", vec![]));
    }

    #[test]
    fn test_unknown_field() {
        let err = resolve("Sum([Tax])").unwrap_err();
        assert_eq!(
            err,
            ResolveError::UnresolvedReference {
                name: "Tax".into(),
                span: 4..9
            }
        );
    }

    #[test]
    fn test_unknown_function() {
        let err = resolve("Frob([Total])").unwrap_err();
        assert!(matches!(err, ResolveError::UnresolvedReference { ref name, .. } if name == "Frob"));
    }

    #[test]
    fn test_arity_violation() {
        let err = resolve("Sum([Total], [Discount])").unwrap_err();
        assert!(matches!(err, ResolveError::TypeError { .. }));
        assert_eq!(err.to_string(), "Sum expects 1 argument, got 2");
    }

    #[test]
    fn test_nested_aggregation_rejected() {
        let err = resolve("Sum(Max([Total]))").unwrap_err();
        assert!(matches!(err, ResolveError::TypeError { span, .. } if span == (4..16)));
    }

    #[test]
    fn test_ascii_arrow_separator() {
        let ctx = context();
        let resolver = Resolver::new(&ctx);
        assert_eq!(resolver.segments("Product -> Price"), vec!["Product", "Price"]);
        assert_eq!(resolver.segments("Product → Price"), vec!["Product", "Price"]);
    }
}
