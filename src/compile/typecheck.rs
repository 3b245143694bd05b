//! Lowering resolved formulas to canonical expressions, checking value
//! kinds along the way.

use crate::context::QueryContext;
use crate::formula::ast::{BinaryOp, Expr, ExprKind, Literal, UnaryOp};
use crate::formula::functions::{Function, Returns};
use crate::model::expr::Expression;
use crate::model::field::Identifier;
use crate::model::types::ValueKind;

use super::CompileError;

/// Lower a resolved tree, returning the expression and its value kind.
pub fn lower(expr: &Expr, ctx: &QueryContext) -> Result<(Expression, ValueKind), CompileError> {
    match &expr.kind {
        ExprKind::Literal(lit) => {
            let kind = match lit {
                Literal::Number(_) => ValueKind::Numeric,
                Literal::String(_) => ValueKind::String,
            };
            Ok((Expression::Value(lit.clone()), kind))
        }

        ExprKind::FieldRef(r) => {
            let id = r.target.clone().ok_or_else(|| {
                CompileError::type_error(format!("[{}] has not been resolved", r.name), expr)
            })?;
            let kind = identifier_kind(&id, ctx);
            Ok((Expression::Field(id), kind))
        }

        ExprKind::Call { function, args } => {
            let function = Function::from_name(function).ok_or_else(|| {
                CompileError::type_error(format!("unknown function {}", function), expr)
            })?;
            let mut lowered = Vec::with_capacity(args.len());
            let mut kinds = Vec::with_capacity(args.len());
            for (i, arg) in args.iter().enumerate() {
                let (arg_expr, arg_kind) = lower(arg, ctx)?;
                let expected = function.param_kind(i);
                if !expected.accepts(arg_kind) {
                    return Err(CompileError::type_error(
                        format!(
                            "{} expects {} for argument {}, but {} is {}",
                            function.name(),
                            expected.describe(),
                            i + 1,
                            arg,
                            arg_kind.describe()
                        ),
                        arg,
                    ));
                }
                lowered.push(arg_expr);
                kinds.push(arg_kind);
            }
            let kind = match function.returns() {
                Returns::Kind(kind) => kind,
                Returns::FirstArg => kinds.first().copied().unwrap_or(ValueKind::Unknown),
            };
            Ok((Expression::call(function, lowered), kind))
        }

        ExprKind::BinaryOp { op, left, right } => {
            let (l, lk) = lower(left, ctx)?;
            let (r, rk) = lower(right, ctx)?;
            let kind = binary_kind(*op, lk, rk).map_err(|reason| CompileError::type_error(reason, expr))?;
            Ok((Expression::binary(*op, l, r), kind))
        }

        ExprKind::UnaryOp { op, operand } => {
            let (inner, kind) = lower(operand, ctx)?;
            let result = unary_kind(*op, kind).map_err(|reason| CompileError::type_error(reason, expr))?;
            Ok((Expression::unary(*op, inner), result))
        }
    }
}

fn binary_kind(op: BinaryOp, left: ValueKind, right: ValueKind) -> Result<ValueKind, String> {
    if op.is_arithmetic() {
        for side in [left, right] {
            if !matches!(side, ValueKind::Numeric | ValueKind::Unknown) {
                return Err(format!(
                    "'{}' needs numbers, but got {}",
                    op.symbol(),
                    side.describe()
                ));
            }
        }
        Ok(ValueKind::Numeric)
    } else if op.is_logical() {
        for side in [left, right] {
            if !matches!(side, ValueKind::Boolean | ValueKind::Unknown) {
                return Err(format!(
                    "{} needs true/false conditions, but got {}",
                    op.symbol(),
                    side.describe()
                ));
            }
        }
        Ok(ValueKind::Boolean)
    } else {
        if !left.comparable_with(right) {
            return Err(format!(
                "cannot compare {} with {}",
                left.describe(),
                right.describe()
            ));
        }
        Ok(ValueKind::Boolean)
    }
}

fn unary_kind(op: UnaryOp, operand: ValueKind) -> Result<ValueKind, String> {
    match op {
        UnaryOp::Neg => match operand {
            ValueKind::Numeric | ValueKind::Unknown => Ok(ValueKind::Numeric),
            other => Err(format!("cannot negate {}", other.describe())),
        },
        UnaryOp::Not => match operand {
            ValueKind::Boolean | ValueKind::Unknown => Ok(ValueKind::Boolean),
            other => Err(format!("NOT needs a true/false condition, but got {}", other.describe())),
        },
    }
}

fn identifier_kind(id: &Identifier, ctx: &QueryContext) -> ValueKind {
    match id {
        Identifier::StageColumn { kind, .. } => *kind,
        other => ctx.lookup(other).map_or(ValueKind::Unknown, |e| e.kind),
    }
}

/// Best-effort value kind of an already lowered expression.
///
/// Never fails: anything that cannot be determined is `Unknown`.
pub fn infer_kind(expr: &Expression, ctx: &QueryContext) -> ValueKind {
    match expr {
        Expression::Value(Literal::Number(_)) => ValueKind::Numeric,
        Expression::Value(Literal::String(_)) => ValueKind::String,
        Expression::Field(id) => identifier_kind(id, ctx),
        Expression::Call { function, args } => match function.returns() {
            Returns::Kind(kind) => kind,
            Returns::FirstArg => args
                .first()
                .map_or(ValueKind::Unknown, |a| infer_kind(a, ctx)),
        },
        Expression::Binary { op, .. } if op.is_arithmetic() => ValueKind::Numeric,
        Expression::Binary { .. } => ValueKind::Boolean,
        Expression::Unary {
            op: UnaryOp::Neg, ..
        } => ValueKind::Numeric,
        Expression::Unary {
            op: UnaryOp::Not, ..
        } => ValueKind::Boolean,
        Expression::Opaque(_) => ValueKind::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{FieldInfo, InMemoryCatalog};
    use crate::formula;
    use crate::model::clause::ClauseKind;
    use crate::model::field::TableId;
    use crate::model::query::StructuredQuery;
    use crate::resolve::Resolver;

    fn lower_source(source: &str) -> Result<(Expression, ValueKind), CompileError> {
        let catalog = InMemoryCatalog::new().with_table(
            1,
            "Reviews",
            vec![
                FieldInfo::new(1, "Rating", ValueKind::Numeric),
                FieldInfo::new(2, "Reviewer", ValueKind::String),
                FieldInfo::new(3, "Verified", ValueKind::Boolean),
            ],
        );
        let query = StructuredQuery::new(TableId(1));
        let ctx = QueryContext::for_new(&query, &catalog, ClauseKind::Filter).unwrap();
        let resolved = Resolver::new(&ctx)
            .resolve(&formula::parse(source).unwrap())
            .unwrap();
        lower(&resolved, &ctx)
    }

    #[test]
    fn test_arithmetic_kinds() {
        let (_, kind) = lower_source("[Rating] * 2 + 1").unwrap();
        assert_eq!(kind, ValueKind::Numeric);
        assert!(lower_source("[Reviewer] + 1").is_err());
    }

    #[test]
    fn test_comparison_needs_matching_kinds() {
        assert_eq!(
            lower_source("[Reviewer] = \"bob\"").unwrap().1,
            ValueKind::Boolean
        );
        let err = lower_source("[Reviewer] > 3").unwrap_err();
        assert_eq!(err.to_string(), "cannot compare a string with a number");
    }

    #[test]
    fn test_logical_operands_must_be_boolean() {
        assert!(lower_source("[Verified] AND [Rating] > 3").is_ok());
        assert!(lower_source("[Rating] AND [Verified]").is_err());
        assert!(lower_source("NOT [Reviewer]").is_err());
    }

    #[test]
    fn test_min_returns_argument_kind() {
        assert_eq!(lower_source("Min([Reviewer])").unwrap().1, ValueKind::String);
    }

    #[test]
    fn test_argument_kind_error_points_at_argument() {
        let err = lower_source("Sum([Reviewer])").unwrap_err();
        let CompileError::TypeError { span, reason } = err else {
            panic!("expected type error");
        };
        assert_eq!(span, 4..14);
        assert!(reason.contains("Sum expects a number"));
    }
}
