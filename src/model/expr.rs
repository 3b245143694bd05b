//! Canonical expressions stored in a structured query.
//!
//! Unlike the formula [`crate::formula::Expr`], these carry no source spans
//! and every reference is a concrete [`Identifier`]. Tags that the wire
//! decoder does not recognize are kept as [`Expression::Opaque`] so they
//! survive a round trip untouched.

use rust_decimal::Decimal;

use super::field::{FieldId, Identifier};
use crate::formula::ast::{BinaryOp, Literal, UnaryOp};
use crate::formula::functions::Function;

// =============================================================================
// Core Expression Type
// =============================================================================

/// A resolved expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Literal value
    Value(Literal),

    /// Column reference
    Field(Identifier),

    /// Function or aggregation call
    Call {
        function: Function,
        args: Vec<Expression>,
    },

    /// Binary operation
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },

    /// Prefix operation
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },

    /// Unrecognized wire form, carried verbatim
    Opaque(serde_json::Value),
}

impl Expression {
    pub fn number(value: impl Into<Decimal>) -> Self {
        Expression::Value(Literal::Number(value.into()))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Expression::Value(Literal::String(value.into()))
    }

    /// Reference a source-table field.
    pub fn field(id: u64) -> Self {
        Expression::Field(Identifier::Field(FieldId(id)))
    }

    /// Reference an earlier aggregation.
    pub fn aggregation(index: usize) -> Self {
        Expression::Field(Identifier::Aggregation(index))
    }

    pub fn custom_column(name: impl Into<String>) -> Self {
        Expression::Field(Identifier::CustomColumn(name.into()))
    }

    pub fn call(function: Function, args: Vec<Expression>) -> Self {
        Expression::Call { function, args }
    }

    pub fn binary(op: BinaryOp, left: Expression, right: Expression) -> Self {
        Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unary(op: UnaryOp, operand: Expression) -> Self {
        Expression::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Direct children, left to right.
    pub fn children(&self) -> Vec<&Expression> {
        match self {
            Expression::Value(_) | Expression::Field(_) | Expression::Opaque(_) => Vec::new(),
            Expression::Call { args, .. } => args.iter().collect(),
            Expression::Binary { left, right, .. } => vec![left, right],
            Expression::Unary { operand, .. } => vec![operand],
        }
    }

    /// Every identifier in the tree, depth first.
    pub fn identifiers(&self) -> Vec<&Identifier> {
        let mut out = Vec::new();
        self.collect_identifiers(&mut out);
        out
    }

    fn collect_identifiers<'a>(&'a self, out: &mut Vec<&'a Identifier>) {
        if let Expression::Field(id) = self {
            out.push(id);
        }
        for child in self.children() {
            child.collect_identifiers(out);
        }
    }

    /// Whether any aggregation call appears in the tree.
    pub fn contains_aggregate(&self) -> bool {
        match self {
            Expression::Call { function, .. } if function.is_aggregate() => true,
            other => other.children().into_iter().any(Expression::contains_aggregate),
        }
    }

    /// Whether the tree reads the aggregation at `index`.
    pub fn references_aggregation(&self, index: usize) -> bool {
        self.identifiers()
            .iter()
            .any(|id| id.aggregation_index() == Some(index))
    }

    /// Whether the tree reads the custom column `name`.
    pub fn references_custom_column(&self, name: &str) -> bool {
        self.identifiers()
            .iter()
            .any(|id| id.custom_column() == Some(name))
    }

    // =========================================================================
    // Rewriting
    // =========================================================================

    /// Return a copy with every identifier passed through `f`.
    pub fn map_identifiers(&self, f: &mut impl FnMut(&Identifier) -> Identifier) -> Expression {
        match self {
            Expression::Value(_) | Expression::Opaque(_) => self.clone(),
            Expression::Field(id) => Expression::Field(f(id)),
            Expression::Call { function, args } => Expression::Call {
                function: *function,
                args: args.iter().map(|a| a.map_identifiers(f)).collect(),
            },
            Expression::Binary { op, left, right } => Expression::Binary {
                op: *op,
                left: Box::new(left.map_identifiers(f)),
                right: Box::new(right.map_identifiers(f)),
            },
            Expression::Unary { op, operand } => Expression::Unary {
                op: *op,
                operand: Box::new(operand.map_identifiers(f)),
            },
        }
    }

    /// Rename aggregation references through `remap`, e.g. after a removal.
    pub fn renumber_aggregations(&self, remap: impl Fn(usize) -> usize) -> Expression {
        self.map_identifiers(&mut |id| match id {
            Identifier::Aggregation(i) => Identifier::Aggregation(remap(*i)),
            other => other.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_times_max() -> Expression {
        Expression::binary(
            BinaryOp::Mul,
            Expression::number(2),
            Expression::call(Function::Max, vec![Expression::field(42)]),
        )
    }

    #[test]
    fn test_contains_aggregate() {
        assert!(two_times_max().contains_aggregate());
        assert!(!Expression::binary(BinaryOp::Add, Expression::field(1), Expression::number(1))
            .contains_aggregate());
    }

    #[test]
    fn test_identifiers_depth_first() {
        let expr = Expression::binary(
            BinaryOp::Add,
            Expression::aggregation(0),
            Expression::call(Function::Abs, vec![Expression::custom_column("Net")]),
        );
        assert_eq!(
            expr.identifiers(),
            vec![
                &Identifier::Aggregation(0),
                &Identifier::CustomColumn("Net".into())
            ]
        );
    }

    #[test]
    fn test_renumber_aggregations() {
        let expr = Expression::binary(
            BinaryOp::Div,
            Expression::aggregation(2),
            Expression::aggregation(0),
        );
        let shifted = expr.renumber_aggregations(|i| if i > 1 { i - 1 } else { i });
        assert!(shifted.references_aggregation(1));
        assert!(!shifted.references_aggregation(2));
        assert!(shifted.references_aggregation(0));
    }
}
