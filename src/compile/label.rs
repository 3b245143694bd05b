//! Display names for compiled clauses.
//!
//! Labels read like prose: `Max of Total`, `2 × Max of Total`,
//! `Distinct values of Reviewer`. Operators use typographic symbols and
//! compound operands are parenthesized only where the reading would
//! otherwise change.

use crate::context::QueryContext;
use crate::formula::ast::{prec, BinaryOp, Literal, UnaryOp};
use crate::formula::functions::Function;
use crate::model::clause::Aggregation;
use crate::model::expr::Expression;
use crate::model::field::Identifier;

/// The user's name for an aggregation, or a generated one.
pub fn aggregation_name(aggregation: &Aggregation, ctx: &QueryContext) -> String {
    aggregation
        .name
        .clone()
        .unwrap_or_else(|| describe(&aggregation.expression, ctx))
}

/// Generate a label for an expression.
pub fn describe(expr: &Expression, ctx: &QueryContext) -> String {
    match expr {
        Expression::Value(Literal::Number(n)) => n.normalize().to_string(),
        Expression::Value(Literal::String(s)) => format!("\"{}\"", s),
        Expression::Field(id) => identifier_label(id, ctx),
        Expression::Call { function, args } => describe_call(*function, args, ctx),
        Expression::Binary { op, left, right } => {
            let l = operand(left, op.precedence(), false, ctx);
            let r = operand(right, op.precedence(), true, ctx);
            format!("{} {} {}", l, symbol(*op), r)
        }
        Expression::Unary { op, operand: inner } => {
            let text = operand(inner, op.precedence(), false, ctx);
            match op {
                UnaryOp::Neg => format!("−{}", text),
                UnaryOp::Not => format!("not {}", text),
            }
        }
        Expression::Opaque(_) => "Custom".to_string(),
    }
}

fn identifier_label(id: &Identifier, ctx: &QueryContext) -> String {
    if let Some(entry) = ctx.lookup(id) {
        return entry.label();
    }
    match id {
        Identifier::Field(f) => format!("Field {}", f),
        Identifier::ForeignField { field, .. } => format!("Field {}", field),
        Identifier::CustomColumn(name) | Identifier::StageColumn { name, .. } => name.clone(),
        Identifier::Aggregation(i) => format!("Aggregation {}", i + 1),
    }
}

fn symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "−",
        BinaryOp::Mul => "×",
        BinaryOp::Div => "÷",
        BinaryOp::Eq => "=",
        BinaryOp::Ne => "≠",
        BinaryOp::Lt => "<",
        BinaryOp::Gt => ">",
        BinaryOp::Le => "≤",
        BinaryOp::Ge => "≥",
        BinaryOp::And => "and",
        BinaryOp::Or => "or",
    }
}

fn precedence(expr: &Expression) -> u8 {
    match expr {
        Expression::Binary { op, .. } => op.precedence(),
        Expression::Unary { op, .. } => op.precedence(),
        _ => prec::ATOM,
    }
}

fn operand(expr: &Expression, parent: u8, right: bool, ctx: &QueryContext) -> String {
    let child = precedence(expr);
    let text = describe(expr, ctx);
    if child < parent || (right && child == parent) {
        format!("({})", text)
    } else {
        text
    }
}

/// Argument text for `X of <arg>`: compound arguments get parentheses.
fn argument(expr: &Expression, ctx: &QueryContext) -> String {
    operand(expr, prec::ATOM, false, ctx)
}

fn describe_call(function: Function, args: &[Expression], ctx: &QueryContext) -> String {
    let arg = |i: usize| args.get(i).map(|a| argument(a, ctx));
    let of = |prefix: &str| match arg(0) {
        Some(a) => format!("{} of {}", prefix, a),
        None => prefix.to_string(),
    };

    match function {
        Function::Count => of("Count"),
        Function::CumulativeCount => of("Cumulative count"),
        Function::Sum => of("Sum"),
        Function::CumulativeSum => of("Cumulative sum"),
        Function::Distinct => of("Distinct values"),
        Function::StandardDeviation => of("Standard deviation"),
        Function::Average => of("Average"),
        Function::Min => of("Min"),
        Function::Max => of("Max"),
        Function::Median => of("Median"),
        Function::Variance => of("Variance"),
        Function::Percentile => match (arg(0), arg(1)) {
            (Some(a), Some(p)) => format!("Percentile {} of {}", p, a),
            _ => of("Percentile"),
        },
        Function::Share => match arg(0) {
            Some(p) => format!("Share of rows where {}", p),
            None => "Share".to_string(),
        },
        Function::CountIf => match arg(0) {
            Some(p) => format!("Count where {}", p),
            None => "Count".to_string(),
        },
        Function::SumIf => match (arg(0), arg(1)) {
            (Some(a), Some(p)) => format!("Sum of {} where {}", a, p),
            _ => of("Sum"),
        },
        scalar => {
            let rendered: Vec<String> = args.iter().map(|a| describe(a, ctx)).collect();
            format!("{}({})", scalar.name(), rendered.join(", "))
        }
    }
}
