//! JSON wire format for structured queries.
//!
//! Queries travel as JSON objects whose clauses are tagged arrays:
//!
//! ```text
//! {
//!   "source-table": 2,
//!   "expressions": {"Net": ["-", ["field-id", 12], ["field-id", 13]]},
//!   "filters": [[">", ["field-id", 12], 30]],
//!   "aggregation": [["aggregation-options", ["*", 2, ["max", ["field-id", 12]]],
//!                    {"display-name": "Double max"}]],
//!   "breakout": [["datetime-field", ["field-id", 15], "month"]],
//!   "order-by": [["desc", ["aggregation", 0]]],
//!   "limit": 10
//! }
//! ```
//!
//! Decoding is structural only; use
//! [`Maintainer::validate`](super::consistency::Maintainer::validate) to
//! check a decoded query against a catalog. Keys this model does not know
//! are preserved verbatim, as are expression tags it does not recognize.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Number, Value};
use thiserror::Error;

use super::clause::{Aggregation, Breakout, CustomColumn, Direction, Filter, OrderBy, OrderTarget};
use super::expr::Expression;
use super::field::{FieldId, Identifier, TableId};
use super::query::{SourceRef, StructuredQuery};
use super::types::{TemporalUnit, ValueKind};
use crate::formula::ast::{BinaryOp, Literal, UnaryOp};
use crate::formula::functions::Function;

const KNOWN_KEYS: &[&str] = &[
    "source-table",
    "source-query",
    "expressions",
    "filters",
    "filter",
    "aggregation",
    "breakout",
    "order-by",
    "limit",
];

#[derive(Debug, Error)]
pub enum WireError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed {path}: {reason}")]
    Malformed { path: String, reason: String },

    #[error("query has neither source-table nor source-query")]
    MissingSource,

    #[error("order-by {0} points at a breakout that does not exist")]
    DanglingOrderBy(usize),
}

fn malformed(path: &str, reason: impl Into<String>) -> WireError {
    WireError::Malformed {
        path: path.to_string(),
        reason: reason.into(),
    }
}

// ============================================================================
// Query
// ============================================================================

/// Encode a query as a JSON value.
pub fn to_value(query: &StructuredQuery) -> Result<Value, WireError> {
    let mut obj = Map::new();

    match &query.source {
        SourceRef::Table(id) => {
            obj.insert("source-table".into(), json!(id.0));
        }
        SourceRef::Query(inner) => {
            obj.insert("source-query".into(), to_value(inner)?);
        }
    }

    if !query.custom_columns.is_empty() {
        let expressions: Map<String, Value> = query
            .custom_columns
            .iter()
            .map(|c| Ok((c.name.clone(), expression_to_value(&c.expression)?)))
            .collect::<Result<_, WireError>>()?;
        obj.insert("expressions".into(), Value::Object(expressions));
    }

    if !query.filters.is_empty() {
        let filters = query
            .filters
            .iter()
            .map(|f| expression_to_value(&f.predicate))
            .collect::<Result<Vec<_>, _>>()?;
        obj.insert("filters".into(), Value::Array(filters));
    }

    if !query.aggregations.is_empty() {
        let aggregations = query
            .aggregations
            .iter()
            .map(aggregation_to_value)
            .collect::<Result<Vec<_>, _>>()?;
        obj.insert("aggregation".into(), Value::Array(aggregations));
    }

    if !query.breakouts.is_empty() {
        let breakouts = query.breakouts.iter().map(breakout_to_value).collect();
        obj.insert("breakout".into(), Value::Array(breakouts));
    }

    if !query.order_by.is_empty() {
        let order_by = query
            .order_by
            .iter()
            .enumerate()
            .map(|(i, o)| order_by_to_value(query, i, o))
            .collect::<Result<Vec<_>, _>>()?;
        obj.insert("order-by".into(), Value::Array(order_by));
    }

    if let Some(limit) = query.limit {
        obj.insert("limit".into(), json!(limit));
    }

    for (key, value) in &query.extra {
        obj.insert(key.clone(), value.clone());
    }

    Ok(Value::Object(obj))
}

/// Decode a query from a JSON value.
pub fn from_value(value: &Value) -> Result<StructuredQuery, WireError> {
    let obj = value
        .as_object()
        .ok_or_else(|| malformed("query", "expected an object"))?;

    let mut query = if let Some(id) = obj.get("source-table") {
        let id = id
            .as_u64()
            .ok_or_else(|| malformed("source-table", "expected a table id"))?;
        StructuredQuery::new(TableId(id))
    } else if let Some(inner) = obj.get("source-query") {
        StructuredQuery::over(from_value(inner)?)
    } else {
        return Err(WireError::MissingSource);
    };

    if let Some(expressions) = obj.get("expressions") {
        let map = expressions
            .as_object()
            .ok_or_else(|| malformed("expressions", "expected an object"))?;
        for (name, expr) in map {
            query.custom_columns.push(CustomColumn {
                name: name.clone(),
                expression: expression_from_value(expr, &format!("expressions.{}", name))?,
            });
        }
    }

    if let Some(filters) = obj.get("filters") {
        for (i, f) in array(filters, "filters")?.iter().enumerate() {
            query.filters.push(Filter {
                predicate: expression_from_value(f, &format!("filters[{}]", i))?,
            });
        }
    } else if let Some(filter) = obj.get("filter") {
        query.filters = split_legacy_filter(expression_from_value(filter, "filter")?);
    }

    if let Some(aggregations) = obj.get("aggregation") {
        for (i, a) in array(aggregations, "aggregation")?.iter().enumerate() {
            query
                .aggregations
                .push(aggregation_from_value(a, &format!("aggregation[{}]", i))?);
        }
    }

    if let Some(breakouts) = obj.get("breakout") {
        for (i, b) in array(breakouts, "breakout")?.iter().enumerate() {
            query
                .breakouts
                .push(breakout_from_value(b, &format!("breakout[{}]", i))?);
        }
    }

    if let Some(order_by) = obj.get("order-by") {
        for (i, o) in array(order_by, "order-by")?.iter().enumerate() {
            let decoded = order_by_from_value(&query, o, &format!("order-by[{}]", i))?;
            query.order_by.push(decoded);
        }
    }

    if let Some(limit) = obj.get("limit") {
        query.limit = Some(
            limit
                .as_u64()
                .ok_or_else(|| malformed("limit", "expected a non-negative integer"))?,
        );
    }

    for (key, value) in obj {
        if !KNOWN_KEYS.contains(&key.as_str()) {
            query.extra.insert(key.clone(), value.clone());
        }
    }

    Ok(query)
}

/// Encode a query as pretty-printed JSON text.
pub fn to_string_pretty(query: &StructuredQuery) -> Result<String, WireError> {
    Ok(serde_json::to_string_pretty(&to_value(query)?)?)
}

/// Decode a query from JSON text.
pub fn from_str(s: &str) -> Result<StructuredQuery, WireError> {
    let value: Value = serde_json::from_str(s)?;
    from_value(&value)
}

impl Serialize for StructuredQuery {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        to_value(self)
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StructuredQuery {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        from_value(&value).map_err(serde::de::Error::custom)
    }
}

fn array<'v>(value: &'v Value, path: &str) -> Result<&'v Vec<Value>, WireError> {
    value
        .as_array()
        .ok_or_else(|| malformed(path, "expected an array"))
}

/// A single legacy `filter` value holds every predicate under one `and`.
fn split_legacy_filter(predicate: Expression) -> Vec<Filter> {
    fn collect(expr: Expression, out: &mut Vec<Filter>) {
        match expr {
            Expression::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => {
                collect(*left, out);
                collect(*right, out);
            }
            other => out.push(Filter { predicate: other }),
        }
    }
    let mut out = Vec::new();
    collect(predicate, &mut out);
    out
}

// ============================================================================
// Clauses
// ============================================================================

fn aggregation_to_value(aggregation: &Aggregation) -> Result<Value, WireError> {
    let expr = expression_to_value(&aggregation.expression)?;
    if aggregation.name.is_none() && aggregation.options.is_empty() {
        return Ok(expr);
    }
    let mut options = Map::new();
    if let Some(name) = &aggregation.name {
        options.insert("display-name".into(), Value::String(name.clone()));
    }
    for (key, value) in &aggregation.options {
        options.insert(key.clone(), value.clone());
    }
    Ok(json!(["aggregation-options", expr, options]))
}

fn aggregation_from_value(value: &Value, path: &str) -> Result<Aggregation, WireError> {
    if let Some((tag, args)) = tagged(value) {
        match tag {
            "aggregation-options" => {
                let [expr, options] = args else {
                    return Err(malformed(path, "aggregation-options takes an expression and options"));
                };
                let Some(options) = options.as_object() else {
                    return Err(malformed(path, "aggregation options must be an object"));
                };
                let mut options = options.clone();
                let name = match options.remove("display-name") {
                    Some(Value::String(name)) => Some(name),
                    Some(other) => {
                        return Err(malformed(path, format!("display-name must be a string, not {}", other)))
                    }
                    // A lone `name` is read as the display name.
                    None => match options.remove("name") {
                        Some(Value::String(name)) => Some(name),
                        Some(other) => {
                            options.insert("name".into(), other);
                            None
                        }
                        None => None,
                    },
                };
                return Ok(Aggregation {
                    expression: expression_from_value(expr, path)?,
                    name,
                    options,
                });
            }
            "named" => {
                let [expr, name] = args else {
                    return Err(malformed(path, "named takes an expression and a name"));
                };
                let mut aggregation = Aggregation::new(expression_from_value(expr, path)?);
                aggregation.name = name.as_str().map(str::to_string);
                return Ok(aggregation);
            }
            _ => {}
        }
    }
    Ok(Aggregation::new(expression_from_value(value, path)?))
}

fn breakout_to_value(breakout: &Breakout) -> Value {
    let field = identifier_to_value(&breakout.field);
    match breakout.granularity {
        Some(unit) => json!(["datetime-field", field, unit.as_str()]),
        None => field,
    }
}

fn breakout_from_value(value: &Value, path: &str) -> Result<Breakout, WireError> {
    match tagged(value) {
        Some(("datetime-field", [field, unit])) => {
            let unit = unit
                .as_str()
                .and_then(TemporalUnit::from_str)
                .ok_or_else(|| malformed(path, format!("unknown temporal unit {}", unit)))?;
            Ok(Breakout::with_granularity(
                identifier_from_value(field, path)?,
                unit,
            ))
        }
        _ => Ok(Breakout::new(identifier_from_value(value, path)?)),
    }
}

fn order_by_to_value(
    query: &StructuredQuery,
    index: usize,
    order_by: &OrderBy,
) -> Result<Value, WireError> {
    let target = match &order_by.target {
        OrderTarget::Aggregation(i) => json!(["aggregation", i]),
        OrderTarget::Breakout(i) => query
            .breakouts
            .get(*i)
            .map(breakout_to_value)
            .ok_or(WireError::DanglingOrderBy(index))?,
        OrderTarget::Field(id) => identifier_to_value(id),
    };
    Ok(json!([order_by.direction.as_str(), target]))
}

fn order_by_from_value(
    query: &StructuredQuery,
    value: &Value,
    path: &str,
) -> Result<OrderBy, WireError> {
    let Some((tag, [target])) = tagged(value) else {
        return Err(malformed(path, "expected [direction, reference]"));
    };
    let direction = match tag {
        "asc" => Direction::Asc,
        "desc" => Direction::Desc,
        other => return Err(malformed(path, format!("unknown direction '{}'", other))),
    };

    if let Some(("aggregation", [index])) = tagged(target) {
        let index = index
            .as_u64()
            .ok_or_else(|| malformed(path, "aggregation index must be an integer"))?;
        return Ok(OrderBy {
            direction,
            target: OrderTarget::Aggregation(index as usize),
        });
    }

    let breakout = breakout_from_value(target, path)?;
    let target = match query.breakouts.iter().position(|b| *b == breakout) {
        Some(i) => OrderTarget::Breakout(i),
        None if breakout.granularity.is_none() => OrderTarget::Field(breakout.field),
        None => return Err(malformed(path, "bucketed sort does not match any breakout")),
    };
    Ok(OrderBy { direction, target })
}

// ============================================================================
// Expressions
// ============================================================================

fn tagged(value: &Value) -> Option<(&str, &[Value])> {
    let items = value.as_array()?;
    let (tag, rest) = items.split_first()?;
    Some((tag.as_str()?, rest))
}

fn decimal_to_value(d: &Decimal) -> Result<Value, WireError> {
    let number = Number::from_str(&d.to_string())?;
    Ok(Value::Number(number))
}

fn decimal_from_number(n: &Number, path: &str) -> Result<Decimal, WireError> {
    let text = n.to_string();
    exact_decimal(&text)
        .ok_or_else(|| malformed(path, format!("number {} does not fit a decimal exactly", text)))
}

/// Parses plain or scientific notation, refusing anything that would round.
fn exact_decimal(text: &str) -> Option<Decimal> {
    let Some((mantissa, exponent)) = text.split_once(['e', 'E']) else {
        return Decimal::from_str_exact(text).ok();
    };
    let m = Decimal::from_str_exact(mantissa).ok()?;
    let exponent: i64 = exponent.parse().ok()?;
    let scale = i64::from(m.scale()).checked_sub(exponent)?;
    if scale >= 0 {
        Decimal::try_from_i128_with_scale(m.mantissa(), u32::try_from(scale).ok()?).ok()
    } else {
        let factor = 10i128.checked_pow(u32::try_from(-scale).ok()?)?;
        Decimal::try_from_i128_with_scale(m.mantissa().checked_mul(factor)?, 0).ok()
    }
}

fn identifier_to_value(id: &Identifier) -> Value {
    match id {
        Identifier::Field(f) => json!(["field-id", f.0]),
        Identifier::ForeignField { fk, field } => {
            json!(["fk->", ["field-id", fk.0], ["field-id", field.0]])
        }
        Identifier::CustomColumn(name) => json!(["expression", name]),
        Identifier::StageColumn { name, kind } => json!(["field-literal", name, kind.base_type()]),
        Identifier::Aggregation(i) => json!(["aggregation", i]),
    }
}

fn field_id(value: &Value, path: &str) -> Result<FieldId, WireError> {
    match tagged(value) {
        Some(("field-id", [id])) => id
            .as_u64()
            .map(FieldId)
            .ok_or_else(|| malformed(path, "field-id takes an integer")),
        _ => value
            .as_u64()
            .map(FieldId)
            .ok_or_else(|| malformed(path, "expected a field-id reference")),
    }
}

/// Decode a field reference. Returns `None` if the tag is not a reference.
fn try_identifier(value: &Value, path: &str) -> Result<Option<Identifier>, WireError> {
    let Some((tag, args)) = tagged(value) else {
        return Ok(None);
    };
    let id = match (tag, args) {
        ("field-id", [_]) => Identifier::Field(field_id(value, path)?),
        ("fk->", [fk, field]) => Identifier::ForeignField {
            fk: field_id(fk, path)?,
            field: field_id(field, path)?,
        },
        ("expression", [name]) => Identifier::CustomColumn(
            name.as_str()
                .ok_or_else(|| malformed(path, "expression reference takes a name"))?
                .to_string(),
        ),
        ("field-literal", [name, base]) => Identifier::StageColumn {
            name: name
                .as_str()
                .ok_or_else(|| malformed(path, "field-literal takes a name"))?
                .to_string(),
            kind: base
                .as_str()
                .and_then(ValueKind::from_base_type)
                .unwrap_or(ValueKind::Unknown),
        },
        ("aggregation", [index]) => Identifier::Aggregation(
            index
                .as_u64()
                .ok_or_else(|| malformed(path, "aggregation index must be an integer"))?
                as usize,
        ),
        ("field-id" | "fk->" | "expression" | "field-literal" | "aggregation", _) => {
            return Err(malformed(path, format!("wrong number of arguments to {}", tag)))
        }
        _ => return Ok(None),
    };
    Ok(Some(id))
}

fn identifier_from_value(value: &Value, path: &str) -> Result<Identifier, WireError> {
    try_identifier(value, path)?.ok_or_else(|| malformed(path, "expected a field reference"))
}

/// Encode an expression.
pub fn expression_to_value(expr: &Expression) -> Result<Value, WireError> {
    Ok(match expr {
        Expression::Value(Literal::Number(d)) => decimal_to_value(d)?,
        Expression::Value(Literal::String(s)) => Value::String(s.clone()),
        Expression::Field(id) => identifier_to_value(id),
        Expression::Call { function, args } => {
            let mut items = vec![json!(function.wire_tag())];
            for arg in args {
                items.push(expression_to_value(arg)?);
            }
            Value::Array(items)
        }
        Expression::Binary { op, left, right } if op.is_logical() => {
            // Left-leaning chains of the same connective print flat.
            let mut operands = vec![right.as_ref()];
            let mut head = left.as_ref();
            while let Expression::Binary {
                op: inner,
                left,
                right,
            } = head
            {
                if inner != op {
                    break;
                }
                operands.push(right.as_ref());
                head = left.as_ref();
            }
            operands.push(head);
            let mut items = vec![json!(op.wire_tag())];
            for operand in operands.into_iter().rev() {
                items.push(expression_to_value(operand)?);
            }
            Value::Array(items)
        }
        Expression::Binary { op, left, right } => json!([
            op.wire_tag(),
            expression_to_value(left)?,
            expression_to_value(right)?
        ]),
        Expression::Unary { op, operand } => {
            let tag = match op {
                UnaryOp::Neg => "-",
                UnaryOp::Not => "not",
            };
            json!([tag, expression_to_value(operand)?])
        }
        Expression::Opaque(value) => value.clone(),
    })
}

/// Decode an expression. Unknown tags become [`Expression::Opaque`].
pub fn expression_from_value(value: &Value, path: &str) -> Result<Expression, WireError> {
    match value {
        Value::Number(n) => return Ok(Expression::Value(Literal::Number(decimal_from_number(n, path)?))),
        Value::String(s) => return Ok(Expression::Value(Literal::String(s.clone()))),
        _ => {}
    }

    if let Some(id) = try_identifier(value, path)? {
        return Ok(Expression::Field(id));
    }

    let Some((tag, args)) = tagged(value) else {
        return Ok(Expression::Opaque(value.clone()));
    };

    let decode_all = |args: &[Value]| {
        args.iter()
            .map(|a| expression_from_value(a, path))
            .collect::<Result<Vec<_>, _>>()
    };

    if tag == "-" && args.len() == 1 {
        return Ok(Expression::unary(
            UnaryOp::Neg,
            expression_from_value(&args[0], path)?,
        ));
    }
    if tag == "not" {
        let [operand] = args else {
            return Err(malformed(path, "not takes one argument"));
        };
        return Ok(Expression::unary(
            UnaryOp::Not,
            expression_from_value(operand, path)?,
        ));
    }

    if let Some(op) = BinaryOp::from_wire_tag(tag) {
        let operands = decode_all(args)?;
        let variadic = op.is_logical() || matches!(op, BinaryOp::Add | BinaryOp::Mul | BinaryOp::Sub);
        if operands.len() < 2 || (!variadic && operands.len() != 2) {
            return Err(malformed(
                path,
                format!("'{}' takes {} operands", tag, if variadic { "two or more" } else { "two" }),
            ));
        }
        let mut iter = operands.into_iter();
        let mut acc = iter
            .next()
            .ok_or_else(|| malformed(path, format!("'{}' has no operands", tag)))?;
        for rhs in iter {
            acc = Expression::binary(op, acc, rhs);
        }
        return Ok(acc);
    }

    if let Some(function) = Function::from_wire_tag(tag) {
        if !function.accepts_arg_count(args.len()) {
            return Err(malformed(
                path,
                format!("{} expects {}", tag, function.describe_arity()),
            ));
        }
        return Ok(Expression::call(function, decode_all(args)?));
    }

    Ok(Expression::Opaque(value.clone()))
}
