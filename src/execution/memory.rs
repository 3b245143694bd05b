//! In-memory reference executor.
//!
//! Runs structured queries against rows held in memory. It is small and
//! slow, and it is the behavioural reference the compiler's regression
//! tests execute against. Stages run in clause order:
//!
//! ```text
//! source rows → custom columns → filters → group by breakouts
//!             → aggregations → order-by → limit
//! ```

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use regex::Regex;
use rust_decimal::prelude::*;
use rust_decimal::MathematicalOps;
use tracing::debug;

use super::temporal::bucket;
use super::{
    CellValue, ExecutionError, ExecutionRequest, ExecutionResult, QueryExecutor, ResultColumn,
    ResultSet,
};
use crate::context::{output_columns, Catalog, InMemoryCatalog};
use crate::formula::ast::{BinaryOp, Literal, UnaryOp};
use crate::formula::functions::Function;
use crate::model::clause::{Direction, OrderTarget};
use crate::model::expr::Expression;
use crate::model::field::{FieldId, Identifier, TableId};
use crate::model::query::{SourceRef, StructuredQuery};

/// Rows of one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableData {
    /// Field joined against when a foreign key points at this table.
    pub primary_key: Option<FieldId>,
    pub rows: Vec<HashMap<FieldId, CellValue>>,
}

impl TableData {
    pub fn new(primary_key: Option<u64>) -> Self {
        Self {
            primary_key: primary_key.map(FieldId),
            rows: Vec::new(),
        }
    }

    /// Append a row given as `(field id, value)` pairs.
    pub fn row<I, V>(mut self, cells: I) -> Self
    where
        I: IntoIterator<Item = (u64, V)>,
        V: Into<CellValue>,
    {
        self.rows.push(
            cells
                .into_iter()
                .map(|(id, value)| (FieldId(id), value.into()))
                .collect(),
        );
        self
    }
}

/// Executes queries over [`TableData`] described by an [`InMemoryCatalog`].
#[derive(Debug, Clone, Default)]
pub struct MemoryExecutor {
    catalog: InMemoryCatalog,
    tables: HashMap<TableId, TableData>,
}

/// A row flowing through one stage.
#[derive(Debug, Clone, Default)]
struct Row {
    fields: HashMap<FieldId, CellValue>,
    /// Custom columns and columns of a nested stage, by name.
    columns: HashMap<String, CellValue>,
}

impl MemoryExecutor {
    pub fn new(catalog: InMemoryCatalog) -> Self {
        Self {
            catalog,
            tables: HashMap::new(),
        }
    }

    pub fn with_table(mut self, id: u64, data: TableData) -> Self {
        self.tables.insert(TableId(id), data);
        self
    }

    pub fn catalog(&self) -> &InMemoryCatalog {
        &self.catalog
    }

    /// Execute synchronously.
    pub fn run(&self, query: &StructuredQuery) -> ExecutionResult<ResultSet> {
        let rows = self.source_rows(query)?;

        let mut prepared = Vec::with_capacity(rows.len());
        for mut row in rows {
            for column in query.custom_columns() {
                let value = self.eval_row(&column.expression, &row)?;
                row.columns.insert(column.name.clone(), value);
            }
            if self.passes_filters(query, &row)? {
                prepared.push(row);
            }
        }
        debug!(rows = prepared.len(), "rows after filters");

        let mut result = if query.is_summarized() {
            self.summarize(query, &prepared)?
        } else {
            self.project(query, prepared)?
        };

        if let Some(limit) = query.limit() {
            result.rows.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        Ok(result)
    }

    fn source_rows(&self, query: &StructuredQuery) -> ExecutionResult<Vec<Row>> {
        match query.source() {
            SourceRef::Table(table) => {
                let data = self
                    .tables
                    .get(table)
                    .ok_or(ExecutionError::MissingTable(*table))?;
                Ok(data
                    .rows
                    .iter()
                    .map(|fields| Row {
                        fields: fields.clone(),
                        columns: HashMap::new(),
                    })
                    .collect())
            }
            SourceRef::Query(inner) => {
                let stage = self.run(inner)?;
                Ok(stage
                    .rows
                    .into_iter()
                    .map(|values| Row {
                        fields: HashMap::new(),
                        columns: stage
                            .columns
                            .iter()
                            .map(|c| c.name.clone())
                            .zip(values)
                            .collect(),
                    })
                    .collect())
            }
        }
    }

    fn passes_filters(&self, query: &StructuredQuery, row: &Row) -> ExecutionResult<bool> {
        for filter in query.filters() {
            if self.eval_row(&filter.predicate, row)? != CellValue::Boolean(true) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    // ========================================================================
    // Raw and summarized output
    // ========================================================================

    fn project(&self, query: &StructuredQuery, mut rows: Vec<Row>) -> ExecutionResult<ResultSet> {
        if !query.order_by().is_empty() {
            let mut keyed = Vec::with_capacity(rows.len());
            for row in rows {
                let mut key = Vec::with_capacity(query.order_by().len());
                for order in query.order_by() {
                    match &order.target {
                        OrderTarget::Field(id) => key.push(self.value(&row, id)?),
                        other => {
                            return Err(ExecutionError::unsupported(format!(
                                "ordering an unsummarized query by {:?}",
                                other
                            )))
                        }
                    }
                }
                keyed.push((key, row));
            }
            let directions: Vec<Direction> =
                query.order_by().iter().map(|o| o.direction).collect();
            keyed.sort_by(|(a, _), (b, _)| compare_keys(a, b, &directions));
            rows = keyed.into_iter().map(|(_, row)| row).collect();
        }

        let columns = output_columns(query, &self.catalog)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut values = Vec::with_capacity(columns.len());
            for column in &columns {
                values.push(self.value(row, &column.identifier)?);
            }
            out.push(values);
        }

        Ok(ResultSet {
            columns: columns
                .into_iter()
                .map(|c| ResultColumn {
                    name: c.name,
                    kind: c.kind,
                })
                .collect(),
            rows: out,
        })
    }

    fn summarize(&self, query: &StructuredQuery, rows: &[Row]) -> ExecutionResult<ResultSet> {
        let mut groups: Vec<(Vec<CellValue>, Vec<&Row>)> = Vec::new();
        let mut index: HashMap<Vec<CellValue>, usize> = HashMap::new();
        for row in rows {
            let mut key = Vec::with_capacity(query.breakouts().len());
            for breakout in query.breakouts() {
                let value = self.value(row, &breakout.field)?;
                key.push(match breakout.granularity {
                    Some(unit) => bucket(&value, unit),
                    None => value,
                });
            }
            match index.get(&key) {
                Some(&i) => groups[i].1.push(row),
                None => {
                    index.insert(key.clone(), groups.len());
                    groups.push((key, vec![row]));
                }
            }
        }
        if query.breakouts().is_empty() && groups.is_empty() {
            groups.push((Vec::new(), Vec::new()));
        }
        let ascending = vec![Direction::Asc; query.breakouts().len()];
        groups.sort_by(|(a, _), (b, _)| compare_keys(a, b, &ascending));

        let mut out = Vec::with_capacity(groups.len());
        for (key, members) in groups {
            let mut values = key;
            let mut done = Vec::with_capacity(query.aggregations().len());
            for aggregation in query.aggregations() {
                let value = self.eval_group(&aggregation.expression, &members, &done)?;
                done.push(value);
            }
            values.extend(done);
            out.push(values);
        }

        let width = query.breakouts().len();
        for (i, aggregation) in query.aggregations().iter().enumerate() {
            if let Expression::Call {
                function: Function::CumulativeCount | Function::CumulativeSum,
                ..
            } = aggregation.expression
            {
                accumulate(&mut out, width + i)?;
            }
        }

        if !query.order_by().is_empty() {
            let mut key_columns = Vec::with_capacity(query.order_by().len());
            for order in query.order_by() {
                let column = match &order.target {
                    OrderTarget::Breakout(i) => *i,
                    OrderTarget::Aggregation(i) => width + i,
                    OrderTarget::Field(id) => query
                        .breakouts()
                        .iter()
                        .position(|b| &b.field == id)
                        .ok_or_else(|| {
                            ExecutionError::unsupported(format!(
                                "ordering a summarized query by {:?}, which is not a breakout",
                                id
                            ))
                        })?,
                };
                key_columns.push((column, order.direction));
            }
            out.sort_by(|a, b| {
                key_columns
                    .iter()
                    .map(|&(column, direction)| {
                        let ord = a[column].sort_cmp(&b[column]);
                        match direction {
                            Direction::Asc => ord,
                            Direction::Desc => ord.reverse(),
                        }
                    })
                    .find(|ord| ord.is_ne())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        let columns = output_columns(query, &self.catalog)?;
        Ok(ResultSet {
            columns: columns
                .into_iter()
                .map(|c| ResultColumn {
                    name: c.name,
                    kind: c.kind,
                })
                .collect(),
            rows: out,
        })
    }

    // ========================================================================
    // Values
    // ========================================================================

    fn value(&self, row: &Row, id: &Identifier) -> ExecutionResult<CellValue> {
        match id {
            Identifier::Field(field) => Ok(row.fields.get(field).cloned().unwrap_or(CellValue::Null)),
            Identifier::ForeignField { fk, field } => {
                let key = row.fields.get(fk).cloned().unwrap_or(CellValue::Null);
                self.follow(*fk, &key, *field)
            }
            Identifier::CustomColumn(name) | Identifier::StageColumn { name, .. } => {
                Ok(row.columns.get(name).cloned().unwrap_or(CellValue::Null))
            }
            Identifier::Aggregation(i) => Err(ExecutionError::unsupported(format!(
                "aggregation {} outside an aggregation clause",
                i
            ))),
        }
    }

    /// Look up `field` in the row that foreign key `fk` with value `key`
    /// points at.
    fn follow(&self, fk: FieldId, key: &CellValue, field: FieldId) -> ExecutionResult<CellValue> {
        if key.is_null() {
            return Ok(CellValue::Null);
        }
        let target = self
            .catalog
            .field(fk)
            .and_then(|f| f.fk_target)
            .ok_or_else(|| ExecutionError::unsupported(format!("field {} is not a foreign key", fk)))?;
        let data = self
            .tables
            .get(&target)
            .ok_or(ExecutionError::MissingTable(target))?;
        let pk = data.primary_key.ok_or_else(|| {
            ExecutionError::unsupported(format!("table {} has no primary key", target))
        })?;
        Ok(data
            .rows
            .iter()
            .find(|r| r.get(&pk) == Some(key))
            .and_then(|r| r.get(&field).cloned())
            .unwrap_or(CellValue::Null))
    }

    fn eval_row(&self, expr: &Expression, row: &Row) -> ExecutionResult<CellValue> {
        match expr {
            Expression::Value(literal) => Ok(literal_value(literal)),
            Expression::Field(id) => self.value(row, id),
            Expression::Call { function, args } => {
                if function.is_aggregate() {
                    return Err(ExecutionError::unsupported(format!(
                        "{} outside an aggregation clause",
                        function
                    )));
                }
                let values = args
                    .iter()
                    .map(|a| self.eval_row(a, row))
                    .collect::<ExecutionResult<Vec<_>>>()?;
                apply_function(*function, values)
            }
            Expression::Binary { op, left, right } => {
                apply_binary(*op, self.eval_row(left, row)?, self.eval_row(right, row)?)
            }
            Expression::Unary { op, operand } => apply_unary(*op, self.eval_row(operand, row)?),
            Expression::Opaque(value) => Err(ExecutionError::unsupported(format!(
                "unrecognized expression {}",
                value
            ))),
        }
    }

    /// Evaluate an aggregation expression over one group. `done` holds the
    /// group's earlier aggregation values.
    fn eval_group(
        &self,
        expr: &Expression,
        rows: &[&Row],
        done: &[CellValue],
    ) -> ExecutionResult<CellValue> {
        match expr {
            Expression::Value(literal) => Ok(literal_value(literal)),
            Expression::Field(Identifier::Aggregation(i)) => done.get(*i).cloned().ok_or_else(|| {
                ExecutionError::evaluation(format!("aggregation {} is not computed yet", i))
            }),
            Expression::Field(id) => Err(ExecutionError::unsupported(format!(
                "column {:?} outside an aggregate function",
                id
            ))),
            Expression::Call { function, args } if function.is_aggregate() => {
                self.aggregate(*function, args, rows, done)
            }
            Expression::Call { function, args } => {
                let values = args
                    .iter()
                    .map(|a| self.eval_group(a, rows, done))
                    .collect::<ExecutionResult<Vec<_>>>()?;
                apply_function(*function, values)
            }
            Expression::Binary { op, left, right } => apply_binary(
                *op,
                self.eval_group(left, rows, done)?,
                self.eval_group(right, rows, done)?,
            ),
            Expression::Unary { op, operand } => {
                apply_unary(*op, self.eval_group(operand, rows, done)?)
            }
            Expression::Opaque(value) => Err(ExecutionError::unsupported(format!(
                "unrecognized expression {}",
                value
            ))),
        }
    }

    fn column(&self, expr: &Expression, rows: &[&Row]) -> ExecutionResult<Vec<CellValue>> {
        rows.iter().map(|row| self.eval_row(expr, row)).collect()
    }

    fn aggregate(
        &self,
        function: Function,
        args: &[Expression],
        rows: &[&Row],
        done: &[CellValue],
    ) -> ExecutionResult<CellValue> {
        let arg = |i: usize| {
            args.get(i).ok_or_else(|| {
                ExecutionError::evaluation(format!("{} is missing argument {}", function, i + 1))
            })
        };

        match function {
            Function::Count | Function::CumulativeCount => {
                let n = match args.first() {
                    None => rows.len(),
                    Some(expr) => self.column(expr, rows)?.iter().filter(|v| !v.is_null()).count(),
                };
                Ok(CellValue::number(n as u64))
            }
            Function::Sum | Function::CumulativeSum => {
                let values = numbers(self.column(arg(0)?, rows)?)?;
                sum(&values).map(|s| s.map_or(CellValue::Null, CellValue::Number))
            }
            Function::Distinct => {
                let values = self.column(arg(0)?, rows)?;
                let distinct: HashSet<_> = values.into_iter().filter(|v| !v.is_null()).collect();
                Ok(CellValue::number(distinct.len() as u64))
            }
            Function::Average => {
                let values = numbers(self.column(arg(0)?, rows)?)?;
                mean(&values).map(|m| m.map_or(CellValue::Null, CellValue::Number))
            }
            Function::Min | Function::Max => {
                let values = self.column(arg(0)?, rows)?;
                let mut best: Option<CellValue> = None;
                for value in values.into_iter().filter(|v| !v.is_null()) {
                    best = Some(match best {
                        None => value,
                        Some(current) => {
                            let ord = value.compare(&current).ok_or_else(|| {
                                ExecutionError::evaluation(format!(
                                    "{} over values that cannot be compared",
                                    function
                                ))
                            })?;
                            let replace = match function {
                                Function::Min => ord.is_lt(),
                                _ => ord.is_gt(),
                            };
                            if replace {
                                value
                            } else {
                                current
                            }
                        }
                    });
                }
                Ok(best.unwrap_or(CellValue::Null))
            }
            Function::Median => {
                let values = numbers(self.column(arg(0)?, rows)?)?;
                percentile(values, Decimal::new(5, 1))
            }
            Function::Percentile => {
                let values = numbers(self.column(arg(0)?, rows)?)?;
                let p = self
                    .eval_group(arg(1)?, rows, done)?
                    .as_decimal()
                    .ok_or_else(|| ExecutionError::evaluation("Percentile needs a numeric percentile"))?;
                if p < Decimal::ZERO || p > Decimal::ONE {
                    return Err(ExecutionError::evaluation(format!(
                        "percentile {} is outside 0 to 1",
                        p
                    )));
                }
                percentile(values, p)
            }
            Function::Variance | Function::StandardDeviation => {
                let values = numbers(self.column(arg(0)?, rows)?)?;
                let Some(variance) = variance(&values)? else {
                    return Ok(CellValue::Null);
                };
                if function == Function::Variance {
                    return Ok(CellValue::Number(variance));
                }
                variance
                    .sqrt()
                    .map(CellValue::Number)
                    .ok_or_else(|| ExecutionError::evaluation("square root of a negative variance"))
            }
            Function::Share => {
                if rows.is_empty() {
                    return Ok(CellValue::Null);
                }
                let hits = self.matching(arg(0)?, rows)?.len();
                Decimal::from(hits as u64)
                    .checked_div(Decimal::from(rows.len() as u64))
                    .map(CellValue::Number)
                    .ok_or_else(|| ExecutionError::evaluation("Share overflowed"))
            }
            Function::CountIf => Ok(CellValue::number(self.matching(arg(0)?, rows)?.len() as u64)),
            Function::SumIf => {
                let hits = self.matching(arg(1)?, rows)?;
                let values = numbers(self.column(arg(0)?, &hits)?)?;
                sum(&values).map(|s| s.map_or(CellValue::Null, CellValue::Number))
            }
            other => Err(ExecutionError::evaluation(format!(
                "{} is not an aggregation",
                other
            ))),
        }
    }

    fn matching<'r>(&self, predicate: &Expression, rows: &[&'r Row]) -> ExecutionResult<Vec<&'r Row>> {
        let mut hits = Vec::new();
        for row in rows {
            if self.eval_row(predicate, row)? == CellValue::Boolean(true) {
                hits.push(*row);
            }
        }
        Ok(hits)
    }
}

#[async_trait]
impl QueryExecutor for MemoryExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult<ResultSet> {
        debug!(request_id = %request.id, "executing in memory");
        self.run(&request.query)
    }
}

// ============================================================================
// Scalar semantics
// ============================================================================

fn literal_value(literal: &Literal) -> CellValue {
    match literal {
        Literal::Number(n) => CellValue::Number(*n),
        Literal::String(s) => CellValue::String(s.clone()),
    }
}

fn compare_keys(a: &[CellValue], b: &[CellValue], directions: &[Direction]) -> std::cmp::Ordering {
    a.iter()
        .zip(b)
        .zip(directions)
        .map(|((x, y), direction)| match direction {
            Direction::Asc => x.sort_cmp(y),
            Direction::Desc => x.sort_cmp(y).reverse(),
        })
        .find(|ord| ord.is_ne())
        .unwrap_or(std::cmp::Ordering::Equal)
}

/// Replace a column by its running total. Nulls count as zero.
fn accumulate(rows: &mut [Vec<CellValue>], column: usize) -> ExecutionResult<()> {
    let mut total = Decimal::ZERO;
    for row in rows {
        if let Some(n) = row[column].as_decimal() {
            total = total
                .checked_add(n)
                .ok_or_else(|| ExecutionError::evaluation("running total overflowed"))?;
        }
        row[column] = CellValue::Number(total);
    }
    Ok(())
}

fn numbers(values: Vec<CellValue>) -> ExecutionResult<Vec<Decimal>> {
    values
        .into_iter()
        .filter(|v| !v.is_null())
        .map(|v| {
            v.as_decimal()
                .ok_or_else(|| ExecutionError::evaluation(format!("expected a number, got {}", v)))
        })
        .collect()
}

fn sum(values: &[Decimal]) -> ExecutionResult<Option<Decimal>> {
    if values.is_empty() {
        return Ok(None);
    }
    values
        .iter()
        .try_fold(Decimal::ZERO, |acc, n| acc.checked_add(*n))
        .map(Some)
        .ok_or_else(|| ExecutionError::evaluation("sum overflowed"))
}

fn mean(values: &[Decimal]) -> ExecutionResult<Option<Decimal>> {
    let Some(total) = sum(values)? else {
        return Ok(None);
    };
    total
        .checked_div(Decimal::from(values.len() as u64))
        .map(Some)
        .ok_or_else(|| ExecutionError::evaluation("average overflowed"))
}

/// Population variance.
fn variance(values: &[Decimal]) -> ExecutionResult<Option<Decimal>> {
    let Some(m) = mean(values)? else {
        return Ok(None);
    };
    let squares: Option<Vec<Decimal>> = values
        .iter()
        .map(|v| {
            let d = v.checked_sub(m)?;
            d.checked_mul(d)
        })
        .collect();
    let squares = squares.ok_or_else(|| ExecutionError::evaluation("variance overflowed"))?;
    mean(&squares)
}

/// Continuous percentile with linear interpolation between ranks.
fn percentile(mut values: Vec<Decimal>, p: Decimal) -> ExecutionResult<CellValue> {
    if values.is_empty() {
        return Ok(CellValue::Null);
    }
    values.sort();
    let rank = p * Decimal::from(values.len() as u64 - 1);
    let lower = rank.floor();
    let i = lower.to_usize().unwrap_or(0);
    let frac = rank - lower;
    let low = values[i];
    let high = values.get(i + 1).copied().unwrap_or(low);
    Ok(CellValue::Number(low + (high - low) * frac))
}

fn apply_binary(op: BinaryOp, left: CellValue, right: CellValue) -> ExecutionResult<CellValue> {
    if op.is_logical() {
        let (l, r) = (truth(&left)?, truth(&right)?);
        let value = match op {
            BinaryOp::And => match (l, r) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            _ => match (l, r) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
        };
        return Ok(value.map_or(CellValue::Null, CellValue::Boolean));
    }

    if left.is_null() || right.is_null() {
        return Ok(CellValue::Null);
    }

    if op.is_comparison() {
        let ord = left.compare(&right).ok_or_else(|| {
            ExecutionError::evaluation(format!("cannot compare {} with {}", left, right))
        })?;
        let result = match op {
            BinaryOp::Eq => ord.is_eq(),
            BinaryOp::Ne => ord.is_ne(),
            BinaryOp::Lt => ord.is_lt(),
            BinaryOp::Gt => ord.is_gt(),
            BinaryOp::Le => ord.is_le(),
            _ => ord.is_ge(),
        };
        return Ok(CellValue::Boolean(result));
    }

    let (Some(l), Some(r)) = (left.as_decimal(), right.as_decimal()) else {
        return Err(ExecutionError::evaluation(format!(
            "'{}' needs numbers, got {} and {}",
            op.symbol(),
            left,
            right
        )));
    };
    let result = match op {
        BinaryOp::Add => l.checked_add(r),
        BinaryOp::Sub => l.checked_sub(r),
        BinaryOp::Mul => l.checked_mul(r),
        _ if r.is_zero() => return Ok(CellValue::Null),
        _ => l.checked_div(r),
    };
    result
        .map(CellValue::Number)
        .ok_or_else(|| ExecutionError::evaluation(format!("'{}' overflowed", op.symbol())))
}

fn apply_unary(op: UnaryOp, operand: CellValue) -> ExecutionResult<CellValue> {
    match op {
        UnaryOp::Not => Ok(truth(&operand)?.map_or(CellValue::Null, |b| CellValue::Boolean(!b))),
        UnaryOp::Neg => match operand {
            CellValue::Null => Ok(CellValue::Null),
            CellValue::Number(n) => Ok(CellValue::Number(-n)),
            other => Err(ExecutionError::evaluation(format!("cannot negate {}", other))),
        },
    }
}

fn truth(value: &CellValue) -> ExecutionResult<Option<bool>> {
    match value {
        CellValue::Null => Ok(None),
        CellValue::Boolean(b) => Ok(Some(*b)),
        other => Err(ExecutionError::evaluation(format!(
            "expected true or false, got {}",
            other
        ))),
    }
}

fn text(function: Function, value: &CellValue) -> ExecutionResult<String> {
    match value {
        CellValue::String(s) | CellValue::Temporal(s) => Ok(s.clone()),
        CellValue::Number(n) => Ok(n.normalize().to_string()),
        other => Err(ExecutionError::evaluation(format!(
            "{} expects text, got {}",
            function, other
        ))),
    }
}

fn number(function: Function, value: &CellValue) -> ExecutionResult<Decimal> {
    value.as_decimal().ok_or_else(|| {
        ExecutionError::evaluation(format!("{} expects a number, got {}", function, value))
    })
}

/// Apply a scalar function or predicate. Null inputs give null, except
/// for the functions that test for null.
fn apply_function(function: Function, args: Vec<CellValue>) -> ExecutionResult<CellValue> {
    match function {
        Function::Coalesce => {
            return Ok(args
                .into_iter()
                .find(|v| !v.is_null())
                .unwrap_or(CellValue::Null))
        }
        Function::IsNull => return Ok(CellValue::Boolean(args.first().map_or(true, CellValue::is_null))),
        Function::IsEmpty => {
            return Ok(CellValue::Boolean(matches!(
                args.first(),
                None | Some(CellValue::Null)
            ) || matches!(args.first(), Some(CellValue::String(s)) if s.is_empty())))
        }
        Function::Concat => {
            let mut out = String::new();
            for value in args.iter().filter(|v| !v.is_null()) {
                out.push_str(&text(function, value)?);
            }
            return Ok(CellValue::String(out));
        }
        _ => {}
    }

    if args.iter().any(CellValue::is_null) {
        return Ok(CellValue::Null);
    }
    let arg = |i: usize| {
        args.get(i).ok_or_else(|| {
            ExecutionError::evaluation(format!("{} is missing argument {}", function, i + 1))
        })
    };
    let overflow = || ExecutionError::evaluation(format!("{} overflowed", function));

    let value = match function {
        Function::Lower => CellValue::String(text(function, arg(0)?)?.to_lowercase()),
        Function::Upper => CellValue::String(text(function, arg(0)?)?.to_uppercase()),
        Function::Trim => CellValue::String(text(function, arg(0)?)?.trim().to_string()),
        Function::Ltrim => CellValue::String(text(function, arg(0)?)?.trim_start().to_string()),
        Function::Rtrim => CellValue::String(text(function, arg(0)?)?.trim_end().to_string()),
        Function::Length => CellValue::number(text(function, arg(0)?)?.chars().count() as u64),
        Function::Substring => {
            let s = text(function, arg(0)?)?;
            // Positions are 1-based
            let start = number(function, arg(1)?)?.to_i64().unwrap_or(1).max(1) as usize - 1;
            let len = number(function, arg(2)?)?.to_i64().unwrap_or(0).max(0) as usize;
            CellValue::String(s.chars().skip(start).take(len).collect())
        }
        Function::Replace => {
            let s = text(function, arg(0)?)?;
            let find = text(function, arg(1)?)?;
            let with = text(function, arg(2)?)?;
            CellValue::String(if find.is_empty() { s } else { s.replace(&find, &with) })
        }
        Function::RegexExtract => {
            let s = text(function, arg(0)?)?;
            let pattern = text(function, arg(1)?)?;
            let re = Regex::new(&pattern).map_err(|e| {
                ExecutionError::evaluation(format!("invalid pattern '{}': {}", pattern, e))
            })?;
            match re.captures(&s) {
                Some(caps) => caps
                    .get(1)
                    .or_else(|| caps.get(0))
                    .map_or(CellValue::Null, |m| CellValue::string(m.as_str())),
                None => CellValue::Null,
            }
        }
        Function::Abs => CellValue::Number(number(function, arg(0)?)?.abs()),
        Function::Ceil => CellValue::Number(number(function, arg(0)?)?.ceil()),
        Function::Floor => CellValue::Number(number(function, arg(0)?)?.floor()),
        Function::Round => CellValue::Number(number(function, arg(0)?)?.round()),
        Function::Sqrt => {
            let n = number(function, arg(0)?)?;
            match n.sqrt() {
                Some(root) => CellValue::Number(root),
                None => CellValue::Null,
            }
        }
        Function::Power => {
            let base = number(function, arg(0)?)?;
            let exp = number(function, arg(1)?)?;
            CellValue::Number(base.checked_powd(exp).ok_or_else(overflow)?)
        }
        Function::Exp => CellValue::Number(number(function, arg(0)?)?.checked_exp().ok_or_else(overflow)?),
        Function::Log => {
            let n = number(function, arg(0)?)?;
            if n <= Decimal::ZERO {
                CellValue::Null
            } else {
                CellValue::Number(n.checked_log10().ok_or_else(overflow)?)
            }
        }
        Function::Contains | Function::StartsWith | Function::EndsWith => {
            let s = text(function, arg(0)?)?;
            let needle = text(function, arg(1)?)?;
            CellValue::Boolean(match function {
                Function::Contains => s.contains(&needle),
                Function::StartsWith => s.starts_with(&needle),
                _ => s.ends_with(&needle),
            })
        }
        Function::Between => {
            let (x, lo, hi) = (arg(0)?, arg(1)?, arg(2)?);
            let cmp = |a: &CellValue, b: &CellValue| {
                a.compare(b).ok_or_else(|| {
                    ExecutionError::evaluation(format!("cannot compare {} with {}", a, b))
                })
            };
            CellValue::Boolean(cmp(lo, x)?.is_le() && cmp(x, hi)?.is_le())
        }
        other => {
            return Err(ExecutionError::unsupported(format!(
                "{} outside an aggregation clause",
                other
            )))
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_valued_logic() {
        let t = CellValue::Boolean(true);
        let f = CellValue::Boolean(false);
        let and = |a: &CellValue, b: &CellValue| apply_binary(BinaryOp::And, a.clone(), b.clone()).unwrap();
        let or = |a: &CellValue, b: &CellValue| apply_binary(BinaryOp::Or, a.clone(), b.clone()).unwrap();
        assert_eq!(and(&f, &CellValue::Null), f);
        assert_eq!(and(&t, &CellValue::Null), CellValue::Null);
        assert_eq!(or(&t, &CellValue::Null), t);
        assert_eq!(or(&f, &CellValue::Null), CellValue::Null);
    }

    #[test]
    fn test_division_by_zero_is_null() {
        let result = apply_binary(BinaryOp::Div, CellValue::number(1), CellValue::number(0)).unwrap();
        assert_eq!(result, CellValue::Null);
    }

    #[test]
    fn test_string_functions() {
        let s = CellValue::string("  Widget Pro ");
        assert_eq!(
            apply_function(Function::Trim, vec![s.clone()]).unwrap(),
            CellValue::string("Widget Pro")
        );
        assert_eq!(
            apply_function(
                Function::Substring,
                vec![CellValue::string("Gizmo"), CellValue::number(2), CellValue::number(3)]
            )
            .unwrap(),
            CellValue::string("izm")
        );
        assert_eq!(
            apply_function(
                Function::RegexExtract,
                vec![CellValue::string("order-1234"), CellValue::string(r"(\d+)")]
            )
            .unwrap(),
            CellValue::string("1234")
        );
        assert_eq!(
            apply_function(Function::Concat, vec![CellValue::string("a"), CellValue::Null, CellValue::number(2)])
                .unwrap(),
            CellValue::string("a2")
        );
    }

    #[test]
    fn test_null_propagation() {
        assert_eq!(
            apply_function(Function::Upper, vec![CellValue::Null]).unwrap(),
            CellValue::Null
        );
        assert_eq!(
            apply_function(Function::IsNull, vec![CellValue::Null]).unwrap(),
            CellValue::Boolean(true)
        );
        assert_eq!(
            apply_function(Function::Coalesce, vec![CellValue::Null, CellValue::number(3)]).unwrap(),
            CellValue::number(3)
        );
    }

    #[test]
    fn test_percentile_interpolates() {
        let values = vec![Decimal::from(1), Decimal::from(2), Decimal::from(3), Decimal::from(4)];
        assert_eq!(
            percentile(values.clone(), Decimal::new(5, 1)).unwrap(),
            CellValue::Number(Decimal::new(25, 1))
        );
        assert_eq!(percentile(values, Decimal::ONE).unwrap(), CellValue::number(4));
    }

    #[test]
    fn test_variance_is_population() {
        let values = vec![Decimal::from(2), Decimal::from(4), Decimal::from(4), Decimal::from(4),
            Decimal::from(5), Decimal::from(5), Decimal::from(7), Decimal::from(9)];
        assert_eq!(variance(&values).unwrap(), Some(Decimal::from(4)));
    }
}
