//! Query contexts: the names a clause can see.
//!
//! A [`QueryContext`] is an immutable snapshot of every column resolvable
//! at one clause position of a query. It is built from a [`Catalog`] (the
//! external schema collaborator) and the part of the query that precedes
//! the position:
//!
//! ```text
//! source fields ─┬─ fields of the source table, path [Table]
//!                ├─ fields one foreign-key hop away, path [Fk]
//!                └─ or the output columns of a nested source query
//! custom columns ── every column defined before this clause
//! aggregations ──── earlier aggregations, for aggregation clauses only
//! ```
//!
//! Contexts are cheap to rebuild and are never updated in place.

use std::fs;
use std::path::Path;

use inflector::Inflector;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::compile::label;
use crate::compile::typecheck::infer_kind;
use crate::model::clause::{ClauseKind, ClausePosition};
use crate::model::field::{FieldId, Identifier, TableId};
use crate::model::query::{SourceRef, StructuredQuery};
use crate::model::types::{TemporalUnit, ValueKind};

/// Separator used when printing qualified names.
pub const PATH_SEPARATOR: &str = " → ";

// ============================================================================
// Catalog
// ============================================================================

/// Errors from loading or consulting a catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unknown table {0}")]
    UnknownTable(TableId),

    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse catalog JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to parse catalog TOML: {0}")]
    Toml(#[from] toml::de::Error),
}

/// A field as described by the schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub id: FieldId,
    /// Display name, e.g. `Created At`.
    pub name: String,
    /// Column name in the source data, e.g. `created_at`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    /// Base type tag such as `type/DateTime`.
    #[serde(rename = "base-type")]
    pub kind: ValueKind,
    /// For foreign keys, the table they point at.
    #[serde(default, rename = "fk-target", skip_serializing_if = "Option::is_none")]
    pub fk_target: Option<TableId>,
}

impl FieldInfo {
    pub fn new(id: u64, name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            id: FieldId(id),
            name: name.into(),
            column: None,
            kind,
            fk_target: None,
        }
    }

    /// Describe a raw column, deriving its display name: `created_at`
    /// becomes `Created At` and `product_id` becomes `Product ID`.
    pub fn from_column(id: u64, column: &str, kind: ValueKind) -> Self {
        Self {
            column: Some(column.to_string()),
            ..Self::new(id, humanize(column), kind)
        }
    }

    /// Mark this field as a foreign key into `table`.
    pub fn references(mut self, table: TableId) -> Self {
        self.fk_target = Some(table);
        self
    }

    /// Path segment for fields reached through this foreign key.
    fn fk_segment(&self) -> String {
        self.name
            .strip_suffix(" ID")
            .unwrap_or(&self.name)
            .to_string()
    }
}

/// Title-case a column name and keep `ID` upper case.
pub fn humanize(column: &str) -> String {
    column
        .to_title_case()
        .split(' ')
        .map(|word| if word == "Id" { "ID" } else { word })
        .collect::<Vec<_>>()
        .join(" ")
}

/// The schema collaborator.
pub trait Catalog {
    /// All table ids, in a stable order.
    fn tables(&self) -> Vec<TableId>;

    fn table_name(&self, table: TableId) -> Option<String>;

    /// Fields of a table, or `None` if the table is unknown.
    fn table_fields(&self, table: TableId) -> Option<Vec<FieldInfo>>;

    /// Look up a field by id across all tables.
    fn field(&self, id: FieldId) -> Option<FieldInfo> {
        self.tables()
            .into_iter()
            .filter_map(|t| self.table_fields(t))
            .flatten()
            .find(|f| f.id == id)
    }

    /// Breakout granularities valid for a field.
    fn granularities(&self, id: FieldId) -> Vec<TemporalUnit> {
        self.field(id)
            .map(|f| f.kind.granularities())
            .unwrap_or_default()
    }
}

/// A table in an [`InMemoryCatalog`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub id: TableId,
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldInfo>,
}

/// A catalog held in memory, loadable from JSON or TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InMemoryCatalog {
    #[serde(default)]
    pub tables: Vec<TableInfo>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table, builder style.
    pub fn with_table(mut self, id: u64, name: impl Into<String>, fields: Vec<FieldInfo>) -> Self {
        self.tables.push(TableInfo {
            id: TableId(id),
            name: name.into(),
            fields,
        });
        self
    }

    pub fn from_json_str(s: &str) -> Result<Self, CatalogError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, CatalogError> {
        Ok(toml::from_str(s)?)
    }

    /// Load from a `.toml` or `.json` file, chosen by extension.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&content),
            _ => Self::from_json_str(&content),
        }
    }

    fn table(&self, id: TableId) -> Option<&TableInfo> {
        self.tables.iter().find(|t| t.id == id)
    }
}

impl Catalog for InMemoryCatalog {
    fn tables(&self) -> Vec<TableId> {
        self.tables.iter().map(|t| t.id).collect()
    }

    fn table_name(&self, table: TableId) -> Option<String> {
        self.table(table).map(|t| t.name.clone())
    }

    fn table_fields(&self, table: TableId) -> Option<Vec<FieldInfo>> {
        self.table(table).map(|t| t.fields.clone())
    }
}

// ============================================================================
// Query context
// ============================================================================

/// One resolvable name.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextEntry {
    /// Display name, the last segment of a bracket reference.
    pub name: String,
    /// Qualifying segments, outermost first.
    pub path: Vec<String>,
    pub identifier: Identifier,
    pub kind: ValueKind,
}

impl ContextEntry {
    /// `Product → Price` style name including the full path.
    pub fn qualified_name(&self) -> String {
        let mut parts: Vec<&str> = self.path.iter().map(String::as_str).collect();
        parts.push(&self.name);
        parts.join(PATH_SEPARATOR)
    }

    /// Name used in generated labels: joined columns keep their hop.
    pub fn label(&self) -> String {
        match self.identifier {
            Identifier::ForeignField { .. } => self.qualified_name(),
            _ => self.name.clone(),
        }
    }

    pub fn granularities(&self) -> Vec<TemporalUnit> {
        self.kind.granularities()
    }
}

/// Names visible at one clause position.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryContext {
    position: ClausePosition,
    entries: Vec<ContextEntry>,
}

impl QueryContext {
    /// Build the context for `position` in `query`.
    ///
    /// `position.index` may equal the list length, which is where a new
    /// clause would be appended.
    pub fn at(
        query: &StructuredQuery,
        catalog: &dyn Catalog,
        position: ClausePosition,
    ) -> Result<Self, CatalogError> {
        let mut ctx = QueryContext {
            position,
            entries: source_columns(query, catalog)?,
        };

        let visible_columns = match position.kind {
            ClauseKind::CustomColumn => position.index.min(query.custom_columns.len()),
            _ => query.custom_columns.len(),
        };
        for column in &query.custom_columns[..visible_columns] {
            let kind = infer_kind(&column.expression, &ctx);
            ctx.entries.push(ContextEntry {
                name: column.name.clone(),
                path: Vec::new(),
                identifier: Identifier::CustomColumn(column.name.clone()),
                kind,
            });
        }

        if position.kind == ClauseKind::Aggregation {
            let visible = position.index.min(query.aggregations.len());
            for (i, aggregation) in query.aggregations[..visible].iter().enumerate() {
                let name = label::aggregation_name(aggregation, &ctx);
                let kind = infer_kind(&aggregation.expression, &ctx);
                ctx.entries.push(ContextEntry {
                    name,
                    path: Vec::new(),
                    identifier: Identifier::Aggregation(i),
                    kind,
                });
            }
        }

        Ok(ctx)
    }

    /// Context for a new clause appended to the end of `kind`'s list.
    pub fn for_new(
        query: &StructuredQuery,
        catalog: &dyn Catalog,
        kind: ClauseKind,
    ) -> Result<Self, CatalogError> {
        Self::at(query, catalog, ClausePosition::new(kind, query.len(kind)))
    }

    pub fn position(&self) -> ClausePosition {
        self.position
    }

    pub fn entries(&self) -> &[ContextEntry] {
        &self.entries
    }

    /// The entry for an identifier. Stage columns match by name.
    pub fn lookup(&self, identifier: &Identifier) -> Option<&ContextEntry> {
        self.entries.iter().find(|e| match (identifier, &e.identifier) {
            (Identifier::StageColumn { name: a, .. }, Identifier::StageColumn { name: b, .. }) => {
                a == b
            }
            (a, b) => a == b,
        })
    }

    /// Entries whose name equals the last segment and whose path ends with
    /// the preceding segments. Matching is exact and case-sensitive.
    pub fn candidates(&self, segments: &[&str]) -> Vec<&ContextEntry> {
        let Some((last, prefix)) = segments.split_last() else {
            return Vec::new();
        };
        self.entries
            .iter()
            .filter(|e| e.name == *last && e.path.ends_with_segments(prefix))
            .collect()
    }
}

trait EndsWithSegments {
    fn ends_with_segments(&self, suffix: &[&str]) -> bool;
}

impl EndsWithSegments for Vec<String> {
    fn ends_with_segments(&self, suffix: &[&str]) -> bool {
        suffix.len() <= self.len()
            && self[self.len() - suffix.len()..]
                .iter()
                .zip(suffix)
                .all(|(a, b)| a == b)
    }
}

/// Columns a query reads before any of its own clauses apply.
fn source_columns(
    query: &StructuredQuery,
    catalog: &dyn Catalog,
) -> Result<Vec<ContextEntry>, CatalogError> {
    match &query.source {
        SourceRef::Table(table) => table_columns(*table, catalog),
        SourceRef::Query(inner) => Ok(output_columns(inner, catalog)?
            .into_iter()
            .map(|e| ContextEntry {
                identifier: Identifier::StageColumn {
                    name: e.name.clone(),
                    kind: e.kind,
                },
                path: Vec::new(),
                ..e
            })
            .collect()),
    }
}

/// Source-table fields plus every field one foreign-key hop away.
fn table_columns(table: TableId, catalog: &dyn Catalog) -> Result<Vec<ContextEntry>, CatalogError> {
    let fields = catalog
        .table_fields(table)
        .ok_or(CatalogError::UnknownTable(table))?;
    let table_name = catalog
        .table_name(table)
        .unwrap_or_else(|| format!("Table {}", table));

    let mut entries: Vec<ContextEntry> = fields
        .iter()
        .map(|f| ContextEntry {
            name: f.name.clone(),
            path: vec![table_name.clone()],
            identifier: Identifier::Field(f.id),
            kind: f.kind,
        })
        .collect();

    for fk in fields.iter().filter(|f| f.fk_target.is_some()) {
        let Some(target) = fk.fk_target else { continue };
        let Some(target_fields) = catalog.table_fields(target) else {
            continue;
        };
        let segment = fk.fk_segment();
        entries.extend(target_fields.into_iter().map(|f| ContextEntry {
            name: f.name,
            path: vec![segment.clone()],
            identifier: Identifier::ForeignField {
                fk: fk.id,
                field: f.id,
            },
            kind: f.kind,
        }));
    }

    Ok(entries)
}

/// Columns a query produces, in output order.
///
/// A summarized query yields its breakouts then its aggregations; any other
/// query yields its source columns followed by its custom columns.
pub fn output_columns(
    query: &StructuredQuery,
    catalog: &dyn Catalog,
) -> Result<Vec<ContextEntry>, CatalogError> {
    let ctx = QueryContext::for_new(query, catalog, ClauseKind::OrderBy)?;

    if !query.is_summarized() {
        return Ok(ctx
            .entries
            .into_iter()
            .filter(|e| !matches!(e.identifier, Identifier::ForeignField { .. }))
            .collect());
    }

    let mut out = Vec::new();
    for breakout in &query.breakouts {
        let Some(entry) = ctx.lookup(&breakout.field) else {
            continue;
        };
        let (name, kind) = match breakout.granularity {
            Some(unit) if unit.is_extraction() => {
                (format!("{}: {}", entry.label(), unit.label()), ValueKind::Numeric)
            }
            Some(unit) => (format!("{}: {}", entry.label(), unit.label()), entry.kind),
            None => (entry.label(), entry.kind),
        };
        out.push(ContextEntry {
            name,
            path: Vec::new(),
            identifier: breakout.field.clone(),
            kind,
        });
    }
    for (i, aggregation) in query.aggregations.iter().enumerate() {
        out.push(ContextEntry {
            name: label::aggregation_name(aggregation, &ctx),
            path: Vec::new(),
            identifier: Identifier::Aggregation(i),
            kind: infer_kind(&aggregation.expression, &ctx),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::types::TemporalType;

    fn catalog() -> InMemoryCatalog {
        InMemoryCatalog::new()
            .with_table(
                1,
                "Orders",
                vec![
                    FieldInfo::from_column(10, "price", ValueKind::Numeric),
                    FieldInfo::from_column(11, "product_id", ValueKind::Numeric)
                        .references(TableId(2)),
                    FieldInfo::from_column(
                        12,
                        "created_at",
                        ValueKind::Temporal(TemporalType::DateTime),
                    ),
                ],
            )
            .with_table(
                2,
                "Products",
                vec![FieldInfo::from_column(20, "price", ValueKind::Numeric)],
            )
    }

    #[test]
    fn test_humanize() {
        assert_eq!(humanize("created_at"), "Created At");
        assert_eq!(humanize("product_id"), "Product ID");
    }

    #[test]
    fn test_context_includes_foreign_fields() {
        let query = StructuredQuery::new(TableId(1));
        let ctx = QueryContext::for_new(&query, &catalog(), ClauseKind::Filter).unwrap();
        let joined = ctx.candidates(&["Product", "Price"]);
        assert_eq!(joined.len(), 1);
        assert_eq!(
            joined[0].identifier,
            Identifier::ForeignField {
                fk: FieldId(11),
                field: FieldId(20)
            }
        );
        assert_eq!(joined[0].qualified_name(), "Product → Price");
    }

    #[test]
    fn test_bare_name_matches_every_path() {
        let query = StructuredQuery::new(TableId(1));
        let ctx = QueryContext::for_new(&query, &catalog(), ClauseKind::Filter).unwrap();
        assert_eq!(ctx.candidates(&["Price"]).len(), 2);
        assert_eq!(ctx.candidates(&["Orders", "Price"]).len(), 1);
        assert!(ctx.candidates(&["price"]).is_empty());
    }

    #[test]
    fn test_unknown_table() {
        let query = StructuredQuery::new(TableId(99));
        let err = QueryContext::for_new(&query, &catalog(), ClauseKind::Filter).unwrap_err();
        assert!(matches!(err, CatalogError::UnknownTable(TableId(99))));
    }

    #[test]
    fn test_granularities_from_catalog() {
        let units = catalog().granularities(FieldId(12));
        assert!(units.contains(&TemporalUnit::HourOfDay));
        assert!(catalog().granularities(FieldId(10)).is_empty());
    }

    #[test]
    fn test_catalog_from_json() {
        let json = r#"{
            "tables": [{
                "id": 5,
                "name": "People",
                "fields": [{"id": 50, "name": "Birth Date", "base-type": "type/Date"}]
            }]
        }"#;
        let catalog = InMemoryCatalog::from_json_str(json).unwrap();
        assert_eq!(catalog.table_name(TableId(5)).as_deref(), Some("People"));
        assert_eq!(
            catalog.field(FieldId(50)).map(|f| f.kind),
            Some(ValueKind::Temporal(TemporalType::Date))
        );
    }
}
