//! Column identifiers.

use serde::{Deserialize, Serialize};

use super::types::ValueKind;

/// A catalog field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldId(pub u64);

/// A catalog table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableId(pub u64);

impl std::fmt::Display for FieldId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for TableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A concrete reference to something a clause can read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    /// A field of the source table.
    Field(FieldId),
    /// A field reached through the foreign key `fk`.
    ForeignField { fk: FieldId, field: FieldId },
    /// A named custom column of the same query.
    CustomColumn(String),
    /// An output column of the nested source query.
    StageColumn { name: String, kind: ValueKind },
    /// An earlier aggregation of the same query, by position.
    Aggregation(usize),
}

impl Identifier {
    pub fn aggregation_index(&self) -> Option<usize> {
        match self {
            Identifier::Aggregation(i) => Some(*i),
            _ => None,
        }
    }

    pub fn custom_column(&self) -> Option<&str> {
        match self {
            Identifier::CustomColumn(name) => Some(name),
            _ => None,
        }
    }
}
