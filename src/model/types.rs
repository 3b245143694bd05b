//! Value kinds and temporal granularities.

use serde::{Deserialize, Serialize};

// ============================================================================
// Value kinds
// ============================================================================

/// Calendar shape of a temporal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemporalType {
    Date,
    DateTime,
    Time,
}

/// The kind of value an expression or column produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ValueKind {
    Numeric,
    String,
    Boolean,
    Temporal(TemporalType),
    /// Not known statically, e.g. an opaque pass-through expression.
    Unknown,
}

impl ValueKind {
    /// Base type tag used by `field-literal` references and catalogs.
    pub fn base_type(&self) -> &'static str {
        match self {
            ValueKind::Numeric => "type/Float",
            ValueKind::String => "type/Text",
            ValueKind::Boolean => "type/Boolean",
            ValueKind::Temporal(TemporalType::Date) => "type/Date",
            ValueKind::Temporal(TemporalType::DateTime) => "type/DateTime",
            ValueKind::Temporal(TemporalType::Time) => "type/Time",
            ValueKind::Unknown => "type/*",
        }
    }

    /// Parse a base type tag, folding the numeric and temporal families.
    pub fn from_base_type(tag: &str) -> Option<Self> {
        Some(match tag {
            "type/Float" | "type/Integer" | "type/BigInteger" | "type/Decimal" | "type/Number" => {
                ValueKind::Numeric
            }
            "type/Text" => ValueKind::String,
            "type/Boolean" => ValueKind::Boolean,
            "type/Date" => ValueKind::Temporal(TemporalType::Date),
            "type/DateTime" | "type/DateTimeWithTZ" | "type/DateTimeWithLocalTZ" => {
                ValueKind::Temporal(TemporalType::DateTime)
            }
            "type/Time" => ValueKind::Temporal(TemporalType::Time),
            "type/*" => ValueKind::Unknown,
            _ => return None,
        })
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, ValueKind::Temporal(_))
    }

    pub fn temporal_type(&self) -> Option<TemporalType> {
        match self {
            ValueKind::Temporal(t) => Some(*t),
            _ => None,
        }
    }

    /// Granularities a breakout on a value of this kind may use.
    pub fn granularities(&self) -> Vec<TemporalUnit> {
        match self.temporal_type() {
            Some(t) => t.granularities(),
            None => Vec::new(),
        }
    }

    /// Whether two known kinds may be compared.
    /// Temporal values also compare with string literals such as `"2024-01-31"`.
    pub fn comparable_with(&self, other: ValueKind) -> bool {
        match (*self, other) {
            (ValueKind::Unknown, _) | (_, ValueKind::Unknown) => true,
            (ValueKind::Temporal(_), ValueKind::String)
            | (ValueKind::String, ValueKind::Temporal(_)) => true,
            (a, b) => a == b,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            ValueKind::Numeric => "a number",
            ValueKind::String => "a string",
            ValueKind::Boolean => "a boolean",
            ValueKind::Temporal(TemporalType::Date) => "a date",
            ValueKind::Temporal(TemporalType::DateTime) => "a date-time",
            ValueKind::Temporal(TemporalType::Time) => "a time",
            ValueKind::Unknown => "an unknown value",
        }
    }
}

impl TryFrom<String> for ValueKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ValueKind::from_base_type(&value).ok_or_else(|| format!("unknown base type '{}'", value))
    }
}

impl From<ValueKind> for String {
    fn from(kind: ValueKind) -> Self {
        kind.base_type().to_string()
    }
}

// ============================================================================
// Temporal granularity
// ============================================================================

/// A temporal bucketing unit for breakouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemporalUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
    MinuteOfHour,
    HourOfDay,
    DayOfWeek,
    DayOfMonth,
    DayOfYear,
    WeekOfYear,
    MonthOfYear,
    QuarterOfYear,
}

impl TemporalUnit {
    pub const ALL: &'static [TemporalUnit] = &[
        TemporalUnit::Minute,
        TemporalUnit::Hour,
        TemporalUnit::Day,
        TemporalUnit::Week,
        TemporalUnit::Month,
        TemporalUnit::Quarter,
        TemporalUnit::Year,
        TemporalUnit::MinuteOfHour,
        TemporalUnit::HourOfDay,
        TemporalUnit::DayOfWeek,
        TemporalUnit::DayOfMonth,
        TemporalUnit::DayOfYear,
        TemporalUnit::WeekOfYear,
        TemporalUnit::MonthOfYear,
        TemporalUnit::QuarterOfYear,
    ];

    /// Parse a unit from its serialized name.
    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|u| u.as_str() == s)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TemporalUnit::Minute => "minute",
            TemporalUnit::Hour => "hour",
            TemporalUnit::Day => "day",
            TemporalUnit::Week => "week",
            TemporalUnit::Month => "month",
            TemporalUnit::Quarter => "quarter",
            TemporalUnit::Year => "year",
            TemporalUnit::MinuteOfHour => "minute-of-hour",
            TemporalUnit::HourOfDay => "hour-of-day",
            TemporalUnit::DayOfWeek => "day-of-week",
            TemporalUnit::DayOfMonth => "day-of-month",
            TemporalUnit::DayOfYear => "day-of-year",
            TemporalUnit::WeekOfYear => "week-of-year",
            TemporalUnit::MonthOfYear => "month-of-year",
            TemporalUnit::QuarterOfYear => "quarter-of-year",
        }
    }

    /// Label used in generated column names, e.g. `Created At: Month`.
    pub fn label(&self) -> &'static str {
        match self {
            TemporalUnit::Minute => "Minute",
            TemporalUnit::Hour => "Hour",
            TemporalUnit::Day => "Day",
            TemporalUnit::Week => "Week",
            TemporalUnit::Month => "Month",
            TemporalUnit::Quarter => "Quarter",
            TemporalUnit::Year => "Year",
            TemporalUnit::MinuteOfHour => "Minute of hour",
            TemporalUnit::HourOfDay => "Hour of day",
            TemporalUnit::DayOfWeek => "Day of week",
            TemporalUnit::DayOfMonth => "Day of month",
            TemporalUnit::DayOfYear => "Day of year",
            TemporalUnit::WeekOfYear => "Week of year",
            TemporalUnit::MonthOfYear => "Month of year",
            TemporalUnit::QuarterOfYear => "Quarter of year",
        }
    }

    /// Extraction units yield a component (1..12, 0..23) rather than a
    /// truncated timestamp.
    pub fn is_extraction(&self) -> bool {
        matches!(
            self,
            TemporalUnit::MinuteOfHour
                | TemporalUnit::HourOfDay
                | TemporalUnit::DayOfWeek
                | TemporalUnit::DayOfMonth
                | TemporalUnit::DayOfYear
                | TemporalUnit::WeekOfYear
                | TemporalUnit::MonthOfYear
                | TemporalUnit::QuarterOfYear
        )
    }

    pub fn valid_for(&self, temporal: TemporalType) -> bool {
        temporal.granularities().contains(self)
    }
}

impl std::fmt::Display for TemporalUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TemporalType {
    /// Valid granularities in display order.
    pub fn granularities(&self) -> Vec<TemporalUnit> {
        use TemporalUnit::*;
        match self {
            TemporalType::DateTime => TemporalUnit::ALL.to_vec(),
            TemporalType::Date => vec![
                Day,
                Week,
                Month,
                Quarter,
                Year,
                DayOfWeek,
                DayOfMonth,
                DayOfYear,
                WeekOfYear,
                MonthOfYear,
                QuarterOfYear,
            ],
            TemporalType::Time => vec![Minute, Hour, MinuteOfHour, HourOfDay],
        }
    }
}
