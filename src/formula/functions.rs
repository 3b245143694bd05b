//! The closed catalogue of formula functions.
//!
//! Every function a formula may call is a [`Function`] variant. Each knows
//! its formula spelling, its tag in the serialized query, its arity, the
//! value kinds its arguments accept, and what it returns.

use crate::model::types::ValueKind;

/// Whether a function aggregates rows, maps values, or tests them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    Aggregate,
    Scalar,
    Predicate,
}

/// What an argument position accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgKind {
    Numeric,
    String,
    Boolean,
    Any,
}

impl ArgKind {
    /// Unknown kinds are accepted everywhere; they are checked downstream.
    pub fn accepts(&self, kind: ValueKind) -> bool {
        match (self, kind) {
            (ArgKind::Any, _) | (_, ValueKind::Unknown) => true,
            (ArgKind::Numeric, ValueKind::Numeric) => true,
            (ArgKind::String, ValueKind::String) => true,
            (ArgKind::Boolean, ValueKind::Boolean) => true,
            _ => false,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            ArgKind::Numeric => "a number",
            ArgKind::String => "a string",
            ArgKind::Boolean => "a boolean",
            ArgKind::Any => "any value",
        }
    }
}

/// Result kind of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Returns {
    Kind(ValueKind),
    /// Same kind as the first argument (`Min`, `Max`, `Coalesce`).
    FirstArg,
}

/// A function callable from a formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    // Aggregations
    Count,
    CumulativeCount,
    Sum,
    CumulativeSum,
    Distinct,
    StandardDeviation,
    Average,
    Min,
    Max,
    Median,
    Variance,
    Percentile,
    Share,
    CountIf,
    SumIf,

    // Scalar functions
    Lower,
    Upper,
    Trim,
    Ltrim,
    Rtrim,
    Length,
    Substring,
    Concat,
    Replace,
    RegexExtract,
    Coalesce,
    Abs,
    Ceil,
    Floor,
    Round,
    Sqrt,
    Power,
    Exp,
    Log,

    // Predicates
    Contains,
    StartsWith,
    EndsWith,
    IsNull,
    IsEmpty,
    Between,
}

use ArgKind as A;

impl Function {
    pub const ALL: &'static [Function] = &[
        Function::Count,
        Function::CumulativeCount,
        Function::Sum,
        Function::CumulativeSum,
        Function::Distinct,
        Function::StandardDeviation,
        Function::Average,
        Function::Min,
        Function::Max,
        Function::Median,
        Function::Variance,
        Function::Percentile,
        Function::Share,
        Function::CountIf,
        Function::SumIf,
        Function::Lower,
        Function::Upper,
        Function::Trim,
        Function::Ltrim,
        Function::Rtrim,
        Function::Length,
        Function::Substring,
        Function::Concat,
        Function::Replace,
        Function::RegexExtract,
        Function::Coalesce,
        Function::Abs,
        Function::Ceil,
        Function::Floor,
        Function::Round,
        Function::Sqrt,
        Function::Power,
        Function::Exp,
        Function::Log,
        Function::Contains,
        Function::StartsWith,
        Function::EndsWith,
        Function::IsNull,
        Function::IsEmpty,
        Function::Between,
    ];

    /// Canonical formula spelling.
    pub fn name(&self) -> &'static str {
        match self {
            Function::Count => "Count",
            Function::CumulativeCount => "CumulativeCount",
            Function::Sum => "Sum",
            Function::CumulativeSum => "CumulativeSum",
            Function::Distinct => "Distinct",
            Function::StandardDeviation => "StandardDeviation",
            Function::Average => "Average",
            Function::Min => "Min",
            Function::Max => "Max",
            Function::Median => "Median",
            Function::Variance => "Variance",
            Function::Percentile => "Percentile",
            Function::Share => "Share",
            Function::CountIf => "CountIf",
            Function::SumIf => "SumIf",
            Function::Lower => "lower",
            Function::Upper => "upper",
            Function::Trim => "trim",
            Function::Ltrim => "ltrim",
            Function::Rtrim => "rtrim",
            Function::Length => "length",
            Function::Substring => "substring",
            Function::Concat => "concat",
            Function::Replace => "replace",
            Function::RegexExtract => "regexextract",
            Function::Coalesce => "coalesce",
            Function::Abs => "abs",
            Function::Ceil => "ceil",
            Function::Floor => "floor",
            Function::Round => "round",
            Function::Sqrt => "sqrt",
            Function::Power => "power",
            Function::Exp => "exp",
            Function::Log => "log",
            Function::Contains => "contains",
            Function::StartsWith => "startsWith",
            Function::EndsWith => "endsWith",
            Function::IsNull => "isnull",
            Function::IsEmpty => "isempty",
            Function::Between => "between",
        }
    }

    /// Tag in the serialized query.
    pub fn wire_tag(&self) -> &'static str {
        match self {
            Function::Count => "count",
            Function::CumulativeCount => "cum-count",
            Function::Sum => "sum",
            Function::CumulativeSum => "cum-sum",
            Function::Distinct => "distinct",
            Function::StandardDeviation => "stddev",
            Function::Average => "avg",
            Function::Min => "min",
            Function::Max => "max",
            Function::Median => "median",
            Function::Variance => "var",
            Function::Percentile => "percentile",
            Function::Share => "share",
            Function::CountIf => "count-where",
            Function::SumIf => "sum-where",
            Function::Lower => "lower",
            Function::Upper => "upper",
            Function::Trim => "trim",
            Function::Ltrim => "ltrim",
            Function::Rtrim => "rtrim",
            Function::Length => "length",
            Function::Substring => "substring",
            Function::Concat => "concat",
            Function::Replace => "replace",
            Function::RegexExtract => "regex-match-first",
            Function::Coalesce => "coalesce",
            Function::Abs => "abs",
            Function::Ceil => "ceil",
            Function::Floor => "floor",
            Function::Round => "round",
            Function::Sqrt => "sqrt",
            Function::Power => "power",
            Function::Exp => "exp",
            Function::Log => "log",
            Function::Contains => "contains",
            Function::StartsWith => "starts-with",
            Function::EndsWith => "ends-with",
            Function::IsNull => "is-null",
            Function::IsEmpty => "is-empty",
            Function::Between => "between",
        }
    }

    /// Look up a function by formula name, ignoring case.
    pub fn from_name(name: &str) -> Option<Function> {
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.name().eq_ignore_ascii_case(name))
    }

    pub fn from_wire_tag(tag: &str) -> Option<Function> {
        Self::ALL.iter().copied().find(|f| f.wire_tag() == tag)
    }

    pub fn kind(&self) -> FunctionKind {
        match self {
            Function::Count
            | Function::CumulativeCount
            | Function::Sum
            | Function::CumulativeSum
            | Function::Distinct
            | Function::StandardDeviation
            | Function::Average
            | Function::Min
            | Function::Max
            | Function::Median
            | Function::Variance
            | Function::Percentile
            | Function::Share
            | Function::CountIf
            | Function::SumIf => FunctionKind::Aggregate,
            Function::Contains
            | Function::StartsWith
            | Function::EndsWith
            | Function::IsNull
            | Function::IsEmpty
            | Function::Between => FunctionKind::Predicate,
            _ => FunctionKind::Scalar,
        }
    }

    pub fn is_aggregate(&self) -> bool {
        self.kind() == FunctionKind::Aggregate
    }

    /// Declared parameter kinds. For variadic functions the last entry
    /// repeats.
    pub fn params(&self) -> &'static [ArgKind] {
        match self {
            Function::Count | Function::CumulativeCount => &[A::Any],
            Function::Sum
            | Function::CumulativeSum
            | Function::StandardDeviation
            | Function::Average
            | Function::Median
            | Function::Variance => &[A::Numeric],
            Function::Distinct | Function::Min | Function::Max => &[A::Any],
            Function::Percentile => &[A::Numeric, A::Numeric],
            Function::Share | Function::CountIf => &[A::Boolean],
            Function::SumIf => &[A::Numeric, A::Boolean],
            Function::Lower
            | Function::Upper
            | Function::Trim
            | Function::Ltrim
            | Function::Rtrim
            | Function::Length => &[A::String],
            Function::Substring => &[A::String, A::Numeric, A::Numeric],
            Function::Concat | Function::Coalesce => &[A::Any],
            Function::Replace => &[A::String, A::String, A::String],
            Function::RegexExtract => &[A::String, A::String],
            Function::Abs
            | Function::Ceil
            | Function::Floor
            | Function::Round
            | Function::Sqrt
            | Function::Exp
            | Function::Log => &[A::Numeric],
            Function::Power => &[A::Numeric, A::Numeric],
            Function::Contains | Function::StartsWith | Function::EndsWith => {
                &[A::String, A::String]
            }
            Function::IsNull | Function::IsEmpty => &[A::Any],
            Function::Between => &[A::Any, A::Any, A::Any],
        }
    }

    /// Inclusive bounds on the argument count; `None` means unbounded.
    pub fn arity(&self) -> (usize, Option<usize>) {
        match self {
            Function::Count | Function::CumulativeCount => (0, Some(1)),
            Function::Concat | Function::Coalesce => (1, None),
            other => {
                let n = other.params().len();
                (n, Some(n))
            }
        }
    }

    pub fn accepts_arg_count(&self, count: usize) -> bool {
        let (min, max) = self.arity();
        count >= min && max.map_or(true, |max| count <= max)
    }

    /// Parameter kind at `index`, repeating the last for variadic tails.
    pub fn param_kind(&self, index: usize) -> ArgKind {
        let params = self.params();
        params
            .get(index)
            .or_else(|| params.last())
            .copied()
            .unwrap_or(ArgKind::Any)
    }

    pub fn returns(&self) -> Returns {
        match self {
            Function::Min | Function::Max | Function::Coalesce => Returns::FirstArg,
            Function::Lower
            | Function::Upper
            | Function::Trim
            | Function::Ltrim
            | Function::Rtrim
            | Function::Substring
            | Function::Concat
            | Function::Replace
            | Function::RegexExtract => Returns::Kind(ValueKind::String),
            Function::Contains
            | Function::StartsWith
            | Function::EndsWith
            | Function::IsNull
            | Function::IsEmpty
            | Function::Between => Returns::Kind(ValueKind::Boolean),
            _ => Returns::Kind(ValueKind::Numeric),
        }
    }

    /// Human readable arity for error messages, e.g. `1 argument`.
    pub fn describe_arity(&self) -> String {
        let plural = |n: usize| if n == 1 { "argument" } else { "arguments" };
        match self.arity() {
            (min, Some(max)) if min == max => format!("{} {}", min, plural(min)),
            (min, Some(max)) => format!("{} to {} arguments", min, max),
            (min, None) => format!("at least {} {}", min, plural(min)),
        }
    }
}

impl std::fmt::Display for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name_ignores_case() {
        assert_eq!(Function::from_name("max"), Some(Function::Max));
        assert_eq!(Function::from_name("SUM"), Some(Function::Sum));
        assert_eq!(Function::from_name("StartsWith"), Some(Function::StartsWith));
        assert_eq!(Function::from_name("Frobnicate"), None);
    }

    #[test]
    fn test_wire_tags_are_unique() {
        for (i, a) in Function::ALL.iter().enumerate() {
            for b in &Function::ALL[i + 1..] {
                assert_ne!(a.wire_tag(), b.wire_tag());
            }
            assert_eq!(Function::from_wire_tag(a.wire_tag()), Some(*a));
        }
    }

    #[test]
    fn test_arity() {
        assert!(Function::Count.accepts_arg_count(0));
        assert!(Function::Count.accepts_arg_count(1));
        assert!(!Function::Sum.accepts_arg_count(0));
        assert!(Function::Concat.accepts_arg_count(5));
        assert_eq!(Function::Substring.describe_arity(), "3 arguments");
        assert_eq!(Function::Concat.describe_arity(), "at least 1 argument");
    }

    #[test]
    fn test_distinct_accepts_any_kind() {
        assert!(Function::Distinct.param_kind(0).accepts(ValueKind::String));
        assert!(!Function::Sum.param_kind(0).accepts(ValueKind::String));
        assert!(Function::Sum.param_kind(0).accepts(ValueKind::Unknown));
    }

    #[test]
    fn test_variadic_param_kind_repeats() {
        assert_eq!(Function::Concat.param_kind(3), ArgKind::Any);
    }
}
