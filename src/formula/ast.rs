//! AST node types for custom expression formulas.
//!
//! The parser produces an [`Expr`] tree where every field reference is still
//! just the text the user typed. The resolver returns a copy of the tree with
//! each [`FieldRef::target`] filled in; the original is never modified.

use std::fmt;

use rust_decimal::Decimal;

use super::span::Span;
use crate::model::field::Identifier;

// ============================================================================
// Precedence ladder
// ============================================================================

/// Binding strength of each syntactic level, lowest to highest.
pub mod prec {
    pub const OR: u8 = 1;
    pub const AND: u8 = 2;
    pub const NOT: u8 = 3;
    pub const COMPARISON: u8 = 4;
    pub const ADDITIVE: u8 = 5;
    pub const MULTIPLICATIVE: u8 = 6;
    pub const NEGATE: u8 = 7;
    pub const ATOM: u8 = 8;
}

// ============================================================================
// Expression
// ============================================================================

/// A formula expression node with its source span.
///
/// Equality is structural: two expressions are equal when their trees are
/// equal, regardless of where in the source they came from.
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

/// The shape of an expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// A number or string literal.
    Literal(Literal),
    /// A reference to a field, custom column, or earlier aggregation.
    FieldRef(FieldRef),
    /// A function call such as `Max([Total])`.
    Call { function: String, args: Vec<Expr> },
    /// A binary operation.
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// A prefix operation (`-x`, `NOT x`).
    UnaryOp { op: UnaryOp, operand: Box<Expr> },
}

/// Literal values in formulas.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Literal {
    /// An exact decimal number.
    Number(Decimal),
    /// A string.
    String(String),
}

/// A named reference, resolved or not.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRef {
    /// The text between the brackets (or the bare identifier).
    pub name: String,
    /// The concrete identifier, filled in by the resolver.
    pub target: Option<Identifier>,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Create a number literal from anything convertible to a decimal.
    pub fn number(value: impl Into<Decimal>) -> Self {
        Self::new(ExprKind::Literal(Literal::Number(value.into())), 0..0)
    }

    /// Create a string literal.
    pub fn string(value: impl Into<String>) -> Self {
        Self::new(ExprKind::Literal(Literal::String(value.into())), 0..0)
    }

    /// Create an unresolved field reference.
    pub fn field(name: impl Into<String>) -> Self {
        Self::new(
            ExprKind::FieldRef(FieldRef {
                name: name.into(),
                target: None,
            }),
            0..0,
        )
    }

    /// Create a function call.
    pub fn call(function: impl Into<String>, args: Vec<Expr>) -> Self {
        Self::new(
            ExprKind::Call {
                function: function.into(),
                args,
            },
            0..0,
        )
    }

    /// Create a binary operation.
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Self::new(
            ExprKind::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            0..0,
        )
    }

    /// Create a prefix operation.
    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Self::new(
            ExprKind::UnaryOp {
                op,
                operand: Box::new(operand),
            },
            0..0,
        )
    }

    /// Binding strength of this node when printed.
    pub fn precedence(&self) -> u8 {
        match &self.kind {
            ExprKind::Literal(_) | ExprKind::FieldRef(_) | ExprKind::Call { .. } => prec::ATOM,
            ExprKind::BinaryOp { op, .. } => op.precedence(),
            ExprKind::UnaryOp { op, .. } => op.precedence(),
        }
    }

    /// Visit every field reference in the tree, depth first.
    pub fn field_refs(&self) -> Vec<&FieldRef> {
        let mut refs = Vec::new();
        self.collect_field_refs(&mut refs);
        refs
    }

    fn collect_field_refs<'a>(&'a self, out: &mut Vec<&'a FieldRef>) {
        match &self.kind {
            ExprKind::Literal(_) => {}
            ExprKind::FieldRef(r) => out.push(r),
            ExprKind::Call { args, .. } => {
                for arg in args {
                    arg.collect_field_refs(out);
                }
            }
            ExprKind::BinaryOp { left, right, .. } => {
                left.collect_field_refs(out);
                right.collect_field_refs(out);
            }
            ExprKind::UnaryOp { operand, .. } => operand.collect_field_refs(out),
        }
    }
}

// ============================================================================
// Operators
// ============================================================================

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,

    // Comparison
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,

    // Logical
    And,
    Or,
}

impl BinaryOp {
    pub fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Or => prec::OR,
            BinaryOp::And => prec::AND,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Gt
            | BinaryOp::Le
            | BinaryOp::Ge => prec::COMPARISON,
            BinaryOp::Add | BinaryOp::Sub => prec::ADDITIVE,
            BinaryOp::Mul | BinaryOp::Div => prec::MULTIPLICATIVE,
        }
    }

    pub fn is_comparison(&self) -> bool {
        self.precedence() == prec::COMPARISON
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    /// Formula spelling.
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }

    /// Tag used in the serialized query.
    pub fn wire_tag(&self) -> &'static str {
        match self {
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            other => other.symbol(),
        }
    }

    pub fn from_wire_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "=" => BinaryOp::Eq,
            "!=" => BinaryOp::Ne,
            "<" => BinaryOp::Lt,
            ">" => BinaryOp::Gt,
            "<=" => BinaryOp::Le,
            ">=" => BinaryOp::Ge,
            "and" => BinaryOp::And,
            "or" => BinaryOp::Or,
            _ => return None,
        })
    }
}

/// Prefix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// `-expr`
    Neg,
    /// `NOT expr`
    Not,
}

impl UnaryOp {
    pub fn precedence(&self) -> u8 {
        match self {
            UnaryOp::Neg => prec::NEGATE,
            UnaryOp::Not => prec::NOT,
        }
    }
}

// ============================================================================
// Formatting
// ============================================================================

/// Which side of a binary operator a child sits on.
#[derive(Clone, Copy, PartialEq)]
enum Side {
    Left,
    Right,
}

/// Whether a child must be parenthesized under a binary parent.
///
/// Lower-precedence children always need parentheses. At equal precedence
/// left associativity makes the left child safe, except for comparisons,
/// which do not chain at all.
fn needs_parens(child: &Expr, parent: BinaryOp, side: Side) -> bool {
    let child_prec = child.precedence();
    let parent_prec = parent.precedence();
    child_prec < parent_prec
        || (child_prec == parent_prec && (side == Side::Right || parent.is_comparison()))
}

fn write_child(f: &mut fmt::Formatter<'_>, child: &Expr, parens: bool) -> fmt::Result {
    if parens {
        write!(f, "({})", child)
    } else {
        write!(f, "{}", child)
    }
}

fn write_string_literal(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("\"")?;
    for ch in s.chars() {
        match ch {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            c => write!(f, "{}", c)?,
        }
    }
    f.write_str("\"")
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Number(n) => write!(f, "{}", n),
            Literal::String(s) => write_string_literal(f, s),
        }
    }
}

/// Prints formula text that parses back to an equal tree.
///
/// Field references are always bracketed and only the parentheses required
/// by the precedence ladder are emitted.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Literal(lit) => write!(f, "{}", lit),
            ExprKind::FieldRef(r) => write!(f, "[{}]", r.name),
            ExprKind::Call { function, args } => {
                write!(f, "{}(", function)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            }
            ExprKind::BinaryOp { op, left, right } => {
                write_child(f, left, needs_parens(left, *op, Side::Left))?;
                write!(f, " {} ", op.symbol())?;
                write_child(f, right, needs_parens(right, *op, Side::Right))
            }
            ExprKind::UnaryOp { op, operand } => {
                let parens = operand.precedence() < op.precedence();
                match op {
                    UnaryOp::Neg => f.write_str("-")?,
                    UnaryOp::Not => f.write_str("NOT ")?,
                }
                write_child(f, operand, parens)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_drops_redundant_parens() {
        let expr = Expr::binary(
            BinaryOp::Add,
            Expr::binary(BinaryOp::Add, Expr::field("A"), Expr::field("B")),
            Expr::field("C"),
        );
        assert_eq!(expr.to_string(), "[A] + [B] + [C]");
    }

    #[test]
    fn test_display_keeps_required_parens() {
        let expr = Expr::binary(
            BinaryOp::Sub,
            Expr::field("A"),
            Expr::binary(BinaryOp::Sub, Expr::field("B"), Expr::field("C")),
        );
        assert_eq!(expr.to_string(), "[A] - ([B] - [C])");

        let expr = Expr::binary(
            BinaryOp::Mul,
            Expr::binary(BinaryOp::Add, Expr::number(1), Expr::number(2)),
            Expr::number(3),
        );
        assert_eq!(expr.to_string(), "(1 + 2) * 3");
    }

    #[test]
    fn test_display_comparison_operands_parenthesized() {
        let expr = Expr::binary(
            BinaryOp::Eq,
            Expr::binary(BinaryOp::Lt, Expr::field("A"), Expr::field("B")),
            Expr::field("C"),
        );
        assert_eq!(expr.to_string(), "([A] < [B]) = [C]");
    }

    #[test]
    fn test_display_unary() {
        let neg = Expr::unary(
            UnaryOp::Neg,
            Expr::binary(BinaryOp::Mul, Expr::field("A"), Expr::number(2)),
        );
        assert_eq!(neg.to_string(), "-([A] * 2)");

        let not = Expr::unary(
            UnaryOp::Not,
            Expr::binary(BinaryOp::Eq, Expr::field("A"), Expr::string("x")),
        );
        assert_eq!(not.to_string(), "NOT [A] = \"x\"");
    }

    #[test]
    fn test_display_call_and_escapes() {
        let expr = Expr::call(
            "Contains",
            vec![Expr::field("Title"), Expr::string("say \"hi\"")],
        );
        assert_eq!(expr.to_string(), r#"Contains([Title], "say \"hi\"")"#);
    }

    #[test]
    fn test_equality_ignores_spans() {
        let a = Expr::new(ExprKind::Literal(Literal::Number(2.into())), 0..1);
        let b = Expr::new(ExprKind::Literal(Literal::Number(2.into())), 7..8);
        assert_eq!(a, b);
    }

    #[test]
    fn test_wire_tags_round_trip() {
        for op in [BinaryOp::Add, BinaryOp::Ne, BinaryOp::And, BinaryOp::Or] {
            assert_eq!(BinaryOp::from_wire_tag(op.wire_tag()), Some(op));
        }
    }
}
