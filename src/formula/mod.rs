//! Custom expression formulas.
//!
//! A formula is the text a user types to define an aggregation, a filter,
//! or a custom column:
//!
//! ```text
//! 2 * Max([Total])
//! [Product → Category] = "Widget" AND [Quantity] > 3
//! concat([First Name], " ", [Last Name])
//! ```
//!
//! This module covers the syntactic half of the pipeline: scanning
//! ([`lexer`]), parsing ([`parser`]) and printing ([`format`]). Name
//! resolution lives in [`crate::resolve`] and clause compilation in
//! [`crate::compile`].
//!
//! # Example
//!
//! ```ignore
//! use quarry::formula;
//!
//! let expr = formula::parse("2 * Max([Total])")?;
//! assert_eq!(formula::format(&expr), "2 * Max([Total])");
//! ```

pub mod ast;
pub mod functions;
pub mod lexer;
pub mod parser;
pub mod span;

pub use ast::{BinaryOp, Expr, ExprKind, FieldRef, Literal, UnaryOp};
pub use functions::{ArgKind, Function, FunctionKind, Returns};
pub use lexer::{lex, LexError, Token};
pub use parser::{ParseError, Parser, DEFAULT_MAX_DEPTH};
pub use span::{line_col, Span};

use ariadne::{Config, Label, Report, ReportKind, Source};
use thiserror::Error;

/// Failure to turn formula text into an expression tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormulaError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl FormulaError {
    pub fn span(&self) -> Span {
        match self {
            FormulaError::Lex(e) => e.span.clone(),
            FormulaError::Parse(e) => e.span.clone(),
        }
    }

    /// Message without the position suffix, for editor tooltips.
    pub fn message(&self) -> String {
        match self {
            FormulaError::Lex(e) => e.reason.clone(),
            FormulaError::Parse(e) => format!("expected {}, found {}", e.expected, e.found),
        }
    }
}

/// Parse formula text into an expression tree.
pub fn parse(source: &str) -> Result<Expr, FormulaError> {
    parse_with_depth(source, DEFAULT_MAX_DEPTH)
}

/// Parse with an explicit nesting limit.
pub fn parse_with_depth(source: &str, max_depth: usize) -> Result<Expr, FormulaError> {
    let tokens = lex(source)?;
    let expr = Parser::new(&tokens, source.len())
        .with_max_depth(max_depth)
        .parse()?;
    Ok(expr)
}

/// Print an expression as formula text.
///
/// The output parses back to a tree equal to `expr`.
pub fn format(expr: &Expr) -> String {
    expr.to_string()
}

/// Render a plain-text diagnostic pointing at `span` in `source`.
pub fn render_diagnostic(source: &str, span: Span, message: &str) -> String {
    let mut out = Vec::new();
    let report = Report::build(ReportKind::Error, span.clone())
        .with_config(Config::default().with_color(false))
        .with_message(message)
        .with_label(Label::new(span).with_message(message))
        .finish();

    if report.write(Source::from(source), &mut out).is_err() {
        return message.to_string();
    }
    String::from_utf8_lossy(&out).into_owned()
}
