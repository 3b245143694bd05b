//! Token scanner for custom expression formulas.
//!
//! Converts formula text such as `2 * Max([Total])` into a flat sequence of
//! tokens with byte spans. The scanner is a pure function of its input, so
//! the token sequence can be re-created at any time from the same source.

use chumsky::error::RichReason;
use chumsky::prelude::*;
use thiserror::Error;

use super::span::Span;

/// A token in a formula.
#[derive(Debug, Clone, PartialEq)]
pub enum Token<'src> {
    // ========================================================================
    // Literals
    // ========================================================================
    /// A decimal number, kept as source text so no precision is lost.
    Number(&'src str),
    /// A string literal with escapes already applied.
    Str(String),
    /// A bare identifier: function names and single-word field names.
    Ident(&'src str),
    /// The verbatim contents of a `[ ... ]` reference.
    Field(&'src str),

    // ========================================================================
    // Keywords
    // ========================================================================
    And,
    Or,
    Not,

    // ========================================================================
    // Operators
    // ========================================================================
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `>`
    Gt,
    /// `<=`
    Le,
    /// `>=`
    Ge,

    // ========================================================================
    // Punctuation
    // ========================================================================
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `,`
    Comma,
}

impl<'src> std::fmt::Display for Token<'src> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Number(s) => write!(f, "{}", s),
            Token::Str(s) => write!(f, "{:?}", s),
            Token::Ident(s) => write!(f, "{}", s),
            Token::Field(s) => write!(f, "[{}]", s),
            Token::And => write!(f, "AND"),
            Token::Or => write!(f, "OR"),
            Token::Not => write!(f, "NOT"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Eq => write!(f, "="),
            Token::Ne => write!(f, "!="),
            Token::Lt => write!(f, "<"),
            Token::Gt => write!(f, ">"),
            Token::Le => write!(f, "<="),
            Token::Ge => write!(f, ">="),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
        }
    }
}

/// The first unscannable position in a formula.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason} at {span:?}")]
pub struct LexError {
    /// Span of the offending character or unterminated literal.
    pub span: Span,
    /// Human readable reason.
    pub reason: String,
}

/// Map an identifier to a keyword token or return Ident.
///
/// Logical keywords are matched case-insensitively; everything else is left
/// for the resolver, which owns function-name and field-name matching.
fn keyword_or_ident(s: &str) -> Token<'_> {
    if s.eq_ignore_ascii_case("and") {
        Token::And
    } else if s.eq_ignore_ascii_case("or") {
        Token::Or
    } else if s.eq_ignore_ascii_case("not") {
        Token::Not
    } else {
        Token::Ident(s)
    }
}

/// Create a scanner for formula text.
///
/// Returns a parser that tokenizes the input string into a sequence of
/// tokens with span information, skipping insignificant whitespace.
pub fn lexer<'src>(
) -> impl Parser<'src, &'src str, Vec<(Token<'src>, SimpleSpan)>, extra::Err<Rich<'src, char>>> {
    let ident = text::ident().map(keyword_or_ident);

    // Numbers: digits with an optional fractional part
    let number = text::digits(10)
        .then(just('.').then(text::digits(10)).or_not())
        .to_slice()
        .map(Token::Number);

    // String literals: "..." or '...' with backslash escapes
    let escape = just('\\').ignore_then(any()).map(|c| match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        other => other,
    });
    let quoted = |quote: char| {
        just(quote)
            .ignore_then(
                none_of([quote, '\\'])
                    .or(escape.clone())
                    .repeated()
                    .collect::<String>(),
            )
            .then(just(quote).or_not())
            .validate(|(body, close), e, emitter| {
                if close.is_none() {
                    emitter.emit(Rich::custom(e.span(), "unterminated string literal"));
                }
                Token::Str(body)
            })
    };
    let string_lit = quoted('"').or(quoted('\''));

    // Field references: [ ... ] taken verbatim up to the closing bracket
    let field = just('[')
        .ignore_then(none_of(']').repeated().to_slice())
        .then(just(']').or_not())
        .validate(|(body, close), e, emitter| {
            if close.is_none() {
                emitter.emit(Rich::custom(e.span(), "unterminated field reference"));
            }
            Token::Field(body)
        });

    // Symbols (multi-char first, then single-char)
    let symbol = choice((
        just("!=").to(Token::Ne),
        just("<=").to(Token::Le),
        just(">=").to(Token::Ge),
        just('<').to(Token::Lt),
        just('>').to(Token::Gt),
        just('=').to(Token::Eq),
        just('+').to(Token::Plus),
        just('-').to(Token::Minus),
        just('*').to(Token::Star),
        just('/').to(Token::Slash),
        just('(').to(Token::LParen),
        just(')').to(Token::RParen),
        just(',').to(Token::Comma),
    ));

    let token = choice((ident, number, string_lit, field, symbol)).map_with(|tok, e| (tok, e.span()));

    token
        .padded()
        .repeated()
        .collect()
        .padded()
        .then_ignore(end())
}

/// Scan a formula into tokens.
///
/// Returns the first error by source position if any part of the input
/// cannot be scanned.
pub fn lex(source: &str) -> Result<Vec<(Token<'_>, Span)>, LexError> {
    let (tokens, errs) = lexer().parse(source).into_output_errors();

    let first = errs
        .into_iter()
        .map(|e| {
            let span = e.span();
            let reason = match e.reason() {
                RichReason::Custom(msg) => msg.to_string(),
                _ => match e.found() {
                    Some(c) => format!("unexpected character '{}'", c),
                    None => "unexpected end of input".to_string(),
                },
            };
            LexError {
                span: span.start..span.end,
                reason,
            }
        })
        .min_by_key(|e| e.span.start);

    if let Some(err) = first {
        return Err(err);
    }

    Ok(tokens
        .unwrap_or_default()
        .into_iter()
        .map(|(tok, span)| (tok, span.start..span.end))
        .collect())
}
