//! Smalltalk string and symbol literal parsing.
//!
//! String literals are `'…'` with `''` decoding to a single `'`. Symbol
//! literals are `#` followed by a string literal. No other escapes exist;
//! anything else is a malformed literal.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed Smalltalk literal: {0:?}")]
pub struct LiteralError(pub String);

/// A parsed `from:` argument: either a URL string or a tag symbol name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FromArg {
    Url(String),
    Tag(String),
}

/// Parses a bare Smalltalk string literal `'…'`, returning its decoded body.
pub fn parse_string_literal(text: &str) -> Result<String, LiteralError> {
    let text = text.trim();
    let inner = text
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .ok_or_else(|| LiteralError(text.to_string()))?;
    decode_quoted(inner).ok_or_else(|| LiteralError(text.to_string()))
}

/// Parses either a string literal or a symbol literal (`#'…'`) for `from:`.
pub fn parse_from_arg(text: &str) -> Result<FromArg, LiteralError> {
    let text = text.trim();
    if let Some(rest) = text.strip_prefix('#') {
        return parse_string_literal(rest).map(FromArg::Tag);
    }
    parse_string_literal(text).map(FromArg::Url)
}

fn decode_quoted(inner: &str) -> Option<String> {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\'' {
            if chars.peek() == Some(&'\'') {
                chars.next();
                out.push('\'');
                continue;
            }
            // An unescaped quote before the literal's closing quote is malformed.
            return None;
        }
        out.push(c);
    }
    Some(out)
}
