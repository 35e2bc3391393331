//! Tokenizer for libpq keyword/value connection strings
//!
//! The accepted format is a whitespace-separated sequence of `key = value`
//! pairs. Keys and values may be bare or single-quoted; inside quotes a
//! backslash makes the following character literal. Whitespace around `=` is
//! optional.

use crate::SyntaxError;

/// Parse `text`, invoking `on_pair` for every key/value pair in order.
///
/// Pairs seen before a syntax error have already been reported when the
/// error is returned.
pub fn parse<F>(text: &str, mut on_pair: F) -> Result<(), SyntaxError>
where
    F: FnMut(String, String),
{
    let mut rest = skip_space(text);
    while !rest.is_empty() {
        let (key, after_key) = parse_key(rest)?;
        let (value, after_value) = parse_value(after_key)?;
        on_pair(key, value);
        rest = after_value;
    }
    Ok(())
}

/// Collect every pair into a vector.
pub fn parse_pairs(text: &str) -> Result<Vec<(String, String)>, SyntaxError> {
    let mut pairs = Vec::new();
    parse(text, |key, value| pairs.push((key, value)))?;
    Ok(pairs)
}

/// Render a value so that [`parse`] reads it back unchanged.
pub fn quote(value: &str) -> String {
    let bare = !value.is_empty()
        && !value
            .chars()
            .any(|c| c.is_whitespace() || c == '\'' || c == '\\' || c == '=');
    if bare {
        return value.to_string();
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\'' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('\'');
    quoted
}

fn skip_space(text: &str) -> &str {
    text.trim_start_matches(char::is_whitespace)
}

/// Returns the key and the input following `=` (with leading space skipped).
fn parse_key(text: &str) -> Result<(String, &str), SyntaxError> {
    if let Some(quoted) = text.strip_prefix('\'') {
        let (key, rest) = parse_quoted(quoted)?;
        return expect_equals(key, rest);
    }

    for (i, c) in text.char_indices() {
        if c == '=' {
            return Ok((text[..i].to_string(), skip_space(&text[i + 1..])));
        }
        if c.is_whitespace() {
            return expect_equals(text[..i].to_string(), skip_space(&text[i..]));
        }
    }
    Err(SyntaxError::ExpectedEquals(None))
}

fn expect_equals(key: String, rest: &str) -> Result<(String, &str), SyntaxError> {
    match rest.strip_prefix('=') {
        Some(after) => Ok((key, skip_space(after))),
        None => Err(SyntaxError::ExpectedEquals(rest.chars().next())),
    }
}

fn parse_value(text: &str) -> Result<(String, &str), SyntaxError> {
    if let Some(quoted) = text.strip_prefix('\'') {
        return parse_quoted(quoted);
    }
    if text.is_empty() {
        return Err(SyntaxError::ExpectedValue);
    }
    match text.find(char::is_whitespace) {
        Some(end) => Ok((text[..end].to_string(), skip_space(&text[end..]))),
        None => Ok((text.to_string(), "")),
    }
}

/// `text` starts just after the opening quote.
fn parse_quoted(text: &str) -> Result<(String, &str), SyntaxError> {
    let mut out = String::new();
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if escaped {
            out.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '\'' {
            return Ok((out, skip_space(&text[i + 1..])));
        } else {
            out.push(c);
        }
    }
    Err(SyntaxError::UnterminatedQuote)
}
