//! RFC 6570 URI template expansion (levels 1 to 3, plus the `:n` prefix modifier).
//!
//! Variables are plain strings; undefined variables expand to nothing.

use crate::error::{HttpError, InvalidUriKind};
use std::collections::BTreeMap;
use std::fmt::Write as _;

struct Operator {
    first: &'static str,
    sep: &'static str,
    named: bool,
    if_empty: &'static str,
    allow_reserved: bool,
}

fn operator(prefix: Option<char>) -> Operator {
    let (first, sep, named, if_empty, allow_reserved) = match prefix {
        Some('+') => ("", ",", false, "", true),
        Some('#') => ("#", ",", false, "", true),
        Some('.') => (".", ".", false, "", false),
        Some('/') => ("/", "/", false, "", false),
        Some(';') => (";", ";", true, "", false),
        Some('?') => ("?", "&", true, "=", false),
        Some('&') => ("&", "&", true, "=", false),
        _ => ("", ",", false, "", false),
    };
    Operator {
        first,
        sep,
        named,
        if_empty,
        allow_reserved,
    }
}

/// Expand `template` with `vars`.
///
/// # Errors
/// Returns [`HttpError::InvalidUri`] with [`InvalidUriKind::Template`] when an
/// expression is not closed or a prefix modifier is malformed.
pub fn expand(template: &str, vars: &BTreeMap<String, String>) -> Result<String, HttpError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after.find('}').ok_or_else(|| {
            HttpError::invalid_uri(template, InvalidUriKind::Template, "unclosed expression")
        })?;
        expand_expression(template, &after[..end], vars, &mut out)?;
        rest = &after[end + 1..];
    }
    out.push_str(rest);

    Ok(out)
}

fn expand_expression(
    template: &str,
    expr: &str,
    vars: &BTreeMap<String, String>,
    out: &mut String,
) -> Result<(), HttpError> {
    let prefix = expr
        .chars()
        .next()
        .filter(|c| matches!(c, '+' | '#' | '.' | '/' | ';' | '?' | '&'));
    let op = operator(prefix);
    let list = prefix.map_or(expr, |c| &expr[c.len_utf8()..]);

    let mut first = true;
    for spec in list.split(',') {
        let (name, max_len) = match spec.split_once(':') {
            Some((name, len)) => {
                let len = len.parse::<usize>().map_err(|e| {
                    HttpError::invalid_uri(template, InvalidUriKind::Template, e)
                })?;
                (name, Some(len))
            }
            None => (spec.trim_end_matches('*'), None),
        };

        let Some(value) = vars.get(name) else {
            continue;
        };

        out.push_str(if first { op.first } else { op.sep });
        first = false;

        if op.named {
            out.push_str(name);
            if value.is_empty() {
                out.push_str(op.if_empty);
                continue;
            }
            out.push('=');
        }

        let value = match max_len {
            Some(len) => value.chars().take(len).collect::<String>(),
            None => value.clone(),
        };
        encode_into(&value, op.allow_reserved, out);
    }

    Ok(())
}

fn encode_into(value: &str, allow_reserved: bool, out: &mut String) {
    let bytes = value.as_bytes();
    let mut idx = 0;
    while idx < bytes.len() {
        let b = bytes[idx];
        let keep = b.is_ascii_alphanumeric()
            || matches!(b, b'-' | b'.' | b'_' | b'~')
            || (allow_reserved && is_reserved(b));

        if keep {
            out.push(char::from(b));
        } else if allow_reserved
            && b == b'%'
            && bytes.get(idx + 1).is_some_and(u8::is_ascii_hexdigit)
            && bytes.get(idx + 2).is_some_and(u8::is_ascii_hexdigit)
        {
            out.push_str(&value[idx..idx + 3]);
            idx += 3;
            continue;
        } else {
            let _ = write!(out, "%{b:02X}");
        }
        idx += 1;
    }
}

fn is_reserved(b: u8) -> bool {
    matches!(
        b,
        b':' | b'/'
            | b'?'
            | b'#'
            | b'['
            | b']'
            | b'@'
            | b'!'
            | b'$'
            | b'&'
            | b'\''
            | b'('
            | b')'
            | b'*'
            | b'+'
            | b','
            | b';'
            | b'='
    )
}
