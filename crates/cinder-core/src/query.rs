//! Live query definitions for `QWATCH`.
//!
//! Two forms are accepted, keywords case-insensitive:
//!
//! ```text
//! SELECT * FROM user:*
//! SELECT $key, $value WHERE $key LIKE 'user:*'
//! ```
//!
//! The pattern is a glob over key names. The field list picks which
//! columns each result row carries; `*` means both key and value.

use bytes::Bytes;
use thiserror::Error;

use crate::glob::glob_match;
use crate::reply::Reply;

/// Reasons a query string is rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("query must start with SELECT")]
    MissingSelect,
    #[error("query needs a FROM or WHERE clause")]
    MissingSource,
    #[error("unknown field '{0}'")]
    UnknownField(String),
    #[error("no fields selected")]
    NoFields,
    #[error("WHERE clause must be $key LIKE '<pattern>'")]
    BadWhere,
    #[error("empty key pattern")]
    EmptyPattern,
}

/// A parsed live query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchQuery {
    text: String,
    select_key: bool,
    select_value: bool,
    pattern: String,
}

impl WatchQuery {
    pub fn parse(text: &str) -> Result<Self, QueryError> {
        let trimmed = text.trim();
        let upper = trimmed.to_ascii_uppercase();

        if !upper.starts_with("SELECT ") {
            return Err(QueryError::MissingSelect);
        }
        let body = &trimmed["SELECT ".len()..];
        let body_upper = &upper["SELECT ".len()..];

        let (fields, pattern) = if let Some(at) = body_upper.find(" FROM ") {
            (&body[..at], parse_from(&body[at + " FROM ".len()..])?)
        } else if let Some(at) = body_upper.find(" WHERE ") {
            (&body[..at], parse_where(&body[at + " WHERE ".len()..])?)
        } else {
            return Err(QueryError::MissingSource);
        };

        let (select_key, select_value) = parse_fields(fields)?;
        Ok(Self {
            text: trimmed.to_owned(),
            select_key,
            select_value,
            pattern,
        })
    }

    /// The query as the client wrote it (trimmed).
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn matches_key(&self, key: &str) -> bool {
        glob_match(&self.pattern, key)
    }

    /// Builds one result row for a matching entry.
    pub fn row(&self, key: &str, value: &Bytes) -> Reply {
        let mut cols = Vec::with_capacity(2);
        if self.select_key {
            cols.push(Reply::bytes(key.to_owned()));
        }
        if self.select_value {
            cols.push(Reply::Bytes(value.clone()));
        }
        Reply::Array(cols)
    }
}

fn parse_fields(fields: &str) -> Result<(bool, bool), QueryError> {
    let (mut key, mut value) = (false, false);
    for field in fields.split(',').map(str::trim).filter(|f| !f.is_empty()) {
        match field.to_ascii_lowercase().as_str() {
            "*" => (key, value) = (true, true),
            "$key" => key = true,
            "$value" => value = true,
            _ => return Err(QueryError::UnknownField(field.to_owned())),
        }
    }
    if !key && !value {
        return Err(QueryError::NoFields);
    }
    Ok((key, value))
}

fn parse_from(source: &str) -> Result<String, QueryError> {
    let pattern = unquote(source.trim());
    if pattern.is_empty() {
        return Err(QueryError::EmptyPattern);
    }
    Ok(pattern.to_owned())
}

fn parse_where(clause: &str) -> Result<String, QueryError> {
    let mut parts = clause.trim().splitn(3, char::is_whitespace);
    let subject = parts.next().unwrap_or_default();
    let op = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or_default();

    if !subject.eq_ignore_ascii_case("$key") || !op.eq_ignore_ascii_case("LIKE") {
        return Err(QueryError::BadWhere);
    }
    parse_from(rest)
}

fn unquote(s: &str) -> &str {
    for q in ['\'', '"'] {
        if let Some(inner) = s.strip_prefix(q).and_then(|s| s.strip_suffix(q)) {
            return inner;
        }
    }
    s
}
