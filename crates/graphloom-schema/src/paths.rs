//! Path expressions: a restricted JSONPath dialect.
//!
//! Supported forms:
//! - `$` — the current document,
//! - `.name` — member access (missing member yields no value),
//! - `[<int>]` — positional array access (out of range yields no value),
//! - `[*]` — wildcard over array elements; subsequent segments flat-map.
//!
//! Expressions are compiled once (at schema registration) and evaluated many
//! times per ingestion run, so the evaluator works directly on borrowed
//! [`serde_json::Value`] trees and never re-parses the expression text.
//!
//! Parsing is the only fallible operation. Evaluation is total: absent data
//! yields "no value", which is distinct from an explicit JSON `null`.

use serde_json::Value;
use thiserror::Error;

/// Parse-time failure, positioned at the offending byte of the expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid path expression at byte {position}: {message}")]
pub struct PathParseError {
    pub position: usize,
    pub message: String,
}

impl PathParseError {
    fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

/// One step of a compiled path.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// `.name`
    Member(String),
    /// `[i]`
    Index(usize),
    /// `[*]`
    Wildcard,
}

/// A compiled path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    source: String,
    segments: Vec<Segment>,
}

impl PathExpr {
    /// Compile an expression. Must begin with `$`.
    pub fn parse(input: &str) -> Result<Self, PathParseError> {
        let bytes = input.as_bytes();
        if bytes.first() != Some(&b'$') {
            return Err(PathParseError::new(0, "expression must begin with `$`"));
        }

        let mut segments = Vec::new();
        let mut pos = 1;
        while pos < bytes.len() {
            match bytes[pos] {
                b'.' => {
                    let start = pos + 1;
                    let mut end = start;
                    while end < bytes.len() && is_member_byte(bytes[end]) {
                        end += 1;
                    }
                    if end == start {
                        return Err(PathParseError::new(pos, "expected member name after `.`"));
                    }
                    segments.push(Segment::Member(input[start..end].to_string()));
                    pos = end;
                }
                b'[' => {
                    let close = input[pos..]
                        .find(']')
                        .map(|off| pos + off)
                        .ok_or_else(|| PathParseError::new(pos, "unterminated `[`"))?;
                    let inner = input[pos + 1..close].trim();
                    if inner == "*" {
                        segments.push(Segment::Wildcard);
                    } else {
                        let index: usize = inner.parse().map_err(|_| {
                            PathParseError::new(
                                pos + 1,
                                format!("expected array index or `*`, found `{inner}`"),
                            )
                        })?;
                        segments.push(Segment::Index(index));
                    }
                    pos = close + 1;
                }
                other => {
                    return Err(PathParseError::new(
                        pos,
                        format!("unexpected character `{}`", other as char),
                    ));
                }
            }
        }

        Ok(Self {
            source: input.to_string(),
            segments,
        })
    }

    /// The original expression text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the expression contains a `[*]` wildcard, i.e. whether it can
    /// fan out over array elements.
    pub fn has_wildcard(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Wildcard))
    }

    /// Scalar evaluation: the first match, or `None` when nothing matches.
    ///
    /// `Some(&Value::Null)` means the document explicitly holds `null`;
    /// `None` means the path selected nothing.
    pub fn eval_scalar<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        self.eval_multi(doc).into_iter().next()
    }

    /// Multi evaluation: the full match sequence in document order.
    pub fn eval_multi<'a>(&self, doc: &'a Value) -> Vec<&'a Value> {
        let mut current = vec![doc];
        for segment in &self.segments {
            if current.is_empty() {
                break;
            }
            let mut next = Vec::with_capacity(current.len());
            for value in current {
                match segment {
                    Segment::Member(name) => {
                        if let Value::Object(map) = value {
                            if let Some(child) = map.get(name) {
                                next.push(child);
                            }
                        }
                    }
                    Segment::Index(index) => {
                        if let Value::Array(items) = value {
                            if let Some(child) = items.get(*index) {
                                next.push(child);
                            }
                        }
                    }
                    Segment::Wildcard => {
                        if let Value::Array(items) = value {
                            next.extend(items.iter());
                        }
                    }
                }
            }
            current = next;
        }
        current
    }
}

fn is_member_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}
