//! Best-effort recovery of JSON replies from language models.
//!
//! Providers are asked for JSON but regularly return stray quotes, literal
//! newlines inside strings, output cut off at the token ceiling, or an object
//! wrapped in prose. [`repair`] tries a fixed sequence of cheap fixes and
//! reports a [`RepairFailure`] carrying the raw text when none of them work.

use serde::Serialize;
use serde_json::Value;

pub const REPAIR_ERROR: &str = "Failed to parse JSON response";

/// Returned when no repair step produced valid JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{error}: {original_error}")]
pub struct RepairFailure {
    pub error: String,
    /// Parser message from the very first attempt on the untouched text.
    pub original_error: String,
    /// The input, verbatim.
    pub raw_response: String,
}

/// Parse `text` as JSON, repairing common model mistakes along the way.
pub fn repair(text: &str) -> Result<Value, RepairFailure> {
    let first_error = match serde_json::from_str::<Value>(text) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };
    tracing::warn!(error = %first_error, len = text.len(), "reply is not valid JSON, attempting repair");

    let quoted = fix_unescaped_quotes(text.trim());
    if let Ok(value) = serde_json::from_str(&quoted) {
        return Ok(value);
    }

    let closed = close_truncated(&quoted);
    if closed != quoted {
        if let Ok(value) = serde_json::from_str(&closed) {
            tracing::debug!("repaired truncated reply");
            return Ok(value);
        }
    }

    if let Some(span) = outer_object_span(text) {
        if let Ok(value) = serde_json::from_str(&fix_unescaped_quotes(span)) {
            tracing::debug!("extracted embedded object from reply");
            return Ok(value);
        }
    }

    tracing::warn!("all repair attempts failed");
    Err(RepairFailure {
        error: REPAIR_ERROR.to_string(),
        original_error: first_error.to_string(),
        raw_response: text.to_string(),
    })
}

/// Escape quotes and control characters that appear inside string literals.
///
/// A quote inside a string only closes it when the next non-blank character
/// is structural (`,` `}` `]` `:`) or the text ends; any other quote is
/// treated as part of the value.
fn fix_unescaped_quotes(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if !in_string {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
            continue;
        }
        if escaped {
            escaped = false;
            out.push(c);
            continue;
        }
        match c {
            '\\' => {
                escaped = true;
                out.push(c);
            }
            '"' if closes_string(&chars[i + 1..]) => {
                in_string = false;
                out.push(c);
            }
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}

fn closes_string(rest: &[char]) -> bool {
    match rest.iter().find(|c| !c.is_whitespace()) {
        None => true,
        Some(c) => matches!(c, ',' | '}' | ']' | ':'),
    }
}

/// Close whatever a truncated reply left open: an unterminated string, a
/// dangling comma, then every open bracket and brace in reverse order.
fn close_truncated(text: &str) -> String {
    let mut closers = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => closers.push('}'),
            '[' => closers.push(']'),
            '}' | ']' => {
                closers.pop();
            }
            _ => {}
        }
    }

    let mut out = text.to_string();
    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    } else {
        loop {
            let keep = out.trim_end().len();
            out.truncate(keep);
            if !out.ends_with(',') {
                break;
            }
            out.pop();
        }
    }
    out.extend(closers.iter().rev());
    out
}

/// From the first `{` to the last `}`.
fn outer_object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
