//! Post-processing: deterministic cleanup of the model's JSON reply.
//!
//! The instruction asks for one bare JSON object, but models still wrap it
//! in ` ```json ` fences, prefix it with "Here is the data:", or leave a BOM
//! in front. These rules strip such wrapping without touching the values;
//! the schema itself is enforced by [`StructuredReceipt`] decoding.
//!
//! ## Rule Order
//!
//! Invisible characters go first so fence detection sees clean input, and
//! fences go before object location so a fenced reply with trailing prose is
//! still cut at the right brace.

use crate::error::ReceiptError;
use crate::receipt::StructuredReceipt;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Apply all cleanup rules and decode the record.
///
/// Rules (applied in order):
/// 1. Strip invisible Unicode (BOM, zero-width spaces)
/// 2. Strip outer code fences (` ```json `, ` ```JSON `, bare ` ``` `)
/// 3. Cut the outermost `{ ... }` object out of surrounding prose
///
/// Any failure after cleanup is [`ReceiptError::InvalidResponse`].
pub fn parse_receipt_reply(reply: &str) -> Result<StructuredReceipt, ReceiptError> {
    let json = extract_json_object(reply).ok_or_else(|| ReceiptError::InvalidResponse {
        detail: format!("no JSON object in reply: {}", preview(reply)),
    })?;

    let record = StructuredReceipt::from_json_str(&json).map_err(|e| {
        ReceiptError::InvalidResponse {
            detail: e.to_string(),
        }
    })?;
    debug!("Decoded record ({} bytes of JSON)", json.len());
    Ok(record.normalized())
}

/// Run rules 1-3 and return the JSON object text, if any.
pub fn extract_json_object(reply: &str) -> Option<String> {
    let s = remove_invisible_chars(reply);
    let s = strip_code_fences(&s);
    outermost_object(&s).map(str::to_string)
}

// ── Rule 1: Strip invisible Unicode ──────────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(c, '\u{FEFF}' | '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}'))
        .collect()
}

// ── Rule 2: Strip outer code fences ──────────────────────────────────────────

static RE_FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:[A-Za-z]+)?[ \t]*\r?\n(.*?)\r?\n?```").unwrap());

fn strip_code_fences(input: &str) -> String {
    match RE_FENCED.captures(input) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 3: Locate the outermost object ──────────────────────────────────────

/// From the first `{` to the brace that closes it, skipping braces inside
/// string literals.
fn outermost_object(input: &str) -> Option<&str> {
    let start = input.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in input[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&input[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn preview(reply: &str) -> String {
    let trimmed = reply.trim();
    match trimmed.char_indices().nth(80) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
