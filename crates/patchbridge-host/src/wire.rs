//! Hand-rolled wire codec for the bridge line protocol.
//!
//! Commands arrive as one flat JSON-shaped line; results leave the same
//! way. The extractors here are total: they return `Option`/defaults
//! instead of erroring, so a malformed line degrades into an
//! empty-field command that the dispatcher rejects by policy. This is
//! deliberately not a JSON library; the protocol is flat, field order
//! is unspecified, and nested structure beyond one `payload` object and
//! one string map is out of contract.

use patchbridge_common::{BridgeCommand, BridgeResult};
use std::collections::BTreeMap;

/// Escape a string for embedding in a wire line.
pub fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 8);
    for ch in value.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Render a diagnostics map as a flat object with stable key order.
pub fn to_diagnostics_json(values: &BTreeMap<String, String>) -> String {
    let mut out = String::from("{");
    let mut first = true;
    for (key, value) in values {
        if !first {
            out.push(',');
        }
        first = false;
        out.push('"');
        out.push_str(&escape(key));
        out.push_str("\":\"");
        out.push_str(&escape(value));
        out.push('"');
    }
    out.push('}');
    out
}

/// Position of the first value byte after `"key":`, skipping whitespace.
fn find_value_start(json: &str, key: &str) -> Option<usize> {
    let quoted = format!("\"{}\"", key);
    let key_pos = json.find(&quoted)?;
    let after_key = key_pos + quoted.len();
    let colon_pos = after_key + json[after_key..].find(':')?;
    let rest = &json[colon_pos + 1..];
    let offset = rest.find(|c: char| !matches!(c, ' ' | '\t' | '\r' | '\n'))?;
    Some(colon_pos + 1 + offset)
}

/// String value for a key, or `None` when absent or not quoted.
pub fn extract_string_value(json: &str, key: &str) -> Option<String> {
    let quoted = format!("\"{}\"", key);
    let key_pos = json.find(&quoted)?;
    let after_key = key_pos + quoted.len();
    let colon_pos = after_key + json[after_key..].find(':')?;
    let rest = &json[colon_pos + 1..];
    let first_quote = rest.find('"')?;
    let second_quote = first_quote + 1 + rest[first_quote + 1..].find('"')?;
    Some(rest[first_quote + 1..second_quote].to_string())
}

/// Object value for a key by brace-depth scan. Returns `{}` when the key
/// is absent or the braces never balance.
pub fn extract_object(json: &str, key: &str) -> String {
    let empty = "{}".to_string();
    let start = match find_value_start(json, key) {
        Some(start) => start,
        None => return empty,
    };
    let open = match json[start..].find('{') {
        Some(offset) => start + offset,
        None => return empty,
    };

    let mut depth = 0usize;
    for (i, b) in json.as_bytes().iter().enumerate().skip(open) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return json[open..=i].to_string();
                }
            }
            _ => {}
        }
    }
    empty
}

/// Boolean value for a key; only the literals `true` and `false` count.
pub fn read_bool(json: &str, key: &str) -> Option<bool> {
    let start = find_value_start(json, key)?;
    let rest = &json[start..];
    if rest.starts_with("true") {
        return Some(true);
    }
    if rest.starts_with("false") {
        return Some(false);
    }
    None
}

/// Integer value for a key. A leading `+` is rejected; digits stop at
/// the first non-digit byte.
pub fn read_int(json: &str, key: &str) -> Option<i32> {
    let start = find_value_start(json, key)?;
    let rest = json[start..].as_bytes();
    if rest.first() == Some(&b'+') {
        return None;
    }

    let mut end = 0usize;
    if rest.first() == Some(&b'-') {
        end += 1;
    }
    while end < rest.len() && rest[end].is_ascii_digit() {
        end += 1;
    }
    if end == 0 || (end == 1 && rest[0] == b'-') {
        return None;
    }
    json[start..start + end].parse().ok()
}

fn find_unescaped_quote(bytes: &[u8], start: usize) -> Option<usize> {
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' => escaped = true,
            b'"' => return Some(i),
            _ => {}
        }
    }
    None
}

fn skip_whitespace(bytes: &[u8], mut cursor: usize) -> usize {
    while cursor < bytes.len() && matches!(bytes[cursor], b' ' | b'\t' | b'\r' | b'\n') {
        cursor += 1;
    }
    cursor
}

/// Parse a flat `{"k":"v",...}` object into a string map. Unquoted
/// values are kept as trimmed raw tokens; empty keys are dropped.
fn parse_flat_string_map(object_json: &str) -> BTreeMap<String, String> {
    let mut parsed = BTreeMap::new();
    let bytes = object_json.as_bytes();
    let mut cursor = match object_json.find('{') {
        Some(open) => open + 1,
        None => return parsed,
    };

    loop {
        cursor = skip_whitespace(bytes, cursor);
        if cursor >= bytes.len() || bytes[cursor] == b'}' {
            break;
        }
        if bytes[cursor] != b'"' {
            break;
        }

        let key_end = match find_unescaped_quote(bytes, cursor + 1) {
            Some(end) => end,
            None => break,
        };
        let key = &object_json[cursor + 1..key_end];

        cursor = match object_json[key_end + 1..].find(':') {
            Some(offset) => key_end + 1 + offset + 1,
            None => break,
        };
        cursor = skip_whitespace(bytes, cursor);
        if cursor >= bytes.len() {
            break;
        }

        let value;
        if bytes[cursor] == b'"' {
            let value_end = match find_unescaped_quote(bytes, cursor + 1) {
                Some(end) => end,
                None => break,
            };
            value = object_json[cursor + 1..value_end].to_string();
            cursor = value_end + 1;
        } else {
            let mut token_end = cursor;
            while token_end < bytes.len() && bytes[token_end] != b',' && bytes[token_end] != b'}' {
                token_end += 1;
            }
            value = object_json[cursor..token_end].trim().to_string();
            cursor = token_end;
        }

        if !key.is_empty() {
            parsed.insert(key.to_string(), value);
        }

        cursor = skip_whitespace(bytes, cursor);
        if cursor < bytes.len() && bytes[cursor] == b',' {
            cursor += 1;
        }
    }

    parsed
}

/// Flat string map value for a key, empty when absent.
pub fn extract_string_map(json: &str, key: &str) -> BTreeMap<String, String> {
    parse_flat_string_map(&extract_object(json, key))
}

/// Decode one command line into the envelope. Never fails; missing
/// fields decode to empty defaults and are rejected by the dispatcher.
pub fn decode_command(line: &str) -> BridgeCommand {
    BridgeCommand {
        command_id: extract_string_value(line, "commandId").unwrap_or_default(),
        feature_id: extract_string_value(line, "featureId").unwrap_or_default(),
        profile_id: extract_string_value(line, "profileId").unwrap_or_default(),
        mode: extract_string_value(line, "mode").unwrap_or_default(),
        requested_by: extract_string_value(line, "requestedBy").unwrap_or_default(),
        timestamp_utc: extract_string_value(line, "timestampUtc").unwrap_or_default(),
        payload_json: extract_object(line, "payload"),
        process_id: read_int(line, "processId").unwrap_or(0),
        process_name: extract_string_value(line, "processName").unwrap_or_default(),
        resolved_anchors: extract_string_map(line, "resolvedAnchors"),
    }
}

/// Encode one result envelope as a single line (no trailing newline).
pub fn encode_result(result: &BridgeResult) -> String {
    format!(
        "{{\"commandId\":\"{}\",\"succeeded\":{},\"reasonCode\":\"{}\",\"backend\":\"{}\",\"hookState\":\"{}\",\"message\":\"{}\",\"diagnostics\":{}}}",
        escape(&result.command_id),
        result.succeeded,
        escape(&result.reason_code),
        escape(&result.backend),
        escape(&result.hook_state),
        escape(&result.message),
        to_diagnostics_json(&result.diagnostics),
    )
}
