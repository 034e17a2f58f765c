//! Search entry to row conversion.

use base64::Engine;
use ldap3::SearchEntry;
use serde_json::Value;
use uuid::Uuid;
use xavyo_directory_query::Row;

/// Format a 16-byte AD `objectGUID` as the canonical GUID string.
///
/// AD stores the first three fields little-endian.
#[must_use]
pub fn format_guid(bytes: &[u8]) -> Option<String> {
    Uuid::from_slice_le(bytes).ok().map(|u| u.to_string())
}

/// Format a binary security identifier as `S-R-A-S1-S2-...`.
#[must_use]
pub fn format_sid(bytes: &[u8]) -> Option<String> {
    if bytes.len() < 8 {
        return None;
    }
    let revision = bytes[0];
    let sub_count = usize::from(bytes[1]);
    if bytes.len() != 8 + 4 * sub_count {
        return None;
    }

    let authority = bytes[2..8]
        .iter()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));

    let mut sid = format!("S-{revision}-{authority}");
    for chunk in bytes[8..].chunks_exact(4) {
        let sub = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        sid.push('-');
        sid.push_str(&sub.to_string());
    }
    Some(sid)
}

fn binary_value(name: &str, bytes: &[u8]) -> Value {
    let decoded = if name.eq_ignore_ascii_case("objectGUID") {
        format_guid(bytes)
    } else if name.eq_ignore_ascii_case("objectSid") || name.eq_ignore_ascii_case("sIDHistory") {
        format_sid(bytes)
    } else {
        None
    };
    Value::String(
        decoded.unwrap_or_else(|| base64::engine::general_purpose::STANDARD.encode(bytes)),
    )
}

fn collapse(mut values: Vec<Value>) -> Option<Value> {
    match values.len() {
        0 => None,
        1 => values.pop(),
        _ => Some(Value::Array(values)),
    }
}

/// Convert an LDAP search entry to a row.
///
/// `dn` is always present. Single-valued attributes become strings and
/// multi-valued attributes arrays; attribute names are sorted.
pub(crate) fn entry_to_row(entry: SearchEntry) -> Row {
    let mut row = Row::new();
    row.insert("dn".to_string(), Value::String(entry.dn));

    let mut attrs: Vec<(String, Value)> = entry
        .attrs
        .into_iter()
        .filter_map(|(name, values)| {
            collapse(values.into_iter().map(Value::String).collect()).map(|v| (name, v))
        })
        .collect();

    attrs.extend(entry.bin_attrs.into_iter().filter_map(|(name, values)| {
        let decoded = values.iter().map(|b| binary_value(&name, b)).collect();
        collapse(decoded).map(|v| (name, v))
    }));

    attrs.sort_by(|a, b| a.0.cmp(&b.0));
    row.extend(attrs);
    row
}
