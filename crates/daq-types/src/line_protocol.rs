//! InfluxDB line-protocol encoding.
//!
//! Escaping rules mirror the database wire format exactly: measurement/tag/field
//! keys and tag values escape backslash, comma, space and `=`; field values
//! format by type.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::sample::{FieldValue, Sample};

fn escape_key(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ',' => out.push_str("\\,"),
            ' ' => out.push_str("\\ "),
            '=' => out.push_str("\\="),
            _ => out.push(c),
        }
    }
    out
}

fn format_field_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Bool(b) => if *b { "true" } else { "false" }.to_string(),
        FieldValue::Int(i) => format!("{}i", i),
        FieldValue::Float(f) => format_float_g15(*f),
        FieldValue::Str(s) => {
            let mut out = String::with_capacity(s.len() + 2);
            out.push('"');
            for c in s.chars() {
                match c {
                    '\\' => out.push_str("\\\\"),
                    '"' => out.push_str("\\\""),
                    '\n' => out.push_str("\\n"),
                    _ => out.push(c),
                }
            }
            out.push('"');
            out
        }
    }
}

/// Formats a float with up to 15 significant digits, matching Python's `.15g`.
pub fn format_float_g15(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    let mut s = format!("{:.*e}", 14, value);
    // Reparse through the shortest round-tripping representation bounded to 15
    // significant digits, then normalize away a redundant exponent when the
    // magnitude doesn't need one - this is what `%.15g` does under the hood.
    if let Some(epos) = s.find('e') {
        let exp: i32 = s[epos + 1..].parse().unwrap_or(0);
        if exp.abs() < 15 {
            s = format!("{:.*}", (14 - exp).max(0) as usize, value);
            while s.contains('.') && s.ends_with('0') {
                s.pop();
            }
            if s.ends_with('.') {
                s.pop();
            }
            return s;
        }
    }
    s
}

/// Builds one line-protocol record: `measurement[,tags] fields timestamp_ns`.
pub fn to_line(
    measurement: &str,
    tags: &BTreeMap<String, String>,
    fields: &BTreeMap<String, FieldValue>,
    timestamp_ns: i64,
) -> String {
    let mut prefix = escape_key(measurement);
    if !tags.is_empty() {
        for (k, v) in tags {
            let _ = write!(prefix, ",{}={}", escape_key(k), escape_key(v));
        }
    }
    let fields_payload = fields
        .iter()
        .map(|(k, v)| format!("{}={}", escape_key(k), format_field_value(v)))
        .collect::<Vec<_>>()
        .join(",");
    format!("{} {} {}", prefix, fields_payload, timestamp_ns)
}

/// Builds the line for a `Sample`: tags come from its metadata tags plus the
/// channel index, fields come from its calibrated values plus any numeric
/// `metadata.fields`.
pub fn sample_to_line(sample: &Sample) -> String {
    let mut tags = sample.metadata.tags.clone();
    tags.insert("channel".to_string(), sample.channel.to_string());

    let mut fields: BTreeMap<String, FieldValue> = sample
        .calibrated_values
        .iter()
        .map(|(k, v)| (k.clone(), FieldValue::Float(*v)))
        .collect();
    fields.extend(sample.metadata.fields.clone());

    to_line(
        &sample.metadata.measurement,
        &tags,
        &fields,
        sample.timestamp_ns,
    )
}
