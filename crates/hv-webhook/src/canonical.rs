//! Canonical JSON serialization for signature computation.
//!
//! Object keys are emitted in lexicographic order with tight separators
//! (`","` and `":"`). Non-ASCII stays raw UTF-8, never `\uXXXX`-escaped;
//! producers must sign the same byte sequence.

use serde_json::Value;
use std::collections::BTreeMap;

/// Serialize a JSON value in canonical form.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            // BTreeMap gives lexicographic key order regardless of the
            // serde_json map implementation in use.
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (key, val)) in sorted.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).expect("string serialization"));
                out.push(':');
                write_value(val, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        scalar => {
            out.push_str(&serde_json::to_string(scalar).expect("scalar serialization"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_sorted_with_tight_separators() {
        let value = json!({"b": 2, "a": 1});
        assert_eq!(canonical_json(&value), r#"{"a":1,"b":2}"#);
    }

    #[test]
    fn nested_objects_are_sorted_too() {
        let value = json!({"z": {"y": 1, "x": [ {"b": 2, "a": 1} ]}, "a": "v"});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":"v","z":{"x":[{"a":1,"b":2}],"y":1}}"#
        );
    }

    #[test]
    fn non_ascii_stays_raw_utf8() {
        let value = json!({"msg": "こんにちは"});
        assert_eq!(canonical_json(&value), r#"{"msg":"こんにちは"}"#);
    }

    #[test]
    fn scalars_and_arrays_round_trip() {
        assert_eq!(canonical_json(&json!(null)), "null");
        assert_eq!(canonical_json(&json!(true)), "true");
        assert_eq!(canonical_json(&json!([1, "two", null])), r#"[1,"two",null]"#);
    }
}
