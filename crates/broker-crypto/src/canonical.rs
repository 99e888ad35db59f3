//! Deterministic JSON canonicalization.
//!
//! Object keys are emitted in lexicographic byte order with no
//! insignificant whitespace; array order is preserved. Strings and numbers
//! follow `serde_json` formatting rules, so any JSON value a handler
//! accepted can be re-canonicalized to the exact bytes the caller signed.

use serde_json::Value;

/// Produces the canonical byte form of a JSON payload.
pub fn canonicalize(value: &Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(128);
    write_value(value, &mut out);
    out
}

fn write_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => out.extend_from_slice(n.to_string().as_bytes()),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out);
            }
            out.push(b']');
        }
        Value::Object(map) => {
            // serde_json's default map is a BTreeMap so iteration is already
            // key-sorted, but sort explicitly so the invariant does not
            // depend on the `preserve_order` feature being off.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_string(key, out);
                out.push(b':');
                write_value(&map[key], out);
            }
            out.push(b'}');
        }
    }
}

fn write_string(s: &str, out: &mut Vec<u8>) {
    // serde_json handles escaping; a plain string cannot fail to serialize.
    let escaped = serde_json::to_string(s).unwrap_or_default();
    out.extend_from_slice(escaped.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_matter() {
        let a = json!({"a": 1, "b": 2});
        let b = json!({"b": 2, "a": 1});
        assert_eq!(canonicalize(&a), canonicalize(&b));
    }

    #[test]
    fn nested_objects_are_sorted_recursively() {
        let a = json!({"outer": {"z": [1, {"m": 1, "k": 2}], "a": null}});
        let b = json!({"outer": {"a": null, "z": [1, {"k": 2, "m": 1}]}});
        assert_eq!(canonicalize(&a), canonicalize(&b));
    }

    #[test]
    fn array_order_is_preserved() {
        let a = json!([1, 2, 3]);
        let b = json!([3, 2, 1]);
        assert_ne!(canonicalize(&a), canonicalize(&b));
    }

    #[test]
    fn output_has_no_whitespace() {
        let v = json!({"a": [1, 2], "b": {"c": "d e"}});
        let bytes = canonicalize(&v);
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"a":[1,2],"b":{"c":"d e"}}"#
        );
    }

    #[test]
    fn strings_are_escaped() {
        let v = json!({"quote": "a\"b", "newline": "x\ny"});
        let bytes = canonicalize(&v);
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"newline":"x\ny","quote":"a\"b"}"#
        );
    }

    #[test]
    fn scalars_canonicalize_plainly() {
        assert_eq!(canonicalize(&json!(null)), b"null");
        assert_eq!(canonicalize(&json!(true)), b"true");
        assert_eq!(canonicalize(&json!(42)), b"42");
        assert_eq!(canonicalize(&json!("s")), b"\"s\"");
    }
}
