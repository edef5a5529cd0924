//! Canonical codec: deterministic JSON bytes and content digests.
//!
//! Object keys are sorted byte-wise, arrays keep their order, and no
//! whitespace is emitted. Numbers render through `serde_json` (integers
//! without a decimal point, floats in shortest round-trip form). A
//! `serde_json::Value` cannot carry NaN or infinity, so the only entry
//! point for raw floats is [`finite_number`], which rejects them.
//!
//! Two digest families are used:
//!
//! | Algorithm | Rendering            | Used for                                    |
//! |-----------|----------------------|---------------------------------------------|
//! | SHA3-512  | `sha3-512:<hex>`     | intents, plans, refusals, AAR, freeze, SPE   |
//! | SHA-256   | `<hex>` / `sha256:…` | permits, tokens, receipts, SCE, run ledger   |

use serde::Serialize;
use serde_json::{Number, Value};
use sha2::Sha256;
use sha3::{Digest, Sha3_512};

use crate::error::EglError;

pub const SHA3_512_PREFIX: &str = "sha3-512:";
pub const SHA256_PREFIX: &str = "sha256:";

/// Digest algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha256,
    Sha3_512,
}

/// Canonical JSON text of a value.
pub fn canonical_json_string(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

/// Canonical JSON bytes of a value.
pub fn canonical_json_bytes(value: &Value) -> Vec<u8> {
    canonical_json_string(value).into_bytes()
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(_) => out.push_str(&value.to_string()),
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (idx, (key, item)) in entries.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
    }
}

/// Serialize a typed value into the JSON model the codec hashes.
pub fn to_canonical_value<T: Serialize + ?Sized>(value: &T) -> Result<Value, EglError> {
    serde_json::to_value(value).map_err(EglError::codec)
}

/// Convert a float into a JSON number, rejecting NaN and infinities.
pub fn finite_number(value: f64) -> Result<Value, EglError> {
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or(EglError::NonFiniteNumber { value })
}

/// Lowercase hex of raw bytes under the chosen algorithm.
pub fn digest_bytes_hex(bytes: &[u8], algorithm: HashAlgorithm) -> String {
    match algorithm {
        HashAlgorithm::Sha256 => format!("{:x}", Sha256::digest(bytes)),
        HashAlgorithm::Sha3_512 => format!("{:x}", Sha3_512::digest(bytes)),
    }
}

/// `hash(canonicalize(value))` as lowercase hex.
pub fn digest(value: &Value, algorithm: HashAlgorithm) -> String {
    digest_bytes_hex(&canonical_json_bytes(value), algorithm)
}

/// SHA3-512 digest rendered as `sha3-512:<hex>`.
pub fn sha3_512_tagged(value: &Value) -> String {
    format!("{SHA3_512_PREFIX}{}", digest(value, HashAlgorithm::Sha3_512))
}

/// Bare SHA-256 hex of the canonical form.
pub fn sha256_hex(value: &Value) -> String {
    digest(value, HashAlgorithm::Sha256)
}

/// SHA-256 digest rendered as `sha256:<hex>`.
pub fn sha256_tagged(value: &Value) -> String {
    format!("{SHA256_PREFIX}{}", sha256_hex(value))
}

/// Bare SHA-256 hex of raw bytes.
pub fn sha256_bytes_hex(bytes: &[u8]) -> String {
    digest_bytes_hex(bytes, HashAlgorithm::Sha256)
}

/// Bare SHA-256 hex of UTF-8 text.
pub fn sha256_text_hex(text: &str) -> String {
    sha256_bytes_hex(text.as_bytes())
}

/// Recursively drop every object key equal to `key`.
///
/// Run-level digests are computed over records with `run_id` removed so
/// that two runs of the same pack hash identically.
pub fn strip_key(value: &Value, key: &str) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(|v| strip_key(v, key)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| (k.clone(), strip_key(v, key)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// SHA-256 hex of a value with every `run_id` removed.
pub fn sha256_stable(value: &Value) -> String {
    sha256_hex(&strip_key(value, "run_id"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn sorts_keys_and_strips_whitespace() {
        let value = json!({"b": 1, "a": [3, 1, {"z": null, "y": true}], "c": "x"});
        insta::assert_snapshot!(
            canonical_json_string(&value),
            @r#"{"a":[3,1,{"y":true,"z":null}],"b":1,"c":"x"}"#
        );
    }

    #[test]
    fn integers_render_without_decimal_point() {
        assert_eq!(canonical_json_string(&json!(42)), "42");
        assert_eq!(canonical_json_string(&json!(-7)), "-7");
        assert_eq!(canonical_json_string(&json!(0.5)), "0.5");
    }

    #[test]
    fn escapes_strings_like_json() {
        let value = json!({"k\"ey": "line\nbreak"});
        assert_eq!(canonical_json_string(&value), r#"{"k\"ey":"line\nbreak"}"#);
    }

    #[test]
    fn rejects_non_finite_numbers() {
        assert!(finite_number(f64::NAN).is_err());
        assert!(finite_number(f64::INFINITY).is_err());
        assert!(finite_number(f64::NEG_INFINITY).is_err());
        assert_eq!(finite_number(1.5).expect("finite"), json!(1.5));
    }

    #[test]
    fn distinct_structures_do_not_collide() {
        let as_string = json!({"a": "1"});
        let as_number = json!({"a": 1});
        let as_list = json!({"a": [1]});
        let other_key = json!({"b": 1});
        let hashes = [
            sha3_512_tagged(&as_string),
            sha3_512_tagged(&as_number),
            sha3_512_tagged(&as_list),
            sha3_512_tagged(&other_key),
        ];
        for (i, a) in hashes.iter().enumerate() {
            for b in hashes.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn digest_formats() {
        let value = json!({"x": 1});
        let sha3 = sha3_512_tagged(&value);
        assert!(sha3.starts_with(SHA3_512_PREFIX));
        assert_eq!(sha3.len(), SHA3_512_PREFIX.len() + 128);

        let sha256 = sha256_hex(&value);
        assert_eq!(sha256.len(), 64);
        assert_eq!(sha256_tagged(&value), format!("sha256:{sha256}"));
    }

    #[test]
    fn sha256_of_known_text() {
        assert_eq!(
            sha256_text_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn strip_key_is_recursive() {
        let value = json!({"run_id": "r1", "nested": [{"run_id": "r2", "keep": 1}]});
        assert_eq!(strip_key(&value, "run_id"), json!({"nested": [{"keep": 1}]}));
        assert_eq!(
            sha256_stable(&json!({"run_id": "a", "v": 1})),
            sha256_stable(&json!({"run_id": "b", "v": 1}))
        );
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            "[a-z]{0,6}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,4}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn canonical_form_is_deterministic(value in arb_json()) {
            prop_assert_eq!(canonical_json_bytes(&value), canonical_json_bytes(&value.clone()));
        }

        #[test]
        fn canonical_form_ignores_insertion_order(
            entries in prop::collection::btree_map("[a-z]{1,5}", any::<i32>(), 1..8)
        ) {
            let forward: serde_json::Map<String, Value> =
                entries.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
            let reverse: serde_json::Map<String, Value> =
                entries.iter().rev().map(|(k, v)| (k.clone(), json!(v))).collect();
            prop_assert_eq!(
                canonical_json_string(&Value::Object(forward)),
                canonical_json_string(&Value::Object(reverse))
            );
        }

        #[test]
        fn canonical_form_round_trips_through_parser(value in arb_json()) {
            let text = canonical_json_string(&value);
            let parsed: Value = serde_json::from_str(&text).expect("canonical output parses");
            prop_assert_eq!(parsed, value);
        }
    }
}
