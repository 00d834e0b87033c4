//! Deterministic cache-key derivation.
//!
//! A cache key is the request's category name, a colon, and a 32-bit
//! FNV-1a hash of the payload's canonical JSON rendering, e.g.
//! `forecast:9f3c01ab`. Canonicalization writes object keys in sorted
//! order at every nesting level, so structurally equal payloads produce
//! identical keys regardless of how the maps were built.

use crate::PredictionCategory;
use serde_json::Value;

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Derive the cache key for a `(category, payload)` pair.
pub fn cache_key(category: PredictionCategory, payload: &Value) -> String {
    let canonical = canonical_json(payload);
    let hash = fnv1a_32(canonical.as_bytes());
    format!("{}:{hash:08x}", category.as_str())
}

/// Render a JSON value canonically: object keys sorted at every level,
/// arrays in element order, scalars in `serde_json` notation.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                if let Some(child) = map.get(*key) {
                    write_canonical(child, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// 32-bit FNV-1a over a byte slice. Fixed constants keep the value stable
/// across runs and platforms.
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET;
    for &b in bytes {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cache_key_deterministic() {
        let payload = json!({"series": "revenue", "horizon": 30});
        let k1 = cache_key(PredictionCategory::Forecast, &payload);
        let k2 = cache_key(PredictionCategory::Forecast, &payload);
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_cache_key_ignores_object_key_order() {
        let mut a = serde_json::Map::new();
        a.insert("series".to_string(), json!("revenue"));
        a.insert("horizon".to_string(), json!(30));

        let mut b = serde_json::Map::new();
        b.insert("horizon".to_string(), json!(30));
        b.insert("series".to_string(), json!("revenue"));

        assert_eq!(
            cache_key(PredictionCategory::Forecast, &Value::Object(a)),
            cache_key(PredictionCategory::Forecast, &Value::Object(b)),
        );
    }

    #[test]
    fn test_cache_key_ignores_nested_key_order() {
        let mut inner_a = serde_json::Map::new();
        inner_a.insert("from".to_string(), json!("2026-01-01"));
        inner_a.insert("to".to_string(), json!("2026-02-01"));
        let mut inner_b = serde_json::Map::new();
        inner_b.insert("to".to_string(), json!("2026-02-01"));
        inner_b.insert("from".to_string(), json!("2026-01-01"));

        let a = json!({"window": Value::Object(inner_a), "series": "load"});
        let b = json!({"series": "load", "window": Value::Object(inner_b)});
        assert_eq!(
            cache_key(PredictionCategory::Trend, &a),
            cache_key(PredictionCategory::Trend, &b),
        );
    }

    #[test]
    fn test_cache_key_prefixed_with_category() {
        let payload = json!({"x": 1});
        assert!(cache_key(PredictionCategory::Anomaly, &payload).starts_with("anomaly:"));
        assert!(cache_key(PredictionCategory::Trend, &payload).starts_with("trend:"));
    }

    #[test]
    fn test_different_categories_yield_different_keys() {
        let payload = json!({"x": 1});
        assert_ne!(
            cache_key(PredictionCategory::Forecast, &payload),
            cache_key(PredictionCategory::Anomaly, &payload),
        );
    }

    #[test]
    fn test_different_payloads_yield_different_keys() {
        assert_ne!(
            cache_key(PredictionCategory::Forecast, &json!({"x": 1})),
            cache_key(PredictionCategory::Forecast, &json!({"x": 2})),
        );
    }

    #[test]
    fn test_array_order_is_significant() {
        assert_ne!(
            cache_key(PredictionCategory::Forecast, &json!([1, 2, 3])),
            cache_key(PredictionCategory::Forecast, &json!([3, 2, 1])),
        );
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let mut map = serde_json::Map::new();
        map.insert("b".to_string(), json!(2));
        map.insert("a".to_string(), json!(1));
        assert_eq!(canonical_json(&Value::Object(map)), r#"{"a":1,"b":2}"#);
    }

    #[test]
    fn test_canonical_json_scalars() {
        assert_eq!(canonical_json(&json!(null)), "null");
        assert_eq!(canonical_json(&json!(true)), "true");
        assert_eq!(canonical_json(&json!(42)), "42");
        assert_eq!(canonical_json(&json!("hi")), "\"hi\"");
    }

    #[test]
    fn test_canonical_json_escapes_strings() {
        assert_eq!(canonical_json(&json!("a\"b")), r#""a\"b""#);
    }

    #[test]
    fn test_fnv1a_32_known_vectors() {
        // Published FNV-1a test vectors.
        assert_eq!(fnv1a_32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a_32(b"a"), 0xe40c_292c);
        assert_eq!(fnv1a_32(b"foobar"), 0xbf9c_f968);
    }

    #[test]
    fn test_hash_stable_across_calls() {
        let bytes = b"prediction-gate";
        assert_eq!(fnv1a_32(bytes), fnv1a_32(bytes));
    }
}
