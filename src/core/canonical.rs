//! Canonical JSON serialization and SHA-256 hashing.
//!
//! Every signature and hash link in the system is computed over this
//! serialization. The rule set is fixed: object keys sorted
//! lexicographically at every depth, no insignificant whitespace, integers
//! in shortest decimal form, floats rejected. Any deviation breaks
//! cross-implementation verification, so the algorithm is spelled out here
//! rather than delegated to a library.

use base64ct::{Base64UrlUnpadded, Encoding};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::Error;

/// Canonicalize a JSON value.
///
/// # Errors
///
/// Returns `Error::Canonical` when the value contains a non-integer number.
/// Signed payloads are integer-only; a float anywhere in the tree is a
/// policy violation, not a representable edge case.
pub fn canonicalize(value: &Value) -> Result<String, Error> {
    match value {
        Value::Object(map) => {
            // keys sorted lexicographically at every depth
            let mut pairs: Vec<(&String, &Value)> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);

            let mut out = String::from("{");
            for (i, (k, v)) in pairs.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(k)?);
                out.push(':');
                out.push_str(&canonicalize(v)?);
            }
            out.push('}');
            Ok(out)
        }
        Value::Array(arr) => {
            let mut out = String::from("[");
            for (i, v) in arr.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&canonicalize(v)?);
            }
            out.push(']');
            Ok(out)
        }
        Value::Number(n) => {
            if n.is_f64() {
                return Err(Error::Canonical(format!("non-integer number {n}")));
            }
            // serde_json prints integers in shortest decimal form
            Ok(n.to_string())
        }
        _ => Ok(serde_json::to_string(value)?),
    }
}

/// Canonicalize any serializable value.
///
/// # Errors
///
/// Returns `Error::Canonical` on non-integer numbers, or a serialization
/// error if the type cannot be represented as JSON.
pub fn canonicalize_to<T: Serialize>(value: &T) -> Result<String, Error> {
    canonicalize(&serde_json::to_value(value)?)
}

/// SHA-256 of the canonical form, hex-encoded.
///
/// # Errors
///
/// Propagates canonicalization failures.
pub fn hash_canonical<T: Serialize>(value: &T) -> Result<String, Error> {
    Ok(sha256_hex(canonicalize_to(value)?.as_bytes()))
}

/// Raw SHA-256 digest bytes.
#[must_use]
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// SHA-256, hex-encoded.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// SHA-256, base64url-encoded without padding.
#[must_use]
pub fn sha256_b64u(data: &[u8]) -> String {
    Base64UrlUnpadded::encode_string(Sha256::digest(data).as_slice())
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn sorts_keys() {
        let v = json!({"b": 1, "a": 2});
        assert_eq!(canonicalize(&v).unwrap(), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn sorts_nested() {
        let v = json!({"z": {"b": 1, "a": 2}, "a": []});
        assert_eq!(canonicalize(&v).unwrap(), r#"{"a":[],"z":{"a":2,"b":1}}"#);
    }

    #[test]
    fn key_order_insensitive() {
        let a = json!({"scope": "SOC 2", "summary": {"controlsPassed": 3, "controlsTested": 4}});
        let b: Value =
            serde_json::from_str(r#"{"summary":{"controlsTested":4,"controlsPassed":3},"scope":"SOC 2"}"#)
                .unwrap();
        assert_eq!(canonicalize(&a).unwrap(), canonicalize(&b).unwrap());
    }

    #[test]
    fn rejects_floats() {
        let v = json!({"score": 99.5});
        assert!(matches!(canonicalize(&v), Err(Error::Canonical(_))));
    }

    #[test]
    fn escapes_strings() {
        let v = json!({"msg": "say \"hi\""});
        assert_eq!(canonicalize(&v).unwrap(), r#"{"msg":"say \"hi\""}"#);
    }

    #[test]
    fn hash_deterministic() {
        let v = json!({"scope": "annual audit", "version": 1});
        let h1 = hash_canonical(&v).unwrap();
        let h2 = hash_canonical(&v).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }
}
