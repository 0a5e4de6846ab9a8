//! Request identity for cached reads.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::transport::Operation;

/// Deterministic identity of a read: operation name, document and variables.
///
/// The name selects one operation out of a multi-operation document, so it is
/// part of the identity. Variable key order never affects the key, at any
/// nesting depth.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
  pub fn derive(operation: &Operation, variables: &Value) -> Self {
    let variables = match variables {
      // Absent and empty variables are the same request.
      Value::Null => Value::Object(Default::default()),
      other => other.clone(),
    };

    let input = format!(
      "op:{}\ndoc:{}\nvars:{}",
      operation.name.as_deref().unwrap_or_default(),
      operation.document.trim(),
      canonical_json(&variables)
    );

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    CacheKey(hex::encode(hasher.finalize()))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Serialize `value` with object keys sorted at every level.
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
      for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        write_canonical(&map[key], out);
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

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn op(document: &str) -> Operation {
    Operation::new(document)
  }

  #[test]
  fn test_key_ignores_variable_order() {
    let a: Value = serde_json::from_str(r#"{"b": 1, "a": {"y": [1, 2], "x": null}}"#).unwrap();
    let b: Value = serde_json::from_str(r#"{"a": {"x": null, "y": [1, 2]}, "b": 1}"#).unwrap();

    let q = op("query Items { items { id } }");
    assert_eq!(CacheKey::derive(&q, &a), CacheKey::derive(&q, &b));
  }

  #[test]
  fn test_key_distinguishes_values_and_operations() {
    let q = op("query Items { items { id } }");
    assert_ne!(
      CacheKey::derive(&q, &json!({"id": 1})),
      CacheKey::derive(&q, &json!({"id": 2}))
    );
    assert_ne!(
      CacheKey::derive(&q, &json!({})),
      CacheKey::derive(&op("query Other { x }"), &json!({}))
    );
    // Array order is meaningful
    assert_ne!(
      CacheKey::derive(&q, &json!({"ids": [1, 2]})),
      CacheKey::derive(&q, &json!({"ids": [2, 1]}))
    );
  }

  #[test]
  fn test_key_distinguishes_operation_names() {
    let document = "query A { a } query B { b }";
    let vars = json!({});

    let a = CacheKey::derive(&Operation::named("A", document), &vars);
    let b = CacheKey::derive(&Operation::named("B", document), &vars);
    assert_ne!(a, b);
    assert_ne!(a, CacheKey::derive(&op(document), &vars));
    assert_eq!(a, CacheKey::derive(&Operation::named("A", document), &vars));
  }

  #[test]
  fn test_null_variables_match_empty_object() {
    let q = op("query Items { items { id } }");
    assert_eq!(
      CacheKey::derive(&q, &Value::Null),
      CacheKey::derive(&q, &json!({}))
    );
  }

  #[test]
  fn test_canonical_json_escapes_keys() {
    assert_eq!(
      canonical_json(&json!({"b\"": "x", "a": [true, 1.5]})),
      r#"{"a":[true,1.5],"b\"":"x"}"#
    );
  }
}
