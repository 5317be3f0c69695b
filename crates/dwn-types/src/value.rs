use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{StoreError, StoreResult};

/// A single indexable property value.
///
/// Only three kinds of values are indexable. Numbers are signed 64-bit
/// integers; values of different kinds are unordered relative to each other.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndexValue {
    Bool(bool),
    Number(i64),
    String(String),
}

/// Named properties of one indexed item.
pub type KeyValues = BTreeMap<String, IndexValue>;

impl IndexValue {
    /// Convert a JSON value into an index value.
    ///
    /// Integral floats (`5.0`) are accepted; fractional numbers, `null`,
    /// arrays and objects are rejected.
    pub fn from_json(property: &str, value: &Value) -> StoreResult<Self> {
        let invalid = |reason: &str| StoreError::InvalidIndexValue {
            property: property.to_string(),
            reason: reason.to_string(),
        };
        match value {
            Value::Bool(b) => Ok(Self::Bool(*b)),
            Value::String(s) => Ok(Self::String(s.clone())),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    return Ok(Self::Number(i));
                }
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
                        Ok(Self::Number(f as i64))
                    }
                    Some(_) => Err(invalid("only integral numbers are indexable")),
                    None => Err(invalid("number out of range")),
                }
            }
            Value::Null => Err(invalid("null is not indexable")),
            Value::Array(_) | Value::Object(_) => Err(invalid("nested values are not indexable")),
        }
    }

    /// Convert every entry of a JSON object into [`KeyValues`].
    pub fn map_from_json(object: &serde_json::Map<String, Value>) -> StoreResult<KeyValues> {
        object
            .iter()
            .map(|(k, v)| Ok((k.clone(), Self::from_json(k, v)?)))
            .collect()
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::from(*n),
            Self::String(s) => Value::String(s.clone()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl PartialOrd for IndexValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Number(a), Self::Number(b)) => Some(a.cmp(b)),
            (Self::String(a), Self::String(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for IndexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<&str> for IndexValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for IndexValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for IndexValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for IndexValue {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for IndexValue {
    fn from(n: i32) -> Self {
        Self::Number(n.into())
    }
}

impl From<u32> for IndexValue {
    fn from(n: u32) -> Self {
        Self::Number(n.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_json_kinds() {
        assert_eq!(IndexValue::from_json("a", &json!(true)).unwrap(), IndexValue::Bool(true));
        assert_eq!(IndexValue::from_json("a", &json!(-7)).unwrap(), IndexValue::Number(-7));
        assert_eq!(IndexValue::from_json("a", &json!("x")).unwrap(), IndexValue::from("x"));
        assert_eq!(IndexValue::from_json("a", &json!(5.0)).unwrap(), IndexValue::Number(5));
    }

    #[test]
    fn from_json_rejects_fractional_and_nested() {
        for bad in [json!(1.5), json!(null), json!([1]), json!({"a": 1})] {
            let err = IndexValue::from_json("size", &bad).unwrap_err();
            assert!(
                matches!(err, StoreError::InvalidIndexValue { ref property, .. } if property == "size"),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn ordering_within_kind_only() {
        assert!(IndexValue::Number(-1) < IndexValue::Number(0));
        assert!(IndexValue::from("a") < IndexValue::from("b"));
        assert!(IndexValue::Bool(false) < IndexValue::Bool(true));
        assert_eq!(IndexValue::Number(1).partial_cmp(&IndexValue::from("1")), None);
    }

    #[test]
    fn untagged_serde() {
        let kv: KeyValues = [
            ("published".to_string(), IndexValue::Bool(true)),
            ("size".to_string(), IndexValue::Number(42)),
            ("schema".to_string(), IndexValue::from("https://schema.org/Note")),
        ]
        .into_iter()
        .collect();
        let json = serde_json::to_value(&kv).unwrap();
        assert_eq!(
            json,
            json!({"published": true, "size": 42, "schema": "https://schema.org/Note"})
        );
        let back: KeyValues = serde_json::from_value(json).unwrap();
        assert_eq!(back, kv);
    }

    #[test]
    fn map_from_json_object() {
        let obj = json!({"a": 1, "b": "two"});
        let kv = IndexValue::map_from_json(obj.as_object().unwrap()).unwrap();
        assert_eq!(kv.len(), 2);
        assert_eq!(kv["a"].as_i64(), Some(1));
        assert_eq!(kv["b"].as_str(), Some("two"));
    }
}
