//! Command argument values
//!
//! RTMP commands carry AMF-typed arguments. The engine decodes them and hands
//! them over in this form; the bridging layer only inspects a few fields
//! (status codes, stream ids).

use std::collections::HashMap;

/// An AMF value as surfaced by the engine
#[derive(Debug, Clone, PartialEq, Default)]
pub enum AmfValue {
    #[default]
    Null,

    Undefined,

    Boolean(bool),

    Number(f64),

    String(String),

    /// Strict array
    Array(Vec<AmfValue>),

    /// Anonymous object, also used for ECMA arrays
    Object(HashMap<String, AmfValue>),
}

impl AmfValue {
    /// Build an object from key/value pairs
    pub fn object<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<AmfValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        AmfValue::Object(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AmfValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            AmfValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AmfValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&HashMap<String, AmfValue>> {
        match self {
            AmfValue::Object(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[AmfValue]> {
        match self {
            AmfValue::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, AmfValue::Null | AmfValue::Undefined)
    }

    /// Get a property from an object value
    pub fn get(&self, key: &str) -> Option<&AmfValue> {
        self.as_object()?.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }

    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get(key)?.as_number()
    }
}

impl From<bool> for AmfValue {
    fn from(v: bool) -> Self {
        AmfValue::Boolean(v)
    }
}

impl From<f64> for AmfValue {
    fn from(v: f64) -> Self {
        AmfValue::Number(v)
    }
}

impl From<u32> for AmfValue {
    fn from(v: u32) -> Self {
        AmfValue::Number(v as f64)
    }
}

impl From<String> for AmfValue {
    fn from(v: String) -> Self {
        AmfValue::String(v)
    }
}

impl From<&str> for AmfValue {
    fn from(v: &str) -> Self {
        AmfValue::String(v.to_string())
    }
}

impl<V: Into<AmfValue>> From<Vec<V>> for AmfValue {
    fn from(v: Vec<V>) -> Self {
        AmfValue::Array(v.into_iter().map(|x| x.into()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_object_accessors() {
        let info = AmfValue::object([
            ("level", "status"),
            ("code", "NetStream.Publish.Start"),
        ]);

        assert_eq!(info.get_string("code"), Some("NetStream.Publish.Start"));
        assert_eq!(info.get_string("level"), Some("status"));
        assert_eq!(info.get_number("code"), None);
        assert!(info.get("description").is_none());
    }

    #[test]
    fn test_accessors_on_wrong_type() {
        assert_eq!(AmfValue::Number(1.0).as_str(), None);
        assert_eq!(AmfValue::String("1".into()).as_number(), None);
        assert!(AmfValue::Null.get("key").is_none());
        assert!(AmfValue::Null.as_array().is_none());
    }

    #[test]
    fn test_null_or_undefined() {
        assert!(AmfValue::default().is_null_or_undefined());
        assert!(AmfValue::Undefined.is_null_or_undefined());
        assert!(!AmfValue::Boolean(false).is_null_or_undefined());
    }

    #[test]
    fn test_from_vec() {
        let v: AmfValue = vec![1u32, 2, 3].into();
        assert_eq!(v.as_array().map(|a| a.len()), Some(3));
    }
}
