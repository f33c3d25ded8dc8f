use crate::error::{Error, Result, code};
use std::fmt;

/// A JSON scalar: the only value shape carried by [`FlatJson`].
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Str(String),
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::I64(i64::from(v))
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::I64(v)
    }
}

impl From<u16> for Scalar {
    fn from(v: u16) -> Self {
        Scalar::I64(i64::from(v))
    }
}

impl From<u32> for Scalar {
    fn from(v: u32) -> Self {
        Scalar::I64(i64::from(v))
    }
}

impl From<u64> for Scalar {
    fn from(v: u64) -> Self {
        Scalar::I64(v as i64)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::F64(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Str(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Str(v)
    }
}

/// An ordered string-key to scalar mapping. Used for error details, event
/// payloads and mail bodies. Not nested; nesting is rejected on parse.
///
/// Insertion order of distinct keys is preserved; setting an existing key
/// replaces its value in place (last writer wins).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlatJson {
    entries: Vec<(String, Scalar)>,
}

impl FlatJson {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chainable set, builder style.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.insert(key, value);
        self
    }

    /// In-place set; replaces the value of an existing key without moving it.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Scalar>) {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&Scalar> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Scalar::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Scalar::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Reads a non-negative integer scalar; socket ids travel this way.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.get(key)? {
            Scalar::I64(v) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            Scalar::F64(v) => Some(*v),
            Scalar::I64(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            Scalar::Str(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Parse a single-level JSON object. Nested arrays or objects fail.
    pub fn from_json_str(input: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(input)
            .map_err(|e| Error::message(code::FAILED, format!("invalid json: {e}")))?;
        let serde_json::Value::Object(map) = value else {
            return Err(Error::message(code::FAILED, "expected a json object"));
        };

        let mut out = FlatJson::new();
        for (key, value) in map {
            let scalar = match value {
                serde_json::Value::Null => Scalar::Null,
                serde_json::Value::Bool(v) => Scalar::Bool(v),
                serde_json::Value::Number(n) => {
                    if let Some(v) = n.as_i64() {
                        Scalar::I64(v)
                    } else if let Some(v) = n.as_f64() {
                        Scalar::F64(v)
                    } else {
                        return Err(Error::with_details(
                            code::FAILED,
                            FlatJson::new()
                                .set("message", "unrepresentable number")
                                .set("key", key),
                        ));
                    }
                }
                serde_json::Value::String(v) => Scalar::Str(v),
                serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                    return Err(Error::with_details(
                        code::FAILED,
                        FlatJson::new()
                            .set("message", "nested values are not supported")
                            .set("key", key),
                    ));
                }
            };
            out.insert(key, scalar);
        }
        Ok(out)
    }

    pub fn to_json_string(&self) -> String {
        let mut map = serde_json::Map::with_capacity(self.entries.len());
        for (key, value) in &self.entries {
            let json = match value {
                Scalar::Null => serde_json::Value::Null,
                Scalar::Bool(v) => serde_json::Value::Bool(*v),
                Scalar::I64(v) => serde_json::Value::from(*v),
                Scalar::F64(v) => serde_json::Value::from(*v),
                Scalar::Str(v) => serde_json::Value::from(v.clone()),
            };
            map.insert(key.clone(), json);
        }
        serde_json::Value::Object(map).to_string()
    }
}

impl fmt::Display for FlatJson {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match value {
                Scalar::Null => write!(f, "{key}=null")?,
                Scalar::Bool(v) => write!(f, "{key}={v}")?,
                Scalar::I64(v) => write!(f, "{key}={v}")?,
                Scalar::F64(v) => write!(f, "{key}={v}")?,
                Scalar::Str(v) => write!(f, "{key}={v:?}")?,
            }
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_is_last_writer_wins_and_keeps_key_order() {
        let json = FlatJson::new()
            .set("a", 1i64)
            .set("b", "x")
            .set("a", 2i64)
            .set("c", true);

        assert_eq!(json.get_i64("a"), Some(2));
        assert_eq!(json.len(), 3);
        let keys: Vec<&str> = json.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn typed_getters_reject_mismatched_kinds() {
        let json = FlatJson::new().set("n", -5i64).set("s", "str");
        assert_eq!(json.get_u64("n"), None);
        assert_eq!(json.get_i64("n"), Some(-5));
        assert_eq!(json.get_i64("s"), None);
        assert_eq!(json.get_str("s"), Some("str"));
    }

    #[test]
    fn json_round_trip_is_flat_only() {
        let parsed = FlatJson::from_json_str(r#"{"port": 3000, "name": "srv"}"#)
            .expect("flat object should parse");
        assert_eq!(parsed.get_u64("port"), Some(3000));
        assert_eq!(parsed.get_str("name"), Some("srv"));

        assert!(FlatJson::from_json_str(r#"{"nested": {"a": 1}}"#).is_err());
        assert!(FlatJson::from_json_str("[1, 2]").is_err());
    }
}
