//! Attribute payload values.
//!
//! Entity attributes, entity metadata and relation metadata are open JSON
//! objects. They are modelled as an explicit variant type rather than raw
//! `serde_json::Value` so merge and comparison semantics live in one place.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single attribute value.
///
/// Serializes as plain JSON (no tagging). Integers above `i64::MAX` keep
/// their exact value in `UInt`; only non-integral numbers become `Float`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Integer(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Array(Vec<AttrValue>),
    Object(BTreeMap<String, AttrValue>),
}

impl AttrValue {
    /// Short name of the variant, used in advisory schema messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            AttrValue::Null => "null",
            AttrValue::Bool(_) => "boolean",
            AttrValue::Integer(_) | AttrValue::UInt(_) | AttrValue::Float(_) => "number",
            AttrValue::String(_) => "string",
            AttrValue::Array(_) => "array",
            AttrValue::Object(_) => "object",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Integer(i) => Some(*i as f64),
            AttrValue::UInt(u) => Some(*u as f64),
            AttrValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// The exact value of an integral number, widened so `i64` and `u64`
    /// compare without going through `f64`.
    fn as_i128(&self) -> Option<i128> {
        match self {
            AttrValue::Integer(i) => Some(i128::from(*i)),
            AttrValue::UInt(u) => Some(i128::from(*u)),
            _ => None,
        }
    }

    /// Equality with JSON semantics: `1` and `1.0` are the same number.
    ///
    /// This is the comparison used by exact-match attribute filters.
    pub fn json_eq(&self, other: &AttrValue) -> bool {
        match (self, other) {
            (a, b) if a.as_i128().is_some() && b.as_i128().is_some() => a.as_i128() == b.as_i128(),
            (a, b) if a.as_f64().is_some() && b.as_f64().is_some() => a.as_f64() == b.as_f64(),
            (AttrValue::Array(a), AttrValue::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.json_eq(y))
            }
            (AttrValue::Object(a), AttrValue::Object(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).map(|w| v.json_eq(w)).unwrap_or(false))
            }
            (a, b) => a == b,
        }
    }

    /// Ordering used when sorting by an attribute.
    ///
    /// Mirrors jsonb ordering: null, then strings, numbers, booleans,
    /// arrays, objects. A missing key sorts like null.
    pub fn sort_cmp(&self, other: &AttrValue) -> std::cmp::Ordering {
        use std::cmp::Ordering;

        fn rank(v: &AttrValue) -> u8 {
            match v {
                AttrValue::Null => 0,
                AttrValue::String(_) => 1,
                AttrValue::Integer(_) | AttrValue::UInt(_) | AttrValue::Float(_) => 2,
                AttrValue::Bool(_) => 3,
                AttrValue::Array(_) => 4,
                AttrValue::Object(_) => 5,
            }
        }

        match (self, other) {
            (AttrValue::Bool(a), AttrValue::Bool(b)) => a.cmp(b),
            (AttrValue::String(a), AttrValue::String(b)) => a.cmp(b),
            (a, b) if a.as_i128().is_some() && b.as_i128().is_some() => a.as_i128().cmp(&b.as_i128()),
            (a, b) if rank(a) == 2 && rank(b) == 2 => {
                let (x, y) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            AttrValue::Null => serde_json::Value::Null,
            AttrValue::Bool(b) => serde_json::Value::Bool(*b),
            AttrValue::Integer(i) => serde_json::Value::from(*i),
            AttrValue::UInt(u) => serde_json::Value::from(*u),
            AttrValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            AttrValue::String(s) => serde_json::Value::String(s.clone()),
            AttrValue::Array(items) => {
                serde_json::Value::Array(items.iter().map(AttrValue::to_json).collect())
            }
            AttrValue::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Parse a loosely-typed text value, as received from a query string.
    ///
    /// JSON literals (`42`, `true`, `null`, `"quoted"`) are parsed as JSON;
    /// anything else is taken as a plain string.
    pub fn parse_loose(raw: &str) -> AttrValue {
        serde_json::from_str::<serde_json::Value>(raw)
            .map(AttrValue::from)
            .unwrap_or_else(|_| AttrValue::String(raw.to_string()))
    }
}

impl From<serde_json::Value> for AttrValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => AttrValue::Null,
            serde_json::Value::Bool(b) => AttrValue::Bool(b),
            serde_json::Value::Number(n) => match (n.as_i64(), n.as_u64()) {
                (Some(i), _) => AttrValue::Integer(i),
                (None, Some(u)) => AttrValue::UInt(u),
                (None, None) => AttrValue::Float(n.as_f64().unwrap_or(0.0)),
            },
            serde_json::Value::String(s) => AttrValue::String(s),
            serde_json::Value::Array(items) => {
                AttrValue::Array(items.into_iter().map(AttrValue::from).collect())
            }
            serde_json::Value::Object(map) => AttrValue::Object(
                map.into_iter().map(|(k, v)| (k, AttrValue::from(v))).collect(),
            ),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::String(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::String(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Integer(value)
    }
}

impl From<u64> for AttrValue {
    fn from(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(i) => AttrValue::Integer(i),
            Err(_) => AttrValue::UInt(value),
        }
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Float(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

/// An open, string-keyed attribute object.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, AttrValue>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Option<AttrValue> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<AttrValue> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttrValue)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Shallow top-level merge: every key in `patch` replaces the stored key.
    ///
    /// Nested objects are replaced wholesale, never deep-merged.
    pub fn merge(&mut self, patch: Attributes) {
        for (key, value) in patch.0 {
            self.0.insert(key, value);
        }
    }

    /// Builder-style variant of [`Attributes::merge`].
    pub fn merged(mut self, patch: Attributes) -> Self {
        self.merge(patch);
        self
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.0.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
        )
    }

    /// Convert from a JSON value, which must be an object.
    pub fn from_json(value: serde_json::Value) -> Result<Self, ValidationError> {
        match value {
            serde_json::Value::Object(map) => Ok(Attributes(
                map.into_iter().map(|(k, v)| (k, AttrValue::from(v))).collect(),
            )),
            serde_json::Value::Null => Ok(Attributes::new()),
            other => Err(ValidationError::InvalidValue {
                field: "attributes".to_string(),
                reason: format!("expected a JSON object, got {}", AttrValue::from(other).kind_name()),
            }),
        }
    }

    /// Every string value in the payload, nested ones included. Keys,
    /// numbers and booleans are not searchable text.
    pub fn string_leaves(&self) -> Vec<&str> {
        fn collect<'a>(value: &'a AttrValue, out: &mut Vec<&'a str>) {
            match value {
                AttrValue::String(s) => out.push(s),
                AttrValue::Array(items) => items.iter().for_each(|v| collect(v, out)),
                AttrValue::Object(map) => map.values().for_each(|v| collect(v, out)),
                _ => {}
            }
        }

        let mut out = Vec::new();
        self.0.values().for_each(|v| collect(v, &mut out));
        out
    }

    /// Case-insensitive substring match against any single string value.
    pub fn contains_text(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.string_leaves()
            .into_iter()
            .any(|s| s.to_lowercase().contains(&needle))
    }
}

impl FromIterator<(String, AttrValue)> for Attributes {
    fn from_iter<T: IntoIterator<Item = (String, AttrValue)>>(iter: T) -> Self {
        Attributes(iter.into_iter().collect())
    }
}

impl From<BTreeMap<String, AttrValue>> for Attributes {
    fn from(map: BTreeMap<String, AttrValue>) -> Self {
        Attributes(map)
    }
}

impl IntoIterator for Attributes {
    type Item = (String, AttrValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, AttrValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Build an [`Attributes`] map from `key => value` pairs.
///
/// ```
/// use mosaic_core::attrs;
/// let a = attrs! { "body" => "hi", "likes" => 3i64 };
/// assert_eq!(a.len(), 2);
/// ```
#[macro_export]
macro_rules! attrs {
    () => { $crate::Attributes::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut attributes = $crate::Attributes::new();
        $( attributes.insert($key, $value); )+
        attributes
    }};
}
