#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Keys a raw result must carry before it is admitted into a bucket.
///
/// Validation tests key presence only, not value shape: a `cost` of
/// `"not-a-number"` still passes. Harness versions disagree on value
/// types, so the pipeline stays permissive here.
pub const REQUIRED_KEYS: [&str; 6] = [
    "testdir",
    "testcase",
    "model",
    "edit_format",
    "tests_outcomes",
    "cost",
];

/// One loosely-typed field value as found in raw result JSON or fixture
/// metadata YAML. The closed scalar set covers every shape the harness
/// emits; `List`/`Map` are carried through untouched but never flattened
/// into tabular output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Utf8(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Self::List(_) | Self::Map(_))
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Truthiness as the harness scripts understood it: null, `false`,
    /// numeric zero, and empty strings/containers are falsy.
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(v) => *v,
            Self::Int(v) => *v != 0,
            Self::Float(v) => *v != 0.0,
            Self::Utf8(v) => !v.is_empty(),
            Self::List(v) => !v.is_empty(),
            Self::Map(v) => !v.is_empty(),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Utf8(v) => Some(v),
            _ => None,
        }
    }

    /// Render a scalar for one CSV cell. Nulls and NaN become the empty
    /// cell; lists and maps have no cell rendering and also come out
    /// empty (callers exclude them before this point).
    #[must_use]
    pub fn render_cell(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(v) => v.to_string(),
            Self::Int(v) => v.to_string(),
            Self::Float(v) => {
                if v.is_nan() {
                    String::new()
                } else {
                    v.to_string()
                }
            }
            Self::Utf8(v) => v.clone(),
            Self::List(_) | Self::Map(_) => String::new(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render_cell())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Utf8(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Utf8(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// One raw per-test execution record: the JSON object written by the
/// test harness, kept as an open field bag so unknown fields survive
/// the round trip into aggregated artifacts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawResult {
    fields: BTreeMap<String, Value>,
}

impl RawResult {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.insert(key.into(), value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The bucketing key. Absent or null models fall back to `"unknown"`;
    /// a present non-string value is rendered so the record still lands
    /// in a nameable bucket.
    #[must_use]
    pub fn model_name(&self) -> String {
        match self.fields.get("model") {
            None | Some(Value::Null) => "unknown".to_owned(),
            Some(Value::Utf8(name)) => name.clone(),
            Some(other) => other.render_cell(),
        }
    }

    /// Required keys absent from this record, in `REQUIRED_KEYS` order.
    #[must_use]
    pub fn missing_required_keys(&self) -> Vec<&'static str> {
        REQUIRED_KEYS
            .iter()
            .copied()
            .filter(|key| !self.fields.contains_key(key))
            .collect()
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.missing_required_keys().is_empty()
    }

    /// Whether at least one entry of `tests_outcomes` is truthy. A
    /// non-list value counts as its own truthiness so malformed shapes
    /// never panic the pass count.
    #[must_use]
    pub fn passed(&self) -> bool {
        match self.fields.get("tests_outcomes") {
            Some(Value::List(outcomes)) => outcomes.iter().any(Value::truthy),
            Some(other) => other.truthy(),
            None => false,
        }
    }

    /// `tests_outcomes` rendered as a fixed-width pass/fail string, one
    /// `P` or `F` per position in original order. Non-list values are
    /// rendered as their cell text.
    #[must_use]
    pub fn render_outcomes(&self) -> String {
        match self.fields.get("tests_outcomes") {
            Some(Value::List(outcomes)) => outcomes
                .iter()
                .map(|outcome| if outcome.truthy() { 'P' } else { 'F' })
                .collect(),
            Some(other) => other.render_cell(),
            None => String::new(),
        }
    }
}

impl FromIterator<(String, Value)> for RawResult {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}
