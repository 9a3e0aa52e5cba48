//! Configurations, their values and canonical signatures.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// A point mapped into per-dimension `[0, 1]` coordinates.
pub type NormalizedPoint = BTreeMap<String, f64>;

/// A concrete parameter value.
///
/// `Int` is listed first so integral JSON numbers read back as integers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(#[serde(with = "crate::float")] f64),
    Json(serde_json::Value),
}

impl ParameterValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Json(v) => v.as_f64(),
        }
    }

    /// Canonical text used in signatures. Floats keep their decimal point so
    /// `Float(1.0)` and `Int(1)` stay distinct; callers that know the space
    /// run [`crate::SearchSpace::canonicalize`] first.
    fn canonical(&self) -> String {
        match self {
            Self::Float(v) => format!("{v:?}"),
            Self::Int(v) => format!("{v}"),
            Self::Json(v) => v.to_string(),
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        Self::Json(serde_json::Value::String(v.to_string()))
    }
}

impl From<bool> for ParameterValue {
    fn from(v: bool) -> Self {
        Self::Json(serde_json::Value::Bool(v))
    }
}

impl From<serde_json::Value> for ParameterValue {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

/// A mapping from parameter name to value.
///
/// Backed by a `BTreeMap`, so iteration order never depends on insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Config(BTreeMap<String, ParameterValue>);

impl Config {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.0.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParameterValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<ParameterValue> {
        self.0.remove(name)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParameterValue)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Signature over every key of the config.
    pub fn signature(&self) -> Signature {
        Signature::from_entries(self.0.iter())
    }

    /// Signature restricted to `keys`; keys absent from the config are skipped.
    pub fn signature_over<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> Signature {
        let mut selected: Vec<(&str, &ParameterValue)> = keys
            .into_iter()
            .filter_map(|k| self.0.get_key_value(k).map(|(k, v)| (k.as_str(), v)))
            .collect();
        selected.sort_by(|a, b| a.0.cmp(b.0));
        selected.dedup_by(|a, b| a.0 == b.0);
        Signature::from_entries(selected)
    }
}

impl<K: Into<String>, V: Into<ParameterValue>> FromIterator<(K, V)> for Config {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Canonical, key-order independent identity of a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(String);

impl Signature {
    /// Entries must already be sorted by key.
    fn from_entries<'a, K, I>(entries: I) -> Self
    where
        K: AsRef<str> + 'a,
        I: IntoIterator<Item = (K, &'a ParameterValue)>,
    {
        let mut key = String::new();
        for (name, value) in entries {
            // {:?} quotes and escapes the name, so separators cannot collide
            let _ = write!(key, "{:?}={};", name.as_ref(), value.canonical());
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether we are maximizing or minimizing the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectiveDirection {
    Maximize,
    Minimize,
}

impl Default for ObjectiveDirection {
    fn default() -> Self {
        Self::Minimize
    }
}

impl ObjectiveDirection {
    /// Sign that turns every comparison into a minimization:
    /// `+1` when minimizing, `-1` when maximizing.
    pub fn metric_op(self) -> f64 {
        match self {
            Self::Minimize => 1.0,
            Self::Maximize => -1.0,
        }
    }

    /// Parse the runner-style mode strings `"min"` and `"max"`.
    pub fn from_mode(mode: &str) -> Option<Self> {
        match mode {
            "min" => Some(Self::Minimize),
            "max" => Some(Self::Maximize),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_ignores_insertion_order() {
        let a: Config = vec![
            ("lr", ParameterValue::Float(0.01)),
            ("depth", ParameterValue::Int(6)),
            ("booster", ParameterValue::from("gbtree")),
        ]
        .into_iter()
        .collect();
        let b = Config::new()
            .with("booster", "gbtree")
            .with("lr", 0.01)
            .with("depth", 6i64);
        assert_eq!(a.signature(), b.signature());
    }

    #[test]
    fn signature_changes_with_any_value() {
        let base = Config::new().with("lr", 0.01).with("depth", 6i64);
        let lr_changed = base.clone().with("lr", 0.02);
        let depth_changed = base.clone().with("depth", 7i64);
        let retyped = base.clone().with("depth", 6.0);
        assert_ne!(base.signature(), lr_changed.signature());
        assert_ne!(base.signature(), depth_changed.signature());
        assert_ne!(base.signature(), retyped.signature());
    }

    #[test]
    fn restricted_signature_skips_other_keys() {
        let a = Config::new().with("x", 1i64).with("trial_note", "first");
        let b = Config::new().with("x", 1i64).with("trial_note", "second");
        assert_ne!(a.signature(), b.signature());
        assert_eq!(a.signature_over(["x"]), b.signature_over(["x"]));
        assert_eq!(a.signature_over(["x", "x"]), a.signature_over(["x"]));
    }

    #[test]
    fn integral_numbers_read_back_as_int() {
        let config = Config::new().with("n", 4i64).with("lr", 0.5).with("flag", true);
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
        assert_eq!(back.get("n"), Some(&ParameterValue::Int(4)));
    }

    #[test]
    fn metric_op_sign_convention() {
        assert_eq!(ObjectiveDirection::Minimize.metric_op(), 1.0);
        assert_eq!(ObjectiveDirection::Maximize.metric_op(), -1.0);
        assert_eq!(ObjectiveDirection::from_mode("max"), Some(ObjectiveDirection::Maximize));
        assert_eq!(ObjectiveDirection::from_mode("up"), None);
    }
}
