//! Trial identifiers and the flat result records trials report.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::config::{Config, ParameterValue};

/// Prefix under which a record carries the configuration it was produced by.
pub const CONFIG_PREFIX: &str = "config/";

/// Opaque trial identifier assigned by the runner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrialId(String);

impl TrialId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TrialId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrialId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TrialId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A flat result record: metrics, costs and `config/<name>` entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, ParameterValue>);

impl Record {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// A record carrying `config` under the `config/` namespace.
    pub fn for_config(config: &Config) -> Self {
        Self(
            config
                .iter()
                .map(|(k, v)| (format!("{CONFIG_PREFIX}{k}"), v.clone()))
                .collect(),
        )
    }

    /// Builder-style metric insert.
    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.set_metric(name, value);
        self
    }

    pub fn set_metric(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), ParameterValue::Float(value));
    }

    /// Numeric value stored under `name`.
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.0.get(name).and_then(ParameterValue::as_f64)
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.0.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParameterValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Rebuild the configuration from the `config/` entries.
    pub fn config(&self) -> Config {
        self.0
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(CONFIG_PREFIX)
                    .map(|name| (name.to_string(), v.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_through_namespace() {
        let config = Config::new().with("lr", 0.1).with("depth", 3i64);
        let record = Record::for_config(&config).with_metric("loss", 0.42);

        assert!(record.contains_key("config/lr"));
        assert_eq!(record.metric("loss"), Some(0.42));
        assert_eq!(record.config(), config);
    }

    #[test]
    fn metric_reads_integers_and_skips_text() {
        let mut record = Record::new();
        record.insert("epochs", 12i64);
        record.insert("status", "ok");
        assert_eq!(record.metric("epochs"), Some(12.0));
        assert_eq!(record.metric("status"), None);
        assert_eq!(record.metric("missing"), None);
    }

    #[test]
    fn infinite_metric_survives_json() {
        let record = Record::new().with_metric("loss", f64::INFINITY);
        let json = serde_json::to_string(&record).unwrap();
        let back: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(back.metric("loss"), Some(f64::INFINITY));
    }

    #[test]
    fn random_trial_ids_differ() {
        assert_ne!(TrialId::random(), TrialId::random());
        assert_eq!(TrialId::from("t-1").as_str(), "t-1");
    }
}
