//! Search space definitions, per-dimension normalization and sampling.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::{Config, ParameterValue};
use crate::errors::SpaceError;

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Human-readable parameter name (e.g. "learning_rate").
    pub name: String,
    /// The kind of search range.
    pub kind: ParameterKind,
}

/// Describes how a parameter is sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Continuous uniform range [low, high].
    FloatRange { low: f64, high: f64 },
    /// Uniform range [low, high] rounded to multiples of `q`.
    QUniform { low: f64, high: f64, q: f64 },
    /// Integer range [low, high] inclusive.
    IntRange { low: i64, high: i64 },
    /// Log-uniform range (sampled in log-space then exponentiated).
    LogUniform { low: f64, high: f64 },
    /// Log-uniform range rounded to multiples of `q`.
    QLogUniform { low: f64, high: f64, q: f64 },
    /// Categorical choices.
    Choice { values: Vec<serde_json::Value> },
}

fn unit(value: f64, low: f64, high: f64) -> f64 {
    if high > low {
        (value - low) / (high - low)
    } else {
        0.0
    }
}

fn quantize(value: f64, low: f64, high: f64, q: f64) -> f64 {
    if q > 0.0 {
        ((value / q).round() * q).clamp(low, high)
    } else {
        value.clamp(low, high)
    }
}

/// Choice values are stored as JSON; numbers come back as `Int`/`Float` so a
/// value reads the same before and after a JSON round trip.
fn choice_value(value: &serde_json::Value) -> ParameterValue {
    if let Some(i) = value.as_i64() {
        ParameterValue::Int(i)
    } else if let Some(f) = value.as_f64() {
        ParameterValue::Float(f)
    } else {
        ParameterValue::Json(value.clone())
    }
}

impl ParameterKind {
    /// Map a value into `[0, 1]`. `None` if the value does not belong to the
    /// dimension (wrong type or unknown category).
    pub fn normalize(&self, value: &ParameterValue) -> Option<f64> {
        match self {
            Self::FloatRange { low, high } | Self::QUniform { low, high, .. } => {
                Some(unit(value.as_f64()?, *low, *high))
            }
            Self::IntRange { low, high } => {
                Some(unit(value.as_f64()?, *low as f64, *high as f64))
            }
            Self::LogUniform { low, high } | Self::QLogUniform { low, high, .. } => {
                let v = value.as_f64()?;
                if v <= 0.0 {
                    return None;
                }
                Some(unit(v.ln(), low.ln(), high.ln()))
            }
            Self::Choice { values } => {
                let n = values.len();
                values
                    .iter()
                    .position(|candidate| choice_value(candidate) == *value)
                    .map(|i| (i as f64 + 0.5) / n as f64)
            }
        }
    }

    /// Inverse of [`normalize`](Self::normalize); out-of-range coordinates are
    /// clamped into the dimension.
    pub fn denormalize(&self, x: f64) -> ParameterValue {
        let x = x.clamp(0.0, 1.0);
        match self {
            Self::FloatRange { low, high } => ParameterValue::Float(low + x * (high - low)),
            Self::QUniform { low, high, q } => {
                ParameterValue::Float(quantize(low + x * (high - low), *low, *high, *q))
            }
            Self::IntRange { low, high } => {
                let v = (*low as f64 + x * (high - low) as f64).round() as i64;
                ParameterValue::Int(v.clamp(*low, *high))
            }
            Self::LogUniform { low, high } => {
                ParameterValue::Float((low.ln() + x * (high.ln() - low.ln())).exp())
            }
            Self::QLogUniform { low, high, q } => {
                let v = (low.ln() + x * (high.ln() - low.ln())).exp();
                ParameterValue::Float(quantize(v, *low, *high, *q))
            }
            Self::Choice { values } => {
                let n = values.len();
                if n == 0 {
                    return ParameterValue::Json(serde_json::Value::Null);
                }
                let idx = ((x * n as f64).floor() as usize).min(n - 1);
                choice_value(&values[idx])
            }
        }
    }

    /// Smallest normalized distance between two distinct values, for discrete
    /// dimensions. `None` for continuous ones.
    pub fn resolution(&self) -> Option<f64> {
        match self {
            Self::FloatRange { .. } | Self::LogUniform { .. } => None,
            Self::QUniform { low, high, q } => (high > low).then(|| q / (high - low)),
            Self::IntRange { low, high } => (high > low).then(|| 1.0 / (high - low) as f64),
            Self::QLogUniform { low, high, q } => {
                (high > low && *low > 0.0).then(|| (1.0 + q / low).ln() / (high / low).ln())
            }
            Self::Choice { values } => (!values.is_empty()).then(|| 1.0 / values.len() as f64),
        }
    }

    /// `value` in the representation this dimension produces, so that
    /// `Float(3.0)` on an integer range and `Int(3)` on a float range compare
    /// equal to what sampling would yield.
    pub fn canonical(&self, value: &ParameterValue) -> ParameterValue {
        match (self, value) {
            (Self::IntRange { .. }, ParameterValue::Float(v)) if v.is_finite() && v.fract() == 0.0 => {
                ParameterValue::Int(*v as i64)
            }
            (
                Self::FloatRange { .. }
                | Self::QUniform { .. }
                | Self::LogUniform { .. }
                | Self::QLogUniform { .. },
                ParameterValue::Int(v),
            ) => ParameterValue::Float(*v as f64),
            (Self::Choice { .. }, ParameterValue::Json(v)) => choice_value(v),
            _ => value.clone(),
        }
    }

    /// Draw one value uniformly (log-uniformly for log ranges).
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ParameterValue {
        match self {
            Self::FloatRange { low, high } => {
                if high > low {
                    ParameterValue::Float(rng.random_range(*low..=*high))
                } else {
                    ParameterValue::Float(*low)
                }
            }
            Self::QUniform { low, high, q } => {
                let v = if high > low {
                    rng.random_range(*low..=*high)
                } else {
                    *low
                };
                ParameterValue::Float(quantize(v, *low, *high, *q))
            }
            Self::IntRange { low, high } => {
                if high > low {
                    ParameterValue::Int(rng.random_range(*low..=*high))
                } else {
                    ParameterValue::Int(*low)
                }
            }
            Self::LogUniform { .. } | Self::QLogUniform { .. } => {
                self.denormalize(rng.random_range(0.0..=1.0))
            }
            Self::Choice { values } => {
                if values.is_empty() {
                    return ParameterValue::Json(serde_json::Value::Null);
                }
                let idx = rng.random_range(0..values.len());
                choice_value(&values[idx])
            }
        }
    }
}

/// The full search space: an ordered list of parameter definitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    fn add(mut self, name: impl Into<String>, kind: ParameterKind) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind,
        });
        self
    }

    pub fn add_float(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.add(name, ParameterKind::FloatRange { low, high })
    }

    pub fn add_quniform(self, name: impl Into<String>, low: f64, high: f64, q: f64) -> Self {
        self.add(name, ParameterKind::QUniform { low, high, q })
    }

    pub fn add_int(self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.add(name, ParameterKind::IntRange { low, high })
    }

    pub fn add_log_uniform(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.add(name, ParameterKind::LogUniform { low, high })
    }

    pub fn add_qlog_uniform(self, name: impl Into<String>, low: f64, high: f64, q: f64) -> Self {
        self.add(name, ParameterKind::QLogUniform { low, high, q })
    }

    pub fn add_choice(self, name: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        self.add(name, ParameterKind::Choice { values })
    }

    pub fn get(&self, name: &str) -> Option<&ParameterDef> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|p| p.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    /// Copy of `config` with every space dimension in canonical form; keys
    /// outside the space are kept as they are.
    pub fn canonicalize(&self, config: &Config) -> Config {
        config
            .iter()
            .map(|(name, value)| match self.get(name) {
                Some(param) => (name.clone(), param.kind.canonical(value)),
                None => (name.clone(), value.clone()),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Parse a runner-style distribution map:
    ///
    /// ```json
    /// {"lr": {"_type": "loguniform", "_value": [1e-4, 1e-1]},
    ///  "depth": {"_type": "randint", "_value": [2, 12]}}
    /// ```
    ///
    /// `randint` is upper-exclusive. Kinds other than `choice`, `randint`,
    /// `uniform`, `quniform`, `loguniform` and `qloguniform` are rejected.
    pub fn from_distribution_spec(spec: &serde_json::Value) -> Result<Self, SpaceError> {
        let entries = spec.as_object().ok_or_else(|| SpaceError::InvalidFormat {
            message: "expected an object of parameter distributions".to_string(),
        })?;

        let mut space = SearchSpace::new();
        for (name, dist) in entries {
            let kind = dist
                .get("_type")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| SpaceError::MissingField {
                    parameter: name.clone(),
                    field: "_type".to_string(),
                })?;
            let values = dist
                .get("_value")
                .and_then(serde_json::Value::as_array)
                .ok_or_else(|| SpaceError::MissingField {
                    parameter: name.clone(),
                    field: "_value".to_string(),
                })?;

            let number = |i: usize| -> Result<f64, SpaceError> {
                values
                    .get(i)
                    .and_then(serde_json::Value::as_f64)
                    .ok_or_else(|| SpaceError::InvalidBounds {
                        parameter: name.clone(),
                        message: format!("'{kind}' needs a number at position {i}"),
                    })
            };
            let bounds = |low: f64, high: f64| -> Result<(), SpaceError> {
                if low > high {
                    return Err(SpaceError::InvalidBounds {
                        parameter: name.clone(),
                        message: format!("low {low} is above high {high}"),
                    });
                }
                Ok(())
            };

            let parsed = match kind {
                "choice" => {
                    if values.is_empty() {
                        return Err(SpaceError::EmptyChoice {
                            parameter: name.clone(),
                        });
                    }
                    ParameterKind::Choice {
                        values: values.clone(),
                    }
                }
                "randint" => {
                    let (low, high) = (number(0)? as i64, number(1)? as i64 - 1);
                    bounds(low as f64, high as f64)?;
                    ParameterKind::IntRange { low, high }
                }
                "uniform" => {
                    let (low, high) = (number(0)?, number(1)?);
                    bounds(low, high)?;
                    ParameterKind::FloatRange { low, high }
                }
                "quniform" => {
                    let (low, high, q) = (number(0)?, number(1)?, number(2)?);
                    bounds(low, high)?;
                    ParameterKind::QUniform { low, high, q }
                }
                "loguniform" | "qloguniform" => {
                    let (low, high) = (number(0)?, number(1)?);
                    bounds(low, high)?;
                    if low <= 0.0 {
                        return Err(SpaceError::InvalidBounds {
                            parameter: name.clone(),
                            message: "log ranges need a positive lower bound".to_string(),
                        });
                    }
                    if kind == "loguniform" {
                        ParameterKind::LogUniform { low, high }
                    } else {
                        ParameterKind::QLogUniform {
                            low,
                            high,
                            q: number(2)?,
                        }
                    }
                }
                other => {
                    return Err(SpaceError::UnsupportedDistribution {
                        parameter: name.clone(),
                        kind: other.to_string(),
                    })
                }
            };
            space = space.add(name.clone(), parsed);
        }
        Ok(space)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use serde_json::json;

    fn sample_space() -> SearchSpace {
        SearchSpace::new()
            .add_int("n_estimators", 4, 1000)
            .add_log_uniform("learning_rate", 1e-3, 1.0)
            .add_float("subsample", 0.5, 1.0)
            .add_choice("booster", vec![json!("gbtree"), json!("dart")])
    }

    #[test]
    fn sampling_respects_bounds() {
        let space = sample_space();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..200 {
            for param in &space.parameters {
                let value = param.kind.sample(&mut rng);
                let x = param.kind.normalize(&value).unwrap();
                assert!((0.0..=1.0).contains(&x), "{} out of range: {value}", param.name);
            }
        }
    }

    #[test]
    fn normalize_inverts_denormalize() {
        let kind = ParameterKind::LogUniform {
            low: 1e-3,
            high: 1.0,
        };
        let x = kind.normalize(&ParameterValue::Float(0.01)).unwrap();
        assert!((x - 1.0 / 3.0).abs() < 1e-12);
        match kind.denormalize(x) {
            ParameterValue::Float(v) => assert!((v - 0.01).abs() < 1e-12),
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn int_and_quantized_dimensions_round() {
        let ints = ParameterKind::IntRange { low: 0, high: 10 };
        assert_eq!(ints.denormalize(0.34), ParameterValue::Int(3));
        assert_eq!(ints.denormalize(1.7), ParameterValue::Int(10));
        assert_eq!(ints.resolution(), Some(0.1));

        let quantized = ParameterKind::QUniform {
            low: 0.0,
            high: 1.0,
            q: 0.25,
        };
        assert_eq!(quantized.denormalize(0.3), ParameterValue::Float(0.25));
        assert_eq!(
            ParameterKind::FloatRange { low: 0.0, high: 1.0 }.resolution(),
            None
        );
    }

    #[test]
    fn canonical_form_follows_dimension_type() {
        let space = sample_space();
        let reported = Config::new()
            .with("n_estimators", 40.0)
            .with("subsample", 1i64)
            .with("booster", ParameterValue::Json(json!("dart")))
            .with("extra", 2.0);
        let canonical = space.canonicalize(&reported);
        assert_eq!(canonical.get("n_estimators"), Some(&ParameterValue::Int(40)));
        assert_eq!(canonical.get("subsample"), Some(&ParameterValue::Float(1.0)));
        assert_eq!(canonical.get("extra"), Some(&ParameterValue::Float(2.0)));
        // a fractional value on an integer range is not an integer
        let kind = ParameterKind::IntRange { low: 0, high: 9 };
        assert_eq!(kind.canonical(&ParameterValue::Float(2.5)), ParameterValue::Float(2.5));
        assert_eq!(
            space.canonicalize(&Config::new().with("n_estimators", 40i64)).signature(),
            space.canonicalize(&Config::new().with("n_estimators", 40.0)).signature()
        );
    }

    #[test]
    fn choice_values_map_to_cell_centres() {
        let kind = ParameterKind::Choice {
            values: vec![json!("a"), json!(2), json!("c"), json!(true)],
        };
        assert_eq!(kind.normalize(&ParameterValue::from("a")), Some(0.125));
        assert_eq!(kind.normalize(&ParameterValue::Int(2)), Some(0.375));
        assert_eq!(kind.normalize(&ParameterValue::from("zzz")), None);
        assert_eq!(kind.denormalize(0.9), ParameterValue::Json(json!(true)));
        assert_eq!(kind.denormalize(0.3), ParameterValue::Int(2));
    }

    #[test]
    fn distribution_spec_parses_supported_kinds() {
        let spec = json!({
            "depth": {"_type": "randint", "_value": [2, 12]},
            "lr": {"_type": "loguniform", "_value": [1e-4, 1e-1]},
            "dropout": {"_type": "quniform", "_value": [0.0, 0.5, 0.1]},
            "act": {"_type": "choice", "_value": ["relu", "tanh"]},
        });
        let space = SearchSpace::from_distribution_spec(&spec).unwrap();
        assert_eq!(space.len(), 4);
        assert_eq!(
            space.get("depth").unwrap().kind,
            ParameterKind::IntRange { low: 2, high: 11 }
        );
    }

    #[test]
    fn distribution_spec_rejects_unknown_kind() {
        let spec = json!({"noise": {"_type": "normal", "_value": [0.0, 1.0, 0.1]}});
        match SearchSpace::from_distribution_spec(&spec) {
            Err(SpaceError::UnsupportedDistribution { parameter, kind }) => {
                assert_eq!(parameter, "noise");
                assert_eq!(kind, "normal");
            }
            other => panic!("expected unsupported distribution, got {other:?}"),
        }
    }

    #[test]
    fn distribution_spec_validates_bounds() {
        let spec = json!({"lr": {"_type": "loguniform", "_value": [0.0, 1.0]}});
        assert!(matches!(
            SearchSpace::from_distribution_spec(&spec),
            Err(SpaceError::InvalidBounds { .. })
        ));
        let spec = json!({"act": {"_type": "choice", "_value": []}});
        assert!(matches!(
            SearchSpace::from_distribution_spec(&spec),
            Err(SpaceError::EmptyChoice { .. })
        ));
    }

    #[test]
    fn search_space_builder_chain() {
        let space = sample_space();
        assert_eq!(space.len(), 4);
        assert!(space.contains("booster"));
        assert_eq!(
            space.names().collect::<Vec<_>>(),
            vec!["n_estimators", "learning_rate", "subsample", "booster"]
        );
    }
}
