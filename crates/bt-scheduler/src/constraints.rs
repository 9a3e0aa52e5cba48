//! Hard configuration constraints and Lagrangian metric-constraint penalties.

use std::fmt;
use std::sync::Arc;

use bt_types::{Config, Record};
use serde::{Deserialize, Serialize};

/// Starting penalty weight of every metric constraint. Weights only grow while
/// they are below it.
pub const INITIAL_PENALTY: f64 = 1e10;

/// Suffix of the penalty-adjusted objective written into records.
pub const LAGRANGE_SUFFIX: &str = "_lagrange";

/// Comparison a constrained value must satisfy against its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintOp {
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">=")]
    Ge,
}

impl ConstraintOp {
    fn sign(self) -> f64 {
        match self {
            Self::Le => 1.0,
            Self::Ge => -1.0,
        }
    }

    /// Signed violation; positive means the constraint is broken.
    pub fn violation(self, value: f64, threshold: f64) -> f64 {
        (value - threshold) * self.sign()
    }

    pub fn is_violated(self, value: f64, threshold: f64) -> bool {
        self.violation(value, threshold) > 0.0
    }
}

impl fmt::Display for ConstraintOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Le => f.write_str("<="),
            Self::Ge => f.write_str(">="),
        }
    }
}

/// A bound on a secondary metric reported by trials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricConstraint {
    pub metric: String,
    pub op: ConstraintOp,
    pub threshold: f64,
}

pub type ConstraintFn = Arc<dyn Fn(&Config) -> f64 + Send + Sync>;

/// A bound on a value computed from the configuration alone (memory
/// footprint, model size). Violating configurations are never run.
#[derive(Clone)]
pub struct ConfigConstraint {
    pub name: String,
    pub predicate: ConstraintFn,
    pub op: ConstraintOp,
    pub threshold: f64,
}

impl ConfigConstraint {
    pub fn new(
        name: &str,
        predicate: impl Fn(&Config) -> f64 + Send + Sync + 'static,
        op: ConstraintOp,
        threshold: f64,
    ) -> Self {
        Self {
            name: name.to_string(),
            predicate: Arc::new(predicate),
            op,
            threshold,
        }
    }

    pub fn is_violated(&self, config: &Config) -> bool {
        self.op.is_violated((self.predicate)(config), self.threshold)
    }
}

impl fmt::Debug for ConfigConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigConstraint")
            .field("name", &self.name)
            .field("op", &self.op)
            .field("threshold", &self.threshold)
            .finish()
    }
}

/// Penalty weights of the metric constraints and whether a feasible trial has
/// been seen yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintState {
    pub penalties: Vec<f64>,
    /// Sticky once set.
    pub satisfied: bool,
}

impl ConstraintState {
    pub fn new(num_constraints: usize) -> Self {
        Self {
            penalties: vec![INITIAL_PENALTY; num_constraints],
            satisfied: num_constraints == 0,
        }
    }

    /// Add the weighted violations of `record` to `objective`. Returns the
    /// adjusted objective and whether this record satisfied every constraint.
    ///
    /// A constraint whose metric is missing from the record counts as met.
    pub fn penalize(
        &mut self,
        constraints: &[MetricConstraint],
        record: &Record,
        objective: f64,
        metric_op: f64,
    ) -> (f64, bool) {
        let mut adjusted = objective;
        let mut feasible = true;
        for (constraint, penalty) in constraints.iter().zip(self.penalties.iter_mut()) {
            let Some(value) = record.metric(&constraint.metric) else {
                continue;
            };
            let violation = constraint.op.violation(value, constraint.threshold);
            if violation > 0.0 {
                adjusted += *penalty * violation * metric_op;
                feasible = false;
                if *penalty < INITIAL_PENALTY {
                    *penalty += violation;
                }
            }
        }
        if feasible && !self.satisfied {
            // first feasible point
            self.penalties.iter_mut().for_each(|p| *p = 1.0);
        }
        self.satisfied |= feasible;
        (adjusted, feasible)
    }
}
