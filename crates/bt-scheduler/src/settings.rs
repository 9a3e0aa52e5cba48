//! Scheduler construction settings.

use std::path::Path;

use bt_types::{config_error, validation_error, Config, ObjectiveDirection, SearchSpace, TuneResult};
use serde::{Deserialize, Serialize};

use crate::constraints::{ConstraintOp, MetricConstraint};

/// Default seed shared by the local engine; the global engine uses `seed - 10`.
pub const DEFAULT_SEED: u64 = 20;

/// Default multiplier between successive resource levels.
pub const DEFAULT_REDUCTION_FACTOR: f64 = 4.0;

/// Top-level configuration for a search run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Metric to optimize (e.g. "loss", "accuracy").
    pub metric: String,

    /// Direction of optimization.
    pub mode: ObjectiveDirection,

    /// Configurations evaluated before any search starts, in order.
    pub points_to_evaluate: Vec<Config>,

    /// Low-cost values for the cost-related dimensions. The local search
    /// starts here.
    pub low_cost_partial_config: Config,

    /// Resource dimension for progressive allocation (e.g. "sample_size").
    /// Only used when it is not a dimension of the space.
    pub prune_attr: Option<String>,
    pub min_resource: Option<f64>,
    pub max_resource: Option<f64>,
    pub reduction_factor: Option<f64>,

    /// Constraints on secondary metrics, e.g. `precision >= 0.9`.
    pub metric_constraints: Vec<MetricConstraint>,

    pub seed: u64,

    /// Wall-clock budget for the whole run.
    pub time_budget_s: Option<f64>,

    /// Objective value to beat; defaults to the best seen.
    pub metric_target: Option<f64>,

    /// Record key holding a trial's evaluation cost.
    pub cost_attr: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            metric: String::new(),
            mode: ObjectiveDirection::Minimize,
            points_to_evaluate: Vec::new(),
            low_cost_partial_config: Config::new(),
            prune_attr: None,
            min_resource: None,
            max_resource: None,
            reduction_factor: None,
            metric_constraints: Vec::new(),
            seed: DEFAULT_SEED,
            time_budget_s: None,
            metric_target: None,
            cost_attr: bt_search::DEFAULT_COST_ATTR.to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn new(metric: &str, mode: ObjectiveDirection) -> Self {
        Self {
            metric: metric.to_string(),
            mode,
            ..Self::default()
        }
    }

    pub fn with_points_to_evaluate(mut self, points: Vec<Config>) -> Self {
        self.points_to_evaluate = points;
        self
    }

    pub fn with_low_cost_partial_config(mut self, config: Config) -> Self {
        self.low_cost_partial_config = config;
        self
    }

    pub fn with_resource(
        mut self,
        prune_attr: &str,
        min_resource: f64,
        max_resource: f64,
        reduction_factor: f64,
    ) -> Self {
        self.prune_attr = Some(prune_attr.to_string());
        self.min_resource = Some(min_resource);
        self.max_resource = Some(max_resource);
        self.reduction_factor = Some(reduction_factor);
        self
    }

    pub fn with_metric_constraint(mut self, metric: &str, op: ConstraintOp, threshold: f64) -> Self {
        self.metric_constraints.push(MetricConstraint {
            metric: metric.to_string(),
            op,
            threshold,
        });
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_time_budget(mut self, seconds: f64) -> Self {
        self.time_budget_s = Some(seconds);
        self
    }

    pub fn with_metric_target(mut self, target: f64) -> Self {
        self.metric_target = Some(target);
        self
    }

    pub fn with_cost_attr(mut self, attr: &str) -> Self {
        self.cost_attr = attr.to_string();
        self
    }

    pub fn from_json_str(json: &str) -> TuneResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> TuneResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Reject settings the scheduler cannot run with.
    pub fn validate(&self) -> TuneResult<()> {
        if self.metric.is_empty() {
            return Err(config_error!("metric name must not be empty"));
        }
        if let Some(budget) = self.time_budget_s {
            if budget.is_nan() || budget <= 0.0 {
                return Err(config_error!("time budget must be positive, got {budget}"));
            }
        }
        if self.prune_attr.is_some() {
            match (self.min_resource, self.max_resource) {
                (Some(min), Some(max)) if min > 0.0 && min <= max => {}
                (Some(min), Some(max)) => {
                    return Err(config_error!(
                        "resource range [{min}, {max}] must be positive and ordered"
                    ))
                }
                _ => {
                    return Err(config_error!(
                        "prune_attr requires both min_resource and max_resource"
                    ))
                }
            }
            if let Some(factor) = self.reduction_factor {
                if factor.is_nan() || factor <= 1.0 {
                    return Err(config_error!("reduction factor must exceed 1, got {factor}"));
                }
            }
        }
        Ok(())
    }
}

/// Properties a runner may set after construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchProperties {
    /// Installs the space when none was given at construction.
    pub space: Option<SearchSpace>,
    /// Restarts the budget clock.
    pub time_budget_s: Option<f64>,
    /// Overrides the running objective target.
    pub metric_target: Option<f64>,
}

impl SearchProperties {
    pub fn with_space(mut self, space: SearchSpace) -> Self {
        self.space = Some(space);
        self
    }

    pub fn with_time_budget(mut self, seconds: f64) -> Self {
        self.time_budget_s = Some(seconds);
        self
    }

    pub fn with_metric_target(mut self, target: f64) -> Self {
        self.metric_target = Some(target);
        self
    }

    /// Reject values no search could run with. An infinite budget is
    /// accepted and means no deadline.
    pub fn validate(&self) -> TuneResult<()> {
        if let Some(budget) = self.time_budget_s {
            if budget.is_nan() || budget <= 0.0 {
                return Err(validation_error!("time budget must be positive, got {budget}"));
            }
        }
        if let Some(target) = self.metric_target {
            if target.is_nan() {
                return Err(validation_error!("metric target must be a number"));
            }
        }
        Ok(())
    }
}
