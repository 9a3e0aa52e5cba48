//! Cost-frugal randomized directional local search.
//!
//! The search keeps an incumbent in normalized space and tries
//! `incumbent ± u * step` for random unit vectors `u`, moving as soon as a
//! candidate improves the objective. When `2^min(d, 9)` candidates around the same
//! incumbent fail, the step shrinks; once it falls below the resolution of the
//! space the search has converged. Starting from a low-cost configuration and
//! taking bounded steps keeps expensive regions out of reach until cheaper ones
//! stop paying off.
//!
//! An optional [`ResourceSchedule`] adds a resource dimension outside the space
//! (sample size, epochs): evaluation starts at the minimum resource and grows
//! by the reduction factor once the cost spent around the incumbent has caught
//! up with the incumbent's own cost.

use std::collections::BTreeMap;

use bt_types::{
    Config, NormalizedPoint, ObjectiveDirection, ParameterKind, ParameterValue, Record,
    SearchSpace, Signature, TrialId,
};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::rng::SearchRng;
use crate::traits::LocalSearch;

/// Base step per unit of `sqrt(dim)` in normalized space.
pub const STEPSIZE: f64 = 0.1;

/// Step lower bound when every dimension is continuous.
pub const STEP_LOWER_BOUND: f64 = 1e-4;

/// Record key holding a trial's evaluation cost.
pub const DEFAULT_COST_ATTR: &str = "time_total_s";

/// Progressive resource allocation for a dimension outside the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSchedule {
    /// Config key the resource is written to (e.g. "sample_size").
    pub attr: String,
    pub min_resource: f64,
    pub max_resource: f64,
    /// Multiplier applied on each resource increase.
    pub reduction_factor: f64,
}

impl ResourceSchedule {
    /// Snap to the maximum once one more increase would overshoot it.
    fn round(&self, resource: f64) -> f64 {
        if resource * self.reduction_factor > self.max_resource {
            self.max_resource
        } else {
            resource
        }
    }
}

/// Randomized directional local search (see the module docs).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrugalLocalSearch {
    space: SearchSpace,
    init_config: Config,
    objective_key: String,
    direction: ObjectiveDirection,
    cost_attr: String,
    schedule: Option<ResourceSchedule>,
    seed: u64,
    rng: SearchRng,
    /// Times the init config has been completed; later completions disturb it.
    reset_times: usize,

    best_config: Config,
    incumbent: NormalizedPoint,
    #[serde(with = "bt_types::float")]
    best_obj: f64,
    cost_incumbent: f64,
    resource: Option<f64>,
    step: f64,
    step_lower_bound: f64,
    step_upper_bound: f64,
    dim: usize,
    /// Candidates tried around one incumbent before the step shrinks.
    dir: usize,
    num_complete4incumbent: usize,
    cost_complete4incumbent: f64,
    num_allowed4incumbent: usize,
    num_proposedby_incumbent: usize,
    direction_tried: Option<Vec<f64>>,
    proposed_by: BTreeMap<TrialId, NormalizedPoint>,
    configs: BTreeMap<TrialId, (Config, f64)>,
    trial_count_proposed: usize,
    trial_count_complete: usize,
    k: usize,
    old_k: usize,
    iter_best_config: usize,
}

impl FrugalLocalSearch {
    /// A search over `space` starting from the (possibly partial) low-cost
    /// `init_config`.
    pub fn new(space: SearchSpace, init_config: Config, seed: u64) -> Self {
        let mut search = Self {
            space,
            init_config,
            objective_key: String::new(),
            direction: ObjectiveDirection::Minimize,
            cost_attr: DEFAULT_COST_ATTR.to_string(),
            schedule: None,
            seed,
            rng: SearchRng::seed_from_u64(seed),
            reset_times: 0,
            best_config: Config::new(),
            incumbent: NormalizedPoint::new(),
            best_obj: f64::INFINITY,
            cost_incumbent: 0.0,
            resource: None,
            step: 0.0,
            step_lower_bound: 0.0,
            step_upper_bound: 0.0,
            dim: 0,
            dir: 1,
            num_complete4incumbent: 0,
            cost_complete4incumbent: 0.0,
            num_allowed4incumbent: 0,
            num_proposedby_incumbent: 0,
            direction_tried: None,
            proposed_by: BTreeMap::new(),
            configs: BTreeMap::new(),
            trial_count_proposed: 1,
            trial_count_complete: 1,
            k: 0,
            old_k: 0,
            iter_best_config: 1,
        };
        search.init_search();
        search
    }

    pub fn with_objective(mut self, key: impl Into<String>, direction: ObjectiveDirection) -> Self {
        self.objective_key = key.into();
        self.direction = direction;
        self
    }

    pub fn with_cost_attr(mut self, attr: impl Into<String>) -> Self {
        self.cost_attr = attr.into();
        self
    }

    /// Enable progressive resource allocation. Ignored when the attribute is a
    /// dimension of the space, where its best value is unknown.
    pub fn with_resource_schedule(mut self, schedule: ResourceSchedule) -> Self {
        if self.space.contains(&schedule.attr) {
            debug!(
                "Resource attribute {} is a search dimension; schedule disabled",
                schedule.attr
            );
            self.schedule = None;
        } else {
            self.schedule = Some(schedule);
        }
        self.init_search();
        self
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn step_lower_bound(&self) -> f64 {
        self.step_lower_bound
    }

    pub fn incumbent(&self) -> &NormalizedPoint {
        &self.incumbent
    }

    pub fn best_config(&self) -> &Config {
        &self.best_config
    }

    fn init_search(&mut self) {
        self.dim = self.space.len();
        self.dir = 1usize << self.dim.min(9);
        let scale = (self.dim as f64).sqrt();
        self.step_upper_bound = scale;
        self.step_lower_bound = self
            .space
            .parameters
            .iter()
            .filter_map(|p| p.kind.resolution())
            .reduce(f64::min)
            .map_or(STEP_LOWER_BOUND, |lb| lb * scale);
        self.step = STEPSIZE * scale;

        self.best_config = self.init_config.clone();
        self.resource = None;
        if let Some(schedule) = &self.schedule {
            match self.best_config.get(&schedule.attr).and_then(ParameterValue::as_f64) {
                Some(r) => self.resource = Some(r),
                None => {
                    let r = schedule.round(schedule.min_resource);
                    self.best_config.insert(schedule.attr.clone(), r);
                    self.resource = Some(r);
                }
            }
        }
        self.incumbent = self.normalize(&self.best_config);
        self.best_obj = f64::INFINITY;
        self.cost_incumbent = 0.0;
        self.direction_tried = None;
        self.configs.clear();
        self.trial_count_proposed = 1;
        self.trial_count_complete = 1;
        self.k = 0;
        self.old_k = 0;
        self.reset_incumbent_counters();
        self.iter_best_config = 1;
    }

    fn reset_incumbent_counters(&mut self) {
        self.num_complete4incumbent = 0;
        self.cost_complete4incumbent = 0.0;
        self.num_proposedby_incumbent = 0;
        self.num_allowed4incumbent = 2 * self.dim;
        self.proposed_by.clear();
    }

    /// Adopt `config` as the new incumbent.
    fn move_to(&mut self, config: Config, result: &Record) {
        if let Some(schedule) = &self.schedule {
            if let Some(r) = config.get(&schedule.attr).and_then(ParameterValue::as_f64) {
                self.resource = Some(r);
            }
        }
        self.incumbent = self.normalize(&config);
        self.best_config = config;
        self.cost_incumbent = result.metric(&self.cost_attr).unwrap_or(0.0);
        self.reset_incumbent_counters();
        self.iter_best_config = self.trial_count_complete;
    }

    fn at_full_resource(&self) -> bool {
        match (&self.schedule, self.resource) {
            (Some(schedule), Some(r)) => r >= schedule.max_resource,
            _ => true,
        }
    }

    fn denormalize(&self, point: &NormalizedPoint) -> Config {
        let mut config = self.best_config.clone();
        for param in &self.space.parameters {
            if let Some(x) = point.get(&param.name) {
                config.insert(param.name.clone(), param.kind.denormalize(*x));
            }
        }
        config
    }

    fn random_unit_vector(&mut self) -> Vec<f64> {
        let mut v: Vec<f64> = (0..self.dim)
            .map(|_| self.rng.sample::<f64, _>(StandardNormal))
            .collect();
        let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }

    /// Re-evaluate the incumbent at a larger resource once enough cost has
    /// been spent around it.
    fn try_increase_resource(&mut self, trial_id: &TrialId) -> Option<Config> {
        let schedule = self.schedule.as_ref()?;
        let resource = self.resource?;
        if self.num_complete4incumbent == 0
            || self.cost_incumbent <= 0.0
            || resource >= schedule.max_resource
            || self.cost_complete4incumbent < self.cost_incumbent * schedule.reduction_factor
        {
            return None;
        }
        let increased = schedule.round(resource * schedule.reduction_factor);
        let mut config = self.best_config.clone();
        config.insert(schedule.attr.clone(), increased);
        debug!("Increasing resource from {} to {}", resource, increased);

        self.cost_incumbent *= increased / resource;
        self.resource = Some(increased);
        self.direction_tried = None;
        self.configs.insert(trial_id.clone(), (config.clone(), self.step));
        Some(config)
    }
}

impl LocalSearch for FrugalLocalSearch {
    fn step_size(&self) -> f64 {
        STEPSIZE
    }

    fn direction(&self) -> ObjectiveDirection {
        self.direction
    }

    fn objective_key(&self) -> &str {
        &self.objective_key
    }

    fn set_objective(&mut self, key: &str, direction: ObjectiveDirection) {
        self.objective_key = key.to_string();
        self.direction = direction;
    }

    fn space(&self) -> &SearchSpace {
        &self.space
    }

    fn set_space(&mut self, space: SearchSpace) {
        self.space = space;
        if let Some(schedule) = &self.schedule {
            if self.space.contains(&schedule.attr) {
                self.schedule = None;
            }
        }
        self.init_search();
    }

    fn init_config(&self) -> &Config {
        &self.init_config
    }

    fn normalize(&self, config: &Config) -> NormalizedPoint {
        self.space
            .parameters
            .iter()
            .filter_map(|param| {
                let x = param.kind.normalize(config.get(&param.name)?)?;
                Some((param.name.clone(), x))
            })
            .collect()
    }

    fn complete_config(
        &mut self,
        partial: &Config,
        lower: &NormalizedPoint,
        upper: &NormalizedPoint,
    ) -> Config {
        let is_init = *partial == self.init_config;
        let disturb = is_init && self.reset_times > 0;
        let mut config = partial.clone();
        for param in &self.space.parameters {
            match partial.get(&param.name) {
                None => {
                    let value = param.kind.sample(&mut self.rng);
                    config.insert(param.name.clone(), value);
                }
                Some(_) if disturb => {
                    if let (Some(lo), Some(hi)) = (lower.get(&param.name), upper.get(&param.name)) {
                        let (lo, hi) = (lo.max(0.0), hi.min(1.0));
                        if hi > lo {
                            let x = self.rng.random_range(lo..=hi);
                            config.insert(param.name.clone(), param.kind.denormalize(x));
                        }
                    }
                }
                Some(_) => {}
            }
        }
        if is_init {
            self.reset_times += 1;
        }
        if let Some(schedule) = &self.schedule {
            config.insert(schedule.attr.clone(), schedule.min_resource);
        }
        config
    }

    fn config_signature(&self, config: &Config) -> Signature {
        let resource_attr = self.schedule.as_ref().map(|s| s.attr.as_str());
        self.space
            .canonicalize(config)
            .signature_over(self.space.names().chain(resource_attr))
    }

    fn random_config(&mut self) -> Config {
        let mut config = Config::new();
        for param in &self.space.parameters {
            let value = param.kind.sample(&mut self.rng);
            config.insert(param.name.clone(), value);
        }
        config
    }

    fn resource_floor(&self) -> Option<(&str, f64)> {
        self.schedule
            .as_ref()
            .map(|s| (s.attr.as_str(), s.min_resource))
    }

    fn create(&mut self, anchor: &Config, objective: f64, cost: f64) -> Self {
        self.seed = self.seed.wrapping_add(1);
        let mut search = Self::new(self.space.clone(), anchor.clone(), self.seed)
            .with_objective(self.objective_key.clone(), self.direction)
            .with_cost_attr(self.cost_attr.clone());
        if let Some(schedule) = &self.schedule {
            search = search.with_resource_schedule(schedule.clone());
        }
        search.best_obj = objective * self.metric_op();
        search.cost_incumbent = cost;
        search
    }

    fn suggest(&mut self, trial_id: &TrialId) -> Option<Config> {
        self.num_allowed4incumbent = self.num_allowed4incumbent.saturating_sub(1);
        if let Some(config) = self.try_increase_resource(trial_id) {
            return Some(config);
        }

        let mut point = self.incumbent.clone();
        let (tried, sign) = match self.direction_tried.take() {
            Some(tried) => (tried, -1.0),
            None => {
                let step = self.step;
                let d: Vec<f64> = self.random_unit_vector().into_iter().map(|x| x * step).collect();
                self.direction_tried = Some(d.clone());
                (d, 1.0)
            }
        };
        for (name, delta) in self.space.names().zip(&tried) {
            let x = point.entry(name.to_string()).or_insert(0.5);
            *x = (*x + sign * delta).clamp(0.0, 1.0);
        }

        let mut config = self.denormalize(&point);
        if let (Some(schedule), Some(r)) = (&self.schedule, self.resource) {
            config.insert(schedule.attr.clone(), r);
        }
        self.proposed_by.insert(trial_id.clone(), self.incumbent.clone());
        self.configs.insert(trial_id.clone(), (config.clone(), self.step));
        self.num_proposedby_incumbent += 1;
        self.trial_count_proposed += 1;

        if self.num_proposedby_incumbent == self.dir && self.at_full_resource() {
            // stuck around this incumbent
            self.num_proposedby_incumbent = self.num_proposedby_incumbent.saturating_sub(2);
            if self.step < self.step_lower_bound {
                return None;
            }
            self.old_k = if self.k > 0 { self.k } else { self.iter_best_config };
            self.k = self.trial_count_proposed + 1;
            self.step *= (self.old_k as f64 / self.k as f64).sqrt();
        }
        Some(config)
    }

    fn on_trial_result(&mut self, trial_id: &TrialId, result: &Record) {
        let Some(obj) = result.metric(&self.objective_key) else {
            return;
        };
        let obj = obj * self.metric_op();
        if obj >= self.best_obj {
            return;
        }
        self.best_obj = obj;
        if let Some((config, _)) = self.configs.get(trial_id).cloned() {
            if config != self.best_config {
                self.move_to(config, result);
            }
        }
    }

    fn on_trial_complete(&mut self, trial_id: &TrialId, result: Option<&Record>, error: bool) {
        self.trial_count_complete += 1;
        let proposal = self.configs.remove(trial_id);
        let origin = self.proposed_by.remove(trial_id);

        if let (false, Some(result)) = (error, result) {
            if let Some(obj) = result.metric(&self.objective_key) {
                let obj = obj * self.metric_op();
                if obj < self.best_obj {
                    let (config, step) = proposal.unwrap_or_else(|| (result.config(), self.step));
                    self.best_obj = obj;
                    self.step = step;
                    self.move_to(config, result);
                    if self.k > 0 && self.old_k > 0 {
                        self.step *= (self.k as f64 / self.old_k as f64).sqrt();
                    }
                    self.step = self.step.min(self.step_upper_bound);
                    return;
                }
            }
        }

        if origin.as_ref() == Some(&self.incumbent) {
            self.num_complete4incumbent += 1;
            if let Some(cost) = result.and_then(|r| r.metric(&self.cost_attr)) {
                self.cost_complete4incumbent += cost;
            }
            if self.num_complete4incumbent >= 2 * self.dim && self.num_allowed4incumbent == 0 {
                self.num_allowed4incumbent = 2;
            }
            if self.num_complete4incumbent == self.dir && self.at_full_resource() {
                self.num_complete4incumbent = self.num_complete4incumbent.saturating_sub(2);
                self.num_allowed4incumbent = self.num_allowed4incumbent.max(2);
            }
        }
    }

    fn converged(&self) -> bool {
        self.step < self.step_lower_bound
    }

    fn can_suggest(&self) -> bool {
        self.num_allowed4incumbent > 0
    }

    fn resource(&self) -> Option<f64> {
        self.resource
    }

    fn reach(&self, other: &Self) -> bool {
        if let Some(schedule) = &self.schedule {
            let mine = self.best_config.get(&schedule.attr).and_then(ParameterValue::as_f64);
            let theirs = other.best_config.get(&schedule.attr).and_then(ParameterValue::as_f64);
            if let (Some(a), Some(b)) = (mine, theirs) {
                // resource never decreases
                if a > b {
                    return false;
                }
            }
        }
        for param in &self.space.parameters {
            // unordered categories are hard to reach by chance
            if matches!(param.kind, ParameterKind::Choice { .. })
                && self.best_config.get(&param.name) != other.best_config.get(&param.name)
            {
                return false;
            }
        }
        let distance = self
            .space
            .names()
            .map(|name| match (self.incumbent.get(name), other.incumbent.get(name)) {
                (Some(a), Some(b)) => (a - b).powi(2),
                _ => f64::INFINITY,
            })
            .sum::<f64>()
            .sqrt();
        distance <= self.step
    }

    fn best_objective(&self) -> f64 {
        self.best_obj
    }

    fn incumbent_cost(&self) -> f64 {
        self.cost_incumbent
    }
}
