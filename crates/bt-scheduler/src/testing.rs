//! Scripted engines for exercising scheduler policy in tests.

use std::collections::VecDeque;

use bt_search::{GlobalSearch, LocalSearch};
use bt_types::{Config, NormalizedPoint, ObjectiveDirection, Record, SearchSpace, TrialId};

/// Local engine whose proposals and capabilities are set by the test.
#[derive(Debug, Clone)]
pub struct StubLocal {
    pub space: SearchSpace,
    pub init: Config,
    pub objective_key: String,
    pub direction: ObjectiveDirection,
    pub best: f64,
    pub cost: f64,
    pub resource: Option<f64>,
    pub reaches: bool,
    pub converged: bool,
    pub can_suggest: bool,
    pub proposals: VecDeque<Config>,
    pub completed: Vec<TrialId>,
    /// Intermediate results received, in order.
    pub results: Vec<Record>,
}

impl StubLocal {
    pub fn new(space: SearchSpace, init: Config) -> Self {
        Self {
            space,
            init,
            objective_key: "loss".to_string(),
            direction: ObjectiveDirection::Minimize,
            best: f64::INFINITY,
            cost: 0.0,
            resource: None,
            reaches: true,
            converged: false,
            can_suggest: true,
            proposals: VecDeque::new(),
            completed: Vec::new(),
            results: Vec::new(),
        }
    }

    /// An instance over a one-dimensional space whose best objective is `best`.
    pub fn anchored(best: f64) -> Self {
        let mut stub = Self::new(SearchSpace::new().add_float("x", 0.0, 1.0), Config::new());
        stub.best = best;
        stub
    }

    pub fn with_resource(mut self, resource: f64) -> Self {
        self.resource = Some(resource);
        self
    }
}

impl LocalSearch for StubLocal {
    fn step_size(&self) -> f64 {
        0.1
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
    }

    fn init_config(&self) -> &Config {
        &self.init
    }

    fn normalize(&self, config: &Config) -> NormalizedPoint {
        self.space
            .parameters
            .iter()
            .filter_map(|p| Some((p.name.clone(), p.kind.normalize(config.get(&p.name)?)?)))
            .collect()
    }

    fn complete_config(&mut self, partial: &Config, _lower: &NormalizedPoint, _upper: &NormalizedPoint) -> Config {
        let mut config = partial.clone();
        for param in &self.space.parameters {
            if !config.contains_key(&param.name) {
                config.insert(param.name.clone(), param.kind.denormalize(0.5));
            }
        }
        config
    }

    fn random_config(&mut self) -> Config {
        let mut config = Config::new();
        for param in &self.space.parameters {
            config.insert(param.name.clone(), param.kind.denormalize(0.25));
        }
        config
    }

    fn resource_floor(&self) -> Option<(&str, f64)> {
        None
    }

    fn create(&mut self, anchor: &Config, objective: f64, cost: f64) -> Self {
        let mut stub = Self::new(self.space.clone(), anchor.clone());
        stub.objective_key = self.objective_key.clone();
        stub.direction = self.direction;
        stub.best = objective * self.metric_op();
        stub.cost = cost;
        stub.proposals = self.proposals.clone();
        stub
    }

    fn suggest(&mut self, _trial_id: &TrialId) -> Option<Config> {
        self.proposals.pop_front()
    }

    fn on_trial_result(&mut self, _trial_id: &TrialId, result: &Record) {
        self.results.push(result.clone());
    }

    fn on_trial_complete(&mut self, trial_id: &TrialId, _result: Option<&Record>, _error: bool) {
        self.completed.push(trial_id.clone());
    }

    fn converged(&self) -> bool {
        self.converged
    }

    fn can_suggest(&self) -> bool {
        self.can_suggest
    }

    fn resource(&self) -> Option<f64> {
        self.resource
    }

    fn reach(&self, _other: &Self) -> bool {
        self.reaches
    }

    fn best_objective(&self) -> f64 {
        self.best
    }

    fn incumbent_cost(&self) -> f64 {
        self.cost
    }
}

/// Global engine replaying a fixed list of proposals.
#[derive(Debug, Clone, Default)]
pub struct StubGlobal {
    pub proposals: VecDeque<Config>,
}

impl StubGlobal {
    pub fn new(proposals: Vec<Config>) -> Self {
        Self {
            proposals: proposals.into(),
        }
    }
}

impl GlobalSearch for StubGlobal {
    fn suggest(&mut self, _trial_id: &TrialId) -> Option<Config> {
        self.proposals.pop_front()
    }

    fn set_objective(&mut self, _key: &str, _direction: ObjectiveDirection) {}

    fn set_space(&mut self, _space: SearchSpace) {}

    fn name(&self) -> &str {
        "stub"
    }
}
