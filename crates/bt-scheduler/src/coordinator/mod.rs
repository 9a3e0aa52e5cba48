//! The search coordinator.
//!
//! A coordinator owns a pool of [`SearchThread`]s: slot 0 holds the global
//! search (vacuous under [`StrategyKind::Cfo`]) and every other slot a local
//! search anchored where a promising trial finished. Each call to
//! [`suggest`](SearchCoordinator::suggest) picks the thread with the best
//! projected improvement, deduplicates its proposal against every
//! configuration already tried, and keeps global proposals inside the
//! admissible region the local threads have explored. Completions update
//! thread statistics, may spawn a local thread from a good global trial, and
//! prune threads that another thread reaches with a better objective.
//!
//! The coordinator is sequential; wrap it in a
//! [`SharedCoordinator`](crate::SharedCoordinator) when several runner
//! threads drive it.

mod persist;
mod pool;

use std::collections::{BTreeMap, VecDeque};

use bt_search::{FrugalLocalSearch, GlobalSearch, LocalSearch, RandomGlobalSearch, ResourceSchedule};
use bt_types::{
    internal_error, Config, ObjectiveDirection, Record, SearchSpace, Signature, TrialId, TuneResult,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constraints::{ConfigConstraint, ConstraintState, MetricConstraint, LAGRANGE_SUFFIX};
use crate::diagnostics::{DiagnosticsSink, RemovalReason, SearchEvent};
use crate::region::AdmissibleRegion;
use crate::settings::{SchedulerConfig, SearchProperties, DEFAULT_REDUCTION_FACTOR};
use crate::strategy::{CandidateStartPoints, StrategyKind};
use crate::thread::{eps_for_budget, SearchThread, DEFAULT_EPS};

pub use persist::{CoordinatorSnapshot, SNAPSHOT_VERSION};

/// Cached outcome of a configuration, keyed by its signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CachedResult {
    /// Proposed, not yet reported.
    Pending,
    Resolved(Record),
}

impl CachedResult {
    pub fn record(&self) -> Option<&Record> {
        match self {
            Self::Resolved(record) => Some(record),
            Self::Pending => None,
        }
    }
}

/// What the coordinator remembers about an outstanding trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialTicket {
    pub thread_id: usize,
    pub signature: Signature,
}

/// Key of the objective the engines optimize: the metric itself, or its
/// penalty-adjusted copy when metric constraints are present.
fn objective_key_for(metric: &str, constrained: bool) -> String {
    if constrained {
        format!("{metric}{LAGRANGE_SUFFIX}")
    } else {
        metric.to_string()
    }
}

/// Wall-clock deadline `budget` seconds from now; `None` when the budget is
/// infinite or lands past the representable range.
fn deadline_after(budget: f64) -> Option<DateTime<Utc>> {
    if !budget.is_finite() {
        return None;
    }
    Duration::try_milliseconds((budget * 1000.0) as i64).and_then(|d| Utc::now().checked_add_signed(d))
}

pub struct SearchCoordinator<L, G> {
    strategy: StrategyKind,
    metric: String,
    objective_key: String,
    direction: ObjectiveDirection,
    cost_attr: String,
    /// Template engine: normalizes, completes and signs configs, and spawns
    /// the engines of local threads.
    local: L,
    points_to_evaluate: VecDeque<Config>,
    config_constraints: Vec<ConfigConstraint>,
    metric_constraints: Vec<MetricConstraint>,
    constraint_state: ConstraintState,
    threads: BTreeMap<usize, SearchThread<L, G>>,
    thread_count: usize,
    init_used: bool,
    trial_proposed_by: BTreeMap<TrialId, TrialTicket>,
    region: AdmissibleRegion,
    results: BTreeMap<Signature, CachedResult>,
    metric_target: f64,
    deadline: Option<DateTime<Utc>>,
    eps: f64,
    candidates: Option<CandidateStartPoints>,
    sink: Box<dyn DiagnosticsSink>,
}

impl<L, G> std::fmt::Debug for SearchCoordinator<L, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchCoordinator")
            .field("strategy", &self.strategy)
            .field("metric", &self.metric)
            .field("direction", &self.direction)
            .field("threads", &self.threads.keys().collect::<Vec<_>>())
            .field("metric_target", &self.metric_target)
            .finish_non_exhaustive()
    }
}

impl<L, G> SearchCoordinator<L, G>
where
    L: LocalSearch,
    G: GlobalSearch,
{
    /// Global search blended with local threads.
    pub fn blend(config: SchedulerConfig, local: L, global: G, sink: Box<dyn DiagnosticsSink>) -> TuneResult<Self> {
        Self::build(StrategyKind::Blend, config, local, Some(global), sink)
    }

    /// One local thread at a time, restarted when it converges.
    pub fn cfo(config: SchedulerConfig, local: L, sink: Box<dyn DiagnosticsSink>) -> TuneResult<Self> {
        Self::build(StrategyKind::Cfo, config, local, None, sink)
    }

    fn build(
        strategy: StrategyKind,
        config: SchedulerConfig,
        mut local: L,
        mut global: Option<G>,
        sink: Box<dyn DiagnosticsSink>,
    ) -> TuneResult<Self> {
        config.validate()?;
        if local.init_config().is_empty() {
            sink.emit(SearchEvent::MissingLowCostConfig);
        }

        let objective_key = objective_key_for(&config.metric, !config.metric_constraints.is_empty());
        local.set_objective(&objective_key, config.mode);
        if let Some(global) = global.as_mut() {
            global.set_objective(&objective_key, config.mode);
        }
        let candidates = (strategy == StrategyKind::Cfo && config.points_to_evaluate.len() > 1)
            .then(|| CandidateStartPoints::new(local.init_config().is_empty()));
        let slot = SearchThread::global(global, &objective_key, config.mode, &config.cost_attr);

        let mut coordinator = Self {
            strategy,
            metric: config.metric,
            objective_key,
            direction: config.mode,
            cost_attr: config.cost_attr,
            local,
            points_to_evaluate: config.points_to_evaluate.into(),
            config_constraints: Vec::new(),
            constraint_state: ConstraintState::new(config.metric_constraints.len()),
            metric_constraints: config.metric_constraints,
            threads: BTreeMap::from([(0, slot)]),
            thread_count: 1,
            init_used: false,
            trial_proposed_by: BTreeMap::new(),
            region: AdmissibleRegion::default(),
            results: BTreeMap::new(),
            metric_target: f64::INFINITY,
            deadline: None,
            eps: DEFAULT_EPS,
            candidates,
            sink,
        };
        coordinator.init_search();
        coordinator.apply_properties(SearchProperties {
            space: None,
            time_budget_s: config.time_budget_s,
            metric_target: config.metric_target,
        });
        debug!("Created {} coordinator for metric {}", strategy, coordinator.metric);
        Ok(coordinator)
    }

    /// Skip configurations that violate `constraint` without running them.
    pub fn with_config_constraint(mut self, constraint: ConfigConstraint) -> Self {
        self.config_constraints.push(constraint);
        self
    }

    fn init_search(&mut self) {
        self.metric_target = f64::INFINITY * self.direction.metric_op();
        let global = self.threads.remove(&0).and_then(SearchThread::into_global);
        self.threads.clear();
        self.threads.insert(
            0,
            SearchThread::global(global, &self.objective_key, self.direction, &self.cost_attr),
        );
        self.thread_count = 1;
        self.init_used = false;
        self.trial_proposed_by.clear();
        self.region = AdmissibleRegion::new(self.local.normalize(self.local.init_config()));
        self.results.clear();
        self.deadline = None;
        self.constraint_state = ConstraintState::new(self.metric_constraints.len());
    }

    fn global_engine_mut(&mut self) -> Option<&mut G> {
        self.threads.get_mut(&0).and_then(SearchThread::global_engine_mut)
    }

    fn apply_properties(&mut self, properties: SearchProperties) {
        if let Some(budget) = properties.time_budget_s {
            self.deadline = deadline_after(budget);
            self.eps = eps_for_budget(budget);
        }
        if let Some(target) = properties.metric_target {
            self.metric_target = target;
        }
    }

    /// Change the metric, mode, space, budget or target after construction.
    ///
    /// The space can only be installed while the local engine has none. A
    /// metric or mode change restarts the search. Invalid properties are
    /// rejected before anything changes.
    pub fn set_search_properties(
        &mut self,
        metric: Option<&str>,
        mode: Option<ObjectiveDirection>,
        properties: Option<SearchProperties>,
    ) -> TuneResult<bool> {
        let mut properties = properties.unwrap_or_default();
        properties.validate()?;
        let mut changed = false;
        if let Some(metric) = metric.filter(|m| *m != self.metric) {
            self.metric = metric.to_string();
            self.objective_key = objective_key_for(metric, !self.metric_constraints.is_empty());
            changed = true;
        }
        if let Some(mode) = mode.filter(|m| *m != self.direction) {
            self.direction = mode;
            changed = true;
        }

        if self.local.space().is_empty() {
            if let Some(space) = properties.space.take() {
                self.install_space(space);
            }
            self.reset_objective();
            self.init_search();
            self.sink.emit(SearchEvent::SearchReset {
                reason: "search space installed".to_string(),
            });
        } else if changed {
            self.reset_objective();
            self.init_search();
            self.sink.emit(SearchEvent::SearchReset {
                reason: format!("objective changed to {} ({:?})", self.metric, self.direction),
            });
        }
        self.apply_properties(properties);
        Ok(true)
    }

    /// Replace the space with a runner-style distribution spec and restart.
    pub fn update_search_space(&mut self, spec: &serde_json::Value) -> TuneResult<()> {
        let space = SearchSpace::from_distribution_spec(spec)?;
        self.install_space(space);
        self.init_search();
        self.sink.emit(SearchEvent::SearchReset {
            reason: "search space updated".to_string(),
        });
        Ok(())
    }

    fn install_space(&mut self, space: SearchSpace) {
        if let Some(global) = self.global_engine_mut() {
            global.set_space(space.clone());
        }
        self.local.set_space(space);
    }

    fn reset_objective(&mut self) {
        let (key, direction) = (self.objective_key.clone(), self.direction);
        self.local.set_objective(&key, direction);
        if let Some(global) = self.global_engine_mut() {
            global.set_objective(&key, direction);
        }
    }

    /// Next configuration to evaluate for `trial_id`, or `None` when no
    /// thread has anything new right now; callers poll again later.
    ///
    /// Fails only when the CFO pool holds more than one local thread.
    pub fn suggest(&mut self, trial_id: &TrialId) -> TuneResult<Option<Config>> {
        if self.strategy == StrategyKind::Cfo {
            if self.threads.len() > 2 {
                return Err(internal_error!(
                    "CFO thread pool holds {} threads, at most 2 allowed",
                    self.threads.len()
                ));
            }
            if self.threads.len() < 2 {
                // the local thread converged; pick a new anchor
                self.init_used = false;
            }
        }
        if self.init_used && self.points_to_evaluate.is_empty() {
            Ok(self.suggest_from_threads(trial_id))
        } else {
            Ok(self.suggest_initial(trial_id))
        }
    }

    /// Next user-given point, or the low-cost init config once none remain.
    fn suggest_initial(&mut self, trial_id: &TrialId) -> Option<Config> {
        if !self.points_to_evaluate.is_empty() {
            if let Some(candidates) = self.candidates.as_mut() {
                candidates.register(trial_id);
            }
        }
        let partial = self
            .points_to_evaluate
            .pop_front()
            .unwrap_or_else(|| self.local.init_config().clone());
        let config = self
            .local
            .complete_config(&partial, &self.region.local_min, &self.region.local_max);
        let signature = self.local.config_signature(&config);
        if self.results.contains_key(&signature) {
            // finished or still running
            return None;
        }
        self.results.insert(signature.clone(), CachedResult::Pending);
        self.init_used = true;
        self.trial_proposed_by
            .insert(trial_id.clone(), TrialTicket { thread_id: 0, signature });
        if let Some(slot) = self.threads.get_mut(&0) {
            slot.mark_running();
        }
        Some(config)
    }

    fn suggest_from_threads(&mut self, trial_id: &TrialId) -> Option<Config> {
        let (mut choice, backup) = self.select_thread();
        let proposal = self.threads.get_mut(&choice)?.suggest(trial_id);
        if choice != 0 && proposal.is_none() {
            if self.threads.get(&choice).is_some_and(|t| t.converged()) {
                self.expand_region();
                self.remove_thread(choice, RemovalReason::Exhausted);
            }
            return None;
        }

        let proposal = proposal.filter(|config| !self.should_skip(Some(choice), trial_id, Some(config)));
        let mut config = match proposal {
            Some(config) => config,
            None if choice != 0 => return None,
            None => {
                // the global engine had nothing new; draw one random sample
                let fallback = self.local.random_config();
                if self.should_skip(None, trial_id, Some(&fallback)) {
                    return None;
                }
                fallback
            }
        };

        if choice == 0 && !self.is_valid(&config) {
            if backup == 0 {
                let init = self.local.init_config().clone();
                config = self
                    .local
                    .complete_config(&init, &self.region.local_min, &self.region.local_max);
                if self.results.contains_key(&self.local.config_signature(&config)) {
                    return None;
                }
            } else {
                let proposal = self.threads.get_mut(&backup).and_then(|t| t.suggest(trial_id));
                if self.should_skip(Some(backup), trial_id, proposal.as_ref()) {
                    return None;
                }
                config = proposal?;
                choice = backup;
            }
        }

        if choice == 0 {
            let floor = self
                .local
                .resource_floor()
                .map(|(attr, min)| (attr.to_string(), min));
            if let Some((attr, min)) = floor {
                config.insert(attr, min);
            }
            // relaxed until the next completion
            let point = self.local.normalize(&config);
            self.region.relax_global(&point);
        } else {
            let point = self.local.normalize(&config);
            self.region.update_local(&point);
            self.region.sync_global();
        }
        let signature = self.local.config_signature(&config);
        self.results.insert(signature.clone(), CachedResult::Pending);
        self.trial_proposed_by.insert(
            trial_id.clone(),
            TrialTicket {
                thread_id: choice,
                signature,
            },
        );
        Some(config)
    }

    /// Intermediate result of a running trial.
    pub fn on_trial_result(&mut self, trial_id: &TrialId, mut result: Record) {
        let Some(thread_id) = self.trial_proposed_by.get(trial_id).map(|t| t.thread_id) else {
            return;
        };
        if !self.threads.contains_key(&thread_id) {
            return;
        }
        if !self.metric_constraints.is_empty() {
            // penalties only apply at completion
            if let Some(value) = result.metric(&self.metric) {
                result.set_metric(self.objective_key.clone(), value);
            }
        }
        if let Some(thread) = self.threads.get_mut(&thread_id) {
            thread.on_trial_result(trial_id, &result);
        }
    }

    /// Final result of a trial. `error` marks a failed or cancelled trial,
    /// whose configuration becomes eligible again.
    pub fn on_trial_complete(&mut self, trial_id: &TrialId, mut result: Option<Record>, error: bool) {
        let metric_op = self.direction.metric_op();
        let mut feasible = true;
        if let (false, Some(record)) = (error, result.as_mut()) {
            if !self.metric_constraints.is_empty() {
                if let Some(objective) = record.metric(&self.metric) {
                    let was_satisfied = self.constraint_state.satisfied;
                    let (adjusted, ok) =
                        self.constraint_state
                            .penalize(&self.metric_constraints, record, objective, metric_op);
                    record.set_metric(self.objective_key.clone(), adjusted);
                    feasible = ok;
                    if ok && !was_satisfied {
                        self.sink.emit(SearchEvent::ConstraintsSatisfied);
                    }
                }
            }
        }

        let ticket = self.trial_proposed_by.remove(trial_id);
        let mut thread_id = ticket.as_ref().map(|t| t.thread_id);
        if let Some(thread) = thread_id.and_then(|id| self.threads.get_mut(&id)) {
            thread.on_trial_complete(trial_id, result.as_ref(), error, self.eps);
        }

        let record = result.as_ref().filter(|r| !r.is_empty());
        let config = record.map(Record::config).unwrap_or_default();
        let signature = if config.is_empty() {
            ticket.map(|t| t.signature)
        } else {
            Some(self.local.config_signature(&config))
        };
        if error {
            if let Some(signature) = &signature {
                self.results.remove(signature);
            }
        } else if let Some(record) = record {
            if let Some(signature) = signature {
                self.results.insert(signature, CachedResult::Resolved(record.clone()));
            }
            if let Some(objective) = record.metric(&self.objective_key) {
                if (objective - self.metric_target) * metric_op < 0.0 {
                    self.metric_target = objective;
                }
                if thread_id == Some(0) && feasible && !config.is_empty() && self.create_condition(objective) {
                    if let Some(candidates) = self.candidates.as_mut() {
                        candidates.started_from_given = candidates.remove(trial_id).is_some();
                        if !candidates.started_from_given {
                            candidates.started_from_low_cost = true;
                        }
                    }
                    thread_id = Some(self.create_thread(&config, record));
                } else if thread_id.is_some_and(|id| id != 0) && !self.constraint_state.satisfied {
                    // nothing feasible yet; widen the search
                    self.expand_region();
                }
            }
            self.region.sync_global();
        }

        if let Some(id) = thread_id.filter(|id| *id != 0) {
            if self.threads.contains_key(&id) {
                self.clean(id);
            }
        }

        let is_candidate = self
            .candidates
            .as_ref()
            .is_some_and(|c| c.contains(trial_id));
        if is_candidate {
            if let Some(candidates) = self.candidates.as_mut() {
                candidates.record(trial_id, result);
            }
            if self.threads.len() < 2 && self.points_to_evaluate.is_empty() {
                self.create_thread_from_best_candidate();
            }
        }
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    /// Record key the engines optimize.
    pub fn objective_key(&self) -> &str {
        &self.objective_key
    }

    pub fn direction(&self) -> ObjectiveDirection {
        self.direction
    }

    /// Best objective seen so far, or the configured target.
    pub fn metric_target(&self) -> f64 {
        self.metric_target
    }

    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }

    pub fn thread_ids(&self) -> Vec<usize> {
        self.threads.keys().copied().collect()
    }

    pub fn thread(&self, id: usize) -> Option<&SearchThread<L, G>> {
        self.threads.get(&id)
    }

    pub fn constraints_satisfied(&self) -> bool {
        self.constraint_state.satisfied
    }

    pub fn penalties(&self) -> &[f64] {
        &self.constraint_state.penalties
    }

    pub fn region(&self) -> &AdmissibleRegion {
        &self.region
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    pub fn eps(&self) -> f64 {
        self.eps
    }

    pub fn local(&self) -> &L {
        &self.local
    }

    pub fn candidates(&self) -> Option<&CandidateStartPoints> {
        self.candidates.as_ref()
    }

    /// Cached outcome of `config`, if it was ever proposed.
    pub fn cached_result(&self, config: &Config) -> Option<&CachedResult> {
        self.results.get(&self.local.config_signature(config))
    }
}

/// Seed of the global engine, offset from the local one.
fn global_seed(seed: u64) -> u64 {
    if seed >= 10 {
        seed - 10
    } else {
        seed + (1 << 32) - 11
    }
}

fn frugal_engine(config: &SchedulerConfig, space: SearchSpace) -> FrugalLocalSearch {
    let mut engine = FrugalLocalSearch::new(space, config.low_cost_partial_config.clone(), config.seed)
        .with_cost_attr(config.cost_attr.clone());
    if let (Some(attr), Some(min_resource), Some(max_resource)) =
        (&config.prune_attr, config.min_resource, config.max_resource)
    {
        engine = engine.with_resource_schedule(ResourceSchedule {
            attr: attr.clone(),
            min_resource,
            max_resource,
            reduction_factor: config.reduction_factor.unwrap_or(DEFAULT_REDUCTION_FACTOR),
        });
    }
    engine
}

/// Coordinator over the bundled engines.
pub type BlendSearch = SearchCoordinator<FrugalLocalSearch, RandomGlobalSearch>;

impl SearchCoordinator<FrugalLocalSearch, RandomGlobalSearch> {
    /// Blend strategy with a frugal local search and random global search
    /// over `space`.
    pub fn blend_search(config: SchedulerConfig, space: SearchSpace, sink: Box<dyn DiagnosticsSink>) -> TuneResult<Self> {
        let local = frugal_engine(&config, space.clone());
        let global = RandomGlobalSearch::new(space, global_seed(config.seed));
        Self::blend(config, local, global, sink)
    }

    /// CFO strategy with a frugal local search over `space`.
    pub fn cfo_search(config: SchedulerConfig, space: SearchSpace, sink: Box<dyn DiagnosticsSink>) -> TuneResult<Self> {
        let local = frugal_engine(&config, space);
        Self::cfo(config, local, sink)
    }
}
