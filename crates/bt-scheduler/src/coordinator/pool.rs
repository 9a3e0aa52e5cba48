//! Thread pool policy: selection, deduplication, spawning and pruning.

use std::collections::BTreeSet;

use bt_search::{GlobalSearch, LocalSearch};
use bt_types::{Config, Record, TrialId};
use chrono::Utc;
use tracing::debug;

use super::{CachedResult, SearchCoordinator};
use crate::diagnostics::{RemovalReason, SearchEvent};
use crate::strategy::StrategyKind;
use crate::thread::SearchThread;

/// Median of `values`; the mean of the middle pair for even lengths.
fn median(values: &mut [f64]) -> f64 {
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

impl<L, G> SearchCoordinator<L, G>
where
    L: LocalSearch,
    G: GlobalSearch,
{
    /// Highest-priority thread and the best local runner-up, as thread ids.
    /// Both fall back to the global slot.
    pub(super) fn select_thread(&mut self) -> (usize, usize) {
        if self.strategy == StrategyKind::Cfo {
            let id = self.threads.keys().copied().find(|id| *id != 0).unwrap_or(0);
            return (id, id);
        }

        let mut min_eci = match self.deadline {
            Some(deadline) => ((deadline - Utc::now()).num_milliseconds() as f64 / 1000.0).max(0.0),
            None => f64::INFINITY,
        };
        let max_speed = self.threads.values().map(|t| t.speed).fold(0.0, f64::max);
        for thread in self.threads.values_mut() {
            thread.update_eci(self.metric_target, max_speed);
            min_eci = min_eci.min(thread.eci);
        }
        for thread in self.threads.values_mut() {
            thread.update_priority(min_eci);
        }

        let base = self.threads.get(&0).map_or(f64::NEG_INFINITY, |t| t.priority);
        let (mut top, mut backup) = (0, 0);
        let (mut top_priority, mut backup_priority) = (base, base);
        for (&id, thread) in self.threads.iter().filter(|(id, _)| **id != 0) {
            if !thread.can_suggest() {
                continue;
            }
            if thread.priority > top_priority {
                top_priority = thread.priority;
                top = id;
            }
            if thread.priority > backup_priority || backup == 0 {
                backup_priority = thread.priority;
                backup = id;
            }
        }
        (top, backup)
    }

    /// Whether `config` must not be proposed: it is absent, already seen, or
    /// violates a config constraint. A resolved duplicate is replayed to the
    /// proposing thread so its statistics still advance.
    pub(super) fn should_skip(&mut self, choice: Option<usize>, trial_id: &TrialId, config: Option<&Config>) -> bool {
        let Some(config) = config else {
            return true;
        };
        let signature = self.local.config_signature(config);
        if !self.results.contains_key(&signature) {
            let violated = self
                .config_constraints
                .iter()
                .find(|c| c.is_violated(config))
                .map(|c| c.name.clone());
            match violated {
                Some(constraint) => {
                    let worst = self.worst_case_record(config);
                    self.results.insert(signature.clone(), CachedResult::Resolved(worst));
                    self.sink.emit(SearchEvent::ConfigConstraintViolated { constraint });
                }
                None => return false,
            }
        }

        let replay = self.results.get(&signature).and_then(CachedResult::record).cloned();
        if let (Some(id), Some(record)) = (choice, replay) {
            if let Some(thread) = self.threads.get_mut(&id) {
                thread.on_trial_complete(trial_id, Some(&record), false, self.eps);
            }
            if id != 0 {
                self.clean(id);
            }
        }
        true
    }

    fn worst_case_record(&self, config: &Config) -> Record {
        let worst = f64::INFINITY * self.direction.metric_op();
        Record::for_config(config)
            .with_metric(self.metric.clone(), worst)
            .with_metric(self.objective_key.clone(), worst)
            .with_metric(self.cost_attr.clone(), 1.0)
    }

    pub(super) fn is_valid(&self, config: &Config) -> bool {
        let point = self.local.normalize(config);
        self.region.is_valid(config, &point, self.local.step_size())
    }

    pub(super) fn expand_region(&mut self) {
        let step = self.local.step_size();
        self.region.expand(step);
        self.sink.emit(SearchEvent::RegionExpanded { step });
    }

    /// Whether a completed global trial with objective `obj` should anchor a
    /// new local thread.
    pub(super) fn create_condition(&self, obj: f64) -> bool {
        let metric_op = self.direction.metric_op();
        match self.strategy {
            StrategyKind::Blend => {
                if self.threads.len() < 2 {
                    return true;
                }
                let mut bests: Vec<f64> = self
                    .threads
                    .iter()
                    .filter(|(id, _)| **id != 0)
                    .map(|(_, t)| t.obj_best1)
                    .collect();
                obj * metric_op < median(&mut bests)
            }
            StrategyKind::Cfo => {
                if !self.points_to_evaluate.is_empty() || self.threads.len() == 2 {
                    return false;
                }
                match &self.candidates {
                    Some(candidates) if !candidates.is_empty() && self.thread_count == 1 => candidates
                        .best_objective(&self.objective_key, metric_op)
                        .is_some_and(|best| obj * metric_op <= best),
                    _ => true,
                }
            }
        }
    }

    /// Spawn a local thread anchored at `config`; returns its id.
    pub(super) fn create_thread(&mut self, config: &Config, record: &Record) -> usize {
        let objective = record.metric(&self.objective_key).unwrap_or(f64::INFINITY);
        let cost = record.metric(&self.cost_attr).unwrap_or(1.0);
        let engine = self.local.create(config, objective, cost);
        let id = self.thread_count;
        self.threads.insert(id, SearchThread::local(engine, &self.cost_attr));
        self.thread_count += 1;
        let point = self.local.normalize(config);
        self.region.update_local(&point);
        self.sink.emit(SearchEvent::ThreadCreated {
            thread_id: id,
            objective,
        });
        id
    }

    pub(super) fn create_thread_from_best_candidate(&mut self) {
        let metric_op = self.direction.metric_op();
        let Some(candidates) = self.candidates.as_mut() else {
            return;
        };
        let Some((trial_id, record)) = candidates
            .best(&self.objective_key, metric_op)
            .map(|(id, record)| (id.clone(), record.clone()))
        else {
            return;
        };
        candidates.started_from_given = true;
        candidates.remove(&trial_id);
        debug!("Anchoring local search at initial point of trial {}", trial_id);
        self.create_thread(&record.config(), &record);
    }

    pub(super) fn remove_thread(&mut self, id: usize, reason: RemovalReason) {
        if self.threads.remove(&id).is_some() {
            self.sink.emit(SearchEvent::ThreadRemoved { thread_id: id, reason });
        }
    }

    /// Drop threads made redundant by `id`, and `id` itself when it has
    /// converged or another thread dominates it.
    pub(super) fn clean(&mut self, id: usize) {
        let Some(subject) = self.threads.get(&id) else {
            return;
        };
        let mut to_delete = BTreeSet::new();
        let mut subject_dominated = false;
        for (&other_id, other) in self.threads.iter().filter(|(k, _)| **k != 0 && **k != id) {
            if other.is_inferior_to(subject) {
                to_delete.insert(other_id);
            }
            if !subject_dominated && subject.is_inferior_to(other) {
                subject_dominated = true;
            }
        }
        if subject_dominated {
            to_delete.insert(id);
        }

        let converged = subject.converged();
        let subject_best = subject.obj_best1;
        let mut create_new = false;
        if converged {
            to_delete.insert(id);
            self.expand_region();
            let metric_op = self.direction.metric_op();
            if let Some(candidates) = self.candidates.as_mut().filter(|c| !c.is_empty()) {
                if !candidates.started_from_given {
                    candidates.drop_no_better_than(&self.objective_key, metric_op, subject_best);
                }
                create_new = !candidates.is_empty() && candidates.started_from_low_cost;
            }
        }

        for thread_id in to_delete {
            let reason = if thread_id == id && converged {
                RemovalReason::Converged
            } else {
                RemovalReason::Dominated
            };
            self.remove_thread(thread_id, reason);
        }
        if create_new {
            self.create_thread_from_best_candidate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::SearchCoordinator;
    use super::*;
    use crate::diagnostics::TracingSink;
    use crate::settings::SchedulerConfig;
    use crate::testing::{StubGlobal, StubLocal};
    use bt_types::{ObjectiveDirection, SearchSpace};

    type Coordinator = SearchCoordinator<StubLocal, StubGlobal>;

    fn coordinator() -> Coordinator {
        let space = SearchSpace::new().add_float("x", 0.0, 1.0);
        let local = StubLocal::new(space, Config::new().with("x", 0.5));
        SearchCoordinator::blend(
            SchedulerConfig::new("loss", ObjectiveDirection::Minimize),
            local,
            StubGlobal::default(),
            Box::new(TracingSink),
        )
        .unwrap()
    }

    fn anchor(coordinator: &mut Coordinator, x: f64, loss: f64) -> usize {
        let config = Config::new().with("x", x);
        let record = Record::for_config(&config).with_metric("loss", loss);
        coordinator.create_thread(&config, &record)
    }

    #[test]
    fn median_of_even_and_odd() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), 2.5);
    }

    #[test]
    fn blend_creates_below_median_only() {
        let mut coordinator = coordinator();
        assert!(coordinator.create_condition(100.0));
        anchor(&mut coordinator, 0.1, 1.0);
        anchor(&mut coordinator, 0.9, 3.0);
        assert!(coordinator.create_condition(1.5));
        assert!(!coordinator.create_condition(2.0));
    }

    #[test]
    fn dominated_thread_is_pruned() {
        let mut coordinator = coordinator();
        let worse = anchor(&mut coordinator, 0.1, 3.0);
        let better = anchor(&mut coordinator, 0.2, 1.0);
        // stubs reach each other; the better thread survives
        coordinator.clean(better);
        assert_eq!(coordinator.thread_ids(), vec![0, better]);
        assert!(coordinator.thread(worse).is_none());
    }

    #[test]
    fn converged_thread_expands_region() {
        let mut coordinator = coordinator();
        let id = anchor(&mut coordinator, 0.5, 1.0);
        let before = coordinator.region().local_max["x"];
        if let Some(engine) = coordinator.threads.get_mut(&id).and_then(|t| t.local_engine_mut()) {
            engine.converged = true;
        }
        coordinator.clean(id);
        assert!(coordinator.thread(id).is_none());
        assert!((coordinator.region().local_max["x"] - (before + 0.1)).abs() < 1e-12);
    }

    #[test]
    fn selection_prefers_fastest_local_thread() {
        let mut coordinator = coordinator();
        let slow = anchor(&mut coordinator, 0.1, 2.0);
        let fast = anchor(&mut coordinator, 0.9, 2.0);
        coordinator.threads.get_mut(&slow).unwrap().speed = 0.1;
        coordinator.threads.get_mut(&fast).unwrap().speed = 1.0;
        coordinator.metric_target = 1.0;
        let (top, backup) = coordinator.select_thread();
        assert_eq!(top, fast);
        assert_eq!(backup, fast);
    }

    #[test]
    fn cfo_selects_the_local_thread() {
        let space = SearchSpace::new().add_float("x", 0.0, 1.0);
        let local = StubLocal::new(space, Config::new().with("x", 0.5));
        let mut coordinator: Coordinator = SearchCoordinator::cfo(
            SchedulerConfig::new("loss", ObjectiveDirection::Minimize),
            local,
            Box::new(TracingSink),
        )
        .unwrap();
        assert_eq!(coordinator.select_thread(), (0, 0));
        let id = anchor(&mut coordinator, 0.5, 1.0);
        assert_eq!(coordinator.select_thread(), (id, id));
    }
}
