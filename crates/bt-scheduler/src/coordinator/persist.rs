//! Saving and restoring coordinator state.
//!
//! A snapshot holds every piece of mutable search state, engines included,
//! as versioned JSON. Config constraints and the diagnostics sink are not
//! saved; the restoring coordinator keeps its own. Restoring validates the
//! whole snapshot before touching the live state, so a failed restore leaves
//! the coordinator as it was.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::Path;

use bt_search::{GlobalSearch, LocalSearch};
use bt_types::{Config, ObjectiveDirection, Signature, SnapshotError, TrialId, TuneResult};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{objective_key_for, CachedResult, SearchCoordinator, TrialTicket};
use crate::constraints::{ConstraintState, MetricConstraint};
use crate::diagnostics::SearchEvent;
use crate::region::AdmissibleRegion;
use crate::strategy::{CandidateStartPoints, StrategyKind};
use crate::thread::SearchThread;

/// Format version written into every snapshot.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorSnapshot<L, G> {
    pub version: u32,
    pub strategy: StrategyKind,
    pub saved_at: DateTime<Utc>,
    pub metric: String,
    pub direction: ObjectiveDirection,
    pub cost_attr: String,
    #[serde(with = "bt_types::float")]
    pub metric_target: f64,
    pub local: L,
    pub threads: BTreeMap<usize, SearchThread<L, G>>,
    pub thread_count: usize,
    pub init_used: bool,
    pub trial_proposed_by: BTreeMap<TrialId, TrialTicket>,
    pub region: AdmissibleRegion,
    pub results: BTreeMap<Signature, CachedResult>,
    pub deadline: Option<DateTime<Utc>>,
    pub eps: f64,
    pub points_to_evaluate: VecDeque<Config>,
    pub metric_constraints: Vec<MetricConstraint>,
    pub constraint_state: ConstraintState,
    pub candidates: Option<CandidateStartPoints>,
}

fn corrupt(message: impl Into<String>) -> SnapshotError {
    SnapshotError::Corrupt {
        message: message.into(),
    }
}

impl<L, G> CoordinatorSnapshot<L, G>
where
    L: LocalSearch,
    G: GlobalSearch,
{
    /// Structural checks a well-formed snapshot always passes.
    fn check(&self) -> Result<(), SnapshotError> {
        match self.threads.get(&0) {
            Some(slot) if slot.is_global() => {}
            _ => return Err(corrupt("slot 0 must hold the global search")),
        }
        if let Some(id) = self.threads.iter().find(|(id, t)| **id != 0 && t.is_global()).map(|(id, _)| id) {
            return Err(corrupt(format!("thread {id} is not a local search")));
        }
        if self.strategy == StrategyKind::Cfo && self.threads.len() > 2 {
            return Err(corrupt(format!("CFO snapshot holds {} threads", self.threads.len())));
        }
        if let Some(max_id) = self.threads.keys().next_back() {
            if *max_id >= self.thread_count {
                return Err(corrupt(format!(
                    "thread id {max_id} is not below the thread counter {}",
                    self.thread_count
                )));
            }
        }
        if self.constraint_state.penalties.len() != self.metric_constraints.len() {
            return Err(corrupt("penalty count does not match the metric constraints"));
        }
        Ok(())
    }
}

impl<L, G> SearchCoordinator<L, G>
where
    L: LocalSearch + Clone + Serialize + DeserializeOwned,
    G: GlobalSearch + Clone + Serialize + DeserializeOwned,
{
    pub fn snapshot(&self) -> CoordinatorSnapshot<L, G> {
        CoordinatorSnapshot {
            version: SNAPSHOT_VERSION,
            strategy: self.strategy,
            saved_at: Utc::now(),
            metric: self.metric.clone(),
            direction: self.direction,
            cost_attr: self.cost_attr.clone(),
            metric_target: self.metric_target,
            local: self.local.clone(),
            threads: self.threads.clone(),
            thread_count: self.thread_count,
            init_used: self.init_used,
            trial_proposed_by: self.trial_proposed_by.clone(),
            region: self.region.clone(),
            results: self.results.clone(),
            deadline: self.deadline,
            eps: self.eps,
            points_to_evaluate: self.points_to_evaluate.clone(),
            metric_constraints: self.metric_constraints.clone(),
            constraint_state: self.constraint_state.clone(),
            candidates: self.candidates.clone(),
        }
    }

    /// Write the full search state to `path` as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> TuneResult<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        fs::write(path, json)?;
        self.sink.emit(SearchEvent::SnapshotSaved {
            path: path.display().to_string(),
        });
        Ok(())
    }

    /// Replace the search state with the snapshot at `path`.
    ///
    /// The snapshot must come from a coordinator of the same strategy and
    /// format version.
    pub fn restore(&mut self, path: impl AsRef<Path>) -> TuneResult<()> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SnapshotError::NotFound {
                path: path.display().to_string(),
            }
            .into());
        }
        let text = fs::read_to_string(path)?;
        let value: serde_json::Value = serde_json::from_str(&text).map_err(|e| corrupt(e.to_string()))?;

        let found = value
            .get("version")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| corrupt("missing version"))?;
        if found != u64::from(SNAPSHOT_VERSION) {
            return Err(SnapshotError::VersionMismatch {
                expected: SNAPSHOT_VERSION,
                found: u32::try_from(found).unwrap_or(u32::MAX),
            }
            .into());
        }

        let snapshot: CoordinatorSnapshot<L, G> =
            serde_json::from_value(value).map_err(|e| corrupt(e.to_string()))?;
        if snapshot.strategy != self.strategy {
            return Err(SnapshotError::StrategyMismatch {
                expected: self.strategy.to_string(),
                found: snapshot.strategy.to_string(),
            }
            .into());
        }
        snapshot.check()?;

        info!(
            "Restoring {} search saved at {} with {} threads",
            snapshot.strategy,
            snapshot.saved_at,
            snapshot.threads.len()
        );
        self.objective_key = objective_key_for(&snapshot.metric, !snapshot.metric_constraints.is_empty());
        self.metric = snapshot.metric;
        self.direction = snapshot.direction;
        self.cost_attr = snapshot.cost_attr;
        self.metric_target = snapshot.metric_target;
        self.local = snapshot.local;
        self.threads = snapshot.threads;
        self.thread_count = snapshot.thread_count;
        self.init_used = snapshot.init_used;
        self.trial_proposed_by = snapshot.trial_proposed_by;
        self.region = snapshot.region;
        self.results = snapshot.results;
        self.deadline = snapshot.deadline;
        self.eps = snapshot.eps;
        self.points_to_evaluate = snapshot.points_to_evaluate;
        self.metric_constraints = snapshot.metric_constraints;
        self.constraint_state = snapshot.constraint_state;
        self.candidates = snapshot.candidates;
        self.sink.emit(SearchEvent::SnapshotRestored {
            path: path.display().to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::BlendSearch;
    use super::*;
    use crate::diagnostics::TracingSink;
    use crate::settings::SchedulerConfig;
    use bt_types::{Record, SearchSpace, TuneError};
    use tempfile::TempDir;

    fn space() -> SearchSpace {
        SearchSpace::new()
            .add_float("x", -5.0, 5.0)
            .add_int("depth", 1, 12)
            .add_choice("booster", vec!["gbtree".into(), "dart".into()])
    }

    fn settings() -> SchedulerConfig {
        SchedulerConfig::new("loss", ObjectiveDirection::Minimize)
            .with_low_cost_partial_config(Config::new().with("depth", 1i64))
    }

    fn loss(config: &Config) -> f64 {
        let x = config.get("x").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let depth = config.get("depth").and_then(|v| v.as_f64()).unwrap_or(1.0);
        (x - 1.0).powi(2) + (depth - 6.0).abs() / 10.0
    }

    fn step(coordinator: &mut BlendSearch, id: String) -> Option<Config> {
        let id = TrialId::new(id);
        let config = coordinator.suggest(&id).unwrap()?;
        let record = Record::for_config(&config)
            .with_metric("loss", loss(&config))
            .with_metric("time_total_s", 1.0);
        coordinator.on_trial_complete(&id, Some(record), false);
        Some(config)
    }

    #[test]
    fn restored_coordinator_continues_identically() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("search.json");

        let mut original = BlendSearch::blend_search(settings(), space(), Box::new(TracingSink)).unwrap();
        for i in 0..15 {
            step(&mut original, format!("t{i}"));
        }
        original.save(&path).unwrap();

        let mut restored = BlendSearch::blend_search(settings(), space(), Box::new(TracingSink)).unwrap();
        restored.restore(&path).unwrap();
        assert_eq!(restored.thread_ids(), original.thread_ids());
        assert_eq!(restored.metric_target(), original.metric_target());

        for i in 15..40 {
            let a = step(&mut original, format!("t{i}"));
            let b = step(&mut restored, format!("t{i}"));
            assert_eq!(a, b);
        }
    }

    #[test]
    fn failed_restores_leave_state_untouched() {
        let dir = TempDir::new().unwrap();
        let mut coordinator = BlendSearch::blend_search(settings(), space(), Box::new(TracingSink)).unwrap();
        for i in 0..5 {
            step(&mut coordinator, format!("t{i}"));
        }
        let before = serde_json::to_value(coordinator.snapshot().threads).unwrap();
        let target = coordinator.metric_target();

        let missing = dir.path().join("missing.json");
        assert!(matches!(
            coordinator.restore(&missing),
            Err(TuneError::Snapshot(SnapshotError::NotFound { .. }))
        ));

        let garbage = dir.path().join("garbage.json");
        fs::write(&garbage, "{not json").unwrap();
        assert!(matches!(
            coordinator.restore(&garbage),
            Err(TuneError::Snapshot(SnapshotError::Corrupt { .. }))
        ));

        let saved = dir.path().join("saved.json");
        coordinator.save(&saved).unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&saved).unwrap()).unwrap();
        value["version"] = serde_json::json!(SNAPSHOT_VERSION + 1);
        let future = dir.path().join("future.json");
        fs::write(&future, value.to_string()).unwrap();
        assert!(matches!(
            coordinator.restore(&future),
            Err(TuneError::Snapshot(SnapshotError::VersionMismatch { found: 2, .. }))
        ));

        let mut cfo = BlendSearch::cfo_search(settings(), space(), Box::new(TracingSink)).unwrap();
        assert!(matches!(
            cfo.restore(&saved),
            Err(TuneError::Snapshot(SnapshotError::StrategyMismatch { .. }))
        ));

        let mut value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&saved).unwrap()).unwrap();
        value["threads"].as_object_mut().unwrap().remove("0");
        let headless = dir.path().join("headless.json");
        fs::write(&headless, value.to_string()).unwrap();
        assert!(matches!(
            coordinator.restore(&headless),
            Err(TuneError::Snapshot(SnapshotError::Corrupt { .. }))
        ));

        assert_eq!(serde_json::to_value(coordinator.snapshot().threads).unwrap(), before);
        assert_eq!(coordinator.metric_target(), target);
    }
}
