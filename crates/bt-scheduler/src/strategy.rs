//! Strategy selection and the CFO start-point bookkeeping.

use std::fmt;

use bt_types::{Record, TrialId};
use serde::{Deserialize, Serialize};

/// Which scheduling policy a coordinator runs; fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    /// Global search plus any number of local threads.
    Blend,
    /// A single local thread and a vacuous global slot.
    Cfo,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blend => f.write_str("blend"),
            Self::Cfo => f.write_str("cfo"),
        }
    }
}

/// Results of user-given initial points, kept so the best of them can anchor
/// the local search. Iteration follows registration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateStartPoints {
    entries: Vec<(TrialId, Option<Record>)>,
    /// The live local thread was spawned from one of these points.
    pub started_from_given: bool,
    /// A local thread has been spawned from the low-cost init config.
    pub started_from_low_cost: bool,
}

fn objective(record: &Record, key: &str, metric_op: f64) -> Option<f64> {
    record.metric(key).map(|v| v * metric_op)
}

impl CandidateStartPoints {
    pub fn new(started_from_low_cost: bool) -> Self {
        Self {
            entries: Vec::new(),
            started_from_given: false,
            started_from_low_cost,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, trial_id: &TrialId) -> bool {
        self.entries.iter().any(|(id, _)| id == trial_id)
    }

    /// Track an initial point that has just been proposed.
    pub fn register(&mut self, trial_id: &TrialId) {
        if !self.contains(trial_id) {
            self.entries.push((trial_id.clone(), None));
        }
    }

    /// Store the outcome of a tracked point; unknown ids are ignored.
    pub fn record(&mut self, trial_id: &TrialId, result: Option<Record>) {
        if let Some(entry) = self.entries.iter_mut().find(|(id, _)| id == trial_id) {
            entry.1 = result;
        }
    }

    pub fn remove(&mut self, trial_id: &TrialId) -> Option<Option<Record>> {
        let pos = self.entries.iter().position(|(id, _)| id == trial_id)?;
        Some(self.entries.remove(pos).1)
    }

    /// Best sign-adjusted objective among resolved points.
    pub fn best_objective(&self, key: &str, metric_op: f64) -> Option<f64> {
        self.entries
            .iter()
            .filter_map(|(_, r)| objective(r.as_ref()?, key, metric_op))
            .reduce(f64::min)
    }

    /// Earliest resolved point with the best objective.
    pub fn best(&self, key: &str, metric_op: f64) -> Option<(&TrialId, &Record)> {
        let mut best: Option<(&TrialId, &Record, f64)> = None;
        for (id, result) in &self.entries {
            let Some(record) = result else { continue };
            let Some(obj) = objective(record, key, metric_op) else {
                continue;
            };
            if best.map_or(true, |(_, _, b)| obj < b) {
                best = Some((id, record, obj));
            }
        }
        best.map(|(id, record, _)| (id, record))
    }

    /// Drop resolved points whose objective is no better than `obj`.
    pub fn drop_no_better_than(&mut self, key: &str, metric_op: f64, obj: f64) {
        self.entries.retain(|(_, result)| {
            !matches!(result.as_ref().and_then(|r| objective(r, key, metric_op)), Some(v) if v >= obj)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points() -> CandidateStartPoints {
        let mut points = CandidateStartPoints::new(false);
        for (id, loss) in [("a", Some(3.0)), ("b", Some(1.0)), ("c", None), ("d", Some(1.0))] {
            let id = TrialId::from(id);
            points.register(&id);
            points.record(&id, loss.map(|l| Record::new().with_metric("loss", l)));
        }
        points
    }

    #[test]
    fn best_prefers_earliest_of_ties() {
        let points = points();
        let (id, _) = points.best("loss", 1.0).unwrap();
        assert_eq!(id.as_str(), "b");
        assert_eq!(points.best_objective("loss", 1.0), Some(1.0));
        // maximizing flips the ranking
        assert_eq!(points.best("loss", -1.0).unwrap().0.as_str(), "a");
    }

    #[test]
    fn drop_keeps_unresolved_and_better_points() {
        let mut points = points();
        points.drop_no_better_than("loss", 1.0, 2.0);
        assert_eq!(points.len(), 3);
        assert!(!points.contains(&TrialId::from("a")));
        assert!(points.contains(&TrialId::from("c")));

        points.drop_no_better_than("loss", 1.0, 0.5);
        assert_eq!(points.len(), 1);
        assert_eq!(points.best("loss", 1.0), None);
    }

    #[test]
    fn strategy_names() {
        assert_eq!(StrategyKind::Blend.to_string(), "blend");
        assert_eq!(StrategyKind::Cfo.to_string(), "cfo");
    }
}
