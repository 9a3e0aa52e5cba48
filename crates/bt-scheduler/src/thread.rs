//! Search threads: the global slot and the local searches competing with it.
//!
//! A thread is a scheduling unit, not an OS thread. It wraps one engine and
//! keeps the statistics the coordinator ranks threads by: best and
//! second-best objectives, the cost spent reaching them, the resulting
//! improvement speed and the estimated cost for improvement (ECI).

use bt_search::{GlobalSearch, LocalSearch};
use bt_types::{Config, ObjectiveDirection, Record, TrialId};
use serde::{Deserialize, Serialize};

/// Default lower bound on the cost denominator of the speed estimate.
pub const DEFAULT_EPS: f64 = 1.0;

/// `max(min(budget / 2, 1), 1e-9)`.
pub fn eps_for_budget(time_budget_s: f64) -> f64 {
    (time_budget_s / 2.0).min(1.0).max(1e-9)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ThreadEngine<L, G> {
    /// Slot 0. Vacuous when the strategy has no global search.
    Global(Option<G>),
    Local(L),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchThread<L, G> {
    engine: ThreadEngine<L, G>,
    objective_key: String,
    direction: ObjectiveDirection,
    cost_attr: String,

    #[serde(with = "bt_types::float")]
    pub(crate) priority: f64,
    #[serde(with = "bt_types::float")]
    pub(crate) eci: f64,
    #[serde(with = "bt_types::float")]
    pub(crate) speed: f64,
    /// Best sign-adjusted objective.
    #[serde(with = "bt_types::float")]
    pub(crate) obj_best1: f64,
    /// Objective the best one improved upon.
    #[serde(with = "bt_types::float")]
    pub(crate) obj_best2: f64,
    pub(crate) cost_best: f64,
    pub(crate) cost_best1: f64,
    pub(crate) cost_best2: f64,
    pub(crate) cost_last: f64,
    pub(crate) cost_total: f64,
    pub(crate) running: usize,
    best_result: Option<Record>,
}

impl<L, G> SearchThread<L, G>
where
    L: LocalSearch,
    G: GlobalSearch,
{
    pub fn global(engine: Option<G>, objective_key: &str, direction: ObjectiveDirection, cost_attr: &str) -> Self {
        Self::with_stats(ThreadEngine::Global(engine), objective_key, direction, cost_attr, f64::INFINITY, 0.0)
    }

    pub fn local(engine: L, cost_attr: &str) -> Self {
        let objective_key = engine.objective_key().to_string();
        let direction = engine.direction();
        let best = engine.best_objective();
        let cost = engine.incumbent_cost();
        Self::with_stats(ThreadEngine::Local(engine), &objective_key, direction, cost_attr, best, cost)
    }

    fn with_stats(
        engine: ThreadEngine<L, G>,
        objective_key: &str,
        direction: ObjectiveDirection,
        cost_attr: &str,
        obj_best: f64,
        cost: f64,
    ) -> Self {
        Self {
            engine,
            objective_key: objective_key.to_string(),
            direction,
            cost_attr: cost_attr.to_string(),
            priority: 0.0,
            eci: cost,
            speed: 0.0,
            obj_best1: obj_best,
            obj_best2: obj_best,
            cost_best: cost,
            cost_best1: cost,
            cost_best2: 0.0,
            cost_last: cost,
            cost_total: cost,
            running: 0,
            best_result: None,
        }
    }

    pub fn engine(&self) -> &ThreadEngine<L, G> {
        &self.engine
    }

    pub fn is_global(&self) -> bool {
        matches!(self.engine, ThreadEngine::Global(_))
    }

    pub fn local_engine(&self) -> Option<&L> {
        match &self.engine {
            ThreadEngine::Local(engine) => Some(engine),
            ThreadEngine::Global(_) => None,
        }
    }

    pub fn priority(&self) -> f64 {
        self.priority
    }

    pub fn eci(&self) -> f64 {
        self.eci
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn obj_best1(&self) -> f64 {
        self.obj_best1
    }

    pub fn obj_best2(&self) -> f64 {
        self.obj_best2
    }

    pub fn cost_total(&self) -> f64 {
        self.cost_total
    }

    pub fn running(&self) -> usize {
        self.running
    }

    /// Record that improved `obj_best1` last.
    pub fn best_result(&self) -> Option<&Record> {
        self.best_result.as_ref()
    }

    pub(crate) fn global_engine_mut(&mut self) -> Option<&mut G> {
        match &mut self.engine {
            ThreadEngine::Global(engine) => engine.as_mut(),
            ThreadEngine::Local(_) => None,
        }
    }

    pub(crate) fn into_global(self) -> Option<G> {
        match self.engine {
            ThreadEngine::Global(engine) => engine,
            ThreadEngine::Local(_) => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn local_engine_mut(&mut self) -> Option<&mut L> {
        match &mut self.engine {
            ThreadEngine::Local(engine) => Some(engine),
            ThreadEngine::Global(_) => None,
        }
    }

    pub(crate) fn mark_running(&mut self) {
        self.running += 1;
    }

    pub fn suggest(&mut self, trial_id: &TrialId) -> Option<Config> {
        let config = match &mut self.engine {
            ThreadEngine::Global(Some(engine)) => engine.suggest(trial_id),
            ThreadEngine::Global(None) => None,
            ThreadEngine::Local(engine) => engine.suggest(trial_id),
        };
        if config.is_some() {
            self.running += 1;
        }
        config
    }

    /// Projected improvement within `eci`, net of the best objective.
    pub fn update_priority(&mut self, eci: f64) {
        self.priority = eci * self.speed - self.obj_best1;
    }

    /// Estimated cost to improve on `metric_target`, given the fastest
    /// thread's speed as a fallback for threads without one.
    pub fn update_eci(&mut self, metric_target: f64, max_speed: f64) {
        let best_obj = metric_target * self.direction.metric_op();
        if self.speed == 0.0 {
            self.speed = max_speed;
        }
        self.eci = (self.cost_total - self.cost_best1).max(self.cost_best1 - self.cost_best2);
        if self.obj_best1 > best_obj && self.speed > 0.0 {
            self.eci = self.eci.max(2.0 * (self.obj_best1 - best_obj) / self.speed);
        }
    }

    fn update_speed(&mut self, eps: f64) {
        if self.obj_best2 > self.obj_best1 {
            // unfinished trials discount the speed
            self.speed = (self.obj_best2 - self.obj_best1)
                / self.running.max(1) as f64
                / (self.cost_total - self.cost_best2).max(eps);
        } else {
            self.speed = 0.0;
        }
    }

    pub fn on_trial_result(&mut self, trial_id: &TrialId, result: &Record) {
        match &mut self.engine {
            ThreadEngine::Global(None) => return,
            ThreadEngine::Global(Some(engine)) => engine.on_trial_result(trial_id, result),
            ThreadEngine::Local(engine) => engine.on_trial_result(trial_id, result),
        }
        if let Some(obj) = result.metric(&self.objective_key) {
            let obj = obj * self.direction.metric_op();
            if obj < self.obj_best1 {
                self.cost_best1 = self.cost_total;
                self.obj_best1 = obj;
            }
        }
    }

    pub fn on_trial_complete(&mut self, trial_id: &TrialId, result: Option<&Record>, error: bool, eps: f64) {
        match &mut self.engine {
            ThreadEngine::Global(None) => return,
            ThreadEngine::Global(Some(engine)) => engine.on_trial_complete(trial_id, result, error),
            ThreadEngine::Local(engine) => engine.on_trial_complete(trial_id, result, error),
        }
        if let Some(result) = result.filter(|r| !r.is_empty()) {
            self.cost_last = result.metric(&self.cost_attr).unwrap_or(1.0);
            self.cost_total += self.cost_last;
            if let Some(obj) = result.metric(&self.objective_key) {
                let obj = obj * self.direction.metric_op();
                if obj < self.obj_best1 {
                    self.cost_best2 = self.cost_best1;
                    self.cost_best1 = self.cost_total;
                    self.obj_best2 = if self.obj_best1.is_infinite() { obj } else { self.obj_best1 };
                    self.obj_best1 = obj;
                    self.cost_best = self.cost_last;
                    self.best_result = Some(result.clone());
                }
            }
            self.update_speed(eps);
        }
        self.running = self.running.saturating_sub(1);
    }

    pub fn converged(&self) -> bool {
        match &self.engine {
            ThreadEngine::Local(engine) => engine.converged(),
            ThreadEngine::Global(_) => false,
        }
    }

    pub fn can_suggest(&self) -> bool {
        match &self.engine {
            ThreadEngine::Local(engine) => engine.can_suggest(),
            ThreadEngine::Global(engine) => engine.is_some(),
        }
    }

    pub fn resource(&self) -> Option<f64> {
        match &self.engine {
            ThreadEngine::Local(engine) => engine.resource(),
            ThreadEngine::Global(_) => None,
        }
    }

    /// Whether this thread's search can reach the incumbent of `other`.
    pub fn reach(&self, other: &Self) -> bool {
        match (&self.engine, &other.engine) {
            (ThreadEngine::Local(a), ThreadEngine::Local(b)) => a.reach(b),
            _ => false,
        }
    }

    /// Whether `other` makes this thread redundant: this thread's best does
    /// not beat the objective `other` improved upon, its resource is not
    /// smaller, and `other` reaches it.
    pub fn is_inferior_to(&self, other: &Self) -> bool {
        if self.obj_best1 < other.obj_best2 {
            return false;
        }
        if let (Some(mine), Some(theirs)) = (self.resource(), other.resource()) {
            if mine > 0.0 && mine < theirs {
                return false;
            }
        }
        other.reach(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StubGlobal, StubLocal};

    type Thread = SearchThread<StubLocal, StubGlobal>;

    fn local(best: f64) -> Thread {
        SearchThread::local(StubLocal::anchored(best), "time_total_s")
    }

    fn complete(thread: &mut Thread, id: &str, loss: f64, cost: f64) {
        let record = Record::new().with_metric("loss", loss).with_metric("time_total_s", cost);
        thread.on_trial_complete(&TrialId::from(id), Some(&record), false, DEFAULT_EPS);
    }

    #[test]
    fn better_best_escapes_domination() {
        let mut a = local(2.0);
        let mut b = local(1.0);
        b.obj_best2 = 3.0;
        a.obj_best2 = 4.0;
        // b reaches a, but a's best beats the objective b improved upon
        assert!(b.reach(&a));
        assert!(!a.is_inferior_to(&b));

        b.obj_best2 = 1.5;
        assert!(a.is_inferior_to(&b));
    }

    #[test]
    fn smaller_resource_escapes_domination() {
        let mut a = SearchThread::<_, StubGlobal>::local(StubLocal::anchored(5.0).with_resource(10.0), "time_total_s");
        let b = SearchThread::<_, StubGlobal>::local(StubLocal::anchored(1.0).with_resource(100.0), "time_total_s");
        a.obj_best1 = 5.0;
        assert!(!a.is_inferior_to(&b));
    }

    #[test]
    fn completions_track_best_and_speed() {
        let mut thread = local(f64::INFINITY);
        thread.mark_running();
        complete(&mut thread, "a", 4.0, 2.0);
        assert_eq!(thread.obj_best1(), 4.0);
        assert_eq!(thread.obj_best2(), 4.0);
        assert_eq!(thread.speed(), 0.0);

        thread.mark_running();
        complete(&mut thread, "b", 3.0, 2.0);
        assert_eq!(thread.obj_best1(), 3.0);
        assert_eq!(thread.obj_best2(), 4.0);
        // (4 - 3) / 1 running / (4 total - 2 at previous best)
        assert!((thread.speed() - 0.5).abs() < 1e-12);
        assert_eq!(thread.running(), 0);
        assert_eq!(thread.cost_total(), 4.0);
        assert!(thread.best_result().is_some());
    }

    #[test]
    fn eci_and_priority() {
        let mut thread = local(f64::INFINITY);
        thread.mark_running();
        complete(&mut thread, "a", 4.0, 2.0);
        thread.mark_running();
        complete(&mut thread, "b", 3.0, 2.0);

        thread.update_eci(1.0, 0.5);
        // max(4 - 4, 4 - 2) vs 2 * (3 - 1) / 0.5
        assert!((thread.eci() - 8.0).abs() < 1e-12);
        thread.update_priority(8.0);
        assert!((thread.priority() - (8.0 * 0.5 - 3.0)).abs() < 1e-12);
    }

    #[test]
    fn vacuous_global_slot_is_inert() {
        let mut slot: Thread = SearchThread::global(None, "loss", ObjectiveDirection::Minimize, "time_total_s");
        assert!(!slot.can_suggest());
        assert_eq!(slot.suggest(&TrialId::from("t")), None);
        complete(&mut slot, "t", 1.0, 1.0);
        assert_eq!(slot.obj_best1(), f64::INFINITY);
        assert!(!slot.converged());
        assert_eq!(slot.resource(), None);
    }

    #[test]
    fn eps_bounds() {
        assert_eq!(eps_for_budget(10.0), 1.0);
        assert_eq!(eps_for_budget(1.0), 0.5);
        assert_eq!(eps_for_budget(0.0), 1e-9);
    }
}
