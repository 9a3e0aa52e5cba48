//! Interfaces the scheduler requires from its search engines.

use bt_types::{Config, NormalizedPoint, ObjectiveDirection, Record, SearchSpace, Signature, TrialId};

/// A cost-frugal local search anchored at one configuration.
///
/// The scheduler keeps one instance as a template (for normalization,
/// completion and signatures) and spawns further instances with
/// [`create`](LocalSearch::create), one per local search thread.
pub trait LocalSearch: Sized {
    /// Step used to pad the admissible region and to widen it on expansion.
    fn step_size(&self) -> f64;

    fn direction(&self) -> ObjectiveDirection;

    /// `+1` when minimizing, `-1` when maximizing.
    fn metric_op(&self) -> f64 {
        self.direction().metric_op()
    }

    /// Record key the engine reads its objective from.
    fn objective_key(&self) -> &str;

    fn set_objective(&mut self, key: &str, direction: ObjectiveDirection);

    fn space(&self) -> &SearchSpace;

    fn set_space(&mut self, space: SearchSpace);

    /// The low-cost partial configuration the search starts from.
    fn init_config(&self) -> &Config;

    fn normalize(&self, config: &Config) -> NormalizedPoint;

    /// Fill the dimensions `partial` leaves open, keeping any disturbance of
    /// the given ones inside `[lower, upper]`.
    fn complete_config(
        &mut self,
        partial: &Config,
        lower: &NormalizedPoint,
        upper: &NormalizedPoint,
    ) -> Config;

    fn config_signature(&self, config: &Config) -> Signature {
        config.signature()
    }

    /// One unbiased sample from the whole space.
    fn random_config(&mut self) -> Config;

    /// Resource attribute and its minimum, when a resource schedule is active.
    fn resource_floor(&self) -> Option<(&str, f64)>;

    /// A new instance anchored at `anchor`, whose raw objective is `objective`
    /// and evaluation cost is `cost`.
    fn create(&mut self, anchor: &Config, objective: f64, cost: f64) -> Self;

    fn suggest(&mut self, trial_id: &TrialId) -> Option<Config>;

    fn on_trial_result(&mut self, trial_id: &TrialId, result: &Record);

    fn on_trial_complete(&mut self, trial_id: &TrialId, result: Option<&Record>, error: bool);

    fn converged(&self) -> bool;

    fn can_suggest(&self) -> bool;

    /// Current resource level, if a resource schedule is active.
    fn resource(&self) -> Option<f64>;

    /// Whether this search can reach the incumbent of `other`.
    fn reach(&self, other: &Self) -> bool;

    /// Best sign-adjusted objective seen so far (`+inf` before any).
    fn best_objective(&self) -> f64;

    /// Evaluation cost of the incumbent.
    fn incumbent_cost(&self) -> f64;
}

/// A search without locality bias, occupying the scheduler's global slot.
///
/// Trials the engine did not propose itself may still be reported to it; it
/// should ignore identifiers it does not know.
pub trait GlobalSearch {
    fn suggest(&mut self, trial_id: &TrialId) -> Option<Config>;

    fn on_trial_result(&mut self, _trial_id: &TrialId, _result: &Record) {}

    fn on_trial_complete(&mut self, _trial_id: &TrialId, _result: Option<&Record>, _error: bool) {}

    fn set_objective(&mut self, key: &str, direction: ObjectiveDirection);

    fn set_space(&mut self, space: SearchSpace);

    /// Human-readable engine name.
    fn name(&self) -> &str;
}
