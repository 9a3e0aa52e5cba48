//! Seeded uniform sampling over the whole space.

use bt_types::{Config, ObjectiveDirection, SearchSpace, TrialId};
use serde::{Deserialize, Serialize};

use crate::rng::SearchRng;
use crate::traits::GlobalSearch;

/// Uniform random search; every suggestion is an independent sample and
/// results are never consulted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomGlobalSearch {
    space: SearchSpace,
    rng: SearchRng,
}

impl RandomGlobalSearch {
    pub fn new(space: SearchSpace, seed: u64) -> Self {
        Self {
            space,
            rng: SearchRng::seed_from_u64(seed),
        }
    }

    fn sample_one(&mut self) -> Config {
        let mut config = Config::new();
        for param in &self.space.parameters {
            let value = param.kind.sample(&mut self.rng);
            config.insert(param.name.clone(), value);
        }
        config
    }
}

impl GlobalSearch for RandomGlobalSearch {
    fn suggest(&mut self, _trial_id: &TrialId) -> Option<Config> {
        if self.space.is_empty() {
            return None;
        }
        Some(self.sample_one())
    }

    /// Sampling ignores results, so the objective is irrelevant.
    fn set_objective(&mut self, _key: &str, _direction: ObjectiveDirection) {}

    fn set_space(&mut self, space: SearchSpace) {
        self.space = space;
    }

    fn name(&self) -> &str {
        "random"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> SearchSpace {
        SearchSpace::new()
            .add_float("x", -1.0, 1.0)
            .add_int("depth", 2, 8)
    }

    #[test]
    fn same_seed_same_sequence() {
        let mut a = RandomGlobalSearch::new(space(), 10);
        let mut b = RandomGlobalSearch::new(space(), 10);
        for i in 0..10 {
            let id = TrialId::new(format!("t{i}"));
            assert_eq!(a.suggest(&id), b.suggest(&id));
        }
    }

    #[test]
    fn samples_every_dimension() {
        let mut search = RandomGlobalSearch::new(space(), 1);
        let config = search.suggest(&TrialId::from("t")).unwrap();
        assert_eq!(config.len(), 2);
        let x = config.get("x").and_then(|v| v.as_f64()).unwrap();
        assert!((-1.0..=1.0).contains(&x));
    }

    #[test]
    fn empty_space_yields_nothing() {
        let mut search = RandomGlobalSearch::new(SearchSpace::new(), 1);
        assert_eq!(search.suggest(&TrialId::from("t")), None);
        search.set_space(space());
        assert!(search.suggest(&TrialId::from("t")).is_some());
        assert_eq!(search.name(), "random");
    }

    #[test]
    fn objective_does_not_change_the_sequence() {
        let mut plain = RandomGlobalSearch::new(space(), 3);
        let mut retargeted = RandomGlobalSearch::new(space(), 3);
        retargeted.set_objective("accuracy", ObjectiveDirection::Maximize);
        for i in 0..5 {
            let id = TrialId::new(format!("t{i}"));
            assert_eq!(plain.suggest(&id), retargeted.suggest(&id));
        }
    }
}
