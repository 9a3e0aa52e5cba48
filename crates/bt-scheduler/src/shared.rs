//! A coordinator shared between runner threads.

use std::path::Path;
use std::sync::Arc;

use bt_search::{GlobalSearch, LocalSearch};
use bt_types::{Config, ObjectiveDirection, Record, TrialId, TuneResult};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::coordinator::SearchCoordinator;
use crate::settings::SearchProperties;

/// Cloneable handle serializing every call into one [`SearchCoordinator`].
pub struct SharedCoordinator<L, G> {
    inner: Arc<Mutex<SearchCoordinator<L, G>>>,
}

impl<L, G> Clone for SharedCoordinator<L, G> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L, G> SharedCoordinator<L, G>
where
    L: LocalSearch,
    G: GlobalSearch,
{
    pub fn new(coordinator: SearchCoordinator<L, G>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(coordinator)),
        }
    }

    pub fn suggest(&self, trial_id: &TrialId) -> TuneResult<Option<Config>> {
        self.inner.lock().suggest(trial_id)
    }

    pub fn on_trial_result(&self, trial_id: &TrialId, result: Record) {
        self.inner.lock().on_trial_result(trial_id, result);
    }

    pub fn on_trial_complete(&self, trial_id: &TrialId, result: Option<Record>, error: bool) {
        self.inner.lock().on_trial_complete(trial_id, result, error);
    }

    pub fn set_search_properties(
        &self,
        metric: Option<&str>,
        mode: Option<ObjectiveDirection>,
        properties: Option<SearchProperties>,
    ) -> TuneResult<bool> {
        self.inner.lock().set_search_properties(metric, mode, properties)
    }

    pub fn update_search_space(&self, spec: &serde_json::Value) -> TuneResult<()> {
        self.inner.lock().update_search_space(spec)
    }

    /// Run `f` with exclusive access, e.g. to read several statistics
    /// consistently.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut SearchCoordinator<L, G>) -> R) -> R {
        f(&mut self.inner.lock())
    }
}

impl<L, G> SharedCoordinator<L, G>
where
    L: LocalSearch + Clone + Serialize + DeserializeOwned,
    G: GlobalSearch + Clone + Serialize + DeserializeOwned,
{
    pub fn save(&self, path: impl AsRef<Path>) -> TuneResult<()> {
        self.inner.lock().save(path)
    }

    pub fn restore(&self, path: impl AsRef<Path>) -> TuneResult<()> {
        self.inner.lock().restore(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::BlendSearch;
    use crate::diagnostics::TracingSink;
    use crate::settings::SchedulerConfig;
    use bt_types::SearchSpace;
    use std::collections::BTreeSet;

    #[test]
    fn concurrent_runners_never_share_a_config() {
        let space = SearchSpace::new()
            .add_float("x", 0.0, 10.0)
            .add_float("y", 0.0, 10.0);
        let config = SchedulerConfig::new("loss", ObjectiveDirection::Minimize);
        let shared = SharedCoordinator::new(BlendSearch::blend_search(config, space, Box::new(TracingSink)).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let shared = shared.clone();
                std::thread::spawn(move || {
                    let mut proposed = Vec::new();
                    for i in 0..25 {
                        let id = TrialId::new(format!("w{worker}-{i}"));
                        let Some(config) = shared.suggest(&id).unwrap() else {
                            continue;
                        };
                        let x = config.get("x").and_then(|v| v.as_f64()).unwrap_or(0.0);
                        let y = config.get("y").and_then(|v| v.as_f64()).unwrap_or(0.0);
                        let record = Record::for_config(&config)
                            .with_metric("loss", (x - 3.0).powi(2) + (y - 7.0).powi(2))
                            .with_metric("time_total_s", 0.1);
                        shared.on_trial_complete(&id, Some(record), false);
                        proposed.push(config.signature());
                    }
                    proposed
                })
            })
            .collect();

        let mut seen = BTreeSet::new();
        for handle in handles {
            for signature in handle.join().unwrap() {
                assert!(seen.insert(signature), "config proposed twice");
            }
        }
        assert!(!seen.is_empty());
        assert!(shared.with_lock(|c| c.num_threads()) >= 1);
    }
}
