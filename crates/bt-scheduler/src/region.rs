//! Admissible regions in normalized space.
//!
//! The local box is the union of everything local threads have explored. The
//! global box starts equal to it, is relaxed by outstanding global proposals,
//! and is pulled back to the local box after every completion.

use bt_types::{Config, NormalizedPoint};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdmissibleRegion {
    pub local_min: NormalizedPoint,
    pub local_max: NormalizedPoint,
    pub global_min: NormalizedPoint,
    pub global_max: NormalizedPoint,
}

/// Widen `[min, max]` to include `point` on the tracked dimensions.
fn include(min: &mut NormalizedPoint, max: &mut NormalizedPoint, point: &NormalizedPoint) {
    for (key, lo) in min.iter_mut() {
        let Some(&value) = point.get(key) else {
            continue;
        };
        let Some(hi) = max.get_mut(key) else {
            continue;
        };
        if value > *hi {
            *hi = value;
        } else if value < *lo {
            *lo = value;
        }
    }
}

impl AdmissibleRegion {
    /// Degenerate boxes at `anchor`; its keys are the tracked dimensions.
    pub fn new(anchor: NormalizedPoint) -> Self {
        Self {
            local_min: anchor.clone(),
            local_max: anchor.clone(),
            global_min: anchor.clone(),
            global_max: anchor,
        }
    }

    pub fn update_local(&mut self, point: &NormalizedPoint) {
        include(&mut self.local_min, &mut self.local_max, point);
    }

    /// Relax the global box for a proposal still in flight.
    pub fn relax_global(&mut self, point: &NormalizedPoint) {
        include(&mut self.global_min, &mut self.global_max, point);
    }

    pub fn sync_global(&mut self) {
        self.global_min = self.local_min.clone();
        self.global_max = self.local_max.clone();
    }

    /// Grow the local box by `step` on every side.
    pub fn expand(&mut self, step: f64) {
        self.local_max.values_mut().for_each(|v| *v += step);
        self.local_min.values_mut().for_each(|v| *v -= step);
    }

    /// Whether a global proposal lies in the global box padded by `slack`.
    /// Dimensions `config` does not set are not checked.
    pub fn is_valid(&self, config: &Config, point: &NormalizedPoint, slack: f64) -> bool {
        self.global_min.iter().all(|(key, lo)| {
            if !config.contains_key(key) {
                return true;
            }
            match (point.get(key), self.global_max.get(key)) {
                (Some(value), Some(hi)) => !(value + slack < *lo || *value > hi + slack),
                _ => true,
            }
        })
    }
}
