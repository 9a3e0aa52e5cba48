//! # bt-search
//!
//! Search engines plugged into the BlendTune scheduler: the [`LocalSearch`]
//! and [`GlobalSearch`] interfaces, a cost-frugal local search and a seeded
//! random global search.

pub mod frugal;
pub mod random;
pub mod rng;
pub mod traits;

pub use frugal::{FrugalLocalSearch, ResourceSchedule, DEFAULT_COST_ATTR, STEPSIZE};
pub use random::RandomGlobalSearch;
pub use rng::SearchRng;
pub use traits::{GlobalSearch, LocalSearch};
