//! Blended local/global configuration search for BlendTune.
//!
//! Provides:
//! - A coordinator running several search threads over one space, either
//!   blending a global search with local ones or running a single local
//!   search (CFO)
//! - Deduplication of proposals and admissible-region checks on global ones
//! - Config constraints (skip before running) and metric constraints
//!   (penalized objective)
//! - Versioned JSON snapshots of the whole search state
//! - Typed diagnostics events delivered to a pluggable sink

pub mod constraints;
pub mod coordinator;
pub mod diagnostics;
pub mod region;
pub mod settings;
pub mod shared;
pub mod strategy;
pub mod thread;

#[cfg(test)]
mod testing;

pub use constraints::{ConfigConstraint, ConstraintOp, MetricConstraint};
pub use coordinator::{BlendSearch, CachedResult, CoordinatorSnapshot, SearchCoordinator, TrialTicket, SNAPSHOT_VERSION};
pub use diagnostics::{ChannelSink, DiagnosticsSink, RemovalReason, SearchEvent, Severity, TracingSink};
pub use region::AdmissibleRegion;
pub use settings::{SchedulerConfig, SearchProperties};
pub use shared::SharedCoordinator;
pub use strategy::{CandidateStartPoints, StrategyKind};
pub use thread::SearchThread;
