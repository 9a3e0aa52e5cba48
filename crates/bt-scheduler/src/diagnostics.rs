//! Typed scheduler events and the sinks that receive them.

use std::fmt;

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Severity of a [`SearchEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Debug,
    Info,
    Warning,
}

/// Why a local thread left the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemovalReason {
    /// Step size fell below the space resolution.
    Converged,
    /// Another thread reaches its incumbent with a better objective.
    Dominated,
    /// Returned no proposal after converging.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SearchEvent {
    /// No low-cost partial config was supplied.
    MissingLowCostConfig,
    ThreadCreated {
        thread_id: usize,
        objective: f64,
    },
    ThreadRemoved {
        thread_id: usize,
        reason: RemovalReason,
    },
    RegionExpanded {
        step: f64,
    },
    ConfigConstraintViolated {
        constraint: String,
    },
    /// Search state re-initialised after a property change.
    SearchReset {
        reason: String,
    },
    /// A feasible trial was seen for the first time.
    ConstraintsSatisfied,
    SnapshotSaved {
        path: String,
    },
    SnapshotRestored {
        path: String,
    },
}

impl SearchEvent {
    pub fn severity(&self) -> Severity {
        match self {
            Self::MissingLowCostConfig => Severity::Warning,
            Self::ThreadCreated { .. }
            | Self::SearchReset { .. }
            | Self::ConstraintsSatisfied
            | Self::SnapshotSaved { .. }
            | Self::SnapshotRestored { .. } => Severity::Info,
            Self::ThreadRemoved { .. }
            | Self::RegionExpanded { .. }
            | Self::ConfigConstraintViolated { .. } => Severity::Debug,
        }
    }
}

impl fmt::Display for SearchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingLowCostConfig => write!(
                f,
                "No low-cost partial config given; for cost-frugal search provide low-cost values for cost-related parameters"
            ),
            Self::ThreadCreated { thread_id, objective } => {
                write!(f, "Created local thread {thread_id} at objective {objective}")
            }
            Self::ThreadRemoved { thread_id, reason } => {
                write!(f, "Removed local thread {thread_id} ({reason:?})")
            }
            Self::RegionExpanded { step } => write!(f, "Expanded admissible region by {step}"),
            Self::ConfigConstraintViolated { constraint } => {
                write!(f, "Skipped config violating constraint {constraint}")
            }
            Self::SearchReset { reason } => write!(f, "Search reset: {reason}"),
            Self::ConstraintsSatisfied => write!(f, "Found a point satisfying all metric constraints"),
            Self::SnapshotSaved { path } => write!(f, "Saved snapshot to {path}"),
            Self::SnapshotRestored { path } => write!(f, "Restored snapshot from {path}"),
        }
    }
}

/// Receiver of scheduler events, passed in at construction.
pub trait DiagnosticsSink: Send + Sync {
    fn emit(&self, event: SearchEvent);
}

/// Forwards events to `tracing` at their severity.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn emit(&self, event: SearchEvent) {
        match event.severity() {
            Severity::Warning => warn!("{}", event),
            Severity::Info => info!("{}", event),
            Severity::Debug => debug!("{}", event),
        }
    }
}

/// Sends events over a channel and logs them; a full or closed channel drops
/// the event.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<SearchEvent>,
}

impl ChannelSink {
    pub fn new(tx: Sender<SearchEvent>) -> Self {
        Self { tx }
    }
}

impl DiagnosticsSink for ChannelSink {
    fn emit(&self, event: SearchEvent) {
        TracingSink.emit(event.clone());
        let _ = self.tx.try_send(event);
    }
}
