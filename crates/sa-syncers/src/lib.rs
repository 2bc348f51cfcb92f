//! Per-entity syncers (`SPEC_FULL.md` §4.6, component C6): fetch, transform,
//! diff, and write for each entity family.
//!
//! Every syncer shares the contract in [`Syncer`] and the consecutive-error
//! safety stop in [`SafetyStop`]. Construction-time dependencies are passed
//! explicitly (`SPEC_FULL.md` §9: "global singletons -> explicit
//! dependencies") rather than reached for through statics.

pub mod department;
mod diff;
pub mod employee;
pub mod job_site;
pub mod title;
pub mod vehicle;

use async_trait::async_trait;
use sa_cache::TieredCacheStore;
use sa_core::models::SessionSummary;
use sa_core::Result;
use sa_tracking::{ApiCallTracker, EventTracker, FailureMemory};
use std::sync::Arc;

/// Shared, construction-time handles every syncer depends on.
pub struct SyncDeps {
    pub cache: Arc<TieredCacheStore>,
    pub events: Arc<EventTracker>,
    pub failures: Arc<FailureMemory>,
    pub calls: Arc<ApiCallTracker>,
}

/// Per-syncer consecutive-error circuit breaker (`SPEC_FULL.md` §4.6 step 4).
pub struct SafetyStop {
    threshold: u32,
    consecutive: u32,
}

impl SafetyStop {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            consecutive: 0,
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    /// Returns true once the threshold is reached — the caller must abort
    /// the run and emit a `safety_stop` error event.
    pub fn record_error(&mut self) -> bool {
        self.consecutive += 1;
        self.consecutive >= self.threshold
    }
}

pub const DEFAULT_SAFETY_STOP_THRESHOLD: u32 = 10;

#[async_trait]
pub trait Syncer {
    fn entity_type(&self) -> &'static str;

    /// Fetch, transform, diff, and write every row for this entity family.
    /// Returns the session summary for the session this syncer ran (one
    /// session per syncer invocation, per invariant (iv)).
    async fn sync(&self) -> Result<SessionSummary>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safety_stop_trips_at_threshold() {
        let mut stop = SafetyStop::new(3);
        assert!(!stop.record_error());
        assert!(!stop.record_error());
        assert!(stop.record_error());
    }

    #[test]
    fn safety_stop_resets_on_success() {
        let mut stop = SafetyStop::new(3);
        stop.record_error();
        stop.record_error();
        stop.record_success();
        assert!(!stop.record_error());
    }
}
