//! Failed-sync memory, event tracker, and API call tracker
//! (`SPEC_FULL.md` §4.3, §4.5, §4.9 — components C3, C5, C9).

pub mod call_tracker;
pub mod event_tracker;
pub mod failure_memory;
pub mod notifier;

pub use call_tracker::{ApiCallTracker, RecentFilters};
pub use event_tracker::{AuditLog, EventTracker};
pub use failure_memory::FailureMemory;
pub use notifier::{LoggingNotifier, Notifier};
