//! Rate-limited HTTP client pool (`SPEC_FULL.md` §4.1, component C1): one
//! client per external service, sharing a common middleware chain.

pub mod client;
pub mod graph;
pub mod rate_limiter;
pub mod safetyamp;
pub mod samsara;

pub use client::{flatten_tree, HttpClient, RetryPolicy};
pub use graph::GraphClient;
pub use safetyamp::SafetyAmpClient;
pub use samsara::SamsaraClient;
