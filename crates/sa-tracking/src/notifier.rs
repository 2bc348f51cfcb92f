//! Error notification delivery seam (`SPEC_FULL.md` §4.5).
//!
//! SMTP delivery itself is out of scope (§1) — [`Notifier`] is the trait
//! point an operator wires a real mailer into. [`LoggingNotifier`] is the
//! default: it just logs what would have been sent, so the hourly
//! rate-limiting logic in [`crate::EventTracker`] is exercised without a
//! live SMTP dependency.

use async_trait::async_trait;
use sa_core::models::ErrorLogEntry;
use sa_core::Result;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, errors: &[ErrorLogEntry]) -> Result<()>;
}

#[derive(Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, errors: &[ErrorLogEntry]) -> Result<()> {
        tracing::warn!(count = errors.len(), "hourly error notification (logging-only notifier)");
        for e in errors {
            tracing::warn!(
                entity_type = %e.entity_type,
                entity_id = %e.entity_id,
                error_type = %e.error_type,
                message = %e.error_message,
                "unsent notification detail"
            );
        }
        Ok(())
    }
}
