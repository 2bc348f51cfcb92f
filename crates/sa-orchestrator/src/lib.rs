//! Orchestration loop (`SPEC_FULL.md` §4.7, component C7): the single
//! long-running worker that runs syncers in dependency order, honors the
//! distributed pause flag, and drains an operator-triggered manual queue.

use sa_cache::TieredCacheStore;
use sa_core::traits::CacheStore;
use sa_syncers::Syncer;
use sa_tracking::{EventTracker, Notifier};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const TRIGGER_QUEUE_CAPACITY: usize = 16;
const PAUSE_POLL_INTERVAL: Duration = Duration::from_secs(1);
const SYNC_WORKER_ERROR_BACKOFF: Duration = Duration::from_secs(60);

/// Which syncer(s) a manual trigger should run (`SPEC_FULL.md` §4.8
/// `trigger-sync`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncType {
    All,
    Departments,
    Jobs,
    Titles,
    Vehicles,
    Employees,
}

impl SyncType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "all" => Some(Self::All),
            "departments" => Some(Self::Departments),
            "jobs" => Some(Self::Jobs),
            "titles" => Some(Self::Titles),
            "vehicles" => Some(Self::Vehicles),
            "employees" => Some(Self::Employees),
            _ => None,
        }
    }
}

/// Bounded FIFO of manual-trigger requests. A full queue drops the oldest
/// entry rather than blocking the caller (the dashboard's `trigger-sync`
/// handler must never wait on the orchestrator).
pub struct TriggerQueue {
    items: Mutex<VecDeque<SyncType>>,
}

impl TriggerQueue {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(TRIGGER_QUEUE_CAPACITY)),
        }
    }

    pub async fn enqueue(&self, sync_type: SyncType) {
        let mut items = self.items.lock().await;
        if items.len() >= TRIGGER_QUEUE_CAPACITY {
            items.pop_front();
        }
        items.push_back(sync_type);
    }

    async fn pop(&self) -> Option<SyncType> {
        self.items.lock().await.pop_front()
    }
}

impl Default for TriggerQueue {
    fn default() -> Self {
        Self::new()
    }
}

type SharedSyncer = Arc<dyn Syncer + Send + Sync>;

/// The five entity syncers in the order the orchestrator must run them
/// (`SPEC_FULL.md` §4.7: "departments -> jobs -> titles -> vehicles ->
/// employees (employees depend on titles, clusters, and sites being
/// current)").
pub struct OrderedSyncers {
    pub departments: SharedSyncer,
    pub jobs: SharedSyncer,
    pub titles: SharedSyncer,
    pub vehicles: SharedSyncer,
    pub employees: SharedSyncer,
}

impl OrderedSyncers {
    fn for_type(&self, sync_type: SyncType) -> Option<&SharedSyncer> {
        match sync_type {
            SyncType::All => None,
            SyncType::Departments => Some(&self.departments),
            SyncType::Jobs => Some(&self.jobs),
            SyncType::Titles => Some(&self.titles),
            SyncType::Vehicles => Some(&self.vehicles),
            SyncType::Employees => Some(&self.employees),
        }
    }

    fn iter(&self) -> impl Iterator<Item = &SharedSyncer> {
        [
            &self.departments,
            &self.jobs,
            &self.titles,
            &self.vehicles,
            &self.employees,
        ]
        .into_iter()
    }
}

pub struct Orchestrator {
    cache: Arc<TieredCacheStore>,
    events: Arc<EventTracker>,
    syncers: OrderedSyncers,
    sync_interval: Duration,
    shutdown_requested: Arc<AtomicBool>,
    trigger_queue: Arc<TriggerQueue>,
    notifier: Arc<dyn Notifier>,
}

impl Orchestrator {
    pub fn new(
        cache: Arc<TieredCacheStore>,
        events: Arc<EventTracker>,
        syncers: OrderedSyncers,
        sync_interval: Duration,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            cache,
            events,
            syncers,
            sync_interval,
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            trigger_queue: Arc::new(TriggerQueue::new()),
            notifier,
        }
    }

    /// Shared handle the dashboard hands out so `POST /api/dashboard/trigger-sync`
    /// can wake this loop without owning it.
    pub fn trigger_queue(&self) -> Arc<TriggerQueue> {
        self.trigger_queue.clone()
    }

    /// Shared flag the binary's signal handler flips on SIGTERM/SIGINT.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown_requested.clone()
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
    }

    fn shutting_down(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Runs until `request_shutdown` is observed. Per §4.7, shutdown is
    /// checked between every iteration and the interval sleep is ticked in
    /// 1-second increments so it stays responsive.
    pub async fn run(&self) {
        tracing::info!(event = "orchestrator.started", "orchestrator started");
        loop {
            if self.shutting_down() {
                tracing::info!(event = "orchestrator.shutdown", "orchestrator shutting down");
                return;
            }

            match self.cache.get_pause_flag().await {
                Ok(true) => {
                    tokio::time::sleep(PAUSE_POLL_INTERVAL).await;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "pause flag check failed, proceeding unpaused");
                }
            }

            match self.trigger_queue.pop().await {
                Some(sync_type) => self.run_one(sync_type).await,
                None => {
                    self.run_all().await;
                    self.maybe_send_hourly_notification().await;
                    self.sleep_interval().await;
                }
            }
        }
    }

    /// `SPEC_FULL.md` §4.5: at most once per hour, and only if an error has
    /// occurred since the last emission.
    async fn maybe_send_hourly_notification(&self) {
        if !self.events.should_send_hourly_notification() {
            return;
        }
        let recent = self.events.errors_since(1.0);
        if let Err(e) = self.notifier.notify(&recent).await {
            tracing::warn!(error = %e, "hourly error notification delivery failed");
            return;
        }
        if let Err(e) = self.events.mark_notification_sent().await {
            tracing::warn!(error = %e, "failed to persist last-notification timestamp");
        }
    }

    async fn run_one(&self, sync_type: SyncType) {
        match self.syncers.for_type(sync_type) {
            Some(syncer) => self.run_syncer(syncer.as_ref()).await,
            None => self.run_all().await,
        }
    }

    async fn run_all(&self) {
        for syncer in self.syncers.iter() {
            if self.shutting_down() {
                return;
            }
            self.run_syncer(syncer.as_ref()).await;
        }
    }

    async fn run_syncer(&self, syncer: &(dyn Syncer + Send + Sync)) {
        let entity_type = syncer.entity_type();
        match syncer.sync().await {
            Ok(summary) => {
                tracing::info!(
                    entity_type,
                    created = summary.created,
                    updated = summary.updated,
                    deleted = summary.deleted,
                    errors = summary.errors,
                    "sync completed"
                );
            }
            Err(e) => {
                tracing::error!(entity_type, error = %e, "sync worker error");
                self.events
                    .log_error(
                        entity_type,
                        "*",
                        e.to_string(),
                        "sync_worker_error",
                        None,
                        "orchestrator",
                    )
                    .await;
                tokio::time::sleep(SYNC_WORKER_ERROR_BACKOFF).await;
            }
        }
    }

    async fn sleep_interval(&self) {
        let ticks = self.sync_interval.as_secs().max(1);
        for _ in 0..ticks {
            if self.shutting_down() {
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_queue_is_fifo_and_drops_oldest_when_full() {
        let queue = TriggerQueue::new();
        for _ in 0..TRIGGER_QUEUE_CAPACITY {
            queue.enqueue(SyncType::Employees).await;
        }
        queue.enqueue(SyncType::Vehicles).await;
        assert_eq!(queue.items.lock().await.len(), TRIGGER_QUEUE_CAPACITY);
        let mut popped = Vec::new();
        while let Some(item) = queue.pop().await {
            popped.push(item);
        }
        assert_eq!(popped.last(), Some(&SyncType::Vehicles));
    }

    #[test]
    fn sync_type_parse_rejects_unknown() {
        assert!(SyncType::parse("bogus").is_none());
        assert_eq!(SyncType::parse("all"), Some(SyncType::All));
    }
}
