//! Title syncer (`SPEC_FULL.md` §4.6 "Title syncer"): one-way create-only —
//! every distinct job title becomes a target title if not already present,
//! compared by trimmed name.

use crate::{SafetyStop, SyncDeps, Syncer, DEFAULT_SAFETY_STOP_THRESHOLD};
use async_trait::async_trait;
use sa_clients::SafetyAmpClient;
use sa_core::models::{SessionEvent, SessionSummary};
use sa_core::traits::ErpReader;
use sa_core::Result;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;

const TITLES_CACHE: &str = "title_map";

pub struct TitleSyncer {
    deps: SyncDeps,
    safetyamp: Arc<SafetyAmpClient>,
    erp: Arc<dyn ErpReader>,
    safety_stop_threshold: u32,
}

impl TitleSyncer {
    pub fn new(deps: SyncDeps, safetyamp: Arc<SafetyAmpClient>, erp: Arc<dyn ErpReader>) -> Self {
        Self {
            deps,
            safetyamp,
            erp,
            safety_stop_threshold: DEFAULT_SAFETY_STOP_THRESHOLD,
        }
    }

    async fn existing_titles(&self) -> Result<HashSet<String>> {
        let value = self
            .deps
            .cache
            .load_or_populate(
                TITLES_CACHE,
                None,
                || async { Ok(Value::Array(self.safetyamp.titles().await?)) },
                3600,
                true,
            )
            .await?
            .unwrap_or(Value::Array(Vec::new()));
        Ok(value
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|v| v.get("name").and_then(Value::as_str).map(|s| s.trim().to_string()))
            .collect())
    }
}

#[async_trait]
impl Syncer for TitleSyncer {
    fn entity_type(&self) -> &'static str {
        "title"
    }

    async fn sync(&self) -> Result<SessionSummary> {
        self.deps.events.start_sync("titles").await?;
        let mut safety_stop = SafetyStop::new(self.safety_stop_threshold);

        let mut existing = self.existing_titles().await?;
        let titles = self.erp.titles().await?;

        let mut seen_this_run = HashSet::new();
        for title in titles {
            let name = title.name.trim().to_string();
            if name.is_empty() || !seen_this_run.insert(name.clone()) {
                continue;
            }
            if existing.contains(&name) {
                continue;
            }
            match self.safetyamp.create_title(json!({ "name": name })).await {
                Ok(_) => {
                    self.deps
                        .events
                        .push(SessionEvent::Created {
                            timestamp: now(),
                            entity_type: "title".into(),
                            entity_id: name.clone(),
                            payload: json!({ "name": name }),
                        })
                        .await;
                    self.deps.cache.invalidate(TITLES_CACHE, None).await?;
                    existing.insert(name);
                    safety_stop.record_success();
                }
                Err(e) => {
                    self.deps
                        .events
                        .log_error("title", name.clone(), e.to_string(), "http_error", None, "title_syncer")
                        .await;
                    if safety_stop.record_error() {
                        self.deps
                            .events
                            .log_error("title", "*", "consecutive error threshold reached", "safety_stop", None, "title_syncer")
                            .await;
                        break;
                    }
                }
            }
        }

        let session = self.deps.events.end_sync().await?;
        Ok(session.map(|s| s.summary).unwrap_or_default())
    }
}

fn now() -> f64 {
    chrono::Utc::now().timestamp() as f64
}
