//! Trait seams shared across crates (`SPEC_FULL.md` §9 re-architecture hints).
//!
//! Concrete implementations (Redis+disk cache, ODBC ERP reader) live in their
//! own crates; syncers and the dashboard depend only on these traits, so tests
//! can substitute in-memory fakes.

use crate::models::{CacheMetadata, DepartmentRecord, EmployeeRecord, JobRecord, TitleRecord};
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Two-tier cache contract (`SPEC_FULL.md` §4.2, component C2).
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, name: &str, sub_key: Option<&str>) -> Result<Option<Value>>;

    async fn save(
        &self,
        name: &str,
        data: Value,
        ttl_s: u64,
        source: &str,
        sub_key: Option<&str>,
    ) -> Result<()>;

    async fn metadata(&self, name: &str, sub_key: Option<&str>) -> Result<Option<CacheMetadata>>;

    async fn is_valid(&self, name: &str, max_age_h: f64, sub_key: Option<&str>) -> Result<bool>;

    async fn invalidate(&self, name: &str, sub_key: Option<&str>) -> Result<()>;

    async fn should_refresh(&self, name: &str, refresh_interval_h: f64) -> Result<bool>;

    async fn get_pause_flag(&self) -> Result<bool>;

    async fn set_pause_flag(&self, paused: bool, paused_by: Option<&str>) -> Result<()>;

    /// Raw `{paused_by, paused_at}` metadata written alongside the pause flag
    /// (`SPEC_FULL.md` §8 scenario S6), for `GET /api/dashboard/sync-pause`.
    async fn pause_metadata(&self) -> Result<Option<Value>>;
}

/// Read-only view over the payroll/ERP source (out of scope: the SQL driver
/// itself — this seam exists so syncers never depend on a concrete ODBC type).
#[async_trait]
pub trait ErpReader: Send + Sync {
    async fn active_employees(&self) -> Result<Vec<EmployeeRecord>>;
    async fn departments(&self) -> Result<Vec<DepartmentRecord>>;
    async fn jobs(&self) -> Result<Vec<JobRecord>>;
    async fn titles(&self) -> Result<Vec<TitleRecord>>;

    /// Cheap connectivity probe for `/health` (`SPEC_FULL.md` §4.8). The
    /// default implementation runs the lightest query in the contract.
    async fn health_check(&self) -> Result<()> {
        self.titles().await.map(|_| ())
    }
}

/// In-memory `ErpReader` double for syncer and dashboard tests — no ODBC/TDS
/// driver ships with this crate (`SPEC_FULL.md` §4.1).
#[derive(Debug, Clone, Default)]
pub struct InMemoryErpReader {
    pub employees: Vec<EmployeeRecord>,
    pub departments: Vec<DepartmentRecord>,
    pub jobs: Vec<JobRecord>,
    pub titles: Vec<TitleRecord>,
}

impl InMemoryErpReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_employees(mut self, employees: Vec<EmployeeRecord>) -> Self {
        self.employees = employees;
        self
    }

    pub fn with_departments(mut self, departments: Vec<DepartmentRecord>) -> Self {
        self.departments = departments;
        self
    }

    pub fn with_jobs(mut self, jobs: Vec<JobRecord>) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_titles(mut self, titles: Vec<TitleRecord>) -> Self {
        self.titles = titles;
        self
    }
}

#[async_trait]
impl ErpReader for InMemoryErpReader {
    async fn active_employees(&self) -> Result<Vec<EmployeeRecord>> {
        Ok(self.employees.clone())
    }

    async fn departments(&self) -> Result<Vec<DepartmentRecord>> {
        Ok(self.departments.clone())
    }

    async fn jobs(&self) -> Result<Vec<JobRecord>> {
        Ok(self.jobs.clone())
    }

    async fn titles(&self) -> Result<Vec<TitleRecord>> {
        Ok(self.titles.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_erp_reader_returns_seeded_fixtures() {
        let reader = InMemoryErpReader::new().with_titles(vec![TitleRecord {
            name: "Welder".into(),
        }]);
        assert_eq!(reader.titles().await.unwrap().len(), 1);
        assert!(reader.active_employees().await.unwrap().is_empty());
        assert!(reader.health_check().await.is_ok());
    }
}
