//! On-disk fallback tier (`SPEC_FULL.md` §4.2, §6 persistent state layout).
//!
//! Files live at `cache/<name>[_<sub>].json` with a companion
//! `cache/<name>[_<sub>]_metadata.json`. Writes are atomic: write to a temp
//! file in the same directory, then rename, so a crash never leaves a
//! partially-written file that the cache would parse as valid.

use sa_core::models::CacheMetadata;
use sa_core::{Error, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub struct DiskTier {
    dir: PathBuf,
}

impl DiskTier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn stem(name: &str, sub_key: Option<&str>) -> String {
        match sub_key {
            Some(sub) => format!("{name}_{sub}"),
            None => name.to_string(),
        }
    }

    fn data_path(&self, name: &str, sub_key: Option<&str>) -> PathBuf {
        self.dir.join(format!("{}.json", Self::stem(name, sub_key)))
    }

    fn metadata_path(&self, name: &str, sub_key: Option<&str>) -> PathBuf {
        self.dir
            .join(format!("{}_metadata.json", Self::stem(name, sub_key)))
    }

    pub async fn read(&self, name: &str, sub_key: Option<&str>) -> Result<Option<Value>> {
        read_json(&self.data_path(name, sub_key)).await
    }

    pub async fn read_metadata(
        &self,
        name: &str,
        sub_key: Option<&str>,
    ) -> Result<Option<CacheMetadata>> {
        read_json(&self.metadata_path(name, sub_key)).await
    }

    pub async fn write(
        &self,
        name: &str,
        sub_key: Option<&str>,
        data: &Value,
        metadata: &CacheMetadata,
    ) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        write_json_atomic(&self.dir, &self.data_path(name, sub_key), data).await?;
        write_json_atomic(&self.dir, &self.metadata_path(name, sub_key), metadata).await?;
        Ok(())
    }

    pub async fn invalidate(&self, name: &str, sub_key: Option<&str>) -> Result<()> {
        for path in [
            self.data_path(name, sub_key),
            self.metadata_path(name, sub_key),
        ] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::from(e)),
            }
        }
        Ok(())
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "disk cache file unparsable, treating as miss");
                Ok(None)
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::from(e)),
    }
}

async fn write_json_atomic<T: serde::Serialize>(dir: &Path, path: &Path, value: &T) -> Result<()> {
    let tmp = dir.join(format!(".{}.tmp", Uuid::new_v4()));
    let bytes = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn meta(now: f64) -> CacheMetadata {
        CacheMetadata {
            created_ts: now,
            last_updated_ts: now,
            item_count: 1,
            ttl_s: 3600,
            source: "test".into(),
            last_refresh: Some(now),
        }
    }

    #[tokio::test]
    async fn round_trips_data_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let tier = DiskTier::new(dir.path());
        let now = Utc::now().timestamp() as f64;
        tier.write("employees", None, &serde_json::json!({"a": 1}), &meta(now))
            .await
            .unwrap();

        let data = tier.read("employees", None).await.unwrap().unwrap();
        assert_eq!(data, serde_json::json!({"a": 1}));
        let read_meta = tier.read_metadata("employees", None).await.unwrap().unwrap();
        assert_eq!(read_meta.item_count, 1);
    }

    #[tokio::test]
    async fn missing_file_is_a_clean_miss() {
        let dir = tempfile::tempdir().unwrap();
        let tier = DiskTier::new(dir.path());
        assert!(tier.read("nope", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalidate_removes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let tier = DiskTier::new(dir.path());
        let now = Utc::now().timestamp() as f64;
        tier.write("jobs", Some("x"), &serde_json::json!([1, 2]), &meta(now))
            .await
            .unwrap();
        tier.invalidate("jobs", Some("x")).await.unwrap();
        assert!(tier.read("jobs", Some("x")).await.unwrap().is_none());
        assert!(tier.read_metadata("jobs", Some("x")).await.unwrap().is_none());
    }
}
