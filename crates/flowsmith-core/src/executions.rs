use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Success,
    Error,
    Running,
    Canceled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Error => "error",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Canceled => "canceled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub node_runs: Vec<NodeRun>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRun {
    pub node_id: String,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Read access to past workflow executions.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn find_latest_execution(&self, workflow_id: &str) -> Result<Option<ExecutionRecord>>;
}

/// Store with no executions at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExecutionStore;

#[async_trait]
impl ExecutionStore for NoExecutionStore {
    async fn find_latest_execution(&self, _workflow_id: &str) -> Result<Option<ExecutionRecord>> {
        Ok(None)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryExecutionStore {
    records: RwLock<HashMap<String, Vec<ExecutionRecord>>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: ExecutionRecord) {
        self.records
            .write()
            .await
            .entry(record.workflow_id.clone())
            .or_default()
            .push(record);
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn find_latest_execution(&self, workflow_id: &str) -> Result<Option<ExecutionRecord>> {
        let records = self.records.read().await;
        Ok(records
            .get(workflow_id)
            .and_then(|runs| runs.iter().max_by_key(|r| r.started_at))
            .cloned())
    }
}

/// Sanitizes a name for use as a directory component.
///
/// Keeps ASCII alphanumerics, `-` and `_`; everything else becomes `-`.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('-');
    if trimmed.is_empty() {
        return "unnamed".to_string();
    }
    trimmed.to_string()
}

/// File-system key for a caller-supplied id: the sanitized name plus a short
/// hash of the raw id, so ids that sanitize alike (`wf:1`, `wf.1`) stay apart.
pub fn storage_key(id: &str) -> String {
    format!("{}-{}", sanitize_name(id), short_hash(id))
}

fn short_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())[..8].to_string()
}

/// Execution records stored as JSON files on disk.
///
/// Directory layout:
/// ```text
/// <root>/
///   <storage_key(workflow_id)>/
///     <any_name>.json     ← one ExecutionRecord per file
/// ```
pub struct FileExecutionStore {
    root: PathBuf,
}

impl FileExecutionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn workflow_dir(&self, workflow_id: &str) -> PathBuf {
        self.root.join(storage_key(workflow_id))
    }
}

#[async_trait]
impl ExecutionStore for FileExecutionStore {
    async fn find_latest_execution(&self, workflow_id: &str) -> Result<Option<ExecutionRecord>> {
        let dir = self.workflow_dir(workflow_id);
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            debug!(dir = %dir.display(), "No execution directory for workflow");
            return Ok(None);
        }

        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("Failed to read {}", dir.display()))?;

        let mut latest: Option<ExecutionRecord> = None;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let text = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let record: ExecutionRecord = match serde_json::from_str(&text) {
                Ok(r) => r,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping malformed execution record");
                    continue;
                }
            };
            if record.workflow_id != workflow_id {
                warn!(
                    path = %path.display(),
                    expected = workflow_id,
                    found = %record.workflow_id,
                    "Skipping execution record filed under another workflow"
                );
                continue;
            }
            if latest
                .as_ref()
                .is_none_or(|current| record.started_at > current.started_at)
            {
                latest = Some(record);
            }
        }

        Ok(latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(id: &str, workflow_id: &str, minute: u32) -> ExecutionRecord {
        ExecutionRecord {
            id: id.to_string(),
            workflow_id: workflow_id.to_string(),
            status: ExecutionStatus::Error,
            started_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, minute, 0).unwrap(),
            finished_at: None,
            node_runs: vec![NodeRun {
                node_id: "n1".to_string(),
                status: ExecutionStatus::Error,
                error: Some("boom".to_string()),
            }],
        }
    }

    #[test]
    fn sanitize_name_replaces_path_separators() {
        assert_eq!(sanitize_name("wf-1"), "wf-1");
        assert_eq!(sanitize_name("../etc/passwd"), "etc-passwd");
        assert_eq!(sanitize_name("///"), "unnamed");
    }

    #[test]
    fn storage_keys_differ_for_ids_that_sanitize_alike() {
        let keys: Vec<String> = ["wf:1", "wf.1", "wf/1", "wf-1"]
            .iter()
            .map(|id| storage_key(id))
            .collect();
        for key in &keys {
            assert!(key.starts_with("wf-1-"), "unexpected key {}", key);
        }
        let unique: std::collections::HashSet<_> = keys.iter().collect();
        assert_eq!(unique.len(), keys.len());
        assert_eq!(storage_key("wf:1"), storage_key("wf:1"));
    }

    #[tokio::test]
    async fn in_memory_store_returns_latest_run() {
        let store = InMemoryExecutionStore::new();
        store.insert(record("old", "wf", 1)).await;
        store.insert(record("new", "wf", 5)).await;
        store.insert(record("other", "wf2", 9)).await;

        let latest = store.find_latest_execution("wf").await.unwrap().unwrap();
        assert_eq!(latest.id, "new");
        assert!(store.find_latest_execution("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_picks_latest_by_start_time() {
        let dir = tempfile::tempdir().unwrap();
        let wf_dir = dir.path().join(storage_key("wf"));
        std::fs::create_dir_all(&wf_dir).unwrap();
        for (file, rec) in [("a.json", record("late", "wf", 30)), ("b.json", record("early", "wf", 2))] {
            std::fs::write(wf_dir.join(file), serde_json::to_string(&rec).unwrap()).unwrap();
        }
        std::fs::write(wf_dir.join("junk.json"), "not json").unwrap();
        std::fs::write(wf_dir.join("notes.txt"), "ignored").unwrap();

        let store = FileExecutionStore::new(dir.path());
        let latest = store.find_latest_execution("wf").await.unwrap().unwrap();
        assert_eq!(latest.id, "late");
        assert_eq!(latest.node_runs[0].error.as_deref(), Some("boom"));
        assert!(store.find_latest_execution("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_keeps_colliding_workflow_ids_apart() {
        let dir = tempfile::tempdir().unwrap();
        let colon_dir = dir.path().join(storage_key("wf:1"));
        std::fs::create_dir_all(&colon_dir).unwrap();
        std::fs::write(
            colon_dir.join("run.json"),
            serde_json::to_string(&record("colon-run", "wf:1", 3)).unwrap(),
        )
        .unwrap();

        let store = FileExecutionStore::new(dir.path());
        assert!(store.find_latest_execution("wf.1").await.unwrap().is_none());
        let found = store.find_latest_execution("wf:1").await.unwrap().unwrap();
        assert_eq!(found.id, "colon-run");
    }

    #[tokio::test]
    async fn file_store_skips_records_of_other_workflows() {
        let dir = tempfile::tempdir().unwrap();
        let wf_dir = dir.path().join(storage_key("wf.1"));
        std::fs::create_dir_all(&wf_dir).unwrap();
        std::fs::write(
            wf_dir.join("misfiled.json"),
            serde_json::to_string(&record("foreign", "wf:1", 9)).unwrap(),
        )
        .unwrap();
        std::fs::write(
            wf_dir.join("own.json"),
            serde_json::to_string(&record("own", "wf.1", 1)).unwrap(),
        )
        .unwrap();

        let store = FileExecutionStore::new(dir.path());
        let found = store.find_latest_execution("wf.1").await.unwrap().unwrap();
        assert_eq!(found.id, "own");
    }
}
