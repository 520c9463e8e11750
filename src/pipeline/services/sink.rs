use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::common::FrameResult;
use crate::error::TransportError;
use crate::pipeline::events::Classification;
use crate::pipeline::tracking::WorkerId;

/// Persisted for every frame that carries a violation or safe pickup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub session_id: Uuid,
    pub frame_id: u64,
    pub timestamp: DateTime<Utc>,
    pub is_violation: bool,
    pub is_safe_pickup: bool,
    pub violators: Vec<WorkerId>,
    pub safe_workers: Vec<WorkerId>,
    pub messages: Vec<String>,
}

impl ViolationRecord {
    pub fn from_result(session_id: Uuid, result: &FrameResult) -> Self {
        let workers_with = |classification: Classification| -> Vec<WorkerId> {
            result
                .classified
                .iter()
                .filter(|c| c.classification == classification)
                .map(|c| c.event.worker_id)
                .collect()
        };
        Self {
            session_id,
            frame_id: result.frame_id,
            timestamp: result.timestamp,
            is_violation: result.is_violation,
            is_safe_pickup: result.is_safe_pickup,
            violators: workers_with(Classification::Violation),
            safe_workers: workers_with(Classification::SafePickup),
            messages: result.messages.clone(),
        }
    }
}

/// Append-only record store. Appends are idempotent by `frame_id`:
/// `Ok(false)` means the frame was already recorded.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn append(&self, record: ViolationRecord) -> Result<bool, TransportError>;
    fn name(&self) -> &'static str;
}

#[derive(Debug, Default)]
struct SinkState {
    seen: HashSet<u64>,
    records: Vec<ViolationRecord>,
}

#[derive(Debug, Default)]
pub struct InMemorySink {
    state: Mutex<SinkState>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<ViolationRecord> {
        self.state.lock().await.records.clone()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.records.len()
    }
}

#[async_trait]
impl RecordSink for InMemorySink {
    async fn append(&self, record: ViolationRecord) -> Result<bool, TransportError> {
        let mut state = self.state.lock().await;
        if !state.seen.insert(record.frame_id) {
            return Ok(false);
        }
        state.records.push(record);
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}

/// One JSON object per line, appended to a file. Frame ids already in the
/// file are loaded on open so a restart does not duplicate records.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    seen: Mutex<HashSet<u64>>,
}

impl JsonLinesSink {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let path = path.as_ref().to_path_buf();
        let mut seen = HashSet::new();
        match tokio::fs::read_to_string(&path).await {
            Ok(existing) => {
                for (index, line) in existing.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<ViolationRecord>(line) {
                        Ok(record) => {
                            seen.insert(record.frame_id);
                        }
                        Err(e) => warn!(
                            "Skipping unreadable record on line {} of {}: {}",
                            index + 1,
                            path.display(),
                            e
                        ),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(TransportError::Sink { frame_id: 0, source }),
        }
        info!(
            "Record sink at {} ({} existing records)",
            path.display(),
            seen.len()
        );
        Ok(Self {
            path,
            seen: Mutex::new(seen),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordSink for JsonLinesSink {
    async fn append(&self, record: ViolationRecord) -> Result<bool, TransportError> {
        let frame_id = record.frame_id;
        // Held across the write so appends never interleave.
        let mut seen = self.seen.lock().await;
        if seen.contains(&frame_id) {
            return Ok(false);
        }

        let mut line = serde_json::to_vec(&record)
            .map_err(|source| TransportError::Serialize { frame_id, source })?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|source| TransportError::Sink { frame_id, source })?;
        file.write_all(&line)
            .await
            .map_err(|source| TransportError::Sink { frame_id, source })?;
        file.flush()
            .await
            .map_err(|source| TransportError::Sink { frame_id, source })?;

        seen.insert(frame_id);
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "json-lines"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(frame_id: u64) -> ViolationRecord {
        ViolationRecord {
            session_id: Uuid::nil(),
            frame_id,
            timestamp: Utc::now(),
            is_violation: true,
            is_safe_pickup: false,
            violators: vec![1],
            safe_workers: Vec::new(),
            messages: vec!["[00:01] Violation detected for Worker #1!".to_string()],
        }
    }

    #[tokio::test]
    async fn in_memory_sink_is_idempotent_by_frame() {
        let sink = InMemorySink::new();
        assert!(sink.append(record(50)).await.unwrap());
        assert!(!sink.append(record(50)).await.unwrap());
        assert!(sink.append(record(51)).await.unwrap());
        assert_eq!(sink.len().await, 2);
    }

    #[tokio::test]
    async fn json_lines_sink_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");

        let sink = JsonLinesSink::open(&path).await.unwrap();
        assert!(sink.append(record(7)).await.unwrap());
        assert!(!sink.append(record(7)).await.unwrap());
        drop(sink);

        let reopened = JsonLinesSink::open(&path).await.unwrap();
        assert!(!reopened.append(record(7)).await.unwrap());
        assert!(reopened.append(record(8)).await.unwrap());

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let frames: Vec<u64> = contents
            .lines()
            .map(|line| serde_json::from_str::<ViolationRecord>(line).unwrap().frame_id)
            .collect();
        assert_eq!(frames, vec![7, 8]);
    }
}
