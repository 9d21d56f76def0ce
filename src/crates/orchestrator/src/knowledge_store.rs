//! `KnowledgeStore`: append/update log of completed node summaries, keyed by
//! `task_id` (spec §3.1, §5). The `ContextResolver` queries it as the
//! authoritative post-completion view of a node.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::node::{TaskNode, TaskStatus};

/// Derived snapshot of a node at a status change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeRecord {
    pub task_id: String,
    pub goal: String,
    pub status: TaskStatus,
    pub output_summary: Option<String>,
    pub result: Option<Value>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// A concurrent map with last-writer-wins semantics per `task_id` (spec §3.1).
/// Writes are idempotent per `(task_id, version)`: a write carrying an older
/// `updated` timestamp than the record already on file is a no-op, which is
/// what makes out-of-order broadcast/retry writes safe (spec §5, §8 P7).
#[derive(Default)]
pub struct KnowledgeStore {
    records: DashMap<String, KnowledgeRecord>,
}

impl KnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_or_update_record_from_node(&self, node: &TaskNode) {
        let snapshot = node.snapshot();
        let record = KnowledgeRecord {
            task_id: node.task_id.clone(),
            goal: snapshot.goal.clone(),
            status: snapshot.status,
            output_summary: snapshot.output_summary.clone(),
            result: snapshot.result.clone(),
            created: node.created,
            updated: snapshot.updated,
        };
        self.upsert(record);
    }

    fn upsert(&self, record: KnowledgeRecord) {
        match self.records.get(&record.task_id) {
            Some(existing) if existing.updated > record.updated => {
                tracing::debug!(task_id = %record.task_id, "knowledge store write superseded by newer record");
            }
            _ => {
                tracing::debug!(task_id = %record.task_id, status = ?record.status, "knowledge store updated");
                self.records.insert(record.task_id.clone(), record);
            }
        }
    }

    pub fn get(&self, task_id: &str) -> Option<KnowledgeRecord> {
        self.records.get(task_id).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
