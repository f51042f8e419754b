use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::task::Payload;

/// A file or resource produced while executing a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    /// "code", "test", "doc", "config", ...
    pub artifact_type: String,
    pub path: String,
    pub content: String,
    pub size: u64,
    /// Hex SHA-256 of `content`
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(
        artifact_type: impl Into<String>,
        path: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let content = content.into();
        Self {
            id: Uuid::new_v4(),
            artifact_type: artifact_type.into(),
            path: path.into(),
            size: content.len() as u64,
            checksum: content_checksum(&content),
            content,
            created_at: Utc::now(),
        }
    }

    /// True if `content` still matches the recorded checksum
    pub fn verify(&self) -> bool {
        content_checksum(&self.content) == self.checksum
    }
}

fn content_checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Resource usage reported by an agent for one execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMetrics {
    pub tokens_used: u64,
    pub llm_calls: u32,
    pub tool_calls: u32,
    pub files_modified: u32,
    pub lines_added: u64,
    pub lines_removed: u64,
    pub tests_generated: u32,
    pub execution_time: Duration,
}

/// Outcome of one execution attempt of a task
///
/// A result is written exactly once: the first of `set_success` or
/// `set_failure` wins and later calls are ignored. Artifacts may be appended
/// at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: Uuid,
    pub agent_id: String,
    pub attempt: u32,
    pub success: bool,
    pub output: Payload,
    /// Set iff the result is a failure
    pub error: Option<String>,
    pub confidence: f64,
    pub artifacts: Vec<Artifact>,
    pub metrics: Option<TaskMetrics>,
    pub metadata: Payload,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskResult {
    pub fn new(task_id: Uuid, agent_id: impl Into<String>) -> Self {
        Self {
            task_id,
            agent_id: agent_id.into(),
            attempt: 1,
            success: false,
            output: Payload::new(),
            error: None,
            confidence: 0.0,
            artifacts: Vec::new(),
            metrics: None,
            metadata: Payload::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// True once either `set_success` or `set_failure` has been applied
    pub fn is_finalized(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Marks the result as successful with `output`
    pub fn set_success(&mut self, output: Payload) -> bool {
        self.set_success_with_confidence(output, 1.0)
    }

    pub fn set_success_with_confidence(&mut self, output: Payload, confidence: f64) -> bool {
        if self.is_finalized() {
            return false;
        }
        self.success = true;
        self.output = output;
        self.error = None;
        self.confidence = confidence.clamp(0.0, 1.0);
        self.completed_at = Some(Utc::now());
        true
    }

    /// Marks the result as failed. An empty message is allowed and is stored
    /// as an empty error string.
    pub fn set_failure(&mut self, error: impl std::fmt::Display) -> bool {
        if self.is_finalized() {
            return false;
        }
        self.success = false;
        self.error = Some(error.to_string());
        self.confidence = 0.0;
        self.completed_at = Some(Utc::now());
        true
    }

    pub fn add_artifact(&mut self, artifact: Artifact) {
        self.artifacts.push(artifact);
    }

    pub fn with_metrics(mut self, metrics: TaskMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Fills in `execution_time` when the agent left it unset
    pub fn record_execution_time(&mut self, elapsed: Duration) {
        let metrics = self.metrics.get_or_insert_with(TaskMetrics::default);
        if metrics.execution_time.is_zero() {
            metrics.execution_time = elapsed;
        }
    }

    pub fn duration(&self) -> std::time::Duration {
        self.completed_at
            .and_then(|end| (end - self.started_at).to_std().ok())
            .unwrap_or_default()
    }

    /// Builds a finalized failed result in one step
    pub fn failure(task_id: Uuid, agent_id: impl Into<String>, error: impl std::fmt::Display) -> Self {
        let mut result = Self::new(task_id, agent_id);
        result.set_failure(error);
        result
    }
}
