use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::agents::types::Capability;

/// Opaque key-value payload carried by tasks and results
pub type Payload = Map<String, Value>;

/// Relative urgency of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Lifecycle status of a task
///
/// # Status Transitions
/// ```text
/// Pending -> Running -> Completed
///    |  ^        |----> Failed
///    v  |        \----> Cancelled
/// Blocked ----------/
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Blocked,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Checks if a transition from current status to next status is valid
    ///
    /// # Example
    /// ```
    /// use ghostpirates_orchestrator::task::TaskStatus;
    ///
    /// assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Running));
    /// assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Running));
    /// ```
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Blocked)
                | (Pending, Cancelled)
                | (Blocked, Pending)
                | (Blocked, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Blocked => write!(f, "blocked"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A routable unit of work
///
/// The task type is the routing key: agents whose capabilities include it
/// (or whose agent type carries the same name) can pick the task up.
///
/// # Invariants
/// - `start` only applies from `Pending`
/// - `complete`/`fail` without a prior `start` are tolerated and recorded as
///   a zero-duration anomaly in the metadata
/// - `cancel` applies from every non-terminal status and is terminal
/// - transition methods never panic; they return whether the status changed
///
/// # Example
/// ```
/// use ghostpirates_orchestrator::task::{Priority, Task, TaskStatus};
///
/// let mut task = Task::new("code_generation", Priority::High);
/// assert!(task.start());
/// assert!(task.is_active());
/// assert!(task.complete(Default::default()));
/// assert_eq!(task.status(), TaskStatus::Completed);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    id: Uuid,
    task_type: String,
    title: String,
    description: String,
    priority: Priority,
    status: TaskStatus,
    required_capabilities: Vec<Capability>,
    estimated_duration: Option<std::time::Duration>,
    deadline: Option<DateTime<Utc>>,
    dependencies: Vec<Uuid>,
    blocked_by: Vec<Uuid>,
    input: Payload,
    output: Payload,
    assigned_to: Option<String>,
    block_reason: Option<String>,
    blocked_at: Option<DateTime<Utc>>,
    unblocked_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    duration_ms: u64,
    created_by: String,
    tags: Vec<String>,
    metadata: Payload,
}

impl Task {
    /// Creates a pending task with a fresh id
    pub fn new(task_type: impl Into<String>, priority: Priority) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            task_type: task_type.into(),
            title: String::new(),
            description: String::new(),
            priority,
            status: TaskStatus::Pending,
            required_capabilities: Vec::new(),
            estimated_duration: None,
            deadline: None,
            dependencies: Vec::new(),
            blocked_by: Vec::new(),
            input: Payload::new(),
            output: Payload::new(),
            assigned_to: None,
            block_reason: None,
            blocked_at: None,
            unblocked_at: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            duration_ms: 0,
            created_by: "user".to_string(),
            tags: Vec::new(),
            metadata: Payload::new(),
        }
    }

    /// Creates a pending task with an input payload and dependency ids
    pub fn with_dependencies(
        task_type: impl Into<String>,
        priority: Priority,
        input: Payload,
        dependencies: impl IntoIterator<Item = Uuid>,
    ) -> Self {
        let mut task = Self::new(task_type, priority);
        task.input = input;
        task.dependencies = dependencies.into_iter().collect();
        task
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_input(mut self, input: Payload) -> Self {
        self.input = input;
        self
    }

    pub fn with_required_capabilities(
        mut self,
        capabilities: impl IntoIterator<Item = Capability>,
    ) -> Self {
        self.required_capabilities = capabilities.into_iter().collect();
        self
    }

    /// Wall-clock time by which the task must finish
    ///
    /// The coordinator shortens the execution timeout to fit the deadline.
    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_estimated_duration(mut self, estimate: std::time::Duration) -> Self {
        self.estimated_duration = Some(estimate);
        self
    }

    /// Agent id or `"user"` (the default)
    pub fn with_created_by(mut self, creator: impl Into<String>) -> Self {
        self.created_by = creator.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// A task with a nil id or an empty type cannot be routed
    pub fn is_nil(&self) -> bool {
        self.id.is_nil() || self.task_type.trim().is_empty()
    }

    fn touch(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        self.updated_at = now;
        now
    }

    fn record_anomaly(&mut self, anomaly: &str) {
        self.metadata
            .insert("anomaly".to_string(), Value::String(anomaly.to_string()));
    }

    fn finish(&mut self, status: TaskStatus, now: DateTime<Utc>) {
        match self.started_at {
            Some(started) => {
                self.duration_ms = (now - started).num_milliseconds().max(0) as u64;
            }
            None => {
                self.started_at = Some(now);
                self.duration_ms = 0;
                self.record_anomaly(&format!("{status}_without_start"));
            }
        }
        self.status = status;
        self.completed_at = Some(now);
    }

    // ===== Transitions =====

    /// Marks the task as running. Only valid from `Pending`.
    pub fn start(&mut self) -> bool {
        let now = self.touch();
        if !self.can_start() {
            return false;
        }
        self.status = TaskStatus::Running;
        self.started_at = Some(now);
        true
    }

    /// Records the agent the task was handed to
    pub fn assign_to(&mut self, agent_id: impl Into<String>) {
        self.assigned_to = Some(agent_id.into());
        self.touch();
    }

    /// Marks the task as completed with `output`
    ///
    /// Completing an already completed task only refreshes the end timestamp.
    /// Completing a failed or cancelled task is a no-op.
    pub fn complete(&mut self, output: Payload) -> bool {
        let now = self.touch();
        match self.status {
            TaskStatus::Running | TaskStatus::Pending | TaskStatus::Blocked => {
                self.output = output;
                self.finish(TaskStatus::Completed, now);
                true
            }
            TaskStatus::Completed => {
                self.completed_at = Some(now);
                false
            }
            TaskStatus::Failed | TaskStatus::Cancelled => false,
        }
    }

    /// Marks the task as failed, merging `metadata` into the task's metadata
    pub fn fail(&mut self, reason: impl Into<String>, metadata: Payload) -> bool {
        let now = self.touch();
        match self.status {
            TaskStatus::Running | TaskStatus::Pending | TaskStatus::Blocked => {
                self.metadata.extend(metadata);
                self.metadata
                    .insert("failure_reason".to_string(), Value::String(reason.into()));
                self.metadata
                    .insert("failed_at".to_string(), Value::String(now.to_rfc3339()));
                self.finish(TaskStatus::Failed, now);
                true
            }
            TaskStatus::Failed => {
                self.completed_at = Some(now);
                false
            }
            TaskStatus::Completed | TaskStatus::Cancelled => false,
        }
    }

    /// Blocks a pending task
    pub fn block(&mut self, reason: impl Into<String>) -> bool {
        let now = self.touch();
        if self.status != TaskStatus::Pending {
            return false;
        }
        self.status = TaskStatus::Blocked;
        self.block_reason = Some(reason.into());
        self.blocked_at = Some(now);
        true
    }

    /// Blocks the task until `blocker` is resolved
    ///
    /// Applies to pending tasks and adds further blockers to tasks that are
    /// already blocked.
    pub fn block_on(&mut self, blocker: Uuid, reason: impl Into<String>) -> bool {
        match self.status {
            TaskStatus::Pending => {
                if !self.block(reason) {
                    return false;
                }
            }
            TaskStatus::Blocked => {
                self.touch();
            }
            _ => return false,
        }
        if !self.blocked_by.contains(&blocker) {
            self.blocked_by.push(blocker);
        }
        true
    }

    /// Removes `blocker`; the task unblocks once no blockers remain
    pub fn resolve_blocker(&mut self, blocker: Uuid) -> bool {
        let before = self.blocked_by.len();
        self.blocked_by.retain(|id| *id != blocker);
        if self.blocked_by.len() == before {
            return false;
        }
        if self.blocked_by.is_empty() {
            self.unblock();
        } else {
            self.touch();
        }
        true
    }

    /// Returns a blocked task to `Pending`, dropping every blocker
    pub fn unblock(&mut self) -> bool {
        let now = self.touch();
        if self.status != TaskStatus::Blocked {
            return false;
        }
        self.status = TaskStatus::Pending;
        self.block_reason = None;
        self.blocked_by.clear();
        self.unblocked_at = Some(now);
        true
    }

    /// Cancels the task from any non-terminal status
    pub fn cancel(&mut self, reason: impl Into<String>) -> bool {
        let now = self.touch();
        if self.status.is_terminal() {
            return false;
        }
        self.metadata.insert(
            "cancellation_reason".to_string(),
            Value::String(reason.into()),
        );
        self.status = TaskStatus::Cancelled;
        self.completed_at = Some(now);
        if let Some(started) = self.started_at {
            self.duration_ms = (now - started).num_milliseconds().max(0) as u64;
        }
        true
    }

    // ===== Queries =====

    pub fn can_start(&self) -> bool {
        self.status == TaskStatus::Pending
    }

    /// Pending and not blocked
    pub fn is_ready(&self) -> bool {
        self.status == TaskStatus::Pending && self.block_reason.is_none()
    }

    pub fn is_active(&self) -> bool {
        self.status == TaskStatus::Running
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == TaskStatus::Failed
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == TaskStatus::Cancelled
    }

    // ===== Getters =====

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn required_capabilities(&self) -> &[Capability] {
        &self.required_capabilities
    }

    pub fn estimated_duration(&self) -> Option<std::time::Duration> {
        self.estimated_duration
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    /// Time left until the deadline, zero once it has passed
    pub fn time_remaining(&self) -> Option<std::time::Duration> {
        self.deadline
            .map(|deadline| (deadline - Utc::now()).to_std().unwrap_or_default())
    }

    pub fn is_overdue(&self) -> bool {
        !self.status.is_terminal() && self.deadline.is_some_and(|d| d <= Utc::now())
    }

    pub fn blocked_by(&self) -> &[Uuid] {
        &self.blocked_by
    }

    pub fn created_by(&self) -> &str {
        &self.created_by
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn dependencies(&self) -> &[Uuid] {
        &self.dependencies
    }

    pub fn input(&self) -> &Payload {
        &self.input
    }

    pub fn output(&self) -> &Payload {
        &self.output
    }

    pub fn assigned_to(&self) -> Option<&str> {
        self.assigned_to.as_deref()
    }

    pub fn block_reason(&self) -> Option<&str> {
        self.block_reason.as_deref()
    }

    pub fn blocked_at(&self) -> Option<DateTime<Utc>> {
        self.blocked_at
    }

    pub fn unblocked_at(&self) -> Option<DateTime<Utc>> {
        self.unblocked_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.duration_ms)
    }

    pub fn metadata(&self) -> &Payload {
        &self.metadata
    }
}

impl Default for Task {
    /// An unroutable placeholder: nil id and empty type
    fn default() -> Self {
        let mut task = Self::new("", Priority::Normal);
        task.id = Uuid::nil();
        task
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_new_task_is_pending_and_ready() {
        let task = Task::new("code_generation", Priority::High);

        assert_eq!(task.status(), TaskStatus::Pending);
        assert_eq!(task.priority(), Priority::High);
        assert!(task.is_ready());
        assert!(task.can_start());
        assert!(!task.is_nil());
        assert!(task.started_at().is_none());
    }

    #[test]
    fn test_task_with_dependencies_keeps_input() {
        let dep = Uuid::new_v4();
        let task = Task::with_dependencies(
            "testing",
            Priority::Low,
            payload(json!({"file": "lib.rs"})),
            [dep],
        );

        assert_eq!(task.dependencies(), &[dep]);
        assert_eq!(task.input()["file"], json!("lib.rs"));
    }

    #[test]
    fn test_default_task_is_nil() {
        assert!(Task::default().is_nil());
        assert!(Task::new("  ", Priority::Normal).is_nil());
    }

    #[test]
    fn test_full_lifecycle_records_duration() {
        let mut task = Task::new("testing", Priority::Normal);

        assert!(task.start());
        assert!(task.is_active());
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(task.complete(payload(json!({"passed": 12}))));

        assert!(task.is_completed());
        assert!(!task.is_active());
        assert!(task.duration() >= std::time::Duration::from_millis(5));
        assert_eq!(task.output()["passed"], json!(12));
        assert!(task.metadata().get("anomaly").is_none());
    }

    #[test]
    fn test_start_only_from_pending() {
        let mut task = Task::new("testing", Priority::Normal);
        assert!(task.start());
        assert!(!task.start());

        let mut blocked = Task::new("testing", Priority::Normal);
        blocked.block("waiting on review");
        assert!(!blocked.start());
        assert_eq!(blocked.status(), TaskStatus::Blocked);
    }

    #[test]
    fn test_complete_without_start_is_zero_duration_anomaly() {
        let mut task = Task::new("review", Priority::Normal);

        assert!(task.complete(Payload::new()));

        assert!(task.is_completed());
        assert_eq!(task.duration(), std::time::Duration::ZERO);
        assert_eq!(
            task.metadata()["anomaly"],
            json!("completed_without_start")
        );
    }

    #[test]
    fn test_repeated_complete_only_moves_end_timestamp() {
        let mut task = Task::new("review", Priority::Normal);
        task.start();
        task.complete(payload(json!({"verdict": "ok"})));
        let first_end = task.completed_at();

        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(!task.complete(payload(json!({"verdict": "changed"}))));

        assert!(task.is_completed());
        assert_eq!(task.output()["verdict"], json!("ok"));
        assert!(task.completed_at() > first_end);
    }

    #[test]
    fn test_fail_records_reason_and_metadata() {
        let mut task = Task::new("debugging", Priority::Critical);
        task.start();

        assert!(task.fail("stack overflow", payload(json!({"attempts": 3}))));

        assert!(task.is_failed());
        assert_eq!(task.metadata()["failure_reason"], json!("stack overflow"));
        assert_eq!(task.metadata()["attempts"], json!(3));
        assert!(task.metadata().contains_key("failed_at"));
    }

    #[test]
    fn test_terminal_transitions_are_safe_to_repeat() {
        let mut task = Task::new("debugging", Priority::Normal);
        task.start();
        task.fail("first", Payload::new());

        assert!(!task.fail("second", Payload::new()));
        assert!(!task.complete(Payload::new()));
        assert!(!task.cancel("late"));
        assert_eq!(task.status(), TaskStatus::Failed);
        assert_eq!(task.metadata()["failure_reason"], json!("first"));
    }

    #[test]
    fn test_block_and_unblock_round_trip() {
        let mut task = Task::new("planning", Priority::Normal);

        assert!(task.block("needs approval"));
        assert!(!task.is_ready());
        assert_eq!(task.block_reason(), Some("needs approval"));
        assert!(task.blocked_at().is_some());

        assert!(task.unblock());
        assert!(task.is_ready());
        assert!(task.block_reason().is_none());
        assert!(task.unblocked_at().is_some());
    }

    #[test]
    fn test_unblock_when_not_blocked_is_noop() {
        let mut task = Task::new("planning", Priority::Normal);
        assert!(!task.unblock());
        assert_eq!(task.status(), TaskStatus::Pending);
    }

    #[test]
    fn test_cancel_from_each_non_terminal_state() {
        let mut pending = Task::new("planning", Priority::Normal);
        assert!(pending.cancel("user abort"));
        assert!(pending.is_cancelled());

        let mut blocked = Task::new("planning", Priority::Normal);
        blocked.block("waiting");
        assert!(blocked.cancel("user abort"));

        let mut running = Task::new("planning", Priority::Normal);
        running.start();
        assert!(running.cancel("user abort"));
        assert_eq!(running.metadata()["cancellation_reason"], json!("user abort"));

        assert!(!running.cancel("again"));
    }

    #[test]
    fn test_is_active_iff_running() {
        let mut task = Task::new("review", Priority::Normal);
        assert!(!task.is_active());
        task.start();
        assert!(task.is_active());
        task.cancel("stop");
        assert!(!task.is_active());
    }

    #[test]
    fn test_status_transitions() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Blocked));
        assert!(TaskStatus::Blocked.can_transition_to(TaskStatus::Pending));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Blocked.can_transition_to(TaskStatus::Running));
        assert!(!TaskStatus::Cancelled.can_transition_to(TaskStatus::Pending));
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Blocked.is_terminal());
    }

    #[test]
    fn test_priorities_are_ordered() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::default(), Priority::Normal);
    }
    #[test]
    fn test_blockers_release_task_when_all_resolved() {
        let mut task = Task::new("testing", Priority::Normal);
        let build = Uuid::new_v4();
        let review = Uuid::new_v4();

        assert!(task.block_on(build, "waiting on build"));
        assert!(task.block_on(review, "waiting on review"));
        assert!(task.block_on(review, "duplicate"));
        assert_eq!(task.blocked_by(), &[build, review]);
        assert_eq!(task.block_reason(), Some("waiting on build"));

        assert!(task.resolve_blocker(build));
        assert_eq!(task.status(), TaskStatus::Blocked);
        assert!(!task.resolve_blocker(build));

        assert!(task.resolve_blocker(review));
        assert!(task.is_ready());
        assert!(task.blocked_by().is_empty());
    }

    #[test]
    fn test_block_on_rejected_once_running() {
        let mut task = Task::new("testing", Priority::Normal);
        task.start();
        assert!(!task.block_on(Uuid::new_v4(), "too late"));
        assert!(task.blocked_by().is_empty());
    }

    #[test]
    fn test_deadline_and_descriptive_fields() {
        let past = Utc::now() - chrono::Duration::seconds(5);
        let task = Task::new("documentation", Priority::Low)
            .with_deadline(past)
            .with_estimated_duration(std::time::Duration::from_secs(90))
            .with_created_by("planning-1a2b3c4d")
            .with_tags(["docs", "release"]);

        assert!(task.is_overdue());
        assert_eq!(task.time_remaining(), Some(std::time::Duration::ZERO));
        assert_eq!(task.estimated_duration(), Some(std::time::Duration::from_secs(90)));
        assert_eq!(task.created_by(), "planning-1a2b3c4d");
        assert_eq!(task.tags(), &["docs".to_string(), "release".to_string()]);

        let open = Task::new("documentation", Priority::Low);
        assert_eq!(open.created_by(), "user");
        assert!(!open.is_overdue());
        assert!(open.time_remaining().is_none());
    }
}
