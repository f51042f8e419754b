use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use petgraph::graph::NodeIndex;
use petgraph::Graph;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::agents::errors::{AgentError, AgentResult};
use crate::agents::types::{AgentType, Capability};
use crate::task::{Payload, TaskResult};

/// Workflow lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Step lifecycle; `Running` means dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed)
    }
}

/// One node of a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    pub name: String,
    pub agent_type: Option<AgentType>,
    pub required_capabilities: Vec<Capability>,
    pub input: Payload,
    pub depends_on: Vec<String>,
    /// A failed optional step does not fail the workflow
    pub optional: bool,
}

impl WorkflowStep {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            agent_type: None,
            required_capabilities: Vec::new(),
            input: Payload::new(),
            depends_on: Vec::new(),
            optional: false,
        }
    }

    pub fn with_agent_type(mut self, agent_type: AgentType) -> Self {
        self.agent_type = Some(agent_type);
        self
    }

    pub fn with_capability(mut self, capability: impl Into<Capability>) -> Self {
        self.required_capabilities.push(capability.into());
        self
    }

    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.depends_on.push(step_id.into());
        self
    }

    pub fn with_input(mut self, input: Payload) -> Self {
        self.input = input;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Routing key for the task this step becomes: the agent type when set,
    /// else the first required capability, else the step name
    pub fn task_type(&self) -> String {
        if let Some(agent_type) = self.agent_type {
            return agent_type.as_str().to_string();
        }
        match self.required_capabilities.first() {
            Some(capability) => capability.as_str().to_string(),
            None => self.name.clone(),
        }
    }
}

/// A DAG of steps executed to a single terminal outcome
///
/// Step results are only written through [`Workflow::set_step_result`].
/// Once the workflow is completed or failed its results are read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    id: Uuid,
    name: String,
    description: String,
    steps: Vec<WorkflowStep>,
    step_status: HashMap<String, StepStatus>,
    results: HashMap<String, TaskResult>,
    status: WorkflowStatus,
    error: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl Workflow {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            steps: Vec::new(),
            step_status: HashMap::new(),
            results: HashMap::new(),
            status: WorkflowStatus::Pending,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Appends a step
    ///
    /// A repeated id is accepted: both definitions stay in the step list and
    /// lookups resolve to the latest one.
    pub fn add_step(&mut self, step: WorkflowStep) -> &mut Self {
        if self.step_status.contains_key(&step.id) {
            warn!(
                workflow_id = %self.id,
                step_id = %step.id,
                "duplicate step id, later definition takes precedence"
            );
        }
        self.step_status.insert(step.id.clone(), StepStatus::Pending);
        self.steps.push(step);
        self
    }

    /// Builder form of [`add_step`](Self::add_step)
    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.add_step(step);
        self
    }

    // ===== Lifecycle =====

    pub fn start(&mut self) -> bool {
        if self.status != WorkflowStatus::Pending {
            return false;
        }
        self.status = WorkflowStatus::Running;
        self.started_at = Some(Utc::now());
        true
    }

    pub fn complete(&mut self) -> bool {
        if self.status != WorkflowStatus::Running {
            return false;
        }
        self.status = WorkflowStatus::Completed;
        self.completed_at = Some(Utc::now());
        true
    }

    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = WorkflowStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
        true
    }

    // ===== Steps =====

    /// Latest definition of `step_id`
    pub fn step(&self, step_id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().rev().find(|s| s.id == step_id)
    }

    pub fn step_status(&self, step_id: &str) -> Option<StepStatus> {
        self.step_status.get(step_id).copied()
    }

    /// Marks a step as handed to an agent
    pub fn mark_dispatched(&mut self, step_id: &str) -> bool {
        match self.step_status.get_mut(step_id) {
            Some(status) if *status == StepStatus::Pending => {
                *status = StepStatus::Running;
                true
            }
            _ => false,
        }
    }

    /// Records the terminal result of a step
    pub fn set_step_result(&mut self, step_id: &str, result: TaskResult) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let Some(status) = self.step_status.get_mut(step_id) else {
            return false;
        };
        *status = if result.success {
            StepStatus::Completed
        } else {
            StepStatus::Failed
        };
        self.results.insert(step_id.to_string(), result);
        true
    }

    pub fn get_step_result(&self, step_id: &str) -> Option<&TaskResult> {
        self.results.get(step_id)
    }

    fn dependency_satisfied(&self, dep_id: &str) -> bool {
        if self.results.get(dep_id).is_some_and(|r| r.success) {
            return true;
        }
        self.step(dep_id).is_some_and(|dep| dep.optional)
            && self.step_status(dep_id) == Some(StepStatus::Failed)
    }

    /// True if the step has not been dispatched and every dependency either
    /// succeeded or is an optional step that failed
    pub fn is_step_ready(&self, step_id: &str) -> bool {
        if self.step_status(step_id) != Some(StepStatus::Pending) {
            return false;
        }
        self.step(step_id).is_some_and(|step| {
            step.depends_on
                .iter()
                .all(|dep| self.dependency_satisfied(dep))
        })
    }

    /// Ready steps in insertion order, one entry per step id
    pub fn get_ready_steps(&self) -> Vec<WorkflowStep> {
        let mut seen = HashSet::new();
        self.steps
            .iter()
            .filter(|s| seen.insert(s.id.as_str()))
            .filter(|s| self.is_step_ready(&s.id))
            .filter_map(|s| self.step(&s.id).cloned())
            .collect()
    }

    pub fn all_steps_terminal(&self) -> bool {
        self.step_status.values().all(StepStatus::is_terminal)
    }

    /// Ids of steps still waiting to be dispatched, in insertion order
    pub fn pending_steps(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.steps
            .iter()
            .filter(|s| seen.insert(s.id.as_str()))
            .filter(|s| self.step_status(&s.id) == Some(StepStatus::Pending))
            .map(|s| s.id.clone())
            .collect()
    }

    /// Input for `step`: successful dependency outputs merged in declaration
    /// order (later keys overwrite earlier ones), then the step's own input
    pub fn merged_input(&self, step: &WorkflowStep) -> Payload {
        let mut input = Payload::new();
        for dep in &step.depends_on {
            if let Some(result) = self.results.get(dep).filter(|r| r.success) {
                input.extend(result.output.clone());
            }
        }
        input.extend(step.input.clone());
        input
    }

    /// Rejects dependency cycles, including self-dependencies
    ///
    /// Dependencies on unknown step ids are not an error here.
    pub fn validate(&self) -> AgentResult<()> {
        let mut graph: Graph<String, ()> = Graph::new();
        let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();

        for step in &self.steps {
            nodes
                .entry(step.id.as_str())
                .or_insert_with(|| graph.add_node(step.id.clone()));
        }

        for step_id in nodes.keys() {
            let Some(step) = self.step(step_id) else {
                continue;
            };
            let step_node = nodes[step_id];
            for dep in &step.depends_on {
                if let Some(&dep_node) = nodes.get(dep.as_str()) {
                    graph.add_edge(dep_node, step_node, ());
                }
            }
        }

        petgraph::algo::toposort(&graph, None)
            .map(|_| ())
            .map_err(|cycle| AgentError::WorkflowCycle {
                workflow_id: self.id,
                step_id: graph[cycle.node_id()].clone(),
            })
    }

    // ===== Accessors =====

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }

    pub fn results(&self) -> &HashMap<String, TaskResult> {
        &self.results
    }

    pub fn status(&self) -> WorkflowStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }
}
