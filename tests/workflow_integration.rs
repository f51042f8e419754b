//! Integration tests for workflow execution
//!
//! These tests verify optional/required step semantics, parallel dispatch of
//! ready steps, cancellation, and re-dispatch after circuit breaker
//! rejections.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ghostpirates_orchestrator::agents::{AgentConfig, AgentError, AgentType, WorkerAgent};
use ghostpirates_orchestrator::resilience::{CircuitBreakerConfig, RetryPolicy};
use ghostpirates_orchestrator::workflow::{
    StepStatus, Workflow, WorkflowExecutor, WorkflowExecutorConfig, WorkflowStatus, WorkflowStep,
};
use ghostpirates_orchestrator::{Context, Coordinator, CoordinatorConfig, Priority, Task, TaskStatus};

use common::{coordinator, fast_config, recovering_agent, scripted_agent, slow_agent};

/// Executor over planning/coding/testing/review agents that fail the listed
/// step names
fn scripted_executor(failing_steps: &[&str]) -> WorkflowExecutor {
    let coordinator = coordinator(fast_config());
    for agent_type in [
        AgentType::Planning,
        AgentType::Coding,
        AgentType::Testing,
        AgentType::Review,
    ] {
        coordinator
            .register_agent(scripted_agent(agent_type, failing_steps))
            .unwrap();
    }
    WorkflowExecutor::new(coordinator)
}

/// A (no deps), B (depends on A, required), C (depends on A, optional)
fn abc_workflow() -> Workflow {
    Workflow::new("abc", "required and optional branches")
        .with_step(WorkflowStep::new("a", "A").with_agent_type(AgentType::Planning))
        .with_step(
            WorkflowStep::new("b", "B")
                .with_agent_type(AgentType::Coding)
                .depends_on("a"),
        )
        .with_step(
            WorkflowStep::new("c", "C")
                .with_agent_type(AgentType::Review)
                .depends_on("a")
                .optional(),
        )
}

#[tokio::test]
async fn test_optional_failure_does_not_block_completion() {
    let executor = scripted_executor(&["C"]);

    let workflow = executor
        .execute_workflow(&Context::new(), abc_workflow())
        .await
        .unwrap();

    assert_eq!(workflow.status(), WorkflowStatus::Completed);
    assert_eq!(workflow.results().len(), 3);
    assert!(workflow.get_step_result("a").unwrap().success);
    assert!(workflow.get_step_result("b").unwrap().success);

    let c = workflow.get_step_result("c").unwrap();
    assert!(!c.success);
    assert!(c.error.as_deref().unwrap().contains("C rejected"));
    assert_eq!(workflow.step_status("c"), Some(StepStatus::Failed));

    let stored = executor.get_workflow(workflow.id()).unwrap();
    assert_eq!(stored.status(), WorkflowStatus::Completed);
}

#[tokio::test]
async fn test_required_failure_fails_workflow() {
    let executor = scripted_executor(&["B"]);
    let workflow = abc_workflow().with_step(
        WorkflowStep::new("d", "D")
            .with_agent_type(AgentType::Testing)
            .depends_on("b"),
    );
    let workflow_id = workflow.id();

    let err = executor
        .execute_workflow(&Context::new(), workflow)
        .await
        .unwrap_err();

    match &err {
        AgentError::StepFailed { step_id, source } => {
            assert_eq!(step_id, "b");
            assert!(matches!(**source, AgentError::Validation(_)));
        }
        other => panic!("unexpected error: {other}"),
    }

    let workflow = executor.get_workflow(workflow_id).unwrap();
    assert_eq!(workflow.status(), WorkflowStatus::Failed);
    assert!(workflow.error().unwrap().contains("b"));
    assert!(workflow.get_step_result("a").unwrap().success);
    assert!(!workflow.get_step_result("b").unwrap().success);
    assert!(workflow.get_step_result("d").is_none());
    assert_eq!(workflow.step_status("d"), Some(StepStatus::Pending));
}

#[tokio::test]
async fn test_dependent_of_failed_optional_step_runs() {
    let executor = scripted_executor(&["C"]);
    let workflow = abc_workflow().with_step(
        WorkflowStep::new("d", "D")
            .with_agent_type(AgentType::Testing)
            .depends_on("b")
            .depends_on("c"),
    );

    let workflow = executor
        .execute_workflow(&Context::new(), workflow)
        .await
        .unwrap();

    let d = workflow.get_step_result("d").unwrap();
    assert!(d.success);
    assert_eq!(d.output["A_by"], "planning");
    assert_eq!(d.output["B_by"], "coding");
    assert!(!d.output.contains_key("C_by"));
}

#[tokio::test]
async fn test_ready_steps_run_in_parallel() {
    let coordinator = coordinator(fast_config());
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    for agent_type in [AgentType::Planning, AgentType::Coding, AgentType::Testing] {
        coordinator
            .register_agent(slow_agent(
                agent_type,
                Duration::from_millis(50),
                active.clone(),
                peak.clone(),
            ))
            .unwrap();
    }
    let executor = WorkflowExecutor::new(coordinator);
    let workflow = Workflow::new("fan-out", "")
        .with_step(WorkflowStep::new("root", "root").with_agent_type(AgentType::Planning))
        .with_step(
            WorkflowStep::new("left", "left")
                .with_agent_type(AgentType::Coding)
                .depends_on("root"),
        )
        .with_step(
            WorkflowStep::new("right", "right")
                .with_agent_type(AgentType::Testing)
                .depends_on("root"),
        );

    executor
        .execute_workflow(&Context::new(), workflow)
        .await
        .unwrap();

    assert_eq!(peak.load(Ordering::SeqCst), 2);
    assert_eq!(active.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_parallel_steps_wait_for_a_single_busy_agent() {
    let coordinator = coordinator(CoordinatorConfig::default());
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (active_in, peak_in) = (active.clone(), peak.clone());
    coordinator
        .register_agent(Arc::new(WorkerAgent::from_fn(
            AgentConfig::for_type(AgentType::Coding),
            move |_, task| {
                let active = active_in.clone();
                let peak = peak_in.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(task.input().clone())
                }
            },
        )))
        .unwrap();
    let executor = WorkflowExecutor::new(coordinator.clone());
    let workflow = Workflow::new("contended", "")
        .with_step(WorkflowStep::new("frontend", "frontend").with_agent_type(AgentType::Coding))
        .with_step(WorkflowStep::new("backend", "backend").with_agent_type(AgentType::Coding));

    let workflow = executor
        .execute_workflow(&Context::new(), workflow)
        .await
        .unwrap();

    assert_eq!(workflow.status(), WorkflowStatus::Completed);
    assert_eq!(workflow.step_status("frontend"), Some(StepStatus::Completed));
    assert_eq!(workflow.step_status("backend"), Some(StepStatus::Completed));
    assert_eq!(peak.load(Ordering::SeqCst), 1);

    let tasks = coordinator.list_tasks();
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|t| t.status() == TaskStatus::Completed));
}

#[tokio::test]
async fn test_unroutable_step_leaves_no_pending_task() {
    let coordinator = coordinator(fast_config());
    coordinator
        .register_agent(scripted_agent(AgentType::Coding, &[]))
        .unwrap();
    let executor = WorkflowExecutor::new(coordinator.clone());
    let workflow = Workflow::new("unroutable", "").with_step(
        WorkflowStep::new("audit", "audit").with_capability("security_audit"),
    );

    let err = executor
        .execute_workflow(&Context::new(), workflow)
        .await
        .unwrap_err();

    assert!(matches!(err.root(), AgentError::NoSuitableAgent { .. }));
    let tasks = coordinator.list_tasks();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status(), TaskStatus::Cancelled);
}

#[tokio::test]
async fn test_cancellation_stops_dispatch() {
    let coordinator = coordinator(fast_config());
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    coordinator
        .register_agent(slow_agent(
            AgentType::Coding,
            Duration::from_secs(30),
            active.clone(),
            peak.clone(),
        ))
        .unwrap();
    let executor = Arc::new(WorkflowExecutor::new(coordinator.clone()));
    let workflow = Workflow::new("long", "")
        .with_step(WorkflowStep::new("build", "build").with_agent_type(AgentType::Coding))
        .with_step(
            WorkflowStep::new("ship", "ship")
                .with_agent_type(AgentType::Coding)
                .depends_on("build"),
        );
    let workflow_id = workflow.id();

    let ctx = Context::new();
    let runner = executor.clone();
    let run_ctx = ctx.clone();
    let execution =
        tokio::spawn(async move { runner.execute_workflow(&run_ctx, workflow).await });

    while executor
        .get_workflow(workflow_id)
        .map(|w| w.step_status("build") != Some(StepStatus::Running))
        .unwrap_or(true)
    {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(
        executor.get_workflow(workflow_id).unwrap().status(),
        WorkflowStatus::Running
    );
    ctx.cancel();

    let err = execution.await.unwrap().unwrap_err();
    assert!(err.is_cancellation());

    let workflow = executor.get_workflow(workflow_id).unwrap();
    assert_eq!(workflow.status(), WorkflowStatus::Failed);
    assert_eq!(workflow.step_status("build"), Some(StepStatus::Failed));
    assert_eq!(workflow.step_status("ship"), Some(StepStatus::Pending));
    assert_eq!(coordinator.list_tasks().len(), 1);
    assert!(peak.load(Ordering::SeqCst) <= 1);
}

#[tokio::test]
async fn test_circuit_open_step_is_redispatched() {
    let config = fast_config()
        .with_retry(RetryPolicy::no_retry())
        .with_circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            timeout: Duration::from_millis(40),
        });
    let coordinator: Arc<Coordinator> = coordinator(config);
    coordinator
        .register_agent(recovering_agent("coder", AgentType::Coding, 1))
        .unwrap();

    // Trip the breaker
    let task_id = coordinator
        .submit_task(Task::new("coding", Priority::Normal))
        .unwrap();
    assert!(coordinator
        .execute_task(&Context::new(), task_id)
        .await
        .is_err());

    let executor = WorkflowExecutor::with_config(
        coordinator.clone(),
        WorkflowExecutorConfig {
            circuit_open_retries: 3,
            circuit_open_backoff: Duration::from_millis(30),
            ..WorkflowExecutorConfig::default()
        },
    );
    let workflow = Workflow::new("patient", "")
        .with_step(WorkflowStep::new("code", "code").with_agent_type(AgentType::Coding));

    let workflow = executor
        .execute_workflow(&Context::new(), workflow)
        .await
        .unwrap();

    assert!(workflow.get_step_result("code").unwrap().success);
    assert!(coordinator.get_agent_stats("coder").ledger.circuit_rejections >= 1);
}

#[tokio::test]
async fn test_circuit_open_step_fails_without_redispatch() {
    let config = fast_config()
        .with_retry(RetryPolicy::no_retry())
        .with_circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            timeout: Duration::from_secs(60),
        });
    let coordinator = coordinator(config);
    coordinator
        .register_agent(recovering_agent("coder", AgentType::Coding, 1))
        .unwrap();
    let task_id = coordinator
        .submit_task(Task::new("coding", Priority::Normal))
        .unwrap();
    let _ = coordinator.execute_task(&Context::new(), task_id).await;

    let executor = WorkflowExecutor::new(coordinator);
    let workflow = Workflow::new("impatient", "")
        .with_step(WorkflowStep::new("code", "code").with_agent_type(AgentType::Coding));

    let err = executor
        .execute_workflow(&Context::new(), workflow)
        .await
        .unwrap_err();

    assert!(matches!(err.root(), AgentError::CircuitOpen { .. }));
}

#[tokio::test]
async fn test_list_workflows_keeps_every_run() {
    let executor = scripted_executor(&[]);

    for _ in 0..3 {
        executor
            .execute_workflow(&Context::new(), abc_workflow())
            .await
            .unwrap();
    }

    let workflows = executor.list_workflows();
    assert_eq!(workflows.len(), 3);
    assert!(workflows
        .iter()
        .all(|w| w.status() == WorkflowStatus::Completed));
}
