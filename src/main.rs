use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use ghostpirates_orchestrator::agents::{AgentConfig, AgentType, WorkerAgent};
use ghostpirates_orchestrator::workflow::WorkflowStatus;
use ghostpirates_orchestrator::{
    Agent, AgentResult, Context, Coordinator, CoordinatorConfig, Priority, Task, Workflow,
    WorkflowExecutor, WorkflowStep,
};

#[tokio::main]
async fn main() -> AgentResult<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load environment variables
    dotenv::dotenv().ok();

    let config = CoordinatorConfig::from_env()?;
    tracing::info!(
        max_concurrent_tasks = config.max_concurrent_tasks,
        resilience = config.enable_resilience,
        "Starting orchestrator"
    );

    let coordinator = Arc::new(Coordinator::new(config)?);
    let ctx = Context::new();

    // One echo worker per agent type
    for agent_type in AgentType::ALL {
        let agent_config = AgentConfig::for_type(agent_type);
        let agent = WorkerAgent::from_fn(agent_config.clone(), move |_, task| async move {
            let mut output = task.input().clone();
            output.insert(
                format!("{}_done", agent_type.as_str()),
                Value::String(task.title().to_string()),
            );
            Ok(output)
        });
        agent.initialize(&ctx, &agent_config).await?;
        coordinator.register_agent(Arc::new(agent))?;
    }

    let workflow = Workflow::new("feature", "Plan, implement, test and review a feature")
        .with_step(WorkflowStep::new("plan", "Plan feature").with_agent_type(AgentType::Planning))
        .with_step(
            WorkflowStep::new("code", "Implement feature")
                .with_agent_type(AgentType::Coding)
                .depends_on("plan"),
        )
        .with_step(
            WorkflowStep::new("test", "Test feature")
                .with_agent_type(AgentType::Testing)
                .depends_on("code"),
        )
        .with_step(
            WorkflowStep::new("review", "Review feature")
                .with_agent_type(AgentType::Review)
                .depends_on("code")
                .optional(),
        );

    let executor = WorkflowExecutor::new(coordinator.clone());
    let run_ctx = ctx.child_with_timeout(Duration::from_secs(60));

    match executor.execute_workflow(&run_ctx, workflow).await {
        Ok(workflow) => {
            for step in workflow.steps() {
                if let Some(result) = workflow.get_step_result(&step.id) {
                    tracing::info!(
                        step_id = %step.id,
                        agent_id = %result.agent_id,
                        success = result.success,
                        "Step finished"
                    );
                }
            }
            tracing::info!(
                workflow_id = %workflow.id(),
                status = %workflow.status(),
                "Workflow finished"
            );
        }
        Err(err) => {
            tracing::error!(error = %err, "Workflow failed");
            for workflow in executor.list_workflows() {
                if workflow.status() == WorkflowStatus::Failed {
                    tracing::warn!(
                        workflow_id = %workflow.id(),
                        completed_steps = workflow.results().len(),
                        "Partial results retained"
                    );
                }
            }
        }
    }

    if coordinator.config().enable_collaboration {
        let task = Task::new(AgentType::Coding.as_str(), Priority::High)
            .with_title("Implement login form")
            .with_created_by("demo");
        match coordinator.collaborate(&ctx, &task).await {
            Ok(collaboration) => tracing::info!(
                lead = collaboration.lead().unwrap_or_default(),
                participants = collaboration.participants.len(),
                messages = collaboration.messages.len(),
                success = collaboration.success,
                "Collaboration finished"
            ),
            Err(err) => tracing::error!(error = %err, "Collaboration failed"),
        }
    }

    for (agent_id, stats) in coordinator.all_agent_stats() {
        tracing::debug!(
            agent_id = %agent_id,
            tasks = stats.task_count,
            errors = stats.error_count,
            circuit = %stats.circuit_state,
            "Agent stats"
        );
    }

    coordinator
        .shutdown(&Context::with_timeout(Duration::from_secs(10)))
        .await?;
    tracing::info!("Orchestrator stopped");

    Ok(())
}
