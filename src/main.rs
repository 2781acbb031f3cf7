use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::{Value, json};

use research_orchestrator::config::OrchestratorConfig;
use research_orchestrator::error::WorkerError;
use research_orchestrator::logging::init_logging;
use research_orchestrator::store::{FileStore, PersistenceGateway};
use research_orchestrator::task::{TaskParams, TaskSpec};
use research_orchestrator::worker::{FnWorker, Worker, WorkerRegistry};
use research_orchestrator::workflow::WorkflowState;
use research_orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = OrchestratorConfig::from_env().context("invalid orchestrator configuration")?;
    let _log_guard = init_logging("info", config.log_dir.as_deref());

    eprintln!("🧭 Research Orchestrator v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Data dir: {}", config.data_dir.display());
    eprintln!(
        "   Limits: {} concurrent, {} MB",
        config.max_concurrent, config.memory_budget_mb
    );

    let orchestrator = build_orchestrator(config)
        .await
        .context("failed to start orchestrator")?;

    let workflow_id = format!("demo-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
    run_sample_workflow(&orchestrator, &workflow_id).await?;

    let progress = orchestrator.get_workflow_progress(&workflow_id).await?;
    println!("{}", serde_json::to_string_pretty(&progress)?);
    println!(
        "{}",
        serde_json::to_string_pretty(&orchestrator.get_status().await)?
    );

    orchestrator.shutdown().await;
    Ok(())
}

/// Open the file store and wire the demo workers into an orchestrator.
async fn build_orchestrator(config: OrchestratorConfig) -> research_orchestrator::Result<Orchestrator> {
    config.validate()?;
    let store: Arc<dyn PersistenceGateway> = Arc::new(FileStore::open(&config.data_dir).await?);
    Ok(Orchestrator::new(config, Arc::new(demo_workers()), store))
}

/// Move `workflow_id` to `target`, failing if the edge is rejected.
async fn advance(
    orchestrator: &Orchestrator,
    workflow_id: &str,
    target: WorkflowState,
    data: Value,
) -> anyhow::Result<()> {
    let accepted = orchestrator
        .workflows()
        .transition(workflow_id, target, data)
        .await?;
    anyhow::ensure!(accepted, "workflow {workflow_id} rejected transition to {target}");
    Ok(())
}

/// Walk one case through every canonical phase.
async fn run_sample_workflow(orchestrator: &Orchestrator, workflow_id: &str) -> anyhow::Result<()> {
    orchestrator
        .workflows()
        .create(workflow_id, json!({ "subject": "Acme Corp", "requested_by": "demo" }))
        .await?;

    advance(orchestrator, workflow_id, WorkflowState::IntakeProcessing, Value::Null).await?;
    let intake = orchestrator
        .submit(
            "intake",
            TaskSpec::new()
                .with_param("document_size_mb", 4)
                .with_priority(10),
        )
        .await?;
    advance(
        orchestrator,
        workflow_id,
        WorkflowState::IntakeComplete,
        json!({ "intake": intake }),
    )
    .await?;

    advance(orchestrator, workflow_id, WorkflowState::ResearchInitiated, Value::Null).await?;
    let research: Vec<Value> = orchestrator
        .submit_batch(
            ["filings", "news", "litigation"]
                .into_iter()
                .map(|topic| {
                    let spec = TaskSpec::new()
                        .with_param("topic", topic)
                        .with_param("search_depth", 2)
                        .with_param("max_results", 20);
                    ("research".to_string(), spec)
                })
                .collect(),
        )
        .await
        .into_iter()
        .map(|result| {
            result.unwrap_or_else(|e| serde_json::to_value(e.report()).unwrap_or_default())
        })
        .collect();
    advance(
        orchestrator,
        workflow_id,
        WorkflowState::ResearchComplete,
        json!({ "research": research }),
    )
    .await?;

    let analysis = orchestrator
        .submit("analysis", TaskSpec::new().with_param("findings", research.len()))
        .await?;
    advance(
        orchestrator,
        workflow_id,
        WorkflowState::AnalysisComplete,
        json!({ "analysis": analysis }),
    )
    .await?;

    advance(orchestrator, workflow_id, WorkflowState::ReportGeneration, Value::Null).await?;
    let report = orchestrator.submit("report", TaskSpec::new()).await?;
    advance(
        orchestrator,
        workflow_id,
        WorkflowState::Completed,
        json!({ "report": report }),
    )
    .await?;

    Ok(())
}

fn demo_worker(summary: &'static str, delay: Duration) -> Arc<dyn Worker> {
    Arc::new(FnWorker::new(move |kind: String, params: TaskParams| async move {
        tokio::time::sleep(delay).await;
        Ok::<_, WorkerError>(json!({
            "kind": kind,
            "summary": summary,
            "params": params,
        }))
    }))
}

fn demo_workers() -> WorkerRegistry {
    WorkerRegistry::new()
        .with("intake", || {
            demo_worker("Documents classified", Duration::from_millis(50))
        })
        .with("research", || {
            demo_worker("Sources gathered", Duration::from_millis(120))
        })
        .with("analysis", || {
            demo_worker("Findings scored", Duration::from_millis(80))
        })
        .with("report", || {
            demo_worker("Report drafted", Duration::from_millis(60))
        })
}
