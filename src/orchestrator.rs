//! Core coordinator that accepts requests, spawns background generation
//! jobs, and owns the shared clients.
//!
//! Each submitted task gets exactly one job. The job acquires a
//! generation permit, drives the meta graph, and writes the terminal
//! state through the task's ProgressTracker. Standalone verification is
//! a synchronous path under its own permit pool.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};
use crate::governor::ConcurrencyGovernor;
use crate::llm::LlmClient;
use crate::meta::{build_request_message, GraphFailure, MetaGraph};
use crate::model::{
    BatchPostRequest, PostGenerationRequest, PostVerificationRequest, ScoreReport, Task,
    VerificationReport,
};
use crate::progress::{ProgressObserver, ProgressTracker};
use crate::runtime::AgentRuntime;
use crate::search::SearchClient;
use crate::settings::Settings;
use crate::store::TaskStore;
use crate::tools::{assess_style, assess_technical, ToolExecutor};

pub struct Orchestrator {
    settings: Settings,
    store: Arc<TaskStore>,
    governor: Arc<ConcurrencyGovernor>,
    llm: Arc<dyn LlmClient>,
    search: Arc<dyn SearchClient>,
    shutdown: CancellationToken,
    jobs: Mutex<JoinSet<()>>,
    cancel_handles: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl Orchestrator {
    pub fn new(
        settings: Settings,
        store: Arc<TaskStore>,
        llm: Arc<dyn LlmClient>,
        search: Arc<dyn SearchClient>,
    ) -> Self {
        let governor = Arc::new(ConcurrencyGovernor::new(
            settings.max_concurrent_generations,
            settings.max_concurrent_verifications,
        ));
        Self {
            settings,
            store,
            governor,
            llm,
            search,
            shutdown: CancellationToken::new(),
            jobs: Mutex::new(JoinSet::new()),
            cancel_handles: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> Arc<TaskStore> {
        self.store.clone()
    }

    pub fn governor(&self) -> Arc<ConcurrencyGovernor> {
        self.governor.clone()
    }

    /// Service status map for the health endpoint.
    pub fn service_health(&self) -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("llm", self.llm.health()),
            ("search", self.search.health()),
            ("store", self.store.health()),
        ])
    }

    /// Accept a generation request: create the PENDING task and spawn its
    /// background job. Returns the new task id.
    #[instrument(skip(self, request), fields(paper = %request.paper_title))]
    pub async fn submit(self: &Arc<Self>, request: &PostGenerationRequest) -> Result<String> {
        let task_id = Uuid::new_v4().to_string();
        let task = Task::new(task_id.clone(), serde_json::to_value(request).map_err(
            |e| OrchestratorError::Serialization(e.to_string()),
        )?);
        self.enqueue(task, request.clone()).await?;
        Ok(task_id)
    }

    /// Accept a batch: one task per paper, all sharing a batch id.
    pub async fn submit_batch(
        self: &Arc<Self>,
        request: &BatchPostRequest,
    ) -> Result<(String, Vec<String>)> {
        let batch_id = Uuid::new_v4().to_string();
        if request.schedule_posts {
            // Scheduling metadata is recorded on the tasks; execution is
            // still immediate.
            info!(
                "Batch {} requested scheduling at {} minute intervals",
                batch_id, request.time_interval_minutes
            );
        }

        let mut task_ids = Vec::with_capacity(request.papers.len());
        for paper in &request.papers {
            let task_id = Uuid::new_v4().to_string();
            let mut task = Task::new(
                task_id.clone(),
                serde_json::to_value(paper)
                    .map_err(|e| OrchestratorError::Serialization(e.to_string()))?,
            );
            task.batch_id = Some(batch_id.clone());
            self.enqueue(task, paper.clone()).await?;
            task_ids.push(task_id);
        }

        info!("Accepted batch {} with {} papers", batch_id, task_ids.len());
        Ok((batch_id, task_ids))
    }

    async fn enqueue(self: &Arc<Self>, task: Task, request: PostGenerationRequest) -> Result<()> {
        // Conditional create guards against a duplicate concurrent submit
        // for the same id.
        self.store.put_if_absent(&task).await?;

        let task_id = task.task_id.clone();
        let cancel = self.shutdown.child_token();
        self.cancel_handles
            .lock()
            .await
            .insert(task_id.clone(), cancel.clone());

        let store = self.store.clone();
        let governor = self.governor.clone();
        let llm = self.llm.clone();
        let search = self.search.clone();
        let settings = self.settings.clone();
        let handles = self.cancel_handles.clone();

        self.jobs.lock().await.spawn(async move {
            run_generation_job(store, governor, llm, search, settings, task, request, cancel)
                .await;
            handles.lock().await.remove(&task_id);
        });

        Ok(())
    }

    /// Cancel one in-flight task. No-op for unknown or finished tasks.
    pub async fn cancel_task(&self, task_id: &str) {
        if let Some(token) = self.cancel_handles.lock().await.get(task_id) {
            info!("Cancelling task {}", task_id);
            token.cancel();
        }
    }

    /// Standalone verification: a degenerate one-step pass through the
    /// verification scoring, under its own permit and deadline.
    #[instrument(skip(self, request))]
    pub async fn verify(&self, request: &PostVerificationRequest) -> Result<VerificationReport> {
        let _permit = self.governor.acquire_verification(&self.shutdown).await?;

        let deadline = self.settings.verification_timeout();
        let request = request.clone();
        let work = async move {
            let technical = matches!(request.verification_type.as_str(), "technical" | "both")
                .then(|| {
                    let assessment = assess_technical(
                        &request.post_content,
                        request.paper_reference.as_deref().unwrap_or(""),
                    );
                    ScoreReport {
                        score: assessment.score,
                        issues: assessment.issues,
                        suggestions: assessment.recommendations,
                    }
                });

            let style = matches!(request.verification_type.as_str(), "style" | "both").then(|| {
                let assessment = assess_style(&request.post_content);
                ScoreReport {
                    score: assessment.score,
                    issues: assessment.issues,
                    suggestions: assessment.recommendations,
                }
            });

            VerificationReport::from_reports(technical, style)
        };

        tokio::time::timeout(deadline, work)
            .await
            .map_err(|_| OrchestratorError::Timeout("verification deadline exceeded".to_string()))
    }

    /// Cancel in-flight jobs and wait for them to write their terminal
    /// states.
    pub async fn shutdown(&self) {
        info!("Shutting down orchestrator");
        self.shutdown.cancel();
        let mut jobs = self.jobs.lock().await;
        while let Some(result) = jobs.join_next().await {
            if let Err(e) = result {
                error!("Generation job panicked during shutdown: {}", e);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_generation_job(
    store: Arc<TaskStore>,
    governor: Arc<ConcurrencyGovernor>,
    llm: Arc<dyn LlmClient>,
    search: Arc<dyn SearchClient>,
    settings: Settings,
    task: Task,
    request: PostGenerationRequest,
    cancel: CancellationToken,
) {
    let task_id = task.task_id.clone();
    let tracker = ProgressTracker::new(store, task);
    tracker.initialize_teams().await;

    // The task stays PENDING while it waits for a permit; the permit is
    // held for the whole run and released on every exit path.
    let permit = match governor.acquire_generation(&cancel).await {
        Ok(permit) => permit,
        Err(e) => {
            let _ = tracker.fail(&e, None).await;
            return;
        }
    };

    info!("Task {} acquired generation permit", task_id);

    let runtime = AgentRuntime::new(
        llm.clone(),
        ToolExecutor::new(search),
        settings.max_tool_rounds,
    );
    let meta = MetaGraph::new(&settings);
    let request_message = build_request_message(&request);

    let observer: &dyn ProgressObserver = &tracker;
    let run = meta.run(&runtime, llm.as_ref(), request_message, observer, &cancel);

    let result = match settings.generation_timeout() {
        Some(limit) => match tokio::time::timeout(limit, run).await {
            Ok(result) => result,
            Err(_) => Err(GraphFailure {
                error: OrchestratorError::Timeout("generation deadline exceeded".to_string()),
                team: None,
            }),
        },
        None => run.await,
    };

    match result {
        Ok(outcome) => {
            if let Err(e) = tracker.complete(outcome.post, outcome.verification).await {
                warn!("Task {} completed but the final write failed: {}", task_id, e);
            } else {
                info!("Task {} completed", task_id);
            }
        }
        Err(failure) => {
            warn!(
                "Task {} failed in {:?}: {}",
                task_id, failure.team, failure.error
            );
            let _ = tracker.fail(&failure.error, failure.team).await;
        }
    }

    drop(permit);
    let _ = tracker.flush().await;
}
