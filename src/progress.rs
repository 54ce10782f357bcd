//! Progress tracking: the sole writer for a live task.
//!
//! The tracker owns the task record while its job runs, translates graph
//! step events into agent/team/task state, and enforces the aggregation
//! invariants: task progress is the mean of team progress, team progress
//! the mean of agent progress, and status transitions only move forward.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{OrchestratorError, TaskError};
use crate::model::{
    AgentStatus, LinkedInPost, Task, TaskStatus, TeamState, VerificationReport, CONTENT_TEAM,
    LINKEDIN_CREATOR, PAPER_RESEARCHER, STYLE_CHECKER, TECH_VERIFIER, VERIFICATION_TEAM,
};
use crate::store::TaskStore;

/// Debounce window for non-transition writes.
const FLUSH_INTERVAL_MS: u128 = 200;

/// Nominal progress of an agent while it is WORKING. Values are chosen so
/// that the mean-of-means aggregation lands on the documented milestones
/// (0.1 when research starts, 0.4 after research, 0.55 entering
/// verification, 0.85 after the technical pass).
fn working_progress(agent: &str) -> f64 {
    match agent {
        PAPER_RESEARCHER => 0.4,
        LINKEDIN_CREATOR => 0.6,
        TECH_VERIFIER => 0.2,
        STYLE_CHECKER => 0.4,
        _ => 0.5,
    }
}

/// A transition notification emitted by a graph node.
#[derive(Debug, Clone)]
pub enum StepEvent {
    /// The meta graph started driving the task.
    JobStarted,
    /// A team node was entered.
    TeamEntered { team: &'static str },
    /// A member node began executing.
    AgentStarted { agent: &'static str, activity: String },
    /// A member node finished and contributed its findings.
    AgentCompleted {
        agent: &'static str,
        findings: Option<String>,
    },
    /// A team graph reached END.
    TeamFinished {
        team: &'static str,
        findings: Option<String>,
    },
    /// A supervisor made a routing decision (telemetry only).
    SupervisorRouted { scope: String, next: String },
}

/// Capability surface the graphs use to report step events.
#[async_trait]
pub trait ProgressObserver: Send + Sync {
    async fn on_event(&self, event: StepEvent);
}

/// Observer that drops everything; for runs with no task record attached.
pub struct NullObserver;

#[async_trait]
impl ProgressObserver for NullObserver {
    async fn on_event(&self, _event: StepEvent) {}
}

struct Inner {
    task: Task,
    last_flush: Instant,
    dirty: bool,
}

/// Mediates all writes to one task during its execution.
pub struct ProgressTracker {
    store: Arc<TaskStore>,
    inner: Mutex<Inner>,
}

impl ProgressTracker {
    pub fn new(store: Arc<TaskStore>, task: Task) -> Self {
        Self {
            store,
            inner: Mutex::new(Inner {
                task,
                last_flush: Instant::now(),
                dirty: false,
            }),
        }
    }

    /// Current task snapshot.
    pub async fn snapshot(&self) -> Task {
        self.inner.lock().await.task.clone()
    }

    /// Seed both teams with their members in IDLE.
    pub async fn initialize_teams(&self) {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        for team in [CONTENT_TEAM, VERIFICATION_TEAM] {
            inner
                .task
                .teams
                .entry(team.to_string())
                .or_insert_with(|| TeamState::pending(team, now));
        }
        inner.task.updated_at = now;
        let _ = self.write(&mut inner, true).await;
    }

    /// Partial update of top-level task fields.
    pub async fn update_task(&self, patch: TaskPatch) -> crate::error::Result<()> {
        let mut inner = self.inner.lock().await;
        let mut transition = false;

        if let Some(status) = patch.status {
            transition |= Self::advance_task_status(&mut inner.task, status);
        }
        if let Some(step) = patch.current_step {
            inner.task.current_step = Some(step);
        }
        if let Some(phase) = patch.phase {
            inner.task.phase = Some(phase);
        }
        if let Some(detail) = patch.detailed_status {
            inner.task.detailed_status = Some(detail);
        }
        if let Some(result) = patch.result {
            inner.task.result = Some(result);
        }
        if let Some(verification) = patch.verification {
            inner.task.verification = Some(verification);
        }

        Self::recompute(&mut inner.task);
        inner.task.updated_at = Utc::now();
        self.write(&mut inner, transition).await
    }

    /// Update one agent, then re-aggregate its team and the task.
    pub async fn update_agent(
        &self,
        agent: &str,
        status: AgentStatus,
        activity: Option<String>,
        progress: Option<f64>,
        findings: Option<String>,
        error: Option<String>,
    ) -> crate::error::Result<()> {
        let Some(team_name) = crate::model::team_of(agent) else {
            return Err(OrchestratorError::Internal(format!(
                "agent '{}' has no team",
                agent
            )));
        };

        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let mut transition = false;

        let team = inner
            .task
            .teams
            .entry(team_name.to_string())
            .or_insert_with(|| TeamState::pending(team_name, now));

        if team.status == TaskStatus::Pending {
            team.status = TaskStatus::InProgress;
            team.started_at = Some(now);
            transition = true;
        }

        let fatal_error = error.is_some() && status == AgentStatus::Error;
        if let Some(state) = team.agents.get_mut(agent) {
            if Self::advance_agent_status(state, status) {
                transition = true;
            }
            let target = progress.unwrap_or(match state.status {
                AgentStatus::Idle => 0.0,
                AgentStatus::Working => working_progress(agent),
                AgentStatus::Completed => 1.0,
                AgentStatus::Error => state.progress,
            });
            // Progress never moves backwards within a run.
            state.progress = state.progress.max(target.clamp(0.0, 1.0));
            if let Some(activity) = activity.clone() {
                state.current_activity = Some(activity);
            }
            if let Some(findings) = findings {
                state.findings = Some(findings);
            }
            if let Some(error) = error {
                state.error_message = Some(error);
            }
            state.last_update = now;
        }

        if let Some(activity) = activity {
            team.current_focus = Some(activity);
        }

        if fatal_error {
            team.status = TaskStatus::Failed;
            transition = true;
        } else if team
            .agents
            .values()
            .all(|a| a.status == AgentStatus::Completed)
        {
            if team.status != TaskStatus::Completed {
                team.status = TaskStatus::Completed;
                team.completed_at = Some(now);
                transition = true;
            }
        }

        Self::recompute(&mut inner.task);
        inner.task.updated_at = now;
        self.write(&mut inner, transition).await
    }

    /// Terminal success: result and verification written exactly once.
    pub async fn complete(
        &self,
        result: LinkedInPost,
        verification: Option<VerificationReport>,
    ) -> crate::error::Result<()> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        for team in inner.task.teams.values_mut() {
            if team.status != TaskStatus::Completed {
                team.status = TaskStatus::Completed;
                team.completed_at = Some(now);
            }
            for agent in team.agents.values_mut() {
                if agent.status != AgentStatus::Completed {
                    agent.status = AgentStatus::Completed;
                }
                agent.progress = 1.0;
                agent.last_update = now;
            }
        }

        Self::advance_task_status(&mut inner.task, TaskStatus::Completed);
        inner.task.result = Some(result);
        inner.task.verification = verification;
        inner.task.current_step = Some("completed".to_string());
        inner.task.phase = Some("completed".to_string());
        Self::recompute(&mut inner.task);
        inner.task.updated_at = now;
        self.write(&mut inner, true).await
    }

    /// Terminal failure. Progress freezes; partial team state is kept so
    /// clients can see which team failed.
    pub async fn fail(
        &self,
        error: &OrchestratorError,
        failing_team: Option<&str>,
    ) -> crate::error::Result<()> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        if let Some(team_name) = failing_team {
            if let Some(team) = inner.task.teams.get_mut(team_name) {
                if !team.status.is_terminal() {
                    team.status = TaskStatus::Failed;
                }
            }
        }

        Self::advance_task_status(&mut inner.task, TaskStatus::Failed);
        inner.task.error = Some(TaskError::from(error));
        inner.task.current_step = Some("failed".to_string());
        inner.task.updated_at = now;
        self.write(&mut inner, true).await
    }

    /// Force pending changes out to the store.
    pub async fn flush(&self) -> crate::error::Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.dirty {
            self.write(&mut inner, true).await?;
        }
        Ok(())
    }

    fn advance_task_status(task: &mut Task, new: TaskStatus) -> bool {
        if task.status.is_terminal() || task.status == new {
            return false;
        }
        let forward = matches!(
            (task.status, new),
            (TaskStatus::Pending, _) | (TaskStatus::InProgress, TaskStatus::Completed)
                | (TaskStatus::InProgress, TaskStatus::Failed)
        );
        if forward {
            task.status = new;
            true
        } else {
            false
        }
    }

    fn advance_agent_status(state: &mut crate::model::AgentState, new: AgentStatus) -> bool {
        if state.status == new {
            return false;
        }
        let forward = matches!(
            (state.status, new),
            (AgentStatus::Idle, _)
                | (AgentStatus::Working, AgentStatus::Completed)
                | (AgentStatus::Working, AgentStatus::Error)
        );
        if forward {
            state.status = new;
            true
        } else {
            debug!(
                "Ignoring backward agent transition {:?} -> {:?} for {}",
                state.status, new, state.agent_name
            );
            false
        }
    }

    /// Re-derive team and task progress from agent progress. Progress is
    /// frozen once the task is FAILED.
    fn recompute(task: &mut Task) {
        if task.status == TaskStatus::Failed {
            return;
        }
        for team in task.teams.values_mut() {
            team.progress = team.mean_agent_progress();
        }
        task.progress = task.mean_team_progress();
    }

    async fn write(&self, inner: &mut Inner, transition: bool) -> crate::error::Result<()> {
        let due = transition
            || inner.task.status.is_terminal()
            || inner.last_flush.elapsed().as_millis() >= FLUSH_INTERVAL_MS;

        if !due {
            inner.dirty = true;
            return Ok(());
        }

        inner.dirty = false;
        inner.last_flush = Instant::now();
        if let Err(e) = self.store.put(&inner.task).await {
            // Store degradation must not take the job down.
            warn!("Task {} write failed: {}", inner.task.task_id, e);
            if matches!(e, OrchestratorError::Serialization(_)) {
                return Err(e);
            }
        }
        Ok(())
    }
}

/// Optional fields for `ProgressTracker::update_task`.
#[derive(Debug, Default)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub current_step: Option<String>,
    pub phase: Option<String>,
    pub detailed_status: Option<String>,
    pub result: Option<LinkedInPost>,
    pub verification: Option<VerificationReport>,
}

#[async_trait]
impl ProgressObserver for ProgressTracker {
    async fn on_event(&self, event: StepEvent) {
        let result = match event {
            StepEvent::JobStarted => {
                self.update_task(TaskPatch {
                    status: Some(TaskStatus::InProgress),
                    current_step: Some("starting".to_string()),
                    phase: Some("starting".to_string()),
                    ..Default::default()
                })
                .await
            }
            StepEvent::TeamEntered { team } => {
                let phase = match team {
                    CONTENT_TEAM => "content",
                    VERIFICATION_TEAM => "verification",
                    _ => "starting",
                };
                self.update_task(TaskPatch {
                    phase: Some(phase.to_string()),
                    current_step: Some(phase.to_string()),
                    ..Default::default()
                })
                .await
            }
            StepEvent::AgentStarted { agent, activity } => {
                let detail = format!("{} is {}", agent, activity);
                let update = self
                    .update_agent(
                        agent,
                        AgentStatus::Working,
                        Some(activity),
                        None,
                        None,
                        None,
                    )
                    .await;
                match update {
                    Ok(()) => {
                        self.update_task(TaskPatch {
                            detailed_status: Some(detail),
                            ..Default::default()
                        })
                        .await
                    }
                    err => err,
                }
            }
            StepEvent::AgentCompleted { agent, findings } => {
                self.update_agent(agent, AgentStatus::Completed, None, None, findings, None)
                    .await
            }
            StepEvent::TeamFinished { team, findings } => {
                let mut inner = self.inner.lock().await;
                if let Some(state) = inner.task.teams.get_mut(team) {
                    if findings.is_some() {
                        state.team_findings = findings;
                    }
                }
                inner.task.updated_at = Utc::now();
                self.write(&mut inner, true).await
            }
            StepEvent::SupervisorRouted { scope, next } => {
                debug!("{} supervisor routed to {}", scope, next);
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!("Progress update failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn tracker() -> ProgressTracker {
        let store = Arc::new(TaskStore::in_memory(Duration::from_secs(60)));
        let task = Task::new("t1".into(), serde_json::json!({}));
        ProgressTracker::new(store, task)
    }

    async fn assert_means(tracker: &ProgressTracker) {
        let task = tracker.snapshot().await;
        let mean: f64 = task.mean_team_progress();
        assert!(
            (task.progress - mean).abs() < 1e-9,
            "task progress {} != mean {}",
            task.progress,
            mean
        );
        for team in task.teams.values() {
            assert!((team.progress - team.mean_agent_progress()).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn progress_is_mean_of_means() {
        let tracker = tracker();
        tracker.initialize_teams().await;
        assert_means(&tracker).await;

        tracker.on_event(StepEvent::JobStarted).await;
        tracker
            .on_event(StepEvent::AgentStarted {
                agent: PAPER_RESEARCHER,
                activity: "researching the paper".into(),
            })
            .await;
        assert_means(&tracker).await;

        let task = tracker.snapshot().await;
        assert!((task.progress - 0.1).abs() < 1e-9);

        tracker
            .on_event(StepEvent::AgentCompleted {
                agent: PAPER_RESEARCHER,
                findings: Some("findings".into()),
            })
            .await;
        tracker
            .on_event(StepEvent::AgentStarted {
                agent: LINKEDIN_CREATOR,
                activity: "drafting the post".into(),
            })
            .await;
        assert_means(&tracker).await;
        let task = tracker.snapshot().await;
        assert!((task.progress - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn status_never_moves_backward() {
        let tracker = tracker();
        tracker.initialize_teams().await;
        tracker.on_event(StepEvent::JobStarted).await;

        let err = OrchestratorError::Cancelled;
        tracker.fail(&err, Some(CONTENT_TEAM)).await.unwrap();

        let before = tracker.snapshot().await;
        assert_eq!(before.status, TaskStatus::Failed);

        // Late updates after the terminal write must be ignored.
        tracker
            .update_task(TaskPatch {
                status: Some(TaskStatus::InProgress),
                ..Default::default()
            })
            .await
            .unwrap();
        let after = tracker.snapshot().await;
        assert_eq!(after.status, TaskStatus::Failed);
        assert_eq!(after.error.as_ref().unwrap().kind, "cancelled");
    }

    #[tokio::test]
    async fn team_completes_when_all_agents_complete() {
        let tracker = tracker();
        tracker.initialize_teams().await;
        for agent in [PAPER_RESEARCHER, LINKEDIN_CREATOR] {
            tracker
                .update_agent(agent, AgentStatus::Working, None, None, None, None)
                .await
                .unwrap();
            tracker
                .update_agent(agent, AgentStatus::Completed, None, None, None, None)
                .await
                .unwrap();
        }
        let task = tracker.snapshot().await;
        let team = &task.teams[CONTENT_TEAM];
        assert_eq!(team.status, TaskStatus::Completed);
        assert!(team.completed_at.is_some());
        assert!((team.progress - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn failed_task_freezes_progress() {
        let tracker = tracker();
        tracker.initialize_teams().await;
        tracker
            .update_agent(PAPER_RESEARCHER, AgentStatus::Working, None, None, None, None)
            .await
            .unwrap();
        let frozen = tracker.snapshot().await.progress;

        tracker
            .fail(
                &OrchestratorError::RecursionExceeded("Content team".into()),
                Some(CONTENT_TEAM),
            )
            .await
            .unwrap();

        // Completion of a straggler update must not move progress.
        tracker
            .update_agent(PAPER_RESEARCHER, AgentStatus::Completed, None, None, None, None)
            .await
            .unwrap();
        let task = tracker.snapshot().await;
        assert_eq!(task.status, TaskStatus::Failed);
        assert!((task.progress - frozen).abs() < 1e-9);
        assert_eq!(task.teams[CONTENT_TEAM].status, TaskStatus::Failed);
        assert_eq!(task.teams[VERIFICATION_TEAM].status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn complete_writes_result_once() {
        let tracker = tracker();
        tracker.initialize_teams().await;
        tracker
            .complete(LinkedInPost::from_content("Done #AI"), None)
            .await
            .unwrap();
        let task = tracker.snapshot().await;
        assert_eq!(task.status, TaskStatus::Completed);
        assert!((task.progress - 1.0).abs() < 1e-9);
        assert!(task.teams.values().all(|t| t.status == TaskStatus::Completed));
        assert_eq!(task.result.unwrap().hashtags, vec!["#AI"]);
    }
}
