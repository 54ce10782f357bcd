//! Top-level state machine composing the content and verification teams.
//!
//! The meta supervisor routes between the two team sub-graphs until it
//! decides to finish; the required progression is Content team →
//! Verification team → FINISH, with loop-backs permitted inside the
//! recursion cap.

use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::error::OrchestratorError;
use crate::graph::{content_team, verification_team, Route, Supervisor, TeamGraph, FINISH};
use crate::llm::LlmClient;
use crate::model::{
    LinkedInPost, Message, PostGenerationRequest, VerificationReport, CONTENT_TEAM,
    LINKEDIN_CREATOR, STYLE_CHECKER, TECH_VERIFIER, VERIFICATION_TEAM,
};
use crate::progress::{ProgressObserver, StepEvent};
use crate::runtime::AgentRuntime;
use crate::settings::Settings;
use crate::tools::parse_report;

/// Terminal result of a successful generation run.
pub struct GenerationOutcome {
    pub post: LinkedInPost,
    pub verification: Option<VerificationReport>,
}

/// A graph-level failure, tagged with the team that was executing so the
/// task record can show where the run died.
#[derive(Debug)]
pub struct GraphFailure {
    pub error: OrchestratorError,
    pub team: Option<&'static str>,
}

impl GraphFailure {
    fn meta(error: OrchestratorError) -> Self {
        Self { error, team: None }
    }
}

/// The top-level graph: meta supervisor plus the two team sub-graphs.
pub struct MetaGraph {
    content: TeamGraph,
    verification: TeamGraph,
    supervisor: Supervisor,
    recursion_limit: u32,
}

impl MetaGraph {
    pub fn new(settings: &Settings) -> Self {
        let supervisor = Supervisor::new(
            "meta",
            format!(
                "You are a meta-supervisor managing LinkedIn post generation. You coordinate \
                 between the following teams: {}, {}. First direct the Content team to research \
                 a paper and create a LinkedIn post. Then send the completed post to the \
                 Verification team to check technical accuracy and LinkedIn style compliance. \
                 The workflow should be: Content team -> Verification team -> FINISH. Only \
                 finish when both teams have completed their work successfully.",
                CONTENT_TEAM, VERIFICATION_TEAM
            ),
            vec![CONTENT_TEAM, VERIFICATION_TEAM],
        );

        Self {
            content: content_team(settings),
            verification: verification_team(settings),
            supervisor,
            recursion_limit: settings.meta_recursion_limit,
        }
    }

    /// Drive the full workflow and extract the artifact.
    #[instrument(skip_all)]
    pub async fn run(
        &self,
        runtime: &AgentRuntime,
        llm: &dyn LlmClient,
        request_message: String,
        observer: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutcome, GraphFailure> {
        let mut log = vec![Message::human(request_message)];
        let mut transitions = 0u32;
        let mut member_outputs: BTreeMap<String, String> = BTreeMap::new();

        observer.on_event(StepEvent::JobStarted).await;

        loop {
            if cancel.is_cancelled() {
                return Err(GraphFailure::meta(OrchestratorError::Cancelled));
            }

            transitions += 1;
            if transitions > self.recursion_limit {
                return Err(GraphFailure::meta(OrchestratorError::RecursionExceeded(
                    "meta graph".to_string(),
                )));
            }

            let route = self
                .supervisor
                .decide(llm, &log, cancel)
                .await
                .map_err(GraphFailure::meta)?;

            observer
                .on_event(StepEvent::SupervisorRouted {
                    scope: "meta".to_string(),
                    next: match &route {
                        Route::Member(m) => m.clone(),
                        Route::Finish => FINISH.to_string(),
                    },
                })
                .await;

            let team_name = match route {
                Route::Finish => break,
                Route::Member(name) => name,
            };

            let team = if team_name.eq_ignore_ascii_case(CONTENT_TEAM) {
                &self.content
            } else {
                &self.verification
            };

            transitions += 1;
            if transitions > self.recursion_limit {
                return Err(GraphFailure::meta(OrchestratorError::RecursionExceeded(
                    "meta graph".to_string(),
                )));
            }

            observer
                .on_event(StepEvent::TeamEntered { team: team.name })
                .await;

            // Teams receive the content of the last meta message as their
            // own entry message.
            let input = Message::human(
                log.last()
                    .map(|m| m.content.clone())
                    .unwrap_or_default(),
            );

            let run = team
                .run(runtime, llm, input, observer, cancel)
                .await
                .map_err(|error| GraphFailure {
                    error,
                    team: Some(team.name),
                })?;

            for (member, output) in &run.outputs {
                member_outputs.insert(member.clone(), output.clone());
            }

            observer
                .on_event(StepEvent::TeamFinished {
                    team: team.name,
                    findings: run.messages.last().map(|m| m.content.clone()),
                })
                .await;

            // Join semantics: only the team's last message flows back
            // into the meta log.
            if let Some(last) = run.messages.last() {
                log.push(last.clone());
            }
        }

        let draft = member_outputs.get(LINKEDIN_CREATOR).ok_or_else(|| {
            GraphFailure {
                error: OrchestratorError::Internal(
                    "workflow finished without a draft post".to_string(),
                ),
                team: Some(CONTENT_TEAM),
            }
        })?;

        let technical = member_outputs
            .get(TECH_VERIFIER)
            .map(|report| parse_report(report));
        let style = member_outputs
            .get(STYLE_CHECKER)
            .map(|report| parse_report(report));
        let verification = if technical.is_some() || style.is_some() {
            Some(VerificationReport::from_reports(technical, style))
        } else {
            None
        };

        Ok(GenerationOutcome {
            post: LinkedInPost::from_content(draft),
            verification,
        })
    }
}

/// Format the initial human request the way the workflow expects it.
pub fn build_request_message(request: &PostGenerationRequest) -> String {
    let mut parts = vec![format!(
        "Create a LinkedIn post about the machine learning paper: '{}'",
        request.paper_title
    )];

    if let Some(context) = &request.additional_context {
        parts.push(format!("Additional context: {}", context));
    }

    parts.push(format!("Target audience: {}", request.target_audience));
    parts.push(format!(
        "Include technical details: {}",
        if request.include_technical_details {
            "Yes"
        } else {
            "No"
        }
    ));
    parts.push(format!("Maximum hashtags: {}", request.max_hashtags));
    parts.push(format!("Tone: {}", request.tone));
    parts.push(String::new());
    parts.push("Process:".to_string());
    parts.push(
        "1. First, research the paper thoroughly to understand its methodology, results, and impact"
            .to_string(),
    );
    parts.push("2. Create an engaging LinkedIn post based on the research".to_string());
    parts.push("3. Verify the technical accuracy of all claims".to_string());
    parts.push("4. Check that the post follows LinkedIn style best practices".to_string());
    parts.push("5. Provide the final, verified post ready for publication".to_string());

    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_message_lists_constraints_and_process() {
        let request = PostGenerationRequest {
            paper_title: "Attention Is All You Need".to_string(),
            additional_context: Some("Focus on NLP applications".to_string()),
            target_audience: "professional".to_string(),
            include_technical_details: true,
            max_hashtags: 5,
            tone: "professional".to_string(),
        };
        let message = build_request_message(&request);
        assert!(message.contains("'Attention Is All You Need'"));
        assert!(message.contains("Additional context: Focus on NLP applications"));
        assert!(message.contains("Maximum hashtags: 5"));
        assert!(message.contains("1. First, research the paper"));
    }
}
