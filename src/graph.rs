//! Team state machines: a supervisor node routing between member nodes
//! until it decides to finish.
//!
//! Each graph is an explicit loop dispatching on node kind; the message
//! log is a single-writer vector owned by the running job. Supervisors
//! decide routes through the LLM with a forced `route` tool; parsing of
//! the decision is tolerant of malformed output and defaults to FINISH.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::{OrchestratorError, Result};
use crate::llm::{chat_with_retry, ChatRequest, LlmClient, ToolSchema};
use crate::model::{
    Message, CONTENT_TEAM, LINKEDIN_CREATOR, PAPER_RESEARCHER, STYLE_CHECKER, TECH_VERIFIER,
    VERIFICATION_TEAM,
};
use crate::progress::{ProgressObserver, StepEvent};
use crate::runtime::{AgentRuntime, RoleSpec};
use crate::settings::Settings;
use crate::tools::ToolKind;

pub const FINISH: &str = "FINISH";

/// A supervisor's routing decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Member(String),
    Finish,
}

/// Tolerant route parsing: JSON first, then a case-insensitive scan for
/// exactly one member name, then FINISH.
pub fn parse_route(raw: &str, members: &[&str]) -> Route {
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        if let Some(next) = value.get("next").and_then(|v| v.as_str()) {
            if next.eq_ignore_ascii_case(FINISH) {
                return Route::Finish;
            }
            if let Some(member) = members.iter().find(|m| m.eq_ignore_ascii_case(next)) {
                return Route::Member(member.to_string());
            }
        }
    }

    let lowered = raw.to_lowercase();
    let mentioned: Vec<&&str> = members
        .iter()
        .filter(|m| lowered.contains(&m.to_lowercase()))
        .collect();

    match mentioned.as_slice() {
        [member] => Route::Member(member.to_string()),
        _ => Route::Finish,
    }
}

/// LLM-backed router over a fixed option set.
pub struct Supervisor {
    scope: &'static str,
    system_prompt: String,
    options: Vec<&'static str>,
}

impl Supervisor {
    pub fn new(scope: &'static str, system_prompt: String, options: Vec<&'static str>) -> Self {
        Self {
            scope,
            system_prompt,
            options,
        }
    }

    fn route_schema(&self) -> ToolSchema {
        let mut options: Vec<&str> = vec![FINISH];
        options.extend(self.options.iter());
        ToolSchema {
            name: "route".to_string(),
            description: "Select the next role.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "next": {"enum": options}
                },
                "required": ["next"]
            }),
        }
    }

    /// Ask the LLM who should act next.
    #[instrument(skip(self, llm, log, cancel), fields(scope = self.scope))]
    pub async fn decide(
        &self,
        llm: &dyn LlmClient,
        log: &[Message],
        cancel: &CancellationToken,
    ) -> Result<Route> {
        let mut messages = Vec::with_capacity(log.len() + 2);
        messages.push(Message::system(self.system_prompt.clone()));
        messages.extend_from_slice(log);
        messages.push(Message::system(format!(
            "Given the conversation above, who should act next? Or should we FINISH? \
             Select one of: {:?}",
            {
                let mut options: Vec<&str> = vec![FINISH];
                options.extend(self.options.iter());
                options
            }
        )));

        let response = chat_with_retry(
            llm,
            &ChatRequest {
                messages,
                tools: vec![self.route_schema()],
                tool_choice: Some("route".to_string()),
            },
            cancel,
        )
        .await?;

        // Prefer the structured tool call; fall back to scanning text.
        let raw = match response.tool_calls.iter().find(|c| c.name == "route") {
            Some(call) => call.arguments.to_string(),
            None => response.content,
        };

        let route = parse_route(&raw, &self.options);
        if route == Route::Finish && !raw.to_lowercase().contains("finish") {
            warn!("{} supervisor output '{}' not parseable; finishing", self.scope, raw);
        }
        debug!("{} supervisor routed: {:?}", self.scope, route);
        Ok(route)
    }
}

/// Result of one team run: the team-local log and the last output of
/// each member that acted.
pub struct TeamRun {
    pub messages: Vec<Message>,
    pub outputs: BTreeMap<String, String>,
}

/// A supervised sub-workflow over a fixed member set.
pub struct TeamGraph {
    pub name: &'static str,
    members: Vec<RoleSpec>,
    supervisor: Supervisor,
    recursion_limit: u32,
}

impl TeamGraph {
    pub fn new(
        name: &'static str,
        members: Vec<RoleSpec>,
        supervisor: Supervisor,
        recursion_limit: u32,
    ) -> Self {
        Self {
            name,
            members,
            supervisor,
            recursion_limit,
        }
    }

    /// Drive the team to completion. Every node execution (supervisor or
    /// member) counts as one transition against the recursion limit.
    #[instrument(skip_all, fields(team = self.name))]
    pub async fn run(
        &self,
        runtime: &AgentRuntime,
        llm: &dyn LlmClient,
        input: Message,
        observer: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<TeamRun> {
        let mut log = vec![input];
        let mut outputs = BTreeMap::new();
        let mut transitions = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }

            transitions += 1;
            if transitions > self.recursion_limit {
                return Err(OrchestratorError::RecursionExceeded(self.name.to_string()));
            }

            let route = self.supervisor.decide(llm, &log, cancel).await?;
            observer
                .on_event(StepEvent::SupervisorRouted {
                    scope: self.name.to_string(),
                    next: match &route {
                        Route::Member(m) => m.clone(),
                        Route::Finish => FINISH.to_string(),
                    },
                })
                .await;

            let member_name = match route {
                Route::Finish => break,
                Route::Member(name) => name,
            };

            let Some(role) = self
                .members
                .iter()
                .find(|r| r.name.eq_ignore_ascii_case(&member_name))
            else {
                warn!("{} supervisor routed to unknown member '{}'", self.name, member_name);
                break;
            };

            if cancel.is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }

            transitions += 1;
            if transitions > self.recursion_limit {
                return Err(OrchestratorError::RecursionExceeded(self.name.to_string()));
            }

            observer
                .on_event(StepEvent::AgentStarted {
                    agent: role.name,
                    activity: role.activity.to_string(),
                })
                .await;

            let message = runtime.run_step(role, &log, cancel).await?;

            outputs.insert(role.name.to_string(), message.content.clone());
            observer
                .on_event(StepEvent::AgentCompleted {
                    agent: role.name,
                    findings: Some(message.content.clone()),
                })
                .await;

            log.push(message);
        }

        Ok(TeamRun {
            messages: log,
            outputs,
        })
    }
}

/// Content team: research the paper, then draft the post.
pub fn content_team(settings: &Settings) -> TeamGraph {
    let researcher = RoleSpec {
        name: PAPER_RESEARCHER,
        activity: "researching the paper",
        system_prompt: "You are an expert AI researcher who specializes in understanding and \
             summarizing machine learning papers. Your job is to research papers thoroughly and \
             extract key insights, methodologies, and results. Focus on accuracy and clarity. \
             Always provide comprehensive information about the paper including its main \
             contributions, methodology, results, and potential impact."
            .to_string(),
        tools: vec![ToolKind::ResearchPaper, ToolKind::WebSearch],
    };

    let creator = RoleSpec {
        name: LINKEDIN_CREATOR,
        activity: "creating the LinkedIn post",
        system_prompt: "You are a social media expert who specializes in creating engaging \
             LinkedIn posts about technical topics. You know how to make complex AI research \
             accessible and engaging for a professional audience. Create posts that drive \
             engagement while maintaining technical accuracy. Always include relevant hashtags \
             and ask engaging questions to encourage comments and discussions."
            .to_string(),
        tools: vec![ToolKind::CreatePost],
    };

    let supervisor = Supervisor::new(
        CONTENT_TEAM,
        format!(
            "You are a supervisor managing a content creation team with the following workers: \
             {}, {}. Your job is to coordinate research and post creation. First have the \
             researcher gather information about the paper, then have the creator make a \
             LinkedIn post based on that research. Ensure the research is thorough before \
             moving to content creation. When both research and post creation are complete, \
             respond with FINISH.",
            PAPER_RESEARCHER, LINKEDIN_CREATOR
        ),
        vec![PAPER_RESEARCHER, LINKEDIN_CREATOR],
    );

    TeamGraph::new(
        CONTENT_TEAM,
        vec![researcher, creator],
        supervisor,
        settings.team_recursion_limit,
    )
}

/// Verification team: technical accuracy first, then style compliance.
pub fn verification_team(settings: &Settings) -> TeamGraph {
    let tech_verifier = RoleSpec {
        name: TECH_VERIFIER,
        activity: "verifying technical accuracy",
        system_prompt: "You are a technical reviewer and fact-checker specializing in machine \
             learning research. Your job is to verify that LinkedIn posts accurately represent \
             the research they discuss. Check for technical accuracy, proper methodology \
             description, and correct representation of results. Flag any oversimplified or \
             incorrect claims. Ensure proper attribution to authors and avoid overstated \
             language. Be thorough in your analysis and provide specific recommendations for \
             improvement."
            .to_string(),
        tools: vec![ToolKind::VerifyTechnical, ToolKind::ResearchPaper],
    };

    let style_checker = RoleSpec {
        name: STYLE_CHECKER,
        activity: "checking LinkedIn style compliance",
        system_prompt: "You are a LinkedIn content strategist who ensures posts follow best \
             practices for professional social media. Check for appropriate tone, formatting, \
             hashtag usage, engagement elements, and overall LinkedIn style compliance. Suggest \
             improvements to maximize professional impact and engagement. Focus on readability, \
             professional presentation, and LinkedIn-specific optimization techniques."
            .to_string(),
        tools: vec![ToolKind::CheckStyle],
    };

    let supervisor = Supervisor::new(
        VERIFICATION_TEAM,
        format!(
            "You are a supervisor managing a verification team with the following workers: \
             {}, {}. Your job is to ensure quality control for LinkedIn posts about ML \
             research. Have the technical verifier check accuracy first, then have the style \
             checker ensure LinkedIn compliance. Both verifications must be completed before \
             finishing. When both technical and style verifications are complete, respond with \
             FINISH.",
            TECH_VERIFIER, STYLE_CHECKER
        ),
        vec![TECH_VERIFIER, STYLE_CHECKER],
    );

    TeamGraph::new(
        VERIFICATION_TEAM,
        vec![tech_verifier, style_checker],
        supervisor,
        settings.team_recursion_limit,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMBERS: &[&str] = &[PAPER_RESEARCHER, LINKEDIN_CREATOR];

    #[test]
    fn parse_route_json() {
        assert_eq!(
            parse_route(r#"{"next": "PaperResearcher"}"#, MEMBERS),
            Route::Member(PAPER_RESEARCHER.to_string())
        );
        assert_eq!(parse_route(r#"{"next": "FINISH"}"#, MEMBERS), Route::Finish);
        assert_eq!(
            parse_route(r#"{"next": "finish"}"#, MEMBERS),
            Route::Finish
        );
    }

    #[test]
    fn parse_route_scans_text_case_insensitively() {
        assert_eq!(
            parse_route("I think linkedincreator should act next", MEMBERS),
            Route::Member(LINKEDIN_CREATOR.to_string())
        );
    }

    #[test]
    fn parse_route_ambiguity_defaults_to_finish() {
        assert_eq!(
            parse_route(
                "Either PaperResearcher or LinkedInCreator could go",
                MEMBERS
            ),
            Route::Finish
        );
        assert_eq!(parse_route("no idea", MEMBERS), Route::Finish);
    }

    #[test]
    fn parse_route_unknown_member_in_json_falls_back() {
        // JSON names someone outside the team; the scan also finds
        // nothing, so the safe default wins.
        assert_eq!(
            parse_route(r#"{"next": "Ghostwriter"}"#, MEMBERS),
            Route::Finish
        );
    }
}
