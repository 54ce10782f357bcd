//! Persisted value types: tasks, team/agent progress, artifacts, reports.
//!
//! Everything here serializes to JSON for the task store; timestamps are
//! UTC and serialize as ISO-8601 via chrono.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TaskError;

pub const CONTENT_TEAM: &str = "Content team";
pub const VERIFICATION_TEAM: &str = "Verification team";

pub const PAPER_RESEARCHER: &str = "PaperResearcher";
pub const LINKEDIN_CREATOR: &str = "LinkedInCreator";
pub const TECH_VERIFIER: &str = "TechVerifier";
pub const STYLE_CHECKER: &str = "StyleChecker";

/// Fixed agent → team mapping. Team membership never changes at runtime.
pub fn team_of(agent: &str) -> Option<&'static str> {
    match agent {
        PAPER_RESEARCHER | LINKEDIN_CREATOR => Some(CONTENT_TEAM),
        TECH_VERIFIER | STYLE_CHECKER => Some(VERIFICATION_TEAM),
        _ => None,
    }
}

/// Members of a team, in execution order.
pub fn team_members(team: &str) -> &'static [&'static str] {
    match team {
        CONTENT_TEAM => &[PAPER_RESEARCHER, LINKEDIN_CREATOR],
        VERIFICATION_TEAM => &[TECH_VERIFIER, STYLE_CHECKER],
        _ => &[],
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Working,
    Completed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    Human,
    System,
    Ai,
    Tool,
}

/// A tool invocation requested by the model within one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// One entry in a task's append-only message log. The log itself is
/// in-memory only; the final artifact is the only content persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Set on tool-result messages: the id of the call being answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn human(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Human,
            name: None,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            name: None,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn ai(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Ai,
            name: Some(name.into()),
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn ai_with_tool_calls(tool_calls: Vec<ToolCall>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Ai,
            name: None,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(
        call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: MessageRole::Tool,
            name: Some(name.into()),
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// Live status of a single worker role within a team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub agent_name: String,
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_activity: Option<String>,
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub findings: Option<String>,
    pub last_update: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AgentState {
    pub fn idle(agent_name: &str, now: DateTime<Utc>) -> Self {
        Self {
            agent_name: agent_name.to_string(),
            status: AgentStatus::Idle,
            current_activity: None,
            progress: 0.0,
            findings: None,
            last_update: now,
            error_message: None,
        }
    }
}

/// Aggregated status of one team. `progress` is always the arithmetic
/// mean of its agents' progress (0.0 for an empty team).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamState {
    pub team_name: String,
    pub status: TaskStatus,
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_focus: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_findings: Option<String>,
    pub agents: BTreeMap<String, AgentState>,
}

impl TeamState {
    pub fn pending(team_name: &str, now: DateTime<Utc>) -> Self {
        let agents = team_members(team_name)
            .iter()
            .map(|name| (name.to_string(), AgentState::idle(name, now)))
            .collect();
        Self {
            team_name: team_name.to_string(),
            status: TaskStatus::Pending,
            progress: 0.0,
            current_focus: None,
            started_at: None,
            completed_at: None,
            team_findings: None,
            agents,
        }
    }

    /// Mean of agent progress; zero-agent teams report 0.
    pub fn mean_agent_progress(&self) -> f64 {
        if self.agents.is_empty() {
            return 0.0;
        }
        self.agents.values().map(|a| a.progress).sum::<f64>() / self.agents.len() as f64
    }
}

/// The generated post plus extracted metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedInPost {
    pub content: String,
    pub hashtags: Vec<String>,
    pub word_count: usize,
    pub character_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engagement_score: Option<f64>,
}

impl LinkedInPost {
    /// Build the artifact from final post content: strips surrounding
    /// fences/labels, extracts hashtags in order of first appearance.
    pub fn from_content(raw: &str) -> Self {
        let content = strip_fences(raw);
        let hashtags = extract_hashtags(&content);
        Self {
            word_count: content.split_whitespace().count(),
            character_count: content.chars().count(),
            content,
            hashtags,
            engagement_score: None,
        }
    }
}

/// Extract `#word` tags in order of first appearance, deduplicated.
/// Idempotent: extracting from the joined result yields the same list.
pub fn extract_hashtags(content: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    let bytes = content.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'#' {
            let start = i;
            i += 1;
            while i < bytes.len()
                && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_')
            {
                i += 1;
            }
            if i > start + 1 {
                let tag = &content[start..i];
                if !tags.iter().any(|t| t == tag) {
                    tags.push(tag.to_string());
                }
            }
        } else {
            i += 1;
        }
    }
    tags
}

fn strip_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix("```")
        .map(|rest| {
            // Drop an optional language label on the fence line.
            match rest.split_once('\n') {
                Some((_, body)) => body,
                None => rest,
            }
        })
        .unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix("```").unwrap_or(trimmed);
    trimmed.trim().to_string()
}

/// Score plus findings for one verification dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    pub score: f64,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    Excellent,
    Good,
    NeedsImprovement,
    Poor,
}

impl Rating {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.9 {
            Self::Excellent
        } else if score >= 0.7 {
            Self::Good
        } else if score >= 0.5 {
            Self::NeedsImprovement
        } else {
            Self::Poor
        }
    }
}

/// Paired technical + style assessment of an artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technical: Option<ScoreReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<ScoreReport>,
    pub overall_score: f64,
    #[serde(default)]
    pub recommendations: Vec<String>,
    pub rating: Rating,
}

impl VerificationReport {
    /// Combine whichever dimensions were assessed; overall is their mean.
    pub fn from_reports(technical: Option<ScoreReport>, style: Option<ScoreReport>) -> Self {
        let scores: Vec<f64> = technical
            .iter()
            .chain(style.iter())
            .map(|r| r.score)
            .collect();
        let overall_score = if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        };
        let recommendations = technical
            .iter()
            .chain(style.iter())
            .flat_map(|r| r.suggestions.iter().cloned())
            .collect();
        Self {
            technical,
            style,
            overall_score,
            recommendations,
            rating: Rating::from_score(overall_score),
        }
    }
}

/// The persisted task record. Written only by the ProgressTracker that
/// owns the task while it runs; read by status endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detailed_status: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub request_data: Value,
    #[serde(default)]
    pub teams: BTreeMap<String, TeamState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<LinkedInPost>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
}

impl Task {
    pub fn new(task_id: String, request_data: Value) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            status: TaskStatus::Pending,
            progress: 0.0,
            current_step: Some("queued".to_string()),
            phase: None,
            detailed_status: None,
            created_at: now,
            updated_at: now,
            request_data,
            teams: BTreeMap::new(),
            result: None,
            verification: None,
            error: None,
            batch_id: None,
        }
    }

    /// Mean of team progress; no teams yet means 0.
    pub fn mean_team_progress(&self) -> f64 {
        if self.teams.is_empty() {
            return 0.0;
        }
        self.teams.values().map(|t| t.progress).sum::<f64>() / self.teams.len() as f64
    }
}

fn default_target_audience() -> String {
    "professional".to_string()
}

fn default_tone() -> String {
    "professional".to_string()
}

fn default_max_hashtags() -> usize {
    10
}

fn default_include_technical_details() -> bool {
    true
}

fn default_verification_type() -> String {
    "both".to_string()
}

fn default_time_interval_minutes() -> u64 {
    60
}

/// Request to generate a post about one paper. Also stored verbatim in
/// the task record as `request_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostGenerationRequest {
    pub paper_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
    #[serde(default = "default_target_audience")]
    pub target_audience: String,
    #[serde(default = "default_include_technical_details")]
    pub include_technical_details: bool,
    #[serde(default = "default_max_hashtags")]
    pub max_hashtags: usize,
    #[serde(default = "default_tone")]
    pub tone: String,
}

/// Standalone verification request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostVerificationRequest {
    pub post_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paper_reference: Option<String>,
    #[serde(default = "default_verification_type")]
    pub verification_type: String,
}

/// Batch of generation requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPostRequest {
    pub papers: Vec<PostGenerationRequest>,
    #[serde(default)]
    pub schedule_posts: bool,
    #[serde(default = "default_time_interval_minutes")]
    pub time_interval_minutes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn team_mapping_is_fixed() {
        assert_eq!(team_of(PAPER_RESEARCHER), Some(CONTENT_TEAM));
        assert_eq!(team_of(LINKEDIN_CREATOR), Some(CONTENT_TEAM));
        assert_eq!(team_of(TECH_VERIFIER), Some(VERIFICATION_TEAM));
        assert_eq!(team_of(STYLE_CHECKER), Some(VERIFICATION_TEAM));
        assert_eq!(team_of("Unknown"), None);
    }

    #[test]
    fn hashtag_extraction_dedupes_in_order() {
        let content = "Great work! #AI #MachineLearning more text #AI #Transformers";
        assert_eq!(
            extract_hashtags(content),
            vec!["#AI", "#MachineLearning", "#Transformers"]
        );
    }

    #[test]
    fn hashtag_extraction_is_idempotent() {
        let content = "#one text #two #one trailing # lone hash #three_3";
        let first = extract_hashtags(content);
        let second = extract_hashtags(&first.join(" "));
        assert_eq!(first, second);
        assert_eq!(first, vec!["#one", "#two", "#three_3"]);
    }

    #[test]
    fn artifact_strips_fences() {
        let post = LinkedInPost::from_content("```\nHello world #AI\n```");
        assert_eq!(post.content, "Hello world #AI");
        assert_eq!(post.hashtags, vec!["#AI"]);
        assert_eq!(post.word_count, 3);
    }

    #[test]
    fn rating_bands() {
        assert_eq!(Rating::from_score(0.95), Rating::Excellent);
        assert_eq!(Rating::from_score(0.7), Rating::Good);
        assert_eq!(Rating::from_score(0.675), Rating::NeedsImprovement);
        assert_eq!(Rating::from_score(0.2), Rating::Poor);
    }

    #[test]
    fn verification_report_means_scores() {
        let report = VerificationReport::from_reports(
            Some(ScoreReport {
                score: 0.95,
                issues: vec![],
                suggestions: vec![],
            }),
            Some(ScoreReport {
                score: 0.40,
                issues: vec!["no engagement question".into()],
                suggestions: vec!["add a question".into()],
            }),
        );
        assert!((report.overall_score - 0.675).abs() < 1e-9);
        assert_eq!(report.rating, Rating::NeedsImprovement);
        assert_eq!(report.recommendations, vec!["add a question"]);
    }

    #[test]
    fn task_json_round_trip() {
        let mut task = Task::new(
            "123e4567-e89b-12d3-a456-426614174000".to_string(),
            serde_json::json!({"paper_title": "Attention Is All You Need"}),
        );
        task.teams.insert(
            CONTENT_TEAM.to_string(),
            TeamState::pending(CONTENT_TEAM, Utc::now()),
        );
        let json = serde_json::to_string(&task).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(task, back);
    }

    #[test]
    fn pending_team_has_idle_members() {
        let team = TeamState::pending(VERIFICATION_TEAM, Utc::now());
        assert_eq!(team.agents.len(), 2);
        assert!(team
            .agents
            .values()
            .all(|a| a.status == AgentStatus::Idle && a.progress == 0.0));
        assert_eq!(team.mean_agent_progress(), 0.0);
    }
}
