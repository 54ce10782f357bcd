//! Tool catalog: deterministic functions callable by the model during an
//! agent step.
//!
//! Tools return strings and never raise; failures are encoded into the
//! result text so the model can react. The only exceptions are
//! cancellation and timeouts, which terminate the step.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::error::{OrchestratorError, Result};
use crate::llm::ToolSchema;
use crate::model::{extract_hashtags, ScoreReport};
use crate::search::SearchClient;

pub const RESEARCH_PAPER: &str = "research_paper";
pub const WEB_SEARCH: &str = "web_search";
pub const CREATE_POST: &str = "create_post";
pub const VERIFY_TECHNICAL: &str = "verify_technical";
pub const CHECK_STYLE: &str = "check_style";

const TECHNICAL_APPROVAL_THRESHOLD: f64 = 0.7;
const STYLE_READY_THRESHOLD: f64 = 0.7;
const MAX_KEY_INSIGHTS: usize = 5;

const HYPE_WORDS: &[&str] = &[
    "revolutionary",
    "breakthrough",
    "unprecedented",
    "perfect",
    "solves",
    "guarantees",
    "100%",
    "completely",
];

const TECHNICAL_TERMS: &[&str] = &[
    "neural network",
    "transformer",
    "attention",
    "machine learning",
    "deep learning",
    "reinforcement learning",
    "algorithm",
    "model",
    "dataset",
    "training",
    "inference",
    "optimization",
    "accuracy",
    "precision",
    "recall",
    "supervised",
    "unsupervised",
];

const BASE_HASHTAGS: &[&str] = &[
    "#MachineLearning",
    "#AI",
    "#Research",
    "#Innovation",
    "#TechTrends",
];

const TOPIC_HASHTAGS: &[(&[&str], &str)] = &[
    (&["natural language", "nlp", "text", "language"], "#NLP"),
    (&["computer vision", "cv", "image", "visual"], "#ComputerVision"),
    (&["transformer", "attention", "bert", "gpt"], "#Transformers"),
    (&["deep learning", "neural network"], "#DeepLearning"),
    (&["reinforcement learning", "rl"], "#ReinforcementLearning"),
    (&["data science", "analytics"], "#DataScience"),
    (&["python", "pytorch", "tensorflow"], "#Python"),
    (&["automation", "efficiency"], "#Automation"),
    (&["business", "industry", "enterprise"], "#BusinessAI"),
    (&["algorithm", "optimization"], "#Algorithms"),
];

/// Which tools a worker role may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    ResearchPaper,
    WebSearch,
    CreatePost,
    VerifyTechnical,
    CheckStyle,
}

impl ToolKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::ResearchPaper => RESEARCH_PAPER,
            Self::WebSearch => WEB_SEARCH,
            Self::CreatePost => CREATE_POST,
            Self::VerifyTechnical => VERIFY_TECHNICAL,
            Self::CheckStyle => CHECK_STYLE,
        }
    }

    pub fn schema(self) -> ToolSchema {
        match self {
            Self::ResearchPaper => ToolSchema {
                name: RESEARCH_PAPER.to_string(),
                description: "Research a machine learning paper using web search".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "title": {"type": "string", "description": "Title of the paper"},
                        "focus_areas": {
                            "type": "array",
                            "items": {"type": "string"},
                            "description": "Specific aspects to focus on"
                        }
                    },
                    "required": ["title"]
                }),
            },
            Self::WebSearch => ToolSchema {
                name: WEB_SEARCH.to_string(),
                description: "Search the web for information".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string"}
                    },
                    "required": ["query"]
                }),
            },
            Self::CreatePost => ToolSchema {
                name: CREATE_POST.to_string(),
                description: "Format a LinkedIn post about a machine learning paper".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "content": {"type": "string", "description": "Main content for the post"},
                        "paper_title": {"type": "string"},
                        "key_insights": {"type": "array", "items": {"type": "string"}},
                        "tone": {"type": "string"},
                        "audience": {"type": "string"},
                        "max_hashtags": {"type": "integer"}
                    },
                    "required": ["content", "paper_title", "key_insights"]
                }),
            },
            Self::VerifyTechnical => ToolSchema {
                name: VERIFY_TECHNICAL.to_string(),
                description: "Verify the technical accuracy of claims in a post".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "post_content": {"type": "string"},
                        "paper_reference": {"type": "string"}
                    },
                    "required": ["post_content"]
                }),
            },
            Self::CheckStyle => ToolSchema {
                name: CHECK_STYLE.to_string(),
                description: "Check a post against LinkedIn style best practices".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "post_content": {"type": "string"}
                    },
                    "required": ["post_content"]
                }),
            },
        }
    }
}

#[derive(Deserialize)]
struct ResearchArgs {
    title: String,
    #[serde(default)]
    focus_areas: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
}

#[derive(Deserialize)]
struct CreatePostArgs {
    content: String,
    paper_title: String,
    key_insights: Vec<String>,
    #[serde(default)]
    tone: Option<String>,
    #[serde(default)]
    audience: Option<String>,
    #[serde(default)]
    max_hashtags: Option<usize>,
}

#[derive(Deserialize)]
struct VerifyTechnicalArgs {
    post_content: String,
    #[serde(default)]
    paper_reference: Option<String>,
}

#[derive(Deserialize)]
struct CheckStyleArgs {
    post_content: String,
}

/// Executes tools on behalf of the agent runtime.
pub struct ToolExecutor {
    search: Arc<dyn SearchClient>,
}

impl ToolExecutor {
    pub fn new(search: Arc<dyn SearchClient>) -> Self {
        Self { search }
    }

    /// Run one tool call. Argument and provider errors come back as
    /// strings; cancellation and timeouts propagate.
    #[instrument(skip(self, arguments, cancel))]
    pub async fn execute(
        &self,
        name: &str,
        arguments: &Value,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }

        match name {
            RESEARCH_PAPER => match parse_args::<ResearchArgs>(arguments) {
                Ok(args) => self.research_paper(&args).await,
                Err(e) => Ok(e),
            },
            WEB_SEARCH => match parse_args::<SearchArgs>(arguments) {
                Ok(args) => Ok(self.run_search(&args.query).await?),
                Err(e) => Ok(e),
            },
            CREATE_POST => match parse_args::<CreatePostArgs>(arguments) {
                Ok(args) => Ok(create_post(&args)),
                Err(e) => Ok(e),
            },
            VERIFY_TECHNICAL => match parse_args::<VerifyTechnicalArgs>(arguments) {
                Ok(args) => Ok(technical_report(
                    &args.post_content,
                    args.paper_reference.as_deref().unwrap_or(""),
                )),
                Err(e) => Ok(e),
            },
            CHECK_STYLE => match parse_args::<CheckStyleArgs>(arguments) {
                Ok(args) => Ok(style_report(&args.post_content)),
                Err(e) => Ok(e),
            },
            other => Ok(format!("TOOL_ERROR: unknown tool '{}'", other)),
        }
    }

    /// Search wrapper: provider failures become result text so the model
    /// can continue with degraded information.
    async fn run_search(&self, query: &str) -> Result<String> {
        match self.search.search(query).await {
            Ok(results) => Ok(results),
            Err(e @ OrchestratorError::Cancelled) | Err(e @ OrchestratorError::Timeout(_)) => {
                Err(e)
            }
            Err(e) => Ok(format!("SEARCH_ERROR: {}", e)),
        }
    }

    async fn research_paper(&self, args: &ResearchArgs) -> Result<String> {
        let default_areas = ["methodology", "results", "applications", "impact"];
        let areas: Vec<String> = match &args.focus_areas {
            Some(areas) if !areas.is_empty() => areas.clone(),
            _ => default_areas.iter().map(|s| s.to_string()).collect(),
        };

        let main_query = format!("machine learning paper {} arxiv research", args.title);
        let main_results = self.run_search(&main_query).await?;

        let mut sections = Vec::with_capacity(areas.len());
        for area in &areas {
            let area_query = format!("{} {} machine learning", args.title, area);
            let area_results = self.run_search(&area_query).await?;
            sections.push(format!("--- {} ---\n{}", area.to_uppercase(), area_results));
        }

        Ok(format!(
            "MAIN RESEARCH FINDINGS:\n{}\n\nFOCUSED RESEARCH AREAS:\n{}",
            main_results,
            sections.join("\n")
        ))
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(arguments: &Value) -> std::result::Result<T, String> {
    serde_json::from_value(arguments.clone())
        .map_err(|e| format!("TOOL_ERROR: invalid arguments: {}", e))
}

/// Pure formatter producing the canonical post layout.
fn create_post(args: &CreatePostArgs) -> String {
    let tone = args.tone.as_deref().unwrap_or("professional");
    let audience = args.audience.as_deref().unwrap_or("professional");
    let max_hashtags = args.max_hashtags.unwrap_or(10);

    let opening_emoji = match tone {
        "academic" => "📚",
        "casual" => "💡",
        _ => "🚀",
    };

    let opening = match audience {
        "academic" => format!("{} **New Research Alert: {}**", opening_emoji, args.paper_title),
        "general" => format!("{} **Exciting breakthrough in AI!**", opening_emoji),
        _ => format!(
            "{} **Transforming the Future of AI: {}**",
            opening_emoji, args.paper_title
        ),
    };

    let mut post = format!("{}\n\n{}\n\n", opening, args.content);

    if !args.key_insights.is_empty() {
        post.push_str("💡 **Key Takeaways:**\n");
        for (i, insight) in args.key_insights.iter().take(MAX_KEY_INSIGHTS).enumerate() {
            post.push_str(&format!("\n{}. {}", i + 1, insight));
        }
        post.push_str("\n\n");
    }

    let question = match audience {
        "academic" => {
            "What are your thoughts on this methodology? How do you see it advancing the field?"
        }
        "general" => "What excites you most about AI developments like this?",
        _ => "What are your thoughts on this research? How do you see it impacting your industry?",
    };
    post.push_str(question);
    post.push_str("\n\n");

    post.push_str(&generate_hashtags(&args.paper_title, &args.key_insights, max_hashtags).join(" "));
    post
}

/// Deterministic hashtag selection: fixed base set plus topic matches,
/// capped at `max_hashtags`.
pub fn generate_hashtags(paper_title: &str, key_insights: &[String], max_hashtags: usize) -> Vec<String> {
    let haystack = format!("{} {}", paper_title, key_insights.join(" ")).to_lowercase();

    let mut hashtags: Vec<String> = BASE_HASHTAGS.iter().map(|s| s.to_string()).collect();
    for (patterns, hashtag) in TOPIC_HASHTAGS {
        if patterns.iter().any(|p| haystack.contains(p)) && !hashtags.iter().any(|h| h == hashtag) {
            hashtags.push(hashtag.to_string());
        }
    }
    hashtags.truncate(max_hashtags);
    hashtags
}

/// Structured outcome of the technical accuracy check.
#[derive(Debug, Clone)]
pub struct TechnicalAssessment {
    pub score: f64,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub technical_terms: Vec<String>,
}

/// Pattern-based technical scorer: each hype word, missing attribution,
/// or reference mismatch costs 0.2.
pub fn assess_technical(post_content: &str, paper_reference: &str) -> TechnicalAssessment {
    let lowered = post_content.to_lowercase();
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();

    for word in HYPE_WORDS {
        if lowered.contains(word) {
            issues.push(format!("Potentially overstated claim detected: '{}'", word));
            recommendations.push("Consider using more measured language".to_string());
        }
    }

    if !lowered.contains("et al") && !lowered.contains("by ") {
        issues.push("Missing author attribution".to_string());
        recommendations.push("Add proper attribution to paper authors".to_string());
    }

    let reference = paper_reference.trim();
    if !reference.is_empty() {
        let mentioned = reference
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 3)
            .any(|w| lowered.contains(w));
        if !mentioned {
            issues.push("Post does not reference the source paper".to_string());
            recommendations.push("Mention the paper or its authors explicitly".to_string());
        }
    }

    let score = (1.0 - 0.2 * issues.len() as f64).max(0.0);

    TechnicalAssessment {
        score,
        issues,
        recommendations,
        technical_terms: extract_technical_terms(post_content),
    }
}

/// Render the technical assessment the way the verifier role reports it.
pub fn technical_report(post_content: &str, paper_reference: &str) -> String {
    let assessment = assess_technical(post_content, paper_reference);
    let status = if assessment.score >= TECHNICAL_APPROVAL_THRESHOLD {
        "APPROVED"
    } else {
        "NEEDS REVISION"
    };

    format!(
        "TECHNICAL VERIFICATION REPORT:\n\
         =============================\n\n\
         POST CONTENT ANALYZED:\n{}\n\n\
         TECHNICAL TERMS IDENTIFIED:\n{}\n\n\
         ACCURACY ASSESSMENT:\n\
         Score: {:.2}/1.0\n\n\
         ISSUES IDENTIFIED:\n{}\n\n\
         RECOMMENDATIONS:\n{}\n\n\
         STATUS: {}",
        truncate(post_content, 500),
        if assessment.technical_terms.is_empty() {
            "None detected".to_string()
        } else {
            assessment.technical_terms.join(", ")
        },
        assessment.score,
        bullets(&assessment.issues, "No major issues detected"),
        bullets(&assessment.recommendations, "Post appears technically sound"),
        status
    )
}

/// Structural metrics of a post.
#[derive(Debug, Clone)]
pub struct StyleMetrics {
    pub character_count: usize,
    pub emoji_count: usize,
    pub hashtag_count: usize,
    pub has_question: bool,
    pub has_numbered_list: bool,
}

/// Structured outcome of the style check.
#[derive(Debug, Clone)]
pub struct StyleAssessment {
    pub score: f64,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub metrics: StyleMetrics,
}

/// Style scorer: base 1.0, minus 0.1 per failed structural check.
pub fn assess_style(post_content: &str) -> StyleAssessment {
    let metrics = StyleMetrics {
        character_count: post_content.chars().count(),
        emoji_count: count_emoji(post_content),
        hashtag_count: extract_hashtags(post_content).len(),
        has_question: post_content.contains('?'),
        has_numbered_list: has_numbered_list(post_content),
    };

    let mut issues = Vec::new();
    let mut recommendations = Vec::new();

    if metrics.character_count < 600 || metrics.character_count > 1300 {
        issues.push(format!(
            "Character count {} outside the 600-1300 band",
            metrics.character_count
        ));
        recommendations.push("Resize the post for better engagement".to_string());
    }
    if metrics.emoji_count == 0 {
        issues.push("No emojis used".to_string());
        recommendations.push("Add 1-3 relevant emojis for engagement".to_string());
    }
    if !metrics.has_question {
        issues.push("Missing engagement question".to_string());
        recommendations.push("Add a question to encourage comments".to_string());
    }
    if metrics.hashtag_count < 3 || metrics.hashtag_count > 15 {
        issues.push(format!(
            "Hashtag count {} outside the 3-15 band",
            metrics.hashtag_count
        ));
        recommendations.push("Use 3-15 relevant hashtags for discoverability".to_string());
    }
    if !metrics.has_numbered_list {
        issues.push("Missing numbered list".to_string());
        recommendations.push("Structure key points as a numbered list".to_string());
    }

    let score = (1.0 - 0.1 * issues.len() as f64).max(0.0);

    StyleAssessment {
        score,
        issues,
        recommendations,
        metrics,
    }
}

/// Render the style assessment the way the checker role reports it.
pub fn style_report(post_content: &str) -> String {
    let assessment = assess_style(post_content);
    let status = if assessment.score >= STYLE_READY_THRESHOLD {
        "LINKEDIN READY"
    } else {
        "NEEDS STYLE IMPROVEMENTS"
    };

    format!(
        "LINKEDIN STYLE ASSESSMENT:\n\
         =========================\n\n\
         POST ANALYZED:\n{}\n\n\
         METRICS:\n\
         - Character count: {}\n\
         - Emoji count: {}\n\
         - Hashtag count: {}\n\
         - Has engagement question: {}\n\
         - Has numbered list: {}\n\n\
         STYLE SCORE: {:.2}/1.0\n\n\
         ISSUES IDENTIFIED:\n{}\n\n\
         RECOMMENDATIONS:\n{}\n\n\
         STATUS: {}",
        truncate(post_content, 300),
        assessment.metrics.character_count,
        assessment.metrics.emoji_count,
        assessment.metrics.hashtag_count,
        yes_no(assessment.metrics.has_question),
        yes_no(assessment.metrics.has_numbered_list),
        assessment.score,
        bullets(&assessment.issues, "No major style issues"),
        bullets(&assessment.recommendations, "Post follows LinkedIn best practices"),
        status
    )
}

/// Parse a numeric score out of a free-form report. Accepts the canonical
/// `Score: 0.95/1.0` shape as well as looser `score 0.88` phrasings.
pub fn parse_score(report: &str) -> Option<f64> {
    let lowered = report.to_lowercase();
    let idx = lowered.find("score")?;
    let tail = &lowered[idx + "score".len()..];

    let mut number = String::new();
    let mut seen_digit = false;
    for c in tail.chars() {
        if c.is_ascii_digit() || (c == '.' && seen_digit) {
            number.push(c);
            seen_digit = true;
        } else if seen_digit {
            break;
        } else if !matches!(c, ':' | ' ' | '=' | '*') {
            // Something other than a separator before any digit; the
            // number belongs to a different phrase.
            if !c.is_whitespace() {
                return None;
            }
        }
    }
    number.parse().ok().filter(|s: &f64| (0.0..=1.0).contains(s))
}

/// Build a ScoreReport from a textual dimension report; a missing score
/// defaults to zero so a broken verifier reads as a failure, not a pass.
pub fn parse_report(report: &str) -> ScoreReport {
    ScoreReport {
        score: parse_score(report).unwrap_or(0.0),
        issues: section_bullets(report, "ISSUES IDENTIFIED:"),
        suggestions: section_bullets(report, "RECOMMENDATIONS:"),
    }
}

fn section_bullets(report: &str, header: &str) -> Vec<String> {
    let Some(idx) = report.find(header) else {
        return Vec::new();
    };
    report[idx + header.len()..]
        .lines()
        .skip_while(|l| l.trim().is_empty())
        .take_while(|l| l.trim_start().starts_with("- "))
        .map(|l| l.trim_start().trim_start_matches("- ").to_string())
        .filter(|l| {
            l != "No major issues detected"
                && l != "No major style issues"
                && l != "Post appears technically sound"
                && l != "Post follows LinkedIn best practices"
        })
        .collect()
}

fn extract_technical_terms(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut terms = Vec::new();
    for term in TECHNICAL_TERMS {
        if lowered.contains(term) && !terms.iter().any(|t| t == term) {
            terms.push(term.to_string());
        }
    }
    terms
}

fn count_emoji(text: &str) -> usize {
    text.chars()
        .filter(|&c| {
            let code = c as u32;
            (0x1F300..=0x1FAFF).contains(&code)
                || (0x2600..=0x27BF).contains(&code)
                || (0x1F1E6..=0x1F1FF).contains(&code)
        })
        .count()
}

fn has_numbered_list(text: &str) -> bool {
    text.lines().any(|line| {
        let trimmed = line.trim_start();
        trimmed
            .split_once('.')
            .map(|(head, _)| !head.is_empty() && head.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false)
    })
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        let prefix: String = text.chars().take(limit).collect();
        format!("{}...", prefix)
    }
}

fn bullets(items: &[String], empty_note: &str) -> String {
    if items.is_empty() {
        format!("- {}", empty_note)
    } else {
        items
            .iter()
            .map(|i| format!("- {}", i))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "Yes"
    } else {
        "No"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean_post() -> String {
        let body = "This study introduces attention mechanisms for sequence modeling, \
                    presented by Vaswani et al. The architecture removes recurrence \
                    entirely and relies on self-attention to draw global dependencies, \
                    which improved training parallelism on translation benchmarks. "
            .repeat(3);
        format!(
            "🚀 Research worth reading\n\n{}\n1. Self-attention replaces recurrence\n2. Strong BLEU scores\n3. Parallel training\n\nWhat do you think?\n\n#AI #MachineLearning #Transformers",
            body
        )
    }

    #[test]
    fn technical_score_penalizes_hype() {
        let assessment = assess_technical(
            "This revolutionary breakthrough by Vaswani et al is great",
            "",
        );
        // Two hype words at 0.2 each.
        assert!((assessment.score - 0.6).abs() < 1e-9);
        assert_eq!(assessment.issues.len(), 2);
    }

    #[test]
    fn technical_score_flags_missing_attribution() {
        let assessment = assess_technical("A post with no citation whatsoever", "");
        assert!(assessment
            .issues
            .iter()
            .any(|i| i.contains("attribution")));
        assert!((assessment.score - 0.8).abs() < 1e-9);
    }

    #[test]
    fn technical_score_floors_at_zero() {
        let post = "revolutionary breakthrough unprecedented perfect solves guarantees 100% completely";
        let assessment = assess_technical(post, "Some Unrelated Paper Title");
        assert_eq!(assessment.score, 0.0);
    }

    #[test]
    fn clean_post_is_approved() {
        let report = technical_report(&clean_post(), "Attention Is All You Need");
        assert!(report.contains("Score: 1.00/1.0"));
        assert!(report.contains("STATUS: APPROVED"));
    }

    #[test]
    fn style_score_of_clean_post() {
        let assessment = assess_style(&clean_post());
        assert_eq!(assessment.score, 1.0, "issues: {:?}", assessment.issues);
    }

    #[test]
    fn style_penalizes_each_failed_check() {
        // Short, no emoji, no question, no hashtags, no list.
        let assessment = assess_style("too short");
        assert!((assessment.score - 0.5).abs() < 1e-9);
        assert_eq!(assessment.issues.len(), 5);
    }

    #[test]
    fn style_report_thresholds() {
        let ready = style_report(&clean_post());
        assert!(ready.contains("STATUS: LINKEDIN READY"));

        let not_ready = style_report("too short");
        assert!(not_ready.contains("STATUS: NEEDS STYLE IMPROVEMENTS"));
    }

    #[test]
    fn parse_score_handles_canonical_and_loose_forms() {
        assert_eq!(parse_score("Score: 0.95/1.0"), Some(0.95));
        assert_eq!(parse_score("the style score 0.88 overall"), Some(0.88));
        assert_eq!(parse_score("STYLE SCORE: 0.40/1.0"), Some(0.4));
        assert_eq!(parse_score("no number here"), None);
    }

    #[test]
    fn parse_report_extracts_bullets() {
        let report = technical_report("This revolutionary work", "");
        let parsed = parse_report(report.as_str());
        assert!((parsed.score - 0.6).abs() < 1e-9);
        assert_eq!(parsed.issues.len(), 2);
        assert!(!parsed.suggestions.is_empty());
    }

    #[test]
    fn hashtags_respect_cap_and_topics() {
        let tags = generate_hashtags(
            "Attention Is All You Need",
            &["transformer architectures for NLP".to_string()],
            6,
        );
        assert_eq!(tags.len(), 6);
        assert!(tags.contains(&"#NLP".to_string()));
        assert_eq!(tags[0], "#MachineLearning");
    }

    #[test]
    fn hashtags_match_abbreviated_topics() {
        let tags = generate_hashtags("A Survey of RL Methods", &[], 20);
        assert!(tags.contains(&"#ReinforcementLearning".to_string()));

        let tags = generate_hashtags("CV Transformers", &[], 20);
        assert!(tags.contains(&"#ComputerVision".to_string()));
    }

    #[test]
    fn numbered_list_detection() {
        assert!(has_numbered_list("intro\n1. first\n2. second"));
        assert!(!has_numbered_list("no list here. just prose"));
    }

    #[tokio::test]
    async fn create_post_tool_formats_canonically() {
        struct NoSearch;
        #[async_trait::async_trait]
        impl SearchClient for NoSearch {
            async fn search(&self, _q: &str) -> Result<String> {
                Ok(String::new())
            }
        }

        let executor = ToolExecutor::new(Arc::new(NoSearch));
        let args = json!({
            "content": "Body of the post",
            "paper_title": "Attention Is All You Need",
            "key_insights": ["a", "b", "c", "d", "e", "f"],
            "max_hashtags": 4
        });
        let post = executor
            .execute(CREATE_POST, &args, &CancellationToken::new())
            .await
            .unwrap();

        assert!(post.starts_with("🚀"));
        assert!(post.contains("1. a"));
        assert!(post.contains("5. e"));
        assert!(!post.contains("6. f"), "insights are capped at five");
        assert!(post.contains('?'));
        assert_eq!(extract_hashtags(&post).len(), 4);
    }

    #[tokio::test]
    async fn search_outage_becomes_result_text() {
        struct DownSearch;
        #[async_trait::async_trait]
        impl SearchClient for DownSearch {
            async fn search(&self, _q: &str) -> Result<String> {
                Err(OrchestratorError::unavailable("unavailable"))
            }
        }

        let executor = ToolExecutor::new(Arc::new(DownSearch));
        let args = json!({"query": "anything"});
        let result = executor
            .execute(WEB_SEARCH, &args, &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.starts_with("SEARCH_ERROR:"));
    }

    #[tokio::test]
    async fn cancelled_tool_call_terminates() {
        struct NoSearch;
        #[async_trait::async_trait]
        impl SearchClient for NoSearch {
            async fn search(&self, _q: &str) -> Result<String> {
                Ok(String::new())
            }
        }

        let executor = ToolExecutor::new(Arc::new(NoSearch));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = executor
            .execute(WEB_SEARCH, &json!({"query": "q"}), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "cancelled");
    }

    #[tokio::test]
    async fn invalid_arguments_become_tool_error_text() {
        struct NoSearch;
        #[async_trait::async_trait]
        impl SearchClient for NoSearch {
            async fn search(&self, _q: &str) -> Result<String> {
                Ok(String::new())
            }
        }

        let executor = ToolExecutor::new(Arc::new(NoSearch));
        let result = executor
            .execute(CREATE_POST, &json!({"wrong": true}), &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.starts_with("TOOL_ERROR:"));
    }
}
