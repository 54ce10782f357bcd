//! Web search provider interface and the Tavily-style HTTP client.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::{OrchestratorError, Result};
use crate::settings::Settings;

/// Capability interface for the web search collaborator. Implementations
/// must be safe for concurrent calls.
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Run one query and return a readable results block.
    async fn search(&self, query: &str) -> Result<String>;

    /// Service status string for the health endpoint.
    fn health(&self) -> &'static str {
        "connected"
    }
}

/// HTTP search client speaking the Tavily request shape.
pub struct HttpSearchClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    max_results: usize,
}

impl HttpSearchClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.llm_timeout())
            .build()
            .map_err(|e| OrchestratorError::Internal(format!("http client: {}", e)))?;

        Ok(Self {
            http,
            base_url: settings.search_base_url.trim_end_matches('/').to_string(),
            api_key: settings.search_api_key.clone(),
            max_results: 5,
        })
    }
}

#[derive(Deserialize)]
struct WireResults {
    #[serde(default)]
    results: Vec<WireResult>,
}

#[derive(Deserialize)]
struct WireResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

/// Render provider results as a readable block, one line per hit.
fn format_results(query: &str, results: &[WireResult]) -> String {
    if results.is_empty() {
        return format!("No results found for '{}'", query);
    }
    results
        .iter()
        .map(|r| format!("- {}: {} ({})", r.title, r.content, r.url))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl SearchClient for HttpSearchClient {
    async fn search(&self, query: &str) -> Result<String> {
        let body = json!({
            "api_key": self.api_key,
            "query": query,
            "max_results": self.max_results,
        });

        let response = self
            .http
            .post(format!("{}/search", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OrchestratorError::Timeout("search request timed out".to_string())
                } else {
                    OrchestratorError::unavailable(format!("search request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::unavailable(format!(
                "search provider returned {}: {}",
                status, detail
            )));
        }

        let wire: WireResults = response.json().await.map_err(|e| {
            OrchestratorError::unavailable(format!("malformed search response: {}", e))
        })?;

        debug!("Search for '{}' returned {} results", query, wire.results.len());

        Ok(format_results(query, &wire.results))
    }

    fn health(&self) -> &'static str {
        if self.api_key.is_empty() {
            "not_configured"
        } else {
            "connected"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_results_report_the_query() {
        let rendered = format_results("attention transformers", &[]);
        assert_eq!(rendered, "No results found for 'attention transformers'");
    }

    #[test]
    fn results_render_one_line_per_hit() {
        let results = vec![
            WireResult {
                title: "Attention Is All You Need".to_string(),
                url: "https://arxiv.org/abs/1706.03762".to_string(),
                content: "Introduces the transformer architecture".to_string(),
            },
            WireResult {
                title: "BERT".to_string(),
                url: "https://arxiv.org/abs/1810.04805".to_string(),
                content: "Bidirectional pretraining".to_string(),
            },
        ];
        let rendered = format_results("transformers", &results);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "- Attention Is All You Need: Introduces the transformer architecture \
             (https://arxiv.org/abs/1706.03762)"
        );
        assert_eq!(
            lines[1],
            "- BERT: Bidirectional pretraining (https://arxiv.org/abs/1810.04805)"
        );
    }

    #[test]
    fn health_reflects_api_key_presence() {
        let unconfigured = HttpSearchClient::new(&Settings::default()).unwrap();
        assert_eq!(unconfigured.health(), "not_configured");

        let settings = Settings {
            search_api_key: "tvly-test-key".to_string(),
            ..Default::default()
        };
        let configured = HttpSearchClient::new(&settings).unwrap();
        assert_eq!(configured.health(), "connected");
    }
}
