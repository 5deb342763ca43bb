//! Web search decision and retrieval
//!
//! A small auxiliary LLM call decides whether the user's question needs
//! fresh web information; a keyword heuristic covers the model being
//! unavailable. Search itself runs against the live Wikipedia API and
//! degrades to empty results on any failure, so simulated content never
//! reaches the prompt.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{WebSearchConfig, WebSearchDecisionConfig};
use crate::llm::{LlmAdapter, LlmMessage, LlmRequest};

const DECISION_PROMPT: &str = "Decide whether answering the user's message requires fresh \
information from the web (current events, prices, weather, recent releases). \
Answer with exactly one word: yes or no.";

/// Phrases that suggest the question is about current affairs
static FRESH_HINTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        "(?i)今天|现在|最新|最近|新闻|天气|股价|价格|\
         today|latest|current|news|weather|price|recent",
    )
    .expect("fresh-hint pattern is valid")
});

/// Heuristic fallback used when the decision model is unreachable
pub fn needs_fresh_info(query: &str) -> bool {
    FRESH_HINTS.is_match(query)
}

/// Decide whether to search for this query.
///
/// The auxiliary call runs under a bounded timeout; on timeout the
/// configured fallback policy applies (`enable_timeout_fallback` selects
/// the conservative "search anyway" answer).
pub async fn should_search(
    llm: &dyn LlmAdapter,
    model: &str,
    cfg: &WebSearchDecisionConfig,
    query: &str,
) -> bool {
    let req = LlmRequest {
        messages: vec![
            LlmMessage::system(DECISION_PROMPT),
            LlmMessage::user(query),
        ],
        model: model.to_string(),
        temperature: Some(0.0),
        max_tokens: Some(8),
        stream: false,
        options: None,
    };

    let deadline = Duration::from_secs(cfg.timeout_seconds);
    match tokio::time::timeout(deadline, llm.generate(&req)).await {
        Ok(Ok(answer)) => answer.trim().to_lowercase().starts_with("yes"),
        Ok(Err(e)) => {
            debug!("Search decision model failed ({e}), using heuristic");
            needs_fresh_info(query)
        }
        Err(_) => {
            debug!("Search decision timed out after {}s", cfg.timeout_seconds);
            cfg.enable_timeout_fallback
        }
    }
}

/// One search hit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub title: String,
    pub snippet: String,
}

#[derive(Debug, Deserialize)]
struct OpenSearchResponse(String, Vec<String>, Vec<String>, Vec<String>);

/// Live Wikipedia search client
pub struct WebSearcher {
    client: reqwest::Client,
    cfg: WebSearchConfig,
}

impl WebSearcher {
    pub fn new(cfg: WebSearchConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_seconds))
            .build()?;
        Ok(Self { client, cfg })
    }

    /// Search; failures and timeouts yield an empty result set
    pub async fn search(&self, query: &str) -> Vec<SearchResult> {
        match self.search_wikipedia(query).await {
            Ok(results) => results,
            Err(e) => {
                warn!("Web search failed, continuing without results: {e}");
                Vec::new()
            }
        }
    }

    async fn search_wikipedia(&self, query: &str) -> anyhow::Result<Vec<SearchResult>> {
        let response = self
            .client
            .get("https://zh.wikipedia.org/w/api.php")
            .query(&[
                ("action", "opensearch"),
                ("format", "json"),
                ("limit", &self.cfg.max_results.to_string()),
                ("search", query),
            ])
            .send()
            .await?
            .error_for_status()?;

        let parsed: OpenSearchResponse = response.json().await?;
        let OpenSearchResponse(_, titles, snippets, _) = parsed;

        Ok(titles
            .into_iter()
            .zip(snippets.into_iter().chain(std::iter::repeat(String::new())))
            .take(self.cfg.max_results)
            .map(|(title, snippet)| SearchResult { title, snippet })
            .collect())
    }
}

/// Format hits as the context block placed between the system prompt and
/// the dialogue history. `None` when there is nothing to add.
pub fn format_block(query: &str, results: &[SearchResult]) -> Option<String> {
    if results.is_empty() {
        return None;
    }
    let mut block = format!("【联网搜索】关于“{query}”的参考资料：\n");
    for r in results {
        block.push_str("- ");
        block.push_str(&r.title);
        if !r.snippet.is_empty() {
            block.push_str("：");
            block.push_str(&r.snippet);
        }
        block.push('\n');
    }
    Some(block)
}

/// Shared handle bundling the decision and retrieval halves
pub struct WebSearchFacade {
    pub searcher: WebSearcher,
    pub decision: WebSearchDecisionConfig,
    pub enabled: bool,
}

impl WebSearchFacade {
    pub fn new(cfg: WebSearchConfig, decision: WebSearchDecisionConfig) -> anyhow::Result<Self> {
        let enabled = cfg.enabled;
        Ok(Self {
            searcher: WebSearcher::new(cfg)?,
            decision,
            enabled,
        })
    }

    /// Run the full decide-then-search path for a query
    pub async fn block_for(
        &self,
        llm: &dyn LlmAdapter,
        model: &str,
        query: &str,
    ) -> Option<String> {
        if !self.enabled {
            return None;
        }
        if !should_search(llm, model, &self.decision, query).await {
            return None;
        }
        let results = self.searcher.search(query).await;
        format_block(query, &results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct ScriptedLlm {
        answer: &'static str,
        delay_ms: u64,
    }

    #[async_trait]
    impl LlmAdapter for ScriptedLlm {
        async fn generate(&self, _req: &LlmRequest) -> Result<String, LlmError> {
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            Ok(self.answer.to_string())
        }

        async fn generate_stream(
            &self,
            _req: &LlmRequest,
            _tx: mpsc::Sender<crate::llm::StreamChunk>,
            _cancel: Arc<AtomicBool>,
        ) -> Result<(), LlmError> {
            unreachable!("decision path never streams")
        }
    }

    #[test]
    fn test_heuristic() {
        assert!(needs_fresh_info("今天的天气怎么样"));
        assert!(needs_fresh_info("what is the latest rust release?"));
        assert!(!needs_fresh_info("讲个笑话"));
    }

    #[tokio::test]
    async fn test_decision_follows_model() {
        let cfg = WebSearchDecisionConfig {
            timeout_seconds: 5,
            enable_timeout_fallback: false,
        };
        let yes = ScriptedLlm { answer: "Yes", delay_ms: 0 };
        assert!(should_search(&yes, "m", &cfg, "anything").await);

        let no = ScriptedLlm { answer: "no.", delay_ms: 0 };
        assert!(!should_search(&no, "m", &cfg, "今天的新闻").await);
    }

    #[tokio::test]
    async fn test_decision_timeout_fallback_policy() {
        let slow = ScriptedLlm { answer: "yes", delay_ms: 5000 };
        let mut cfg = WebSearchDecisionConfig {
            timeout_seconds: 0,
            enable_timeout_fallback: false,
        };
        assert!(!should_search(&slow, "m", &cfg, "今天新闻").await);

        cfg.enable_timeout_fallback = true;
        assert!(should_search(&slow, "m", &cfg, "讲个笑话").await);
    }

    #[test]
    fn test_format_block() {
        assert!(format_block("q", &[]).is_none());

        let results = vec![SearchResult {
            title: "Rust".to_string(),
            snippet: "A systems language".to_string(),
        }];
        let block = format_block("rust", &results).unwrap();
        assert!(block.contains("【联网搜索】"));
        assert!(block.contains("Rust"));
        assert!(block.contains("A systems language"));
    }
}
