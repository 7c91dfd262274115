//! AI-assisted SEO analysis. The page is fetched here, its on-page signals
//! are extracted, and both are handed to an OpenAI-compatible chat
//! completions endpoint. The report lands in the result store under the
//! run's `seo` slot, just like a container worker's artifact would.

use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{SEO_ANALYSIS_TIMEOUT_SECS, SEO_FETCH_TIMEOUT_SECS, SEO_MAX_HTML_CHARS};
use crate::log_capture::{LogLevel, LogSource, LogState};
use crate::model::{ArtifactKey, ArtifactKind, RunId};
use crate::result_store::ResultStore;

static TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());
static META_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<meta\s[^>]*>").unwrap());
static LINK_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<link\s[^>]*>").unwrap());
static IMG_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<img\s[^>]*>").unwrap());
static H1: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<h1[^>]*>(.*?)</h1>").unwrap());
static H2: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<h2[\s>]").unwrap());
static HTML_LANG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?is)<html[^>]*\slang\s*=\s*["']([^"']+)["']"#).unwrap());
static ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?is)([a-z:-]+)\s*=\s*("([^"]*)"|'([^']*)')"#).unwrap());
static SCRIPT_OR_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script[^>]*>.*?</script>|<style[^>]*>.*?</style>").unwrap()
});
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());

const SYSTEM_PROMPT: &str = "You are an SEO auditor. Given on-page signals and a text excerpt \
of a web page, reply with a JSON object containing: `score` (0-100), `summary` (string), \
`issues` (array of {severity, title, detail}) and `recommendations` (array of strings).";

/// On-page facts extracted from the fetched HTML.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SeoSignals {
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub canonical: Option<String>,
    pub robots: Option<String>,
    pub lang: Option<String>,
    pub h1: Vec<String>,
    pub h2_count: usize,
    pub image_count: usize,
    pub images_missing_alt: usize,
    pub open_graph_tags: usize,
    pub word_count: usize,
}

pub fn extract_signals(html: &str) -> SeoSignals {
    let mut signals = SeoSignals {
        title: TITLE
            .captures(html)
            .map(|c| clean_text(&c[1]))
            .filter(|t| !t.is_empty()),
        lang: HTML_LANG.captures(html).map(|c| c[1].trim().to_string()),
        h1: H1
            .captures_iter(html)
            .map(|c| clean_text(&c[1]))
            .filter(|t| !t.is_empty())
            .collect(),
        h2_count: H2.find_iter(html).count(),
        ..Default::default()
    };

    for tag in META_TAG.find_iter(html) {
        let attrs = attributes(tag.as_str());
        let name = attr(&attrs, "name").or_else(|| attr(&attrs, "property"));
        let content = attr(&attrs, "content");
        match name.map(|n| n.to_ascii_lowercase()).as_deref() {
            Some("description") => signals.meta_description = content,
            Some("robots") => signals.robots = content,
            Some(n) if n.starts_with("og:") => signals.open_graph_tags += 1,
            _ => {}
        }
    }

    for tag in LINK_TAG.find_iter(html) {
        let attrs = attributes(tag.as_str());
        if attr(&attrs, "rel").is_some_and(|r| r.eq_ignore_ascii_case("canonical")) {
            signals.canonical = attr(&attrs, "href");
        }
    }

    for tag in IMG_TAG.find_iter(html) {
        signals.image_count += 1;
        let attrs = attributes(tag.as_str());
        if attr(&attrs, "alt").is_none_or(|a| a.trim().is_empty()) {
            signals.images_missing_alt += 1;
        }
    }

    signals.word_count = visible_text(html).split_whitespace().count();
    signals
}

fn attributes(tag: &str) -> Vec<(String, String)> {
    ATTR.captures_iter(tag)
        .map(|c| {
            let value = c
                .get(3)
                .or_else(|| c.get(4))
                .map(|m| m.as_str())
                .unwrap_or_default();
            (c[1].to_ascii_lowercase(), value.to_string())
        })
        .collect()
}

fn attr(attrs: &[(String, String)], name: &str) -> Option<String> {
    attrs
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.clone())
}

fn clean_text(fragment: &str) -> String {
    TAG.replace_all(fragment, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn visible_text(html: &str) -> String {
    let stripped = SCRIPT_OR_STYLE.replace_all(html, " ");
    clean_text(&stripped)
}

// ============================================================================
// Analyzer
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SeoError {
    #[error("Failed to fetch page: {0}")]
    Fetch(String),

    #[error("No API key configured for SEO analysis")]
    MissingApiKey,

    #[error("Analysis request failed: {0}")]
    Analysis(String),
}

#[derive(Clone)]
pub struct SeoAnalyzer {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    store: Arc<dyn ResultStore>,
    logs: LogState,
}

impl SeoAnalyzer {
    pub fn new(
        client: reqwest::Client,
        endpoint: String,
        model: String,
        api_key: Option<String>,
        store: Arc<dyn ResultStore>,
        logs: LogState,
    ) -> Self {
        Self {
            client,
            endpoint,
            model,
            api_key,
            store,
            logs,
        }
    }

    /// Run the analysis in the background and publish the report under the
    /// run's `seo` slot. Failures are published as a report with
    /// `status: "failed"` so the poller still gets an answer.
    pub fn spawn(&self, run_id: RunId, url: String) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let key = ArtifactKey::new(run_id, ArtifactKind::Seo);
            let report = this.analyze(&url).await;
            if let Err(e) = this.store.put(&key, &report).await {
                warn!("Failed to store SEO report for {}: {}", key, e);
                this.logs
                    .emit(
                        LogSource::Seo,
                        LogLevel::Error,
                        format!("Failed to store SEO report for {}: {}", key, e),
                    )
                    .await;
            }
        })
    }

    /// Build the report for `url`. Never fails; errors become part of the
    /// report.
    pub async fn analyze(&self, url: &str) -> Value {
        let html = match self.fetch(url).await {
            Ok(html) => html,
            Err(e) => return self.failed_report(url, None, e).await,
        };
        let signals = extract_signals(&html);

        match self.request_analysis(url, &signals, &html).await {
            Ok(analysis) => {
                info!("SEO analysis complete for {}", url);
                self.logs
                    .emit(
                        LogSource::Seo,
                        LogLevel::Info,
                        format!("SEO analysis complete for {}", url),
                    )
                    .await;
                json!({
                    "url": url,
                    "status": "complete",
                    "signals": signals,
                    "analysis": analysis,
                    "analyzed_at": Utc::now(),
                })
            }
            Err(e) => self.failed_report(url, Some(&signals), e).await,
        }
    }

    async fn failed_report(&self, url: &str, signals: Option<&SeoSignals>, error: SeoError) -> Value {
        warn!("SEO analysis for {} failed: {}", url, error);
        self.logs
            .emit(
                LogSource::Seo,
                LogLevel::Warn,
                format!("SEO analysis for {} failed: {}", url, error),
            )
            .await;
        json!({
            "url": url,
            "status": "failed",
            "signals": signals,
            "analysis": null,
            "error": error.to_string(),
            "analyzed_at": Utc::now(),
        })
    }

    async fn fetch(&self, url: &str) -> Result<String, SeoError> {
        let response = self
            .client
            .get(url)
            .timeout(Duration::from_secs(SEO_FETCH_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| SeoError::Fetch(e.to_string()))?;
        if !response.status().is_success() {
            return Err(SeoError::Fetch(format!("HTTP {}", response.status())));
        }
        response
            .text()
            .await
            .map_err(|e| SeoError::Fetch(e.to_string()))
    }

    async fn request_analysis(
        &self,
        url: &str,
        signals: &SeoSignals,
        html: &str,
    ) -> Result<Value, SeoError> {
        let api_key = self.api_key.as_deref().ok_or(SeoError::MissingApiKey)?;

        let excerpt: String = visible_text(html).chars().take(SEO_MAX_HTML_CHARS / 10).collect();
        let user_prompt = format!(
            "URL: {}\n\nSignals:\n{}\n\nText excerpt:\n{}",
            url,
            serde_json::to_string_pretty(signals).unwrap_or_default(),
            excerpt
        );

        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": user_prompt},
            ],
            "response_format": {"type": "json_object"},
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .timeout(Duration::from_secs(SEO_ANALYSIS_TIMEOUT_SECS))
            .json(&body)
            .send()
            .await
            .map_err(|e| SeoError::Analysis(e.to_string()))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| SeoError::Analysis(e.to_string()))?;
        if !status.is_success() {
            return Err(SeoError::Analysis(format!("HTTP {}: {}", status, payload)));
        }

        parse_completion(&payload)
    }
}

/// Pull the assistant message out of a chat completion. JSON content is
/// returned parsed, anything else as a plain string.
pub fn parse_completion(payload: &Value) -> Result<Value, SeoError> {
    let content = payload["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| SeoError::Analysis("completion has no message content".to_string()))?;
    Ok(serde_json::from_str(content).unwrap_or_else(|_| Value::String(content.to_string())))
}
