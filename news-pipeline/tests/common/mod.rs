// Shared fixtures for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use news_pipeline::config::{ExtractionRules, PipelineConfig, SourceConfig};
use news_pipeline::retry::RetryPolicy;
use news_pipeline::{NewArticle, PageFetcher, PipelineError, Result, RetrievalMethod, SqliteStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Mutex;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).try_init();
}

/// Serves canned pages by URL and records every request.
#[derive(Default)]
pub struct StaticFetcher {
    pages: BTreeMap<String, String>,
    prefixes: Vec<(String, String)>,
    requests: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, body: impl Into<String>) -> Self {
        self.pages.insert(url.to_string(), body.into());
        self
    }

    /// Serve `body` for every URL starting with `prefix`, for endpoints
    /// whose query string is built at runtime.
    pub fn with_prefix(mut self, prefix: &str, body: impl Into<String>) -> Self {
        self.prefixes.push((prefix.to_string(), body.into()));
        self
    }

    pub async fn requests(&self) -> Vec<String> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl PageFetcher for StaticFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        self.requests.lock().await.push(url.to_string());
        let by_prefix = || {
            self.prefixes
                .iter()
                .find(|(prefix, _)| url.starts_with(prefix.as_str()))
                .map(|(_, body)| body.clone())
        };
        self.pages.get(url).cloned().or_else(by_prefix).ok_or(PipelineError::HttpStatus {
            url: url.to_string(),
            status: 404,
        })
    }
}

/// Several calm sentences about `subject`, comfortably above the minimum body length.
pub fn long_text(subject: &str) -> String {
    format!(
        "Engineers presented new research on {subject} at a conference this week.\n\n\
         The work focuses on practical deployments of {subject} in production systems and \
         describes lessons learned from early adopters across several industries.\n\n\
         Researchers expect further results on {subject} later in the year."
    )
}

pub fn article_page(title: &str, body: &str) -> String {
    let paragraphs: String = body
        .split("\n\n")
        .map(|p| format!("<p>{}</p>", p))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "<html><head><title>{title}</title></head><body>\
         <nav><a href=\"/\">Home</a></nav>\
         <article><h1>{title}</h1>{paragraphs}</article></body></html>"
    )
}

pub fn homepage(links: &[&str]) -> String {
    let anchors: String = links
        .iter()
        .map(|href| format!("<li><a href=\"{}\">story</a></li>", href))
        .collect();
    format!("<html><body><a href=\"/about\">About</a><ul>{}</ul></body></html>", anchors)
}

pub fn rss_feed(items: &[(&str, &str)]) -> String {
    let entries: String = items
        .iter()
        .map(|(title, link)| {
            format!(
                "<item><title>{title}</title><link>{link}</link>\
                 <description>Short teaser.</description>\
                 <pubDate>Tue, 02 Jan 2024 08:00:00 GMT</pubDate></item>"
            )
        })
        .collect();
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <rss version=\"2.0\"><channel><title>Test feed</title>\
         <link>https://example.com/</link><description>Fixture</description>{entries}</channel></rss>"
    )
}

pub fn source(name: &str, category: &str, url: &str, feed_url: Option<&str>) -> SourceConfig {
    SourceConfig {
        name: name.to_string(),
        category: category.to_string(),
        url: url.to_string(),
        feed_url: feed_url.map(str::to_string),
        methods: RetrievalMethod::PRIORITY.to_vec(),
        selectors: ExtractionRules::default(),
    }
}

/// Defaults with no waiting, a mock model and the given sources.
pub fn test_config(sources: Vec<SourceConfig>) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.database_url = "sqlite::memory:".to_string();
    config.retry = RetryPolicy::immediate(3);
    config.fetch.request_delay_ms = 0;
    config.model.provider = "mock".to_string();
    config.news_api.api_key = None;
    config.sources = sources;
    config
}

/// A file-backed store in a fresh temporary directory. Keep the directory
/// alive for as long as the store is used.
pub async fn temp_store() -> anyhow::Result<(TempDir, Arc<SqliteStore>)> {
    let dir = tempfile::tempdir()?;
    let url = format!("sqlite://{}", dir.path().join("news.db").display());
    let store = SqliteStore::connect(&url).await?;
    Ok((dir, Arc::new(store)))
}

pub fn new_article(url: &str, category: &str, source: &str, content: &str, keywords: &[&str]) -> NewArticle {
    NewArticle {
        title: format!("Report from {}", source),
        content: content.to_string(),
        url: url.to_string(),
        source: source.to_string(),
        category: category.to_string(),
        published_at: None,
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        summary: None,
    }
}
