use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;
// Domain records live in the interfaces crate
pub use interfaces::defs::{
    Article, ArticleId, ArticleQuery, ArticleStats, ArtifactId, ArtifactKind, ArtifactQuery,
    ArtifactStats, GeneratedArtifact, GuardrailActivity, GuardrailCounters, GuardrailVerdict, NewArticle,
    NewArtifact, PendingContent, PipelineStats, TokenUsage, VerdictKind,
};
pub use interfaces::state::{ApprovalState, ArtifactStatus};

/// Ways a source can be read, in the order they are attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMethod {
    Feed,
    Scrape,
    Api,
}

impl RetrievalMethod {
    pub const PRIORITY: [RetrievalMethod; 3] =
        [RetrievalMethod::Feed, RetrievalMethod::Scrape, RetrievalMethod::Api];

    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalMethod::Feed => "feed",
            RetrievalMethod::Scrape => "scrape",
            RetrievalMethod::Api => "api",
        }
    }
}

/// A fully extracted article page, not yet tagged with keywords.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleCandidate {
    pub url: String,
    pub title: String,
    pub content: String,
    pub published_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub entries: Vec<ParsedEntry>,
}

#[derive(Debug, Clone)]
pub struct ParsedEntry {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Result of writing one article through the store.
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub article: Article,
    pub inserted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategorySummary {
    pub sources_attempted: usize,
    pub sources_succeeded: usize,
    pub new_articles: usize,
    pub updated_articles: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub categories: BTreeMap<String, CategorySummary>,
    /// Articles first seen in this run, partitioned by category.
    pub ingested: BTreeMap<String, Vec<Article>>,
}

impl AggregationReport {
    pub fn total_new_articles(&self) -> usize {
        self.categories.values().map(|summary| summary.new_articles).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicSummary {
    pub articles: usize,
    pub posts: usize,
    pub blocked: usize,
    pub failures: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub categories: BTreeMap<String, TopicSummary>,
    pub artifacts: Vec<GeneratedArtifact>,
    pub usage: TokenUsage,
}

/// Failures crossing the model-service boundary.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model call timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("model provider rate limited the request: {0}")]
    RateLimited(String),

    #[error("model provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed model response: {0}")]
    Malformed(String),

    #[error("model transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unsupported model provider: {0}")]
    Unsupported(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Source {source_name} unavailable: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    #[error("Could not extract title and body from {url}")]
    ExtractionIncomplete { url: String },

    #[error("Model failure: {0}")]
    Model(#[from] ModelError),

    #[error("Blocked by guardrail {guardrail}: {reason}")]
    GuardrailBlocked { guardrail: String, reason: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Response from {url} exceeds {limit_bytes} bytes")]
    ResponseTooLarge { url: String, limit_bytes: usize },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Template {template} references unknown variable {variable}")]
    Template { template: String, variable: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config file error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("General error: {0}")]
    General(String),
}

impl PipelineError {
    /// Storage failures are fatal for the current operation.
    pub fn is_storage(&self) -> bool {
        matches!(self, PipelineError::Database(_) | PipelineError::Migration(_))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
