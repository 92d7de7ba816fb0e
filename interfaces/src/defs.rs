use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::ArtifactStatus;

pub type ArticleId = i64;
pub type ArtifactId = i64;

/// An ingested news article. The canonical `url` is the identity of the
/// record: re-ingesting it refreshes `keywords` and `summary` only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: ArticleId,
    pub title: String,
    pub content: String,
    pub url: String,
    pub source: String,
    pub category: String,
    pub published_at: Option<DateTime<Utc>>,
    pub ingested_at: DateTime<Utc>,
    pub keywords: Vec<String>,
    pub summary: Option<String>,
}

/// An article as it comes out of retrieval, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewArticle {
    pub title: String,
    pub content: String,
    pub url: String,
    pub source: String,
    pub category: String,
    pub published_at: Option<DateTime<Utc>>,
    pub keywords: Vec<String>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Article,
    Post,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Article => "article",
            ArtifactKind::Post => "post",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "article" => Some(ArtifactKind::Article),
            "post" => Some(ArtifactKind::Post),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictKind {
    Pass,
    Flag,
    Fail,
}

impl VerdictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictKind::Pass => "pass",
            VerdictKind::Flag => "flag",
            VerdictKind::Fail => "fail",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pass" => Some(VerdictKind::Pass),
            "flag" => Some(VerdictKind::Flag),
            "fail" => Some(VerdictKind::Fail),
            _ => None,
        }
    }
}

/// Outcome of one guardrail over one piece of generated content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailVerdict {
    pub guardrail: String,
    pub verdict: VerdictKind,
    pub score: f64,
    pub reason: String,
    #[serde(default)]
    pub modified: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailCounters {
    pub invocations: u64,
    pub passes: u64,
    pub flags: u64,
    pub modifications: u64,
    pub blocks: u64,
}

impl GuardrailCounters {
    /// Count `times` verdicts of one kind.
    pub fn add(&mut self, verdict: VerdictKind, modified: bool, times: u64) {
        self.invocations += times;
        match verdict {
            VerdictKind::Pass => self.passes += times,
            VerdictKind::Flag => self.flags += times,
            VerdictKind::Fail => self.blocks += times,
        }
        if modified {
            self.modifications += times;
        }
    }
}

/// Guardrail activity as persisted in the audit log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuardrailActivity {
    pub total_events: u64,
    pub by_guardrail: BTreeMap<String, GuardrailCounters>,
    /// Keyed by UTC day, `YYYY-MM-DD`.
    pub by_day: BTreeMap<String, GuardrailCounters>,
}

impl GuardrailActivity {
    pub fn add(&mut self, guardrail: &str, day: &str, verdict: VerdictKind, modified: bool, times: u64) {
        self.total_events += times;
        self.by_guardrail
            .entry(guardrail.to_string())
            .or_default()
            .add(verdict, modified, times);
        self.by_day.entry(day.to_string()).or_default().add(verdict, modified, times);
    }
}

/// A generated long-form article or social post.
///
/// `body` is what the generator produced after the guardrail chain;
/// reviewer edits land in `edited_body` and never overwrite it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedArtifact {
    pub id: ArtifactId,
    pub kind: ArtifactKind,
    pub title: Option<String>,
    pub body: String,
    pub category: String,
    pub source_articles: Vec<ArticleId>,
    pub created_at: DateTime<Utc>,
    pub status: ArtifactStatus,
    pub feedback: Option<String>,
    pub edited_body: Option<String>,
    pub platform: Option<String>,
    pub parent_id: Option<ArtifactId>,
    pub verdicts: Vec<GuardrailVerdict>,
    pub blocked_by: Option<String>,
    pub block_reason: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl GeneratedArtifact {
    /// The text a reviewer would publish: the edit if there is one.
    pub fn current_body(&self) -> &str {
        self.edited_body.as_deref().unwrap_or(&self.body)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewArtifact {
    pub kind: ArtifactKind,
    pub title: Option<String>,
    pub body: String,
    pub category: String,
    pub source_articles: Vec<ArticleId>,
    pub status: ArtifactStatus,
    pub platform: Option<String>,
    pub parent_id: Option<ArtifactId>,
    pub verdicts: Vec<GuardrailVerdict>,
    pub blocked_by: Option<String>,
    pub block_reason: Option<String>,
}

/// Token accounting reported by the model service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArticleQuery {
    pub category: Option<String>,
    pub source: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactQuery {
    pub kind: Option<ArtifactKind>,
    pub status: Option<ArtifactStatus>,
    pub category: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

/// The review backlog, oldest first within each kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PendingContent {
    pub articles: Vec<GeneratedArtifact>,
    pub posts: Vec<GeneratedArtifact>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArticleStats {
    pub total: i64,
    pub by_source: BTreeMap<String, i64>,
    pub by_category: BTreeMap<String, i64>,
    pub ingested_today: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactStats {
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
    pub by_category: BTreeMap<String, i64>,
    /// Keyed by `"{kind}/{status}"`, e.g. `"post/pending"`.
    pub by_kind_and_status: BTreeMap<String, i64>,
    pub created_today: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub articles: ArticleStats,
    pub artifacts: ArtifactStats,
    #[serde(default)]
    pub guardrails: GuardrailActivity,
}
