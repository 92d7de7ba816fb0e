use crate::config::SourceConfig;
use crate::types::{
    Article, ArticleCandidate, ArticleId, ArticleQuery, ArticleStats, ArtifactId, ArtifactQuery,
    ArtifactStats, ArtifactStatus, GeneratedArtifact, GuardrailActivity, GuardrailVerdict, NewArticle, NewArtifact,
    Result, RetrievalMethod, UpsertOutcome,
};
use async_trait::async_trait;
use std::collections::BTreeSet;

/// One way of reading articles from a configured source.
#[async_trait]
pub trait Retriever: Send + Sync {
    fn method(&self) -> RetrievalMethod;

    /// Whether this method can be tried for `source` at all, e.g. the
    /// source has a feed URL or an API key is configured.
    fn supports(&self, source: &SourceConfig) -> bool;

    /// Fully extracted candidates. Partial pages are dropped here, so an
    /// empty result means the method found nothing usable.
    async fn retrieve(&self, source: &SourceConfig) -> Result<Vec<ArticleCandidate>>;
}

/// Persistent, URL-keyed collection of ingested articles.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Insert a new article, or refresh keywords and summary of the one
    /// already stored under the same URL. `ingested_at` and the content of
    /// an existing record never change.
    async fn upsert_article(&self, article: &NewArticle) -> Result<UpsertOutcome>;

    async fn get_article(&self, id: ArticleId) -> Result<Option<Article>>;

    async fn get_article_by_url(&self, url: &str) -> Result<Option<Article>>;

    /// Newest first by ingestion time.
    async fn find_articles(&self, query: &ArticleQuery) -> Result<Vec<Article>>;

    /// Hosts of every stored article URL.
    async fn source_domains(&self) -> Result<BTreeSet<String>>;

    async fn article_stats(&self) -> Result<ArticleStats>;
}

/// Persistent record of generated artifacts and their review status.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn insert_artifact(&self, artifact: &NewArtifact) -> Result<GeneratedArtifact>;

    async fn get_artifact(&self, id: ArtifactId) -> Result<Option<GeneratedArtifact>>;

    /// Oldest first by creation time.
    async fn list_artifacts(&self, query: &ArtifactQuery) -> Result<Vec<GeneratedArtifact>>;

    /// Overwrite status and stamp `reviewed_at`. `None` feedback keeps the
    /// previous feedback. Returns `None` when the id is unknown.
    async fn update_status(
        &self,
        id: ArtifactId,
        status: ArtifactStatus,
        feedback: Option<&str>,
    ) -> Result<Option<GeneratedArtifact>>;

    /// Store a reviewer edit next to the original body.
    async fn update_edited_body(
        &self,
        id: ArtifactId,
        edited_body: &str,
        feedback: Option<&str>,
    ) -> Result<Option<GeneratedArtifact>>;

    async fn artifact_stats(&self) -> Result<ArtifactStats>;

    /// Append one audit row per verdict, stamped with the current time.
    async fn record_guardrail_events(&self, verdicts: &[GuardrailVerdict]) -> Result<()>;

    /// Audit rows counted per guardrail and per UTC day.
    async fn guardrail_activity(&self) -> Result<GuardrailActivity>;
}
