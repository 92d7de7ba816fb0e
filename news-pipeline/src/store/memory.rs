use super::start_of_today;
use crate::traits::{ArticleStore, ContentStore};
use crate::types::{
    Article, ArticleId, ArticleQuery, ArticleStats, ArtifactId, ArtifactQuery, ArtifactStats, ArtifactStatus,
    GeneratedArtifact, GuardrailActivity, GuardrailVerdict, NewArticle, NewArtifact, Result, UpsertOutcome,
};
use crate::utils::url::extract_domain;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    articles: BTreeMap<ArticleId, Article>,
    urls: BTreeMap<String, ArticleId>,
    artifacts: BTreeMap<ArtifactId, GeneratedArtifact>,
    guardrail_events: Vec<(DateTime<Utc>, GuardrailVerdict)>,
    next_article_id: ArticleId,
    next_artifact_id: ArtifactId,
}

/// Process-local store with the same semantics as [`super::SqliteStore`].
/// Used by tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn bump(counts: &mut BTreeMap<String, i64>, key: String) {
    *counts.entry(key).or_insert(0) += 1;
}

#[async_trait]
impl ArticleStore for MemoryStore {
    async fn upsert_article(&self, article: &NewArticle) -> Result<UpsertOutcome> {
        let mut tables = self.tables.write().await;

        if let Some(id) = tables.urls.get(&article.url).copied() {
            if let Some(existing) = tables.articles.get_mut(&id) {
                existing.keywords = article.keywords.clone();
                if article.summary.is_some() {
                    existing.summary = article.summary.clone();
                }
                return Ok(UpsertOutcome {
                    article: existing.clone(),
                    inserted: false,
                });
            }
        }

        tables.next_article_id += 1;
        let stored = Article {
            id: tables.next_article_id,
            title: article.title.clone(),
            content: article.content.clone(),
            url: article.url.clone(),
            source: article.source.clone(),
            category: article.category.clone(),
            published_at: article.published_at,
            ingested_at: Utc::now(),
            keywords: article.keywords.clone(),
            summary: article.summary.clone(),
        };
        tables.urls.insert(stored.url.clone(), stored.id);
        tables.articles.insert(stored.id, stored.clone());

        Ok(UpsertOutcome {
            article: stored,
            inserted: true,
        })
    }

    async fn get_article(&self, id: ArticleId) -> Result<Option<Article>> {
        Ok(self.tables.read().await.articles.get(&id).cloned())
    }

    async fn get_article_by_url(&self, url: &str) -> Result<Option<Article>> {
        let tables = self.tables.read().await;
        Ok(tables.urls.get(url).and_then(|id| tables.articles.get(id)).cloned())
    }

    async fn find_articles(&self, query: &ArticleQuery) -> Result<Vec<Article>> {
        let tables = self.tables.read().await;
        let mut matches: Vec<Article> = tables
            .articles
            .values()
            .filter(|a| query.category.as_ref().is_none_or(|c| &a.category == c))
            .filter(|a| query.source.as_ref().is_none_or(|s| &a.source == s))
            .filter(|a| query.since.is_none_or(|since| a.ingested_at >= since))
            .filter(|a| query.until.is_none_or(|until| a.ingested_at < until))
            .cloned()
            .collect();

        matches.sort_by(|a, b| b.ingested_at.cmp(&a.ingested_at).then(b.id.cmp(&a.id)));
        if let Some(limit) = query.limit {
            matches.truncate(limit);
        }
        Ok(matches)
    }

    async fn source_domains(&self) -> Result<BTreeSet<String>> {
        let tables = self.tables.read().await;
        Ok(tables.urls.keys().filter_map(|url| extract_domain(url)).collect())
    }

    async fn article_stats(&self) -> Result<ArticleStats> {
        let tables = self.tables.read().await;
        let today = start_of_today();
        let mut stats = ArticleStats::default();
        for article in tables.articles.values() {
            stats.total += 1;
            bump(&mut stats.by_source, article.source.clone());
            bump(&mut stats.by_category, article.category.clone());
            if article.ingested_at >= today {
                stats.ingested_today += 1;
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn insert_artifact(&self, artifact: &NewArtifact) -> Result<GeneratedArtifact> {
        let mut tables = self.tables.write().await;
        tables.next_artifact_id += 1;
        let stored = GeneratedArtifact {
            id: tables.next_artifact_id,
            kind: artifact.kind,
            title: artifact.title.clone(),
            body: artifact.body.clone(),
            category: artifact.category.clone(),
            source_articles: artifact.source_articles.clone(),
            created_at: Utc::now(),
            status: artifact.status,
            feedback: None,
            edited_body: None,
            platform: artifact.platform.clone(),
            parent_id: artifact.parent_id,
            verdicts: artifact.verdicts.clone(),
            blocked_by: artifact.blocked_by.clone(),
            block_reason: artifact.block_reason.clone(),
            reviewed_at: None,
        };
        tables.artifacts.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_artifact(&self, id: ArtifactId) -> Result<Option<GeneratedArtifact>> {
        Ok(self.tables.read().await.artifacts.get(&id).cloned())
    }

    async fn list_artifacts(&self, query: &ArtifactQuery) -> Result<Vec<GeneratedArtifact>> {
        let tables = self.tables.read().await;
        // Ids grow with insertion, so map order is already oldest first
        Ok(tables
            .artifacts
            .values()
            .filter(|a| query.kind.is_none_or(|kind| a.kind == kind))
            .filter(|a| query.status.is_none_or(|status| a.status == status))
            .filter(|a| query.category.as_ref().is_none_or(|c| &a.category == c))
            .filter(|a| query.since.is_none_or(|since| a.created_at >= since))
            .filter(|a| query.until.is_none_or(|until| a.created_at < until))
            .cloned()
            .collect())
    }

    async fn update_status(
        &self,
        id: ArtifactId,
        status: ArtifactStatus,
        feedback: Option<&str>,
    ) -> Result<Option<GeneratedArtifact>> {
        let mut tables = self.tables.write().await;
        let Some(artifact) = tables.artifacts.get_mut(&id) else {
            return Ok(None);
        };
        artifact.status = status;
        if let Some(feedback) = feedback {
            artifact.feedback = Some(feedback.to_string());
        }
        artifact.reviewed_at = Some(Utc::now());
        Ok(Some(artifact.clone()))
    }

    async fn update_edited_body(
        &self,
        id: ArtifactId,
        edited_body: &str,
        feedback: Option<&str>,
    ) -> Result<Option<GeneratedArtifact>> {
        let mut tables = self.tables.write().await;
        let Some(artifact) = tables.artifacts.get_mut(&id) else {
            return Ok(None);
        };
        artifact.edited_body = Some(edited_body.to_string());
        if let Some(feedback) = feedback {
            artifact.feedback = Some(feedback.to_string());
        }
        artifact.reviewed_at = Some(Utc::now());
        Ok(Some(artifact.clone()))
    }

    async fn artifact_stats(&self) -> Result<ArtifactStats> {
        let tables = self.tables.read().await;
        let today = start_of_today();
        let mut stats = ArtifactStats::default();
        for artifact in tables.artifacts.values() {
            stats.total += 1;
            bump(&mut stats.by_status, artifact.status.as_str().to_string());
            bump(&mut stats.by_category, artifact.category.clone());
            bump(
                &mut stats.by_kind_and_status,
                format!("{}/{}", artifact.kind.as_str(), artifact.status.as_str()),
            );
            if artifact.created_at >= today {
                stats.created_today += 1;
            }
        }
        Ok(stats)
    }

    async fn record_guardrail_events(&self, verdicts: &[GuardrailVerdict]) -> Result<()> {
        let recorded_at = Utc::now();
        let mut tables = self.tables.write().await;
        tables
            .guardrail_events
            .extend(verdicts.iter().map(|verdict| (recorded_at, verdict.clone())));
        Ok(())
    }

    async fn guardrail_activity(&self) -> Result<GuardrailActivity> {
        let tables = self.tables.read().await;
        let mut activity = GuardrailActivity::default();
        for (recorded_at, verdict) in &tables.guardrail_events {
            let day = recorded_at.format("%Y-%m-%d").to_string();
            activity.add(&verdict.guardrail, &day, verdict.verdict, verdict.modified, 1);
        }
        Ok(activity)
    }
}
