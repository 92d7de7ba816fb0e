use super::start_of_today;
use crate::traits::{ArticleStore, ContentStore};
use crate::types::{
    Article, ArticleId, ArticleQuery, ArticleStats, ArtifactId, ArtifactKind, ArtifactQuery, ArtifactStats,
    ArtifactStatus, GeneratedArtifact, GuardrailActivity, GuardrailVerdict, NewArticle, NewArtifact, PipelineError,
    Result, UpsertOutcome, VerdictKind,
};
use crate::utils::url::extract_domain;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::types::Json;
use sqlx::{QueryBuilder, Row, Sqlite};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// SQLite-backed Article Store and Content Store.
pub struct SqliteStore {
    db: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let in_memory = database_url.contains(":memory:");
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let options = if in_memory {
            options
        } else {
            options.journal_mode(SqliteJournalMode::Wal)
        };

        // An in-memory database lives and dies with its only connection
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let db = pool_options.connect_with(options).await?;
        sqlx::migrate!("./migrations").run(&db).await?;

        info!("Opened article and content store at {}", database_url);
        Ok(Self { db })
    }

    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }
}

fn article_from_row(row: &SqliteRow) -> Result<Article> {
    Ok(Article {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        url: row.try_get("url")?,
        source: row.try_get("source")?,
        category: row.try_get("category")?,
        published_at: row.try_get::<Option<DateTime<Utc>>, _>("published_at")?,
        ingested_at: row.try_get::<DateTime<Utc>, _>("ingested_at")?,
        keywords: row.try_get::<Json<Vec<String>>, _>("keywords")?.0,
        summary: row.try_get("summary")?,
    })
}

fn artifact_from_row(row: &SqliteRow) -> Result<GeneratedArtifact> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;

    Ok(GeneratedArtifact {
        id: row.try_get("id")?,
        kind: ArtifactKind::parse(&kind)
            .ok_or_else(|| PipelineError::Parse(format!("unknown artifact kind '{}'", kind)))?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        category: row.try_get("category")?,
        source_articles: row.try_get::<Json<Vec<ArticleId>>, _>("source_articles")?.0,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        status: ArtifactStatus::from_str(&status).map_err(|e| PipelineError::Parse(e.to_string()))?,
        feedback: row.try_get("feedback")?,
        edited_body: row.try_get("edited_body")?,
        platform: row.try_get("platform")?,
        parent_id: row.try_get("parent_id")?,
        verdicts: row.try_get::<Json<Vec<GuardrailVerdict>>, _>("verdicts")?.0,
        blocked_by: row.try_get("blocked_by")?,
        block_reason: row.try_get("block_reason")?,
        reviewed_at: row.try_get::<Option<DateTime<Utc>>, _>("reviewed_at")?,
    })
}

fn push_range<'a>(
    builder: &mut QueryBuilder<'a, Sqlite>,
    column: &str,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
) {
    if let Some(since) = since {
        builder.push(format!(" AND {} >= ", column)).push_bind(since);
    }
    if let Some(until) = until {
        builder.push(format!(" AND {} < ", column)).push_bind(until);
    }
}

async fn grouped_counts(db: &SqlitePool, sql: &str) -> Result<BTreeMap<String, i64>> {
    let rows = sqlx::query(sql).fetch_all(db).await?;
    let mut counts = BTreeMap::new();
    for row in rows {
        counts.insert(row.try_get::<String, _>(0)?, row.try_get::<i64, _>(1)?);
    }
    Ok(counts)
}

#[async_trait]
impl ArticleStore for SqliteStore {
    async fn upsert_article(&self, article: &NewArticle) -> Result<UpsertOutcome> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM articles WHERE url = ?")
            .bind(&article.url)
            .fetch_optional(&mut *tx)
            .await?;

        let (id, inserted) = match existing {
            Some(id) => {
                sqlx::query(
                    r#"
                    UPDATE articles
                    SET keywords = ?, summary = COALESCE(?, summary), updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(Json(&article.keywords))
                .bind(&article.summary)
                .bind(now)
                .bind(id)
                .execute(&mut *tx)
                .await?;
                (id, false)
            }
            None => {
                let result = sqlx::query(
                    r#"
                    INSERT INTO articles
                        (title, content, url, source, category, published_at, ingested_at, updated_at, keywords, summary)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&article.title)
                .bind(&article.content)
                .bind(&article.url)
                .bind(&article.source)
                .bind(&article.category)
                .bind(article.published_at)
                .bind(now)
                .bind(now)
                .bind(Json(&article.keywords))
                .bind(&article.summary)
                .execute(&mut *tx)
                .await?;
                (result.last_insert_rowid(), true)
            }
        };

        let row = sqlx::query("SELECT * FROM articles WHERE id = ?")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        let stored = article_from_row(&row)?;
        tx.commit().await?;

        debug!("Upserted article {} ({}, inserted: {})", id, article.url, inserted);
        Ok(UpsertOutcome {
            article: stored,
            inserted,
        })
    }

    async fn get_article(&self, id: ArticleId) -> Result<Option<Article>> {
        let row = sqlx::query("SELECT * FROM articles WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(article_from_row).transpose()
    }

    async fn get_article_by_url(&self, url: &str) -> Result<Option<Article>> {
        let row = sqlx::query("SELECT * FROM articles WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(article_from_row).transpose()
    }

    async fn find_articles(&self, query: &ArticleQuery) -> Result<Vec<Article>> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM articles WHERE 1 = 1");
        if let Some(category) = &query.category {
            builder.push(" AND category = ").push_bind(category.clone());
        }
        if let Some(source) = &query.source {
            builder.push(" AND source = ").push_bind(source.clone());
        }
        push_range(&mut builder, "ingested_at", query.since, query.until);
        builder.push(" ORDER BY ingested_at DESC, id DESC");
        if let Some(limit) = query.limit {
            builder.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = builder.build().fetch_all(&self.db).await?;
        rows.iter().map(article_from_row).collect()
    }

    async fn source_domains(&self) -> Result<BTreeSet<String>> {
        let urls: Vec<String> = sqlx::query_scalar("SELECT DISTINCT url FROM articles")
            .fetch_all(&self.db)
            .await?;
        Ok(urls.iter().filter_map(|url| extract_domain(url)).collect())
    }

    async fn article_stats(&self) -> Result<ArticleStats> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM articles")
            .fetch_one(&self.db)
            .await?;
        let ingested_today: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM articles WHERE ingested_at >= ?")
            .bind(start_of_today())
            .fetch_one(&self.db)
            .await?;

        Ok(ArticleStats {
            total,
            by_source: grouped_counts(&self.db, "SELECT source, COUNT(*) FROM articles GROUP BY source").await?,
            by_category: grouped_counts(&self.db, "SELECT category, COUNT(*) FROM articles GROUP BY category").await?,
            ingested_today,
        })
    }
}

#[async_trait]
impl ContentStore for SqliteStore {
    async fn insert_artifact(&self, artifact: &NewArtifact) -> Result<GeneratedArtifact> {
        let result = sqlx::query(
            r#"
            INSERT INTO generated_artifacts
                (kind, title, body, category, source_articles, created_at, status,
                 platform, parent_id, verdicts, blocked_by, block_reason)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(artifact.kind.as_str())
        .bind(&artifact.title)
        .bind(&artifact.body)
        .bind(&artifact.category)
        .bind(Json(&artifact.source_articles))
        .bind(Utc::now())
        .bind(artifact.status.as_str())
        .bind(&artifact.platform)
        .bind(artifact.parent_id)
        .bind(Json(&artifact.verdicts))
        .bind(&artifact.blocked_by)
        .bind(&artifact.block_reason)
        .execute(&self.db)
        .await?;

        let id = result.last_insert_rowid();
        info!("Stored {} {} with status {}", artifact.kind.as_str(), id, artifact.status);
        self.get_artifact(id)
            .await?
            .ok_or(PipelineError::NotFound { entity: "artifact", id })
    }

    async fn get_artifact(&self, id: ArtifactId) -> Result<Option<GeneratedArtifact>> {
        let row = sqlx::query("SELECT * FROM generated_artifacts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(artifact_from_row).transpose()
    }

    async fn list_artifacts(&self, query: &ArtifactQuery) -> Result<Vec<GeneratedArtifact>> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM generated_artifacts WHERE 1 = 1");
        if let Some(kind) = query.kind {
            builder.push(" AND kind = ").push_bind(kind.as_str());
        }
        if let Some(status) = query.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(category) = &query.category {
            builder.push(" AND category = ").push_bind(category.clone());
        }
        push_range(&mut builder, "created_at", query.since, query.until);
        builder.push(" ORDER BY created_at ASC, id ASC");

        let rows = builder.build().fetch_all(&self.db).await?;
        rows.iter().map(artifact_from_row).collect()
    }

    async fn update_status(
        &self,
        id: ArtifactId,
        status: ArtifactStatus,
        feedback: Option<&str>,
    ) -> Result<Option<GeneratedArtifact>> {
        let result = sqlx::query(
            r#"
            UPDATE generated_artifacts
            SET status = ?, feedback = COALESCE(?, feedback), reviewed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(feedback)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_artifact(id).await
    }

    async fn update_edited_body(
        &self,
        id: ArtifactId,
        edited_body: &str,
        feedback: Option<&str>,
    ) -> Result<Option<GeneratedArtifact>> {
        let result = sqlx::query(
            r#"
            UPDATE generated_artifacts
            SET edited_body = ?, feedback = COALESCE(?, feedback), reviewed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(edited_body)
        .bind(feedback)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_artifact(id).await
    }

    async fn artifact_stats(&self) -> Result<ArtifactStats> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM generated_artifacts")
            .fetch_one(&self.db)
            .await?;
        let created_today: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM generated_artifacts WHERE created_at >= ?")
            .bind(start_of_today())
            .fetch_one(&self.db)
            .await?;

        Ok(ArtifactStats {
            total,
            by_status: grouped_counts(&self.db, "SELECT status, COUNT(*) FROM generated_artifacts GROUP BY status")
                .await?,
            by_category: grouped_counts(
                &self.db,
                "SELECT category, COUNT(*) FROM generated_artifacts GROUP BY category",
            )
            .await?,
            by_kind_and_status: grouped_counts(
                &self.db,
                "SELECT kind || '/' || status, COUNT(*) FROM generated_artifacts GROUP BY kind, status",
            )
            .await?,
            created_today,
        })
    }

    async fn record_guardrail_events(&self, verdicts: &[GuardrailVerdict]) -> Result<()> {
        if verdicts.is_empty() {
            return Ok(());
        }
        let recorded_at = Utc::now();
        let mut tx = self.db.begin().await?;
        for verdict in verdicts {
            sqlx::query(
                r#"
                INSERT INTO guardrail_events (guardrail, verdict, score, modified, reason, recorded_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&verdict.guardrail)
            .bind(verdict.verdict.as_str())
            .bind(verdict.score)
            .bind(verdict.modified)
            .bind(&verdict.reason)
            .bind(recorded_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!("Recorded {} guardrail events", verdicts.len());
        Ok(())
    }

    async fn guardrail_activity(&self) -> Result<GuardrailActivity> {
        let rows = sqlx::query(
            r#"
            SELECT guardrail, substr(recorded_at, 1, 10) AS day, verdict, modified, COUNT(*) AS events
            FROM guardrail_events
            GROUP BY guardrail, day, verdict, modified
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        let mut activity = GuardrailActivity::default();
        for row in &rows {
            let guardrail: String = row.try_get("guardrail")?;
            let day: String = row.try_get("day")?;
            let verdict: String = row.try_get("verdict")?;
            let verdict = VerdictKind::parse(&verdict)
                .ok_or_else(|| PipelineError::Parse(format!("unknown guardrail verdict '{}'", verdict)))?;
            let events: i64 = row.try_get("events")?;
            activity.add(&guardrail, &day, verdict, row.try_get("modified")?, events as u64);
        }
        Ok(activity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_article(url: &str, keywords: &[&str]) -> NewArticle {
        NewArticle {
            title: "Chips get faster".to_string(),
            content: "Body text about chips.".to_string(),
            url: url.to_string(),
            source: "Example".to_string(),
            category: "technology".to_string(),
            published_at: None,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            summary: None,
        }
    }

    #[tokio::test]
    async fn upsert_keeps_first_ingestion_time() -> Result<()> {
        let store = SqliteStore::in_memory().await?;

        let first = store.upsert_article(&new_article("https://example.com/a", &["chips"])).await?;
        assert!(first.inserted);

        let mut refreshed = new_article("https://example.com/a", &["chips", "innovation"]);
        refreshed.content = "Changed body".to_string();
        let second = store.upsert_article(&refreshed).await?;

        assert!(!second.inserted);
        assert_eq!(second.article.id, first.article.id);
        assert_eq!(second.article.ingested_at, first.article.ingested_at);
        assert_eq!(second.article.keywords, vec!["chips".to_string(), "innovation".to_string()]);
        assert_eq!(second.article.content, "Body text about chips.");
        assert_eq!(store.article_stats().await?.total, 1);
        Ok(())
    }

    #[tokio::test]
    async fn guardrail_events_survive_a_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let url = format!("sqlite://{}", dir.path().join("audit.db").display());
        let event = |guardrail: &str, verdict, modified| GuardrailVerdict {
            guardrail: guardrail.to_string(),
            verdict,
            score: 0.8,
            reason: "test".to_string(),
            modified,
        };

        {
            let store = SqliteStore::connect(&url).await?;
            store
                .record_guardrail_events(&[
                    event("source_verification", VerdictKind::Pass, false),
                    event("content_safety", VerdictKind::Flag, true),
                ])
                .await?;
            store
                .record_guardrail_events(&[event("content_safety", VerdictKind::Fail, false)])
                .await?;
        }

        let reopened = SqliteStore::connect(&url).await?;
        let activity = reopened.guardrail_activity().await?;
        assert_eq!(activity.total_events, 3);
        let safety = activity.by_guardrail["content_safety"];
        assert_eq!(safety.invocations, 2);
        assert_eq!(safety.flags, 1);
        assert_eq!(safety.modifications, 1);
        assert_eq!(safety.blocks, 1);
        let today = Utc::now().format("%Y-%m-%d").to_string();
        assert_eq!(activity.by_day[&today].invocations, 3);
        Ok(())
    }

    #[tokio::test]
    async fn status_updates_report_unknown_ids() -> Result<()> {
        let store = SqliteStore::in_memory().await?;
        assert!(store.update_status(7, ArtifactStatus::Rejected, Some("nope")).await?.is_none());
        assert!(store.get_artifact(7).await?.is_none());
        Ok(())
    }
}
