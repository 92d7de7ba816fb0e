use crate::config::{GenerationConfig, PipelineConfig};
use crate::guardrails::{ChainOutcome, GuardrailChain};
use crate::llm_adapter::{Completion, CompletionRequest, LlmAdapter};
use crate::prompt::PromptRenderer;
use crate::retry::{retry, RetryPolicy};
use crate::traits::{ArticleStore, ContentStore};
use crate::types::{
    Article, ArticleId, ArticleQuery, ArtifactId, ArtifactKind, ArtifactStatus, GeneratedArtifact, GenerationReport, ModelError,
    NewArtifact, PipelineError, Result, TokenUsage, TopicSummary,
};
use crate::utils::text::{char_len, excerpt, truncate_at_word};
use chrono::{Duration as ChronoDuration, Utc};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// A stored artifact plus what the model charged for it.
#[derive(Debug, Clone)]
pub struct Generated {
    pub artifact: GeneratedArtifact,
    pub usage: TokenUsage,
}

/// Everything one topic produced, including per-item failures.
#[derive(Debug, Default)]
struct TopicRun {
    summary: TopicSummary,
    artifacts: Vec<GeneratedArtifact>,
    usage: TokenUsage,
}

/// Split a model reply into headline and body.
fn split_title(text: &str) -> std::result::Result<(String, String), ModelError> {
    let mut lines = text.trim().lines();
    let title = lines
        .by_ref()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.trim_start_matches('#').trim().to_string())
        .unwrap_or_default();
    let body = lines.collect::<Vec<_>>().join("\n").trim().to_string();

    if title.is_empty() || body.is_empty() {
        return Err(ModelError::Malformed("reply has no body after the headline".to_string()));
    }
    Ok((title, body))
}

pub struct GenerationEngine {
    settings: GenerationConfig,
    retry_policy: RetryPolicy,
    model_timeout: Duration,
    articles: Arc<dyn ArticleStore>,
    content: Arc<dyn ContentStore>,
    model: Arc<dyn LlmAdapter>,
    renderer: Arc<PromptRenderer>,
    chain: Arc<GuardrailChain>,
}

impl GenerationEngine {
    pub fn new(
        config: &PipelineConfig,
        articles: Arc<dyn ArticleStore>,
        content: Arc<dyn ContentStore>,
        model: Arc<dyn LlmAdapter>,
    ) -> Result<Self> {
        let renderer = Arc::new(PromptRenderer::new(config.prompts.clone(), &config.model));
        let chain = Arc::new(
            GuardrailChain::from_config(&config.guardrails, renderer.clone(), Some(model.clone()))?
                .with_audit_log(content.clone()),
        );

        Ok(Self {
            settings: config.generation.clone(),
            retry_policy: config.retry.clone(),
            model_timeout: Duration::from_secs(config.model.timeout_seconds.max(1)),
            articles,
            content,
            model,
            renderer,
            chain,
        })
    }

    pub fn chain(&self) -> &GuardrailChain {
        &self.chain
    }

    /// Articles of `category` ingested within the sliding window, newest first.
    pub async fn recent_articles(&self, category: &str) -> Result<Vec<Article>> {
        let since = Utc::now() - ChronoDuration::days(self.settings.window_days.max(1));
        self.articles
            .find_articles(&ArticleQuery {
                category: Some(category.to_string()),
                since: Some(since),
                ..ArticleQuery::default()
            })
            .await
    }

    fn relevance(&self, article: &Article) -> i64 {
        let mut score = 2 * article.keywords.len() as i64;
        let length = char_len(&article.content);
        score += match length {
            500..=3_000 => 3,
            n if n > 3_000 => 2,
            n if n > 200 => 1,
            _ => 0,
        };
        if self.settings.reliable_sources.iter().any(|s| s == &article.source) {
            score += 2;
        }
        score
    }

    /// Highest scoring articles first, capped at the cluster size.
    pub fn select_top_articles(&self, mut articles: Vec<Article>) -> Vec<Article> {
        articles.sort_by(|a, b| {
            self.relevance(b)
                .cmp(&self.relevance(a))
                .then(b.ingested_at.cmp(&a.ingested_at))
                .then(b.id.cmp(&a.id))
        });
        articles.truncate(self.settings.max_articles_per_cluster);
        articles
    }

    /// Group by category, dropping groups too small to write about.
    pub fn cluster_articles(&self, articles: Vec<Article>) -> BTreeMap<String, Vec<Article>> {
        let mut clusters: BTreeMap<String, Vec<Article>> = BTreeMap::new();
        for article in articles {
            clusters.entry(article.category.clone()).or_default().push(article);
        }
        clusters.retain(|_, members| members.len() >= self.settings.min_cluster_size.max(1));
        clusters
    }

    pub fn article_prompt(&self, topic: &str, sources: &[Article]) -> Result<CompletionRequest> {
        let context = sources
            .iter()
            .enumerate()
            .map(|(i, article)| {
                format!(
                    "Source {}: {} ({})\nURL: {}\nKeywords: {}\n{}",
                    i + 1,
                    article.title,
                    article.source,
                    article.url,
                    article.keywords.join(", "),
                    excerpt(&article.content, self.settings.article_excerpt_chars)
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut vars = BTreeMap::new();
        vars.insert("topic", topic.to_string());
        vars.insert("target_length", self.settings.target_article_words.to_string());
        vars.insert("context", context);
        self.renderer.render("article", &vars)
    }

    pub fn post_prompt(&self, parent: &GeneratedArtifact, platform: &str) -> Result<CompletionRequest> {
        let profile = self
            .settings
            .platforms
            .get(platform)
            .ok_or_else(|| PipelineError::Config(format!("unknown platform '{}'", platform)))?;

        let mut vars = BTreeMap::new();
        vars.insert("platform", platform.to_string());
        vars.insert("style", profile.style.clone());
        vars.insert("format", profile.format.clone());
        vars.insert("max_length", profile.max_chars.to_string());
        vars.insert("title", parent.title.clone().unwrap_or_default());
        vars.insert("content", excerpt(parent.current_body(), self.settings.post_excerpt_chars));
        self.renderer.render("post", &vars)
    }

    /// One model call under the retry policy, each attempt under a deadline.
    /// `parse` runs inside the retried operation, so a malformed reply
    /// counts as a failed attempt.
    async fn complete<T>(
        &self,
        label: &str,
        request: &CompletionRequest,
        parse: impl Fn(&str) -> std::result::Result<T, ModelError>,
    ) -> std::result::Result<(T, TokenUsage), ModelError> {
        let model = &self.model;
        let deadline = self.model_timeout;
        let parse = &parse;
        retry(&self.retry_policy, label, || async move {
            let completion: Completion = match tokio::time::timeout(deadline, model.complete(request)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(ModelError::Timeout {
                        seconds: deadline.as_secs(),
                    })
                }
            };
            Ok((parse(&completion.text)?, completion.usage))
        })
        .await
    }

    async fn resolve_sources(&self, ids: &[ArticleId]) -> Result<Vec<Article>> {
        if ids.is_empty() {
            return Err(PipelineError::General("an artifact needs at least one source article".to_string()));
        }
        let mut sources = Vec::with_capacity(ids.len());
        for &id in ids {
            let article = self
                .articles
                .get_article(id)
                .await?
                .ok_or(PipelineError::NotFound { entity: "article", id })?;
            sources.push(article);
        }
        Ok(sources)
    }

    /// Store the chain's outcome as a pending or blocked artifact.
    async fn persist(&self, draft: NewArtifact, outcome: ChainOutcome) -> Result<GeneratedArtifact> {
        let artifact = match outcome {
            ChainOutcome::Cleared { content, verdicts } => NewArtifact {
                body: content,
                status: ArtifactStatus::Pending,
                verdicts,
                ..draft
            },
            ChainOutcome::Blocked {
                guardrail,
                reason,
                verdicts,
            } => NewArtifact {
                status: ArtifactStatus::Blocked,
                verdicts,
                blocked_by: Some(guardrail),
                block_reason: Some(reason),
                ..draft
            },
        };
        self.content.insert_artifact(&artifact).await
    }

    /// Write a long-form article about `topic` from the given source articles.
    pub async fn generate_article(&self, topic: &str, article_ids: &[ArticleId]) -> Result<Generated> {
        let sources = self.resolve_sources(article_ids).await?;
        let request = self.article_prompt(topic, &sources)?;

        let ((title, body), usage) = self
            .complete(&format!("{} article", topic), &request, split_title)
            .await?;

        let known_domains = self.articles.source_domains().await?;
        let outcome = self.chain.run(body.clone(), &sources, &known_domains).await;

        let draft = NewArtifact {
            kind: ArtifactKind::Article,
            title: Some(title),
            body,
            category: topic.to_string(),
            source_articles: sources.iter().map(|a| a.id).collect(),
            status: ArtifactStatus::Pending,
            platform: None,
            parent_id: None,
            verdicts: Vec::new(),
            blocked_by: None,
            block_reason: None,
        };
        let artifact = self.persist(draft, outcome).await?;
        info!(
            "Generated article {} for {} from {} sources ({})",
            artifact.id,
            topic,
            sources.len(),
            artifact.status
        );
        Ok(Generated { artifact, usage })
    }

    /// Derive a social post for `platform` from a stored article.
    pub async fn generate_post(&self, parent_id: ArtifactId, platform: &str) -> Result<Generated> {
        let parent = self
            .content
            .get_artifact(parent_id)
            .await?
            .filter(|artifact| artifact.kind == ArtifactKind::Article)
            .ok_or(PipelineError::NotFound {
                entity: "article artifact",
                id: parent_id,
            })?;
        if parent.status == ArtifactStatus::Blocked {
            return Err(PipelineError::GuardrailBlocked {
                guardrail: parent.blocked_by.clone().unwrap_or_default(),
                reason: parent.block_reason.clone().unwrap_or_default(),
            });
        }

        let request = self.post_prompt(&parent, platform)?;
        let max_chars = self.settings.platforms.get(platform).map(|p| p.max_chars).unwrap_or(usize::MAX);

        let (text, usage) = self
            .complete(&format!("{} post", platform), &request, |reply| {
                let reply = reply.trim();
                if reply.is_empty() {
                    return Err(ModelError::Malformed("empty post".to_string()));
                }
                Ok(reply.to_string())
            })
            .await?;
        let body = if char_len(&text) > max_chars {
            truncate_at_word(&text, max_chars)
        } else {
            text
        };

        let sources = self.resolve_sources(&parent.source_articles).await?;
        let known_domains = self.articles.source_domains().await?;
        let outcome = match self.chain.run(body.clone(), &sources, &known_domains).await {
            // Warnings and redactions may push the post past the platform limit
            ChainOutcome::Cleared { content, verdicts } => ChainOutcome::Cleared {
                content: truncate_at_word(&content, max_chars),
                verdicts,
            },
            blocked => blocked,
        };

        let draft = NewArtifact {
            kind: ArtifactKind::Post,
            title: None,
            body,
            category: parent.category.clone(),
            source_articles: parent.source_articles.clone(),
            status: ArtifactStatus::Pending,
            platform: Some(platform.to_string()),
            parent_id: Some(parent.id),
            verdicts: Vec::new(),
            blocked_by: None,
            block_reason: None,
        };
        let artifact = self.persist(draft, outcome).await?;
        info!("Generated {} post {} for article {}", platform, artifact.id, parent.id);
        Ok(Generated { artifact, usage })
    }

    /// Article first, then one post per platform once the article cleared.
    async fn run_topic(&self, topic: String, cluster: Vec<Article>) -> Result<TopicRun> {
        let mut run = TopicRun::default();
        let ids: Vec<ArticleId> = cluster.iter().map(|a| a.id).collect();

        let article = match self.generate_article(&topic, &ids).await {
            Ok(generated) => generated,
            Err(e) if e.is_storage() => return Err(e),
            Err(e) => {
                error!("Article generation failed for {}: {}", topic, e);
                run.summary.failures += 1;
                return Ok(run);
            }
        };
        run.usage.add(article.usage);
        let parent = article.artifact;
        if parent.status == ArtifactStatus::Blocked {
            run.summary.blocked += 1;
            run.artifacts.push(parent);
            return Ok(run);
        }
        run.summary.articles += 1;

        let platforms: Vec<&String> = self.settings.platforms.keys().collect();
        let posts = futures::future::join_all(platforms.iter().map(|platform| self.generate_post(parent.id, platform))).await;
        run.artifacts.push(parent);

        for (platform, result) in platforms.into_iter().zip(posts) {
            match result {
                Ok(post) => {
                    run.usage.add(post.usage);
                    if post.artifact.status == ArtifactStatus::Blocked {
                        run.summary.blocked += 1;
                    } else {
                        run.summary.posts += 1;
                    }
                    run.artifacts.push(post.artifact);
                }
                Err(e) if e.is_storage() => return Err(e),
                Err(e) => {
                    warn!("{} post failed for {}: {}", platform, topic, e);
                    run.summary.failures += 1;
                }
            }
        }
        Ok(run)
    }

    /// Generate content for each category from its recent articles.
    /// Topics run concurrently; a failing topic never stops the others.
    pub async fn generate(&self, categories: &[String]) -> Result<GenerationReport> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        info!("Generation run {} over {} categories", run_id, categories.len());

        let mut report = GenerationReport {
            run_id,
            started_at,
            finished_at: started_at,
            categories: BTreeMap::new(),
            artifacts: Vec::new(),
            usage: TokenUsage::default(),
        };

        let wanted: BTreeSet<&String> = categories.iter().collect();
        let mut clusters = Vec::new();
        for category in wanted {
            report.categories.insert(category.clone(), TopicSummary::default());
            let recent = self.recent_articles(category).await?;
            for (topic, members) in self.cluster_articles(recent) {
                let selected = self.select_top_articles(members);
                clusters.push((topic, selected));
            }
        }

        let mut runs = stream::iter(clusters)
            .map(|(topic, cluster)| async move { (topic.clone(), self.run_topic(topic, cluster).await) })
            .buffer_unordered(self.settings.max_concurrent_topics.max(1));

        while let Some((topic, result)) = runs.next().await {
            let run = result?;
            report.usage.add(run.usage);
            report.artifacts.extend(run.artifacts);
            let summary = report.categories.entry(topic).or_default();
            summary.articles += run.summary.articles;
            summary.posts += run.summary.posts;
            summary.blocked += run.summary.blocked;
            summary.failures += run.summary.failures;
        }
        report.artifacts.sort_by_key(|artifact| artifact.id);
        report.finished_at = Utc::now();

        info!(
            "Generation run {} stored {} artifacts using {} tokens",
            run_id,
            report.artifacts.len(),
            report.usage.total()
        );
        Ok(report)
    }
}
