use crate::config::{PipelineConfig, SourceConfig};
use crate::fetcher::{Fetcher, PageFetcher};
use crate::sources::{FeedRetriever, NewsApiRetriever, PageScraper};
use crate::traits::{ArticleStore, Retriever};
use crate::types::{
    AggregationReport, ArticleCandidate, CategorySummary, NewArticle, PipelineError, Result, RetrievalMethod,
};
use crate::utils::extract_keywords;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What one source produced in one run.
#[derive(Debug)]
pub struct SourceHarvest {
    pub source: SourceConfig,
    /// The method whose result was accepted, if any.
    pub method: Option<RetrievalMethod>,
    pub candidates: Vec<ArticleCandidate>,
}

/// Pulls every configured source through its retrieval methods and merges
/// the results into the Article Store.
pub struct Aggregator {
    config: Arc<PipelineConfig>,
    store: Arc<dyn ArticleStore>,
    retrievers: Vec<Arc<dyn Retriever>>,
}

impl Aggregator {
    pub fn new(config: Arc<PipelineConfig>, store: Arc<dyn ArticleStore>) -> Result<Self> {
        let fetcher: Arc<dyn PageFetcher> = Arc::new(Fetcher::new(config.fetch.clone(), config.retry.clone())?);
        Ok(Self::with_fetcher(config, store, fetcher))
    }

    /// Build the standard feed, scrape and API retrievers over `fetcher`.
    pub fn with_fetcher(config: Arc<PipelineConfig>, store: Arc<dyn ArticleStore>, fetcher: Arc<dyn PageFetcher>) -> Self {
        let retrievers: Vec<Arc<dyn Retriever>> = vec![
            Arc::new(FeedRetriever::new(fetcher.clone(), config.aggregation.clone())),
            Arc::new(PageScraper::new(fetcher.clone(), config.aggregation.clone())),
            Arc::new(NewsApiRetriever::new(
                fetcher,
                config.news_api.clone(),
                config.keywords.clone(),
                config.aggregation.clone(),
            )),
        ];
        Self::with_retrievers(config, store, retrievers)
    }

    pub fn with_retrievers(
        config: Arc<PipelineConfig>,
        store: Arc<dyn ArticleStore>,
        retrievers: Vec<Arc<dyn Retriever>>,
    ) -> Self {
        Self {
            config,
            store,
            retrievers,
        }
    }

    fn retriever_for(&self, method: RetrievalMethod) -> Option<&Arc<dyn Retriever>> {
        self.retrievers.iter().find(|retriever| retriever.method() == method)
    }

    /// Try each method in priority order until one yields articles.
    /// Failures are logged and the next method is tried.
    pub async fn harvest_source(&self, source: &SourceConfig) -> SourceHarvest {
        for method in RetrievalMethod::PRIORITY {
            if !source.allows(method) {
                continue;
            }
            let Some(retriever) = self.retriever_for(method).filter(|r| r.supports(source)) else {
                continue;
            };

            match retriever.retrieve(source).await {
                Ok(candidates) if !candidates.is_empty() => {
                    info!("{}: {} articles via {}", source.name, candidates.len(), method.as_str());
                    return SourceHarvest {
                        source: source.clone(),
                        method: Some(method),
                        candidates,
                    };
                }
                Ok(_) => debug!("{}: {} produced nothing, trying next method", source.name, method.as_str()),
                Err(e) => warn!("{}: {} retrieval failed: {}", source.name, method.as_str(), e),
            }
        }

        warn!(
            "{}",
            PipelineError::SourceUnavailable {
                source_name: source.name.clone(),
                reason: "no retrieval method produced articles".to_string(),
            }
        );
        SourceHarvest {
            source: source.clone(),
            method: None,
            candidates: Vec::new(),
        }
    }

    /// Aggregate every configured category.
    pub async fn run(&self) -> Result<AggregationReport> {
        self.run_categories(&self.config.categories()).await
    }

    /// Sources are fetched concurrently; every write goes through this
    /// single consumer so upserts on the same URL never race.
    pub async fn run_categories(&self, categories: &[String]) -> Result<AggregationReport> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let mut report = AggregationReport {
            run_id,
            started_at,
            finished_at: started_at,
            categories: BTreeMap::new(),
            ingested: BTreeMap::new(),
        };

        let sources: Vec<&SourceConfig> = categories
            .iter()
            .flat_map(|category| self.config.sources_for(category))
            .collect();
        for category in categories {
            report.categories.entry(category.clone()).or_default();
            report.ingested.entry(category.clone()).or_default();
        }
        info!("Aggregation run {} over {} sources", run_id, sources.len());

        let mut harvests = stream::iter(sources)
            .map(|source| self.harvest_source(source))
            .buffer_unordered(self.config.aggregation.max_concurrent_sources.max(1));

        while let Some(harvest) = harvests.next().await {
            let category = harvest.source.category.clone();
            let vocabulary = self.config.vocabulary(&category);
            let summary: &mut CategorySummary = report.categories.entry(category.clone()).or_default();
            summary.sources_attempted += 1;
            if harvest.method.is_some() {
                summary.sources_succeeded += 1;
            }

            for candidate in harvest.candidates {
                let keywords = extract_keywords(&format!("{} {}", candidate.title, candidate.content), vocabulary);
                let article = NewArticle {
                    title: candidate.title,
                    content: candidate.content,
                    url: candidate.url,
                    source: harvest.source.name.clone(),
                    category: category.clone(),
                    published_at: candidate.published_at,
                    keywords,
                    summary: candidate.summary,
                };

                let outcome = self.store.upsert_article(&article).await.map_err(|e| {
                    error!("Storing {} failed: {}", article.url, e);
                    e
                })?;
                let summary = report.categories.entry(category.clone()).or_default();
                if outcome.inserted {
                    summary.new_articles += 1;
                    report.ingested.entry(category.clone()).or_default().push(outcome.article);
                } else {
                    summary.updated_articles += 1;
                }
            }
        }

        report.finished_at = Utc::now();
        for (category, summary) in &report.categories {
            info!(
                "{}: {}/{} sources succeeded, {} new and {} updated articles",
                category, summary.sources_succeeded, summary.sources_attempted, summary.new_articles, summary.updated_articles
            );
        }
        Ok(report)
    }
}
