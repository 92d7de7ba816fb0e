use crate::aggregator::Aggregator;
use crate::config::PipelineConfig;
use crate::fetcher::PageFetcher;
use crate::generation::GenerationEngine;
use crate::llm_adapter::{create_adapter, LlmAdapter};
use crate::review::ReviewQueue;
use crate::store::SqliteStore;
use crate::traits::{ArticleStore, ContentStore};
use crate::types::{AggregationReport, GenerationReport, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Outcome of one aggregate-then-generate cycle.
#[derive(Debug, Clone, Serialize)]
pub struct DailyRun {
    pub aggregation: AggregationReport,
    pub generation: GenerationReport,
}

/// Wires the stores, model, aggregator, generation engine and review queue
/// from one immutable configuration.
pub struct NewsPipeline {
    config: Arc<PipelineConfig>,
    aggregator: Aggregator,
    engine: GenerationEngine,
    review: ReviewQueue,
}

impl NewsPipeline {
    /// Open the configured SQLite database and model provider.
    pub async fn connect(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(SqliteStore::connect(&config.database_url).await?);
        let model = create_adapter(&config.model)?;
        let config = Arc::new(config);
        let aggregator = Aggregator::new(config.clone(), store.clone())?;
        Self::assemble(config, store.clone(), store, model, aggregator)
    }

    /// Build from explicit collaborators. Used by tests and embedders.
    pub fn from_parts(
        config: PipelineConfig,
        articles: Arc<dyn ArticleStore>,
        content: Arc<dyn ContentStore>,
        model: Arc<dyn LlmAdapter>,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let aggregator = Aggregator::with_fetcher(config.clone(), articles.clone(), fetcher);
        Self::assemble(config, articles, content, model, aggregator)
    }

    fn assemble(
        config: Arc<PipelineConfig>,
        articles: Arc<dyn ArticleStore>,
        content: Arc<dyn ContentStore>,
        model: Arc<dyn LlmAdapter>,
        aggregator: Aggregator,
    ) -> Result<Self> {
        let engine = GenerationEngine::new(&config, articles.clone(), content.clone(), model)?;
        let review = ReviewQueue::new(articles, content);
        Ok(Self {
            config,
            aggregator,
            engine,
            review,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn engine(&self) -> &GenerationEngine {
        &self.engine
    }

    pub fn review(&self) -> &ReviewQueue {
        &self.review
    }

    pub async fn aggregate(&self) -> Result<AggregationReport> {
        self.aggregator.run().await
    }

    /// Generate for the given categories, or every configured one when empty.
    pub async fn generate(&self, categories: &[String]) -> Result<GenerationReport> {
        if categories.is_empty() {
            self.engine.generate(&self.config.categories()).await
        } else {
            self.engine.generate(categories).await
        }
    }

    pub async fn run_daily(&self) -> Result<DailyRun> {
        let aggregation = self.aggregate().await?;
        info!("Aggregated {} new articles", aggregation.total_new_articles());
        let generation = self.generate(&[]).await?;
        Ok(DailyRun {
            aggregation,
            generation,
        })
    }
}
