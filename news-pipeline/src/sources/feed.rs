use super::{extract_candidate, ListingHint};
use crate::config::{AggregationConfig, SourceConfig};
use crate::extract::html_to_text;
use crate::fetcher::PageFetcher;
use crate::parser::FeedParser;
use crate::traits::Retriever;
use crate::types::{ArticleCandidate, PipelineError, Result, RetrievalMethod};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// RSS/Atom retrieval: the feed lists the articles, each page is then
/// extracted with the source's selectors.
pub struct FeedRetriever {
    fetcher: Arc<dyn PageFetcher>,
    settings: AggregationConfig,
}

impl FeedRetriever {
    pub fn new(fetcher: Arc<dyn PageFetcher>, settings: AggregationConfig) -> Self {
        Self { fetcher, settings }
    }
}

#[async_trait]
impl Retriever for FeedRetriever {
    fn method(&self) -> RetrievalMethod {
        RetrievalMethod::Feed
    }

    fn supports(&self, source: &SourceConfig) -> bool {
        source.feed_url.is_some()
    }

    async fn retrieve(&self, source: &SourceConfig) -> Result<Vec<ArticleCandidate>> {
        let feed_url = source
            .feed_url
            .as_deref()
            .ok_or_else(|| PipelineError::Config(format!("source '{}' has no feed url", source.name)))?;

        let content = self.fetcher.fetch_text(feed_url).await?;
        let feed = FeedParser::parse_feed(&content)?;

        let mut candidates = Vec::new();
        for entry in feed.entries.into_iter().take(self.settings.max_articles_per_source) {
            let hint = ListingHint {
                title: entry.title,
                body: entry
                    .content
                    .as_deref()
                    .or(entry.description.as_deref())
                    .map(html_to_text),
                summary: entry.description.as_deref().map(html_to_text).filter(|s| !s.is_empty()),
                published_at: entry.published_at,
            };
            if let Some(candidate) = extract_candidate(
                self.fetcher.as_ref(),
                &entry.url,
                &source.selectors,
                self.settings.min_body_chars,
                hint,
            )
            .await
            {
                candidates.push(candidate);
            }
        }

        info!("Feed for {} yielded {} complete articles", source.name, candidates.len());
        Ok(candidates)
    }
}
