use super::{extract_candidate, ListingHint};
use crate::config::{AggregationConfig, SourceConfig};
use crate::extract::discover_article_links;
use crate::fetcher::PageFetcher;
use crate::traits::Retriever;
use crate::types::{ArticleCandidate, Result, RetrievalMethod};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Direct scraping: discover article links on the homepage and extract each.
pub struct PageScraper {
    fetcher: Arc<dyn PageFetcher>,
    settings: AggregationConfig,
}

impl PageScraper {
    pub fn new(fetcher: Arc<dyn PageFetcher>, settings: AggregationConfig) -> Self {
        Self { fetcher, settings }
    }
}

#[async_trait]
impl Retriever for PageScraper {
    fn method(&self) -> RetrievalMethod {
        RetrievalMethod::Scrape
    }

    fn supports(&self, source: &SourceConfig) -> bool {
        crate::utils::url::is_http_url(&source.url)
    }

    async fn retrieve(&self, source: &SourceConfig) -> Result<Vec<ArticleCandidate>> {
        let homepage = self.fetcher.fetch_text(&source.url).await?;
        let links = discover_article_links(
            &homepage,
            &source.url,
            &source.selectors,
            self.settings.max_articles_per_source,
        );

        let mut candidates = Vec::new();
        for link in links {
            if let Some(candidate) = extract_candidate(
                self.fetcher.as_ref(),
                &link,
                &source.selectors,
                self.settings.min_body_chars,
                ListingHint::default(),
            )
            .await
            {
                candidates.push(candidate);
            }
        }

        info!("Scraping {} yielded {} complete articles", source.name, candidates.len());
        Ok(candidates)
    }
}
