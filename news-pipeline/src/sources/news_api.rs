use super::{extract_candidate, ListingHint};
use crate::config::{AggregationConfig, ExtractionRules, NewsApiConfig, SourceConfig};
use crate::fetcher::PageFetcher;
use crate::traits::Retriever;
use crate::types::{ArticleCandidate, PipelineError, Result, RetrievalMethod};
use crate::utils::url::extract_domain;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

#[derive(Debug, Deserialize)]
struct EverythingResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    articles: Vec<ApiArticle>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiArticle {
    url: Option<String>,
    title: Option<String>,
    description: Option<String>,
    content: Option<String>,
    published_at: Option<DateTime<Utc>>,
}

/// Search fallback over the NewsAPI `everything` endpoint, restricted to
/// the source's domain and queried with the category vocabulary.
pub struct NewsApiRetriever {
    fetcher: Arc<dyn PageFetcher>,
    api: NewsApiConfig,
    keywords: BTreeMap<String, Vec<String>>,
    settings: AggregationConfig,
}

impl NewsApiRetriever {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        api: NewsApiConfig,
        keywords: BTreeMap<String, Vec<String>>,
        settings: AggregationConfig,
    ) -> Self {
        Self {
            fetcher,
            api,
            keywords,
            settings,
        }
    }

    /// First five category keywords joined with OR.
    pub fn build_query(&self, category: &str) -> String {
        let terms = self.keywords.get(category).map(Vec::as_slice).unwrap_or(&[]);
        let query = terms
            .iter()
            .take(5)
            .map(|term| if term.contains(' ') { format!("\"{}\"", term) } else { term.clone() })
            .collect::<Vec<_>>()
            .join(" OR ");
        if query.is_empty() {
            category.to_string()
        } else {
            query
        }
    }

    fn request_url(&self, source: &SourceConfig, api_key: &str) -> Result<String> {
        let base = Url::parse(&self.api.base_url)?;
        let endpoint = base.join("everything")?;
        let mut params = vec![
            ("q", self.build_query(&source.category)),
            ("language", "en".to_string()),
            ("sortBy", "publishedAt".to_string()),
            ("pageSize", self.api.page_size.to_string()),
            ("apiKey", api_key.to_string()),
        ];
        if let Some(domain) = extract_domain(&source.url) {
            params.push(("domains", domain));
        }
        Ok(Url::parse_with_params(endpoint.as_str(), &params)?.to_string())
    }
}

#[async_trait]
impl Retriever for NewsApiRetriever {
    fn method(&self) -> RetrievalMethod {
        RetrievalMethod::Api
    }

    fn supports(&self, _source: &SourceConfig) -> bool {
        self.api.api_key.as_deref().is_some_and(|key| !key.is_empty())
    }

    async fn retrieve(&self, source: &SourceConfig) -> Result<Vec<ArticleCandidate>> {
        let api_key = self
            .api
            .api_key
            .as_deref()
            .ok_or_else(|| PipelineError::Config("news api key is not configured".to_string()))?;

        let raw = self.fetcher.fetch_text(&self.request_url(source, api_key)?).await?;
        let response: EverythingResponse = serde_json::from_str(&raw)?;
        if response.status != "ok" {
            return Err(PipelineError::SourceUnavailable {
                source_name: source.name.clone(),
                reason: response.message.unwrap_or_else(|| format!("api status {}", response.status)),
            });
        }
        debug!("News API returned {} hits for {}", response.articles.len(), source.name);

        let rules = ExtractionRules::default();
        let mut candidates = Vec::new();
        for hit in response.articles.into_iter().take(self.settings.max_articles_per_source) {
            let Some(url) = hit.url else {
                continue;
            };
            let body = [hit.description.clone(), hit.content]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join("\n\n");
            let hint = ListingHint {
                title: hit.title,
                body: Some(body).filter(|b| !b.is_empty()),
                summary: hit.description,
                published_at: hit.published_at,
            };
            if let Some(candidate) =
                extract_candidate(self.fetcher.as_ref(), &url, &rules, self.settings.min_body_chars, hint).await
            {
                candidates.push(candidate);
            }
        }

        info!("News API fallback for {} yielded {} complete articles", source.name, candidates.len());
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;

    struct NoFetch;

    #[async_trait]
    impl PageFetcher for NoFetch {
        async fn fetch_text(&self, url: &str) -> Result<String> {
            Err(PipelineError::General(format!("unexpected fetch of {}", url)))
        }
    }

    #[test]
    fn query_uses_first_five_keywords() -> Result<()> {
        let config = PipelineConfig::default();
        let api = NewsApiConfig {
            api_key: Some("key".to_string()),
            ..NewsApiConfig::default()
        };
        let retriever = NewsApiRetriever::new(Arc::new(NoFetch), api, config.keywords.clone(), config.aggregation);

        assert_eq!(
            retriever.build_query("technology"),
            "\"artificial intelligence\" OR \"machine learning\" OR blockchain OR cryptocurrency OR \"cloud computing\""
        );
        assert_eq!(retriever.build_query("gardening"), "gardening");

        let url = retriever.request_url(&config.sources[0], "key")?;
        assert!(url.starts_with("https://newsapi.org/v2/everything?"));
        assert!(url.contains("domains=techcrunch.com"));
        assert!(retriever.supports(&config.sources[0]));
        Ok(())
    }
}
