pub mod feed;
pub mod news_api;
pub mod scrape;

pub use feed::FeedRetriever;
pub use news_api::NewsApiRetriever;
pub use scrape::PageScraper;

use crate::config::ExtractionRules;
use crate::extract::extract_article;
use crate::fetcher::PageFetcher;
use crate::types::{ArticleCandidate, PipelineError};
use chrono::{DateTime, Utc};
use tracing::debug;

/// What a listing (feed entry, API hit) already told us about an article.
#[derive(Debug, Clone, Default)]
pub(crate) struct ListingHint {
    pub title: Option<String>,
    pub body: Option<String>,
    pub summary: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Fetch `url` and extract it, filling gaps from the listing. Returns `None`
/// when no complete title + body could be assembled.
pub(crate) async fn extract_candidate(
    fetcher: &dyn PageFetcher,
    url: &str,
    rules: &ExtractionRules,
    min_body_chars: usize,
    hint: ListingHint,
) -> Option<ArticleCandidate> {
    let page = match fetcher.fetch_text(url).await {
        Ok(html) => extract_article(&html, rules),
        Err(e) => {
            debug!("Page fetch failed for {}, using listing content: {}", url, e);
            Default::default()
        }
    };

    let long_enough = |text: &String| text.chars().count() >= min_body_chars;
    let title = hint
        .title
        .filter(|t| !t.trim().is_empty())
        .or(page.title)
        .map(|t| t.trim().to_string());
    let content = Some(page.body).filter(long_enough).or(hint.body.filter(long_enough));

    match (title, content) {
        (Some(title), Some(content)) if !title.is_empty() => Some(ArticleCandidate {
            url: url.to_string(),
            title,
            content,
            published_at: page.published_at.or(hint.published_at),
            summary: hint.summary,
        }),
        _ => {
            debug!("{}", PipelineError::ExtractionIncomplete { url: url.to_string() });
            None
        }
    }
}
