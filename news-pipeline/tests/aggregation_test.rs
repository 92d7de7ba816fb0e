mod common;

use common::*;
use news_pipeline::traits::ArticleStore;
use news_pipeline::{Aggregator, ArticleQuery, RetrievalMethod};
use std::sync::Arc;
use tracing::info;

const FEED: &str = "https://wire.example.com/feed";
const HOME: &str = "https://wire.example.com/";
const STORY: &str = "https://wire.example.com/2024/01/chips";
const SEARCH: &str = "https://search.example.test/v2/everything?";

fn with_api_key(mut config: news_pipeline::config::PipelineConfig) -> news_pipeline::config::PipelineConfig {
    config.news_api.base_url = "https://search.example.test/v2/".to_string();
    config.news_api.api_key = Some("test-key".to_string());
    config
}

#[tokio::test]
async fn reingesting_a_url_refreshes_keywords_but_keeps_the_record() -> anyhow::Result<()> {
    init_tracing();
    let (_dir, store) = temp_store().await?;
    let config = Arc::new(test_config(vec![source("Wire", "technology", HOME, Some(FEED))]));

    let first_fetcher = Arc::new(
        StaticFetcher::new()
            .with_page(FEED, rss_feed(&[("Chips get faster", STORY)]))
            .with_page(STORY, article_page("Chips get faster", &long_text("machine learning"))),
    );
    let first = Aggregator::with_fetcher(config.clone(), store.clone(), first_fetcher)
        .run()
        .await?;
    assert_eq!(first.categories["technology"].new_articles, 1);

    let stored = store.get_article_by_url(STORY).await?.expect("article stored");
    assert_eq!(stored.keywords, vec!["machine learning".to_string()]);

    // Same URL, different text on the second run
    let second_fetcher = Arc::new(
        StaticFetcher::new()
            .with_page(FEED, rss_feed(&[("Chips get faster", STORY)]))
            .with_page(STORY, article_page("Chips get faster", &long_text("blockchain"))),
    );
    let second = Aggregator::with_fetcher(config, store.clone(), second_fetcher)
        .run()
        .await?;
    info!("Second run: {:?}", second.categories);

    assert_eq!(second.categories["technology"].new_articles, 0);
    assert_eq!(second.categories["technology"].updated_articles, 1);
    assert!(second.ingested["technology"].is_empty());

    let all = store.find_articles(&ArticleQuery::default()).await?;
    assert_eq!(all.len(), 1);
    let refreshed = &all[0];
    assert_eq!(refreshed.id, stored.id);
    assert_eq!(refreshed.ingested_at, stored.ingested_at);
    assert_eq!(refreshed.content, stored.content);
    assert_eq!(refreshed.keywords, vec!["blockchain".to_string()]);
    Ok(())
}

#[tokio::test]
async fn empty_feed_falls_back_to_scraping() -> anyhow::Result<()> {
    init_tracing();
    let (_dir, store) = temp_store().await?;
    let wire = source("Wire", "technology", HOME, Some(FEED));
    let config = Arc::new(test_config(vec![wire.clone()]));

    let fetcher = Arc::new(
        StaticFetcher::new()
            .with_page(FEED, rss_feed(&[]))
            .with_page(HOME, homepage(&["/2024/01/chips", "/about-us"]))
            .with_page(STORY, article_page("Chips get faster", &long_text("cloud computing"))),
    );
    let aggregator = Aggregator::with_fetcher(config, store.clone(), fetcher.clone());

    let harvest = aggregator.harvest_source(&wire).await;
    assert_eq!(harvest.method, Some(RetrievalMethod::Scrape));
    assert_eq!(harvest.candidates.len(), 1);
    assert_eq!(harvest.candidates[0].title, "Chips get faster");

    let requests = fetcher.requests().await;
    assert_eq!(requests[0], FEED);
    assert_eq!(requests[1], HOME);
    assert_eq!(requests[2], STORY);
    Ok(())
}

#[tokio::test]
async fn two_sources_with_the_same_article_store_one_record() -> anyhow::Result<()> {
    init_tracing();
    let (_dir, store) = temp_store().await?;
    let other_feed = "https://mirror.example.org/rss";
    let config = Arc::new(test_config(vec![
        source("Wire", "technology", HOME, Some(FEED)),
        source("Mirror", "technology", "https://mirror.example.org/", Some(other_feed)),
    ]));

    let page = article_page("Chips get faster", &long_text("automation"));
    let fetcher = Arc::new(
        StaticFetcher::new()
            .with_page(FEED, rss_feed(&[("Chips get faster", STORY)]))
            .with_page(other_feed, rss_feed(&[("Chips get faster", STORY)]))
            .with_page(STORY, page),
    );
    let report = Aggregator::with_fetcher(config, store.clone(), fetcher).run().await?;

    let summary = &report.categories["technology"];
    assert_eq!(summary.sources_attempted, 2);
    assert_eq!(summary.sources_succeeded, 2);
    assert_eq!(summary.new_articles, 1);
    assert_eq!(summary.updated_articles, 1);
    assert_eq!(store.article_stats().await?.total, 1);
    Ok(())
}

#[tokio::test]
async fn incomplete_pages_and_failing_sources_are_skipped() -> anyhow::Result<()> {
    init_tracing();
    let (_dir, store) = temp_store().await?;
    let stub = "https://wire.example.com/2024/01/stub";
    let config = Arc::new(test_config(vec![
        source("Wire", "technology", HOME, Some(FEED)),
        source("Offline", "technology", "https://offline.example.net/", Some("https://offline.example.net/rss")),
    ]));

    let fetcher = Arc::new(
        StaticFetcher::new()
            .with_page(FEED, rss_feed(&[("Chips get faster", STORY), ("Title only", stub)]))
            .with_page(STORY, article_page("Chips get faster", &long_text("innovation")))
            .with_page(stub, article_page("Title only", "Too short.")),
    );
    let report = Aggregator::with_fetcher(config, store.clone(), fetcher).run().await?;

    let summary = &report.categories["technology"];
    assert_eq!(summary.sources_attempted, 2);
    assert_eq!(summary.sources_succeeded, 1);
    assert_eq!(summary.new_articles, 1);
    assert!(store.get_article_by_url(stub).await?.is_none());
    assert_eq!(report.total_new_articles(), 1);
    Ok(())
}

#[tokio::test]
async fn search_api_is_the_last_resort() -> anyhow::Result<()> {
    init_tracing();
    let (_dir, store) = temp_store().await?;
    let wire = source("Wire", "technology", HOME, Some(FEED));
    let config = Arc::new(with_api_key(test_config(vec![wire.clone()])));

    let hits = serde_json::json!({
        "status": "ok",
        "totalResults": 2,
        "articles": [
            {
                "url": STORY,
                "title": "Chips get faster",
                "description": "A teaser about chips.",
                "content": null,
                "publishedAt": "2024-01-02T08:00:00Z"
            },
            { "url": null, "title": "No link", "description": "Skipped." }
        ]
    });
    let fetcher = Arc::new(
        StaticFetcher::new()
            .with_page(FEED, rss_feed(&[]))
            .with_page(HOME, homepage(&[]))
            .with_prefix(SEARCH, hits.to_string())
            .with_page(STORY, article_page("Chips get faster", &long_text("machine learning"))),
    );
    let aggregator = Aggregator::with_fetcher(config, store.clone(), fetcher.clone());

    let harvest = aggregator.harvest_source(&wire).await;
    assert_eq!(harvest.method, Some(RetrievalMethod::Api));
    assert_eq!(harvest.candidates.len(), 1);
    let candidate = &harvest.candidates[0];
    assert_eq!(candidate.url, STORY);
    assert_eq!(candidate.title, "Chips get faster");
    assert!(candidate.content.contains("machine learning"));
    assert_eq!(candidate.summary.as_deref(), Some("A teaser about chips."));
    assert!(candidate.published_at.is_some());

    let requests = fetcher.requests().await;
    assert_eq!(requests[0], FEED);
    assert_eq!(requests[1], HOME);
    assert!(requests[2].starts_with(SEARCH));
    assert!(requests[2].contains("domains=wire.example.com"));
    assert!(requests[2].contains("apiKey=test-key"));
    Ok(())
}

#[tokio::test]
async fn search_api_errors_leave_the_source_empty() -> anyhow::Result<()> {
    init_tracing();
    let (_dir, store) = temp_store().await?;
    let wire = source("Wire", "technology", HOME, Some(FEED));
    let config = Arc::new(with_api_key(test_config(vec![wire.clone()])));

    let refusal = serde_json::json!({ "status": "error", "code": "apiKeyInvalid", "message": "Your API key is invalid." });
    let fetcher = Arc::new(
        StaticFetcher::new()
            .with_page(FEED, rss_feed(&[]))
            .with_page(HOME, homepage(&[]))
            .with_prefix(SEARCH, refusal.to_string()),
    );
    let report = Aggregator::with_fetcher(config, store.clone(), fetcher.clone()).run().await?;

    let summary = &report.categories["technology"];
    assert_eq!(summary.sources_attempted, 1);
    assert_eq!(summary.sources_succeeded, 0);
    assert_eq!(summary.new_articles, 0);
    assert_eq!(fetcher.requests().await.len(), 3);
    assert_eq!(store.article_stats().await?.total, 0);
    Ok(())
}
