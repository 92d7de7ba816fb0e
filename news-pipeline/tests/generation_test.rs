mod common;

use common::*;
use news_pipeline::traits::{ArticleStore, ContentStore};
use news_pipeline::{
    ArtifactKind, ArtifactQuery, ArtifactStatus, GenerationEngine, MockLlmAdapter, MockReply, PipelineError,
};
use std::sync::Arc;
use tracing::info;

async fn seed(store: &Arc<news_pipeline::SqliteStore>, category: &str, count: usize) -> anyhow::Result<Vec<i64>> {
    let mut ids = Vec::new();
    for i in 0..count {
        let url = format!("https://{}.example.com/2024/story-{}", category, i);
        let outcome = store
            .upsert_article(&new_article(&url, category, &format!("Desk {}", i), &long_text(category), &[]))
            .await?;
        ids.push(outcome.article.id);
    }
    Ok(ids)
}

#[tokio::test]
async fn three_recent_articles_become_one_pending_article() -> anyhow::Result<()> {
    init_tracing();
    let (_dir, store) = temp_store().await?;
    let ids = seed(&store, "technology", 3).await?;
    let model = Arc::new(MockLlmAdapter::new("generation"));
    let engine = GenerationEngine::new(&test_config(vec![]), store.clone(), store.clone(), model.clone())?;

    let report = engine.generate(&["technology".to_string()]).await?;
    info!("Generation summary: {:?}", report.categories);

    let articles: Vec<_> = report
        .artifacts
        .iter()
        .filter(|a| a.kind == ArtifactKind::Article)
        .collect();
    assert_eq!(articles.len(), 1);
    let article = articles[0];
    assert_eq!(article.status, ArtifactStatus::Pending);
    assert_eq!(article.title.as_deref(), Some("technology update"));
    let mut sources = article.source_articles.clone();
    sources.sort();
    assert_eq!(sources, ids);
    assert_eq!(article.verdicts.len(), 4);

    let summary = &report.categories["technology"];
    assert_eq!(summary.articles, 1);
    assert_eq!(summary.posts, 2);
    assert_eq!(summary.failures, 0);
    assert_eq!(model.call_count(), 3);
    assert!(report.usage.total() > 0);
    Ok(())
}

#[tokio::test]
async fn every_artifact_traces_to_stored_articles() -> anyhow::Result<()> {
    init_tracing();
    let (_dir, store) = temp_store().await?;
    seed(&store, "technology", 2).await?;
    seed(&store, "leadership", 2).await?;
    let engine = GenerationEngine::new(
        &test_config(vec![]),
        store.clone(),
        store.clone(),
        Arc::new(MockLlmAdapter::new("trace")),
    )?;

    engine
        .generate(&["technology".to_string(), "leadership".to_string()])
        .await?;

    let artifacts = store.list_artifacts(&ArtifactQuery::default()).await?;
    assert_eq!(artifacts.len(), 6);
    for artifact in artifacts {
        assert!(!artifact.source_articles.is_empty());
        for id in &artifact.source_articles {
            assert!(store.get_article(*id).await?.is_some(), "dangling source {}", id);
        }
        if artifact.kind == ArtifactKind::Post {
            let parent = store.get_artifact(artifact.parent_id.expect("post has a parent")).await?;
            let parent = parent.expect("parent stored");
            assert_eq!(parent.source_articles, artifact.source_articles);
            assert_eq!(parent.category, artifact.category);
        }
    }
    Ok(())
}

#[tokio::test]
async fn prompt_construction_is_byte_identical() -> anyhow::Result<()> {
    init_tracing();
    let (_dir, store) = temp_store().await?;
    seed(&store, "technology", 3).await?;
    let model = Arc::new(MockLlmAdapter::new("prompts"));
    let engine = GenerationEngine::new(&test_config(vec![]), store.clone(), store.clone(), model.clone())?;

    let selected = engine.select_top_articles(engine.recent_articles("technology").await?);
    let first = engine.article_prompt("technology", &selected)?;
    let second = engine.article_prompt("technology", &selected)?;
    assert_eq!(first, second);
    assert!(first.user.contains("Source 3:"));

    let ids: Vec<i64> = selected.iter().map(|a| a.id).collect();
    let generated = engine.generate_article("technology", &ids).await?;
    assert_eq!(model.requests().await[0], first);

    let post_a = engine.post_prompt(&generated.artifact, "twitter")?;
    let post_b = engine.post_prompt(&generated.artifact, "twitter")?;
    assert_eq!(post_a, post_b);
    assert!(post_a.system.contains("280"));
    Ok(())
}

#[tokio::test]
async fn exhausted_retries_fail_one_topic_only() -> anyhow::Result<()> {
    init_tracing();
    let (_dir, store) = temp_store().await?;
    seed(&store, "technology", 2).await?;
    seed(&store, "leadership", 2).await?;
    let model = Arc::new(MockLlmAdapter::new("flaky").failing_when("Topic: leadership"));
    let engine = GenerationEngine::new(&test_config(vec![]), store.clone(), store.clone(), model.clone())?;

    let report = engine
        .generate(&["leadership".to_string(), "technology".to_string()])
        .await?;

    assert_eq!(report.categories["leadership"].failures, 1);
    assert_eq!(report.categories["leadership"].articles, 0);
    assert_eq!(report.categories["technology"].articles, 1);
    assert!(report.artifacts.iter().all(|a| a.category == "technology"));

    // Three attempts for leadership, one article and two posts for technology
    assert_eq!(model.call_count(), 6);
    Ok(())
}

#[tokio::test]
async fn unknown_source_articles_are_rejected_before_calling_the_model() -> anyhow::Result<()> {
    init_tracing();
    let (_dir, store) = temp_store().await?;
    let ids = seed(&store, "technology", 1).await?;
    let model = Arc::new(MockLlmAdapter::new("strict"));
    let engine = GenerationEngine::new(&test_config(vec![]), store.clone(), store.clone(), model.clone())?;

    let result = engine.generate_article("technology", &[ids[0], 9_999]).await;
    assert!(matches!(result, Err(PipelineError::NotFound { id: 9_999, .. })));
    assert_eq!(model.call_count(), 0);
    assert_eq!(store.artifact_stats().await?.total, 0);
    Ok(())
}

#[tokio::test]
async fn posts_respect_platform_limits() -> anyhow::Result<()> {
    init_tracing();
    let (_dir, store) = temp_store().await?;
    let ids = seed(&store, "technology", 2).await?;
    let model = Arc::new(MockLlmAdapter::new("posts"));
    let engine = GenerationEngine::new(&test_config(vec![]), store.clone(), store.clone(), model.clone())?;

    let parent = engine.generate_article("technology", &ids).await?.artifact;
    let tweet = engine.generate_post(parent.id, "twitter").await?.artifact;

    assert_eq!(tweet.kind, ArtifactKind::Post);
    assert_eq!(tweet.platform.as_deref(), Some("twitter"));
    assert_eq!(tweet.parent_id, Some(parent.id));
    assert!(tweet.body.chars().count() <= 280);
    assert!(matches!(
        engine.generate_post(parent.id, "myspace").await,
        Err(PipelineError::Config(_))
    ));
    Ok(())
}

#[tokio::test]
async fn content_warning_keeps_posts_within_the_limit() -> anyhow::Result<()> {
    init_tracing();
    let (_dir, store) = temp_store().await?;
    let ids = seed(&store, "technology", 2).await?;
    let reply = format!("{}attack attack attack attack", "word ".repeat(50));
    assert_eq!(reply.chars().count(), 277);
    let model = Arc::new(MockLlmAdapter::new("warned posts").with_replies([
        MockReply::Text(format!("# Chip news\n\n{}", long_text("chips"))),
        MockReply::Text(reply),
    ]));
    let engine = GenerationEngine::new(&test_config(vec![]), store.clone(), store.clone(), model.clone())?;

    let parent = engine.generate_article("technology", &ids).await?.artifact;
    let tweet = engine.generate_post(parent.id, "twitter").await?.artifact;

    assert_eq!(tweet.status, ArtifactStatus::Pending);
    assert!(tweet.body.starts_with("[CONTENT WARNING: This content may contain violence."));
    assert!(tweet.body.chars().count() <= 280);
    assert!(tweet.verdicts.iter().any(|v| v.guardrail == "content_safety" && v.modified));
    Ok(())
}
