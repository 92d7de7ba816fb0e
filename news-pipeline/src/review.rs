use crate::traits::{ArticleStore, ContentStore};
use crate::types::{
    ApprovalState, ArtifactId, ArtifactKind, ArtifactQuery, ArtifactStatus, GeneratedArtifact, PendingContent,
    PipelineError, PipelineStats, Result,
};
use std::sync::Arc;
use tracing::info;

/// The operations a reviewer-facing layer calls into.
///
/// Blocked artifacts never surface here as reviewable items: they read as
/// not found and are only reachable through [`ReviewQueue::list_blocked`]
/// and the statistics.
#[derive(Clone)]
pub struct ReviewQueue {
    articles: Arc<dyn ArticleStore>,
    content: Arc<dyn ContentStore>,
}

impl ReviewQueue {
    pub fn new(articles: Arc<dyn ArticleStore>, content: Arc<dyn ContentStore>) -> Self {
        Self { articles, content }
    }

    /// Pending artifacts by kind, oldest first.
    pub async fn list_pending(&self) -> Result<PendingContent> {
        let pending = self
            .content
            .list_artifacts(&ArtifactQuery {
                status: Some(ArtifactStatus::Pending),
                ..ArtifactQuery::default()
            })
            .await?;

        let (articles, posts): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|artifact| artifact.kind == ArtifactKind::Article);
        Ok(PendingContent { articles, posts })
    }

    pub async fn get_artifact(&self, id: ArtifactId) -> Result<GeneratedArtifact> {
        self.content
            .get_artifact(id)
            .await?
            .filter(|artifact| artifact.status.is_reviewable())
            .ok_or(PipelineError::NotFound { entity: "artifact", id })
    }

    /// Set the reviewer's decision. Repeating or reversing a decision is
    /// allowed; the last call wins.
    pub async fn transition(
        &self,
        id: ArtifactId,
        state: ApprovalState,
        feedback: Option<&str>,
    ) -> Result<GeneratedArtifact> {
        let current = self.get_artifact(id).await?;
        let target = ArtifactStatus::from(state);
        if !current.status.can_transition_to(state) {
            return Err(PipelineError::NotFound { entity: "artifact", id });
        }

        let updated = self
            .content
            .update_status(id, target, feedback)
            .await?
            .ok_or(PipelineError::NotFound { entity: "artifact", id })?;
        info!("Artifact {} moved from {} to {}", id, current.status, updated.status);
        Ok(updated)
    }

    pub async fn approve(&self, id: ArtifactId, feedback: Option<&str>) -> Result<GeneratedArtifact> {
        self.transition(id, ApprovalState::Approved, feedback).await
    }

    pub async fn reject(&self, id: ArtifactId, feedback: Option<&str>) -> Result<GeneratedArtifact> {
        self.transition(id, ApprovalState::Rejected, feedback).await
    }

    /// Store a reviewer's rewrite next to the generated body.
    pub async fn edit(&self, id: ArtifactId, body: &str, feedback: Option<&str>) -> Result<GeneratedArtifact> {
        self.get_artifact(id).await?;
        let updated = self
            .content
            .update_edited_body(id, body, feedback)
            .await?
            .ok_or(PipelineError::NotFound { entity: "artifact", id })?;
        info!("Artifact {} edited by reviewer", id);
        Ok(updated)
    }

    /// Audit view of everything a guardrail stopped.
    pub async fn list_blocked(&self) -> Result<Vec<GeneratedArtifact>> {
        self.content
            .list_artifacts(&ArtifactQuery {
                status: Some(ArtifactStatus::Blocked),
                ..ArtifactQuery::default()
            })
            .await
    }

    pub async fn stats(&self) -> Result<PipelineStats> {
        Ok(PipelineStats {
            articles: self.articles.article_stats().await?,
            artifacts: self.content.artifact_stats().await?,
            guardrails: self.content.guardrail_activity().await?,
        })
    }
}
