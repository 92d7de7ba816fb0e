use super::{
    BiasCheck, ContentSafety, FactualCheck, Guardrail, GuardrailAction, GuardrailInput, GuardrailKind, ModelReview,
    SourceVerification,
};
use crate::config::{GuardrailConfig, GuardrailSettings};
use crate::llm_adapter::LlmAdapter;
use crate::prompt::PromptRenderer;
use crate::traits::ContentStore;
use crate::types::{Article, GuardrailCounters, GuardrailVerdict, PipelineError, Result, VerdictKind};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Result of running one piece of content through the chain.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainOutcome {
    Cleared {
        content: String,
        verdicts: Vec<GuardrailVerdict>,
    },
    /// Verdicts stop at, and include, the blocking guardrail.
    Blocked {
        guardrail: String,
        reason: String,
        verdicts: Vec<GuardrailVerdict>,
    },
}

impl ChainOutcome {
    pub fn verdicts(&self) -> &[GuardrailVerdict] {
        match self {
            ChainOutcome::Cleared { verdicts, .. } | ChainOutcome::Blocked { verdicts, .. } => verdicts,
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, ChainOutcome::Blocked { .. })
    }
}

/// Running counts per guardrail since the chain was built. The durable
/// record is the store's guardrail audit log.
#[derive(Debug, Default)]
pub struct GuardrailMetrics {
    counters: RwLock<BTreeMap<String, GuardrailCounters>>,
}

impl GuardrailMetrics {
    async fn record(&self, verdict: &GuardrailVerdict) {
        let mut counters = self.counters.write().await;
        counters
            .entry(verdict.guardrail.clone())
            .or_default()
            .add(verdict.verdict, verdict.modified, 1);
    }

    pub async fn snapshot(&self) -> BTreeMap<String, GuardrailCounters> {
        self.counters.read().await.clone()
    }
}

fn classify(settings: &GuardrailSettings, score: f64, action: &GuardrailAction) -> VerdictKind {
    match action {
        GuardrailAction::Block => VerdictKind::Fail,
        _ if score > 0.0 && score + 1e-9 >= settings.threshold => VerdictKind::Flag,
        _ => VerdictKind::Pass,
    }
}

/// Ordered guardrails applied as a sequential reducer over the content.
pub struct GuardrailChain {
    guardrails: Vec<Guardrail>,
    trusted_domains: BTreeSet<String>,
    metrics: GuardrailMetrics,
    audit_log: Option<Arc<dyn ContentStore>>,
}

impl GuardrailChain {
    pub fn new(guardrails: Vec<Guardrail>, trusted_domains: BTreeSet<String>) -> Self {
        Self {
            guardrails,
            trusted_domains,
            metrics: GuardrailMetrics::default(),
            audit_log: None,
        }
    }

    /// Persist every verdict of every run to `store`.
    pub fn with_audit_log(mut self, store: Arc<dyn ContentStore>) -> Self {
        self.audit_log = Some(store);
        self
    }

    /// Build the configured chain. Model-assisted checks only get a model
    /// when one is supplied and their `use_model` setting is on.
    pub fn from_config(
        config: &GuardrailConfig,
        renderer: Arc<PromptRenderer>,
        model: Option<Arc<dyn LlmAdapter>>,
    ) -> Result<Self> {
        let review = |settings: &GuardrailSettings, template: &'static str| {
            model
                .as_ref()
                .filter(|_| settings.use_model)
                .map(|adapter| ModelReview {
                    adapter: adapter.clone(),
                    renderer: renderer.clone(),
                    template,
                })
        };

        let mut guardrails = Vec::with_capacity(config.order.len());
        for name in &config.order {
            let kind = GuardrailKind::from_name(name)
                .ok_or_else(|| PipelineError::Config(format!("unknown guardrail '{}'", name)))?;
            let guardrail = match kind {
                GuardrailKind::SourceVerification => {
                    Guardrail::SourceVerification(SourceVerification::new(config.source_verification)?)
                }
                GuardrailKind::ContentSafety => Guardrail::ContentSafety(ContentSafety::new(
                    config.content_safety,
                    &config.safety_categories,
                )?),
                GuardrailKind::Bias => {
                    Guardrail::Bias(BiasCheck::new(config.bias, review(&config.bias, "bias_review"))?)
                }
                GuardrailKind::FactualAccuracy => Guardrail::FactualAccuracy(FactualCheck::new(
                    config.factual_accuracy,
                    review(&config.factual_accuracy, "factual_review"),
                )?),
            };
            guardrails.push(guardrail);
        }

        info!(
            "Guardrail chain: {}",
            guardrails.iter().map(Guardrail::name).collect::<Vec<_>>().join(" -> ")
        );
        Ok(Self::new(guardrails, config.trusted_domains.iter().cloned().collect()))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.guardrails.iter().map(Guardrail::name).collect()
    }

    pub fn metrics(&self) -> &GuardrailMetrics {
        &self.metrics
    }

    /// Run every guardrail in order. `known_domains` are the hosts already
    /// present in the Article Store; they extend the configured allowlist.
    pub async fn run(&self, content: String, sources: &[Article], known_domains: &BTreeSet<String>) -> ChainOutcome {
        let outcome = self.evaluate(content, sources, known_domains).await;
        if let Some(log) = &self.audit_log {
            // Audit failures never fail generation
            if let Err(e) = log.record_guardrail_events(outcome.verdicts()).await {
                warn!("Could not record guardrail events: {}", e);
            }
        }
        outcome
    }

    async fn evaluate(&self, content: String, sources: &[Article], known_domains: &BTreeSet<String>) -> ChainOutcome {
        let trusted: BTreeSet<String> = self.trusted_domains.union(known_domains).cloned().collect();
        let mut content = content;
        let mut verdicts = Vec::with_capacity(self.guardrails.len());

        for guardrail in &self.guardrails {
            let detection = guardrail
                .inspect(&GuardrailInput {
                    content: &content,
                    sources,
                    trusted_domains: &trusted,
                })
                .await;

            let verdict = GuardrailVerdict {
                guardrail: guardrail.name().to_string(),
                verdict: classify(guardrail.settings(), detection.score, &detection.action),
                score: detection.score,
                reason: detection.details.clone(),
                modified: matches!(detection.action, GuardrailAction::Modify(_)),
            };
            self.metrics.record(&verdict).await;
            debug!(
                "Guardrail {} scored {:.2} ({:?})",
                verdict.guardrail, verdict.score, verdict.verdict
            );
            verdicts.push(verdict);

            match detection.action {
                GuardrailAction::Pass => {}
                GuardrailAction::Modify(rewritten) => content = rewritten,
                GuardrailAction::Block => {
                    warn!("Guardrail {} blocked content: {}", guardrail.name(), detection.details);
                    return ChainOutcome::Blocked {
                        guardrail: guardrail.name().to_string(),
                        reason: detection.details,
                        verdicts,
                    };
                }
            }
        }

        ChainOutcome::Cleared { content, verdicts }
    }
}
