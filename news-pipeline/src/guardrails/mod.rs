//! Content checks applied to generated text before it reaches review.
//!
//! Each check is a variant of [`Guardrail`]; [`GuardrailChain`] runs them in
//! the configured order as a reducer over `(content, verdicts)`.

pub mod bias;
pub mod chain;
pub mod content_safety;
pub mod factual;
pub mod source_verification;

pub use bias::BiasCheck;
pub use chain::{ChainOutcome, GuardrailChain, GuardrailMetrics};
pub use content_safety::ContentSafety;
pub use factual::FactualCheck;
pub use source_verification::SourceVerification;

use crate::config::GuardrailSettings;
use crate::llm_adapter::LlmAdapter;
use crate::prompt::PromptRenderer;
use crate::types::Article;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GuardrailKind {
    SourceVerification,
    ContentSafety,
    Bias,
    FactualAccuracy,
}

impl GuardrailKind {
    /// Default execution order.
    pub const ALL: [GuardrailKind; 4] = [
        GuardrailKind::SourceVerification,
        GuardrailKind::ContentSafety,
        GuardrailKind::Bias,
        GuardrailKind::FactualAccuracy,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            GuardrailKind::SourceVerification => "source_verification",
            GuardrailKind::ContentSafety => "content_safety",
            GuardrailKind::Bias => "bias",
            GuardrailKind::FactualAccuracy => "factual_accuracy",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

/// What a guardrail wants done with the content.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardrailAction {
    Pass,
    Modify(String),
    Block,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub score: f64,
    pub details: String,
    pub action: GuardrailAction,
}

/// Everything a guardrail may look at for one artifact.
#[derive(Debug, Clone, Copy)]
pub struct GuardrailInput<'a> {
    pub content: &'a str,
    pub sources: &'a [Article],
    pub trusted_domains: &'a BTreeSet<String>,
}

/// Closed set of checks the chain can run.
pub enum Guardrail {
    SourceVerification(SourceVerification),
    ContentSafety(ContentSafety),
    Bias(BiasCheck),
    FactualAccuracy(FactualCheck),
}

impl Guardrail {
    pub fn kind(&self) -> GuardrailKind {
        match self {
            Guardrail::SourceVerification(_) => GuardrailKind::SourceVerification,
            Guardrail::ContentSafety(_) => GuardrailKind::ContentSafety,
            Guardrail::Bias(_) => GuardrailKind::Bias,
            Guardrail::FactualAccuracy(_) => GuardrailKind::FactualAccuracy,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    pub fn settings(&self) -> &GuardrailSettings {
        match self {
            Guardrail::SourceVerification(check) => &check.settings,
            Guardrail::ContentSafety(check) => &check.settings,
            Guardrail::Bias(check) => &check.settings,
            Guardrail::FactualAccuracy(check) => &check.settings,
        }
    }

    pub async fn inspect(&self, input: &GuardrailInput<'_>) -> Detection {
        match self {
            Guardrail::SourceVerification(check) => check.inspect(input),
            Guardrail::ContentSafety(check) => check.inspect(input),
            Guardrail::Bias(check) => check.inspect(input).await,
            Guardrail::FactualAccuracy(check) => check.inspect(input).await,
        }
    }
}

/// Block only when a block threshold is configured and reached.
pub(crate) fn block_or_pass(settings: &GuardrailSettings, score: f64) -> GuardrailAction {
    match settings.block_threshold {
        Some(limit) if score >= limit => GuardrailAction::Block,
        _ => GuardrailAction::Pass,
    }
}

fn score_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)(\d+(?:\.\d+)?|\.\d+)(?:\s*(?:/|out of)\s*(\d+(?:\.\d+)?))?").ok())
        .as_ref()
}

/// First number in a model reply, read as a fraction when written `N/M`
/// or `N out of M`. Anything outside `[0, 1]` is not a score.
pub(crate) fn parse_score(reply: &str) -> Option<f64> {
    let captures = score_pattern()?.captures(reply)?;
    let value: f64 = captures[1].parse().ok()?;
    let score = match captures.get(2) {
        Some(scale) => {
            let scale: f64 = scale.as_str().parse().ok()?;
            if scale <= 0.0 {
                return None;
            }
            value / scale
        }
        None => value,
    };
    (0.0..=1.0).contains(&score).then_some(score)
}

/// Second opinion from the model service, rated on a 0..1 scale.
pub struct ModelReview {
    pub adapter: Arc<dyn LlmAdapter>,
    pub renderer: Arc<PromptRenderer>,
    pub template: &'static str,
}

impl ModelReview {
    /// `None` when the call fails or the reply carries no number; the caller
    /// then keeps its heuristic score.
    pub async fn score(&self, vars: &BTreeMap<&str, String>) -> Option<f64> {
        let request = match self.renderer.render(self.template, vars) {
            Ok(request) => request,
            Err(e) => {
                warn!("Could not render {} prompt: {}", self.template, e);
                return None;
            }
        };

        match self.adapter.complete(&request).await {
            Ok(completion) => {
                let parsed = parse_score(&completion.text);
                if parsed.is_none() {
                    warn!("{} reply had no score: {:?}", self.template, completion.text);
                }
                parsed
            }
            Err(e) => {
                warn!("{} model call failed, using heuristic score: {}", self.template, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for kind in GuardrailKind::ALL {
            assert_eq!(GuardrailKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(GuardrailKind::from_name("tone"), None);
    }

    #[test]
    fn parses_first_number_in_reply() {
        assert_eq!(parse_score("0.35"), Some(0.35));
        assert_eq!(parse_score("Score: .7 (mostly neutral)."), Some(0.7));
        assert_eq!(parse_score("neutral"), None);
    }

    #[test]
    fn reads_ratings_on_other_scales_as_fractions() {
        assert_eq!(parse_score("7/10"), Some(0.7));
        assert_eq!(parse_score("I'd say 4 out of 10"), Some(0.4));
        assert_eq!(parse_score("3 / 4, fairly loaded"), Some(0.75));
    }

    #[test]
    fn drops_numbers_outside_the_unit_range() {
        assert_eq!(parse_score("8"), None);
        assert_eq!(parse_score("12/10"), None);
        assert_eq!(parse_score("1/0"), None);
        assert_eq!(parse_score("1"), Some(1.0));
    }
}
