use super::{block_or_pass, Detection, GuardrailInput, ModelReview};
use crate::config::GuardrailSettings;
use crate::types::{PipelineError, Result};
use regex::Regex;
use std::collections::BTreeMap;

const HIT_WEIGHT: f64 = 0.15;

const POLITICAL: &[&str] = &[
    "radical left",
    "far-right",
    "far-left",
    "leftist agenda",
    "right-wing extremists",
    "libtards",
    "woke mob",
];

const DEMOGRAPHIC: &[&str] = &[
    "those people",
    "illegals",
    "all women are",
    "all men are",
    "millennials are lazy",
    "boomers are",
];

const FRAMING: &[&str] = &[
    "obviously",
    "everyone knows",
    "undeniably",
    "so-called",
    "disastrous",
    "shocking",
    "outrageous",
    "without a doubt",
];

/// Flags loaded political, demographic or framing language.
pub struct BiasCheck {
    pub settings: GuardrailSettings,
    lexicon: Regex,
    review: Option<ModelReview>,
}

impl BiasCheck {
    pub fn new(settings: GuardrailSettings, review: Option<ModelReview>) -> Result<Self> {
        let alternatives = POLITICAL
            .iter()
            .chain(DEMOGRAPHIC)
            .chain(FRAMING)
            .map(|term| regex::escape(term))
            .collect::<Vec<_>>()
            .join("|");
        let lexicon = Regex::new(&format!(r"(?i)\b({})\b", alternatives))
            .map_err(|e| PipelineError::Config(format!("bias lexicon: {}", e)))?;
        Ok(Self {
            settings,
            lexicon,
            review,
        })
    }

    pub fn lexicon_hits<'t>(&self, content: &'t str) -> Vec<&'t str> {
        self.lexicon.find_iter(content).map(|m| m.as_str()).collect()
    }

    pub async fn inspect(&self, input: &GuardrailInput<'_>) -> Detection {
        let hits = self.lexicon_hits(input.content);
        let heuristic = (hits.len() as f64 * HIT_WEIGHT).min(1.0);

        let mut score = heuristic;
        let mut details = if hits.is_empty() {
            "no loaded language".to_string()
        } else {
            format!("loaded language: {}", hits.join(", "))
        };

        if let Some(review) = &self.review {
            let mut vars = BTreeMap::new();
            vars.insert("content", input.content.to_string());
            if let Some(rated) = review.score(&vars).await {
                score = score.max(rated);
                details = format!("{}; model rating {:.2}", details, rated);
            }
        }

        Detection {
            score,
            details,
            action: block_or_pass(&self.settings, score),
        }
    }
}
