use super::{Detection, GuardrailAction, GuardrailInput};
use crate::config::GuardrailSettings;
use crate::types::{PipelineError, Result};
use regex::Regex;

const MATCH_WEIGHT: f64 = 0.2;

fn pattern_for(category: &str) -> Option<&'static str> {
    let pattern = match category {
        "hate" => r"(?i)\b(hate speech|racial slurs?|inferior races?|ethnic cleansing|subhuman)\b",
        "harassment" => r"(?i)\b(harass\w*|bully\w*|doxx\w*|stalk\w*|intimidat\w*)\b",
        "self-harm" => r"(?i)\b(self[- ]harm\w*|suicid\w*|kill (yourself|myself|themselves))\b",
        "sexual" => r"(?i)\b(sexually explicit|explicit sex\w*|pornograph\w*|nsfw)\b",
        "violence" => r"(?i)\b(kill\w*|murder\w*|attack\w*|bomb\w*|shoot\w*|massacre\w*|assault\w*|stab\w*)\b",
        "misleading" => r"(?i)\b(miracle cure|guaranteed returns|hoax|fake news|doctors hate|they don'?t want you to know)\b",
        _ => return None,
    };
    Some(pattern)
}

/// Pattern-based screening for harmful material, scored per category.
pub struct ContentSafety {
    pub settings: GuardrailSettings,
    categories: Vec<(String, Regex)>,
}

impl ContentSafety {
    pub fn new(settings: GuardrailSettings, categories: &[String]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(categories.len());
        for category in categories {
            let pattern = pattern_for(category)
                .ok_or_else(|| PipelineError::Config(format!("unknown safety category '{}'", category)))?;
            let regex = Regex::new(pattern)
                .map_err(|e| PipelineError::Config(format!("safety pattern for {}: {}", category, e)))?;
            compiled.push((category.clone(), regex));
        }
        Ok(Self {
            settings,
            categories: compiled,
        })
    }

    /// Score of every configured category, in configuration order.
    pub fn category_scores(&self, content: &str) -> Vec<(&str, f64)> {
        self.categories
            .iter()
            .map(|(name, regex)| {
                let hits = regex.find_iter(content).count() as f64;
                (name.as_str(), (hits * MATCH_WEIGHT).min(1.0))
            })
            .collect()
    }

    pub fn inspect(&self, input: &GuardrailInput<'_>) -> Detection {
        let scores = self.category_scores(input.content);
        let score = scores.iter().map(|(_, s)| *s).fold(0.0, f64::max);
        // Guard against float drift: 4 hits must reach a 0.8 threshold
        let reaches = |value: f64, limit: f64| value + 1e-9 >= limit;

        let flagged: Vec<&str> = scores
            .iter()
            .filter(|(_, s)| *s > 0.0 && reaches(*s, self.settings.threshold))
            .map(|(name, _)| *name)
            .collect();
        let severe = self
            .settings
            .block_threshold
            .and_then(|limit| scores.iter().find(|(_, s)| reaches(*s, limit)).map(|(name, _)| *name));

        if let Some(category) = severe {
            return Detection {
                score,
                details: format!("severe {} content", category),
                action: GuardrailAction::Block,
            };
        }
        if flagged.len() >= 2 {
            return Detection {
                score,
                details: format!("multiple unsafe categories: {}", flagged.join(", ")),
                action: GuardrailAction::Block,
            };
        }
        if let Some(category) = flagged.first() {
            let warned = format!(
                "[CONTENT WARNING: This content may contain {}. Proceed with caution.]\n\n{}",
                category, input.content
            );
            return Detection {
                score,
                details: format!("{} content flagged", category),
                action: GuardrailAction::Modify(warned),
            };
        }

        Detection {
            score,
            details: "no unsafe categories above threshold".to_string(),
            action: GuardrailAction::Pass,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GuardrailConfig;
    use std::collections::BTreeSet;

    fn check() -> ContentSafety {
        let config = GuardrailConfig::default();
        ContentSafety::new(config.content_safety, &config.safety_categories).unwrap()
    }

    fn inspect(content: &str) -> Detection {
        check().inspect(&GuardrailInput {
            content,
            sources: &[],
            trusted_domains: &BTreeSet::new(),
        })
    }

    #[test]
    fn clean_copy_passes() {
        let detection = inspect("Chipmakers announced a faster accelerator for training models.");
        assert_eq!(detection.action, GuardrailAction::Pass);
        assert_eq!(detection.score, 0.0);
    }

    #[test]
    fn single_flagged_category_gets_a_warning() {
        let detection = inspect("Attackers kept attacking; the attack followed an earlier attack.");
        assert!((detection.score - 0.8).abs() < 1e-9);
        match detection.action {
            GuardrailAction::Modify(text) => {
                assert!(text.starts_with("[CONTENT WARNING: This content may contain violence."))
            }
            other => panic!("expected warning, got {:?}", other),
        }
    }

    #[test]
    fn severe_category_blocks() {
        let detection = inspect("They vowed to kill, murder, bomb, shoot and attack everyone.");
        assert_eq!(detection.action, GuardrailAction::Block);
        assert_eq!(detection.score, 1.0);
    }

    #[test]
    fn unknown_category_is_a_config_error() {
        assert!(ContentSafety::new(GuardrailSettings::default(), &["gossip".to_string()]).is_err());
    }
}
