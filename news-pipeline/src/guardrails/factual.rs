use super::{block_or_pass, Detection, GuardrailInput, ModelReview};
use crate::config::GuardrailSettings;
use crate::types::{Article, PipelineError, Result};
use crate::utils::is_stop_word;
use crate::utils::text::{excerpt, sentences};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};

const MIN_WORD_OVERLAP: f64 = 0.4;

/// Cross-references numeric and quoted claims against the source articles.
pub struct FactualCheck {
    pub settings: GuardrailSettings,
    number_pattern: Regex,
    review: Option<ModelReview>,
}

fn content_words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|word| word.chars().count() > 3 && !is_stop_word(word))
        .collect()
}

impl FactualCheck {
    pub fn new(settings: GuardrailSettings, review: Option<ModelReview>) -> Result<Self> {
        let number_pattern = Regex::new(r"\d+(?:[.,]\d+)*")
            .map_err(|e| PipelineError::Config(format!("number pattern: {}", e)))?;
        Ok(Self {
            settings,
            number_pattern,
            review,
        })
    }

    /// Sentences that carry a number or a quotation.
    pub fn claims<'t>(&self, content: &'t str) -> Vec<&'t str> {
        sentences(content)
            .into_iter()
            .filter(|sentence| {
                self.number_pattern.is_match(sentence) || sentence.contains('"') || sentence.contains('\u{201c}')
            })
            .collect()
    }

    fn is_supported(&self, claim: &str, source_text: &str, source_words: &BTreeSet<String>) -> bool {
        let numbers_found = self
            .number_pattern
            .find_iter(claim)
            .all(|number| source_text.contains(number.as_str()));
        if !numbers_found {
            return false;
        }

        let words = content_words(claim);
        if words.is_empty() {
            return true;
        }
        let overlap = words.iter().filter(|word| source_words.contains(*word)).count();
        overlap as f64 / words.len() as f64 >= MIN_WORD_OVERLAP
    }

    pub async fn inspect(&self, input: &GuardrailInput<'_>) -> Detection {
        let source_text = input
            .sources
            .iter()
            .map(|article| format!("{}\n{}", article.title, article.content))
            .collect::<Vec<_>>()
            .join("\n");
        let source_words: BTreeSet<String> = content_words(&source_text).into_iter().collect();

        let claims = self.claims(input.content);
        let unsupported: Vec<&str> = claims
            .iter()
            .copied()
            .filter(|claim| !self.is_supported(claim, &source_text, &source_words))
            .collect();

        let mut score = if claims.is_empty() {
            0.0
        } else {
            unsupported.len() as f64 / claims.len() as f64
        };
        let mut details = format!("{} of {} claims unsupported by sources", unsupported.len(), claims.len());

        if let Some(review) = &self.review {
            let mut vars = BTreeMap::new();
            vars.insert("content", input.content.to_string());
            vars.insert("sources", render_sources(input.sources));
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

fn render_sources(sources: &[Article]) -> String {
    sources
        .iter()
        .enumerate()
        .map(|(i, article)| format!("Source {}: {}\n{}", i + 1, article.title, excerpt(&article.content, 1_500)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn source(content: &str) -> Article {
        Article {
            id: 1,
            title: "Chip sales climb".to_string(),
            content: content.to_string(),
            url: "https://example.com/chips".to_string(),
            source: "Example".to_string(),
            category: "technology".to_string(),
            published_at: None,
            ingested_at: Utc::now(),
            keywords: Vec::new(),
            summary: None,
        }
    }

    #[tokio::test]
    async fn scores_share_of_unsupported_claims() -> Result<()> {
        let check = FactualCheck::new(GuardrailSettings::default(), None)?;
        let sources = [source("Quarterly chip sales climbed 12 percent to 4.5 billion dollars.")];
        let content = "Chip sales climbed 12 percent this quarter. \
                       Revenue reached 9 billion dollars. \
                       Analysts remain upbeat.";

        let detection = check
            .inspect(&GuardrailInput {
                content,
                sources: &sources,
                trusted_domains: &BTreeSet::new(),
            })
            .await;

        assert_eq!(check.claims(content).len(), 2);
        assert!((detection.score - 0.5).abs() < 1e-9);
        assert!(detection.details.starts_with("1 of 2 claims"));
        Ok(())
    }
}
