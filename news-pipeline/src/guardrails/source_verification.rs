use super::{Detection, GuardrailAction, GuardrailInput};
use crate::config::GuardrailSettings;
use crate::types::{PipelineError, Result};
use crate::utils::url::{domain_matches, extract_domain};
use regex::{Captures, Regex};

pub const REDACTION: &str = "[unverified source removed]";

const TRAILING: [char; 4] = ['.', ',', ';', ':'];

/// Redacts links whose host is not on the trusted list.
pub struct SourceVerification {
    pub settings: GuardrailSettings,
    link_pattern: Regex,
}

impl SourceVerification {
    pub fn new(settings: GuardrailSettings) -> Result<Self> {
        let link_pattern = Regex::new(r#"https?://[^\s<>"'()\[\]]+"#)
            .map_err(|e| PipelineError::Config(format!("link pattern: {}", e)))?;
        Ok(Self { settings, link_pattern })
    }

    fn is_trusted(&self, link: &str, input: &GuardrailInput<'_>) -> bool {
        let Some(domain) = extract_domain(link) else {
            return false;
        };
        input.trusted_domains.iter().any(|trusted| domain_matches(&domain, trusted))
            || input
                .sources
                .iter()
                .filter_map(|article| extract_domain(&article.url))
                .any(|trusted| domain_matches(&domain, &trusted))
    }

    pub fn inspect(&self, input: &GuardrailInput<'_>) -> Detection {
        let links: Vec<&str> = self
            .link_pattern
            .find_iter(input.content)
            .map(|m| m.as_str().trim_end_matches(TRAILING))
            .collect();
        if links.is_empty() {
            return Detection {
                score: 0.0,
                details: "no links to verify".to_string(),
                action: GuardrailAction::Pass,
            };
        }

        let untrusted: Vec<&str> = links
            .iter()
            .copied()
            .filter(|link| !self.is_trusted(link, input))
            .collect();
        let score = untrusted.len() as f64 / links.len() as f64;

        if untrusted.is_empty() {
            return Detection {
                score,
                details: format!("all {} links point at trusted domains", links.len()),
                action: GuardrailAction::Pass,
            };
        }

        let details = format!("{} of {} links are unverified: {}", untrusted.len(), links.len(), untrusted.join(", "));
        if let Some(limit) = self.settings.block_threshold {
            if score >= limit {
                return Detection {
                    score,
                    details,
                    action: GuardrailAction::Block,
                };
            }
        }

        let redacted = self.link_pattern.replace_all(input.content, |caps: &Captures<'_>| {
            let matched = &caps[0];
            let link = matched.trim_end_matches(TRAILING);
            if self.is_trusted(link, input) {
                matched.to_string()
            } else {
                format!("{}{}", REDACTION, &matched[link.len()..])
            }
        });
        Detection {
            score,
            details,
            action: GuardrailAction::Modify(redacted.into_owned()),
        }
    }
}
