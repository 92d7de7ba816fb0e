use crate::guardrails::GuardrailKind;
use crate::retry::RetryPolicy;
use crate::types::{PipelineError, Result, RetrievalMethod};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use tracing::{debug, info};

/// Immutable configuration for one pipeline process. Load it once and hand
/// an `Arc` of it to every component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub database_url: String,
    pub fetch: FetchConfig,
    pub retry: RetryPolicy,
    pub aggregation: AggregationConfig,
    pub sources: Vec<SourceConfig>,
    pub keywords: BTreeMap<String, Vec<String>>,
    pub news_api: NewsApiConfig,
    pub model: ModelConfig,
    pub generation: GenerationConfig,
    pub prompts: BTreeMap<String, PromptTemplate>,
    pub guardrails: GuardrailConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    /// Minimum spacing between two requests to the same host.
    pub request_delay_ms: u64,
    pub max_response_size_mb: usize,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "News-Pipeline/1.0".to_string(),
            timeout_seconds: 30,
            request_delay_ms: 2_000,
            max_response_size_mb: 10,
            max_redirects: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub max_concurrent_sources: usize,
    pub max_articles_per_source: usize,
    pub min_body_chars: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sources: 4,
            max_articles_per_source: 10,
            min_body_chars: 100,
        }
    }
}

/// CSS selectors used to pull an article out of a page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionRules {
    pub title: Option<String>,
    pub content: Option<String>,
    pub date: Option<String>,
    /// Selects article links on the source's homepage.
    pub article_link: Option<String>,
}

impl ExtractionRules {
    fn selectors(&self) -> impl Iterator<Item = &String> {
        [&self.title, &self.content, &self.date, &self.article_link]
            .into_iter()
            .flatten()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub category: String,
    /// Homepage, used for direct scraping and as the API domain filter.
    pub url: String,
    #[serde(default)]
    pub feed_url: Option<String>,
    #[serde(default = "default_methods")]
    pub methods: Vec<RetrievalMethod>,
    #[serde(default)]
    pub selectors: ExtractionRules,
}

fn default_methods() -> Vec<RetrievalMethod> {
    RetrievalMethod::PRIORITY.to_vec()
}

impl SourceConfig {
    pub fn allows(&self, method: RetrievalMethod) -> bool {
        self.methods.contains(&method)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NewsApiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub page_size: usize,
}

impl Default for NewsApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://newsapi.org/v2/".to_string(),
            api_key: None,
            page_size: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// `openai` for any OpenAI-compatible chat endpoint, `mock` for dry runs.
    pub provider: String,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            timeout_seconds: 60,
            temperature: 0.7,
            max_tokens: 2_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformProfile {
    pub max_chars: usize,
    pub style: String,
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub window_days: i64,
    pub min_cluster_size: usize,
    pub max_articles_per_cluster: usize,
    pub article_excerpt_chars: usize,
    pub post_excerpt_chars: usize,
    pub target_article_words: usize,
    pub max_concurrent_topics: usize,
    pub reliable_sources: Vec<String>,
    pub platforms: BTreeMap<String, PlatformProfile>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        let mut platforms = BTreeMap::new();
        platforms.insert(
            "twitter".to_string(),
            PlatformProfile {
                max_chars: 280,
                style: "concise, engaging, with 2-3 relevant hashtags".to_string(),
                format: "a single tweet".to_string(),
            },
        );
        platforms.insert(
            "linkedin".to_string(),
            PlatformProfile {
                max_chars: 1_300,
                style: "professional, insightful, thought-provoking".to_string(),
                format: "a LinkedIn post focused on industry implications".to_string(),
            },
        );

        Self {
            window_days: 1,
            min_cluster_size: 2,
            max_articles_per_cluster: 5,
            article_excerpt_chars: 3_000,
            post_excerpt_chars: 1_000,
            target_article_words: 750,
            max_concurrent_topics: 2,
            reliable_sources: vec![
                "TechCrunch".to_string(),
                "Harvard Business Review".to_string(),
                "MIT Sloan Management Review".to_string(),
                "McKinsey Insights".to_string(),
            ],
            platforms,
        }
    }
}

/// A named prompt with `{{variable}}` placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub system: String,
    pub user: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailSettings {
    pub threshold: f64,
    pub block_threshold: Option<f64>,
    /// Ask the model service for a second opinion where supported.
    pub use_model: bool,
}

impl Default for GuardrailSettings {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            block_threshold: None,
            use_model: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailConfig {
    pub order: Vec<String>,
    pub trusted_domains: Vec<String>,
    pub safety_categories: Vec<String>,
    pub source_verification: GuardrailSettings,
    pub content_safety: GuardrailSettings,
    pub bias: GuardrailSettings,
    pub factual_accuracy: GuardrailSettings,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            order: GuardrailKind::ALL.iter().map(|kind| kind.name().to_string()).collect(),
            trusted_domains: Vec::new(),
            safety_categories: ["hate", "harassment", "self-harm", "sexual", "violence", "misleading"]
                .iter()
                .map(|category| category.to_string())
                .collect(),
            source_verification: GuardrailSettings {
                threshold: 0.0,
                ..GuardrailSettings::default()
            },
            content_safety: GuardrailSettings {
                threshold: 0.8,
                block_threshold: Some(0.9),
                use_model: false,
            },
            bias: GuardrailSettings {
                threshold: 0.6,
                ..GuardrailSettings::default()
            },
            factual_accuracy: GuardrailSettings::default(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://news_pipeline.db".to_string(),
            fetch: FetchConfig::default(),
            retry: RetryPolicy::default(),
            aggregation: AggregationConfig::default(),
            sources: default_sources(),
            keywords: default_keywords(),
            news_api: NewsApiConfig::default(),
            model: ModelConfig::default(),
            generation: GenerationConfig::default(),
            prompts: default_prompts(),
            guardrails: GuardrailConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Read a TOML file, apply environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        info!("Loaded configuration from {} ({} sources)", path.display(), config.sources.len());
        Ok(config)
    }

    /// Parse without touching the environment. Missing sections fall back
    /// to the built-in defaults.
    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var("DATABASE_URL") {
            debug!("Using DATABASE_URL from environment");
            self.database_url = url;
        }
        if let Ok(key) = env::var("OPENAI_API_KEY") {
            if !key.is_empty() {
                self.model.api_key = Some(key);
            }
        }
        if let Ok(key) = env::var("NEWSAPI_ORG_KEY") {
            if !key.is_empty() {
                self.news_api.api_key = Some(key);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        for name in &self.guardrails.order {
            if GuardrailKind::from_name(name).is_none() {
                return Err(PipelineError::Config(format!("unknown guardrail '{}'", name)));
            }
        }

        for source in &self.sources {
            if source.methods.is_empty() {
                return Err(PipelineError::Config(format!("source '{}' has no retrieval methods", source.name)));
            }
            for selector in source.selectors.selectors() {
                scraper::Selector::parse(selector).map_err(|e| {
                    PipelineError::Config(format!("source '{}' has invalid selector '{}': {}", source.name, selector, e))
                })?;
            }
        }

        for (name, platform) in &self.generation.platforms {
            if platform.max_chars == 0 {
                return Err(PipelineError::Config(format!("platform '{}' needs a max_chars limit", name)));
            }
        }

        let mut required = vec!["article", "post"];
        if self.guardrails.bias.use_model {
            required.push("bias_review");
        }
        if self.guardrails.factual_accuracy.use_model {
            required.push("factual_review");
        }
        for name in required {
            if !self.prompts.contains_key(name) {
                return Err(PipelineError::Config(format!("missing prompt template '{}'", name)));
            }
        }

        Ok(())
    }

    pub fn categories(&self) -> Vec<String> {
        let mut categories: Vec<String> = self.sources.iter().map(|source| source.category.clone()).collect();
        categories.sort();
        categories.dedup();
        categories
    }

    pub fn sources_for(&self, category: &str) -> Vec<&SourceConfig> {
        self.sources.iter().filter(|source| source.category == category).collect()
    }

    pub fn vocabulary(&self, category: &str) -> &[String] {
        self.keywords.get(category).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn source(name: &str, category: &str, url: &str, feed_url: &str, selectors: [&str; 3]) -> SourceConfig {
    SourceConfig {
        name: name.to_string(),
        category: category.to_string(),
        url: url.to_string(),
        feed_url: Some(feed_url.to_string()),
        methods: default_methods(),
        selectors: ExtractionRules {
            title: Some(selectors[0].to_string()),
            content: Some(selectors[1].to_string()),
            date: Some(selectors[2].to_string()),
            article_link: None,
        },
    }
}

fn default_sources() -> Vec<SourceConfig> {
    vec![
        source(
            "TechCrunch",
            "technology",
            "https://techcrunch.com/",
            "https://techcrunch.com/feed/",
            ["h1.article__title", "div.article-content", "time.article__date"],
        ),
        source(
            "Ars Technica",
            "technology",
            "https://arstechnica.com/",
            "https://feeds.arstechnica.com/arstechnica/index",
            ["h1.heading", "div.article-content", "time.date"],
        ),
        source(
            "The Verge",
            "technology",
            "https://www.theverge.com/",
            "https://www.theverge.com/rss/index.xml",
            [
                "h1.duet--article--dangerously-set-cms-markup",
                "div.duet--article--article-body-component",
                "time.c-byline__item",
            ],
        ),
        source(
            "Wired",
            "technology",
            "https://www.wired.com/",
            "https://www.wired.com/feed/rss",
            ["h1.ContentHeaderHed-NCyCC", "div.ArticleBodyWrapper", "time.BaseWrap-sc-gjQpdd"],
        ),
        source(
            "Harvard Business Review",
            "leadership",
            "https://hbr.org/",
            "https://feeds.hbr.org/harvardbusiness",
            ["h1.article-hed", "div.article-body", "time.article-date"],
        ),
        source(
            "MIT Sloan Management Review",
            "leadership",
            "https://sloanreview.mit.edu/",
            "https://sloanreview.mit.edu/feed/",
            ["h1.entry-title", "div.entry-content", "time.entry-date"],
        ),
        source(
            "McKinsey Insights",
            "leadership",
            "https://www.mckinsey.com/insights",
            "https://www.mckinsey.com/insights/rss",
            ["h1.article-title", "div.article-body", "time.article-date"],
        ),
    ]
}

fn default_keywords() -> BTreeMap<String, Vec<String>> {
    let technology = [
        "artificial intelligence",
        "machine learning",
        "blockchain",
        "cryptocurrency",
        "cloud computing",
        "cybersecurity",
        "data science",
        "software development",
        "tech startup",
        "innovation",
        "digital transformation",
        "automation",
    ];
    let leadership = [
        "leadership",
        "management",
        "CEO",
        "executive",
        "business strategy",
        "organizational culture",
        "team management",
        "corporate governance",
        "business transformation",
        "change management",
        "decision making",
    ];

    let mut keywords = BTreeMap::new();
    keywords.insert("technology".to_string(), technology.iter().map(|k| k.to_string()).collect());
    keywords.insert("leadership".to_string(), leadership.iter().map(|k| k.to_string()).collect());
    keywords
}

fn default_prompts() -> BTreeMap<String, PromptTemplate> {
    let mut prompts = BTreeMap::new();
    prompts.insert(
        "article".to_string(),
        PromptTemplate {
            system: "You are an expert writer covering {{topic}}. Write an engaging, informative article \
                     based only on the provided sources. Start with a compelling headline on the first line, \
                     follow with an introduction, a logical body with analysis, and a strong conclusion. \
                     Aim for approximately {{target_length}} words in a professional but accessible tone. \
                     Cite facts only when they appear in the sources."
                .to_string(),
            user: "Topic: {{topic}}\n\nSources:\n{{context}}\n\nWrite a comprehensive article based on these sources."
                .to_string(),
        },
    );
    prompts.insert(
        "post".to_string(),
        PromptTemplate {
            system: "Create a {{platform}} post based on the given article. The post must be {{style}}, \
                     formatted as {{format}}, stay within {{max_length}} characters, capture the key insight, \
                     and include a call-to-action when appropriate."
                .to_string(),
            user: "Article title: {{title}}\nArticle content:\n{{content}}\n\nWrite the {{platform}} post.".to_string(),
        },
    );
    prompts.insert(
        "bias_review".to_string(),
        PromptTemplate {
            system: "You review news copy for political, demographic and framing bias. Reply with a single \
                     number between 0 and 1, where 0 is neutral and 1 is heavily biased."
                .to_string(),
            user: "{{content}}".to_string(),
        },
    );
    prompts.insert(
        "factual_review".to_string(),
        PromptTemplate {
            system: "You check generated news copy against its sources. Reply with a single number between \
                     0 and 1: the share of factual claims in the copy that the sources do not support."
                .to_string(),
            user: "Sources:\n{{sources}}\n\nCopy:\n{{content}}".to_string(),
        },
    );
    prompts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.categories(), vec!["leadership".to_string(), "technology".to_string()]);
        assert_eq!(config.sources_for("technology").len(), 4);
        assert!(config.vocabulary("technology").contains(&"blockchain".to_string()));
    }

    #[test]
    fn partial_toml_keeps_defaults() -> Result<()> {
        let config = PipelineConfig::from_toml(
            r#"
            database_url = "sqlite::memory:"

            [aggregation]
            max_concurrent_sources = 8

            [[sources]]
            name = "Example Wire"
            category = "technology"
            url = "https://example.com/"
            methods = ["scrape"]
            "#,
        )?;

        assert_eq!(config.aggregation.max_concurrent_sources, 8);
        assert_eq!(config.aggregation.min_body_chars, 100);
        assert_eq!(config.sources.len(), 1);
        assert!(!config.sources[0].allows(RetrievalMethod::Feed));
        assert_eq!(config.generation.platforms["twitter"].max_chars, 280);
        Ok(())
    }

    #[test]
    fn rejects_unknown_guardrail_and_bad_selector() {
        let mut config = PipelineConfig::default();
        config.guardrails.order.push("tone".to_string());
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));

        let mut config = PipelineConfig::default();
        config.sources[0].selectors.title = Some("h1[".to_string());
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }
}
