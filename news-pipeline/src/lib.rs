pub mod aggregator;
pub mod config;
pub mod extract;
pub mod fetcher;
pub mod generation;
pub mod guardrails;
pub mod llm_adapter;
pub mod parser;
pub mod pipeline;
pub mod prompt;
pub mod retry;
pub mod review;
pub mod sources;
pub mod store;
pub mod traits;
pub mod types;
pub mod utils;

pub use aggregator::Aggregator;
pub use config::PipelineConfig;
pub use fetcher::{Fetcher, PageFetcher};
pub use generation::{GenerationEngine, Generated};
pub use guardrails::{ChainOutcome, GuardrailChain};
pub use llm_adapter::{create_adapter, LlmAdapter, MockLlmAdapter, MockReply, OpenAiAdapter};
pub use parser::FeedParser;
pub use pipeline::{DailyRun, NewsPipeline};
pub use review::ReviewQueue;
pub use store::{MemoryStore, SqliteStore};
pub use types::*;
