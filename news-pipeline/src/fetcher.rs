use crate::config::FetchConfig;
use crate::retry::{retry, RetryPolicy};
use crate::types::{PipelineError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};
use url::Url;

/// Anything that can turn a URL into response text. Retrieval methods only
/// talk to the network through this seam.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_text(&self, url: &str) -> Result<String>;
}

pub struct Fetcher {
    client: Client,
    config: FetchConfig,
    retry_policy: RetryPolicy,
    // Next permitted request time per host
    rate_limiter: Arc<Mutex<HashMap<String, Instant>>>,
}

impl Fetcher {
    pub fn new(config: FetchConfig, retry_policy: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self {
            client,
            config,
            retry_policy,
            rate_limiter: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Reserve the next slot for this host, then sleep until it arrives.
    /// The lock is released before sleeping.
    async fn apply_rate_limit(&self, url: &str) -> Result<()> {
        let parsed_url = Url::parse(url)?;
        let host = parsed_url.host_str().unwrap_or("").to_string();
        let min_interval = Duration::from_millis(self.config.request_delay_ms);

        let now = Instant::now();
        let slot = {
            let mut rate_limiter = self.rate_limiter.lock().await;
            let slot = match rate_limiter.get(&host) {
                Some(next_allowed) if *next_allowed > now => *next_allowed,
                _ => now,
            };
            rate_limiter.insert(host.clone(), slot + min_interval);
            slot
        };

        if slot > now {
            debug!("Rate limiting {}: waiting {:?}", host, slot - now);
            tokio::time::sleep_until(slot).await;
        }

        Ok(())
    }

    async fn fetch_once(&self, url: &str) -> Result<String> {
        self.apply_rate_limit(url).await?;

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let limit_bytes = self.config.max_response_size_mb * 1024 * 1024;
        if let Some(content_length) = response.content_length() {
            if content_length as usize > limit_bytes {
                return Err(PipelineError::ResponseTooLarge {
                    url: url.to_string(),
                    limit_bytes,
                });
            }
        }

        let content = response.text().await?;
        if content.len() > limit_bytes {
            return Err(PipelineError::ResponseTooLarge {
                url: url.to_string(),
                limit_bytes,
            });
        }

        info!("Fetched {} ({} bytes)", url, content.len());
        Ok(content)
    }
}

#[async_trait]
impl PageFetcher for Fetcher {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        debug!("Fetching {}", url);
        retry(&self.retry_policy, url, || self.fetch_once(url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rate_limit_spaces_requests_to_same_host() -> Result<()> {
        let config = FetchConfig {
            request_delay_ms: 50,
            ..FetchConfig::default()
        };
        let fetcher = Fetcher::new(config, RetryPolicy::immediate(1))?;

        let start = Instant::now();
        fetcher.apply_rate_limit("https://example.com/a").await?;
        fetcher.apply_rate_limit("https://example.com/b").await?;
        fetcher.apply_rate_limit("https://other.example.org/").await?;

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(1_000));
        Ok(())
    }

    #[tokio::test]
    async fn rejects_malformed_urls() -> Result<()> {
        let fetcher = Fetcher::new(FetchConfig::default(), RetryPolicy::immediate(1))?;
        assert!(matches!(
            fetcher.fetch_text("not a url").await,
            Err(PipelineError::InvalidUrl(_))
        ));
        Ok(())
    }
}
