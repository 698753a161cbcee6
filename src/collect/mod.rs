//! Article collection against the public feed endpoint.
//!
//! Accounts are identified by their profile url; the trailing token segment
//! is fed to the paged feed API. One [`Fingerprint`] is drawn per run and a
//! shared [`RateLimiter`] spaces requests between concurrent workers.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

pub mod feed;
pub mod fingerprint;
pub mod rate_limiter;

pub use feed::{FeedItem, FeedResponse};
pub use fingerprint::Fingerprint;
pub use rate_limiter::RateLimiter;

use crate::config::CollectConfig;
use crate::error::{FeedForgeError, ForgeResult};
use crate::storage::NewArticle;
use crate::task::TimeWindow;

/// What one account's collection run produced
#[derive(Debug, Default)]
pub struct CollectSummary {
    pub articles: Vec<NewArticle>,
    pub pages: usize,
    /// Entries dropped by the time window
    pub filtered: usize,
}

/// Leading characters of a token, safe to log whatever the encoding
fn token_preview(token: &str) -> String {
    token.chars().take(12).collect()
}

pub struct FeedClient {
    http: reqwest::Client,
    config: CollectConfig,
    limiter: Arc<RateLimiter>,
}

impl FeedClient {
    pub fn new(config: &CollectConfig) -> ForgeResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .cookie_store(true)
            .gzip(true)
            .build()
            .map_err(|e| FeedForgeError::network(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            http,
            config: config.clone(),
            limiter: Arc::new(RateLimiter::new(config.min_delay_ms)),
        })
    }

    /// Pull the account token out of a profile url.
    /// `https://www.toutiao.com/c/user/token/MS4w.../` -> `MS4w...`
    pub fn extract_token(&self, account_url: &str) -> ForgeResult<String> {
        let rest = account_url
            .strip_prefix(self.config.account_url_prefix.as_str())
            .ok_or_else(|| FeedForgeError::InvalidAccountUrl {
                url: account_url.to_string(),
            })?;
        let token = rest.split('/').next().unwrap_or("").trim();
        if token.is_empty() {
            return Err(FeedForgeError::InvalidAccountUrl {
                url: account_url.to_string(),
            });
        }
        Ok(token.to_string())
    }

    /// Collect up to `limit` articles (0 = unlimited) from one account,
    /// paging until the feed runs dry, the window's lower bound is passed,
    /// the page cap is hit, or `should_stop` turns true.
    pub async fn collect_account<F>(
        &self,
        account_url: &str,
        limit: usize,
        window: TimeWindow,
        should_stop: F,
    ) -> ForgeResult<CollectSummary>
    where
        F: Fn() -> bool,
    {
        let token = self.extract_token(account_url)?;
        let fingerprint = Fingerprint::random();
        let host = Url::parse(&self.config.feed_api_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();

        info!("Collecting account: token={}...", token_preview(&token));

        let mut summary = CollectSummary::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut cursor: i64 = 0;

        for page in 0..self.config.max_feed_pages {
            if should_stop() {
                info!("Collection stopped after {} pages", page);
                break;
            }

            self.limiter.wait_for_host(&host).await;
            let response = self.fetch_page(&token, cursor, &fingerprint).await?;
            summary.pages += 1;

            if response.data.is_empty() {
                debug!("Feed page {} empty, stopping", page);
                break;
            }

            let mut oldest: i64 = i64::MAX;
            let mut page_exhausted_window = false;

            for item in response.data {
                let id = item.id();
                let publish_time = item.effective_publish_time();
                oldest = oldest.min(if item.behot_time != 0 {
                    item.behot_time
                } else {
                    publish_time
                });

                if id.is_empty() || seen.contains(&id) {
                    continue;
                }
                if !window.contains(publish_time) {
                    summary.filtered += 1;
                    // Pages arrive newest first; once below the lower bound
                    // nothing older can match
                    if window.since.is_some_and(|since| publish_time < since) {
                        page_exhausted_window = true;
                    }
                    continue;
                }
                if item.title.is_empty() {
                    continue;
                }

                seen.insert(id);
                summary.articles.push(item.into_article());

                if limit > 0 && summary.articles.len() >= limit {
                    info!("Reached article limit of {}", limit);
                    return Ok(summary);
                }
            }

            if !response.has_more || page_exhausted_window {
                break;
            }
            if oldest == i64::MAX || oldest == cursor {
                warn!("Feed cursor not advancing, stopping at page {}", page);
                break;
            }
            cursor = oldest;

            tokio::time::sleep(Duration::from_millis(Fingerprint::page_jitter_ms())).await;
        }

        if summary.articles.is_empty() && summary.filtered == 0 {
            return Err(FeedForgeError::EmptyFeed {
                account: account_url.to_string(),
            });
        }

        info!(
            "Account collected: {} articles over {} pages ({} filtered)",
            summary.articles.len(),
            summary.pages,
            summary.filtered
        );
        Ok(summary)
    }

    async fn fetch_page(
        &self,
        token: &str,
        max_behot_time: i64,
        fingerprint: &Fingerprint,
    ) -> ForgeResult<FeedResponse> {
        let response = self
            .http
            .get(&self.config.feed_api_url)
            .query(&[
                ("category", "profile_all"),
                ("token", token),
                ("max_behot_time", &max_behot_time.to_string()),
                ("aid", "24"),
                ("app_name", "toutiao_web"),
            ])
            .header("User-Agent", &fingerprint.user_agent)
            .header("Accept-Language", &fingerprint.accept_language)
            .header("Referer", format!("{}{}/", self.config.account_url_prefix, token))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedForgeError::HttpRequest {
                url: self.config.feed_api_url.clone(),
                status: status.as_u16(),
            });
        }

        let page: FeedResponse = response.json().await?;
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectConfig;

    fn client() -> FeedClient {
        FeedClient::new(&CollectConfig::default()).unwrap()
    }

    #[test]
    fn test_extract_token() {
        let client = client();
        let token = client
            .extract_token("https://www.toutiao.com/c/user/token/MS4wAbCd/")
            .unwrap();
        assert_eq!(token, "MS4wAbCd");

        // Trailing path segments after the token are ignored
        let token = client
            .extract_token("https://www.toutiao.com/c/user/token/MS4wAbCd/?source=feed")
            .unwrap();
        assert_eq!(token, "MS4wAbCd");
    }

    #[test]
    fn test_token_preview_respects_char_boundaries() {
        // Multibyte character straddling the 12-byte mark must not panic
        assert_eq!(token_preview("aaaaaaaaaaa中xyz"), "aaaaaaaaaaa中");
        assert_eq!(token_preview("short"), "short");
        assert_eq!(token_preview(""), "");
    }

    #[test]
    fn test_extract_token_rejects_foreign_urls() {
        let client = client();
        assert!(matches!(
            client.extract_token("https://example.com/c/user/token/x/"),
            Err(FeedForgeError::InvalidAccountUrl { .. })
        ));
        assert!(matches!(
            client.extract_token("https://www.toutiao.com/c/user/token/"),
            Err(FeedForgeError::InvalidAccountUrl { .. })
        ));
    }
}
