use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header;

use crate::config::EngineSettings;
use crate::error::ScrapeError;
use crate::scrape::antidetect::{self, BrowserIdentity};
use crate::scrape::ratelimit::RateLimiter;
use crate::sources::{Pace, Source};

/// Raw page payload handed to the adapters. Transport-level success only;
/// whether the body is extractable is the adapter's judgement.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub status: u16,
    pub body: String,
}

/// Seam between the pipeline and the network. Production uses
/// [`HttpFetcher`]; tests script page sequences against the trait.
#[async_trait]
pub trait PageFetch: Send + Sync {
    async fn fetch(&self, url: &str, pace: Pace) -> Result<FetchedPage, ScrapeError>;

    /// Form POST, used for session login. Sources without authenticated
    /// sessions never call this.
    async fn post_form(
        &self,
        _url: &str,
        _form: &[(&str, &str)],
    ) -> Result<FetchedPage, ScrapeError> {
        Err(ScrapeError::Session("form posts not supported by this fetcher".to_string()))
    }
}

/// One reqwest client per source session: cookie jar, rotated identity,
/// bounded timeout. Every fetch waits on the rate budget and a politeness
/// delay before touching the network.
pub struct HttpFetcher {
    source: Source,
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
}

impl HttpFetcher {
    pub fn new(
        source: Source,
        identity: &BrowserIdentity,
        settings: &EngineSettings,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, ScrapeError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static(
                "application/json,text/html,application/xhtml+xml,*/*;q=0.8",
            ),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            header::HeaderValue::from_static("en-US,en;q=0.9"),
        );
        headers.insert(header::CONNECTION, header::HeaderValue::from_static("keep-alive"));

        let mut builder = reqwest::Client::builder()
            .user_agent(&identity.user_agent)
            .default_headers(headers)
            .cookie_store(true)
            .timeout(settings.fetch_timeout())
            .redirect(reqwest::redirect::Policy::limited(5));

        if let Some(proxy) = &identity.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| ScrapeError::Config(format!("invalid proxy '{proxy}': {e}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| ScrapeError::Config(format!("failed to build HTTP client: {e}")))?;

        tracing::debug!(
            source = %source,
            user_agent = %identity.user_agent,
            viewport = ?identity.viewport,
            "session client built"
        );

        Ok(HttpFetcher { source, client, limiter })
    }

    fn map_send_error(&self, url: &str, e: reqwest::Error) -> ScrapeError {
        if e.is_timeout() {
            ScrapeError::FetchTimeout { url: url.to_string() }
        } else {
            ScrapeError::Fetch {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }

    async fn finish(&self, url: &str, resp: reqwest::Response) -> Result<FetchedPage, ScrapeError> {
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| self.map_send_error(url, e))?;

        if looks_like_challenge(status, &body) {
            self.limiter.report_throttled(self.source).await;
            return Err(ScrapeError::AntiBotChallenge { source: self.source });
        }
        if !(200..300).contains(&status) {
            return Err(ScrapeError::Fetch {
                url: url.to_string(),
                reason: format!("HTTP {status}"),
            });
        }

        Ok(FetchedPage {
            url: url.to_string(),
            status,
            body,
        })
    }
}

#[async_trait]
impl PageFetch for HttpFetcher {
    async fn fetch(&self, url: &str, pace: Pace) -> Result<FetchedPage, ScrapeError> {
        self.limiter.acquire(self.source).await;
        tokio::time::sleep(antidetect::politeness_delay(pace)).await;

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_send_error(url, e))?;
        self.finish(url, resp).await
    }

    async fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
    ) -> Result<FetchedPage, ScrapeError> {
        self.limiter.acquire(self.source).await;
        tokio::time::sleep(antidetect::politeness_delay(Pace::Listing)).await;

        let resp = self
            .client
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|e| self.map_send_error(url, e))?;
        self.finish(url, resp).await
    }
}

/// Response signatures of rate limiting or bot challenges. Status codes are
/// decisive; body markers catch challenges served with HTTP 200.
fn looks_like_challenge(status: u16, body: &str) -> bool {
    if status == 403 || status == 429 {
        return true;
    }
    let head = body.get(..body.len().min(4096)).unwrap_or(body);
    let head = head.to_lowercase();
    ["captcha", "cf-chl", "are you a human", "unusual traffic", "verify you are human"]
        .iter()
        .any(|marker| head.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_challenge_signals() {
        assert!(looks_like_challenge(429, ""));
        assert!(looks_like_challenge(403, ""));
        assert!(!looks_like_challenge(200, "<html>jobs</html>"));
        assert!(!looks_like_challenge(500, "oops"));
    }

    #[test]
    fn body_markers_catch_challenges_served_with_200() {
        assert!(looks_like_challenge(200, "<html>Please solve this CAPTCHA</html>"));
        assert!(looks_like_challenge(200, "We detected unusual traffic from your network"));
    }
}
