use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header;
use thiserror::Error;

use crate::config::OracleConfig;
use crate::sync::lock_unpoisoned;

const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";
const ACCEPT_LANGUAGE: &str = "de-DE,de;q=0.9,en-US;q=0.8,en;q=0.7";

/// The rating service's classification of a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Blocked,
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle transport failure: {0}")]
    Transport(String),
    #[error("oracle responded with status {0}")]
    Status(u16),
    #[error("verification token not found in oracle page")]
    TokenNotFound,
}

/// The two-step HTTP exchange with the rating portal, kept behind a trait so
/// the scraping strategy can be swapped without touching the gate.
#[async_trait]
pub trait OracleTransport: Send + Sync {
    /// Fetches the HTML page carrying the verification token.
    async fn fetch_token_page(&self) -> Result<String, OracleError>;

    /// Submits the URL check form and returns the response body.
    async fn submit_check(&self, token: &str, url: &str) -> Result<String, OracleError>;
}

pub struct HttpOracleTransport {
    http: reqwest::Client,
    config: OracleConfig,
}

impl HttpOracleTransport {
    pub fn new(config: OracleConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl OracleTransport for HttpOracleTransport {
    async fn fetch_token_page(&self) -> Result<String, OracleError> {
        let response = self
            .http
            .get(&self.config.endpoint)
            .header(header::USER_AGENT, &self.config.user_agent)
            .header(header::ACCEPT, ACCEPT)
            .header(header::ACCEPT_LANGUAGE, ACCEPT_LANGUAGE)
            .send()
            .await
            .map_err(|err| OracleError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OracleError::Status(status.as_u16()));
        }
        response
            .text()
            .await
            .map_err(|err| OracleError::Transport(err.to_string()))
    }

    async fn submit_check(&self, token: &str, url: &str) -> Result<String, OracleError> {
        let encoded_url: String = url::form_urlencoded::byte_serialize(url.as_bytes()).collect();
        // The token is inserted verbatim, exactly as the portal's own form
        // submits it.
        let body = format!(
            "{}={}&{}={}&{}=1",
            self.config.token_field,
            token,
            self.config.url_field,
            encoded_url,
            self.config.submit_field,
        );

        let response = self
            .http
            .post(&self.config.endpoint)
            .header(header::USER_AGENT, &self.config.user_agent)
            .header(header::ACCEPT, ACCEPT)
            .header(header::ACCEPT_LANGUAGE, ACCEPT_LANGUAGE)
            .header(header::REFERER, &self.config.endpoint)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|err| OracleError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OracleError::Status(status.as_u16()));
        }
        response
            .text()
            .await
            .map_err(|err| OracleError::Transport(err.to_string()))
    }
}

/// Extracts the first double-quoted `value` attribute from the page.
///
/// External-format dependency: the portal renders the verification token as
/// the first such attribute in its markup.
pub(crate) fn extract_form_token(html: &str) -> Option<String> {
    let start = html.find("value=\"")? + "value=\"".len();
    let rest = &html[start..];
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

struct CacheEntry {
    verdict: Verdict,
    stored_at: Instant,
}

/// Client for the external rating service, with a per-URL verdict cache.
///
/// Cache keys are the literal URL strings; `http://x` and `http://x/` are
/// distinct entries. Lookups are synchronous and happen before the fetch is
/// initiated, so two concurrent misses for the same key may both reach the
/// oracle. Verdicts expire after the configured TTL.
pub struct RatingOracleClient {
    transport: Box<dyn OracleTransport>,
    blocked_marker: String,
    ttl: Duration,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl RatingOracleClient {
    pub fn new(transport: Box<dyn OracleTransport>, config: &OracleConfig) -> Self {
        Self {
            transport,
            blocked_marker: config.blocked_marker.clone(),
            ttl: config.cache_ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Classifies `url`, failing closed: any transport, protocol, or parsing
    /// failure yields `Blocked`. Never returns an error to the caller.
    pub async fn check_url(&self, url: &str) -> Verdict {
        match self.check_url_strict(url).await {
            Ok(verdict) => verdict,
            Err(err) => {
                tracing::warn!(url, error = %err, "url check failed, blocking");
                Verdict::Blocked
            }
        }
    }

    /// Classifies `url`, surfacing protocol failures to the caller. Failed
    /// checks are not cached.
    pub async fn check_url_strict(&self, url: &str) -> Result<Verdict, OracleError> {
        if let Some(verdict) = self.lookup(url) {
            return Ok(verdict);
        }

        let page = self.transport.fetch_token_page().await?;
        let token = extract_form_token(&page).ok_or(OracleError::TokenNotFound)?;
        let body = self.transport.submit_check(&token, url).await?;

        let verdict = if body.contains(&self.blocked_marker) {
            Verdict::Blocked
        } else {
            Verdict::Allowed
        };
        self.store(url, verdict);
        Ok(verdict)
    }

    fn lookup(&self, url: &str) -> Option<Verdict> {
        let cache = lock_unpoisoned(&self.cache);
        let entry = cache.get(url)?;
        if entry.stored_at.elapsed() < self.ttl {
            Some(entry.verdict)
        } else {
            None
        }
    }

    fn store(&self, url: &str, verdict: Verdict) {
        let mut cache = lock_unpoisoned(&self.cache);
        cache.insert(
            url.to_string(),
            CacheEntry {
                verdict,
                stored_at: Instant::now(),
            },
        );
    }
}
