use std::fmt;

use async_trait::async_trait;
use reqwest::header;
use serde::Serialize;
use tokio::net::lookup_host;
use url::Url;

use crate::address;
use crate::config::ProbeConfig;

/// Outcome of the pre-oracle existence check for a URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Reachability {
    Reachable {
        status: u16,
    },
    Unreachable {
        reason: UnreachableReason,
        search_fallback: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum UnreachableReason {
    HostNotFound,
    ConnectionRefused,
    TimedOut,
    ServerError,
    Other(String),
}

impl fmt::Display for UnreachableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnreachableReason::HostNotFound => write!(f, "website not found"),
            UnreachableReason::ConnectionRefused => write!(f, "connection refused"),
            UnreachableReason::TimedOut => write!(f, "timed out"),
            UnreachableReason::ServerError => write!(f, "server error"),
            UnreachableReason::Other(message) => write!(f, "{}", message),
        }
    }
}

/// Existence check performed before any oracle call is spent on a URL.
#[async_trait]
pub trait UrlProbe: Send + Sync {
    async fn probe(&self, url: &str) -> Reachability;
}

/// Probe backed by explicit DNS resolution and a bounded HEAD request.
///
/// Any status below 500 counts as reachable; only network-level failure and
/// server errors are unreachable. A DNS miss is the one case that offers a
/// search fallback on the rating service's own site.
pub struct HttpUrlProbe {
    http: reqwest::Client,
    config: ProbeConfig,
}

impl HttpUrlProbe {
    pub fn new(config: ProbeConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self { http, config })
    }

    fn search_fallback_for(&self, url: &str) -> String {
        let term = address::search_host_for(url)
            .unwrap_or_else(|| self.config.fallback_search_term.clone());
        let encoded: String = url::form_urlencoded::byte_serialize(term.as_bytes()).collect();
        format!("{}{}", self.config.search_url_prefix, encoded)
    }

    async fn probe_inner(&self, url: &str) -> Reachability {
        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(err) => {
                return Reachability::Unreachable {
                    reason: UnreachableReason::Other(err.to_string()),
                    search_fallback: None,
                }
            }
        };

        let Some(host) = parsed.host_str() else {
            return Reachability::Unreachable {
                reason: UnreachableReason::HostNotFound,
                search_fallback: Some(self.search_fallback_for(url)),
            };
        };
        let port = parsed.port_or_known_default().unwrap_or(443);

        if lookup_host((host, port)).await.is_err() {
            return Reachability::Unreachable {
                reason: UnreachableReason::HostNotFound,
                search_fallback: Some(self.search_fallback_for(url)),
            };
        }

        let response = self
            .http
            .head(url)
            .header(header::USER_AGENT, &self.config.user_agent)
            .send()
            .await;

        match response {
            Ok(response) => {
                let status = response.status().as_u16();
                if status < 500 {
                    Reachability::Reachable { status }
                } else {
                    Reachability::Unreachable {
                        reason: UnreachableReason::ServerError,
                        search_fallback: None,
                    }
                }
            }
            Err(err) if err.is_timeout() => Reachability::Unreachable {
                reason: UnreachableReason::TimedOut,
                search_fallback: None,
            },
            Err(err) if err.is_connect() => Reachability::Unreachable {
                reason: UnreachableReason::ConnectionRefused,
                search_fallback: None,
            },
            Err(err) => Reachability::Unreachable {
                reason: UnreachableReason::Other(err.to_string()),
                search_fallback: None,
            },
        }
    }
}

#[async_trait]
impl UrlProbe for HttpUrlProbe {
    async fn probe(&self, url: &str) -> Reachability {
        match tokio::time::timeout(self.config.timeout, self.probe_inner(url)).await {
            Ok(reachability) => reachability,
            Err(_) => Reachability::Unreachable {
                reason: UnreachableReason::TimedOut,
                search_fallback: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShellConfig;

    fn probe() -> HttpUrlProbe {
        HttpUrlProbe::new(ShellConfig::fragfinn_defaults().probe).expect("probe construction")
    }

    #[test]
    fn search_fallback_uses_stripped_hostname() {
        assert_eq!(
            probe().search_fallback_for("https://www.kindersache.de/page"),
            "https://www.fragfinn.de/?stype=&s=kindersache.de"
        );
    }

    #[test]
    fn search_fallback_defaults_when_host_is_missing() {
        assert_eq!(
            probe().search_fallback_for("not a url"),
            "https://www.fragfinn.de/?stype=&s=kinderseiten"
        );
    }

    #[test]
    fn reason_messages_are_user_ready() {
        assert_eq!(UnreachableReason::HostNotFound.to_string(), "website not found");
        assert_eq!(UnreachableReason::TimedOut.to_string(), "timed out");
        assert_eq!(
            UnreachableReason::Other("odd failure".to_string()).to_string(),
            "odd failure"
        );
    }

    #[tokio::test]
    async fn invalid_urls_never_probe_the_network() {
        let result = probe().probe("%%% not parseable").await;
        assert!(matches!(
            result,
            Reachability::Unreachable {
                reason: UnreachableReason::Other(_),
                search_fallback: None,
            }
        ));
    }
}
