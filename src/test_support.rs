//! Scripted doubles for the network seams, shared across test modules.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::rating_oracle::{OracleError, OracleTransport};
use crate::reachability::{Reachability, UnreachableReason, UrlProbe};
use crate::sync::lock_unpoisoned;

pub const TOKEN_PAGE: &str = r#"<form><input type="hidden" value="nonce-123"></form>"#;
pub const BLOCKED_BODY: &str = r#"<div class="website-not-published">not published</div>"#;
pub const ALLOWED_BODY: &str = "<div>all fine</div>";

/// Oracle transport that replays scripted responses and counts fetches.
pub struct ScriptedOracleTransport {
    token_page: Result<String, ()>,
    check_body: Result<String, ()>,
    fetches: Arc<AtomicUsize>,
}

impl ScriptedOracleTransport {
    pub fn new(
        token_page: Result<&str, ()>,
        check_body: Result<&str, ()>,
    ) -> (Self, Arc<AtomicUsize>) {
        let fetches = Arc::new(AtomicUsize::new(0));
        let transport = Self {
            token_page: token_page.map(String::from),
            check_body: check_body.map(String::from),
            fetches: Arc::clone(&fetches),
        };
        (transport, fetches)
    }
}

#[async_trait]
impl OracleTransport for ScriptedOracleTransport {
    async fn fetch_token_page(&self) -> Result<String, OracleError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.token_page
            .clone()
            .map_err(|_| OracleError::Transport("scripted failure".to_string()))
    }

    async fn submit_check(&self, _token: &str, _url: &str) -> Result<String, OracleError> {
        self.check_body
            .clone()
            .map_err(|_| OracleError::Transport("scripted failure".to_string()))
    }
}

/// Probe that replays a fixed reachability result and records invocations.
pub struct ScriptedProbe {
    reachability: Reachability,
    calls: AtomicUsize,
    last_url: Mutex<Option<String>>,
}

impl ScriptedProbe {
    pub fn reachable() -> Arc<Self> {
        Arc::new(Self {
            reachability: Reachability::Reachable { status: 200 },
            calls: AtomicUsize::new(0),
            last_url: Mutex::new(None),
        })
    }

    pub fn unreachable(reason: UnreachableReason, search_fallback: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            reachability: Reachability::Unreachable {
                reason,
                search_fallback: search_fallback.map(String::from),
            },
            calls: AtomicUsize::new(0),
            last_url: Mutex::new(None),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_url(&self) -> Option<String> {
        lock_unpoisoned(&self.last_url).clone()
    }
}

#[async_trait]
impl UrlProbe for ScriptedProbe {
    async fn probe(&self, url: &str) -> Reachability {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *lock_unpoisoned(&self.last_url) = Some(url.to_string());
        self.reachability.clone()
    }
}
