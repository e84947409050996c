use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::UnboundedSender;

use crate::address;
use crate::context_registry::{BlockedNotice, BrowsingContextRegistry, ContextId};
use crate::policy_store::PolicyStore;
use crate::rating_oracle::{RatingOracleClient, Verdict};
use crate::reachability::{Reachability, UnreachableReason, UrlProbe};
use crate::shell::{ShellEvent, ShellStatus};
use crate::stats::GateStats;
use crate::sync::lock_unpoisoned;

pub const MSG_NOT_SUITABLE: &str = "This website is not suitable for children.";
pub const MSG_CHECK_FAILED: &str = "The website could not be checked.";
pub const MSG_INVALID_ADDRESS: &str = "That is not a valid web address.";

pub fn unreachable_message(reason: &UnreachableReason) -> String {
    format!("The website is not reachable: {}.", reason)
}

/// How a navigation attempt entered the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationTrigger {
    AddressBar,
    LinkOrPopup,
    Programmatic,
    BackForward,
    Reload,
}

/// One attempted navigation, consumed by a single gate evaluation.
#[derive(Debug, Clone)]
pub struct NavigationRequest {
    pub context_id: ContextId,
    pub url: String,
    pub trigger: NavigationTrigger,
}

/// Terminal result of a gate evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Allowed { url: String },
    Blocked { url: String, notice: BlockedNotice },
    /// Empty input, a closed context, or an evaluation already in flight.
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverrideOutcome {
    Granted(GateOutcome),
    Rejected,
}

/// The decision pipeline applied to every navigation attempt.
///
/// Per request: local schemes and whitelisted URLs short-circuit to allowed;
/// everything else is probed for reachability and then classified by the
/// rating oracle, failing closed. The per-context `navigating` flag makes
/// evaluations first-request-wins and is released on every exit path.
pub struct NavigationGate {
    registry: Arc<Mutex<BrowsingContextRegistry>>,
    oracle: Arc<RatingOracleClient>,
    probe: Arc<dyn UrlProbe>,
    policy: Arc<Mutex<PolicyStore>>,
    events: UnboundedSender<ShellEvent>,
    stats: Arc<GateStats>,
}

impl NavigationGate {
    pub fn new(
        registry: Arc<Mutex<BrowsingContextRegistry>>,
        oracle: Arc<RatingOracleClient>,
        probe: Arc<dyn UrlProbe>,
        policy: Arc<Mutex<PolicyStore>>,
        events: UnboundedSender<ShellEvent>,
        stats: Arc<GateStats>,
    ) -> Self {
        Self {
            registry,
            oracle,
            probe,
            policy,
            events,
            stats,
        }
    }

    pub async fn submit(&self, request: NavigationRequest) -> GateOutcome {
        let url = match request.trigger {
            NavigationTrigger::AddressBar => {
                match address::normalize_address_input(&request.url) {
                    Some(url) => url,
                    None => {
                        self.stats.record_dropped();
                        return GateOutcome::Dropped;
                    }
                }
            }
            _ => request.url.clone(),
        };
        let context_id = request.context_id;

        {
            let registry = lock_unpoisoned(&self.registry);
            match registry.get(context_id) {
                Some(context) if context.navigating => {
                    tracing::debug!(context_id, %url, "navigation already in flight, dropping");
                    self.stats.record_dropped();
                    return GateOutcome::Dropped;
                }
                Some(_) => {}
                None => {
                    self.stats.record_dropped();
                    return GateOutcome::Dropped;
                }
            }
        }

        // Local schemes never leave the machine and bypass all checks.
        if address::is_local_scheme(&url) {
            return self.allow(context_id, &url, request.trigger);
        }

        if !address::is_valid_web_url(&url) {
            return self.block(
                context_id,
                &url,
                BlockedNotice {
                    message: MSG_INVALID_ADDRESS.to_string(),
                    search_fallback: None,
                    override_candidate: None,
                },
            );
        }

        // Whitelist membership short-circuits the whole pipeline.
        {
            let policy = lock_unpoisoned(&self.policy);
            if policy.is_whitelisted(&url) {
                drop(policy);
                return self.allow(context_id, &url, request.trigger);
            }
        }

        {
            let mut registry = lock_unpoisoned(&self.registry);
            if !registry.try_begin_navigation(context_id) {
                self.stats.record_dropped();
                return GateOutcome::Dropped;
            }
        }

        // Released on every exit path, including panics mid-pipeline.
        let registry = Arc::clone(&self.registry);
        let events = self.events.clone();
        let _clear_navigating = scopeguard::guard((), move |_| {
            lock_unpoisoned(&registry).end_navigation(context_id);
            let _ = events.send(ShellEvent::StatusChanged {
                status: ShellStatus::Ready,
            });
        });

        self.emit(ShellEvent::StatusChanged {
            status: ShellStatus::CheckingReachability,
        });
        match self.probe.probe(&url).await {
            Reachability::Unreachable {
                reason,
                search_fallback,
            } => {
                return self.block(
                    context_id,
                    &url,
                    BlockedNotice {
                        message: unreachable_message(&reason),
                        search_fallback,
                        override_candidate: None,
                    },
                );
            }
            Reachability::Reachable { .. } => {}
        }

        self.emit(ShellEvent::StatusChanged {
            status: ShellStatus::CheckingRating,
        });
        match self.oracle.check_url(&url).await {
            Verdict::Allowed => self.allow(context_id, &url, request.trigger),
            Verdict::Blocked => self.block(
                context_id,
                &url,
                BlockedNotice {
                    message: MSG_NOT_SUITABLE.to_string(),
                    search_fallback: None,
                    override_candidate: Some(url.clone()),
                },
            ),
        }
    }

    /// Parental override for a blocked URL: a matching PIN whitelists the
    /// URL and re-submits it through the gate, which then short-circuits on
    /// the fresh whitelist entry. A mismatch is reported for inline retry;
    /// there is no attempt counter and no lockout.
    pub async fn override_with_pin(
        &self,
        context_id: ContextId,
        url: &str,
        pin: &str,
    ) -> OverrideOutcome {
        let matched = lock_unpoisoned(&self.policy).check_pin(pin);
        if !matched {
            tracing::info!(context_id, "override rejected: pin mismatch");
            self.emit(ShellEvent::PinRejected { context_id });
            return OverrideOutcome::Rejected;
        }

        {
            let mut policy = lock_unpoisoned(&self.policy);
            if let Err(err) = policy.add_to_whitelist(url) {
                tracing::warn!(url, error = %err, "whitelist update was not persisted");
            }
        }

        let outcome = self
            .submit(NavigationRequest {
                context_id,
                url: url.to_string(),
                trigger: NavigationTrigger::Programmatic,
            })
            .await;
        OverrideOutcome::Granted(outcome)
    }

    fn allow(&self, context_id: ContextId, url: &str, trigger: NavigationTrigger) -> GateOutcome {
        let title = {
            let mut registry = lock_unpoisoned(&self.registry);
            registry.apply_allowed(context_id, url, trigger);
            registry.get(context_id).map(|context| context.title.clone())
        };
        if let Some(title) = title {
            self.emit(ShellEvent::NavigationCommitted {
                context_id,
                url: url.to_string(),
                title,
            });
            self.emit(ShellEvent::SecurityStateChanged {
                context_id,
                secure: true,
            });
        }
        self.stats.record_allowed();
        GateOutcome::Allowed {
            url: url.to_string(),
        }
    }

    fn block(&self, context_id: ContextId, url: &str, notice: BlockedNotice) -> GateOutcome {
        tracing::info!(context_id, url, message = %notice.message, "navigation blocked");
        {
            let mut registry = lock_unpoisoned(&self.registry);
            registry.apply_blocked(context_id, notice.clone());
        }
        self.emit(ShellEvent::NavigationBlocked {
            context_id,
            url: url.to_string(),
            message: notice.message.clone(),
            search_fallback: notice.search_fallback.clone(),
            override_candidate: notice.override_candidate.clone(),
        });
        self.emit(ShellEvent::SecurityStateChanged {
            context_id,
            secure: false,
        });
        self.stats.record_blocked();
        GateOutcome::Blocked {
            url: url.to_string(),
            notice,
        }
    }

    fn emit(&self, event: ShellEvent) {
        let _ = self.events.send(event);
    }
}
