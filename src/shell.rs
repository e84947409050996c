use std::sync::{Arc, Mutex};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::config::ShellConfig;
use crate::context_registry::{BrowsingContextRegistry, ContextId, OpenOutcome, SurfaceId};
use crate::downloads::DownloadNotice;
use crate::navigation_gate::{
    GateOutcome, NavigationGate, NavigationRequest, NavigationTrigger, OverrideOutcome,
    MSG_CHECK_FAILED, MSG_INVALID_ADDRESS, MSG_NOT_SUITABLE,
};
use crate::policy_store::{PolicyStore, PolicyStoreError};
use crate::rating_oracle::{HttpOracleTransport, RatingOracleClient, Verdict};
use crate::reachability::{HttpUrlProbe, Reachability, UrlProbe};
use crate::stats::{GateStats, GateStatsSnapshot};
use crate::sync::lock_unpoisoned;

#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Policy(#[from] PolicyStoreError),
    #[error("http client construction failed: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Status line states surfaced to the chrome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ShellStatus {
    Ready,
    Loading,
    CheckingReachability,
    CheckingRating,
}

/// Menu and host commands consumed by the shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    NewTab,
    CloseTab,
    NextTab,
    PrevTab,
    GoBack,
    GoForward,
    Reload,
    NavigateHome,
    Navigate { url: String },
    OpenUrlInNewTab { url: String },
}

impl ShellCommand {
    /// Maps a wire-level menu event name onto a command.
    pub fn from_menu_event(name: &str) -> Option<Self> {
        match name {
            "menu-new-tab" => Some(Self::NewTab),
            "menu-close-tab" => Some(Self::CloseTab),
            "menu-next-tab" => Some(Self::NextTab),
            "menu-prev-tab" => Some(Self::PrevTab),
            "menu-go-back" => Some(Self::GoBack),
            "menu-go-forward" => Some(Self::GoForward),
            "menu-reload" => Some(Self::Reload),
            "navigate-home" => Some(Self::NavigateHome),
            _ => None,
        }
    }
}

/// Events pushed to the chrome layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ShellEvent {
    TabOpened {
        context_id: ContextId,
        url: String,
        title: String,
    },
    TabClosed {
        context_id: ContextId,
    },
    TabActivated {
        context_id: ContextId,
        url: String,
    },
    NavigationCommitted {
        context_id: ContextId,
        url: String,
        title: String,
    },
    NavigationBlocked {
        context_id: ContextId,
        url: String,
        message: String,
        search_fallback: Option<String>,
        override_candidate: Option<String>,
    },
    SecurityStateChanged {
        context_id: ContextId,
        secure: bool,
    },
    StatusChanged {
        status: ShellStatus,
    },
    PinRejected {
        context_id: ContextId,
    },
    Download(DownloadNotice),
}

/// Response to the `check-url` and `navigate-to-url` request calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UrlCheckResponse {
    pub allowed: bool,
    pub url: String,
    pub message: Option<String>,
}

/// Response to the `navigate-webview` request call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SurfaceNavigateResponse {
    pub success: bool,
    pub error: Option<String>,
}

/// Orchestrates the window session: owns the registry and the gate, wires
/// host-level navigation interception, dispatches menu commands, and relays
/// download notices to the UI layer.
pub struct ShellController {
    config: ShellConfig,
    registry: Arc<Mutex<BrowsingContextRegistry>>,
    gate: NavigationGate,
    policy: Arc<Mutex<PolicyStore>>,
    oracle: Arc<RatingOracleClient>,
    probe: Arc<dyn UrlProbe>,
    events: UnboundedSender<ShellEvent>,
    stats: Arc<GateStats>,
}

impl ShellController {
    pub fn new(config: ShellConfig) -> Result<(Self, UnboundedReceiver<ShellEvent>), ShellError> {
        let policy = match &config.policy_path {
            Some(path) => PolicyStore::open(path.clone())?,
            None => PolicyStore::in_memory(),
        };
        let oracle = Arc::new(RatingOracleClient::new(
            Box::new(HttpOracleTransport::new(config.oracle.clone())?),
            &config.oracle,
        ));
        let probe: Arc<dyn UrlProbe> = Arc::new(HttpUrlProbe::new(config.probe.clone())?);
        Ok(Self::with_components(config, policy, oracle, probe))
    }

    /// Assembly seam used by `new` and by tests injecting doubles.
    pub fn with_components(
        config: ShellConfig,
        policy: PolicyStore,
        oracle: Arc<RatingOracleClient>,
        probe: Arc<dyn UrlProbe>,
    ) -> (Self, UnboundedReceiver<ShellEvent>) {
        let (events_tx, events_rx) = unbounded_channel();
        let registry = Arc::new(Mutex::new(BrowsingContextRegistry::new(
            config.home_url.clone(),
            config.duplicate_open_window,
        )));
        let policy = Arc::new(Mutex::new(policy));
        let stats = GateStats::new();
        let gate = NavigationGate::new(
            Arc::clone(&registry),
            Arc::clone(&oracle),
            Arc::clone(&probe),
            Arc::clone(&policy),
            events_tx.clone(),
            Arc::clone(&stats),
        );

        let shell = Self {
            config,
            registry,
            gate,
            policy,
            oracle,
            probe,
            events: events_tx,
            stats,
        };

        {
            let registry = lock_unpoisoned(&shell.registry);
            let initial = registry.active();
            shell.emit(ShellEvent::TabOpened {
                context_id: initial.id,
                url: initial.url.clone(),
                title: initial.title.clone(),
            });
            shell.emit(ShellEvent::TabActivated {
                context_id: initial.id,
                url: initial.url.clone(),
            });
        }

        (shell, events_rx)
    }

    pub async fn handle_command(&self, command: ShellCommand) {
        match command {
            ShellCommand::NewTab => self.open_tab().await,
            ShellCommand::CloseTab => {
                let active = lock_unpoisoned(&self.registry).active_id();
                self.close_tab(active);
            }
            ShellCommand::NextTab => self.cycle_tab(true),
            ShellCommand::PrevTab => self.cycle_tab(false),
            ShellCommand::GoBack => self.navigate_history(true).await,
            ShellCommand::GoForward => self.navigate_history(false).await,
            ShellCommand::Reload => self.reload_active().await,
            ShellCommand::NavigateHome => self.navigate_home(),
            ShellCommand::Navigate { url } => {
                self.navigate_address(&url).await;
            }
            ShellCommand::OpenUrlInNewTab { url } => self.open_in_new_tab(&url).await,
        }
    }

    /// Host pre-navigation hook for a content surface.
    ///
    /// The very first navigation of a fresh surface is admitted
    /// unconditionally (it has no prior URL); every later one is intercepted
    /// and routed through the gate. Returns whether the host may proceed
    /// with the load itself.
    pub async fn on_surface_will_navigate(&self, surface_id: SurfaceId, url: &str) -> bool {
        let lookup = {
            let registry = lock_unpoisoned(&self.registry);
            registry.context_id_for_surface(surface_id).map(|id| {
                let fresh = registry
                    .get(id)
                    .map(|context| context.surface().current_url().is_none())
                    .unwrap_or(false);
                (id, fresh)
            })
        };
        let Some((context_id, fresh)) = lookup else {
            // Surface destroyed mid-flight; nothing to navigate.
            return false;
        };

        if fresh {
            let title = {
                let mut registry = lock_unpoisoned(&self.registry);
                registry.record_initial_load(context_id, url);
                registry
                    .get(context_id)
                    .map(|context| context.title.clone())
                    .unwrap_or_default()
            };
            self.emit(ShellEvent::NavigationCommitted {
                context_id,
                url: url.to_string(),
                title,
            });
            return true;
        }

        let _ = self
            .gate
            .submit(NavigationRequest {
                context_id,
                url: url.to_string(),
                trigger: NavigationTrigger::LinkOrPopup,
            })
            .await;
        false
    }

    /// Host popup hook: native windows are always denied; the destination
    /// re-enters through the registry's dedup and the gate.
    pub async fn on_surface_popup_request(&self, url: &str) {
        self.open_in_new_tab(url).await;
    }

    /// Host load-state hook. Spinner state is suppressed while the gate is
    /// mid-evaluation; the gate drives it itself then.
    pub fn on_surface_loading(&self, surface_id: SurfaceId, loading: bool) {
        {
            let mut registry = lock_unpoisoned(&self.registry);
            let Some(context_id) = registry.context_id_for_surface(surface_id) else {
                return;
            };
            if let Some(context) = registry.get_mut(context_id) {
                if context.navigating {
                    return;
                }
                context.loading = loading;
            }
        }
        self.emit(ShellEvent::StatusChanged {
            status: if loading {
                ShellStatus::Loading
            } else {
                ShellStatus::Ready
            },
        });
    }

    /// Host favicon hook.
    pub fn on_surface_favicon(&self, surface_id: SurfaceId, favicon: Option<String>) {
        let mut registry = lock_unpoisoned(&self.registry);
        if let Some(context_id) = registry.context_id_for_surface(surface_id) {
            registry.set_favicon(context_id, favicon);
        }
    }

    /// Address-bar navigation on the active context.
    pub async fn navigate_address(&self, url: &str) -> GateOutcome {
        let context_id = lock_unpoisoned(&self.registry).active_id();
        self.gate
            .submit(NavigationRequest {
                context_id,
                url: url.to_string(),
                trigger: NavigationTrigger::AddressBar,
            })
            .await
    }

    async fn open_tab(&self) {
        let (context_id, surface_id, url, title) = {
            let mut registry = lock_unpoisoned(&self.registry);
            let id = registry.create_tab(None);
            let context = registry.get(id).expect("tab just created");
            (
                id,
                context.surface().id(),
                registry.home_url().to_string(),
                context.title.clone(),
            )
        };
        self.emit(ShellEvent::TabOpened {
            context_id,
            url: String::new(),
            title,
        });
        self.emit(ShellEvent::TabActivated {
            context_id,
            url: String::new(),
        });
        self.on_surface_will_navigate(surface_id, &url).await;
    }

    async fn open_in_new_tab(&self, url: &str) {
        let outcome = {
            let mut registry = lock_unpoisoned(&self.registry);
            registry.open_or_focus(url)
        };
        match outcome {
            OpenOutcome::Created(context_id) => {
                let (surface_id, title) = {
                    let registry = lock_unpoisoned(&self.registry);
                    let context = registry.get(context_id).expect("tab just created");
                    (context.surface().id(), context.title.clone())
                };
                self.emit(ShellEvent::TabOpened {
                    context_id,
                    url: String::new(),
                    title,
                });
                self.emit(ShellEvent::TabActivated {
                    context_id,
                    url: String::new(),
                });
                self.on_surface_will_navigate(surface_id, url).await;
            }
            OpenOutcome::Focused(context_id) => {
                let url = lock_unpoisoned(&self.registry)
                    .get(context_id)
                    .map(|context| context.url.clone())
                    .unwrap_or_default();
                self.emit(ShellEvent::TabActivated { context_id, url });
            }
            OpenOutcome::SuppressedDuplicate => {
                tracing::debug!(url, "duplicate open suppressed");
            }
        }
    }

    /// Closes a tab; closing the last remaining tab is rejected.
    pub fn close_tab(&self, context_id: ContextId) {
        let result = {
            let mut registry = lock_unpoisoned(&self.registry);
            if registry.close_tab(context_id) {
                let active = registry.active();
                Some((active.id, active.url.clone()))
            } else {
                None
            }
        };
        match result {
            Some((active_id, active_url)) => {
                self.emit(ShellEvent::TabClosed { context_id });
                self.emit(ShellEvent::TabActivated {
                    context_id: active_id,
                    url: active_url,
                });
            }
            None => {
                tracing::debug!(context_id, "tab close rejected");
            }
        }
    }

    fn cycle_tab(&self, forward: bool) {
        let (context_id, url, secure) = {
            let mut registry = lock_unpoisoned(&self.registry);
            let id = if forward {
                registry.next_tab()
            } else {
                registry.prev_tab()
            };
            let context = registry.active();
            (id, context.url.clone(), context.secure)
        };
        self.emit(ShellEvent::TabActivated { context_id, url });
        self.emit(ShellEvent::SecurityStateChanged {
            context_id,
            secure,
        });
    }

    async fn navigate_history(&self, back: bool) {
        let request = {
            let registry = lock_unpoisoned(&self.registry);
            let context = registry.active();
            let target = if back {
                context.surface().back_target()
            } else {
                context.surface().forward_target()
            };
            target.map(|url| NavigationRequest {
                context_id: context.id,
                url: url.to_string(),
                trigger: NavigationTrigger::BackForward,
            })
        };
        if let Some(request) = request {
            let _ = self.gate.submit(request).await;
        }
    }

    async fn reload_active(&self) {
        let request = {
            let registry = lock_unpoisoned(&self.registry);
            let context = registry.active();
            context.surface().current_url().map(|url| NavigationRequest {
                context_id: context.id,
                url: url.to_string(),
                trigger: NavigationTrigger::Reload,
            })
        };
        if let Some(request) = request {
            let _ = self.gate.submit(request).await;
        }
    }

    /// The home page is the curated safe start page; navigating there never
    /// consults the gate.
    fn navigate_home(&self) {
        let (context_id, url, title) = {
            let mut registry = lock_unpoisoned(&self.registry);
            let id = registry.active_id();
            let home = registry.home_url().to_string();
            registry.apply_allowed(id, &home, NavigationTrigger::Programmatic);
            let title = registry
                .get(id)
                .map(|context| context.title.clone())
                .unwrap_or_default();
            (id, home, title)
        };
        self.emit(ShellEvent::NavigationCommitted {
            context_id,
            url,
            title,
        });
        self.emit(ShellEvent::SecurityStateChanged {
            context_id,
            secure: true,
        });
    }

    /// `check-url-reachability` request call.
    pub async fn check_reachability_request(&self, url: &str) -> Reachability {
        self.probe.probe(url).await
    }

    /// `check-url` request call: rating verdict plus a user-facing message.
    pub async fn check_url_request(&self, url: &str) -> UrlCheckResponse {
        match self.oracle.check_url_strict(url).await {
            Ok(Verdict::Allowed) => UrlCheckResponse {
                allowed: true,
                url: url.to_string(),
                message: None,
            },
            Ok(Verdict::Blocked) => UrlCheckResponse {
                allowed: false,
                url: url.to_string(),
                message: Some(MSG_NOT_SUITABLE.to_string()),
            },
            Err(err) => {
                tracing::warn!(url, error = %err, "url check request failed");
                UrlCheckResponse {
                    allowed: false,
                    url: url.to_string(),
                    message: Some(MSG_CHECK_FAILED.to_string()),
                }
            }
        }
    }

    /// `navigate-to-url` request call: normalizes address input, then checks.
    pub async fn navigate_to_url_request(&self, raw: &str) -> UrlCheckResponse {
        let Some(url) = crate::address::normalize_address_input(raw) else {
            return UrlCheckResponse {
                allowed: false,
                url: raw.to_string(),
                message: Some(MSG_INVALID_ADDRESS.to_string()),
            };
        };
        if !crate::address::is_valid_web_url(&url) {
            return UrlCheckResponse {
                allowed: false,
                url,
                message: Some(MSG_INVALID_ADDRESS.to_string()),
            };
        }
        self.check_url_request(&url).await
    }

    /// `navigate-home` request call.
    pub fn navigate_home_request(&self) -> UrlCheckResponse {
        UrlCheckResponse {
            allowed: true,
            url: self.config.home_url.clone(),
            message: None,
        }
    }

    /// `navigate-webview` request call: direct load on a specific surface,
    /// used after the caller already holds an allow verdict.
    pub async fn navigate_surface_request(
        &self,
        surface_id: SurfaceId,
        url: &str,
    ) -> SurfaceNavigateResponse {
        let committed = {
            let mut registry = lock_unpoisoned(&self.registry);
            match registry.context_id_for_surface(surface_id) {
                Some(context_id) => {
                    registry.apply_allowed(context_id, url, NavigationTrigger::Programmatic);
                    registry
                        .get(context_id)
                        .map(|context| (context_id, context.title.clone()))
                }
                None => None,
            }
        };
        match committed {
            Some((context_id, title)) => {
                self.emit(ShellEvent::NavigationCommitted {
                    context_id,
                    url: url.to_string(),
                    title,
                });
                SurfaceNavigateResponse {
                    success: true,
                    error: None,
                }
            }
            None => SurfaceNavigateResponse {
                success: false,
                error: Some("surface not found".to_string()),
            },
        }
    }

    /// Parental override from a blocked page.
    pub async fn override_blocked(
        &self,
        context_id: ContextId,
        url: &str,
        pin: &str,
    ) -> OverrideOutcome {
        self.gate.override_with_pin(context_id, url, pin).await
    }

    /// Download lifecycle notices pass through to the UI unmodified.
    pub fn relay_download(&self, notice: DownloadNotice) {
        self.emit(ShellEvent::Download(notice));
    }

    pub fn is_first_run(&self) -> bool {
        lock_unpoisoned(&self.policy).is_first_run()
    }

    /// Completes the setup wizard's contract.
    pub fn complete_first_run(
        &self,
        pin: &str,
        whitelist: Vec<String>,
    ) -> Result<(), PolicyStoreError> {
        lock_unpoisoned(&self.policy).complete_first_run(pin, whitelist)
    }

    pub fn stats(&self) -> GateStatsSnapshot {
        self.stats.snapshot()
    }

    /// Handle to the registry for collaborators that render tab state.
    pub fn registry_handle(&self) -> Arc<Mutex<BrowsingContextRegistry>> {
        Arc::clone(&self.registry)
    }

    pub fn tab_count(&self) -> usize {
        lock_unpoisoned(&self.registry).len()
    }

    pub fn active_context_id(&self) -> ContextId {
        lock_unpoisoned(&self.registry).active_id()
    }

    pub fn active_url(&self) -> String {
        lock_unpoisoned(&self.registry).active().url.clone()
    }

    fn emit(&self, event: ShellEvent) {
        let _ = self.events.send(event);
    }
}
