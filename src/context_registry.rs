use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::address;
use crate::navigation_gate::NavigationTrigger;

pub type ContextId = u64;
pub type SurfaceId = u64;

/// Blocked-page state rendered in place of the content surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedNotice {
    pub message: String,
    pub search_fallback: Option<String>,
    pub override_candidate: Option<String>,
}

/// The navigable content surface exclusively owned by one browsing context.
///
/// Keeps a linear session history with a cursor; loading a URL truncates any
/// forward entries. The surface has no current URL until its first load.
#[derive(Debug)]
pub struct ContentSurface {
    id: SurfaceId,
    history: Vec<String>,
    cursor: usize,
}

impl ContentSurface {
    fn new(id: SurfaceId) -> Self {
        Self {
            id,
            history: Vec::new(),
            cursor: 0,
        }
    }

    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn current_url(&self) -> Option<&str> {
        self.history.get(self.cursor).map(String::as_str)
    }

    pub fn load(&mut self, url: &str) {
        if !self.history.is_empty() {
            self.history.truncate(self.cursor + 1);
        }
        self.history.push(url.to_string());
        self.cursor = self.history.len() - 1;
    }

    pub fn can_go_back(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_go_forward(&self) -> bool {
        !self.history.is_empty() && self.cursor + 1 < self.history.len()
    }

    pub fn back_target(&self) -> Option<&str> {
        if self.can_go_back() {
            self.history.get(self.cursor - 1).map(String::as_str)
        } else {
            None
        }
    }

    pub fn forward_target(&self) -> Option<&str> {
        if self.can_go_forward() {
            self.history.get(self.cursor + 1).map(String::as_str)
        } else {
            None
        }
    }

    fn go_back(&mut self) -> Option<&str> {
        if self.can_go_back() {
            self.cursor -= 1;
            self.current_url()
        } else {
            None
        }
    }

    fn go_forward(&mut self) -> Option<&str> {
        if self.can_go_forward() {
            self.cursor += 1;
            self.current_url()
        } else {
            None
        }
    }
}

/// One tab: identity, display state, and the owned content surface.
#[derive(Debug)]
pub struct BrowsingContext {
    pub id: ContextId,
    pub url: String,
    pub title: String,
    pub favicon: Option<String>,
    pub navigating: bool,
    pub loading: bool,
    pub secure: bool,
    pub blocked: Option<BlockedNotice>,
    surface: ContentSurface,
}

impl BrowsingContext {
    pub fn surface(&self) -> &ContentSurface {
        &self.surface
    }
}

/// Result of routing a popup/new-tab request into the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    Created(ContextId),
    Focused(ContextId),
    SuppressedDuplicate,
}

/// The set of live browsing contexts.
///
/// Owns context creation and destruction, the active-context pointer, and
/// the two duplicate-open suppressions: the existing-tab-with-same-URL check
/// and the short-lived recently-opened set that swallows double-fired host
/// open events. At least one context exists at all times.
pub struct BrowsingContextRegistry {
    contexts: BTreeMap<ContextId, BrowsingContext>,
    active: ContextId,
    next_context_id: ContextId,
    next_surface_id: SurfaceId,
    recently_opened: Vec<(String, Instant)>,
    duplicate_open_window: Duration,
    home_url: String,
}

impl BrowsingContextRegistry {
    pub fn new(home_url: impl Into<String>, duplicate_open_window: Duration) -> Self {
        let home_url = home_url.into();
        let mut registry = Self {
            contexts: BTreeMap::new(),
            active: 0,
            next_context_id: 0,
            next_surface_id: 0,
            recently_opened: Vec::new(),
            duplicate_open_window,
            home_url,
        };
        // The shell always starts with one tab already sitting on the home
        // page; its first load is the surface's unconditional initial
        // navigation.
        let initial = registry.create_tab(None);
        let home = registry.home_url.clone();
        registry.record_initial_load(initial, &home);
        registry
    }

    pub fn home_url(&self) -> &str {
        &self.home_url
    }

    /// Creates a tab with an empty surface and focuses it. The first load is
    /// performed separately through the host's pre-navigation hook.
    pub fn create_tab(&mut self, initial_url: Option<&str>) -> ContextId {
        let id = self.next_context_id;
        self.next_context_id += 1;
        let surface_id = self.next_surface_id;
        self.next_surface_id += 1;

        let title = match initial_url {
            Some(url) => address::tab_title_for(url),
            None => address::FALLBACK_TAB_TITLE.to_string(),
        };

        self.contexts.insert(
            id,
            BrowsingContext {
                id,
                url: String::new(),
                title,
                favicon: None,
                navigating: false,
                loading: false,
                secure: true,
                blocked: None,
                surface: ContentSurface::new(surface_id),
            },
        );
        self.active = id;
        id
    }

    /// Routes a popup/new-tab request: swallow double-fired events for the
    /// same URL within the suppression window, focus an existing tab already
    /// on that URL, or create a fresh one.
    pub fn open_or_focus(&mut self, url: &str) -> OpenOutcome {
        let now = Instant::now();
        self.recently_opened
            .retain(|(_, opened_at)| now.duration_since(*opened_at) < self.duplicate_open_window);

        if self.recently_opened.iter().any(|(opened, _)| opened == url) {
            return OpenOutcome::SuppressedDuplicate;
        }
        self.recently_opened.push((url.to_string(), now));

        if let Some(id) = self
            .contexts
            .values()
            .find(|context| context.url == url)
            .map(|context| context.id)
        {
            self.switch_to(id);
            return OpenOutcome::Focused(id);
        }

        OpenOutcome::Created(self.create_tab(Some(url)))
    }

    /// Destroys a context and its surface. Refuses to close the last tab.
    pub fn close_tab(&mut self, id: ContextId) -> bool {
        if self.contexts.len() <= 1 || !self.contexts.contains_key(&id) {
            return false;
        }
        self.contexts.remove(&id);
        if self.active == id {
            let survivor = *self.contexts.keys().next().expect("registry never empty");
            self.active = survivor;
        }
        true
    }

    pub fn switch_to(&mut self, id: ContextId) -> bool {
        if self.contexts.contains_key(&id) {
            self.active = id;
            true
        } else {
            false
        }
    }

    pub fn next_tab(&mut self) -> ContextId {
        self.cycle(1)
    }

    pub fn prev_tab(&mut self) -> ContextId {
        self.cycle(-1)
    }

    fn cycle(&mut self, step: isize) -> ContextId {
        let ids: Vec<ContextId> = self.contexts.keys().copied().collect();
        let current = ids.iter().position(|id| *id == self.active).unwrap_or(0);
        let len = ids.len() as isize;
        let next = (current as isize + step).rem_euclid(len) as usize;
        self.active = ids[next];
        self.active
    }

    pub fn active_id(&self) -> ContextId {
        self.active
    }

    pub fn active(&self) -> &BrowsingContext {
        self.contexts.get(&self.active).expect("registry never empty")
    }

    pub fn get(&self, id: ContextId) -> Option<&BrowsingContext> {
        self.contexts.get(&id)
    }

    pub fn get_mut(&mut self, id: ContextId) -> Option<&mut BrowsingContext> {
        self.contexts.get_mut(&id)
    }

    pub fn context_id_for_surface(&self, surface_id: SurfaceId) -> Option<ContextId> {
        self.contexts
            .values()
            .find(|context| context.surface.id == surface_id)
            .map(|context| context.id)
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn set_favicon(&mut self, id: ContextId, favicon: Option<String>) {
        if let Some(context) = self.contexts.get_mut(&id) {
            context.favicon = favicon;
        }
    }

    /// Claims the per-context navigation mutex. Returns false when a gate
    /// evaluation is already in flight for this context.
    pub fn try_begin_navigation(&mut self, id: ContextId) -> bool {
        match self.contexts.get_mut(&id) {
            Some(context) if !context.navigating => {
                context.navigating = true;
                context.loading = true;
                true
            }
            _ => false,
        }
    }

    /// Releases the navigation mutex. A no-op for destroyed contexts.
    pub fn end_navigation(&mut self, id: ContextId) {
        if let Some(context) = self.contexts.get_mut(&id) {
            context.navigating = false;
            context.loading = false;
        }
    }

    /// Commits the unconditional first navigation of a fresh surface.
    pub fn record_initial_load(&mut self, id: ContextId, url: &str) {
        if let Some(context) = self.contexts.get_mut(&id) {
            context.surface.load(url);
            context.url = url.to_string();
            context.title = address::tab_title_for(url);
            context.secure = true;
        }
    }

    /// Commits an allowed navigation on the target context. History steps
    /// move the cursor instead of appending; reloads leave history alone.
    pub fn apply_allowed(&mut self, id: ContextId, url: &str, trigger: NavigationTrigger) {
        let Some(context) = self.contexts.get_mut(&id) else {
            return;
        };
        match trigger {
            NavigationTrigger::BackForward => {
                let is_back = context.surface.back_target() == Some(url);
                let is_forward = context.surface.forward_target() == Some(url);
                if is_back {
                    context.surface.go_back();
                } else if is_forward {
                    context.surface.go_forward();
                } else {
                    context.surface.load(url);
                }
            }
            NavigationTrigger::Reload => {
                if context.surface.current_url().is_none() {
                    context.surface.load(url);
                }
            }
            _ => context.surface.load(url),
        }
        context.url = url.to_string();
        context.title = address::tab_title_for(url);
        context.blocked = None;
        context.secure = true;
        context.loading = false;
    }

    /// Renders the blocked state on the target context.
    pub fn apply_blocked(&mut self, id: ContextId, notice: BlockedNotice) {
        if let Some(context) = self.contexts.get_mut(&id) {
            context.blocked = Some(notice);
            context.secure = false;
            context.loading = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> BrowsingContextRegistry {
        BrowsingContextRegistry::new("https://www.fragfinn.de", Duration::from_millis(500))
    }

    #[test]
    fn starts_with_one_tab_on_the_home_page() {
        let registry = registry();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.active().url, "https://www.fragfinn.de");
        assert_eq!(
            registry.active().surface().current_url(),
            Some("https://www.fragfinn.de")
        );
    }

    #[test]
    fn last_tab_cannot_be_closed() {
        let mut registry = registry();
        let only = registry.active_id();
        assert!(!registry.close_tab(only));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn closing_the_active_tab_activates_the_lowest_survivor() {
        let mut registry = registry();
        let first = registry.active_id();
        let second = registry.create_tab(None);
        let third = registry.create_tab(None);
        assert_eq!(registry.active_id(), third);

        assert!(registry.close_tab(third));
        assert_eq!(registry.active_id(), first);

        // Closing a background tab leaves the active pointer alone.
        registry.switch_to(second);
        assert!(registry.close_tab(first));
        assert_eq!(registry.active_id(), second);
    }

    #[test]
    fn duplicate_opens_within_window_are_suppressed() {
        let mut registry =
            BrowsingContextRegistry::new("https://www.fragfinn.de", Duration::from_millis(500));
        let first = registry.open_or_focus("https://popup.example");
        let second = registry.open_or_focus("https://popup.example");

        assert!(matches!(first, OpenOutcome::Created(_)));
        assert_eq!(second, OpenOutcome::SuppressedDuplicate);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn opens_are_allowed_again_after_the_window() {
        let mut registry =
            BrowsingContextRegistry::new("https://www.fragfinn.de", Duration::from_millis(30));
        let OpenOutcome::Created(id) = registry.open_or_focus("https://popup.example") else {
            panic!("first open must create");
        };
        registry.record_initial_load(id, "https://popup.example");

        std::thread::sleep(Duration::from_millis(40));
        // Same URL, outside the window: the existing-tab check focuses it.
        assert_eq!(
            registry.open_or_focus("https://popup.example"),
            OpenOutcome::Focused(id)
        );
    }

    #[test]
    fn existing_tab_with_same_url_is_focused() {
        let mut registry = registry();
        // The home tab already carries the home URL.
        let home = registry.active_id();
        registry.create_tab(None);
        std::thread::sleep(Duration::from_millis(1));

        let outcome = registry.open_or_focus("https://www.fragfinn.de");
        assert_eq!(outcome, OpenOutcome::Focused(home));
        assert_eq!(registry.active_id(), home);
    }

    #[test]
    fn tab_cycling_wraps_in_id_order() {
        let mut registry = registry();
        let first = registry.active_id();
        let second = registry.create_tab(None);
        let third = registry.create_tab(None);

        assert_eq!(registry.next_tab(), first);
        assert_eq!(registry.next_tab(), second);
        assert_eq!(registry.prev_tab(), first);
        assert_eq!(registry.prev_tab(), third);
    }

    #[test]
    fn navigation_mutex_is_exclusive_and_releasable() {
        let mut registry = registry();
        let id = registry.active_id();

        assert!(registry.try_begin_navigation(id));
        assert!(!registry.try_begin_navigation(id));
        assert!(registry.get(id).unwrap().loading);

        registry.end_navigation(id);
        assert!(!registry.get(id).unwrap().navigating);
        assert!(registry.try_begin_navigation(id));
    }

    #[test]
    fn history_moves_and_truncates() {
        let mut registry = registry();
        let id = registry.active_id();

        registry.apply_allowed(id, "https://a.example", NavigationTrigger::AddressBar);
        registry.apply_allowed(id, "https://b.example", NavigationTrigger::AddressBar);

        let context = registry.get(id).unwrap();
        assert_eq!(context.surface().back_target(), Some("https://a.example"));

        registry.apply_allowed(id, "https://a.example", NavigationTrigger::BackForward);
        let context = registry.get(id).unwrap();
        assert_eq!(context.surface().current_url(), Some("https://a.example"));
        assert_eq!(context.surface().forward_target(), Some("https://b.example"));

        // A fresh load from the middle of history drops the forward entry.
        registry.apply_allowed(id, "https://c.example", NavigationTrigger::LinkOrPopup);
        let context = registry.get(id).unwrap();
        assert!(!context.surface().can_go_forward());
        assert_eq!(context.surface().back_target(), Some("https://a.example"));
    }

    #[test]
    fn reload_keeps_history_in_place() {
        let mut registry = registry();
        let id = registry.active_id();
        registry.apply_allowed(id, "https://a.example", NavigationTrigger::AddressBar);
        registry.apply_allowed(id, "https://a.example", NavigationTrigger::Reload);

        let context = registry.get(id).unwrap();
        assert_eq!(context.surface().current_url(), Some("https://a.example"));
        assert!(context.surface().can_go_back());
        assert!(!context.surface().can_go_forward());
    }

    #[test]
    fn blocked_state_clears_on_allowed_navigation() {
        let mut registry = registry();
        let id = registry.active_id();

        registry.apply_blocked(
            id,
            BlockedNotice {
                message: "no".to_string(),
                search_fallback: None,
                override_candidate: None,
            },
        );
        let context = registry.get(id).unwrap();
        assert!(context.blocked.is_some());
        assert!(!context.secure);

        registry.apply_allowed(id, "https://ok.example", NavigationTrigger::AddressBar);
        let context = registry.get(id).unwrap();
        assert!(context.blocked.is_none());
        assert!(context.secure);
    }

    #[test]
    fn surfaces_map_back_to_their_contexts() {
        let mut registry = registry();
        let id = registry.create_tab(Some("https://popup.example"));
        let surface_id = registry.get(id).unwrap().surface().id();
        assert_eq!(registry.context_id_for_surface(surface_id), Some(id));
        assert_eq!(registry.context_id_for_surface(9999), None);

        registry.set_favicon(id, Some("https://popup.example/favicon.ico".to_string()));
        assert!(registry.get(id).unwrap().favicon.is_some());
    }
}
