//! Per-page bookkeeping kept alongside a pooled connection.

use serde::{Deserialize, Serialize};

pub const DEFAULT_VIEWPORT_WIDTH: u32 = 1280;
pub const DEFAULT_VIEWPORT_HEIGHT: u32 = 720;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: DEFAULT_VIEWPORT_WIDTH,
            height: DEFAULT_VIEWPORT_HEIGHT,
        }
    }
}

/// Linear back/forward history for one page.
///
/// Stepping back and then navigating somewhere new discards the forward
/// entries, the same branch semantics a browser address bar has.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NavigationHistory {
    entries: Vec<String>,
    current: Option<usize>,
}

impl NavigationHistory {
    /// Append a committed navigation, truncating any forward entries first.
    pub fn record(&mut self, url: &str) {
        if let Some(index) = self.current {
            self.entries.truncate(index + 1);
        }
        self.entries.push(url.to_string());
        self.current = Some(self.entries.len() - 1);
    }

    pub fn can_go_back(&self) -> bool {
        matches!(self.current, Some(index) if index > 0)
    }

    pub fn can_go_forward(&self) -> bool {
        matches!(self.current, Some(index) if index + 1 < self.entries.len())
    }

    /// Step to the previous entry, returning it. Does not touch the entry
    /// list itself.
    pub fn step_back(&mut self) -> Option<String> {
        let index = self.current.filter(|index| *index > 0)?;
        self.current = Some(index - 1);
        self.entries.get(index - 1).cloned()
    }

    /// Step to the next entry, returning it.
    pub fn step_forward(&mut self) -> Option<String> {
        let index = self.current?;
        let next = self.entries.get(index + 1).cloned()?;
        self.current = Some(index + 1);
        Some(next)
    }

    pub fn current_url(&self) -> Option<&str> {
        self.current
            .and_then(|index| self.entries.get(index))
            .map(String::as_str)
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Snapshot of what the controller knows about one page.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PageState {
    pub url: String,
    pub title: String,
    pub is_loading: bool,
    pub is_loaded: bool,
    /// Navigation failures observed on this page, monotonic.
    pub error_count: u32,
    pub viewport: Viewport,
    pub history: NavigationHistory,
}

impl PageState {
    pub fn new() -> Self {
        Self {
            url: "about:blank".to_string(),
            title: String::new(),
            is_loading: false,
            is_loaded: false,
            error_count: 0,
            viewport: Viewport::default(),
            history: NavigationHistory::default(),
        }
    }
}

impl Default for PageState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_advances_the_cursor() {
        let mut history = NavigationHistory::default();
        history.record("https://a.test/");
        history.record("https://b.test/");

        assert_eq!(history.len(), 2);
        assert_eq!(history.current_index(), Some(1));
        assert_eq!(history.current_url(), Some("https://b.test/"));
        assert!(history.can_go_back());
        assert!(!history.can_go_forward());
    }

    #[test]
    fn stepping_back_then_recording_discards_forward_entries() {
        let mut history = NavigationHistory::default();
        history.record("https://a.test/");
        history.record("https://b.test/");

        assert_eq!(history.step_back().as_deref(), Some("https://a.test/"));
        assert!(history.can_go_forward());

        history.record("https://c.test/");
        assert_eq!(history.entries(), ["https://a.test/", "https://c.test/"]);
        assert!(!history.can_go_forward());
        assert_eq!(history.current_url(), Some("https://c.test/"));
    }

    #[test]
    fn stepping_past_either_end_is_refused() {
        let mut history = NavigationHistory::default();
        assert_eq!(history.step_back(), None);
        assert_eq!(history.step_forward(), None);

        history.record("https://only.test/");
        assert_eq!(history.step_back(), None);
        assert_eq!(history.step_forward(), None);
        assert_eq!(history.current_index(), Some(0));
    }

    #[test]
    fn fresh_page_state_has_the_default_viewport() {
        let state = PageState::new();
        assert_eq!(state.viewport, Viewport { width: 1280, height: 720 });
        assert_eq!(state.url, "about:blank");
        assert!(!state.is_loaded);
        assert!(state.history.is_empty());
    }
}
