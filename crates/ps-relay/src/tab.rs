//! Per-tab navigation state. Only the relay mutates a tab.

use crate::loader::LoadedPage;
use crate::loader::PageContent;
use core::fmt;
use ps_core::NavigationFailure;
use ps_net::url::TargetUrl;

/// Tab identifier. Never reused within one relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TabId(u64);

impl TabId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tab-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TabState {
    #[default]
    Idle,
    Loading,
    Loaded,
    Failed,
}

/// What the rendering surface shows for a tab right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface<'a> {
    Blank,
    Loading,
    Content(&'a PageContent),
    Error(&'a str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tab {
    id: TabId,
    address_bar_text: String,
    committed_url: Option<TargetUrl>,
    history: Vec<TargetUrl>,
    history_cursor: usize,
    title: Option<String>,
    state: TabState,
    last_error: Option<String>,
    latest_sequence: u64,
    page: Option<LoadedPage>,
}

impl Tab {
    pub(crate) fn new(id: TabId) -> Self {
        Self {
            id,
            address_bar_text: String::new(),
            committed_url: None,
            history: Vec::new(),
            history_cursor: 0,
            title: None,
            state: TabState::Idle,
            last_error: None,
            latest_sequence: 0,
            page: None,
        }
    }

    pub fn id(&self) -> TabId {
        self.id
    }

    pub fn address_bar_text(&self) -> &str {
        &self.address_bar_text
    }

    pub fn committed_url(&self) -> Option<&TargetUrl> {
        self.committed_url.as_ref()
    }

    pub fn history(&self) -> &[TargetUrl] {
        &self.history
    }

    pub fn history_cursor(&self) -> usize {
        self.history_cursor
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn state(&self) -> TabState {
        self.state
    }

    /// User-facing message of the last failed attempt, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn latest_sequence(&self) -> u64 {
        self.latest_sequence
    }

    pub fn page(&self) -> Option<&LoadedPage> {
        self.page.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.state == TabState::Loading
    }

    pub fn can_go_back(&self) -> bool {
        !self.history.is_empty() && self.history_cursor > 0
    }

    pub fn can_go_forward(&self) -> bool {
        self.history_cursor + 1 < self.history.len()
    }

    pub fn surface(&self) -> Surface<'_> {
        match (self.state, &self.page, &self.last_error) {
            (TabState::Loading, _, _) => Surface::Loading,
            (TabState::Failed, _, Some(error)) => Surface::Error(error),
            (_, Some(page), _) => Surface::Content(&page.content),
            _ => Surface::Blank,
        }
    }

    /// Truncates forward history, appends `url`, and commits it.
    pub(crate) fn push_history(&mut self, url: TargetUrl) {
        if !self.history.is_empty() {
            self.history.truncate(self.history_cursor + 1);
        }
        self.history.push(url.clone());
        self.history_cursor = self.history.len() - 1;
        self.commit(url);
    }

    /// Moves the cursor by one entry and commits it; `None` at either end.
    pub(crate) fn step_history(&mut self, forward: bool) -> Option<TargetUrl> {
        let next = if forward {
            self.can_go_forward().then(|| self.history_cursor + 1)?
        } else {
            self.can_go_back().then(|| self.history_cursor - 1)?
        };

        let url = self.history.get(next)?.clone();
        self.history_cursor = next;
        self.commit(url.clone());
        Some(url)
    }

    fn commit(&mut self, url: TargetUrl) {
        self.address_bar_text = url.as_str().to_owned();
        self.committed_url = Some(url);
    }

    pub(crate) fn begin_load(&mut self) -> u64 {
        self.latest_sequence += 1;
        self.state = TabState::Loading;
        self.last_error = None;
        self.latest_sequence
    }

    pub(crate) fn reject_input(&mut self, failure: &NavigationFailure) {
        self.last_error = Some(failure.to_string());
    }

    /// Redirects rewrite the current history entry so it names the final URL.
    pub(crate) fn apply_success(&mut self, page: LoadedPage) {
        let final_url = page.final_url.clone();
        if let Some(entry) = self.history.get_mut(self.history_cursor) {
            *entry = final_url.clone();
        }
        self.title = Some(
            page.title
                .clone()
                .filter(|title| !title.trim().is_empty())
                .unwrap_or_else(|| final_url.host().to_owned()),
        );
        self.commit(final_url);
        self.state = TabState::Loaded;
        self.last_error = None;
        self.page = Some(page);
    }

    pub(crate) fn apply_failure(&mut self, failure: &NavigationFailure) {
        self.state = TabState::Failed;
        self.last_error = Some(failure.to_string());
        self.page = None;
    }
}
