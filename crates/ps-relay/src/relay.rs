//! Host-side navigation relay: tabs, history, and sequenced background loads.

use crate::loader::LoadedPage;
use crate::loader::PageLoader;
use crate::tab::Tab;
use crate::tab::TabId;
use ps_core::NavigationFailure;
use ps_core::PeriscopeError;
use ps_core::PeriscopeResult;
use ps_ipc::ChannelConfig;
use ps_ipc::NavigationIntent;
use ps_ipc::parse_navigation_intent;
use ps_net::normalize::UrlNormalizer;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use std::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

const NAVIGATION_THREAD_STACK_SIZE: usize = 2 * 1024 * 1024;

#[derive(Debug)]
struct LoadResult {
    tab: TabId,
    sequence: u64,
    result: Result<LoadedPage, NavigationFailure>,
}

/// Owns every tab. All state changes happen through `&mut self`.
///
/// Operations that start a load return its sequence number, or `None` when
/// nothing was started (rejected input, ignored message, end of history).
pub struct NavigationRelay {
    loader: Arc<dyn PageLoader>,
    normalizer: UrlNormalizer,
    channel: ChannelConfig,
    tabs: BTreeMap<TabId, Tab>,
    next_tab_id: u64,
    results_tx: mpsc::Sender<LoadResult>,
    results_rx: mpsc::Receiver<LoadResult>,
}

impl NavigationRelay {
    pub fn new(loader: Arc<dyn PageLoader>, normalizer: UrlNormalizer) -> Self {
        let (results_tx, results_rx) = mpsc::channel();
        Self {
            loader,
            normalizer,
            channel: ChannelConfig::default(),
            tabs: BTreeMap::new(),
            next_tab_id: 1,
            results_tx,
            results_rx,
        }
    }

    pub fn open_tab(&mut self) -> TabId {
        let id = TabId::new(self.next_tab_id);
        self.next_tab_id += 1;
        self.tabs.insert(id, Tab::new(id));
        debug!(tab = %id, "opened tab");
        id
    }

    /// Pending results for a closed tab are dropped when they arrive.
    pub fn close_tab(&mut self, id: TabId) -> bool {
        let closed = self.tabs.remove(&id).is_some();
        if closed {
            debug!(tab = %id, "closed tab");
        }
        closed
    }

    pub fn tab(&self, id: TabId) -> Option<&Tab> {
        self.tabs.get(&id)
    }

    pub fn tabs(&self) -> impl Iterator<Item = &Tab> {
        self.tabs.values()
    }

    /// Address-bar submission: URL, bare host, or search text.
    pub fn submit_address(&mut self, id: TabId, text: &str) -> PeriscopeResult<Option<u64>> {
        let normalized = self.normalizer.normalize(text);
        let tab = self.tab_mut(id)?;
        match normalized {
            Ok(url) => {
                tab.push_history(url.clone());
                self.start_load(id, NavigationIntent::get(url)).map(Some)
            }
            Err(failure) => {
                info!(tab = %id, %failure, "address rejected");
                tab.reject_input(&failure);
                Ok(None)
            }
        }
    }

    /// Link click or form submit relayed from the frame. The URL is already absolute.
    pub fn receive_navigation_intent(
        &mut self,
        id: TabId,
        intent: NavigationIntent,
    ) -> PeriscopeResult<u64> {
        self.tab_mut(id)?.push_history(intent.url.clone());
        self.start_load(id, intent)
    }

    /// Raw `postMessage` payload. Oversized, unrecognized, or relative-URL
    /// messages are ignored.
    pub fn receive_frame_message(&mut self, id: TabId, raw: &str) -> PeriscopeResult<Option<u64>> {
        self.tab_mut(id)?;
        match parse_navigation_intent(raw, &self.channel) {
            Ok(intent) => self.receive_navigation_intent(id, intent).map(Some),
            Err(error) => {
                debug!(tab = %id, code = error.code, "ignoring frame message");
                Ok(None)
            }
        }
    }

    pub fn back(&mut self, id: TabId) -> PeriscopeResult<Option<u64>> {
        self.step(id, false)
    }

    pub fn forward(&mut self, id: TabId) -> PeriscopeResult<Option<u64>> {
        self.step(id, true)
    }

    /// Reloads the committed URL with a GET. History is unchanged.
    pub fn refresh(&mut self, id: TabId) -> PeriscopeResult<Option<u64>> {
        let Some(url) = self.tab_mut(id)?.committed_url().cloned() else {
            return Ok(None);
        };
        self.start_load(id, NavigationIntent::get(url)).map(Some)
    }

    fn step(&mut self, id: TabId, forward: bool) -> PeriscopeResult<Option<u64>> {
        match self.tab_mut(id)?.step_history(forward) {
            Some(url) => self.start_load(id, NavigationIntent::get(url)).map(Some),
            None => Ok(None),
        }
    }

    fn tab_mut(&mut self, id: TabId) -> PeriscopeResult<&mut Tab> {
        self.tabs
            .get_mut(&id)
            .ok_or_else(|| PeriscopeError::new("relay.tab_unknown", format!("no such tab `{id}`")))
    }

    fn start_load(&mut self, id: TabId, intent: NavigationIntent) -> PeriscopeResult<u64> {
        let tab = self.tab_mut(id)?;
        let sequence = tab.begin_load();
        info!(tab = %id, sequence, url = %intent.url, method = ?intent.method, "navigating");

        let loader = Arc::clone(&self.loader);
        let tx = self.results_tx.clone();
        let nav_job = move || {
            let result = loader.load(&intent);
            let _ = tx.send(LoadResult {
                tab: id,
                sequence,
                result,
            });
        };

        let spawned = thread::Builder::new()
            .name("periscope-nav".to_owned())
            .stack_size(NAVIGATION_THREAD_STACK_SIZE)
            .spawn(nav_job);
        if let Err(error) = spawned {
            let failure = NavigationFailure::Network {
                target: String::from("periscope"),
                detail: "failed to start the navigation worker".to_owned(),
            };
            self.tab_mut(id)?.apply_failure(&failure);
            return Err(PeriscopeError::new(
                "relay.spawn_failed",
                format!("failed to spawn navigation worker: {error}"),
            ));
        }

        Ok(sequence)
    }

    /// Applies every finished load without blocking. Returns how many were applied.
    pub fn poll(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(result) = self.results_rx.try_recv() {
            if self.apply(result) {
                applied += 1;
            }
        }
        applied
    }

    /// Blocks for at most `timeout` for one finished load and handles it.
    /// Returns `false` when nothing arrived.
    pub fn pump(&mut self, timeout: Duration) -> bool {
        match self.results_rx.recv_timeout(timeout) {
            Ok(result) => {
                self.apply(result);
                true
            }
            Err(_) => false,
        }
    }

    /// Pumps until the tab is no longer loading. `false` on timeout or unknown tab.
    pub fn wait_until_settled(&mut self, id: TabId, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match self.tabs.get(&id) {
                Some(tab) if !tab.is_loading() => return true,
                Some(_) => {}
                None => return false,
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            self.pump(remaining);
        }
    }

    fn apply(&mut self, result: LoadResult) -> bool {
        let LoadResult {
            tab: id,
            sequence,
            result,
        } = result;

        let Some(tab) = self.tabs.get_mut(&id) else {
            debug!(tab = %id, sequence, "discarding result for closed tab");
            return false;
        };
        if sequence != tab.latest_sequence() {
            debug!(
                tab = %id,
                sequence,
                latest = tab.latest_sequence(),
                "discarding superseded result"
            );
            return false;
        }

        match result {
            Ok(page) => {
                info!(tab = %id, sequence, url = %page.final_url, degraded = page.degraded, "page loaded");
                tab.apply_success(page);
            }
            Err(failure) => {
                warn!(tab = %id, sequence, kind = failure.kind().as_str(), %failure, "navigation failed");
                tab.apply_failure(&failure);
            }
        }
        true
    }
}
