//! In-memory stand-ins for the network-facing collaborators.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use docbot_core::{BoxFuture, Inventory, InventoryError, InventorySource, PageRenderer, RenderError};
use tokio::sync::watch;

/// What a scripted fetch returns.
#[derive(Debug, Clone)]
pub enum Scripted {
    Inventory(Inventory),
    Malformed,
    Unreachable,
}

/// [`InventorySource`] answering from per-URL scripts.
///
/// Each URL has a queue of responses; the last one repeats once the queue
/// is down to it. Unscripted URLs are unreachable. Fetches can be held open
/// with [`pause`](Self::pause) to observe the engine mid-refresh; a held
/// fetch has already taken its response from the queue.
pub struct ScriptedInventorySource {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    fetches: Mutex<HashMap<String, usize>>,
    started: watch::Sender<usize>,
    paused: watch::Sender<bool>,
}

impl Default for ScriptedInventorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedInventorySource {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::default(),
            fetches: Mutex::default(),
            started: watch::channel(0).0,
            paused: watch::channel(false).0,
        }
    }

    /// Queue a response for `url`.
    pub fn respond(&self, url: &str, response: Scripted) -> &Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(response);
        self
    }

    /// Queue an inventory built from `(group, name, location)` rows.
    pub fn respond_rows(&self, url: &str, rows: &[(&str, &str, &str)]) -> &Self {
        self.respond(url, Scripted::Inventory(Inventory::from_rows(rows.iter().copied())))
    }

    /// Replace every queued response for `url`.
    pub fn reset(&self, url: &str, response: Scripted) {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), VecDeque::from([response]));
    }

    /// Number of fetches of `url` so far.
    pub fn fetch_count(&self, url: &str) -> usize {
        self.fetches.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    /// Make subsequent fetches block until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    /// Wait until at least `n` fetches have started in total.
    pub async fn wait_for_fetches(&self, n: usize) {
        let mut rx = self.started.subscribe();
        let _ = rx.wait_for(|started| *started >= n).await;
    }

    fn next_response(&self, url: &str) -> Scripted {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(Scripted::Unreachable),
            Some(queue) => queue.front().cloned().unwrap_or(Scripted::Unreachable),
            None => Scripted::Unreachable,
        }
    }
}

impl InventorySource for ScriptedInventorySource {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Inventory, InventoryError>> {
        Box::pin(async move {
            *self.fetches.lock().unwrap().entry(url.to_string()).or_default() += 1;
            let response = self.next_response(url);
            self.started.send_modify(|started| *started += 1);

            let mut paused = self.paused.subscribe();
            let _ = paused.wait_for(|paused| !*paused).await;

            match response {
                Scripted::Inventory(inventory) => Ok(inventory),
                Scripted::Malformed => Err(InventoryError::Malformed {
                    url: url.to_string(),
                    reason: "Inventory missing project or version header.".to_string(),
                }),
                Scripted::Unreachable => Err(InventoryError::Unreachable {
                    url: url.to_string(),
                    attempts: 3,
                    reason: "connection refused".to_string(),
                }),
            }
        })
    }
}

/// [`PageRenderer`] that renders `"{url}#{fragment}"` and counts calls.
#[derive(Default)]
pub struct CountingRenderer {
    calls: AtomicUsize,
    rendered: Mutex<Vec<String>>,
    network_down: AtomicBool,
}

impl CountingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every `url#fragment` rendered so far, in order.
    pub fn rendered(&self) -> Vec<String> {
        self.rendered.lock().unwrap().clone()
    }

    /// Make renders fail with a network error.
    pub fn set_network_down(&self, down: bool) {
        self.network_down.store(down, Ordering::SeqCst);
    }
}

impl PageRenderer for CountingRenderer {
    fn render<'a>(
        &'a self,
        url: &'a str,
        fragment_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, RenderError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.network_down.load(Ordering::SeqCst) {
                return Err(RenderError::Network("connection reset".to_string()));
            }
            let markup = format!("{url}#{fragment_id}");
            self.rendered.lock().unwrap().push(markup.clone());
            Ok(Some(markup))
        })
    }
}
