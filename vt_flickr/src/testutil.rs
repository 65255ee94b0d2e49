//! Scripted network doubles.
//!
//! ```toml
//! [dev-dependencies]
//! vt_flickr = { workspace = true, features = ["testutil"] }
//! ```

use bytes::Bytes;
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::Semaphore;
use url::Url;
use vt_core::{Coordinates, Discovery, FetchError, NetworkError, Page, PhotoDescriptor};

use crate::{client::HttpFetch, search::PhotoSearch};

/// Blocks the requests it guards until released.
#[derive(Debug, Clone)]
pub struct Gate(Arc<Semaphore>);

impl Gate {
    fn new() -> Self {
        Self(Arc::new(Semaphore::new(0)))
    }

    pub fn release(&self) {
        self.0.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    async fn pass(&self) {
        // A closed gate never opens; the permit is only a signal.
        let _ = self.0.acquire().await;
    }
}

#[derive(Debug, Clone)]
enum Reply {
    Body(Bytes),
    Status(u16),
}

#[derive(Debug, Clone)]
struct Route {
    replies: Vec<Reply>,
    gate: Option<Gate>,
}

/// An [`HttpFetch`] that answers from a script keyed by exact URL.
///
/// A route with several replies hands them out in order and then repeats the
/// last one. Unscripted URLs get the fallback body, or HTTP 404 without one.
#[derive(Debug, Default)]
pub struct ScriptedHttp {
    routes: Mutex<HashMap<String, Route>>,
    fallback: Option<Bytes>,
    latency: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedHttp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers every unscripted URL with `body`.
    pub fn serving(body: impl Into<Bytes>) -> Self {
        Self {
            fallback: Some(body.into()),
            ..Self::default()
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn route(&self, url: &str, reply: Reply) {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        routes
            .entry(url.to_owned())
            .or_insert_with(|| Route {
                replies: Vec::new(),
                gate: None,
            })
            .replies
            .push(reply);
    }

    pub fn respond(&self, url: &str, body: impl Into<Bytes>) {
        self.route(url, Reply::Body(body.into()));
    }

    pub fn fail(&self, url: &str, status: u16) {
        self.route(url, Reply::Status(status));
    }

    /// Holds requests for `url` until the returned gate is released.
    pub fn hold(&self, url: &str) -> Gate {
        let gate = Gate::new();
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        routes
            .entry(url.to_owned())
            .or_insert_with(|| Route {
                replies: Vec::new(),
                gate: None,
            })
            .gate = Some(gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls().iter().filter(|c| *c == url).count()
    }
}

#[async_trait::async_trait]
impl HttpFetch for ScriptedHttp {
    async fn get(&self, url: &Url) -> Result<Bytes, NetworkError> {
        let key = url.to_string();
        let attempt = {
            let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
            calls.push(key.clone());
            calls.iter().filter(|c| **c == key).count() - 1
        };

        let (reply, gate) = {
            let routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
            match routes.get(&key) {
                Some(route) => {
                    let reply = route
                        .replies
                        .get(attempt)
                        .or(route.replies.last())
                        .cloned();
                    (reply, route.gate.clone())
                }
                None => (None, None),
            }
        };

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(gate) = gate {
            gate.pass().await;
        }

        match reply.or_else(|| self.fallback.clone().map(Reply::Body)) {
            Some(Reply::Body(body)) => Ok(body),
            Some(Reply::Status(status)) => Err(NetworkError::Status { url: key, status }),
            None => Err(NetworkError::Status {
                url: key,
                status: 404,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum PageScript {
    Photos { skipped: usize },
    Empty,
    Status(u16),
}

/// A [`PhotoSearch`] with a fixed page count that fabricates its pages.
///
/// Page `n` holds `per_page` descriptors whose asset URLs come from
/// [`ScriptedSearch::asset_url`].
#[derive(Debug)]
pub struct ScriptedSearch {
    total_pages: u32,
    per_page: usize,
    discovery_status: Option<u16>,
    pages: Mutex<HashMap<u32, PageScript>>,
    latency: Option<Duration>,
    gate: Mutex<Option<Gate>>,
    discovery_calls: AtomicUsize,
    page_calls: Mutex<Vec<u32>>,
}

impl ScriptedSearch {
    pub fn new(total_pages: u32, per_page: usize) -> Self {
        Self {
            total_pages,
            per_page,
            discovery_status: None,
            pages: Mutex::default(),
            latency: None,
            gate: Mutex::default(),
            discovery_calls: AtomicUsize::new(0),
            page_calls: Mutex::default(),
        }
    }

    pub fn asset_url(page: u32, index: usize) -> String {
        format!("https://live.staticflickr.test/{page}/{page}_{index}_m.jpg")
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Makes discovery fail with an HTTP status.
    pub fn failing_discovery(mut self, status: u16) -> Self {
        self.discovery_status = Some(status);
        self
    }

    pub fn fail_page(&self, page: u32, status: u16) {
        self.script(page, PageScript::Status(status));
    }

    pub fn empty_page(&self, page: u32) {
        self.script(page, PageScript::Empty);
    }

    /// Page `page` also reports `skipped` malformed entries.
    pub fn partial_page(&self, page: u32, skipped: usize) {
        self.script(page, PageScript::Photos { skipped });
    }

    fn script(&self, page: u32, script: PageScript) {
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(page, script);
    }

    /// Holds every subsequent call until the returned gate is released.
    pub fn hold(&self) -> Gate {
        let gate = Gate::new();
        *self.gate.lock().unwrap_or_else(PoisonError::into_inner) = Some(gate.clone());
        gate
    }

    pub fn discovery_calls(&self) -> usize {
        self.discovery_calls.load(Ordering::SeqCst)
    }

    pub fn page_calls(&self) -> Vec<u32> {
        self.page_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let gate = self
            .gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }
    }

    fn descriptors(&self, page: u32) -> Vec<PhotoDescriptor> {
        (0..self.per_page)
            .filter_map(|i| {
                let url = Url::parse(&Self::asset_url(page, i)).ok()?;
                PhotoDescriptor::new(url, format!("{page}{i:04}"), format!("page {page} #{i}")).ok()
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl PhotoSearch for ScriptedSearch {
    async fn page_count(&self, _at: Coordinates) -> Result<Discovery, FetchError> {
        self.discovery_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if let Some(status) = self.discovery_status {
            return Err(NetworkError::Status {
                url: "scripted://discovery".into(),
                status,
            }
            .into());
        }
        Ok(Discovery::from_total(self.total_pages))
    }

    async fn page(&self, _at: Coordinates, page: u32) -> Result<Page, FetchError> {
        self.page_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(page);
        self.delay().await;

        let script = self
            .pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&page)
            .copied()
            .unwrap_or(PageScript::Photos { skipped: 0 });

        match script {
            PageScript::Status(status) => Err(NetworkError::Status {
                url: format!("scripted://page/{page}"),
                status,
            }
            .into()),
            PageScript::Empty => Ok(Page {
                number: page,
                descriptors: Vec::new(),
                skipped: 0,
            }),
            PageScript::Photos { skipped } => Ok(Page {
                number: page,
                descriptors: self.descriptors(page),
                skipped,
            }),
        }
    }
}
