//! The page-rendering capability the crawl and the acquirers are written against.
//!
//! Nothing in here knows about a concrete browser: `browser_controller` provides the
//! Chrome-backed implementation and the tests provide scripted fakes.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    DomContentLoaded,
    Load,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn center(&self) -> (f64, f64) {
        ((self.width / 2) as f64, (self.height / 2) as f64)
    }
}

pub type RequestMatcher = Arc<dyn Fn(&str) -> bool + Send + Sync>;

#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn navigate(&self, url: &str, wait: WaitPolicy) -> anyhow::Result<()>;

    /// Evaluates a JS expression and returns its JSON value (`Null` for `undefined`).
    async fn evaluate(&self, script: &str) -> anyhow::Result<Value>;

    async fn wait_for_network_idle(&self, timeout: Duration) -> anyhow::Result<()>;

    /// Starts observing outgoing requests. The returned subscription resolves with the
    /// first url accepted by `matcher` and detaches itself afterwards.
    fn observe_requests(&self, matcher: RequestMatcher) -> anyhow::Result<RequestSubscription>;

    async fn click(&self, x: f64, y: f64) -> anyhow::Result<()>;

    async fn viewport_size(&self) -> anyhow::Result<Option<Viewport>>;
}

/// A browsing context able to hand out pages sharing its identity and cookie jar.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn new_page(&self) -> anyhow::Result<Arc<dyn PageDriver>>;
}

/// Sending half of a [`RequestSubscription`]. Only the first offered url is kept.
#[derive(Clone)]
pub struct FirstMatch {
    slot: Arc<Mutex<Option<oneshot::Sender<String>>>>,
}

impl FirstMatch {
    /// Returns true when `url` was the first match and got delivered.
    pub fn offer(&self, url: &str) -> bool {
        let sender = match self.slot.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        match sender {
            Some(tx) => tx.send(url.to_string()).is_ok(),
            None => false,
        }
    }
}

pub struct RequestSubscription {
    rx: oneshot::Receiver<String>,
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl RequestSubscription {
    pub fn channel() -> (FirstMatch, Self) {
        let (tx, rx) = oneshot::channel();
        let first = FirstMatch {
            slot: Arc::new(Mutex::new(Some(tx))),
        };
        (first, RequestSubscription { rx, detach: None })
    }

    /// Registers the teardown of the underlying observer. It runs exactly once: after
    /// the first match, on timeout, or when the subscription is dropped.
    pub fn on_detach(mut self, detach: impl FnOnce() + Send + 'static) -> Self {
        self.detach = Some(Box::new(detach));
        self
    }

    pub async fn first_match(mut self, timeout: Duration) -> Option<String> {
        let res = tokio::time::timeout(timeout, &mut self.rx).await;
        self.detach();
        match res {
            Ok(Ok(url)) => Some(url),
            _ => None,
        }
    }

    fn detach(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for RequestSubscription {
    fn drop(&mut self) {
        self.detach();
    }
}
