//! Connectivity observer: reports whether the remote is reachable and
//! streams changes.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::{sync::Arc, time::Duration};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info};

#[derive(Debug, Clone, thiserror::Error)]
#[error("connectivity observer failed: {0}")]
pub struct ConnectivityError(pub String);

/// Stream of connectivity values. Ends when the observer goes away.
pub type ConnectivityStream = BoxStream<'static, Result<bool, ConnectivityError>>;

#[async_trait]
pub trait ConnectivityObserver: Send + Sync {
    /// Current reachability.
    async fn is_connected(&self) -> bool;

    /// Changes after the moment of subscription. The current value is not
    /// replayed; rapid changes may coalesce into the latest one.
    fn subscribe(&self) -> ConnectivityStream;
}

/// Connectivity driven by whoever owns it: a probe task, the platform's
/// network callbacks, or a test.
#[derive(Debug)]
pub struct WatchConnectivity {
    state: watch::Sender<bool>,
}

impl WatchConnectivity {
    pub fn new(connected: bool) -> Self {
        let (state, _) = watch::channel(connected);
        Self { state }
    }

    pub fn shared(connected: bool) -> Arc<Self> {
        Arc::new(Self::new(connected))
    }

    /// Update reachability. Returns whether the value changed.
    pub fn set_connected(&self, connected: bool) -> bool {
        self.state.send_if_modified(|current| {
            if *current == connected {
                false
            } else {
                *current = connected;
                true
            }
        })
    }

    pub fn connected(&self) -> bool {
        *self.state.borrow()
    }
}

#[async_trait]
impl ConnectivityObserver for WatchConnectivity {
    async fn is_connected(&self) -> bool {
        self.connected()
    }

    fn subscribe(&self) -> ConnectivityStream {
        let receiver = self.state.subscribe();
        stream::unfold(receiver, |mut receiver| async move {
            receiver.changed().await.ok()?;
            let connected = *receiver.borrow_and_update();
            Some((Ok(connected), receiver))
        })
        .boxed()
    }
}

/// Periodically probes a URL. Any HTTP response counts as reachable.
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
    interval: Duration,
    state: Arc<WatchConnectivity>,
}

impl HttpProbe {
    pub fn new(
        url: impl Into<String>,
        interval: Duration,
        timeout: Duration,
    ) -> Result<Self, ConnectivityError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConnectivityError(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
            interval: interval.max(Duration::from_millis(1)),
            state: WatchConnectivity::shared(false),
        })
    }

    /// The observer this probe feeds.
    pub fn observer(&self) -> Arc<WatchConnectivity> {
        Arc::clone(&self.state)
    }

    /// Probe once and publish the result.
    pub async fn probe(&self) -> bool {
        let reachable = self.client.head(&self.url).send().await.is_ok();
        if self.state.set_connected(reachable) {
            info!(connected = reachable, url = %self.url, "Connectivity changed");
        } else {
            debug!(connected = reachable, "Connectivity probe");
        }
        reachable
    }

    /// Probe on an interval until the task is aborted. The first probe runs
    /// immediately.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                self.probe().await;
            }
        })
    }
}
